//! Core trait for a single cache tier.
//!
//! A [`CacheTier`] is one layer of the lookup chain. Tiers are keyed by
//! [`CacheKey`] and store raw payload bytes; decoding is left to the caller.
//!
//! # Dyn Compatibility
//!
//! Async methods return [`BoxFuture`] so tiers can be held as
//! `Arc<dyn CacheTier>` inside a [`CacheChain`](super::CacheChain).

use std::future::Future;
use std::pin::Pin;

use bytes::Bytes;
use thiserror::Error;

use super::key::CacheKey;

/// Boxed future type for dyn-compatible async methods.
pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// Errors that can occur inside a cache tier.
#[derive(Debug, Error)]
pub enum CacheError {
    /// I/O error in a persistent tier.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// A background filesystem task failed to complete.
    #[error("Background task failed: {0}")]
    Task(String),
}

/// What a `put` did to the tier.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PutOutcome {
    /// A new entry was stored, possibly after evicting the oldest one.
    Inserted { evicted: Option<CacheKey> },

    /// An existing entry was overwritten by a forced insert.
    Replaced,

    /// The key was already cached and the put was not forced.
    AlreadyPresent,
}

/// One layer of the tile cache.
///
/// # Contract
///
/// - At most one entry per key.
/// - Never more than [`max_entries`](Self::max_entries) entries after a `put`
///   returns; a full tier evicts its oldest insertion first.
/// - A non-forced `put` never overwrites an existing key.
/// - After `clear` or `reinit` returns, no earlier entry is returned by `get`.
///
/// # Thread Safety
///
/// Implementations are `Send + Sync`; they are shared between the driver loop
/// and fetch tasks.
pub trait CacheTier: Send + Sync {
    /// Short name for logs ("memory", "disk").
    fn name(&self) -> &str;

    /// Look up a payload.
    fn get<'a>(&'a self, key: &'a CacheKey) -> BoxFuture<'a, Result<Option<Bytes>, CacheError>>;

    /// Store a payload.
    ///
    /// `force_insert` overwrites an existing entry instead of keeping the
    /// first writer's payload.
    fn put<'a>(
        &'a self,
        key: &'a CacheKey,
        payload: Bytes,
        force_insert: bool,
    ) -> BoxFuture<'a, Result<PutOutcome, CacheError>>;

    /// Discard every entry.
    fn clear(&self) -> BoxFuture<'_, Result<(), CacheError>>;

    /// Discard every entry and rebuild the tier's backing state.
    fn reinit(&self) -> BoxFuture<'_, Result<(), CacheError>>;

    /// Current number of entries.
    fn entry_count(&self) -> usize;

    /// Configured capacity.
    fn max_entries(&self) -> usize;
}
