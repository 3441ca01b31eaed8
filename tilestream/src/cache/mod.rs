//! Multi-tier tile cache.
//!
//! A [`CacheChain`] holds an ordered list of [`CacheTier`]s, typically a
//! bounded [`MemoryTier`] followed by a persistent [`DiskTier`]. Both tiers
//! evict in insertion order and never overwrite an existing key unless the
//! write is forced.
//!
//! ```text
//! get ──► memory ──miss──► disk ──miss──► None
//! put ──► memory ─────────► disk
//! ```

mod chain;
mod disk;
mod key;
mod memory;
mod traits;

pub use chain::{CacheChain, ChainHit, ChainWrite};
pub use disk::DiskTier;
pub use key::CacheKey;
pub use memory::{CacheEntry, MemoryTier};
pub use traits::{BoxFuture, CacheError, CacheTier, PutOutcome};
