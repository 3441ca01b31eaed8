//! Ordered chain of cache tiers.
//!
//! Lookups walk the tiers front to back and stop at the first hit. A hit in a
//! later tier is returned as-is and is not copied into earlier tiers. Writes
//! go to every tier; a tier that fails to store a payload is logged and
//! counted, and never fails the caller.

use std::sync::Arc;

use bytes::Bytes;
use futures::future::join_all;
use tracing::{debug, warn};

use super::key::CacheKey;
use super::traits::{CacheError, CacheTier, PutOutcome};

/// Result of a chain lookup.
#[derive(Debug, Clone, PartialEq)]
pub struct ChainHit {
    pub payload: Bytes,
    /// Name of the tier that answered.
    pub tier: String,
}

/// Summary of a chain-wide write.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ChainWrite {
    /// Per-tier outcomes, in tier order; `None` where the tier failed.
    pub outcomes: Vec<Option<PutOutcome>>,
}

impl ChainWrite {
    /// Number of tiers that failed to store the payload.
    pub fn failures(&self) -> usize {
        self.outcomes.iter().filter(|o| o.is_none()).count()
    }
}

/// Cache tiers queried in order.
#[derive(Clone, Default)]
pub struct CacheChain {
    tiers: Vec<Arc<dyn CacheTier>>,
}

impl CacheChain {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a tier to the end of the chain.
    pub fn with_tier(mut self, tier: Arc<dyn CacheTier>) -> Self {
        self.tiers.push(tier);
        self
    }

    pub fn tiers(&self) -> &[Arc<dyn CacheTier>] {
        &self.tiers
    }

    pub fn is_empty(&self) -> bool {
        self.tiers.is_empty()
    }

    /// Query each tier in order and return the first hit.
    ///
    /// A tier that errors is treated as a miss for that tier.
    pub async fn get(&self, key: &CacheKey) -> Option<ChainHit> {
        for tier in &self.tiers {
            match tier.get(key).await {
                Ok(Some(payload)) => {
                    debug!(key = %key, tier = tier.name(), "Cache hit");
                    return Some(ChainHit {
                        payload,
                        tier: tier.name().to_string(),
                    });
                }
                Ok(None) => {}
                Err(e) => {
                    warn!(
                        key = %key,
                        tier = tier.name(),
                        error = %e,
                        "Cache read failed, treating as miss"
                    );
                }
            }
        }
        None
    }

    /// Write a payload to every tier.
    pub async fn put(&self, key: &CacheKey, payload: Bytes, force_insert: bool) -> ChainWrite {
        let mut outcomes = Vec::with_capacity(self.tiers.len());
        for tier in &self.tiers {
            match tier.put(key, payload.clone(), force_insert).await {
                Ok(outcome) => outcomes.push(Some(outcome)),
                Err(e) => {
                    warn!(
                        key = %key,
                        tier = tier.name(),
                        error = %e,
                        "Cache write failed, tile stays uncached in this tier"
                    );
                    outcomes.push(None);
                }
            }
        }
        ChainWrite { outcomes }
    }

    /// Clear every tier concurrently.
    pub async fn clear(&self) -> Result<(), CacheError> {
        let results = join_all(self.tiers.iter().map(|tier| tier.clear())).await;
        results.into_iter().collect()
    }

    /// Reinitialise every tier concurrently.
    pub async fn reinit(&self) -> Result<(), CacheError> {
        let results = join_all(self.tiers.iter().map(|tier| tier.reinit())).await;
        results.into_iter().collect()
    }
}
