//! Bounded in-memory cache tier.
//!
//! Entries are evicted strictly in insertion order: when the tier is full, the
//! entry with the oldest insertion timestamp goes, regardless of how recently
//! it was read. Finding that entry is a linear scan, which is cheap at the
//! tens-to-hundreds of tiles a viewport keeps around.
//!
//! All state sits behind one `parking_lot::Mutex` that is held only for the
//! duration of a map operation, never across an `.await`.

use std::collections::HashMap;
use std::time::Instant;

use bytes::Bytes;
use parking_lot::Mutex;
use tracing::trace;

use super::key::CacheKey;
use super::traits::{BoxFuture, CacheError, CacheTier, PutOutcome};

/// A cached payload and when it was inserted.
#[derive(Debug, Clone)]
pub struct CacheEntry {
    pub key: CacheKey,
    pub payload: Bytes,
    pub inserted_at: Instant,
    /// Monotonic insertion counter; breaks ties between equal `Instant`s.
    sequence: u64,
}

#[derive(Default)]
struct MemoryState {
    entries: HashMap<CacheKey, CacheEntry>,
    next_sequence: u64,
}

impl MemoryState {
    fn next_sequence(&mut self) -> u64 {
        let sequence = self.next_sequence;
        self.next_sequence += 1;
        sequence
    }

    fn oldest_key(&self) -> Option<CacheKey> {
        self.entries
            .values()
            .min_by_key(|entry| entry.sequence)
            .map(|entry| entry.key.clone())
    }
}

/// In-memory tier bounded by entry count.
pub struct MemoryTier {
    state: Mutex<MemoryState>,
    max_entries: usize,
}

impl MemoryTier {
    /// Create a tier holding at most `max_entries` payloads (minimum 1).
    pub fn new(max_entries: usize) -> Self {
        Self {
            state: Mutex::new(MemoryState::default()),
            max_entries: max_entries.max(1),
        }
    }

    fn get_now(&self, key: &CacheKey) -> Option<Bytes> {
        self.state
            .lock()
            .entries
            .get(key)
            .map(|entry| entry.payload.clone())
    }

    fn put_now(&self, key: &CacheKey, payload: Bytes, force_insert: bool) -> PutOutcome {
        let mut state = self.state.lock();
        let sequence = state.next_sequence();

        if let Some(existing) = state.entries.get_mut(key) {
            if !force_insert {
                return PutOutcome::AlreadyPresent;
            }
            existing.payload = payload;
            existing.inserted_at = Instant::now();
            existing.sequence = sequence;
            return PutOutcome::Replaced;
        }

        let evicted = if state.entries.len() >= self.max_entries {
            let oldest = state.oldest_key();
            if let Some(ref oldest) = oldest {
                state.entries.remove(oldest);
                trace!(evicted = %oldest, inserted = %key, "Memory tier evicted oldest entry");
            }
            oldest
        } else {
            None
        };

        state.entries.insert(
            key.clone(),
            CacheEntry {
                key: key.clone(),
                payload,
                inserted_at: Instant::now(),
                sequence,
            },
        );

        PutOutcome::Inserted { evicted }
    }

    fn clear_now(&self) {
        let mut state = self.state.lock();
        state.entries.clear();
    }

    /// Snapshot of the cached keys, oldest insertion first.
    pub fn keys_by_age(&self) -> Vec<CacheKey> {
        let state = self.state.lock();
        let mut entries: Vec<_> = state.entries.values().collect();
        entries.sort_by_key(|entry| entry.sequence);
        entries.into_iter().map(|entry| entry.key.clone()).collect()
    }
}

impl CacheTier for MemoryTier {
    fn name(&self) -> &str {
        "memory"
    }

    fn get<'a>(&'a self, key: &'a CacheKey) -> BoxFuture<'a, Result<Option<Bytes>, CacheError>> {
        Box::pin(async move { Ok(self.get_now(key)) })
    }

    fn put<'a>(
        &'a self,
        key: &'a CacheKey,
        payload: Bytes,
        force_insert: bool,
    ) -> BoxFuture<'a, Result<PutOutcome, CacheError>> {
        Box::pin(async move { Ok(self.put_now(key, payload, force_insert)) })
    }

    fn clear(&self) -> BoxFuture<'_, Result<(), CacheError>> {
        Box::pin(async move {
            self.clear_now();
            Ok(())
        })
    }

    fn reinit(&self) -> BoxFuture<'_, Result<(), CacheError>> {
        Box::pin(async move {
            *self.state.lock() = MemoryState::default();
            Ok(())
        })
    }

    fn entry_count(&self) -> usize {
        self.state.lock().entries.len()
    }

    fn max_entries(&self) -> usize {
        self.max_entries
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tile::CanonicalTileId;
    use proptest::prelude::*;

    fn key(x: u32) -> CacheKey {
        CacheKey::new("test", CanonicalTileId::new(10, x, 100).unwrap())
    }

    fn payload(byte: u8) -> Bytes {
        Bytes::from(vec![byte; 4])
    }

    #[tokio::test]
    async fn test_put_and_get() {
        let tier = MemoryTier::new(10);
        tier.put(&key(1), payload(1), false).await.unwrap();

        assert_eq!(tier.get(&key(1)).await.unwrap(), Some(payload(1)));
        assert_eq!(tier.get(&key(2)).await.unwrap(), None);
        assert_eq!(tier.entry_count(), 1);
    }

    #[tokio::test]
    async fn test_capacity_two_evicts_first_insert() {
        let tier = MemoryTier::new(2);
        tier.put(&key(1), payload(1), false).await.unwrap();
        tier.put(&key(2), payload(2), false).await.unwrap();
        let outcome = tier.put(&key(3), payload(3), false).await.unwrap();

        assert_eq!(
            outcome,
            PutOutcome::Inserted {
                evicted: Some(key(1))
            }
        );
        assert_eq!(tier.get(&key(1)).await.unwrap(), None);
        assert_eq!(tier.get(&key(2)).await.unwrap(), Some(payload(2)));
        assert_eq!(tier.get(&key(3)).await.unwrap(), Some(payload(3)));
    }

    #[tokio::test]
    async fn test_reads_do_not_refresh_age() {
        let tier = MemoryTier::new(2);
        tier.put(&key(1), payload(1), false).await.unwrap();
        tier.put(&key(2), payload(2), false).await.unwrap();

        // A read of key 1 does not protect it; eviction is by insertion time.
        tier.get(&key(1)).await.unwrap();
        tier.put(&key(3), payload(3), false).await.unwrap();

        assert_eq!(tier.get(&key(1)).await.unwrap(), None);
        assert_eq!(tier.keys_by_age(), vec![key(2), key(3)]);
    }

    #[tokio::test]
    async fn test_first_writer_wins_without_force() {
        let tier = MemoryTier::new(2);
        tier.put(&key(1), payload(1), false).await.unwrap();
        let outcome = tier.put(&key(1), payload(9), false).await.unwrap();

        assert_eq!(outcome, PutOutcome::AlreadyPresent);
        assert_eq!(tier.get(&key(1)).await.unwrap(), Some(payload(1)));
    }

    #[tokio::test]
    async fn test_existing_key_on_full_tier_evicts_nothing() {
        let tier = MemoryTier::new(2);
        tier.put(&key(1), payload(1), false).await.unwrap();
        tier.put(&key(2), payload(2), false).await.unwrap();
        tier.put(&key(2), payload(7), false).await.unwrap();

        assert_eq!(tier.entry_count(), 2);
        assert!(tier.get(&key(1)).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_forced_put_replaces_and_renews_age() {
        let tier = MemoryTier::new(2);
        tier.put(&key(1), payload(1), false).await.unwrap();
        tier.put(&key(2), payload(2), false).await.unwrap();
        let outcome = tier.put(&key(1), payload(9), true).await.unwrap();

        assert_eq!(outcome, PutOutcome::Replaced);
        assert_eq!(tier.get(&key(1)).await.unwrap(), Some(payload(9)));
        assert_eq!(tier.keys_by_age(), vec![key(2), key(1)]);
    }

    #[tokio::test]
    async fn test_clear_and_reinit_discard_entries() {
        let tier = MemoryTier::new(4);
        tier.put(&key(1), payload(1), false).await.unwrap();
        tier.clear().await.unwrap();
        assert_eq!(tier.entry_count(), 0);
        assert_eq!(tier.get(&key(1)).await.unwrap(), None);

        tier.put(&key(2), payload(2), false).await.unwrap();
        tier.reinit().await.unwrap();
        assert_eq!(tier.get(&key(2)).await.unwrap(), None);
    }

    #[test]
    fn test_zero_capacity_is_clamped() {
        let tier = MemoryTier::new(0);
        assert_eq!(tier.max_entries(), 1);
    }

    #[tokio::test]
    async fn test_concurrent_puts_respect_capacity() {
        use std::sync::Arc;

        let tier = Arc::new(MemoryTier::new(16));
        let mut handles = Vec::new();
        for i in 0..100u32 {
            let tier = Arc::clone(&tier);
            handles.push(tokio::spawn(async move {
                tier.put(&key(i), payload(i as u8), false).await.unwrap();
            }));
        }
        for handle in handles {
            handle.await.unwrap();
        }
        assert_eq!(tier.entry_count(), 16);
    }

    proptest! {
        #[test]
        fn prop_capacity_never_exceeded_and_oldest_evicted(
            capacity in 1usize..8,
            xs in proptest::collection::vec(0u32..32, 1..64),
        ) {
            let tier = MemoryTier::new(capacity);
            for x in xs {
                let before = tier.keys_by_age();
                let outcome =
                    futures::executor::block_on(tier.put(&key(x), payload(0), false)).unwrap();

                prop_assert!(tier.entry_count() <= capacity);
                if let PutOutcome::Inserted { evicted: Some(evicted) } = outcome {
                    prop_assert_eq!(Some(&evicted), before.first());
                }
            }
        }
    }
}
