//! Persistent cache tier backed by one file per tile.
//!
//! # Layout
//!
//! ```text
//! <root>/<dataset>/<zoom>/<x>/<y>.tile
//! ```
//!
//! New payloads are written to a uniquely named temporary file next to their
//! final location and renamed into place, so a concurrent reader sees either
//! no file or the complete payload. The in-memory index is rebuilt from the
//! directory tree on open, ordered by file modification time, which keeps
//! FIFO eviction consistent across process restarts.

use std::collections::{HashMap, HashSet};
use std::io;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::SystemTime;

use bytes::Bytes;
use parking_lot::Mutex;
use tracing::{debug, info, warn};

use super::key::CacheKey;
use super::traits::{BoxFuture, CacheError, CacheTier, PutOutcome};
use crate::tile::CanonicalTileId;

const TILE_EXTENSION: &str = "tile";
const TEMP_EXTENSION: &str = "tmp";

#[derive(Debug, Clone)]
struct DiskEntry {
    path: PathBuf,
    sequence: u64,
}

#[derive(Default)]
struct DiskIndex {
    entries: HashMap<CacheKey, DiskEntry>,
    /// Keys whose payload is being written right now.
    pending: HashSet<CacheKey>,
    next_sequence: u64,
}

impl DiskIndex {
    fn from_scan(found: Vec<ScannedFile>) -> Self {
        let mut index = DiskIndex::default();
        for file in found {
            let sequence = index.next_sequence;
            index.next_sequence += 1;
            index.entries.insert(
                file.key,
                DiskEntry {
                    path: file.path,
                    sequence,
                },
            );
        }
        index
    }

    fn oldest_key(&self) -> Option<CacheKey> {
        self.entries
            .iter()
            .min_by_key(|(_, entry)| entry.sequence)
            .map(|(key, _)| key.clone())
    }
}

struct ScannedFile {
    key: CacheKey,
    path: PathBuf,
    modified: SystemTime,
}

/// Disk tier bounded by entry count with FIFO eviction.
pub struct DiskTier {
    root: PathBuf,
    max_entries: usize,
    index: Mutex<DiskIndex>,
    temp_counter: AtomicU64,
}

impl DiskTier {
    /// Open (or create) a disk tier rooted at `root`.
    ///
    /// Existing tiles are indexed oldest first; if more than `max_entries`
    /// are found the oldest are removed before this returns.
    pub async fn open(root: impl Into<PathBuf>, max_entries: usize) -> Result<Self, CacheError> {
        let root = root.into();
        let max_entries = max_entries.max(1);

        let index = load_index(root.clone()).await?;
        let tier = Self {
            root,
            max_entries,
            index: Mutex::new(index),
            temp_counter: AtomicU64::new(0),
        };

        let overflow = tier.take_overflow();
        for path in &overflow {
            remove_tile_file(path).await;
        }

        info!(
            root = %tier.root.display(),
            entries = tier.entry_count(),
            evicted = overflow.len(),
            max_entries = tier.max_entries,
            "Disk tier opened"
        );

        Ok(tier)
    }

    /// Root directory of the tier.
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Whether the key is currently indexed.
    pub fn contains(&self, key: &CacheKey) -> bool {
        self.index.lock().entries.contains_key(key)
    }

    fn tile_path(&self, key: &CacheKey) -> PathBuf {
        let tile = key.tile();
        self.root
            .join(key.dataset())
            .join(tile.zoom().to_string())
            .join(tile.x().to_string())
            .join(format!("{}.{}", tile.y(), TILE_EXTENSION))
    }

    fn temp_path(&self, final_path: &Path) -> PathBuf {
        let counter = self.temp_counter.fetch_add(1, Ordering::Relaxed);
        let mut name = final_path
            .file_name()
            .map(|n| n.to_os_string())
            .unwrap_or_default();
        name.push(format!(".{}.{}", counter, TEMP_EXTENSION));
        final_path.with_file_name(name)
    }

    /// Pop entries beyond capacity, oldest first.
    fn take_overflow(&self) -> Vec<PathBuf> {
        let mut index = self.index.lock();
        let mut removed = Vec::new();
        while index.entries.len() > self.max_entries {
            let Some(oldest) = index.oldest_key() else {
                break;
            };
            if let Some(entry) = index.entries.remove(&oldest) {
                removed.push(entry.path);
            }
        }
        removed
    }

    async fn get_entry(&self, key: &CacheKey) -> Result<Option<Bytes>, CacheError> {
        let path = match self.index.lock().entries.get(key) {
            Some(entry) => entry.path.clone(),
            None => return Ok(None),
        };

        match tokio::fs::read(&path).await {
            Ok(data) => Ok(Some(Bytes::from(data))),
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                debug!(key = %key, "Indexed tile file missing, dropping from index");
                self.index.lock().entries.remove(key);
                Ok(None)
            }
            Err(e) => Err(e.into()),
        }
    }

    async fn put_entry(
        &self,
        key: &CacheKey,
        payload: Bytes,
        force_insert: bool,
    ) -> Result<PutOutcome, CacheError> {
        let replacing = {
            let mut index = self.index.lock();
            let present = index.entries.contains_key(key) || index.pending.contains(key);
            if present && !force_insert {
                return Ok(PutOutcome::AlreadyPresent);
            }
            index.pending.insert(key.clone());
            index.entries.contains_key(key)
        };

        let final_path = self.tile_path(key);
        if let Err(e) = self.write_atomically(&final_path, &payload).await {
            self.index.lock().pending.remove(key);
            return Err(e.into());
        }

        let victim = {
            let mut index = self.index.lock();
            index.pending.remove(key);

            let victim = if !index.entries.contains_key(key)
                && index.entries.len() >= self.max_entries
            {
                index
                    .oldest_key()
                    .and_then(|oldest| index.entries.remove(&oldest).map(|e| (oldest, e.path)))
            } else {
                None
            };

            let sequence = index.next_sequence;
            index.next_sequence += 1;
            index.entries.insert(
                key.clone(),
                DiskEntry {
                    path: final_path,
                    sequence,
                },
            );
            victim
        };

        if replacing {
            return Ok(PutOutcome::Replaced);
        }

        let evicted = match victim {
            Some((evicted_key, path)) => {
                remove_tile_file(&path).await;
                Some(evicted_key)
            }
            None => None,
        };
        Ok(PutOutcome::Inserted { evicted })
    }

    async fn write_atomically(&self, final_path: &Path, payload: &[u8]) -> io::Result<()> {
        if let Some(parent) = final_path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        let temp_path = self.temp_path(final_path);
        if let Err(e) = tokio::fs::write(&temp_path, payload).await {
            let _ = tokio::fs::remove_file(&temp_path).await;
            return Err(e);
        }
        if let Err(e) = tokio::fs::rename(&temp_path, final_path).await {
            let _ = tokio::fs::remove_file(&temp_path).await;
            return Err(e);
        }
        Ok(())
    }

    async fn wipe(&self) -> Result<(), CacheError> {
        {
            let mut index = self.index.lock();
            index.entries.clear();
        }
        match tokio::fs::remove_dir_all(&self.root).await {
            Ok(()) => {}
            Err(e) if e.kind() == io::ErrorKind::NotFound => {}
            Err(e) => return Err(e.into()),
        }
        tokio::fs::create_dir_all(&self.root).await?;
        Ok(())
    }
}

impl CacheTier for DiskTier {
    fn name(&self) -> &str {
        "disk"
    }

    fn get<'a>(&'a self, key: &'a CacheKey) -> BoxFuture<'a, Result<Option<Bytes>, CacheError>> {
        Box::pin(self.get_entry(key))
    }

    fn put<'a>(
        &'a self,
        key: &'a CacheKey,
        payload: Bytes,
        force_insert: bool,
    ) -> BoxFuture<'a, Result<PutOutcome, CacheError>> {
        Box::pin(self.put_entry(key, payload, force_insert))
    }

    fn clear(&self) -> BoxFuture<'_, Result<(), CacheError>> {
        Box::pin(async move {
            self.wipe().await?;
            info!(root = %self.root.display(), "Disk tier cleared");
            Ok(())
        })
    }

    fn reinit(&self) -> BoxFuture<'_, Result<(), CacheError>> {
        Box::pin(async move {
            self.wipe().await?;
            let fresh = load_index(self.root.clone()).await?;
            {
                let mut index = self.index.lock();
                let pending = std::mem::take(&mut index.pending);
                *index = fresh;
                index.pending = pending;
            }
            info!(root = %self.root.display(), "Disk tier reinitialised");
            Ok(())
        })
    }

    fn entry_count(&self) -> usize {
        self.index.lock().entries.len()
    }

    fn max_entries(&self) -> usize {
        self.max_entries
    }
}

async fn load_index(root: PathBuf) -> Result<DiskIndex, CacheError> {
    let found = tokio::task::spawn_blocking(move || scan_root(&root))
        .await
        .map_err(|e| CacheError::Task(e.to_string()))??;
    Ok(DiskIndex::from_scan(found))
}

async fn remove_tile_file(path: &Path) {
    match tokio::fs::remove_file(path).await {
        Ok(()) => {}
        Err(e) if e.kind() == io::ErrorKind::NotFound => {}
        Err(e) => warn!(path = %path.display(), error = %e, "Failed to remove evicted tile"),
    }
}

/// Walk `<root>/<dataset>/<z>/<x>/<y>.tile`, oldest modification first.
///
/// Leftover temporary files from interrupted writes are deleted. Entries that
/// do not parse as a tile path are ignored.
fn scan_root(root: &Path) -> io::Result<Vec<ScannedFile>> {
    std::fs::create_dir_all(root)?;
    let mut found = Vec::new();

    for dataset_dir in subdirectories(root)? {
        let Some(dataset) = dir_name(&dataset_dir) else {
            continue;
        };
        for zoom_dir in subdirectories(&dataset_dir)? {
            let Some(zoom) = dir_name(&zoom_dir).and_then(|n| n.parse::<u8>().ok()) else {
                continue;
            };
            for x_dir in subdirectories(&zoom_dir)? {
                let Some(x) = dir_name(&x_dir).and_then(|n| n.parse::<u32>().ok()) else {
                    continue;
                };
                scan_column(&x_dir, &dataset, zoom, x, &mut found)?;
            }
        }
    }

    found.sort_by(|a, b| {
        a.modified
            .cmp(&b.modified)
            .then_with(|| a.path.cmp(&b.path))
    });
    Ok(found)
}

fn scan_column(
    dir: &Path,
    dataset: &str,
    zoom: u8,
    x: u32,
    found: &mut Vec<ScannedFile>,
) -> io::Result<()> {
    for entry in std::fs::read_dir(dir)? {
        let entry = entry?;
        let path = entry.path();
        let extension = path.extension().and_then(|e| e.to_str());

        if extension == Some(TEMP_EXTENSION) {
            let _ = std::fs::remove_file(&path);
            continue;
        }
        if extension != Some(TILE_EXTENSION) {
            continue;
        }

        let Some(y) = path
            .file_stem()
            .and_then(|s| s.to_str())
            .and_then(|s| s.parse::<u32>().ok())
        else {
            continue;
        };
        let Ok(tile) = CanonicalTileId::new(zoom, x, y) else {
            continue;
        };

        let modified = entry
            .metadata()
            .and_then(|m| m.modified())
            .unwrap_or(SystemTime::UNIX_EPOCH);

        found.push(ScannedFile {
            key: CacheKey::new(dataset, tile),
            path,
            modified,
        });
    }
    Ok(())
}

fn subdirectories(dir: &Path) -> io::Result<Vec<PathBuf>> {
    let mut dirs = Vec::new();
    for entry in std::fs::read_dir(dir)? {
        let entry = entry?;
        if entry.file_type()?.is_dir() {
            dirs.push(entry.path());
        }
    }
    Ok(dirs)
}

fn dir_name(path: &Path) -> Option<String> {
    path.file_name()
        .and_then(|n| n.to_str())
        .map(|s| s.to_string())
}
