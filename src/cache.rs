//! Per-set picture cache: a coalesced JSON header plus one ordered list file
//! per configured set.

use std::collections::BTreeMap;
use std::fs;
use std::path::PathBuf;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::error::Error;
use crate::events::ImagePath;
use crate::order::OrderPolicy;

const HEADER_FILE: &str = "header.json";

/// Header metadata for one set. The policy is stored by name so a header
/// written by a newer build degrades to "no cache" instead of failing the
/// whole header parse.
#[derive(Debug, Clone, Serialize, Deserialize)]
struct HeaderRecord {
    policy: String,
    cursor: usize,
    /// `None` is the "never fresh" sentinel: the entry exists but must be
    /// regenerated before it can be trusted as complete.
    timestamp: Option<DateTime<Utc>>,
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct HeaderFile {
    sets: BTreeMap<usize, HeaderRecord>,
}

/// A loaded cache entry: the ordered image list plus its header metadata.
#[derive(Debug, Clone)]
pub struct PictureCacheEntry {
    pub images: Vec<ImagePath>,
    pub policy: OrderPolicy,
    pub cursor: usize,
    pub timestamp: Option<DateTime<Utc>>,
}

/// Owns the on-disk cache. Header writes are coalesced behind a dirty flag
/// (the engine flushes on a fixed tick and on shutdown); list files are
/// written only when the list itself changes.
pub struct PictureSetCache {
    dir: Option<PathBuf>,
    cache_duration: Duration,
    header: BTreeMap<usize, HeaderRecord>,
    header_dirty: bool,
    lists: BTreeMap<usize, Vec<ImagePath>>,
}

impl PictureSetCache {
    pub fn open(dir: impl Into<PathBuf>, cache_duration: Duration) -> Result<Self, Error> {
        let dir = dir.into();
        fs::create_dir_all(&dir)?;
        let header = match fs::read(dir.join(HEADER_FILE)) {
            Ok(bytes) => serde_json::from_slice::<HeaderFile>(&bytes)?.sets,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => BTreeMap::new(),
            Err(err) => return Err(err.into()),
        };
        Ok(Self {
            dir: Some(dir),
            cache_duration,
            header,
            header_dirty: false,
            lists: BTreeMap::new(),
        })
    }

    /// Memory-only cache; used by detour sources and tests. Never touches
    /// the disk.
    pub fn ephemeral(cache_duration: Duration) -> Self {
        Self {
            dir: None,
            cache_duration,
            header: BTreeMap::new(),
            header_dirty: false,
            lists: BTreeMap::new(),
        }
    }

    pub fn cache_duration(&self) -> Duration {
        self.cache_duration
    }

    /// `true` when a freshness stamp is within the cache duration. The
    /// sentinel `None` is never fresh.
    pub fn is_fresh(&self, timestamp: Option<DateTime<Utc>>) -> bool {
        self.is_fresh_at(timestamp, Utc::now())
    }

    fn is_fresh_at(&self, timestamp: Option<DateTime<Utc>>, now: DateTime<Utc>) -> bool {
        let Some(stamp) = timestamp else {
            return false;
        };
        let age = now.signed_duration_since(stamp);
        match chrono::Duration::from_std(self.cache_duration) {
            Ok(limit) => age <= limit,
            Err(_) => true,
        }
    }

    /// A loaded entry is stale when its freshness stamp expired or it was
    /// built under a different policy than currently configured. Stale
    /// entries are still served for display while a reload runs.
    pub fn is_stale(&self, entry: &PictureCacheEntry, configured: OrderPolicy) -> bool {
        entry.policy != configured || !self.is_fresh(entry.timestamp)
    }

    pub fn load(&mut self, set: usize) -> Result<Option<PictureCacheEntry>, Error> {
        let Some(record) = self.header.get(&set).cloned() else {
            return Ok(None);
        };
        let policy = match record.policy.parse::<OrderPolicy>() {
            Ok(policy) => policy,
            Err(err) => {
                warn!(set, policy = %record.policy, %err, "discarding cache entry");
                return Ok(None);
            }
        };
        let images = match self.lists.get(&set) {
            Some(images) => images.clone(),
            None => {
                let Some(path) = self.list_path(set) else {
                    return Ok(None);
                };
                match fs::read(&path) {
                    Ok(bytes) => {
                        let images: Vec<ImagePath> = serde_json::from_slice(&bytes)?;
                        self.lists.insert(set, images.clone());
                        images
                    }
                    Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(None),
                    Err(err) => return Err(err.into()),
                }
            }
        };
        Ok(Some(PictureCacheEntry {
            images,
            policy,
            cursor: record.cursor,
            timestamp: record.timestamp,
        }))
    }

    /// Replace a set's entry wholesale: list file written now, header record
    /// updated and flushed now. `timestamp: None` marks the entry
    /// provisional (an in-progress streaming build or an invalidated list).
    pub fn save(
        &mut self,
        set: usize,
        images: &[ImagePath],
        policy: OrderPolicy,
        cursor: usize,
        timestamp: Option<DateTime<Utc>>,
    ) -> Result<(), Error> {
        if let Some(path) = self.list_path(set) {
            fs::write(&path, serde_json::to_vec(images)?)?;
        }
        self.lists.insert(set, images.to_vec());
        self.header.insert(
            set,
            HeaderRecord {
                policy: policy.as_str().to_string(),
                cursor,
                timestamp,
            },
        );
        self.header_dirty = true;
        self.flush()
    }

    /// Lightweight cursor persistence: header only, coalesced until the next
    /// flush tick. Never touches the list file.
    pub fn update_cursor(&mut self, set: usize, cursor: usize) {
        if let Some(record) = self.header.get_mut(&set) {
            if record.cursor != cursor {
                record.cursor = cursor;
                self.header_dirty = true;
            }
        }
    }

    /// Reset a set's freshness stamp to the "never fresh" sentinel so the
    /// entry is regenerated on next access.
    pub fn invalidate(&mut self, set: usize) {
        if let Some(record) = self.header.get_mut(&set) {
            if record.timestamp.is_some() {
                record.timestamp = None;
                self.header_dirty = true;
            }
        }
    }

    /// Write the header if dirty. Called on a fixed tick and, guaranteed, on
    /// engine shutdown.
    pub fn flush(&mut self) -> Result<(), Error> {
        if !self.header_dirty {
            return Ok(());
        }
        if let Some(dir) = &self.dir {
            let file = HeaderFile {
                sets: self.header.clone(),
            };
            fs::write(dir.join(HEADER_FILE), serde_json::to_vec_pretty(&file)?)?;
            debug!(sets = self.header.len(), "cache header flushed");
        }
        self.header_dirty = false;
        Ok(())
    }
}

impl Drop for PictureSetCache {
    fn drop(&mut self) {
        if let Err(err) = self.flush() {
            warn!(%err, "failed to flush cache header on drop");
        }
    }
}

impl PictureSetCache {
    fn list_path(&self, set: usize) -> Option<PathBuf> {
        self.dir.as_ref().map(|d| d.join(format!("set-{set}.json")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use std::path::PathBuf as StdPathBuf;
    use tempfile::tempdir;

    fn images(n: u64) -> Vec<ImagePath> {
        (0..n)
            .map(|i| ImagePath {
                index: i,
                path: StdPathBuf::from(format!("/p/{i}.jpg")),
                file_date: Utc.timestamp_opt(i as i64, 0).unwrap(),
            })
            .collect()
    }

    #[test]
    fn staleness_boundary_respects_cache_duration() {
        let cache = PictureSetCache::ephemeral(Duration::from_secs(3600));
        let now = Utc::now();
        let over = now - chrono::Duration::seconds(3601);
        let under = now - chrono::Duration::seconds(3599);
        assert!(!cache.is_fresh_at(Some(over), now));
        assert!(cache.is_fresh_at(Some(under), now));
        assert!(!cache.is_fresh_at(None, now));
    }

    #[test]
    fn policy_mismatch_is_stale_even_when_fresh() {
        let cache = PictureSetCache::ephemeral(Duration::from_secs(3600));
        let entry = PictureCacheEntry {
            images: images(1),
            policy: OrderPolicy::Sequence,
            cursor: 0,
            timestamp: Some(Utc::now()),
        };
        assert!(!cache.is_stale(&entry, OrderPolicy::Sequence));
        assert!(cache.is_stale(&entry, OrderPolicy::Random));
    }

    #[test]
    fn save_and_reload_round_trip_on_disk() {
        let dir = tempdir().unwrap();
        let stamp = Utc::now();
        {
            let mut cache = PictureSetCache::open(dir.path(), Duration::from_secs(60)).unwrap();
            cache
                .save(2, &images(3), OrderPolicy::Sequence, 1, Some(stamp))
                .unwrap();
            cache.flush().unwrap();
        }
        let mut cache = PictureSetCache::open(dir.path(), Duration::from_secs(60)).unwrap();
        let entry = cache.load(2).unwrap().expect("entry should persist");
        assert_eq!(entry.images, images(3));
        assert_eq!(entry.policy, OrderPolicy::Sequence);
        assert_eq!(entry.cursor, 1);
        assert_eq!(entry.timestamp, Some(stamp));
    }

    #[test]
    fn cursor_update_is_header_only_and_coalesced() {
        let dir = tempdir().unwrap();
        let mut cache = PictureSetCache::open(dir.path(), Duration::from_secs(60)).unwrap();
        cache
            .save(0, &images(2), OrderPolicy::Sequence, 0, Some(Utc::now()))
            .unwrap();
        let list_before = fs::read(dir.path().join("set-0.json")).unwrap();

        cache.update_cursor(0, 1);
        // Not yet on disk; the flush tick carries it there.
        let on_disk: HeaderFile =
            serde_json::from_slice(&fs::read(dir.path().join(HEADER_FILE)).unwrap()).unwrap();
        assert_eq!(on_disk.sets[&0].cursor, 0);

        cache.flush().unwrap();
        let on_disk: HeaderFile =
            serde_json::from_slice(&fs::read(dir.path().join(HEADER_FILE)).unwrap()).unwrap();
        assert_eq!(on_disk.sets[&0].cursor, 1);
        assert_eq!(fs::read(dir.path().join("set-0.json")).unwrap(), list_before);
    }

    #[test]
    fn invalidate_resets_to_never_fresh() {
        let mut cache = PictureSetCache::ephemeral(Duration::from_secs(60));
        cache
            .save(0, &images(1), OrderPolicy::Random, 0, Some(Utc::now()))
            .unwrap();
        cache.invalidate(0);
        let entry = cache.load(0).unwrap().unwrap();
        assert_eq!(entry.timestamp, None);
        assert!(cache.is_stale(&entry, OrderPolicy::Random));
    }

    #[test]
    fn unknown_policy_in_header_discards_the_entry() {
        let dir = tempdir().unwrap();
        let header = r#"{"sets":{"0":{"policy":"shiniest-first","cursor":0,"timestamp":null}}}"#;
        fs::write(dir.path().join(HEADER_FILE), header).unwrap();
        fs::write(dir.path().join("set-0.json"), "[]").unwrap();

        let mut cache = PictureSetCache::open(dir.path(), Duration::from_secs(60)).unwrap();
        assert!(cache.load(0).unwrap().is_none());
    }
}
