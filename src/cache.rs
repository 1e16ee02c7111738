//! Day-keyed result cache
//!
//! Stores the serialized result envelope of a screening run under a key of
//! (day, filter signature, top_n). Writes go through a temp file in the cache
//! directory and are renamed into place.

use std::{
    io::Write,
    path::{Path, PathBuf},
    time::{Duration, SystemTime},
};

use chrono::NaiveDate;
use tracing::{debug, warn};

use crate::Result;

pub const DEFAULT_RETENTION_DAYS: u64 = 7;
/// Prefix of in-flight writes; leftovers from an interrupted store are swept too
const TEMP_PREFIX: &str = ".chartscan-";

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CacheKey {
    pub date: NaiveDate,
    /// `<filter or ma_only>_<pattern|no_pattern>`
    pub signature: String,
    pub top_n: i64,
}

impl CacheKey {
    pub fn new(date: NaiveDate, filter: Option<&str>, analyze_patterns: bool, top_n: i64) -> Self {
        let mode = if analyze_patterns { "pattern" } else { "no_pattern" };
        Self {
            date,
            signature: format!("{}_{mode}", filter.unwrap_or("ma_only")),
            top_n,
        }
    }

    pub fn file_name(&self) -> String {
        format!(
            "{}_{}_{}.json",
            self.date.format("%Y%m%d"),
            self.signature.replace(':', "_"),
            self.top_n
        )
    }
}

#[derive(Debug, Clone)]
pub struct ResultCache {
    dir: PathBuf,
    retention: Duration,
}

impl ResultCache {
    pub fn new(dir: impl Into<PathBuf>, retention_days: u64) -> Self {
        Self {
            dir: dir.into(),
            retention: Duration::from_secs(retention_days * 24 * 60 * 60),
        }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn path(&self, key: &CacheKey) -> PathBuf {
        self.dir.join(key.file_name())
    }

    /// Cached envelope body, if present and valid JSON
    pub fn load(&self, key: &CacheKey) -> Option<String> {
        let path = self.path(key);
        let body = std::fs::read_to_string(&path).ok()?;
        match serde_json::from_str::<serde_json::Value>(&body) {
            Ok(_) => Some(body),
            Err(e) => {
                warn!(path = %path.display(), error = %e, "ignoring corrupt cache entry");
                None
            }
        }
    }

    pub fn store(&self, key: &CacheKey, body: &str) -> Result<()> {
        std::fs::create_dir_all(&self.dir)?;
        let mut tmp = tempfile::Builder::new()
            .prefix(TEMP_PREFIX)
            .suffix(".part")
            .tempfile_in(&self.dir)?;
        tmp.write_all(body.as_bytes())?;
        tmp.flush()?;
        tmp.persist(self.path(key)).map_err(|e| e.error)?;
        Ok(())
    }

    /// Delete entries and stale temp files older than the retention window.
    /// Returns the number removed.
    pub fn sweep(&self) -> usize {
        self.sweep_at(SystemTime::now())
    }

    pub fn sweep_at(&self, now: SystemTime) -> usize {
        let Some(cutoff) = now.checked_sub(self.retention) else {
            return 0;
        };
        let Ok(entries) = std::fs::read_dir(&self.dir) else {
            return 0;
        };

        let mut removed = 0;
        for entry in entries.flatten() {
            let path = entry.path();
            if !is_sweepable(&path) {
                continue;
            }
            let Ok(modified) = entry.metadata().and_then(|m| m.modified()) else {
                continue;
            };
            if modified >= cutoff {
                continue;
            }
            match std::fs::remove_file(&path) {
                Ok(()) => {
                    debug!(path = %path.display(), "swept cache entry");
                    removed += 1;
                }
                Err(e) => warn!(path = %path.display(), error = %e, "failed to sweep cache entry"),
            }
        }
        removed
    }
}

fn is_sweepable(path: &Path) -> bool {
    let is_entry = path.extension().and_then(|e| e.to_str()) == Some("json");
    let is_temp = path
        .file_name()
        .and_then(|n| n.to_str())
        .is_some_and(|n| n.starts_with(TEMP_PREFIX));
    is_entry || is_temp
}

#[cfg(test)]
mod tests {
    use super::*;

    fn day() -> NaiveDate {
        NaiveDate::from_ymd_opt(2024, 3, 9).unwrap()
    }

    #[test]
    fn test_key_file_name() {
        let key = CacheKey::new(day(), Some("regime:2"), false, 10);
        assert_eq!(key.file_name(), "20240309_regime_2_no_pattern_10.json");
        let key = CacheKey::new(day(), None, true, 0);
        assert_eq!(key.file_name(), "20240309_ma_only_pattern_0.json");
    }

    #[test]
    fn test_store_then_load() {
        let dir = tempfile::tempdir().unwrap();
        let cache = ResultCache::new(dir.path().join("cache"), DEFAULT_RETENTION_DAYS);
        let key = CacheKey::new(day(), Some("half_cup"), true, 5);
        assert_eq!(cache.load(&key), None);

        let body = r#"{"results":[],"mode":"analyze_result","filter":"half_cup"}"#;
        cache.store(&key, body).unwrap();
        assert_eq!(cache.load(&key).as_deref(), Some(body));
        // no temp files stay behind
        assert_eq!(std::fs::read_dir(cache.dir()).unwrap().count(), 1);
    }

    #[test]
    fn test_corrupt_entry_is_miss() {
        let dir = tempfile::tempdir().unwrap();
        let cache = ResultCache::new(dir.path(), DEFAULT_RETENTION_DAYS);
        let key = CacheKey::new(day(), None, false, 10);
        std::fs::write(cache.path(&key), "{truncated").unwrap();
        assert_eq!(cache.load(&key), None);
    }

    #[test]
    fn test_sweep_removes_abandoned_temp_files() {
        let dir = tempfile::tempdir().unwrap();
        let cache = ResultCache::new(dir.path(), DEFAULT_RETENTION_DAYS);
        let key = CacheKey::new(day(), Some("deadcross"), true, 10);
        cache.store(&key, "[]").unwrap();
        let leftover = dir.path().join(format!("{TEMP_PREFIX}a1b2c3.part"));
        std::fs::write(&leftover, "{\"results\":").unwrap();

        assert_eq!(cache.sweep(), 0);
        assert!(leftover.exists());
        let later = SystemTime::now() + Duration::from_secs(8 * 24 * 60 * 60);
        assert_eq!(cache.sweep_at(later), 2);
        assert!(!leftover.exists());
        assert!(!cache.path(&key).exists());
    }

    #[test]
    fn test_sweep_removes_expired_json_only() {
        let dir = tempfile::tempdir().unwrap();
        let cache = ResultCache::new(dir.path(), DEFAULT_RETENTION_DAYS);
        let key = CacheKey::new(day(), None, false, 10);
        cache.store(&key, "[]").unwrap();
        std::fs::write(dir.path().join("notes.txt"), "keep").unwrap();

        assert_eq!(cache.sweep(), 0);
        let later = SystemTime::now() + Duration::from_secs(8 * 24 * 60 * 60);
        assert_eq!(cache.sweep_at(later), 1);
        assert!(!cache.path(&key).exists());
        assert!(dir.path().join("notes.txt").exists());
    }
}
