//! Cross-run memory of links that have already been published.
//!
//! The cache file holds two maps side by side:
//!
//! ```json
//! { "rolling": { "<link>": "YYYY-MM-DD" },
//!   "daily":   { "YYYY-MM-DD": ["<link>", ...] } }
//! ```
//!
//! Only the map of the active [`SeenScope`] is consulted, but both survive a
//! load/save cycle so switching scope later loses nothing.

use anyhow::{Context, Result};
use chrono::{Duration as DateDelta, NaiveDate};
use fs2::FileExt;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::{BTreeMap, HashSet};
use std::fmt;
use std::fs::{self, File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::{Duration, Instant};
use thiserror::Error;
use tracing::{debug, info, warn};

const DATE_FORMAT: &str = "%Y-%m-%d";
const LOCK_POLL_INTERVAL: Duration = Duration::from_millis(100);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SeenScope {
    /// A link stays suppressed on every later day until TTL removes it.
    #[default]
    Rolling,
    /// A link is suppressed only for the day it was recorded under.
    Daily,
}

impl FromStr for SeenScope {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_lowercase().as_str() {
            "rolling" => Ok(SeenScope::Rolling),
            "daily" => Ok(SeenScope::Daily),
            other => anyhow::bail!("seen scope must be 'rolling' or 'daily', got '{}'", other),
        }
    }
}

impl fmt::Display for SeenScope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SeenScope::Rolling => write!(f, "rolling"),
            SeenScope::Daily => write!(f, "daily"),
        }
    }
}

#[derive(Debug, Clone)]
pub struct SeenOptions {
    pub path: PathBuf,
    pub scope: SeenScope,
    /// Entries older than `today - ttl_days` are dropped. `None` or a
    /// non-positive value keeps everything.
    pub ttl_days: Option<i64>,
    /// Delete the cache file before reading it.
    pub reset: bool,
    /// The day TTL is measured from.
    pub today: NaiveDate,
}

#[derive(Debug, Default, Clone, PartialEq, Serialize)]
struct SeenData {
    rolling: BTreeMap<String, String>,
    daily: BTreeMap<String, Vec<String>>,
}

pub struct SeenCache {
    path: PathBuf,
    scope: SeenScope,
    ttl_days: Option<i64>,
    today: NaiveDate,
    data: SeenData,
}

impl SeenCache {
    /// Open the cache. This never fails: a missing, unreadable or corrupt
    /// file yields an empty cache.
    pub fn open(options: SeenOptions) -> Self {
        if options.reset {
            match fs::remove_file(&options.path) {
                Ok(()) => info!("Reset seen cache at {}", options.path.display()),
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                Err(e) => warn!(
                    "Could not delete seen cache {}: {}",
                    options.path.display(),
                    e
                ),
            }
        }

        let data = if options.reset {
            SeenData::default()
        } else {
            load_data(&options.path)
        };

        let mut cache = Self {
            path: options.path,
            scope: options.scope,
            ttl_days: options.ttl_days,
            today: options.today,
            data,
        };

        if cache.prune() > 0 {
            if let Err(e) = cache.save() {
                warn!("Could not persist pruned seen cache: {:#}", e);
            }
        }

        cache
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn scope(&self) -> SeenScope {
        self.scope
    }

    /// Links from `links` that have not been recorded as seen for `day`.
    /// Input order is preserved.
    pub fn filter_new<I, S>(&self, links: I, day: NaiveDate) -> Vec<String>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let seen = self.seen_set(day);
        links
            .into_iter()
            .filter(|link| !seen.contains(link.as_ref()))
            .map(|link| link.as_ref().to_string())
            .collect()
    }

    pub fn contains(&self, link: &str, day: NaiveDate) -> bool {
        self.seen_set(day).contains(link)
    }

    /// Number of entries in the active scope.
    pub fn len(&self) -> usize {
        match self.scope {
            SeenScope::Rolling => self.data.rolling.len(),
            SeenScope::Daily => self.data.daily.values().map(Vec::len).sum(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn seen_set(&self, day: NaiveDate) -> HashSet<&str> {
        match self.scope {
            SeenScope::Rolling => self.data.rolling.keys().map(String::as_str).collect(),
            SeenScope::Daily => self
                .data
                .daily
                .get(&day_key(day))
                .map(|links| links.iter().map(String::as_str).collect())
                .unwrap_or_default(),
        }
    }

    /// Record `links` as published on `day`, then prune and persist.
    ///
    /// Remembering a link that is already recorded is a no-op; a rolling
    /// entry keeps the day it was first seen.
    pub fn remember<I, S>(&mut self, day: NaiveDate, links: I) -> Result<()>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut unique = HashSet::new();
        let links: Vec<String> = links
            .into_iter()
            .map(|link| link.as_ref().trim().to_string())
            .filter(|link| !link.is_empty() && unique.insert(link.clone()))
            .collect();

        if links.is_empty() {
            return Ok(());
        }

        let key = day_key(day);
        match self.scope {
            SeenScope::Rolling => {
                for link in links {
                    self.data.rolling.entry(link).or_insert_with(|| key.clone());
                }
            }
            SeenScope::Daily => {
                let bucket = self.data.daily.entry(key).or_default();
                let existing: HashSet<String> = bucket.iter().cloned().collect();
                bucket.extend(links.into_iter().filter(|link| !existing.contains(link)));
            }
        }

        self.prune();
        self.save()
    }

    /// Drop entries recorded strictly before `today - ttl_days`.
    /// Returns how many entries were removed.
    fn prune(&mut self) -> usize {
        let ttl = match self.ttl_days {
            Some(ttl) if ttl > 0 => ttl,
            _ => return 0,
        };
        let cutoff = self.today - DateDelta::days(ttl);

        let removed = match self.scope {
            SeenScope::Rolling => {
                let before = self.data.rolling.len();
                self.data.rolling.retain(|_, day| !older_than(day, cutoff));
                before - self.data.rolling.len()
            }
            SeenScope::Daily => {
                let before = self.data.daily.len();
                self.data.daily.retain(|day, _| !older_than(day, cutoff));
                before - self.data.daily.len()
            }
        };

        if removed > 0 {
            debug!("Pruned {} seen entries older than {}", removed, cutoff);
        }
        removed
    }

    /// Write the cache atomically (temp file + rename).
    fn save(&self) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent).with_context(|| {
                    format!("Failed to create cache directory: {}", parent.display())
                })?;
            }
        }

        let json =
            serde_json::to_string_pretty(&self.data).context("Failed to serialize seen cache")?;

        let tmp_path = temp_path(&self.path);
        let written = write_synced(&tmp_path, json.as_bytes())
            .and_then(|()| fs::rename(&tmp_path, &self.path));

        if let Err(e) = written {
            // Never leave a half-written temp file next to the cache.
            let _ = fs::remove_file(&tmp_path);
            return Err(e)
                .with_context(|| format!("Failed to write seen cache: {}", self.path.display()));
        }

        Ok(())
    }

    /// Take the run lock for `day`, keyed off this cache's location.
    pub async fn acquire_lock(&self, day: NaiveDate, timeout: Duration) -> Result<DayLock> {
        DayLock::acquire(&lock_dir_for(&self.path), day, timeout).await
    }
}

/// Directory holding the per-day lock files for a cache file.
pub fn lock_dir_for(cache_path: &Path) -> PathBuf {
    cache_path
        .parent()
        .map(|p| p.join("locks"))
        .unwrap_or_else(|| PathBuf::from("locks"))
}

#[derive(Debug, Error)]
#[error("timed out after {waited:?} waiting for the run lock for {day} ({path})")]
pub struct LockTimeout {
    pub day: NaiveDate,
    pub path: PathBuf,
    pub waited: Duration,
}

/// Exclusive advisory lock guarding one generation run for one day.
///
/// The lock is released when the guard is dropped.
#[derive(Debug)]
pub struct DayLock {
    file: File,
    path: PathBuf,
}

impl DayLock {
    /// Wait up to `timeout` for the lock, polling without blocking the runtime.
    pub async fn acquire(lock_dir: &Path, day: NaiveDate, timeout: Duration) -> Result<Self> {
        fs::create_dir_all(lock_dir)
            .with_context(|| format!("Failed to create lock directory: {}", lock_dir.display()))?;

        let path = lock_dir.join(format!("{}.lock", day_key(day)));
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(&path)
            .with_context(|| format!("Failed to open lock file: {}", path.display()))?;

        let started = Instant::now();
        loop {
            match file.try_lock_exclusive() {
                Ok(()) => {
                    debug!("Acquired run lock {}", path.display());
                    return Ok(Self { file, path });
                }
                Err(e) if e.kind() == fs2::lock_contended_error().kind() => {
                    let waited = started.elapsed();
                    if waited >= timeout {
                        return Err(LockTimeout { day, path, waited }.into());
                    }
                    tokio::time::sleep(LOCK_POLL_INTERVAL.min(timeout - waited)).await;
                }
                Err(e) => {
                    return Err(e).with_context(|| format!("Failed to lock {}", path.display()));
                }
            }
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for DayLock {
    fn drop(&mut self) {
        // The lock file itself stays: removing it would let a waiter lock a
        // stale inode while a newcomer locks a fresh one.
        if let Err(e) = self.file.unlock() {
            warn!("Failed to release run lock {}: {}", self.path.display(), e);
        }
    }
}

fn load_data(path: &Path) -> SeenData {
    if !path.exists() {
        return SeenData::default();
    }

    let content = match fs::read_to_string(path) {
        Ok(content) => content,
        Err(e) => {
            warn!("Seen cache unreadable, starting empty: {}: {}", path.display(), e);
            return SeenData::default();
        }
    };

    match serde_json::from_str::<Value>(&content) {
        Ok(value) => parse_data(value),
        Err(e) => {
            warn!("Seen cache corrupted, starting empty: {}: {}", path.display(), e);
            SeenData::default()
        }
    }
}

// Keep whatever is well-formed and drop the rest.
fn parse_data(value: Value) -> SeenData {
    let mut data = SeenData::default();
    let Value::Object(mut root) = value else {
        warn!("Seen cache is not a JSON object, ignoring it");
        return data;
    };

    if let Some(Value::Object(rolling)) = root.remove("rolling") {
        data.rolling = rolling
            .into_iter()
            .filter_map(|(link, day)| match day {
                Value::String(day) => Some((link, day)),
                _ => None,
            })
            .collect();
    }

    if let Some(Value::Object(daily)) = root.remove("daily") {
        for (day, links) in daily {
            let Value::Array(links) = links else {
                continue;
            };
            let mut unique = HashSet::new();
            let links: Vec<String> = links
                .into_iter()
                .filter_map(|link| match link {
                    Value::String(link) => Some(link),
                    _ => None,
                })
                .filter(|link| unique.insert(link.clone()))
                .collect();
            data.daily.insert(day, links);
        }
    }

    data
}

fn day_key(day: NaiveDate) -> String {
    day.format(DATE_FORMAT).to_string()
}

/// Unparseable stored dates count as expired.
fn older_than(stored: &str, cutoff: NaiveDate) -> bool {
    let stored = stored.trim();
    let parsed = NaiveDate::parse_from_str(stored, DATE_FORMAT).or_else(|_| {
        chrono::NaiveDateTime::parse_from_str(stored, "%Y-%m-%dT%H:%M:%S").map(|dt| dt.date())
    });
    match parsed {
        Ok(day) => day < cutoff,
        Err(_) => true,
    }
}

fn write_synced(path: &Path, bytes: &[u8]) -> std::io::Result<()> {
    let mut file = File::create(path)?;
    file.write_all(bytes)?;
    file.sync_all()
}

fn temp_path(path: &Path) -> PathBuf {
    let file_name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| "seen.json".to_string());
    path.with_file_name(format!(".{}.tmp", file_name))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn day(s: &str) -> NaiveDate {
        NaiveDate::parse_from_str(s, DATE_FORMAT).unwrap()
    }

    fn options(dir: &TempDir, scope: SeenScope, ttl_days: Option<i64>, today: &str) -> SeenOptions {
        SeenOptions {
            path: dir.path().join(".cache/seen.json"),
            scope,
            ttl_days,
            reset: false,
            today: day(today),
        }
    }

    fn read_json(path: &Path) -> Value {
        serde_json::from_str(&fs::read_to_string(path).unwrap()).unwrap()
    }

    #[test]
    fn test_rolling_suppresses_on_later_days() {
        let temp_dir = TempDir::new().unwrap();
        let mut cache = SeenCache::open(options(&temp_dir, SeenScope::Rolling, None, "2025-03-01"));
        cache.remember(day("2025-03-01"), ["https://a.com/1"]).unwrap();

        for d in ["2025-03-01", "2025-03-02", "2026-01-01"] {
            assert!(cache.filter_new(["https://a.com/1"], day(d)).is_empty());
        }

        let reopened = SeenCache::open(options(&temp_dir, SeenScope::Rolling, None, "2025-06-01"));
        assert!(reopened.filter_new(["https://a.com/1"], day("2025-06-01")).is_empty());
    }

    #[test]
    fn test_filter_new_returns_only_unseen() {
        let temp_dir = TempDir::new().unwrap();
        let mut cache = SeenCache::open(options(&temp_dir, SeenScope::Rolling, None, "2025-03-01"));
        cache.remember(day("2025-03-01"), ["https://a.com/1"]).unwrap();

        let fresh = cache.filter_new(["https://a.com/1", "https://a.com/2"], day("2025-03-01"));
        assert_eq!(fresh, vec!["https://a.com/2".to_string()]);
    }

    #[test]
    fn test_daily_scope_is_per_day() {
        let temp_dir = TempDir::new().unwrap();
        let mut cache = SeenCache::open(options(&temp_dir, SeenScope::Daily, None, "2025-03-01"));
        cache.remember(day("2025-03-01"), ["https://a.com/1"]).unwrap();

        assert!(cache.filter_new(["https://a.com/1"], day("2025-03-01")).is_empty());
        assert_eq!(
            cache.filter_new(["https://a.com/1"], day("2025-03-02")),
            vec!["https://a.com/1".to_string()]
        );
    }

    #[test]
    fn test_remember_never_duplicates() {
        let temp_dir = TempDir::new().unwrap();
        let mut cache = SeenCache::open(options(&temp_dir, SeenScope::Daily, None, "2025-03-01"));
        let d = day("2025-03-01");
        cache.remember(d, ["https://a.com/1", "https://a.com/1"]).unwrap();
        cache.remember(d, ["https://a.com/1", "https://b.com/1"]).unwrap();
        assert_eq!(cache.len(), 2);

        let json = read_json(cache.path());
        assert_eq!(
            json["daily"]["2025-03-01"],
            serde_json::json!(["https://a.com/1", "https://b.com/1"])
        );

        let mut rolling =
            SeenCache::open(options(&temp_dir, SeenScope::Rolling, None, "2025-03-01"));
        rolling.remember(d, ["https://c.com/1", "https://c.com/1"]).unwrap();
        rolling.remember(day("2025-03-05"), ["https://c.com/1"]).unwrap();
        assert_eq!(rolling.len(), 1);
        let json = read_json(rolling.path());
        assert_eq!(json["rolling"]["https://c.com/1"], "2025-03-01");
        // The daily map written earlier survives a rolling-scope save.
        assert_eq!(json["daily"]["2025-03-01"].as_array().unwrap().len(), 2);
    }

    #[test]
    fn test_ttl_prunes_expired_entries() {
        let temp_dir = TempDir::new().unwrap();
        let mut cache =
            SeenCache::open(options(&temp_dir, SeenScope::Rolling, Some(3), "2025-03-01"));
        cache.remember(day("2025-03-01"), ["https://a.com/1"]).unwrap();

        // Exactly at D + N the entry is still present.
        let cache = SeenCache::open(options(&temp_dir, SeenScope::Rolling, Some(3), "2025-03-04"));
        assert!(cache.contains("https://a.com/1", day("2025-03-04")));

        // Past D + N it is gone, and the pruned state is persisted.
        let cache = SeenCache::open(options(&temp_dir, SeenScope::Rolling, Some(3), "2025-03-05"));
        assert!(!cache.contains("https://a.com/1", day("2025-03-05")));
        let json = read_json(cache.path());
        assert!(json["rolling"].as_object().unwrap().is_empty());
    }

    #[test]
    fn test_ttl_prunes_daily_buckets() {
        let temp_dir = TempDir::new().unwrap();
        let mut cache =
            SeenCache::open(options(&temp_dir, SeenScope::Daily, Some(1), "2025-03-01"));
        cache.remember(day("2025-03-01"), ["https://a.com/1"]).unwrap();
        cache.today = day("2025-03-03");
        cache.remember(day("2025-03-03"), ["https://b.com/1"]).unwrap();

        let json = read_json(cache.path());
        let days: Vec<_> = json["daily"].as_object().unwrap().keys().cloned().collect();
        assert_eq!(days, vec!["2025-03-03".to_string()]);
    }

    #[test]
    fn test_non_positive_ttl_disables_pruning() {
        let temp_dir = TempDir::new().unwrap();
        let mut cache =
            SeenCache::open(options(&temp_dir, SeenScope::Rolling, Some(0), "2020-01-01"));
        cache.remember(day("2020-01-01"), ["https://a.com/1"]).unwrap();

        for ttl in [Some(0), Some(-5), None] {
            let cache = SeenCache::open(options(&temp_dir, SeenScope::Rolling, ttl, "2025-01-01"));
            assert!(cache.contains("https://a.com/1", day("2025-01-01")));
        }
    }

    #[test]
    fn test_corrupt_file_is_treated_as_empty() {
        let temp_dir = TempDir::new().unwrap();
        let opts = options(&temp_dir, SeenScope::Rolling, None, "2025-03-01");
        fs::create_dir_all(opts.path.parent().unwrap()).unwrap();
        fs::write(&opts.path, "{ this is not json").unwrap();

        let mut cache = SeenCache::open(opts);
        assert!(cache.is_empty());
        cache.remember(day("2025-03-01"), ["https://a.com/1"]).unwrap();
        assert!(cache.contains("https://a.com/1", day("2025-03-01")));
    }

    #[test]
    fn test_partially_valid_file_keeps_good_entries() {
        let temp_dir = TempDir::new().unwrap();
        let opts = options(&temp_dir, SeenScope::Daily, None, "2025-03-01");
        fs::create_dir_all(opts.path.parent().unwrap()).unwrap();
        fs::write(
            &opts.path,
            r#"{"rolling": [1, 2], "daily": {"2025-03-01": ["https://a.com/1", 7], "2025-03-02": "bad"}}"#,
        )
        .unwrap();

        let cache = SeenCache::open(opts);
        assert_eq!(cache.len(), 1);
        assert!(cache.contains("https://a.com/1", day("2025-03-01")));
    }

    #[test]
    fn test_reset_deletes_existing_state() {
        let temp_dir = TempDir::new().unwrap();
        let mut cache = SeenCache::open(options(&temp_dir, SeenScope::Rolling, None, "2025-03-01"));
        cache.remember(day("2025-03-01"), ["https://a.com/1"]).unwrap();
        assert!(cache.path().exists());

        let mut opts = options(&temp_dir, SeenScope::Rolling, None, "2025-03-01");
        opts.reset = true;
        let cache = SeenCache::open(opts);
        assert!(cache.is_empty());
        assert!(!cache.path().exists());
    }

    #[tokio::test]
    async fn test_lock_is_exclusive_and_released_on_drop() {
        let temp_dir = TempDir::new().unwrap();
        let cache = SeenCache::open(options(&temp_dir, SeenScope::Rolling, None, "2025-03-01"));
        let d = day("2025-03-01");

        let guard = cache.acquire_lock(d, Duration::from_millis(200)).await.unwrap();
        assert!(guard.path().ends_with("locks/2025-03-01.lock"));

        let err = cache.acquire_lock(d, Duration::from_millis(150)).await.unwrap_err();
        assert!(err.downcast_ref::<LockTimeout>().is_some());

        // A different day is independent.
        let other = cache.acquire_lock(day("2025-03-02"), Duration::from_millis(150)).await;
        assert!(other.is_ok());

        drop(guard);
        assert!(cache.acquire_lock(d, Duration::from_millis(150)).await.is_ok());
    }

    #[tokio::test]
    async fn test_waiting_for_lock_lets_holder_finish() {
        let temp_dir = TempDir::new().unwrap();
        let lock_dir = temp_dir.path().join("locks");
        let d = day("2025-03-01");

        let guard = DayLock::acquire(&lock_dir, d, Duration::from_millis(200))
            .await
            .unwrap();
        let release = async move {
            tokio::time::sleep(Duration::from_millis(300)).await;
            drop(guard);
        };

        // Both run on one thread, so the waiter must yield for the holder to let go.
        let ((), waited) = tokio::join!(
            release,
            DayLock::acquire(&lock_dir, d, Duration::from_secs(5))
        );
        assert!(waited.is_ok());
    }

    #[test]
    fn test_failed_save_leaves_no_temp_file() {
        let temp_dir = TempDir::new().unwrap();
        let opts = options(&temp_dir, SeenScope::Rolling, None, "2025-03-01");
        let cache_path = opts.path.clone();
        // A non-empty directory where the cache file should be makes the rename fail.
        fs::create_dir_all(cache_path.join("blocker")).unwrap();

        let mut cache = SeenCache::open(opts);
        assert!(cache.remember(day("2025-03-01"), ["https://a.com/1"]).is_err());
        assert!(!temp_path(&cache_path).exists());
    }

    #[test]
    fn test_scope_parsing() {
        assert_eq!("Rolling".parse::<SeenScope>().unwrap(), SeenScope::Rolling);
        assert_eq!("daily".parse::<SeenScope>().unwrap(), SeenScope::Daily);
        assert!("weekly".parse::<SeenScope>().is_err());
    }
}
