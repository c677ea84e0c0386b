//! Local state shared across queries: request quotas and result counts.
//!
//! Both stores come in an in-memory flavour (tests, one-shot runs) and a
//! file-backed flavour that survives restarts.
//!
//! # Files
//!
//! ```text
//! ~/.cache/research-federation/
//!   quota.json           # service -> remaining requests + reset time
//!   result_counts.jsonl  # one cached count per line, newest wins
//! ```

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::fs::{self, OpenOptions};
use std::io::{BufRead, BufReader, Write};
use std::path::{Path, PathBuf};
use std::sync::Mutex;

/// Remaining-request bookkeeping per service
pub trait QuotaStore: Send + Sync + fmt::Debug {
    /// Requests still allowed for `service`
    fn remaining(&self, service: &str) -> u64;

    /// Record the remaining count reported by the service.
    ///
    /// A `None` reset time keeps the previously known one.
    fn record_usage(&self, service: &str, remaining: u64, reset_at: Option<DateTime<Utc>>);

    /// Count `requests` against the quota when the service reports nothing.
    ///
    /// Read and decrement happen atomically with respect to other callers.
    fn consume(&self, service: &str, requests: u64);
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
struct QuotaEntry {
    remaining: u64,
    reset_at: Option<DateTime<Utc>>,
}

/// Entries plus configured limits; services without a limit are unmetered
#[derive(Debug, Default)]
struct QuotaBook {
    limits: HashMap<String, u64>,
    entries: Mutex<HashMap<String, QuotaEntry>>,
}

impl QuotaBook {
    fn limit(&self, service: &str) -> u64 {
        self.limits.get(service).copied().unwrap_or(u64::MAX)
    }

    fn current(&self, entries: &HashMap<String, QuotaEntry>, service: &str) -> u64 {
        match entries.get(service) {
            Some(entry) if entry.reset_at.map_or(true, |reset| reset > Utc::now()) => {
                entry.remaining
            }
            _ => self.limit(service),
        }
    }

    fn remaining(&self, service: &str) -> u64 {
        let entries = self.entries.lock().unwrap_or_else(|e| e.into_inner());
        self.current(&entries, service)
    }

    /// Decrement under one lock.
    ///
    /// `saved` runs before the lock is released, so writers observe updates in order.
    fn consume(
        &self,
        service: &str,
        requests: u64,
        saved: impl FnOnce(&HashMap<String, QuotaEntry>),
    ) {
        let mut entries = self.entries.lock().unwrap_or_else(|e| e.into_inner());
        let remaining = self.current(&entries, service).saturating_sub(requests);
        // an expired window starts over, so its reset time no longer applies
        let reset_at = entries
            .get(service)
            .and_then(|e| e.reset_at)
            .filter(|reset| *reset > Utc::now());
        entries.insert(
            service.to_string(),
            QuotaEntry {
                remaining,
                reset_at,
            },
        );
        saved(&entries);
    }

    /// Overwrite an entry with what the service reported
    fn record(
        &self,
        service: &str,
        remaining: u64,
        reset_at: Option<DateTime<Utc>>,
        saved: impl FnOnce(&HashMap<String, QuotaEntry>),
    ) {
        let mut entries = self.entries.lock().unwrap_or_else(|e| e.into_inner());
        let reset_at = reset_at.or_else(|| entries.get(service).and_then(|e| e.reset_at));
        entries.insert(
            service.to_string(),
            QuotaEntry {
                remaining,
                reset_at,
            },
        );
        saved(&entries);
    }
}

/// Quota store that forgets everything on drop
#[derive(Debug, Default)]
pub struct MemoryQuotaStore {
    book: QuotaBook,
}

impl MemoryQuotaStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Allow `limit` requests for `service` until it reports otherwise
    pub fn with_limit(mut self, service: impl Into<String>, limit: u64) -> Self {
        self.book.limits.insert(service.into(), limit);
        self
    }
}

impl QuotaStore for MemoryQuotaStore {
    fn remaining(&self, service: &str) -> u64 {
        self.book.remaining(service)
    }

    fn record_usage(&self, service: &str, remaining: u64, reset_at: Option<DateTime<Utc>>) {
        self.book.record(service, remaining, reset_at, |_| {});
    }

    fn consume(&self, service: &str, requests: u64) {
        self.book.consume(service, requests, |_| {});
    }
}

/// Quota store persisted as a JSON file, rewritten atomically on every update
#[derive(Debug)]
pub struct FileQuotaStore {
    path: PathBuf,
    book: QuotaBook,
}

impl FileQuotaStore {
    /// Open (or create on first write) the store at `path`
    pub fn open(path: impl Into<PathBuf>) -> std::io::Result<Self> {
        let path = path.into();
        let entries = match fs::read_to_string(&path) {
            Ok(content) => serde_json::from_str(&content).unwrap_or_else(|e| {
                tracing::warn!("Ignoring unreadable quota file {}: {}", path.display(), e);
                HashMap::new()
            }),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => HashMap::new(),
            Err(e) => return Err(e),
        };

        Ok(Self {
            path,
            book: QuotaBook {
                limits: HashMap::new(),
                entries: Mutex::new(entries),
            },
        })
    }

    pub fn with_limit(mut self, service: impl Into<String>, limit: u64) -> Self {
        self.book.limits.insert(service.into(), limit);
        self
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn persist(&self, entries: &HashMap<String, QuotaEntry>) -> std::io::Result<()> {
        let dir = match self.path.parent() {
            Some(dir) if !dir.as_os_str().is_empty() => dir,
            _ => Path::new("."),
        };
        fs::create_dir_all(dir)?;

        let mut file = tempfile::NamedTempFile::new_in(dir)?;
        serde_json::to_writer_pretty(&mut file, entries)?;
        file.flush()?;
        file.persist(&self.path).map_err(|e| e.error)?;
        Ok(())
    }

    fn save(&self, entries: &HashMap<String, QuotaEntry>) {
        if let Err(e) = self.persist(entries) {
            tracing::warn!("Failed to write quota file {}: {}", self.path.display(), e);
        }
    }
}

impl QuotaStore for FileQuotaStore {
    fn remaining(&self, service: &str) -> u64 {
        self.book.remaining(service)
    }

    fn record_usage(&self, service: &str, remaining: u64, reset_at: Option<DateTime<Utc>>) {
        self.book
            .record(service, remaining, reset_at, |entries| self.save(entries));
    }

    fn consume(&self, service: &str, requests: u64) {
        self.book
            .consume(service, requests, |entries| self.save(entries));
    }
}

/// Cached total-hit counts of search terms, used for cost estimates
pub trait ResultCountCache: Send + Sync + fmt::Debug {
    fn lookup(&self, service: &str, term: &str) -> Option<u64>;

    fn store(&self, service: &str, term: &str, count: u64);
}

fn count_key(service: &str, term: &str) -> String {
    format!("{:x}", md5::compute(format!("{}|{}", service, term).as_bytes()))
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct CountEntry {
    key: String,
    count: u64,
    cached_at: DateTime<Utc>,
}

#[derive(Debug)]
struct CountTable {
    ttl: Duration,
    entries: Mutex<HashMap<String, CountEntry>>,
}

impl CountTable {
    fn new(ttl: Duration, entries: HashMap<String, CountEntry>) -> Self {
        Self {
            ttl,
            entries: Mutex::new(entries),
        }
    }

    fn lookup(&self, key: &str) -> Option<u64> {
        let entries = self.entries.lock().unwrap_or_else(|e| e.into_inner());
        let entry = entries.get(key)?;
        if Utc::now() - entry.cached_at >= self.ttl {
            tracing::debug!("Result count expired: {}", key);
            return None;
        }
        Some(entry.count)
    }

    fn insert(&self, key: String, count: u64) -> CountEntry {
        let entry = CountEntry {
            key: key.clone(),
            count,
            cached_at: Utc::now(),
        };
        self.entries
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .insert(key, entry.clone());
        entry
    }
}

/// In-memory result-count cache
#[derive(Debug)]
pub struct MemoryResultCountCache {
    table: CountTable,
}

impl MemoryResultCountCache {
    pub fn new(ttl_seconds: u64) -> Self {
        Self {
            table: CountTable::new(seconds(ttl_seconds), HashMap::new()),
        }
    }
}

impl Default for MemoryResultCountCache {
    fn default() -> Self {
        Self::new(24 * 60 * 60)
    }
}

impl ResultCountCache for MemoryResultCountCache {
    fn lookup(&self, service: &str, term: &str) -> Option<u64> {
        self.table.lookup(&count_key(service, term))
    }

    fn store(&self, service: &str, term: &str, count: u64) {
        self.table.insert(count_key(service, term), count);
    }
}

/// Result-count cache persisted as JSON lines; stores append a line
#[derive(Debug)]
pub struct FileResultCountCache {
    path: PathBuf,
    table: CountTable,
}

impl FileResultCountCache {
    pub fn open(path: impl Into<PathBuf>, ttl_seconds: u64) -> std::io::Result<Self> {
        let path = path.into();
        let mut entries = HashMap::new();

        match fs::File::open(&path) {
            Ok(file) => {
                for line in BufReader::new(file).lines() {
                    let line = line?;
                    match serde_json::from_str::<CountEntry>(&line) {
                        Ok(entry) => {
                            entries.insert(entry.key.clone(), entry);
                        }
                        Err(e) => tracing::debug!("Skipping bad result-count line: {}", e),
                    }
                }
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => return Err(e),
        }

        Ok(Self {
            path,
            table: CountTable::new(seconds(ttl_seconds), entries),
        })
    }

    fn append(&self, entry: &CountEntry) -> std::io::Result<()> {
        if let Some(dir) = self.path.parent() {
            if !dir.as_os_str().is_empty() {
                fs::create_dir_all(dir)?;
            }
        }
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)?;
        writeln!(file, "{}", serde_json::to_string(entry)?)
    }
}

impl ResultCountCache for FileResultCountCache {
    fn lookup(&self, service: &str, term: &str) -> Option<u64> {
        self.table.lookup(&count_key(service, term))
    }

    fn store(&self, service: &str, term: &str, count: u64) {
        let entry = self.table.insert(count_key(service, term), count);
        if let Err(e) = self.append(&entry) {
            tracing::warn!("Failed to cache result count: {}", e);
        }
    }
}

fn seconds(secs: u64) -> Duration {
    Duration::seconds(i64::try_from(secs).unwrap_or(i64::MAX / 1000))
}
