//! Run counters and the periodic progress ticker.

use crossbeam_channel::{bounded, select, tick, Sender};
use serde::ser::{Serialize, SerializeStruct, Serializer};
use std::collections::BTreeMap;
use std::io::Write;
use std::sync::{Arc, Mutex, MutexGuard};
use std::thread;
use std::time::{Duration, Instant};

use crate::db::StoreOutcome;
use crate::error::Error;

/// Interval between progress lines.
pub const TICK_INTERVAL: Duration = Duration::from_secs(5);

/// Monotonic counters of one run.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Counters {
    /// Paths handed to the readers.
    pub checked: u64,
    /// Files read into memory.
    pub loaded: u64,
    /// Content already stored under another location.
    pub found: u64,
    pub too_big: u64,
    pub empty: u64,
    /// Paths outside the type allow-list.
    pub ignored: u64,
    pub duplicates: u64,
    pub inserted: u64,
    pub locations: u64,
    pub committed: u64,
    pub errors: u64,
    pub deleted: u64,
    pub max_blob_size_seen: u64,
    /// Per-kind failure counts, keyed by [`Error::bucket`].
    pub error_kinds: BTreeMap<String, u64>,
}

impl Counters {
    /// Records not stored because they were unsupported or already present.
    pub fn skipped(&self) -> u64 {
        self.ignored + self.duplicates
    }

    /// Two-line progress summary.
    pub fn summary_lines(&self, elapsed: Duration) -> [String; 2] {
        [
            format!(
                "checked={} loaded={} found={} inserted={} locations={} skipped={} committed={}",
                self.checked,
                self.loaded,
                self.found,
                self.inserted,
                self.locations,
                self.skipped(),
                self.committed
            ),
            format!(
                "  empty={} too_big={} errors={} deleted={} max_blob={} elapsed={}s",
                self.empty,
                self.too_big,
                self.errors,
                self.deleted,
                self.max_blob_size_seen,
                elapsed.as_secs()
            ),
        ]
    }
}

impl Serialize for Counters {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut s = serializer.serialize_struct("Counters", 15)?;
        s.serialize_field("checked", &self.checked)?;
        s.serialize_field("loaded", &self.loaded)?;
        s.serialize_field("found", &self.found)?;
        s.serialize_field("too_big", &self.too_big)?;
        s.serialize_field("empty", &self.empty)?;
        s.serialize_field("ignored", &self.ignored)?;
        s.serialize_field("duplicates", &self.duplicates)?;
        s.serialize_field("skipped", &self.skipped())?;
        s.serialize_field("inserted", &self.inserted)?;
        s.serialize_field("locations", &self.locations)?;
        s.serialize_field("committed", &self.committed)?;
        s.serialize_field("errors", &self.errors)?;
        s.serialize_field("deleted", &self.deleted)?;
        s.serialize_field("max_blob_size_seen", &self.max_blob_size_seen)?;
        s.serialize_field("error_kinds", &self.error_kinds)?;
        s.end()
    }
}

/// Counters shared by every worker, guarded by one lock.
#[derive(Debug)]
pub struct Statistics {
    counters: Mutex<Counters>,
    started: Instant,
}

impl Default for Statistics {
    fn default() -> Self {
        Self::new()
    }
}

impl Statistics {
    pub fn new() -> Self {
        Self {
            counters: Mutex::new(Counters::default()),
            started: Instant::now(),
        }
    }

    fn lock(&self) -> MutexGuard<'_, Counters> {
        // A worker panicking mid-update leaves plain integers behind; keep counting.
        self.counters.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn update(&self, f: impl FnOnce(&mut Counters)) {
        f(&mut self.lock());
    }

    pub fn checked(&self) {
        self.update(|c| c.checked += 1);
    }

    pub fn loaded(&self, size: u64) {
        self.update(|c| {
            c.loaded += 1;
            c.max_blob_size_seen = c.max_blob_size_seen.max(size);
        });
    }

    pub fn found(&self) {
        self.update(|c| c.found += 1);
    }

    pub fn duplicate(&self) {
        self.update(|c| c.duplicates += 1);
    }

    pub fn deleted(&self, rows: u64) {
        self.update(|c| c.deleted += rows);
    }

    pub fn stored(&self, outcome: StoreOutcome) {
        self.update(|c| match outcome {
            StoreOutcome::Inserted => {
                c.inserted += 1;
                c.locations += 1;
                c.committed += 1;
            }
            StoreOutcome::LocationAdded => {
                c.locations += 1;
                c.committed += 1;
            }
            StoreOutcome::Raced => {
                c.duplicates += 1;
                c.locations += 1;
                c.committed += 1;
            }
            StoreOutcome::Duplicate => c.duplicates += 1,
        });
    }

    /// Count a rejected or failed record. Returns `true` when the failure is
    /// a real error rather than an expected rejection.
    pub fn rejected(&self, error: &Error) -> bool {
        let mut c = self.lock();
        let is_error = match error {
            Error::Empty => {
                c.empty += 1;
                return false;
            }
            Error::Oversize { .. } => {
                c.too_big += 1;
                false
            }
            Error::UnsupportedType(_) => {
                c.ignored += 1;
                false
            }
            _ => {
                c.errors += 1;
                true
            }
        };
        *c.error_kinds.entry(error.bucket().to_string()).or_insert(0) += 1;
        is_error
    }

    pub fn snapshot(&self) -> Counters {
        self.lock().clone()
    }

    pub fn elapsed(&self) -> Duration {
        self.started.elapsed()
    }
}

/// Prints the two-line summary to stderr every interval until stopped.
pub struct Ticker {
    stop: Sender<()>,
    handle: thread::JoinHandle<()>,
}

impl Ticker {
    pub fn spawn(stats: Arc<Statistics>, interval: Duration) -> Self {
        let (stop, stopped) = bounded::<()>(1);
        let handle = thread::spawn(move || {
            let ticks = tick(interval);
            loop {
                select! {
                    recv(ticks) -> _ => print_summary(&stats),
                    recv(stopped) -> _ => break,
                }
            }
            print_summary(&stats);
        });
        Self { stop, handle }
    }

    /// Stop the ticker and wait for its final flush.
    pub fn stop(self) {
        let _ = self.stop.send(());
        if self.handle.join().is_err() {
            tracing::warn!("progress ticker panicked");
        }
    }
}

fn print_summary(stats: &Statistics) {
    let lines = stats.snapshot().summary_lines(stats.elapsed());
    let mut err = std::io::stderr().lock();
    for line in lines {
        let _ = writeln!(err, "{}", line);
    }
    let _ = err.flush();
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rejections_use_dedicated_counters() {
        let stats = Statistics::new();
        assert!(!stats.rejected(&Error::Empty));
        assert!(!stats.rejected(&Error::Oversize { size: 11, limit: 10 }));
        assert!(!stats.rejected(&Error::UnsupportedType("x.txt".into())));
        assert!(stats.rejected(&Error::Decode("bad".into())));

        let c = stats.snapshot();
        assert_eq!((c.empty, c.too_big, c.ignored, c.errors), (1, 1, 1, 1));
        assert_eq!(c.skipped(), 1);
        assert_eq!(c.error_kinds.get("too_big"), Some(&1));
        assert_eq!(c.error_kinds.get("decode"), Some(&1));
        assert!(!c.error_kinds.contains_key("empty"));
    }

    #[test]
    fn test_store_outcomes_counted() {
        let stats = Statistics::new();
        stats.stored(StoreOutcome::Inserted);
        stats.stored(StoreOutcome::LocationAdded);
        stats.stored(StoreOutcome::Raced);
        stats.stored(StoreOutcome::Duplicate);

        let c = stats.snapshot();
        assert_eq!(c.inserted, 1);
        assert_eq!(c.locations, 3);
        assert_eq!(c.committed, 3);
        assert_eq!(c.duplicates, 2);
        assert_eq!(c.skipped(), 2);
    }

    #[test]
    fn test_serialized_counters_include_skipped() {
        let c = Counters {
            ignored: 2,
            duplicates: 3,
            inserted: 1,
            ..Counters::default()
        };
        let json = serde_json::to_value(&c).unwrap();
        assert_eq!(json["skipped"], 5);
        assert_eq!(json["ignored"], 2);
        assert_eq!(json["inserted"], 1);
        assert!(json["error_kinds"].as_object().unwrap().is_empty());
    }

    #[test]
    fn test_max_blob_size_seen() {
        let stats = Statistics::new();
        stats.loaded(10);
        stats.loaded(700);
        stats.loaded(20);
        let c = stats.snapshot();
        assert_eq!((c.loaded, c.max_blob_size_seen), (3, 700));
    }

    #[test]
    fn test_ticker_stops() {
        let stats = Arc::new(Statistics::new());
        let ticker = Ticker::spawn(stats.clone(), Duration::from_millis(10));
        stats.checked();
        thread::sleep(Duration::from_millis(30));
        ticker.stop();
        assert_eq!(stats.snapshot().checked, 1);
    }

    #[test]
    fn test_summary_has_two_lines() {
        let c = Counters {
            checked: 3,
            ..Counters::default()
        };
        let lines = c.summary_lines(Duration::from_secs(2));
        assert!(lines[0].starts_with("checked=3"));
        assert!(lines[1].contains("elapsed=2s"));
    }
}
