//! Windowed recurrence counts per anomaly type
//!
//! Each type keeps a lifetime total plus a sorted deque of recent timestamps.
//! Types are locked individually; the outer map lock is only written when a
//! new type first appears.
//!
//! A type's history is aged only by its own occurrences or by the wall clock,
//! never by another type's timestamps. References ahead of the wall clock are
//! clamped to it so one skewed event cannot flush its own history either.

use astra_common::RecurrenceConfig;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, RwLock};
use std::time::Duration;
use tracing::debug;

#[derive(Debug, Default)]
struct RecurrenceRecord {
    total_count: u64,
    /// Ascending
    timestamps: VecDeque<DateTime<Utc>>,
    last_seen: Option<DateTime<Utc>>,
    /// Tracker sequence number of the latest insert, for eviction
    touched: u64,
}

impl RecurrenceRecord {
    fn insert(&mut self, timestamp: DateTime<Utc>, max_len: usize) {
        self.total_count += 1;
        self.last_seen = Some(self.last_seen.map_or(timestamp, |seen| seen.max(timestamp)));

        match self.timestamps.back() {
            Some(last) if *last > timestamp => {
                let pos = self.timestamps.partition_point(|t| *t <= timestamp);
                self.timestamps.insert(pos, timestamp);
            }
            _ => self.timestamps.push_back(timestamp),
        }

        while self.timestamps.len() > max_len {
            self.timestamps.pop_front();
        }
    }

    /// Drop timestamps strictly older than `cutoff`; returns how many went
    fn prune_before(&mut self, cutoff: DateTime<Utc>) -> usize {
        let stale = self.timestamps.partition_point(|t| *t < cutoff);
        self.timestamps.drain(..stale);
        if stale > 0 && self.timestamps.len() < self.timestamps.capacity() / 4 {
            self.timestamps.shrink_to_fit();
        }
        stale
    }

    fn count_between(&self, lower: DateTime<Utc>, upper: DateTime<Utc>) -> u64 {
        let start = self.timestamps.partition_point(|t| *t < lower);
        let end = self.timestamps.partition_point(|t| *t <= upper);
        end.saturating_sub(start) as u64
    }

    fn latest_before(&self, at: DateTime<Utc>) -> Option<DateTime<Utc>> {
        let idx = self.timestamps.partition_point(|t| *t < at);
        idx.checked_sub(1).and_then(|i| self.timestamps.get(i).copied())
    }
}

/// Recurrence view of one anomaly type
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RecurrenceInfo {
    pub anomaly_type: String,
    pub total_count: u64,
    pub in_window: u64,
    /// Most recent retained occurrence strictly before the reference time
    pub last_occurrence: Option<DateTime<Utc>>,
    pub seconds_since_last: Option<f64>,
}

/// Earliest instant inside a trailing `span` ending at `now`
fn window_start(now: DateTime<Utc>, span: Duration) -> DateTime<Utc> {
    chrono::Duration::from_std(span)
        .ok()
        .and_then(|span| now.checked_sub_signed(span))
        .unwrap_or(DateTime::<Utc>::MIN_UTC)
}

/// Tracks how often each anomaly type occurred within a trailing window
#[derive(Debug)]
pub struct RecurrenceTracker {
    records: RwLock<HashMap<String, Arc<Mutex<RecurrenceRecord>>>>,
    max_retention: Duration,
    max_per_type: usize,
    max_types: usize,
    sequence: AtomicU64,
}

impl RecurrenceTracker {
    pub fn new(config: &RecurrenceConfig) -> Self {
        Self {
            records: RwLock::new(HashMap::new()),
            max_retention: config.max_retention(),
            max_per_type: config.max_per_type.max(1),
            max_types: config.max_types.max(1),
            sequence: AtomicU64::new(0),
        }
    }

    /// Record one occurrence of `anomaly_type` at `timestamp`
    pub fn record(&self, anomaly_type: &str, timestamp: DateTime<Utc>) {
        let record = self.record_for(anomaly_type);
        let mut record = lock(&record);
        record.insert(timestamp, self.max_per_type);
        record.touched = self.sequence.fetch_add(1, Ordering::Relaxed);

        // Keep retention bounded relative to this type's newest sample
        if let Some(newest) = record.timestamps.back().copied() {
            let reference = newest.min(Utc::now());
            record.prune_before(window_start(reference, self.max_retention));
        }
    }

    /// Occurrences within `[now - window, now]`
    pub fn count_in_window(&self, anomaly_type: &str, window: Duration) -> u64 {
        self.count_in_window_at(anomaly_type, window, Utc::now())
    }

    /// Occurrences within `[now - window, now]` for an explicit reference time.
    /// Read-only: the reference time never ages the stored history.
    pub fn count_in_window_at(&self, anomaly_type: &str, window: Duration, now: DateTime<Utc>) -> u64 {
        let Some(record) = self.existing(anomaly_type) else {
            return 0;
        };
        let record = lock(&record);
        record.count_between(window_start(now, window), now)
    }

    /// Lifetime occurrences; never reduced by cleanup
    pub fn total_count(&self, anomaly_type: &str) -> u64 {
        match self.existing(anomaly_type) {
            Some(record) => {
                let record = lock(&record);
                record.total_count
            }
            None => 0,
        }
    }

    /// Newest occurrence ever recorded, including ones already pruned
    pub fn last_seen(&self, anomaly_type: &str) -> Option<DateTime<Utc>> {
        let record = self.existing(anomaly_type)?;
        let record = lock(&record);
        record.last_seen
    }

    pub fn snapshot(&self, anomaly_type: &str, window: Duration, now: DateTime<Utc>) -> RecurrenceInfo {
        let (total_count, in_window, last_occurrence) = match self.existing(anomaly_type) {
            Some(record) => {
                let record = lock(&record);
                (
                    record.total_count,
                    record.count_between(window_start(now, window), now),
                    record.latest_before(now),
                )
            }
            None => (0, 0, None),
        };

        RecurrenceInfo {
            anomaly_type: anomaly_type.to_string(),
            total_count,
            in_window,
            last_occurrence,
            seconds_since_last: last_occurrence
                .map(|last| (now - last).num_milliseconds() as f64 / 1000.0),
        }
    }

    /// Drop timestamps older than the retention limit, measured on the wall
    /// clock, across every type
    pub fn cleanup(&self) -> usize {
        self.cleanup_at(Utc::now())
    }

    /// Same as [`cleanup`](Self::cleanup) against an explicit reference,
    /// clamped to the wall clock
    pub fn cleanup_at(&self, now: DateTime<Utc>) -> usize {
        let cutoff = window_start(now.min(Utc::now()), self.max_retention);
        let records: Vec<Arc<Mutex<RecurrenceRecord>>> = self
            .records
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .values()
            .cloned()
            .collect();

        let removed: usize = records.iter().map(|r| lock(r).prune_before(cutoff)).sum();
        if removed > 0 {
            debug!(removed, types = records.len(), "recurrence cleanup");
        }
        removed
    }

    /// Forget all history, totals included
    pub fn reset(&self) {
        self.records
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clear();
    }

    pub fn anomaly_types(&self) -> Vec<String> {
        let mut types: Vec<String> = self
            .records
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .keys()
            .cloned()
            .collect();
        types.sort();
        types
    }

    /// Retained timestamps for a type; exposed for memory accounting
    pub fn retained(&self, anomaly_type: &str) -> usize {
        match self.existing(anomaly_type) {
            Some(record) => {
                let record = lock(&record);
                record.timestamps.len()
            }
            None => 0,
        }
    }

    fn existing(&self, anomaly_type: &str) -> Option<Arc<Mutex<RecurrenceRecord>>> {
        self.records
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .get(anomaly_type)
            .cloned()
    }

    fn record_for(&self, anomaly_type: &str) -> Arc<Mutex<RecurrenceRecord>> {
        if let Some(record) = self.existing(anomaly_type) {
            return record;
        }
        let mut records = self
            .records
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        if let Some(record) = records.get(anomaly_type) {
            return Arc::clone(record);
        }

        if records.len() >= self.max_types {
            // Record locks are never held while waiting on the map lock
            let oldest = records
                .iter()
                .min_by_key(|(_, record)| lock(record).touched)
                .map(|(name, _)| name.clone());
            if let Some(name) = oldest {
                records.remove(&name);
                debug!(evicted = %name, max_types = self.max_types, "recurrence type evicted");
            }
        }

        let record = Arc::new(Mutex::new(RecurrenceRecord::default()));
        records.insert(anomaly_type.to_string(), Arc::clone(&record));
        record
    }
}

fn lock(record: &Mutex<RecurrenceRecord>) -> MutexGuard<'_, RecurrenceRecord> {
    record.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}
