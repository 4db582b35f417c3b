// Ordered, deduplicated, bounded record buffer
//
// Records are kept sorted by `(timestamp, id)` and indexed by id. Eviction
// removes from the oldest end. The key of the newest evicted record becomes a
// low-water mark: anything at or below it is refused, so an evicted record can
// never come back and be delivered a second time.
//
// Age eviction is measured from the newest timestamp, so replayed or
// historical feeds keep their full window. That reference is clamped to the
// wall clock plus `FUTURE_SKEW_TOLERANCE`: a record stamped further in the
// future is kept but does not push the cutoff forward.

use crate::config::RetentionConfig;
use crate::record::{EegRecord, RecordId, RecordKey};
use std::collections::{BTreeMap, HashMap};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

/// How far ahead of the local clock a timestamp may be and still drive age eviction
pub const FUTURE_SKEW_TOLERANCE: Duration = Duration::from_secs(60);

/// Why a record was not admitted
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Rejection {
    /// A record with the same id is already present
    Duplicate,
    /// Older than the retention window
    Expired,
}

#[derive(Debug)]
pub struct Timeline {
    records: BTreeMap<RecordKey, EegRecord>,
    index: HashMap<RecordId, RecordKey>,
    retention: RetentionConfig,
    low_water: Option<RecordKey>,
    clock: fn() -> i64,
}

/// Milliseconds since the Unix epoch
fn wall_clock_ms() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| i64::try_from(d.as_millis()).unwrap_or(i64::MAX))
        .unwrap_or(0)
}

fn duration_ms(duration: Duration) -> i64 {
    i64::try_from(duration.as_millis()).unwrap_or(i64::MAX)
}

impl Timeline {
    pub fn new(retention: RetentionConfig) -> Self {
        Self::with_clock(retention, wall_clock_ms)
    }

    /// Timeline reading "now" from `clock` (epoch milliseconds)
    pub fn with_clock(retention: RetentionConfig, clock: fn() -> i64) -> Self {
        Self {
            records: BTreeMap::new(),
            index: HashMap::new(),
            retention,
            low_water: None,
            clock,
        }
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn contains(&self, id: RecordId) -> bool {
        self.index.contains_key(&id)
    }

    /// Key of the newest retained record
    pub fn tail(&self) -> Option<RecordKey> {
        self.records.keys().next_back().copied()
    }

    /// Key of the oldest retained record
    pub fn head(&self) -> Option<RecordKey> {
        self.records.keys().next().copied()
    }

    pub fn low_water(&self) -> Option<RecordKey> {
        self.low_water
    }

    /// Insert `record` in key order
    pub fn insert(&mut self, record: EegRecord) -> Result<&EegRecord, Rejection> {
        if self.index.contains_key(&record.id) {
            return Err(Rejection::Duplicate);
        }

        let key = record.key();
        if matches!(self.low_water, Some(low_water) if key <= low_water) {
            return Err(Rejection::Expired);
        }

        self.index.insert(record.id, key);
        Ok(self.records.entry(key).or_insert(record))
    }

    /// Drop records outside the retention window, returning how many were removed
    pub fn evict(&mut self) -> usize {
        let mut evicted = 0;

        if let Some(max_records) = self.retention.max_records {
            while self.records.len() > max_records {
                self.pop_oldest();
                evicted += 1;
            }
        }

        if let (Some(max_age), Some(tail)) = (self.retention.max_age, self.tail()) {
            let latest_plausible =
                (self.clock)().saturating_add(duration_ms(FUTURE_SKEW_TOLERANCE));
            let reference = tail.timestamp.min(latest_plausible);
            let cutoff = reference.saturating_sub(duration_ms(max_age));
            while matches!(self.head(), Some(head) if head.timestamp < cutoff) {
                self.pop_oldest();
                evicted += 1;
            }
        }

        evicted
    }

    fn pop_oldest(&mut self) {
        if let Some((key, record)) = self.records.pop_first() {
            self.index.remove(&record.id);
            self.low_water = Some(self.low_water.map_or(key, |lw| lw.max(key)));
        }
    }

    pub fn iter(&self) -> impl Iterator<Item = &EegRecord> + '_ {
        self.records.values()
    }

    /// Copy of the current contents, oldest first
    pub fn snapshot(&self) -> Vec<EegRecord> {
        self.records.values().cloned().collect()
    }
}
