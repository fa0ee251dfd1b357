//! GC epochs.
//!
//! While walking, the decoder notes the timestamps of every GC start and
//! end marker it meets, keyed by GC index. A GC range filter is turned into
//! a time window from these once all logs have been walked.

use crate::filter::GcRange;
use dashmap::DashMap;

#[derive(Debug, Clone, Copy, Default)]
struct Bounds {
    start: Option<u64>,
    end: Option<u64>,
}

/// Start and end timestamps of the GCs seen in a store.
#[derive(Debug, Default)]
pub struct GcEpochs {
    bounds: DashMap<u64, Bounds>,
}

impl GcEpochs {
    /// Create an empty set.
    pub fn new() -> Self {
        Self::default()
    }

    /// GC `index` started at `timestamp`.
    pub fn observe_start(&self, index: u64, timestamp: u64) {
        let mut entry = self.bounds.entry(index).or_default();
        entry.start = Some(entry.start.map_or(timestamp, |t| t.min(timestamp)));
    }

    /// GC `index` ended at `timestamp`.
    pub fn observe_end(&self, index: u64, timestamp: u64) {
        let mut entry = self.bounds.entry(index).or_default();
        entry.end = Some(entry.end.map_or(timestamp, |t| t.max(timestamp)));
    }

    /// The time window covering every observed GC in `range`.
    ///
    /// A GC whose end was never logged is still in progress and extends to
    /// `latest`, the newest timestamp in the store. A GC whose start was
    /// overwritten extends back to the oldest data. `None` if no GC in the
    /// range was observed at all.
    pub fn window(&self, range: GcRange, latest: u64) -> Option<(u64, u64)> {
        let mut window: Option<(u64, u64)> = None;
        for entry in self.bounds.iter() {
            if !range.contains(*entry.key()) {
                continue;
            }
            let start = entry.start.unwrap_or(0);
            let end = entry.end.unwrap_or(latest).max(start);
            window = Some(match window {
                None => (start, end),
                Some((lo, hi)) => (lo.min(start), hi.max(end)),
            });
        }
        window
    }

    /// Number of GCs observed.
    pub fn len(&self) -> usize {
        self.bounds.len()
    }

    /// Whether no GC was observed.
    pub fn is_empty(&self) -> bool {
        self.bounds.is_empty()
    }
}
