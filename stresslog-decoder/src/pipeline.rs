//! The decode pipeline.
//!
//! Decoding runs in three phases separated by hard barriers:
//!
//! 1. Every thread log is walked by exactly one worker of a scoped pool.
//!    Workers learn thread roles and GC epochs and append the records that
//!    pass the per-message filter to a shared lock-free buffer.
//! 2. Filters that need knowledge from all logs are applied: thread
//!    selection by role and the GC index range.
//! 3. The survivors are sorted newest first into a total order.
//!
//! The store is never written.

use crate::buffer::AppendBuffer;
use crate::filter::MessageFilter;
use crate::gc_epoch::GcEpochs;
use crate::interesting::InterestingStrings;
use crate::roles::{RoleMap, ThreadRole};
use crate::walk::{Candidate, WalkContext, walk_log};
use crate::work::{WorkItems, worker_count};
use parking_lot::Mutex;
use std::cmp::Ordering;
use std::sync::atomic::{AtomicU64, Ordering as AtomicOrdering};
use std::time::Instant;
use stresslog_core::{RecordView, StoreImage};

/// Decoder tuning.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DecodeOptions {
    /// Worker threads; one per processor when `None`.
    pub workers: Option<usize>,
    /// Stop walking a log once its timestamps fall below the time window.
    ///
    /// Only sound when each log's timestamps decrease along the walk, which
    /// holds for a monotonic tick source. Disable for stores written with a
    /// clock that may step backwards.
    pub early_stop: bool,
    /// Messages will be labelled with their thread's role. Walks that stop
    /// early still read the rest of each log to learn roles.
    pub role_tags: bool,
}

impl Default for DecodeOptions {
    fn default() -> Self {
        Self {
            workers: None,
            early_stop: true,
            role_tags: false,
        }
    }
}

impl DecodeOptions {
    /// Set the worker count.
    pub fn with_workers(mut self, workers: usize) -> Self {
        self.workers = Some(workers);
        self
    }

    /// Enable or disable the early stop of log walks.
    pub fn with_early_stop(mut self, enabled: bool) -> Self {
        self.early_stop = enabled;
        self
    }

    /// Learn roles from whole logs even when walks stop early.
    pub fn with_role_tags(mut self, enabled: bool) -> Self {
        self.role_tags = enabled;
        self
    }
}

/// A decoded message.
#[derive(Debug, Clone, Copy)]
pub struct Message<'a> {
    /// Writing thread.
    pub thread_id: u64,
    /// Role of the writing thread, if one was learned.
    pub role: Option<ThreadRole>,
    /// Offset of the thread's log in the image.
    pub log: usize,
    /// Position in its log, newest first.
    pub seq: u32,
    /// Offset of the record in the image.
    pub offset: usize,
    /// The record.
    pub record: RecordView<'a>,
}

impl Message<'_> {
    /// Timestamp in ticks.
    pub fn timestamp(&self) -> u64 {
        self.record.timestamp()
    }
}

/// Render order: newest first, then thread id, then position in the log.
/// The log offset separates recycled logs of the same thread.
fn render_order(a: &Message<'_>, b: &Message<'_>) -> Ordering {
    b.timestamp()
        .cmp(&a.timestamp())
        .then(a.thread_id.cmp(&b.thread_id))
        .then(a.seq.cmp(&b.seq))
        .then(a.log.cmp(&b.log))
}

/// Result of a decode.
#[derive(Debug, Default)]
pub struct DecodeReport<'a> {
    /// Messages that passed every filter, newest first.
    pub messages: Vec<Message<'a>>,
    /// Oldest retained message of each thread asked for, newest first.
    pub earliest: Vec<Message<'a>>,
    /// Damage found in the store, sorted.
    pub warnings: Vec<String>,
    /// Thread logs walked.
    pub logs: usize,
    /// Records read across all logs.
    pub scanned: u64,
    /// Threads whose role was learned.
    pub roles: usize,
    /// GCs whose start or end was seen.
    pub gcs: usize,
}

/// Decodes one store image.
pub struct Decoder<'i, 'a> {
    image: &'i StoreImage<'a>,
    filter: MessageFilter,
    options: DecodeOptions,
}

impl<'i, 'a> Decoder<'i, 'a> {
    /// A decoder applying `filter` to `image`.
    pub fn new(image: &'i StoreImage<'a>, filter: MessageFilter) -> Self {
        Self {
            image,
            filter,
            options: DecodeOptions::default(),
        }
    }

    /// Replace the options.
    pub fn with_options(mut self, options: DecodeOptions) -> Self {
        self.options = options;
        self
    }

    /// The filter in use.
    pub fn filter(&self) -> &MessageFilter {
        &self.filter
    }

    /// Walk, filter and sort.
    pub fn decode(&self) -> DecodeReport<'a> {
        let started = Instant::now();
        let latest = self.image.latest_timestamp();
        let window = self
            .filter
            .time
            .map(|time| time.ticks(self.image, latest))
            .unwrap_or((0, u64::MAX));

        let warnings = Mutex::new(Vec::new());
        let mut logs = Vec::new();
        for item in self.image.logs() {
            match item {
                Ok(log) => logs.push(log),
                Err(corruption) => {
                    tracing::warn!(error = %corruption, "Thread log list is damaged");
                    warnings.lock().push(format!("log list: {corruption}"));
                }
            }
        }

        let strings = InterestingStrings::new(&self.filter.formats);
        let roles = RoleMap::new();
        let epochs = GcEpochs::new();
        let accepted = AppendBuffer::new();
        let oldest = Mutex::new(Vec::new());
        let scanned = AtomicU64::new(0);
        let workers = self
            .options
            .workers
            .unwrap_or_else(|| worker_count(logs.len()));

        {
            let ctx = WalkContext {
                image: self.image,
                filter: &self.filter,
                window,
                early_stop: self.options.early_stop && self.filter.allows_early_stop(),
                learn_roles: self.options.role_tags || self.filter.selects_by_role(),
                strings: &strings,
                roles: &roles,
                epochs: &epochs,
                accepted: &accepted,
                warnings: &warnings,
            };
            let items = WorkItems::new(logs.len());
            items.run(workers, |index| {
                let summary = walk_log(&ctx, logs[index]);
                scanned.fetch_add(summary.scanned, AtomicOrdering::Relaxed);
                if let Some(candidate) = summary.oldest {
                    oldest.lock().push(candidate);
                }
            });
        }

        let message = |c: Candidate<'a>| Message {
            thread_id: c.thread_id,
            role: roles.role_of(c.thread_id),
            log: c.log,
            seq: c.seq,
            offset: c.at.offset,
            record: c.at.record,
        };

        let gc_window = match self.filter.gc {
            None => Some((0, u64::MAX)),
            Some(range) => {
                let gc_window = epochs.window(range, latest);
                if gc_window.is_none() {
                    tracing::warn!(first = range.first, last = range.last, "No GC in range was found");
                    warnings.lock().push(format!(
                        "no GC with index {}-{} was found in the store",
                        range.first, range.last
                    ));
                }
                gc_window
            }
        };

        let mut messages: Vec<Message<'a>> = match gc_window {
            None => Vec::new(),
            Some((start, end)) => accepted
                .into_vec()
                .into_iter()
                .map(message)
                .filter(|m| self.filter.selects_thread(m.thread_id, m.role))
                .filter(|m| (start..=end).contains(&m.timestamp()))
                .collect(),
        };
        messages.sort_unstable_by(render_order);

        let mut earliest: Vec<Message<'a>> = oldest
            .into_inner()
            .into_iter()
            .map(message)
            .filter(|m| self.filter.wants_earliest(m.thread_id, m.role))
            .collect();
        earliest.sort_unstable_by(render_order);

        let mut warnings = warnings.into_inner();
        warnings.sort();

        let report = DecodeReport {
            messages,
            earliest,
            warnings,
            logs: logs.len(),
            scanned: scanned.into_inner(),
            roles: roles.len(),
            gcs: epochs.len(),
        };
        tracing::info!(
            logs = report.logs,
            workers,
            scanned = report.scanned,
            messages = report.messages.len(),
            formats = strings.distinct(),
            warnings = report.warnings.len(),
            elapsed_ms = started.elapsed().as_millis() as u64,
            "Decoded stress log"
        );
        report
    }
}
