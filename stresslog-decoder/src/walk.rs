//! Per-log walk.
//!
//! One worker walks one thread log newest record first, learning thread
//! roles and GC epochs from well-known messages and appending the records
//! that pass the filter to the shared buffer. Damaged chunks are reported
//! and skipped; a broken ring ends the walk of that log only.

use crate::buffer::AppendBuffer;
use crate::filter::MessageFilter;
use crate::gc_epoch::GcEpochs;
use crate::interesting::{InterestingStrings, WellKnown};
use crate::roles::RoleMap;
use parking_lot::Mutex;
use stresslog_core::{Corruption, LogView, RecordAt, StoreImage};

/// A record found by a walk.
#[derive(Debug, Clone, Copy)]
pub(crate) struct Candidate<'a> {
    pub thread_id: u64,
    pub log: usize,
    /// Position in its log's walk, newest first.
    pub seq: u32,
    pub at: RecordAt<'a>,
}

/// Everything a walk reads or updates besides the log itself.
pub(crate) struct WalkContext<'c, 'a> {
    pub image: &'c StoreImage<'a>,
    pub filter: &'c MessageFilter,
    pub window: (u64, u64),
    pub early_stop: bool,
    /// Keep reading past the window start to learn roles.
    pub learn_roles: bool,
    pub strings: &'c InterestingStrings<'c>,
    pub roles: &'c RoleMap,
    pub epochs: &'c GcEpochs,
    pub accepted: &'c AppendBuffer<Candidate<'a>>,
    pub warnings: &'c Mutex<Vec<String>>,
}

/// What a walk found besides the accepted records.
#[derive(Debug, Default)]
pub(crate) struct WalkSummary<'a> {
    /// Oldest readable record of the log.
    pub oldest: Option<Candidate<'a>>,
    /// Records read.
    pub scanned: u64,
}

impl WalkContext<'_, '_> {
    fn warn(&self, log: &LogView<'_, '_>, corruption: &Corruption) {
        tracing::warn!(
            thread_id = log.thread_id(),
            log = log.offset(),
            error = %corruption,
            "Skipping damaged log data"
        );
        self.warnings.lock().push(format!(
            "thread {:#x} (log {:#x}): {}",
            log.thread_id(),
            log.offset(),
            corruption
        ));
    }

    fn learn(&self, thread_id: u64, kind: WellKnown, at: &RecordAt<'_>) {
        let Some(first) = at.record.arg(0) else {
            return;
        };
        match kind {
            WellKnown::GcStart => self.epochs.observe_start(first, at.record.timestamp()),
            WellKnown::GcEnd => self.epochs.observe_end(first, at.record.timestamp()),
            _ => {
                if let Some(role) = kind.role(first) {
                    self.roles.learn(thread_id, role);
                }
            }
        }
    }
}

pub(crate) fn walk_log<'a>(ctx: &WalkContext<'_, 'a>, log: LogView<'_, 'a>) -> WalkSummary<'a> {
    let thread_id = log.thread_id();
    let mut summary = WalkSummary::default();
    let mut seq = 0u32;
    let mut past_window = false;

    for item in log.read() {
        let at = match item {
            Ok(at) => at,
            Err(corruption) => {
                ctx.warn(&log, &corruption);
                continue;
            }
        };
        summary.scanned += 1;
        let candidate = Candidate {
            thread_id,
            log: log.offset(),
            seq,
            at,
        };
        seq = seq.wrapping_add(1);
        summary.oldest = Some(candidate);

        if ctx.early_stop && !past_window && at.record.timestamp() < ctx.window.0 {
            if !ctx.learn_roles {
                break;
            }
            past_window = true;
        }

        let info = ctx.strings.classify(ctx.image, at.record.format_offset());
        if let Some(kind) = info.kind {
            ctx.learn(thread_id, kind, &at);
        }
        if past_window {
            continue;
        }
        let plug_move = info.kind == Some(WellKnown::PlugMove);
        if ctx
            .filter
            .accepts(&at.record, ctx.window, info.matches_pattern, plug_move)
        {
            ctx.accepted.push(candidate);
        }
    }

    tracing::trace!(
        thread_id,
        log = log.offset(),
        scanned = summary.scanned,
        "Walked thread log"
    );
    summary
}
