//! Message filters.
//!
//! A [`MessageFilter`] combines the per-message predicates of a decode:
//! time window, dprint level ranges, facility ignore mask, format string
//! patterns, thread selection, argument value ranges, a GC index range and
//! the earliest-message report. All parts are optional; an empty filter
//! accepts everything.
//!
//! Time, level and facility are ANDed with each other and the group is ORed
//! with the format patterns, so a user can ask for "normal GC traffic, or
//! anything matching this string, whatever its level". Value ranges and
//! thread selection always apply.

use crate::error::{DecodeError, Result};
use crate::roles::ThreadRole;
use serde::{Deserialize, Serialize};
use std::str::FromStr;
use stresslog_core::{Facility, RecordView, StoreImage};

fn parse_hex(option: &'static str, s: &str) -> Result<u64> {
    let s = s.trim();
    let digits = s
        .strip_prefix("0x")
        .or_else(|| s.strip_prefix("0X"))
        .unwrap_or(s);
    u64::from_str_radix(digits, 16).map_err(|_| DecodeError::option(option, s, "not a hex number"))
}

fn parse_dec<T: FromStr>(option: &'static str, s: &str) -> Result<T> {
    s.trim()
        .parse()
        .map_err(|_| DecodeError::option(option, s, "not a decimal number"))
}

fn parse_seconds(s: &str) -> Result<f64> {
    let secs: f64 = s
        .trim()
        .parse()
        .map_err(|_| DecodeError::option("time window", s, "not a number of seconds"))?;
    if !secs.is_finite() || secs < 0.0 {
        return Err(DecodeError::option("time window", s, "seconds must be non-negative"));
    }
    Ok(secs)
}

/// An inclusive range of argument values.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ValueRange {
    /// First value.
    pub start: u64,
    /// Last value.
    pub end: u64,
}

impl ValueRange {
    /// A range holding one value.
    pub fn single(value: u64) -> Self {
        Self {
            start: value,
            end: value,
        }
    }

    /// Whether `value` is in the range.
    pub fn contains(&self, value: u64) -> bool {
        self.start <= value && value <= self.end
    }

    /// Whether the half-open range `[lo, hi)` overlaps this one.
    pub fn overlaps(&self, lo: u64, hi: u64) -> bool {
        lo < hi && lo <= self.end && self.start < hi
    }
}

impl FromStr for ValueRange {
    type Err = DecodeError;

    /// `value`, `start-end` or `base+size`, all hex.
    fn from_str(s: &str) -> Result<Self> {
        if let Some((start, end)) = s.split_once('-') {
            let (start, end) = (parse_hex("value range", start)?, parse_hex("value range", end)?);
            if end < start {
                return Err(DecodeError::option("value range", s, "end is below start"));
            }
            Ok(Self { start, end })
        } else if let Some((base, size)) = s.split_once('+') {
            let (base, size) = (parse_hex("value range", base)?, parse_hex("value range", size)?);
            if size == 0 {
                return Err(DecodeError::option("value range", s, "size is zero"));
            }
            let end = base
                .checked_add(size - 1)
                .ok_or_else(|| DecodeError::option("value range", s, "range overflows"))?;
            Ok(Self { start: base, end })
        } else {
            parse_hex("value range", s).map(Self::single)
        }
    }
}

/// A window of time, in seconds since the store was initialized.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub enum TimeWindow {
    /// From `start` up to `end` (or the newest message).
    Range {
        /// Start, inclusive.
        start: f64,
        /// End, inclusive.
        end: Option<f64>,
    },
    /// The last `n` seconds before the newest message in the store.
    Last(f64),
}

impl TimeWindow {
    /// The window in ticks, given the newest timestamp in the store.
    pub fn ticks(&self, image: &StoreImage<'_>, latest: u64) -> (u64, u64) {
        match *self {
            Self::Range { start, end } => (
                image.ticks_at(start),
                end.map(|end| image.ticks_at(end)).unwrap_or(u64::MAX),
            ),
            Self::Last(secs) => {
                let span = (secs * image.header().tick_frequency as f64) as u64;
                (latest.saturating_sub(span), u64::MAX)
            }
        }
    }
}

impl FromStr for TimeWindow {
    type Err = DecodeError;

    /// `start-end`, `start` or `-last`.
    fn from_str(s: &str) -> Result<Self> {
        let s = s.trim();
        if let Some(last) = s.strip_prefix('-') {
            return parse_seconds(last).map(Self::Last);
        }
        match s.split_once('-') {
            Some((start, end)) => {
                let (start, end) = (parse_seconds(start)?, parse_seconds(end)?);
                if end < start {
                    return Err(DecodeError::option("time window", s, "end is before start"));
                }
                Ok(Self::Range {
                    start,
                    end: Some(end),
                })
            }
            None => Ok(Self::Range {
                start: parse_seconds(s)?,
                end: None,
            }),
        }
    }
}

/// An inclusive range of GC dprint levels.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct LevelRange {
    /// Lowest level.
    pub min: u32,
    /// Highest level.
    pub max: u32,
}

impl LevelRange {
    /// Whether `level` is in the range.
    pub fn contains(&self, level: u32) -> bool {
        self.min <= level && level <= self.max
    }
}

impl FromStr for LevelRange {
    type Err = DecodeError;

    /// `level` or `min-max`, decimal.
    fn from_str(s: &str) -> Result<Self> {
        let (min, max) = match s.split_once('-') {
            Some((min, max)) => (parse_dec("level", min)?, parse_dec("level", max)?),
            None => {
                let level = parse_dec("level", s)?;
                (level, level)
            }
        };
        if max < min {
            return Err(DecodeError::option("level", s, "max is below min"));
        }
        Ok(Self { min, max })
    }
}

/// An inclusive range of GC indices.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct GcRange {
    /// First GC index.
    pub first: u64,
    /// Last GC index.
    pub last: u64,
}

impl GcRange {
    /// Whether `index` is in the range.
    pub fn contains(&self, index: u64) -> bool {
        self.first <= index && index <= self.last
    }
}

impl FromStr for GcRange {
    type Err = DecodeError;

    /// `index` or `first-last`, decimal.
    fn from_str(s: &str) -> Result<Self> {
        let (first, last) = match s.split_once('-') {
            Some((first, last)) => (parse_dec("gc range", first)?, parse_dec("gc range", last)?),
            None => {
                let index = parse_dec("gc range", s)?;
                (index, index)
            }
        };
        if last < first {
            return Err(DecodeError::option("gc range", s, "last is below first"));
        }
        Ok(Self { first, last })
    }
}

/// A format string pattern.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FormatPattern {
    /// Text searched for inside format strings.
    pub text: String,
}

impl FormatPattern {
    /// A pattern with escape sequences (`\n`, `\t`, `\\`, ...) interpreted.
    pub fn literal(text: &str) -> Self {
        Self {
            text: unescape(text),
        }
    }

    /// A pattern taken verbatim, for matching raw format strings such as
    /// `%p`.
    pub fn raw(text: impl Into<String>) -> Self {
        Self { text: text.into() }
    }

    /// Whether `format` contains the pattern.
    pub fn matches(&self, format: &str) -> bool {
        format.contains(&self.text)
    }
}

/// Interpret C-style escape sequences.
pub fn unescape(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    let mut chars = s.chars();
    while let Some(c) = chars.next() {
        if c != '\\' {
            out.push(c);
            continue;
        }
        match chars.next() {
            Some('n') => out.push('\n'),
            Some('t') => out.push('\t'),
            Some('r') => out.push('\r'),
            Some('0') => out.push('\0'),
            Some('\\') => out.push('\\'),
            Some('"') => out.push('"'),
            Some(other) => {
                out.push('\\');
                out.push(other);
            }
            None => out.push('\\'),
        }
    }
    out
}

/// Selects threads by raw id or by learned role.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ThreadSelector {
    /// A raw thread id.
    Id(u64),
    /// Whichever thread plays this role.
    Role(ThreadRole),
}

impl ThreadSelector {
    /// Whether a thread with this id and role is selected.
    pub fn selects(&self, thread_id: u64, role: Option<ThreadRole>) -> bool {
        match self {
            Self::Id(id) => *id == thread_id,
            Self::Role(wanted) => role == Some(*wanted),
        }
    }
}

impl FromStr for ThreadSelector {
    type Err = DecodeError;

    /// `GC<n>`, `BG<n>` or a hex thread id.
    fn from_str(s: &str) -> Result<Self> {
        let upper = s.trim().to_ascii_uppercase();
        if upper.starts_with("GC") || upper.starts_with("BG") {
            return s.parse().map(Self::Role);
        }
        parse_hex("thread id", s).map(Self::Id)
    }
}

/// The filter applied to a decode.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MessageFilter {
    /// Time window.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub time: Option<TimeWindow>,
    /// Accepted dprint level ranges (empty = all). Messages without a
    /// dprint level are not subject to this.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub levels: Vec<LevelRange>,
    /// Facilities whose messages are dropped.
    #[serde(default)]
    pub ignore_facilities: u32,
    /// Format patterns (empty = none).
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub formats: Vec<FormatPattern>,
    /// Selected threads (empty = all).
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub threads: Vec<ThreadSelector>,
    /// Argument value ranges (empty = all).
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub values: Vec<ValueRange>,
    /// GC index range.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub gc: Option<GcRange>,
    /// Report the earliest retained message of these threads (empty = all
    /// threads).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub earliest: Option<Vec<ThreadSelector>>,
}

impl MessageFilter {
    /// Create a new empty filter (matches all messages).
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the time window.
    pub fn time(mut self, window: TimeWindow) -> Self {
        self.time = Some(window);
        self
    }

    /// Add an accepted dprint level range.
    pub fn level(mut self, range: LevelRange) -> Self {
        self.levels.push(range);
        self
    }

    /// Drop messages of these facilities.
    pub fn ignore_facilities(mut self, mask: u32) -> Self {
        self.ignore_facilities |= mask;
        self
    }

    /// Add a format pattern.
    pub fn format(mut self, pattern: FormatPattern) -> Self {
        self.formats.push(pattern);
        self
    }

    /// Add a selected thread.
    pub fn thread(mut self, selector: ThreadSelector) -> Self {
        self.threads.push(selector);
        self
    }

    /// Add an argument value range.
    pub fn value(mut self, range: ValueRange) -> Self {
        self.values.push(range);
        self
    }

    /// Restrict to the time spanned by a range of GCs.
    pub fn gc(mut self, range: GcRange) -> Self {
        self.gc = Some(range);
        self
    }

    /// Report the earliest message of the selected threads (all if empty).
    pub fn earliest(mut self, threads: Vec<ThreadSelector>) -> Self {
        self.earliest = Some(threads);
        self
    }

    /// Whether any of the time, level or facility filters is set.
    fn has_level_group(&self) -> bool {
        self.time.is_some() || !self.levels.is_empty() || self.ignore_facilities != 0
    }

    fn level_group(&self, facility: Facility, timestamp: u64, window: (u64, u64)) -> bool {
        if timestamp < window.0 || timestamp > window.1 {
            return false;
        }
        if facility.mask() & self.ignore_facilities != 0 {
            return false;
        }
        match facility.dprint_level() {
            Some(level) if !self.levels.is_empty() => {
                self.levels.iter().any(|range| range.contains(level))
            }
            _ => true,
        }
    }

    /// Whether a record passes the content filters.
    ///
    /// `format_matched` says whether its format string matches one of the
    /// format patterns; `plug_move` whether it is a plug-move message,
    /// whose relocated range is also checked against the value ranges.
    pub fn accepts(
        &self,
        record: &RecordView<'_>,
        window: (u64, u64),
        format_matched: bool,
        plug_move: bool,
    ) -> bool {
        let group = self.level_group(Facility::new(record.facility()), record.timestamp(), window);
        let content = if self.formats.is_empty() {
            group
        } else {
            (self.has_level_group() && group) || format_matched
        };
        content && self.values_match(record, plug_move)
    }

    fn values_match(&self, record: &RecordView<'_>, plug_move: bool) -> bool {
        if self.values.is_empty() {
            return true;
        }
        if record
            .args()
            .any(|arg| self.values.iter().any(|range| range.contains(arg)))
        {
            return true;
        }
        if !plug_move {
            return false;
        }
        let (Some(start), Some(end), Some(distance)) = (record.arg(0), record.arg(1), record.arg(2))
        else {
            return false;
        };
        let (lo, hi) = (start.wrapping_sub(distance), end.wrapping_sub(distance));
        self.values
            .iter()
            .any(|range| range.overlaps(start, end) || range.overlaps(lo, hi))
    }

    /// Whether the walk of a log may stop once timestamps fall below the
    /// window start. Format patterns can accept older messages, and the GC
    /// range and earliest report need the whole log.
    pub fn allows_early_stop(&self) -> bool {
        self.formats.is_empty() && self.earliest.is_none() && self.gc.is_none()
    }

    /// Whether threads are selected by role, so roles must be learned from
    /// the whole of every log.
    pub fn selects_by_role(&self) -> bool {
        self.threads
            .iter()
            .any(|s| matches!(s, ThreadSelector::Role(_)))
    }

    /// Whether a thread is selected.
    pub fn selects_thread(&self, thread_id: u64, role: Option<ThreadRole>) -> bool {
        self.threads.is_empty() || self.threads.iter().any(|s| s.selects(thread_id, role))
    }

    /// Whether the earliest message of a thread is reported.
    pub fn wants_earliest(&self, thread_id: u64, role: Option<ThreadRole>) -> bool {
        match &self.earliest {
            None => false,
            Some(threads) => {
                threads.is_empty() || threads.iter().any(|s| s.selects(thread_id, role))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use stresslog_core::facility::{LF_GC, LF_JIT, dprint_facility};
    use stresslog_core::record::{encode_into, record_size};

    fn record<'a>(buf: &'a mut Vec<u8>, facility: u32, timestamp: u64, args: &[u64]) -> RecordView<'a> {
        buf.resize(record_size(args.len()), 0);
        encode_into(buf, facility, 8, timestamp, args);
        RecordView::parse(buf).unwrap()
    }

    const ALL_TIME: (u64, u64) = (0, u64::MAX);

    #[test]
    fn parse_value_ranges() {
        assert_eq!("0x10".parse::<ValueRange>().unwrap(), ValueRange::single(0x10));
        assert_eq!(
            "10-20".parse::<ValueRange>().unwrap(),
            ValueRange {
                start: 0x10,
                end: 0x20
            }
        );
        assert_eq!(
            "1000+100".parse::<ValueRange>().unwrap(),
            ValueRange {
                start: 0x1000,
                end: 0x10ff
            }
        );
        assert!("20-10".parse::<ValueRange>().is_err());
        assert!("10+0".parse::<ValueRange>().is_err());
        assert!("zz".parse::<ValueRange>().is_err());
    }

    #[test]
    fn parse_time_windows() {
        assert_eq!(
            "1.5-2".parse::<TimeWindow>().unwrap(),
            TimeWindow::Range {
                start: 1.5,
                end: Some(2.0)
            }
        );
        assert_eq!(
            "3".parse::<TimeWindow>().unwrap(),
            TimeWindow::Range {
                start: 3.0,
                end: None
            }
        );
        assert_eq!("-10".parse::<TimeWindow>().unwrap(), TimeWindow::Last(10.0));
        assert!("2-1".parse::<TimeWindow>().is_err());
        assert!("soon".parse::<TimeWindow>().is_err());
    }

    #[test]
    fn parse_levels_gcs_and_threads() {
        assert_eq!("3".parse::<LevelRange>().unwrap(), LevelRange { min: 3, max: 3 });
        assert_eq!("1-5".parse::<LevelRange>().unwrap(), LevelRange { min: 1, max: 5 });
        assert_eq!("7-9".parse::<GcRange>().unwrap(), GcRange { first: 7, last: 9 });
        assert_eq!(
            "1f4c".parse::<ThreadSelector>().unwrap(),
            ThreadSelector::Id(0x1f4c)
        );
        assert_eq!(
            "GC2".parse::<ThreadSelector>().unwrap(),
            ThreadSelector::Role(ThreadRole::Gc(2))
        );
    }

    #[test]
    fn unescape_sequences() {
        assert_eq!(unescape(r"a\nb\tc\\d"), "a\nb\tc\\d");
        assert_eq!(unescape(r"keep \q"), r"keep \q");
        assert_eq!(unescape("trail\\"), "trail\\");
        assert!(FormatPattern::literal(r"done\n").matches("gc done\n"));
        assert!(!FormatPattern::raw(r"done\n").matches("gc done\n"));
    }

    #[test]
    fn empty_filter_accepts_everything() {
        let filter = MessageFilter::new();
        let mut buf = Vec::new();
        let r = record(&mut buf, LF_JIT, 5, &[1, 2]);
        assert!(filter.accepts(&r, ALL_TIME, false, false));
        assert!(filter.allows_early_stop());
    }

    #[test]
    fn levels_apply_to_dprint_messages_only() {
        let filter = MessageFilter::new().level(LevelRange { min: 1, max: 2 });
        let mut buf = Vec::new();
        assert!(filter.accepts(&record(&mut buf, dprint_facility(2), 1, &[]), ALL_TIME, false, false));
        assert!(!filter.accepts(&record(&mut buf, dprint_facility(3), 1, &[]), ALL_TIME, false, false));
        assert!(filter.accepts(&record(&mut buf, LF_JIT, 1, &[]), ALL_TIME, false, false));
    }

    #[test]
    fn ignored_facilities_are_dropped() {
        let filter = MessageFilter::new().ignore_facilities(LF_GC);
        let mut buf = Vec::new();
        assert!(!filter.accepts(&record(&mut buf, LF_GC, 1, &[]), ALL_TIME, false, false));
        assert!(!filter.accepts(&record(&mut buf, dprint_facility(1), 1, &[]), ALL_TIME, false, false));
        assert!(filter.accepts(&record(&mut buf, LF_JIT, 1, &[]), ALL_TIME, false, false));
    }

    #[test]
    fn format_patterns_or_with_level_group() {
        let mut buf = Vec::new();

        // Patterns alone: only matching formats.
        let filter = MessageFilter::new().format(FormatPattern::raw("marker"));
        assert!(filter.accepts(&record(&mut buf, LF_GC, 1, &[]), ALL_TIME, true, false));
        assert!(!filter.accepts(&record(&mut buf, LF_GC, 1, &[]), ALL_TIME, false, false));
        assert!(!filter.allows_early_stop());

        // With a level group: either side suffices.
        let filter = filter.ignore_facilities(LF_JIT);
        assert!(filter.accepts(&record(&mut buf, LF_GC, 1, &[]), ALL_TIME, false, false));
        assert!(filter.accepts(&record(&mut buf, LF_JIT, 1, &[]), ALL_TIME, true, false));
        assert!(!filter.accepts(&record(&mut buf, LF_JIT, 1, &[]), ALL_TIME, false, false));

        // Time belongs to the level group.
        assert!(filter.accepts(&record(&mut buf, LF_GC, 1, &[]), (10, 20), true, false));
        assert!(!filter.accepts(&record(&mut buf, LF_GC, 1, &[]), (10, 20), false, false));
    }

    #[test]
    fn values_match_any_argument() {
        let filter = MessageFilter::new().value("1000+100".parse().unwrap());
        let mut buf = Vec::new();
        assert!(filter.accepts(&record(&mut buf, LF_GC, 1, &[7, 0x1080]), ALL_TIME, false, false));
        assert!(!filter.accepts(&record(&mut buf, LF_GC, 1, &[7, 0x1100]), ALL_TIME, false, false));
    }

    #[test]
    fn plug_move_matches_relocated_range() {
        let filter = MessageFilter::new().value(ValueRange::single(0x1010));
        let mut buf = Vec::new();
        // [0x5000, 0x5100) moved down by 0x4000 covers 0x1010.
        let r = record(&mut buf, LF_GC, 1, &[0x5000, 0x5100, 0x4000]);
        assert!(filter.accepts(&r, ALL_TIME, false, true));
        assert!(!filter.accepts(&r, ALL_TIME, false, false));
    }

    #[test]
    fn thread_and_earliest_selection() {
        let filter = MessageFilter::new()
            .thread(ThreadSelector::Id(0x10))
            .thread(ThreadSelector::Role(ThreadRole::Gc(1)));
        assert!(filter.selects_thread(0x10, None));
        assert!(filter.selects_thread(0x99, Some(ThreadRole::Gc(1))));
        assert!(!filter.selects_thread(0x99, Some(ThreadRole::Bg(1))));
        assert!(!filter.wants_earliest(0x10, None));
        assert!(filter.selects_by_role());
        assert!(!MessageFilter::new().thread(ThreadSelector::Id(1)).selects_by_role());

        let filter = MessageFilter::new().earliest(Vec::new());
        assert!(filter.wants_earliest(0x42, None));
        assert!(!filter.allows_early_stop());
    }

    #[test]
    fn filter_serializes() {
        let filter = MessageFilter::new()
            .value(ValueRange::single(1))
            .gc(GcRange { first: 2, last: 3 });
        let json = serde_json::to_string(&filter).unwrap();
        let back: MessageFilter = serde_json::from_str(&json).unwrap();
        assert_eq!(back.values, filter.values);
        assert_eq!(back.gc, filter.gc);
        assert!(!json.contains("formats"));
    }
}
