//! Interesting format strings.
//!
//! Some records matter to the decoder beyond their text: GC start and end
//! markers bound GC epochs, wait/wake messages reveal thread roles, plug
//! moves widen the value filter. Whether a format is interesting (and
//! whether it matches a user pattern) is decided once per distinct format
//! offset and cached; records are then classified by a map lookup.

use crate::filter::FormatPattern;
use crate::roles::ThreadRole;
use dashmap::DashMap;
use stresslog_core::StoreImage;
use stresslog_core::messages;

/// A well-known message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum WellKnown {
    /// Start of a GC.
    GcStart,
    /// End of a GC.
    GcEnd,
    /// Root relocation.
    GcRoot,
    /// Root promotion.
    GcRootPromote,
    /// Plug moved during compaction.
    PlugMove,
    /// Task switch marker.
    TaskSwitch,
    /// Server GC thread about to wait.
    GcThreadWaiting,
    /// Server GC thread woke up.
    GcThreadWoke,
    /// Background GC thread about to wait.
    BgcThreadWaiting,
    /// Background GC thread woke up.
    BgcThreadWoke,
}

impl WellKnown {
    /// Recognize a format string by content.
    pub fn from_format(format: &str) -> Option<Self> {
        let kind = match format {
            messages::GC_START => Self::GcStart,
            messages::GC_END => Self::GcEnd,
            messages::GC_ROOT => Self::GcRoot,
            messages::GC_ROOT_PROMOTE => Self::GcRootPromote,
            messages::GC_PLUG_MOVE => Self::PlugMove,
            messages::TASK_SWITCH => Self::TaskSwitch,
            messages::GC_THREAD_WAITING => Self::GcThreadWaiting,
            messages::GC_THREAD_WOKE => Self::GcThreadWoke,
            messages::BGC_THREAD_WAITING => Self::BgcThreadWaiting,
            messages::BGC_THREAD_WOKE => Self::BgcThreadWoke,
            _ => return None,
        };
        Some(kind)
    }

    /// The role announced by a message of this kind whose first argument is
    /// `heap`.
    pub fn role(self, heap: u64) -> Option<ThreadRole> {
        let heap = u32::try_from(heap).ok()?;
        match self {
            Self::GcThreadWaiting | Self::GcThreadWoke => Some(ThreadRole::Gc(heap)),
            Self::BgcThreadWaiting | Self::BgcThreadWoke => Some(ThreadRole::Bg(heap)),
            _ => None,
        }
    }
}

/// What the decoder knows about one format offset.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FormatInfo {
    /// The well-known message, if any.
    pub kind: Option<WellKnown>,
    /// Whether the format matches a user pattern.
    pub matches_pattern: bool,
    /// Whether the offset resolves to a format string at all.
    pub resolved: bool,
}

/// Lazily built classification of format offsets.
pub struct InterestingStrings<'p> {
    patterns: &'p [FormatPattern],
    cache: DashMap<u32, FormatInfo>,
}

impl<'p> InterestingStrings<'p> {
    /// Classify against these user patterns.
    pub fn new(patterns: &'p [FormatPattern]) -> Self {
        Self {
            patterns,
            cache: DashMap::new(),
        }
    }

    /// Classify a format offset, resolving it on first sight.
    pub fn classify(&self, image: &StoreImage<'_>, offset: u32) -> FormatInfo {
        if let Some(info) = self.cache.get(&offset) {
            return *info;
        }
        let info = match image.format_str(offset) {
            Some(format) => FormatInfo {
                kind: WellKnown::from_format(format),
                matches_pattern: self.patterns.iter().any(|p| p.matches(format)),
                resolved: true,
            },
            None => FormatInfo::default(),
        };
        self.cache.insert(offset, info);
        info
    }

    /// Distinct format offsets seen so far.
    pub fn distinct(&self) -> usize {
        self.cache.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use stresslog_core::facility::{LF_GC, LL_INFO10};
    use stresslog_core::{StressLog, StressLogConfig};

    #[test]
    fn well_known_by_content() {
        assert_eq!(WellKnown::from_format(messages::GC_START), Some(WellKnown::GcStart));
        assert_eq!(WellKnown::from_format("GC start\n"), None);
        assert_eq!(WellKnown::GcThreadWoke.role(3), Some(ThreadRole::Gc(3)));
        assert_eq!(WellKnown::BgcThreadWaiting.role(1), Some(ThreadRole::Bg(1)));
        assert_eq!(WellKnown::GcStart.role(1), None);
    }

    #[test]
    fn classification_is_cached_per_offset() {
        let log = StressLog::initialize(
            StressLogConfig::default()
                .with_chunk_size(4096)
                .with_image_capacity(16 * 1024),
        )
        .unwrap();
        let custom = log.intern_str("custom marker %d\n").unwrap();
        let waiting = log.intern_str(messages::GC_THREAD_WAITING).unwrap();
        log.log_msg(LL_INFO10, LF_GC, "unused\n", &[]);
        let bytes = log.snapshot();
        let image = StoreImage::parse(&bytes).unwrap();

        let patterns = [FormatPattern::raw("marker")];
        let strings = InterestingStrings::new(&patterns);
        let info = strings.classify(&image, custom);
        assert!(info.matches_pattern && info.resolved);
        assert_eq!(info.kind, None);
        assert_eq!(strings.classify(&image, waiting).kind, Some(WellKnown::GcThreadWaiting));
        assert_eq!(strings.classify(&image, custom), info);
        assert_eq!(strings.distinct(), 2);

        assert!(!strings.classify(&image, 0x3FF_FFFF).resolved);
    }
}
