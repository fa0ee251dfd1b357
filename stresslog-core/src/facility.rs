//! Facility bits and log levels.
//!
//! A message carries a 32-bit facility mask; the registry's configured mask
//! and level decide whether a call site writes at all. GC messages that carry
//! a dprint level encode it in the upper half of the facility word.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Garbage collector.
pub const LF_GC: u32 = 0x0000_0001;
/// GC bookkeeping details.
pub const LF_GCINFO: u32 = 0x0000_0002;
/// Stub generation.
pub const LF_STUBS: u32 = 0x0000_0004;
/// Just-in-time compiler.
pub const LF_JIT: u32 = 0x0000_0008;
/// Module and assembly loading.
pub const LF_LOADER: u32 = 0x0000_0010;
/// Metadata access.
pub const LF_METADATA: u32 = 0x0000_0020;
/// Synchronization primitives.
pub const LF_SYNC: u32 = 0x0000_0040;
/// Execution engine memory.
pub const LF_EEMEM: u32 = 0x0000_0080;
/// GC allocation.
pub const LF_GCALLOC: u32 = 0x0000_0100;
/// Debugger services.
pub const LF_CORDB: u32 = 0x0000_0200;
/// Type loading.
pub const LF_CLASSLOADER: u32 = 0x0000_0400;
/// Profiler services.
pub const LF_CORPROF: u32 = 0x0000_0800;
/// Diagnostics port.
pub const LF_DIAGNOSTICS_PORT: u32 = 0x0000_1000;
/// Debugger allocations.
pub const LF_DBGALLOC: u32 = 0x0000_2000;
/// Exception handling.
pub const LF_EH: u32 = 0x0000_4000;
/// Edit and continue.
pub const LF_ENC: u32 = 0x0000_8000;
/// Assertions.
pub const LF_ASSERT: u32 = 0x0001_0000;
/// Verifier.
pub const LF_VERIFIER: u32 = 0x0002_0000;
/// Thread pool.
pub const LF_THREADPOOL: u32 = 0x0004_0000;
/// GC root reporting.
pub const LF_GCROOTS: u32 = 0x0008_0000;
/// Native interop.
pub const LF_INTEROP: u32 = 0x0010_0000;
/// Marshalling.
pub const LF_MARSHALER: u32 = 0x0020_0000;
/// Tiered compilation.
pub const LF_TIEREDCOMPILATION: u32 = 0x0040_0000;
/// Precompiled images.
pub const LF_ZAP: u32 = 0x0080_0000;
/// Startup.
pub const LF_STARTUP: u32 = 0x0100_0000;
/// Application domains.
pub const LF_APPDOMAIN: u32 = 0x0200_0000;
/// Code sharing.
pub const LF_CODESHARING: u32 = 0x0400_0000;
/// Store.
pub const LF_STORE: u32 = 0x0800_0000;
/// Security.
pub const LF_SECURITY: u32 = 0x1000_0000;
/// Locks.
pub const LF_LOCKS: u32 = 0x2000_0000;
/// Base class library.
pub const LF_BCL: u32 = 0x4000_0000;
/// Always logged, regardless of the configured facility mask.
pub const LF_ALWAYS: u32 = 0x8000_0000;
/// Every facility.
pub const LF_ALL: u32 = 0xFFFF_FFFF;

/// Always.
pub const LL_ALWAYS: u32 = 0;
/// Fatal errors.
pub const LL_FATALERROR: u32 = 1;
/// Errors.
pub const LL_ERROR: u32 = 2;
/// Warnings.
pub const LL_WARNING: u32 = 3;
/// About 10 messages per run.
pub const LL_INFO10: u32 = 4;
/// About 100 messages per run.
pub const LL_INFO100: u32 = 5;
/// About 1000 messages per run.
pub const LL_INFO1000: u32 = 6;
/// About 10000 messages per run.
pub const LL_INFO10000: u32 = 7;
/// About 100000 messages per run.
pub const LL_INFO100000: u32 = 8;
/// About a million messages per run.
pub const LL_INFO1000000: u32 = 9;
/// Everything.
pub const LL_EVERYTHING: u32 = 10;

/// Low half of a facility word that marks a GC dprint message.
pub const DPRINT_MARKER: u32 = 0xFFFF;

/// Largest dprint level that fits in the facility encoding.
pub const MAX_DPRINT_LEVEL: u32 = 0x7FFF;

const FACILITY_NAMES: [(u32, &str); 31] = [
    (LF_GC, "GC"),
    (LF_GCINFO, "GCINFO"),
    (LF_STUBS, "STUBS"),
    (LF_JIT, "JIT"),
    (LF_LOADER, "LOADER"),
    (LF_METADATA, "METADATA"),
    (LF_SYNC, "SYNC"),
    (LF_EEMEM, "EEMEM"),
    (LF_GCALLOC, "GCALLOC"),
    (LF_CORDB, "CORDB"),
    (LF_CLASSLOADER, "CLASSLOADER"),
    (LF_CORPROF, "CORPROF"),
    (LF_DIAGNOSTICS_PORT, "DIAGNOSTICS_PORT"),
    (LF_DBGALLOC, "DBGALLOC"),
    (LF_EH, "EH"),
    (LF_ENC, "ENC"),
    (LF_ASSERT, "ASSERT"),
    (LF_VERIFIER, "VERIFIER"),
    (LF_THREADPOOL, "THREADPOOL"),
    (LF_GCROOTS, "GCROOTS"),
    (LF_INTEROP, "INTEROP"),
    (LF_MARSHALER, "MARSHALER"),
    (LF_TIEREDCOMPILATION, "TIEREDCOMPILATION"),
    (LF_ZAP, "ZAP"),
    (LF_STARTUP, "STARTUP"),
    (LF_APPDOMAIN, "APPDOMAIN"),
    (LF_CODESHARING, "CODESHARING"),
    (LF_STORE, "STORE"),
    (LF_SECURITY, "SECURITY"),
    (LF_LOCKS, "LOCKS"),
    (LF_BCL, "BCL"),
];

/// Facility word for a GC message logged at the given dprint level.
///
/// Levels above [`MAX_DPRINT_LEVEL`] are clamped.
pub const fn dprint_facility(level: u32) -> u32 {
    let level = if level > MAX_DPRINT_LEVEL {
        MAX_DPRINT_LEVEL
    } else {
        level
    };
    LF_ALWAYS | (level << 16) | DPRINT_MARKER
}

/// A decoded view of a facility word.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Facility(u32);

impl Facility {
    /// Wrap a raw facility word.
    pub const fn new(raw: u32) -> Self {
        Self(raw)
    }

    /// The raw facility word as stored in the record.
    pub const fn raw(self) -> u32 {
        self.0
    }

    /// The dprint level, if this is a GC dprint message.
    pub const fn dprint_level(self) -> Option<u32> {
        if self.0 & LF_ALWAYS != 0 && self.0 & DPRINT_MARKER == DPRINT_MARKER {
            Some((self.0 >> 16) & MAX_DPRINT_LEVEL)
        } else {
            None
        }
    }

    /// The facility bits with any dprint level stripped.
    ///
    /// A dprint message belongs to the GC facility only.
    pub const fn mask(self) -> u32 {
        if self.dprint_level().is_some() {
            LF_GC
        } else {
            self.0
        }
    }

    /// Names of all facility bits set, `ALWAYS` last.
    pub fn names(self) -> Vec<&'static str> {
        let mask = self.mask();
        let mut names: Vec<&'static str> = FACILITY_NAMES
            .iter()
            .filter(|(bit, _)| mask & bit != 0)
            .map(|(_, name)| *name)
            .collect();
        if mask & LF_ALWAYS != 0 {
            names.push("ALWAYS");
        }
        names
    }
}

impl fmt::Display for Facility {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let names = self.names();
        if names.is_empty() {
            return write!(f, "{:#x}", self.0);
        }
        write!(f, "`{}`", names.join("`"))
    }
}

/// Parse a level name (`info1000`, `warning`, ...) or a plain number.
pub fn parse_level(s: &str) -> Option<u32> {
    let lower = s.trim().to_ascii_lowercase();
    let name = lower.strip_prefix("ll_").unwrap_or(&lower);
    match name {
        "always" => Some(LL_ALWAYS),
        "fatalerror" | "fatal" => Some(LL_FATALERROR),
        "error" => Some(LL_ERROR),
        "warning" | "warn" => Some(LL_WARNING),
        "info10" => Some(LL_INFO10),
        "info100" => Some(LL_INFO100),
        "info1000" | "info" => Some(LL_INFO1000),
        "info10000" => Some(LL_INFO10000),
        "info100000" => Some(LL_INFO100000),
        "info1000000" => Some(LL_INFO1000000),
        "everything" => Some(LL_EVERYTHING),
        other => other.parse().ok(),
    }
}

/// Parse a facility mask written as hex (`0x1`, `ffffffff`) or as names
/// joined with `|` (`GC|GCROOTS`).
pub fn parse_facility_mask(s: &str) -> Option<u32> {
    let s = s.trim();
    let hex = s
        .strip_prefix("0x")
        .or_else(|| s.strip_prefix("0X"))
        .unwrap_or(s);
    if let Ok(mask) = u32::from_str_radix(hex, 16) {
        return Some(mask);
    }
    let mut mask = 0;
    for part in s.split('|') {
        let part = part.trim().to_ascii_uppercase();
        let part = part.strip_prefix("LF_").unwrap_or(&part);
        let bit = match part {
            "ALL" => LF_ALL,
            "ALWAYS" => LF_ALWAYS,
            name => FACILITY_NAMES
                .iter()
                .find(|(_, n)| *n == name)
                .map(|(bit, _)| *bit)?,
        };
        mask |= bit;
    }
    Some(mask)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn dprint_roundtrip() {
        let facility = Facility::new(dprint_facility(3));
        assert_eq!(facility.dprint_level(), Some(3));
        assert_eq!(facility.mask(), LF_GC);
        assert_eq!(facility.to_string(), "`GC`");
    }

    #[test]
    fn dprint_level_is_clamped() {
        let facility = Facility::new(dprint_facility(1 << 20));
        assert_eq!(facility.dprint_level(), Some(MAX_DPRINT_LEVEL));
    }

    #[test]
    fn plain_facilities_have_no_level() {
        let facility = Facility::new(LF_GC | LF_GCROOTS);
        assert_eq!(facility.dprint_level(), None);
        assert_eq!(facility.names(), vec!["GC", "GCROOTS"]);
        assert_eq!(Facility::new(LF_ALWAYS).names(), vec!["ALWAYS"]);
    }

    #[test]
    fn parse_levels() {
        assert_eq!(parse_level("LL_INFO1000"), Some(LL_INFO1000));
        assert_eq!(parse_level("warning"), Some(LL_WARNING));
        assert_eq!(parse_level("7"), Some(7));
        assert_eq!(parse_level("loud"), None);
    }

    #[test]
    fn parse_masks() {
        assert_eq!(parse_facility_mask("0x81"), Some(0x81));
        assert_eq!(parse_facility_mask("GC|GCROOTS"), Some(LF_GC | LF_GCROOTS));
        assert_eq!(parse_facility_mask("lf_jit"), Some(LF_JIT));
        assert_eq!(parse_facility_mask("GC|NOPE"), None);
    }
}
