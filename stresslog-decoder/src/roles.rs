//! Logical thread roles.
//!
//! Raw thread ids mean little to a reader. Server GC and background GC
//! threads announce themselves through well-known wait/wake messages that
//! carry their heap number; the decoder learns the role of each such
//! thread while walking and lets the user filter and label by role.

use crate::error::{DecodeError, Result};
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// The role a thread plays in the runtime.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum ThreadRole {
    /// Server GC thread for a heap.
    Gc(u32),
    /// Background GC thread for a heap.
    Bg(u32),
}

impl fmt::Display for ThreadRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Gc(heap) => write!(f, "GC{heap}"),
            Self::Bg(heap) => write!(f, "BG{heap}"),
        }
    }
}

impl FromStr for ThreadRole {
    type Err = DecodeError;

    fn from_str(s: &str) -> Result<Self> {
        let upper = s.trim().to_ascii_uppercase();
        let heap = |digits: &str| {
            digits
                .parse::<u32>()
                .map_err(|_| DecodeError::option("thread role", s, "heap number is not a decimal"))
        };
        if let Some(digits) = upper.strip_prefix("GC") {
            heap(digits).map(Self::Gc)
        } else if let Some(digits) = upper.strip_prefix("BG") {
            heap(digits).map(Self::Bg)
        } else {
            Err(DecodeError::option("thread role", s, "expected GC<n> or BG<n>"))
        }
    }
}

/// Thread id to role mapping learned during a decode.
#[derive(Debug, Default)]
pub struct RoleMap {
    roles: DashMap<u64, ThreadRole>,
}

impl RoleMap {
    /// Create an empty map.
    pub fn new() -> Self {
        Self::default()
    }

    /// Record that `thread_id` plays `role`. The first role seen wins.
    pub fn learn(&self, thread_id: u64, role: ThreadRole) {
        self.roles.entry(thread_id).or_insert(role);
    }

    /// The role of a thread, if one was learned.
    pub fn role_of(&self, thread_id: u64) -> Option<ThreadRole> {
        self.roles.get(&thread_id).map(|r| *r)
    }

    /// Threads known to play `role`.
    pub fn threads_for(&self, role: ThreadRole) -> Vec<u64> {
        let mut threads: Vec<u64> = self
            .roles
            .iter()
            .filter(|entry| *entry.value() == role)
            .map(|entry| *entry.key())
            .collect();
        threads.sort_unstable();
        threads
    }

    /// Number of threads with a known role.
    pub fn len(&self) -> usize {
        self.roles.len()
    }

    /// Whether no role has been learned.
    pub fn is_empty(&self) -> bool {
        self.roles.is_empty()
    }
}
