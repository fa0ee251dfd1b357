//! Stress log configuration.

use crate::error::{Result, StressLogError};
use crate::facility::{LF_ALL, LL_INFO1000, parse_facility_mask, parse_level};
use crate::record::MAX_FORMAT_OFFSET;
use serde::{Deserialize, Serialize};
use std::env;
use std::path::PathBuf;
use std::time::Duration;

/// Default chunk data size: 32 KiB.
pub const DEFAULT_CHUNK_SIZE: usize = 32 * 1024;

/// Smallest accepted chunk size.
pub const MIN_CHUNK_SIZE: usize = 4 * 1024;

/// Largest accepted chunk size.
pub const MAX_CHUNK_SIZE: usize = 1024 * 1024;

/// Default format image capacity: 1 MiB.
pub const DEFAULT_IMAGE_CAPACITY: usize = 1024 * 1024;

/// Default age after which a dead log may be handed to a new thread.
pub const DEFAULT_RECYCLE_AGE: Duration = Duration::from_secs(1);

/// Configuration for a [`StressLog`](crate::StressLog).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct StressLogConfig {
    /// Facilities that are logged. Zero disables logging.
    pub facilities: u32,
    /// Highest level that is logged.
    pub level: u32,
    /// Byte ceiling for a single thread's chunks.
    pub max_bytes_per_thread: u64,
    /// Byte ceiling for all chunks together.
    pub max_bytes_total: u64,
    /// Size of a chunk's record buffer.
    pub chunk_size: usize,
    /// Bytes reserved for format strings.
    pub image_capacity: usize,
    /// Back the store with this file instead of anonymous memory.
    pub output_file: Option<PathBuf>,
    /// Dead logs whose newest record is older than this may be reused.
    pub recycle_age: Duration,
}

impl Default for StressLogConfig {
    fn default() -> Self {
        Self {
            facilities: LF_ALL,
            level: LL_INFO1000,
            max_bytes_per_thread: DEFAULT_CHUNK_SIZE as u64 * 4,
            max_bytes_total: DEFAULT_CHUNK_SIZE as u64 * 1024,
            chunk_size: DEFAULT_CHUNK_SIZE,
            image_capacity: DEFAULT_IMAGE_CAPACITY,
            output_file: None,
            recycle_age: DEFAULT_RECYCLE_AGE,
        }
    }
}

impl StressLogConfig {
    /// Create configuration from environment variables.
    ///
    /// Environment variables:
    /// - `STRESSLOG_FACILITIES`: facility mask, hex or `GC|GCROOTS` names
    /// - `STRESSLOG_LEVEL`: level name or number
    /// - `STRESSLOG_SIZE`: per-thread byte ceiling
    /// - `STRESSLOG_TOTAL_SIZE`: global byte ceiling
    /// - `STRESSLOG_CHUNK_SIZE`: chunk size in bytes
    /// - `STRESSLOG_FILENAME`: back the store with this file
    ///
    /// Unset or unparsable variables keep their defaults.
    pub fn from_env() -> Self {
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Like [`from_env`](Self::from_env) with an explicit variable lookup.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let mut config = Self::default();
        if let Some(mask) = lookup("STRESSLOG_FACILITIES").and_then(|s| parse_facility_mask(&s)) {
            config.facilities = mask;
        }
        if let Some(level) = lookup("STRESSLOG_LEVEL").and_then(|s| parse_level(&s)) {
            config.level = level;
        }
        if let Some(size) = lookup("STRESSLOG_SIZE").and_then(|s| parse_size(&s)) {
            config.max_bytes_per_thread = size;
        }
        if let Some(size) = lookup("STRESSLOG_TOTAL_SIZE").and_then(|s| parse_size(&s)) {
            config.max_bytes_total = size;
        }
        if let Some(size) = lookup("STRESSLOG_CHUNK_SIZE").and_then(|s| parse_size(&s)) {
            config.chunk_size = size as usize;
        }
        if let Some(path) = lookup("STRESSLOG_FILENAME").filter(|s| !s.is_empty()) {
            config.output_file = Some(PathBuf::from(path));
        }
        config
    }

    /// Set the facility mask.
    pub fn with_facilities(mut self, facilities: u32) -> Self {
        self.facilities = facilities;
        self
    }

    /// Set the level.
    pub fn with_level(mut self, level: u32) -> Self {
        self.level = level;
        self
    }

    /// Set the per-thread byte ceiling.
    pub fn with_max_bytes_per_thread(mut self, bytes: u64) -> Self {
        self.max_bytes_per_thread = bytes;
        self
    }

    /// Set the global byte ceiling.
    pub fn with_max_bytes_total(mut self, bytes: u64) -> Self {
        self.max_bytes_total = bytes;
        self
    }

    /// Set the chunk size.
    pub fn with_chunk_size(mut self, chunk_size: usize) -> Self {
        self.chunk_size = chunk_size;
        self
    }

    /// Set the format image capacity.
    pub fn with_image_capacity(mut self, capacity: usize) -> Self {
        self.image_capacity = capacity;
        self
    }

    /// Back the store with a file.
    pub fn with_output_file(mut self, path: impl Into<PathBuf>) -> Self {
        self.output_file = Some(path.into());
        self
    }

    /// Set the dead-log recycle age.
    pub fn with_recycle_age(mut self, age: Duration) -> Self {
        self.recycle_age = age;
        self
    }

    /// Chunks allowed per thread.
    pub fn chunks_per_thread(&self) -> u64 {
        self.max_bytes_per_thread / self.chunk_size as u64
    }

    /// Chunks allowed in total.
    pub fn total_chunks(&self) -> u64 {
        self.max_bytes_total / self.chunk_size as u64
    }

    /// Check the configuration for consistency.
    pub fn validate(&self) -> Result<()> {
        if !self.chunk_size.is_power_of_two()
            || !(MIN_CHUNK_SIZE..=MAX_CHUNK_SIZE).contains(&self.chunk_size)
        {
            return Err(StressLogError::config(
                "chunk_size",
                format!(
                    "{} is not a power of two in [{MIN_CHUNK_SIZE}, {MAX_CHUNK_SIZE}]",
                    self.chunk_size
                ),
            ));
        }
        if self.image_capacity > MAX_FORMAT_OFFSET as usize + 1 {
            return Err(StressLogError::config(
                "image_capacity",
                format!(
                    "{} exceeds the format offset range of {} bytes",
                    self.image_capacity,
                    MAX_FORMAT_OFFSET as u64 + 1
                ),
            ));
        }
        if self.image_capacity < 64 {
            return Err(StressLogError::config(
                "image_capacity",
                format!("{} is too small to hold any format", self.image_capacity),
            ));
        }
        if self.max_bytes_per_thread < self.chunk_size as u64 {
            return Err(StressLogError::config(
                "max_bytes_per_thread",
                format!("{} is smaller than one chunk", self.max_bytes_per_thread),
            ));
        }
        if self.max_bytes_total < self.chunk_size as u64 {
            return Err(StressLogError::config(
                "max_bytes_total",
                format!("{} is smaller than one chunk", self.max_bytes_total),
            ));
        }
        Ok(())
    }
}

/// Parse a byte count: decimal, `0x` hex, or with a `K`/`M`/`G` suffix.
pub fn parse_size(s: &str) -> Option<u64> {
    let s = s.trim();
    if let Some(hex) = s.strip_prefix("0x").or_else(|| s.strip_prefix("0X")) {
        return u64::from_str_radix(hex, 16).ok();
    }
    let (digits, multiplier) = match s.char_indices().last()? {
        (i, 'k' | 'K') => (&s[..i], 1u64 << 10),
        (i, 'm' | 'M') => (&s[..i], 1u64 << 20),
        (i, 'g' | 'G') => (&s[..i], 1u64 << 30),
        _ => (s, 1),
    };
    digits.trim().parse::<u64>().ok()?.checked_mul(multiplier)
}
