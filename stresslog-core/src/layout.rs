//! Store layout.
//!
//! Everything the writer shares with an offline reader lives in one
//! position-independent store: a fixed header, the module table, the format
//! image, and a bump-allocated data area holding thread logs and chunks.
//! Links between structures are byte offsets from the start of the store;
//! offset zero means "none".
//!
//! ```text
//!   0 header size          8 magic u32 | version u32   16 memory base
//!  24 high-water offset   32 limit offset              40 first log
//!  48 tick frequency      56 start tick                64 threads with no log
//!  72..192 fifteen slots  192 module table (5 × 16)    272 format image
//! ```

use crate::error::{Result, StressLogError};
use byteorder::{LittleEndian, ReadBytesExt};
use serde::{Deserialize, Serialize};
use std::io::Cursor;

/// Magic number identifying a stress log store ("STRL").
pub const STORE_MAGIC: u32 = u32::from_le_bytes(*b"STRL");

/// Current store format version (major 1, minor 2).
pub const STORE_VERSION: u32 = 0x0001_0002;

/// Header: total size of header, module table and image.
pub const HDR_HEADER_SIZE: usize = 0;
/// Header: magic (low half) and version (high half).
pub const HDR_MAGIC_VERSION: usize = 8;
/// Header: base address of the mapping in the writing process.
pub const HDR_MEMORY_BASE: usize = 16;
/// Header: bump allocator high-water offset.
pub const HDR_MEMORY_CUR: usize = 24;
/// Header: end of the data area.
pub const HDR_MEMORY_LIMIT: usize = 32;
/// Header: offset of the newest thread log.
pub const HDR_LOGS: usize = 40;
/// Header: tick frequency in ticks per second.
pub const HDR_TICK_FREQUENCY: usize = 48;
/// Header: tick count at initialization.
pub const HDR_START_TIMESTAMP: usize = 56;
/// Header: threads that failed to obtain a log.
pub const HDR_THREADS_WITH_NO_LOG: usize = 64;
/// Header: chunk data size.
pub const HDR_CHUNK_SIZE: usize = 72;
/// Header: wall-clock start time in milliseconds since the Unix epoch.
pub const HDR_START_TIME_MS: usize = 80;
/// Header: facility mask (low half) and level (high half).
pub const HDR_FACILITIES_LEVEL: usize = 88;
/// Header: per-thread byte ceiling.
pub const HDR_MAX_BYTES_PER_THREAD: usize = 96;
/// Header: global byte ceiling.
pub const HDR_MAX_BYTES_TOTAL: usize = 104;
/// Header: chunks held across all logs.
pub const HDR_TOTAL_CHUNKS: usize = 112;
/// Header: logs marked dead and not yet recycled.
pub const HDR_DEAD_COUNT: usize = 120;
/// Header: format image capacity.
pub const HDR_IMAGE_CAPACITY: usize = 128;
/// Header: bytes of the format image in use.
pub const HDR_IMAGE_USED: usize = 136;
/// Header: number of registered modules.
pub const HDR_MODULE_COUNT: usize = 144;
/// Header: start of the module table.
pub const HDR_MODULES: usize = 192;

/// Capacity of the module table.
pub const MAX_MODULES: usize = 5;

/// Size of one module descriptor (image base, size).
pub const MODULE_DESC_SIZE: usize = 16;

/// Start of the format image.
pub const IMAGE_OFFSET: usize = HDR_MODULES + MAX_MODULES * MODULE_DESC_SIZE;

/// Leading image bytes kept zero so that format offset zero never resolves.
pub const IMAGE_RESERVED: usize = 8;

/// Alignment of the data area and of every allocation in it.
pub const DATA_ALIGN: usize = 64;

/// Thread log: next log in the global list.
pub const LOG_NEXT: usize = 0;
/// Thread log: owning thread id.
pub const LOG_THREAD_ID: usize = 8;
/// Thread log: dead flag (low half) and write-wrap flag (high half).
pub const LOG_FLAGS: usize = 16;
/// Thread log: newest chunk.
pub const LOG_HEAD: usize = 24;
/// Thread log: oldest chunk.
pub const LOG_TAIL: usize = 32;
/// Thread log: chunk being written.
pub const LOG_CUR_WRITE_CHUNK: usize = 40;
/// Thread log: start of the most recently written record.
pub const LOG_CUR_PTR: usize = 48;
/// Thread log: number of chunks in the ring.
pub const LOG_CHUNK_COUNT: usize = 56;
/// Size of a thread log header.
pub const LOG_HEADER_SIZE: usize = 64;

/// Chunk: previous chunk in ring order.
pub const CHUNK_PREV: usize = 0;
/// Chunk: next chunk in ring order.
pub const CHUNK_NEXT: usize = 8;
/// Chunk: start of the record buffer.
pub const CHUNK_DATA: usize = 16;
/// Bytes a chunk occupies beyond its data buffer.
pub const CHUNK_OVERHEAD: usize = 24;

/// Guard word written twice after every chunk's data.
pub const CHUNK_SIGNATURE: u32 = 0xCFCF_CFCF;

/// Both guard words as one little-endian 64-bit word.
pub const CHUNK_SIGNATURE_WORD: u64 = ((CHUNK_SIGNATURE as u64) << 32) | CHUNK_SIGNATURE as u64;

/// Round `value` up to a multiple of `align` (a power of two).
#[inline]
pub const fn align_up(value: usize, align: usize) -> usize {
    (value + align - 1) & !(align - 1)
}

/// Offset of the data area for a given image capacity.
pub const fn data_offset(image_capacity: usize) -> usize {
    align_up(IMAGE_OFFSET + image_capacity, DATA_ALIGN)
}

/// Bytes one chunk occupies in the data area, alignment included.
pub const fn chunk_alloc_size(chunk_size: usize) -> usize {
    align_up(chunk_size + CHUNK_OVERHEAD, DATA_ALIGN)
}

/// One entry of the module table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModuleDesc {
    /// Offset of the module's strings within the format image.
    pub base: u64,
    /// Size of the module's strings in bytes.
    pub size: u64,
}

impl ModuleDesc {
    /// Whether a format offset falls inside this module.
    pub fn contains(&self, offset: u64) -> bool {
        offset >= self.base && offset < self.base + self.size
    }
}

/// Decoded store header.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoreHeader {
    /// Total header size, module table and image included.
    pub header_size: u64,
    /// Magic number.
    pub magic: u32,
    /// Format version.
    pub version: u32,
    /// Mapping base address in the writing process (diagnostic only).
    pub memory_base: u64,
    /// High-water offset of the data area.
    pub memory_cur: u64,
    /// End offset of the data area.
    pub memory_limit: u64,
    /// Offset of the newest thread log.
    pub first_log: u64,
    /// Ticks per second.
    pub tick_frequency: u64,
    /// Tick count at initialization.
    pub start_timestamp: u64,
    /// Threads that failed to obtain a log.
    pub threads_with_no_log: u64,
    /// Chunk data size.
    pub chunk_size: u64,
    /// Wall-clock start in milliseconds since the Unix epoch.
    pub start_time_ms: u64,
    /// Facility mask in effect.
    pub facilities: u32,
    /// Level in effect.
    pub level: u32,
    /// Per-thread byte ceiling.
    pub max_bytes_per_thread: u64,
    /// Global byte ceiling.
    pub max_bytes_total: u64,
    /// Chunks held across all logs.
    pub total_chunks: u64,
    /// Dead logs not yet recycled.
    pub dead_count: u64,
    /// Format image capacity.
    pub image_capacity: u64,
    /// Format image bytes in use.
    pub image_used: u64,
    /// Registered modules.
    pub modules: Vec<ModuleDesc>,
}

impl StoreHeader {
    /// Read a header from the start of a store image.
    ///
    /// Checks magic and version before anything else so that a foreign
    /// file fails with the most specific error.
    pub fn read(bytes: &[u8]) -> Result<Self> {
        if bytes.len() < IMAGE_OFFSET {
            return Err(StressLogError::Truncated {
                needed: IMAGE_OFFSET as u64,
                actual: bytes.len() as u64,
            });
        }

        let mut cursor = Cursor::new(bytes);
        let header_size = cursor.read_u64::<LittleEndian>()?;
        let magic = cursor.read_u32::<LittleEndian>()?;
        let version = cursor.read_u32::<LittleEndian>()?;
        if magic != STORE_MAGIC {
            return Err(StressLogError::BadMagic { found: magic });
        }
        if version >> 16 != STORE_VERSION >> 16 {
            return Err(StressLogError::UnsupportedVersion { found: version });
        }

        let memory_base = cursor.read_u64::<LittleEndian>()?;
        let memory_cur = cursor.read_u64::<LittleEndian>()?;
        let memory_limit = cursor.read_u64::<LittleEndian>()?;
        let first_log = cursor.read_u64::<LittleEndian>()?;
        let tick_frequency = cursor.read_u64::<LittleEndian>()?;
        let start_timestamp = cursor.read_u64::<LittleEndian>()?;
        let threads_with_no_log = cursor.read_u64::<LittleEndian>()?;
        let chunk_size = cursor.read_u64::<LittleEndian>()?;
        let start_time_ms = cursor.read_u64::<LittleEndian>()?;
        let facilities = cursor.read_u32::<LittleEndian>()?;
        let level = cursor.read_u32::<LittleEndian>()?;
        let max_bytes_per_thread = cursor.read_u64::<LittleEndian>()?;
        let max_bytes_total = cursor.read_u64::<LittleEndian>()?;
        let total_chunks = cursor.read_u64::<LittleEndian>()?;
        let dead_count = cursor.read_u64::<LittleEndian>()?;
        let image_capacity = cursor.read_u64::<LittleEndian>()?;
        let image_used = cursor.read_u64::<LittleEndian>()?;
        let module_count = cursor.read_u64::<LittleEndian>()?;

        if module_count > MAX_MODULES as u64 {
            return Err(StressLogError::corrupt(format!(
                "module count {module_count} exceeds table capacity {MAX_MODULES}"
            )));
        }

        cursor.set_position(HDR_MODULES as u64);
        let mut modules = Vec::with_capacity(module_count as usize);
        for _ in 0..module_count {
            let base = cursor.read_u64::<LittleEndian>()?;
            let size = cursor.read_u64::<LittleEndian>()?;
            modules.push(ModuleDesc { base, size });
        }

        let header = Self {
            header_size,
            magic,
            version,
            memory_base,
            memory_cur,
            memory_limit,
            first_log,
            tick_frequency,
            start_timestamp,
            threads_with_no_log,
            chunk_size,
            start_time_ms,
            facilities,
            level,
            max_bytes_per_thread,
            max_bytes_total,
            total_chunks,
            dead_count,
            image_capacity,
            image_used,
            modules,
        };
        header.validate(bytes.len() as u64)?;
        Ok(header)
    }

    /// Check internal consistency against the available image length.
    pub fn validate(&self, available: u64) -> Result<()> {
        if self.header_size != data_offset(self.image_capacity as usize) as u64 {
            return Err(StressLogError::corrupt(format!(
                "header size {} does not match image capacity {}",
                self.header_size, self.image_capacity
            )));
        }
        if self.image_used > self.image_capacity {
            return Err(StressLogError::corrupt("image used exceeds image capacity"));
        }
        if self.memory_cur < self.header_size || self.memory_cur > self.memory_limit {
            return Err(StressLogError::corrupt(format!(
                "high-water offset {} outside data area [{}, {}]",
                self.memory_cur, self.header_size, self.memory_limit
            )));
        }
        if self.chunk_size == 0 || !self.chunk_size.is_power_of_two() || self.chunk_size % 8 != 0 {
            return Err(StressLogError::corrupt(format!(
                "invalid chunk size {}",
                self.chunk_size
            )));
        }
        if self.tick_frequency == 0 {
            return Err(StressLogError::corrupt("tick frequency is zero"));
        }
        for module in &self.modules {
            if module.base + module.size > self.image_used {
                return Err(StressLogError::corrupt(format!(
                    "module [{:#x}, +{:#x}) outside image",
                    module.base, module.size
                )));
            }
        }
        if available < self.memory_cur {
            return Err(StressLogError::Truncated {
                needed: self.memory_cur,
                actual: available,
            });
        }
        Ok(())
    }

    /// The format image slice of a store image this header was read from.
    pub fn image<'a>(&self, bytes: &'a [u8]) -> &'a [u8] {
        let end = IMAGE_OFFSET + self.image_used as usize;
        &bytes[IMAGE_OFFSET..end.min(bytes.len())]
    }

    /// Bytes per chunk including links and guard words.
    pub fn chunk_alloc_size(&self) -> u64 {
        chunk_alloc_size(self.chunk_size as usize) as u64
    }
}
