//! Read side of a store image.
//!
//! [`StoreImage`] wraps a byte image (a snapshot, or a mapped store file)
//! and trusts nothing in it beyond the header check: every link is bounds
//! checked, every chunk's guard words are verified before its records are
//! read, and chunk walks are bounded so a damaged ring cannot loop forever.
//!
//! [`ReadCursor`] walks one thread log newest record first. It keeps its own
//! read chunk, read pointer and read-wrap flag and never touches the image.

use crate::error::Result;
use crate::layout::{
    CHUNK_DATA, CHUNK_NEXT, CHUNK_PREV, CHUNK_SIGNATURE_WORD, IMAGE_OFFSET, LOG_CHUNK_COUNT,
    LOG_CUR_PTR, LOG_CUR_WRITE_CHUNK, LOG_FLAGS, LOG_HEAD, LOG_HEADER_SIZE, LOG_NEXT, LOG_TAIL,
    LOG_THREAD_ID, StoreHeader,
};
use crate::record::{MAX_RECORD_SIZE, RECORD_HEADER_SIZE, RecordView};
use byteorder::{ByteOrder, LittleEndian};
use thiserror::Error;

/// Damage found while walking a store image.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum Corruption {
    /// A log link points outside the data area.
    #[error("log link {offset:#x} points outside the data area")]
    LogOutOfBounds {
        /// The bad link.
        offset: u64,
    },

    /// The log list is longer than the data area could hold.
    #[error("log list longer than {limit} entries, assuming a cycle")]
    LogCycle {
        /// Entries visited.
        limit: usize,
    },

    /// A chunk link points outside the data area.
    #[error("chunk link {offset:#x} points outside the data area")]
    ChunkOutOfBounds {
        /// The bad link.
        offset: u64,
    },

    /// A chunk's guard words are not the expected signature.
    #[error("chunk {offset:#x} has corrupt guard words")]
    BadGuard {
        /// The damaged chunk.
        offset: u64,
    },

    /// `next.prev` does not lead back to the chunk we came from.
    #[error("chunk {offset:#x}: next.prev is {found:#x}, expected {expected:#x}")]
    BrokenLink {
        /// The chunk whose back link is wrong.
        offset: u64,
        /// The back link found.
        found: u64,
        /// The chunk we came from.
        expected: u64,
    },

    /// The walk crossed more chunk boundaries than the ring can have.
    #[error("chunk walk exceeded {limit} boundaries, assuming a cycle")]
    ChunkCycle {
        /// Boundaries crossed.
        limit: usize,
    },

    /// A record extends past the end of its chunk.
    #[error("record at {offset:#x} overruns its chunk")]
    RecordOverrun {
        /// Start of the record.
        offset: u64,
    },
}

#[inline]
fn word(bytes: &[u8], offset: usize) -> Option<u64> {
    bytes
        .get(offset..offset.checked_add(8)?)
        .map(LittleEndian::read_u64)
}

/// A parsed, read-only store image.
#[derive(Debug, Clone)]
pub struct StoreImage<'a> {
    bytes: &'a [u8],
    header: StoreHeader,
}

impl<'a> StoreImage<'a> {
    /// Parse and validate the header of a store image.
    ///
    /// Only structural problems fail here; damage inside the data area is
    /// reported later, per log and per chunk.
    pub fn parse(bytes: &'a [u8]) -> Result<Self> {
        let header = StoreHeader::read(bytes)?;
        Ok(Self { bytes, header })
    }

    /// The decoded header.
    pub fn header(&self) -> &StoreHeader {
        &self.header
    }

    /// The raw image.
    pub fn bytes(&self) -> &'a [u8] {
        self.bytes
    }

    /// Seconds between process start and `timestamp`.
    pub fn relative_seconds(&self, timestamp: u64) -> f64 {
        let ticks = timestamp as i128 - self.header.start_timestamp as i128;
        ticks as f64 / self.header.tick_frequency as f64
    }

    /// Ticks corresponding to `seconds` after process start.
    pub fn ticks_at(&self, seconds: f64) -> u64 {
        let ticks = self.header.start_timestamp as f64 + seconds * self.header.tick_frequency as f64;
        if ticks <= 0.0 { 0 } else { ticks as u64 }
    }

    /// Resolve a format offset to its NUL-terminated string.
    ///
    /// Returns `None` unless the offset lies inside a registered module.
    pub fn format_str(&self, offset: u32) -> Option<&'a str> {
        let offset = u64::from(offset);
        let module = self.header.modules.iter().find(|m| m.contains(offset))?;
        let start = IMAGE_OFFSET + offset as usize;
        let end = IMAGE_OFFSET + (module.base + module.size) as usize;
        let bytes = self.bytes.get(start..end)?;
        let len = bytes.iter().position(|b| *b == 0).unwrap_or(bytes.len());
        std::str::from_utf8(&bytes[..len]).ok()
    }

    fn data_start(&self) -> usize {
        self.header.header_size as usize
    }

    fn data_end(&self) -> usize {
        (self.header.memory_cur as usize).min(self.bytes.len())
    }

    fn chunk_size(&self) -> usize {
        self.header.chunk_size as usize
    }

    /// Whether a whole chunk starting at `offset` lies in the data area.
    fn chunk_in_bounds(&self, offset: usize) -> bool {
        offset % 8 == 0
            && offset >= self.data_start()
            && offset
                .checked_add(CHUNK_DATA + self.chunk_size() + 8)
                .is_some_and(|end| end <= self.data_end())
    }

    fn chunk_guard_ok(&self, offset: usize) -> bool {
        word(self.bytes, offset + CHUNK_DATA + self.chunk_size()) == Some(CHUNK_SIGNATURE_WORD)
    }

    /// Upper bound on how many chunks the data area can hold.
    fn max_chunks(&self) -> usize {
        let area = self.data_end().saturating_sub(self.data_start());
        area / self.header.chunk_alloc_size() as usize + 1
    }

    /// Every thread log, newest first.
    ///
    /// The iterator yields one error and stops if the list leaves the data
    /// area or is longer than the area could hold.
    pub fn logs(&self) -> LogIter<'_, 'a> {
        LogIter {
            image: self,
            next: self.header.first_log as usize,
            visited: 0,
            limit: self.max_chunks(),
            done: false,
        }
    }

    /// Newest timestamp in any log.
    pub fn latest_timestamp(&self) -> u64 {
        self.logs()
            .filter_map(|log| log.ok())
            .map(|log| log.latest_timestamp())
            .max()
            .unwrap_or(0)
    }
}

/// Iterator over the thread logs of an image.
pub struct LogIter<'i, 'a> {
    image: &'i StoreImage<'a>,
    next: usize,
    visited: usize,
    limit: usize,
    done: bool,
}

impl<'i, 'a> Iterator for LogIter<'i, 'a> {
    type Item = std::result::Result<LogView<'i, 'a>, Corruption>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done || self.next == 0 {
            return None;
        }
        self.visited += 1;
        if self.visited > self.limit {
            self.done = true;
            return Some(Err(Corruption::LogCycle { limit: self.limit }));
        }

        let offset = self.next;
        let in_bounds = offset % 8 == 0
            && offset >= self.image.data_start()
            && offset + LOG_HEADER_SIZE <= self.image.data_end();
        if !in_bounds {
            self.done = true;
            return Some(Err(Corruption::LogOutOfBounds {
                offset: offset as u64,
            }));
        }

        let log = LogView {
            image: self.image,
            offset,
        };
        self.next = log.field(LOG_NEXT) as usize;
        Some(Ok(log))
    }
}

/// One thread log inside an image.
#[derive(Clone, Copy)]
pub struct LogView<'i, 'a> {
    image: &'i StoreImage<'a>,
    offset: usize,
}

impl std::fmt::Debug for LogView<'_, '_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LogView")
            .field("offset", &self.offset)
            .field("thread_id", &self.thread_id())
            .field("chunks", &self.chunk_count())
            .finish()
    }
}

impl<'i, 'a> LogView<'i, 'a> {
    fn field(&self, field: usize) -> u64 {
        word(self.image.bytes, self.offset + field).unwrap_or(0)
    }

    /// Offset of the log header in the image.
    pub fn offset(&self) -> usize {
        self.offset
    }

    /// The owning thread.
    pub fn thread_id(&self) -> u64 {
        self.field(LOG_THREAD_ID)
    }

    /// Whether the owning thread has exited.
    pub fn is_dead(&self) -> bool {
        self.field(LOG_FLAGS) as u32 != 0
    }

    /// Whether the writer has started overwriting its oldest chunk.
    pub fn write_has_wrapped(&self) -> bool {
        (self.field(LOG_FLAGS) >> 32) as u32 != 0
    }

    /// Newest chunk.
    pub fn head(&self) -> usize {
        self.field(LOG_HEAD) as usize
    }

    /// Oldest chunk.
    pub fn tail(&self) -> usize {
        self.field(LOG_TAIL) as usize
    }

    /// Chunk being written.
    pub fn cur_write_chunk(&self) -> usize {
        self.field(LOG_CUR_WRITE_CHUNK) as usize
    }

    /// Start of the newest record.
    pub fn cur_ptr(&self) -> usize {
        self.field(LOG_CUR_PTR) as usize
    }

    /// Chunks in the ring, as recorded by the writer.
    pub fn chunk_count(&self) -> u32 {
        self.field(LOG_CHUNK_COUNT) as u32
    }

    /// Head and write chunks are in bounds with intact guard words.
    pub fn is_valid(&self) -> bool {
        let ok = |c: usize| self.image.chunk_in_bounds(c) && self.image.chunk_guard_ok(c);
        self.head() != 0 && ok(self.head()) && ok(self.cur_write_chunk())
    }

    /// Timestamp of the newest record, zero if none can be read.
    pub fn latest_timestamp(&self) -> u64 {
        let chunk = self.cur_write_chunk();
        if !self.image.chunk_in_bounds(chunk) {
            return 0;
        }
        let end = chunk + CHUNK_DATA + self.image.chunk_size();
        let cur = self.cur_ptr();
        if cur < chunk + CHUNK_DATA || cur + RECORD_HEADER_SIZE > end {
            return 0;
        }
        word(self.image.bytes, cur + 8).unwrap_or(0)
    }

    /// Start a read walk at the newest record.
    pub fn read(&self) -> ReadCursor<'i, 'a> {
        ReadCursor::new(*self)
    }
}

/// A record found by a [`ReadCursor`].
#[derive(Debug, Clone, Copy)]
pub struct RecordAt<'a> {
    /// Offset of the record in the image.
    pub offset: usize,
    /// The record itself.
    pub record: RecordView<'a>,
}

/// Newest-first walk over one log.
pub struct ReadCursor<'i, 'a> {
    log: LogView<'i, 'a>,
    read_chunk: usize,
    read_ptr: usize,
    read_has_wrapped: bool,
    write_chunk: usize,
    write_ptr: usize,
    write_has_wrapped: bool,
    tail: usize,
    boundaries: usize,
    limit: usize,
    skip_chunk: bool,
    done: bool,
}

impl<'i, 'a> ReadCursor<'i, 'a> {
    fn new(log: LogView<'i, 'a>) -> Self {
        let limit = (log.chunk_count() as usize).min(log.image.max_chunks()) + 1;
        Self {
            log,
            read_chunk: log.cur_write_chunk(),
            read_ptr: log.cur_ptr(),
            read_has_wrapped: false,
            write_chunk: log.cur_write_chunk(),
            write_ptr: log.cur_ptr(),
            write_has_wrapped: log.write_has_wrapped(),
            tail: log.tail(),
            boundaries: 0,
            limit,
            skip_chunk: false,
            done: false,
        }
    }

    /// Whether the read side has passed the oldest chunk.
    pub fn read_has_wrapped(&self) -> bool {
        self.read_has_wrapped
    }

    fn image(&self) -> &'i StoreImage<'a> {
        self.log.image
    }

    fn chunk_end(&self, chunk: usize) -> usize {
        chunk + CHUNK_DATA + self.image().chunk_size()
    }

    /// No more live records: an unwritten slot, or the read side has passed
    /// everything the writer still owns.
    fn completed_dump(&self) -> bool {
        let ts = word(self.image().bytes, self.read_ptr + 8).unwrap_or(0);
        ts == 0
            || (self.read_has_wrapped
                && (!self.write_has_wrapped
                    || (self.read_chunk == self.write_chunk && self.read_ptr >= self.write_ptr)))
    }

    /// Move to the next chunk in ring order and past its zero padding.
    fn read_past_boundary(&mut self) -> std::result::Result<(), Corruption> {
        self.boundaries += 1;
        if self.boundaries > self.limit {
            return Err(Corruption::ChunkCycle { limit: self.limit });
        }
        if self.read_chunk == self.tail {
            self.read_has_wrapped = true;
        }

        let image = self.image();
        let next = word(image.bytes, self.read_chunk + CHUNK_NEXT).unwrap_or(0) as usize;
        if !image.chunk_in_bounds(next) {
            return Err(Corruption::ChunkOutOfBounds {
                offset: next as u64,
            });
        }
        let back = word(image.bytes, next + CHUNK_PREV).unwrap_or(0) as usize;
        if back != self.read_chunk {
            return Err(Corruption::BrokenLink {
                offset: next as u64,
                found: back as u64,
                expected: self.read_chunk as u64,
            });
        }

        self.read_chunk = next;
        self.read_ptr = next + CHUNK_DATA;
        if !image.chunk_guard_ok(next) {
            self.skip_chunk = true;
            return Ok(());
        }

        let end = self.chunk_end(next);
        let mut skipped = 0;
        while self.read_ptr < end
            && skipped < MAX_RECORD_SIZE / 8
            && word(image.bytes, self.read_ptr) == Some(0)
        {
            self.read_ptr += 8;
            skipped += 1;
        }
        Ok(())
    }

    fn fail(&mut self, corruption: Corruption) -> Option<<Self as Iterator>::Item> {
        self.done = true;
        Some(Err(corruption))
    }
}

impl<'i, 'a> Iterator for ReadCursor<'i, 'a> {
    type Item = std::result::Result<RecordAt<'a>, Corruption>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done {
            return None;
        }
        if self.boundaries == 0 && self.read_chunk == self.write_chunk && !self.skip_chunk {
            let image = self.image();
            if !image.chunk_in_bounds(self.read_chunk) {
                return self.fail(Corruption::ChunkOutOfBounds {
                    offset: self.read_chunk as u64,
                });
            }
            if !image.chunk_guard_ok(self.read_chunk) && self.read_ptr < self.chunk_end(self.read_chunk) {
                // Records of the write chunk cannot be trusted; resume at
                // its end so the next call moves on.
                self.read_ptr = self.chunk_end(self.read_chunk);
                return Some(Err(Corruption::BadGuard {
                    offset: self.read_chunk as u64,
                }));
            }
        }

        loop {
            if self.skip_chunk {
                self.skip_chunk = false;
                let offset = self.read_chunk;
                self.read_ptr = self.chunk_end(offset);
                return Some(Err(Corruption::BadGuard {
                    offset: offset as u64,
                }));
            }

            let end = self.chunk_end(self.read_chunk);
            if self.read_ptr >= end {
                if let Err(corruption) = self.read_past_boundary() {
                    return self.fail(corruption);
                }
                continue;
            }

            if self.completed_dump() {
                self.done = true;
                return None;
            }

            let bytes = self.image().bytes;
            let Some(record) = bytes
                .get(self.read_ptr..end)
                .and_then(RecordView::parse)
            else {
                let offset = self.read_ptr;
                self.read_ptr = end;
                return Some(Err(Corruption::RecordOverrun {
                    offset: offset as u64,
                }));
            };

            let found = RecordAt {
                offset: self.read_ptr,
                record,
            };
            self.read_ptr += record.size();
            return Some(Ok(found));
        }
    }
}
