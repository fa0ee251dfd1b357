//! Per-thread logs: the write side of the chunk ring.
//!
//! Records are written right to left inside a chunk. When the next record
//! would underrun the chunk start the writer moves to the previous chunk in
//! ring order, growing the ring first if it is at the newest chunk and the
//! budget allows. Reaching the oldest chunk sets the write-wrap flag: from
//! then on the oldest data is overwritten.

use crate::chunk::ChunkRef;
use crate::layout::{
    LOG_CHUNK_COUNT, LOG_CUR_PTR, LOG_CUR_WRITE_CHUNK, LOG_FLAGS, LOG_HEAD, LOG_HEADER_SIZE,
    LOG_NEXT, LOG_TAIL, LOG_THREAD_ID, chunk_alloc_size,
};
use crate::record::{self, ARG_SIZE, RECORD_HEADER_SIZE};
use crate::region::Region;

/// Supplies chunks when a log wants to grow.
pub(crate) trait ChunkSource {
    /// A freshly allocated chunk for a log already holding `held` chunks,
    /// or `None` if growth is refused.
    fn new_chunk(&self, held: u32) -> Option<usize>;
}

/// A thread log inside a live region.
#[derive(Clone, Copy)]
pub(crate) struct ThreadLogRef<'r> {
    region: &'r Region,
    offset: usize,
    chunk_size: usize,
}

impl<'r> ThreadLogRef<'r> {
    pub(crate) fn new(region: &'r Region, offset: usize, chunk_size: usize) -> Self {
        Self {
            region,
            offset,
            chunk_size,
        }
    }

    /// Bytes needed for a log header plus its first chunk.
    pub(crate) fn alloc_size(chunk_size: usize) -> usize {
        LOG_HEADER_SIZE + chunk_alloc_size(chunk_size)
    }

    /// Allocate a log with a single-chunk ring. Returns `None` if the region
    /// is exhausted; the caller accounts for the chunk.
    pub(crate) fn allocate(region: &'r Region, chunk_size: usize) -> Option<Self> {
        let offset = region.allocate(Self::alloc_size(chunk_size))?;
        let log = Self::new(region, offset, chunk_size);
        let chunk = log.chunk(offset + LOG_HEADER_SIZE);
        chunk.init_single();
        region.store(offset + LOG_HEAD, chunk.offset() as u64);
        region.store(offset + LOG_TAIL, chunk.offset() as u64);
        region.store(offset + LOG_CUR_WRITE_CHUNK, chunk.offset() as u64);
        region.store(offset + LOG_CUR_PTR, chunk.end() as u64);
        region.store(offset + LOG_CHUNK_COUNT, 1);
        Some(log)
    }

    pub(crate) fn offset(&self) -> usize {
        self.offset
    }

    fn chunk(&self, offset: usize) -> ChunkRef<'r> {
        ChunkRef::new(self.region, offset, self.chunk_size)
    }

    fn field(&self, field: usize) -> usize {
        self.region.load(self.offset + field) as usize
    }

    fn set_field(&self, field: usize, value: usize) {
        self.region.store(self.offset + field, value as u64);
    }

    pub(crate) fn next_log(&self) -> usize {
        self.field(LOG_NEXT)
    }

    pub(crate) fn set_next_log(&self, next: usize) {
        self.set_field(LOG_NEXT, next);
    }

    pub(crate) fn thread_id(&self) -> u64 {
        self.region.load(self.offset + LOG_THREAD_ID)
    }

    pub(crate) fn head(&self) -> usize {
        self.field(LOG_HEAD)
    }

    pub(crate) fn tail(&self) -> usize {
        self.field(LOG_TAIL)
    }

    pub(crate) fn cur_write_chunk(&self) -> usize {
        self.field(LOG_CUR_WRITE_CHUNK)
    }

    pub(crate) fn cur_ptr(&self) -> usize {
        self.field(LOG_CUR_PTR)
    }

    pub(crate) fn chunk_count(&self) -> u32 {
        self.region.load(self.offset + LOG_CHUNK_COUNT) as u32
    }

    pub(crate) fn is_dead(&self) -> bool {
        self.region.load_lo(self.offset + LOG_FLAGS) != 0
    }

    pub(crate) fn write_has_wrapped(&self) -> bool {
        self.region.load_hi(self.offset + LOG_FLAGS) != 0
    }

    fn set_flags(&self, dead: bool, wrapped: bool) {
        self.region
            .store_pair(self.offset + LOG_FLAGS, dead as u32, wrapped as u32);
    }

    /// Hand the log to `thread_id` and restart writing at the end of the
    /// oldest chunk.
    pub(crate) fn activate(&self, thread_id: u64) {
        let tail = self.chunk(self.tail());
        self.region.store(self.offset + LOG_THREAD_ID, thread_id);
        self.set_field(LOG_CUR_WRITE_CHUNK, tail.offset());
        self.set_field(LOG_CUR_PTR, tail.end());
        self.set_flags(false, false);
    }

    pub(crate) fn mark_dead(&self) {
        self.set_flags(true, self.write_has_wrapped());
    }

    /// The log has chunks and both its head and write chunks are intact.
    pub(crate) fn is_valid(&self) -> bool {
        self.head() != 0
            && self.chunk(self.head()).is_valid()
            && self.chunk(self.cur_write_chunk()).is_valid()
    }

    /// Timestamp of the newest record, or zero if nothing was written since
    /// activation.
    pub(crate) fn latest_timestamp(&self) -> u64 {
        let cur = self.cur_ptr();
        if cur >= self.chunk(self.cur_write_chunk()).end() {
            return 0;
        }
        self.region.load(cur + 8)
    }

    /// Write one record. Never fails: at worst it overwrites the oldest data.
    pub(crate) fn write_msg(
        &self,
        source: &dyn ChunkSource,
        facility: u32,
        format_offset: u32,
        timestamp: u64,
        args: &[u64],
    ) {
        let size = record::record_size(args.len());
        let msg = self.advance_write(size, source);

        let header = record::header_word(args.len(), format_offset, facility);
        self.region.store_relaxed(msg, header);
        self.region.store_relaxed(msg + 8, timestamp);
        for (i, arg) in args.iter().enumerate() {
            self.region
                .store_relaxed(msg + RECORD_HEADER_SIZE + i * ARG_SIZE, *arg);
        }
        self.set_field(LOG_CUR_PTR, msg);
    }

    /// Where a record of `size` bytes goes.
    #[inline]
    fn advance_write(&self, size: usize, source: &dyn ChunkSource) -> usize {
        let cur = self.cur_ptr();
        let start = self.chunk(self.cur_write_chunk()).start();
        if cur >= start + size {
            cur - size
        } else {
            self.write_past_boundary(size, source)
        }
    }

    #[cold]
    fn write_past_boundary(&self, size: usize, source: &dyn ChunkSource) -> usize {
        let current = self.chunk(self.cur_write_chunk());
        // Readers find the first record by skipping zero words.
        self.region.zero(current.start(), self.cur_ptr());

        if current.offset() == self.head() {
            self.grow_chunk_list(source);
        }

        let prev = self.chunk(current.prev());
        self.set_field(LOG_CUR_WRITE_CHUNK, prev.offset());
        if prev.offset() == self.tail() {
            self.set_flags(self.is_dead(), true);
        }
        prev.end() - size
    }

    /// Insert a new chunk between tail and head and make it the head.
    fn grow_chunk_list(&self, source: &dyn ChunkSource) -> bool {
        let held = self.chunk_count();
        let Some(offset) = source.new_chunk(held) else {
            return false;
        };
        let head = self.chunk(self.head());
        let tail = self.chunk(self.tail());
        let new = self.chunk(offset);
        new.init_linked(tail.offset(), head.offset());
        tail.set_next(offset);
        head.set_prev(offset);
        self.set_field(LOG_HEAD, offset);
        self.region
            .store(self.offset + LOG_CHUNK_COUNT, u64::from(held) + 1);
        true
    }

    /// Chunk offsets reached by following `next` (or `prev`) links from the
    /// head, stopping after `limit` steps.
    #[cfg(test)]
    pub(crate) fn walk_ring(&self, forward: bool, limit: usize) -> Vec<usize> {
        let mut seen = Vec::new();
        let mut cur = self.head();
        for _ in 0..limit {
            seen.push(cur);
            let chunk = self.chunk(cur);
            cur = if forward { chunk.next() } else { chunk.prev() };
        }
        seen.push(cur);
        seen
    }
}
