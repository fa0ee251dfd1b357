//! Chunks: fixed-size record buffers linked into a per-thread ring.

use crate::layout::{CHUNK_DATA, CHUNK_NEXT, CHUNK_PREV, CHUNK_SIGNATURE_WORD};
use crate::region::Region;

/// A chunk inside a live region.
#[derive(Clone, Copy)]
pub(crate) struct ChunkRef<'r> {
    region: &'r Region,
    offset: usize,
    size: usize,
}

impl<'r> ChunkRef<'r> {
    pub(crate) fn new(region: &'r Region, offset: usize, size: usize) -> Self {
        Self {
            region,
            offset,
            size,
        }
    }

    /// Initialize freshly allocated memory as a single-chunk ring.
    pub(crate) fn init_single(&self) {
        self.set_prev(self.offset);
        self.set_next(self.offset);
        self.region.store(self.guard_offset(), CHUNK_SIGNATURE_WORD);
    }

    /// Initialize freshly allocated memory with the given links.
    pub(crate) fn init_linked(&self, prev: usize, next: usize) {
        self.set_prev(prev);
        self.set_next(next);
        self.region.store(self.guard_offset(), CHUNK_SIGNATURE_WORD);
    }

    pub(crate) fn offset(&self) -> usize {
        self.offset
    }

    pub(crate) fn prev(&self) -> usize {
        self.region.load(self.offset + CHUNK_PREV) as usize
    }

    pub(crate) fn next(&self) -> usize {
        self.region.load(self.offset + CHUNK_NEXT) as usize
    }

    pub(crate) fn set_prev(&self, prev: usize) {
        self.region.store(self.offset + CHUNK_PREV, prev as u64);
    }

    pub(crate) fn set_next(&self, next: usize) {
        self.region.store(self.offset + CHUNK_NEXT, next as u64);
    }

    /// First byte of the record buffer.
    pub(crate) fn start(&self) -> usize {
        self.offset + CHUNK_DATA
    }

    /// One past the last byte of the record buffer.
    pub(crate) fn end(&self) -> usize {
        self.start() + self.size
    }

    fn guard_offset(&self) -> usize {
        self.end()
    }

    /// Both guard words intact and the chunk inside the mapping.
    pub(crate) fn is_valid(&self) -> bool {
        self.offset != 0
            && self.guard_offset() + 8 <= self.region.len()
            && self.region.load(self.guard_offset()) == CHUNK_SIGNATURE_WORD
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::layout::CHUNK_SIGNATURE;

    #[test]
    fn single_chunk_ring_links_to_itself() {
        let region = Region::anonymous(16384).unwrap();
        let chunk = ChunkRef::new(&region, 4096, 4096);
        assert!(!chunk.is_valid());
        chunk.init_single();
        assert!(chunk.is_valid());
        assert_eq!(chunk.prev(), 4096);
        assert_eq!(chunk.next(), 4096);
        assert_eq!(chunk.end() - chunk.start(), 4096);
    }

    #[test]
    fn guard_words_are_two_signatures() {
        let region = Region::anonymous(16384).unwrap();
        let chunk = ChunkRef::new(&region, 4096, 4096);
        chunk.init_single();
        let bytes = region.copy_prefix(chunk.end() + 8);
        let guard = &bytes[chunk.end()..chunk.end() + 8];
        assert_eq!(guard[..4], CHUNK_SIGNATURE.to_le_bytes());
        assert_eq!(guard[4..], CHUNK_SIGNATURE.to_le_bytes());
    }

    #[test]
    fn overwritten_guard_is_invalid() {
        let region = Region::anonymous(16384).unwrap();
        let chunk = ChunkRef::new(&region, 4096, 4096);
        chunk.init_single();
        region.store(chunk.end(), 0);
        assert!(!chunk.is_valid());
    }
}
