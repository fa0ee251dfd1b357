//! Message record wire format.
//!
//! Records are packed back to back inside a chunk with no terminator:
//!
//! ```text
//! ┌──────────────────────────────┬──────────────┬──────────────┬────────────────────┐
//! │ packed u32                   │ facility u32 │ timestamp u64│ args: u64 × count  │
//! │ [2:0] count low              │              │              │                    │
//! │ [28:3] format offset (26 bit)│              │              │                    │
//! │ [31:29] count high           │              │              │                    │
//! └──────────────────────────────┴──────────────┴──────────────┴────────────────────┘
//! ```
//!
//! The first eight bytes of a record are never all zero (format offset zero
//! is reserved), which lets a reader skip the zero padding left at the start
//! of a chunk.

use byteorder::{ByteOrder, LittleEndian};

/// Size of the fixed record header in bytes.
pub const RECORD_HEADER_SIZE: usize = 16;

/// Size of one argument slot.
pub const ARG_SIZE: usize = 8;

/// Maximum number of arguments a record can carry.
pub const MAX_ARGS: usize = 63;

/// Largest record size in bytes.
pub const MAX_RECORD_SIZE: usize = RECORD_HEADER_SIZE + MAX_ARGS * ARG_SIZE;

/// Number of bits available for the format offset.
pub const FORMAT_OFFSET_BITS: u32 = 26;

/// Largest encodable format offset.
pub const MAX_FORMAT_OFFSET: u32 = (1 << FORMAT_OFFSET_BITS) - 1;

const COUNT_LOW_MASK: u32 = 0b111;
const OFFSET_SHIFT: u32 = 3;
const COUNT_HIGH_SHIFT: u32 = 29;

/// Size in bytes of a record carrying `arg_count` arguments.
#[inline]
pub const fn record_size(arg_count: usize) -> usize {
    RECORD_HEADER_SIZE + arg_count * ARG_SIZE
}

/// Pack an argument count and format offset into the leading header word.
///
/// Counts above [`MAX_ARGS`] and offsets above [`MAX_FORMAT_OFFSET`] are
/// truncated to their field widths.
#[inline]
pub const fn pack_header(arg_count: usize, format_offset: u32) -> u32 {
    let count = (arg_count as u32) & 0b11_1111;
    (count & COUNT_LOW_MASK)
        | ((format_offset & MAX_FORMAT_OFFSET) << OFFSET_SHIFT)
        | ((count >> 3) << COUNT_HIGH_SHIFT)
}

/// Unpack the leading header word into `(arg_count, format_offset)`.
#[inline]
pub const fn unpack_header(word: u32) -> (usize, u32) {
    let count = (word & COUNT_LOW_MASK) | ((word >> COUNT_HIGH_SHIFT) << 3);
    let offset = (word >> OFFSET_SHIFT) & MAX_FORMAT_OFFSET;
    (count as usize, offset)
}

/// The first 64-bit word of a record: packed header in the low half,
/// facility in the high half.
#[inline]
pub const fn header_word(arg_count: usize, format_offset: u32, facility: u32) -> u64 {
    ((facility as u64) << 32) | pack_header(arg_count, format_offset) as u64
}

/// Serialize a record into `buf`, which must be exactly
/// `record_size(args.len())` bytes long.
pub fn encode_into(buf: &mut [u8], facility: u32, format_offset: u32, timestamp: u64, args: &[u64]) {
    debug_assert_eq!(buf.len(), record_size(args.len()));
    LittleEndian::write_u64(
        &mut buf[0..8],
        header_word(args.len(), format_offset, facility),
    );
    LittleEndian::write_u64(&mut buf[8..16], timestamp);
    for (slot, arg) in buf[RECORD_HEADER_SIZE..].chunks_exact_mut(ARG_SIZE).zip(args) {
        LittleEndian::write_u64(slot, *arg);
    }
}

/// A record borrowed from a store image.
#[derive(Debug, Clone, Copy)]
pub struct RecordView<'a> {
    bytes: &'a [u8],
}

impl<'a> RecordView<'a> {
    /// Parse the record starting at `bytes[0]`.
    ///
    /// Returns `None` if `bytes` is too short for the header or for the
    /// argument count the header declares.
    pub fn parse(bytes: &'a [u8]) -> Option<Self> {
        if bytes.len() < RECORD_HEADER_SIZE {
            return None;
        }
        let (count, _) = unpack_header(LittleEndian::read_u32(&bytes[0..4]));
        let size = record_size(count);
        if bytes.len() < size {
            return None;
        }
        Some(Self {
            bytes: &bytes[..size],
        })
    }

    /// Number of arguments.
    pub fn arg_count(&self) -> usize {
        unpack_header(LittleEndian::read_u32(&self.bytes[0..4])).0
    }

    /// Offset of the format string in the module image.
    pub fn format_offset(&self) -> u32 {
        unpack_header(LittleEndian::read_u32(&self.bytes[0..4])).1
    }

    /// Raw facility word.
    pub fn facility(&self) -> u32 {
        LittleEndian::read_u32(&self.bytes[4..8])
    }

    /// Raw tick count at the time of the write.
    pub fn timestamp(&self) -> u64 {
        LittleEndian::read_u64(&self.bytes[8..16])
    }

    /// Argument `index`, if present.
    pub fn arg(&self, index: usize) -> Option<u64> {
        if index >= self.arg_count() {
            return None;
        }
        let start = RECORD_HEADER_SIZE + index * ARG_SIZE;
        Some(LittleEndian::read_u64(&self.bytes[start..start + ARG_SIZE]))
    }

    /// All arguments in order.
    pub fn args(&self) -> impl Iterator<Item = u64> + 'a {
        self.bytes[RECORD_HEADER_SIZE..]
            .chunks_exact(ARG_SIZE)
            .map(LittleEndian::read_u64)
    }

    /// Total encoded size in bytes.
    pub fn size(&self) -> usize {
        self.bytes.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pack_uses_both_count_fields() {
        for count in [0, 1, 7, 8, 9, 42, MAX_ARGS] {
            let (c, o) = unpack_header(pack_header(count, 0x2AB_CDEF));
            assert_eq!(c, count);
            assert_eq!(o, 0x2AB_CDEF);
        }
    }

    #[test]
    fn pack_bit_layout() {
        // 9 args = 0b001_001: low bits 0b001, high bits 0b001.
        let word = pack_header(9, 1);
        assert_eq!(word & 0b111, 0b001);
        assert_eq!((word >> 3) & MAX_FORMAT_OFFSET, 1);
        assert_eq!(word >> 29, 0b001);
    }

    #[test]
    fn offset_is_truncated_to_field() {
        let (_, offset) = unpack_header(pack_header(0, MAX_FORMAT_OFFSET + 5));
        assert_eq!(offset, 4);
    }

    #[test]
    fn max_record_size() {
        assert_eq!(MAX_RECORD_SIZE, 520);
        assert_eq!(record_size(0), 16);
    }

    #[test]
    fn encode_and_view() {
        let args = [1u64, u64::MAX, 0xABCD];
        let mut buf = vec![0u8; record_size(args.len())];
        encode_into(&mut buf, 0x81, 64, 12345, &args);

        let view = RecordView::parse(&buf).unwrap();
        assert_eq!(view.arg_count(), 3);
        assert_eq!(view.format_offset(), 64);
        assert_eq!(view.facility(), 0x81);
        assert_eq!(view.timestamp(), 12345);
        assert_eq!(view.args().collect::<Vec<_>>(), args);
        assert_eq!(view.arg(2), Some(0xABCD));
        assert_eq!(view.arg(3), None);
        assert_eq!(view.size(), 40);
    }

    #[test]
    fn parse_rejects_short_buffers() {
        let mut buf = vec![0u8; record_size(4)];
        encode_into(&mut buf, 1, 8, 1, &[1, 2, 3, 4]);
        assert!(RecordView::parse(&buf[..20]).is_none());
        assert!(RecordView::parse(&buf[..8]).is_none());
    }
}
