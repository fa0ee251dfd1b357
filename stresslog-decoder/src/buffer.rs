//! Lock-free append buffer.
//!
//! Workers append accepted records concurrently. A slot is reserved with a
//! single atomic increment of the insertion index; storage grows in
//! segments of doubling size so earlier slots never move.

use std::sync::OnceLock;
use std::sync::atomic::{AtomicUsize, Ordering};

const FIRST_SEGMENT: usize = 1024;
const SEGMENTS: usize = 40;

type Segment<T> = Box<[OnceLock<T>]>;

/// Segment and offset of slot `index`.
///
/// Segment `k` holds `FIRST_SEGMENT << k` slots starting at
/// `FIRST_SEGMENT * (2^k - 1)`.
fn locate(index: usize) -> (usize, usize) {
    let n = index / FIRST_SEGMENT + 1;
    let segment = (usize::BITS - 1 - n.leading_zeros()) as usize;
    let first = FIRST_SEGMENT * ((1 << segment) - 1);
    (segment, index - first)
}

/// A growable buffer supporting concurrent `push`.
pub struct AppendBuffer<T> {
    next: AtomicUsize,
    segments: [OnceLock<Segment<T>>; SEGMENTS],
}

impl<T> AppendBuffer<T> {
    /// An empty buffer.
    pub fn new() -> Self {
        Self {
            next: AtomicUsize::new(0),
            segments: std::array::from_fn(|_| OnceLock::new()),
        }
    }

    /// Append a value, returning its insertion index.
    pub fn push(&self, value: T) -> usize {
        let index = self.next.fetch_add(1, Ordering::Relaxed);
        let (segment, offset) = locate(index);
        let slots = self.segments[segment].get_or_init(|| {
            (0..FIRST_SEGMENT << segment)
                .map(|_| OnceLock::new())
                .collect()
        });
        // Each index is handed out once, so the slot is empty.
        let _ = slots[offset].set(value);
        index
    }

    /// Number of values pushed.
    pub fn len(&self) -> usize {
        self.next.load(Ordering::Acquire)
    }

    /// Whether nothing was pushed.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// All values in insertion order.
    pub fn into_vec(self) -> Vec<T> {
        let len = self.len();
        let mut out = Vec::with_capacity(len);
        for segment in self.segments.into_iter().map_while(OnceLock::into_inner) {
            out.extend(
                segment
                    .into_vec()
                    .into_iter()
                    .map_while(OnceLock::into_inner),
            );
        }
        out.truncate(len);
        out
    }
}

impl<T> Default for AppendBuffer<T> {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn locate_segments() {
        assert_eq!(locate(0), (0, 0));
        assert_eq!(locate(FIRST_SEGMENT - 1), (0, FIRST_SEGMENT - 1));
        assert_eq!(locate(FIRST_SEGMENT), (1, 0));
        assert_eq!(locate(3 * FIRST_SEGMENT - 1), (1, 2 * FIRST_SEGMENT - 1));
        assert_eq!(locate(3 * FIRST_SEGMENT), (2, 0));
    }

    #[test]
    fn keeps_insertion_order() {
        let buffer = AppendBuffer::new();
        for i in 0..5000 {
            assert_eq!(buffer.push(i), i);
        }
        assert_eq!(buffer.into_vec(), (0..5000).collect::<Vec<_>>());
    }

    #[test]
    fn concurrent_pushes_are_all_kept() {
        let buffer = AppendBuffer::new();
        std::thread::scope(|scope| {
            for t in 0..4u64 {
                let buffer = &buffer;
                scope.spawn(move || {
                    for i in 0..2000u64 {
                        buffer.push(t * 10_000 + i);
                    }
                });
            }
        });
        assert_eq!(buffer.len(), 8000);
        let mut values = buffer.into_vec();
        values.sort_unstable();
        let mut expected: Vec<u64> = (0..4u64)
            .flat_map(|t| (0..2000).map(move |i| t * 10_000 + i))
            .collect();
        expected.sort_unstable();
        assert_eq!(values, expected);
    }
}
