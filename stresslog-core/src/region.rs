//! Backing memory for a store.
//!
//! A region is either an anonymous mapping (in-process mode) or a
//! memory-mapped file (durable mode). Both share one layout, so a snapshot
//! of either decodes the same way. All shared state is accessed as aligned
//! little-endian 64-bit words through atomics, which lets writers, the
//! registry and `snapshot` touch the mapping concurrently without locks.

use crate::error::{Result, StressLogError};
use crate::layout::{DATA_ALIGN, HDR_MEMORY_CUR, HDR_MEMORY_LIMIT, align_up};
use fs2::FileExt;
use memmap2::{MmapMut, MmapOptions};
use std::fs::{File, OpenOptions};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};

struct BackingFile {
    file: File,
    path: PathBuf,
}

/// A mapped store region.
pub(crate) struct Region {
    map: MmapMut,
    base: *mut u8,
    len: usize,
    backing: Option<BackingFile>,
}

// SAFETY: the mapping is only ever accessed through aligned atomic words
// (`word`) or through `&self` methods of `MmapMut` that do not hand out
// references to the contents.
unsafe impl Send for Region {}
unsafe impl Sync for Region {}

impl Region {
    /// Map `len` bytes of zeroed anonymous memory.
    pub(crate) fn anonymous(len: usize) -> Result<Self> {
        let mut map = MmapOptions::new()
            .len(len)
            .map_anon()
            .map_err(|e| StressLogError::StoreMap {
                what: "anonymous".to_string(),
                cause: e.to_string(),
            })?;
        let base = map.as_mut_ptr();
        Ok(Self {
            map,
            base,
            len,
            backing: None,
        })
    }

    /// Create (truncating) a store file of `len` bytes and map it.
    ///
    /// The file stays exclusively locked for the life of the region.
    pub(crate) fn create_file(path: &Path, len: usize) -> Result<Self> {
        let path = path.to_path_buf();
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent).map_err(|e| StressLogError::StoreCreate {
                path: parent.to_path_buf(),
                cause: e.to_string(),
            })?;
        }

        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(&path)
            .map_err(|e| StressLogError::StoreCreate {
                path: path.clone(),
                cause: e.to_string(),
            })?;

        file.try_lock_exclusive()
            .map_err(|e| StressLogError::StoreCreate {
                path: path.clone(),
                cause: format!("Failed to lock file: {}", e),
            })?;

        // Truncate only once locked: another writer may have it mapped.
        file.set_len(0)
            .and_then(|()| file.set_len(len as u64))
            .map_err(|e| StressLogError::StoreCreate {
                path: path.clone(),
                cause: e.to_string(),
            })?;

        // SAFETY: the file is exclusively locked and was just truncated, so
        // no other process is expected to resize it under the mapping.
        let mut map = unsafe {
            MmapOptions::new()
                .len(len)
                .map_mut(&file)
                .map_err(|e| StressLogError::StoreMap {
                    what: path.display().to_string(),
                    cause: e.to_string(),
                })?
        };
        let base = map.as_mut_ptr();

        Ok(Self {
            map,
            base,
            len,
            backing: Some(BackingFile { file, path }),
        })
    }

    /// Total mapped length.
    pub(crate) fn len(&self) -> usize {
        self.len
    }

    /// Address of the mapping in this process.
    pub(crate) fn base_address(&self) -> u64 {
        self.base as u64
    }

    /// Path of the backing file, if any.
    pub(crate) fn path(&self) -> Option<&Path> {
        self.backing.as_ref().map(|b| b.path.as_path())
    }

    /// The atomic word at `offset`.
    ///
    /// Panics if `offset` is misaligned or out of bounds; callers only pass
    /// offsets derived from the layout or from this region's allocator.
    #[inline]
    fn word(&self, offset: usize) -> &AtomicU64 {
        assert!(offset % 8 == 0 && offset + 8 <= self.len, "bad store offset {offset:#x}");
        // SAFETY: in bounds and 8-aligned (the mapping is page aligned); the
        // mapping lives as long as `self`.
        unsafe { &*(self.base.add(offset) as *const AtomicU64) }
    }

    /// Load the little-endian word at `offset`.
    #[inline]
    pub(crate) fn load(&self, offset: usize) -> u64 {
        u64::from_le(self.word(offset).load(Ordering::Acquire))
    }

    /// Store the little-endian word at `offset`.
    #[inline]
    pub(crate) fn store(&self, offset: usize, value: u64) {
        self.word(offset).store(value.to_le(), Ordering::Release);
    }

    /// Relaxed store, used for record payload words.
    #[inline]
    pub(crate) fn store_relaxed(&self, offset: usize, value: u64) {
        self.word(offset).store(value.to_le(), Ordering::Relaxed);
    }

    /// Load the low half of the word at `offset`.
    #[inline]
    pub(crate) fn load_lo(&self, offset: usize) -> u32 {
        self.load(offset) as u32
    }

    /// Load the high half of the word at `offset`.
    #[inline]
    pub(crate) fn load_hi(&self, offset: usize) -> u32 {
        (self.load(offset) >> 32) as u32
    }

    /// Store both halves of the word at `offset`.
    #[inline]
    pub(crate) fn store_pair(&self, offset: usize, lo: u32, hi: u32) {
        self.store(offset, (u64::from(hi) << 32) | u64::from(lo));
    }

    /// Atomically add to the word at `offset`, returning the previous value.
    pub(crate) fn fetch_add(&self, offset: usize, delta: u64) -> u64 {
        self.update(offset, |v| v.wrapping_add(delta))
    }

    /// Atomically subtract from the word at `offset`, saturating at zero.
    pub(crate) fn saturating_sub(&self, offset: usize, delta: u64) {
        self.update(offset, |v| v.saturating_sub(delta));
    }

    fn update(&self, offset: usize, f: impl Fn(u64) -> u64) -> u64 {
        let word = self.word(offset);
        let mut current = word.load(Ordering::Acquire);
        loop {
            let next = f(u64::from_le(current)).to_le();
            match word.compare_exchange_weak(current, next, Ordering::AcqRel, Ordering::Acquire) {
                Ok(prev) => return u64::from_le(prev),
                Err(actual) => current = actual,
            }
        }
    }

    /// Zero `[start, end)`, both 8-aligned.
    pub(crate) fn zero(&self, start: usize, end: usize) {
        let mut offset = start;
        while offset < end {
            self.store_relaxed(offset, 0);
            offset += 8;
        }
    }

    /// Copy bytes into `[offset, offset + bytes.len())`, padding the final
    /// partial word with zeros. `offset` must be 8-aligned.
    pub(crate) fn write_bytes(&self, offset: usize, bytes: &[u8]) {
        for (i, chunk) in bytes.chunks(8).enumerate() {
            let mut word = [0u8; 8];
            word[..chunk.len()].copy_from_slice(chunk);
            self.store(offset + i * 8, u64::from_le_bytes(word));
        }
    }

    /// Bump-allocate `size` bytes from the data area.
    ///
    /// Returns `None` once the data area is exhausted. Lock-free; the
    /// returned memory is zero as long as the area was zero when handed out.
    pub(crate) fn allocate(&self, size: usize) -> Option<usize> {
        let size = align_up(size, DATA_ALIGN) as u64;
        let limit = self.load(HDR_MEMORY_LIMIT);
        let word = self.word(HDR_MEMORY_CUR);
        let mut current = word.load(Ordering::Acquire);
        loop {
            let start = u64::from_le(current);
            let end = start.checked_add(size)?;
            if end > limit {
                return None;
            }
            match word.compare_exchange_weak(current, end.to_le(), Ordering::AcqRel, Ordering::Acquire) {
                Ok(_) => return Some(start as usize),
                Err(actual) => current = actual,
            }
        }
    }

    /// Copy `[0, len)` out of the mapping.
    pub(crate) fn copy_prefix(&self, len: usize) -> Vec<u8> {
        let len = align_up(len.min(self.len), 8).min(self.len);
        let mut out = Vec::with_capacity(len);
        let mut offset = 0;
        while offset < len {
            out.extend_from_slice(&self.load(offset).to_le_bytes());
            offset += 8;
        }
        out
    }

    /// Flush a file-backed region to disk. A no-op for anonymous regions.
    pub(crate) fn flush(&self) -> Result<()> {
        if self.backing.is_none() {
            return Ok(());
        }
        self.map.flush().map_err(|e| StressLogError::StoreFlush {
            cause: e.to_string(),
        })
    }
}

impl Drop for Region {
    fn drop(&mut self) {
        if let Some(backing) = &self.backing {
            let _ = self.map.flush();
            if let Err(e) = FileExt::unlock(&backing.file) {
                tracing::debug!(path = %backing.path.display(), error = %e, "Failed to unlock store file");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::layout::data_offset;

    fn region_with_data(len: usize) -> Region {
        let region = Region::anonymous(len).unwrap();
        region.store(HDR_MEMORY_CUR, data_offset(0) as u64);
        region.store(HDR_MEMORY_LIMIT, len as u64);
        region
    }

    #[test]
    fn words_roundtrip() {
        let region = Region::anonymous(4096).unwrap();
        region.store(512, 0xDEAD_BEEF_0000_0001);
        assert_eq!(region.load(512), 0xDEAD_BEEF_0000_0001);
        region.store_pair(520, 7, 9);
        assert_eq!(region.load_lo(520), 7);
        assert_eq!(region.load_hi(520), 9);
    }

    #[test]
    fn allocate_until_full() {
        let region = region_with_data(4096);
        let first = region.allocate(100).unwrap();
        assert_eq!(first, data_offset(0));
        let second = region.allocate(1).unwrap();
        assert_eq!(second, first + 128);
        while region.allocate(1024).is_some() {}
        assert!(region.load(HDR_MEMORY_CUR) <= 4096);
        assert!(region.allocate(4096).is_none());
    }

    #[test]
    fn counters() {
        let region = Region::anonymous(4096).unwrap();
        assert_eq!(region.fetch_add(1024, 3), 0);
        region.saturating_sub(1024, 5);
        assert_eq!(region.load(1024), 0);
    }

    #[test]
    fn write_bytes_pads_last_word() {
        let region = Region::anonymous(4096).unwrap();
        region.store(1032, u64::MAX);
        region.write_bytes(1024, b"hello world");
        let copy = region.copy_prefix(1040);
        assert_eq!(&copy[1024..1035], b"hello world");
        assert_eq!(&copy[1035..1040], &[0u8; 5]);
    }

    #[test]
    fn file_backed_region_is_locked() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("stress.log");
        let region = Region::create_file(&path, 8192).unwrap();
        assert_eq!(region.path(), Some(path.as_path()));
        region.store(0, 42);
        region.flush().unwrap();

        let other = File::open(&path).unwrap();
        assert!(other.try_lock_exclusive().is_err());
        drop(region);
        assert_eq!(std::fs::metadata(&path).unwrap().len(), 8192);
    }
}
