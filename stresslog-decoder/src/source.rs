//! Store sources.
//!
//! A store is decoded from a read-only mapping of a store file or from an
//! in-memory snapshot. Either way the decoder sees one immutable byte image.

use crate::error::{DecodeError, Result};
use memmap2::Mmap;
use std::fs::File;
use std::path::{Path, PathBuf};
use stresslog_core::StoreImage;

enum Backing {
    Mapped(Mmap),
    Owned(Vec<u8>),
}

/// An opened store.
pub struct StoreFile {
    backing: Backing,
    path: Option<PathBuf>,
}

impl StoreFile {
    /// Map a store file read-only.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let open_err = |cause: String| DecodeError::Open {
            path: path.to_path_buf(),
            cause,
        };

        let file = File::open(path).map_err(|e| open_err(e.to_string()))?;
        let len = file.metadata().map_err(|e| open_err(e.to_string()))?.len();
        if len == 0 {
            return Err(open_err("file is empty".to_string()));
        }

        // SAFETY: the mapping is only ever read. A writer still appending to
        // the file can change bytes under us, which the image reader
        // tolerates by bounds checking every link it follows.
        let map = unsafe { Mmap::map(&file) }.map_err(|e| open_err(e.to_string()))?;
        tracing::debug!(path = %path.display(), bytes = len, "Mapped store file");

        Ok(Self {
            backing: Backing::Mapped(map),
            path: Some(path.to_path_buf()),
        })
    }

    /// Decode from bytes already in memory, such as a live snapshot.
    pub fn from_bytes(bytes: Vec<u8>) -> Self {
        Self {
            backing: Backing::Owned(bytes),
            path: None,
        }
    }

    /// The raw image.
    pub fn bytes(&self) -> &[u8] {
        match &self.backing {
            Backing::Mapped(map) => &map[..],
            Backing::Owned(bytes) => &bytes[..],
        }
    }

    /// Path of the mapped file, if any.
    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    /// Parse the store header.
    pub fn image(&self) -> Result<StoreImage<'_>> {
        Ok(StoreImage::parse(self.bytes())?)
    }
}

impl std::fmt::Debug for StoreFile {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StoreFile")
            .field("path", &self.path)
            .field("len", &self.bytes().len())
            .finish()
    }
}
