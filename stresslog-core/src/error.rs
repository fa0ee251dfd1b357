//! Error types for the stress log.
//!
//! Only setup and store parsing can fail. The write path never returns an
//! error: allocation failure, budget exhaustion and reentrancy are absorbed
//! by dropping the message.

use std::path::PathBuf;
use thiserror::Error;

/// The main error type for stress log operations.
#[derive(Error, Debug)]
pub enum StressLogError {
    // =========================================================================
    // Configuration Errors (E001-E009)
    // =========================================================================
    /// A configuration value is out of range or inconsistent.
    #[error("E001: Invalid stress log configuration '{field}': {cause}")]
    InvalidConfig {
        /// The offending configuration field.
        field: &'static str,
        /// Why the value was rejected.
        cause: String,
    },

    // =========================================================================
    // Store Errors (E010-E029)
    // =========================================================================
    /// Failed to create or open the backing store file.
    #[error("E010: Failed to create store at {path}: {cause}")]
    StoreCreate {
        /// The path where store creation failed.
        path: PathBuf,
        /// Reason for the failure.
        cause: String,
    },

    /// Failed to map the backing memory.
    #[error("E011: Failed to map store memory ({what}): {cause}")]
    StoreMap {
        /// Which mapping failed (file path or "anonymous").
        what: String,
        /// Reason for the mmap failure.
        cause: String,
    },

    /// Failed to flush a file-backed store.
    #[error("E012: Failed to flush store: {cause}")]
    StoreFlush {
        /// Reason for the flush failure.
        cause: String,
    },

    // =========================================================================
    // Image Errors (E030-E049)
    // =========================================================================
    /// The store does not start with the expected magic number.
    #[error("E030: Not a stress log store: bad magic {found:#010x}")]
    BadMagic {
        /// The magic value that was found.
        found: u32,
    },

    /// The store was written by an incompatible format version.
    #[error("E031: Unsupported stress log version {found:#010x}")]
    UnsupportedVersion {
        /// The version that was found.
        found: u32,
    },

    /// The store image is shorter than its header claims.
    #[error("E032: Store image truncated: need {needed} bytes, have {actual}")]
    Truncated {
        /// Bytes required.
        needed: u64,
        /// Bytes available.
        actual: u64,
    },

    /// A header field is inconsistent.
    #[error("E033: Store header corrupt: {cause}")]
    HeaderCorrupt {
        /// Description of the inconsistency.
        cause: String,
    },

    /// I/O error while reading a header.
    #[error("E040: I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl StressLogError {
    /// Get the error code.
    pub fn code(&self) -> &'static str {
        match self {
            Self::InvalidConfig { .. } => "E001",
            Self::StoreCreate { .. } => "E010",
            Self::StoreMap { .. } => "E011",
            Self::StoreFlush { .. } => "E012",
            Self::BadMagic { .. } => "E030",
            Self::UnsupportedVersion { .. } => "E031",
            Self::Truncated { .. } => "E032",
            Self::HeaderCorrupt { .. } => "E033",
            Self::Io(_) => "E040",
        }
    }

    /// Whether the error means the bytes are not a usable store image.
    ///
    /// These are fatal to a decode; everything else found while walking
    /// logs is reported per chunk.
    pub fn is_structural(&self) -> bool {
        matches!(
            self,
            Self::BadMagic { .. }
                | Self::UnsupportedVersion { .. }
                | Self::Truncated { .. }
                | Self::HeaderCorrupt { .. }
        )
    }

    pub(crate) fn config(field: &'static str, cause: impl Into<String>) -> Self {
        Self::InvalidConfig {
            field,
            cause: cause.into(),
        }
    }

    pub(crate) fn corrupt(cause: impl Into<String>) -> Self {
        Self::HeaderCorrupt {
            cause: cause.into(),
        }
    }
}

/// Result type alias using `StressLogError`.
pub type Result<T> = std::result::Result<T, StressLogError>;
