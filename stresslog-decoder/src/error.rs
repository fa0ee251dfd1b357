//! Error types for the decoder.
//!
//! Only opening a store and parsing options fail. Damage inside a store's
//! data area is not an error: it is reported as a warning and the damaged
//! chunk or log is skipped.

use std::path::PathBuf;
use stresslog_core::StressLogError;
use thiserror::Error;

/// The main error type for decoding.
#[derive(Error, Debug)]
pub enum DecodeError {
    /// The store could not be opened or mapped.
    #[error("E101: Failed to open store {path}: {cause}")]
    Open {
        /// The store path.
        path: PathBuf,
        /// Reason for the failure.
        cause: String,
    },

    /// The bytes are not a usable store image.
    #[error("E102: {0}")]
    Store(#[from] StressLogError),

    /// A filter option could not be parsed.
    #[error("E110: Invalid {option} '{value}': {cause}")]
    InvalidOption {
        /// The option being parsed.
        option: &'static str,
        /// The rejected text.
        value: String,
        /// Why it was rejected.
        cause: &'static str,
    },

    /// Writing rendered output failed.
    #[error("E120: Failed to write output: {0}")]
    Output(#[from] std::io::Error),

    /// Serializing a message to JSON failed.
    #[error("E121: Failed to serialize message: {0}")]
    Serialize(#[from] serde_json::Error),
}

impl DecodeError {
    /// Get the error code.
    pub fn code(&self) -> &'static str {
        match self {
            Self::Open { .. } => "E101",
            Self::Store(_) => "E102",
            Self::InvalidOption { .. } => "E110",
            Self::Output(_) => "E120",
            Self::Serialize(_) => "E121",
        }
    }

    pub(crate) fn option(option: &'static str, value: &str, cause: &'static str) -> Self {
        Self::InvalidOption {
            option,
            value: value.to_string(),
            cause,
        }
    }
}

/// Result type alias for decoder operations.
pub type Result<T> = std::result::Result<T, DecodeError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn codes_and_messages() {
        let err = DecodeError::option("value range", "12-", "missing end");
        assert_eq!(err.code(), "E110");
        assert_eq!(err.to_string(), "E110: Invalid value range '12-': missing end");

        let err = DecodeError::from(StressLogError::BadMagic { found: 0 });
        assert_eq!(err.code(), "E102");
        assert!(err.to_string().contains("E030"));
    }
}
