//! Audit trail errors.

use std::path::PathBuf;

use aura_core::CanonicalizationError;
use thiserror::Error;

/// Failure to record, persist or read audit entries.
#[derive(Error, Debug)]
pub enum AuditError {
    /// File I/O failed.
    #[error("audit I/O error on {path}: {source}")]
    Io {
        /// The file involved.
        path: PathBuf,
        /// Underlying error.
        #[source]
        source: std::io::Error,
    },

    /// A stored line could not be decoded.
    #[error("corrupt audit record at line {line}: {reason}")]
    Corrupt {
        /// 1-based line number.
        line: usize,
        /// Decoder message.
        reason: String,
    },

    /// An entry could not be encoded.
    #[error("audit serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// An entry could not be canonicalized for hashing.
    #[error("audit canonicalization error: {0}")]
    Canonicalization(#[from] CanonicalizationError),

    /// A non-file backend failed.
    #[error("audit store unavailable: {0}")]
    Unavailable(String),
}

impl AuditError {
    pub(crate) fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }
}
