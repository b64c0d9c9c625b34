//! Wire-layer error types.

use crate::position::Position;

/// A fatal-but-expected disagreement between a replica and the log.
///
/// Callers must stop and restart against fresh coordinates (a new manifest
/// or an empty resume position) instead of retrying.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum Mismatch {
    /// The log declares a database version the replica does not understand.
    #[error("log declares version {found:?}, replica understands {expected:?}")]
    Version {
        /// Versions the replica was configured with.
        expected: Vec<String>,
        /// Version declared by the log.
        found: String,
    },

    /// The resume position no longer addresses the current log.
    #[error("resume position {position} is not valid against log generation {generation:016x}")]
    ContinuityBroken {
        /// The rejected position.
        position: Position,
        /// The log's current generation.
        generation: u64,
    },
}

/// Errors that can occur talking to the log.
#[derive(Debug, thiserror::Error)]
pub enum WireError {
    /// Version or continuity disagreement.
    #[error(transparent)]
    Mismatch(#[from] Mismatch),

    /// A position string is not `{generation:016x}-{offset:016x}`.
    #[error("invalid position {0:?}")]
    InvalidPosition(String),

    /// The connection or the log went away.
    #[error("connection closed")]
    Closed,

    /// Failed to encode or decode a JSON payload.
    #[error("JSON codec error: {0}")]
    Json(#[from] serde_json::Error),
}

impl WireError {
    /// Returns `true` for [`WireError::Mismatch`].
    #[must_use]
    pub fn is_mismatch(&self) -> bool {
        matches!(self, Self::Mismatch(_))
    }
}
