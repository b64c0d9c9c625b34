//! Reactor and local-transaction error types.

use chrono::{DateTime, Utc};
use replica_schema::{CodecError, Eid};
use replica_store::StoreError;
use replica_wire::WireError;

/// Errors that stop the reactor or fail a local transaction.
#[derive(Debug, thiserror::Error)]
pub enum DbError {
    /// The log connection failed; see [`DbError::is_mismatch`].
    #[error(transparent)]
    Wire(#[from] WireError),

    /// A diff broke the schema or write-ownership contract.
    #[error("{eid}: {source}")]
    Codec {
        /// The entity the diff addressed.
        eid: Eid,
        /// What was violated.
        source: CodecError,
    },

    /// A merged entity's identity disagrees with the id it was filed under.
    #[error("{eid}: merged entity carries identity {found:?}")]
    IdentityMismatch {
        /// Where the diff was filed.
        eid: Eid,
        /// The identity the merged entity carries.
        found: String,
    },

    /// The store rejected a write.
    #[error(transparent)]
    Store(#[from] StoreError),

    /// The replica has no writer identity but tried to submit changes.
    #[error("replica is read-only")]
    ReadOnly,

    /// The replica has not caught up with the log yet.
    #[error("replica is not ready")]
    NotReady,

    /// The reactor is no longer running.
    #[error("replica stopped")]
    Stopped,

    /// An entity reported a deadline earlier than the current time.
    #[error("{eid}: deadline {deadline} is earlier than {now}")]
    DeadlineInPast {
        /// The offending entity.
        eid: Eid,
        /// The reported deadline.
        deadline: DateTime<Utc>,
        /// The time it was evaluated at.
        now: DateTime<Utc>,
    },

    /// A reaction or local transaction body failed.
    #[error("callback failed: {0}")]
    Callback(#[source] anyhow::Error),
}

impl DbError {
    /// Returns `true` if the log reported a version or continuity
    /// [`Mismatch`](replica_wire::Mismatch). The supervisor should restart
    /// the replica against fresh coordinates.
    #[must_use]
    pub fn is_mismatch(&self) -> bool {
        matches!(self, Self::Wire(err) if err.is_mismatch())
    }
}
