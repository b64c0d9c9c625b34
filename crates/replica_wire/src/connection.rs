//! The log connection contract.

use async_trait::async_trait;
use tokio::sync::mpsc;

use crate::error::WireError;
use crate::position::Position;
use crate::transaction::{IncomingTransaction, Transaction};

/// Where a connection delivers what it reads.
///
/// `Some` carries the next transaction in log order; `None` marks that the
/// reader has caught up with the log's current live edge.
pub type Sink = mpsc::Sender<Option<IncomingTransaction>>;

/// A connection to the ordered, append-only log.
#[async_trait]
pub trait Connection: Send + Sync {
    /// Read the log from `from` onwards into `sink` until the sink closes.
    ///
    /// Transient faults are retried internally. Returns `Ok(())` once the
    /// receiving side of `sink` is dropped.
    ///
    /// # Errors
    ///
    /// Returns [`WireError::Mismatch`] if the log declares a version outside
    /// `versions` or `from` is not valid against the current log generation.
    async fn run(&self, versions: &[String], from: Position, sink: Sink) -> Result<(), WireError>;

    /// Append `txn` durably, waiting for acknowledgement.
    ///
    /// May be called before [`Connection::run`]; it then waits until the
    /// connection is established.
    ///
    /// # Errors
    ///
    /// Returns [`WireError::Mismatch`] on a version conflict.
    async fn submit(&self, txn: &Transaction) -> Result<(), WireError>;
}
