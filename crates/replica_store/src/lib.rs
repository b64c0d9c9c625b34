//! # replica_store
//!
//! In-memory, typed, indexed entity store for the replicated entity
//! database.
//!
//! This crate provides:
//!
//! - [`Store`]: the shared handle, holding the published head state and the
//!   single writer lock.
//! - [`Snapshot`]: an immutable, cheaply clonable view for readers.
//! - [`Transaction`] / [`TransactionControl`]: the write transaction as seen
//!   by user code and by its creator.
//! - [`StoreError`]: write and construction errors.
//!
//! Tables are persistent ordered maps, so a commit shares structure with
//! every snapshot taken before it.

pub mod error;
pub mod snapshot;
pub mod store;
pub mod transaction;

mod table;

#[cfg(test)]
pub(crate) mod fixtures;

pub use error::StoreError;
pub use snapshot::Snapshot;
pub use store::Store;
pub use transaction::{Change, Transaction, TransactionControl};
