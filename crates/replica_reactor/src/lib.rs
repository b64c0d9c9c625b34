//! # replica_reactor
//!
//! Keeps a local replica in step with a shared transaction log and runs
//! application logic against it.
//!
//! A replica is opened from a [`DbConfig`] and split into two halves:
//!
//! 1. [`Db`], a cloneable handle for snapshots and local write
//!    transactions.
//! 2. [`Reactor`], the task that replays the log, commits at the live
//!    edge, runs the [`Reaction`] over everything that changed or fell due,
//!    and submits the reaction's own writes.
//!
//! Entity deadlines are turned into reactor wake-ups by the [`Scheduler`].
//!
//! ## Usage
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use replica_reactor::{Db, DbConfig};
//! use replica_wire::{Manifest, MemoryLog};
//!
//! # async fn demo() -> Result<(), replica_reactor::DbError> {
//! let log = MemoryLog::new(Manifest::new("v1", "leases"));
//! let config = DbConfig::new(["v1"], Arc::new(log.connect()))
//!     .with_source("janitor")
//!     .with_reaction(|_txn, batch| {
//!         tracing::info!(entities = batch.len(), "reacting");
//!         Ok(())
//!     });
//!
//! let (db, reactor) = Db::open(config)?;
//! tokio::spawn(reactor.run());
//! db.ready().await?;
//! # Ok(())
//! # }
//! ```

pub mod config;
pub mod db;
pub mod error;
pub mod reactor;
pub mod scheduler;

#[cfg(test)]
mod fixtures;

pub use config::{DbConfig, Reaction};
pub use db::{Db, Readiness};
pub use error::DbError;
pub use reactor::{MAILBOX_CAPACITY, Reactor};
pub use scheduler::Scheduler;
