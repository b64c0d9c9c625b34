//! # replica_wire
//!
//! The contract between a replica and the ordered, append-only log that is
//! its source of truth.
//!
//! This crate provides:
//!
//! - [`transaction`]: the JSON wire [`Transaction`] and [`IncomingTransaction`].
//! - [`position`]: opaque resume [`Position`]s.
//! - [`manifest`]: the log [`Manifest`].
//! - [`connection`]: the [`Connection`] trait a log transport implements.
//! - [`memory`]: [`MemoryLog`], an in-process log with fan-out connections.
//! - [`codec`]: JSON serialisation helpers.
//! - [`error`]: [`WireError`] and the [`Mismatch`] condition.

pub mod codec;
pub mod connection;
pub mod error;
pub mod manifest;
pub mod memory;
pub mod position;
pub mod transaction;

pub use codec::{decode, encode};
pub use connection::{Connection, Sink};
pub use error::{Mismatch, WireError};
pub use manifest::Manifest;
pub use memory::{MemoryConnection, MemoryLog};
pub use position::Position;
pub use transaction::{Changes, IncomingTransaction, Source, Transaction};
