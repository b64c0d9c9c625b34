//! # replica_schema
//!
//! Schema layer of the replicated entity database.
//!
//! This crate provides:
//!
//! - [`entity`]: the [`Entity`] trait, [`Eid`] addresses, and the optional
//!   [`Survive`] / [`Deadline`] capabilities.
//! - [`kind`]: [`Kind`] descriptors built with [`KindBuilder`], declaring
//!   fields, write ownership, and secondary indices.
//! - [`key`]: byte-sortable encoding of index key values.
//! - [`index`]: composable secondary index definitions.
//! - [`codec`]: the sparse field-level [`Diff`] codec with write
//!   authorization.
//! - [`error`]: schema and codec error types.

pub mod codec;
pub mod entity;
pub mod error;
pub mod index;
pub mod key;
pub mod kind;

pub use codec::{Diff, authorize, decode, decode_entity, encode, encode_entity, permit_all};
pub use entity::{AnyEntity, Deadline, Eid, Entity, Object, Survive};
pub use error::{CodecError, SchemaError};
pub use index::{
    CompoundIndex, ConditionalIndex, CustomIndex, FieldIndex, ID_INDEX, IndexDef, Indexer, Lookup, Unique,
};
pub use key::{IndexKey, Key, encode_key};
pub use kind::{Field, Kind, KindBuilder, Section};
