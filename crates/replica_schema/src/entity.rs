//! The [`Entity`] trait and entity addressing.
//!
//! An entity is any serde-serialisable struct with a string identity. Each
//! entity type is described by exactly one [`Kind`], built once at startup and
//! returned by [`Entity::kind`]. Entities are addressed everywhere by an
//! [`Eid`], the `(kind, id)` pair.

use std::any::Any;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::Serialize;
use serde::de::DeserializeOwned;

use crate::kind::Kind;

/// A type-erased, shareable entity instance.
///
/// Stores and codecs work on `Object`s so that one store can hold many kinds;
/// typed accessors downcast back to the concrete entity type.
pub type Object = Arc<dyn Any + Send + Sync>;

/// The borrowed form of an [`Object`].
pub type AnyEntity = dyn Any + Send + Sync;

/// The contract every replicated entity type satisfies.
///
/// # Examples
///
/// ```rust
/// use std::sync::LazyLock;
/// use serde::{Deserialize, Serialize};
/// use replica_schema::{Entity, Field, Kind, Section};
///
/// #[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
/// struct Host {
///     #[serde(rename = "ID")]
///     id: String,
///     #[serde(rename = "Addr")]
///     addr: String,
/// }
///
/// static HOST: LazyLock<Kind> = LazyLock::new(|| {
///     Kind::builder::<Host>("host")
///         .section(
///             Section::new()
///                 .field(Field::identity("id").wire("ID"))
///                 .field(Field::new("addr").wire("Addr")),
///         )
///         .build()
///         .expect("host kind")
/// });
///
/// impl Entity for Host {
///     fn kind() -> &'static Kind { &HOST }
///     fn id(&self) -> &str { &self.id }
/// }
/// ```
pub trait Entity: Serialize + DeserializeOwned + Default + Send + Sync + 'static {
    /// The schema descriptor for this entity type.
    fn kind() -> &'static Kind;

    /// The value of the identity field.
    fn id(&self) -> &str;

    /// The address of this instance.
    fn eid(&self) -> Eid {
        Eid::new(Self::kind().name(), self.id())
    }
}

/// Liveness capability: decides whether the replica keeps tracking an entity.
///
/// Registered on a kind with [`KindBuilder::survives`](crate::KindBuilder::survives).
/// Entities of kinds without it are always kept.
pub trait Survive {
    /// Returns `false` once the entity should be forgotten.
    fn survive(&self) -> bool;
}

/// Deadline capability: asks to be re-evaluated at a future instant.
///
/// Registered on a kind with [`KindBuilder::deadlines`](crate::KindBuilder::deadlines).
pub trait Deadline {
    /// The next instant at which the entity wants a reaction, if any.
    ///
    /// Must be a pure function of the entity and `now`, and must never
    /// return an instant earlier than `now`.
    fn deadline(&self, now: DateTime<Utc>) -> Option<DateTime<Utc>>;
}

/// The compound address of one entity instance: `(kind, id)`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Eid {
    kind: &'static str,
    id: String,
}

impl Eid {
    /// Create an address from a kind name and an identity.
    #[must_use]
    pub fn new(kind: &'static str, id: impl Into<String>) -> Self {
        Self {
            kind,
            id: id.into(),
        }
    }

    /// Address an instance of entity type `T`.
    #[must_use]
    pub fn of<T: Entity>(id: impl Into<String>) -> Self {
        Self::new(T::kind().name(), id)
    }

    /// The kind's wire name.
    #[must_use]
    pub fn kind(&self) -> &'static str {
        self.kind
    }

    /// The identity string.
    #[must_use]
    pub fn id(&self) -> &str {
        &self.id
    }
}

impl std::fmt::Display for Eid {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}", self.kind, self.id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_eid_display() {
        let eid = Eid::new("host", "h1");
        assert_eq!(eid.to_string(), "host/h1");
        assert_eq!(eid.kind(), "host");
        assert_eq!(eid.id(), "h1");
    }

    #[test]
    fn test_eid_orders_by_kind_then_id() {
        let mut eids = vec![
            Eid::new("b", "1"),
            Eid::new("a", "2"),
            Eid::new("a", "10"),
        ];
        eids.sort();
        assert_eq!(
            eids,
            vec![Eid::new("a", "10"), Eid::new("a", "2"), Eid::new("b", "1")]
        );
    }
}
