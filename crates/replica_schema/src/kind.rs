//! Kind descriptors: the immutable schema of one entity type.
//!
//! A [`Kind`] is built once, at startup, with a [`KindBuilder`]. Fields are
//! declared in [`Section`]s; each section carries the set of producers allowed
//! to write its fields, so one entity type can be split between several
//! uncoordinated writers.
//!
//! ## Annotations
//!
//! | Meaning | Builder call |
//! |---------|--------------|
//! | identity (implies const + required) | [`Field::identity`] |
//! | immutable once the entity exists | [`Field::constant`] |
//! | must hold a non-zero value | [`Field::required`] |
//! | wire name override | [`Field::wire`] |
//! | allowed writers `p1\|p2` | [`Section::produced_by`] |
//! | excluded from the wire | leave the field undeclared |

use std::any::TypeId;
use std::collections::BTreeSet;

use chrono::{DateTime, Utc};
use serde_json::{Map, Value};

use crate::entity::{AnyEntity, Deadline, Entity, Object, Survive};
use crate::error::{CodecError, SchemaError};
use crate::index::{ID_INDEX, IndexDef, Indexer};

/// One field of a kind.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Field {
    name: &'static str,
    wire: &'static str,
    constant: bool,
    required: bool,
    identity: bool,
    producers: BTreeSet<String>,
}

impl Field {
    /// Declare a field. The wire name defaults to `name`.
    #[must_use]
    pub fn new(name: &'static str) -> Self {
        Self {
            name,
            wire: name,
            constant: false,
            required: false,
            identity: false,
            producers: BTreeSet::new(),
        }
    }

    /// Declare the identity field. Identity implies const and required.
    #[must_use]
    pub fn identity(name: &'static str) -> Self {
        Self {
            identity: true,
            constant: true,
            required: true,
            ..Self::new(name)
        }
    }

    /// Override the wire name.
    #[must_use]
    pub fn wire(mut self, wire: &'static str) -> Self {
        self.wire = wire;
        self
    }

    /// Make the field immutable once the entity exists.
    #[must_use]
    pub fn constant(mut self) -> Self {
        self.constant = true;
        self
    }

    /// Require a non-zero value.
    #[must_use]
    pub fn required(mut self) -> Self {
        self.required = true;
        self
    }

    /// The declared (struct) name.
    #[must_use]
    pub fn name(&self) -> &'static str {
        self.name
    }

    /// The wire name used in diffs.
    #[must_use]
    pub fn wire_name(&self) -> &'static str {
        self.wire
    }

    /// Whether the field is immutable once the entity exists.
    #[must_use]
    pub fn is_const(&self) -> bool {
        self.constant
    }

    /// Whether the field must hold a non-zero value.
    #[must_use]
    pub fn is_required(&self) -> bool {
        self.required
    }

    /// Whether this is the identity field.
    #[must_use]
    pub fn is_identity(&self) -> bool {
        self.identity
    }

    /// The producers allowed to change this field. Empty means only
    /// administrative (unattributed) writers may.
    #[must_use]
    pub fn producers(&self) -> &BTreeSet<String> {
        &self.producers
    }
}

/// A group of fields sharing one set of producers.
#[derive(Debug, Clone, Default)]
pub struct Section {
    kind: Option<&'static str>,
    producers: BTreeSet<String>,
    fields: Vec<Field>,
}

impl Section {
    /// Create an empty section with no producers.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Name the kind this section belongs to; checked when the kind is built.
    #[must_use]
    pub fn kind(mut self, kind: &'static str) -> Self {
        self.kind = Some(kind);
        self
    }

    /// Allow the given producers to write this section's fields.
    #[must_use]
    pub fn producers<I, S>(mut self, producers: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.producers.extend(producers.into_iter().map(Into::into));
        self
    }

    /// Allow producers given as an alternation, e.g. `"scanner|importer"`.
    #[must_use]
    pub fn produced_by(self, alternation: &str) -> Self {
        self.producers(
            alternation
                .split('|')
                .map(str::trim)
                .filter(|p| !p.is_empty()),
        )
    }

    /// Add a field.
    #[must_use]
    pub fn field(mut self, field: Field) -> Self {
        self.fields.push(field);
        self
    }
}

type ToMap = fn(&AnyEntity, &'static str) -> Result<Map<String, Value>, CodecError>;
type FromMap = fn(Map<String, Value>, &'static str) -> Result<Object, CodecError>;
type IdOf = for<'a> fn(&'a AnyEntity) -> Option<&'a str>;
type SurviveFn = fn(&AnyEntity) -> bool;
type DeadlineFn = fn(&AnyEntity, DateTime<Utc>) -> Option<DateTime<Utc>>;

/// The immutable schema descriptor of one entity type.
pub struct Kind {
    name: &'static str,
    type_id: TypeId,
    fields: Vec<Field>,
    identity: usize,
    indexes: Vec<IndexDef>,
    zero: Map<String, Value>,
    to_map: ToMap,
    from_map: FromMap,
    id_of: IdOf,
    survive: Option<SurviveFn>,
    deadline: Option<DeadlineFn>,
}

impl Kind {
    /// Start building the kind for entity type `T`.
    #[must_use]
    pub fn builder<T: Entity>(name: &'static str) -> KindBuilder<T> {
        KindBuilder {
            name,
            sections: Vec::new(),
            indexes: Vec::new(),
            survive: None,
            deadline: None,
            _entity: std::marker::PhantomData,
        }
    }

    /// The kind's wire name.
    #[must_use]
    pub fn name(&self) -> &'static str {
        self.name
    }

    /// All fields, in declaration order.
    #[must_use]
    pub fn fields(&self) -> &[Field] {
        &self.fields
    }

    /// Look a field up by wire name.
    #[must_use]
    pub fn field(&self, wire: &str) -> Option<&Field> {
        self.fields.iter().find(|f| f.wire == wire)
    }

    /// The identity field.
    #[must_use]
    pub fn identity(&self) -> &Field {
        &self.fields[self.identity]
    }

    /// Look a secondary index up by name.
    #[must_use]
    pub fn index(&self, name: &str) -> Option<&IndexDef> {
        self.indexes.iter().find(|i| i.name() == name)
    }

    /// All secondary indices.
    #[must_use]
    pub fn indexes(&self) -> &[IndexDef] {
        &self.indexes
    }

    /// Returns `true` if `obj` is an instance of this kind's entity type.
    #[must_use]
    pub fn is_instance(&self, obj: &AnyEntity) -> bool {
        obj.type_id() == self.type_id
    }

    /// The identity of `obj`, or `None` if it is not an instance of this kind.
    #[must_use]
    pub fn id_of<'a>(&self, obj: &'a AnyEntity) -> Option<&'a str> {
        (self.id_of)(obj)
    }

    /// The serialised form of the entity type's zero value.
    #[must_use]
    pub fn zero(&self) -> &Map<String, Value> {
        &self.zero
    }

    /// Serialise `obj` to its JSON object form.
    ///
    /// # Errors
    ///
    /// Returns [`CodecError`] if `obj` is of the wrong type or fails to
    /// serialise to an object.
    pub fn to_map(&self, obj: &AnyEntity) -> Result<Map<String, Value>, CodecError> {
        (self.to_map)(obj, self.name)
    }

    /// Deserialise an entity from its JSON object form.
    ///
    /// # Errors
    ///
    /// Returns [`CodecError::Json`] if the object does not deserialise.
    pub fn from_map(&self, map: Map<String, Value>) -> Result<Object, CodecError> {
        (self.from_map)(map, self.name)
    }

    /// Whether the replica keeps tracking `obj`. Always `true` for kinds
    /// without a liveness predicate.
    #[must_use]
    pub fn survives(&self, obj: &AnyEntity) -> bool {
        self.survive.is_none_or(|survive| survive(obj))
    }

    /// The next instant `obj` wants a reaction, if the kind declares deadlines.
    #[must_use]
    pub fn deadline(&self, obj: &AnyEntity, now: DateTime<Utc>) -> Option<DateTime<Utc>> {
        self.deadline.and_then(|deadline| deadline(obj, now))
    }

    /// Check that every required field of `obj` holds a non-zero value.
    ///
    /// # Errors
    ///
    /// Returns [`CodecError::MissingRequired`] naming the first empty field.
    pub fn check_required(&self, obj: &AnyEntity) -> Result<(), CodecError> {
        let map = self.to_map(obj)?;
        for field in self.fields.iter().filter(|f| f.required) {
            if map.get(field.wire) == self.zero.get(field.wire) {
                return Err(CodecError::MissingRequired {
                    kind: self.name,
                    field: field.wire,
                });
            }
        }
        Ok(())
    }
}

impl std::fmt::Debug for Kind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Kind")
            .field("name", &self.name)
            .field("fields", &self.fields)
            .field("indexes", &self.indexes)
            .field("survive", &self.survive.is_some())
            .field("deadline", &self.deadline.is_some())
            .finish()
    }
}

/// Builds a [`Kind`] for entity type `T`.
pub struct KindBuilder<T> {
    name: &'static str,
    sections: Vec<Section>,
    indexes: Vec<IndexDef>,
    survive: Option<SurviveFn>,
    deadline: Option<DeadlineFn>,
    _entity: std::marker::PhantomData<fn() -> T>,
}

impl<T: Entity> KindBuilder<T> {
    /// Add a section of fields.
    #[must_use]
    pub fn section(mut self, section: Section) -> Self {
        self.sections.push(section);
        self
    }

    /// Add a named secondary index.
    #[must_use]
    pub fn index(mut self, name: &'static str, indexer: impl Indexer<T>) -> Self {
        self.indexes.push(IndexDef::new::<T>(name, indexer));
        self
    }

    /// Register the entity's liveness predicate.
    #[must_use]
    pub fn survives(mut self) -> Self
    where
        T: Survive,
    {
        self.survive = Some(survive_of::<T>);
        self
    }

    /// Register the entity's deadline function.
    #[must_use]
    pub fn deadlines(mut self) -> Self
    where
        T: Deadline,
    {
        self.deadline = Some(deadline_of::<T>);
        self
    }

    /// Validate the declaration and produce the kind.
    ///
    /// # Errors
    ///
    /// Returns [`SchemaError`] if there is not exactly one identity field,
    /// a wire name or index name repeats, a section names another kind, or
    /// a declared field is missing from `T`'s serialised form.
    pub fn build(self) -> Result<Kind, SchemaError> {
        let name = self.name;
        let mut fields: Vec<Field> = Vec::new();
        let mut identity: Option<usize> = None;

        for section in self.sections {
            if let Some(found) = section.kind
                && found != name
            {
                return Err(SchemaError::KindMismatch {
                    expected: name,
                    found,
                });
            }
            for mut field in section.fields {
                if fields.iter().any(|f| f.wire == field.wire) {
                    return Err(SchemaError::DuplicateField {
                        kind: name,
                        field: field.wire,
                    });
                }
                if field.identity {
                    if let Some(first) = identity {
                        return Err(SchemaError::MultipleIdentity {
                            kind: name,
                            first: fields[first].wire,
                            second: field.wire,
                        });
                    }
                    identity = Some(fields.len());
                }
                field.producers = section.producers.clone();
                fields.push(field);
            }
        }
        let identity = identity.ok_or(SchemaError::NoIdentity(name))?;

        let mut seen = BTreeSet::from([ID_INDEX]);
        for index in &self.indexes {
            if !seen.insert(index.name()) {
                return Err(SchemaError::DuplicateIndex {
                    kind: name,
                    index: index.name(),
                });
            }
        }

        let zero = match serde_json::to_value(T::default()) {
            Ok(Value::Object(map)) => map,
            Ok(_) => return Err(SchemaError::NotAnObject(name)),
            Err(source) => return Err(SchemaError::Zero { kind: name, source }),
        };
        if let Some(missing) = fields.iter().find(|f| !zero.contains_key(f.wire)) {
            return Err(SchemaError::MissingWireField {
                kind: name,
                field: missing.wire,
            });
        }

        Ok(Kind {
            name,
            type_id: TypeId::of::<T>(),
            fields,
            identity,
            indexes: self.indexes,
            zero,
            to_map: to_map_of::<T>,
            from_map: from_map_of::<T>,
            id_of: id_of::<T>,
            survive: self.survive,
            deadline: self.deadline,
        })
    }
}

fn to_map_of<T: Entity>(obj: &AnyEntity, kind: &'static str) -> Result<Map<String, Value>, CodecError> {
    let obj = obj.downcast_ref::<T>().ok_or(CodecError::WrongType(kind))?;
    match serde_json::to_value(obj) {
        Ok(Value::Object(map)) => Ok(map),
        Ok(_) => Err(CodecError::NotAnObject(kind)),
        Err(source) => Err(CodecError::Json { kind, source }),
    }
}

fn from_map_of<T: Entity>(map: Map<String, Value>, kind: &'static str) -> Result<Object, CodecError> {
    let obj: T =
        serde_json::from_value(Value::Object(map)).map_err(|source| CodecError::Json { kind, source })?;
    Ok(std::sync::Arc::new(obj))
}

fn id_of<T: Entity>(obj: &AnyEntity) -> Option<&str> {
    obj.downcast_ref::<T>().map(Entity::id)
}

fn survive_of<T: Entity + Survive>(obj: &AnyEntity) -> bool {
    obj.downcast_ref::<T>().is_none_or(Survive::survive)
}

fn deadline_of<T: Entity + Deadline>(obj: &AnyEntity, now: DateTime<Utc>) -> Option<DateTime<Utc>> {
    obj.downcast_ref::<T>().and_then(|obj| obj.deadline(now))
}
