//! Secondary index definitions.
//!
//! An [`Indexer`] maps an entity to zero or more byte-sortable keys and knows
//! how to encode search arguments into the same key space. The building
//! blocks compose:
//!
//! - [`FieldIndex`]: one value extracted from the entity.
//! - [`CompoundIndex`]: several indexers concatenated; searchable by any
//!   leading subset of its arguments.
//! - [`ConditionalIndex`]: gates another indexer on a predicate.
//! - [`CustomIndex`]: an arbitrary function producing a [`Key`].
//! - [`Unique`]: forbids two entities sharing a key.

use std::marker::PhantomData;

use crate::entity::{AnyEntity, Entity};
use crate::key::{IndexKey, Key};

/// Name of the implicit identity index every kind carries.
pub const ID_INDEX: &str = "id";

/// Maps entities of type `T` into an ordered key space.
pub trait Indexer<T>: Send + Sync + 'static {
    /// The keys under which `obj` is indexed. Empty means "not indexed".
    fn object_keys(&self, obj: &T) -> Vec<Vec<u8>>;

    /// Number of search arguments a full lookup takes.
    fn arity(&self) -> usize;

    /// Whether lookups may pass fewer than [`Indexer::arity`] arguments.
    fn prefix(&self) -> bool {
        false
    }

    /// Whether two entities may share a key.
    fn unique(&self) -> bool {
        false
    }

    /// Append the encoding of `args` to `out`.
    ///
    /// `args` has already been checked against [`Indexer::arity`] and
    /// [`Indexer::prefix`].
    fn write_args(&self, args: &[&dyn IndexKey], out: &mut Vec<u8>);
}

// ── Field ───────────────────────────────────────────────────────────────────

/// Indexes a single value extracted from the entity.
pub struct FieldIndex<T, V> {
    get: Box<dyn Fn(&T) -> V + Send + Sync>,
    skip_zero: bool,
    fold_case: bool,
}

impl<T, V> FieldIndex<T, V> {
    /// Index the value returned by `get`.
    #[must_use]
    pub fn new(get: impl Fn(&T) -> V + Send + Sync + 'static) -> Self {
        Self {
            get: Box::new(get),
            skip_zero: false,
            fold_case: false,
        }
    }

    /// Leave entities whose value is zero out of the index.
    #[must_use]
    pub fn skip_zero(mut self) -> Self {
        self.skip_zero = true;
        self
    }

    /// Compare text values case-insensitively.
    #[must_use]
    pub fn case_insensitive(mut self) -> Self {
        self.fold_case = true;
        self
    }
}

impl<T, V> Indexer<T> for FieldIndex<T, V>
where
    T: 'static,
    V: IndexKey + 'static,
{
    fn object_keys(&self, obj: &T) -> Vec<Vec<u8>> {
        let value = (self.get)(obj);
        if self.skip_zero && value.is_zero() {
            return Vec::new();
        }
        let mut key = Vec::new();
        value.write_key(&mut key, self.fold_case);
        vec![key]
    }

    fn arity(&self) -> usize {
        1
    }

    fn write_args(&self, args: &[&dyn IndexKey], out: &mut Vec<u8>) {
        for arg in args {
            arg.write_key(out, self.fold_case);
        }
    }
}

// ── Compound ────────────────────────────────────────────────────────────────

/// Concatenates the keys of several indexers.
///
/// An entity is indexed only if every part yields at least one key; parts
/// yielding several keys produce their cross product.
pub struct CompoundIndex<T> {
    parts: Vec<Box<dyn Indexer<T>>>,
}

impl<T: 'static> CompoundIndex<T> {
    /// Create an empty compound index; add parts with [`CompoundIndex::then`].
    #[must_use]
    pub fn new() -> Self {
        Self { parts: Vec::new() }
    }

    /// Append a part.
    #[must_use]
    pub fn then(mut self, part: impl Indexer<T>) -> Self {
        self.parts.push(Box::new(part));
        self
    }
}

impl<T: 'static> Default for CompoundIndex<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: 'static> Indexer<T> for CompoundIndex<T> {
    fn object_keys(&self, obj: &T) -> Vec<Vec<u8>> {
        let mut keys = vec![Vec::new()];
        for part in &self.parts {
            let suffixes = part.object_keys(obj);
            if suffixes.is_empty() {
                return Vec::new();
            }
            keys = keys
                .iter()
                .flat_map(|prefix| {
                    suffixes.iter().map(move |suffix| {
                        let mut key = prefix.clone();
                        key.extend_from_slice(suffix);
                        key
                    })
                })
                .collect();
        }
        keys
    }

    fn arity(&self) -> usize {
        self.parts.iter().map(|p| p.arity()).sum()
    }

    fn prefix(&self) -> bool {
        true
    }

    fn write_args(&self, mut args: &[&dyn IndexKey], out: &mut Vec<u8>) {
        for part in &self.parts {
            if args.is_empty() {
                break;
            }
            let take = part.arity().min(args.len());
            part.write_args(&args[..take], out);
            args = &args[take..];
        }
    }
}

// ── Conditional ─────────────────────────────────────────────────────────────

/// Indexes an entity through `inner` only when a predicate holds.
pub struct ConditionalIndex<T, I> {
    inner: I,
    when: Box<dyn Fn(&T) -> bool + Send + Sync>,
}

impl<T, I> ConditionalIndex<T, I> {
    /// Gate `inner` on an arbitrary predicate.
    #[must_use]
    pub fn new(inner: I, when: impl Fn(&T) -> bool + Send + Sync + 'static) -> Self {
        Self {
            inner,
            when: Box::new(when),
        }
    }

    /// Gate `inner` on a field being non-zero (for example an `active` flag).
    #[must_use]
    pub fn when_nonzero<V: IndexKey>(
        inner: I,
        field: impl Fn(&T) -> V + Send + Sync + 'static,
    ) -> Self {
        Self::new(inner, move |obj| !field(obj).is_zero())
    }
}

impl<T: 'static, I: Indexer<T>> Indexer<T> for ConditionalIndex<T, I> {
    fn object_keys(&self, obj: &T) -> Vec<Vec<u8>> {
        if (self.when)(obj) {
            self.inner.object_keys(obj)
        } else {
            Vec::new()
        }
    }

    fn arity(&self) -> usize {
        self.inner.arity()
    }

    fn prefix(&self) -> bool {
        self.inner.prefix()
    }

    fn unique(&self) -> bool {
        self.inner.unique()
    }

    fn write_args(&self, args: &[&dyn IndexKey], out: &mut Vec<u8>) {
        self.inner.write_args(args, out);
    }
}

// ── Custom ──────────────────────────────────────────────────────────────────

/// Indexes entities by a [`Key`] computed by an arbitrary function.
///
/// The function returns `None` to leave the entity out. Searches may pass any
/// leading subset of the declared components.
pub struct CustomIndex<T> {
    arity: usize,
    key: Box<dyn Fn(&T) -> Option<Key> + Send + Sync>,
}

impl<T> CustomIndex<T> {
    /// Create a custom index whose keys have `arity` components.
    #[must_use]
    pub fn new(arity: usize, key: impl Fn(&T) -> Option<Key> + Send + Sync + 'static) -> Self {
        Self {
            arity,
            key: Box::new(key),
        }
    }
}

impl<T: 'static> Indexer<T> for CustomIndex<T> {
    fn object_keys(&self, obj: &T) -> Vec<Vec<u8>> {
        (self.key)(obj)
            .map(|key| vec![key.into_bytes()])
            .unwrap_or_default()
    }

    fn arity(&self) -> usize {
        self.arity
    }

    fn prefix(&self) -> bool {
        true
    }

    fn write_args(&self, args: &[&dyn IndexKey], out: &mut Vec<u8>) {
        for arg in args {
            arg.write_key(out, false);
        }
    }
}

// ── Unique ──────────────────────────────────────────────────────────────────

/// Forbids two entities from sharing a key of the wrapped indexer.
pub struct Unique<I>(pub I);

impl<T: 'static, I: Indexer<T>> Indexer<T> for Unique<I> {
    fn object_keys(&self, obj: &T) -> Vec<Vec<u8>> {
        self.0.object_keys(obj)
    }

    fn arity(&self) -> usize {
        self.0.arity()
    }

    fn prefix(&self) -> bool {
        self.0.prefix()
    }

    fn unique(&self) -> bool {
        true
    }

    fn write_args(&self, args: &[&dyn IndexKey], out: &mut Vec<u8>) {
        self.0.write_args(args, out);
    }
}

// ── Type-erased definition ──────────────────────────────────────────────────

/// A search key produced from arguments, ready to scan an index with.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Lookup {
    /// Encoded arguments.
    pub key: Vec<u8>,
    /// `true` if index keys must equal `key`; `false` if they need only start
    /// with it.
    pub exact: bool,
}

trait ErasedIndexer: Send + Sync {
    fn object_keys(&self, obj: &AnyEntity) -> Vec<Vec<u8>>;
    fn arity(&self) -> usize;
    fn prefix(&self) -> bool;
    fn unique(&self) -> bool;
    fn write_args(&self, args: &[&dyn IndexKey], out: &mut Vec<u8>);
}

struct Typed<T, I> {
    inner: I,
    _entity: PhantomData<fn() -> T>,
}

impl<T: Entity, I: Indexer<T>> ErasedIndexer for Typed<T, I> {
    fn object_keys(&self, obj: &AnyEntity) -> Vec<Vec<u8>> {
        match obj.downcast_ref::<T>() {
            Some(obj) => self.inner.object_keys(obj),
            None => Vec::new(),
        }
    }

    fn arity(&self) -> usize {
        self.inner.arity()
    }

    fn prefix(&self) -> bool {
        self.inner.prefix()
    }

    fn unique(&self) -> bool {
        self.inner.unique()
    }

    fn write_args(&self, args: &[&dyn IndexKey], out: &mut Vec<u8>) {
        self.inner.write_args(args, out);
    }
}

/// A named index attached to a [`Kind`](crate::Kind).
pub struct IndexDef {
    name: &'static str,
    indexer: Box<dyn ErasedIndexer>,
}

impl IndexDef {
    pub(crate) fn new<T: Entity>(name: &'static str, indexer: impl Indexer<T>) -> Self {
        Self {
            name,
            indexer: Box::new(Typed {
                inner: indexer,
                _entity: PhantomData,
            }),
        }
    }

    /// The index name.
    #[must_use]
    pub fn name(&self) -> &'static str {
        self.name
    }

    /// Whether two entities may share a key.
    #[must_use]
    pub fn unique(&self) -> bool {
        self.indexer.unique()
    }

    /// The keys under which `obj` is indexed.
    #[must_use]
    pub fn object_keys(&self, obj: &AnyEntity) -> Vec<Vec<u8>> {
        self.indexer.object_keys(obj)
    }

    /// Encode search arguments.
    ///
    /// # Panics
    ///
    /// Panics if `args` does not match the index's arity and the index does
    /// not support prefix search with that many arguments. A mismatched
    /// query is a programming error, not a runtime condition.
    #[must_use]
    pub fn lookup(&self, args: &[&dyn IndexKey]) -> Lookup {
        let arity = self.indexer.arity();
        let exact = args.len() == arity;
        assert!(
            exact || (self.indexer.prefix() && args.len() < arity),
            "index `{}` takes {} argument(s), got {}",
            self.name,
            arity,
            args.len()
        );
        let mut key = Vec::new();
        self.indexer.write_args(args, &mut key);
        Lookup { key, exact }
    }
}

impl std::fmt::Debug for IndexDef {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("IndexDef")
            .field("name", &self.name)
            .field("arity", &self.indexer.arity())
            .field("prefix", &self.indexer.prefix())
            .field("unique", &self.indexer.unique())
            .finish()
    }
}
