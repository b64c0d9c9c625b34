//! Immutable, point-in-time views of the store.

use std::collections::BTreeMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use imbl::OrdMap;
use replica_schema::{Eid, Entity, ID_INDEX, IndexKey, Kind, Object, encode_key};

use crate::error::StoreError;
use crate::table::Table;

/// The kinds a store was built with, by name.
#[derive(Debug, Default)]
pub(crate) struct Catalog {
    kinds: BTreeMap<&'static str, &'static Kind>,
}

impl Catalog {
    pub(crate) fn new(kinds: impl IntoIterator<Item = &'static Kind>) -> Result<Self, StoreError> {
        let mut catalog = Self::default();
        for kind in kinds {
            if catalog.kinds.insert(kind.name(), kind).is_some() {
                return Err(StoreError::DuplicateKind(kind.name()));
            }
        }
        Ok(catalog)
    }

    pub(crate) fn get(&self, name: &str) -> Option<&'static Kind> {
        self.kinds.get(name).copied()
    }

    pub(crate) fn kinds(&self) -> impl Iterator<Item = &'static Kind> + '_ {
        self.kinds.values().copied()
    }
}

/// A consistent view of every table at one instant.
///
/// Snapshots share structure with the store head and with each other, so
/// cloning one is cheap and holding one never blocks writers.
#[derive(Clone)]
pub struct Snapshot {
    ts: DateTime<Utc>,
    catalog: Arc<Catalog>,
    tables: OrdMap<&'static str, Table>,
}

impl Snapshot {
    pub(crate) fn empty(catalog: Arc<Catalog>) -> Self {
        let tables = catalog.kinds().map(|kind| (kind.name(), Table::default())).collect();
        Self {
            ts: Utc::now(),
            catalog,
            tables,
        }
    }

    /// When this view was opened.
    #[must_use]
    pub fn ts(&self) -> DateTime<Utc> {
        self.ts
    }

    /// Look up a registered kind by name.
    #[must_use]
    pub fn kind(&self, name: &str) -> Option<&'static Kind> {
        self.catalog.get(name)
    }

    /// Fetch an entity by identity.
    ///
    /// # Panics
    ///
    /// Panics if `T`'s kind is not registered with the store.
    #[must_use]
    pub fn get<T: Entity>(&self, id: &str) -> Option<Arc<T>> {
        let obj = self.table(T::kind()).get(id)?.clone();
        obj.downcast::<T>().ok()
    }

    /// Fetch an entity of any kind by address. Unregistered kinds read as
    /// absent.
    #[must_use]
    pub fn get_object(&self, eid: &Eid) -> Option<Object> {
        self.tables.get(eid.kind())?.get(eid.id()).cloned()
    }

    /// Every entity of type `T`, ordered by identity.
    ///
    /// # Panics
    ///
    /// Panics if `T`'s kind is not registered with the store.
    #[must_use]
    pub fn all<T: Entity>(&self) -> Vec<Arc<T>> {
        self.table(T::kind())
            .values()
            .filter_map(|obj| obj.clone().downcast::<T>().ok())
            .collect()
    }

    /// Entities of type `T` matching `args` in the named index.
    ///
    /// Passing fewer arguments than the index takes performs a prefix search,
    /// which only compound and custom indices support.
    ///
    /// # Panics
    ///
    /// Panics if the kind is not registered, the index does not exist, or
    /// the argument count does not fit the index.
    #[must_use]
    pub fn search<T: Entity>(&self, index: &str, args: &[&dyn IndexKey]) -> Vec<Arc<T>> {
        self.search_objects(T::kind(), index, args)
            .into_iter()
            .filter_map(|obj| obj.downcast::<T>().ok())
            .collect()
    }

    /// Untyped [`Snapshot::search`].
    ///
    /// # Panics
    ///
    /// See [`Snapshot::search`].
    #[must_use]
    pub fn search_objects(&self, kind: &Kind, index: &str, args: &[&dyn IndexKey]) -> Vec<Object> {
        let table = self.table(kind);
        if index == ID_INDEX {
            assert!(args.len() == 1, "index `{ID_INDEX}` takes 1 argument(s), got {}", args.len());
            // Identity keys are the id bytes plus the string terminator.
            let key = encode_key(args[0], false);
            return key
                .strip_suffix(&[0])
                .and_then(|id| std::str::from_utf8(id).ok())
                .and_then(|id| table.get(id))
                .cloned()
                .into_iter()
                .collect();
        }
        let def = kind
            .index(index)
            .unwrap_or_else(|| panic!("kind `{}` has no index `{index}`", kind.name()));
        table.search(index, &def.lookup(args))
    }

    /// Number of entities of type `T`.
    ///
    /// # Panics
    ///
    /// Panics if `T`'s kind is not registered with the store.
    #[must_use]
    pub fn len<T: Entity>(&self) -> usize {
        self.table(T::kind()).len()
    }

    pub(crate) fn set_ts(&mut self, ts: DateTime<Utc>) {
        self.ts = ts;
    }

    pub(crate) fn table(&self, kind: &Kind) -> &Table {
        self.tables
            .get(kind.name())
            .unwrap_or_else(|| panic!("kind `{}` is not registered with this store", kind.name()))
    }

    pub(crate) fn table_mut(&mut self, kind: &'static Kind) -> Result<&mut Table, StoreError> {
        self.tables
            .get_mut(kind.name())
            .ok_or(StoreError::UnknownKind(kind.name()))
    }
}

impl std::fmt::Debug for Snapshot {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut map = f.debug_map();
        for (name, table) in self.tables.iter() {
            map.entry(name, &table.len());
        }
        map.finish()
    }
}
