//! Write transactions.
//!
//! A [`Transaction`] is what user code sees: the store's read API over a
//! private working state, plus `set` and `annotate`. The creator holds a
//! [`TransactionControl`], which additionally commits, cancels, resets and
//! exposes the change-set. At most one `TransactionControl` exists per store
//! at a time; it owns the store's writer lock until it is dropped.

use std::collections::BTreeMap;
use std::collections::btree_map::Entry;
use std::ops::{Deref, DerefMut};
use std::sync::Arc;

use chrono::Utc;
use parking_lot::RwLock;
use replica_schema::{Eid, Entity, IndexKey, Kind, Object};
use tokio::sync::OwnedMutexGuard;
use tracing::debug;

use crate::error::StoreError;
use crate::snapshot::Snapshot;

/// One entity's change within a transaction.
#[derive(Clone)]
pub struct Change {
    /// The object as of [`Transaction::before`]; `None` if it is new.
    pub before: Option<Object>,
    /// The object as now written.
    pub after: Object,
}

impl std::fmt::Debug for Change {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Change")
            .field("created", &self.before.is_none())
            .finish_non_exhaustive()
    }
}

/// A write transaction's user-facing surface.
pub struct Transaction {
    before: Snapshot,
    work: Snapshot,
    changes: BTreeMap<Eid, Change>,
    annotations: BTreeMap<String, String>,
}

impl Transaction {
    pub(crate) fn new(before: Snapshot) -> Self {
        let mut work = before.clone();
        work.set_ts(Utc::now());
        Self {
            before,
            work,
            changes: BTreeMap::new(),
            annotations: BTreeMap::new(),
        }
    }

    /// The state the transaction started from.
    #[must_use]
    pub fn before(&self) -> &Snapshot {
        &self.before
    }

    /// Detach the current working state as an independent snapshot.
    #[must_use]
    pub fn snapshot(&self) -> Snapshot {
        self.work.clone()
    }

    /// See [`Snapshot::ts`].
    #[must_use]
    pub fn ts(&self) -> chrono::DateTime<Utc> {
        self.work.ts()
    }

    /// See [`Snapshot::get`].
    #[must_use]
    pub fn get<T: Entity>(&self, id: &str) -> Option<Arc<T>> {
        self.work.get(id)
    }

    /// See [`Snapshot::get_object`].
    #[must_use]
    pub fn get_object(&self, eid: &Eid) -> Option<Object> {
        self.work.get_object(eid)
    }

    /// See [`Snapshot::all`].
    #[must_use]
    pub fn all<T: Entity>(&self) -> Vec<Arc<T>> {
        self.work.all()
    }

    /// See [`Snapshot::search`].
    #[must_use]
    pub fn search<T: Entity>(&self, index: &str, args: &[&dyn IndexKey]) -> Vec<Arc<T>> {
        self.work.search(index, args)
    }

    /// See [`Snapshot::len`].
    #[must_use]
    pub fn len<T: Entity>(&self) -> usize {
        self.work.len::<T>()
    }

    /// Insert or replace an entity.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] if the kind is unregistered, the identity is
    /// empty, or a unique index already holds one of the entity's keys.
    pub fn set<T: Entity>(&mut self, obj: T) -> Result<(), StoreError> {
        self.put(T::kind(), Arc::new(obj)).map(drop)
    }

    /// Attach a key/value note to the transaction.
    ///
    /// Annotating the same key with the same value again is a no-op.
    ///
    /// # Panics
    ///
    /// Panics if `key` already carries a different value.
    pub fn annotate(&mut self, key: impl Into<String>, value: impl Into<String>) {
        let value = value.into();
        match self.annotations.entry(key.into()) {
            Entry::Vacant(slot) => {
                slot.insert(value);
            }
            Entry::Occupied(slot) => {
                assert!(
                    *slot.get() == value,
                    "annotation `{}` already set to {:?}, refusing {:?}",
                    slot.key(),
                    slot.get(),
                    value
                );
            }
        }
    }

    fn put(&mut self, kind: &'static Kind, obj: Object) -> Result<Eid, StoreError> {
        if !kind.is_instance(&*obj) {
            return Err(StoreError::WrongType(kind.name()));
        }
        let id = match kind.id_of(&*obj) {
            Some(id) if !id.is_empty() => id.to_string(),
            _ => return Err(StoreError::EmptyIdentity { kind: kind.name() }),
        };
        self.work.table_mut(kind)?.insert(kind, &id, obj.clone())?;

        let eid = Eid::new(kind.name(), id);
        match self.changes.entry(eid.clone()) {
            Entry::Vacant(slot) => {
                slot.insert(Change {
                    before: self.before.get_object(&eid),
                    after: obj,
                });
            }
            Entry::Occupied(mut slot) => slot.get_mut().after = obj,
        }
        Ok(eid)
    }
}

/// The creator's handle on a write transaction.
///
/// Dropping it without calling [`TransactionControl::commit`] discards every
/// change.
pub struct TransactionControl {
    txn: Transaction,
    head: Arc<RwLock<Snapshot>>,
    _writer: OwnedMutexGuard<()>,
}

impl TransactionControl {
    pub(crate) fn new(head: Arc<RwLock<Snapshot>>, writer: OwnedMutexGuard<()>) -> Self {
        let before = head.read().clone();
        Self {
            txn: Transaction::new(before),
            head,
            _writer: writer,
        }
    }

    /// Publish the working state as the store's new head and release the
    /// writer lock.
    pub fn commit(self) -> Snapshot {
        let snapshot = self.txn.work;
        *self.head.write() = snapshot.clone();
        debug!(
            changes = self.txn.changes.len(),
            ts = %snapshot.ts(),
            "transaction committed"
        );
        snapshot
    }

    /// Discard every change and release the writer lock.
    pub fn cancel(self) {
        debug!(changes = self.txn.changes.len(), "transaction cancelled");
    }

    /// Treat the current working state as the new starting point.
    ///
    /// Clears the change-set and annotations and re-timestamps the working
    /// state; nothing already written is undone.
    pub fn reset(&mut self) {
        self.txn.work.set_ts(Utc::now());
        self.txn.before = self.txn.work.clone();
        self.txn.changes.clear();
        self.txn.annotations.clear();
    }

    /// Remove an entity from the working state without recording a change.
    ///
    /// Returns `true` if the entity existed.
    pub fn prune(&mut self, eid: &Eid) -> bool {
        self.txn.changes.remove(eid);
        let Some(kind) = self.txn.work.kind(eid.kind()) else {
            return false;
        };
        match self.txn.work.table_mut(kind) {
            Ok(table) => table.remove(kind, eid.id()).is_some(),
            Err(_) => false,
        }
    }

    /// Read an entity by address without knowing its type.
    #[must_use]
    pub fn get_raw(&self, eid: &Eid) -> Option<Object> {
        self.txn.work.get_object(eid)
    }

    /// Insert or replace an already type-erased entity.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::WrongType`] if `obj` is not an instance of
    /// `kind`, plus everything [`Transaction::set`] can return.
    pub fn set_raw(&mut self, kind: &'static Kind, obj: Object) -> Result<Eid, StoreError> {
        self.txn.put(kind, obj)
    }

    /// Entities written since the transaction began or was last reset.
    #[must_use]
    pub fn changes(&self) -> &BTreeMap<Eid, Change> {
        &self.txn.changes
    }

    /// Annotations attached since the transaction began or was last reset.
    #[must_use]
    pub fn annotations(&self) -> &BTreeMap<String, String> {
        &self.txn.annotations
    }
}

impl Deref for TransactionControl {
    type Target = Transaction;

    fn deref(&self) -> &Transaction {
        &self.txn
    }
}

impl DerefMut for TransactionControl {
    fn deref_mut(&mut self) -> &mut Transaction {
        &mut self.txn
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use replica_schema::Entity;

    use super::*;
    use crate::Store;
    use crate::fixtures::{Host, host};

    async fn seeded() -> Store {
        let store = Store::new([Host::kind()]).unwrap();
        let mut txn = store.begin().await;
        txn.set(host("h1", "Alpha", "eu", 80)).unwrap();
        txn.commit();
        store
    }

    #[tokio::test]
    async fn test_reads_see_own_writes_but_before_does_not() {
        let store = seeded().await;
        let mut txn = store.begin().await;
        txn.set(host("h2", "Beta", "eu", 1)).unwrap();
        assert!(txn.get::<Host>("h2").is_some());
        assert!(txn.before().get::<Host>("h2").is_none());
        assert_eq!(txn.len::<Host>(), 2);

        let detached = txn.snapshot();
        txn.set(host("h3", "Gamma", "eu", 2)).unwrap();
        assert!(detached.get::<Host>("h3").is_none());
    }

    #[tokio::test]
    async fn test_changes_record_original_before() {
        let store = seeded().await;
        let mut txn = store.begin().await;
        txn.set(host("h1", "Alpha", "eu", 81)).unwrap();
        txn.set(host("h1", "Alpha", "eu", 82)).unwrap();
        txn.set(host("h2", "Beta", "eu", 1)).unwrap();

        let changes = txn.changes();
        assert_eq!(changes.len(), 2);

        let h1 = &changes[&Eid::of::<Host>("h1")];
        let before = h1.before.clone().unwrap().downcast::<Host>().unwrap();
        let after = h1.after.clone().downcast::<Host>().unwrap();
        assert_eq!(before.port, 80);
        assert_eq!(after.port, 82);
        assert!(changes[&Eid::of::<Host>("h2")].before.is_none());
    }

    #[tokio::test]
    async fn test_annotate_same_value_is_noop() {
        let store = seeded().await;
        let mut txn = store.begin().await;
        txn.annotate("reason", "rotation");
        txn.annotate("reason", "rotation");
        assert_eq!(txn.annotations().len(), 1);
        assert_eq!(txn.annotations()["reason"], "rotation");
    }

    #[tokio::test]
    #[should_panic(expected = "already set")]
    async fn test_annotate_conflict_panics() {
        let store = seeded().await;
        let mut txn = store.begin().await;
        txn.annotate("reason", "rotation");
        txn.annotate("reason", "expiry");
    }

    #[tokio::test]
    async fn test_reset_rebases() {
        let store = seeded().await;
        let mut txn = store.begin().await;
        txn.set(host("h2", "Beta", "eu", 1)).unwrap();
        txn.annotate("k", "v");
        let ts = txn.ts();

        txn.reset();
        assert!(txn.changes().is_empty());
        assert!(txn.annotations().is_empty());
        assert!(txn.before().get::<Host>("h2").is_some());
        assert!(txn.ts() >= ts);

        // After a reset, diffs are relative to the rebased state.
        txn.set(host("h2", "Beta", "eu", 2)).unwrap();
        assert!(txn.changes()[&Eid::of::<Host>("h2")].before.is_some());

        // Annotations may take a new value after a reset.
        txn.annotate("k", "w");
    }

    #[tokio::test]
    async fn test_prune_removes_row_indexes_and_change() {
        let store = seeded().await;
        let mut txn = store.begin().await;
        txn.set(host("h1", "Alpha", "eu", 99)).unwrap();

        assert!(txn.prune(&Eid::of::<Host>("h1")));
        assert!(txn.get::<Host>("h1").is_none());
        assert!(txn.search::<Host>("by_zone", &[&"eu"]).is_empty());
        assert!(txn.changes().is_empty());
        assert!(!txn.prune(&Eid::of::<Host>("h1")));
        assert!(!txn.prune(&Eid::new("ghost", "x")));

        let snap = txn.commit();
        assert_eq!(snap.len::<Host>(), 0);
        // The name is free again.
        let mut txn = store.begin().await;
        txn.set(host("h9", "alpha", "us", 1)).unwrap();
    }

    #[tokio::test]
    async fn test_raw_access() {
        let store = seeded().await;
        let mut txn = store.begin().await;

        let eid = txn
            .set_raw(Host::kind(), Arc::new(host("h2", "Beta", "eu", 1)))
            .unwrap();
        assert_eq!(eid, Eid::of::<Host>("h2"));
        assert!(txn.get_raw(&eid).is_some());

        assert!(matches!(
            txn.set_raw(Host::kind(), Arc::new(42u32)),
            Err(StoreError::WrongType("host"))
        ));
        assert!(matches!(
            txn.set_raw(Host::kind(), Arc::new(host("", "Nameless", "eu", 1))),
            Err(StoreError::EmptyIdentity { kind: "host" })
        ));
    }
}
