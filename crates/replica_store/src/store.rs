//! The store handle.

use std::sync::Arc;

use parking_lot::RwLock;
use replica_schema::Kind;
use tokio::sync::Mutex;
use tracing::info;

use crate::error::StoreError;
use crate::snapshot::{Catalog, Snapshot};
use crate::transaction::TransactionControl;

/// An in-memory, indexed, multi-kind entity store.
///
/// Readers take [`Snapshot`]s of the published head and never wait. Writers
/// are serialised: [`Store::begin`] waits for the previous
/// [`TransactionControl`] to be committed or dropped.
///
/// Cloning a `Store` yields another handle on the same data.
#[derive(Clone)]
pub struct Store {
    catalog: Arc<Catalog>,
    head: Arc<RwLock<Snapshot>>,
    writer: Arc<Mutex<()>>,
}

impl Store {
    /// Create an empty store holding the given kinds.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::DuplicateKind`] if two kinds share a name.
    pub fn new(kinds: impl IntoIterator<Item = &'static Kind>) -> Result<Self, StoreError> {
        let catalog = Arc::new(Catalog::new(kinds)?);
        let names: Vec<&str> = catalog.kinds().map(Kind::name).collect();
        info!(kinds = ?names, "store created");
        Ok(Self {
            head: Arc::new(RwLock::new(Snapshot::empty(Arc::clone(&catalog)))),
            catalog,
            writer: Arc::new(Mutex::new(())),
        })
    }

    /// The most recently committed state.
    #[must_use]
    pub fn snapshot(&self) -> Snapshot {
        self.head.read().clone()
    }

    /// Open the write transaction, waiting for any current one to finish.
    pub async fn begin(&self) -> TransactionControl {
        let writer = Arc::clone(&self.writer).lock_owned().await;
        TransactionControl::new(Arc::clone(&self.head), writer)
    }

    /// Open the write transaction if no other is open.
    #[must_use]
    pub fn try_begin(&self) -> Option<TransactionControl> {
        let writer = Arc::clone(&self.writer).try_lock_owned().ok()?;
        Some(TransactionControl::new(Arc::clone(&self.head), writer))
    }

    /// Look up a registered kind by name.
    #[must_use]
    pub fn kind(&self, name: &str) -> Option<&'static Kind> {
        self.catalog.get(name)
    }

    /// Every registered kind, ordered by name.
    pub fn kinds(&self) -> impl Iterator<Item = &'static Kind> + '_ {
        self.catalog.kinds()
    }
}

impl std::fmt::Debug for Store {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Store").field("head", &*self.head.read()).finish()
    }
}
