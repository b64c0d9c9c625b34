//! The replica handle.
//!
//! [`Db::open`] splits a configured replica into a cloneable [`Db`] handle,
//! used for reads and local transactions from any task, and the [`Reactor`]
//! that must be driven to keep it in step with the log.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use chrono::Utc;
use parking_lot::Mutex;
use replica_schema::{Eid, authorize, encode, permit_all};
use replica_store::{Snapshot, Store, Transaction, TransactionControl};
use replica_wire::{Connection, Position, Source};
use serde_json::Value;
use tokio::sync::{mpsc, watch};
use tracing::{debug, info};

use crate::config::{DbConfig, random_session};
use crate::error::DbError;
use crate::reactor::Reactor;
use crate::scheduler::Scheduler;

/// Where the replica stands relative to the log.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Readiness {
    /// Replaying history; local transactions are refused.
    CatchingUp,
    /// Reached the live edge at least once.
    Ready,
    /// Stopped before ever reaching the live edge.
    Failed,
    /// Stopped after having been ready.
    Stopped,
}

/// State shared between the [`Db`] handles and the [`Reactor`].
pub(crate) struct Shared {
    pub(crate) store: Store,
    pub(crate) connection: Arc<dyn Connection>,
    pub(crate) scheduler: Scheduler,
    source: Option<Source>,
    session: i64,
    readiness: watch::Sender<Readiness>,
    position: Mutex<Position>,
    observer: Option<mpsc::UnboundedSender<Snapshot>>,
}

impl Shared {
    pub(crate) fn position(&self) -> Position {
        *self.position.lock()
    }

    pub(crate) fn set_position(&self, position: Position) {
        *self.position.lock() = position;
    }

    /// Whether `txn` was written by this very process.
    pub(crate) fn is_echo(&self, txn: &replica_wire::Transaction) -> bool {
        self.source
            .as_ref()
            .is_some_and(|source| txn.is_from(source, self.session))
    }

    pub(crate) fn mark_ready(&self) {
        let flipped = self.readiness.send_if_modified(|state| {
            if *state == Readiness::CatchingUp {
                *state = Readiness::Ready;
                true
            } else {
                false
            }
        });
        if flipped {
            info!(position = %self.position(), "replica ready");
        }
    }

    pub(crate) fn mark_stopped(&self) {
        self.readiness.send_if_modified(|state| {
            let next = match *state {
                Readiness::CatchingUp => Readiness::Failed,
                Readiness::Ready => Readiness::Stopped,
                other => other,
            };
            let changed = next != *state;
            *state = next;
            changed
        });
    }

    pub(crate) fn observe(&self, snapshot: &Snapshot) {
        if let Some(observer) = &self.observer
            && observer.send(snapshot.clone()).is_err()
        {
            debug!("snapshot observer dropped");
        }
    }

    /// Submit the transaction's outgoing changes, re-evaluate liveness and
    /// deadlines for `touched`, and commit.
    pub(crate) async fn finish(
        &self,
        mut control: TransactionControl,
        touched: &BTreeSet<Eid>,
    ) -> Result<Snapshot, DbError> {
        if let Some(txn) = self.outgoing(&control)? {
            let entities: usize = txn.changes.values().map(BTreeMap::len).sum();
            self.connection.submit(&txn).await?;
            info!(entities, session = self.session, "transaction submitted");
        }
        self.settle(&mut control, touched)?;
        let snapshot = control.commit();
        self.observe(&snapshot);
        Ok(snapshot)
    }

    /// Diff every change in `control` into one wire transaction.
    fn outgoing(&self, control: &TransactionControl) -> Result<Option<replica_wire::Transaction>, DbError> {
        let Some(source) = &self.source else {
            for (eid, change) in control.changes() {
                let kind = self.kind_of(eid)?;
                let diff = encode(kind, change.before.as_deref(), &*change.after, permit_all)
                    .map_err(|source| DbError::Codec {
                        eid: eid.clone(),
                        source,
                    })?;
                if diff.is_some() {
                    return Err(DbError::ReadOnly);
                }
            }
            return Ok(None);
        };

        let mut txn = replica_wire::Transaction::new(source.clone(), self.session);
        for (eid, change) in control.changes() {
            let kind = self.kind_of(eid)?;
            let codec = |err| DbError::Codec {
                eid: eid.clone(),
                source: err,
            };
            kind.check_required(&*change.after).map_err(codec)?;
            let diff = encode(
                kind,
                change.before.as_deref(),
                &*change.after,
                authorize(&source.producer),
            )
            .map_err(codec)?;
            if let Some(diff) = diff {
                txn.insert(eid.kind(), eid.id(), diff);
            }
        }
        if txn.is_empty() {
            return Ok(None);
        }
        if !control.annotations().is_empty() {
            let audit = control
                .annotations()
                .iter()
                .map(|(key, value)| (key.clone(), Value::String(value.clone())))
                .collect();
            txn.audit = Some(Value::Object(audit));
        }
        Ok(Some(txn))
    }

    /// Prune entities that no longer survive; re-arm deadlines for the rest.
    fn settle(&self, control: &mut TransactionControl, touched: &BTreeSet<Eid>) -> Result<(), DbError> {
        let now = Utc::now();
        for eid in touched {
            let Some(obj) = control.get_raw(eid) else {
                self.scheduler.schedule(eid.clone(), None);
                continue;
            };
            let kind = self.kind_of(eid)?;
            if !kind.survives(&*obj) {
                control.prune(eid);
                self.scheduler.schedule(eid.clone(), None);
                info!(%eid, "entity pruned");
                continue;
            }
            let deadline = kind.deadline(&*obj, now);
            if let Some(deadline) = deadline
                && deadline < now
            {
                return Err(DbError::DeadlineInPast {
                    eid: eid.clone(),
                    deadline,
                    now,
                });
            }
            self.scheduler.schedule(eid.clone(), deadline);
        }
        Ok(())
    }

    fn kind_of(&self, eid: &Eid) -> Result<&'static replica_schema::Kind, DbError> {
        self.store
            .kind(eid.kind())
            .ok_or(DbError::Store(replica_store::StoreError::UnknownKind(eid.kind())))
    }
}

/// A handle on a local replica.
///
/// Cheap to clone; every clone addresses the same replica.
#[derive(Clone)]
pub struct Db {
    shared: Arc<Shared>,
}

impl Db {
    /// Build a replica from `config`.
    ///
    /// Nothing happens until the returned [`Reactor`] is run.
    ///
    /// # Errors
    ///
    /// Returns [`DbError::Store`] if two tracked kinds share a name.
    pub fn open(config: DbConfig) -> Result<(Self, Reactor), DbError> {
        let DbConfig {
            versions,
            connection,
            kinds,
            reaction,
            source,
            session,
            resume,
            observer,
        } = config;

        let store = Store::new(kinds)?;
        let session = session.unwrap_or_else(random_session);
        info!(
            producer = source.as_ref().map(|s| s.producer.as_str()),
            instance = source.as_ref().map(|s| s.instance.as_str()),
            session,
            %resume,
            "replica opened"
        );

        let shared = Arc::new(Shared {
            store,
            connection,
            scheduler: Scheduler::new(),
            source,
            session,
            readiness: watch::Sender::new(Readiness::CatchingUp),
            position: Mutex::new(resume),
            observer,
        });
        let reactor = Reactor::new(Arc::clone(&shared), versions, reaction);
        Ok((Self { shared }, reactor))
    }

    /// The latest committed state.
    #[must_use]
    pub fn snapshot(&self) -> Snapshot {
        self.shared.store.snapshot()
    }

    /// The current readiness.
    #[must_use]
    pub fn readiness(&self) -> Readiness {
        *self.shared.readiness.borrow()
    }

    /// Wait until the replica has caught up with the log.
    ///
    /// # Errors
    ///
    /// Returns [`DbError::Stopped`] if the reactor stopped first.
    pub async fn ready(&self) -> Result<(), DbError> {
        let mut readiness = self.shared.readiness.subscribe();
        let state = *readiness
            .wait_for(|state| *state != Readiness::CatchingUp)
            .await
            .map_err(|_| DbError::Stopped)?;
        match state {
            Readiness::Ready => Ok(()),
            _ => Err(DbError::Stopped),
        }
    }

    /// Position just after the last log entry the reactor received.
    #[must_use]
    pub fn position(&self) -> Position {
        self.shared.position()
    }

    /// The local writer identity, if any.
    #[must_use]
    pub fn source(&self) -> Option<&Source> {
        self.shared.source.as_ref()
    }

    /// This process's session.
    #[must_use]
    pub fn session(&self) -> i64 {
        self.shared.session
    }

    /// Run `body` in a local write transaction and submit its changes.
    ///
    /// # Errors
    ///
    /// See [`Db::try_transact`].
    pub async fn transact<F>(&self, body: F) -> Result<Snapshot, DbError>
    where
        F: FnOnce(&mut Transaction),
    {
        self.try_transact(|txn| {
            body(txn);
            Ok(())
        })
        .await
    }

    /// Run a fallible `body` in a local write transaction and submit its
    /// changes.
    ///
    /// Waits for any other write transaction (including the reactor's) to
    /// finish first. Changes are authorized against the local producer;
    /// touched entities then have liveness and deadlines re-evaluated. An
    /// error from `body` discards the transaction.
    ///
    /// # Errors
    ///
    /// Returns [`DbError::ReadOnly`] without a local writer identity,
    /// [`DbError::NotReady`] before catch-up, [`DbError::Stopped`] once the
    /// reactor stopped, [`DbError::Callback`] if `body` fails, and codec,
    /// store and wire errors from the commit path.
    pub async fn try_transact<F>(&self, body: F) -> Result<Snapshot, DbError>
    where
        F: FnOnce(&mut Transaction) -> anyhow::Result<()>,
    {
        if self.shared.source.is_none() {
            return Err(DbError::ReadOnly);
        }
        match self.readiness() {
            Readiness::Ready => {}
            Readiness::CatchingUp => return Err(DbError::NotReady),
            Readiness::Failed | Readiness::Stopped => return Err(DbError::Stopped),
        }

        let mut control = self.shared.store.begin().await;
        body(&mut *control).map_err(DbError::Callback)?;
        let touched: BTreeSet<Eid> = control.changes().keys().cloned().collect();
        self.shared.finish(control, &touched).await
    }
}

impl std::fmt::Debug for Db {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Db")
            .field("source", &self.shared.source)
            .field("session", &self.shared.session)
            .field("readiness", &self.readiness())
            .field("position", &self.position())
            .finish()
    }
}
