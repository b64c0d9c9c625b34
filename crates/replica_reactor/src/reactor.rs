//! The reactor: the single task that applies the log to the local store.
//!
//! The loop multiplexes three event sources:
//!
//! 1. Incoming transactions from the connection's reader, decoded and
//!    applied to an open write transaction that stays open across a
//!    catch-up batch.
//! 2. The live-edge marker, on which the open transaction is committed and
//!    the reaction runs over everything that changed since the last edge.
//! 3. Deadline fires from the [`Scheduler`](crate::Scheduler), which queue
//!    entities for the next reaction.

use std::collections::BTreeSet;
use std::sync::Arc;

use replica_schema::{Diff, Eid, Kind, authorize, decode};
use replica_store::TransactionControl;
use replica_wire::{IncomingTransaction, WireError};
use tokio::sync::mpsc;
use tracing::{debug, error, info, trace};

use crate::config::Reaction;
use crate::db::Shared;
use crate::error::DbError;

/// Capacity of the channel between the connection reader and the reactor.
pub const MAILBOX_CAPACITY: usize = 64;

/// Drives a replica. Obtained from [`Db::open`](crate::Db::open).
///
/// Dropping the reactor, or the future returned by [`Reactor::run`], stops
/// the replica: readiness turns to `Failed` or `Stopped` and every pending
/// deadline is cancelled.
pub struct Reactor {
    shared: Arc<Shared>,
    versions: Vec<String>,
    reaction: Option<Reaction>,
    /// Open write transaction, kept across a catch-up batch.
    txn: Option<TransactionControl>,
    /// Entities owed a reaction at the next live edge.
    pending: BTreeSet<Eid>,
    at_edge: bool,
}

impl Reactor {
    pub(crate) fn new(shared: Arc<Shared>, versions: Vec<String>, reaction: Option<Reaction>) -> Self {
        Self {
            shared,
            versions,
            reaction,
            txn: None,
            pending: BTreeSet::new(),
            at_edge: false,
        }
    }

    /// Run until the connection ends or an unrecoverable error occurs.
    ///
    /// Ordering: history is applied strictly in log order; fires that arrive
    /// during catch-up wait for the live edge.
    ///
    /// # Errors
    ///
    /// Every error is fatal to the replica. [`DbError::is_mismatch`] tells
    /// the supervisor whether to restart from fresh coordinates.
    pub async fn run(mut self) -> Result<(), DbError> {
        let (sink, mut mailbox) = mpsc::channel(MAILBOX_CAPACITY);
        let connection = Arc::clone(&self.shared.connection);
        let versions = std::mem::take(&mut self.versions);
        let from = self.shared.position();
        info!(%from, ?versions, "reactor starting");

        let reader = connection.run(&versions, from, sink);
        tokio::pin!(reader);
        let mut finished: Option<Result<(), WireError>> = None;

        loop {
            tokio::select! {
                biased;

                message = mailbox.recv() => match message {
                    Some(Some(incoming)) => self.apply(incoming).await?,
                    Some(None) => self.live_edge().await?,
                    None => {
                        let result = match finished.take() {
                            Some(result) => result,
                            None => reader.as_mut().await,
                        };
                        return self.stop(result);
                    }
                },

                result = reader.as_mut(), if finished.is_none() => {
                    // Drain what the reader already sent before acting on it.
                    finished = Some(result);
                }

                () = self.shared.scheduler.wait() => {
                    let fired = self.shared.scheduler.get();
                    debug!(count = fired.len(), "deadlines fired");
                    self.pending.extend(fired);
                    if self.at_edge {
                        self.live_edge().await?;
                    }
                }
            }
        }
    }

    fn stop(&self, result: Result<(), WireError>) -> Result<(), DbError> {
        match result {
            Ok(()) => {
                info!(position = %self.shared.position(), "connection closed");
                Ok(())
            }
            Err(err) => {
                error!(error = %err, mismatch = err.is_mismatch(), "connection failed");
                Err(err.into())
            }
        }
    }

    /// Apply one incoming transaction to the open write transaction.
    async fn apply(&mut self, incoming: IncomingTransaction) -> Result<(), DbError> {
        let IncomingTransaction { transaction, position } = incoming;
        self.shared.set_position(position);
        self.at_edge = false;

        if self.shared.is_echo(&transaction) {
            trace!(%position, "skipping own transaction");
            return Ok(());
        }

        let tracked: Vec<(&'static Kind, &str, &Diff)> = transaction
            .diffs()
            .filter_map(|(kind, id, diff)| Some((self.shared.store.kind(kind)?, id, diff)))
            .collect();
        if tracked.is_empty() {
            return Ok(());
        }

        let mut control = match self.txn.take() {
            Some(control) => control,
            None => self.shared.store.begin().await,
        };
        let producer = transaction.source.producer.as_str();
        for (kind, id, diff) in tracked {
            let eid = Eid::new(kind.name(), id);
            let existing = control.get_raw(&eid);
            if existing.is_none() && !diff.contains_key(kind.identity().wire_name()) {
                // A diff for an entity pruned earlier, or never seen.
                trace!(%eid, "dropping diff for unknown entity");
                continue;
            }

            let codec = |err| DbError::Codec {
                eid: eid.clone(),
                source: err,
            };
            let Some(obj) = decode(kind, existing.as_deref(), diff, authorize(producer)).map_err(codec)?
            else {
                continue;
            };
            kind.check_required(&*obj).map_err(codec)?;
            if kind.id_of(&*obj) != Some(id) {
                return Err(DbError::IdentityMismatch {
                    found: kind.id_of(&*obj).unwrap_or_default().to_string(),
                    eid,
                });
            }

            if !kind.survives(&*obj) && existing.is_none() {
                trace!(%eid, "ignoring entity that is already dead");
                continue;
            }
            // Entities that just stopped surviving are stored anyway; the
            // next live edge gives them a final reaction and prunes them.
            control.set_raw(kind, obj)?;
            self.pending.insert(eid);
        }
        self.txn = Some(control);
        trace!(%position, pending = self.pending.len(), "transaction applied");
        Ok(())
    }

    /// Commit what catch-up accumulated and react to it.
    async fn live_edge(&mut self) -> Result<(), DbError> {
        self.at_edge = true;

        if self.pending.is_empty() {
            if let Some(control) = self.txn.take() {
                let snapshot = control.commit();
                self.shared.observe(&snapshot);
            }
        } else {
            let mut control = match self.txn.take() {
                Some(control) => control,
                None => self.shared.store.begin().await,
            };
            // Incoming changes are already on the wire; only the reaction's
            // own writes go out.
            control.reset();

            let mut touched = std::mem::take(&mut self.pending);
            let batch: Vec<Eid> = touched
                .iter()
                .filter(|eid| control.get_raw(eid).is_some())
                .cloned()
                .collect();
            if !batch.is_empty()
                && let Some(reaction) = self.reaction.as_mut()
            {
                debug!(entities = batch.len(), "reacting");
                reaction(&mut *control, &batch).map_err(DbError::Callback)?;
            }
            touched.extend(control.changes().keys().cloned());
            self.shared.finish(control, &touched).await?;
        }

        self.shared.mark_ready();
        Ok(())
    }
}

impl Drop for Reactor {
    fn drop(&mut self) {
        self.shared.scheduler.clear();
        self.shared.mark_stopped();
    }
}

impl std::fmt::Debug for Reactor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Reactor")
            .field("pending", &self.pending.len())
            .field("open", &self.txn.is_some())
            .field("at_edge", &self.at_edge)
            .finish_non_exhaustive()
    }
}
