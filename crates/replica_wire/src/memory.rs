//! An in-process log.
//!
//! [`MemoryLog`] holds the history of one database in memory and fans it out
//! to any number of [`MemoryConnection`]s. It stamps append time and assigns
//! positions once, at append, so every reader sees identical values for the
//! same entry. Submitted transactions are encoded to JSON and decoded back,
//! as a network transport would.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use parking_lot::Mutex;
use tokio::sync::watch;
use tracing::{debug, info, warn};

use crate::codec;
use crate::connection::{Connection, Sink};
use crate::error::{Mismatch, WireError};
use crate::manifest::Manifest;
use crate::position::Position;
use crate::transaction::{IncomingTransaction, Transaction};

struct LogState {
    manifest: Manifest,
    generation: u64,
    entries: Vec<IncomingTransaction>,
}

impl LogState {
    fn append(&mut self, mut txn: Transaction) -> Position {
        txn.ts.get_or_insert_with(Utc::now);
        let position = Position::new(self.generation, self.entries.len() as u64 + 1);
        self.entries.push(IncomingTransaction {
            transaction: txn,
            position,
        });
        position
    }

    fn check_version(&self, versions: &[String]) -> Result<(), Mismatch> {
        if self.manifest.supports(versions) {
            Ok(())
        } else {
            Err(Mismatch::Version {
                expected: versions.to_vec(),
                found: self.manifest.version.clone(),
            })
        }
    }
}

/// The shared in-memory log.
pub struct MemoryLog {
    state: Mutex<LogState>,
    revision: watch::Sender<u64>,
}

impl MemoryLog {
    /// Create an empty log at generation zero.
    #[must_use]
    pub fn new(manifest: Manifest) -> Arc<Self> {
        Arc::new(Self {
            state: Mutex::new(LogState {
                manifest,
                generation: 0,
                entries: Vec::new(),
            }),
            revision: watch::Sender::new(0),
        })
    }

    /// Open a new connection to this log.
    #[must_use]
    pub fn connect(self: &Arc<Self>) -> MemoryConnection {
        MemoryConnection {
            log: Arc::clone(self),
            established: watch::Sender::new(None),
        }
    }

    /// The current manifest.
    #[must_use]
    pub fn manifest(&self) -> Manifest {
        self.state.lock().manifest.clone()
    }

    /// The current generation.
    #[must_use]
    pub fn generation(&self) -> u64 {
        self.state.lock().generation
    }

    /// Entries of the current generation.
    #[must_use]
    pub fn entries(&self) -> Vec<IncomingTransaction> {
        self.state.lock().entries.clone()
    }

    /// Append a transaction directly, bypassing any connection.
    pub fn publish(&self, txn: Transaction) -> Position {
        let position = self.state.lock().append(txn);
        debug!(%position, "log entry appended");
        self.bump();
        position
    }

    /// Move the log to a new topic, starting a new, empty generation.
    ///
    /// Readers resuming from a position of an earlier generation get
    /// [`Mismatch::ContinuityBroken`].
    pub fn rotate(&self, topic: impl Into<String>) {
        {
            let mut state = self.state.lock();
            state.generation += 1;
            state.entries.clear();
            state.manifest.topic = topic.into();
            info!(topic = %state.manifest.topic, generation = state.generation, "log rotated");
        }
        self.bump();
    }

    /// Declare a new database version.
    pub fn set_version(&self, version: impl Into<String>) {
        {
            let mut state = self.state.lock();
            state.manifest.version = version.into();
            info!(version = %state.manifest.version, "log version changed");
        }
        self.bump();
    }

    /// Enter or leave maintenance.
    pub fn set_maintenance(&self, maintenance: bool) {
        self.state.lock().manifest.maintenance = maintenance;
        self.bump();
    }

    fn bump(&self) {
        self.revision.send_modify(|revision| *revision += 1);
    }
}

impl std::fmt::Debug for MemoryLog {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.state.lock();
        f.debug_struct("MemoryLog")
            .field("manifest", &state.manifest)
            .field("generation", &state.generation)
            .field("entries", &state.entries.len())
            .finish()
    }
}

/// One reader/writer's view of a [`MemoryLog`].
pub struct MemoryConnection {
    log: Arc<MemoryLog>,
    established: watch::Sender<Option<Vec<String>>>,
}

impl MemoryConnection {
    /// The log this connection reads.
    #[must_use]
    pub fn log(&self) -> &Arc<MemoryLog> {
        &self.log
    }
}

#[async_trait]
impl Connection for MemoryConnection {
    async fn run(&self, versions: &[String], from: Position, sink: Sink) -> Result<(), WireError> {
        let mut revisions = self.log.revision.subscribe();

        let (generation, mut offset) = {
            let state = self.log.state.lock();
            state.check_version(versions)?;
            match from.coordinates() {
                None => (state.generation, 0),
                Some((generation, offset))
                    if generation == state.generation && offset <= state.entries.len() as u64 =>
                {
                    (generation, offset as usize)
                }
                Some(_) => {
                    warn!(%from, generation = state.generation, "resume position rejected");
                    return Err(Mismatch::ContinuityBroken {
                        position: from,
                        generation: state.generation,
                    }
                    .into());
                }
            }
        };
        self.established.send_replace(Some(versions.to_vec()));
        info!(%from, generation, "connection established");

        loop {
            let batch = {
                let state = self.log.state.lock();
                state.check_version(versions)?;
                if state.generation != generation {
                    return Err(Mismatch::ContinuityBroken {
                        position: Position::new(generation, offset as u64),
                        generation: state.generation,
                    }
                    .into());
                }
                state.entries[offset..].to_vec()
            };
            offset += batch.len();

            for txn in batch {
                if sink.send(Some(txn)).await.is_err() {
                    return Ok(());
                }
            }
            if sink.send(None).await.is_err() {
                return Ok(());
            }
            if revisions.changed().await.is_err() {
                return Err(WireError::Closed);
            }
        }
    }

    async fn submit(&self, txn: &Transaction) -> Result<(), WireError> {
        // Submissions cross the connection in their JSON wire form.
        let bytes = codec::encode(txn)?;
        let versions = self
            .established
            .subscribe()
            .wait_for(Option::is_some)
            .await
            .map_err(|_| WireError::Closed)?
            .clone()
            .unwrap_or_default();

        let mut revisions = self.log.revision.subscribe();
        loop {
            let appended = {
                let mut state = self.log.state.lock();
                state.check_version(&versions)?;
                if state.manifest.maintenance {
                    None
                } else {
                    Some(state.append(codec::decode(&bytes)?))
                }
            };
            if let Some(position) = appended {
                debug!(%position, producer = %txn.source.producer, "transaction submitted");
                self.log.bump();
                return Ok(());
            }
            if revisions.changed().await.is_err() {
                return Err(WireError::Closed);
            }
        }
    }
}
