//! Replica configuration.

use std::sync::Arc;

use replica_schema::{Eid, Entity, Kind};
use replica_store::{Snapshot, Transaction};
use replica_wire::{Connection, Position, Source};
use tokio::sync::mpsc;
use uuid::Uuid;

/// The application's reaction to a batch of changed or due entities.
///
/// Called on the reactor task with the live-edge write transaction and the
/// addresses of every pending entity that still exists.
pub type Reaction = Box<dyn FnMut(&mut Transaction, &[Eid]) -> anyhow::Result<()> + Send>;

/// Configuration for one replica.
pub struct DbConfig {
    /// Database versions this replica understands, in preference order.
    pub versions: Vec<String>,
    /// The log connection.
    pub connection: Arc<dyn Connection>,
    /// Kinds to replicate. Diffs for other kinds are ignored.
    pub kinds: Vec<&'static Kind>,
    /// Optional reaction callback.
    pub reaction: Option<Reaction>,
    /// Local writer identity. `None` makes the replica read-only.
    pub source: Option<Source>,
    /// Session override; a random one is drawn when `None`.
    pub session: Option<i64>,
    /// Where to start reading the log.
    pub resume: Position,
    /// Receives every committed snapshot.
    pub observer: Option<mpsc::UnboundedSender<Snapshot>>,
}

impl DbConfig {
    /// A read-only configuration tracking nothing, reading from the
    /// beginning of history.
    #[must_use]
    pub fn new<I, S>(versions: I, connection: Arc<dyn Connection>) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            versions: versions.into_iter().map(Into::into).collect(),
            connection,
            kinds: Vec::new(),
            reaction: None,
            source: None,
            session: None,
            resume: Position::beginning(),
            observer: None,
        }
    }

    /// Track a kind.
    #[must_use]
    pub fn track(mut self, kind: &'static Kind) -> Self {
        self.kinds.push(kind);
        self
    }

    /// Track entity type `T`.
    #[must_use]
    pub fn track_entity<T: Entity>(self) -> Self {
        self.track(T::kind())
    }

    /// Install the reaction callback.
    #[must_use]
    pub fn with_reaction<F>(mut self, reaction: F) -> Self
    where
        F: FnMut(&mut Transaction, &[Eid]) -> anyhow::Result<()> + Send + 'static,
    {
        self.reaction = Some(Box::new(reaction));
        self
    }

    /// Write as `producer`, with a fresh random instance id.
    #[must_use]
    pub fn with_source(self, producer: impl Into<String>) -> Self {
        self.with_identity(Source::new(producer, Uuid::new_v4().to_string()))
    }

    /// Write with an explicit source.
    #[must_use]
    pub fn with_identity(mut self, source: Source) -> Self {
        self.source = Some(source);
        self
    }

    /// Override the session.
    #[must_use]
    pub fn with_session(mut self, session: i64) -> Self {
        self.session = Some(session);
        self
    }

    /// Resume reading the log at `position`.
    #[must_use]
    pub fn resume_from(mut self, position: Position) -> Self {
        self.resume = position;
        self
    }

    /// Send every committed snapshot to `observer`.
    #[must_use]
    pub fn with_observer(mut self, observer: mpsc::UnboundedSender<Snapshot>) -> Self {
        self.observer = Some(observer);
        self
    }
}

impl std::fmt::Debug for DbConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DbConfig")
            .field("versions", &self.versions)
            .field("kinds", &self.kinds.iter().map(|k| k.name()).collect::<Vec<_>>())
            .field("reaction", &self.reaction.is_some())
            .field("source", &self.source)
            .field("session", &self.session)
            .field("resume", &self.resume)
            .field("observer", &self.observer.is_some())
            .finish_non_exhaustive()
    }
}

/// A random, non-negative session number.
pub(crate) fn random_session() -> i64 {
    ((Uuid::new_v4().as_u128() as u64) >> 1) as i64
}
