use std::sync::{Arc, LazyLock};
use std::time::Duration;

use chrono::{DateTime, Utc};
use replica_schema::{Deadline, Diff, Entity, Field, Kind, Section, Survive};
use replica_wire::{Manifest, MemoryLog, Source, Transaction};
use serde::{Deserialize, Serialize};
use serde_json::Value;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub(crate) struct Lease {
    #[serde(rename = "ID")]
    pub id: String,
    #[serde(rename = "Holder")]
    pub holder: String,
    #[serde(rename = "Expires")]
    pub expires: Option<DateTime<Utc>>,
    #[serde(rename = "Released")]
    pub released: bool,
}

static LEASE: LazyLock<Kind> = LazyLock::new(|| {
    Kind::builder::<Lease>("lease")
        .section(
            Section::new()
                .produced_by("owner")
                .field(Field::identity("id").wire("ID"))
                .field(Field::new("holder").wire("Holder").required())
                .field(Field::new("expires").wire("Expires")),
        )
        .section(
            Section::new()
                .produced_by("owner|janitor")
                .field(Field::new("released").wire("Released")),
        )
        .survives()
        .deadlines()
        .build()
        .expect("lease kind")
});

impl Entity for Lease {
    fn kind() -> &'static Kind {
        &LEASE
    }

    fn id(&self) -> &str {
        &self.id
    }
}

impl Survive for Lease {
    fn survive(&self) -> bool {
        !self.released
    }
}

impl Deadline for Lease {
    fn deadline(&self, now: DateTime<Utc>) -> Option<DateTime<Utc>> {
        self.expires.filter(|at| *at > now)
    }
}

/// Reports its deadline verbatim, past or not.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub(crate) struct Beacon {
    #[serde(rename = "ID")]
    pub id: String,
    #[serde(rename = "At")]
    pub at: Option<DateTime<Utc>>,
}

static BEACON: LazyLock<Kind> = LazyLock::new(|| {
    Kind::builder::<Beacon>("beacon")
        .section(
            Section::new()
                .field(Field::identity("id").wire("ID"))
                .field(Field::new("at").wire("At")),
        )
        .deadlines()
        .build()
        .expect("beacon kind")
});

impl Entity for Beacon {
    fn kind() -> &'static Kind {
        &BEACON
    }

    fn id(&self) -> &str {
        &self.id
    }
}

impl Deadline for Beacon {
    fn deadline(&self, _now: DateTime<Utc>) -> Option<DateTime<Utc>> {
        self.at
    }
}

/// Unowned identity, one field per producer.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub(crate) struct Split {
    #[serde(rename = "ID")]
    pub id: String,
    #[serde(rename = "A")]
    pub a: i64,
    #[serde(rename = "B")]
    pub b: i64,
}

static SPLIT: LazyLock<Kind> = LazyLock::new(|| {
    Kind::builder::<Split>("split")
        .section(Section::new().field(Field::identity("id").wire("ID")))
        .section(Section::new().produced_by("a").field(Field::new("a").wire("A")))
        .section(Section::new().produced_by("b").field(Field::new("b").wire("B")))
        .build()
        .expect("split kind")
});

impl Entity for Split {
    fn kind() -> &'static Kind {
        &SPLIT
    }

    fn id(&self) -> &str {
        &self.id
    }
}

pub(crate) const VERSION: &str = "v1";

pub(crate) const PATIENCE: Duration = Duration::from_secs(5);

pub(crate) fn log() -> Arc<MemoryLog> {
    MemoryLog::new(Manifest::new(VERSION, "topic-a"))
}

pub(crate) fn diff(value: Value) -> Diff {
    match value {
        Value::Object(map) => map.into_iter().collect(),
        other => panic!("not an object: {other}"),
    }
}

/// A one-entity transaction from `producer` with a fixed foreign instance.
pub(crate) fn txn(producer: &str, kind: &str, id: &str, value: Value) -> Transaction {
    Transaction::new(Source::new(producer, "elsewhere"), 7).with_change(kind, id, diff(value))
}
