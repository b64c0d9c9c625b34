//! The replicated `lease` entity.

use std::sync::LazyLock;

use chrono::{DateTime, Utc};
use replica_schema::{Deadline, Entity, Field, FieldIndex, Kind, Section, Survive};
use serde::{Deserialize, Serialize};

/// A time-limited claim on a named resource.
///
/// The `owner` producer grants leases; the `janitor` producer releases them
/// once they expire.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Lease {
    #[serde(rename = "ID")]
    pub id: String,
    #[serde(rename = "Resource")]
    pub resource: String,
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
                .field(Field::new("resource").wire("Resource").constant().required())
                .field(Field::new("holder").wire("Holder").required())
                .field(Field::new("expires").wire("Expires")),
        )
        .section(
            Section::new()
                .produced_by("janitor")
                .field(Field::new("released").wire("Released")),
        )
        .index("by_holder", FieldIndex::new(|l: &Lease| l.holder.clone()))
        .survives()
        .deadlines()
        .build()
        .expect("lease kind is well-formed")
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

impl Lease {
    /// Whether the lease has run out at `now`.
    #[must_use]
    pub fn expired(&self, now: DateTime<Utc>) -> bool {
        self.expires.is_some_and(|at| at <= now)
    }
}
