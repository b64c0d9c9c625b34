use std::sync::LazyLock;

use replica_schema::{CompoundIndex, Entity, Field, FieldIndex, Kind, Section, Unique};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub(crate) struct Host {
    #[serde(rename = "ID")]
    pub id: String,
    #[serde(rename = "Name")]
    pub name: String,
    #[serde(rename = "Zone")]
    pub zone: String,
    #[serde(rename = "Port")]
    pub port: u16,
}

static HOST: LazyLock<Kind> = LazyLock::new(|| {
    Kind::builder::<Host>("host")
        .section(
            Section::new()
                .field(Field::identity("id").wire("ID"))
                .field(Field::new("name").wire("Name"))
                .field(Field::new("zone").wire("Zone"))
                .field(Field::new("port").wire("Port")),
        )
        .index(
            "by_name",
            Unique(
                FieldIndex::new(|h: &Host| h.name.clone())
                    .case_insensitive()
                    .skip_zero(),
            ),
        )
        .index("by_zone", FieldIndex::new(|h: &Host| h.zone.clone()))
        .index(
            "by_zone_port",
            CompoundIndex::new()
                .then(FieldIndex::new(|h: &Host| h.zone.clone()))
                .then(FieldIndex::new(|h: &Host| h.port)),
        )
        .build()
        .expect("host kind")
});

impl Entity for Host {
    fn kind() -> &'static Kind {
        &HOST
    }

    fn id(&self) -> &str {
        &self.id
    }
}

pub(crate) fn host(id: &str, name: &str, zone: &str, port: u16) -> Host {
    Host {
        id: id.to_string(),
        name: name.to_string(),
        zone: zone.to_string(),
        port,
    }
}
