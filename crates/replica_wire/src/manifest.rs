//! The log manifest.

use serde::{Deserialize, Serialize};

/// Points at the active log topic and declares the database version.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Manifest {
    /// Declared schema version.
    #[serde(rename = "Version")]
    pub version: String,
    /// Active log topic.
    #[serde(rename = "Topic")]
    pub topic: String,
    /// Set while the log is under maintenance; appends wait until it clears.
    #[serde(rename = "Maintenance", default, skip_serializing_if = "std::ops::Not::not")]
    pub maintenance: bool,
}

impl Manifest {
    /// A manifest for `topic` at `version`.
    #[must_use]
    pub fn new(version: impl Into<String>, topic: impl Into<String>) -> Self {
        Self {
            version: version.into(),
            topic: topic.into(),
            maintenance: false,
        }
    }

    /// Returns `true` if the declared version is one of `versions`.
    #[must_use]
    pub fn supports(&self, versions: &[String]) -> bool {
        versions.iter().any(|v| *v == self.version)
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn test_manifest_json() {
        let manifest = Manifest::new("v2", "replica.v2.0");
        assert_eq!(
            serde_json::to_value(&manifest).unwrap(),
            json!({"Version": "v2", "Topic": "replica.v2.0"})
        );
        let busy: Manifest =
            serde_json::from_value(json!({"Version": "v2", "Topic": "t", "Maintenance": true})).unwrap();
        assert!(busy.maintenance);
    }

    #[test]
    fn test_supports() {
        let manifest = Manifest::new("v2", "t");
        assert!(manifest.supports(&["v1".into(), "v2".into()]));
        assert!(!manifest.supports(&["v1".into()]));
    }
}
