//! Transactions as they travel over the log.
//!
//! Every payload is JSON. Field names are fixed by the log format, so each
//! struct renames its fields explicitly.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use replica_schema::Diff;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::position::Position;

/// Changes grouped by kind name, then entity id.
pub type Changes = BTreeMap<String, BTreeMap<String, Diff>>;

/// The writer a transaction is attributed to.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Source {
    /// Logical producer name; decides which fields the writer may change.
    /// Empty is the administrative writer.
    #[serde(rename = "Producer", default, skip_serializing_if = "String::is_empty")]
    pub producer: String,
    /// Identifier of the writing process.
    #[serde(rename = "Instance", default, skip_serializing_if = "String::is_empty")]
    pub instance: String,
}

impl Source {
    /// Create a source.
    #[must_use]
    pub fn new(producer: impl Into<String>, instance: impl Into<String>) -> Self {
        Self {
            producer: producer.into(),
            instance: instance.into(),
        }
    }
}

/// One appended unit of change.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Transaction {
    /// Append time, stamped by the log.
    #[serde(rename = "TS", default, skip_serializing_if = "Option::is_none")]
    pub ts: Option<DateTime<Utc>>,
    /// Who wrote it.
    #[serde(rename = "Source", default)]
    pub source: Source,
    /// Per-process-lifetime session of the writer.
    #[serde(rename = "Session", default, skip_serializing_if = "is_zero")]
    pub session: i64,
    /// The entity diffs.
    #[serde(rename = "Changes", default)]
    pub changes: Changes,
    /// Free-form audit information.
    #[serde(rename = "Audit", default, skip_serializing_if = "Option::is_none")]
    pub audit: Option<Value>,
}

impl Transaction {
    /// An empty transaction from `source` in `session`.
    #[must_use]
    pub fn new(source: Source, session: i64) -> Self {
        Self {
            source,
            session,
            ..Self::default()
        }
    }

    /// Add one entity diff, replacing any earlier diff for the same entity.
    #[must_use]
    pub fn with_change(mut self, kind: impl Into<String>, id: impl Into<String>, diff: Diff) -> Self {
        self.insert(kind, id, diff);
        self
    }

    /// Add one entity diff in place.
    pub fn insert(&mut self, kind: impl Into<String>, id: impl Into<String>, diff: Diff) {
        self.changes.entry(kind.into()).or_default().insert(id.into(), diff);
    }

    /// Returns `true` if no entity changes.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.changes.values().all(BTreeMap::is_empty)
    }

    /// Iterate `(kind, id, diff)` in kind then id order.
    pub fn diffs(&self) -> impl Iterator<Item = (&str, &str, &Diff)> {
        self.changes.iter().flat_map(|(kind, entities)| {
            entities
                .iter()
                .map(move |(id, diff)| (kind.as_str(), id.as_str(), diff))
        })
    }

    /// Returns `true` if this transaction was written by `source` in `session`.
    #[must_use]
    pub fn is_from(&self, source: &Source, session: i64) -> bool {
        self.session == session && self.source == *source
    }
}

/// A transaction read back from the log, with the position after it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IncomingTransaction {
    /// The transaction itself.
    #[serde(flatten)]
    pub transaction: Transaction,
    /// Resume here to continue after this transaction.
    #[serde(rename = "Position")]
    pub position: Position,
}

#[allow(clippy::trivially_copy_pass_by_ref)]
fn is_zero(n: &i64) -> bool {
    *n == 0
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn test_wire_field_names() {
        let diff: Diff = serde_json::from_value(json!({"ID": "f1", "A": 7})).unwrap();
        let txn = Transaction::new(Source::new("a", "i-1"), 42).with_change("foo", "f1", diff);
        let value = serde_json::to_value(&txn).unwrap();
        assert_eq!(
            value,
            json!({
                "Source": {"Producer": "a", "Instance": "i-1"},
                "Session": 42,
                "Changes": {"foo": {"f1": {"ID": "f1", "A": 7}}},
            })
        );
    }

    #[test]
    fn test_optional_fields_default() {
        let txn: Transaction = serde_json::from_value(json!({"Changes": {}})).unwrap();
        assert_eq!(txn, Transaction::default());
        assert!(txn.is_empty());
        assert!(txn.is_from(&Source::default(), 0));
    }

    #[test]
    fn test_incoming_flattens_position() {
        let incoming = IncomingTransaction {
            transaction: Transaction::new(Source::new("a", ""), 1),
            position: Position::new(0, 1),
        };
        let value = serde_json::to_value(&incoming).unwrap();
        assert_eq!(value["Position"], json!("0000000000000000-0000000000000001"));
        assert_eq!(value["Source"], json!({"Producer": "a"}));
        let back: IncomingTransaction = serde_json::from_value(value).unwrap();
        assert_eq!(back, incoming);
    }

    #[test]
    fn test_diffs_iterates_in_order() {
        let txn = Transaction::default()
            .with_change("b", "1", Diff::new())
            .with_change("a", "2", Diff::new())
            .with_change("a", "1", Diff::new());
        let order: Vec<(&str, &str)> = txn.diffs().map(|(k, i, _)| (k, i)).collect();
        assert_eq!(order, vec![("a", "1"), ("a", "2"), ("b", "1")]);
    }

    #[test]
    fn test_is_from_needs_source_and_session() {
        let source = Source::new("a", "i-1");
        let txn = Transaction::new(source.clone(), 7);
        assert!(txn.is_from(&source, 7));
        assert!(!txn.is_from(&source, 8));
        assert!(!txn.is_from(&Source::new("a", "i-2"), 7));
    }
}
