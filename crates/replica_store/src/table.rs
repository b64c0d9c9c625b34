//! One kind's rows plus its secondary index entries.

use std::collections::BTreeSet;

use imbl::{OrdMap, OrdSet};
use replica_schema::{Kind, Lookup, Object};

use crate::error::StoreError;

/// Index entries are `(key, id)` pairs so equal keys stay distinct per entity.
type Entries = OrdSet<(Vec<u8>, String)>;

#[derive(Clone, Default)]
pub(crate) struct Table {
    rows: OrdMap<String, Object>,
    indexes: OrdMap<&'static str, Entries>,
}

impl Table {
    pub(crate) fn get(&self, id: &str) -> Option<&Object> {
        self.rows.get(id)
    }

    pub(crate) fn len(&self) -> usize {
        self.rows.len()
    }

    pub(crate) fn values(&self) -> impl Iterator<Item = &Object> {
        self.rows.values()
    }

    /// Insert or replace `id`, maintaining every index of `kind`.
    ///
    /// Unique indices are checked before anything is touched, so a rejected
    /// write leaves the table unchanged.
    pub(crate) fn insert(&mut self, kind: &Kind, id: &str, obj: Object) -> Result<Option<Object>, StoreError> {
        let keyed: Vec<(&'static str, Vec<Vec<u8>>)> = kind
            .indexes()
            .iter()
            .map(|index| (index.name(), index.object_keys(&*obj)))
            .collect();

        for (index, (name, keys)) in kind.indexes().iter().zip(&keyed) {
            if !index.unique() {
                continue;
            }
            let Some(entries) = self.indexes.get(*name) else {
                continue;
            };
            for key in keys {
                if let Some(other) = owners(entries, key).find(|other| other.as_str() != id) {
                    return Err(StoreError::UniqueViolation {
                        kind: kind.name(),
                        index: *name,
                        id: id.to_string(),
                        other: other.clone(),
                    });
                }
            }
        }

        let previous = self.remove(kind, id);
        for (name, keys) in keyed {
            let entries = self.indexes.entry(name).or_default();
            for key in keys {
                entries.insert((key, id.to_string()));
            }
        }
        self.rows.insert(id.to_string(), obj);
        Ok(previous)
    }

    pub(crate) fn remove(&mut self, kind: &Kind, id: &str) -> Option<Object> {
        let previous = self.rows.remove(id)?;
        for index in kind.indexes() {
            if let Some(entries) = self.indexes.get_mut(index.name()) {
                for key in index.object_keys(&*previous) {
                    entries.remove(&(key, id.to_string()));
                }
            }
        }
        Some(previous)
    }

    /// Objects whose keys in `index` match `lookup`, in key order, each once.
    pub(crate) fn search(&self, index: &str, lookup: &Lookup) -> Vec<Object> {
        let Some(entries) = self.indexes.get(index) else {
            return Vec::new();
        };
        let mut seen = BTreeSet::new();
        entries
            .range((lookup.key.clone(), String::new())..)
            .take_while(|(key, _)| {
                if lookup.exact {
                    *key == lookup.key
                } else {
                    key.starts_with(&lookup.key)
                }
            })
            .filter(|(_, id)| seen.insert(id.clone()))
            .filter_map(|(_, id)| self.rows.get(id.as_str()).cloned())
            .collect()
    }
}

fn owners<'a>(entries: &'a Entries, key: &'a [u8]) -> impl Iterator<Item = &'a String> + 'a {
    entries
        .range((key.to_vec(), String::new())..)
        .take_while(move |(k, _)| k.as_slice() == key)
        .map(|(_, id)| id)
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use replica_schema::{Entity, IndexKey};

    use super::*;
    use crate::fixtures::{Host, host};

    fn ids(table: &Table, index: &str, args: &[&dyn IndexKey]) -> Vec<String> {
        let def = Host::kind().index(index).unwrap();
        table
            .search(index, &def.lookup(args))
            .into_iter()
            .map(|obj| obj.downcast::<Host>().unwrap().id.clone())
            .collect()
    }

    #[test]
    fn test_insert_accumulates_index_entries_in_place() {
        let kind = Host::kind();
        let mut table = Table::default();
        table.insert(kind, "h1", Arc::new(host("h1", "a", "eu", 80))).unwrap();
        let before = table.clone();
        table.insert(kind, "h2", Arc::new(host("h2", "b", "eu", 81))).unwrap();
        table.insert(kind, "h1", Arc::new(host("h1", "a", "us", 80))).unwrap();

        assert_eq!(ids(&table, "by_zone", &[&"eu"]), vec!["h2"]);
        assert_eq!(ids(&table, "by_zone", &[&"us"]), vec!["h1"]);
        // Earlier copies keep their own index state.
        assert_eq!(ids(&before, "by_zone", &[&"eu"]), vec!["h1"]);
        assert!(ids(&before, "by_zone", &[&"us"]).is_empty());
    }
}
