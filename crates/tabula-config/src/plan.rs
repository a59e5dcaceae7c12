//! Minimal insert/update/delete planning between persisted and incoming keys.

use std::collections::BTreeMap;
use std::collections::btree_map::Entry;

use crate::flatten::FlatSettings;
use crate::keys::normalize_key;

#[derive(Debug, Clone, PartialEq, Eq)]
struct Incoming {
    key: String,
    value: Option<String>,
}

/// Disjoint key sets required to bring the stored sub-tree in line with the
/// incoming flat settings.
///
/// Existing values must already be unprotected so that comparisons happen on
/// plaintext.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DiffPlan {
    to_insert: Vec<String>,
    to_update: Vec<String>,
    to_delete: Vec<String>,
    incoming: BTreeMap<String, Incoming>,
}

impl DiffPlan {
    /// Classify every existing and incoming key.
    ///
    /// Keys are matched case-insensitively. Incoming keys that differ only by
    /// case collapse to the last one produced. Updates and deletes name the
    /// stored key text; stored rows duplicating another row's key up to case
    /// are deleted.
    #[must_use]
    pub fn compute<I>(existing: I, incoming: FlatSettings) -> Self
    where
        I: IntoIterator<Item = (String, Option<String>)>,
    {
        let mut incoming_by_key: BTreeMap<String, Incoming> = BTreeMap::new();
        let mut incoming_order: Vec<String> = Vec::new();
        for entry in incoming {
            let normalized = normalize_key(&entry.key);
            if !incoming_by_key.contains_key(&normalized) {
                incoming_order.push(normalized.clone());
            }
            incoming_by_key.insert(
                normalized,
                Incoming {
                    key: entry.key,
                    value: entry.value,
                },
            );
        }

        let mut existing_by_key: BTreeMap<String, (String, Option<String>)> = BTreeMap::new();
        let mut to_delete = Vec::new();
        for (key, value) in existing {
            match existing_by_key.entry(normalize_key(&key)) {
                Entry::Vacant(slot) => {
                    slot.insert((key, value));
                }
                Entry::Occupied(_) => to_delete.push(key),
            }
        }

        let mut to_update = Vec::new();
        for (normalized, (stored_key, stored_value)) in &existing_by_key {
            match incoming_by_key.get(normalized) {
                Some(next) if next.value != *stored_value => to_update.push(stored_key.clone()),
                Some(_) => {}
                None => to_delete.push(stored_key.clone()),
            }
        }

        let to_insert = incoming_order
            .iter()
            .filter(|normalized| !existing_by_key.contains_key(*normalized))
            .filter_map(|normalized| incoming_by_key.get(normalized))
            .map(|next| next.key.clone())
            .collect();

        Self {
            to_insert,
            to_update,
            to_delete,
            incoming: incoming_by_key,
        }
    }

    /// Whether nothing needs to be written.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.to_insert.is_empty() && self.to_update.is_empty() && self.to_delete.is_empty()
    }

    /// Keys missing from the store.
    #[must_use]
    pub fn to_insert(&self) -> &[String] {
        &self.to_insert
    }

    /// Stored keys whose value changed.
    #[must_use]
    pub fn to_update(&self) -> &[String] {
        &self.to_update
    }

    /// Stored keys absent from the incoming settings.
    #[must_use]
    pub fn to_delete(&self) -> &[String] {
        &self.to_delete
    }

    /// Plaintext incoming value for `key`, matched case-insensitively.
    #[must_use]
    pub fn value_for(&self, key: &str) -> Option<&str> {
        self.incoming
            .get(&normalize_key(key))
            .and_then(|next| next.value.as_deref())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn flat(pairs: &[(&str, Option<&str>)]) -> FlatSettings {
        let mut out = FlatSettings::default();
        for (key, value) in pairs {
            out.push(*key, value.map(str::to_string));
        }
        out
    }

    fn stored(pairs: &[(&str, Option<&str>)]) -> Vec<(String, Option<String>)> {
        pairs
            .iter()
            .map(|(key, value)| ((*key).to_string(), value.map(str::to_string)))
            .collect()
    }

    #[test]
    fn minimal_diff_inserts_deletes_and_keeps() {
        let plan = DiffPlan::compute(
            stored(&[("A", Some("1")), ("B", Some("2"))]),
            flat(&[("A", Some("1")), ("C", Some("3"))]),
        );
        assert_eq!(plan.to_insert(), ["C"]);
        assert_eq!(plan.to_delete(), ["B"]);
        assert!(plan.to_update().is_empty());
        assert_eq!(plan.value_for("c"), Some("3"));
    }

    #[test]
    fn unchanged_values_produce_empty_plan() {
        let plan = DiffPlan::compute(
            stored(&[("Account:Name", Some("demo")), ("Account:Password*", Some("pw"))]),
            flat(&[("Account:Name", Some("demo")), ("Account:Password*", Some("pw"))]),
        );
        assert!(plan.is_empty());
    }

    #[test]
    fn keys_match_case_insensitively() {
        let plan = DiffPlan::compute(
            stored(&[("Name", Some("test")), ("Age", Some("36"))]),
            flat(&[("name", Some("New Name"))]),
        );
        assert_eq!(plan.to_update(), ["Name"]);
        assert_eq!(plan.to_delete(), ["Age"]);
        assert!(plan.to_insert().is_empty());
        assert_eq!(plan.value_for("NAME"), Some("New Name"));
    }

    #[test]
    fn null_transitions_count_as_updates() {
        let plan = DiffPlan::compute(
            stored(&[("A", None), ("B", Some("x"))]),
            flat(&[("A", Some("")), ("B", None)]),
        );
        assert_eq!(plan.to_update(), ["A", "B"]);
    }

    #[test]
    fn secret_marker_changes_key_identity() {
        let plan = DiffPlan::compute(
            stored(&[("Account:Password", Some("pw"))]),
            flat(&[("Account:Password*", Some("pw"))]),
        );
        assert_eq!(plan.to_insert(), ["Account:Password*"]);
        assert_eq!(plan.to_delete(), ["Account:Password"]);
    }

    #[test]
    fn non_ascii_keys_match_case_insensitively() {
        let plan = DiffPlan::compute(
            stored(&[("Ärger", Some("X"))]),
            flat(&[("ärger", Some("Y"))]),
        );
        assert_eq!(plan.to_update(), ["Ärger"]);
        assert!(plan.to_insert().is_empty());
        assert!(plan.to_delete().is_empty());
        assert_eq!(plan.value_for("ÄRGER"), Some("Y"));
    }

    #[test]
    fn stored_case_duplicates_are_deleted() {
        let plan = DiffPlan::compute(
            stored(&[("Ärger", Some("X")), ("ärger", Some("Y"))]),
            flat(&[("ÄRGER", Some("X"))]),
        );
        assert_eq!(plan.to_delete(), ["ärger"]);
        assert!(plan.to_update().is_empty());
        assert!(plan.to_insert().is_empty());
    }

    #[test]
    fn duplicate_incoming_keys_collapse() {
        let plan = DiffPlan::compute(
            Vec::new(),
            flat(&[("Key", Some("1")), ("KEY", Some("2"))]),
        );
        assert_eq!(plan.to_insert(), ["KEY"]);
        assert_eq!(plan.value_for("key"), Some("2"));
    }
}
