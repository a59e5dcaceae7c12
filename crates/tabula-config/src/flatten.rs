//! Flattening of nested settings values into colon-delimited keys.
//!
//! # Design
//! - `Flattener` is the seam; `JsonFlattener` walks a `serde_json::Value`.
//! - Secret tagging is positional: a `SecretPolicy` names the relative field
//!   paths whose leaves get the sentinel suffix on their keys.

use std::collections::BTreeSet;

use serde_json::Value;

use crate::keys::{KEY_DELIMITER, child_key, mark_secret, normalize_key};

/// Relative field paths whose values must be stored protected.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SecretPolicy {
    paths: BTreeSet<String>,
}

impl SecretPolicy {
    /// Policy tagging nothing.
    #[must_use]
    pub fn none() -> Self {
        Self::default()
    }

    /// Policy tagging every leaf of the value, including a scalar root.
    #[must_use]
    pub fn entire_value() -> Self {
        Self {
            paths: BTreeSet::from([String::new()]),
        }
    }

    /// Policy tagging the given relative paths (`Password`,
    /// `Database:Password` or `Database.Password`), case-insensitively.
    #[must_use]
    pub fn fields<I, S>(paths: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let paths = paths
            .into_iter()
            .map(|path| normalize_key(&path.as_ref().replace('.', &KEY_DELIMITER.to_string())))
            .map(|path| path.trim_matches(KEY_DELIMITER).to_string())
            .collect();
        Self { paths }
    }

    /// Whether no path is tagged.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.paths.is_empty()
    }

    /// Whether the leaf at `relative` (lowercased, relative to the root) is
    /// covered by a tagged path.
    fn covers(&self, relative: &str) -> bool {
        self.paths.iter().any(|path| {
            path.is_empty()
                || relative == path
                || relative
                    .strip_prefix(path.as_str())
                    .is_some_and(|rest| rest.starts_with(KEY_DELIMITER))
        })
    }
}

/// One flattened `(key, value)` pair.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FlatEntry {
    /// Full key including the root and, for secrets, the sentinel.
    pub key: String,
    /// Plaintext value; `None` for JSON `null`.
    pub value: Option<String>,
}

/// Ordered flat key space produced by a [`Flattener`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FlatSettings {
    entries: Vec<FlatEntry>,
}

impl FlatSettings {
    /// Append an entry.
    pub fn push(&mut self, key: impl Into<String>, value: Option<String>) {
        self.entries.push(FlatEntry {
            key: key.into(),
            value,
        });
    }

    /// Number of entries.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether no entry was produced.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Iterate entries in production order.
    pub fn iter(&self) -> impl Iterator<Item = &FlatEntry> {
        self.entries.iter()
    }

    /// Case-insensitive lookup returning the value slot when the key exists.
    #[must_use]
    pub fn get(&self, key: &str) -> Option<Option<&str>> {
        let wanted = normalize_key(key);
        self.entries
            .iter()
            .rev()
            .find(|entry| normalize_key(&entry.key) == wanted)
            .map(|entry| entry.value.as_deref())
    }
}

impl IntoIterator for FlatSettings {
    type Item = FlatEntry;
    type IntoIter = std::vec::IntoIter<FlatEntry>;

    fn into_iter(self) -> Self::IntoIter {
        self.entries.into_iter()
    }
}

/// Converts a settings value into its flat key space under a root key.
pub trait Flattener: Send + Sync {
    /// Flatten `value` beneath `root`, tagging keys covered by `policy`.
    fn flatten(&self, value: &Value, root: &str, policy: &SecretPolicy) -> FlatSettings;
}

/// Default flattener over `serde_json` values.
#[derive(Debug, Clone, Copy, Default)]
pub struct JsonFlattener;

impl Flattener for JsonFlattener {
    fn flatten(&self, value: &Value, root: &str, policy: &SecretPolicy) -> FlatSettings {
        let mut out = FlatSettings::default();
        walk(value, root, "", policy, &mut out);
        out
    }
}

fn walk(value: &Value, key: &str, relative: &str, policy: &SecretPolicy, out: &mut FlatSettings) {
    match value {
        Value::Object(map) => {
            for (name, child) in map {
                walk(
                    child,
                    &child_key(key, name),
                    &child_key(relative, &normalize_key(name)),
                    policy,
                    out,
                );
            }
        }
        Value::Array(items) => {
            for (index, child) in items.iter().enumerate() {
                let segment = index.to_string();
                walk(
                    child,
                    &child_key(key, &segment),
                    &child_key(relative, &segment),
                    policy,
                    out,
                );
            }
        }
        leaf => {
            let key = if policy.covers(relative) {
                mark_secret(key)
            } else {
                key.to_string()
            };
            out.push(key, scalar_text(leaf));
        }
    }
}

fn scalar_text(value: &Value) -> Option<String> {
    match value {
        Value::Null => None,
        Value::String(text) => Some(text.clone()),
        other => Some(other.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn keys(flat: &FlatSettings) -> Vec<&str> {
        flat.iter().map(|entry| entry.key.as_str()).collect()
    }

    #[test]
    fn scalar_root_produces_single_key() {
        let flat = JsonFlattener.flatten(&json!("New Name"), "Name", &SecretPolicy::none());
        assert_eq!(keys(&flat), vec!["Name"]);
        assert_eq!(flat.get("name"), Some(Some("New Name")));
    }

    #[test]
    fn nested_objects_arrays_and_maps_flatten() {
        let value = json!({
            "Name": "demo",
            "Types": ["A", "B", "C"],
            "Data": { "A": 1, "B": 2 },
            "Enabled": true,
            "Missing": null,
            "Empty": [],
        });
        let flat = JsonFlattener.flatten(&value, "Account", &SecretPolicy::none());
        assert_eq!(flat.len(), 8);
        assert_eq!(flat.get("Account:Name"), Some(Some("demo")));
        assert_eq!(flat.get("Account:Types:0"), Some(Some("A")));
        assert_eq!(flat.get("Account:Types:2"), Some(Some("C")));
        assert_eq!(flat.get("Account:Data:B"), Some(Some("2")));
        assert_eq!(flat.get("Account:Enabled"), Some(Some("true")));
        assert_eq!(flat.get("Account:Missing"), Some(None));
        assert_eq!(flat.get("Account:Empty"), None);
    }

    #[test]
    fn secret_fields_get_sentinel_suffix() {
        let value = json!({
            "Name": "demo",
            "Password": "demo",
            "Database": { "User": "app", "Password": "pw" },
        });
        let policy = SecretPolicy::fields(["password", "Database.Password"]);
        let flat = JsonFlattener.flatten(&value, "Account", &policy);
        let mut found = keys(&flat);
        found.sort_unstable();
        assert_eq!(
            found,
            vec![
                "Account:Database:Password*",
                "Account:Database:User",
                "Account:Name",
                "Account:Password*",
            ]
        );
        assert_eq!(flat.get("Account:Password*"), Some(Some("demo")));
    }

    #[test]
    fn secret_path_covers_nested_leaves() {
        let value = json!({ "Keys": ["a", "b"], "Other": "x" });
        let flat = JsonFlattener.flatten(&value, "Api", &SecretPolicy::fields(["Keys"]));
        assert_eq!(flat.get("Api:Keys:0*"), Some(Some("a")));
        assert_eq!(flat.get("Api:Keys:1*"), Some(Some("b")));
        assert_eq!(flat.get("Api:Other"), Some(Some("x")));
    }

    #[test]
    fn entire_value_policy_marks_scalar_root() {
        let flat = JsonFlattener.flatten(&json!("token"), "ApiKey", &SecretPolicy::entire_value());
        assert_eq!(keys(&flat), vec!["ApiKey*"]);
    }

    #[test]
    fn policy_does_not_match_sibling_prefixes() {
        let value = json!({ "Pass": "a", "Password": "b" });
        let flat = JsonFlattener.flatten(&value, "Root", &SecretPolicy::fields(["Pass"]));
        assert_eq!(flat.get("Root:Pass*"), Some(Some("a")));
        assert_eq!(flat.get("Root:Password"), Some(Some("b")));
    }
}
