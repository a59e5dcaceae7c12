//! Key conventions shared by the write and read paths.
//!
//! Keys are colon-delimited hierarchical paths compared case-insensitively.
//! A key ending in [`SECRET_SENTINEL`] marks its value as protected; only the
//! value is ever transformed, the key text keeps the marker.

/// Separator between hierarchical key segments.
pub const KEY_DELIMITER: char = ':';

/// Trailing character marking a secret key.
pub const SECRET_SENTINEL: char = '*';

/// Lowercased form used for key identity.
#[must_use]
pub fn normalize_key(key: &str) -> String {
    key.to_lowercase()
}

/// Whether `key` carries the secret sentinel.
#[must_use]
pub fn is_secret_key(key: &str) -> bool {
    key.ends_with(SECRET_SENTINEL)
}

/// Append the secret sentinel unless it is already present.
#[must_use]
pub fn mark_secret(key: &str) -> String {
    if is_secret_key(key) {
        key.to_string()
    } else {
        format!("{key}{SECRET_SENTINEL}")
    }
}

/// Remove a single trailing secret sentinel.
#[must_use]
pub fn strip_secret_marker(key: &str) -> &str {
    key.strip_suffix(SECRET_SENTINEL).unwrap_or(key)
}

/// Join a parent key and a child segment.
#[must_use]
pub fn child_key(parent: &str, segment: &str) -> String {
    if parent.is_empty() {
        segment.to_string()
    } else {
        format!("{parent}{KEY_DELIMITER}{segment}")
    }
}

/// Whether `key` belongs to the sub-tree rooted at `root`.
///
/// Matches the root itself (secret-marked or not) and every key starting
/// with `root:`, ignoring case.
#[must_use]
pub fn in_scope(root: &str, key: &str) -> bool {
    let root = normalize_key(root);
    let key = normalize_key(key);
    if strip_secret_marker(&key) == root {
        return true;
    }
    key.strip_prefix(&root)
        .is_some_and(|rest| rest.starts_with(KEY_DELIMITER))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn secret_marker_round_trips() {
        assert!(!is_secret_key("Account:Password"));
        let marked = mark_secret("Account:Password");
        assert_eq!(marked, "Account:Password*");
        assert!(is_secret_key(&marked));
        assert_eq!(mark_secret(&marked), marked);
        assert_eq!(strip_secret_marker(&marked), "Account:Password");
        assert_eq!(strip_secret_marker("Plain"), "Plain");
    }

    #[test]
    fn scope_is_case_insensitive_and_colon_qualified() {
        assert!(in_scope("Account", "account"));
        assert!(in_scope("Account", "ACCOUNT:Name"));
        assert!(in_scope("Account", "Account:Types:0"));
        assert!(in_scope("ApiKey", "apikey*"));
        assert!(!in_scope("Account", "AccountName"));
        assert!(!in_scope("Account", "Other:Account"));
    }

    #[test]
    fn child_keys_join_with_delimiter() {
        assert_eq!(child_key("Account", "Name"), "Account:Name");
        assert_eq!(child_key("", "Name"), "Name");
        assert_eq!(normalize_key("Account:NAME"), "account:name");
    }
}
