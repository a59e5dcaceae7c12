//! Naming and environment helpers for integration tests.

use std::sync::atomic::{AtomicU32, Ordering};
use std::time::{SystemTime, UNIX_EPOCH};

/// Environment variable pointing tests at an existing server.
pub const TEST_DATABASE_URL_ENV: &str = "TABULA_TEST_DATABASE_URL";

static SEQUENCE: AtomicU32 = AtomicU32::new(0);

/// Connection string supplied through [`TEST_DATABASE_URL_ENV`], if any.
#[must_use]
pub fn external_database_url() -> Option<String> {
    std::env::var(TEST_DATABASE_URL_ENV)
        .ok()
        .filter(|value| !value.trim().is_empty())
}

/// Table name unique within this process and unlikely to collide across
/// concurrent test runs.
///
/// The result is a valid unquoted identifier of at most 63 bytes.
#[must_use]
pub fn unique_table_name(prefix: &str) -> String {
    let prefix: String = prefix
        .chars()
        .filter(|c| c.is_ascii_alphanumeric() || *c == '_')
        .take(24)
        .collect::<String>()
        .to_ascii_lowercase();
    let prefix = if prefix.starts_with(|c: char| c.is_ascii_alphabetic()) {
        prefix
    } else {
        format!("t_{prefix}")
    };
    let nanos = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .subsec_nanos();
    let seq = SEQUENCE.fetch_add(1, Ordering::Relaxed);
    format!("{prefix}_{}_{nanos}_{seq}", std::process::id())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn table_names_are_unique_identifiers() {
        let first = unique_table_name("Sync-Test");
        let second = unique_table_name("Sync-Test");
        assert_ne!(first, second);
        assert!(first.starts_with("synctest_"));
        assert!(first.len() <= 63);
        assert!(
            first
                .chars()
                .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '_')
        );
    }

    #[test]
    fn leading_digits_get_a_letter_prefix() {
        assert!(unique_table_name("42").starts_with("t_42_"));
        assert!(unique_table_name("").starts_with("t__"));
    }
}
