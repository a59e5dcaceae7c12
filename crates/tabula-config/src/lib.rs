#![forbid(unsafe_code)]
#![warn(
    unused_must_use,
    unreachable_pub,
    clippy::all,
    clippy::pedantic,
    clippy::nursery,
    rustdoc::broken_intra_doc_links,
    rustdoc::bare_urls,
    missing_docs
)]

//! Database-backed settings synchronisation built on `PostgreSQL`.
//!
//! Layout: `flatten.rs` (nested value to flat keys), `plan.rs` (minimal
//! diff), `repository.rs` (transactional write path), `loader.rs` (bulk load
//! and freshness marker), `provider.rs` (consumer snapshot and reloads),
//! `source.rs` (`SettingsSource` wiring the pieces together).

pub mod defaults;
pub mod error;
pub mod flatten;
pub mod init;
pub mod keys;
pub mod loader;
pub mod options;
pub mod plan;
pub mod protect;
pub mod provider;
pub mod repository;
pub mod source;
pub mod watch;

pub use error::{ConfigError, ConfigResult};
pub use flatten::{FlatEntry, FlatSettings, Flattener, JsonFlattener, SecretPolicy};
pub use init::{InitGuard, InitState};
pub use loader::{SettingsLoader, format_marker};
pub use options::SettingsOptions;
pub use plan::DiffPlan;
pub use protect::{AeadProtector, PassthroughProtector, SecretProtector};
pub use provider::{ReloadWatcher, SettingsProvider, SettingsSnapshot, SnapshotEntry};
pub use repository::{SettingsRepository, SettingsWriter, SyncOutcome};
pub use source::SettingsSource;
pub use watch::{ChangeNotifier, ChangeWatcher};
