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

//! Data access layer for Tabula: the flat `(key, value, last_update_dt)`
//! settings table, its statements, and the transactional write path.

pub mod error;
pub mod settings;

pub use error::{DataError, Result as DataResult};
pub use settings::{PendingWrite, SettingRow, TableStatements, WriteBatch};
