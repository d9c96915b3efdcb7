//! Embedded data layer for multi-user project and site-media tracking.
//!
//! Everything lives in one SQLite file opened through [`db::Database`]. The
//! caller signs a user in, sets the active scope, and every read and mutation
//! after that is filtered to what that user owns or belongs to. Progress and
//! status are derived from phases and the activity ledger at read time, and
//! the whole store can be reconciled against remote snapshots via the
//! `merge_*_snapshot` passes.

pub mod config;
pub mod db;
pub mod error;
pub mod ids;
pub mod logging;

pub use config::Config;
pub use db::Database;
pub use error::{Result, StoreError};
