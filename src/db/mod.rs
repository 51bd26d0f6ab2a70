//! Database module: connection strings, schema descriptors and per-driver reconciliation.
//!
//! Layout:
//! - `url.rs`: connection-string normalization and credential redaction
//! - `schema.rs`: table/column/index descriptors (code or TOML)
//! - `reconcile.rs`: additive change planning shared by all drivers
//! - `postgres.rs`, `sqlite.rs`: connectors, catalog inspection, process-wide pools

pub mod postgres;
pub mod reconcile;
pub mod schema;
pub mod sqlite;
pub mod url;

pub use reconcile::{Dialect, ReconcileReport, SchemaChange, SchemaSnapshot};
pub use schema::{Column, ColumnType, ForeignKey, Index, Table};
pub use sqlite::SqlitePool;
