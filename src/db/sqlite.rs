//! SQLite connector, used for local runs and single-node deployments.

use crate::config::Config;
use crate::db::reconcile::{Dialect, ReconcileReport, SchemaSnapshot, plan};
use crate::db::schema::Table;
use crate::db::url::UrlNormalizer;
use crate::error::{BootstrapError, SchemaError};
use crate::service::bootstrapper::{Bootstrapper, ConnectionConfig, Connector};
use crate::service::state::DatabaseState;
use async_trait::async_trait;
use sqlx::sqlite::{SqliteConnectOptions, SqliteConnection, SqlitePoolOptions};
use sqlx::{Pool, Sqlite};
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;
use tracing::info;

pub type SqlitePool = Pool<Sqlite>;

static DATABASE: DatabaseState<SqlitePool> = DatabaseState::new();

/// The pool published by [`bootstrap`]; `NotInitialized` before that.
pub fn database() -> Result<Arc<SqlitePool>, BootstrapError> {
    DATABASE.get()
}

pub fn state() -> &'static DatabaseState<SqlitePool> {
    &DATABASE
}

pub async fn bootstrap(cfg: &Config, tables: &[Table]) -> Result<Arc<SqlitePool>, BootstrapError> {
    Bootstrapper::new(SqliteConnector::from_config(cfg), &DATABASE)
        .bootstrap(&cfg.connection(), tables, cfg.retry_policy())
        .await
}

#[derive(Debug, Clone)]
pub struct SqliteConnector {
    pub max_connections: u32,
    pub acquire_timeout: Duration,
}

impl Default for SqliteConnector {
    fn default() -> Self {
        Self {
            max_connections: 5,
            acquire_timeout: Duration::from_secs(5),
        }
    }
}

impl SqliteConnector {
    pub fn from_config(cfg: &Config) -> Self {
        Self {
            max_connections: cfg.db_max_connections,
            acquire_timeout: Duration::from_secs(cfg.db_acquire_timeout_secs),
        }
    }
}

#[async_trait]
impl Connector for SqliteConnector {
    type Handle = SqlitePool;

    fn normalizer(&self) -> UrlNormalizer {
        UrlNormalizer::SQLITE
    }

    /// SQLite has no credentials; `config.user` and `config.password` are ignored.
    async fn connect(
        &self,
        url: &str,
        _config: &ConnectionConfig,
    ) -> Result<SqlitePool, BootstrapError> {
        let connect_opts = SqliteConnectOptions::from_str(url)?.create_if_missing(true);
        let pool = SqlitePoolOptions::new()
            .max_connections(self.max_connections)
            .acquire_timeout(self.acquire_timeout)
            .connect_with(connect_opts)
            .await?;
        Ok(pool)
    }

    async fn reconcile(
        &self,
        handle: &SqlitePool,
        tables: &[Table],
    ) -> Result<ReconcileReport, SchemaError> {
        reconcile(handle, tables).await
    }
}

/// Create missing tables, columns and indexes inside one transaction.
///
/// SQLite DDL is transactional; a failed statement rolls the whole run back.
pub async fn reconcile(
    pool: &SqlitePool,
    tables: &[Table],
) -> Result<ReconcileReport, SchemaError> {
    let mut tx = pool.begin().await.map_err(SchemaError::Transaction)?;

    let existing = inspect(&mut tx).await.map_err(SchemaError::Inspect)?;
    let changes = plan(&existing, tables, Dialect::Sqlite)?;
    for change in &changes {
        sqlx::query(change.sql())
            .execute(&mut *tx)
            .await
            .map_err(|e| change.failed(e))?;
        info!(change = %change, "schema change applied");
    }

    tx.commit().await.map_err(SchemaError::Transaction)?;
    Ok(ReconcileReport { changes })
}

pub async fn snapshot(pool: &SqlitePool) -> Result<SchemaSnapshot, SchemaError> {
    let mut conn = pool.acquire().await.map_err(SchemaError::Inspect)?;
    inspect(&mut conn).await.map_err(SchemaError::Inspect)
}

async fn inspect(conn: &mut SqliteConnection) -> Result<SchemaSnapshot, sqlx::Error> {
    let tables: Vec<(String,)> = sqlx::query_as(
        "SELECT name FROM sqlite_master WHERE type = 'table' AND name NOT LIKE 'sqlite_%' ORDER BY name",
    )
    .fetch_all(&mut *conn)
    .await?;

    let mut snapshot = SchemaSnapshot::default();
    for (table,) in tables {
        let columns: Vec<(String, String)> =
            sqlx::query_as("SELECT name, type FROM pragma_table_info(?) ORDER BY cid")
                .bind(&table)
                .fetch_all(&mut *conn)
                .await?;
        snapshot
            .tables
            .insert(table, columns.into_iter().collect());
    }

    let indexes: Vec<(String,)> = sqlx::query_as(
        "SELECT name FROM sqlite_master WHERE type = 'index' AND name NOT LIKE 'sqlite_%'",
    )
    .fetch_all(&mut *conn)
    .await?;
    snapshot.indexes = indexes.into_iter().map(|(name,)| name).collect();
    Ok(snapshot)
}
