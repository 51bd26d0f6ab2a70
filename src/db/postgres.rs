//! PostgreSQL connector and the process-wide pool.

use crate::config::Config;
use crate::db::reconcile::{Dialect, ReconcileReport, SchemaSnapshot, plan};
use crate::db::schema::Table;
use crate::db::url::UrlNormalizer;
use crate::error::{BootstrapError, SchemaError};
use crate::service::bootstrapper::{Bootstrapper, ConnectionConfig, Connector};
use crate::service::state::DatabaseState;
use async_trait::async_trait;
use sqlx::postgres::{PgConnectOptions, PgConnection, PgPool, PgPoolOptions};
use sqlx::FromRow;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;
use tracing::info;

static DATABASE: DatabaseState<PgPool> = DatabaseState::new();

/// The pool published by [`bootstrap`].
///
/// Fails with [`BootstrapError::NotInitialized`] until a bootstrap has connected.
pub fn database() -> Result<Arc<PgPool>, BootstrapError> {
    DATABASE.get()
}

/// Process-wide state behind [`database`], for callers that inspect readiness.
pub fn state() -> &'static DatabaseState<PgPool> {
    &DATABASE
}

/// Bootstrap the process-wide pool from configuration.
pub async fn bootstrap(cfg: &Config, tables: &[Table]) -> Result<Arc<PgPool>, BootstrapError> {
    Bootstrapper::new(PostgresConnector::from_config(cfg), &DATABASE)
        .bootstrap(&cfg.connection(), tables, cfg.retry_policy())
        .await
}

#[derive(Debug, Clone)]
pub struct PostgresConnector {
    pub max_connections: u32,
    pub min_connections: u32,
    pub acquire_timeout: Duration,
}

impl Default for PostgresConnector {
    fn default() -> Self {
        Self {
            max_connections: 10,
            min_connections: 0,
            acquire_timeout: Duration::from_secs(5),
        }
    }
}

impl PostgresConnector {
    pub fn from_config(cfg: &Config) -> Self {
        Self {
            max_connections: cfg.db_max_connections,
            min_connections: cfg.db_min_connections,
            acquire_timeout: Duration::from_secs(cfg.db_acquire_timeout_secs),
        }
    }
}

#[async_trait]
impl Connector for PostgresConnector {
    type Handle = PgPool;

    fn normalizer(&self) -> UrlNormalizer {
        UrlNormalizer::POSTGRES
    }

    async fn connect(&self, url: &str, config: &ConnectionConfig) -> Result<PgPool, BootstrapError> {
        // a malformed connection string will not fix itself between attempts
        let mut options = PgConnectOptions::from_str(url).map_err(|e| {
            BootstrapError::InvalidConfig(format!("malformed connection string: {e}"))
        })?;
        if !config.user.is_empty() {
            options = options.username(&config.user);
        }
        if !config.password.is_empty() {
            options = options.password(&config.password);
        }
        let pool = PgPoolOptions::new()
            .max_connections(self.max_connections)
            .min_connections(self.min_connections)
            .acquire_timeout(self.acquire_timeout)
            .connect_with(options)
            .await?;
        Ok(pool)
    }

    async fn reconcile(
        &self,
        handle: &PgPool,
        tables: &[Table],
    ) -> Result<ReconcileReport, SchemaError> {
        reconcile(handle, tables).await
    }
}

/// Create missing tables, columns and indexes inside one transaction.
///
/// PostgreSQL DDL is transactional, so a failure part-way rolls back every
/// change made by this run.
pub async fn reconcile(pool: &PgPool, tables: &[Table]) -> Result<ReconcileReport, SchemaError> {
    let mut tx = pool.begin().await.map_err(SchemaError::Transaction)?;

    let existing = inspect(&mut tx).await.map_err(SchemaError::Inspect)?;
    let changes = plan(&existing, tables, Dialect::Postgres)?;
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

/// Read tables, columns and indexes of the current schema.
pub async fn snapshot(pool: &PgPool) -> Result<SchemaSnapshot, SchemaError> {
    let mut conn = pool.acquire().await.map_err(SchemaError::Inspect)?;
    inspect(&mut conn).await.map_err(SchemaError::Inspect)
}

#[derive(FromRow)]
struct ColumnRow {
    table_name: String,
    column_name: Option<String>,
    data_type: Option<String>,
}

async fn inspect(conn: &mut PgConnection) -> Result<SchemaSnapshot, sqlx::Error> {
    let rows: Vec<ColumnRow> = sqlx::query_as(
        r#"
        SELECT t.table_name::text AS table_name,
               c.column_name::text AS column_name,
               c.data_type::text AS data_type
        FROM information_schema.tables t
        LEFT JOIN information_schema.columns c
               ON c.table_schema = t.table_schema AND c.table_name = t.table_name
        WHERE t.table_schema = current_schema() AND t.table_type = 'BASE TABLE'
        ORDER BY t.table_name, c.ordinal_position
        "#,
    )
    .fetch_all(&mut *conn)
    .await?;

    let indexes: Vec<(String,)> =
        sqlx::query_as("SELECT indexname::text FROM pg_indexes WHERE schemaname = current_schema()")
            .fetch_all(&mut *conn)
            .await?;

    let mut snapshot = SchemaSnapshot::default();
    for row in rows {
        let columns = snapshot.tables.entry(row.table_name).or_default();
        if let (Some(column), Some(data_type)) = (row.column_name, row.data_type) {
            columns.insert(column, data_type);
        }
    }
    snapshot.indexes = indexes.into_iter().map(|(name,)| name).collect();
    Ok(snapshot)
}
