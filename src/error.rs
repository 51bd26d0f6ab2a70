use sqlx::Error as SqlxError;
use thiserror::Error as ThisError;

#[derive(Debug, ThisError)]
pub enum BootstrapError {
    #[error("Configuration error: {0}")]
    Config(#[from] figment::Error),

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Database connection error: {0}")]
    Connection(#[from] SqlxError),

    #[error("Schema reconciliation error: {0}")]
    Schema(#[from] SchemaError),

    #[error("Database unavailable after {attempts} attempts. Last error: {last_error}")]
    Exhausted { attempts: u32, last_error: String },

    #[error("Database not initialized; bootstrap must complete before the connection is used")]
    NotInitialized,
}

impl BootstrapError {
    /// Whether another connect-and-reconcile attempt may succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Connection(_) | Self::Schema(_))
    }
}

#[derive(Debug, ThisError)]
pub enum SchemaError {
    #[error("failed to inspect existing schema: {0}")]
    Inspect(#[source] SqlxError),

    #[error("failed to create table `{table}`: {source}")]
    CreateTable {
        table: String,
        #[source]
        source: SqlxError,
    },

    #[error("failed to add column `{table}.{column}`: {source}")]
    AddColumn {
        table: String,
        column: String,
        #[source]
        source: SqlxError,
    },

    #[error("failed to create index `{index}` on `{table}`: {source}")]
    CreateIndex {
        table: String,
        index: String,
        #[source]
        source: SqlxError,
    },

    #[error("column `{table}.{column}` exists as `{found}`, incompatible with declared `{declared}`")]
    ColumnConflict {
        table: String,
        column: String,
        declared: String,
        found: String,
    },

    #[error("schema transaction failed: {0}")]
    Transaction(#[source] SqlxError),

    #[error("invalid identifier: {0:?}")]
    InvalidIdentifier(String),
}
