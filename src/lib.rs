pub mod config;
pub mod db;
pub mod error;
pub mod service;

pub use config::Config;
pub use error::{BootstrapError, SchemaError};
pub use service::bootstrapper::{Bootstrapper, ConnectionConfig, Connector, RetryPolicy};
pub use service::state::DatabaseState;
