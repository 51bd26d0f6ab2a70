#![allow(dead_code)]

use async_trait::async_trait;
use db_bootstrap::db::url::UrlNormalizer;
use db_bootstrap::db::{ReconcileReport, Table};
use db_bootstrap::{BootstrapError, ConnectionConfig, Connector, DatabaseState, SchemaError};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};

/// Connector double: handles are the 1-based connect call number.
pub struct FlakyConnector {
    pub connect_failures: u32,
    pub reconcile_failures: u32,
    /// Fail every connect with an error that must not be retried.
    pub fatal: bool,
    pub connect_calls: AtomicU32,
    pub reconcile_calls: AtomicU32,
    pub urls: Mutex<Vec<String>>,
    /// What the shared state exposed while each reconciliation ran.
    pub seen_during_reconcile: Mutex<Vec<(Option<u32>, bool)>>,
    state: Option<Arc<DatabaseState<u32>>>,
}

impl FlakyConnector {
    pub fn new(connect_failures: u32, reconcile_failures: u32) -> Self {
        Self {
            connect_failures,
            reconcile_failures,
            fatal: false,
            connect_calls: AtomicU32::new(0),
            reconcile_calls: AtomicU32::new(0),
            urls: Mutex::new(Vec::new()),
            seen_during_reconcile: Mutex::new(Vec::new()),
            state: None,
        }
    }

    pub fn fatal(mut self) -> Self {
        self.fatal = true;
        self
    }

    pub fn observing(mut self, state: Arc<DatabaseState<u32>>) -> Self {
        self.state = Some(state);
        self
    }

    pub fn connects(&self) -> u32 {
        self.connect_calls.load(Ordering::SeqCst)
    }

    pub fn reconciles(&self) -> u32 {
        self.reconcile_calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Connector for FlakyConnector {
    type Handle = u32;

    fn normalizer(&self) -> UrlNormalizer {
        UrlNormalizer::POSTGRES
    }

    async fn connect(&self, url: &str, _config: &ConnectionConfig) -> Result<u32, BootstrapError> {
        let n = self.connect_calls.fetch_add(1, Ordering::SeqCst) + 1;
        self.urls.lock().unwrap().push(url.to_string());
        tokio::task::yield_now().await;
        if self.fatal {
            return Err(BootstrapError::InvalidConfig(
                "invalid port number in connection string".to_string(),
            ));
        }
        if n <= self.connect_failures {
            return Err(BootstrapError::Connection(sqlx::Error::Protocol(format!(
                "connection refused (attempt {n})"
            ))));
        }
        Ok(n)
    }

    async fn reconcile(
        &self,
        handle: &u32,
        _tables: &[Table],
    ) -> Result<ReconcileReport, SchemaError> {
        let n = self.reconcile_calls.fetch_add(1, Ordering::SeqCst) + 1;
        if let Some(state) = &self.state {
            let visible = state.get().ok().map(|h| *h);
            self.seen_during_reconcile
                .lock()
                .unwrap()
                .push((visible, state.is_ready()));
        }
        tokio::task::yield_now().await;
        if n <= self.reconcile_failures {
            return Err(SchemaError::Transaction(sqlx::Error::Protocol(format!(
                "permission denied for schema public (handle {handle})"
            ))));
        }
        Ok(ReconcileReport::default())
    }
}

pub fn config() -> ConnectionConfig {
    ConnectionConfig::new("postgresql://app:supersecretpass@db:5432/app", "app", "supersecretpass")
}
