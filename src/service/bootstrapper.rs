use crate::db::reconcile::ReconcileReport;
use crate::db::schema::Table;
use crate::db::url::{UrlNormalizer, redact};
use crate::error::{BootstrapError, SchemaError};
use crate::service::state::DatabaseState;
use async_trait::async_trait;
use backon::{ConstantBuilder, Retryable};
use std::fmt;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;
use tracing::{info, warn};

/// Raw connection parameters, supplied once at startup.
#[derive(Clone)]
pub struct ConnectionConfig {
    pub raw_url: String,
    pub user: String,
    pub password: String,
}

impl ConnectionConfig {
    pub fn new(
        raw_url: impl Into<String>,
        user: impl Into<String>,
        password: impl Into<String>,
    ) -> Self {
        Self {
            raw_url: raw_url.into(),
            user: user.into(),
            password: password.into(),
        }
    }
}

impl fmt::Debug for ConnectionConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConnectionConfig")
            .field("raw_url", &redact(&self.raw_url))
            .field("user", &self.user)
            .field("password", &"***")
            .finish()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub retry_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 10,
            retry_delay: Duration::from_secs(3),
        }
    }
}

/// Driver seam: how to open a handle and reconcile a schema through it.
#[async_trait]
pub trait Connector: Send + Sync {
    type Handle: Send + Sync + 'static;

    /// Rewrite rules for this driver's connection strings.
    fn normalizer(&self) -> UrlNormalizer;

    async fn connect(
        &self,
        url: &str,
        config: &ConnectionConfig,
    ) -> Result<Self::Handle, BootstrapError>;

    async fn reconcile(
        &self,
        handle: &Self::Handle,
        tables: &[Table],
    ) -> Result<ReconcileReport, SchemaError>;
}

/// Per-call bookkeeping, dropped when `bootstrap` returns.
struct RetryState<H> {
    attempts_made: AtomicU32,
    last_staged: Mutex<Option<Arc<H>>>,
}

/// Turns a possibly-not-yet-ready database into a ready handle or a fatal error.
pub struct Bootstrapper<'s, C: Connector> {
    connector: C,
    state: &'s DatabaseState<C::Handle>,
}

impl<'s, C: Connector> Bootstrapper<'s, C> {
    pub fn new(connector: C, state: &'s DatabaseState<C::Handle>) -> Self {
        Self { connector, state }
    }

    pub fn connector(&self) -> &C {
        &self.connector
    }

    /// Connect, publish and reconcile, retrying every failure with a fixed delay.
    ///
    /// Runs at most `policy.max_attempts` attempts and does not sleep after
    /// the last one. Exhaustion yields [`BootstrapError::Exhausted`] carrying
    /// the attempt count and the last error's message. An error that
    /// [`BootstrapError::is_retryable`] rejects ends the loop and is returned as is.
    pub async fn bootstrap(
        &self,
        config: &ConnectionConfig,
        tables: &[Table],
        policy: RetryPolicy,
    ) -> Result<Arc<C::Handle>, BootstrapError> {
        if policy.max_attempts == 0 {
            return Err(BootstrapError::InvalidConfig(
                "max_attempts must be at least 1".to_string(),
            ));
        }

        let url = self.connector.normalizer().normalize(&config.raw_url);
        let redacted = redact(&url);
        let retry = RetryState {
            attempts_made: AtomicU32::new(0),
            last_staged: Mutex::new(None),
        };
        let backoff = ConstantBuilder::default()
            .with_delay(policy.retry_delay)
            .with_max_times((policy.max_attempts - 1) as usize);

        let outcome = (|| async {
            let attempt = retry.attempts_made.fetch_add(1, Ordering::SeqCst) + 1;
            info!(
                attempt,
                max_attempts = policy.max_attempts,
                url = %redacted,
                "connecting to database"
            );
            let result = self.attempt(attempt, &url, config, tables, &retry).await;
            if let Err(e) = &result {
                warn!(attempt, error = %e, "database not ready yet");
            }
            result
        })
        .retry(backoff)
        .sleep(tokio::time::sleep)
        .when(BootstrapError::is_retryable)
        .await;

        outcome.map_err(|last| {
            if let Some(staged) = retry
                .last_staged
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .take()
            {
                self.state.retract(&staged);
            }
            // retries stopped early: report the cause, not exhaustion
            if !last.is_retryable() {
                return last;
            }
            BootstrapError::Exhausted {
                attempts: retry.attempts_made.load(Ordering::SeqCst),
                last_error: last.to_string(),
            }
        })
    }

    async fn attempt(
        &self,
        attempt: u32,
        url: &str,
        config: &ConnectionConfig,
        tables: &[Table],
        retry: &RetryState<C::Handle>,
    ) -> Result<Arc<C::Handle>, BootstrapError> {
        let handle = self.connector.connect(url, config).await?;

        // Staged before reconciliation: a connected handle stays observable
        // while the schema is brought up to date.
        let staged = self.state.stage(handle);
        *retry
            .last_staged
            .lock()
            .unwrap_or_else(PoisonError::into_inner) = Some(staged.clone());

        let report = self.connector.reconcile(&staged, tables).await?;
        let ready = self.state.promote(&staged, attempt);
        info!(
            attempt,
            changes = report.changes.len(),
            "database connected and schema reconciled"
        );
        Ok(ready)
    }
}
