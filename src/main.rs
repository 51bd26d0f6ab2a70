use db_bootstrap::config::{Config, Driver};
use db_bootstrap::db::{postgres, schema, sqlite, url::redact};
use mimalloc::MiMalloc;
use tracing::info;
use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

#[global_allocator]
static GLOBAL: MiMalloc = MiMalloc;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    dotenvy::dotenv().ok();

    let cfg = Config::load()?;

    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(cfg.loglevel.clone()));
    tracing_subscriber::registry()
        .with(env_filter)
        .with(
            tracing_subscriber::fmt::layer()
                .with_level(true)
                .with_target(false),
        )
        .init();

    info!(
        driver = ?cfg.db_driver,
        database_url = %redact(&cfg.db_url),
        max_attempts = cfg.db_max_attempts,
        retry_delay_ms = cfg.db_retry_delay_ms,
        schema = %cfg.schema_path.as_ref().map(|p| p.display().to_string()).unwrap_or_else(|| "<none>".to_string()),
    );

    let tables = match cfg.schema_path.as_ref() {
        Some(path) => schema::load_tables(path)?,
        None => Vec::new(),
    };
    info!(count = tables.len(), "schema descriptors loaded");

    match cfg.db_driver {
        Driver::Postgres => {
            let pool = postgres::bootstrap(&cfg, &tables).await?;
            if let Some(ready) = postgres::state().ready_info() {
                info!(attempt = ready.attempt, ready_at = %ready.ready_at, "database ready");
            }
            pool.close().await;
        }
        Driver::Sqlite => {
            let pool = sqlite::bootstrap(&cfg, &tables).await?;
            if let Some(ready) = sqlite::state().ready_info() {
                info!(attempt = ready.attempt, ready_at = %ready.ready_at, "database ready");
            }
            pool.close().await;
        }
    }
    Ok(())
}
