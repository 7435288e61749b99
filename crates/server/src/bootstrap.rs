use std::sync::Arc;

use loanline_agent::{HttpTenantGateway, NoopLlmClient, TurnEngine};
use loanline_core::config::{AppConfig, ConfigError, LoadOptions};
use loanline_db::repositories::SqlSessionRepository;
use loanline_db::{connect_with_settings, migrations, DbPool};
use thiserror::Error;
use tracing::info;

use crate::sweep::SessionSweeper;

pub struct Application {
    pub config: AppConfig,
    pub db_pool: DbPool,
    pub engine: Arc<TurnEngine>,
    pub sweeper: SessionSweeper,
}

#[derive(Debug, Error)]
pub enum BootstrapError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error("database connection failed: {0}")]
    DatabaseConnect(#[source] sqlx::Error),
    #[error("database migration failed: {0}")]
    Migration(#[source] sqlx::migrate::MigrateError),
}

pub async fn bootstrap(options: LoadOptions) -> Result<Application, BootstrapError> {
    let config = AppConfig::load(options)?;
    bootstrap_with_config(config).await
}

pub async fn bootstrap_with_config(config: AppConfig) -> Result<Application, BootstrapError> {
    info!(event_name = "system.bootstrap.start", "starting application bootstrap");

    let db_pool = connect_with_settings(
        &config.database.url,
        config.database.max_connections,
        config.database.timeout_secs,
    )
    .await
    .map_err(BootstrapError::DatabaseConnect)?;
    info!(event_name = "system.bootstrap.database_connected", "database connection established");

    migrations::run_pending(&db_pool).await.map_err(BootstrapError::Migration)?;
    info!(event_name = "system.bootstrap.migrations_applied", "database migrations applied");

    let repository = Arc::new(SqlSessionRepository::new(db_pool.clone()));
    let engine = Arc::new(TurnEngine::new(
        repository.clone(),
        // The text-generation collaborator is wired per deployment; without
        // one, every extraction and rendering path uses its deterministic
        // fallback.
        Arc::new(NoopLlmClient),
        Arc::new(HttpTenantGateway::new(&config.tenant_api)),
    ));
    let sweeper = SessionSweeper::new(repository, &config.sweep);

    Ok(Application { config, db_pool, engine, sweeper })
}
