use std::sync::Arc;

use fintrack_core::approvals::factory::ApprovalFactory;
use fintrack_core::config::{AppConfig, ConfigError, LoadOptions};
use fintrack_db::repositories::SqlApprovalRepository;
use fintrack_db::{connect_with_config, migrations, DbPool};
use thiserror::Error;
use tracing::info;

use crate::audit::TracingAuditSink;
use crate::service::ApprovalService;

pub struct Application {
    pub config: AppConfig,
    pub db_pool: DbPool,
    pub approvals: ApprovalService,
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

/// Connects, migrates and wires an [`ApprovalService`] over SQLite.
pub async fn bootstrap_with_config(config: AppConfig) -> Result<Application, BootstrapError> {
    info!(
        event_name = "system.bootstrap.start",
        correlation_id = "bootstrap",
        "starting application bootstrap"
    );

    let db_pool =
        connect_with_config(&config.database).await.map_err(BootstrapError::DatabaseConnect)?;
    info!(
        event_name = "system.bootstrap.database_connected",
        correlation_id = "bootstrap",
        "database connection established"
    );

    migrations::run_pending(&db_pool).await.map_err(BootstrapError::Migration)?;
    info!(
        event_name = "system.bootstrap.migrations_applied",
        correlation_id = "bootstrap",
        "database migrations applied"
    );

    let approvals = ApprovalService::new(
        Arc::new(SqlApprovalRepository::new(db_pool.clone())),
        ApprovalFactory::from_config(&config.workflow),
    )
    .with_audit_sink(Arc::new(TracingAuditSink));

    Ok(Application { config, db_pool, approvals })
}
