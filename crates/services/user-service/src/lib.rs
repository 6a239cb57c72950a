//! User Service Library
//!
//! Bootstraps the user service: opens the PostgreSQL and Redis pools,
//! assembles the services on top of them, serves the line-delimited JSON
//! protocol over TCP and tears everything down in order on SIGINT/SIGTERM.

pub mod config;
pub mod infra;
pub mod lifecycle;
pub mod repository;
pub mod service;
pub mod tcp;

#[cfg(test)]
pub(crate) mod testing;

use tracing::info;

use common::{PoolConfig, StartupError};

use crate::config::UserServiceConfig;
use crate::infra::{LiveBackend, RelationalPool, ResourcePool};
use crate::lifecycle::{shutdown_signal, Application, ShutdownReport};

/// Run the service until SIGINT/SIGTERM.
///
/// Startup failures are returned before any connection is accepted; the
/// outcome of the teardown is in the report.
pub async fn serve(config: UserServiceConfig) -> Result<ShutdownReport, StartupError> {
    let mut app = Application::new(config, LiveBackend);
    app.start().await?;
    Ok(app.shutdown(shutdown_signal()).await)
}

/// Run migrations (for CLI commands).
pub async fn run_migrations(
    database: &PoolConfig,
    action: MigrateAction,
) -> Result<(), Box<dyn std::error::Error>> {
    let db = RelationalPool::open(database).await?;
    let result = apply_migration(&db, action).await;
    db.close().await?;
    result
}

async fn apply_migration(
    db: &RelationalPool,
    action: MigrateAction,
) -> Result<(), Box<dyn std::error::Error>> {
    match action {
        MigrateAction::Up => {
            db.run_migrations().await?;
            info!("Migrations applied successfully");
        }
        MigrateAction::Down => {
            db.rollback_migration().await?;
            info!("Rolled back last migration");
        }
        MigrateAction::Status => {
            let status = db.migration_status().await?;
            for (name, applied) in status {
                let marker = if applied { "[x]" } else { "[ ]" };
                println!("{} {}", marker, name);
            }
        }
        MigrateAction::Fresh => {
            db.fresh_migrations().await?;
            info!("Database reset and migrations applied");
        }
    }

    Ok(())
}

/// Migration action type.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MigrateAction {
    Up,
    Down,
    Status,
    Fresh,
}
