//! PostgreSQL pool and migrations.

use async_trait::async_trait;
use sea_orm::{ConnectOptions, ConnectionTrait, Database, DatabaseConnection, DbErr, Statement};
use sea_orm_migration::MigratorTrait;

use common::{PoolConfig, PoolError, PoolKind};

use super::migrations::Migrator;
use super::pool::ResourcePool;

/// Relational connection pool (sea-orm over an sqlx pool).
///
/// Cloning the inner `DatabaseConnection` shares the same pool; repositories
/// get such clones for checkout, while closing stays with the pool manager.
#[derive(Clone)]
pub struct RelationalPool {
    connection: DatabaseConnection,
}

impl RelationalPool {
    /// Open the pool eagerly with every limit from `config` applied.
    ///
    /// sqlx establishes a first connection before returning, so an
    /// unreachable server or bad credentials fail here rather than on the
    /// first request.
    pub async fn open(config: &PoolConfig) -> Result<Self, PoolError> {
        let connection = Database::connect(connect_options(config))
            .await
            .map_err(|e| PoolError::open(PoolKind::Relational.name(), e))?;

        Ok(Self { connection })
    }

    /// Pool handle for repositories.
    pub fn connection(&self) -> DatabaseConnection {
        self.connection.clone()
    }

    /// Run pending migrations.
    pub async fn run_migrations(&self) -> Result<(), DbErr> {
        Migrator::up(&self.connection, None).await
    }

    /// Roll back the last migration.
    pub async fn rollback_migration(&self) -> Result<(), DbErr> {
        Migrator::down(&self.connection, Some(1)).await
    }

    /// All known migrations with their applied flag.
    pub async fn migration_status(&self) -> Result<Vec<(String, bool)>, DbErr> {
        use sea_orm::EntityTrait;
        use sea_orm_migration::seaql_migrations;

        let applied: std::collections::HashSet<String> = seaql_migrations::Entity::find()
            .all(&self.connection)
            .await?
            .into_iter()
            .map(|m| m.version)
            .collect();

        Ok(Migrator::migrations()
            .iter()
            .map(|m| {
                let name = m.name().to_string();
                let is_applied = applied.contains(&name);
                (name, is_applied)
            })
            .collect())
    }

    /// Drop everything and re-apply all migrations.
    pub async fn fresh_migrations(&self) -> Result<(), DbErr> {
        Migrator::fresh(&self.connection).await
    }
}

/// Map pool tuning onto sqlx through sea-orm.
///
/// sqlx has no periodic health checker; connections are tested on checkout
/// instead, and idle/lifetime limits retire stale ones. sea-orm feeds both
/// `connect_timeout` and `acquire_timeout` into sqlx's single acquire
/// timeout, so only the dial timeout is set. Per-socket read and write
/// timeouts have no sqlx counterpart.
fn connect_options(config: &PoolConfig) -> ConnectOptions {
    let mut options = ConnectOptions::new(config.url().to_string());
    options
        .max_connections(config.max_connections())
        .min_connections(config.min_connections())
        .connect_timeout(config.dial_timeout())
        .idle_timeout(config.max_idle_time())
        .max_lifetime(config.max_lifetime())
        .test_before_acquire(true)
        .sqlx_logging(false);
    options
}

#[async_trait]
impl ResourcePool for RelationalPool {
    fn name(&self) -> &str {
        PoolKind::Relational.name()
    }

    async fn ping(&self) -> Result<(), PoolError> {
        self.connection
            .execute(Statement::from_string(
                self.connection.get_database_backend(),
                "SELECT 1".to_string(),
            ))
            .await
            .map_err(|e| PoolError::probe(self.name(), e))?;
        Ok(())
    }

    async fn close(&self) -> Result<(), PoolError> {
        // Closing any clone closes the shared sqlx pool.
        self.connection
            .clone()
            .close()
            .await
            .map_err(|e| PoolError::close(self.name(), e))
    }
}
