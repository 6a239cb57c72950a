//! User service configuration.

use std::env;
use std::str::FromStr;
use std::time::Duration;

use common::{ConfigError, JwtConfig, JwtSettings, PoolConfig, PoolKind, PoolSettings};

/// Default listen address (all interfaces, Go-style shorthand).
pub const DEFAULT_LISTEN_ADDR: &str = ":3001";

/// Default budget for draining the listener during shutdown.
pub const DEFAULT_SHUTDOWN_TIMEOUT_SECS: u64 = 10;

/// Validated user service configuration.
#[derive(Debug, Clone)]
pub struct UserServiceConfig {
    /// PostgreSQL pool
    pub database: PoolConfig,
    /// Redis pool
    pub cache: PoolConfig,
    /// Token signing
    pub jwt: JwtConfig,
    /// TCP listen address
    pub listen_addr: String,
    /// Listener drain budget
    pub shutdown_timeout: Duration,
}

impl UserServiceConfig {
    /// Load configuration from environment variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Load configuration from an arbitrary key lookup.
    ///
    /// Unset keys fall back to defaults; set but unparsable keys are errors.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let database = database_settings(&lookup)?;

        let mut cache = pool_settings(&lookup, "REDIS", PoolSettings::cache_defaults())?;
        if let Some(url) = lookup("USER_SERVICE_REDIS_URL").or_else(|| lookup("REDIS_URL")) {
            cache.url = url;
        }

        let jwt = JwtSettings {
            secret: lookup("JWT_SECRET").unwrap_or_default(),
            expiration_hours: parse_or(
                &lookup,
                "JWT_EXPIRATION_HOURS",
                JwtSettings::default().expiration_hours,
            )?,
        };

        let shutdown_secs = parse_or(
            &lookup,
            "USER_SERVICE_SHUTDOWN_TIMEOUT_SECS",
            DEFAULT_SHUTDOWN_TIMEOUT_SECS,
        )?;
        if shutdown_secs == 0 {
            return Err(ConfigError::not_positive("USER_SERVICE_SHUTDOWN_TIMEOUT_SECS"));
        }

        Ok(Self {
            database: database.validate(PoolKind::Relational)?,
            cache: cache.validate(PoolKind::Cache)?,
            jwt: jwt.validate()?,
            listen_addr: lookup("USER_SERVICE_LISTEN_ADDR")
                .unwrap_or_else(|| DEFAULT_LISTEN_ADDR.to_string()),
            shutdown_timeout: Duration::from_secs(shutdown_secs),
        })
    }

    /// Relational pool configuration alone, for commands that need no
    /// token secret (migrations).
    pub fn database_from_env() -> Result<PoolConfig, ConfigError> {
        Self::database_from_lookup(|key| env::var(key).ok())
    }

    pub fn database_from_lookup<F>(lookup: F) -> Result<PoolConfig, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        database_settings(&lookup)?.validate(PoolKind::Relational)
    }

    /// Override the listen address (CLI flags win over the environment).
    pub fn with_listen_addr(mut self, addr: impl Into<String>) -> Self {
        self.listen_addr = addr.into();
        self
    }
}

fn database_settings<F>(lookup: &F) -> Result<PoolSettings, ConfigError>
where
    F: Fn(&str) -> Option<String>,
{
    let mut database = pool_settings(lookup, "DATABASE", PoolSettings::relational_defaults())?;
    if let Some(url) = lookup("USER_SERVICE_DATABASE_URL").or_else(|| lookup("DATABASE_URL")) {
        database.url = url;
    }
    Ok(database)
}

fn pool_settings<F>(lookup: &F, prefix: &str, defaults: PoolSettings) -> Result<PoolSettings, ConfigError>
where
    F: Fn(&str) -> Option<String>,
{
    let key = |field: &str| format!("{}_{}", prefix, field);

    Ok(PoolSettings {
        max_connections: parse_or(lookup, &key("MAX_CONNECTIONS"), defaults.max_connections)?,
        min_connections: parse_or(lookup, &key("MIN_CONNECTIONS"), defaults.min_connections)?,
        max_lifetime_secs: parse_or(lookup, &key("MAX_LIFETIME_SECS"), defaults.max_lifetime_secs)?,
        max_idle_time_secs: parse_or(
            lookup,
            &key("MAX_IDLE_TIME_SECS"),
            defaults.max_idle_time_secs,
        )?,
        health_check_interval_secs: parse_or(
            lookup,
            &key("HEALTH_CHECK_INTERVAL_SECS"),
            defaults.health_check_interval_secs,
        )?,
        dial_timeout_ms: parse_or(lookup, &key("DIAL_TIMEOUT_MS"), defaults.dial_timeout_ms)?,
        read_timeout_ms: parse_or(lookup, &key("READ_TIMEOUT_MS"), defaults.read_timeout_ms)?,
        write_timeout_ms: parse_or(lookup, &key("WRITE_TIMEOUT_MS"), defaults.write_timeout_ms)?,
        url: defaults.url,
    })
}

fn parse_or<F, T>(lookup: &F, key: &str, default: T) -> Result<T, ConfigError>
where
    F: Fn(&str) -> Option<String>,
    T: FromStr,
{
    match lookup(key) {
        None => Ok(default),
        Some(raw) => raw
            .trim()
            .parse()
            .map_err(|_| ConfigError::unparsable(key, raw)),
    }
}
