//! Error types.
//!
//! Two families live here:
//! - `AppError`: request-level failures of the repositories and services,
//!   mapped to protocol error codes.
//! - Lifecycle errors: `ConfigError`, `PoolError`, `StartupError`,
//!   `ShutdownError` and `AggregatedCloseError`. Startup errors are fatal;
//!   shutdown errors are collected and reported.

use std::fmt;
use std::time::Duration;

use domain::DomainError;
use thiserror::Error;

// =============================================================================
// Request-level errors
// =============================================================================

/// Application error types.
#[derive(Error, Debug)]
pub enum AppError {
    // Authentication & Authorization
    #[error("Authentication required")]
    Unauthorized,

    #[error("Invalid credentials")]
    InvalidCredentials,

    // Resource errors
    #[error("Resource not found")]
    NotFound,

    #[error("{0} already exists")]
    Conflict(String),

    // Validation
    #[error("{0}")]
    Validation(String),

    #[error("Invalid input: {0}")]
    BadRequest(String),

    // External service errors
    #[cfg(feature = "database")]
    #[error("Database error")]
    Database(#[from] sea_orm::DbErr),

    #[cfg(feature = "jwt")]
    #[error("Authentication error")]
    Jwt(#[from] jsonwebtoken::errors::Error),

    #[cfg(feature = "cache")]
    #[error("Cache error")]
    Cache(#[from] redis::RedisError),

    #[error("Service unavailable")]
    ServiceUnavailable(String),

    // Internal
    #[error("Internal server error")]
    Internal(String),
}

impl AppError {
    /// Error code sent to clients
    pub fn code(&self) -> &'static str {
        match self {
            AppError::Unauthorized => "UNAUTHORIZED",
            AppError::InvalidCredentials => "INVALID_CREDENTIALS",
            AppError::NotFound => "NOT_FOUND",
            AppError::Conflict(_) => "CONFLICT",
            AppError::Validation(_) => "VALIDATION_ERROR",
            AppError::BadRequest(_) => "BAD_REQUEST",
            #[cfg(feature = "database")]
            AppError::Database(_) => "DATABASE_ERROR",
            #[cfg(feature = "jwt")]
            AppError::Jwt(_) => "AUTH_ERROR",
            #[cfg(feature = "cache")]
            AppError::Cache(_) => "CACHE_ERROR",
            AppError::ServiceUnavailable(_) => "SERVICE_UNAVAILABLE",
            AppError::Internal(_) => "INTERNAL_ERROR",
        }
    }

    /// User-facing message (hides internal details)
    pub fn user_message(&self) -> String {
        match self {
            // Client errors carry their full message
            AppError::Validation(msg) => msg.clone(),
            AppError::BadRequest(msg) => msg.clone(),

            #[cfg(feature = "database")]
            AppError::Database(e) => {
                tracing::error!(error = ?e, "Database error");
                "A database error occurred".to_string()
            }
            #[cfg(feature = "jwt")]
            AppError::Jwt(e) => {
                tracing::debug!(error = ?e, "Token rejected");
                "Invalid or expired token".to_string()
            }
            #[cfg(feature = "cache")]
            AppError::Cache(e) => {
                tracing::error!(error = ?e, "Cache error");
                "A cache error occurred".to_string()
            }
            AppError::Internal(msg) => {
                tracing::error!("Internal error: {}", msg);
                "An internal error occurred".to_string()
            }
            AppError::ServiceUnavailable(service) => {
                tracing::error!("Service unavailable: {}", service);
                format!("Service {} is unavailable", service)
            }

            _ => self.to_string(),
        }
    }
}

impl From<DomainError> for AppError {
    fn from(err: DomainError) -> Self {
        match err {
            DomainError::Validation(msg) | DomainError::Password(msg) => AppError::Validation(msg),
            DomainError::Internal(msg) => AppError::Internal(msg),
        }
    }
}

/// Result type alias
pub type AppResult<T> = Result<T, AppError>;

/// Extension trait for Option -> AppError conversion
pub trait OptionExt<T> {
    fn ok_or_not_found(self) -> AppResult<T>;
}

impl<T> OptionExt<T> for Option<T> {
    fn ok_or_not_found(self) -> AppResult<T> {
        self.ok_or(AppError::NotFound)
    }
}

/// Convenience constructors
impl AppError {
    pub fn conflict(entity: impl Into<String>) -> Self {
        AppError::Conflict(entity.into())
    }

    pub fn validation(msg: impl Into<String>) -> Self {
        AppError::Validation(msg.into())
    }

    pub fn bad_request(msg: impl Into<String>) -> Self {
        AppError::BadRequest(msg.into())
    }

    pub fn internal(msg: impl Into<String>) -> Self {
        AppError::Internal(msg.into())
    }

    pub fn service_unavailable(service: impl Into<String>) -> Self {
        AppError::ServiceUnavailable(service.into())
    }
}

// =============================================================================
// Configuration
// =============================================================================

/// Malformed or out-of-range static configuration. Aborts startup before any
/// resource is opened.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ConfigError {
    #[error("{setting}: invalid address '{value}': {reason}")]
    InvalidAddress {
        setting: String,
        value: String,
        reason: String,
    },

    #[error("{setting}: min connections ({min}) exceeds max connections ({max})")]
    PoolBounds { setting: String, min: u32, max: u32 },

    #[error("{setting}: must be greater than zero")]
    NotPositive { setting: String },

    #[error("{setting}: cannot parse '{value}'")]
    Unparsable { setting: String, value: String },

    #[error("{setting}: {reason}")]
    Invalid { setting: String, reason: String },
}

impl ConfigError {
    pub fn not_positive(setting: impl Into<String>) -> Self {
        ConfigError::NotPositive {
            setting: setting.into(),
        }
    }

    pub fn unparsable(setting: impl Into<String>, value: impl Into<String>) -> Self {
        ConfigError::Unparsable {
            setting: setting.into(),
            value: value.into(),
        }
    }
}

// =============================================================================
// Pools
// =============================================================================

/// Failure of a pool lifecycle step. `pool` is the pool's short name.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum PoolError {
    #[error("failed to open {pool} pool: {reason}")]
    Open { pool: String, reason: String },

    #[error("{pool} pool failed its liveness probe: {reason}")]
    Probe { pool: String, reason: String },

    #[error("{pool} unavailable: {reason}")]
    CacheUnavailable { pool: String, reason: String },

    #[error("failed to close {pool} pool: {reason}")]
    Close { pool: String, reason: String },
}

impl PoolError {
    pub fn open(pool: impl Into<String>, reason: impl fmt::Display) -> Self {
        PoolError::Open {
            pool: pool.into(),
            reason: reason.to_string(),
        }
    }

    pub fn probe(pool: impl Into<String>, reason: impl fmt::Display) -> Self {
        PoolError::Probe {
            pool: pool.into(),
            reason: reason.to_string(),
        }
    }

    pub fn cache_unavailable(pool: impl Into<String>, reason: impl fmt::Display) -> Self {
        PoolError::CacheUnavailable {
            pool: pool.into(),
            reason: reason.to_string(),
        }
    }

    pub fn close(pool: impl Into<String>, reason: impl fmt::Display) -> Self {
        PoolError::Close {
            pool: pool.into(),
            reason: reason.to_string(),
        }
    }

    /// Name of the pool the error refers to.
    pub fn pool(&self) -> &str {
        match self {
            PoolError::Open { pool, .. }
            | PoolError::Probe { pool, .. }
            | PoolError::CacheUnavailable { pool, .. }
            | PoolError::Close { pool, .. } => pool,
        }
    }
}

/// Every pool that failed to close during teardown.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AggregatedCloseError {
    failures: Vec<PoolError>,
}

impl AggregatedCloseError {
    /// `None` when there is nothing to report.
    pub fn from_failures(failures: Vec<PoolError>) -> Option<Self> {
        if failures.is_empty() {
            None
        } else {
            Some(Self { failures })
        }
    }

    pub fn failures(&self) -> &[PoolError] {
        &self.failures
    }

    pub fn failed_pools(&self) -> Vec<&str> {
        self.failures.iter().map(PoolError::pool).collect()
    }
}

impl fmt::Display for AggregatedCloseError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} pool(s) failed to close", self.failures.len())?;
        for (i, failure) in self.failures.iter().enumerate() {
            let sep = if i == 0 { ": " } else { "; " };
            write!(f, "{}{}", sep, failure)?;
        }
        Ok(())
    }
}

impl std::error::Error for AggregatedCloseError {}

// =============================================================================
// Lifecycle phases
// =============================================================================

/// Fatal startup failure. No connection is ever accepted after one of these.
#[derive(Error, Debug)]
pub enum StartupError {
    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Pool(#[from] PoolError),

    #[error("failed to bind listener on {addr}: {reason}")]
    ListenerBind { addr: String, reason: String },

    #[error("listener cannot start from the {0} state")]
    ListenerState(String),
}

/// Non-fatal teardown failure, reported in the final shutdown status.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ShutdownError {
    #[error("graceful drain exceeded {timeout:?}; forcibly terminated {forced} connection(s)")]
    DrainTimeout { forced: usize, timeout: Duration },

    #[error("listener task failed: {0}")]
    ListenerTask(String),

    #[error(transparent)]
    Close(#[from] AggregatedCloseError),
}
