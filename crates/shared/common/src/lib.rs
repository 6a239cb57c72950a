//! Common types shared by the service crates.
//!
//! This crate provides:
//! - Pool and token configuration with validation
//! - Request-level errors (`AppError`)
//! - Startup and shutdown errors of the service lifecycle

pub mod config;
pub mod error;

pub use config::*;
pub use error::{
    AggregatedCloseError, AppError, AppResult, ConfigError, OptionExt, PoolError, ShutdownError,
    StartupError,
};
