//! Domain layer - user entity and the value objects around it.
//!
//! Pure types with no knowledge of pools, sockets or the service lifecycle.

pub mod constants;
pub mod error;
pub mod password;
pub mod user;

pub use constants::*;
pub use error::{DomainError, DomainResult};
pub use password::Password;
pub use user::{User, UserResponse, UserRole};
