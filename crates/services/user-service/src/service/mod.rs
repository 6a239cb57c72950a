//! Business logic.

mod token_service;
mod user_service;

pub use token_service::{Claims, JwtService, TokenResponse, TokenService};
pub use user_service::{UserManager, UserService};

#[cfg(any(test, feature = "test-utils"))]
pub use token_service::MockTokenService;
#[cfg(any(test, feature = "test-utils"))]
pub use user_service::MockUserService;
