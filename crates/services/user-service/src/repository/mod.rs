//! Repository layer for data access.

mod cache_repository;
pub mod entities;
mod user_repository;

pub use cache_repository::{
    CacheRepository, RedisUserCache, CACHE_PREFIX_USER, DEFAULT_CACHE_TTL_SECONDS,
};
pub use user_repository::{UserRepository, UserStore};

#[cfg(any(test, feature = "test-utils"))]
pub use cache_repository::MockCacheRepository;
#[cfg(any(test, feature = "test-utils"))]
pub use user_repository::MockUserRepository;
