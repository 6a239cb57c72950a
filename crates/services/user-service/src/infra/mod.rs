//! Infrastructure layer - connection pools and their ownership.

mod backend;
mod cache;
mod db;
pub mod migrations;
pub mod pool;

pub use backend::LiveBackend;
pub use cache::{CacheConnection, CachePool};
pub use db::RelationalPool;
pub use migrations::Migrator;
pub use pool::{Backend, PoolManager, ResourcePool};
