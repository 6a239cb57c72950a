//! Service graph - wires repositories, services and the protocol handler.

use std::sync::Arc;

use common::JwtConfig;

use crate::infra::Backend;
use crate::repository::{CacheRepository, UserRepository};
use crate::service::{JwtService, TokenService, UserManager, UserService};
use crate::tcp::{ConnectionHandler, UserProtocol};

/// Everything that serves requests.
///
/// Holds pool handles only through the repositories, which can check
/// connections out but never close a pool.
pub struct ServiceGraph {
    protocol: Arc<UserProtocol>,
}

impl ServiceGraph {
    /// Build the graph on top of open pools. Pure composition.
    pub fn assemble<B: Backend>(
        backend: &B,
        relational: &Arc<B::Relational>,
        cache: &Arc<B::Cache>,
        jwt: &JwtConfig,
    ) -> Self {
        let users: Arc<dyn UserRepository> = backend.user_repository(relational);
        let cache: Arc<dyn CacheRepository> = backend.cache_repository(cache);
        let tokens: Arc<dyn TokenService> = Arc::new(JwtService::new(jwt));
        let service: Arc<dyn UserService> = Arc::new(UserManager::new(users, cache, tokens));

        Self {
            protocol: Arc::new(UserProtocol::new(service)),
        }
    }

    /// Connection handler for the listener
    pub fn handler(&self) -> Arc<dyn ConnectionHandler> {
        self.protocol.clone()
    }
}
