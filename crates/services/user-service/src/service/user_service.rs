//! User service - Handles user-related business logic.
//!
//! Reads go through the cache (cache-aside); writes go to the repository and
//! invalidate the cached copy. Cache failures degrade to repository reads.

use async_trait::async_trait;
use std::sync::Arc;
use tracing::{debug, warn};
use uuid::Uuid;

use common::{AppError, AppResult, OptionExt};
use domain::{Password, User, MAX_NAME_LENGTH};

use super::token_service::{TokenResponse, TokenService};
use crate::repository::{CacheRepository, UserRepository};

#[cfg(any(test, feature = "test-utils"))]
use mockall::automock;

/// Verified against when the email is unknown, so both paths cost one hash.
const DUMMY_HASH: &str =
    "$argon2id$v=19$m=19456,t=2,p=1$ZHVtbXlzYWx0MTIzNDU2$ZHVtbXloYXNoMTIzNDU2Nzg5MDEyMzQ1Njc4OTAxMg";

#[cfg_attr(any(test, feature = "test-utils"), automock)]
#[async_trait]
pub trait UserService: Send + Sync {
    /// Create an account with a hashed password
    async fn register(&self, email: String, password: String, name: String) -> AppResult<User>;

    /// Check credentials and issue an access token
    async fn login(&self, email: String, password: String) -> AppResult<TokenResponse>;

    /// Active user by id
    async fn get_user(&self, id: Uuid) -> AppResult<User>;

    async fn update_user(&self, id: Uuid, name: String) -> AppResult<User>;

    /// Soft delete
    async fn delete_user(&self, id: Uuid) -> AppResult<()>;

    /// Resolve a bearer token to its (still active) user
    async fn authenticate(&self, token: &str) -> AppResult<User>;
}

/// Concrete implementation of UserService.
pub struct UserManager {
    repo: Arc<dyn UserRepository>,
    cache: Arc<dyn CacheRepository>,
    tokens: Arc<dyn TokenService>,
}

impl UserManager {
    pub fn new(
        repo: Arc<dyn UserRepository>,
        cache: Arc<dyn CacheRepository>,
        tokens: Arc<dyn TokenService>,
    ) -> Self {
        Self {
            repo,
            cache,
            tokens,
        }
    }

    async fn invalidate(&self, id: Uuid) {
        if let Err(e) = self.cache.invalidate_user(id).await {
            warn!(user_id = %id, error = %e, "Failed to invalidate cached user");
        }
    }
}

fn validate_email(email: &str) -> AppResult<String> {
    let email = email.trim().to_lowercase();
    match email.split_once('@') {
        Some((local, domain)) if !local.is_empty() && domain.contains('.') => Ok(email),
        _ => Err(AppError::validation("Invalid email address")),
    }
}

fn validate_name(name: &str) -> AppResult<String> {
    let name = name.trim();
    if name.is_empty() {
        return Err(AppError::validation("Name must not be empty"));
    }
    if name.chars().count() > MAX_NAME_LENGTH {
        return Err(AppError::validation(format!(
            "Name must be at most {} characters",
            MAX_NAME_LENGTH
        )));
    }
    Ok(name.to_string())
}

#[async_trait]
impl UserService for UserManager {
    async fn register(&self, email: String, password: String, name: String) -> AppResult<User> {
        let email = validate_email(&email)?;
        let name = validate_name(&name)?;

        // Soft-deleted accounts keep their email reserved
        if self.repo.email_taken(&email).await? {
            return Err(AppError::conflict("User"));
        }

        let password_hash = Password::new(&password)?.into_string();
        let user = self.repo.create(email, password_hash, name).await?;
        debug!(user_id = %user.id, "User registered");
        Ok(user)
    }

    async fn login(&self, email: String, password: String) -> AppResult<TokenResponse> {
        let email = email.trim().to_lowercase();
        let user = self.repo.find_by_email(&email).await?;

        let stored = match &user {
            Some(user) => Password::from_hash(user.password_hash.as_str()),
            None => Password::from_hash(DUMMY_HASH),
        };
        let password_valid = stored.verify(&password);

        match user {
            Some(user) if password_valid => self.tokens.issue(&user),
            _ => Err(AppError::InvalidCredentials),
        }
    }

    async fn get_user(&self, id: Uuid) -> AppResult<User> {
        match self.cache.get_user(id).await {
            Ok(Some(user)) => return Ok(user),
            Ok(None) => {}
            Err(e) => warn!(user_id = %id, error = %e, "Cache read failed, using database"),
        }

        let user = self.repo.find_by_id(id).await?.ok_or_not_found()?;

        if let Err(e) = self.cache.set_user(&user).await {
            warn!(user_id = %id, error = %e, "Failed to cache user");
        }
        Ok(user)
    }

    async fn update_user(&self, id: Uuid, name: String) -> AppResult<User> {
        let name = validate_name(&name)?;
        let user = self.repo.update_name(id, name).await?;
        self.invalidate(id).await;
        Ok(user)
    }

    async fn delete_user(&self, id: Uuid) -> AppResult<()> {
        self.repo.delete(id).await?;
        self.invalidate(id).await;
        Ok(())
    }

    async fn authenticate(&self, token: &str) -> AppResult<User> {
        let claims = self.tokens.validate(token)?;
        match self.get_user(claims.sub).await {
            Ok(user) => Ok(user),
            Err(AppError::NotFound) => Err(AppError::Unauthorized),
            Err(e) => Err(e),
        }
    }
}
