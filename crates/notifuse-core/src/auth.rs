//! Workspace-scoped authentication

use argon2::{Argon2, PasswordHash, PasswordVerifier};
use async_trait::async_trait;
use notifuse_common::config::ApiKeyConfig;
use notifuse_common::types::User;
use notifuse_common::{Context, Error, Result};
use sha2::{Digest, Sha256};
use tracing::{debug, warn};

/// Authenticates the caller of an operation against a workspace
#[async_trait]
pub trait Authenticator: Send + Sync {
    async fn authenticate(&self, ctx: &Context, workspace_id: &str) -> Result<User>;
}

/// Authenticate, normalizing any failure into an `Auth` error
pub async fn authenticate_user(
    auth: &dyn Authenticator,
    ctx: &Context,
    workspace_id: &str,
) -> Result<User> {
    auth.authenticate(ctx, workspace_id)
        .await
        .map_err(|e| match e {
            Error::Auth(_) => e,
            other => Error::Auth(other.to_string()),
        })
}

/// Hash an API key using SHA-256 (legacy format)
pub fn hash_api_key(api_key: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(api_key.as_bytes());
    hex::encode(hasher.finalize())
}

/// Verify an API key against a stored hash.
///
/// Supports Argon2 hashes (`$argon2...`) and legacy SHA-256 hex hashes.
pub fn verify_api_key(api_key: &str, stored_hash: &str) -> bool {
    if stored_hash.starts_with("$argon2") {
        return PasswordHash::new(stored_hash)
            .ok()
            .and_then(|parsed_hash| {
                Argon2::default()
                    .verify_password(api_key.as_bytes(), &parsed_hash)
                    .ok()
            })
            .is_some();
    }

    hash_api_key(api_key) == stored_hash
}

/// Authenticator backed by the statically configured API keys
pub struct ApiKeyAuthenticator {
    keys: Vec<ApiKeyConfig>,
}

impl ApiKeyAuthenticator {
    pub fn new(keys: Vec<ApiKeyConfig>) -> Self {
        Self { keys }
    }
}

#[async_trait]
impl Authenticator for ApiKeyAuthenticator {
    async fn authenticate(&self, ctx: &Context, workspace_id: &str) -> Result<User> {
        let token = ctx
            .credentials()
            .filter(|t| !t.is_empty())
            .ok_or_else(|| Error::Auth("missing API key".to_string()))?;

        let key = self
            .keys
            .iter()
            .filter(|k| k.workspace_id == workspace_id)
            .find(|k| verify_api_key(token, &k.key_hash));

        match key {
            Some(key) => {
                debug!(workspace_id = %workspace_id, user_id = %key.user_id, "API key accepted");
                Ok(User {
                    id: key.user_id.clone(),
                    workspace_id: key.workspace_id.clone(),
                    name: key.name.clone(),
                })
            }
            None => {
                warn!(workspace_id = %workspace_id, "API key rejected");
                Err(Error::Auth(format!(
                    "invalid API key for workspace {}",
                    workspace_id
                )))
            }
        }
    }
}
