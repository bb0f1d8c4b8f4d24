// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! URL/Token Registry
//!
//! Maps function identities to routable endpoints and owns the token
//! lifecycle (issue, validate, refresh, revoke).
//!
//! Only the SHA-256 hash of a token secret is stored. Refresh removes the old
//! record and inserts the new one under a single write lock, so there is no
//! window in which both (or neither) are usable. Revoked records are removed
//! too; an unknown hash is always `TokenNotFound`.

use std::collections::HashMap;
use std::time::Duration;

use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use chrono::{DateTime, Utc};
use rand::RngCore;
use rand::rngs::OsRng;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tokio::sync::RwLock;
use tracing::{debug, info};
use uuid::Uuid;

use crate::descriptor::{DeploymentState, FunctionIdentity, FunctionKey};
use crate::error::{Error, Result};

/// What a token allows. Scopes are exact: a deploy token cannot invoke.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TokenScope {
    /// Deploy and redeploy functions
    Deploy,
    /// Call deployed endpoints
    Invoke,
}

impl std::fmt::Display for TokenScope {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TokenScope::Deploy => write!(f, "deploy"),
            TokenScope::Invoke => write!(f, "invoke"),
        }
    }
}

/// Public identifier of a token, safe to store and log.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TokenId(Uuid);

impl TokenId {
    fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl std::fmt::Display for TokenId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// An issued credential. Immutable; refresh produces a new one.
#[derive(Clone, PartialEq, Eq)]
pub struct AuthToken {
    id: TokenId,
    secret: String,
    owner: String,
    scope: TokenScope,
    issued_at: DateTime<Utc>,
    expires_at: Option<DateTime<Utc>>,
}

impl AuthToken {
    pub fn id(&self) -> TokenId {
        self.id
    }

    /// The opaque secret presented by callers.
    pub fn secret(&self) -> &str {
        &self.secret
    }

    pub fn owner(&self) -> &str {
        &self.owner
    }

    pub fn scope(&self) -> TokenScope {
        self.scope
    }

    pub fn issued_at(&self) -> DateTime<Utc> {
        self.issued_at
    }

    pub fn expires_at(&self) -> Option<DateTime<Utc>> {
        self.expires_at
    }
}

impl std::fmt::Debug for AuthToken {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AuthToken")
            .field("id", &self.id)
            .field("secret", &"<redacted>")
            .field("owner", &self.owner)
            .field("scope", &self.scope)
            .field("issued_at", &self.issued_at)
            .field("expires_at", &self.expires_at)
            .finish()
    }
}

/// What a validated token grants.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TokenGrant {
    pub id: TokenId,
    pub owner: String,
    pub scope: TokenScope,
    pub issued_at: DateTime<Utc>,
    pub expires_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone)]
struct TokenRecord {
    id: TokenId,
    owner: String,
    scope: TokenScope,
    issued_at: DateTime<Utc>,
    expires_at: Option<DateTime<Utc>>,
    ttl: Option<Duration>,
}

impl TokenRecord {
    fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.expires_at.is_some_and(|at| now >= at)
    }

    fn check(&self, now: DateTime<Utc>) -> Result<()> {
        if self.is_expired(now) {
            return Err(Error::TokenExpired);
        }
        Ok(())
    }

    fn grant(&self) -> TokenGrant {
        TokenGrant {
            id: self.id,
            owner: self.owner.clone(),
            scope: self.scope,
            issued_at: self.issued_at,
            expires_at: self.expires_at,
        }
    }
}

/// Routable address of a deployed function.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RemoteEndpoint {
    pub identity: FunctionIdentity,
    pub function: FunctionKey,
    pub url: String,
    /// Deploy token that created this endpoint
    pub token_ref: TokenId,
    pub owner: String,
    pub last_deployed: DateTime<Utc>,
    pub state: DeploymentState,
}

/// URL/Token registry shared by the deployment manager and the dashboard.
#[derive(Default)]
pub struct Registry {
    tokens: RwLock<HashMap<String, TokenRecord>>,
    endpoints: RwLock<HashMap<FunctionIdentity, RemoteEndpoint>>,
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    // ========================================================================
    // Tokens
    // ========================================================================

    /// Issue a new token for `owner`. `ttl = None` never expires.
    pub async fn issue_token(
        &self,
        owner: &str,
        scope: TokenScope,
        ttl: Option<Duration>,
    ) -> AuthToken {
        let (token, record) = new_token(owner, scope, ttl);
        self.tokens
            .write()
            .await
            .insert(hash_secret(&token.secret), record);

        info!(token_id = %token.id, owner = %owner, scope = %scope, "Issued token");
        token
    }

    /// Replace a token with a fresh one carrying the same owner, scope and TTL.
    ///
    /// Fails with [`Error::TokenNotFound`] if the token is unknown, superseded
    /// or revoked. The old secret stops working in the same operation.
    pub async fn refresh(&self, secret: &str) -> Result<AuthToken> {
        let now = Utc::now();
        let mut tokens = self.tokens.write().await;

        let hash = hash_secret(secret);
        tokens.get(&hash).ok_or(Error::TokenNotFound)?.check(now)?;
        let old = tokens.remove(&hash).ok_or(Error::TokenNotFound)?;

        let (token, record) = new_token(&old.owner, old.scope, old.ttl);
        tokens.insert(hash_secret(&token.secret), record);
        let old_id = old.id;

        info!(old_token_id = %old_id, token_id = %token.id, "Refreshed token");
        Ok(token)
    }

    /// Revoke a token. The secret is unknown afterwards, so revoking it again
    /// fails with [`Error::TokenNotFound`].
    pub async fn revoke(&self, secret: &str) -> Result<()> {
        let record = self
            .tokens
            .write()
            .await
            .remove(&hash_secret(secret))
            .ok_or(Error::TokenNotFound)?;
        info!(token_id = %record.id, "Revoked token");
        Ok(())
    }

    /// Validate a token without requiring a scope.
    pub async fn validate(&self, secret: &str) -> Result<TokenGrant> {
        let tokens = self.tokens.read().await;
        let record = tokens
            .get(&hash_secret(secret))
            .ok_or(Error::TokenNotFound)?;
        record.check(Utc::now())?;
        Ok(record.grant())
    }

    /// Validate a token and require `scope`. Fails closed on any mismatch.
    pub async fn authorize(&self, secret: &str, scope: TokenScope) -> Result<TokenGrant> {
        let grant = self.validate(secret).await?;
        if grant.scope != scope {
            debug!(token_id = %grant.id, required = %scope, actual = %grant.scope, "Scope mismatch");
            return Err(Error::InsufficientScope {
                required: scope,
                actual: grant.scope,
            });
        }
        Ok(grant)
    }

    // ========================================================================
    // Endpoints
    // ========================================================================

    /// Record (or replace) the endpoint for an identity.
    pub async fn register(&self, endpoint: RemoteEndpoint) {
        info!(
            identity = %endpoint.identity,
            function = %endpoint.function,
            url = %endpoint.url,
            "Registered endpoint"
        );
        self.endpoints
            .write()
            .await
            .insert(endpoint.identity.clone(), endpoint);
    }

    /// Look up the endpoint for an identity.
    pub async fn lookup(&self, identity: &FunctionIdentity) -> Result<RemoteEndpoint> {
        self.endpoints
            .read()
            .await
            .get(identity)
            .cloned()
            .ok_or_else(|| Error::NotDeployed(identity.to_string()))
    }

    /// Mark an endpoint stale. Returns false if the identity is unknown.
    pub async fn mark_stale(&self, identity: &FunctionIdentity) -> bool {
        self.set_state(identity, DeploymentState::Stale).await
    }

    /// Record the state of an endpoint. Returns false if the identity is unknown.
    pub async fn set_state(&self, identity: &FunctionIdentity, state: DeploymentState) -> bool {
        match self.endpoints.write().await.get_mut(identity) {
            Some(endpoint) => {
                endpoint.state = state;
                info!(identity = %identity, function = %endpoint.function, state = %state, "Endpoint state changed");
                true
            }
            None => false,
        }
    }

    /// Endpoints owned by `owner`, most recently deployed first.
    pub async fn list(&self, owner: &str) -> Vec<RemoteEndpoint> {
        let mut endpoints: Vec<_> = self
            .endpoints
            .read()
            .await
            .values()
            .filter(|e| e.owner == owner)
            .cloned()
            .collect();
        endpoints.sort_by(|a, b| {
            b.last_deployed
                .cmp(&a.last_deployed)
                .then_with(|| a.function.cmp(&b.function))
        });
        endpoints
    }
}

fn new_token(owner: &str, scope: TokenScope, ttl: Option<Duration>) -> (AuthToken, TokenRecord) {
    let issued_at = Utc::now();
    // A TTL too large to represent never expires
    let expires_at = ttl
        .and_then(|ttl| chrono::Duration::from_std(ttl).ok())
        .and_then(|ttl| issued_at.checked_add_signed(ttl));
    let token = AuthToken {
        id: TokenId::new(),
        secret: generate_secret(),
        owner: owner.to_string(),
        scope,
        issued_at,
        expires_at,
    };
    let record = TokenRecord {
        id: token.id,
        owner: token.owner.clone(),
        scope,
        issued_at,
        expires_at,
        ttl,
    };
    (token, record)
}

/// 256 random bits, URL-safe base64.
fn generate_secret() -> String {
    let mut bytes = [0u8; 32];
    OsRng.fill_bytes(&mut bytes);
    URL_SAFE_NO_PAD.encode(bytes)
}

fn hash_secret(secret: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(secret.as_bytes());
    URL_SAFE_NO_PAD.encode(hasher.finalize())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_issue_and_validate() {
        let registry = Registry::new();
        let token = registry.issue_token("alice", TokenScope::Deploy, None).await;

        let grant = registry.validate(token.secret()).await.unwrap();
        assert_eq!(grant.owner, "alice");
        assert_eq!(grant.scope, TokenScope::Deploy);
        assert_eq!(grant.id, token.id());
    }

    #[tokio::test]
    async fn test_unknown_secret_is_not_found() {
        let registry = Registry::new();
        assert_eq!(
            registry.validate("nope").await.unwrap_err(),
            Error::TokenNotFound
        );
    }

    #[tokio::test]
    async fn test_zero_ttl_token_is_expired() {
        let registry = Registry::new();
        let token = registry
            .issue_token("alice", TokenScope::Invoke, Some(Duration::ZERO))
            .await;
        assert_eq!(
            registry.validate(token.secret()).await.unwrap_err(),
            Error::TokenExpired
        );
    }

    #[tokio::test]
    async fn test_secret_is_not_stored_in_clear() {
        let registry = Registry::new();
        let token = registry.issue_token("alice", TokenScope::Deploy, None).await;
        let tokens = registry.tokens.read().await;
        assert!(!tokens.contains_key(token.secret()));
        assert!(tokens.contains_key(&hash_secret(token.secret())));
    }

    #[tokio::test]
    async fn test_refresh_and_revoke_prune_records() {
        let registry = Registry::new();
        let token = registry.issue_token("alice", TokenScope::Deploy, None).await;

        let mut current = token;
        for _ in 0..5 {
            current = registry.refresh(current.secret()).await.unwrap();
        }
        assert_eq!(registry.tokens.read().await.len(), 1);

        registry.revoke(current.secret()).await.unwrap();
        assert!(registry.tokens.read().await.is_empty());
    }

    #[tokio::test]
    async fn test_expired_token_is_not_refreshed() {
        let registry = Registry::new();
        let token = registry
            .issue_token("alice", TokenScope::Deploy, Some(Duration::ZERO))
            .await;
        assert_eq!(
            registry.refresh(token.secret()).await.unwrap_err(),
            Error::TokenExpired
        );
        assert_eq!(registry.tokens.read().await.len(), 1);
    }

    #[tokio::test]
    async fn test_debug_redacts_secret() {
        let registry = Registry::new();
        let token = registry.issue_token("alice", TokenScope::Deploy, None).await;
        assert!(!format!("{:?}", token).contains(token.secret()));
    }

    #[tokio::test]
    async fn test_mark_stale_unknown_identity() {
        let registry = Registry::new();
        let identity = FunctionIdentity::compute("app::f", "fn f() {}");
        assert!(!registry.mark_stale(&identity).await);
        assert!(matches!(
            registry.lookup(&identity).await,
            Err(Error::NotDeployed(_))
        ));
    }
}
