// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! §4.5 "Auth": users, PBKDF2-HMAC-SHA256 password hashing, opaque bearer
//! access/refresh tokens, revocation, and the out-of-band bootstrap secret.
//!
//! Grounded in the teacher's layered-fallback config resolution for the
//! bootstrap path, generalized to user/session persistence via
//! `FileBackedStore`. Token crypto and revocation bookkeeping are new
//! (the teacher has no auth layer of its own), built with crates already on
//! the workspace dependency list (`pbkdf2`, `sha2`, `hmac`, `hex`, `rand`).

use std::sync::Arc;

use chrono::{Duration, Utc};
use hmac::{Hmac, Mac};
use pbkdf2::pbkdf2_hmac;
use rand::RngCore;
use sha2::Sha256;

use crate::domain::errors::GatewayError;
use crate::domain::session::{Session, SessionKind};
use crate::domain::user::{Role, User};
use crate::infrastructure::repositories::FileBackedStore;

/// §4.5 "≥ 200k iterations".
const PBKDF2_ITERATIONS: u32 = 210_000;
const SALT_BYTES: usize = 16;
const TOKEN_BYTES: usize = 32;

pub struct AuthService {
    users: Arc<FileBackedStore<String, User>>,
    sessions: Arc<FileBackedStore<String, Session>>,
    revoked: Arc<FileBackedStore<String, chrono::DateTime<Utc>>>,
    access_ttl: Duration,
    refresh_ttl: Duration,
    bootstrap_secret: Option<String>,
}

impl AuthService {
    pub fn new(
        users: Arc<FileBackedStore<String, User>>,
        sessions: Arc<FileBackedStore<String, Session>>,
        revoked: Arc<FileBackedStore<String, chrono::DateTime<Utc>>>,
        access_ttl: Duration,
        refresh_ttl: Duration,
        bootstrap_secret: Option<String>,
    ) -> Self {
        Self { users, sessions, revoked, access_ttl, refresh_ttl, bootstrap_secret }
    }

    /// Create the built-in `admin` user on first boot if it doesn't exist.
    pub async fn ensure_bootstrap_admin(&self, username: &str, password: Option<&str>) -> anyhow::Result<()> {
        if self.users.get(&username.to_string()).await.is_some() {
            return Ok(());
        }
        let Some(password) = password else {
            tracing::warn!("no bootstrap admin password configured; admin account not created");
            return Ok(());
        };
        let (salt, hash) = hash_password(password);
        let user = User {
            username: username.to_string(),
            password_hash: hash,
            salt,
            roles: vec![Role::Admin],
            allowed_tools: Vec::new(),
        };
        self.users.insert(username.to_string(), user).await?;
        Ok(())
    }

    pub async fn login(&self, username: &str, password: &str) -> Result<(String, String), GatewayError> {
        let user = self
            .users
            .get(&username.to_string())
            .await
            .ok_or(GatewayError::Unauthorized)?;
        if !verify_password(password, &user.salt, &user.password_hash) {
            return Err(GatewayError::Unauthorized);
        }
        let access = self.mint(username, SessionKind::Access, self.access_ttl).await?;
        let refresh = self.mint(username, SessionKind::Refresh, self.refresh_ttl).await?;
        Ok((access, refresh))
    }

    pub async fn refresh(&self, refresh_token: &str) -> Result<String, GatewayError> {
        let session = self.resolve_active(refresh_token).await?;
        if session.kind != SessionKind::Refresh {
            return Err(GatewayError::Unauthorized);
        }
        self.mint(&session.user, SessionKind::Access, self.access_ttl).await
    }

    pub async fn revoke(&self, token: &str) -> Result<(), GatewayError> {
        if let Some(mut session) = self.sessions.get(&token.to_string()).await {
            session.revoke();
            self.sessions
                .insert(token.to_string(), session)
                .await
                .map_err(|e| GatewayError::ServiceUnavailable { reason: e.to_string() })?;
        }
        self.revoked
            .insert(fingerprint(token), Utc::now())
            .await
            .map_err(|e| GatewayError::ServiceUnavailable { reason: e.to_string() })?;
        Ok(())
    }

    /// §4.5 "bootstrap secret": mints the first admin token without the
    /// parent process ever knowing the admin password.
    pub async fn bootstrap_token(&self, secret: &str, admin_username: &str) -> Result<String, GatewayError> {
        match &self.bootstrap_secret {
            Some(expected) if constant_time_eq(expected.as_bytes(), secret.as_bytes()) => {
                self.mint(admin_username, SessionKind::Access, self.access_ttl)
                    .await
            }
            _ => Err(GatewayError::Unauthorized),
        }
    }

    /// Resolve a bearer token to the `Actor` used by the pipeline (§4.1),
    /// returning `Unauthorized` for anything expired, revoked, or unknown.
    pub async fn resolve_actor(&self, token: &str) -> Result<User, GatewayError> {
        let session = self.resolve_active(token).await?;
        self.users
            .get(&session.user)
            .await
            .ok_or(GatewayError::Unauthorized)
    }

    pub async fn set_password(&self, username: &str, new_password: &str) -> Result<(), GatewayError> {
        let (salt, hash) = hash_password(new_password);
        let updated = self
            .users
            .mutate(&username.to_string(), |existing| match existing {
                Some(user) => {
                    user.password_hash = hash.clone();
                    user.salt = salt.clone();
                    true
                }
                None => false,
            })
            .await
            .map_err(|e| GatewayError::ServiceUnavailable { reason: e.to_string() })?;
        if updated {
            Ok(())
        } else {
            Err(GatewayError::NotFound { what: format!("user {username}") })
        }
    }

    async fn mint(&self, username: &str, kind: SessionKind, ttl: Duration) -> Result<String, GatewayError> {
        let token = random_token();
        let session = Session {
            token: token.clone(),
            user: username.to_string(),
            kind,
            expires_at: Utc::now() + ttl,
            revoked: false,
        };
        self.sessions
            .insert(token.clone(), session)
            .await
            .map_err(|e| GatewayError::ServiceUnavailable { reason: e.to_string() })?;
        Ok(token)
    }

    async fn resolve_active(&self, token: &str) -> Result<Session, GatewayError> {
        if self.revoked.get(&fingerprint(token)).await.is_some() {
            return Err(GatewayError::Unauthorized);
        }
        let session = self.sessions.get(&token.to_string()).await.ok_or(GatewayError::Unauthorized)?;
        if !session.is_active() {
            return Err(GatewayError::Unauthorized);
        }
        Ok(session)
    }
}

fn hash_password(password: &str) -> (String, String) {
    let mut salt_bytes = [0u8; SALT_BYTES];
    rand::thread_rng().fill_bytes(&mut salt_bytes);
    let salt = hex::encode(salt_bytes);
    let hash = pbkdf2_digest(password, &salt);
    (salt, hash)
}

fn verify_password(password: &str, salt: &str, expected_hash: &str) -> bool {
    let computed = pbkdf2_digest(password, salt);
    constant_time_eq(computed.as_bytes(), expected_hash.as_bytes())
}

fn pbkdf2_digest(password: &str, salt: &str) -> String {
    let mut out = [0u8; 32];
    pbkdf2_hmac::<Sha256>(password.as_bytes(), salt.as_bytes(), PBKDF2_ITERATIONS, &mut out);
    hex::encode(out)
}

fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
    use subtle::ConstantTimeEq;
    a.len() == b.len() && a.ct_eq(b).into()
}

fn random_token() -> String {
    let mut bytes = [0u8; TOKEN_BYTES];
    rand::thread_rng().fill_bytes(&mut bytes);
    hex::encode(bytes)
}

/// Revocation set is keyed by a fingerprint of the token, not the token
/// itself, matching §4.5 "a set of token fingerprints (hashed)".
fn fingerprint(token: &str) -> String {
    type HmacSha256 = Hmac<Sha256>;
    let mut mac = HmacSha256::new_from_slice(b"intelli-gateway-revocation").expect("static key");
    mac.update(token.as_bytes());
    hex::encode(mac.finalize().into_bytes())
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn service(dir: &std::path::Path) -> AuthService {
        AuthService::new(
            Arc::new(FileBackedStore::load(dir.join("users.json")).unwrap()),
            Arc::new(FileBackedStore::load(dir.join("sessions.json")).unwrap()),
            Arc::new(FileBackedStore::load(dir.join("revoked.json")).unwrap()),
            Duration::hours(1),
            Duration::days(7),
            Some("bootstrap-secret".to_string()),
        )
    }

    #[tokio::test]
    async fn login_with_correct_password_succeeds() {
        let dir = tempfile::tempdir().unwrap();
        let auth = service(dir.path()).await;
        auth.ensure_bootstrap_admin("admin", Some("hunter2")).await.unwrap();
        let (access, refresh) = auth.login("admin", "hunter2").await.unwrap();
        assert!(!access.is_empty());
        assert!(!refresh.is_empty());
    }

    #[tokio::test]
    async fn login_with_wrong_password_fails() {
        let dir = tempfile::tempdir().unwrap();
        let auth = service(dir.path()).await;
        auth.ensure_bootstrap_admin("admin", Some("hunter2")).await.unwrap();
        assert!(matches!(auth.login("admin", "wrong").await, Err(GatewayError::Unauthorized)));
    }

    #[tokio::test]
    async fn revoked_token_never_authorizes() {
        let dir = tempfile::tempdir().unwrap();
        let auth = service(dir.path()).await;
        auth.ensure_bootstrap_admin("admin", Some("hunter2")).await.unwrap();
        let (access, _) = auth.login("admin", "hunter2").await.unwrap();
        auth.resolve_actor(&access).await.unwrap();
        auth.revoke(&access).await.unwrap();
        assert!(matches!(auth.resolve_actor(&access).await, Err(GatewayError::Unauthorized)));
    }

    #[tokio::test]
    async fn refresh_mints_new_access_token() {
        let dir = tempfile::tempdir().unwrap();
        let auth = service(dir.path()).await;
        auth.ensure_bootstrap_admin("admin", Some("hunter2")).await.unwrap();
        let (_, refresh) = auth.login("admin", "hunter2").await.unwrap();
        let access2 = auth.refresh(&refresh).await.unwrap();
        assert!(auth.resolve_actor(&access2).await.is_ok());
    }

    #[tokio::test]
    async fn bootstrap_token_requires_matching_secret() {
        let dir = tempfile::tempdir().unwrap();
        let auth = service(dir.path()).await;
        auth.ensure_bootstrap_admin("admin", Some("hunter2")).await.unwrap();
        assert!(auth.bootstrap_token("wrong-secret", "admin").await.is_err());
        assert!(auth.bootstrap_token("bootstrap-secret", "admin").await.is_ok());
    }
}
