//! Session context
//!
//! The actor identity and bearer token are passed explicitly to the
//! controller and the backend client. A `401` anywhere invalidates the
//! session; watchers are notified so the kiosk can force re-authentication.

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tracing::{info, warn};

use crate::config::BackendConfig;
use crate::error::BackendError;
use crate::model::ActorIdentity;

pub type SharedSession = Arc<SessionContext>;

pub struct SessionContext {
    actor: ActorIdentity,
    token: RwLock<Option<String>>,
    valid_tx: watch::Sender<bool>,
}

impl SessionContext {
    pub fn new(actor: ActorIdentity, token: impl Into<String>) -> Self {
        let (valid_tx, _) = watch::channel(true);
        Self {
            actor,
            token: RwLock::new(Some(token.into())),
            valid_tx,
        }
    }

    pub fn shared(self) -> SharedSession {
        Arc::new(self)
    }

    pub fn actor(&self) -> &ActorIdentity {
        &self.actor
    }

    pub fn bearer(&self) -> Option<String> {
        self.token.read().clone()
    }

    pub fn is_valid(&self) -> bool {
        *self.valid_tx.borrow()
    }

    /// Drop the token. Idempotent.
    pub fn invalidate(&self) {
        let had_token = self.token.write().take().is_some();
        if had_token {
            warn!("Session for {} invalidated", self.actor.user_id);
        }
        self.valid_tx.send_replace(false);
    }

    pub fn subscribe(&self) -> watch::Receiver<bool> {
        self.valid_tx.subscribe()
    }
}

impl std::fmt::Debug for SessionContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionContext")
            .field("actor", &self.actor)
            .field("valid", &self.is_valid())
            .finish()
    }
}

#[derive(Debug, Serialize)]
struct LoginRequest<'a> {
    username: &'a str,
    password: &'a str,
}

#[derive(Debug, Deserialize)]
pub struct LoginResponse {
    pub access_token: String,
    pub token_type: String,
    pub user: UserProfile,
}

#[derive(Debug, Deserialize)]
pub struct UserProfile {
    pub id: String,
    pub username: String,
    #[serde(rename = "type")]
    pub user_type: String,
    pub role: String,
    pub company_id: Option<String>,
    pub company_name: Option<String>,
}

impl From<UserProfile> for ActorIdentity {
    fn from(user: UserProfile) -> Self {
        ActorIdentity {
            user_id: user.id,
            username: user.username,
            role: user.role,
            tenant_id: user.company_id,
            tenant_name: user.company_name,
        }
    }
}

/// Authenticate against the backend and build a session
pub async fn login(
    client: &reqwest::Client,
    backend: &BackendConfig,
    username: &str,
    password: &str,
) -> Result<SessionContext, BackendError> {
    let response = client
        .post(backend.login_url())
        .timeout(Duration::from_secs(backend.request_timeout_secs))
        .json(&LoginRequest { username, password })
        .send()
        .await?;

    let status = response.status();
    if status == reqwest::StatusCode::UNAUTHORIZED {
        return Err(BackendError::InvalidCredentials);
    }
    if !status.is_success() {
        let body = response.text().await.unwrap_or_default();
        return Err(BackendError::Status { status: status.as_u16(), body });
    }

    let login: LoginResponse = response
        .json()
        .await
        .map_err(|e| BackendError::InvalidResponse(e.to_string()))?;

    if !login.token_type.eq_ignore_ascii_case("bearer") {
        return Err(BackendError::InvalidResponse(format!(
            "unsupported token type: {}",
            login.token_type
        )));
    }

    let actor = ActorIdentity::from(login.user);
    info!(
        "Logged in as {} ({}, company: {})",
        actor.username,
        actor.role,
        actor.tenant_name.as_deref().unwrap_or("-")
    );
    Ok(SessionContext::new(actor, login.access_token))
}
