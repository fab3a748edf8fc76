//! Xero OAuth2 authorization-code flow.

use crate::config::XeroConfig;
use chrono::{DateTime, Duration, Utc};
use rand::RngCore;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use tokio::sync::RwLock;
use uuid::Uuid;

const STATE_TTL_MINUTES: i64 = 10;
pub const MAX_PENDING_STATES: usize = 1024;

#[derive(Debug, thiserror::Error)]
pub enum OAuthError {
    #[error("Xero integration is not configured")]
    NotConfigured,
    #[error("unknown or expired OAuth state")]
    InvalidState,
    #[error("missing authorization code")]
    MissingCode,
    #[error("authorization was declined: {0}")]
    AccessDenied(String),
    #[error("HTTP error: {0}")]
    Request(#[from] reqwest::Error),
    #[error("token exchange failed {status}: {body}")]
    TokenExchange { status: u16, body: String },
    #[error("connections lookup failed {status}: {body}")]
    Connections { status: u16, body: String },
}

#[derive(Clone, Deserialize)]
pub struct XeroTokenSet {
    pub access_token: String,
    #[serde(default)]
    pub refresh_token: Option<String>,
    #[serde(default)]
    pub id_token: Option<String>,
    #[serde(default)]
    pub expires_in: Option<u64>,
    pub token_type: String,
    #[serde(default)]
    pub scope: Option<String>,
}

impl std::fmt::Debug for XeroTokenSet {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("XeroTokenSet")
            .field("token_type", &self.token_type)
            .field("expires_in", &self.expires_in)
            .field("scope", &self.scope)
            .finish_non_exhaustive()
    }
}

/// A tenant the authorizing user connected to this app.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct XeroConnection {
    #[allow(dead_code)]
    pub id: String,
    pub tenant_id: String,
    #[serde(default)]
    pub tenant_type: Option<String>,
    #[serde(default)]
    pub tenant_name: Option<String>,
}

pub struct XeroClient {
    config: XeroConfig,
    http_client: reqwest::Client,
}

impl XeroClient {
    pub fn new(config: XeroConfig, http_client: reqwest::Client) -> Self {
        Self {
            config,
            http_client,
        }
    }

    pub fn authorize_url(&self, state: &str) -> String {
        format!(
            "{}?response_type=code&client_id={}&redirect_uri={}&scope={}&state={}",
            self.config.authorize_url,
            urlencoding::encode(&self.config.client_id),
            urlencoding::encode(&self.config.redirect_uri),
            urlencoding::encode(&self.config.scopes),
            urlencoding::encode(state)
        )
    }

    pub async fn exchange_code(&self, code: &str) -> Result<XeroTokenSet, OAuthError> {
        let mut params = HashMap::new();
        params.insert("grant_type", "authorization_code");
        params.insert("code", code);
        params.insert("redirect_uri", self.config.redirect_uri.as_str());

        let response = self
            .http_client
            .post(&self.config.token_url)
            .basic_auth(&self.config.client_id, Some(&self.config.client_secret))
            .header("Accept", "application/json")
            .form(&params)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(OAuthError::TokenExchange {
                status: status.as_u16(),
                body,
            });
        }

        Ok(response.json().await?)
    }

    pub async fn connections(&self, access_token: &str) -> Result<Vec<XeroConnection>, OAuthError> {
        let response = self
            .http_client
            .get(&self.config.connections_url)
            .bearer_auth(access_token)
            .header("Accept", "application/json")
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(OAuthError::Connections {
                status: status.as_u16(),
                body,
            });
        }

        Ok(response.json().await?)
    }
}

/// Random hex token used as the OAuth `state` parameter.
pub fn generate_state() -> String {
    let mut bytes = [0u8; 32];
    rand::thread_rng().fill_bytes(&mut bytes);
    hex::encode(bytes)
}

/// Pending authorization states, each usable once.
#[derive(Debug, Default)]
pub struct OAuthStateStore {
    states: RwLock<HashMap<String, DateTime<Utc>>>,
}

impl OAuthStateStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Issue a new state. At most `MAX_PENDING_STATES` are kept; the one
    /// closest to expiry is evicted to make room.
    pub async fn issue(&self) -> String {
        let state = generate_state();
        let now = Utc::now();
        let expires_at = now + Duration::minutes(STATE_TTL_MINUTES);

        let mut states = self.states.write().await;
        states.retain(|_, exp| *exp > now);
        while states.len() >= MAX_PENDING_STATES {
            let Some(oldest) = states
                .iter()
                .min_by_key(|(_, exp)| **exp)
                .map(|(key, _)| key.clone())
            else {
                break;
            };
            states.remove(&oldest);
        }
        states.insert(state.clone(), expires_at);
        state
    }

    pub async fn pending(&self) -> usize {
        self.states.read().await.len()
    }

    /// Consume `state`; returns false if it was never issued, already used or expired.
    pub async fn take(&self, state: &str) -> bool {
        let mut states = self.states.write().await;
        match states.remove(state) {
            Some(expires_at) => expires_at > Utc::now(),
            None => false,
        }
    }

    #[cfg(test)]
    async fn insert_with_expiry(&self, state: &str, expires_at: DateTime<Utc>) {
        self.states
            .write()
            .await
            .insert(state.to_string(), expires_at);
    }
}

#[derive(Debug, Clone)]
pub struct XeroSession {
    pub id: Uuid,
    pub tokens: XeroTokenSet,
    pub tenants: Vec<XeroConnection>,
    pub created_at: DateTime<Utc>,
}

/// Server-side holder for credentials obtained through the callback.
#[derive(Debug, Default)]
pub struct XeroSessionStore {
    sessions: RwLock<HashMap<Uuid, XeroSession>>,
}

impl XeroSessionStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn insert(&self, tokens: XeroTokenSet, tenants: Vec<XeroConnection>) -> XeroSession {
        let session = XeroSession {
            id: Uuid::new_v4(),
            tokens,
            tenants,
            created_at: Utc::now(),
        };
        self.sessions
            .write()
            .await
            .insert(session.id, session.clone());
        session
    }

    pub async fn get(&self, id: &Uuid) -> Option<XeroSession> {
        self.sessions.read().await.get(id).cloned()
    }

    pub async fn len(&self) -> usize {
        self.sessions.read().await.len()
    }
}
