use crate::config::{Config, WEBHOOK_PATH};
use crate::store::InventoryLog;
use crate::types::{InventoryLevelUpdate, InventoryLogEntry, ReconcileStatus};
use crate::verification::{self, SHOPIFY_HMAC_HEADER};
use crate::xero::{OAuthError, OAuthStateStore, XeroClient, XeroSession, XeroSessionStore};
use axum::{
    body::Bytes,
    extract::{Path, Query, State},
    http::{HeaderMap, StatusCode},
    response::{Html, IntoResponse, Redirect, Response},
    routing::{get, post},
    Json, Router,
};
use serde::Deserialize;
use serde_json::json;
use std::fmt::Write as _;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::sync::RwLock;
use tracing::{error, info, warn};
use uuid::Uuid;

/// State shared by every route.
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Config>,
    pub log: Arc<RwLock<InventoryLog>>,
    pub registration: Arc<RwLock<ReconcileStatus>>,
    pub xero: Option<Arc<XeroClient>>,
    pub oauth_states: Arc<OAuthStateStore>,
    pub xero_sessions: Arc<XeroSessionStore>,
}

impl AppState {
    pub fn new(config: Config, http_client: reqwest::Client) -> Self {
        let xero = config
            .xero
            .clone()
            .map(|xero| Arc::new(XeroClient::new(xero, http_client)));

        Self {
            config: Arc::new(config),
            log: Arc::new(RwLock::new(InventoryLog::new())),
            registration: Arc::new(RwLock::new(ReconcileStatus::Pending)),
            xero,
            oauth_states: Arc::new(OAuthStateStore::new()),
            xero_sessions: Arc::new(XeroSessionStore::new()),
        }
    }
}

pub fn build_router(state: AppState) -> Router {
    Router::new()
        .route("/", get(render_log))
        .route("/health", get(health))
        .route(WEBHOOK_PATH, post(handle_inventory_webhook))
        .route("/xero/redirect", get(xero_redirect))
        .route("/xero/callback", get(xero_callback))
        .route("/xero/session/{session_id}", get(xero_session))
        .with_state(state)
}

/// Bind the listener; called before the startup reconcile is spawned.
pub async fn bind(addr: &str) -> std::io::Result<TcpListener> {
    let listener = TcpListener::bind(addr).await?;
    info!(addr = %listener.local_addr()?, "HTTP server bound");
    Ok(listener)
}

pub async fn serve(listener: TcpListener, state: AppState) -> std::io::Result<()> {
    axum::serve(listener, build_router(state)).await
}

// ─── Inventory ──────────────────────────────────────────────────────────────

async fn handle_inventory_webhook(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> (StatusCode, &'static str) {
    let claimed = headers
        .get(SHOPIFY_HMAC_HEADER)
        .and_then(|v| v.to_str().ok());

    if !verification::verify_shopify_hmac(&body, claimed, &state.config.shopify.webhook_secret) {
        warn!(signature_present = claimed.is_some(), "webhook verification failed");
        return (StatusCode::UNAUTHORIZED, "Unauthorized");
    }

    let update: InventoryLevelUpdate = match serde_json::from_slice(&body) {
        Ok(u) => u,
        Err(e) => {
            warn!(error = %e, "verified webhook has an invalid inventory payload");
            return (StatusCode::BAD_REQUEST, "Bad Request");
        }
    };

    let entry = InventoryLogEntry::received(&update);
    info!(
        inventory_item_id = entry.inventory_item_id,
        available = ?entry.available,
        location_id = ?update.location_id,
        "inventory update received"
    );
    state.log.write().await.record(entry);

    (StatusCode::OK, "Received")
}

async fn render_log(State(state): State<AppState>) -> Html<String> {
    let log = state.log.read().await;

    let mut html = String::from("<h1>📦 Shopify Inventory Updates</h1>");
    if log.is_empty() {
        html.push_str("<p>No updates yet.</p>");
    } else {
        html.push_str("<ul>");
        for (index, entry) in log.entries().enumerate() {
            let available = entry
                .available
                .map(|a| a.to_string())
                .unwrap_or_else(|| "n/a".to_string());
            let _ = write!(
                html,
                "<li><strong>{}:</strong> Inventory Item ID: {}, Available: {}, Updated At: {}</li>",
                index + 1,
                entry.inventory_item_id,
                available,
                entry.updated_at.to_rfc3339(),
            );
        }
        html.push_str("</ul>");
    }

    Html(html)
}

async fn health(State(state): State<AppState>) -> impl IntoResponse {
    let registration = state.registration.read().await.clone();
    let (log_entries, latest_update) = {
        let log = state.log.read().await;
        (log.len(), log.latest().map(|e| e.updated_at))
    };

    Json(json!({
        "status": "ok",
        "version": env!("CARGO_PKG_VERSION"),
        "registration": registration,
        "log_entries": log_entries,
        "latest_update": latest_update,
        "xero_configured": state.xero.is_some(),
        "xero_sessions": state.xero_sessions.len().await,
        "oauth_pending_states": state.oauth_states.pending().await,
    }))
}

// ─── Xero OAuth ─────────────────────────────────────────────────────────────

impl IntoResponse for OAuthError {
    fn into_response(self) -> Response {
        let status = match &self {
            OAuthError::NotConfigured => StatusCode::SERVICE_UNAVAILABLE,
            OAuthError::InvalidState
            | OAuthError::MissingCode
            | OAuthError::AccessDenied(_) => StatusCode::BAD_REQUEST,
            OAuthError::Request(_)
            | OAuthError::TokenExchange { .. }
            | OAuthError::Connections { .. } => StatusCode::BAD_GATEWAY,
        };
        let message = if status == StatusCode::BAD_GATEWAY {
            "Xero authorization failed. Please try again.".to_string()
        } else {
            self.to_string()
        };
        (
            status,
            Html(format!("<h1>Xero connection failed</h1><p>{}</p>", escape_html(&message))),
        )
            .into_response()
    }
}

async fn xero_redirect(State(state): State<AppState>) -> Result<Redirect, OAuthError> {
    let xero = state.xero.as_ref().ok_or(OAuthError::NotConfigured)?;
    let oauth_state = state.oauth_states.issue().await;
    Ok(Redirect::to(&xero.authorize_url(&oauth_state)))
}

#[derive(Debug, Deserialize)]
struct CallbackParams {
    code: Option<String>,
    state: Option<String>,
    error: Option<String>,
}

async fn xero_callback(
    State(state): State<AppState>,
    Query(params): Query<CallbackParams>,
) -> Result<Html<String>, OAuthError> {
    let xero = state.xero.as_ref().ok_or(OAuthError::NotConfigured)?;

    let oauth_state = params.state.as_deref().unwrap_or("");
    if !state.oauth_states.take(oauth_state).await {
        warn!("Xero callback with unknown or expired state");
        return Err(OAuthError::InvalidState);
    }

    if let Some(err) = params.error {
        warn!(error = %err, "Xero authorization denied");
        return Err(OAuthError::AccessDenied(err));
    }
    let code = params.code.as_deref().ok_or(OAuthError::MissingCode)?;

    let tokens = xero.exchange_code(code).await.map_err(|e| {
        error!(error = %e, "Xero token exchange failed");
        e
    })?;
    let tenants = xero.connections(&tokens.access_token).await.map_err(|e| {
        error!(error = %e, "Xero connections lookup failed");
        e
    })?;

    let session = state.xero_sessions.insert(tokens, tenants).await;
    info!(session = %session.id, tenants = session.tenants.len(), "Xero connected");

    Ok(Html(render_session(&session)))
}

async fn xero_session(
    State(state): State<AppState>,
    Path(session_id): Path<Uuid>,
) -> Result<Html<String>, StatusCode> {
    let session = state
        .xero_sessions
        .get(&session_id)
        .await
        .ok_or(StatusCode::NOT_FOUND)?;
    Ok(Html(render_session(&session)))
}

fn render_session(session: &XeroSession) -> String {
    let mut html = String::from("<h1>✅ Xero connected</h1>");
    let _ = write!(
        html,
        "<p>Session: <code>{}</code> (connected {})</p>",
        session.id,
        session.created_at.to_rfc3339()
    );

    let tokens = &session.tokens;
    let _ = write!(
        html,
        "<p>{} token stored server-side{}{}.</p>",
        escape_html(&tokens.token_type),
        tokens
            .expires_in
            .map(|secs| format!(", expires in {secs}s"))
            .unwrap_or_default(),
        if tokens.refresh_token.is_some() || tokens.id_token.is_some() {
            ", refresh/id tokens retained"
        } else {
            ""
        },
    );

    if session.tenants.is_empty() {
        html.push_str("<p>No organisations were connected.</p>");
    } else {
        html.push_str("<ul>");
        for tenant in &session.tenants {
            let _ = write!(
                html,
                "<li>{} [{}] (<code>{}</code>)</li>",
                escape_html(tenant.tenant_name.as_deref().unwrap_or("Unnamed tenant")),
                escape_html(tenant.tenant_type.as_deref().unwrap_or("UNKNOWN")),
                escape_html(&tenant.tenant_id),
            );
        }
        html.push_str("</ul>");
    }
    html
}

fn escape_html(raw: &str) -> String {
    let mut out = String::with_capacity(raw.len());
    for c in raw.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&#39;"),
            _ => out.push(c),
        }
    }
    out
}
