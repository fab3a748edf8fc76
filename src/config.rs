use std::fmt;
use std::time::Duration;

pub const DEFAULT_API_VERSION: &str = "2024-04";
pub const DEFAULT_WEBHOOK_TOPIC: &str = "inventory_levels/update";
pub const WEBHOOK_PATH: &str = "/webhook/inventory";
pub const DEFAULT_XERO_SCOPES: &str =
    "openid profile email accounting.transactions accounting.settings offline_access";

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("missing required environment variable {0}")]
    Missing(&'static str),
    #[error("invalid value for {name}: {reason}")]
    Invalid { name: &'static str, reason: String },
}

/// Process configuration, read once at startup.
#[derive(Debug, Clone)]
pub struct Config {
    pub server: ServerConfig,
    pub shopify: ShopifyConfig,
    pub xero: Option<XeroConfig>,
}

#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

impl ServerConfig {
    pub fn bind_addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

#[derive(Clone)]
pub struct ShopifyConfig {
    pub store_domain: String,
    pub access_token: String,
    pub webhook_secret: Vec<u8>,
    /// Public base URL Shopify should deliver webhooks to.
    pub app_server: String,
    pub api_version: String,
    pub webhook_topic: String,
    pub http_timeout: Duration,
}

impl ShopifyConfig {
    pub fn admin_base_url(&self) -> String {
        format!("https://{}", self.store_domain)
    }

    pub fn webhook_address(&self) -> String {
        format!("{}{}", self.app_server.trim_end_matches('/'), WEBHOOK_PATH)
    }
}

impl fmt::Debug for ShopifyConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ShopifyConfig")
            .field("store_domain", &self.store_domain)
            .field("access_token", &"<redacted>")
            .field("webhook_secret", &"<redacted>")
            .field("app_server", &self.app_server)
            .field("api_version", &self.api_version)
            .field("webhook_topic", &self.webhook_topic)
            .field("http_timeout", &self.http_timeout)
            .finish()
    }
}

#[derive(Clone)]
pub struct XeroConfig {
    pub client_id: String,
    pub client_secret: String,
    pub redirect_uri: String,
    pub scopes: String,
    pub authorize_url: String,
    pub token_url: String,
    pub connections_url: String,
}

impl XeroConfig {
    pub const AUTHORIZE_URL: &'static str = "https://login.xero.com/identity/connect/authorize";
    pub const TOKEN_URL: &'static str = "https://identity.xero.com/connect/token";
    pub const CONNECTIONS_URL: &'static str = "https://api.xero.com/connections";

    pub fn new(
        client_id: impl Into<String>,
        client_secret: impl Into<String>,
        redirect_uri: impl Into<String>,
    ) -> Self {
        Self {
            client_id: client_id.into(),
            client_secret: client_secret.into(),
            redirect_uri: redirect_uri.into(),
            scopes: DEFAULT_XERO_SCOPES.to_string(),
            authorize_url: Self::AUTHORIZE_URL.to_string(),
            token_url: Self::TOKEN_URL.to_string(),
            connections_url: Self::CONNECTIONS_URL.to_string(),
        }
    }
}

impl fmt::Debug for XeroConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("XeroConfig")
            .field("client_id", &self.client_id)
            .field("client_secret", &"<redacted>")
            .field("redirect_uri", &self.redirect_uri)
            .field("scopes", &self.scopes)
            .finish()
    }
}

impl Config {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build the configuration from any key lookup. Empty values count as unset.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());
        let require = |key: &'static str| get(key).ok_or(ConfigError::Missing(key));

        let port = match get("PORT") {
            Some(raw) => raw.parse().map_err(|e| ConfigError::Invalid {
                name: "PORT",
                reason: format!("{e}"),
            })?,
            None => 3000,
        };

        let http_timeout = match get("HTTP_TIMEOUT_SECS") {
            Some(raw) => {
                let secs: u64 = raw.parse().map_err(|e| ConfigError::Invalid {
                    name: "HTTP_TIMEOUT_SECS",
                    reason: format!("{e}"),
                })?;
                Duration::from_secs(secs)
            }
            None => Duration::from_secs(30),
        };

        let shopify = ShopifyConfig {
            store_domain: require("SHOPIFY_STORE_DOMAIN")?,
            access_token: require("SHOPIFY_ACCESS_TOKEN")?,
            webhook_secret: require("SHOPIFY_API_SECRET")?.into_bytes(),
            app_server: require("SHOPIFY_APP_SERVER")?,
            api_version: get("SHOPIFY_API_VERSION")
                .unwrap_or_else(|| DEFAULT_API_VERSION.to_string()),
            webhook_topic: get("SHOPIFY_WEBHOOK_TOPIC")
                .unwrap_or_else(|| DEFAULT_WEBHOOK_TOPIC.to_string()),
            http_timeout,
        };

        let xero = match (
            get("XERO_CLIENT_ID"),
            get("XERO_CLIENT_SECRET"),
            get("XERO_REDIRECT_URI"),
        ) {
            (Some(id), Some(secret), Some(redirect)) => {
                let mut xero = XeroConfig::new(id, secret, redirect);
                if let Some(scopes) = get("XERO_SCOPES") {
                    xero.scopes = scopes;
                }
                Some(xero)
            }
            _ => None,
        };

        Ok(Config {
            server: ServerConfig {
                host: get("BIND_HOST").unwrap_or_else(|| "0.0.0.0".to_string()),
                port,
            },
            shopify,
            xero,
        })
    }
}
