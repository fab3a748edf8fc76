//! Idempotent registration of the inventory webhook with the Shopify Admin API.

use crate::config::ShopifyConfig;
use crate::types::{ReconcileStatus, WebhookFormat, WebhookSubscription};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::{error, info};

#[derive(Debug, thiserror::Error)]
pub enum RegistrationError {
    #[error("failed to build HTTP client: {0}")]
    Client(reqwest::Error),
    #[error("request to Shopify failed: {0}")]
    Request(#[from] reqwest::Error),
    #[error("Shopify API error {status}: {body}")]
    Api { status: u16, body: String },
}

/// The (topic, address) pair that should exist remotely.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DesiredWebhook {
    pub topic: String,
    pub address: String,
}

impl DesiredWebhook {
    pub fn from_config(config: &ShopifyConfig) -> Self {
        Self {
            topic: config.webhook_topic.clone(),
            address: config.webhook_address(),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum ReconcileOutcome {
    AlreadyRegistered(WebhookSubscription),
    Created(WebhookSubscription),
}

impl From<&ReconcileOutcome> for ReconcileStatus {
    fn from(outcome: &ReconcileOutcome) -> Self {
        match outcome {
            ReconcileOutcome::AlreadyRegistered(sub) => {
                ReconcileStatus::AlreadyRegistered { id: sub.id }
            }
            ReconcileOutcome::Created(sub) => ReconcileStatus::Created { id: sub.id },
        }
    }
}

#[derive(Deserialize)]
struct WebhookList {
    #[serde(default)]
    webhooks: Vec<WebhookSubscription>,
}

#[derive(Serialize)]
struct CreateWebhookRequest<'a> {
    webhook: NewWebhook<'a>,
}

#[derive(Serialize)]
struct NewWebhook<'a> {
    topic: &'a str,
    address: &'a str,
    format: WebhookFormat,
}

#[derive(Deserialize)]
struct CreatedWebhook {
    webhook: WebhookSubscription,
}

/// Minimal Shopify Admin REST client for the webhooks resource.
pub struct ShopifyAdminClient {
    client: reqwest::Client,
    base_url: String,
    api_version: String,
    access_token: String,
}

impl ShopifyAdminClient {
    pub fn new(config: &ShopifyConfig) -> Result<Self, RegistrationError> {
        Self::with_base_url(config, config.admin_base_url())
    }

    pub fn with_base_url(
        config: &ShopifyConfig,
        base_url: impl Into<String>,
    ) -> Result<Self, RegistrationError> {
        let client = reqwest::Client::builder()
            .timeout(config.http_timeout)
            .build()
            .map_err(RegistrationError::Client)?;

        Ok(Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            api_version: config.api_version.clone(),
            access_token: config.access_token.clone(),
        })
    }

    fn webhooks_url(&self) -> String {
        format!(
            "{}/admin/api/{}/webhooks.json",
            self.base_url, self.api_version
        )
    }

    pub async fn list_webhooks(&self) -> Result<Vec<WebhookSubscription>, RegistrationError> {
        let resp = self
            .client
            .get(self.webhooks_url())
            .header("X-Shopify-Access-Token", &self.access_token)
            .send()
            .await?;

        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(RegistrationError::Api {
                status: status.as_u16(),
                body,
            });
        }

        let list: WebhookList = resp.json().await?;
        Ok(list.webhooks)
    }

    pub async fn create_webhook(
        &self,
        desired: &DesiredWebhook,
    ) -> Result<WebhookSubscription, RegistrationError> {
        let request = CreateWebhookRequest {
            webhook: NewWebhook {
                topic: &desired.topic,
                address: &desired.address,
                format: WebhookFormat::Json,
            },
        };

        let resp = self
            .client
            .post(self.webhooks_url())
            .header("X-Shopify-Access-Token", &self.access_token)
            .json(&request)
            .send()
            .await?;

        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(RegistrationError::Api {
                status: status.as_u16(),
                body,
            });
        }

        let created: CreatedWebhook = resp.json().await?;
        Ok(created.webhook)
    }
}

/// Ensure exactly one subscription exists for `desired`, creating it only if absent.
pub async fn reconcile(
    client: &ShopifyAdminClient,
    desired: &DesiredWebhook,
) -> Result<ReconcileOutcome, RegistrationError> {
    let existing = client.list_webhooks().await?;

    if let Some(found) = existing
        .into_iter()
        .find(|sub| sub.matches(&desired.topic, &desired.address))
    {
        return Ok(ReconcileOutcome::AlreadyRegistered(found));
    }

    let created = client.create_webhook(desired).await?;
    Ok(ReconcileOutcome::Created(created))
}

/// Run the one-shot startup reconciliation and publish its status.
///
/// Failures are logged and recorded but never propagated: the listener keeps
/// serving webhooks registered by an earlier run.
pub async fn run_startup_reconcile(
    client: &ShopifyAdminClient,
    desired: &DesiredWebhook,
    status: &Arc<RwLock<ReconcileStatus>>,
) -> ReconcileStatus {
    info!(topic = %desired.topic, address = %desired.address, "reconciling webhook subscription");

    let next = match reconcile(client, desired).await {
        Ok(outcome) => {
            match &outcome {
                ReconcileOutcome::AlreadyRegistered(sub) => {
                    info!(id = ?sub.id, "webhook already registered")
                }
                ReconcileOutcome::Created(sub) => info!(id = ?sub.id, "webhook registered"),
            }
            ReconcileStatus::from(&outcome)
        }
        Err(e) => {
            error!(error = %e, "failed to register webhook");
            ReconcileStatus::Failed {
                error: e.to_string(),
            }
        }
    };

    *status.write().await = next.clone();
    next
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use wiremock::matchers::{body_json, header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    const WEBHOOKS_PATH: &str = "/admin/api/2024-04/webhooks.json";

    fn shopify_config() -> ShopifyConfig {
        ShopifyConfig {
            store_domain: "demo.myshopify.com".to_string(),
            access_token: "shpat_test".to_string(),
            webhook_secret: b"whsec".to_vec(),
            app_server: "https://app.example.com".to_string(),
            api_version: "2024-04".to_string(),
            webhook_topic: "inventory_levels/update".to_string(),
            http_timeout: Duration::from_secs(5),
        }
    }

    fn desired() -> DesiredWebhook {
        DesiredWebhook::from_config(&shopify_config())
    }

    fn client_for(server: &MockServer) -> ShopifyAdminClient {
        ShopifyAdminClient::with_base_url(&shopify_config(), server.uri()).unwrap()
    }

    #[test]
    fn desired_from_config() {
        let desired = desired();
        assert_eq!(desired.topic, "inventory_levels/update");
        assert_eq!(desired.address, "https://app.example.com/webhook/inventory");
    }

    #[tokio::test]
    async fn existing_subscription_issues_no_create() {
        let server = MockServer::start().await;

        Mock::given(method("GET"))
            .and(path(WEBHOOKS_PATH))
            .and(header("X-Shopify-Access-Token", "shpat_test"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "webhooks": [
                    {"id": 1, "topic": "orders/create", "address": "https://app.example.com/webhook/inventory", "format": "json"},
                    {"id": 2, "topic": "inventory_levels/update", "address": "https://app.example.com/webhook/inventory", "format": "json"}
                ]
            })))
            .expect(1)
            .mount(&server)
            .await;

        Mock::given(method("POST"))
            .and(path(WEBHOOKS_PATH))
            .respond_with(ResponseTemplate::new(201))
            .expect(0)
            .mount(&server)
            .await;

        let outcome = reconcile(&client_for(&server), &desired()).await.unwrap();
        match outcome {
            ReconcileOutcome::AlreadyRegistered(sub) => assert_eq!(sub.id, Some(2)),
            other => panic!("unexpected outcome: {other:?}"),
        }
    }

    #[tokio::test]
    async fn empty_list_creates_exactly_once() {
        let server = MockServer::start().await;

        Mock::given(method("GET"))
            .and(path(WEBHOOKS_PATH))
            .respond_with(
                ResponseTemplate::new(200).set_body_json(serde_json::json!({ "webhooks": [] })),
            )
            .expect(1)
            .mount(&server)
            .await;

        Mock::given(method("POST"))
            .and(path(WEBHOOKS_PATH))
            .and(header("X-Shopify-Access-Token", "shpat_test"))
            .and(body_json(serde_json::json!({
                "webhook": {
                    "topic": "inventory_levels/update",
                    "address": "https://app.example.com/webhook/inventory",
                    "format": "json"
                }
            })))
            .respond_with(ResponseTemplate::new(201).set_body_json(serde_json::json!({
                "webhook": {
                    "id": 99,
                    "topic": "inventory_levels/update",
                    "address": "https://app.example.com/webhook/inventory",
                    "format": "json"
                }
            })))
            .expect(1)
            .mount(&server)
            .await;

        let outcome = reconcile(&client_for(&server), &desired()).await.unwrap();
        match outcome {
            ReconcileOutcome::Created(sub) => {
                assert_eq!(sub.id, Some(99));
                assert_eq!(sub.format, WebhookFormat::Json);
            }
            other => panic!("unexpected outcome: {other:?}"),
        }
    }

    #[tokio::test]
    async fn same_address_different_topic_still_creates() {
        let server = MockServer::start().await;

        Mock::given(method("GET"))
            .and(path(WEBHOOKS_PATH))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "webhooks": [
                    {"id": 5, "topic": "products/update", "address": "https://app.example.com/webhook/inventory", "format": "json"}
                ]
            })))
            .mount(&server)
            .await;

        Mock::given(method("POST"))
            .and(path(WEBHOOKS_PATH))
            .respond_with(ResponseTemplate::new(201).set_body_json(serde_json::json!({
                "webhook": {"id": 6, "topic": "inventory_levels/update", "address": "https://app.example.com/webhook/inventory", "format": "json"}
            })))
            .expect(1)
            .mount(&server)
            .await;

        let outcome = reconcile(&client_for(&server), &desired()).await.unwrap();
        assert!(matches!(outcome, ReconcileOutcome::Created(_)));
    }

    #[tokio::test]
    async fn foreign_xml_subscription_does_not_block_create() {
        let server = MockServer::start().await;

        Mock::given(method("GET"))
            .and(path(WEBHOOKS_PATH))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "webhooks": [
                    {"id": 1, "topic": "orders/create", "address": "https://other.example.com/x", "format": "xml"},
                    {"id": 2, "topic": "carts/update", "address": "https://other.example.com/y", "format": "protobuf"}
                ]
            })))
            .expect(1)
            .mount(&server)
            .await;

        Mock::given(method("POST"))
            .and(path(WEBHOOKS_PATH))
            .and(body_json(serde_json::json!({
                "webhook": {
                    "topic": "inventory_levels/update",
                    "address": "https://app.example.com/webhook/inventory",
                    "format": "json"
                }
            })))
            .respond_with(ResponseTemplate::new(201).set_body_json(serde_json::json!({
                "webhook": {"id": 3, "topic": "inventory_levels/update", "address": "https://app.example.com/webhook/inventory", "format": "json"}
            })))
            .expect(1)
            .mount(&server)
            .await;

        let client = client_for(&server);
        let listed = client.list_webhooks().await.unwrap();
        assert_eq!(listed[0].format, WebhookFormat::Xml);
        assert_eq!(listed[1].format, WebhookFormat::Other);

        let outcome = reconcile(&client, &desired()).await.unwrap();
        assert!(matches!(outcome, ReconcileOutcome::Created(_)));
    }

    #[tokio::test]
    async fn fetch_failure_skips_create() {
        let server = MockServer::start().await;

        Mock::given(method("GET"))
            .and(path(WEBHOOKS_PATH))
            .respond_with(
                ResponseTemplate::new(401)
                    .set_body_string(r#"{"errors":"[API] Invalid API key or access token"}"#),
            )
            .mount(&server)
            .await;

        Mock::given(method("POST"))
            .and(path(WEBHOOKS_PATH))
            .respond_with(ResponseTemplate::new(201))
            .expect(0)
            .mount(&server)
            .await;

        let err = reconcile(&client_for(&server), &desired())
            .await
            .unwrap_err();
        match err {
            RegistrationError::Api { status, body } => {
                assert_eq!(status, 401);
                assert!(body.contains("Invalid API key"));
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[tokio::test]
    async fn startup_reconcile_records_failure_without_panicking() {
        let server = MockServer::start().await;

        Mock::given(method("GET"))
            .and(path(WEBHOOKS_PATH))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({ "webhooks": [] })))
            .mount(&server)
            .await;

        Mock::given(method("POST"))
            .and(path(WEBHOOKS_PATH))
            .respond_with(ResponseTemplate::new(422).set_body_string(
                r#"{"errors":{"address":["for this topic has already been taken"]}}"#,
            ))
            .expect(1)
            .mount(&server)
            .await;

        let status = Arc::new(RwLock::new(ReconcileStatus::Pending));
        let result = run_startup_reconcile(&client_for(&server), &desired(), &status).await;

        assert!(matches!(result, ReconcileStatus::Failed { .. }));
        assert_eq!(*status.read().await, result);
    }

    #[tokio::test]
    async fn startup_reconcile_records_success() {
        let server = MockServer::start().await;

        Mock::given(method("GET"))
            .and(path(WEBHOOKS_PATH))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "webhooks": [
                    {"id": 7, "topic": "inventory_levels/update", "address": "https://app.example.com/webhook/inventory", "format": "json"}
                ]
            })))
            .mount(&server)
            .await;

        let status = Arc::new(RwLock::new(ReconcileStatus::Pending));
        run_startup_reconcile(&client_for(&server), &desired(), &status).await;

        assert_eq!(
            *status.read().await,
            ReconcileStatus::AlreadyRegistered { id: Some(7) }
        );
    }

    #[tokio::test]
    async fn unreachable_remote_is_a_request_error() {
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        let client =
            ShopifyAdminClient::with_base_url(&shopify_config(), format!("http://{addr}")).unwrap();
        let err = reconcile(&client, &desired()).await.unwrap_err();
        assert!(matches!(err, RegistrationError::Request(_)));
    }
}
