use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Body of a Shopify `inventory_levels/update` webhook.
#[derive(Debug, Clone, Deserialize)]
pub struct InventoryLevelUpdate {
    pub inventory_item_id: i64,
    #[serde(default)]
    pub location_id: Option<i64>,
    #[serde(default)]
    pub available: Option<i64>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct InventoryLogEntry {
    pub inventory_item_id: i64,
    pub available: Option<i64>,
    pub updated_at: DateTime<Utc>,
}

impl InventoryLogEntry {
    /// Build an entry stamped with the current server time.
    pub fn received(update: &InventoryLevelUpdate) -> Self {
        Self {
            inventory_item_id: update.inventory_item_id,
            available: update.available,
            updated_at: Utc::now(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WebhookFormat {
    #[default]
    Json,
    Xml,
    /// Any format this service does not know about.
    #[serde(other)]
    Other,
}

/// A webhook subscription as reported by the Shopify Admin API.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WebhookSubscription {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<u64>,
    pub topic: String,
    pub address: String,
    #[serde(default)]
    pub format: WebhookFormat,
}

impl WebhookSubscription {
    pub fn matches(&self, topic: &str, address: &str) -> bool {
        self.address == address && self.topic == topic
    }
}

/// Outcome of the startup registration, observable through `/health`.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum ReconcileStatus {
    Pending,
    AlreadyRegistered { id: Option<u64> },
    Created { id: Option<u64> },
    Failed { error: String },
}
