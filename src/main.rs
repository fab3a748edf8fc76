mod config;
mod http_server;
mod registration;
mod store;
mod types;
mod verification;
mod xero;

use registration::{DesiredWebhook, ShopifyAdminClient};
use tracing::{error, info, warn};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let dotenv = dotenvy::dotenv();

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "shopify_inventory_sync=info".into()),
        )
        .init();

    if let Err(e) = dotenv {
        // .env is optional
        warn!("no .env file loaded: {e}");
    }

    let config = config::Config::from_env()?;
    info!(
        store = %config.shopify.store_domain,
        api_version = %config.shopify.api_version,
        xero = config.xero.is_some(),
        "starting shopify-inventory-sync"
    );

    let http_client = reqwest::Client::builder()
        .timeout(config.shopify.http_timeout)
        .build()?;

    let admin = ShopifyAdminClient::new(&config.shopify)?;
    let desired = DesiredWebhook::from_config(&config.shopify);
    let bind = config.server.bind_addr();

    let state = http_server::AppState::new(config, http_client);
    let listener = http_server::bind(&bind).await?;

    // Runs once, concurrently with the listener.
    let reconcile_status = state.registration.clone();
    tokio::spawn(async move {
        registration::run_startup_reconcile(&admin, &desired, &reconcile_status).await;
    });

    if let Err(e) = http_server::serve(listener, state).await {
        error!(error = %e, "HTTP server error");
        return Err(e.into());
    }
    Ok(())
}
