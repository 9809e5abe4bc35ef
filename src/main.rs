use std::net::SocketAddr;
use std::sync::Arc;

use notifier::{
    api_router,
    config::AppConfig,
    provider::{EmailProvider, ProviderAdapter, ProviderRegistry, SmsProvider},
    reminder,
    state::AppState,
    worker,
};
use sqlx::sqlite::SqlitePoolOptions;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let config = AppConfig::from_env();

    let pool = SqlitePoolOptions::new()
        .max_connections(5)
        .connect(&config.database_url)
        .await?;

    sqlx::query("PRAGMA foreign_keys = ON;")
        .execute(&pool)
        .await?;

    sqlx::migrate!("./migrations").run(&pool).await?;

    if config.webhook_secret.is_none() {
        warn!("NOTIFIER_WEBHOOK_SECRET is not set; webhook signature verification is DISABLED");
    }
    if config.admin_api_token.is_none() {
        warn!("NOTIFIER_ADMIN_API_TOKEN is not set; admin routes are UNAUTHENTICATED");
    }

    let mut adapters: Vec<Arc<dyn ProviderAdapter>> = Vec::new();
    match &config.email_provider {
        Some(provider_config) => {
            adapters.push(Arc::new(EmailProvider::new(provider_config.clone())?));
        }
        None => warn!("email provider is not configured; email messages will stay pending"),
    }
    match &config.sms_provider {
        Some(provider_config) => {
            adapters.push(Arc::new(SmsProvider::new(provider_config.clone())?));
        }
        None => warn!("SMS provider is not configured; SMS messages will stay pending"),
    }
    let registry = ProviderRegistry::new(adapters);

    let bind_addr = config.bind_addr.clone();
    let delivery_config = config.delivery.clone();
    let reminder_config = config.reminder.clone();
    let clinic_offset = config.clinic_offset();

    let state = AppState::new(pool.clone(), config);

    tokio::spawn(worker::run(
        pool.clone(),
        delivery_config.clone(),
        registry,
        "worker-1".to_string(),
    ));
    tokio::spawn(reminder::run(
        pool,
        reminder_config,
        delivery_config,
        clinic_offset,
    ));

    let app = api_router(state);

    let addr: SocketAddr = bind_addr.parse()?;
    let listener = tokio::net::TcpListener::bind(addr).await?;
    info!(%addr, "notifier listening");
    axum::serve(listener, app).await?;

    Ok(())
}
