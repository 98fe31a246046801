//! OpenSASE Marketplace - order placement and fulfillment service

use anyhow::Result;
use opensase_marketplace::api::{self, auth::JwtAuthenticator, rate_limit::InMemoryRateLimiter, AppState, Repositories};
use opensase_marketplace::repository::PgRepository;
use opensase_marketplace::services::{LogMessenger, Messenger, NatsMessenger};
use opensase_marketplace::AppConfig;
use sqlx::postgres::PgPoolOptions;
use std::sync::Arc;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    tracing_subscriber::registry().with(tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into())).with(tracing_subscriber::fmt::layer()).init();

    let config = AppConfig::from_env()?;
    let db = PgPoolOptions::new().max_connections(10).connect(&config.database_url).await?;
    sqlx::migrate!("./migrations").run(&db).await?;

    let messenger: Arc<dyn Messenger> = match &config.nats_url {
        Some(url) => match async_nats::connect(url.as_str()).await {
            Ok(client) => Arc::new(NatsMessenger::new(client)),
            Err(e) => {
                tracing::warn!(error = %e, "NATS unavailable, notifications will only be logged");
                Arc::new(LogMessenger)
            }
        },
        None => Arc::new(LogMessenger),
    };

    let limiter = Arc::new(InMemoryRateLimiter::new(config.rate_limit.requests, config.rate_limit.window));
    let sweeper = limiter.clone();
    let window = config.rate_limit.window;
    tokio::spawn(async move {
        let mut tick = tokio::time::interval(window.max(std::time::Duration::from_secs(1)));
        loop {
            tick.tick().await;
            sweeper.purge_expired();
        }
    });

    let state = AppState::new(
        &config,
        Repositories::shared(PgRepository::new(db)),
        messenger,
        Arc::new(JwtAuthenticator::new(config.jwt_secret.as_bytes())),
        limiter,
    );
    let app = api::router(state);

    tracing::info!("🚀 OpenSASE Marketplace listening on 0.0.0.0:{}", config.port);
    axum::serve(tokio::net::TcpListener::bind(format!("0.0.0.0:{}", config.port)).await?, app).await?;
    Ok(())
}
