use anyhow::Context;
use axum::Router;
use std::{net::SocketAddr, sync::Arc};
use stockdash::{
    api::{self, AppState},
    config::AppConfig,
    provider::DataProvider,
    yahoo::YahooClient,
};
use tower_governor::{GovernorLayer, governor::GovernorConfigBuilder};
use tower_http::{cors::CorsLayer, trace::TraceLayer};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let app_config = AppConfig::load().context("failed to load configuration")?;

    // Initialize tracing with node_name in all logs
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("stockdash=info,tower_http=info"));
    tracing_subscriber::fmt().with_env_filter(filter).with_target(false).init();

    // Set a global span with node_name for all subsequent logs
    let _span = tracing::info_span!("node", name = %app_config.node_name).entered();

    tracing::info!("Starting stockdash");
    tracing::info!(
        environment = %app_config.environment,
        port = app_config.port,
        tickers = app_config.dashboard.tickers.len(),
        cache_capacity = app_config.cache.capacity,
        "Loaded configuration"
    );

    let client = YahooClient::new(&app_config.upstream).context("failed to build market data client")?;
    let provider = Arc::new(DataProvider::new(Arc::new(client), &app_config.cache));
    tracing::info!(source = provider.source_name(), "Market data source ready");

    let app_state = AppState {
        provider,
        settings: Arc::new(app_config.dashboard.clone()),
    };

    let governor_conf = Arc::new(
        GovernorConfigBuilder::default()
            .per_second(app_config.rate_limit.per_second)
            .burst_size(app_config.rate_limit.burst)
            .finish()
            .context("invalid API rate limit")?,
    );

    let app: Router = api::router(app_state)
        .layer(GovernorLayer::new(governor_conf))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive());

    let addr = SocketAddr::from(([0, 0, 0, 0], app_config.port));
    tracing::info!(%addr, "Server listening");
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("failed to bind {}", addr))?;
    axum::serve(listener, app.into_make_service_with_connect_info::<SocketAddr>()).await?;

    Ok(())
}
