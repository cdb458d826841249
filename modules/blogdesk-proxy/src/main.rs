use anyhow::{Context, Result};
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::info;
use tracing_subscriber::EnvFilter;

use blogdesk_common::Config;
use blogdesk_proxy::{proxy_router, ProxyConfig, ProxyState};

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive("blogdesk=info".parse()?))
        .init();

    let config = Config::proxy_from_env().context("Failed to load proxy configuration")?;
    let proxy_config = ProxyConfig::from_config(&config);
    let addr = proxy_config.listen_addr.clone();

    info!(
        backend = %proxy_config.backend_url,
        prefix = %proxy_config.prefix,
        credential = proxy_config.api_key.is_some(),
        "Proxy configured"
    );

    let state = ProxyState::new(proxy_config).context("Failed to build proxy state")?;

    let app = proxy_router(state)
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any),
        )
        // Method and path only, no query strings
        .layer(
            TraceLayer::new_for_http().make_span_with(|request: &axum::http::Request<_>| {
                tracing::info_span!(
                    "http_request",
                    method = %request.method(),
                    path = %request.uri().path(),
                )
            }),
        );

    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("Failed to bind {addr}"))?;
    info!("Streaming proxy listening on {addr}");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    info!("Proxy stopped");
    Ok(())
}

async fn shutdown_signal() {
    if tokio::signal::ctrl_c().await.is_ok() {
        info!("Shutdown signal received");
    }
}
