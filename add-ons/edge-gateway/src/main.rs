use anyhow::Context;
use edge_gateway::{router, AppState, GatewayConfig};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let _ = dotenvy::dotenv();

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,tower_http=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = GatewayConfig::load().context("loading gateway config")?;
    let addr = config.socket_addr()?;
    if config.token.is_none() {
        tracing::warn!(target: "edge::gateway", "HF_TOKEN not set; /api/chat will answer 500");
    }
    tracing::info!(
        target: "edge::gateway",
        "🚀 edge gateway on http://{} (model {})",
        addr,
        config.model
    );

    let app = router(AppState::new(config)?);
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("binding {}", addr))?;
    axum::serve(listener, app).await.context("serving")?;
    Ok(())
}
