use anyhow::Context;
use service_layer::{bootstrap, config::AppConfig};
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

// Initialize logging and tracing
fn init_tracing() {
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| "info,service_layer=debug".into()),
        ))
        .with(tracing_subscriber::fmt::layer())
        .init();
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load .env before anything reads the environment
    dotenv::dotenv().ok();
    init_tracing();

    info!("🚀 Starting settlement service");

    let config = AppConfig::from_env().context("load configuration")?;
    let app = bootstrap::initialize(&config)
        .await
        .context("initialize settlement components")?;

    app.start().await.context("start background services")?;

    tokio::signal::ctrl_c()
        .await
        .context("listen for shutdown signal")?;
    info!("🛑 Shutdown signal received, draining background services");

    app.shutdown().await.context("graceful shutdown")?;

    info!("👋 Settlement service stopped");
    Ok(())
}
