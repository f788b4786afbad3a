use std::net::SocketAddr;

use room_stager::{router, AppConfig, AppState};
use tracing_subscriber::{fmt, EnvFilter};

fn mask(secret: &Option<String>) -> String {
    match secret {
        Some(key) => format!("{}...", key.chars().take(6).collect::<String>()),
        None => "<unset>".into(),
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load environment variables from .env file
    dotenv::dotenv().ok();

    // Init tracing
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    fmt().with_env_filter(filter).init();

    let config = AppConfig::from_env();
    tracing::info!(
        "Vision key: {}, image key: {}, admin key: {}",
        mask(&config.vision.api_key),
        mask(&config.image.api_key),
        if config.admin_key.is_some() { "set" } else { "unset" },
    );

    let app = router(AppState::from_config(&config));

    let addr = SocketAddr::from(([0, 0, 0, 0], config.port));
    tracing::info!(%addr, "Starting server");
    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            tokio::signal::ctrl_c().await.ok();
            tracing::info!("Shutting down");
        })
        .await?;
    Ok(())
}
