use std::env;

use anyhow::Result;
use tmpa_api::build_app;
use tmpa_observability::init_tracing;

#[tokio::main]
async fn main() -> Result<()> {
    init_tracing("tmpa_api");

    let bind = env::var("TMPA_BIND").unwrap_or_else(|_| "0.0.0.0:5005".to_string());

    let app = build_app().await?;

    let listener = tokio::net::TcpListener::bind(&bind).await?;
    tracing::info!(bind = %bind, "tmpa support router api started");

    axum::serve(listener, app).await?;
    Ok(())
}
