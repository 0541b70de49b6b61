/// tabflow server entry point
///
/// Loads `.env` if present, reads configuration from the environment and
/// starts the HTTP server:
/// - Table and record API at /api/tables/*
/// - Workflow management at /api/workflows/*
/// - Health check at /healthz

use tabflow::{config::Config, server::start_server};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // a missing .env file is fine
    dotenvy::dotenv().ok();

    let config = Config::default();

    start_server(config).await?;

    Ok(())
}
