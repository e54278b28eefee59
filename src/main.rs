//! Veitider server entrypoint
//!
//! Wires configuration, stretch definitions, the pipeline, and the HTTP shell
//! together. All failure modes here are startup failures; once serving, the
//! pipeline degrades instead of exiting.

use std::sync::Arc;

use clap::Parser;
use tracing::info;
use tracing_subscriber::EnvFilter;

use veitider::cli::Cli;
use veitider::pipeline::TravelTimeService;
use veitider::{config, server, stretch};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();

    let mut config = config::load_config()?;
    if let Some(port) = cli.port {
        config.port = port;
    }
    if let Some(path) = cli.stretches {
        config.stretches_path = path;
    }

    let stretches = stretch::load_stretches(&config.stretches_path)?;
    info!(
        stretches = stretches.len(),
        file = %config.stretches_path.display(),
        "loaded stretch definitions"
    );

    let service = Arc::new(TravelTimeService::from_config(&config, stretches)?);

    if cli.fetch_once {
        let data = service.get_travel_data().await?;
        println!("{}", serde_json::to_string_pretty(&data.results)?);
        return Ok(());
    }

    let router = server::build_router(service);
    let listener = tokio::net::TcpListener::bind(("0.0.0.0", config.port)).await?;
    info!(port = config.port, "veitider listening");
    axum::serve(listener, router).await?;

    Ok(())
}
