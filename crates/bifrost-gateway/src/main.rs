use std::net::SocketAddr;
use std::sync::Arc;

use clap::Parser;
use tracing::info;

mod app;
mod auth;
mod http;

#[derive(Parser)]
#[command(name = "bifrost-gateway", about = "Protocol-translating LLM reverse proxy")]
struct Args {
    /// Config file path. Falls back to BIFROST_CONFIG, then ./bifrost.json.
    #[arg(short, long)]
    config: Option<String>,

    /// Override the listen port from config / PORT.
    #[arg(short, long)]
    port: Option<u16>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    let mut config = bifrost_core::BifrostConfig::load(args.config.as_deref()).unwrap_or_else(|e| {
        eprintln!("config load failed ({e}), using defaults");
        bifrost_core::BifrostConfig::default()
    });
    if let Some(port) = args.port {
        config.service_config.port = port;
    }

    // config's log level seeds the filter; RUST_LOG always wins
    let default_filter = config
        .log_config
        .level
        .clone()
        .unwrap_or_else(|| "bifrost_gateway=info,tower_http=debug".to_string());
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| default_filter.into()),
        )
        .init();

    let bind = config.service_config.bind.clone();
    let port = config.service_config.port;

    let state = Arc::new(app::AppState::new(config));
    tokio::spawn(state.pool.clone().run_maintenance());

    let router = app::build_router(state);
    let addr: SocketAddr = format!("{bind}:{port}").parse()?;
    info!("bifrost gateway listening on {addr}");

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, router).await?;

    Ok(())
}
