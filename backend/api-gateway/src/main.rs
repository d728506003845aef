use actix_web::HttpServer;
use anyhow::Context;
use api_gateway::{build_app, Config, Gateway};
use clap::Parser;
use std::path::PathBuf;
use tracing::{error, info, warn};
use tracing_subscriber::prelude::*;

#[derive(Debug, Parser)]
#[command(name = "api-gateway", version, about = "HTTP gateway in front of the backend services")]
struct Cli {
    /// Path to the YAML configuration file
    #[arg(long, env = "GATEWAY_CONFIG", default_value = "config.yaml")]
    config: PathBuf,

    /// Listen port, overrides `server.port`
    #[arg(long)]
    port: Option<u16>,
}

#[actix_web::main]
async fn main() {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,api_gateway=debug".into()),
        )
        .with(
            tracing_subscriber::fmt::layer()
                .json()
                .with_current_span(true)
                .with_thread_ids(true)
                .with_line_number(true)
                .with_target(true),
        )
        .init();

    if let Err(e) = run(Cli::parse()).await {
        error!(error = %format!("{e:#}"), "api gateway failed");
        std::process::exit(1);
    }
}

async fn run(cli: Cli) -> anyhow::Result<()> {
    let mut config = Config::load(&cli.config)
        .with_context(|| format!("loading {}", cli.config.display()))?;
    if let Some(port) = cli.port {
        config.server.port = port;
    }

    if crypto_core::jwt::is_weak_secret(config.jwt_secret.as_bytes()) {
        warn!(
            min_len = crypto_core::jwt::MIN_RECOMMENDED_SECRET_LEN,
            "jwt_secret is shorter than recommended"
        );
    }

    let gateway = Gateway::build(&config).context("building gateway")?;
    if config.services.is_empty() {
        warn!("no services configured; only /healthz is served");
    }

    let host = config.server.host.clone();
    let port = config.server.port;
    info!(%host, port, services = config.services.len(), "API gateway starting");

    HttpServer::new(move || build_app(gateway.clone()))
        .shutdown_timeout(config.server.shutdown_timeout_secs)
        .bind((host.as_str(), port))
        .with_context(|| format!("binding {host}:{port}"))?
        .run()
        .await
        .context("server error")?;

    info!("API gateway stopped");
    Ok(())
}
