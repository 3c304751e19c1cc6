use std::net::SocketAddr;
use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Parser;
use funix_server::{
    AppState, Registry, app_router, demo, dispatcher_from_settings, get_configuration,
};
use tracing::info;
use tracing_subscriber::prelude::*;

#[derive(Parser, Debug, Clone)]
#[command(name = "funix", about = "Serve functions as web apps", version)]
struct Opts {
    /// Directory holding base.yaml and the per-environment overrides
    #[arg(long, env = "FUNIX_CONFIG_DIR", default_value = "configuration")]
    config_dir: PathBuf,

    /// Overrides `application.host`
    #[arg(long, env = "FUNIX_HOST")]
    host: Option<String>,

    /// Overrides `application.port`
    #[arg(long, env = "FUNIX_PORT")]
    port: Option<u16>,
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    init_tracing();
    let opts = Opts::parse();

    let mut settings = get_configuration(&opts.config_dir).context("loading configuration")?;
    if let Some(host) = opts.host {
        settings.application.host = host;
    }
    if let Some(port) = opts.port {
        settings.application.port = port;
    }

    let mut registry = Registry::default();
    settings
        .engine
        .load_themes(&opts.config_dir, registry.themes_mut())?;
    demo::register(&mut registry)?;
    info!(functions = registry.len(), "registry ready");

    let dispatcher = dispatcher_from_settings(registry, &settings.engine)?;
    let state =
        AppState::new(dispatcher).trust_forwarded_for(settings.application.trust_forwarded_for);
    let app = app_router(state);

    let bind_addr = format!("{}:{}", settings.application.host, settings.application.port);
    let listener = tokio::net::TcpListener::bind(&bind_addr)
        .await
        .with_context(|| format!("binding {bind_addr}"))?;
    info!(address = %bind_addr, "funix listening");
    axum::serve(listener, app.into_make_service_with_connect_info::<SocketAddr>()).await?;
    Ok(())
}

fn init_tracing() {
    use tracing_subscriber::{EnvFilter, fmt};
    let default_filter = "info,tower_http=warn";
    let _ = tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| default_filter.into()))
        .with(fmt::layer())
        .try_init();
}
