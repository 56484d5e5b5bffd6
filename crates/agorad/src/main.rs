//! agorad - political topics Q&A daemon
//!
//! Loads configuration, resolves gateway credentials, and serves the
//! response pipeline over HTTP.

use agorad::config::{Config, Credentials};
use agorad::fixtures::offline_pipeline;
use agorad::gateway::{OpenAiGateway, TavilyGateway};
use agorad::{server, AppState, ResponsePipeline};
use anyhow::Result;
use clap::Parser;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{error, info, warn};

#[derive(Parser, Debug)]
#[command(name = "agorad")]
#[command(about = "Agora daemon - balanced answers on political topics", long_about = None)]
#[command(version)]
struct Cli {
    /// Config file (overrides $AGORA_CONFIG and the system path)
    #[arg(long, short)]
    config: Option<PathBuf>,

    /// Listen address (overrides server.bind)
    #[arg(long, env = "AGORA_BIND")]
    bind: Option<String>,

    /// Serve deterministic fixtures instead of live gateways
    #[arg(long)]
    offline: bool,

    /// Model API key (overrides the configured environment variable)
    #[arg(long)]
    model_key: Option<String>,

    /// Search API key (overrides the configured environment variable)
    #[arg(long)]
    search_key: Option<String>,

    /// Verbose logging
    #[arg(long)]
    debug: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let default_filter = if cli.debug {
        "agorad=debug,agora_shared=debug,tower_http=debug"
    } else {
        "agorad=info,agora_shared=info,tower_http=info"
    };
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(default_filter)),
        )
        .init();

    info!("[BOOT] agorad v{} starting", env!("CARGO_PKG_VERSION"));

    let config = match Config::load(cli.config.as_deref()) {
        Ok(config) => Arc::new(config),
        Err(e) => {
            error!("[FATAL] {}", e);
            std::process::exit(2);
        }
    };

    let pipeline = if cli.offline {
        warn!("[BOOT] Offline mode: answers come from built-in fixtures");
        offline_pipeline(&config)
    } else {
        match live_pipeline(config.clone(), cli.model_key, cli.search_key) {
            Ok(pipeline) => pipeline,
            Err(e) => {
                error!("[FATAL] {}", e);
                std::process::exit(2);
            }
        }
    };
    info!(
        "[BOOT] Pipeline ready: model {}, up to {} revision(s)",
        config.model.model, config.pipeline.max_revisions
    );

    let bind = cli.bind.unwrap_or_else(|| config.server.bind.clone());
    server::run(AppState::new(pipeline, config), &bind).await
}

/// Credentials are resolved once here; a missing key stops startup.
fn live_pipeline(
    config: Arc<Config>,
    model_key: Option<String>,
    search_key: Option<String>,
) -> Result<ResponsePipeline, agora_shared::AgoraError> {
    let credentials = match Credentials::from_env(&config) {
        Ok(creds) => creds.with_overrides(model_key, search_key),
        Err(e) => match (model_key, search_key) {
            (Some(m), Some(s)) if !m.trim().is_empty() && !s.trim().is_empty() => Credentials {
                model_api_key: m,
                retrieval_api_key: s,
            },
            _ => return Err(e),
        },
    };

    let model = OpenAiGateway::new(&config.model, credentials.model_api_key)?;
    let retrieval = TavilyGateway::new(&config.retrieval, credentials.retrieval_api_key)?;
    Ok(ResponsePipeline::new(config, Arc::new(model), Arc::new(retrieval)))
}
