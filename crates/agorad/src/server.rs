//! HTTP server for agorad

use crate::config::Config;
use crate::pipeline::ResponsePipeline;
use crate::routes;
use anyhow::{Context, Result};
use axum::extract::DefaultBodyLimit;
use axum::Router;
use std::sync::Arc;
use std::time::Instant;
use tower_http::trace::TraceLayer;
use tracing::info;

/// Largest accepted request body; evaluation requests may carry custom cases
const MAX_BODY_BYTES: usize = 1024 * 1024;

/// Application state shared across handlers
pub struct AppState {
    pub pipeline: Arc<ResponsePipeline>,
    pub config: Arc<Config>,
    pub start_time: Instant,
}

impl AppState {
    pub fn new(pipeline: ResponsePipeline, config: Arc<Config>) -> Self {
        Self {
            pipeline: Arc::new(pipeline),
            config,
            start_time: Instant::now(),
        }
    }
}

/// All routes over shared state
pub fn router(state: Arc<AppState>) -> Router {
    Router::new()
        .merge(routes::turn_routes())
        .merge(routes::session_routes())
        .merge(routes::eval_routes())
        .merge(routes::health_routes())
        .with_state(state)
        .layer(DefaultBodyLimit::max(MAX_BODY_BYTES))
        .layer(TraceLayer::new_for_http())
}

/// Run the HTTP server until ctrl-c
pub async fn run(state: AppState, bind: &str) -> Result<()> {
    let app = router(Arc::new(state));

    let listener = tokio::net::TcpListener::bind(bind)
        .await
        .with_context(|| format!("binding {}", bind))?;
    info!("  Listening on http://{}", bind);

    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
            info!("Shutting down gracefully");
        })
        .await?;
    Ok(())
}
