// ABOUTME: HTTP boundary exposed to the UI layer
// ABOUTME: Router construction, CORS, request tracing and graceful shutdown

pub mod routes;

use anyhow::{Context, Result};
use axum::http::{header::CONTENT_TYPE, Method};
use axum::routing::get;
use axum::Router;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use crate::config::Config;
use crate::orchestrator::Orchestrator;

pub use routes::ApiResponse;

/// Which upstream credentials are present, reported by the health route.
#[derive(Debug, Clone, Copy, Default)]
pub struct Readiness {
    pub job_queue_configured: bool,
    pub crm_configured: bool,
}

impl Readiness {
    pub fn from_config(config: &Config) -> Self {
        Self {
            job_queue_configured: config.job_queue_token.is_some(),
            crm_configured: config.crm_function_url.is_some() && config.crm_api_key.is_some(),
        }
    }
}

#[derive(Clone)]
pub struct AppState {
    pub orchestrator: Arc<Orchestrator>,
    pub readiness: Readiness,
}

pub fn build_router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods([Method::GET, Method::OPTIONS])
        .allow_headers([CONTENT_TYPE]);

    Router::new()
        .route(
            "/api/client-data",
            get(routes::client_data_handler).fallback(routes::method_not_allowed),
        )
        .route(
            "/api/health",
            get(routes::health_handler).fallback(routes::method_not_allowed),
        )
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Serve until `shutdown` is cancelled.
pub async fn serve(config: &Config, shutdown: CancellationToken) -> Result<()> {
    let orchestrator = Orchestrator::from_config(config).context("Failed to build orchestrator")?;
    let state = AppState {
        orchestrator: Arc::new(orchestrator),
        readiness: Readiness::from_config(config),
    };
    let app = build_router(state);

    let listener = tokio::net::TcpListener::bind(&config.bind_addr)
        .await
        .with_context(|| format!("Failed to bind to {}", config.bind_addr))?;
    tracing::info!("Listening on {}", config.bind_addr);
    tracing::info!("Client data: http://{}/api/client-data?id=<id>", config.bind_addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(async move { shutdown.cancelled().await })
        .await
        .context("Server error")?;

    tracing::info!("Server stopped");
    Ok(())
}
