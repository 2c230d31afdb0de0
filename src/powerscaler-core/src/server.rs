//! HTTP surface: routes, middleware and the serve loop.

use std::net::SocketAddr;
use std::sync::Arc;

use axum::extract::rejection::{JsonRejection, QueryRejection};
use axum::extract::{Query, State};
use axum::http::{HeaderValue, Method, header};
use axum::routing::{get, post};
use axum::{Json, Router};
use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::{Value, json};
use tokio::signal;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::{info, warn};

use crate::api::{
    ApiError, ApiResult, BattleRequest, BattleResponse, BattleService, HistoryEntry, HistoryQuery,
};

/// Application state shared across handlers
#[derive(Clone)]
pub struct AppState {
    service: Arc<BattleService>,
}

impl AppState {
    pub fn new(service: Arc<BattleService>) -> Self {
        Self { service }
    }

    pub fn service(&self) -> &BattleService {
        &self.service
    }
}

/// Health check response
#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub version: &'static str,
    pub store: String,
    pub timestamp: DateTime<Utc>,
}

/// Routes without middleware.
pub fn api_router(state: AppState) -> Router {
    Router::new()
        .route("/", get(welcome))
        .route("/health", get(health))
        .route("/battle", post(create_battle))
        .route("/battle/history", get(battle_history))
        .with_state(state)
}

/// Routes with CORS for `allowed_origins` and request tracing.
pub fn router(state: AppState, allowed_origins: &[String]) -> Router {
    api_router(state)
        .layer(cors_layer(allowed_origins))
        .layer(TraceLayer::new_for_http())
}

fn cors_layer(allowed_origins: &[String]) -> CorsLayer {
    let origins: Vec<HeaderValue> = allowed_origins
        .iter()
        .filter_map(|origin| match HeaderValue::from_str(origin) {
            Ok(value) => Some(value),
            Err(_) => {
                warn!(%origin, "Ignoring invalid CORS origin");
                None
            }
        })
        .collect();

    CorsLayer::new()
        .allow_origin(origins)
        .allow_methods([Method::GET, Method::POST])
        .allow_headers([header::CONTENT_TYPE])
}

async fn welcome() -> Json<Value> {
    Json(json!({ "message": "Welcome to PowerScaler Battle Arena" }))
}

async fn health(State(state): State<AppState>) -> Json<HealthResponse> {
    let store = state.service().store();
    let healthy = store.is_healthy().await;
    Json(HealthResponse {
        status: if healthy { "healthy" } else { "degraded" },
        version: env!("CARGO_PKG_VERSION"),
        store: store.name().to_string(),
        timestamp: Utc::now(),
    })
}

async fn create_battle(
    State(state): State<AppState>,
    payload: Result<Json<BattleRequest>, JsonRejection>,
) -> ApiResult<Json<BattleResponse>> {
    let Json(request) = payload.map_err(|e| ApiError::Validation(e.body_text()))?;
    info!(
        character1 = %request.character1,
        character2 = %request.character2,
        "Battle requested"
    );
    let response = state.service().battle(request).await?;
    Ok(Json(response))
}

async fn battle_history(
    State(state): State<AppState>,
    query: Result<Query<HistoryQuery>, QueryRejection>,
) -> ApiResult<Json<Vec<HistoryEntry>>> {
    let Query(query) = query.map_err(|e| ApiError::Validation(e.body_text()))?;
    let history = state.service().history(&query).await?;
    info!(count = history.len(), "Battle history served");
    Ok(Json(history))
}

/// Serve `app` on `addr` until Ctrl+C or SIGTERM.
pub async fn serve(app: Router, addr: SocketAddr) -> std::io::Result<()> {
    let listener = tokio::net::TcpListener::bind(addr).await?;
    info!("PowerScaler API listening on http://{}", addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    info!("Server shutdown complete");
    Ok(())
}

/// Graceful shutdown signal handler
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            warn!(error = %e, "Failed to listen for Ctrl+C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(e) => {
                warn!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received Ctrl+C, starting graceful shutdown");
        }
        _ = terminate => {
            info!("Received SIGTERM, starting graceful shutdown");
        }
    }
}
