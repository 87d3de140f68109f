use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use axum::{
    Json, Router,
    extract::State,
    http::StatusCode,
    response::IntoResponse,
    routing::{get, post},
};
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;
use tower_http::trace::TraceLayer;

use crate::executor::{self, QueryExecutor};
use crate::fanout::Coordinator;
use crate::query::QueryDataRequest;
use crate::query::dialect::Dialect;

#[derive(Clone)]
pub struct AppState {
    executor: Arc<dyn QueryExecutor>,
    coordinator: Coordinator,
    timeout: Duration,
}

impl AppState {
    pub fn new(
        executor: Arc<dyn QueryExecutor>,
        dialect: &'static dyn Dialect,
        timeout: Duration,
    ) -> Self {
        Self {
            coordinator: Coordinator::new(executor.clone(), dialect, timeout),
            executor,
            timeout,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: String,
    pub message: String,
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/api/query", post(query_data))
        .route("/api/health", get(check_health))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Per-query failures are reported inside the body; the status is always 200.
async fn query_data(
    State(state): State<AppState>,
    Json(request): Json<QueryDataRequest>,
) -> impl IntoResponse {
    tracing::info!("Received request with {} queries", request.queries.len());

    // Outstanding queries stop delivering when the client goes away.
    let cancel = CancellationToken::new();
    let _guard = cancel.clone().drop_guard();

    let response = state
        .coordinator
        .run(request.into_requests(), &cancel)
        .await;
    Json(response)
}

async fn check_health(State(state): State<AppState>) -> impl IntoResponse {
    let cancel = CancellationToken::new();
    let _guard = cancel.clone().drop_guard();

    let result = tokio::time::timeout(
        state.timeout,
        executor::select_one(state.executor.as_ref(), &cancel),
    )
    .await;

    let failure = match result {
        Ok(Ok(())) => {
            return (
                StatusCode::OK,
                Json(HealthResponse {
                    status: "ok".to_string(),
                    message: "Data source is working".to_string(),
                }),
            );
        }
        Ok(Err(e)) => e.to_string(),
        Err(_) => format!("health check timed out after {:?}", state.timeout),
    };

    tracing::warn!("Health check failed: {}", failure);
    (
        StatusCode::SERVICE_UNAVAILABLE,
        Json(HealthResponse {
            status: "error".to_string(),
            message: failure,
        }),
    )
}

/// Serve the API on `addr` until `shutdown` resolves.
pub async fn serve(
    addr: &str,
    state: AppState,
    shutdown: impl Future<Output = ()> + Send + 'static,
) -> Result<(), anyhow::Error> {
    let listener = tokio::net::TcpListener::bind(addr).await?;
    tracing::info!("Starting query API on {}", listener.local_addr()?);

    axum::serve(listener, router(state))
        .with_graceful_shutdown(async {
            shutdown.await;
            tracing::info!("Shutting down query API");
        })
        .await?;

    Ok(())
}
