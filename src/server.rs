use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::{Context, Result};
use axum::{
    extract::{Query, State},
    http::{header, HeaderValue, Method, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use tower_http::cors::{AllowOrigin, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::{info, warn};

use crate::{controller::ScanController, error::ScanError, store::JsonlStore};

const DEFAULT_PACKET_LIMIT: usize = 50;
const MAX_PACKET_LIMIT: usize = 1000;

#[derive(Clone)]
pub struct AppState {
    controller: ScanController,
    store: Option<Arc<JsonlStore>>,
}

impl AppState {
    pub fn new(controller: ScanController, store: Option<Arc<JsonlStore>>) -> Self {
        Self { controller, store }
    }
}

/// `{status, message}` body used by the start and stop endpoints.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Envelope {
    pub status: String,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub interface: Option<String>,
}

impl Envelope {
    fn success(message: impl Into<String>) -> Self {
        Self {
            status: "success".into(),
            message: message.into(),
            interface: None,
        }
    }

    fn error(message: impl Into<String>) -> Self {
        Self {
            status: "error".into(),
            message: message.into(),
            interface: None,
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct PacketsQuery {
    pub limit: Option<usize>,
}

/// Build the `/api` router with tracing and CORS for `allowed_origins`.
pub fn router(state: AppState, allowed_origins: &[String]) -> Router {
    let api = Router::new()
        .route("/scan/start", post(post_start))
        .route("/scan/stop", post(post_stop))
        .route("/scan/status", get(get_status))
        .route("/scan/results", get(get_results))
        .route("/packets", get(get_packets))
        .with_state(state);

    Router::new()
        .nest("/api", api)
        .layer(TraceLayer::new_for_http())
        .layer(cors_layer(allowed_origins))
}

fn cors_layer(allowed_origins: &[String]) -> CorsLayer {
    let origins: Vec<HeaderValue> = allowed_origins
        .iter()
        .filter_map(|o| match o.parse::<HeaderValue>() {
            Ok(v) => Some(v),
            Err(_) => {
                warn!(origin = %o, "ignoring invalid CORS origin");
                None
            }
        })
        .collect();
    CorsLayer::new()
        .allow_origin(AllowOrigin::list(origins))
        .allow_methods([Method::GET, Method::POST])
        .allow_headers([header::CONTENT_TYPE, header::AUTHORIZATION])
}

/// Serve `app` on `bind` until `shutdown` resolves.
pub async fn spawn_server(
    bind: SocketAddr,
    app: Router,
    shutdown: impl Future<Output = ()> + Send + 'static,
) -> Result<()> {
    let listener = tokio::net::TcpListener::bind(bind)
        .await
        .with_context(|| format!("failed to bind control API on {bind}"))?;
    info!(%bind, "control API listening");
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown)
        .await?;
    Ok(())
}

async fn post_start(State(app): State<AppState>) -> Response {
    match app.controller.start_scan().await {
        Ok(ack) => {
            let body = Envelope {
                interface: Some(ack.interface),
                ..Envelope::success(ack.message)
            };
            (StatusCode::OK, Json(body)).into_response()
        }
        Err(e) => {
            warn!(error = %e, "scan start rejected");
            (StatusCode::INTERNAL_SERVER_ERROR, Json(Envelope::error(e.to_string()))).into_response()
        }
    }
}

async fn post_stop(State(app): State<AppState>) -> Response {
    match app.controller.stop_scan().await {
        Ok(()) => (StatusCode::OK, Json(Envelope::success("Scan stopping"))).into_response(),
        Err(e @ ScanError::NotRunning) => {
            (StatusCode::CONFLICT, Json(Envelope::error(e.to_string()))).into_response()
        }
        Err(e) => {
            (StatusCode::INTERNAL_SERVER_ERROR, Json(Envelope::error(e.to_string()))).into_response()
        }
    }
}

async fn get_status(State(app): State<AppState>) -> impl IntoResponse {
    (StatusCode::OK, Json(app.controller.status().await))
}

async fn get_results(State(app): State<AppState>) -> impl IntoResponse {
    (StatusCode::OK, Json(app.controller.results().await))
}

async fn get_packets(State(app): State<AppState>, Query(q): Query<PacketsQuery>) -> Response {
    let Some(store) = app.store.as_ref() else {
        return (StatusCode::NOT_FOUND, Json(Envelope::error("local store is disabled"))).into_response();
    };
    let limit = q.limit.unwrap_or(DEFAULT_PACKET_LIMIT).clamp(1, MAX_PACKET_LIMIT);
    match store.recent(limit).await {
        Ok(packets) => (StatusCode::OK, Json(packets)).into_response(),
        Err(e) => {
            warn!(error = %e, "failed to read local store");
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(Envelope::error("could not read stored packets")),
            )
                .into_response()
        }
    }
}
