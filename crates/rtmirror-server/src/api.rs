//! HTTP surface
//!
//! | route                     | answer                                   |
//! |---------------------------|------------------------------------------|
//! | `GET /`                   | liveness: `{message, status}`            |
//! | `GET /api/sensores-info`  | [`QueryService::info`], never cached     |
//! | `GET /api/sensores-data`  | [`QueryService::page`], cached 30s       |
//!
//! Any other path falls through to the static directory when configured.

use std::sync::Arc;

use axum::{
    Json, Router,
    extract::{Query, State},
    http::{
        HeaderValue, Method, StatusCode,
        header::{AUTHORIZATION, CACHE_CONTROL, CONTENT_TYPE},
    },
    response::{IntoResponse, Response},
    routing::get,
};
use serde_json::json;
use tower_http::{
    cors::{AllowOrigin, CorsLayer},
    services::ServeDir,
    trace::TraceLayer,
};
use tracing::{error, warn};

use rtmirror_core::Record;

use crate::config::ServerConfig;
use crate::query::{PageQuery, PageRequest, QueryService};

const INFO_CACHE_CONTROL: &str = "no-cache, no-store, must-revalidate";
const DATA_CACHE_CONTROL: &str = "public, max-age=30";

/// Shared handler state
#[derive(Clone)]
pub struct AppState {
    pub query: Arc<QueryService>,
}

impl AppState {
    pub fn new(query: Arc<QueryService>) -> Self {
        Self { query }
    }
}

/// Build the router with CORS, request tracing and optional static files
pub fn build_router(state: AppState, server: &ServerConfig) -> Router {
    let mut router = Router::new()
        .route("/", get(root))
        .route("/api/sensores-info", get(sensores_info))
        .route("/api/sensores-data", get(sensores_data));

    if let Some(dir) = &server.static_dir {
        router = router.fallback_service(ServeDir::new(dir));
    }

    router
        .layer(TraceLayer::new_for_http())
        .layer(cors_layer(&server.cors_origins))
        .with_state(state)
}

fn cors_layer(origins: &[String]) -> CorsLayer {
    let origins: Vec<HeaderValue> = origins
        .iter()
        .filter_map(|origin| match HeaderValue::from_str(origin) {
            Ok(value) => Some(value),
            Err(_) => {
                warn!(origin = %origin, "Ignoring invalid CORS origin");
                None
            }
        })
        .collect();

    CorsLayer::new()
        .allow_origin(AllowOrigin::list(origins))
        .allow_methods([
            Method::GET,
            Method::POST,
            Method::PUT,
            Method::DELETE,
            Method::OPTIONS,
        ])
        .allow_headers([CONTENT_TYPE, AUTHORIZATION])
}

async fn root() -> impl IntoResponse {
    Json(json!({
        "message": "Sensor mirror running",
        "status": "OK",
    }))
}

async fn sensores_info(State(state): State<AppState>) -> impl IntoResponse {
    let info = state.query.info().await;
    ([(CACHE_CONTROL, INFO_CACHE_CONTROL)], Json(info))
}

async fn sensores_data(
    State(state): State<AppState>,
    Query(pairs): Query<Vec<(String, String)>>,
) -> Response {
    let request = PageRequest::from(&PageQuery::from_pairs(pairs));
    match state.query.page(request).await {
        Ok(records) => ([(CACHE_CONTROL, DATA_CACHE_CONTROL)], Json(records)).into_response(),
        Err(e) => {
            error!(error = %e, offset = request.offset, limit = request.limit, "Failed to read page");
            (StatusCode::INTERNAL_SERVER_ERROR, Json(Vec::<Record>::new())).into_response()
        }
    }
}
