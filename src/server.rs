//! HTTP shell around the pipeline
//!
//! Thin Axum router: the data endpoint (with its legacy alias), a liveness
//! endpoint, and a permissive CORS layer so the widget can be embedded
//! anywhere. All real work happens in `pipeline`.

use std::sync::Arc;

use axum::{
    extract::{Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::get,
    Json, Router,
};
use serde::{Deserialize, Serialize};
use tower_http::cors::{Any, CorsLayer};
use tracing::error;

use crate::aggregate::StretchResult;
use crate::fetch::{format_http_date, Upstream};
use crate::pipeline::TravelTimeService;

/// Builds the Axum router over a shared pipeline instance
pub fn build_router<S>(service: Arc<TravelTimeService<S>>) -> Router
where
    S: Upstream + Send + Sync + 'static,
{
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/data", get(get_data::<S>))
        // Alias kept for widget clients built against the old server
        .route("/GetData", get(get_data::<S>))
        .route("/health", get(health))
        .layer(cors)
        .with_state(service)
}

#[derive(Debug, Deserialize)]
struct DataParams {
    #[serde(default)]
    debug: bool,
}

/// Successful data response
#[derive(Debug, Serialize)]
struct DataResponse {
    success: bool,
    #[serde(rename = "fromCache")]
    from_cache: bool,
    #[serde(rename = "lastModified")]
    last_modified: Option<String>,
    /// Cache age in minutes, only with `?debug=true`
    #[serde(
        rename = "lastModifiedMinutes",
        skip_serializing_if = "Option::is_none"
    )]
    last_modified_minutes: Option<i64>,
    data: Vec<StretchResult>,
}

#[derive(Debug, Serialize)]
struct ErrorResponse {
    success: bool,
    error: String,
}

/// `GET /data` — the aggregated travel-time table
async fn get_data<S>(
    State(service): State<Arc<TravelTimeService<S>>>,
    Query(params): Query<DataParams>,
) -> Response
where
    S: Upstream + Send + Sync + 'static,
{
    match service.get_travel_data().await {
        Ok(data) => {
            let last_modified_minutes = if params.debug {
                service.data_age_minutes().await
            } else {
                None
            };
            Json(DataResponse {
                success: true,
                from_cache: data.from_cache,
                last_modified: data.last_modified.map(format_http_date),
                last_modified_minutes,
                data: data.results,
            })
            .into_response()
        }
        Err(e) => {
            error!(error = %e, "request failed with no data to serve");
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(ErrorResponse {
                    success: false,
                    error: e.to_string(),
                }),
            )
                .into_response()
        }
    }
}

/// `GET /health` — liveness probe
async fn health() -> Json<serde_json::Value> {
    Json(serde_json::json!({
        "status": "ok",
        "service": "veitider",
        "timestamp": chrono::Utc::now().to_rfc3339(),
    }))
}
