//! Administrative JSON API.
//!
//! Routes:
//! - GET /health - liveness check
//! - GET /version - build version
//! - GET /metrics - Prometheus metrics of the redirect listeners
//! - POST /v1/refresh - reload the redirect cache from the store
//! - GET /v1/redirects?cursor= - one page of rules
//! - POST /v1/redirects - create a rule
//! - GET /v1/redirects/export - every rule as a download
//! - POST /v1/redirects/import - replace the rule table
//! - GET|PUT|DELETE /v1/redirects/{domain} - read, update or remove a rule
//!
//! Everything under `/v1` requires the bearer token.

use axum::{
    extract::{Path, Query, State},
    http::{
        header::{AUTHORIZATION, CACHE_CONTROL, CONTENT_DISPOSITION, CONTENT_TYPE},
        HeaderValue, Method, StatusCode,
    },
    middleware,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use serde_json::json;
use tower_http::cors::CorsLayer;
use tower_http::set_header::SetResponseHeaderLayer;

use crate::error::AppError;
use crate::metrics;
use crate::middleware::{request_id_layer, require_api_token};
use crate::rule::Rule;
use crate::state::AppState;
use crate::store::PageCursor;

#[derive(Debug, Deserialize)]
pub struct ListQuery {
    pub cursor: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct ListResponse {
    pub data: Vec<Rule>,
    pub cursor: PageCursor,
}

/// Creates the administrative router.
pub fn router(state: AppState, cors_origin: Option<&str>) -> Router {
    let v1 = Router::new()
        .route("/redirects", get(list).post(create))
        .route("/redirects/export", get(export))
        .route("/redirects/import", post(import))
        .route("/refresh", post(refresh))
        .route(
            "/redirects/{domain}",
            get(fetch).put(update).delete(remove),
        )
        .route_layer(middleware::from_fn_with_state(
            state.clone(),
            require_api_token,
        ));

    let mut router = Router::new()
        .route("/health", get(health))
        .route("/version", get(version))
        .route("/metrics", get(metrics_text))
        .nest("/v1", v1)
        .with_state(state)
        .layer(SetResponseHeaderLayer::if_not_present(
            CACHE_CONTROL,
            HeaderValue::from_static("no-store"),
        ));

    if let Some(origin) = cors_origin {
        match HeaderValue::from_str(origin) {
            Ok(origin) => {
                router = router.layer(
                    CorsLayer::new()
                        .allow_origin(origin)
                        .allow_methods([Method::GET, Method::POST, Method::PUT, Method::DELETE])
                        .allow_headers([AUTHORIZATION, CONTENT_TYPE]),
                );
            }
            Err(e) => {
                tracing::warn!(origin = %origin, error = %e, "Ignoring invalid CORS origin");
            }
        }
    }

    router.layer(middleware::from_fn(request_id_layer))
}

/// Liveness check.
pub async fn health() -> &'static str {
    "ok"
}

async fn version() -> Json<serde_json::Value> {
    Json(json!({ "version": env!("CARGO_PKG_VERSION") }))
}

async fn metrics_text(State(state): State<AppState>) -> Response {
    match state.metrics.gather() {
        Ok(body) => ([(CONTENT_TYPE, metrics::CONTENT_TYPE)], body).into_response(),
        Err(e) => {
            tracing::error!(error = %e, "Failed to encode metrics");
            StatusCode::INTERNAL_SERVER_ERROR.into_response()
        }
    }
}

async fn refresh(State(state): State<AppState>) -> Result<Json<serde_json::Value>, AppError> {
    let count = state.cache.update().await?;
    Ok(Json(json!({ "count": count })))
}

async fn list(
    State(state): State<AppState>,
    Query(query): Query<ListQuery>,
) -> Result<Json<ListResponse>, AppError> {
    let cursor = query
        .cursor
        .filter(|c| !c.is_empty())
        .map(PageCursor::from_raw);
    let page = state.admin.list_page(cursor.as_ref()).await?;

    Ok(Json(ListResponse {
        data: page.rules,
        cursor: page.next,
    }))
}

async fn create(
    State(state): State<AppState>,
    Json(rule): Json<Rule>,
) -> Result<impl IntoResponse, AppError> {
    let rule = state.admin.create(rule).await?;
    Ok((StatusCode::CREATED, Json(rule)))
}

async fn fetch(
    State(state): State<AppState>,
    Path(domain): Path<String>,
) -> Result<Json<Rule>, AppError> {
    Ok(Json(state.admin.get(&domain).await?))
}

async fn update(
    State(state): State<AppState>,
    Path(domain): Path<String>,
    Json(rule): Json<Rule>,
) -> Result<Json<Rule>, AppError> {
    Ok(Json(state.admin.update(&domain, rule).await?))
}

async fn remove(
    State(state): State<AppState>,
    Path(domain): Path<String>,
) -> Result<StatusCode, AppError> {
    state.admin.delete(&domain).await?;
    Ok(StatusCode::NO_CONTENT)
}

async fn export(State(state): State<AppState>) -> Result<impl IntoResponse, AppError> {
    let rules = state.admin.export().await?;
    Ok((
        [(
            CONTENT_DISPOSITION,
            HeaderValue::from_static("attachment; filename=\"redirects.json\""),
        )],
        Json(rules),
    ))
}

async fn import(
    State(state): State<AppState>,
    Json(rules): Json<Vec<Rule>>,
) -> Result<Json<serde_json::Value>, AppError> {
    let imported = state.admin.import(rules).await?;
    Ok(Json(json!({ "imported": imported })))
}
