//! Redirect listener: every request is answered from the redirect cache.
//!
//! The same router serves the plain and the TLS listener; only the scheme put
//! in front of scheme-less targets and the metrics label differ.

use axum::extract::State;
use axum::http::header::LOCATION;
use axum::http::{HeaderValue, StatusCode, Uri};
use axum::response::{IntoResponse, Response};
use axum::{middleware, Router};
use axum_extra::extract::Host;

use crate::cache::RedirectCache;
use crate::metrics::{track_redirects, Metrics};
use crate::middleware::request_id_layer;
use crate::rule::{resolve, Scheme};

#[derive(Clone)]
struct RedirectState {
    cache: RedirectCache,
    scheme: Scheme,
}

/// Router answering any method and path with the domain's redirect.
pub fn router(cache: RedirectCache, scheme: Scheme, metrics: &Metrics) -> Router {
    Router::new()
        .fallback(redirect)
        .with_state(RedirectState { cache, scheme })
        .layer(middleware::from_fn_with_state(
            metrics.listener(scheme),
            track_redirects,
        ))
        .layer(middleware::from_fn(request_id_layer))
}

async fn redirect(
    State(state): State<RedirectState>,
    Host(host): Host,
    uri: Uri,
) -> Response {
    let domain = domain_from_host(&host);

    let rule = match state.cache.lookup(&domain).await {
        Ok(rule) => rule,
        Err(e) if e.is_not_found() => {
            tracing::debug!(domain = %domain, "No redirect configured");
            return StatusCode::NOT_FOUND.into_response();
        }
        Err(e) => {
            tracing::error!(domain = %domain, error = %e, "Redirect lookup failed");
            return StatusCode::NOT_FOUND.into_response();
        }
    };

    let target = resolve(&rule, &uri, state.scheme);
    let status = match StatusCode::from_u16(target.status) {
        Ok(status) => status,
        Err(_) => {
            tracing::error!(domain = %domain, status = target.status, "Invalid stored redirect code");
            return StatusCode::INTERNAL_SERVER_ERROR.into_response();
        }
    };
    let location = match HeaderValue::from_str(&target.location) {
        Ok(location) => location,
        Err(_) => {
            tracing::error!(domain = %domain, location = %target.location, "Redirect target is not a valid header");
            return StatusCode::INTERNAL_SERVER_ERROR.into_response();
        }
    };

    tracing::debug!(
        domain = %domain,
        status = target.status,
        location = %target.location,
        "Redirecting"
    );
    (status, [(LOCATION, location)]).into_response()
}

/// Lowercased host name without port or trailing dot.
fn domain_from_host(host: &str) -> String {
    let name = if host.starts_with('[') {
        // IPv6 literal, keep the brackets
        host.split_inclusive(']').next().unwrap_or(host)
    } else {
        host.split(':').next().unwrap_or(host)
    };
    name.trim_end_matches('.').to_ascii_lowercase()
}
