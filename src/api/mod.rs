use std::sync::Arc;

use axum::{
    extract::{Request, State},
    http::StatusCode,
    middleware::{self, Next},
    response::Response,
    routing::{get, post},
    Router,
};
use tower_http::trace::TraceLayer;

use crate::AppState;

pub mod handlers;

/// Build the full HTTP surface: liveness, Prometheus scrape and the admin API
/// under `/api/v1`.
pub fn router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/healthz", get(|| async { "ok" }))
        .route("/metrics", get(handlers::prometheus_metrics))
        .nest("/api/v1", api_router(state.clone()))
        .with_state(state)
}

/// Admin routes, relative to `/api/v1`.
pub fn api_router(state: Arc<AppState>) -> Router<Arc<AppState>> {
    Router::new()
        .route(
            "/services/:service/credentials",
            get(handlers::list_credentials),
        )
        .route("/services/:service/health", get(handlers::check_health))
        .route("/services/:service/metrics", get(handlers::pool_metrics))
        .route("/services/:service/monitor", post(handlers::run_monitor))
        .route("/services/:service/rotate", post(handlers::rotate))
        .route("/services/:service/reset-usage", post(handlers::reset_usage))
        .route(
            "/credentials/:id/deactivate",
            post(handlers::deactivate_credential),
        )
        .route(
            "/credentials/:id/reactivate",
            post(handlers::reactivate_credential),
        )
        .layer(middleware::from_fn_with_state(state, admin_auth))
        .layer(TraceLayer::new_for_http())
        .fallback(fallback_404)
}

async fn fallback_404() -> StatusCode {
    StatusCode::NOT_FOUND
}

/// Middleware: validates `X-Admin-Key` (or a bearer token) against the
/// configured admin key. With no key configured every request is refused.
async fn admin_auth(
    State(state): State<Arc<AppState>>,
    req: Request,
    next: Next,
) -> Result<Response, StatusCode> {
    let Some(expected) = state.admin_key.as_deref() else {
        tracing::warn!("admin API: KEYPOOL_ADMIN_KEY is not configured, refusing request");
        return Err(StatusCode::SERVICE_UNAVAILABLE);
    };

    let provided_key = req
        .headers()
        .get("x-admin-key")
        .and_then(|v| v.to_str().ok())
        .or_else(|| {
            req.headers()
                .get("authorization")
                .and_then(|v| v.to_str().ok())
                .and_then(|v| v.strip_prefix("Bearer "))
                .map(|t| t.trim())
        });

    match provided_key {
        Some(k) if k == expected => Ok(next.run(req).await),
        Some(k) => {
            tracing::warn!("admin API: invalid key (provided: '{}')", redact_admin_key(k));
            Err(StatusCode::UNAUTHORIZED)
        }
        None => {
            tracing::warn!("admin API: missing X-Admin-Key header");
            Err(StatusCode::UNAUTHORIZED)
        }
    }
}

/// Never more than 4 leading and 4 trailing characters of an admin key.
fn redact_admin_key(key: &str) -> String {
    let chars: Vec<char> = key.chars().collect();
    if chars.len() <= 12 {
        return "****".to_string();
    }
    let head: String = chars[..4].iter().collect();
    let tail: String = chars[chars.len() - 4..].iter().collect();
    format!("{}…{}", head, tail)
}
