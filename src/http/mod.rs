//! HTTP surface.
//!
//! - [`guard::guard_requests`] classifies every request to the fronted
//!   application before it runs.
//! - [`admin::router`] exposes inspection and ban management to loopback
//!   peers only.
//! - `/metrics` serves Prometheus text when enabled.

pub mod admin;
pub mod guard;

use crate::security::{CountryMaskIndex, VisitGuard};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::{Json, Router, middleware};
use std::sync::Arc;
use tokio::sync::Notify;

/// State shared by the middleware and the admin handlers.
#[derive(Clone)]
pub struct AppState {
    pub guard: Arc<VisitGuard>,
    pub country_mask: Arc<CountryMaskIndex>,
    /// Reject addresses outside a loaded country mask.
    pub enforce_country_mask: bool,
    /// Take the client address from `X-Forwarded-For` / `X-Real-IP`.
    pub trust_forwarded_for: bool,
    pub shutdown_requested: Arc<Notify>,
}

/// JSON error body `{ "code": <status>, "msg": <text> }`.
#[derive(Debug)]
pub struct ApiError {
    status: StatusCode,
    msg: String,
}

impl ApiError {
    pub fn new(status: StatusCode, msg: impl Into<String>) -> Self {
        Self {
            status,
            msg: msg.into(),
        }
    }

    pub fn forbidden(msg: impl Into<String>) -> Self {
        Self::new(StatusCode::FORBIDDEN, msg)
    }

    pub fn bad_request(msg: impl Into<String>) -> Self {
        Self::new(StatusCode::BAD_REQUEST, msg)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let body = serde_json::json!({
            "code": self.status.as_u16(),
            "msg": self.msg,
        });
        (self.status, Json(body)).into_response()
    }
}

/// Handler for GET /metrics - returns Prometheus metrics in text format.
async fn metrics_handler() -> String {
    crate::metrics::gather_metrics()
}

/// Wrap `app` with the visit guard and mount the admin and metrics routes.
///
/// Admin and metrics routes are not counted against the caller's limit.
pub fn router(state: AppState, app: Router, metrics_enabled: bool) -> Router {
    let guarded = app.layer(middleware::from_fn_with_state(
        state.clone(),
        guard::guard_requests,
    ));

    let mut router = Router::new()
        .nest("/admin", admin::router(state))
        .merge(guarded);
    if metrics_enabled {
        router = router.route("/metrics", get(metrics_handler));
    }
    router
}
