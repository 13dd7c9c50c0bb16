//! Loopback-only administration routes.
//!
//! | Route                       | Response                                  |
//! |-----------------------------|-------------------------------------------|
//! | `GET /ip/len`               | number of recorded addresses              |
//! | `GET /ip/bans`              | permanently banned addresses              |
//! | `GET /ip/size`              | estimated trie bytes                      |
//! | `GET /ip/delete?ip=`        | `deleted`, `not_found`, `invalid_address` |
//! | `GET /ip/ban?ip=&time=`     | new cell value; `time` is `-minutes`, `-128` permanent |
//! | `GET /exit`                 | requests graceful shutdown                |

use super::guard::forwarded_addr;
use super::{ApiError, AppState};
use crate::security::{BanDuration, DeleteOutcome};
use axum::body::Body;
use axum::extract::{ConnectInfo, Query, State};
use axum::http::{Request, StatusCode};
use axum::middleware::{self, Next};
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::{Json, Router};
use serde::Deserialize;
use std::net::{IpAddr, SocketAddr};
use tracing::{info, warn};

#[derive(Debug, Deserialize)]
struct IpQuery {
    #[serde(default)]
    ip: String,
}

#[derive(Debug, Deserialize)]
struct BanQuery {
    #[serde(default)]
    ip: String,
    #[serde(default)]
    time: String,
}

fn is_loopback(ip: IpAddr) -> bool {
    match ip {
        IpAddr::V4(v4) => v4.is_loopback(),
        IpAddr::V6(v6) => v6.is_loopback() || v6.to_ipv4_mapped().is_some_and(|v4| v4.is_loopback()),
    }
}

/// Admit loopback callers only.
///
/// Behind a trusted proxy the peer is the proxy itself, usually on
/// loopback, so the forwarded client address must be loopback too.
async fn require_loopback(State(state): State<AppState>, req: Request<Body>, next: Next) -> Response {
    let peer = req
        .extensions()
        .get::<ConnectInfo<SocketAddr>>()
        .map(|ci| ci.0.ip());

    let forwarded_ok = !state.trust_forwarded_for
        || match forwarded_addr(&req) {
            Some(addr) => addr.parse::<IpAddr>().is_ok_and(is_loopback),
            None => true,
        };

    match peer {
        Some(ip) if is_loopback(ip) && forwarded_ok => next.run(req).await,
        _ => {
            warn!(peer = ?peer, path = %req.uri().path(), "admin request from non-loopback client");
            ApiError::new(StatusCode::UNAUTHORIZED, "unauthorized").into_response()
        }
    }
}

async fn recorded_len(State(state): State<AppState>) -> Json<usize> {
    Json(state.guard.recorded_count())
}

async fn permanent_bans(State(state): State<AppState>) -> Json<Vec<String>> {
    Json(state.guard.permanent_ban_strings())
}

async fn trie_size(State(state): State<AppState>) -> Json<usize> {
    Json(state.guard.memory_footprint())
}

async fn delete_record(
    State(state): State<AppState>,
    Query(query): Query<IpQuery>,
) -> Json<DeleteOutcome> {
    let outcome = state.guard.delete_record(&query.ip);
    info!(ip = %query.ip, %outcome, "admin delete");
    Json(outcome)
}

async fn apply_ban(
    State(state): State<AppState>,
    Query(query): Query<BanQuery>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let time: i64 = query
        .time
        .trim()
        .parse()
        .map_err(|_| ApiError::bad_request("time must be a number"))?;
    let duration = i8::try_from(time)
        .ok()
        .and_then(BanDuration::from_cell_value)
        .ok_or_else(|| {
            ApiError::bad_request("time must be between -128 and -1, -128 bans permanently")
        })?;

    let cell = state
        .guard
        .apply_ban(&query.ip, duration)
        .ok_or_else(|| ApiError::bad_request("invalid address"))?;

    info!(ip = %query.ip, %duration, cell, "admin ban applied");
    Ok(Json(serde_json::json!({ "ip": query.ip, "cell": cell })))
}

async fn request_exit(State(state): State<AppState>) -> Json<serde_json::Value> {
    info!("shutdown requested through admin surface");
    state.shutdown_requested.notify_one();
    Json(serde_json::json!({ "msg": "shutting down" }))
}

/// Admin routes, rejecting non-loopback peers with 401.
pub fn router(state: AppState) -> Router {
    let loopback_only = middleware::from_fn_with_state(state.clone(), require_loopback);
    Router::new()
        .route("/ip/len", get(recorded_len))
        .route("/ip/bans", get(permanent_bans))
        .route("/ip/size", get(trie_size))
        .route("/ip/delete", get(delete_record))
        .route("/ip/ban", get(apply_ban))
        .route("/exit", get(request_exit))
        .route_layer(loopback_only)
        .with_state(state)
}
