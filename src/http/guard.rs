//! Request classification middleware.

use super::{ApiError, AppState};
use crate::metrics;
use crate::security::VisitOutcome;
use crate::security::address::{self, octets_to_addr};
use axum::body::Body;
use axum::extract::{ConnectInfo, State};
use axum::http::Request;
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};
use std::net::SocketAddr;
use tracing::debug;

/// Client address from the forwarding headers.
///
/// Only consulted when the deployment sits behind a trusted reverse proxy;
/// otherwise clients could pick their own address.
pub(super) fn forwarded_addr(req: &Request<Body>) -> Option<&str> {
    if let Some(forwarded) = req.headers().get("x-forwarded-for")
        && let Ok(s) = forwarded.to_str()
        && let Some(ip) = s.split(',').next()
    {
        return Some(ip.trim());
    }

    req.headers()
        .get("x-real-ip")
        .and_then(|v| v.to_str().ok())
        .map(str::trim)
}

/// Resolve the client address to IPv4 octets.
fn client_octets(req: &Request<Body>, trust_forwarded_for: bool) -> Option<[u8; 4]> {
    if trust_forwarded_for && let Some(addr) = forwarded_addr(req) {
        return address::parse_octets(addr);
    }
    req.extensions()
        .get::<ConnectInfo<SocketAddr>>()
        .and_then(|ci| address::ip_octets(ci.0.ip()))
}

/// Response for a rejected visit.
fn rejection(outcome: VisitOutcome) -> ApiError {
    match outcome {
        VisitOutcome::InvalidAddress => ApiError::forbidden("malformed client address"),
        VisitOutcome::PermanentlyBanned => ApiError::forbidden("you are permanently banned"),
        VisitOutcome::TemporarilyBanned(minutes) => ApiError::forbidden(format!(
            "too many requests, you are banned for {minutes} minutes"
        )),
        VisitOutcome::Allowed(_) | VisitOutcome::JustBanned(_) => {
            ApiError::forbidden("request rejected")
        }
    }
}

/// Classify the request before the inner handler runs.
///
/// Rejected visits get a 403 JSON body. A redirect response (the client
/// served itself from cache) gives the visit back.
pub async fn guard_requests(
    State(state): State<AppState>,
    req: Request<Body>,
    next: Next,
) -> Response {
    let Some(octets) = client_octets(&req, state.trust_forwarded_for) else {
        debug!(path = %req.uri().path(), "rejecting request without a usable IPv4 client address");
        metrics::record_visit(VisitOutcome::InvalidAddress);
        return rejection(VisitOutcome::InvalidAddress).into_response();
    };

    let outcome = state.guard.record_octets(octets);
    if outcome.is_rejected() {
        return rejection(outcome).into_response();
    }

    // A mask without ranges fails open.
    if state.enforce_country_mask
        && !state.country_mask.is_empty()
        && !state.country_mask.contains(octets)
    {
        debug!(ip = %octets_to_addr(octets), "address outside country mask");
        return ApiError::forbidden("service not available in your region").into_response();
    }

    let response = next.run(req).await;
    if response.status().is_redirection() {
        state.guard.reduce_on_cache_hit_octets(octets);
    }
    response
}
