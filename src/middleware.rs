use axum::extract::{ConnectInfo, Request, State};
use axum::http::{header, StatusCode};
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};
use std::net::{IpAddr, SocketAddr};
use tracing::{info, warn};
use uuid::Uuid;

use crate::handlers::SharedState;

pub const REJECTION_MESSAGE: &str =
    "you have reached the maximum number of requests or actions allowed within a certain time frame";

/// Throttle gate: lets the request through only when the engine allows it.
///
/// Engine failures fail closed.
pub async fn throttle_gate(
    State(state): State<SharedState>,
    request: Request,
    next: Next,
) -> Response {
    let identity = resolve_identity(&state, &request);

    match state.throttler.track_access(&identity).await {
        Ok(true) => next.run(request).await,
        Ok(false) => {
            info!(
                target: "trial_throttler::middleware",
                uri = %request.uri(),
                "request throttled"
            );
            (StatusCode::TOO_MANY_REQUESTS, REJECTION_MESSAGE).into_response()
        }
        Err(err) => {
            warn!(
                target: "trial_throttler::middleware",
                error = %err,
                store_failure = err.is_store_failure(),
                "throttle check failed, denying request"
            );
            err.into_response()
        }
    }
}

/// Token subject for a valid bearer token, otherwise the caller's address.
fn resolve_identity(state: &SharedState, request: &Request) -> String {
    request
        .headers()
        .get(header::AUTHORIZATION)
        .and_then(|value| value.to_str().ok())
        .and_then(|value| state.throttler.token_identity(value))
        .unwrap_or_else(|| get_client_ip(request, state.trust_forwarded_headers))
}

/// Logging middleware for request/response tracking
pub async fn logging_middleware(request: Request, next: Next) -> Response {
    let request_id = Uuid::new_v4();
    let method = request.method().clone();
    let uri = request.uri().clone();

    info!(
        target: "trial_throttler::middleware",
        request_id = %request_id,
        method = %method,
        uri = %uri,
        "Incoming request"
    );

    let response = next.run(request).await;

    info!(
        target: "trial_throttler::middleware",
        request_id = %request_id,
        method = %method,
        uri = %uri,
        status = %response.status(),
        "Request completed"
    );

    response
}

fn get_client_ip(request: &Request, trust_forwarded_headers: bool) -> String {
    // Forwarding headers are caller-controlled; only honour them behind a proxy.
    if trust_forwarded_headers {
        if let Some(forwarded) = request.headers().get("x-forwarded-for") {
            if let Ok(forwarded_str) = forwarded.to_str() {
                if let Some(first_ip) = forwarded_str.split(',').next() {
                    return strip_port(first_ip.trim());
                }
            }
        }

        if let Some(real_ip) = request.headers().get("x-real-ip") {
            if let Ok(ip_str) = real_ip.to_str() {
                return strip_port(ip_str.trim());
            }
        }
    }

    match request.extensions().get::<ConnectInfo<SocketAddr>>() {
        Some(ConnectInfo(addr)) => addr.ip().to_canonical().to_string(),
        None => "unknown".to_string(),
    }
}

fn strip_port(raw: &str) -> String {
    if let Ok(addr) = raw.parse::<SocketAddr>() {
        return addr.ip().to_canonical().to_string();
    }
    match raw.parse::<IpAddr>() {
        Ok(ip) => ip.to_canonical().to_string(),
        Err(_) => raw.to_string(),
    }
}
