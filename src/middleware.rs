use axum::extract::{ConnectInfo, Query, Request, State};
use axum::http::{HeaderName, HeaderValue, Uri};
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};
use std::collections::HashMap;
use std::net::SocketAddr;
use tracing::{debug, info};
use uuid::Uuid;

use crate::cost;
use crate::error::Error;
use crate::handlers::AppState;

pub const REQUEST_ID: HeaderName = HeaderName::from_static("x-request-id");
pub const RATE_LIMIT_REMAINING: HeaderName = HeaderName::from_static("x-ratelimit-remaining");
pub const RATE_LIMIT_COST: HeaderName = HeaderName::from_static("x-ratelimit-cost");

/// Logging middleware for request/response tracking
pub async fn logging_middleware(mut request: Request, next: Next) -> Response {
    let method = request.method().clone();
    let uri = request.uri().clone();
    let client_ip = get_client_ip(&request);

    let request_id = request
        .headers()
        .get(&REQUEST_ID)
        .cloned()
        .unwrap_or_else(|| {
            HeaderValue::from_str(&Uuid::new_v4().to_string())
                .unwrap_or_else(|_| HeaderValue::from_static("invalid"))
        });
    request.headers_mut().insert(REQUEST_ID, request_id.clone());

    info!(
        target: "refgate::middleware",
        method = %method,
        uri = %uri,
        client_ip = %client_ip,
        request_id = ?request_id,
        "Incoming request"
    );

    let mut response = next.run(request).await;

    info!(
        target: "refgate::middleware",
        method = %method,
        uri = %uri,
        status = %response.status(),
        request_id = ?request_id,
        "Request completed"
    );

    response.headers_mut().insert(REQUEST_ID, request_id);
    response
}

/// Charges every request against its client's token bucket before any
/// handler runs.
pub async fn admission_middleware(
    State(state): State<AppState>,
    request: Request,
    next: Next,
) -> Response {
    let client_id = get_client_ip(&request);
    let cost = request_cost(request.uri());

    let admission = state.admission.charge(&client_id, cost);

    if !admission.allowed {
        let retry_after = state.admission.retry_after(cost, admission.remaining);
        // Denials are expected under load; not an error.
        debug!(
            client_id = %client_id,
            cost,
            taken = admission.taken,
            retry_after,
            "Request denied by admission control"
        );

        let mut response = Error::RateLimitExceeded.into_response();
        let headers = response.headers_mut();
        headers.insert(axum::http::header::RETRY_AFTER, HeaderValue::from(retry_after));
        headers.insert(RATE_LIMIT_REMAINING, HeaderValue::from(admission.remaining));
        headers.insert(RATE_LIMIT_COST, HeaderValue::from(cost));
        return response;
    }

    let mut response = next.run(request).await;
    let headers = response.headers_mut();
    headers.insert(RATE_LIMIT_REMAINING, HeaderValue::from(admission.remaining));
    headers.insert(RATE_LIMIT_COST, HeaderValue::from(cost));
    response
}

/// Prices a request from its path and percent-decoded query. A query
/// that cannot be decoded is charged the default cost.
fn request_cost(uri: &Uri) -> u64 {
    match Query::<HashMap<String, String>>::try_from_uri(uri) {
        Ok(Query(params)) => cost::cost(uri.path(), &params),
        Err(err) => {
            debug!(uri = %uri, error = %err, "Undecodable query, charging default cost");
            cost::DEFAULT_COST
        }
    }
}

/// Client identifier used as the admission key.
pub fn get_client_ip(request: &Request) -> String {
    // Try to get real IP from headers first
    if let Some(forwarded) = request.headers().get("x-forwarded-for") {
        if let Ok(forwarded_str) = forwarded.to_str() {
            if let Some(first_ip) = forwarded_str.split(',').next() {
                let first_ip = first_ip.trim();
                if !first_ip.is_empty() {
                    return first_ip.to_string();
                }
            }
        }
    }

    if let Some(real_ip) = request.headers().get("x-real-ip") {
        if let Ok(ip_str) = real_ip.to_str() {
            return ip_str.to_string();
        }
    }

    // Fallback to connection info
    if let Some(ConnectInfo(addr)) = request.extensions().get::<ConnectInfo<SocketAddr>>() {
        addr.ip().to_string()
    } else {
        "unknown".to_string()
    }
}
