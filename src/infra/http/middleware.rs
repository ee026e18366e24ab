use std::time::Instant;

use axum::{
    body::Body,
    http::{HeaderName, HeaderValue, Request},
    middleware::Next,
    response::Response,
};
use tracing::{Instrument, debug, error, info_span, warn};
use uuid::Uuid;

use crate::application::error::ErrorReport;

pub const REQUEST_ID_HEADER: HeaderName = HeaderName::from_static("x-request-id");

#[derive(Debug, Clone)]
pub struct RequestContext {
    pub request_id: String,
}

/// Reuse the caller's `x-request-id` when it is printable, otherwise mint one, and echo it
/// on the response.
pub async fn set_request_context(mut request: Request<Body>, next: Next) -> Response {
    let request_id = request
        .headers()
        .get(&REQUEST_ID_HEADER)
        .and_then(|value| value.to_str().ok())
        .filter(|value| !value.is_empty() && value.len() <= 128)
        .map(str::to_string)
        .unwrap_or_else(|| Uuid::new_v4().to_string());
    request.extensions_mut().insert(RequestContext {
        request_id: request_id.clone(),
    });

    let span = info_span!("request", request_id = %request_id);
    let mut response = next.run(request).instrument(span).await;
    if let Ok(value) = HeaderValue::from_str(&request_id) {
        response
            .headers_mut()
            .insert(REQUEST_ID_HEADER, value);
    }
    response
}

pub async fn log_responses(request: Request<Body>, next: Next) -> Response {
    let method = request.method().clone();
    let path = request.uri().path().to_string();
    let request_id = request
        .extensions()
        .get::<RequestContext>()
        .map(|ctx| ctx.request_id.clone())
        .unwrap_or_default();
    let started_at = Instant::now();

    let mut response = next.run(request).await;
    let status = response.status();
    let elapsed_ms = started_at.elapsed().as_millis() as u64;

    if status.is_success() {
        debug!(
            target = "inkpress::http::response",
            status = status.as_u16(),
            method = %method,
            path = %path,
            elapsed_ms,
            request_id = %request_id,
            "request served"
        );
        return response;
    }

    let (source, messages) = match response.extensions_mut().remove::<ErrorReport>() {
        Some(report) => (report.source, report.messages),
        // Rejections raised by extractors (body limit, method) never reach a handler.
        None => ("axum::rejection", Vec::new()),
    };
    let detail = messages.first().map(String::as_str).unwrap_or("");

    if status.is_server_error() {
        error!(
            target = "inkpress::http::response",
            status = status.as_u16(),
            method = %method,
            path = %path,
            elapsed_ms,
            source,
            detail,
            chain = ?messages,
            request_id = %request_id,
            "request failed"
        );
    } else {
        warn!(
            target = "inkpress::http::response",
            status = status.as_u16(),
            method = %method,
            path = %path,
            elapsed_ms,
            source,
            detail,
            chain = ?messages,
            request_id = %request_id,
            "conversion rejected"
        );
    }

    response
}
