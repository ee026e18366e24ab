mod conversions;
mod middleware;

use axum::{
    Router,
    extract::DefaultBodyLimit,
    http::StatusCode,
    middleware as axum_middleware,
    routing::{get, post},
};

use crate::application::convert::ConversionService;

use self::middleware::{log_responses, set_request_context};

#[derive(Clone)]
pub struct HttpState {
    pub service: ConversionService,
}

pub fn build_router(state: HttpState, body_limit: usize) -> Router {
    Router::new()
        .route("/conversions", post(conversions::create_conversion))
        .route("/merges", post(conversions::create_merge))
        .route("/_health", get(health))
        .layer(DefaultBodyLimit::max(body_limit))
        .with_state(state)
        .layer(axum_middleware::from_fn(log_responses))
        .layer(axum_middleware::from_fn(set_request_context))
}

async fn health() -> StatusCode {
    StatusCode::NO_CONTENT
}
