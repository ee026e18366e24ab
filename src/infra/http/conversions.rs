use axum::{
    Json,
    body::Bytes,
    extract::State,
    http::{StatusCode, header::CONTENT_TYPE},
    response::{IntoResponse, Response},
};
use serde_json::json;

use crate::application::error::{ConversionError, ErrorReport};

use super::HttpState;

pub(super) async fn create_conversion(State(state): State<HttpState>, body: Bytes) -> Response {
    respond(
        "infra::http::create_conversion",
        state.service.convert_json(&body).await,
    )
}

pub(super) async fn create_merge(State(state): State<HttpState>, body: Bytes) -> Response {
    respond(
        "infra::http::create_merge",
        state.service.merge_json(&body).await,
    )
}

fn respond(source: &'static str, result: Result<Vec<u8>, ConversionError>) -> Response {
    match result {
        Ok(pdf) => (
            StatusCode::CREATED,
            [(CONTENT_TYPE, "application/pdf")],
            pdf,
        )
            .into_response(),
        Err(err) => {
            // Every conversion failure is reported to the caller as a bad request.
            let status = StatusCode::BAD_REQUEST;
            let mut response = (status, Json(json!({ "error": err.to_string() }))).into_response();
            ErrorReport::from_error(source, status, &err).attach(&mut response);
            response
        }
    }
}
