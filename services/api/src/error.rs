//! Error type returned by handlers and its HTTP rendering

use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use common::{DomainError, ErrorKind};
use serde_json::{Map, Value};

/// Handler error carrying a [`DomainError`]
///
/// The response it produces only holds the status and the error itself, in
/// the response extensions. The error handling middleware renders the body.
#[derive(Debug)]
pub struct ApiError(DomainError);

impl ApiError {
    pub fn domain(&self) -> &DomainError {
        &self.0
    }
}

impl<E> From<E> for ApiError
where
    E: Into<anyhow::Error>,
{
    fn from(err: E) -> Self {
        ApiError(DomainError::from_any(err.into()))
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let mut response = status_for(self.0.kind()).into_response();
        response.extensions_mut().insert(self.0);
        response
    }
}

/// Type alias for API results
pub type ApiResult<T> = Result<T, ApiError>;

pub fn status_for(kind: ErrorKind) -> StatusCode {
    match kind {
        ErrorKind::Internal => StatusCode::INTERNAL_SERVER_ERROR,
        ErrorKind::BadRequest => StatusCode::BAD_REQUEST,
        ErrorKind::NotFound => StatusCode::NOT_FOUND,
        ErrorKind::Unauthorized => StatusCode::UNAUTHORIZED,
    }
}

/// JSON error document sent to clients
///
/// Internal errors only expose their title; every other kind also carries
/// its data fields.
pub fn error_body(err: &DomainError, request_id: Option<&str>) -> Value {
    let mut body = match err.kind() {
        ErrorKind::Internal => Map::new(),
        _ => err.data().to_json_lossy(),
    };
    body.insert("code".to_string(), Value::from(err.kind().code()));
    body.insert("title".to_string(), Value::from(err.title()));
    body.insert(
        "request_id".to_string(),
        request_id.map_or(Value::Null, Value::from),
    );
    Value::Object(body)
}

/// Full error response
pub fn render(err: &DomainError, request_id: Option<&str>) -> Response {
    (status_for(err.kind()), Json(error_body(err, request_id))).into_response()
}
