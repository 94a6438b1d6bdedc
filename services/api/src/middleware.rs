//! Request id, error handling and request logging middleware
//!
//! Layered outermost first: [`request_id`], [`handle_errors`], [`request_logger`].

use axum::{
    body::{Body, to_bytes},
    extract::{Request, State},
    http::HeaderValue,
    middleware::Next,
    response::{IntoResponse, Response},
};
use common::{Ctx, DomainError, ErrorKind, log_body};
use std::time::Instant;
use uuid::Uuid;

use crate::{
    error::{self, ApiError},
    state::AppState,
};

/// Header carrying the request id, in both directions
pub const REQUEST_ID_HEADER: &str = "request-id";

/// Largest request body accepted
pub const MAX_BODY_BYTES: usize = 2 * 1024 * 1024;

/// Context attached by [`request_id`]
fn request_ctx(req: &Request) -> Ctx {
    req.extensions().get::<Ctx>().cloned().unwrap_or_default()
}

fn route_of(req: &Request) -> String {
    format!("{} {}", req.method(), req.uri().path())
}

/// Tag the request with an id and expose it through a [`Ctx`]
pub async fn request_id(mut req: Request, next: Next) -> Response {
    let request_id = req
        .headers()
        .get(REQUEST_ID_HEADER)
        .and_then(|value| value.to_str().ok())
        .filter(|value| !value.is_empty())
        .map(str::to_string)
        .unwrap_or_else(|| Uuid::new_v4().to_string());

    req.extensions_mut()
        .insert(Ctx::background().with_request_id(&request_id));

    let mut response = next.run(req).await;
    if let Ok(value) = HeaderValue::from_str(&request_id) {
        response.headers_mut().insert(REQUEST_ID_HEADER, value);
    }
    response
}

/// Render the [`DomainError`] attached to a response
pub async fn handle_errors(State(state): State<AppState>, req: Request, next: Next) -> Response {
    let ctx = request_ctx(&req);
    let route = route_of(&req);

    let mut response = next.run(req).await;
    let Some(err) = response.extensions_mut().remove::<DomainError>() else {
        return response;
    };

    if err.kind() == ErrorKind::Internal {
        state.logger.error(
            &ctx,
            "request-error",
            &[log_body! { "route" => route }, err.data().clone()],
        );
    }

    error::render(&err, ctx.request_id())
}

/// Log every request with its body and duration
pub async fn request_logger(State(state): State<AppState>, req: Request, next: Next) -> Response {
    let started = Instant::now();
    let ctx = request_ctx(&req);
    let route = route_of(&req);

    let (parts, body) = req.into_parts();
    let bytes = match to_bytes(body, MAX_BODY_BYTES).await {
        Ok(bytes) => bytes,
        Err(e) => {
            let err = DomainError::bad_request(
                "unable to read request body",
                log_body! { "limit_bytes" => MAX_BODY_BYTES, "error" => e.to_string() },
            );
            state.logger.error(
                &ctx,
                "request-failed",
                &[log_body! {
                    "route" => route,
                    "error" => err.to_string(),
                    "duration_ms" => elapsed_ms(started),
                }],
            );
            return ApiError::from(err).into_response();
        }
    };
    let request_body = String::from_utf8_lossy(&bytes).into_owned();

    let response = next
        .run(Request::from_parts(parts, Body::from(bytes)))
        .await;

    let mut fields = log_body! {
        "route" => route,
        "request_body" => request_body,
        "duration_ms" => elapsed_ms(started),
    };
    match response.extensions().get::<DomainError>() {
        Some(err) => {
            fields.insert("error", err.to_string());
            state.logger.error(&ctx, "request-failed", &[fields]);
        }
        None => state.logger.info(&ctx, "request-completed", &[fields]),
    }

    response
}

fn elapsed_ms(started: Instant) -> u64 {
    u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX)
}
