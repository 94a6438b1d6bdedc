//! API service routes

use axum::{
    Extension, Json, Router,
    body::Bytes,
    extract::{Path, State},
    http::{Uri, header},
    middleware,
    response::{IntoResponse, Response},
    routing::{get, post, put},
};
use common::{Ctx, DomainError, log_body};
use serde::de::DeserializeOwned;

use crate::{
    AppState,
    domain::Venue,
    error::ApiResult,
    middleware::{handle_errors, request_id, request_logger},
    models::{
        ChangeEmailRequest, HealthResponse, StatusResponse, UpsertUserRequest, UpsertUserResponse,
        UserResponse,
    },
};

/// Create the router for the API service
pub fn create_router(state: AppState) -> Router {
    Router::new()
        .route("/", get(health_check))
        .route("/ping", get(ping))
        .route("/users", post(upsert_user))
        .route("/users/:id", get(get_user))
        .route("/users/:id/email", put(change_user_email))
        .route("/venues/:coordinates", get(get_venues))
        .route("/venues/details/:id", get(get_venue_details))
        .fallback(route_not_found)
        .layer(middleware::from_fn_with_state(state.clone(), request_logger))
        .layer(middleware::from_fn_with_state(state.clone(), handle_errors))
        .layer(middleware::from_fn(request_id))
        .with_state(state)
}

pub async fn ping() -> &'static str {
    "pong"
}

/// Health check endpoint
pub async fn health_check() -> Json<HealthResponse> {
    Json(HealthResponse {
        service: "venues-service",
        state: "healthy",
    })
}

/// Create a user, or update it when `user_id` is given
pub async fn upsert_user(
    State(state): State<AppState>,
    Extension(ctx): Extension<Ctx>,
    body: Bytes,
) -> ApiResult<Json<UpsertUserResponse>> {
    let request: UpsertUserRequest = parse_json(&body)?;

    let user_id = state.users.upsert_user(&ctx, request.into()).await?;

    Ok(Json(UpsertUserResponse {
        status: "success",
        user_id,
    }))
}

pub async fn get_user(
    State(state): State<AppState>,
    Extension(ctx): Extension<Ctx>,
    Path(id): Path<String>,
) -> ApiResult<Json<UserResponse>> {
    let user_id = parse_user_id(&id)?;

    let user = state.users.get_user(&ctx, user_id).await?;

    Ok(Json(user.into()))
}

pub async fn change_user_email(
    State(state): State<AppState>,
    Extension(ctx): Extension<Ctx>,
    Path(id): Path<String>,
    body: Bytes,
) -> ApiResult<Json<StatusResponse>> {
    let user_id = parse_user_id(&id)?;
    let request: ChangeEmailRequest = parse_json(&body)?;

    state
        .users
        .change_user_email(&ctx, user_id, &request.email)
        .await?;

    Ok(Json(StatusResponse::success()))
}

/// Venues around `latitude,longitude`
pub async fn get_venues(
    State(state): State<AppState>,
    Extension(ctx): Extension<Ctx>,
    Path(coordinates): Path<String>,
) -> ApiResult<Json<Vec<Venue>>> {
    let (latitude, longitude) = parse_coordinates(&coordinates)?;

    let venues = state.venues.get_venues(&ctx, latitude, longitude).await?;

    Ok(Json(venues))
}

/// Raw Foursquare details of a venue
pub async fn get_venue_details(
    State(state): State<AppState>,
    Extension(ctx): Extension<Ctx>,
    Path(id): Path<String>,
) -> ApiResult<Response> {
    let venue = state.venues.get_venue(&ctx, &id).await?;

    Ok(([(header::CONTENT_TYPE, "application/json")], venue).into_response())
}

pub async fn route_not_found(uri: Uri) -> ApiResult<()> {
    Err(DomainError::not_found("route not found", log_body! { "path" => uri.path() }).into())
}

fn parse_json<T: DeserializeOwned>(body: &[u8]) -> Result<T, DomainError> {
    serde_json::from_slice(body).map_err(|e| {
        DomainError::bad_request(
            "unable to parse payload as JSON",
            log_body! {
                "payload" => String::from_utf8_lossy(body),
                "error" => e.to_string(),
            },
        )
    })
}

fn parse_user_id(raw: &str) -> Result<i64, DomainError> {
    raw.parse().map_err(|_| {
        DomainError::bad_request(
            "the input user id is not a valid integer",
            log_body! { "received_id" => raw },
        )
    })
}

fn parse_coordinates(raw: &str) -> Result<(f64, f64), DomainError> {
    let invalid = || {
        DomainError::bad_request(
            "the input coordinates are not valid, expected latitude,longitude",
            log_body! { "received_coordinates" => raw },
        )
    };

    let (latitude, longitude) = raw.split_once(',').ok_or_else(invalid)?;
    let latitude: f64 = latitude.trim().parse().map_err(|_| invalid())?;
    let longitude: f64 = longitude.trim().parse().map_err(|_| invalid())?;

    if !(-90.0..=90.0).contains(&latitude) || !(-180.0..=180.0).contains(&longitude) {
        return Err(invalid());
    }
    Ok((latitude, longitude))
}
