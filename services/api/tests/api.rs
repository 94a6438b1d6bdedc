//! End-to-end tests: the full router served on a local port

use async_trait::async_trait;
use axum::{Json, Router, extract::Path, routing::get};
use common::{
    Ctx, DomainError, LogProvider,
    cache::MemoryCache,
    jsonlogs::JsonLogger,
    log_body,
    rest::HttpClient,
};
use serde_json::{Value, json};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::net::TcpListener;
use venues_api::{
    AppState,
    domain::{FoursquareConfig, UpsertUser, User, UsersRepo, UsersService, VenuesService},
    middleware::REQUEST_ID_HEADER,
    routes::create_router,
};

/// In-memory [`UsersRepo`]
#[derive(Default)]
struct FakeUsersRepo {
    users: Mutex<HashMap<i64, User>>,
}

#[async_trait]
impl UsersRepo for FakeUsersRepo {
    async fn upsert_user(&self, _ctx: &Ctx, user: &UpsertUser) -> Result<i64, DomainError> {
        let mut users = self.users.lock().unwrap();
        if let Some(email) = user.email.as_deref() {
            let taken = users
                .values()
                .any(|u| u.email.as_deref() == Some(email) && Some(u.id) != user.id);
            if taken {
                return Err(DomainError::bad_request(
                    "email already in use",
                    log_body! { "email" => email },
                ));
            }
        }
        let id = user
            .id
            .unwrap_or_else(|| users.keys().max().copied().unwrap_or(0) + 1);
        users.insert(
            id,
            User {
                id,
                name: user.name.clone(),
                email: user.email.clone(),
                age: user.age,
                ..User::default()
            },
        );
        Ok(id)
    }

    async fn get_user(&self, _ctx: &Ctx, user_id: i64) -> Result<User, DomainError> {
        self.users
            .lock()
            .unwrap()
            .get(&user_id)
            .cloned()
            .ok_or_else(|| {
                DomainError::not_found("user not found", log_body! { "user_id" => user_id })
            })
    }

    async fn get_user_by_email(&self, _ctx: &Ctx, email: &str) -> Result<User, DomainError> {
        self.users
            .lock()
            .unwrap()
            .values()
            .find(|u| u.email.as_deref() == Some(email))
            .cloned()
            .ok_or_else(|| DomainError::not_found("user not found", log_body! { "email" => email }))
    }

    async fn change_user_email(
        &self,
        _ctx: &Ctx,
        user_id: i64,
        new_email: &str,
    ) -> Result<(), DomainError> {
        let mut users = self.users.lock().unwrap();
        let taken = users
            .values()
            .any(|u| u.email.as_deref() == Some(new_email) && u.id != user_id);
        if taken {
            return Err(DomainError::bad_request(
                "email already in use",
                log_body! { "email" => new_email },
            ));
        }
        let user = users.get_mut(&user_id).ok_or_else(|| {
            DomainError::not_found("user not found", log_body! { "user_id" => user_id })
        })?;
        user.email = Some(new_email.to_string());
        Ok(())
    }
}

struct TestApp {
    base: String,
    http: reqwest::Client,
    logs: Arc<Mutex<Vec<Value>>>,
    upstream_calls: Arc<Mutex<Vec<String>>>,
}

impl TestApp {
    fn logged(&self, title: &str) -> Vec<Value> {
        self.logs
            .lock()
            .unwrap()
            .iter()
            .filter(|line| line["title"] == title)
            .cloned()
            .collect()
    }
}

async fn serve(router: Router) -> String {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, router).await.unwrap();
    });
    format!("http://{addr}")
}

/// Foursquare stand-in recording the paths it serves
async fn fake_foursquare(calls: Arc<Mutex<Vec<String>>>) -> String {
    let search_calls = calls.clone();
    let router = Router::new()
        .route(
            "/v2/venues/search",
            get(move || {
                let calls = search_calls.clone();
                async move {
                    calls.lock().unwrap().push("search".to_string());
                    Json(json!({
                        "meta": {"code": 200},
                        "response": {"venues": [{
                            "id": "fake-venue-id",
                            "name": "Fake Venue",
                            "location": {"lat": 40.7, "lng": -74.0, "crossStreet": "Fake Street"}
                        }]}
                    }))
                }
            }),
        )
        .route(
            "/v2/venues/:id",
            get(move |Path(id): Path<String>| {
                let calls = calls.clone();
                async move {
                    calls.lock().unwrap().push(id.clone());
                    Json(json!({"response": {"venue": {"id": id}}}))
                }
            }),
        );
    serve(router).await
}

async fn spawn_app() -> TestApp {
    let logs = Arc::new(Mutex::new(Vec::new()));
    let sink = logs.clone();
    let logger: Arc<dyn LogProvider> = Arc::new(JsonLogger::with_sink(
        "DEBUG",
        Arc::new(move |line: &str| {
            sink.lock()
                .unwrap()
                .push(serde_json::from_str(line).unwrap())
        }),
    ));

    let upstream_calls = Arc::new(Mutex::new(Vec::new()));
    let foursquare = fake_foursquare(upstream_calls.clone()).await;

    let users = UsersService::new(logger.clone(), Arc::new(FakeUsersRepo::default()));
    let venues = VenuesService::new(
        logger.clone(),
        Arc::new(HttpClient::new(Duration::from_secs(5)).unwrap()),
        Arc::new(MemoryCache::new(Duration::from_secs(60))),
        FoursquareConfig {
            base_url: format!("{foursquare}/v2"),
            client_id: "fake-client-id".to_string(),
            secret: "fake-secret".to_string(),
        },
    );
    let base = serve(create_router(AppState::new(logger, users, venues))).await;

    TestApp {
        base,
        http: reqwest::Client::new(),
        logs,
        upstream_calls,
    }
}

#[tokio::test]
async fn test_ping_and_health() {
    let app = spawn_app().await;

    let pong = app.http.get(format!("{}/ping", app.base)).send().await.unwrap();
    assert_eq!(pong.status(), 200);
    assert_eq!(pong.text().await.unwrap(), "pong");

    let health: Value = app
        .http
        .get(format!("{}/", app.base))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(health, json!({"service": "venues-service", "state": "healthy"}));
}

#[tokio::test]
async fn test_create_then_get_user() {
    let app = spawn_app().await;

    let created: Value = app
        .http
        .post(format!("{}/users", app.base))
        .body(r#"{"name": "NewUserName", "age": 22}"#)
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(created["status"], "success");
    let user_id = created["user_id"].as_i64().unwrap();

    let response = app
        .http
        .get(format!("{}/users/{user_id}", app.base))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 200);
    let user: Value = response.json().await.unwrap();
    assert_eq!(user, json!({"id": user_id, "name": "NewUserName", "age": 22}));

    let created = app.logged("user-created");
    assert_eq!(created.len(), 1);
    assert_eq!(created[0]["user_id"], user_id);
    assert!(created[0]["request_id"].is_string());
}

#[tokio::test]
async fn test_change_user_email() {
    let app = spawn_app().await;

    let created: Value = app
        .http
        .post(format!("{}/users", app.base))
        .body(r#"{"name": "NewUserName", "age": 22}"#)
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    let user_id = created["user_id"].as_i64().unwrap();

    let changed = app
        .http
        .put(format!("{}/users/{user_id}/email", app.base))
        .body(r#"{"email": "new.user@example.com"}"#)
        .send()
        .await
        .unwrap();
    assert_eq!(changed.status(), 200);
    assert_eq!(changed.json::<Value>().await.unwrap(), json!({"status": "success"}));

    let user: Value = app
        .http
        .get(format!("{}/users/{user_id}", app.base))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(user["email"], "new.user@example.com");

    let rejected = app
        .http
        .put(format!("{}/users/{user_id}/email", app.base))
        .body(r#"{"email": "not-an-email"}"#)
        .send()
        .await
        .unwrap();
    assert_eq!(rejected.status(), 400);
}

impl TestApp {
    async fn upsert(&self, body: Value) -> (u16, Value) {
        let response = self
            .http
            .post(format!("{}/users", self.base))
            .json(&body)
            .send()
            .await
            .unwrap();
        (response.status().as_u16(), response.json().await.unwrap())
    }
}

#[tokio::test]
async fn test_upsert_with_the_same_id_is_idempotent() {
    let app = spawn_app().await;
    let payload = json!({
        "user_id": 4242,
        "name": "NewUserName",
        "age": 22,
        "email": "same.user@example.com",
    });

    let (first_status, first) = app.upsert(payload.clone()).await;
    let (second_status, second) = app.upsert(payload).await;

    assert_eq!((first_status, second_status), (200, 200));
    assert_eq!(first, json!({"status": "success", "user_id": 4242}));
    assert_eq!(second, first);

    let user: Value = app
        .http
        .get(format!("{}/users/4242", app.base))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(
        user,
        json!({"id": 4242, "name": "NewUserName", "age": 22, "email": "same.user@example.com"})
    );

    let (_, renamed) = app
        .upsert(json!({"user_id": 4242, "name": "RenamedUser", "age": 23}))
        .await;
    assert_eq!(renamed["user_id"], 4242);
}

#[tokio::test]
async fn test_email_belongs_to_a_single_user() {
    let app = spawn_app().await;
    let (_, owner) = app
        .upsert(json!({"name": "Owner", "age": 30, "email": "taken@example.com"}))
        .await;
    let (_, other) = app.upsert(json!({"name": "Other", "age": 31})).await;
    let other_id = other["user_id"].as_i64().unwrap();

    let (status, body) = app
        .upsert(json!({"name": "Copycat", "age": 32, "email": "taken@example.com"}))
        .await;
    assert_eq!(status, 400);
    assert_eq!(body["code"], "BadRequestErr");
    assert_eq!(body["title"], "email already in use");

    let response = app
        .http
        .put(format!("{}/users/{other_id}/email", app.base))
        .json(&json!({"email": "taken@example.com"}))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 400);

    // The owner may re-submit its own email.
    let (status, _) = app
        .upsert(json!({
            "user_id": owner["user_id"],
            "name": "Owner",
            "age": 30,
            "email": "taken@example.com",
        }))
        .await;
    assert_eq!(status, 200);
}

#[tokio::test]
async fn test_missing_user_is_404() {
    let app = spawn_app().await;

    let response = app
        .http
        .get(format!("{}/users/999999", app.base))
        .header(REQUEST_ID_HEADER, "fake-request-id")
        .send()
        .await
        .unwrap();

    assert_eq!(response.status(), 404);
    assert_eq!(response.headers()[REQUEST_ID_HEADER], "fake-request-id");
    let body: Value = response.json().await.unwrap();
    assert_eq!(
        body,
        json!({
            "code": "NotFoundErr",
            "title": "user not found",
            "request_id": "fake-request-id",
            "user_id": 999999,
        })
    );
    // Client errors are not logged as request errors.
    assert!(app.logged("request-error").is_empty());
    assert_eq!(app.logged("request-failed").len(), 1);
}

#[tokio::test]
async fn test_invalid_inputs_are_bad_requests() {
    let app = spawn_app().await;

    let response = app
        .http
        .get(format!("{}/users/abc", app.base))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 400);
    let body: Value = response.json().await.unwrap();
    assert_eq!(body["code"], "BadRequestErr");
    assert_eq!(body["title"], "the input user id is not a valid integer");
    assert_eq!(body["received_id"], "abc");

    let response = app
        .http
        .post(format!("{}/users", app.base))
        .body("{broken")
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 400);
    let body: Value = response.json().await.unwrap();
    assert_eq!(body["title"], "unable to parse payload as JSON");
    assert_eq!(body["payload"], "{broken");

    let response = app
        .http
        .get(format!("{}/venues/not-coordinates", app.base))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 400);
}

#[tokio::test]
async fn test_request_id_is_generated_and_logged() {
    let app = spawn_app().await;

    let response = app
        .http
        .post(format!("{}/users", app.base))
        .body(r#"{"name": "NewUserName", "age": 22}"#)
        .send()
        .await
        .unwrap();

    let request_id = response.headers()[REQUEST_ID_HEADER]
        .to_str()
        .unwrap()
        .to_string();
    assert_eq!(request_id.len(), 36);

    let completed = app.logged("request-completed");
    assert_eq!(completed.len(), 1);
    assert_eq!(completed[0]["route"], "POST /users");
    assert_eq!(completed[0]["request_body"], r#"{"name": "NewUserName", "age": 22}"#);
    assert_eq!(completed[0]["request_id"], request_id.as_str());
    assert!(completed[0]["duration_ms"].is_u64());
}

#[tokio::test]
async fn test_unknown_route_is_404() {
    let app = spawn_app().await;

    let response = app
        .http
        .get(format!("{}/nowhere", app.base))
        .send()
        .await
        .unwrap();

    assert_eq!(response.status(), 404);
    let body: Value = response.json().await.unwrap();
    assert_eq!(body["title"], "route not found");
    assert_eq!(body["path"], "/nowhere");
}

#[tokio::test]
async fn test_venues_by_coordinates() {
    let app = spawn_app().await;

    let response = app
        .http
        .get(format!("{}/venues/40.7,-74.0", app.base))
        .send()
        .await
        .unwrap();

    assert_eq!(response.status(), 200);
    let venues: Value = response.json().await.unwrap();
    assert_eq!(venues[0]["id"], "fake-venue-id");
    assert_eq!(venues[0]["location"]["crossStreet"], "Fake Street");
    assert_eq!(*app.upstream_calls.lock().unwrap(), vec!["search".to_string()]);
}

#[tokio::test]
async fn test_venue_details_are_cached() {
    let app = spawn_app().await;
    let url = format!("{}/venues/details/fake-venue-id", app.base);

    for _ in 0..2 {
        let response = app.http.get(&url).send().await.unwrap();
        assert_eq!(response.status(), 200);
        assert_eq!(response.headers()["content-type"], "application/json");
        let venue: Value = response.json().await.unwrap();
        assert_eq!(venue, json!({"response": {"venue": {"id": "fake-venue-id"}}}));
    }

    assert_eq!(
        *app.upstream_calls.lock().unwrap(),
        vec!["fake-venue-id".to_string()]
    );
    assert_eq!(app.logged("fetching-venue-from-cache").len(), 1);
}

#[tokio::test]
async fn test_upstream_failures_are_internal_errors() {
    let logs = Arc::new(Mutex::new(Vec::new()));
    let sink = logs.clone();
    let logger: Arc<dyn LogProvider> = Arc::new(JsonLogger::with_sink(
        "INFO",
        Arc::new(move |line: &str| {
            sink.lock()
                .unwrap()
                .push(serde_json::from_str::<Value>(line).unwrap())
        }),
    ));
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let unreachable = format!("http://{}", listener.local_addr().unwrap());
    drop(listener);

    let venues = VenuesService::new(
        logger.clone(),
        Arc::new(HttpClient::new(Duration::from_secs(5)).unwrap()),
        Arc::new(MemoryCache::new(Duration::from_secs(60))),
        FoursquareConfig {
            base_url: unreachable,
            client_id: "fake-client-id".to_string(),
            secret: "fake-secret".to_string(),
        },
    );
    let users = UsersService::new(logger.clone(), Arc::new(FakeUsersRepo::default()));
    let base = serve(create_router(AppState::new(logger, users, venues))).await;

    let response = reqwest::get(format!("{base}/venues/40.7,-74.0")).await.unwrap();

    assert_eq!(response.status(), 500);
    let body: Value = response.json().await.unwrap();
    assert_eq!(body["code"], "InternalErr");
    assert_eq!(body["title"], "error retrieving venues from foursquare");
    assert!(body.get("latitude").is_none());

    let logs = logs.lock().unwrap();
    let request_error = logs
        .iter()
        .find(|line| line["title"] == "request-error")
        .unwrap();
    assert_eq!(request_error["route"], "GET /venues/40.7,-74.0");
    assert_eq!(request_error["latitude"], 40.7);
}
