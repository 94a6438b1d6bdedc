//! API models for request and response payloads

use serde::{Deserialize, Serialize};

use crate::domain::{UpsertUser, User};

/// Body of `POST /users`
#[derive(Debug, Deserialize)]
pub struct UpsertUserRequest {
    /// Existing user to update; absent or 0 creates a new one
    #[serde(default)]
    pub user_id: Option<i64>,
    pub name: String,
    pub age: i32,
    #[serde(default)]
    pub email: Option<String>,
}

impl From<UpsertUserRequest> for UpsertUser {
    fn from(request: UpsertUserRequest) -> Self {
        UpsertUser {
            id: request.user_id.filter(|id| *id != 0),
            name: request.name,
            email: request.email,
            age: request.age,
        }
    }
}

#[derive(Debug, Serialize)]
pub struct UpsertUserResponse {
    pub status: &'static str,
    pub user_id: i64,
}

/// Public view of a user
#[derive(Debug, Serialize)]
pub struct UserResponse {
    pub id: i64,
    pub name: String,
    pub age: i32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
}

impl From<User> for UserResponse {
    fn from(user: User) -> Self {
        UserResponse {
            id: user.id,
            name: user.name,
            age: user.age,
            email: user.email,
        }
    }
}

/// Body of `PUT /users/:id/email`
#[derive(Debug, Deserialize)]
pub struct ChangeEmailRequest {
    pub email: String,
}

#[derive(Debug, Serialize)]
pub struct StatusResponse {
    pub status: &'static str,
}

impl StatusResponse {
    pub fn success() -> Self {
        StatusResponse { status: "success" }
    }
}

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub service: &'static str,
    pub state: &'static str,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_upsert_request_defaults() {
        let request: UpsertUserRequest =
            serde_json::from_value(json!({"name": "NewUserName", "age": 22})).unwrap();
        let user = UpsertUser::from(request);

        assert_eq!(user.id, None);
        assert_eq!(user.email, None);
        assert_eq!(user.age, 22);
    }

    #[test]
    fn test_zero_user_id_creates_a_new_user() {
        let request: UpsertUserRequest =
            serde_json::from_value(json!({"user_id": 0, "name": "NewUserName", "age": 22}))
                .unwrap();

        assert_eq!(UpsertUser::from(request).id, None);
    }

    #[test]
    fn test_user_response_omits_a_missing_email() {
        let user = User {
            id: 42,
            name: "NewUserName".to_string(),
            age: 22,
            ..User::default()
        };
        assert_eq!(
            serde_json::to_value(UserResponse::from(user.clone())).unwrap(),
            json!({"id": 42, "name": "NewUserName", "age": 22})
        );

        let user = User {
            email: Some("new.user@example.com".to_string()),
            ..user
        };
        assert_eq!(
            serde_json::to_value(UserResponse::from(user)).unwrap()["email"],
            "new.user@example.com"
        );
    }
}
