//! Users: entity, repository port and service

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use common::{Ctx, DomainError, LogBody, LogProvider, log_body};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

use crate::validation::{validate_age, validate_email, validate_name};

/// A stored user
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct User {
    pub id: i64,
    pub name: String,
    pub email: Option<String>,
    pub age: i32,
    pub created_at: Option<DateTime<Utc>>,
    pub updated_at: Option<DateTime<Utc>>,
}

/// Input of an insert-or-update
///
/// Without an `id` a new user is created.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct UpsertUser {
    pub id: Option<i64>,
    pub name: String,
    pub email: Option<String>,
    pub age: i32,
}

/// Persistent storage of users
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait UsersRepo: Send + Sync {
    /// Insert or update a user, returning its id
    async fn upsert_user(&self, ctx: &Ctx, user: &UpsertUser) -> Result<i64, DomainError>;

    async fn get_user(&self, ctx: &Ctx, user_id: i64) -> Result<User, DomainError>;

    async fn get_user_by_email(&self, ctx: &Ctx, email: &str) -> Result<User, DomainError>;

    /// Move a user to a new email unless another user owns it
    async fn change_user_email(
        &self,
        ctx: &Ctx,
        user_id: i64,
        new_email: &str,
    ) -> Result<(), DomainError>;
}

#[derive(Clone)]
pub struct UsersService {
    logger: Arc<dyn LogProvider>,
    repo: Arc<dyn UsersRepo>,
}

impl UsersService {
    pub fn new(logger: Arc<dyn LogProvider>, repo: Arc<dyn UsersRepo>) -> Self {
        Self { logger, repo }
    }

    pub async fn upsert_user(&self, ctx: &Ctx, user: UpsertUser) -> Result<i64, DomainError> {
        validate_name(&user.name).map_err(|reason| invalid("invalid name", reason))?;
        validate_age(user.age).map_err(|reason| invalid("invalid age", reason))?;
        if let Some(email) = user.email.as_deref() {
            validate_email(email)
                .map_err(|reason| invalid("invalid email", reason).with("email", email))?;
        }

        let user_id = self.repo.upsert_user(ctx, &user).await?;

        self.logger
            .info(ctx, "user-created", &[log_body! { "user_id" => user_id }]);
        Ok(user_id)
    }

    pub async fn get_user(&self, ctx: &Ctx, user_id: i64) -> Result<User, DomainError> {
        self.repo.get_user(ctx, user_id).await
    }

    pub async fn change_user_email(
        &self,
        ctx: &Ctx,
        user_id: i64,
        new_email: &str,
    ) -> Result<(), DomainError> {
        validate_email(new_email)
            .map_err(|reason| invalid("invalid email", reason).with("email", new_email))?;

        self.repo.change_user_email(ctx, user_id, new_email).await?;

        self.logger.info(
            ctx,
            "user-email-changed",
            &[log_body! { "user_id" => user_id }],
        );
        Ok(())
    }
}

fn invalid(title: &str, reason: String) -> DomainError {
    DomainError::bad_request(title, LogBody::new().with("reason", reason))
}
