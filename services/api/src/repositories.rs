//! Repositories for database operations

use async_trait::async_trait;
use chrono::Utc;
use common::{Ctx, DomainError, LogBody, log_body};
use sqlx::{PgExecutor, PgPool, Row, postgres::PgRow};

use crate::domain::{UpsertUser, User, UsersRepo};

/// Name of the unique constraint on `users.email`
const EMAIL_CONSTRAINT: &str = "users_email_key";

/// PostgreSQL-backed [`UsersRepo`]
#[derive(Clone)]
pub struct PgUsersRepo {
    pool: PgPool,
}

impl PgUsersRepo {
    /// Create a new users repository
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

fn user_from_row(row: &PgRow) -> Result<User, sqlx::Error> {
    Ok(User {
        id: row.try_get("id")?,
        name: row.try_get("name")?,
        email: row.try_get("email")?,
        age: row.try_get("age")?,
        created_at: row.try_get("created_at")?,
        updated_at: row.try_get("updated_at")?,
    })
}

async fn find_user<'e, E>(db: E, user_id: i64) -> Result<Option<User>, sqlx::Error>
where
    E: PgExecutor<'e>,
{
    let row = sqlx::query(
        r#"
        SELECT id, name, email, age, created_at, updated_at
        FROM users
        WHERE id = $1
        "#,
    )
    .bind(user_id)
    .fetch_optional(db)
    .await?;

    row.as_ref().map(user_from_row).transpose()
}

async fn find_user_by_email<'e, E>(db: E, email: &str) -> Result<Option<User>, sqlx::Error>
where
    E: PgExecutor<'e>,
{
    let row = sqlx::query(
        r#"
        SELECT id, name, email, age, created_at, updated_at
        FROM users
        WHERE email = $1
        "#,
    )
    .bind(email)
    .fetch_optional(db)
    .await?;

    row.as_ref().map(user_from_row).transpose()
}

fn query_failed(title: &str, err: sqlx::Error, data: LogBody) -> DomainError {
    DomainError::internal(title, data.with("error", err.to_string()))
}

fn email_in_use(email: &str) -> DomainError {
    DomainError::bad_request("email already in use", log_body! { "email" => email })
}

fn user_not_found(user_id: i64) -> DomainError {
    DomainError::not_found("user not found", log_body! { "user_id" => user_id })
}

fn is_email_conflict(err: &sqlx::Error) -> bool {
    matches!(
        err,
        sqlx::Error::Database(db_err)
            if db_err.code().as_deref() == Some("23505")
                && db_err.constraint() == Some(EMAIL_CONSTRAINT)
    )
}

#[async_trait]
impl UsersRepo for PgUsersRepo {
    async fn upsert_user(&self, _ctx: &Ctx, user: &UpsertUser) -> Result<i64, DomainError> {
        let ids = log_body! { "user_id" => user.id };
        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| query_failed("could not start transaction", e, ids.clone()))?;

        if let Some(email) = user.email.as_deref() {
            let owner = find_user_by_email(&mut *tx, email)
                .await
                .map_err(|e| query_failed("could not look up user by email", e, ids.clone()))?;
            if owner.is_some_and(|owner| Some(owner.id) != user.id) {
                return Err(email_in_use(email));
            }
        }

        let now = Utc::now();
        let result = match user.id {
            Some(id) => {
                sqlx::query_scalar::<_, i64>(
                    r#"
                    INSERT INTO users (id, name, email, age, created_at, updated_at)
                    VALUES ($1, $2, $3, $4, $5, $5)
                    ON CONFLICT (id) DO UPDATE
                    SET name = EXCLUDED.name,
                        email = EXCLUDED.email,
                        age = EXCLUDED.age,
                        updated_at = EXCLUDED.updated_at
                    RETURNING id
                    "#,
                )
                .bind(id)
                .bind(&user.name)
                .bind(&user.email)
                .bind(user.age)
                .bind(now)
                .fetch_one(&mut *tx)
                .await
            }
            None => {
                sqlx::query_scalar::<_, i64>(
                    r#"
                    INSERT INTO users (name, email, age, created_at, updated_at)
                    VALUES ($1, $2, $3, $4, $4)
                    RETURNING id
                    "#,
                )
                .bind(&user.name)
                .bind(&user.email)
                .bind(user.age)
                .bind(now)
                .fetch_one(&mut *tx)
                .await
            }
        };

        let user_id = result.map_err(|e| {
            if is_email_conflict(&e) {
                email_in_use(user.email.as_deref().unwrap_or_default())
            } else {
                query_failed("could not upsert user", e, ids.clone())
            }
        })?;

        // Explicit ids bypass the sequence; keep it ahead of them.
        if user.id.is_some() {
            sqlx::query(
                r#"
                SELECT setval(pg_get_serial_sequence('users', 'id'),
                              GREATEST((SELECT MAX(id) FROM users), 1))
                "#,
            )
            .execute(&mut *tx)
            .await
            .map_err(|e| query_failed("could not advance user id sequence", e, ids.clone()))?;
        }

        tx.commit()
            .await
            .map_err(|e| query_failed("could not commit user", e, ids))?;

        Ok(user_id)
    }

    async fn get_user(&self, _ctx: &Ctx, user_id: i64) -> Result<User, DomainError> {
        find_user(&self.pool, user_id)
            .await
            .map_err(|e| query_failed("could not fetch user", e, log_body! { "user_id" => user_id }))?
            .ok_or_else(|| user_not_found(user_id))
    }

    async fn get_user_by_email(&self, _ctx: &Ctx, email: &str) -> Result<User, DomainError> {
        find_user_by_email(&self.pool, email)
            .await
            .map_err(|e| query_failed("could not fetch user", e, log_body! { "email" => email }))?
            .ok_or_else(|| DomainError::not_found("user not found", log_body! { "email" => email }))
    }

    async fn change_user_email(
        &self,
        _ctx: &Ctx,
        user_id: i64,
        new_email: &str,
    ) -> Result<(), DomainError> {
        let ids = log_body! { "user_id" => user_id };
        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| query_failed("could not start transaction", e, ids.clone()))?;

        let user = find_user(&mut *tx, user_id)
            .await
            .map_err(|e| query_failed("could not fetch user", e, ids.clone()))?
            .ok_or_else(|| user_not_found(user_id))?;
        if user.email.as_deref() == Some(new_email) {
            return Ok(());
        }

        let owner = find_user_by_email(&mut *tx, new_email)
            .await
            .map_err(|e| query_failed("could not look up user by email", e, ids.clone()))?;
        if owner.is_some_and(|owner| owner.id != user_id) {
            return Err(email_in_use(new_email));
        }

        sqlx::query(
            r#"
            UPDATE users
            SET email = $1, updated_at = $2
            WHERE id = $3
            "#,
        )
        .bind(new_email)
        .bind(Utc::now())
        .bind(user_id)
        .execute(&mut *tx)
        .await
        .map_err(|e| {
            if is_email_conflict(&e) {
                email_in_use(new_email)
            } else {
                query_failed("could not change user email", e, ids.clone())
            }
        })?;

        tx.commit()
            .await
            .map_err(|e| query_failed("could not commit email change", e, ids))
    }
}
