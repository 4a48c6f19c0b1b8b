use anyhow::Context;
use sqlx::PgPool;
use time::OffsetDateTime;
use uuid::Uuid;

use crate::auth::repo_types::{NewUser, ProfileChanges, User};

impl User {
    /// Find a user by id.
    pub async fn find_by_id(db: &PgPool, id: Uuid) -> anyhow::Result<Option<User>> {
        let user = sqlx::query_as::<_, User>(
            r#"
            SELECT id, username, email, password_hash, first_name, last_name,
                   is_active, created_at, updated_at
            FROM users
            WHERE id = $1
            "#,
        )
        .bind(id)
        .fetch_optional(db)
        .await
        .context("find user by id")?;
        Ok(user)
    }

    /// Find a user by username.
    pub async fn find_by_username(db: &PgPool, username: &str) -> anyhow::Result<Option<User>> {
        let user = sqlx::query_as::<_, User>(
            r#"
            SELECT id, username, email, password_hash, first_name, last_name,
                   is_active, created_at, updated_at
            FROM users
            WHERE username = $1
            "#,
        )
        .bind(username)
        .fetch_optional(db)
        .await
        .context("find user by username")?;
        Ok(user)
    }

    pub async fn username_taken(db: &PgPool, username: &str) -> anyhow::Result<bool> {
        let taken = sqlx::query_scalar::<_, bool>(
            "SELECT EXISTS (SELECT 1 FROM users WHERE username = $1)",
        )
        .bind(username)
        .fetch_one(db)
        .await
        .context("check username")?;
        Ok(taken)
    }

    /// Whether another account (not `except`) already uses `email`.
    pub async fn email_taken(
        db: &PgPool,
        email: &str,
        except: Option<Uuid>,
    ) -> anyhow::Result<bool> {
        let taken = sqlx::query_scalar::<_, bool>(
            r#"
            SELECT EXISTS (
                SELECT 1 FROM users
                WHERE lower(email) = lower($1)
                  AND ($2::uuid IS NULL OR id <> $2)
            )
            "#,
        )
        .bind(email)
        .bind(except)
        .fetch_one(db)
        .await
        .context("check email")?;
        Ok(taken)
    }

    /// Create a new user with hashed password.
    pub async fn create(db: &PgPool, new: &NewUser) -> anyhow::Result<User> {
        let user = sqlx::query_as::<_, User>(
            r#"
            INSERT INTO users (id, username, email, password_hash, first_name, last_name)
            VALUES ($1, $2, $3, $4, $5, $6)
            RETURNING id, username, email, password_hash, first_name, last_name,
                      is_active, created_at, updated_at
            "#,
        )
        .bind(Uuid::new_v4())
        .bind(&new.username)
        .bind(&new.email)
        .bind(&new.password_hash)
        .bind(&new.first_name)
        .bind(&new.last_name)
        .fetch_one(db)
        .await
        .context("insert user")?;
        Ok(user)
    }

    pub async fn update_profile(
        db: &PgPool,
        id: Uuid,
        changes: &ProfileChanges,
    ) -> anyhow::Result<User> {
        let user = sqlx::query_as::<_, User>(
            r#"
            UPDATE users
               SET email = COALESCE($2, email),
                   first_name = COALESCE($3, first_name),
                   last_name = COALESCE($4, last_name),
                   updated_at = now()
             WHERE id = $1
            RETURNING id, username, email, password_hash, first_name, last_name,
                      is_active, created_at, updated_at
            "#,
        )
        .bind(id)
        .bind(changes.email.as_deref())
        .bind(changes.first_name.as_deref())
        .bind(changes.last_name.as_deref())
        .fetch_one(db)
        .await
        .context("update profile")?;
        Ok(user)
    }

    pub async fn set_password(db: &PgPool, id: Uuid, password_hash: &str) -> anyhow::Result<()> {
        sqlx::query("UPDATE users SET password_hash = $2, updated_at = now() WHERE id = $1")
            .bind(id)
            .bind(password_hash)
            .execute(db)
            .await
            .context("set password")?;
        Ok(())
    }
}

/// Field whose unique constraint rejected a user write, if that is what
/// `err` is. Covers the race between the pre-check and the write.
pub fn duplicate_field(err: &anyhow::Error) -> Option<&'static str> {
    let Some(sqlx::Error::Database(db_err)) = err.downcast_ref::<sqlx::Error>() else {
        return None;
    };
    if !db_err.is_unique_violation() {
        return None;
    }
    match db_err.constraint() {
        Some("users_username_key") => Some("username"),
        Some("users_email_key") => Some("email"),
        _ => None,
    }
}

/// Record a refresh token id as revoked. Revoking twice is a no-op.
pub async fn blacklist_token(
    db: &PgPool,
    jti: Uuid,
    user_id: Uuid,
    expires_at: OffsetDateTime,
) -> anyhow::Result<()> {
    sqlx::query(
        r#"
        INSERT INTO token_blacklist (jti, user_id, expires_at)
        VALUES ($1, $2, $3)
        ON CONFLICT (jti) DO NOTHING
        "#,
    )
    .bind(jti)
    .bind(user_id)
    .bind(expires_at)
    .execute(db)
    .await
    .context("blacklist token")?;
    Ok(())
}

pub async fn is_blacklisted(db: &PgPool, jti: Uuid) -> anyhow::Result<bool> {
    let found = sqlx::query_scalar::<_, bool>(
        "SELECT EXISTS (SELECT 1 FROM token_blacklist WHERE jti = $1)",
    )
    .bind(jti)
    .fetch_one(db)
    .await
    .context("check token blacklist")?;
    Ok(found)
}
