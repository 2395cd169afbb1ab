//! Database helpers for users and refresh tokens.
//!
//! Refresh-token redemption relies on the store for its single-use
//! guarantee: the conditional `DELETE ... RETURNING` is atomic per row, so
//! of two concurrent redemptions of the same hash exactly one sees an
//! affected row and the other finds it already gone.

use anyhow::{Context, Result};
use sqlx::{PgPool, Row};
use tracing::Instrument;
use uuid::Uuid;

/// A user row. Timestamps come back as text; they are only ever echoed to
/// the client, never computed on.
pub(super) struct UserRecord {
    pub(super) id: Uuid,
    pub(super) email: String,
    pub(super) password_hash: String,
    pub(super) role: String,
    pub(super) email_verified: bool,
    pub(super) created_at: String,
    pub(super) updated_at: String,
}

/// Outcome when attempting to create a new user.
#[derive(Debug)]
pub(super) enum RegisterOutcome {
    Created(Uuid),
    Conflict,
}

const USER_COLUMNS: &str = r"
    id, email, password_hash, role, email_verified,
    created_at::text AS created_at, updated_at::text AS updated_at
";

fn user_from_row(row: &sqlx::postgres::PgRow) -> UserRecord {
    UserRecord {
        id: row.get("id"),
        email: row.get("email"),
        password_hash: row.get("password_hash"),
        role: row.get("role"),
        email_verified: row.get("email_verified"),
        created_at: row.get("created_at"),
        updated_at: row.get("updated_at"),
    }
}

fn query_span(operation: &str, statement: &str) -> tracing::Span {
    tracing::info_span!(
        "db.query",
        db.system = "postgresql",
        db.operation = operation,
        db.statement = statement
    )
}

pub(super) async fn lookup_user_by_email(
    pool: &PgPool,
    email: &str,
) -> Result<Option<UserRecord>> {
    let query = format!("SELECT {USER_COLUMNS} FROM users WHERE email = $1");
    let row = sqlx::query(&query)
        .bind(email)
        .fetch_optional(pool)
        .instrument(query_span("SELECT", &query))
        .await
        .context("failed to lookup user by email")?;
    Ok(row.as_ref().map(user_from_row))
}

pub(super) async fn lookup_user_by_id(pool: &PgPool, id: Uuid) -> Result<Option<UserRecord>> {
    let query = format!("SELECT {USER_COLUMNS} FROM users WHERE id = $1");
    let row = sqlx::query(&query)
        .bind(id)
        .fetch_optional(pool)
        .instrument(query_span("SELECT", &query))
        .await
        .context("failed to lookup user by id")?;
    Ok(row.as_ref().map(user_from_row))
}

/// Insert a new, unverified user. A duplicate email maps to `Conflict`
/// instead of an error so the handler can answer 409.
pub(super) async fn insert_user(
    pool: &PgPool,
    email: &str,
    password_hash: &str,
) -> Result<RegisterOutcome> {
    let query = r"
        INSERT INTO users (email, password_hash)
        VALUES ($1, $2)
        RETURNING id
    ";
    let row = sqlx::query(query)
        .bind(email)
        .bind(password_hash)
        .fetch_one(pool)
        .instrument(query_span("INSERT", query))
        .await;

    match row {
        Ok(row) => Ok(RegisterOutcome::Created(row.get("id"))),
        Err(err) if is_unique_violation(&err) => Ok(RegisterOutcome::Conflict),
        Err(err) => Err(err).context("failed to insert user"),
    }
}

pub(super) async fn insert_refresh_token(
    pool: &PgPool,
    user_id: Uuid,
    token_hash: &[u8],
) -> Result<()> {
    let query = r"
        INSERT INTO refresh_tokens (user_id, token_hash)
        VALUES ($1, $2)
    ";
    sqlx::query(query)
        .bind(user_id)
        .bind(token_hash)
        .execute(pool)
        .instrument(query_span("INSERT", query))
        .await
        .context("failed to insert refresh token")?;
    Ok(())
}

/// Redeem a refresh token: delete the row matching both the hash and the
/// signed subject. Returns whether this caller won the row. Two concurrent
/// redemptions of the same token get exactly one `true` between them.
pub(super) async fn redeem_refresh_token(
    pool: &PgPool,
    token_hash: &[u8],
    user_id: Uuid,
) -> Result<bool> {
    let query = r"
        DELETE FROM refresh_tokens
        WHERE token_hash = $1
          AND user_id = $2
        RETURNING id
    ";
    let row = sqlx::query(query)
        .bind(token_hash)
        .bind(user_id)
        .fetch_optional(pool)
        .instrument(query_span("DELETE", query))
        .await
        .context("failed to redeem refresh token")?;
    Ok(row.is_some())
}

/// Delete a stored refresh token by hash. Logout is idempotent; it is fine
/// if no rows match.
pub(super) async fn delete_refresh_token(pool: &PgPool, token_hash: &[u8]) -> Result<()> {
    let query = "DELETE FROM refresh_tokens WHERE token_hash = $1";
    sqlx::query(query)
        .bind(token_hash)
        .execute(pool)
        .instrument(query_span("DELETE", query))
        .await
        .context("failed to delete refresh token")?;
    Ok(())
}

pub(super) async fn count_refresh_tokens(pool: &PgPool, user_id: Uuid) -> Result<i64> {
    let query = "SELECT COUNT(*) AS sessions FROM refresh_tokens WHERE user_id = $1";
    let row = sqlx::query(query)
        .bind(user_id)
        .fetch_one(pool)
        .instrument(query_span("SELECT", query))
        .await
        .context("failed to count refresh tokens")?;
    Ok(row.get("sessions"))
}

/// Record a password-reset token hash with its expiry window.
pub(super) async fn set_password_reset(
    pool: &PgPool,
    user_id: Uuid,
    token_hash: &[u8],
    ttl_seconds: i64,
) -> Result<()> {
    let query = r"
        UPDATE users
        SET password_reset_hash = $2,
            password_reset_expires_at = NOW() + ($3 * INTERVAL '1 second'),
            updated_at = NOW()
        WHERE id = $1
    ";
    sqlx::query(query)
        .bind(user_id)
        .bind(token_hash)
        .bind(ttl_seconds)
        .execute(pool)
        .instrument(query_span("UPDATE", query))
        .await
        .context("failed to set password reset token")?;
    Ok(())
}

/// Compensating action when the reset email cannot be delivered: clear the
/// token fields so the stored state never points at a mail nobody received.
pub(super) async fn clear_password_reset(pool: &PgPool, user_id: Uuid) -> Result<()> {
    let query = r"
        UPDATE users
        SET password_reset_hash = NULL,
            password_reset_expires_at = NULL,
            updated_at = NOW()
        WHERE id = $1
    ";
    sqlx::query(query)
        .bind(user_id)
        .execute(pool)
        .instrument(query_span("UPDATE", query))
        .await
        .context("failed to clear password reset token")?;
    Ok(())
}

/// Find the user holding a still-valid reset token. The expiry comparison is
/// strictly greater-than: a token is dead the instant its window closes.
pub(super) async fn lookup_user_by_reset_hash(
    pool: &PgPool,
    token_hash: &[u8],
) -> Result<Option<UserRecord>> {
    let query = format!(
        r"
        SELECT {USER_COLUMNS} FROM users
        WHERE password_reset_hash = $1
          AND password_reset_expires_at > NOW()
        "
    );
    let row = sqlx::query(&query)
        .bind(token_hash)
        .fetch_optional(pool)
        .instrument(query_span("SELECT", &query))
        .await
        .context("failed to lookup user by reset token")?;
    Ok(row.as_ref().map(user_from_row))
}

/// Complete a password reset: swap the hash, clear the reset fields, and
/// purge every refresh token so all devices must log in again.
pub(super) async fn apply_password_reset(
    pool: &PgPool,
    user_id: Uuid,
    password_hash: &str,
) -> Result<()> {
    let mut tx = pool.begin().await.context("begin password reset")?;

    let query = r"
        UPDATE users
        SET password_hash = $2,
            password_reset_hash = NULL,
            password_reset_expires_at = NULL,
            updated_at = NOW()
        WHERE id = $1
    ";
    sqlx::query(query)
        .bind(user_id)
        .bind(password_hash)
        .execute(&mut *tx)
        .instrument(query_span("UPDATE", query))
        .await
        .context("failed to update password")?;

    let query = "DELETE FROM refresh_tokens WHERE user_id = $1";
    sqlx::query(query)
        .bind(user_id)
        .execute(&mut *tx)
        .instrument(query_span("DELETE", query))
        .await
        .context("failed to purge refresh tokens")?;

    tx.commit().await.context("commit password reset")?;
    Ok(())
}

pub(super) async fn mark_email_verified(pool: &PgPool, user_id: Uuid) -> Result<()> {
    let query = r"
        UPDATE users
        SET email_verified = TRUE,
            updated_at = NOW()
        WHERE id = $1
    ";
    sqlx::query(query)
        .bind(user_id)
        .execute(pool)
        .instrument(query_span("UPDATE", query))
        .await
        .context("failed to mark email verified")?;
    Ok(())
}

/// Delete an account: refresh tokens first, then the user row. The foreign
/// key cascades anyway; the explicit order keeps the intent readable.
pub(super) async fn delete_user(pool: &PgPool, user_id: Uuid) -> Result<()> {
    let mut tx = pool.begin().await.context("begin account deletion")?;

    let query = "DELETE FROM refresh_tokens WHERE user_id = $1";
    sqlx::query(query)
        .bind(user_id)
        .execute(&mut *tx)
        .instrument(query_span("DELETE", query))
        .await
        .context("failed to delete refresh tokens")?;

    let query = "DELETE FROM users WHERE id = $1";
    sqlx::query(query)
        .bind(user_id)
        .execute(&mut *tx)
        .instrument(query_span("DELETE", query))
        .await
        .context("failed to delete user")?;

    tx.commit().await.context("commit account deletion")?;
    Ok(())
}

/// The store is the time authority for everything else (expiries, strict
/// comparisons), so export timestamps come from it too.
pub(super) async fn current_timestamp(pool: &PgPool) -> Result<String> {
    let query = "SELECT NOW()::text AS now";
    let row = sqlx::query(query)
        .fetch_one(pool)
        .instrument(query_span("SELECT", query))
        .await
        .context("failed to read current timestamp")?;
    Ok(row.get("now"))
}

fn is_unique_violation(err: &sqlx::Error) -> bool {
    match err {
        sqlx::Error::Database(db_err) => db_err.code().is_some_and(|code| code.as_ref() == "23505"),
        _ => false,
    }
}

#[cfg(test)]
mod tests {
    use super::{RegisterOutcome, is_unique_violation};
    use sqlx::error::{DatabaseError, ErrorKind};
    use std::borrow::Cow;
    use std::error::Error as StdError;
    use std::fmt;

    #[test]
    fn register_outcome_debug_names() {
        assert!(format!("{:?}", RegisterOutcome::Conflict).contains("Conflict"));
    }

    #[derive(Debug)]
    struct TestDbError {
        code: Option<&'static str>,
    }

    impl fmt::Display for TestDbError {
        fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
            write!(f, "test database error")
        }
    }

    impl StdError for TestDbError {}

    impl DatabaseError for TestDbError {
        fn message(&self) -> &'static str {
            "test database error"
        }

        fn code(&self) -> Option<Cow<'_, str>> {
            self.code.map(Cow::Borrowed)
        }

        fn as_error(&self) -> &(dyn StdError + Send + Sync + 'static) {
            self
        }

        fn as_error_mut(&mut self) -> &mut (dyn StdError + Send + Sync + 'static) {
            self
        }

        fn into_error(self: Box<Self>) -> Box<dyn StdError + Send + Sync + 'static> {
            self
        }

        fn kind(&self) -> ErrorKind {
            ErrorKind::UniqueViolation
        }
    }

    #[test]
    fn is_unique_violation_matches_sqlstate() {
        let err = sqlx::Error::Database(Box::new(TestDbError {
            code: Some("23505"),
        }));
        assert!(is_unique_violation(&err));

        let err = sqlx::Error::Database(Box::new(TestDbError {
            code: Some("99999"),
        }));
        assert!(!is_unique_violation(&err));

        assert!(!is_unique_violation(&sqlx::Error::RowNotFound));
    }
}
