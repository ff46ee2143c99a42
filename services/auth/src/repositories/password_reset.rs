//! Password reset token repository

use chrono::{DateTime, Utc};
use sqlx::{PgPool, Row, postgres::PgRow};
use tracing::info;
use uuid::Uuid;

use crate::error::AppResult;
use crate::models::PasswordReset;

/// Password reset token repository
#[derive(Clone)]
pub struct PasswordResetRepository {
    pool: PgPool,
}

impl PasswordResetRepository {
    /// Create a new password reset repository
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Persist a new reset token for a user
    pub async fn create(
        &self,
        user_id: Uuid,
        token: &str,
        expires_at: DateTime<Utc>,
    ) -> AppResult<PasswordReset> {
        info!("Creating password reset token for user: {}", user_id);

        let row = sqlx::query(
            r#"
            INSERT INTO password_resets (user_id, token, expires_at)
            VALUES ($1, $2, $3)
            RETURNING id, user_id, token, expires_at, used, created_at
            "#,
        )
        .bind(user_id)
        .bind(token)
        .bind(expires_at)
        .fetch_one(&self.pool)
        .await?;

        Ok(map_reset(&row))
    }

    /// Count reset rows created for a user since the given instant
    ///
    /// Backs the request rate limit. The count-then-insert sequence is not
    /// atomic, so the limit is best-effort: concurrent requests can exceed
    /// it by a small margin.
    pub async fn count_created_since(
        &self,
        user_id: Uuid,
        since: DateTime<Utc>,
    ) -> AppResult<i64> {
        let count: i64 = sqlx::query_scalar(
            r#"
            SELECT COUNT(*)
            FROM password_resets
            WHERE user_id = $1 AND created_at > $2
            "#,
        )
        .bind(user_id)
        .bind(since)
        .fetch_one(&self.pool)
        .await?;

        Ok(count)
    }

    /// Redeem a reset token and install the new password hash
    ///
    /// One transaction covers both writes: the user's password hash and the
    /// token's `used` flag commit together or not at all. The row lock plus
    /// the conditional update guarantee a token is consumed at most once,
    /// even under concurrent redemption attempts. Returns the owning user id
    /// when a live token was consumed, `None` when the token is unknown,
    /// expired, or already used.
    pub async fn redeem(&self, token: &str, new_password_hash: &str) -> AppResult<Option<Uuid>> {
        let mut tx = self.pool.begin().await?;

        let row = sqlx::query(
            r#"
            SELECT id, user_id
            FROM password_resets
            WHERE token = $1 AND used = false AND expires_at > NOW()
            FOR UPDATE
            "#,
        )
        .bind(token)
        .fetch_optional(&mut *tx)
        .await?;

        let Some(row) = row else {
            return Ok(None);
        };

        let reset_id: Uuid = row.get("id");
        let user_id: Uuid = row.get("user_id");

        sqlx::query(
            r#"
            UPDATE users
            SET password_hash = $1, updated_at = NOW()
            WHERE id = $2
            "#,
        )
        .bind(new_password_hash)
        .bind(user_id)
        .execute(&mut *tx)
        .await?;

        let marked = sqlx::query(
            r#"
            UPDATE password_resets
            SET used = true
            WHERE id = $1 AND used = false
            "#,
        )
        .bind(reset_id)
        .execute(&mut *tx)
        .await?;

        if marked.rows_affected() == 0 {
            tx.rollback().await?;
            return Ok(None);
        }

        tx.commit().await?;

        info!("Password reset token redeemed for user: {}", user_id);
        Ok(Some(user_id))
    }

    /// Delete expired and spent tokens, returning the number removed
    pub async fn delete_expired(&self) -> AppResult<u64> {
        let result = sqlx::query(
            r#"
            DELETE FROM password_resets
            WHERE expires_at < NOW() OR used = true
            "#,
        )
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected())
    }
}

fn map_reset(row: &PgRow) -> PasswordReset {
    PasswordReset {
        id: row.get("id"),
        user_id: row.get("user_id"),
        token: row.get("token"),
        expires_at: row.get("expires_at"),
        used: row.get("used"),
        created_at: row.get("created_at"),
    }
}
