use chrono::{DateTime, Duration, Utc};
use sqlx::FromRow;

use crate::db::DbPool;

pub const RESET_TOKEN_TTL_MINUTES: i64 = 60;

#[derive(Debug, Clone, FromRow)]
pub struct PasswordResetToken {
    pub token_hash: String,
    pub user_id: i64,
    pub created_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    pub used_at: Option<DateTime<Utc>>,
}

impl PasswordResetToken {
    pub fn is_usable(&self, now: DateTime<Utc>) -> bool {
        self.used_at.is_none() && self.expires_at > now
    }

    pub async fn insert(db: &DbPool, token_hash: &str, user_id: i64) -> sqlx::Result<()> {
        let now = Utc::now();
        sqlx::query(
            "INSERT INTO password_reset_tokens (token_hash, user_id, created_at, expires_at) VALUES (?1, ?2, ?3, ?4)",
        )
        .bind(token_hash)
        .bind(user_id)
        .bind(now)
        .bind(now + Duration::minutes(RESET_TOKEN_TTL_MINUTES))
        .execute(db)
        .await?;
        Ok(())
    }

    pub async fn find(db: &DbPool, token_hash: &str) -> sqlx::Result<Option<PasswordResetToken>> {
        sqlx::query_as::<_, PasswordResetToken>(
            "SELECT token_hash, user_id, created_at, expires_at, used_at FROM password_reset_tokens WHERE token_hash = ?1",
        )
        .bind(token_hash)
        .fetch_optional(db)
        .await
    }

    pub async fn mark_used(db: &DbPool, token_hash: &str) -> sqlx::Result<()> {
        sqlx::query("UPDATE password_reset_tokens SET used_at = ?1 WHERE token_hash = ?2")
            .bind(Utc::now())
            .bind(token_hash)
            .execute(db)
            .await?;
        Ok(())
    }
}
