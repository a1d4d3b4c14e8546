use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;

use crate::db::DbPool;

pub const SESSION_TTL_DAYS: i64 = 14;

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct Session {
    pub id: String,
    pub user_id: i64,
    pub created_at: DateTime<Utc>,
    pub last_seen_at: DateTime<Utc>,
    pub expires_at: Option<DateTime<Utc>>,
}

impl Session {
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.expires_at.map(|at| at <= now).unwrap_or(false)
    }

    pub async fn insert(db: &DbPool, id: &str, user_id: i64) -> sqlx::Result<Session> {
        let now = Utc::now();
        let session = Session {
            id: id.to_string(),
            user_id,
            created_at: now,
            last_seen_at: now,
            expires_at: Some(now + Duration::days(SESSION_TTL_DAYS)),
        };
        sqlx::query(
            "INSERT INTO sessions (id, user_id, created_at, last_seen_at, expires_at) VALUES (?1, ?2, ?3, ?4, ?5)",
        )
        .bind(&session.id)
        .bind(session.user_id)
        .bind(session.created_at)
        .bind(session.last_seen_at)
        .bind(session.expires_at)
        .execute(db)
        .await?;
        Ok(session)
    }

    pub async fn find(db: &DbPool, id: &str) -> sqlx::Result<Option<Session>> {
        sqlx::query_as::<_, Session>(
            "SELECT id, user_id, created_at, last_seen_at, expires_at FROM sessions WHERE id = ?1",
        )
        .bind(id)
        .fetch_optional(db)
        .await
    }

    pub async fn touch(db: &DbPool, id: &str) -> sqlx::Result<()> {
        sqlx::query("UPDATE sessions SET last_seen_at = ?1 WHERE id = ?2")
            .bind(Utc::now())
            .bind(id)
            .execute(db)
            .await?;
        Ok(())
    }

    pub async fn delete(db: &DbPool, id: &str) -> sqlx::Result<()> {
        sqlx::query("DELETE FROM sessions WHERE id = ?1")
            .bind(id)
            .execute(db)
            .await?;
        Ok(())
    }

    pub async fn delete_for_user(db: &DbPool, user_id: i64) -> sqlx::Result<u64> {
        let result = sqlx::query("DELETE FROM sessions WHERE user_id = ?1")
            .bind(user_id)
            .execute(db)
            .await?;
        Ok(result.rows_affected())
    }

    /// Ends every session of a user except `keep`.
    pub async fn delete_others(db: &DbPool, user_id: i64, keep: &str) -> sqlx::Result<u64> {
        let result = sqlx::query("DELETE FROM sessions WHERE user_id = ?1 AND id != ?2")
            .bind(user_id)
            .bind(keep)
            .execute(db)
            .await?;
        Ok(result.rows_affected())
    }
}
