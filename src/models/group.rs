use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

use crate::{db::DbPool, models::user::User};

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct Group {
    pub id: i64,
    pub name: String,
    pub description: String,
    pub creator_id: i64,
    pub invite_token: String,
    pub invite_link_expiry: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

const COLUMNS: &str =
    "g.id, g.name, g.description, g.creator_id, g.invite_token, g.invite_link_expiry, g.created_at";

impl Group {
    /// Links without an expiry never lapse.
    pub fn is_invite_active(&self, now: DateTime<Utc>) -> bool {
        match self.invite_link_expiry {
            Some(expiry) => expiry > now,
            None => true,
        }
    }

    /// Creates the group and enrols the creator as its first member.
    pub async fn create(
        db: &DbPool,
        creator_id: i64,
        name: &str,
        description: &str,
        invite_link_expiry: Option<DateTime<Utc>>,
    ) -> sqlx::Result<Group> {
        let mut tx = db.begin().await?;
        let now = Utc::now();
        let result = sqlx::query(
            r#"INSERT INTO travel_groups (name, description, creator_id, invite_token, invite_link_expiry, created_at)
               VALUES (?1, ?2, ?3, ?4, ?5, ?6)"#,
        )
        .bind(name)
        .bind(description)
        .bind(creator_id)
        .bind(Uuid::new_v4().to_string())
        .bind(invite_link_expiry)
        .bind(now)
        .execute(&mut *tx)
        .await?;
        let id = result.last_insert_rowid();
        sqlx::query("INSERT INTO group_members (group_id, user_id, joined_at) VALUES (?1, ?2, ?3)")
            .bind(id)
            .bind(creator_id)
            .bind(now)
            .execute(&mut *tx)
            .await?;
        tx.commit().await?;
        Group::find(db, id).await?.ok_or(sqlx::Error::RowNotFound)
    }

    pub async fn find(db: &DbPool, id: i64) -> sqlx::Result<Option<Group>> {
        sqlx::query_as::<_, Group>(&format!("SELECT {COLUMNS} FROM travel_groups g WHERE g.id = ?1"))
            .bind(id)
            .fetch_optional(db)
            .await
    }

    pub async fn find_by_token(db: &DbPool, token: &str) -> sqlx::Result<Option<Group>> {
        sqlx::query_as::<_, Group>(&format!(
            "SELECT {COLUMNS} FROM travel_groups g WHERE g.invite_token = ?1"
        ))
        .bind(token)
        .fetch_optional(db)
        .await
    }

    pub async fn list_for_user(db: &DbPool, user_id: i64) -> sqlx::Result<Vec<Group>> {
        sqlx::query_as::<_, Group>(&format!(
            r#"SELECT {COLUMNS} FROM travel_groups g JOIN group_members m ON m.group_id = g.id
               WHERE m.user_id = ?1 ORDER BY g.name"#
        ))
        .bind(user_id)
        .fetch_all(db)
        .await
    }

    pub async fn list_created_by(db: &DbPool, user_id: i64) -> sqlx::Result<Vec<Group>> {
        sqlx::query_as::<_, Group>(&format!(
            "SELECT {COLUMNS} FROM travel_groups g WHERE g.creator_id = ?1 ORDER BY g.name"
        ))
        .bind(user_id)
        .fetch_all(db)
        .await
    }

    pub async fn members(db: &DbPool, group_id: i64) -> sqlx::Result<Vec<User>> {
        sqlx::query_as::<_, User>(
            r#"SELECT u.id, u.uuid, u.username, u.email, u.password_hash, u.role, u.first_name, u.last_name, u.created_at, u.last_login_at
               FROM users u JOIN group_members m ON m.user_id = u.id
               WHERE m.group_id = ?1 ORDER BY u.username"#,
        )
        .bind(group_id)
        .fetch_all(db)
        .await
    }

    pub async fn is_member(db: &DbPool, group_id: i64, user_id: i64) -> sqlx::Result<bool> {
        let count: i64 = sqlx::query_scalar(
            "SELECT COUNT(*) FROM group_members WHERE group_id = ?1 AND user_id = ?2",
        )
        .bind(group_id)
        .bind(user_id)
        .fetch_one(db)
        .await?;
        Ok(count > 0)
    }

    /// Returns false when the user already belonged to the group.
    pub async fn add_member(db: &DbPool, group_id: i64, user_id: i64) -> sqlx::Result<bool> {
        let result = sqlx::query(
            "INSERT OR IGNORE INTO group_members (group_id, user_id, joined_at) VALUES (?1, ?2, ?3)",
        )
        .bind(group_id)
        .bind(user_id)
        .bind(Utc::now())
        .execute(db)
        .await?;
        Ok(result.rows_affected() > 0)
    }

    pub async fn remove_member(db: &DbPool, group_id: i64, user_id: i64) -> sqlx::Result<bool> {
        let result = sqlx::query("DELETE FROM group_members WHERE group_id = ?1 AND user_id = ?2")
            .bind(group_id)
            .bind(user_id)
            .execute(db)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    /// Issues a fresh token, invalidating the old link.
    pub async fn regenerate_invite(
        db: &DbPool,
        group_id: i64,
        invite_link_expiry: Option<DateTime<Utc>>,
    ) -> sqlx::Result<String> {
        let token = Uuid::new_v4().to_string();
        sqlx::query("UPDATE travel_groups SET invite_token = ?1, invite_link_expiry = ?2 WHERE id = ?3")
            .bind(&token)
            .bind(invite_link_expiry)
            .bind(group_id)
            .execute(db)
            .await?;
        Ok(token)
    }

    pub async fn delete(db: &DbPool, group_id: i64) -> sqlx::Result<()> {
        sqlx::query("DELETE FROM travel_groups WHERE id = ?1")
            .bind(group_id)
            .execute(db)
            .await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use chrono::Duration;

    use super::*;

    fn group(expiry: Option<DateTime<Utc>>) -> Group {
        Group {
            id: 1,
            name: "Test Group".into(),
            description: String::new(),
            creator_id: 1,
            invite_token: Uuid::new_v4().to_string(),
            invite_link_expiry: expiry,
            created_at: Utc::now(),
        }
    }

    #[test]
    fn invite_without_expiry_is_active() {
        assert!(group(None).is_invite_active(Utc::now()));
    }

    #[test]
    fn invite_with_future_expiry_is_active() {
        let now = Utc::now();
        assert!(group(Some(now + Duration::hours(1))).is_invite_active(now));
    }

    #[test]
    fn invite_with_past_expiry_is_inactive() {
        let now = Utc::now();
        assert!(!group(Some(now - Duration::hours(1))).is_invite_active(now));
    }
}
