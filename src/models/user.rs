use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use std::fmt;
use uuid::Uuid;

use crate::db::DbPool;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
pub enum UserRole {
    #[default]
    #[serde(rename = "user")]
    User,
    #[serde(rename = "admin")]
    Admin,
}

impl UserRole {
    pub fn as_str(&self) -> &'static str {
        match self {
            UserRole::User => "user",
            UserRole::Admin => "admin",
        }
    }

    pub fn parse(raw: &str) -> Option<Self> {
        match raw {
            "user" => Some(UserRole::User),
            "admin" => Some(UserRole::Admin),
            _ => None,
        }
    }
}

impl fmt::Display for UserRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct User {
    pub id: i64,
    pub uuid: String,
    pub username: String,
    pub email: String,
    #[serde(skip_serializing)]
    pub password_hash: String,
    pub role: String,
    pub first_name: String,
    pub last_name: String,
    pub created_at: DateTime<Utc>,
    pub last_login_at: Option<DateTime<Utc>>,
}

const USER_COLUMNS: &str =
    "id, uuid, username, email, password_hash, role, first_name, last_name, created_at, last_login_at";

impl User {
    pub fn role(&self) -> UserRole {
        UserRole::parse(&self.role).unwrap_or_default()
    }

    /// Full name when known, otherwise the username.
    pub fn display_name(&self) -> String {
        let full = format!("{} {}", self.first_name.trim(), self.last_name.trim());
        let full = full.trim();
        if full.is_empty() {
            self.username.clone()
        } else {
            full.to_string()
        }
    }

    pub async fn find_by_id(db: &DbPool, id: i64) -> sqlx::Result<Option<User>> {
        sqlx::query_as::<_, User>(&format!("SELECT {USER_COLUMNS} FROM users WHERE id = ?1"))
            .bind(id)
            .fetch_optional(db)
            .await
    }

    pub async fn find_by_email(db: &DbPool, email: &str) -> sqlx::Result<Option<User>> {
        sqlx::query_as::<_, User>(&format!(
            "SELECT {USER_COLUMNS} FROM users WHERE email = ?1"
        ))
        .bind(normalize_email(email))
        .fetch_optional(db)
        .await
    }

    /// Looks a user up by username or email address.
    pub async fn find_by_login(db: &DbPool, identifier: &str) -> sqlx::Result<Option<User>> {
        let identifier = identifier.trim();
        sqlx::query_as::<_, User>(&format!(
            "SELECT {USER_COLUMNS} FROM users WHERE username = ?1 OR email = ?2"
        ))
        .bind(identifier)
        .bind(normalize_email(identifier))
        .fetch_optional(db)
        .await
    }

    pub async fn create(
        db: &DbPool,
        username: &str,
        email: &str,
        password_hash: &str,
    ) -> sqlx::Result<User> {
        let now = Utc::now();
        let result = sqlx::query(
            "INSERT INTO users (uuid, username, email, password_hash, role, created_at) VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
        )
        .bind(Uuid::new_v4().to_string())
        .bind(username.trim())
        .bind(normalize_email(email))
        .bind(password_hash)
        .bind(UserRole::User.as_str())
        .bind(now)
        .execute(db)
        .await?;
        let id = result.last_insert_rowid();
        User::find_by_id(db, id)
            .await?
            .ok_or(sqlx::Error::RowNotFound)
    }

    pub async fn username_taken(db: &DbPool, username: &str) -> sqlx::Result<bool> {
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM users WHERE username = ?1")
            .bind(username.trim())
            .fetch_one(db)
            .await?;
        Ok(count > 0)
    }

    pub async fn email_taken(db: &DbPool, email: &str) -> sqlx::Result<bool> {
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM users WHERE email = ?1")
            .bind(normalize_email(email))
            .fetch_one(db)
            .await?;
        Ok(count > 0)
    }

    /// Derives a free username from the local part of an address, adding a
    /// numeric suffix until it is unique.
    pub async fn available_username_for(db: &DbPool, email: &str) -> sqlx::Result<String> {
        let base: String = email
            .split('@')
            .next()
            .unwrap_or("traveler")
            .chars()
            .filter(|c| c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '-' | '+'))
            .collect();
        let base = if base.is_empty() { "traveler".to_string() } else { base };
        let mut candidate = base.clone();
        let mut suffix = 1;
        while User::username_taken(db, &candidate).await? {
            suffix += 1;
            candidate = format!("{base}{suffix}");
        }
        Ok(candidate)
    }

    pub async fn update_password(db: &DbPool, id: i64, password_hash: &str) -> sqlx::Result<()> {
        sqlx::query("UPDATE users SET password_hash = ?1 WHERE id = ?2")
            .bind(password_hash)
            .bind(id)
            .execute(db)
            .await?;
        Ok(())
    }

    pub async fn touch_last_login(db: &DbPool, id: i64) -> sqlx::Result<()> {
        sqlx::query("UPDATE users SET last_login_at = ?1 WHERE id = ?2")
            .bind(Utc::now())
            .bind(id)
            .execute(db)
            .await?;
        Ok(())
    }

    pub async fn set_role(db: &DbPool, id: i64, role: &UserRole) -> sqlx::Result<bool> {
        let result = sqlx::query("UPDATE users SET role = ?1 WHERE id = ?2")
            .bind(role.as_str())
            .bind(id)
            .execute(db)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    pub async fn list_all(db: &DbPool) -> sqlx::Result<Vec<User>> {
        sqlx::query_as::<_, User>(&format!(
            "SELECT {USER_COLUMNS} FROM users ORDER BY created_at DESC"
        ))
        .fetch_all(db)
        .await
    }

    pub async fn count(db: &DbPool) -> sqlx::Result<i64> {
        sqlx::query_scalar("SELECT COUNT(*) FROM users")
            .fetch_one(db)
            .await
    }
}

pub fn normalize_email(email: &str) -> String {
    email.trim().to_lowercase()
}
