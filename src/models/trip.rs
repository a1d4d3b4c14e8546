use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;

use crate::{
    db::DbPool,
    models::{money::Money, user::User},
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum TripType {
    #[default]
    Planned,
    Booked,
}

impl TripType {
    pub fn as_str(self) -> &'static str {
        match self {
            TripType::Planned => "planned",
            TripType::Booked => "booked",
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            TripType::Planned => "Planned",
            TripType::Booked => "Booked",
        }
    }

    pub fn parse(raw: &str) -> Option<Self> {
        match raw.trim() {
            "planned" => Some(TripType::Planned),
            "booked" => Some(TripType::Booked),
            _ => None,
        }
    }
}

/// How a user relates to a trip. Owners can do everything collaborators can.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum TripRole {
    Collaborator,
    Owner,
}

impl TripRole {
    pub fn allows(self, required: TripRole) -> bool {
        self >= required
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct Trip {
    pub id: i64,
    pub owner_id: i64,
    pub destination: String,
    pub start_date: NaiveDate,
    pub end_date: NaiveDate,
    pub trip_type: String,
    pub estimated_cost_cents: Option<i64>,
    pub whos_going: String,
    pub notes: String,
    pub group_id: Option<i64>,
    pub created_at: DateTime<Utc>,
}

/// Validated trip fields as produced by the trip form.
#[derive(Debug, Clone, PartialEq)]
pub struct TripDraft {
    pub destination: String,
    pub start_date: NaiveDate,
    pub end_date: NaiveDate,
    pub trip_type: TripType,
    pub estimated_cost: Option<Money>,
    pub whos_going: String,
    pub notes: String,
}

const TRIP_COLUMNS: &str = "t.id, t.owner_id, t.destination, t.start_date, t.end_date, t.trip_type, t.estimated_cost_cents, t.whos_going, t.notes, t.group_id, t.created_at";

impl Trip {
    pub fn trip_type(&self) -> TripType {
        TripType::parse(&self.trip_type).unwrap_or_default()
    }

    pub fn is_planned(&self) -> bool {
        self.trip_type() == TripType::Planned
    }

    pub fn estimated_cost(&self) -> Option<Money> {
        self.estimated_cost_cents.map(Money::from_cents)
    }

    /// Number of calendar days, counting both ends.
    pub fn day_count(&self) -> i64 {
        (self.end_date - self.start_date).num_days() + 1
    }

    pub fn date_range_label(&self) -> String {
        format!(
            "{} to {}",
            self.start_date.format("%B %d, %Y"),
            self.end_date.format("%B %d, %Y")
        )
    }

    pub async fn create(db: &DbPool, owner_id: i64, draft: &TripDraft) -> sqlx::Result<Trip> {
        let result = sqlx::query(
            r#"INSERT INTO trips (owner_id, destination, start_date, end_date, trip_type, estimated_cost_cents, whos_going, notes, created_at)
               VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)"#,
        )
        .bind(owner_id)
        .bind(&draft.destination)
        .bind(draft.start_date)
        .bind(draft.end_date)
        .bind(draft.trip_type.as_str())
        .bind(draft.estimated_cost.map(Money::cents))
        .bind(&draft.whos_going)
        .bind(&draft.notes)
        .bind(Utc::now())
        .execute(db)
        .await?;
        Trip::find(db, result.last_insert_rowid())
            .await?
            .ok_or(sqlx::Error::RowNotFound)
    }

    pub async fn update(db: &DbPool, id: i64, draft: &TripDraft) -> sqlx::Result<()> {
        sqlx::query(
            r#"UPDATE trips SET destination = ?1, start_date = ?2, end_date = ?3, trip_type = ?4,
               estimated_cost_cents = ?5, whos_going = ?6, notes = ?7 WHERE id = ?8"#,
        )
        .bind(&draft.destination)
        .bind(draft.start_date)
        .bind(draft.end_date)
        .bind(draft.trip_type.as_str())
        .bind(draft.estimated_cost.map(Money::cents))
        .bind(&draft.whos_going)
        .bind(&draft.notes)
        .bind(id)
        .execute(db)
        .await?;
        Ok(())
    }

    pub async fn delete(db: &DbPool, id: i64) -> sqlx::Result<()> {
        sqlx::query("DELETE FROM trips WHERE id = ?1")
            .bind(id)
            .execute(db)
            .await?;
        Ok(())
    }

    pub async fn find(db: &DbPool, id: i64) -> sqlx::Result<Option<Trip>> {
        sqlx::query_as::<_, Trip>(&format!("SELECT {TRIP_COLUMNS} FROM trips t WHERE t.id = ?1"))
            .bind(id)
            .fetch_optional(db)
            .await
    }

    /// Trips the user owns, was shared on, or reaches through a group.
    pub async fn list_visible(db: &DbPool, user_id: i64) -> sqlx::Result<Vec<Trip>> {
        sqlx::query_as::<_, Trip>(&format!(
            r#"SELECT DISTINCT {TRIP_COLUMNS} FROM trips t
               LEFT JOIN trip_shares s ON s.trip_id = t.id
               LEFT JOIN group_members gm ON gm.group_id = t.group_id
               WHERE t.owner_id = ?1 OR s.user_id = ?1 OR gm.user_id = ?1
               ORDER BY t.start_date, t.id"#
        ))
        .bind(user_id)
        .fetch_all(db)
        .await
    }

    pub async fn role_for(&self, db: &DbPool, user_id: i64) -> sqlx::Result<Option<TripRole>> {
        if self.owner_id == user_id {
            return Ok(Some(TripRole::Owner));
        }
        let shared: i64 = sqlx::query_scalar(
            "SELECT COUNT(*) FROM trip_shares WHERE trip_id = ?1 AND user_id = ?2",
        )
        .bind(self.id)
        .bind(user_id)
        .fetch_one(db)
        .await?;
        if shared > 0 {
            return Ok(Some(TripRole::Collaborator));
        }
        if let Some(group_id) = self.group_id {
            let member: i64 = sqlx::query_scalar(
                "SELECT COUNT(*) FROM group_members WHERE group_id = ?1 AND user_id = ?2",
            )
            .bind(group_id)
            .bind(user_id)
            .fetch_one(db)
            .await?;
            if member > 0 {
                return Ok(Some(TripRole::Collaborator));
            }
        }
        Ok(None)
    }

    /// Flips a planned trip to booked. Returns false when it already was.
    pub async fn mark_booked(db: &DbPool, id: i64) -> sqlx::Result<bool> {
        let result =
            sqlx::query("UPDATE trips SET trip_type = 'booked' WHERE id = ?1 AND trip_type = 'planned'")
                .bind(id)
                .execute(db)
                .await?;
        Ok(result.rows_affected() > 0)
    }

    /// Returns false when the user was already a collaborator.
    pub async fn add_collaborator(db: &DbPool, trip_id: i64, user_id: i64) -> sqlx::Result<bool> {
        let result =
            sqlx::query("INSERT OR IGNORE INTO trip_shares (trip_id, user_id) VALUES (?1, ?2)")
                .bind(trip_id)
                .bind(user_id)
                .execute(db)
                .await?;
        Ok(result.rows_affected() > 0)
    }

    pub async fn remove_collaborator(db: &DbPool, trip_id: i64, user_id: i64) -> sqlx::Result<bool> {
        let result = sqlx::query("DELETE FROM trip_shares WHERE trip_id = ?1 AND user_id = ?2")
            .bind(trip_id)
            .bind(user_id)
            .execute(db)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    /// Users the trip is shared with directly.
    pub async fn collaborators(db: &DbPool, trip_id: i64) -> sqlx::Result<Vec<User>> {
        sqlx::query_as::<_, User>(
            r#"SELECT u.id, u.uuid, u.username, u.email, u.password_hash, u.role, u.first_name, u.last_name, u.created_at, u.last_login_at
               FROM users u JOIN trip_shares s ON s.user_id = u.id
               WHERE s.trip_id = ?1 ORDER BY u.username"#,
        )
        .bind(trip_id)
        .fetch_all(db)
        .await
    }

    /// Everyone with access: owner, direct collaborators and group members.
    pub async fn participants(&self, db: &DbPool) -> sqlx::Result<Vec<User>> {
        sqlx::query_as::<_, User>(
            r#"SELECT DISTINCT u.id, u.uuid, u.username, u.email, u.password_hash, u.role, u.first_name, u.last_name, u.created_at, u.last_login_at
               FROM users u
               WHERE u.id = ?1
                  OR u.id IN (SELECT user_id FROM trip_shares WHERE trip_id = ?2)
                  OR u.id IN (SELECT user_id FROM group_members WHERE group_id = ?3)
               ORDER BY u.username"#,
        )
        .bind(self.owner_id)
        .bind(self.id)
        .bind(self.group_id)
        .fetch_all(db)
        .await
    }

    pub async fn set_group(db: &DbPool, id: i64, group_id: Option<i64>) -> sqlx::Result<()> {
        sqlx::query("UPDATE trips SET group_id = ?1 WHERE id = ?2")
            .bind(group_id)
            .bind(id)
            .execute(db)
            .await?;
        Ok(())
    }

    pub async fn count(db: &DbPool) -> sqlx::Result<i64> {
        sqlx::query_scalar("SELECT COUNT(*) FROM trips")
            .fetch_one(db)
            .await
    }

    pub async fn count_owned_by(db: &DbPool, user_id: i64) -> sqlx::Result<i64> {
        sqlx::query_scalar("SELECT COUNT(*) FROM trips WHERE owner_id = ?1")
            .bind(user_id)
            .fetch_one(db)
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn owner_outranks_collaborator() {
        assert!(TripRole::Owner.allows(TripRole::Collaborator));
        assert!(TripRole::Owner.allows(TripRole::Owner));
        assert!(!TripRole::Collaborator.allows(TripRole::Owner));
    }

    #[test]
    fn trip_type_round_trips_through_text() {
        assert_eq!(TripType::parse("booked"), Some(TripType::Booked));
        assert_eq!(TripType::parse("vacation"), None);
        assert_eq!(TripType::Planned.label(), "Planned");
    }
}
