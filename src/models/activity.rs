use chrono::{NaiveDate, NaiveTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;

use crate::{db::DbPool, models::money::Money};

/// An activity row together with its vote tally and suggester name.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct Activity {
    pub id: i64,
    pub trip_id: i64,
    pub name: String,
    pub date: NaiveDate,
    pub start_time: NaiveTime,
    pub actual_cost_cents: Option<i64>,
    pub suggested_by: Option<i64>,
    pub suggested_by_name: Option<String>,
    pub votes: i64,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ActivityDraft {
    pub name: String,
    pub date: NaiveDate,
    pub start_time: NaiveTime,
    pub actual_cost: Option<Money>,
}

const SELECT_ACTIVITY: &str = r#"SELECT a.id, a.trip_id, a.name, a.date, a.start_time, a.actual_cost_cents, a.suggested_by,
    u.username AS suggested_by_name,
    (SELECT COUNT(*) FROM activity_votes v WHERE v.activity_id = a.id) AS votes
    FROM activities a LEFT JOIN users u ON u.id = a.suggested_by"#;

impl Activity {
    pub fn actual_cost(&self) -> Option<Money> {
        self.actual_cost_cents.map(Money::from_cents)
    }

    pub async fn create(
        db: &DbPool,
        trip_id: i64,
        suggested_by: i64,
        draft: &ActivityDraft,
    ) -> sqlx::Result<i64> {
        let result = sqlx::query(
            r#"INSERT INTO activities (trip_id, name, date, start_time, actual_cost_cents, suggested_by)
               VALUES (?1, ?2, ?3, ?4, ?5, ?6)"#,
        )
        .bind(trip_id)
        .bind(&draft.name)
        .bind(draft.date)
        .bind(draft.start_time)
        .bind(draft.actual_cost.map(Money::cents))
        .bind(suggested_by)
        .execute(db)
        .await?;
        Ok(result.last_insert_rowid())
    }

    pub async fn update(db: &DbPool, id: i64, draft: &ActivityDraft) -> sqlx::Result<()> {
        sqlx::query(
            "UPDATE activities SET name = ?1, date = ?2, start_time = ?3, actual_cost_cents = ?4 WHERE id = ?5",
        )
        .bind(&draft.name)
        .bind(draft.date)
        .bind(draft.start_time)
        .bind(draft.actual_cost.map(Money::cents))
        .bind(id)
        .execute(db)
        .await?;
        Ok(())
    }

    pub async fn delete(db: &DbPool, id: i64) -> sqlx::Result<()> {
        sqlx::query("DELETE FROM activities WHERE id = ?1")
            .bind(id)
            .execute(db)
            .await?;
        Ok(())
    }

    pub async fn find(db: &DbPool, id: i64) -> sqlx::Result<Option<Activity>> {
        sqlx::query_as::<_, Activity>(&format!("{SELECT_ACTIVITY} WHERE a.id = ?1"))
            .bind(id)
            .fetch_optional(db)
            .await
    }

    pub async fn list_for_trip(db: &DbPool, trip_id: i64) -> sqlx::Result<Vec<Activity>> {
        sqlx::query_as::<_, Activity>(&format!(
            "{SELECT_ACTIVITY} WHERE a.trip_id = ?1 ORDER BY a.date, a.start_time, a.id"
        ))
        .bind(trip_id)
        .fetch_all(db)
        .await
    }

    /// Activities of every trip the user can see.
    pub async fn list_visible(db: &DbPool, user_id: i64) -> sqlx::Result<Vec<Activity>> {
        sqlx::query_as::<_, Activity>(&format!(
            r#"{SELECT_ACTIVITY} WHERE a.trip_id IN (
                SELECT t.id FROM trips t
                LEFT JOIN trip_shares s ON s.trip_id = t.id
                LEFT JOIN group_members gm ON gm.group_id = t.group_id
                WHERE t.owner_id = ?1 OR s.user_id = ?1 OR gm.user_id = ?1)
               ORDER BY a.date, a.start_time, a.id"#
        ))
        .bind(user_id)
        .fetch_all(db)
        .await
    }

    /// Records a vote. Returns false when the user had already voted.
    pub async fn vote(db: &DbPool, activity_id: i64, user_id: i64) -> sqlx::Result<bool> {
        let result = sqlx::query(
            "INSERT OR IGNORE INTO activity_votes (activity_id, user_id, created_at) VALUES (?1, ?2, ?3)",
        )
        .bind(activity_id)
        .bind(user_id)
        .bind(Utc::now())
        .execute(db)
        .await?;
        Ok(result.rows_affected() > 0)
    }

    /// Ids of the activities in a trip the user has voted for.
    pub async fn voted_ids(db: &DbPool, trip_id: i64, user_id: i64) -> sqlx::Result<Vec<i64>> {
        sqlx::query_scalar(
            r#"SELECT v.activity_id FROM activity_votes v
               JOIN activities a ON a.id = v.activity_id
               WHERE a.trip_id = ?1 AND v.user_id = ?2"#,
        )
        .bind(trip_id)
        .bind(user_id)
        .fetch_all(db)
        .await
    }
}
