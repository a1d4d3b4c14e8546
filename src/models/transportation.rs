use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};
use sqlx::FromRow;

use crate::{db::DbPool, models::money::Money};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum TransportationType {
    #[default]
    Flight,
    Train,
    Bus,
    Car,
    Ferry,
    Other,
}

impl TransportationType {
    pub const ALL: [TransportationType; 6] = [
        TransportationType::Flight,
        TransportationType::Train,
        TransportationType::Bus,
        TransportationType::Car,
        TransportationType::Ferry,
        TransportationType::Other,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            TransportationType::Flight => "flight",
            TransportationType::Train => "train",
            TransportationType::Bus => "bus",
            TransportationType::Car => "car",
            TransportationType::Ferry => "ferry",
            TransportationType::Other => "other",
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            TransportationType::Flight => "Flight",
            TransportationType::Train => "Train",
            TransportationType::Bus => "Bus",
            TransportationType::Car => "Car",
            TransportationType::Ferry => "Ferry",
            TransportationType::Other => "Other",
        }
    }

    pub fn parse(raw: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|kind| kind.as_str() == raw.trim())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct Transportation {
    pub id: i64,
    pub trip_id: i64,
    pub transportation_type: String,
    pub provider: String,
    pub confirmation: String,
    pub departure_location: String,
    pub arrival_location: String,
    pub departure_time: NaiveDateTime,
    pub arrival_time: NaiveDateTime,
    pub actual_cost_cents: Option<i64>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct TransportationDraft {
    pub transportation_type: TransportationType,
    pub provider: String,
    pub confirmation: String,
    pub departure_location: String,
    pub arrival_location: String,
    pub departure_time: NaiveDateTime,
    pub arrival_time: NaiveDateTime,
    pub actual_cost: Option<Money>,
}

const COLUMNS: &str = "id, trip_id, transportation_type, provider, confirmation, departure_location, arrival_location, departure_time, arrival_time, actual_cost_cents";

impl Transportation {
    pub fn kind(&self) -> TransportationType {
        TransportationType::parse(&self.transportation_type).unwrap_or_default()
    }

    pub fn actual_cost(&self) -> Option<Money> {
        self.actual_cost_cents.map(Money::from_cents)
    }

    pub async fn create(
        db: &DbPool,
        trip_id: i64,
        draft: &TransportationDraft,
    ) -> sqlx::Result<i64> {
        let result = sqlx::query(
            r#"INSERT INTO transportation (trip_id, transportation_type, provider, confirmation, departure_location, arrival_location, departure_time, arrival_time, actual_cost_cents)
               VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)"#,
        )
        .bind(trip_id)
        .bind(draft.transportation_type.as_str())
        .bind(&draft.provider)
        .bind(&draft.confirmation)
        .bind(&draft.departure_location)
        .bind(&draft.arrival_location)
        .bind(draft.departure_time)
        .bind(draft.arrival_time)
        .bind(draft.actual_cost.map(Money::cents))
        .execute(db)
        .await?;
        Ok(result.last_insert_rowid())
    }

    pub async fn update(db: &DbPool, id: i64, draft: &TransportationDraft) -> sqlx::Result<()> {
        sqlx::query(
            r#"UPDATE transportation SET transportation_type = ?1, provider = ?2, confirmation = ?3,
               departure_location = ?4, arrival_location = ?5, departure_time = ?6, arrival_time = ?7,
               actual_cost_cents = ?8 WHERE id = ?9"#,
        )
        .bind(draft.transportation_type.as_str())
        .bind(&draft.provider)
        .bind(&draft.confirmation)
        .bind(&draft.departure_location)
        .bind(&draft.arrival_location)
        .bind(draft.departure_time)
        .bind(draft.arrival_time)
        .bind(draft.actual_cost.map(Money::cents))
        .bind(id)
        .execute(db)
        .await?;
        Ok(())
    }

    pub async fn delete(db: &DbPool, id: i64) -> sqlx::Result<()> {
        sqlx::query("DELETE FROM transportation WHERE id = ?1")
            .bind(id)
            .execute(db)
            .await?;
        Ok(())
    }

    pub async fn find(db: &DbPool, id: i64) -> sqlx::Result<Option<Transportation>> {
        sqlx::query_as::<_, Transportation>(&format!(
            "SELECT {COLUMNS} FROM transportation WHERE id = ?1"
        ))
        .bind(id)
        .fetch_optional(db)
        .await
    }

    pub async fn list_for_trip(db: &DbPool, trip_id: i64) -> sqlx::Result<Vec<Transportation>> {
        sqlx::query_as::<_, Transportation>(&format!(
            "SELECT {COLUMNS} FROM transportation WHERE trip_id = ?1 ORDER BY departure_time, id"
        ))
        .bind(trip_id)
        .fetch_all(db)
        .await
    }
}
