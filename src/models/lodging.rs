use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use sqlx::FromRow;

use crate::{db::DbPool, models::money::Money};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum LodgingType {
    #[default]
    Hotel,
    Rental,
    Hostel,
    Other,
}

impl LodgingType {
    pub const ALL: [LodgingType; 4] = [
        LodgingType::Hotel,
        LodgingType::Rental,
        LodgingType::Hostel,
        LodgingType::Other,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            LodgingType::Hotel => "hotel",
            LodgingType::Rental => "rental",
            LodgingType::Hostel => "hostel",
            LodgingType::Other => "other",
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            LodgingType::Hotel => "Hotel",
            LodgingType::Rental => "Vacation rental",
            LodgingType::Hostel => "Hostel",
            LodgingType::Other => "Other",
        }
    }

    pub fn parse(raw: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|kind| kind.as_str() == raw.trim())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct Lodging {
    pub id: i64,
    pub trip_id: i64,
    pub lodging_type: String,
    pub name: String,
    pub confirmation: String,
    pub check_in: NaiveDate,
    pub check_out: NaiveDate,
    pub actual_cost_cents: Option<i64>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct LodgingDraft {
    pub lodging_type: LodgingType,
    pub name: String,
    pub confirmation: String,
    pub check_in: NaiveDate,
    pub check_out: NaiveDate,
    pub actual_cost: Option<Money>,
}

const COLUMNS: &str =
    "id, trip_id, lodging_type, name, confirmation, check_in, check_out, actual_cost_cents";

impl Lodging {
    pub fn kind(&self) -> LodgingType {
        LodgingType::parse(&self.lodging_type).unwrap_or_default()
    }

    pub fn actual_cost(&self) -> Option<Money> {
        self.actual_cost_cents.map(Money::from_cents)
    }

    pub fn nights(&self) -> i64 {
        (self.check_out - self.check_in).num_days()
    }

    pub async fn create(db: &DbPool, trip_id: i64, draft: &LodgingDraft) -> sqlx::Result<i64> {
        let result = sqlx::query(
            r#"INSERT INTO lodgings (trip_id, lodging_type, name, confirmation, check_in, check_out, actual_cost_cents)
               VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)"#,
        )
        .bind(trip_id)
        .bind(draft.lodging_type.as_str())
        .bind(&draft.name)
        .bind(&draft.confirmation)
        .bind(draft.check_in)
        .bind(draft.check_out)
        .bind(draft.actual_cost.map(Money::cents))
        .execute(db)
        .await?;
        Ok(result.last_insert_rowid())
    }

    pub async fn update(db: &DbPool, id: i64, draft: &LodgingDraft) -> sqlx::Result<()> {
        sqlx::query(
            r#"UPDATE lodgings SET lodging_type = ?1, name = ?2, confirmation = ?3, check_in = ?4,
               check_out = ?5, actual_cost_cents = ?6 WHERE id = ?7"#,
        )
        .bind(draft.lodging_type.as_str())
        .bind(&draft.name)
        .bind(&draft.confirmation)
        .bind(draft.check_in)
        .bind(draft.check_out)
        .bind(draft.actual_cost.map(Money::cents))
        .bind(id)
        .execute(db)
        .await?;
        Ok(())
    }

    pub async fn delete(db: &DbPool, id: i64) -> sqlx::Result<()> {
        sqlx::query("DELETE FROM lodgings WHERE id = ?1")
            .bind(id)
            .execute(db)
            .await?;
        Ok(())
    }

    pub async fn find(db: &DbPool, id: i64) -> sqlx::Result<Option<Lodging>> {
        sqlx::query_as::<_, Lodging>(&format!("SELECT {COLUMNS} FROM lodgings WHERE id = ?1"))
            .bind(id)
            .fetch_optional(db)
            .await
    }

    pub async fn list_for_trip(db: &DbPool, trip_id: i64) -> sqlx::Result<Vec<Lodging>> {
        sqlx::query_as::<_, Lodging>(&format!(
            "SELECT {COLUMNS} FROM lodgings WHERE trip_id = ?1 ORDER BY check_in, id"
        ))
        .bind(trip_id)
        .fetch_all(db)
        .await
    }
}
