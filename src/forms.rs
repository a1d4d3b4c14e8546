//! Submitted form bodies. Every field arrives as text so an invalid
//! submission can be echoed back into the page next to its errors.

use chrono::{DateTime, Duration, NaiveDate, NaiveDateTime, NaiveTime, Utc};
use serde::Deserialize;

use crate::{
    auth::is_valid_email,
    models::{
        activity::{Activity, ActivityDraft},
        lodging::{Lodging, LodgingDraft, LodgingType},
        money::{parse_optional, Money},
        transportation::{Transportation, TransportationDraft, TransportationType},
        trip::{Trip, TripDraft, TripType},
        user::normalize_email,
    },
};

const DATE_FORMAT: &str = "%Y-%m-%d";
/// Longest trip, counted in calendar days including both ends.
pub const MAX_TRIP_DAYS: i64 = 366;
/// Longest invite link lifetime: one year.
pub const MAX_INVITE_HOURS: i64 = 24 * 365;
const DATETIME_FORMATS: [&str; 3] = ["%Y-%m-%dT%H:%M", "%Y-%m-%dT%H:%M:%S", "%Y-%m-%d %H:%M"];
const TIME_FORMATS: [&str; 2] = ["%H:%M", "%H:%M:%S"];

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FormErrors {
    pub messages: Vec<String>,
}

impl FormErrors {
    pub fn push(&mut self, message: impl Into<String>) {
        self.messages.push(message.into());
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }

    pub fn single(message: impl Into<String>) -> Self {
        Self {
            messages: vec![message.into()],
        }
    }

    fn into_result<T>(self, value: Option<T>) -> Result<T, FormErrors> {
        match value {
            Some(value) if self.is_empty() => Ok(value),
            _ => Err(self),
        }
    }
}

fn required(errors: &mut FormErrors, label: &str, raw: &str) -> Option<String> {
    let value = raw.trim();
    if value.is_empty() {
        errors.push(format!("{label} is required."));
        None
    } else {
        Some(value.to_string())
    }
}

fn parse_date(errors: &mut FormErrors, label: &str, raw: &str) -> Option<NaiveDate> {
    let raw = required(errors, label, raw)?;
    match NaiveDate::parse_from_str(&raw, DATE_FORMAT) {
        Ok(date) => Some(date),
        Err(_) => {
            errors.push(format!("{label}: enter a valid date."));
            None
        }
    }
}

fn parse_datetime(errors: &mut FormErrors, label: &str, raw: &str) -> Option<NaiveDateTime> {
    let raw = required(errors, label, raw)?;
    let parsed = DATETIME_FORMATS
        .iter()
        .find_map(|format| NaiveDateTime::parse_from_str(&raw, format).ok());
    if parsed.is_none() {
        errors.push(format!("{label}: enter a valid date and time."));
    }
    parsed
}

fn parse_time(errors: &mut FormErrors, label: &str, raw: &str) -> Option<NaiveTime> {
    let raw = required(errors, label, raw)?;
    let parsed = TIME_FORMATS
        .iter()
        .find_map(|format| NaiveTime::parse_from_str(&raw, format).ok());
    if parsed.is_none() {
        errors.push(format!("{label}: enter a valid time."));
    }
    parsed
}

fn parse_cost(errors: &mut FormErrors, label: &str, raw: &str) -> Option<Option<Money>> {
    match parse_optional(raw) {
        Ok(cost) => Some(cost),
        Err(message) => {
            errors.push(format!("{label}: {message}"));
            None
        }
    }
}

fn cost_input(cents: Option<i64>) -> String {
    cents
        .map(|cents| Money::from_cents(cents).input_value())
        .unwrap_or_default()
}

/// Splits a comma, semicolon or whitespace separated address list.
pub fn parse_email_list(raw: &str) -> Result<Vec<String>, String> {
    let mut emails: Vec<String> = Vec::new();
    for candidate in raw.split(|c: char| c == ',' || c == ';' || c.is_whitespace()) {
        if candidate.trim().is_empty() {
            continue;
        }
        let email = normalize_email(candidate);
        if !is_valid_email(&email) {
            return Err(format!("{} is not a valid email address.", candidate.trim()));
        }
        if !emails.contains(&email) {
            emails.push(email);
        }
    }
    Ok(emails)
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct TripForm {
    pub destination: String,
    pub start_date: String,
    pub end_date: String,
    pub trip_type: String,
    pub estimated_cost: String,
    pub whos_going: String,
    pub notes: String,
    pub share_with_emails: String,
}

impl TripForm {
    pub fn from_trip(trip: &Trip) -> Self {
        Self {
            destination: trip.destination.clone(),
            start_date: trip.start_date.format(DATE_FORMAT).to_string(),
            end_date: trip.end_date.format(DATE_FORMAT).to_string(),
            trip_type: trip.trip_type.clone(),
            estimated_cost: cost_input(trip.estimated_cost_cents),
            whos_going: trip.whos_going.clone(),
            notes: trip.notes.clone(),
            share_with_emails: String::new(),
        }
    }

    pub fn validate(&self) -> Result<(TripDraft, Vec<String>), FormErrors> {
        let mut errors = FormErrors::default();
        let destination = required(&mut errors, "Destination", &self.destination);
        let start_date = parse_date(&mut errors, "Start date", &self.start_date);
        let end_date = parse_date(&mut errors, "End date", &self.end_date);
        if let (Some(start), Some(end)) = (start_date, end_date) {
            if end < start {
                errors.push("End date must be after start date.");
            } else if (end - start).num_days() + 1 > MAX_TRIP_DAYS {
                errors.push(format!("A vacation can last at most {MAX_TRIP_DAYS} days."));
            }
        }
        let trip_type = if self.trip_type.trim().is_empty() {
            Some(TripType::Planned)
        } else {
            let parsed = TripType::parse(&self.trip_type);
            if parsed.is_none() {
                errors.push("Select a valid trip type.");
            }
            parsed
        };
        let estimated_cost = parse_cost(&mut errors, "Estimated cost", &self.estimated_cost);
        let share_with = match parse_email_list(&self.share_with_emails) {
            Ok(emails) => emails,
            Err(message) => {
                errors.push(message);
                Vec::new()
            }
        };

        let draft = match (destination, start_date, end_date, trip_type, estimated_cost) {
            (Some(destination), Some(start_date), Some(end_date), Some(trip_type), Some(estimated_cost)) => {
                Some(TripDraft {
                    destination,
                    start_date,
                    end_date,
                    trip_type,
                    estimated_cost,
                    whos_going: self.whos_going.trim().to_string(),
                    notes: self.notes.trim().to_string(),
                })
            }
            _ => None,
        };
        errors.into_result(draft.map(|draft| (draft, share_with)))
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct TransportationForm {
    pub transportation_type: String,
    pub provider: String,
    pub confirmation: String,
    pub departure_location: String,
    pub arrival_location: String,
    pub departure_time: String,
    pub arrival_time: String,
    pub actual_cost: String,
}

impl TransportationForm {
    pub fn from_record(record: &Transportation) -> Self {
        Self {
            transportation_type: record.transportation_type.clone(),
            provider: record.provider.clone(),
            confirmation: record.confirmation.clone(),
            departure_location: record.departure_location.clone(),
            arrival_location: record.arrival_location.clone(),
            departure_time: record.departure_time.format(DATETIME_FORMATS[0]).to_string(),
            arrival_time: record.arrival_time.format(DATETIME_FORMATS[0]).to_string(),
            actual_cost: cost_input(record.actual_cost_cents),
        }
    }

    pub fn validate(&self) -> Result<TransportationDraft, FormErrors> {
        let mut errors = FormErrors::default();
        let transportation_type = TransportationType::parse(&self.transportation_type);
        if transportation_type.is_none() {
            errors.push("Select a transportation type.");
        }
        let departure_location =
            required(&mut errors, "Departure location", &self.departure_location);
        let arrival_location = required(&mut errors, "Arrival location", &self.arrival_location);
        let departure_time = parse_datetime(&mut errors, "Departure time", &self.departure_time);
        let arrival_time = parse_datetime(&mut errors, "Arrival time", &self.arrival_time);
        if let (Some(departure), Some(arrival)) = (departure_time, arrival_time) {
            if arrival < departure {
                errors.push("Arrival time must be after departure time.");
            }
        }
        let actual_cost = parse_cost(&mut errors, "Actual cost", &self.actual_cost);

        let draft = match (
            transportation_type,
            departure_location,
            arrival_location,
            departure_time,
            arrival_time,
            actual_cost,
        ) {
            (
                Some(transportation_type),
                Some(departure_location),
                Some(arrival_location),
                Some(departure_time),
                Some(arrival_time),
                Some(actual_cost),
            ) => Some(TransportationDraft {
                transportation_type,
                provider: self.provider.trim().to_string(),
                confirmation: self.confirmation.trim().to_string(),
                departure_location,
                arrival_location,
                departure_time,
                arrival_time,
                actual_cost,
            }),
            _ => None,
        };
        errors.into_result(draft)
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct LodgingForm {
    pub lodging_type: String,
    pub name: String,
    pub confirmation: String,
    pub check_in: String,
    pub check_out: String,
    pub actual_cost: String,
}

impl LodgingForm {
    pub fn from_record(record: &Lodging) -> Self {
        Self {
            lodging_type: record.lodging_type.clone(),
            name: record.name.clone(),
            confirmation: record.confirmation.clone(),
            check_in: record.check_in.format(DATE_FORMAT).to_string(),
            check_out: record.check_out.format(DATE_FORMAT).to_string(),
            actual_cost: cost_input(record.actual_cost_cents),
        }
    }

    pub fn validate(&self) -> Result<LodgingDraft, FormErrors> {
        let mut errors = FormErrors::default();
        let lodging_type = LodgingType::parse(&self.lodging_type);
        if lodging_type.is_none() {
            errors.push("Select a lodging type.");
        }
        let name = required(&mut errors, "Name", &self.name);
        let check_in = parse_date(&mut errors, "Check-in", &self.check_in);
        let check_out = parse_date(&mut errors, "Check-out", &self.check_out);
        if let (Some(check_in), Some(check_out)) = (check_in, check_out) {
            if check_out < check_in {
                errors.push("Check-out must be on or after check-in.");
            }
        }
        let actual_cost = parse_cost(&mut errors, "Actual cost", &self.actual_cost);

        let draft = match (lodging_type, name, check_in, check_out, actual_cost) {
            (Some(lodging_type), Some(name), Some(check_in), Some(check_out), Some(actual_cost)) => {
                Some(LodgingDraft {
                    lodging_type,
                    name,
                    confirmation: self.confirmation.trim().to_string(),
                    check_in,
                    check_out,
                    actual_cost,
                })
            }
            _ => None,
        };
        errors.into_result(draft)
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct ActivityForm {
    pub name: String,
    pub date: String,
    pub start_time: String,
    pub actual_cost: String,
}

impl ActivityForm {
    pub fn from_record(record: &Activity) -> Self {
        Self {
            name: record.name.clone(),
            date: record.date.format(DATE_FORMAT).to_string(),
            start_time: record.start_time.format(TIME_FORMATS[0]).to_string(),
            actual_cost: cost_input(record.actual_cost_cents),
        }
    }

    pub fn validate(&self) -> Result<ActivityDraft, FormErrors> {
        let mut errors = FormErrors::default();
        let name = required(&mut errors, "Name", &self.name);
        let date = parse_date(&mut errors, "Date", &self.date);
        let start_time = parse_time(&mut errors, "Start time", &self.start_time);
        let actual_cost = parse_cost(&mut errors, "Actual cost", &self.actual_cost);

        let draft = match (name, date, start_time, actual_cost) {
            (Some(name), Some(date), Some(start_time), Some(actual_cost)) => Some(ActivityDraft {
                name,
                date,
                start_time,
                actual_cost,
            }),
            _ => None,
        };
        errors.into_result(draft)
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct GroupForm {
    pub name: String,
    pub description: String,
    pub invite_expiry_hours: String,
}

/// A validated group form: name, description and optional link lifetime.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GroupDraft {
    pub name: String,
    pub description: String,
    pub invite_expiry_hours: Option<i64>,
}

pub fn parse_expiry_hours(raw: &str) -> Result<Option<i64>, String> {
    let raw = raw.trim();
    if raw.is_empty() {
        return Ok(None);
    }
    match raw.parse::<i64>() {
        Ok(hours) if hours > MAX_INVITE_HOURS => Err(format!(
            "Invite expiry can be at most {MAX_INVITE_HOURS} hours."
        )),
        Ok(hours) if hours > 0 => Ok(Some(hours)),
        _ => Err("Invite expiry must be a positive number of hours.".into()),
    }
}

/// Turns a link lifetime into an absolute expiry; `None` hours never expire.
pub fn invite_expiry_at(
    hours: Option<i64>,
    now: DateTime<Utc>,
) -> Result<Option<DateTime<Utc>>, String> {
    let Some(hours) = hours else {
        return Ok(None);
    };
    Duration::try_hours(hours)
        .and_then(|lifetime| now.checked_add_signed(lifetime))
        .map(Some)
        .ok_or_else(|| "Invite expiry is too far in the future.".to_string())
}

impl GroupForm {
    pub fn validate(&self) -> Result<GroupDraft, FormErrors> {
        let mut errors = FormErrors::default();
        let name = required(&mut errors, "Group name", &self.name);
        let hours = match parse_expiry_hours(&self.invite_expiry_hours) {
            Ok(hours) => Some(hours),
            Err(message) => {
                errors.push(message);
                None
            }
        };
        let draft = match (name, hours) {
            (Some(name), Some(invite_expiry_hours)) => Some(GroupDraft {
                name,
                description: self.description.trim().to_string(),
                invite_expiry_hours,
            }),
            _ => None,
        };
        errors.into_result(draft)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn trip_form(start: &str, end: &str) -> TripForm {
        TripForm {
            destination: "Paris, France".into(),
            start_date: start.into(),
            end_date: end.into(),
            trip_type: "planned".into(),
            estimated_cost: "1500.00".into(),
            ..TripForm::default()
        }
    }

    #[test]
    fn trip_dates_must_be_ordered() {
        let errors = trip_form("2026-06-05", "2026-06-01").validate().unwrap_err();
        assert!(errors.messages.iter().any(|m| m.contains("End date must be after start date")));
    }

    #[test]
    fn single_day_trip_is_valid() {
        let (draft, shares) = trip_form("2026-06-01", "2026-06-01").validate().unwrap();
        assert_eq!(draft.start_date, draft.end_date);
        assert_eq!(draft.estimated_cost, Some(Money::from_cents(150_000)));
        assert!(shares.is_empty());
    }

    #[test]
    fn trip_length_is_capped() {
        assert!(trip_form("2026-01-01", "2027-01-01").validate().is_ok());
        let errors = trip_form("2026-01-01", "2027-01-02").validate().unwrap_err();
        assert!(errors.messages.iter().any(|m| m.contains("at most 366 days")));
        let errors = trip_form("0001-01-01", "9999-12-31").validate().unwrap_err();
        assert_eq!(errors.messages.len(), 1);
    }

    #[test]
    fn trip_collects_every_error() {
        let form = TripForm {
            estimated_cost: "-5".into(),
            ..TripForm::default()
        };
        let errors = form.validate().unwrap_err();
        assert!(errors.messages.len() >= 4);
    }

    #[test]
    fn share_list_is_normalised_and_deduplicated() {
        let emails = parse_email_list("A@Example.com, b@example.com;a@example.com\nc@example.com")
            .unwrap();
        assert_eq!(emails, vec!["a@example.com", "b@example.com", "c@example.com"]);
        assert!(parse_email_list("friend@example.com, nope").is_err());
        assert!(parse_email_list("  ").unwrap().is_empty());
    }

    #[test]
    fn transportation_arrival_after_departure() {
        let form = TransportationForm {
            transportation_type: "flight".into(),
            departure_location: "JFK".into(),
            arrival_location: "CDG".into(),
            departure_time: "2026-06-01T18:00".into(),
            arrival_time: "2026-06-01T08:00".into(),
            ..TransportationForm::default()
        };
        let errors = form.validate().unwrap_err();
        assert!(errors.messages.iter().any(|m| m.contains("Arrival time")));
    }

    #[test]
    fn transportation_accepts_datetime_local() {
        let form = TransportationForm {
            transportation_type: "train".into(),
            departure_location: "Paris".into(),
            arrival_location: "Lyon".into(),
            departure_time: "2026-06-02T09:15".into(),
            arrival_time: "2026-06-02 11:20".into(),
            actual_cost: "$89.50".into(),
            ..TransportationForm::default()
        };
        let draft = form.validate().unwrap();
        assert_eq!(draft.transportation_type, TransportationType::Train);
        assert_eq!(draft.actual_cost, Some(Money::from_cents(8_950)));
    }

    #[test]
    fn lodging_check_out_not_before_check_in() {
        let form = LodgingForm {
            lodging_type: "hotel".into(),
            name: "Hotel de Paris".into(),
            check_in: "2026-06-05".into(),
            check_out: "2026-06-03".into(),
            ..LodgingForm::default()
        };
        assert!(form.validate().is_err());
    }

    #[test]
    fn activity_parses_time() {
        let form = ActivityForm {
            name: "Louvre".into(),
            date: "2026-06-02".into(),
            start_time: "14:30".into(),
            actual_cost: String::new(),
        };
        let draft = form.validate().unwrap();
        assert_eq!(draft.start_time, NaiveTime::from_hms_opt(14, 30, 0).unwrap());
        assert_eq!(draft.actual_cost, None);
    }

    #[test]
    fn group_expiry_must_be_positive() {
        assert_eq!(parse_expiry_hours(""), Ok(None));
        assert_eq!(parse_expiry_hours("48"), Ok(Some(48)));
        assert!(parse_expiry_hours("0").is_err());
        assert!(parse_expiry_hours("soon").is_err());
        assert_eq!(parse_expiry_hours("8760"), Ok(Some(MAX_INVITE_HOURS)));
        assert!(parse_expiry_hours("8761").is_err());
        assert!(parse_expiry_hours("9999999999").is_err());
    }

    #[test]
    fn invite_expiry_is_checked() {
        let now = Utc::now();
        assert_eq!(invite_expiry_at(None, now), Ok(None));
        assert_eq!(
            invite_expiry_at(Some(48), now),
            Ok(Some(now + Duration::hours(48)))
        );
        assert!(invite_expiry_at(Some(9_999_999_999), now).is_err());
        assert!(invite_expiry_at(Some(i64::MAX), now).is_err());
    }
}
