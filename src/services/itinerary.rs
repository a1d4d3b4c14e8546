//! Buckets a trip's bookings into calendar days.
//!
//! Within a day timed events run in time order and untimed lodging events
//! follow them, check-out before check-in. Ties keep synthesis order:
//! transportation, lodging, then activities, each in input order.

use chrono::{NaiveDate, NaiveTime};

use crate::models::{activity::Activity, lodging::Lodging, transportation::Transportation};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventKind {
    Departure,
    Arrival,
    CheckIn,
    CheckOut,
    Activity,
}

impl EventKind {
    pub fn label(self) -> &'static str {
        match self {
            EventKind::Departure => "Departure",
            EventKind::Arrival => "Arrival",
            EventKind::CheckIn => "Check-in",
            EventKind::CheckOut => "Check-out",
            EventKind::Activity => "Activity",
        }
    }

    pub fn css_class(self) -> &'static str {
        match self {
            EventKind::Departure | EventKind::Arrival => "event-transport",
            EventKind::CheckIn | EventKind::CheckOut => "event-lodging",
            EventKind::Activity => "event-activity",
        }
    }

    fn untimed_rank(self) -> u8 {
        match self {
            EventKind::CheckOut => 0,
            EventKind::CheckIn => 1,
            _ => 2,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ItineraryEvent {
    pub kind: EventKind,
    pub date: NaiveDate,
    pub time: Option<NaiveTime>,
    pub title: String,
    pub detail: String,
}

impl ItineraryEvent {
    pub fn time_label(&self) -> String {
        self.time
            .map(|time| time.format("%H:%M").to_string())
            .unwrap_or_default()
    }

    pub fn date_label(&self) -> String {
        self.date.format("%B %d, %Y").to_string()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ItineraryDay {
    pub number: i64,
    pub date: NaiveDate,
    pub events: Vec<ItineraryEvent>,
}

impl ItineraryDay {
    pub fn heading(&self) -> String {
        format!("Day {}: {}", self.number, self.date.format("%A, %B %d"))
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Itinerary {
    pub days: Vec<ItineraryDay>,
    pub outside_range: Vec<ItineraryEvent>,
}

impl Itinerary {
    pub fn event_count(&self) -> usize {
        self.days.iter().map(|day| day.events.len()).sum::<usize>() + self.outside_range.len()
    }
}

fn synthesize(
    transportation: &[Transportation],
    lodgings: &[Lodging],
    activities: &[Activity],
) -> Vec<ItineraryEvent> {
    let mut events = Vec::with_capacity(transportation.len() * 2 + lodgings.len() * 2 + activities.len());
    for leg in transportation {
        let kind = leg.kind().label();
        let provider = if leg.provider.is_empty() {
            String::new()
        } else {
            format!(" ({})", leg.provider)
        };
        events.push(ItineraryEvent {
            kind: EventKind::Departure,
            date: leg.departure_time.date(),
            time: Some(leg.departure_time.time()),
            title: format!("{kind} departs {}{provider}", leg.departure_location),
            detail: format!("To {}", leg.arrival_location),
        });
        events.push(ItineraryEvent {
            kind: EventKind::Arrival,
            date: leg.arrival_time.date(),
            time: Some(leg.arrival_time.time()),
            title: format!("{kind} arrives at {}{provider}", leg.arrival_location),
            detail: format!("From {}", leg.departure_location),
        });
    }
    for stay in lodgings {
        events.push(ItineraryEvent {
            kind: EventKind::CheckIn,
            date: stay.check_in,
            time: None,
            title: format!("Check in: {}", stay.name),
            detail: stay.kind().label().to_string(),
        });
        events.push(ItineraryEvent {
            kind: EventKind::CheckOut,
            date: stay.check_out,
            time: None,
            title: format!("Check out: {}", stay.name),
            detail: stay.kind().label().to_string(),
        });
    }
    for activity in activities {
        events.push(ItineraryEvent {
            kind: EventKind::Activity,
            date: activity.date,
            time: Some(activity.start_time),
            title: activity.name.clone(),
            detail: activity
                .suggested_by_name
                .as_ref()
                .map(|name| format!("Suggested by {name}"))
                .unwrap_or_default(),
        });
    }
    events
}

pub fn build_itinerary(
    start: NaiveDate,
    end: NaiveDate,
    transportation: &[Transportation],
    lodgings: &[Lodging],
    activities: &[Activity],
) -> Itinerary {
    let mut events = synthesize(transportation, lodgings, activities);
    // sort_by_key is stable, so equal keys keep synthesis order.
    events.sort_by_key(|event| {
        (
            event.time.is_none(),
            event.time,
            event.kind.untimed_rank(),
        )
    });

    let mut itinerary = Itinerary {
        days: start
            .iter_days()
            .take_while(|date| *date <= end)
            .enumerate()
            .map(|(index, date)| ItineraryDay {
                number: index as i64 + 1,
                date,
                events: Vec::new(),
            })
            .collect(),
        outside_range: Vec::new(),
    };

    for event in events {
        if event.date < start || event.date > end {
            itinerary.outside_range.push(event);
            continue;
        }
        let offset = (event.date - start).num_days() as usize;
        itinerary.days[offset].events.push(event);
    }
    itinerary
}

#[cfg(test)]
mod tests {
    use chrono::NaiveDateTime;

    use super::*;

    fn date(raw: &str) -> NaiveDate {
        NaiveDate::parse_from_str(raw, "%Y-%m-%d").unwrap()
    }

    fn at(raw: &str) -> NaiveDateTime {
        NaiveDateTime::parse_from_str(raw, "%Y-%m-%d %H:%M").unwrap()
    }

    fn flight(departure: &str, arrival: &str) -> Transportation {
        Transportation {
            id: 1,
            trip_id: 1,
            transportation_type: "flight".into(),
            provider: "Air France".into(),
            confirmation: "AF123".into(),
            departure_location: "JFK".into(),
            arrival_location: "CDG".into(),
            departure_time: at(departure),
            arrival_time: at(arrival),
            actual_cost_cents: Some(45_000),
        }
    }

    fn hotel(check_in: &str, check_out: &str) -> Lodging {
        Lodging {
            id: 1,
            trip_id: 1,
            lodging_type: "hotel".into(),
            name: "Hotel de Paris".into(),
            confirmation: "H1".into(),
            check_in: date(check_in),
            check_out: date(check_out),
            actual_cost_cents: None,
        }
    }

    fn activity(name: &str, day: &str, time: &str) -> Activity {
        Activity {
            id: 1,
            trip_id: 1,
            name: name.into(),
            date: date(day),
            start_time: NaiveTime::parse_from_str(time, "%H:%M").unwrap(),
            actual_cost_cents: None,
            suggested_by: None,
            suggested_by_name: None,
            votes: 0,
        }
    }

    #[test]
    fn one_bucket_per_day_inclusive() {
        let itinerary = build_itinerary(date("2026-06-01"), date("2026-06-07"), &[], &[], &[]);
        assert_eq!(itinerary.days.len(), 7);
        assert_eq!(itinerary.days[0].number, 1);
        assert_eq!(itinerary.days[6].date, date("2026-06-07"));
    }

    #[test]
    fn inverted_range_has_no_days() {
        let itinerary = build_itinerary(
            date("2026-06-07"),
            date("2026-06-01"),
            &[],
            &[],
            &[activity("Louvre", "2026-06-02", "10:00")],
        );
        assert!(itinerary.days.is_empty());
        assert_eq!(itinerary.outside_range.len(), 1);
    }

    #[test]
    fn overnight_flight_lands_on_next_day() {
        let itinerary = build_itinerary(
            date("2026-06-01"),
            date("2026-06-03"),
            &[flight("2026-06-01 18:00", "2026-06-02 08:00")],
            &[],
            &[],
        );
        assert_eq!(itinerary.days[0].events[0].kind, EventKind::Departure);
        assert_eq!(itinerary.days[1].events[0].kind, EventKind::Arrival);
        assert_eq!(itinerary.days[1].events[0].time_label(), "08:00");
    }

    #[test]
    fn timed_events_sort_before_untimed() {
        let itinerary = build_itinerary(
            date("2026-06-01"),
            date("2026-06-05"),
            &[flight("2026-06-03 16:00", "2026-06-03 19:00")],
            &[hotel("2026-06-01", "2026-06-03"), hotel("2026-06-03", "2026-06-05")],
            &[activity("Louvre", "2026-06-03", "09:30")],
        );
        let kinds: Vec<EventKind> = itinerary.days[2].events.iter().map(|e| e.kind).collect();
        assert_eq!(
            kinds,
            vec![
                EventKind::Activity,
                EventKind::Departure,
                EventKind::Arrival,
                EventKind::CheckOut,
                EventKind::CheckIn,
            ]
        );
    }

    #[test]
    fn equal_times_keep_synthesis_order() {
        let itinerary = build_itinerary(
            date("2026-06-01"),
            date("2026-06-01"),
            &[flight("2026-06-01 10:00", "2026-06-01 12:00")],
            &[],
            &[
                activity("First", "2026-06-01", "10:00"),
                activity("Second", "2026-06-01", "10:00"),
            ],
        );
        let titles: Vec<&str> = itinerary.days[0]
            .events
            .iter()
            .map(|e| e.title.as_str())
            .collect();
        assert_eq!(titles[0], "Flight departs JFK (Air France)");
        assert_eq!(titles[1], "First");
        assert_eq!(titles[2], "Second");
    }

    #[test]
    fn events_outside_the_trip_are_flagged() {
        let itinerary = build_itinerary(
            date("2026-06-01"),
            date("2026-06-02"),
            &[],
            &[hotel("2026-05-31", "2026-06-02")],
            &[activity("Late", "2026-06-09", "20:00")],
        );
        assert_eq!(itinerary.outside_range.len(), 2);
        assert_eq!(itinerary.days[1].events.len(), 1);
        assert_eq!(itinerary.event_count(), 3);
    }
}
