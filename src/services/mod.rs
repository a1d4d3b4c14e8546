pub mod costs;
pub mod email;
pub mod itinerary;
pub mod mailer;
pub mod metrics;
pub mod notifications;
pub mod queue;
pub mod sharing;
