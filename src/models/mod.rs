pub mod activity;
pub mod email;
pub mod group;
pub mod lodging;
pub mod money;
pub mod password_reset;
pub mod session;
pub mod transportation;
pub mod trip;
pub mod user;
