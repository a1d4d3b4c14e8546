#![allow(dead_code)]

use std::{collections::HashMap, fmt, fs::File, net::SocketAddr, sync::Arc};

use anyhow::Context;
use chrono::{Duration, NaiveDate, NaiveDateTime, NaiveTime, Utc};
use cucumber::{given, then, when, World as _};
use planner::{
    auth::{self, AuthenticatedUser},
    config::{AppConfig, EmailBackend, EmailConfig, Environment},
    db::{init_pool, run_migrations},
    forms::parse_email_list,
    models::{
        activity::{Activity, ActivityDraft},
        email::{EmailLog, EmailPreference},
        group::Group,
        lodging::{Lodging, LodgingDraft, LodgingType},
        money::Money,
        transportation::{Transportation, TransportationDraft, TransportationType},
        trip::{Trip, TripDraft, TripRole, TripType},
        user::User,
    },
    services::{
        costs::CostSummary,
        email::{self, SendOutcome, SendReport},
        itinerary::{build_itinerary, Itinerary},
        mailer::MemoryMailer,
        notifications::{parse_notification, process_notification, NotificationKind},
        queue::{drain_queue, DrainReport, MemoryQueue},
        sharing,
    },
    state::AppState,
};
use serde_json::json;
use tempfile::TempDir;

#[derive(Debug, cucumber::World, Default)]
struct AppWorld {
    state: Option<TestState>,
    users: HashMap<String, User>,
    trips: HashMap<String, Trip>,
    groups: HashMap<String, Group>,
    activities: HashMap<String, i64>,
    message_ids: HashMap<String, String>,
    reset_token: Option<String>,
    last_error: Option<String>,
    drain: Option<DrainReport>,
    deleted_handles: Vec<String>,
}

impl AppWorld {
    fn test_state(&self) -> &TestState {
        self.state.as_ref().expect("state must be initialised first")
    }

    fn app_state(&self) -> &AppState {
        &self.test_state().app
    }

    fn mailer(&self) -> &MemoryMailer {
        &self.test_state().mailer
    }

    fn user(&self, username: &str) -> User {
        self.users
            .get(username)
            .cloned()
            .unwrap_or_else(|| panic!("unknown user {username}"))
    }

    fn session_user(&self, username: &str) -> AuthenticatedUser {
        AuthenticatedUser::new(self.user(username), format!("bdd-{username}"))
    }

    fn trip(&self, destination: &str) -> Trip {
        self.trips
            .get(destination)
            .cloned()
            .unwrap_or_else(|| panic!("unknown vacation {destination}"))
    }

    fn group(&self, name: &str) -> Group {
        self.groups
            .get(name)
            .cloned()
            .unwrap_or_else(|| panic!("unknown group {name}"))
    }

    fn remember_message(&mut self, report: &SendReport) {
        if let SendOutcome::Sent { message_id } = &report.outcome {
            self.message_ids
                .insert(report.recipient.clone(), message_id.clone());
        }
    }

    async fn refresh_trip(&mut self, destination: &str) {
        let trip = self.trip(destination);
        let fresh = Trip::find(&self.app_state().db, trip.id)
            .await
            .expect("load vacation")
            .expect("vacation exists");
        self.trips.insert(destination.to_string(), fresh);
    }

    async fn prefs(&self, username: &str) -> EmailPreference {
        EmailPreference::get_or_create(&self.app_state().db, self.user(username).id)
            .await
            .expect("load preferences")
    }

    async fn itinerary(&self, destination: &str) -> Itinerary {
        let trip = self.trip(destination);
        let db = &self.app_state().db;
        build_itinerary(
            trip.start_date,
            trip.end_date,
            &Transportation::list_for_trip(db, trip.id).await.expect("transportation"),
            &Lodging::list_for_trip(db, trip.id).await.expect("lodging"),
            &Activity::list_for_trip(db, trip.id).await.expect("activities"),
        )
    }

    async fn costs(&self, destination: &str) -> CostSummary {
        let trip = self.trip(destination);
        let db = &self.app_state().db;
        CostSummary::compute(
            trip.estimated_cost(),
            &Transportation::list_for_trip(db, trip.id).await.expect("transportation"),
            &Lodging::list_for_trip(db, trip.id).await.expect("lodging"),
            &Activity::list_for_trip(db, trip.id).await.expect("activities"),
        )
    }
}

struct TestState {
    app: AppState,
    mailer: Arc<MemoryMailer>,
    _root: TempDir,
}

impl fmt::Debug for TestState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TestState").finish()
    }
}

impl TestState {
    async fn new() -> anyhow::Result<Self> {
        let root = TempDir::new().context("create temp dir for bdd world")?;
        let db_path = root.path().join("bdd.sqlite");
        File::create(&db_path)?;
        let database_url = format!("sqlite://{}", db_path.to_string_lossy());

        let config = AppConfig {
            environment: Environment::Dev,
            database_url,
            listen_addr: SocketAddr::from(([127, 0, 0, 1], 0)),
            site_url: "https://organisize.test".into(),
            cookie_secret: "bdd-cookie-secret-bdd-cookie-secret-bdd".into(),
            email: EmailConfig {
                backend: EmailBackend::Memory,
                from_address: "noreply@organisize.test".into(),
                aws_region: "us-east-1".into(),
                bounce_queue_url: None,
                complaint_queue_url: None,
                delivery_queue_url: None,
            },
        };

        let db = init_pool(&config.database_url).await?;
        run_migrations(&db).await?;

        let mailer = Arc::new(MemoryMailer::default());
        let app = AppState::new(config, db, mailer.clone());
        Ok(Self {
            app,
            mailer,
            _root: root,
        })
    }
}

fn date(raw: &str) -> NaiveDate {
    NaiveDate::parse_from_str(raw, "%Y-%m-%d").expect("date")
}

fn datetime(raw: &str) -> NaiveDateTime {
    NaiveDateTime::parse_from_str(raw, "%Y-%m-%d %H:%M").expect("datetime")
}

fn money(raw: &str) -> Money {
    Money::parse(raw).expect("amount")
}

// Accounts

#[given("a fresh application state")]
async fn given_fresh_state(world: &mut AppWorld) {
    *world = AppWorld {
        state: Some(TestState::new().await.expect("state")),
        ..AppWorld::default()
    };
}

#[given(
    regex = r#"^a registered user "([^"]+)" with email "([^"]+)" and password "([^"]+)"$"#
)]
async fn given_registered_user(
    world: &mut AppWorld,
    username: String,
    email: String,
    password: String,
) {
    register_user(world, username, email, password).await;
    assert!(world.last_error.is_none(), "{:?}", world.last_error);
}

#[when(
    regex = r#"^I register a user "([^"]+)" with email "([^"]+)" and password "([^"]+)"$"#
)]
async fn when_register_user(
    world: &mut AppWorld,
    username: String,
    email: String,
    password: String,
) {
    register_user(world, username, email, password).await;
}

async fn register_user(world: &mut AppWorld, username: String, email: String, password: String) {
    world.last_error = None;
    match auth::register_user(world.app_state(), &username, &email, &password).await {
        Ok(user) => {
            let report = email::send_registration(world.app_state(), &user)
                .await
                .expect("registration email");
            world.remember_message(&report);
            world.users.insert(username, user);
        }
        Err(err) => world.last_error = Some(err.to_string()),
    }
}

#[then(regex = r#"^registration fails with "([^"]+)"$"#)]
async fn then_registration_fails(world: &mut AppWorld, message: String) {
    let error = world.last_error.as_deref().expect("registration should fail");
    assert!(error.contains(&message), "unexpected error: {error}");
}

#[then(regex = r#"^I can authenticate as "([^"]+)" using password "([^"]+)"$"#)]
async fn then_can_authenticate(world: &mut AppWorld, identifier: String, password: String) {
    let authed = auth::authenticate_user(world.app_state(), &identifier, &password)
        .await
        .expect("authentication");
    assert!(authed.username == identifier || authed.email == identifier);
}

#[then(regex = r#"^authenticating as "([^"]+)" with password "([^"]+)" fails$"#)]
async fn then_cannot_authenticate(world: &mut AppWorld, identifier: String, password: String) {
    let result = auth::authenticate_user(world.app_state(), &identifier, &password).await;
    assert!(result.is_err());
}

#[when(regex = r#"^"([^"]+)" requests a password reset$"#)]
async fn when_request_reset(world: &mut AppWorld, username: String) {
    let user = world.user(&username);
    let token = auth::issue_reset_token(world.app_state(), user.id)
        .await
        .expect("issue token");
    let report = email::send_password_reset(world.app_state(), &user, &token)
        .await
        .expect("reset email");
    world.remember_message(&report);
    world.reset_token = Some(token);
}

#[when(regex = r#"^the reset link is used to set the password "([^"]+)"$"#)]
async fn when_use_reset_link(world: &mut AppWorld, password: String) {
    let token = world.reset_token.clone().expect("reset token");
    world.last_error = auth::complete_reset(world.app_state(), &token, &password, &password)
        .await
        .err()
        .map(|err| err.to_string());
}

#[then("the reset succeeds")]
async fn then_reset_succeeds(world: &mut AppWorld) {
    assert!(world.last_error.is_none(), "{:?}", world.last_error);
}

#[then("the reset link is rejected")]
async fn then_reset_rejected(world: &mut AppWorld) {
    assert!(world.last_error.is_some());
}

// Mail

#[then(regex = r#"^"([^"]+)" received an email with subject "([^"]+)"$"#)]
async fn then_received_subject(world: &mut AppWorld, address: String, subject: String) {
    let sent = world.mailer().sent_to(&address).await;
    assert!(
        sent.iter().any(|email| email.subject == subject),
        "subjects sent to {address}: {:?}",
        sent.iter().map(|email| &email.subject).collect::<Vec<_>>()
    );
}

#[then(regex = r#"^"([^"]+)" received no email with subject "([^"]+)"$"#)]
async fn then_not_received_subject(world: &mut AppWorld, address: String, subject: String) {
    let sent = world.mailer().sent_to(&address).await;
    assert!(sent.iter().all(|email| email.subject != subject));
}

#[then(regex = r#"^the last email to "([^"]+)" contains "([^"]+)"$"#)]
async fn then_last_email_contains(world: &mut AppWorld, address: String, text: String) {
    let sent = world.mailer().sent_to(&address).await;
    let last = sent.last().expect("at least one email");
    assert!(last.html.contains(&text), "missing {text:?} in {}", last.html);
}

#[then(regex = r#"^the last email to "([^"]+)" has an unsubscribe link$"#)]
async fn then_last_email_has_unsubscribe(world: &mut AppWorld, address: String) {
    let sent = world.mailer().sent_to(&address).await;
    let last = sent.last().expect("at least one email");
    assert!(last.html.contains("https://organisize.test/unsubscribe/"));
}

#[then(regex = r#"^the latest email log for "([^"]+)" has status "([^"]+)"$"#)]
async fn then_latest_log_status(world: &mut AppWorld, address: String, status: String) {
    let logs = EmailLog::list_for_recipient(&world.app_state().db, &address)
        .await
        .expect("logs");
    let latest = logs.first().expect("at least one log");
    assert_eq!(latest.status, status);
}

#[then(regex = r#"^(\d+) email logs? exists? for "([^"]+)"$"#)]
async fn then_log_count(world: &mut AppWorld, expected: usize, address: String) {
    let logs = EmailLog::list_for_recipient(&world.app_state().db, &address)
        .await
        .expect("logs");
    assert_eq!(logs.len(), expected);
}

// Vacations

async fn create_trip(
    world: &mut AppWorld,
    username: &str,
    destination: String,
    start: &str,
    end: &str,
    estimate: Option<Money>,
) {
    let owner = world.user(username);
    let draft = TripDraft {
        destination: destination.clone(),
        start_date: date(start),
        end_date: date(end),
        trip_type: TripType::Planned,
        estimated_cost: estimate,
        whos_going: String::new(),
        notes: String::new(),
    };
    let trip = Trip::create(&world.app_state().db, owner.id, &draft)
        .await
        .expect("create vacation");
    world.trips.insert(destination, trip);
}

#[given(regex = r#"^"([^"]+)" owns a vacation to "([^"]+)" from "([^"]+)" to "([^"]+)"$"#)]
async fn given_trip(world: &mut AppWorld, username: String, destination: String, start: String, end: String) {
    create_trip(world, &username, destination, &start, &end, None).await;
}

#[given(
    regex = r#"^"([^"]+)" owns a vacation to "([^"]+)" from "([^"]+)" to "([^"]+)" estimated at "([^"]+)"$"#
)]
async fn given_trip_with_estimate(
    world: &mut AppWorld,
    username: String,
    destination: String,
    start: String,
    end: String,
    estimate: String,
) {
    create_trip(world, &username, destination, &start, &end, Some(money(&estimate))).await;
}

#[given(regex = r#"^"([^"]+)" shared "([^"]+)" with "([^"]+)"$"#)]
async fn given_shared(world: &mut AppWorld, username: String, destination: String, emails: String) {
    share(world, username, destination, emails).await;
}

#[when(regex = r#"^"([^"]+)" shares "([^"]+)" with "([^"]+)"$"#)]
async fn when_share(world: &mut AppWorld, username: String, destination: String, emails: String) {
    share(world, username, destination, emails).await;
}

async fn share(world: &mut AppWorld, username: String, destination: String, emails: String) {
    let inviter = world.session_user(&username);
    let trip = world.trip(&destination);
    let emails = parse_email_list(&emails).expect("valid email list");
    let summary = sharing::share_trip(world.app_state(), &trip, &inviter, &emails)
        .await
        .expect("share vacation");
    for report in &summary.reports {
        world.remember_message(report);
    }
}

#[when(regex = r#"^"([^"]+)" removes "([^"]+)" from "([^"]+)"$"#)]
async fn when_remove_collaborator(world: &mut AppWorld, _owner: String, username: String, destination: String) {
    let trip = world.trip(&destination);
    let user = world.user(&username);
    let removed = Trip::remove_collaborator(&world.app_state().db, trip.id, user.id)
        .await
        .expect("remove collaborator");
    assert!(removed);
}

#[when(regex = r#"^"([^"]+)" converts "([^"]+)" to booked$"#)]
async fn when_convert(world: &mut AppWorld, _owner: String, destination: String) {
    let trip = world.trip(&destination);
    Trip::mark_booked(&world.app_state().db, trip.id)
        .await
        .expect("convert");
    world.refresh_trip(&destination).await;
}

#[then(regex = r#"^"([^"]+)" is booked$"#)]
async fn then_booked(world: &mut AppWorld, destination: String) {
    assert_eq!(world.trip(&destination).trip_type(), TripType::Booked);
}

#[then(regex = r#"^"([^"]+)" can see the vacation "([^"]+)"$"#)]
async fn then_can_see(world: &mut AppWorld, username: String, destination: String) {
    let user = world.user(&username);
    let visible = Trip::list_visible(&world.app_state().db, user.id)
        .await
        .expect("list vacations");
    assert!(visible.iter().any(|trip| trip.destination == destination));
}

#[then(regex = r#"^"([^"]+)" cannot see the vacation "([^"]+)"$"#)]
async fn then_cannot_see(world: &mut AppWorld, username: String, destination: String) {
    let user = world.user(&username);
    let db = &world.app_state().db;
    let visible = Trip::list_visible(db, user.id).await.expect("list vacations");
    assert!(visible.iter().all(|trip| trip.destination != destination));
    let role = world.trip(&destination).role_for(db, user.id).await.expect("role");
    assert_eq!(role, None);
}

#[then(regex = r#"^"([^"]+)" has the (owner|collaborator) role on "([^"]+)"$"#)]
async fn then_role(world: &mut AppWorld, username: String, role: String, destination: String) {
    let user = world.user(&username);
    let actual = world
        .trip(&destination)
        .role_for(&world.app_state().db, user.id)
        .await
        .expect("role");
    let expected = if role == "owner" {
        TripRole::Owner
    } else {
        TripRole::Collaborator
    };
    assert_eq!(actual, Some(expected));
}

#[then(regex = r#"^an account exists for "([^"]+)"$"#)]
async fn then_account_exists(world: &mut AppWorld, address: String) {
    let user = User::find_by_email(&world.app_state().db, &address)
        .await
        .expect("lookup");
    let user = user.expect("account created for invitee");
    world.users.insert(user.username.clone(), user);
}

// Groups

#[given(regex = r#"^"([^"]+)" creates the group "([^"]+)"$"#)]
async fn given_group(world: &mut AppWorld, username: String, name: String) {
    create_group(world, &username, name, None).await;
}

#[given(regex = r#"^"([^"]+)" creates the group "([^"]+)" with an expired invite$"#)]
async fn given_expired_group(world: &mut AppWorld, username: String, name: String) {
    create_group(world, &username, name, Some(Utc::now() - Duration::hours(1))).await;
}

async fn create_group(
    world: &mut AppWorld,
    username: &str,
    name: String,
    expiry: Option<chrono::DateTime<Utc>>,
) {
    let creator = world.user(username);
    let group = Group::create(&world.app_state().db, creator.id, &name, "", expiry)
        .await
        .expect("create group");
    world.groups.insert(name, group);
}

#[when(regex = r#"^"([^"]+)" joins "([^"]+)" with its invite link$"#)]
async fn when_join(world: &mut AppWorld, username: String, name: String) {
    let user = world.user(&username);
    let token = world.group(&name).invite_token;
    let db = &world.app_state().db;
    let group = Group::find_by_token(db, &token)
        .await
        .expect("lookup")
        .expect("group for token");
    let active = group.is_invite_active(Utc::now());
    if active {
        Group::add_member(db, group.id, user.id).await.expect("join");
    }
    world.last_error = (!active).then(|| "invite link expired".to_string());
}

#[then("joining fails because the invite expired")]
async fn then_join_expired(world: &mut AppWorld) {
    assert_eq!(world.last_error.as_deref(), Some("invite link expired"));
}

#[then(regex = r#"^"([^"]+)" (is|is not) a member of "([^"]+)"$"#)]
async fn then_member(world: &mut AppWorld, username: String, verb: String, name: String) {
    let user = world.user(&username);
    let group = world.group(&name);
    let member = Group::is_member(&world.app_state().db, group.id, user.id)
        .await
        .expect("membership");
    assert_eq!(member, verb == "is");
}

#[when(regex = r#"^"([^"]+)" assigns "([^"]+)" to the group "([^"]+)"$"#)]
async fn when_assign_group(world: &mut AppWorld, _owner: String, destination: String, name: String) {
    let trip = world.trip(&destination);
    let group = world.group(&name);
    Trip::set_group(&world.app_state().db, trip.id, Some(group.id))
        .await
        .expect("assign group");
    world.refresh_trip(&destination).await;
}

#[when(regex = r#"^"([^"]+)" leaves "([^"]+)"$"#)]
async fn when_leave(world: &mut AppWorld, username: String, name: String) {
    let user = world.user(&username);
    let group = world.group(&name);
    Group::remove_member(&world.app_state().db, group.id, user.id)
        .await
        .expect("leave group");
}

// Bookings and itinerary

#[given(
    regex = r#"^"([^"]+)" has a flight departing "([^"]+)" and arriving "([^"]+)" costing "([^"]+)"$"#
)]
async fn given_flight(world: &mut AppWorld, destination: String, departure: String, arrival: String, cost: String) {
    let trip = world.trip(&destination);
    let draft = TransportationDraft {
        transportation_type: TransportationType::Flight,
        provider: "Test Airlines".into(),
        confirmation: "ABC123".into(),
        departure_location: "JFK".into(),
        arrival_location: "CDG".into(),
        departure_time: datetime(&departure),
        arrival_time: datetime(&arrival),
        actual_cost: Some(money(&cost)),
    };
    Transportation::create(&world.app_state().db, trip.id, &draft)
        .await
        .expect("add flight");
}

#[given(regex = r#"^"([^"]+)" has a stay at "([^"]+)" from "([^"]+)" to "([^"]+)" costing "([^"]+)"$"#)]
async fn given_stay(world: &mut AppWorld, destination: String, name: String, check_in: String, check_out: String, cost: String) {
    let trip = world.trip(&destination);
    let draft = LodgingDraft {
        lodging_type: LodgingType::Hotel,
        name,
        confirmation: String::new(),
        check_in: date(&check_in),
        check_out: date(&check_out),
        actual_cost: Some(money(&cost)),
    };
    Lodging::create(&world.app_state().db, trip.id, &draft)
        .await
        .expect("add lodging");
}

#[given(
    regex = r#"^"([^"]+)" suggests "([^"]+)" for "([^"]+)" on "([^"]+)" at "([^"]+)" costing "([^"]+)"$"#
)]
async fn given_activity(
    world: &mut AppWorld,
    username: String,
    name: String,
    destination: String,
    day: String,
    time: String,
    cost: String,
) {
    let suggester = world.session_user(&username);
    let trip = world.trip(&destination);
    let draft = ActivityDraft {
        name: name.clone(),
        date: date(&day),
        start_time: NaiveTime::parse_from_str(&time, "%H:%M").expect("time"),
        actual_cost: Some(money(&cost)),
    };
    let id = Activity::create(&world.app_state().db, trip.id, suggester.id, &draft)
        .await
        .expect("add activity");
    let reports = email::notify_activity_suggested(world.app_state(), &trip, &suggester, &name, draft.date)
        .await
        .expect("notify");
    for report in &reports {
        world.remember_message(report);
    }
    world.activities.insert(name, id);
}

#[given(regex = r#"^the email log rejects messages to "([^"]+)"$"#)]
async fn given_log_rejects(world: &mut AppWorld, address: String) {
    let sql = format!(
        "CREATE TRIGGER reject_log BEFORE INSERT ON email_logs \
         WHEN NEW.recipient_email = '{address}' \
         BEGIN SELECT RAISE(ABORT, 'email log unavailable'); END"
    );
    sqlx::query(&sql)
        .execute(&world.app_state().db)
        .await
        .expect("install log trigger");
}

#[then(regex = r#"^the itinerary for "([^"]+)" has (\d+) days$"#)]
async fn then_itinerary_days(world: &mut AppWorld, destination: String, expected: usize) {
    let itinerary = world.itinerary(&destination).await;
    assert_eq!(itinerary.days.len(), expected);
}

#[then(regex = r#"^day (\d+) of "([^"]+)" lists "([^"]*)"$"#)]
async fn then_day_lists(world: &mut AppWorld, number: usize, destination: String, expected: String) {
    let itinerary = world.itinerary(&destination).await;
    let day = &itinerary.days[number - 1];
    let labels: Vec<&str> = day.events.iter().map(|event| event.kind.label()).collect();
    assert_eq!(labels.join(", "), expected);
}

#[then(regex = r#"^the cost summary for "([^"]+)" totals "([^"]+)"$"#)]
async fn then_cost_total(world: &mut AppWorld, destination: String, expected: String) {
    let costs = world.costs(&destination).await;
    assert!(costs.has_costs());
    assert_eq!(costs.grand_total.to_string(), expected);
}

#[then(regex = r#"^"([^"]+)" is (under|over) budget by "([^"]+)"$"#)]
async fn then_budget(world: &mut AppWorld, destination: String, direction: String, expected: String) {
    let costs = world.costs(&destination).await;
    assert_eq!(costs.is_over_budget, direction == "over");
    let difference = costs.budget_difference.expect("estimate recorded");
    assert_eq!(difference.to_string(), expected);
}

#[then(regex = r#"^"([^"]+)" has no cost summary$"#)]
async fn then_no_costs(world: &mut AppWorld, destination: String) {
    assert!(!world.costs(&destination).await.has_costs());
}

// Votes

#[when(regex = r#"^"([^"]+)" votes for "([^"]+)"$"#)]
async fn when_vote(world: &mut AppWorld, username: String, activity: String) {
    let user = world.user(&username);
    let id = world.activities[&activity];
    Activity::vote(&world.app_state().db, id, user.id)
        .await
        .expect("vote");
}

#[then(regex = r#"^"([^"]+)" has (\d+) votes?$"#)]
async fn then_votes(world: &mut AppWorld, activity: String, expected: i64) {
    let id = world.activities[&activity];
    let record = Activity::find(&world.app_state().db, id)
        .await
        .expect("load activity")
        .expect("activity exists");
    assert_eq!(record.votes, expected);
}

// Preferences and SES feedback

#[when(regex = r#"^"([^"]+)" unsubscribes from all emails$"#)]
async fn when_unsubscribe(world: &mut AppWorld, username: String) {
    let user = world.user(&username);
    let mut prefs = world.prefs(&username).await;
    prefs.unsubscribe_all(Utc::now());
    prefs.save(&world.app_state().db).await.expect("save");
    email::send_unsubscribe_confirmation(world.app_state(), &user, &prefs)
        .await
        .expect("confirmation");
}

#[when(regex = r#"^"([^"]+)" resubscribes$"#)]
async fn when_resubscribe(world: &mut AppWorld, username: String) {
    let mut prefs = world.prefs(&username).await;
    prefs.resubscribe(Utc::now());
    prefs.save(&world.app_state().db).await.expect("save");
}

#[when(regex = r#"^"([^"]+)" turns (on|off) activity notifications$"#)]
async fn when_toggle_activity(world: &mut AppWorld, username: String, switch: String) {
    let mut prefs = world.prefs(&username).await;
    prefs.receive_activity_notifications = switch == "on";
    prefs.save(&world.app_state().db).await.expect("save");
}

#[then(regex = r#"^the email address of "([^"]+)" is (valid|invalid)$"#)]
async fn then_address_validity(world: &mut AppWorld, username: String, state: String) {
    let prefs = world.prefs(&username).await;
    assert_eq!(prefs.is_email_valid, state == "valid");
}

#[then(regex = r#"^"([^"]+)" has (\d+) recorded bounces?$"#)]
async fn then_bounce_count(world: &mut AppWorld, username: String, expected: i64) {
    assert_eq!(world.prefs(&username).await.bounce_count, expected);
}

#[then(regex = r#"^"([^"]+)" is marked as a complainer$"#)]
async fn then_complainer(world: &mut AppWorld, username: String) {
    assert!(world.prefs(&username).await.complaint_received);
}

fn notification_body(kind: NotificationKind, message_id: &str, address: &str, bounce_type: &str) -> String {
    let body = match kind {
        NotificationKind::Bounce => json!({
            "notificationType": "Bounce",
            "mail": { "messageId": message_id },
            "bounce": {
                "bounceType": bounce_type,
                "bounceSubType": "General",
                "bouncedRecipients": [{ "emailAddress": address }]
            }
        }),
        NotificationKind::Complaint => json!({
            "notificationType": "Complaint",
            "mail": { "messageId": message_id },
            "complaint": {
                "complainedRecipients": [{ "emailAddress": address }],
                "complaintFeedbackType": "abuse"
            }
        }),
        NotificationKind::Delivery => json!({
            "notificationType": "Delivery",
            "mail": { "messageId": message_id },
            "delivery": { "recipients": [address] }
        }),
    };
    body.to_string()
}

async fn report_feedback(world: &mut AppWorld, kind: NotificationKind, address: &str, bounce_type: &str) {
    let message_id = world
        .message_ids
        .get(address)
        .cloned()
        .unwrap_or_else(|| "unknown-message".into());
    let body = notification_body(kind, &message_id, address, bounce_type);
    let notification = parse_notification(&body).expect("parse notification");
    process_notification(&world.app_state().db, kind, &notification, false)
        .await
        .expect("process notification");
}

#[when(regex = r#"^SES reports a "(Permanent|Transient)" bounce for "([^"]+)"$"#)]
async fn when_bounce(world: &mut AppWorld, bounce_type: String, address: String) {
    report_feedback(world, NotificationKind::Bounce, &address, &bounce_type).await;
}

#[when(regex = r#"^SES reports a complaint for "([^"]+)"$"#)]
async fn when_complaint(world: &mut AppWorld, address: String) {
    report_feedback(world, NotificationKind::Complaint, &address, "").await;
}

#[when(regex = r#"^SES reports a delivery for "([^"]+)"$"#)]
async fn when_delivery(world: &mut AppWorld, address: String) {
    report_feedback(world, NotificationKind::Delivery, &address, "").await;
}

#[when(regex = r#"^an operator reactivates the email address of "([^"]+)"$"#)]
async fn when_reactivate(world: &mut AppWorld, username: String) {
    let mut prefs = world.prefs(&username).await;
    prefs.reactivate(Utc::now());
    prefs.save(&world.app_state().db).await.expect("save");
}

#[when(
    regex = r#"^I drain a bounce queue holding (\d+) bounces? for "([^"]+)" and (\d+) malformed messages?(| in dry-run mode)$"#
)]
async fn when_drain(
    world: &mut AppWorld,
    bounces: usize,
    address: String,
    malformed: usize,
    dry_run: String,
) {
    let mut bodies: Vec<String> = (0..bounces)
        .map(|index| {
            let message_id = format!("queued-{index}");
            // SNS wraps the SES payload as a JSON string.
            json!({ "Message": notification_body(NotificationKind::Bounce, &message_id, &address, "Transient") })
                .to_string()
        })
        .collect();
    bodies.extend((0..malformed).map(|_| "not json".to_string()));
    let queue = MemoryQueue::with_bodies(bodies);
    let report = drain_queue(
        &world.app_state().db,
        &queue,
        NotificationKind::Bounce,
        10,
        !dry_run.is_empty(),
    )
    .await
    .expect("drain queue");
    world.deleted_handles = queue.deleted().await;
    world.drain = Some(report);
}

#[then(regex = r"^the drain processed (\d+) messages? with (\d+) errors?$")]
async fn then_drain_counts(world: &mut AppWorld, processed: usize, errors: usize) {
    let report = world.drain.as_ref().expect("queue drained");
    assert_eq!(report.processed, processed);
    assert_eq!(report.errors, errors);
    assert_eq!(
        report.summary(),
        format!("Processed {processed} messages, {errors} errors")
    );
}

#[then(regex = r"^(\d+) messages? (?:was|were) removed from the queue$")]
async fn then_deleted(world: &mut AppWorld, expected: usize) {
    assert_eq!(world.deleted_handles.len(), expected);
}

#[tokio::main]
async fn main() {
    AppWorld::cucumber()
        .fail_on_skipped()
        .with_default_cli()
        .run("tests/features")
        .await;
}
