use std::{fmt, fs::File, net::SocketAddr, str::FromStr};

use anyhow::Context;
use chrono::{NaiveDate, NaiveTime};
use cucumber::{given, then, when, World as _};
use tempfile::TempDir;
use wanderplan::{
    config::{AppConfig, OllamaConfig, PlacesConfig},
    db::{init_pool, migrate},
    error::AppError,
    models::{
        expense::{BudgetSettings, ExpenseCategory, NewExpense},
        itinerary::{ActivityKind, ItineraryDay, NewActivity, NewDay},
        trip::{NewTrip, Trip},
    },
    state::AppState,
};

#[derive(Debug, cucumber::World, Default)]
struct AppWorld {
    state: Option<TestState>,
    trip: Option<Trip>,
    day: Option<ItineraryDay>,
    last_error: Option<AppError>,
}

impl AppWorld {
    fn app_state(&self) -> &AppState {
        self.state
            .as_ref()
            .expect("state must be initialised first")
            .app()
    }

    fn trip_id(&self) -> i64 {
        self.trip.as_ref().expect("a trip must exist first").id
    }

    fn day_id(&self) -> i64 {
        self.day.as_ref().expect("a day must exist first").id
    }
}

struct TestState {
    app: AppState,
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
            database_url: database_url.clone(),
            listen_addr: SocketAddr::from(([127, 0, 0, 1], 0)),
            static_dir: root.path().join("static"),
            cors_origins: Vec::new(),
            ollama: OllamaConfig::default(),
            places: PlacesConfig::default(),
            geocode_on_create: false,
        };

        let db = init_pool(&config.database_url).await?;
        migrate(&db).await?;

        let app = AppState::new(config, db)?;
        Ok(Self { app, _root: root })
    }

    fn app(&self) -> &AppState {
        &self.app
    }
}

fn date(raw: &str) -> NaiveDate {
    NaiveDate::from_str(raw).expect("ISO date")
}

fn new_trip(title: String, destination: String, start: &str, end: &str) -> NewTrip {
    NewTrip {
        title,
        destination,
        start_date: date(start),
        end_date: date(end),
        notes: None,
    }
}

#[given("a fresh application state")]
async fn given_fresh_state(world: &mut AppWorld) {
    world.state = Some(TestState::new().await.expect("state"));
    world.trip = None;
    world.day = None;
    world.last_error = None;
}

#[given(regex = r#"^a trip "([^"]+)" to "([^"]+)" from "([^"]+)" to "([^"]+)"$"#)]
async fn given_trip(
    world: &mut AppWorld,
    title: String,
    destination: String,
    start: String,
    end: String,
) {
    create_trip(world, title, destination, start, end).await;
}

#[when(regex = r#"^I create a trip "([^"]+)" to "([^"]+)" from "([^"]+)" to "([^"]+)"$"#)]
async fn when_create_trip(
    world: &mut AppWorld,
    title: String,
    destination: String,
    start: String,
    end: String,
) {
    create_trip(world, title, destination, start, end).await;
}

async fn create_trip(
    world: &mut AppWorld,
    title: String,
    destination: String,
    start: String,
    end: String,
) {
    let trip = world
        .app_state()
        .trips
        .create_trip(new_trip(title, destination, &start, &end), None)
        .await
        .expect("create trip");
    world.trip = Some(trip);
}

#[when(regex = r#"^I try to create a trip "([^"]+)" to "([^"]+)" from "([^"]+)" to "([^"]+)"$"#)]
async fn try_create_trip(
    world: &mut AppWorld,
    title: String,
    destination: String,
    start: String,
    end: String,
) {
    world.last_error = world
        .app_state()
        .trips
        .create_trip(new_trip(title, destination, &start, &end), None)
        .await
        .err();
}

#[when(regex = r#"^I add a day on "([^"]+)" titled "([^"]*)"$"#)]
async fn add_titled_day(world: &mut AppWorld, on: String, title: String) {
    add_day(world, on, Some(title)).await;
}

#[when(regex = r#"^I add a day on "([^"]+)"$"#)]
async fn add_untitled_day(world: &mut AppWorld, on: String) {
    add_day(world, on, None).await;
}

async fn add_day(world: &mut AppWorld, on: String, title: Option<String>) {
    let day = world
        .app_state()
        .trips
        .create_day(
            world.trip_id(),
            NewDay {
                date: date(&on),
                title,
            },
        )
        .await
        .expect("create day");
    world.day = Some(day);
}

#[when(regex = r#"^I try to add a day on "([^"]+)"$"#)]
async fn try_add_day(world: &mut AppWorld, on: String) {
    world.last_error = world
        .app_state()
        .trips
        .create_day(
            world.trip_id(),
            NewDay {
                date: date(&on),
                title: None,
            },
        )
        .await
        .err();
}

#[when(regex = r#"^I add a "([a-z]+)" activity "([^"]+)" at "([0-9:]+)"$"#)]
async fn add_activity(world: &mut AppWorld, kind: String, title: String, at: String) {
    let input = NewActivity {
        time: NaiveTime::parse_from_str(&at, "%H:%M").expect("HH:MM"),
        kind: ActivityKind::from_str(&kind).expect("activity type"),
        title,
        location: None,
        notes: None,
    };
    world
        .app_state()
        .trips
        .create_activity(world.trip_id(), world.day_id(), input)
        .await
        .expect("create activity");
}

#[when("I delete the trip")]
async fn delete_trip(world: &mut AppWorld) {
    world
        .app_state()
        .trips
        .delete_trip(world.trip_id())
        .await
        .expect("delete trip");
}

#[when(regex = r#"^I set the budget to ([0-9.]+) "([A-Za-z]{3})"$"#)]
async fn set_budget(world: &mut AppWorld, total: f64, currency: String) {
    world
        .app_state()
        .budget
        .update_settings(
            world.trip_id(),
            BudgetSettings {
                budget_total: Some(total),
                budget_currency: Some(currency),
            },
        )
        .await
        .expect("update budget");
}

#[when(regex = r#"^I spend ([0-9.]+) on "([a-z]+)" for "([^"]+)"$"#)]
async fn spend(world: &mut AppWorld, amount: f64, category: String, description: String) {
    let input = NewExpense {
        category: ExpenseCategory::from_str(&category).expect("expense category"),
        description,
        amount,
        currency: None,
        date: None,
        notes: None,
    };
    world
        .app_state()
        .budget
        .add_expense(world.trip_id(), input)
        .await
        .expect("add expense");
}

#[then(regex = r"^the itinerary has (\d+) days?$")]
async fn itinerary_has_days(world: &mut AppWorld, expected: usize) {
    let itinerary = world
        .app_state()
        .trips
        .itinerary(world.trip_id())
        .await
        .expect("itinerary");
    assert_eq!(itinerary.len(), expected);
}

#[then(regex = r#"^the itinerary has (\d+) activit(?:y|ies) "([^"]+)" at "([0-9:]+)"$"#)]
async fn itinerary_has_activity(world: &mut AppWorld, expected: usize, title: String, at: String) {
    let itinerary = world
        .app_state()
        .trips
        .itinerary(world.trip_id())
        .await
        .expect("itinerary");
    let activities: Vec<_> = itinerary.iter().flat_map(|day| &day.activities).collect();
    assert_eq!(activities.len(), expected);
    let first = activities.first().expect("at least one activity");
    assert_eq!(first.title, title);
    assert_eq!(first.time.format("%H:%M").to_string(), at);
}

#[then(regex = r#"^the activities of the day are "([^"]*)"$"#)]
async fn activities_in_order(world: &mut AppWorld, expected: String) {
    let activities = world
        .app_state()
        .trips
        .list_activities(world.trip_id(), world.day_id())
        .await
        .expect("list activities");
    let titles: Vec<&str> = activities.iter().map(|a| a.title.as_str()).collect();
    assert_eq!(titles.join(", "), expected);
}

#[then("the trip can no longer be found")]
async fn trip_is_gone(world: &mut AppWorld) {
    let err = world
        .app_state()
        .trips
        .get_trip(world.trip_id())
        .await
        .expect_err("trip should be gone");
    assert!(matches!(err, AppError::NotFound(_)), "{err:?}");
}

#[then("nothing of its itinerary is left")]
async fn itinerary_is_gone(world: &mut AppWorld) {
    let db = &world.app_state().db;
    let days: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM itinerary_days")
        .fetch_one(db)
        .await
        .expect("count days");
    let activities: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM activities")
        .fetch_one(db)
        .await
        .expect("count activities");
    assert_eq!((days, activities), (0, 0));
}

#[then("the request is rejected as invalid")]
async fn rejected_as_invalid(world: &mut AppWorld) {
    let err = world.last_error.take().expect("an error was expected");
    assert!(matches!(err, AppError::Validation(_)), "{err:?}");
}

#[then(regex = r"^there are (\d+) trips$")]
async fn trip_count(world: &mut AppWorld, expected: usize) {
    let trips = world.app_state().trips.list_trips().await.expect("list trips");
    assert_eq!(trips.len(), expected);
}

#[then(regex = r"^the total spent is ([0-9.]+)$")]
async fn total_spent(world: &mut AppWorld, expected: f64) {
    let summary = world
        .app_state()
        .budget
        .summary(world.trip_id())
        .await
        .expect("budget summary");
    assert_eq!(summary.total_spent, expected);
}

#[then(regex = r"^the remaining budget is ([0-9.]+)$")]
async fn remaining(world: &mut AppWorld, expected: f64) {
    let summary = world
        .app_state()
        .budget
        .summary(world.trip_id())
        .await
        .expect("budget summary");
    assert_eq!(summary.remaining, Some(expected));
}

#[tokio::main]
async fn main() {
    AppWorld::cucumber()
        .fail_on_skipped()
        .with_default_cli()
        .run("tests/features")
        .await;
}
