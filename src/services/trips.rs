use chrono::Utc;
use sqlx::SqliteConnection;
use tracing::debug;

use crate::{
    db::DbPool,
    error::AppError,
    models::{
        itinerary::{
            Activity, ActivityRow, ActivityUpdate, DayPlan, DayUpdate, ItineraryDay, Location,
            NewActivity, NewDay,
        },
        normalize_optional,
        trip::{NewTrip, Trip, TripUpdate},
    },
};

const TRIP_COLUMNS: &str = "id, title, destination, start_date, end_date, notes, lat, lon, \
     budget_total, budget_currency, budget_estimates, created_at";
const DAY_COLUMNS: &str = "id, trip_id, date, title";
const ACTIVITY_COLUMNS: &str =
    "a.id, a.day_id, a.time, a.kind, a.title, a.location_text, a.lat, a.lon, a.notes";

/// Trips, their itinerary days and the activities inside each day.
///
/// Every nested write resolves its parent chain inside the same transaction, so an
/// activity can only be touched through the trip and day that actually own it.
#[derive(Clone)]
pub struct TripStore {
    db: DbPool,
}

impl TripStore {
    pub fn new(db: DbPool) -> Self {
        Self { db }
    }

    pub async fn create_trip(
        &self,
        input: NewTrip,
        coordinates: Option<(f64, f64)>,
    ) -> Result<Trip, AppError> {
        let input = input.validated()?;
        let (lat, lon) = coordinates.unzip();
        let trip = sqlx::query_as::<_, Trip>(&format!(
            "INSERT INTO trips (title, destination, start_date, end_date, notes, lat, lon, created_at) \
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8) RETURNING {TRIP_COLUMNS}"
        ))
        .bind(&input.title)
        .bind(&input.destination)
        .bind(input.start_date)
        .bind(input.end_date)
        .bind(&input.notes)
        .bind(lat)
        .bind(lon)
        .bind(Utc::now())
        .fetch_one(&self.db)
        .await?;
        debug!(trip_id = trip.id, "created trip");
        Ok(trip)
    }

    /// Newest first.
    pub async fn list_trips(&self) -> Result<Vec<Trip>, AppError> {
        let trips = sqlx::query_as::<_, Trip>(&format!(
            "SELECT {TRIP_COLUMNS} FROM trips ORDER BY created_at DESC, id DESC"
        ))
        .fetch_all(&self.db)
        .await?;
        Ok(trips)
    }

    pub async fn get_trip(&self, trip_id: i64) -> Result<Trip, AppError> {
        sqlx::query_as::<_, Trip>(&format!("SELECT {TRIP_COLUMNS} FROM trips WHERE id = ?1"))
            .bind(trip_id)
            .fetch_optional(&self.db)
            .await?
            .ok_or_else(|| trip_not_found(trip_id))
    }

    pub async fn update_trip(&self, trip_id: i64, update: TripUpdate) -> Result<Trip, AppError> {
        let mut tx = self.db.begin().await?;
        let mut trip = fetch_trip(&mut tx, trip_id).await?;
        update.apply(&mut trip)?;

        let outside: i64 = sqlx::query_scalar(
            "SELECT COUNT(*) FROM itinerary_days WHERE trip_id = ?1 AND (date < ?2 OR date > ?3)",
        )
        .bind(trip_id)
        .bind(trip.start_date)
        .bind(trip.end_date)
        .fetch_one(&mut *tx)
        .await?;
        if outside > 0 {
            return Err(AppError::validation(format!(
                "{outside} itinerary day(s) fall outside {} to {}",
                trip.start_date, trip.end_date
            )));
        }

        let trip = sqlx::query_as::<_, Trip>(&format!(
            "UPDATE trips SET title = ?1, destination = ?2, start_date = ?3, end_date = ?4, notes = ?5 \
             WHERE id = ?6 RETURNING {TRIP_COLUMNS}"
        ))
        .bind(&trip.title)
        .bind(&trip.destination)
        .bind(trip.start_date)
        .bind(trip.end_date)
        .bind(&trip.notes)
        .bind(trip_id)
        .fetch_one(&mut *tx)
        .await?;
        tx.commit().await?;
        Ok(trip)
    }

    pub async fn set_coordinates(
        &self,
        trip_id: i64,
        coordinates: Option<(f64, f64)>,
    ) -> Result<Trip, AppError> {
        let (lat, lon) = coordinates.unzip();
        sqlx::query_as::<_, Trip>(&format!(
            "UPDATE trips SET lat = ?1, lon = ?2 WHERE id = ?3 RETURNING {TRIP_COLUMNS}"
        ))
        .bind(lat)
        .bind(lon)
        .bind(trip_id)
        .fetch_optional(&self.db)
        .await?
        .ok_or_else(|| trip_not_found(trip_id))
    }

    /// Removes the trip; days, activities and expenses go with it through `ON DELETE CASCADE`.
    pub async fn delete_trip(&self, trip_id: i64) -> Result<(), AppError> {
        let result = sqlx::query("DELETE FROM trips WHERE id = ?1")
            .bind(trip_id)
            .execute(&self.db)
            .await?;
        if result.rows_affected() == 0 {
            return Err(trip_not_found(trip_id));
        }
        debug!(trip_id, "deleted trip");
        Ok(())
    }

    pub async fn list_days(&self, trip_id: i64) -> Result<Vec<ItineraryDay>, AppError> {
        let days = sqlx::query_as::<_, ItineraryDay>(&format!(
            "SELECT {DAY_COLUMNS} FROM itinerary_days WHERE trip_id = ?1 ORDER BY date, id"
        ))
        .bind(trip_id)
        .fetch_all(&self.db)
        .await?;
        Ok(days)
    }

    pub async fn get_day(&self, trip_id: i64, day_id: i64) -> Result<ItineraryDay, AppError> {
        let mut conn = self.db.acquire().await?;
        fetch_day(&mut conn, trip_id, day_id).await
    }

    pub async fn create_day(&self, trip_id: i64, input: NewDay) -> Result<ItineraryDay, AppError> {
        let mut tx = self.db.begin().await?;
        let trip = fetch_trip(&mut tx, trip_id).await?;
        check_day_in_trip(&trip, input.date)?;
        let day = sqlx::query_as::<_, ItineraryDay>(&format!(
            "INSERT INTO itinerary_days (trip_id, date, title) VALUES (?1, ?2, ?3) RETURNING {DAY_COLUMNS}"
        ))
        .bind(trip_id)
        .bind(input.date)
        .bind(normalize_optional(input.title))
        .fetch_one(&mut *tx)
        .await?;
        tx.commit().await?;
        Ok(day)
    }

    pub async fn update_day(
        &self,
        trip_id: i64,
        day_id: i64,
        update: DayUpdate,
    ) -> Result<ItineraryDay, AppError> {
        let mut tx = self.db.begin().await?;
        let trip = fetch_trip(&mut tx, trip_id).await?;
        let mut day = fetch_day(&mut tx, trip_id, day_id).await?;
        if let Some(date) = update.date {
            check_day_in_trip(&trip, date)?;
            day.date = date;
        }
        if let Some(title) = update.title {
            day.title = normalize_optional(title);
        }
        let day = sqlx::query_as::<_, ItineraryDay>(&format!(
            "UPDATE itinerary_days SET date = ?1, title = ?2 WHERE id = ?3 RETURNING {DAY_COLUMNS}"
        ))
        .bind(day.date)
        .bind(&day.title)
        .bind(day_id)
        .fetch_one(&mut *tx)
        .await?;
        tx.commit().await?;
        Ok(day)
    }

    pub async fn delete_day(&self, trip_id: i64, day_id: i64) -> Result<(), AppError> {
        let result = sqlx::query("DELETE FROM itinerary_days WHERE id = ?1 AND trip_id = ?2")
            .bind(day_id)
            .bind(trip_id)
            .execute(&self.db)
            .await?;
        if result.rows_affected() == 0 {
            return Err(day_not_found(trip_id, day_id));
        }
        Ok(())
    }

    /// Every day of the trip with its activities; an unknown trip yields no days.
    pub async fn itinerary(&self, trip_id: i64) -> Result<Vec<DayPlan>, AppError> {
        let days = self.list_days(trip_id).await?;
        let rows = sqlx::query_as::<_, ActivityRow>(&format!(
            "SELECT {ACTIVITY_COLUMNS} FROM activities a \
             JOIN itinerary_days d ON d.id = a.day_id \
             WHERE d.trip_id = ?1 ORDER BY a.time, a.id"
        ))
        .bind(trip_id)
        .fetch_all(&self.db)
        .await?;

        let mut plans: Vec<DayPlan> = days
            .into_iter()
            .map(|day| DayPlan {
                day,
                activities: Vec::new(),
            })
            .collect();
        for row in rows {
            let activity = Activity::try_from(row)?;
            if let Some(plan) = plans.iter_mut().find(|p| p.day.id == activity.day_id) {
                plan.activities.push(activity);
            }
        }
        Ok(plans)
    }

    /// Activities of a day ordered by time, ties by insertion; empty when the day is not in the trip.
    pub async fn list_activities(
        &self,
        trip_id: i64,
        day_id: i64,
    ) -> Result<Vec<Activity>, AppError> {
        let rows = sqlx::query_as::<_, ActivityRow>(&format!(
            "SELECT {ACTIVITY_COLUMNS} FROM activities a \
             JOIN itinerary_days d ON d.id = a.day_id \
             WHERE a.day_id = ?1 AND d.trip_id = ?2 ORDER BY a.time, a.id"
        ))
        .bind(day_id)
        .bind(trip_id)
        .fetch_all(&self.db)
        .await?;
        rows.into_iter().map(Activity::try_from).collect()
    }

    pub async fn get_activity(
        &self,
        trip_id: i64,
        day_id: i64,
        activity_id: i64,
    ) -> Result<Activity, AppError> {
        let mut conn = self.db.acquire().await?;
        fetch_activity(&mut conn, trip_id, day_id, activity_id).await
    }

    pub async fn create_activity(
        &self,
        trip_id: i64,
        day_id: i64,
        input: NewActivity,
    ) -> Result<Activity, AppError> {
        let input = input.validated()?;
        let mut tx = self.db.begin().await?;
        fetch_trip(&mut tx, trip_id).await?;
        fetch_day(&mut tx, trip_id, day_id).await?;
        let (location_text, lat, lon) = Location::into_columns(input.location);
        let row = sqlx::query_as::<_, ActivityRow>(
            "INSERT INTO activities (day_id, time, kind, title, location_text, lat, lon, notes) \
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8) \
             RETURNING id, day_id, time, kind, title, location_text, lat, lon, notes",
        )
        .bind(day_id)
        .bind(input.time)
        .bind(input.kind.as_str())
        .bind(&input.title)
        .bind(location_text)
        .bind(lat)
        .bind(lon)
        .bind(&input.notes)
        .fetch_one(&mut *tx)
        .await?;
        tx.commit().await?;
        Activity::try_from(row)
    }

    pub async fn update_activity(
        &self,
        trip_id: i64,
        day_id: i64,
        activity_id: i64,
        update: ActivityUpdate,
    ) -> Result<Activity, AppError> {
        let mut tx = self.db.begin().await?;
        let mut activity = fetch_activity(&mut tx, trip_id, day_id, activity_id).await?;
        update.apply(&mut activity)?;
        let (location_text, lat, lon) = Location::into_columns(activity.location.clone());
        sqlx::query(
            "UPDATE activities SET time = ?1, kind = ?2, title = ?3, location_text = ?4, \
             lat = ?5, lon = ?6, notes = ?7 WHERE id = ?8",
        )
        .bind(activity.time)
        .bind(activity.kind.as_str())
        .bind(&activity.title)
        .bind(location_text)
        .bind(lat)
        .bind(lon)
        .bind(&activity.notes)
        .bind(activity_id)
        .execute(&mut *tx)
        .await?;
        tx.commit().await?;
        Ok(activity)
    }

    pub async fn delete_activity(
        &self,
        trip_id: i64,
        day_id: i64,
        activity_id: i64,
    ) -> Result<(), AppError> {
        let mut tx = self.db.begin().await?;
        fetch_activity(&mut tx, trip_id, day_id, activity_id).await?;
        sqlx::query("DELETE FROM activities WHERE id = ?1")
            .bind(activity_id)
            .execute(&mut *tx)
            .await?;
        tx.commit().await?;
        Ok(())
    }
}

async fn fetch_trip(conn: &mut SqliteConnection, trip_id: i64) -> Result<Trip, AppError> {
    sqlx::query_as::<_, Trip>(&format!("SELECT {TRIP_COLUMNS} FROM trips WHERE id = ?1"))
        .bind(trip_id)
        .fetch_optional(conn)
        .await?
        .ok_or_else(|| trip_not_found(trip_id))
}

async fn fetch_day(
    conn: &mut SqliteConnection,
    trip_id: i64,
    day_id: i64,
) -> Result<ItineraryDay, AppError> {
    sqlx::query_as::<_, ItineraryDay>(&format!(
        "SELECT {DAY_COLUMNS} FROM itinerary_days WHERE id = ?1 AND trip_id = ?2"
    ))
    .bind(day_id)
    .bind(trip_id)
    .fetch_optional(conn)
    .await?
    .ok_or_else(|| day_not_found(trip_id, day_id))
}

async fn fetch_activity(
    conn: &mut SqliteConnection,
    trip_id: i64,
    day_id: i64,
    activity_id: i64,
) -> Result<Activity, AppError> {
    let row = sqlx::query_as::<_, ActivityRow>(&format!(
        "SELECT {ACTIVITY_COLUMNS} FROM activities a \
         JOIN itinerary_days d ON d.id = a.day_id \
         WHERE a.id = ?1 AND a.day_id = ?2 AND d.trip_id = ?3"
    ))
    .bind(activity_id)
    .bind(day_id)
    .bind(trip_id)
    .fetch_optional(conn)
    .await?
    .ok_or_else(|| {
        AppError::not_found(format!("activity {activity_id} in day {day_id} of trip {trip_id}"))
    })?;
    Activity::try_from(row)
}

fn check_day_in_trip(trip: &Trip, date: chrono::NaiveDate) -> Result<(), AppError> {
    if !trip.contains_date(date) {
        return Err(AppError::validation(format!(
            "day {date} is outside the trip ({} – {})",
            trip.start_date, trip.end_date
        )));
    }
    Ok(())
}

pub(crate) fn trip_not_found(trip_id: i64) -> AppError {
    AppError::not_found(format!("trip {trip_id}"))
}

fn day_not_found(trip_id: i64, day_id: i64) -> AppError {
    AppError::not_found(format!("day {day_id} of trip {trip_id}"))
}
