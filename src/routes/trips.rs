use axum::{
    extract::State,
    http::StatusCode,
    routing::get,
    Json, Router,
};
use tracing::{info, warn};

use crate::{
    error::AppError,
    models::{
        itinerary::{
            Activity, ActivityUpdate, DayPlan, DayUpdate, ItineraryDay, NewActivity, NewDay,
        },
        trip::{NewTrip, Trip, TripUpdate},
    },
    routes::extract::{AppJson, AppPath},
    state::AppState,
};

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/", get(list_trips).post(create_trip))
        .route(
            "/:trip_id",
            get(get_trip).put(update_trip).delete(delete_trip),
        )
        .route("/:trip_id/itinerary", get(itinerary))
        .route("/:trip_id/days", get(list_days).post(create_day))
        .route(
            "/:trip_id/days/:day_id",
            get(get_day).put(update_day).delete(delete_day),
        )
        .route(
            "/:trip_id/days/:day_id/activities",
            get(list_activities).post(create_activity),
        )
        .route(
            "/:trip_id/days/:day_id/activities/:activity_id",
            get(get_activity)
                .put(update_activity)
                .delete(delete_activity),
        )
}

async fn list_trips(State(state): State<AppState>) -> Result<Json<Vec<Trip>>, AppError> {
    Ok(Json(state.trips.list_trips().await?))
}

async fn create_trip(
    State(state): State<AppState>,
    AppJson(input): AppJson<NewTrip>,
) -> Result<(StatusCode, Json<Trip>), AppError> {
    let input = input.validated()?;
    let coordinates = locate(&state, &input.destination).await;
    let trip = state.trips.create_trip(input, coordinates).await?;
    info!(trip_id = trip.id, destination = %trip.destination, "trip created");
    Ok((StatusCode::CREATED, Json(trip)))
}

async fn get_trip(
    State(state): State<AppState>,
    AppPath(trip_id): AppPath<i64>,
) -> Result<Json<Trip>, AppError> {
    Ok(Json(state.trips.get_trip(trip_id).await?))
}

async fn update_trip(
    State(state): State<AppState>,
    AppPath(trip_id): AppPath<i64>,
    AppJson(update): AppJson<TripUpdate>,
) -> Result<Json<Trip>, AppError> {
    let relocate = update.changes_destination();
    let mut trip = state.trips.update_trip(trip_id, update).await?;
    if relocate {
        let coordinates = locate(&state, &trip.destination).await;
        trip = state.trips.set_coordinates(trip_id, coordinates).await?;
    }
    Ok(Json(trip))
}

async fn delete_trip(
    State(state): State<AppState>,
    AppPath(trip_id): AppPath<i64>,
) -> Result<StatusCode, AppError> {
    state.trips.delete_trip(trip_id).await?;
    info!(trip_id, "trip deleted");
    Ok(StatusCode::NO_CONTENT)
}

/// Best-effort coordinates for a destination; lookup failures never fail the write.
async fn locate(state: &AppState, destination: &str) -> Option<(f64, f64)> {
    if !state.config.geocode_on_create {
        return None;
    }
    match state.places.geocode(destination).await {
        Ok(place) => Some((place.lat, place.lon)),
        Err(err) => {
            warn!(destination, "could not geocode trip destination: {err}");
            None
        }
    }
}

async fn itinerary(
    State(state): State<AppState>,
    AppPath(trip_id): AppPath<i64>,
) -> Result<Json<Vec<DayPlan>>, AppError> {
    state.trips.get_trip(trip_id).await?;
    Ok(Json(state.trips.itinerary(trip_id).await?))
}

async fn list_days(
    State(state): State<AppState>,
    AppPath(trip_id): AppPath<i64>,
) -> Result<Json<Vec<ItineraryDay>>, AppError> {
    Ok(Json(state.trips.list_days(trip_id).await?))
}

async fn create_day(
    State(state): State<AppState>,
    AppPath(trip_id): AppPath<i64>,
    AppJson(input): AppJson<NewDay>,
) -> Result<(StatusCode, Json<ItineraryDay>), AppError> {
    let day = state.trips.create_day(trip_id, input).await?;
    Ok((StatusCode::CREATED, Json(day)))
}

async fn get_day(
    State(state): State<AppState>,
    AppPath((trip_id, day_id)): AppPath<(i64, i64)>,
) -> Result<Json<ItineraryDay>, AppError> {
    Ok(Json(state.trips.get_day(trip_id, day_id).await?))
}

async fn update_day(
    State(state): State<AppState>,
    AppPath((trip_id, day_id)): AppPath<(i64, i64)>,
    AppJson(update): AppJson<DayUpdate>,
) -> Result<Json<ItineraryDay>, AppError> {
    Ok(Json(state.trips.update_day(trip_id, day_id, update).await?))
}

async fn delete_day(
    State(state): State<AppState>,
    AppPath((trip_id, day_id)): AppPath<(i64, i64)>,
) -> Result<StatusCode, AppError> {
    state.trips.delete_day(trip_id, day_id).await?;
    Ok(StatusCode::NO_CONTENT)
}

async fn list_activities(
    State(state): State<AppState>,
    AppPath((trip_id, day_id)): AppPath<(i64, i64)>,
) -> Result<Json<Vec<Activity>>, AppError> {
    Ok(Json(state.trips.list_activities(trip_id, day_id).await?))
}

async fn create_activity(
    State(state): State<AppState>,
    AppPath((trip_id, day_id)): AppPath<(i64, i64)>,
    AppJson(input): AppJson<NewActivity>,
) -> Result<(StatusCode, Json<Activity>), AppError> {
    let activity = state.trips.create_activity(trip_id, day_id, input).await?;
    Ok((StatusCode::CREATED, Json(activity)))
}

async fn get_activity(
    State(state): State<AppState>,
    AppPath((trip_id, day_id, activity_id)): AppPath<(i64, i64, i64)>,
) -> Result<Json<Activity>, AppError> {
    Ok(Json(
        state
            .trips
            .get_activity(trip_id, day_id, activity_id)
            .await?,
    ))
}

async fn update_activity(
    State(state): State<AppState>,
    AppPath((trip_id, day_id, activity_id)): AppPath<(i64, i64, i64)>,
    AppJson(update): AppJson<ActivityUpdate>,
) -> Result<Json<Activity>, AppError> {
    Ok(Json(
        state
            .trips
            .update_activity(trip_id, day_id, activity_id, update)
            .await?,
    ))
}

async fn delete_activity(
    State(state): State<AppState>,
    AppPath((trip_id, day_id, activity_id)): AppPath<(i64, i64, i64)>,
) -> Result<StatusCode, AppError> {
    state
        .trips
        .delete_activity(trip_id, day_id, activity_id)
        .await?;
    Ok(StatusCode::NO_CONTENT)
}
