use axum::{
    extract::State,
    routing::get,
    Json, Router,
};

use crate::{
    error::AppError,
    models::place::{DestinationInfo, GeocodeQuery, GeocodedPlace, NearbyQuery, Place},
    routes::extract::AppQuery,
    state::AppState,
};

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/geocode", get(geocode))
        .route("/nearby", get(nearby))
        .route("/search", get(search))
}

async fn geocode(
    State(state): State<AppState>,
    AppQuery(query): AppQuery<GeocodeQuery>,
) -> Result<Json<GeocodedPlace>, AppError> {
    Ok(Json(state.places.geocode(&query.q).await?))
}

async fn nearby(
    State(state): State<AppState>,
    AppQuery(query): AppQuery<NearbyQuery>,
) -> Result<Json<Vec<Place>>, AppError> {
    query.validate()?;
    let places = state
        .places
        .search_places(query.lat, query.lon, query.category, query.radius)
        .await?;
    Ok(Json(places))
}

async fn search(
    State(state): State<AppState>,
    AppQuery(query): AppQuery<GeocodeQuery>,
) -> Result<Json<DestinationInfo>, AppError> {
    Ok(Json(state.places.destination_info(&query.q).await?))
}
