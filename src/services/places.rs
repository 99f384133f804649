use std::{collections::HashMap, sync::Arc, time::Duration};

use reqwest::{Client, Response, StatusCode};
use serde::{de::DeserializeOwned, Deserialize};
use tracing::{debug, warn};
use url::Url;

use crate::{
    config::PlacesConfig,
    error::AppError,
    models::place::{check_coordinates, DestinationInfo, GeocodedPlace, Place, PlaceCategory},
    services::{endpoint, throttle::GeocodeThrottle},
};

const MAX_PLACES: usize = 20;

/// Nominatim geocoding plus Overpass place search.
///
/// Geocoding goes through a shared [`GeocodeThrottle`]; clones share it, so every
/// handler in the process observes the same spacing.
#[derive(Clone)]
pub struct PlacesClient {
    http: Client,
    nominatim_url: Arc<Url>,
    overpass_url: Arc<Url>,
    throttle: GeocodeThrottle,
}

impl PlacesClient {
    pub fn new(config: &PlacesConfig) -> Result<Self, AppError> {
        let http = Client::builder()
            .timeout(Duration::from_secs(30))
            .user_agent(config.user_agent.clone())
            .build()
            .map_err(|err| AppError::Config(format!("failed to build places client: {err}")))?;
        Ok(Self {
            http,
            nominatim_url: Arc::new(config.nominatim_url.clone()),
            overpass_url: Arc::new(config.overpass_url.clone()),
            throttle: GeocodeThrottle::new(config.geocode_interval, config.geocode_queue_bound),
        })
    }

    /// Resolves a destination name to coordinates. No match is [`AppError::NotFound`].
    pub async fn geocode(&self, query: &str) -> Result<GeocodedPlace, AppError> {
        let query = query.trim();
        if query.is_empty() {
            return Err(AppError::validation("destination query must not be empty"));
        }
        let hits = self
            .throttle
            .run(|| self.fetch_geocode(query))
            .await?;

        let hit = hits
            .into_iter()
            .next()
            .ok_or_else(|| AppError::not_found(format!("destination {query:?}")))?;
        hit.into_place(query)
    }

    async fn fetch_geocode(&self, query: &str) -> Result<Vec<NominatimHit>, AppError> {
        debug!(query, "geocoding destination");
        let url = endpoint(&self.nominatim_url, "search")?;
        let response = self
            .http
            .get(url)
            .query(&[
                ("q", query),
                ("format", "json"),
                ("limit", "1"),
                ("addressdetails", "1"),
            ])
            .send()
            .await?;
        decode(response, "nominatim").await
    }

    /// Named places of `category` within `radius` meters, at most twenty.
    pub async fn search_places(
        &self,
        lat: f64,
        lon: f64,
        category: PlaceCategory,
        radius: u32,
    ) -> Result<Vec<Place>, AppError> {
        check_coordinates(lat, lon)?;
        let filter = category.tag_filter();
        let query = format!(
            "[out:json][timeout:25];\n\
             (\n  node{filter}(around:{radius},{lat},{lon});\n  way{filter}(around:{radius},{lat},{lon});\n);\n\
             out center {MAX_PLACES};"
        );
        debug!(%category, radius, lat, lon, "searching places");
        let response = self
            .http
            .post(self.overpass_url.as_str())
            .form(&[("data", query)])
            .send()
            .await?;
        let body: OverpassResponse = decode(response, "overpass").await?;
        Ok(body
            .elements
            .into_iter()
            .filter_map(|element| element.into_place(category))
            .take(MAX_PLACES)
            .collect())
    }

    /// Geocodes the destination and gathers attractions, restaurants and hotels around it.
    pub async fn destination_info(&self, query: &str) -> Result<DestinationInfo, AppError> {
        let destination = self.geocode(query).await?;
        let (lat, lon) = (destination.lat, destination.lon);
        let radius = crate::models::place::DEFAULT_RADIUS_METERS;

        let mut attractions = self
            .search_places(lat, lon, PlaceCategory::Tourism, radius)
            .await?;
        let mut restaurants = self.search_places(lat, lon, PlaceCategory::Food, radius).await?;
        let mut hotels = self.search_places(lat, lon, PlaceCategory::Hotel, radius).await?;
        attractions.truncate(10);
        restaurants.truncate(10);
        hotels.truncate(8);

        Ok(DestinationInfo {
            destination,
            attractions,
            restaurants,
            hotels,
        })
    }
}

async fn decode<T: DeserializeOwned>(response: Response, service: &str) -> Result<T, AppError> {
    let status = response.status();
    if status == StatusCode::TOO_MANY_REQUESTS {
        warn!(service, "upstream rate limit hit");
        return Err(AppError::RateLimited(format!("{service} rejected the request")));
    }
    if !status.is_success() {
        let body = response.text().await.unwrap_or_default();
        warn!(service, %status, "upstream error");
        return Err(AppError::upstream(format!(
            "{service} answered {status}: {}",
            body.chars().take(200).collect::<String>()
        )));
    }
    let bytes = response.bytes().await?;
    serde_json::from_slice(&bytes)
        .map_err(|err| AppError::upstream(format!("{service} returned an unexpected payload: {err}")))
}

#[derive(Debug, Deserialize)]
struct NominatimHit {
    display_name: Option<String>,
    lat: String,
    lon: String,
    #[serde(default)]
    address: NominatimAddress,
}

#[derive(Debug, Default, Deserialize)]
struct NominatimAddress {
    country: Option<String>,
    city: Option<String>,
    town: Option<String>,
    village: Option<String>,
}

impl NominatimHit {
    fn into_place(self, query: &str) -> Result<GeocodedPlace, AppError> {
        let parse = |raw: &str, axis: &str| {
            raw.trim().parse::<f64>().map_err(|_| {
                AppError::upstream(format!("nominatim returned a non-numeric {axis}: {raw:?}"))
            })
        };
        let lat = parse(&self.lat, "lat")?;
        let lon = parse(&self.lon, "lon")?;
        check_coordinates(lat, lon)
            .map_err(|_| AppError::upstream(format!("nominatim returned {lat},{lon}")))?;
        let NominatimAddress {
            country,
            city,
            town,
            village,
        } = self.address;
        Ok(GeocodedPlace {
            name: self.display_name.unwrap_or_else(|| query.to_string()),
            lat,
            lon,
            country,
            city: city.or(town).or(village),
        })
    }
}

#[derive(Debug, Deserialize)]
struct OverpassResponse {
    elements: Vec<OverpassElement>,
}

#[derive(Debug, Deserialize)]
struct OverpassElement {
    #[serde(rename = "type")]
    kind: String,
    id: i64,
    lat: Option<f64>,
    lon: Option<f64>,
    center: Option<OverpassCenter>,
    #[serde(default)]
    tags: HashMap<String, String>,
}

#[derive(Debug, Deserialize)]
struct OverpassCenter {
    lat: f64,
    lon: f64,
}

impl OverpassElement {
    fn into_place(mut self, category: PlaceCategory) -> Option<Place> {
        let name = self.tags.remove("name").filter(|n| !n.trim().is_empty())?;
        let (lat, lon) = match (self.lat, self.lon, &self.center) {
            (Some(lat), Some(lon), _) => (lat, lon),
            (_, _, Some(center)) => (center.lat, center.lon),
            _ => return None,
        };
        let address = self.address();
        let mut tag = |key: &str| self.tags.remove(key).filter(|v| !v.is_empty());
        Some(Place {
            id: format!("{}/{}", self.kind, self.id),
            name,
            category,
            lat,
            lon,
            address,
            description: tag("description"),
            website: tag("website"),
            opening_hours: tag("opening_hours"),
            cuisine: tag("cuisine"),
            stars: tag("stars"),
            wikipedia: tag("wikipedia"),
        })
    }

    fn address(&self) -> Option<String> {
        let street = match (self.tags.get("addr:street"), self.tags.get("addr:housenumber")) {
            (Some(street), Some(number)) => Some(format!("{number} {street}")),
            (Some(street), None) => Some(street.clone()),
            _ => None,
        };
        let parts: Vec<String> = street
            .into_iter()
            .chain(self.tags.get("addr:city").cloned())
            .collect();
        (!parts.is_empty()).then(|| parts.join(", "))
    }
}
