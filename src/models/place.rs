use std::fmt;

use serde::{Deserialize, Serialize};
use serde_with::skip_serializing_none;

use crate::error::AppError;

pub const MAX_RADIUS_METERS: u32 = 50_000;
pub const DEFAULT_RADIUS_METERS: u32 = 5_000;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum PlaceCategory {
    #[default]
    Tourism,
    Food,
    Hotel,
    Nature,
    Shopping,
}

impl PlaceCategory {
    pub fn as_str(&self) -> &'static str {
        match self {
            PlaceCategory::Tourism => "tourism",
            PlaceCategory::Food => "food",
            PlaceCategory::Hotel => "hotel",
            PlaceCategory::Nature => "nature",
            PlaceCategory::Shopping => "shopping",
        }
    }

    /// Overpass QL tag selector for the category.
    pub fn tag_filter(&self) -> &'static str {
        match self {
            PlaceCategory::Tourism => {
                r#"["tourism"~"attraction|museum|artwork|viewpoint|gallery|theme_park|zoo"]"#
            }
            PlaceCategory::Food => r#"["amenity"~"restaurant|cafe|bar|fast_food|food_court"]"#,
            PlaceCategory::Hotel => r#"["tourism"~"hotel|hostel|guest_house|motel|apartment"]"#,
            PlaceCategory::Nature => {
                r#"["natural"~"peak|beach|lake|waterfall|spring"]["leisure"~"park|nature_reserve"]"#
            }
            PlaceCategory::Shopping => r#"["shop"~"mall|market|supermarket|clothes|boutique"]"#,
        }
    }
}

impl fmt::Display for PlaceCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// A candidate place reshaped from an Overpass element.
#[skip_serializing_none]
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Place {
    pub id: String,
    pub name: String,
    pub category: PlaceCategory,
    pub lat: f64,
    pub lon: f64,
    pub address: Option<String>,
    pub description: Option<String>,
    pub website: Option<String>,
    pub opening_hours: Option<String>,
    pub cuisine: Option<String>,
    pub stars: Option<String>,
    pub wikipedia: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct GeocodedPlace {
    pub name: String,
    pub lat: f64,
    pub lon: f64,
    pub country: Option<String>,
    pub city: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct DestinationInfo {
    pub destination: GeocodedPlace,
    pub attractions: Vec<Place>,
    pub restaurants: Vec<Place>,
    pub hotels: Vec<Place>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct GeocodeQuery {
    pub q: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct NearbyQuery {
    pub lat: f64,
    pub lon: f64,
    #[serde(default)]
    pub category: PlaceCategory,
    #[serde(default = "default_radius")]
    pub radius: u32,
}

fn default_radius() -> u32 {
    DEFAULT_RADIUS_METERS
}

impl NearbyQuery {
    pub fn validate(&self) -> Result<(), AppError> {
        check_coordinates(self.lat, self.lon)?;
        if self.radius == 0 || self.radius > MAX_RADIUS_METERS {
            return Err(AppError::validation(format!(
                "radius must be between 1 and {MAX_RADIUS_METERS} meters"
            )));
        }
        Ok(())
    }
}

pub fn check_coordinates(lat: f64, lon: f64) -> Result<(), AppError> {
    if !(-90.0..=90.0).contains(&lat) || !(-180.0..=180.0).contains(&lon) {
        return Err(AppError::validation(format!(
            "coordinates out of range: lat {lat}, lon {lon}"
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn nearby_query_bounds() {
        let query = NearbyQuery {
            lat: 48.85,
            lon: 2.35,
            category: PlaceCategory::Food,
            radius: 500,
        };
        assert!(query.validate().is_ok());
        assert!(NearbyQuery { radius: 0, ..query.clone() }.validate().is_err());
        assert!(NearbyQuery { lat: -95.0, ..query.clone() }.validate().is_err());
        assert!(NearbyQuery { radius: MAX_RADIUS_METERS + 1, ..query }
            .validate()
            .is_err());
    }

    #[test]
    fn empty_optional_fields_are_omitted() {
        let place = Place {
            id: "node/1".into(),
            name: "Louvre".into(),
            category: PlaceCategory::Tourism,
            lat: 48.86,
            lon: 2.33,
            address: None,
            description: None,
            website: Some("https://louvre.fr".into()),
            opening_hours: None,
            cuisine: None,
            stars: None,
            wikipedia: None,
        };
        let value = serde_json::to_value(&place).unwrap();
        assert_eq!(value["website"], "https://louvre.fr");
        assert!(value.get("cuisine").is_none());
    }
}
