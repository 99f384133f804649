use std::{fmt, str::FromStr};

use chrono::{NaiveDate, NaiveTime};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;

use super::{normalize_optional, trip::required_text};
use crate::error::AppError;

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct ItineraryDay {
    pub id: i64,
    pub trip_id: i64,
    pub date: NaiveDate,
    pub title: Option<String>,
}

/// A day together with its activities in display order.
#[derive(Debug, Clone, Serialize)]
pub struct DayPlan {
    #[serde(flatten)]
    pub day: ItineraryDay,
    pub activities: Vec<Activity>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct NewDay {
    pub date: NaiveDate,
    #[serde(default)]
    pub title: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct DayUpdate {
    pub date: Option<NaiveDate>,
    #[serde(default, with = "::serde_with::rust::double_option")]
    pub title: Option<Option<String>>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum ActivityKind {
    Sight,
    Meal,
    Lodging,
    Transport,
    #[default]
    Other,
}

impl ActivityKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ActivityKind::Sight => "sight",
            ActivityKind::Meal => "meal",
            ActivityKind::Lodging => "lodging",
            ActivityKind::Transport => "transport",
            ActivityKind::Other => "other",
        }
    }
}

impl fmt::Display for ActivityKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for ActivityKind {
    type Err = AppError;

    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        match raw {
            "sight" => Ok(ActivityKind::Sight),
            "meal" => Ok(ActivityKind::Meal),
            "lodging" => Ok(ActivityKind::Lodging),
            "transport" => Ok(ActivityKind::Transport),
            "other" => Ok(ActivityKind::Other),
            other => Err(AppError::validation(format!("unknown activity type {other:?}"))),
        }
    }
}

/// Where an activity happens: either a free-text place or a coordinate pair.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Location {
    Coordinates { lat: f64, lon: f64 },
    Text(String),
}

impl Location {
    fn validated(self) -> Result<Option<Self>, AppError> {
        match self {
            Location::Coordinates { lat, lon } => {
                super::place::check_coordinates(lat, lon)?;
                Ok(Some(Location::Coordinates { lat, lon }))
            }
            Location::Text(text) => Ok(normalize_optional(Some(text)).map(Location::Text)),
        }
    }

    /// Splits into the `(location_text, lat, lon)` columns.
    pub fn into_columns(location: Option<Location>) -> (Option<String>, Option<f64>, Option<f64>) {
        match location {
            Some(Location::Text(text)) => (Some(text), None, None),
            Some(Location::Coordinates { lat, lon }) => (None, Some(lat), Some(lon)),
            None => (None, None, None),
        }
    }

    fn from_columns(text: Option<String>, lat: Option<f64>, lon: Option<f64>) -> Option<Self> {
        match (text, lat, lon) {
            (_, Some(lat), Some(lon)) => Some(Location::Coordinates { lat, lon }),
            (Some(text), _, _) => Some(Location::Text(text)),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct Activity {
    pub id: i64,
    pub day_id: i64,
    #[serde(with = "hhmm")]
    pub time: NaiveTime,
    #[serde(rename = "type")]
    pub kind: ActivityKind,
    pub title: String,
    pub location: Option<Location>,
    pub notes: Option<String>,
}

#[derive(Debug, FromRow)]
pub struct ActivityRow {
    pub id: i64,
    pub day_id: i64,
    pub time: NaiveTime,
    pub kind: String,
    pub title: String,
    pub location_text: Option<String>,
    pub lat: Option<f64>,
    pub lon: Option<f64>,
    pub notes: Option<String>,
}

impl TryFrom<ActivityRow> for Activity {
    type Error = AppError;

    fn try_from(row: ActivityRow) -> Result<Self, Self::Error> {
        Ok(Self {
            id: row.id,
            day_id: row.day_id,
            time: row.time,
            kind: row.kind.parse()?,
            title: row.title,
            location: Location::from_columns(row.location_text, row.lat, row.lon),
            notes: row.notes,
        })
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct NewActivity {
    #[serde(with = "hhmm")]
    pub time: NaiveTime,
    #[serde(rename = "type", default)]
    pub kind: ActivityKind,
    pub title: String,
    #[serde(default)]
    pub location: Option<Location>,
    #[serde(default)]
    pub notes: Option<String>,
}

impl NewActivity {
    pub fn validated(self) -> Result<Self, AppError> {
        Ok(Self {
            time: self.time,
            kind: self.kind,
            title: required_text("title", self.title)?,
            location: self.location.map(Location::validated).transpose()?.flatten(),
            notes: normalize_optional(self.notes),
        })
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct ActivityUpdate {
    #[serde(default, deserialize_with = "hhmm::deserialize_option")]
    pub time: Option<NaiveTime>,
    #[serde(rename = "type")]
    pub kind: Option<ActivityKind>,
    pub title: Option<String>,
    #[serde(default, with = "::serde_with::rust::double_option")]
    pub location: Option<Option<Location>>,
    #[serde(default, with = "::serde_with::rust::double_option")]
    pub notes: Option<Option<String>>,
}

impl ActivityUpdate {
    pub fn apply(self, activity: &mut Activity) -> Result<(), AppError> {
        if let Some(time) = self.time {
            activity.time = time;
        }
        if let Some(kind) = self.kind {
            activity.kind = kind;
        }
        if let Some(title) = self.title {
            activity.title = required_text("title", title)?;
        }
        if let Some(location) = self.location {
            activity.location = location.map(Location::validated).transpose()?.flatten();
        }
        if let Some(notes) = self.notes {
            activity.notes = normalize_optional(notes);
        }
        Ok(())
    }
}

/// `HH:MM` on the wire; `HH:MM:SS` is accepted on input.
pub mod hhmm {
    use chrono::NaiveTime;
    use serde::{de::Error as _, Deserialize, Deserializer, Serializer};

    const SHORT: &str = "%H:%M";
    const LONG: &str = "%H:%M:%S";

    pub fn parse(raw: &str) -> Option<NaiveTime> {
        let raw = raw.trim();
        NaiveTime::parse_from_str(raw, SHORT)
            .or_else(|_| NaiveTime::parse_from_str(raw, LONG))
            .ok()
    }

    pub fn serialize<S: Serializer>(time: &NaiveTime, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&time.format(SHORT).to_string())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<NaiveTime, D::Error> {
        let raw = String::deserialize(deserializer)?;
        parse(&raw).ok_or_else(|| D::Error::custom(format!("invalid time {raw:?}, expected HH:MM")))
    }

    pub fn deserialize_option<'de, D: Deserializer<'de>>(
        deserializer: D,
    ) -> Result<Option<NaiveTime>, D::Error> {
        match Option::<String>::deserialize(deserializer)? {
            Some(raw) => parse(&raw)
                .map(Some)
                .ok_or_else(|| D::Error::custom(format!("invalid time {raw:?}, expected HH:MM"))),
            None => Ok(None),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_short_and_long_times() {
        let json = r#"{"time": "09:00", "type": "sight", "title": "Louvre"}"#;
        let activity: NewActivity = serde_json::from_str(json).unwrap();
        assert_eq!(activity.time, NaiveTime::from_hms_opt(9, 0, 0).unwrap());
        assert_eq!(activity.kind, ActivityKind::Sight);

        let json = r#"{"time": "14:30:00", "title": "Lunch"}"#;
        let activity: NewActivity = serde_json::from_str(json).unwrap();
        assert_eq!(activity.time, NaiveTime::from_hms_opt(14, 30, 0).unwrap());
        assert_eq!(activity.kind, ActivityKind::Other);
    }

    #[test]
    fn rejects_unknown_activity_type() {
        let json = r#"{"time": "09:00", "type": "party", "title": "Club"}"#;
        assert!(serde_json::from_str::<NewActivity>(json).is_err());
    }

    #[test]
    fn location_accepts_text_or_coordinates() {
        let text: Location = serde_json::from_str(r#""Rue de Rivoli""#).unwrap();
        assert_eq!(text, Location::Text("Rue de Rivoli".into()));

        let coords: Location = serde_json::from_str(r#"{"lat": 48.86, "lon": 2.33}"#).unwrap();
        assert_eq!(coords, Location::Coordinates { lat: 48.86, lon: 2.33 });
    }

    #[test]
    fn out_of_range_coordinates_fail_validation() {
        let activity = NewActivity {
            time: NaiveTime::from_hms_opt(9, 0, 0).unwrap(),
            kind: ActivityKind::Sight,
            title: "Nowhere".into(),
            location: Some(Location::Coordinates { lat: 91.0, lon: 0.0 }),
            notes: None,
        };
        assert!(matches!(activity.validated(), Err(AppError::Validation(_))));
    }

    #[test]
    fn serializes_time_as_hours_and_minutes() {
        let activity = Activity {
            id: 1,
            day_id: 1,
            time: NaiveTime::from_hms_opt(9, 0, 0).unwrap(),
            kind: ActivityKind::Sight,
            title: "Louvre".into(),
            location: None,
            notes: None,
        };
        let value = serde_json::to_value(&activity).unwrap();
        assert_eq!(value["time"], "09:00");
        assert_eq!(value["type"], "sight");
    }

    #[test]
    fn columns_round_trip_location() {
        let coords = Location::Coordinates { lat: 1.0, lon: 2.0 };
        let (text, lat, lon) = Location::into_columns(Some(coords.clone()));
        assert_eq!(Location::from_columns(text, lat, lon), Some(coords));
    }
}
