use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use sqlx::{types::Json, FromRow};

use super::normalize_optional;
use crate::error::AppError;

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct Trip {
    pub id: i64,
    pub title: String,
    pub destination: String,
    pub start_date: NaiveDate,
    pub end_date: NaiveDate,
    pub notes: Option<String>,
    pub lat: Option<f64>,
    pub lon: Option<f64>,
    pub budget_total: Option<f64>,
    pub budget_currency: String,
    pub budget_estimates: Option<Json<serde_json::Value>>,
    pub created_at: DateTime<Utc>,
}

impl Trip {
    /// Calendar days covered by the trip, counting both the start and end date.
    pub fn duration_days(&self) -> i64 {
        (self.end_date - self.start_date).num_days() + 1
    }

    pub fn contains_date(&self, date: NaiveDate) -> bool {
        date >= self.start_date && date <= self.end_date
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct NewTrip {
    pub title: String,
    pub destination: String,
    pub start_date: NaiveDate,
    pub end_date: NaiveDate,
    #[serde(default, alias = "description")]
    pub notes: Option<String>,
}

impl NewTrip {
    /// Trims text fields and enforces the date-range invariant.
    pub fn validated(self) -> Result<Self, AppError> {
        let title = required_text("title", self.title)?;
        let destination = required_text("destination", self.destination)?;
        check_date_range(self.start_date, self.end_date)?;
        Ok(Self {
            title,
            destination,
            start_date: self.start_date,
            end_date: self.end_date,
            notes: normalize_optional(self.notes),
        })
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct TripUpdate {
    pub title: Option<String>,
    pub destination: Option<String>,
    pub start_date: Option<NaiveDate>,
    pub end_date: Option<NaiveDate>,
    #[serde(
        default,
        alias = "description",
        with = "::serde_with::rust::double_option"
    )]
    pub notes: Option<Option<String>>,
}

impl TripUpdate {
    /// Applies the update onto `trip` and re-checks the invariants of the merged record.
    pub fn apply(self, trip: &mut Trip) -> Result<(), AppError> {
        if let Some(title) = self.title {
            trip.title = required_text("title", title)?;
        }
        if let Some(destination) = self.destination {
            trip.destination = required_text("destination", destination)?;
        }
        if let Some(start) = self.start_date {
            trip.start_date = start;
        }
        if let Some(end) = self.end_date {
            trip.end_date = end;
        }
        if let Some(notes) = self.notes {
            trip.notes = normalize_optional(notes);
        }
        check_date_range(trip.start_date, trip.end_date)
    }

    pub fn changes_destination(&self) -> bool {
        self.destination.is_some()
    }
}

pub fn check_date_range(start: NaiveDate, end: NaiveDate) -> Result<(), AppError> {
    if end < start {
        return Err(AppError::validation(format!(
            "end_date {end} is before start_date {start}"
        )));
    }
    Ok(())
}

pub(crate) fn required_text(field: &str, value: String) -> Result<String, AppError> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        return Err(AppError::validation(format!("{field} must not be empty")));
    }
    Ok(trimmed.to_string())
}
