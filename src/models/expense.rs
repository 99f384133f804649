use std::{fmt, str::FromStr};

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;

use super::{normalize_optional, trip::required_text};
use crate::error::AppError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExpenseCategory {
    Accommodation,
    Food,
    Transport,
    Activities,
    Shopping,
    Other,
}

impl ExpenseCategory {
    pub const ALL: [ExpenseCategory; 6] = [
        ExpenseCategory::Accommodation,
        ExpenseCategory::Food,
        ExpenseCategory::Transport,
        ExpenseCategory::Activities,
        ExpenseCategory::Shopping,
        ExpenseCategory::Other,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            ExpenseCategory::Accommodation => "accommodation",
            ExpenseCategory::Food => "food",
            ExpenseCategory::Transport => "transport",
            ExpenseCategory::Activities => "activities",
            ExpenseCategory::Shopping => "shopping",
            ExpenseCategory::Other => "other",
        }
    }

    pub fn icon(&self) -> &'static str {
        match self {
            ExpenseCategory::Accommodation => "🏨",
            ExpenseCategory::Food => "🍜",
            ExpenseCategory::Transport => "✈️",
            ExpenseCategory::Activities => "🎭",
            ExpenseCategory::Shopping => "🛍️",
            ExpenseCategory::Other => "📦",
        }
    }
}

impl fmt::Display for ExpenseCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for ExpenseCategory {
    type Err = AppError;

    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|category| category.as_str() == raw)
            .ok_or_else(|| AppError::validation(format!("unknown expense category {raw:?}")))
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct Expense {
    pub id: i64,
    pub trip_id: i64,
    pub category: ExpenseCategory,
    pub icon: &'static str,
    pub description: String,
    pub amount: f64,
    pub currency: String,
    pub date: Option<NaiveDate>,
    pub notes: Option<String>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, FromRow)]
pub struct ExpenseRow {
    pub id: i64,
    pub trip_id: i64,
    pub category: String,
    pub description: String,
    pub amount: f64,
    pub currency: String,
    pub date: Option<NaiveDate>,
    pub notes: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl TryFrom<ExpenseRow> for Expense {
    type Error = AppError;

    fn try_from(row: ExpenseRow) -> Result<Self, Self::Error> {
        let category: ExpenseCategory = row.category.parse()?;
        Ok(Self {
            id: row.id,
            trip_id: row.trip_id,
            category,
            icon: category.icon(),
            description: row.description,
            amount: row.amount,
            currency: row.currency,
            date: row.date,
            notes: row.notes,
            created_at: row.created_at,
        })
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct NewExpense {
    pub category: ExpenseCategory,
    pub description: String,
    pub amount: f64,
    #[serde(default)]
    pub currency: Option<String>,
    #[serde(default)]
    pub date: Option<NaiveDate>,
    #[serde(default)]
    pub notes: Option<String>,
}

impl NewExpense {
    pub fn validated(self) -> Result<Self, AppError> {
        check_amount(self.amount)?;
        Ok(Self {
            category: self.category,
            description: required_text("description", self.description)?,
            amount: self.amount,
            currency: self.currency.map(currency_code).transpose()?,
            date: self.date,
            notes: normalize_optional(self.notes),
        })
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct ExpenseUpdate {
    pub category: Option<ExpenseCategory>,
    pub description: Option<String>,
    pub amount: Option<f64>,
    pub currency: Option<String>,
    #[serde(default, with = "::serde_with::rust::double_option")]
    pub date: Option<Option<NaiveDate>>,
    #[serde(default, with = "::serde_with::rust::double_option")]
    pub notes: Option<Option<String>>,
}

impl ExpenseUpdate {
    pub fn apply(self, expense: &mut Expense) -> Result<(), AppError> {
        if let Some(category) = self.category {
            expense.category = category;
            expense.icon = category.icon();
        }
        if let Some(description) = self.description {
            expense.description = required_text("description", description)?;
        }
        if let Some(amount) = self.amount {
            check_amount(amount)?;
            expense.amount = amount;
        }
        if let Some(currency) = self.currency {
            expense.currency = currency_code(currency)?;
        }
        if let Some(date) = self.date {
            expense.date = date;
        }
        if let Some(notes) = self.notes {
            expense.notes = normalize_optional(notes);
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct BudgetSettings {
    pub budget_total: Option<f64>,
    pub budget_currency: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct CategorySummary {
    pub category: ExpenseCategory,
    pub icon: &'static str,
    pub spent: f64,
    pub estimated: f64,
    pub pct_of_budget: Option<f64>,
    pub pct_of_estimate: Option<f64>,
}

#[derive(Debug, Clone, Serialize)]
pub struct BudgetSummary {
    pub budget_total: Option<f64>,
    pub budget_currency: String,
    pub total_spent: f64,
    pub remaining: Option<f64>,
    pub pct_used: Option<f64>,
    pub categories: Vec<CategorySummary>,
    pub estimates: serde_json::Value,
}

#[derive(Debug, Clone, Serialize)]
pub struct BudgetOverview {
    pub summary: BudgetSummary,
    pub expenses: Vec<Expense>,
}

#[derive(Debug, Clone, Serialize)]
pub struct ExpenseChange {
    pub expense: Expense,
    pub summary: BudgetSummary,
}

#[derive(Debug, Clone, Deserialize)]
pub struct EstimateRequest {
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default = "default_travelers")]
    pub travelers: u32,
    #[serde(default)]
    pub duration_days: Option<u32>,
    #[serde(default = "default_travel_style")]
    pub travel_style: String,
}

fn default_travelers() -> u32 {
    1
}

fn default_travel_style() -> String {
    "mid-range".into()
}

#[derive(Debug, Clone, Serialize)]
pub struct EstimateOutcome {
    pub estimates: serde_json::Value,
    pub summary: BudgetSummary,
}

pub(crate) fn check_amount(amount: f64) -> Result<(), AppError> {
    if !amount.is_finite() || amount < 0.0 {
        return Err(AppError::validation("amount must be a non-negative number"));
    }
    Ok(())
}

/// Normalises a currency to its upper-case three-letter code.
pub(crate) fn currency_code(raw: String) -> Result<String, AppError> {
    let code = raw.trim().to_uppercase();
    if code.len() != 3 || !code.chars().all(|c| c.is_ascii_alphabetic()) {
        return Err(AppError::validation(format!(
            "currency must be a three-letter code, got {raw:?}"
        )));
    }
    Ok(code)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn currency_is_upper_cased() {
        assert_eq!(currency_code(" eur ".into()).unwrap(), "EUR");
        assert!(currency_code("euro".into()).is_err());
    }

    #[test]
    fn negative_amounts_are_rejected() {
        let expense = NewExpense {
            category: ExpenseCategory::Food,
            description: "Croissant".into(),
            amount: -2.0,
            currency: None,
            date: None,
            notes: None,
        };
        assert!(matches!(expense.validated(), Err(AppError::Validation(_))));
    }

    #[test]
    fn category_parses_from_storage_text() {
        assert_eq!(
            "transport".parse::<ExpenseCategory>().unwrap(),
            ExpenseCategory::Transport
        );
        assert!("souvenirs".parse::<ExpenseCategory>().is_err());
    }
}
