use std::collections::HashMap;

use chrono::Utc;
use serde_json::{json, Value};
use sqlx::types::Json;

use crate::{
    db::DbPool,
    error::AppError,
    models::{
        chat::ChatMessage,
        expense::{
            check_amount, currency_code, BudgetOverview, BudgetSettings, BudgetSummary,
            CategorySummary, EstimateOutcome, EstimateRequest, Expense, ExpenseCategory,
            ExpenseChange, ExpenseRow, ExpenseUpdate, NewExpense,
        },
        trip::Trip,
    },
    services::{ollama::OllamaClient, relay::SYSTEM_PROMPT, trips::TripStore},
};

const EXPENSE_COLUMNS: &str =
    "id, trip_id, category, description, amount, currency, date, notes, created_at";

#[derive(Clone)]
pub struct BudgetStore {
    db: DbPool,
    trips: TripStore,
}

impl BudgetStore {
    pub fn new(db: DbPool) -> Self {
        let trips = TripStore::new(db.clone());
        Self { db, trips }
    }

    pub async fn overview(&self, trip_id: i64) -> Result<BudgetOverview, AppError> {
        let trip = self.trips.get_trip(trip_id).await?;
        let expenses = self.list_expenses(trip_id).await?;
        Ok(BudgetOverview {
            summary: summarize(&trip, &expenses),
            expenses,
        })
    }

    pub async fn summary(&self, trip_id: i64) -> Result<BudgetSummary, AppError> {
        Ok(self.overview(trip_id).await?.summary)
    }

    /// Newest first; empty for an unknown trip.
    pub async fn list_expenses(&self, trip_id: i64) -> Result<Vec<Expense>, AppError> {
        let rows = sqlx::query_as::<_, ExpenseRow>(&format!(
            "SELECT {EXPENSE_COLUMNS} FROM expenses WHERE trip_id = ?1 ORDER BY created_at DESC, id DESC"
        ))
        .bind(trip_id)
        .fetch_all(&self.db)
        .await?;
        rows.into_iter().map(Expense::try_from).collect()
    }

    pub async fn update_settings(
        &self,
        trip_id: i64,
        settings: BudgetSettings,
    ) -> Result<BudgetSummary, AppError> {
        let mut trip = self.trips.get_trip(trip_id).await?;
        if let Some(total) = settings.budget_total {
            check_amount(total)?;
            trip.budget_total = Some(total);
        }
        if let Some(currency) = settings.budget_currency {
            trip.budget_currency = currency_code(currency)?;
        }
        sqlx::query("UPDATE trips SET budget_total = ?1, budget_currency = ?2 WHERE id = ?3")
            .bind(trip.budget_total)
            .bind(&trip.budget_currency)
            .bind(trip_id)
            .execute(&self.db)
            .await?;
        self.summary(trip_id).await
    }

    /// Stores model-produced estimates; an unset or zero total is taken from the estimate.
    pub async fn save_estimates(
        &self,
        trip_id: i64,
        estimates: Value,
    ) -> Result<BudgetSummary, AppError> {
        let trip = self.trips.get_trip(trip_id).await?;
        let total = trip
            .budget_total
            .filter(|total| *total > 0.0)
            .or_else(|| estimates.get("total").and_then(Value::as_f64))
            .filter(|total| *total >= 0.0);
        sqlx::query("UPDATE trips SET budget_estimates = ?1, budget_total = ?2 WHERE id = ?3")
            .bind(Json(&estimates))
            .bind(total)
            .bind(trip_id)
            .execute(&self.db)
            .await?;
        self.summary(trip_id).await
    }

    /// Asks the model for per-category cost estimates and stores them on the trip.
    pub async fn estimate(
        &self,
        trip_id: i64,
        request: EstimateRequest,
        model: &OllamaClient,
    ) -> Result<EstimateOutcome, AppError> {
        let trip = self.trips.get_trip(trip_id).await?;
        let messages = vec![
            ChatMessage::system(SYSTEM_PROMPT),
            ChatMessage::user(estimate_prompt(&trip, &request)),
        ];
        let generated = model
            .generate_structured(messages, request.model, Some(estimate_schema()))
            .await?;
        if !generated.result.is_object() {
            return Err(AppError::validation(
                "could not read cost estimates from the model response",
            ));
        }
        let summary = self.save_estimates(trip_id, generated.result.clone()).await?;
        Ok(EstimateOutcome {
            estimates: generated.result,
            summary,
        })
    }

    pub async fn add_expense(
        &self,
        trip_id: i64,
        input: NewExpense,
    ) -> Result<ExpenseChange, AppError> {
        let input = input.validated()?;
        let trip = self.trips.get_trip(trip_id).await?;
        let currency = input.currency.unwrap_or(trip.budget_currency);
        let row = sqlx::query_as::<_, ExpenseRow>(&format!(
            "INSERT INTO expenses (trip_id, category, description, amount, currency, date, notes, created_at) \
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8) RETURNING {EXPENSE_COLUMNS}"
        ))
        .bind(trip_id)
        .bind(input.category.as_str())
        .bind(&input.description)
        .bind(input.amount)
        .bind(&currency)
        .bind(input.date)
        .bind(&input.notes)
        .bind(Utc::now())
        .fetch_one(&self.db)
        .await?;
        Ok(ExpenseChange {
            expense: Expense::try_from(row)?,
            summary: self.summary(trip_id).await?,
        })
    }

    pub async fn update_expense(
        &self,
        trip_id: i64,
        expense_id: i64,
        update: ExpenseUpdate,
    ) -> Result<ExpenseChange, AppError> {
        let mut expense = self.get_expense(trip_id, expense_id).await?;
        update.apply(&mut expense)?;
        sqlx::query(
            "UPDATE expenses SET category = ?1, description = ?2, amount = ?3, currency = ?4, \
             date = ?5, notes = ?6 WHERE id = ?7 AND trip_id = ?8",
        )
        .bind(expense.category.as_str())
        .bind(&expense.description)
        .bind(expense.amount)
        .bind(&expense.currency)
        .bind(expense.date)
        .bind(&expense.notes)
        .bind(expense_id)
        .bind(trip_id)
        .execute(&self.db)
        .await?;
        Ok(ExpenseChange {
            expense,
            summary: self.summary(trip_id).await?,
        })
    }

    pub async fn delete_expense(
        &self,
        trip_id: i64,
        expense_id: i64,
    ) -> Result<BudgetSummary, AppError> {
        let result = sqlx::query("DELETE FROM expenses WHERE id = ?1 AND trip_id = ?2")
            .bind(expense_id)
            .bind(trip_id)
            .execute(&self.db)
            .await?;
        if result.rows_affected() == 0 {
            return Err(expense_not_found(trip_id, expense_id));
        }
        self.summary(trip_id).await
    }

    async fn get_expense(&self, trip_id: i64, expense_id: i64) -> Result<Expense, AppError> {
        let row = sqlx::query_as::<_, ExpenseRow>(&format!(
            "SELECT {EXPENSE_COLUMNS} FROM expenses WHERE id = ?1 AND trip_id = ?2"
        ))
        .bind(expense_id)
        .bind(trip_id)
        .fetch_optional(&self.db)
        .await?;
        match row {
            Some(row) => Expense::try_from(row),
            None => {
                // distinguish a missing trip from a missing expense
                self.trips.get_trip(trip_id).await?;
                Err(expense_not_found(trip_id, expense_id))
            }
        }
    }
}

fn expense_not_found(trip_id: i64, expense_id: i64) -> AppError {
    AppError::not_found(format!("expense {expense_id} of trip {trip_id}"))
}

/// Spending per category against the budget total and the stored estimates.
pub fn summarize(trip: &Trip, expenses: &[Expense]) -> BudgetSummary {
    let mut by_category: HashMap<ExpenseCategory, f64> = HashMap::new();
    for expense in expenses {
        *by_category.entry(expense.category).or_default() += expense.amount;
    }
    let total_spent: f64 = by_category.values().sum();
    let estimates = trip
        .budget_estimates
        .as_ref()
        .map(|Json(value)| value.clone())
        .unwrap_or_else(|| json!({}));
    let budget = trip.budget_total.filter(|total| *total > 0.0);

    let categories = ExpenseCategory::ALL
        .into_iter()
        .map(|category| {
            let spent = by_category.get(&category).copied().unwrap_or(0.0);
            let estimated = estimates
                .get(category.as_str())
                .and_then(|entry| entry.get("amount"))
                .and_then(Value::as_f64)
                .unwrap_or(0.0);
            CategorySummary {
                category,
                icon: category.icon(),
                spent,
                estimated,
                pct_of_budget: budget.map(|total| round_to(spent / total * 100.0, 1)),
                pct_of_estimate: (estimated > 0.0)
                    .then(|| round_to(spent / estimated * 100.0, 1)),
            }
        })
        .collect();

    BudgetSummary {
        budget_total: trip.budget_total,
        budget_currency: trip.budget_currency.clone(),
        total_spent: round_to(total_spent, 2),
        remaining: budget.map(|total| round_to(total - total_spent, 2)),
        pct_used: budget.map(|total| round_to(total_spent / total * 100.0, 1)),
        categories,
        estimates,
    }
}

pub fn estimate_prompt(trip: &Trip, request: &EstimateRequest) -> String {
    let duration = request
        .duration_days
        .map(i64::from)
        .filter(|days| *days > 0)
        .unwrap_or_else(|| trip.duration_days());
    format!(
        "You are an expert travel budget estimator.

Estimate realistic travel costs for this trip in {currency}:
- Destination: {destination}
- Duration: {duration} days
- Travelers: {travelers}
- Travel style: {style}

Provide per-person total costs for the entire trip duration for each category.
Base your estimates on current real-world prices for {destination}.
Be specific and realistic, neither overly conservative nor inflated.

Return a JSON object with cost estimates and brief notes for each category.",
        currency = trip.budget_currency,
        destination = trip.destination,
        travelers = request.travelers.max(1),
        style = request.travel_style,
    )
}

/// JSON schema the model's estimate must follow.
pub fn estimate_schema() -> Value {
    let entry = json!({
        "type": "object",
        "properties": {
            "amount": {"type": "number"},
            "notes": {"type": "string"},
        },
        "required": ["amount", "notes"],
    });
    let mut properties = serde_json::Map::new();
    for category in ExpenseCategory::ALL {
        properties.insert(category.as_str().to_string(), entry.clone());
    }
    properties.insert("total".into(), json!({"type": "number"}));
    properties.insert("currency".into(), json!({"type": "string"}));
    properties.insert("summary".into(), json!({"type": "string"}));
    json!({
        "type": "object",
        "properties": properties,
        "required": ["accommodation", "food", "transport", "activities", "total", "currency", "summary"],
    })
}

fn round_to(value: f64, places: i32) -> f64 {
    let factor = 10f64.powi(places);
    (value * factor).round() / factor
}
