use axum::{
    extract::State,
    http::StatusCode,
    routing::{get, post, put},
    Json, Router,
};
use tracing::info;

use crate::{
    error::AppError,
    models::expense::{
        BudgetOverview, BudgetSettings, BudgetSummary, EstimateOutcome, EstimateRequest,
        ExpenseChange, ExpenseUpdate, NewExpense,
    },
    routes::extract::{AppJson, AppPath},
    state::AppState,
};

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/:trip_id/budget", get(overview).patch(update_settings))
        .route("/:trip_id/budget/estimate", post(estimate))
        .route("/:trip_id/expenses", post(add_expense))
        .route(
            "/:trip_id/expenses/:expense_id",
            put(update_expense).delete(delete_expense),
        )
}

async fn overview(
    State(state): State<AppState>,
    AppPath(trip_id): AppPath<i64>,
) -> Result<Json<BudgetOverview>, AppError> {
    Ok(Json(state.budget.overview(trip_id).await?))
}

async fn update_settings(
    State(state): State<AppState>,
    AppPath(trip_id): AppPath<i64>,
    AppJson(settings): AppJson<BudgetSettings>,
) -> Result<Json<BudgetSummary>, AppError> {
    Ok(Json(state.budget.update_settings(trip_id, settings).await?))
}

async fn estimate(
    State(state): State<AppState>,
    AppPath(trip_id): AppPath<i64>,
    AppJson(request): AppJson<EstimateRequest>,
) -> Result<Json<EstimateOutcome>, AppError> {
    let outcome = state
        .budget
        .estimate(trip_id, request, &state.ollama)
        .await?;
    info!(trip_id, "stored cost estimates");
    Ok(Json(outcome))
}

async fn add_expense(
    State(state): State<AppState>,
    AppPath(trip_id): AppPath<i64>,
    AppJson(input): AppJson<NewExpense>,
) -> Result<(StatusCode, Json<ExpenseChange>), AppError> {
    let change = state.budget.add_expense(trip_id, input).await?;
    Ok((StatusCode::CREATED, Json(change)))
}

async fn update_expense(
    State(state): State<AppState>,
    AppPath((trip_id, expense_id)): AppPath<(i64, i64)>,
    AppJson(update): AppJson<ExpenseUpdate>,
) -> Result<Json<ExpenseChange>, AppError> {
    Ok(Json(
        state
            .budget
            .update_expense(trip_id, expense_id, update)
            .await?,
    ))
}

async fn delete_expense(
    State(state): State<AppState>,
    AppPath((trip_id, expense_id)): AppPath<(i64, i64)>,
) -> Result<Json<BudgetSummary>, AppError> {
    Ok(Json(state.budget.delete_expense(trip_id, expense_id).await?))
}
