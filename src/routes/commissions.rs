use axum::{
    extract::{Query, State},
    Json,
};
use serde_json::Value;

use crate::{
    error::{AppError, AppResult},
    schemas::{validate_input, CommissionQuery, SetCommissionCollectedInput},
    services::audit::write_audit_log,
    services::commissions::{compute_monthly_commission, set_commission_collected, CommissionSummary},
    services::periods::Period,
    state::AppState,
};

pub fn router() -> axum::Router<AppState> {
    axum::Router::new()
        .route("/commissions", axum::routing::get(monthly_summary))
        .route(
            "/commissions/collected",
            axum::routing::post(toggle_collected),
        )
}

async fn monthly_summary(
    State(state): State<AppState>,
    Query(query): Query<CommissionQuery>,
) -> AppResult<Json<CommissionSummary>> {
    validate_input(&query)?;
    let pool = db_pool(&state)?;

    let period = parse_period(&query.period_month, query.period_year)?;
    let summary = compute_monthly_commission(pool, period).await?;
    Ok(Json(summary))
}

async fn toggle_collected(
    State(state): State<AppState>,
    Json(payload): Json<SetCommissionCollectedInput>,
) -> AppResult<Json<Value>> {
    validate_input(&payload)?;
    let pool = db_pool(&state)?;

    let period = parse_period(&payload.period_month, payload.period_year)?;
    let record = set_commission_collected(pool, period, payload.collected).await?;

    write_audit_log(
        state.db_pool.as_ref(),
        None,
        if payload.collected {
            "commission_collected"
        } else {
            "commission_uncollected"
        },
        "commission_records",
        Some(&value_str(&record, "id")),
        None,
        Some(record.clone()),
    )
    .await;

    Ok(Json(record))
}

fn parse_period(month_name: &str, year: i32) -> AppResult<Period> {
    Period::from_name_year(month_name, year)
        .ok_or_else(|| AppError::BadRequest(format!("Unknown month name '{month_name}'.")))
}

fn db_pool(state: &AppState) -> AppResult<&sqlx::PgPool> {
    state.db_pool.as_ref().ok_or_else(|| {
        AppError::Dependency("The database is not configured. Set DATABASE_URL.".to_string())
    })
}

fn value_str(row: &Value, key: &str) -> String {
    row.as_object()
        .and_then(|obj| obj.get(key))
        .and_then(Value::as_str)
        .map(str::trim)
        .filter(|value| !value.is_empty())
        .map(ToOwned::to_owned)
        .unwrap_or_default()
}
