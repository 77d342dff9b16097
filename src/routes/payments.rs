use axum::{
    extract::{Path, Query, State},
    response::IntoResponse,
    Json,
};
use chrono::NaiveDate;
use serde_json::{json, Map, Value};

use crate::{
    error::{AppError, AppResult},
    repository::table_service::{get_row, list_rows},
    schemas::{
        clamp_limit_in_range, validate_input, MarkFurniturePaidInput, MarkServicePaidInput,
        PaymentPath, PaymentsQuery, RegisterPaymentInput,
    },
    services::audit::write_audit_log,
    services::payments::{mark_furniture_paid, mark_service_paid, register_payment},
    services::periods::Period,
    state::AppState,
};

pub fn router() -> axum::Router<AppState> {
    axum::Router::new()
        .route(
            "/payments",
            axum::routing::get(list_payments).post(register),
        )
        .route("/payments/{payment_id}", axum::routing::get(get_payment))
        .route(
            "/payments/{payment_id}/services",
            axum::routing::post(mark_service),
        )
        .route(
            "/payments/{payment_id}/furniture",
            axum::routing::post(mark_furniture),
        )
}

async fn list_payments(
    State(state): State<AppState>,
    Query(query): Query<PaymentsQuery>,
) -> AppResult<Json<Value>> {
    let pool = db_pool(&state)?;

    let mut filters = Map::new();
    if let Some(tenant_id) = non_empty_opt(query.tenant_id.as_deref()) {
        filters.insert("tenant_id".to_string(), Value::String(tenant_id));
    }
    if let Some(property_id) = non_empty_opt(query.property_id.as_deref()) {
        filters.insert("property_id".to_string(), Value::String(property_id));
    }
    if let Some(status) = non_empty_opt(query.status.as_deref()) {
        filters.insert("status".to_string(), Value::String(status));
    }
    if let Some(year) = query.period_year {
        filters.insert("period_year".to_string(), json!(year));
    }

    let rows = list_rows(
        pool,
        "payment_records",
        Some(&filters),
        clamp_limit_in_range(query.limit, 1, 2000),
        0,
        "created_at",
        false,
    )
    .await?;

    Ok(Json(json!({ "data": rows })))
}

async fn get_payment(
    State(state): State<AppState>,
    Path(path): Path<PaymentPath>,
) -> AppResult<Json<Value>> {
    let pool = db_pool(&state)?;
    let record = get_row(pool, "payment_records", &path.payment_id, "id").await?;
    Ok(Json(record))
}

async fn register(
    State(state): State<AppState>,
    Json(payload): Json<RegisterPaymentInput>,
) -> AppResult<impl IntoResponse> {
    validate_input(&payload)?;
    let pool = db_pool(&state)?;

    let period = Period::from_name_year(&payload.period_month, payload.period_year)
        .ok_or_else(|| {
            AppError::BadRequest(format!(
                "Unknown month name '{}'.",
                payload.period_month
            ))
        })?;

    let today = state.config.business_today();
    let paid_on = parse_date_or(payload.paid_on.as_deref(), today)?;

    let result = register_payment(
        pool,
        &payload.tenant_id,
        &payload.property_id,
        period,
        payload.amount,
        paid_on,
        today,
    )
    .await?;

    write_audit_log(
        state.db_pool.as_ref(),
        None,
        "register_payment",
        "payment_records",
        Some(&value_str(&result.record, "id")),
        None,
        Some(result.record.clone()),
    )
    .await;

    state.invalidate_arrears_for(&payload.tenant_id).await;

    Ok((
        axum::http::StatusCode::CREATED,
        Json(json!({
            "payment": result.record,
            "credited": result.credited,
            "credit_entry": result.credit_entry,
        })),
    ))
}

async fn mark_service(
    State(state): State<AppState>,
    Path(path): Path<PaymentPath>,
    Json(payload): Json<MarkServicePaidInput>,
) -> AppResult<Json<Value>> {
    validate_input(&payload)?;
    let pool = db_pool(&state)?;

    let today = state.config.business_today();
    let paid_on = parse_date_or(payload.paid_on.as_deref(), today)?;

    let updated = mark_service_paid(
        pool,
        &path.payment_id,
        payload.service_type.trim(),
        payload.amount,
        paid_on,
    )
    .await?;

    state
        .invalidate_arrears_for(&value_str(&updated, "tenant_id"))
        .await;

    Ok(Json(updated))
}

async fn mark_furniture(
    State(state): State<AppState>,
    Path(path): Path<PaymentPath>,
    Json(payload): Json<MarkFurniturePaidInput>,
) -> AppResult<Json<Value>> {
    if payload.amount <= 0.0 {
        return Err(AppError::BadRequest(
            "amount must be greater than zero.".to_string(),
        ));
    }
    let pool = db_pool(&state)?;

    let today = state.config.business_today();
    let paid_on = parse_date_or(payload.paid_on.as_deref(), today)?;

    let updated = mark_furniture_paid(pool, &path.payment_id, payload.amount, paid_on).await?;

    state
        .invalidate_arrears_for(&value_str(&updated, "tenant_id"))
        .await;

    Ok(Json(updated))
}

fn parse_date_or(raw: Option<&str>, default: NaiveDate) -> AppResult<NaiveDate> {
    match raw.map(str::trim).filter(|value| !value.is_empty()) {
        Some(raw) => NaiveDate::parse_from_str(raw, "%Y-%m-%d")
            .map_err(|_| AppError::BadRequest("paid_on must be a YYYY-MM-DD date.".to_string())),
        None => Ok(default),
    }
}

fn db_pool(state: &AppState) -> AppResult<&sqlx::PgPool> {
    state.db_pool.as_ref().ok_or_else(|| {
        AppError::Dependency("The database is not configured. Set DATABASE_URL.".to_string())
    })
}

fn non_empty_opt(value: Option<&str>) -> Option<String> {
    value
        .map(str::trim)
        .filter(|item| !item.is_empty())
        .map(ToOwned::to_owned)
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
