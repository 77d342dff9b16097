use axum::{
    extract::{Path, Query, State},
    response::IntoResponse,
    Json,
};
use serde_json::{json, Value};

use crate::{
    error::{AppError, AppResult},
    schemas::{validate_input, ApplyCreditInput, CreateCreditInput, CreditPath, CreditsQuery},
    services::audit::write_audit_log,
    services::credit_ledger::{apply_credit, create_or_merge, tenant_entries, ApplicationResult},
    state::AppState,
};

pub fn router() -> axum::Router<AppState> {
    axum::Router::new()
        .route(
            "/credits",
            axum::routing::get(list_credits).post(create_credit),
        )
        .route("/credits/{entry_id}/apply", axum::routing::post(apply))
}

async fn list_credits(
    State(state): State<AppState>,
    Query(query): Query<CreditsQuery>,
) -> AppResult<Json<Value>> {
    let pool = db_pool(&state)?;

    let mut entries = tenant_entries(pool, query.tenant_id.trim()).await?;
    if !query.include_exhausted {
        entries.retain(|entry| {
            entry
                .as_object()
                .and_then(|obj| obj.get("amount_remaining"))
                .and_then(Value::as_f64)
                .unwrap_or(0.0)
                > 0.0
        });
    }

    Ok(Json(json!({ "data": entries })))
}

/// Record a standalone saldo a favor (outside the overpayment flow).
async fn create_credit(
    State(state): State<AppState>,
    Json(payload): Json<CreateCreditInput>,
) -> AppResult<impl IntoResponse> {
    validate_input(&payload)?;
    let pool = db_pool(&state)?;

    let created_on = match payload.created_on.as_deref().map(str::trim) {
        Some(raw) if !raw.is_empty() => chrono::NaiveDate::parse_from_str(raw, "%Y-%m-%d")
            .map_err(|_| {
                AppError::BadRequest("created_on must be a YYYY-MM-DD date.".to_string())
            })?,
        _ => state.config.business_today(),
    };

    let entry = create_or_merge(
        pool,
        payload.tenant_id.trim(),
        payload.amount,
        payload.description.trim(),
        created_on,
    )
    .await?;

    write_audit_log(
        state.db_pool.as_ref(),
        None,
        "create_credit",
        "credit_balances",
        Some(&value_str(&entry, "id")),
        None,
        Some(entry.clone()),
    )
    .await;

    Ok((axum::http::StatusCode::CREATED, Json(entry)))
}

async fn apply(
    State(state): State<AppState>,
    Path(path): Path<CreditPath>,
    Json(payload): Json<ApplyCreditInput>,
) -> AppResult<Json<ApplicationResult>> {
    let pool = db_pool(&state)?;
    let today = state.config.business_today();

    let result = apply_credit(pool, &path.entry_id, payload.tenant_id.trim(), today).await?;

    if let ApplicationResult::Applied { .. } = &result {
        write_audit_log(
            state.db_pool.as_ref(),
            None,
            "apply_credit",
            "credit_balances",
            Some(&path.entry_id),
            None,
            serde_json::to_value(&result).ok(),
        )
        .await;
        state.invalidate_arrears_for(payload.tenant_id.trim()).await;
    }

    Ok(Json(result))
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
