use axum::{
    extract::{Path, Query, State},
    response::IntoResponse,
    Json,
};
use serde_json::{json, Map, Value};

use crate::{
    error::{AppError, AppResult},
    repository::table_service::{create_row, get_row, list_rows, update_row},
    schemas::{
        clamp_limit_in_range, remove_nulls, serialize_to_map, validate_input,
        CreatePropertyInput, PropertiesQuery, PropertyPath, UpdatePropertyInput,
    },
    services::audit::write_audit_log,
    state::AppState,
};

const OCCUPANCY_STATUSES: &[&str] = &["disponible", "ocupado", "mantenimiento"];

pub fn router() -> axum::Router<AppState> {
    axum::Router::new()
        .route(
            "/properties",
            axum::routing::get(list_properties).post(create_property),
        )
        .route(
            "/properties/{property_id}",
            axum::routing::get(get_property).patch(update_property),
        )
}

async fn list_properties(
    State(state): State<AppState>,
    Query(query): Query<PropertiesQuery>,
) -> AppResult<Json<Value>> {
    let pool = db_pool(&state)?;

    let mut filters = Map::new();
    if let Some(status) = query
        .occupancy_status
        .as_deref()
        .map(str::trim)
        .filter(|value| !value.is_empty())
    {
        filters.insert(
            "occupancy_status".to_string(),
            Value::String(status.to_string()),
        );
    }

    let rows = list_rows(
        pool,
        "properties",
        Some(&filters),
        clamp_limit_in_range(query.limit, 1, 1000),
        0,
        "created_at",
        false,
    )
    .await?;

    Ok(Json(json!({ "data": rows })))
}

async fn get_property(
    State(state): State<AppState>,
    Path(path): Path<PropertyPath>,
) -> AppResult<Json<Value>> {
    let pool = db_pool(&state)?;
    let record = get_row(pool, "properties", &path.property_id, "id").await?;
    Ok(Json(record))
}

async fn create_property(
    State(state): State<AppState>,
    Json(payload): Json<CreatePropertyInput>,
) -> AppResult<impl IntoResponse> {
    validate_input(&payload)?;
    ensure_known_status(&payload.occupancy_status)?;
    if payload.monthly_rent < 0.0 {
        return Err(AppError::BadRequest(
            "monthly_rent cannot be negative.".to_string(),
        ));
    }
    let pool = db_pool(&state)?;

    let record = remove_nulls(serialize_to_map(&payload));
    let created = create_row(pool, "properties", &record).await?;

    write_audit_log(
        state.db_pool.as_ref(),
        None,
        "create",
        "properties",
        Some(&value_str(&created, "id")),
        None,
        Some(created.clone()),
    )
    .await;

    Ok((axum::http::StatusCode::CREATED, Json(created)))
}

async fn update_property(
    State(state): State<AppState>,
    Path(path): Path<PropertyPath>,
    Json(payload): Json<UpdatePropertyInput>,
) -> AppResult<Json<Value>> {
    let pool = db_pool(&state)?;

    if let Some(status) = payload.occupancy_status.as_deref() {
        ensure_known_status(status)?;
    }
    if payload.monthly_rent.is_some_and(|rent| rent < 0.0) {
        return Err(AppError::BadRequest(
            "monthly_rent cannot be negative.".to_string(),
        ));
    }

    let before = get_row(pool, "properties", &path.property_id, "id").await?;

    let patch = remove_nulls(serialize_to_map(&payload));
    if patch.is_empty() {
        return Err(AppError::BadRequest("No fields to update.".to_string()));
    }

    let updated = update_row(pool, "properties", &path.property_id, &patch, "id").await?;

    write_audit_log(
        state.db_pool.as_ref(),
        None,
        "update",
        "properties",
        Some(&path.property_id),
        Some(before),
        Some(updated.clone()),
    )
    .await;

    // Rent changes shift the obligation snapshot for future computations.
    if let Some(tenant_id) = value_str_opt(&updated, "tenant_id") {
        state.invalidate_arrears_for(&tenant_id).await;
    }

    Ok(Json(updated))
}

fn ensure_known_status(status: &str) -> AppResult<()> {
    if OCCUPANCY_STATUSES.contains(&status) {
        Ok(())
    } else {
        Err(AppError::BadRequest(format!(
            "Unknown occupancy status '{status}'. Expected one of: {}.",
            OCCUPANCY_STATUSES.join(", ")
        )))
    }
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

fn value_str_opt(row: &Value, key: &str) -> Option<String> {
    row.as_object()
        .and_then(|obj| obj.get(key))
        .and_then(Value::as_str)
        .map(str::trim)
        .filter(|value| !value.is_empty())
        .map(ToOwned::to_owned)
}
