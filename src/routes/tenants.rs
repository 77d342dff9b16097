use axum::{
    extract::{Path, Query, State},
    response::IntoResponse,
    Json,
};
use chrono::NaiveDate;
use serde_json::{json, Map, Value};

use crate::{
    error::{AppError, AppResult},
    repository::table_service::{create_row, get_row, list_rows, update_row},
    schemas::{
        remove_nulls, serialize_to_map, validate_input, CreateTenantInput, TenantPath,
        TenantsQuery, UpdateTenantInput, VacateTenantInput,
    },
    schemas::clamp_limit_in_range,
    services::audit::write_audit_log,
    state::AppState,
};

pub fn router() -> axum::Router<AppState> {
    axum::Router::new()
        .route(
            "/tenants",
            axum::routing::get(list_tenants).post(create_tenant),
        )
        .route(
            "/tenants/{tenant_id}",
            axum::routing::get(get_tenant).patch(update_tenant),
        )
        .route("/tenants/{tenant_id}/vacate", axum::routing::post(vacate_tenant))
}

async fn list_tenants(
    State(state): State<AppState>,
    Query(query): Query<TenantsQuery>,
) -> AppResult<Json<Value>> {
    let pool = db_pool(&state)?;

    let mut filters = Map::new();
    if let Some(active) = query.active {
        filters.insert("active".to_string(), Value::Bool(active));
    }

    let rows = list_rows(
        pool,
        "tenants",
        Some(&filters),
        clamp_limit_in_range(query.limit, 1, 1000),
        0,
        "created_at",
        false,
    )
    .await?;

    Ok(Json(json!({ "data": rows })))
}

async fn get_tenant(
    State(state): State<AppState>,
    Path(path): Path<TenantPath>,
) -> AppResult<Json<Value>> {
    let pool = db_pool(&state)?;
    let record = get_row(pool, "tenants", &path.tenant_id, "id").await?;
    Ok(Json(record))
}

async fn create_tenant(
    State(state): State<AppState>,
    Json(payload): Json<CreateTenantInput>,
) -> AppResult<impl IntoResponse> {
    validate_input(&payload)?;
    let pool = db_pool(&state)?;

    if parse_date(&payload.occupancy_start_date).is_none() {
        return Err(AppError::BadRequest(
            "occupancy_start_date must be a YYYY-MM-DD date.".to_string(),
        ));
    }

    let mut record = remove_nulls(serialize_to_map(&payload));
    record.insert("active".to_string(), Value::Bool(true));

    // Occupying a property flips it to ocupado and sets the denormalized
    // back-reference.
    if let Some(property_id) = payload.property_id.as_deref() {
        let property = get_row(pool, "properties", property_id, "id").await?;
        if value_str(&property, "occupancy_status") == "ocupado"
            && !value_str(&property, "tenant_id").is_empty()
        {
            return Err(AppError::Conflict(
                "The property already has an assigned tenant.".to_string(),
            ));
        }
    }

    let created = create_row(pool, "tenants", &record).await?;
    let tenant_id = value_str(&created, "id");

    if let Some(property_id) = payload.property_id.as_deref() {
        let mut patch = Map::new();
        patch.insert(
            "occupancy_status".to_string(),
            Value::String("ocupado".to_string()),
        );
        patch.insert("tenant_id".to_string(), Value::String(tenant_id.clone()));
        update_row(pool, "properties", property_id, &patch, "id").await?;
    }

    write_audit_log(
        state.db_pool.as_ref(),
        None,
        "create",
        "tenants",
        Some(&tenant_id),
        None,
        Some(created.clone()),
    )
    .await;

    Ok((axum::http::StatusCode::CREATED, Json(created)))
}

async fn update_tenant(
    State(state): State<AppState>,
    Path(path): Path<TenantPath>,
    Json(payload): Json<UpdateTenantInput>,
) -> AppResult<Json<Value>> {
    let pool = db_pool(&state)?;

    let before = get_row(pool, "tenants", &path.tenant_id, "id").await?;

    if let Some(raw) = payload.occupancy_start_date.as_deref() {
        if parse_date(raw).is_none() {
            return Err(AppError::BadRequest(
                "occupancy_start_date must be a YYYY-MM-DD date.".to_string(),
            ));
        }
    }

    let patch = remove_nulls(serialize_to_map(&payload));
    if patch.is_empty() {
        return Err(AppError::BadRequest("No fields to update.".to_string()));
    }

    let updated = update_row(pool, "tenants", &path.tenant_id, &patch, "id").await?;

    // The occupancy date anchors the whole billing history; changing it
    // must leave a before/after trail.
    write_audit_log(
        state.db_pool.as_ref(),
        None,
        "update",
        "tenants",
        Some(&path.tenant_id),
        Some(before),
        Some(updated.clone()),
    )
    .await;

    state.invalidate_arrears_for(&path.tenant_id).await;

    Ok(Json(updated))
}

async fn vacate_tenant(
    State(state): State<AppState>,
    Path(path): Path<TenantPath>,
    Json(payload): Json<VacateTenantInput>,
) -> AppResult<Json<Value>> {
    let pool = db_pool(&state)?;

    let before = get_row(pool, "tenants", &path.tenant_id, "id").await?;
    if !before
        .as_object()
        .and_then(|obj| obj.get("active"))
        .and_then(Value::as_bool)
        .unwrap_or(false)
    {
        return Err(AppError::UnprocessableEntity(
            "The tenant is already vacated.".to_string(),
        ));
    }

    let vacated_on = match payload.vacated_on.as_deref() {
        Some(raw) => parse_date(raw).ok_or_else(|| {
            AppError::BadRequest("vacated_on must be a YYYY-MM-DD date.".to_string())
        })?,
        None => state.config.business_today(),
    };

    let property_id = value_str(&before, "property_id");

    let mut patch = Map::new();
    patch.insert("active".to_string(), Value::Bool(false));
    patch.insert("property_id".to_string(), Value::Null);
    patch.insert(
        "vacated_on".to_string(),
        Value::String(vacated_on.to_string()),
    );
    let updated = update_row(pool, "tenants", &path.tenant_id, &patch, "id").await?;

    // Free the property for the next occupant.
    if !property_id.is_empty() {
        let mut property_patch = Map::new();
        property_patch.insert(
            "occupancy_status".to_string(),
            Value::String("disponible".to_string()),
        );
        property_patch.insert("tenant_id".to_string(), Value::Null);
        if let Err(error) = update_row(pool, "properties", &property_id, &property_patch, "id").await
        {
            tracing::warn!(%error, property_id = %property_id, "Could not release property on vacate");
        }
    }

    write_audit_log(
        state.db_pool.as_ref(),
        None,
        "vacate",
        "tenants",
        Some(&path.tenant_id),
        Some(before),
        Some(updated.clone()),
    )
    .await;

    state.invalidate_arrears_for(&path.tenant_id).await;

    Ok(Json(updated))
}

fn db_pool(state: &AppState) -> AppResult<&sqlx::PgPool> {
    state.db_pool.as_ref().ok_or_else(|| {
        AppError::Dependency("The database is not configured. Set DATABASE_URL.".to_string())
    })
}

fn parse_date(raw: &str) -> Option<NaiveDate> {
    NaiveDate::parse_from_str(raw.trim(), "%Y-%m-%d").ok()
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
