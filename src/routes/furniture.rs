use axum::{
    extract::{Path, State},
    response::IntoResponse,
    Json,
};
use serde_json::{json, Map, Value};

use crate::{
    error::{AppError, AppResult},
    repository::table_service::{create_row, get_row, list_rows, update_row},
    schemas::{
        remove_nulls, serialize_to_map, validate_input, AssignFurnitureInput,
        CreateFurnitureItemInput, FurnitureItemPath, UpdateFurnitureItemInput,
    },
    services::audit::write_audit_log,
    state::AppState,
};

pub fn router() -> axum::Router<AppState> {
    axum::Router::new()
        .route(
            "/furniture",
            axum::routing::get(list_items).post(create_item),
        )
        .route(
            "/furniture/{item_id}",
            axum::routing::get(get_item).patch(update_item),
        )
        .route(
            "/furniture/{item_id}/assignments",
            axum::routing::post(assign_item),
        )
        .route(
            "/furniture/{item_id}/assignments/{tenant_id}",
            axum::routing::delete(unassign_item),
        )
}

async fn list_items(State(state): State<AppState>) -> AppResult<Json<Value>> {
    let pool = db_pool(&state)?;
    let rows = list_rows(pool, "furniture_items", None, 1000, 0, "created_at", false).await?;
    Ok(Json(json!({ "data": rows })))
}

async fn get_item(
    State(state): State<AppState>,
    Path(path): Path<FurnitureItemPath>,
) -> AppResult<Json<Value>> {
    let pool = db_pool(&state)?;
    let record = get_row(pool, "furniture_items", &path.item_id, "id").await?;
    Ok(Json(record))
}

async fn create_item(
    State(state): State<AppState>,
    Json(payload): Json<CreateFurnitureItemInput>,
) -> AppResult<impl IntoResponse> {
    validate_input(&payload)?;
    if payload.monthly_cost < 0.0 {
        return Err(AppError::BadRequest(
            "monthly_cost cannot be negative.".to_string(),
        ));
    }
    let pool = db_pool(&state)?;

    let mut record = remove_nulls(serialize_to_map(&payload));
    record.insert("assignments".to_string(), Value::Array(Vec::new()));
    let created = create_row(pool, "furniture_items", &record).await?;

    Ok((axum::http::StatusCode::CREATED, Json(created)))
}

async fn update_item(
    State(state): State<AppState>,
    Path(path): Path<FurnitureItemPath>,
    Json(payload): Json<UpdateFurnitureItemInput>,
) -> AppResult<Json<Value>> {
    let pool = db_pool(&state)?;

    if payload.monthly_cost.is_some_and(|cost| cost < 0.0) {
        return Err(AppError::BadRequest(
            "monthly_cost cannot be negative.".to_string(),
        ));
    }

    let patch = remove_nulls(serialize_to_map(&payload));
    if patch.is_empty() {
        return Err(AppError::BadRequest("No fields to update.".to_string()));
    }

    let updated = update_row(pool, "furniture_items", &path.item_id, &patch, "id").await?;
    Ok(Json(updated))
}

/// Assign (or re-quantify) an item for a tenant. An existing active
/// assignment for the tenant is updated in place instead of duplicated.
async fn assign_item(
    State(state): State<AppState>,
    Path(path): Path<FurnitureItemPath>,
    Json(payload): Json<AssignFurnitureInput>,
) -> AppResult<Json<Value>> {
    validate_input(&payload)?;
    let pool = db_pool(&state)?;

    // Ensure the tenant exists before wiring the assignment.
    let _ = get_row(pool, "tenants", &payload.tenant_id, "id").await?;

    let item = get_row(pool, "furniture_items", &path.item_id, "id").await?;
    let mut assignments = assignments_of(&item);

    let mut replaced = false;
    for assignment in assignments.iter_mut() {
        if value_str(assignment, "tenant_id") == payload.tenant_id {
            if let Some(fields) = assignment.as_object_mut() {
                fields.insert("quantity".to_string(), json!(payload.quantity));
                fields.insert("active".to_string(), Value::Bool(true));
            }
            replaced = true;
            break;
        }
    }
    if !replaced {
        assignments.push(json!({
            "tenant_id": payload.tenant_id,
            "quantity": payload.quantity,
            "active": true,
        }));
    }

    let mut patch = Map::new();
    patch.insert("assignments".to_string(), Value::Array(assignments));
    let updated = update_row(pool, "furniture_items", &path.item_id, &patch, "id").await?;

    write_audit_log(
        state.db_pool.as_ref(),
        None,
        "assign",
        "furniture_items",
        Some(&path.item_id),
        Some(item),
        Some(updated.clone()),
    )
    .await;

    state.invalidate_arrears_for(&payload.tenant_id).await;

    Ok(Json(updated))
}

/// Deactivate a tenant's assignment. History stays on the record; only
/// active assignments contribute to obligations.
async fn unassign_item(
    State(state): State<AppState>,
    Path((item_id, tenant_id)): Path<(String, String)>,
) -> AppResult<Json<Value>> {
    let pool = db_pool(&state)?;

    let item = get_row(pool, "furniture_items", &item_id, "id").await?;
    let mut assignments = assignments_of(&item);

    let mut found = false;
    for assignment in assignments.iter_mut() {
        if value_str(assignment, "tenant_id") == tenant_id {
            if let Some(fields) = assignment.as_object_mut() {
                fields.insert("active".to_string(), Value::Bool(false));
            }
            found = true;
        }
    }
    if !found {
        return Err(AppError::NotFound(
            "The tenant has no assignment for this item.".to_string(),
        ));
    }

    let mut patch = Map::new();
    patch.insert("assignments".to_string(), Value::Array(assignments));
    let updated = update_row(pool, "furniture_items", &item_id, &patch, "id").await?;

    state.invalidate_arrears_for(&tenant_id).await;

    Ok(Json(updated))
}

fn assignments_of(item: &Value) -> Vec<Value> {
    item.as_object()
        .and_then(|obj| obj.get("assignments"))
        .and_then(Value::as_array)
        .cloned()
        .unwrap_or_default()
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
