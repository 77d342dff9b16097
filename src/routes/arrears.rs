use axum::{
    extract::{Path, State},
    Json,
};
use serde_json::Value;

use crate::{
    error::{AppError, AppResult},
    schemas::TenantPath,
    services::arrears::{roster_arrears, tenant_arrears},
    state::AppState,
};

const ROSTER_CACHE_KEY: &str = "roster";

pub fn router() -> axum::Router<AppState> {
    axum::Router::new()
        .route("/arrears", axum::routing::get(roster_report))
        .route("/arrears/{tenant_id}", axum::routing::get(tenant_report))
}

async fn tenant_report(
    State(state): State<AppState>,
    Path(path): Path<TenantPath>,
) -> AppResult<Json<Value>> {
    if let Some(cached) = state.arrears_cache.get(&path.tenant_id).await {
        return Ok(Json(cached));
    }

    let pool = db_pool(&state)?;
    let summary = tenant_arrears(pool, &path.tenant_id, state.config.business_today()).await?;

    let payload = serde_json::to_value(&summary)
        .map_err(|error| AppError::Internal(format!("Could not serialize arrears: {error}")))?;
    state
        .arrears_cache
        .insert(path.tenant_id.clone(), payload.clone())
        .await;

    Ok(Json(payload))
}

async fn roster_report(State(state): State<AppState>) -> AppResult<Json<Value>> {
    if let Some(cached) = state.arrears_cache.get(ROSTER_CACHE_KEY).await {
        return Ok(Json(cached));
    }

    let pool = db_pool(&state)?;
    let roster = roster_arrears(pool, state.config.business_today()).await?;

    let payload = serde_json::to_value(&roster)
        .map_err(|error| AppError::Internal(format!("Could not serialize arrears: {error}")))?;
    state
        .arrears_cache
        .insert(ROSTER_CACHE_KEY.to_string(), payload.clone())
        .await;

    Ok(Json(payload))
}

fn db_pool(state: &AppState) -> AppResult<&sqlx::PgPool> {
    state.db_pool.as_ref().ok_or_else(|| {
        AppError::Dependency("The database is not configured. Set DATABASE_URL.".to_string())
    })
}
