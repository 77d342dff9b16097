use serde_json::{Map, Value};
use sqlx::PgPool;

use crate::repository::table_service::create_row;

/// Best-effort audit writer: failures are logged, never surfaced, so an
/// audit hiccup cannot fail the mutation it describes.
#[allow(clippy::too_many_arguments)]
pub async fn write_audit_log(
    pool: Option<&PgPool>,
    actor: Option<&str>,
    action: &str,
    entity_type: &str,
    entity_id: Option<&str>,
    before_state: Option<Value>,
    after_state: Option<Value>,
) {
    let Some(pool) = pool else {
        return;
    };

    let mut payload = Map::new();
    if let Some(actor) = actor {
        payload.insert("actor".to_string(), Value::String(actor.to_string()));
    }
    payload.insert("action".to_string(), Value::String(action.to_string()));
    payload.insert(
        "entity_type".to_string(),
        Value::String(entity_type.to_string()),
    );
    if let Some(entity_id) = entity_id {
        payload.insert("entity_id".to_string(), Value::String(entity_id.to_string()));
    }
    if let Some(before) = before_state {
        payload.insert("before_state".to_string(), before);
    }
    if let Some(after) = after_state {
        payload.insert("after_state".to_string(), after);
    }

    if let Err(error) = create_row(pool, "audit_logs", &payload).await {
        tracing::warn!(%error, entity_type, action, "Could not write audit log");
    }
}
