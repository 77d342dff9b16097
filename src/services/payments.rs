use chrono::NaiveDate;
use serde_json::{json, Map, Value};
use sqlx::PgPool;
use tracing::info;

use crate::error::AppError;
use crate::repository::table_service::{create_row, get_row, list_rows, update_row_guarded};
use crate::services::arrears::{
    AMOUNT_EPSILON, STATUS_PAGADO, STATUS_PARCIAL, STATUS_PENDIENTE, STATUS_VENCIDO,
};
use crate::services::credit_ledger;
use crate::services::obligations::contracted_services;
use crate::services::periods::Period;

pub const ORIGIN_MANUAL: &str = "abono";
pub const ORIGIN_CREDIT: &str = "saldo_a_favor";

/// Status is a deterministic function of the paid amount, the period
/// total and whether the due date has passed. `vencido` outranks
/// `parcial`: a half-paid overdue period is overdue.
pub fn derive_status(amount: f64, amount_paid: f64, due_passed: bool) -> &'static str {
    if amount_paid >= amount - AMOUNT_EPSILON {
        STATUS_PAGADO
    } else if due_passed {
        STATUS_VENCIDO
    } else if amount_paid > AMOUNT_EPSILON {
        STATUS_PARCIAL
    } else {
        STATUS_PENDIENTE
    }
}

/// Split an incoming payment against the period's outstanding balance:
/// what lands on the record (capped at the total) and what spills over
/// into credit.
pub fn split_against_outstanding(amount: f64, total: f64, already_paid: f64) -> (f64, f64) {
    let outstanding = (total - already_paid).max(0.0);
    let applied = amount.min(outstanding);
    (applied, amount - applied)
}

#[derive(Debug, Clone, serde::Serialize)]
pub struct RegisteredPayment {
    pub record: Value,
    /// Portion of the payment that exceeded the period total and became
    /// saldo a favor.
    pub credited: f64,
    pub credit_entry: Option<Value>,
}

/// Register a payment against a (tenant, property, period) record,
/// creating the record with a snapshot of the current obligation when it
/// does not exist yet. Overpayment becomes a credit entry; registering
/// against an already paid period is rejected.
pub async fn register_payment(
    pool: &PgPool,
    tenant_id: &str,
    property_id: &str,
    period: Period,
    amount: f64,
    paid_on: NaiveDate,
    today: NaiveDate,
) -> Result<RegisteredPayment, AppError> {
    if amount <= 0.0 {
        return Err(AppError::BadRequest(
            "Payment amount must be greater than zero.".to_string(),
        ));
    }

    let tenant = get_row(pool, "tenants", tenant_id, "id").await?;
    let property = get_row(pool, "properties", property_id, "id").await?;

    let anchor_day = occupancy_anchor_day(&tenant).unwrap_or(1);
    let due_passed = today > period.due_date(anchor_day);

    let existing = find_period_record(pool, tenant_id, property_id, period).await?;

    let (record, applied, excess) = match existing {
        Some(record) => {
            let status = val_str(&record, "status");
            if status == STATUS_PAGADO {
                return Err(AppError::UnprocessableEntity(format!(
                    "{} is already fully paid for this tenant.",
                    period.label()
                )));
            }

            let total = val_f64(&record, "amount");
            let already_paid = val_f64(&record, "amount_paid");
            let (applied, excess) = split_against_outstanding(amount, total, already_paid);

            let updated = if applied > AMOUNT_EPSILON {
                let new_paid = already_paid + applied;
                let mut installments = installments_of(&record);
                installments.push(installment(applied, paid_on, ORIGIN_MANUAL));

                let mut patch = Map::new();
                patch.insert("amount_paid".to_string(), json!(new_paid));
                patch.insert(
                    "status".to_string(),
                    Value::String(derive_status(total, new_paid, due_passed).to_string()),
                );
                patch.insert("installments".to_string(), Value::Array(installments));
                if derive_status(total, new_paid, due_passed) == STATUS_PAGADO {
                    patch.insert(
                        "paid_at".to_string(),
                        Value::String(chrono::Utc::now().to_rfc3339()),
                    );
                }
                bump_revision(&record, &mut patch);

                update_row_guarded(
                    pool,
                    "payment_records",
                    &val_str(&record, "id"),
                    &patch,
                    "revision",
                    &revision_of(&record),
                )
                .await?
            } else {
                record
            };
            (updated, applied, excess)
        }
        None => {
            // Snapshot the obligation at registration time.
            let total = val_f64(&property, "monthly_rent");
            if total <= 0.0 {
                return Err(AppError::UnprocessableEntity(
                    "The property has no monthly rent configured.".to_string(),
                ));
            }

            let (applied, excess) = split_against_outstanding(amount, total, 0.0);
            let status = derive_status(total, applied, due_passed);

            let mut payload = Map::new();
            payload.insert("tenant_id".to_string(), Value::String(tenant_id.to_string()));
            payload.insert(
                "property_id".to_string(),
                Value::String(property_id.to_string()),
            );
            payload.insert(
                "period_month".to_string(),
                Value::String(period.month_name().to_string()),
            );
            payload.insert("period_year".to_string(), json!(period.year));
            payload.insert("amount".to_string(), json!(total));
            payload.insert("amount_paid".to_string(), json!(applied));
            payload.insert("status".to_string(), Value::String(status.to_string()));
            payload.insert(
                "installments".to_string(),
                Value::Array(if applied > AMOUNT_EPSILON {
                    vec![installment(applied, paid_on, ORIGIN_MANUAL)]
                } else {
                    Vec::new()
                }),
            );
            payload.insert("revision".to_string(), json!(0));
            if status == STATUS_PAGADO {
                payload.insert(
                    "paid_at".to_string(),
                    Value::String(chrono::Utc::now().to_rfc3339()),
                );
            }

            let created = create_row(pool, "payment_records", &payload).await?;
            (created, applied, excess)
        }
    };

    let credit_entry = if excess > AMOUNT_EPSILON {
        let entry = credit_ledger::create_or_merge(
            pool,
            tenant_id,
            excess,
            &format!("Excedente de pago de {}", period.label()),
            paid_on,
        )
        .await?;
        Some(entry)
    } else {
        None
    };

    info!(
        tenant_id = %tenant_id,
        period = %period.label(),
        applied = applied,
        credited = excess,
        "Payment registered"
    );

    Ok(RegisteredPayment {
        record,
        credited: if excess > AMOUNT_EPSILON { excess } else { 0.0 },
        credit_entry,
    })
}

/// Mark one contracted service as paid for a period's record.
pub async fn mark_service_paid(
    pool: &PgPool,
    record_id: &str,
    service_type: &str,
    amount: Option<f64>,
    paid_on: NaiveDate,
) -> Result<Value, AppError> {
    let record = get_row(pool, "payment_records", record_id, "id").await?;
    let tenant = get_row(pool, "tenants", &val_str(&record, "tenant_id"), "id").await?;

    let contracted = contracted_services(&tenant);
    let Some((_, contracted_amount)) = contracted
        .iter()
        .find(|(candidate, _)| candidate == service_type)
    else {
        return Err(AppError::UnprocessableEntity(format!(
            "Service '{service_type}' is not contracted by this tenant."
        )));
    };

    let mut services_paid = record
        .as_object()
        .and_then(|obj| obj.get("services_paid"))
        .and_then(Value::as_object)
        .cloned()
        .unwrap_or_default();
    services_paid.insert(
        service_type.to_string(),
        json!({
            "paid": true,
            "amount": amount.unwrap_or(*contracted_amount),
            "paid_on": paid_on.to_string(),
        }),
    );

    let mut patch = Map::new();
    patch.insert("services_paid".to_string(), Value::Object(services_paid));
    bump_revision(&record, &mut patch);

    update_row_guarded(
        pool,
        "payment_records",
        record_id,
        &patch,
        "revision",
        &revision_of(&record),
    )
    .await
}

/// Mark the period's furniture obligation as paid.
pub async fn mark_furniture_paid(
    pool: &PgPool,
    record_id: &str,
    amount: f64,
    paid_on: NaiveDate,
) -> Result<Value, AppError> {
    let record = get_row(pool, "payment_records", record_id, "id").await?;

    let mut patch = Map::new();
    patch.insert(
        "furniture_paid".to_string(),
        json!({ "amount": amount, "paid_on": paid_on.to_string() }),
    );
    bump_revision(&record, &mut patch);

    update_row_guarded(
        pool,
        "payment_records",
        record_id,
        &patch,
        "revision",
        &revision_of(&record),
    )
    .await
}

pub async fn find_period_record(
    pool: &PgPool,
    tenant_id: &str,
    property_id: &str,
    period: Period,
) -> Result<Option<Value>, AppError> {
    let mut filters = Map::new();
    filters.insert("tenant_id".to_string(), Value::String(tenant_id.to_string()));
    filters.insert(
        "property_id".to_string(),
        Value::String(property_id.to_string()),
    );
    filters.insert(
        "period_month".to_string(),
        Value::String(period.month_name().to_string()),
    );
    filters.insert("period_year".to_string(), json!(period.year));

    let rows = list_rows(
        pool,
        "payment_records",
        Some(&filters),
        1,
        0,
        "created_at",
        true,
    )
    .await?;
    Ok(rows.into_iter().next())
}

pub fn installment(amount: f64, paid_on: NaiveDate, origin: &str) -> Value {
    json!({
        "amount": amount,
        "paid_on": paid_on.to_string(),
        "origin": origin,
    })
}

pub fn installments_of(record: &Value) -> Vec<Value> {
    record
        .as_object()
        .and_then(|obj| obj.get("installments"))
        .and_then(Value::as_array)
        .cloned()
        .unwrap_or_default()
}

/// The optimistic concurrency token on payment records. Every mutation
/// bumps it and guards on the value it read.
pub fn revision_of(record: &Value) -> Value {
    record
        .as_object()
        .and_then(|obj| obj.get("revision"))
        .cloned()
        .unwrap_or(json!(0))
}

pub fn bump_revision(record: &Value, patch: &mut Map<String, Value>) {
    let current = revision_of(record).as_i64().unwrap_or(0);
    patch.insert("revision".to_string(), json!(current + 1));
}

fn occupancy_anchor_day(tenant: &Value) -> Option<u32> {
    let raw = val_str(tenant, "occupancy_start_date");
    chrono::NaiveDate::parse_from_str(&raw, "%Y-%m-%d")
        .ok()
        .map(|date| chrono::Datelike::day(&date))
}

fn val_str(row: &Value, key: &str) -> String {
    row.as_object()
        .and_then(|obj| obj.get(key))
        .and_then(Value::as_str)
        .map(str::trim)
        .filter(|value| !value.is_empty())
        .map(ToOwned::to_owned)
        .unwrap_or_default()
}

fn val_f64(row: &Value, key: &str) -> f64 {
    row.as_object()
        .and_then(|obj| obj.get(key))
        .and_then(|value| {
            value
                .as_f64()
                .or_else(|| value.as_str().and_then(|raw| raw.trim().parse().ok()))
        })
        .unwrap_or(0.0)
}

#[cfg(test)]
mod tests {
    use super::{derive_status, split_against_outstanding};

    #[test]
    fn status_is_a_function_of_paid_vs_total_and_due_date() {
        assert_eq!(derive_status(1000.0, 0.0, false), "pendiente");
        assert_eq!(derive_status(1000.0, 400.0, false), "parcial");
        assert_eq!(derive_status(1000.0, 1000.0, false), "pagado");
        assert_eq!(derive_status(1000.0, 1000.0, true), "pagado");
        assert_eq!(derive_status(1000.0, 400.0, true), "vencido");
        assert_eq!(derive_status(1000.0, 0.0, true), "vencido");
        // Cent-level float dust never demotes a paid record.
        assert_eq!(derive_status(1000.0, 999.995, false), "pagado");
    }

    #[test]
    fn overpayment_is_capped_and_spills_into_credit() {
        // Obligation 1000, payment 1200: record keeps 1000, 200 credits.
        let (applied, excess) = split_against_outstanding(1200.0, 1000.0, 0.0);
        assert_eq!(applied, 1000.0);
        assert_eq!(excess, 200.0);
    }

    #[test]
    fn partial_payments_apply_in_full() {
        let (applied, excess) = split_against_outstanding(300.0, 1000.0, 400.0);
        assert_eq!(applied, 300.0);
        assert_eq!(excess, 0.0);

        let (applied, excess) = split_against_outstanding(700.0, 1000.0, 400.0);
        assert_eq!(applied, 600.0);
        assert_eq!(excess, 100.0);
    }
}
