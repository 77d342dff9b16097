use chrono::NaiveDate;
use serde_json::{json, Map, Value};
use sqlx::PgPool;
use tracing::{info, warn};

use crate::error::AppError;
use crate::repository::table_service::{create_row, get_row, list_rows, update_row_guarded};
use crate::services::arrears::{AMOUNT_EPSILON, STATUS_PAGADO};
use crate::services::payments::{
    bump_revision, derive_status, installment, installments_of, revision_of, ORIGIN_CREDIT,
};
use crate::services::periods::{record_period, Period};

const OUTSTANDING_STATUSES: &[&str] = &["pendiente", "parcial", "vencido"];

/// Create a saldo a favor entry, or grow the tenant's active one. The
/// ledger keeps at most one entry with a positive remaining balance per
/// tenant: new overpayments merge into it instead of opening a second.
pub async fn create_or_merge(
    pool: &PgPool,
    tenant_id: &str,
    amount: f64,
    description: &str,
    created_on: NaiveDate,
) -> Result<Value, AppError> {
    if amount <= 0.0 {
        return Err(AppError::BadRequest(
            "Credit amount must be greater than zero.".to_string(),
        ));
    }

    let entries = tenant_entries(pool, tenant_id).await?;
    if let Some(active) = find_active_entry(&entries) {
        let remaining = val_f64(active, "amount_remaining");
        let original = val_f64(active, "amount_original");
        let merged_description = merge_description(&val_str(active, "description"), description);

        let mut patch = Map::new();
        patch.insert("amount_remaining".to_string(), json!(remaining + amount));
        patch.insert("amount_original".to_string(), json!(original + amount));
        patch.insert("description".to_string(), Value::String(merged_description));

        // Guard on the remaining balance: a concurrent application or
        // merge loses nothing silently.
        return update_row_guarded(
            pool,
            "credit_balances",
            &val_str(active, "id"),
            &patch,
            "amount_remaining",
            &json!(remaining),
        )
        .await;
    }

    let mut payload = Map::new();
    payload.insert("tenant_id".to_string(), Value::String(tenant_id.to_string()));
    payload.insert("amount_original".to_string(), json!(amount));
    payload.insert("amount_remaining".to_string(), json!(amount));
    payload.insert(
        "description".to_string(),
        Value::String(description.to_string()),
    );
    payload.insert(
        "created_on".to_string(),
        Value::String(created_on.to_string()),
    );
    payload.insert("applications".to_string(), Value::Array(Vec::new()));

    create_row(pool, "credit_balances", &payload).await
}

#[derive(Debug, Clone, PartialEq, serde::Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum ApplicationResult {
    /// The credit paid down exactly one record.
    Applied {
        payment_record_id: String,
        period_month: String,
        period_year: i32,
        applied_amount: f64,
        entry_remaining: f64,
    },
    /// Valid request, nothing outstanding to consume the credit (or the
    /// entry is exhausted). No mutation happened.
    NothingToApply { reason: String },
}

/// What one ApplyCredit call would do, given the entry and the tenant's
/// payment records. Pure selection logic: the chronologically-first
/// outstanding record receives `min(remaining, outstanding)`.
pub fn application_plan(entry: &Value, records: &[Value]) -> ApplicationPlan {
    let remaining = val_f64(entry, "amount_remaining");
    if remaining <= AMOUNT_EPSILON {
        return ApplicationPlan::Nothing {
            reason: "The credit entry has no remaining balance.".to_string(),
        };
    }

    let mut outstanding: Vec<(Period, &Value, f64)> = records
        .iter()
        .filter(|record| {
            OUTSTANDING_STATUSES.contains(&val_str(record, "status").as_str())
        })
        .filter_map(|record| {
            let period = match record_period(record) {
                Some(period) => period,
                None => {
                    warn!(
                        record_id = %val_str(record, "id"),
                        "Payment record has an unrecognized period, skipping for credit application"
                    );
                    return None;
                }
            };
            let due = (val_f64(record, "amount") - val_f64(record, "amount_paid")).max(0.0);
            if due > AMOUNT_EPSILON {
                Some((period, record, due))
            } else {
                None
            }
        })
        .collect();

    if outstanding.is_empty() {
        return ApplicationPlan::Nothing {
            reason: "The tenant has no outstanding payment records.".to_string(),
        };
    }

    // Deterministic order: oldest period first, never store order.
    outstanding.sort_by_key(|(period, _, _)| *period);
    let (period, record, due) = outstanding.remove(0);

    ApplicationPlan::Apply {
        payment_record_id: val_str(record, "id"),
        period,
        applied: remaining.min(due),
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum ApplicationPlan {
    Apply {
        payment_record_id: String,
        period: Period,
        applied: f64,
    },
    Nothing {
        reason: String,
    },
}

/// Apply a credit entry against the tenant's oldest outstanding payment
/// record. Single record per call. The entry's remaining balance is
/// re-verified at write time (conditional update), so two racing
/// applications cannot double-spend.
pub async fn apply_credit(
    pool: &PgPool,
    entry_id: &str,
    tenant_id: &str,
    today: NaiveDate,
) -> Result<ApplicationResult, AppError> {
    let entry = get_row(pool, "credit_balances", entry_id, "id").await?;
    if val_str(&entry, "tenant_id") != tenant_id {
        return Err(AppError::BadRequest(
            "The credit entry does not belong to this tenant.".to_string(),
        ));
    }

    let mut filters = Map::new();
    filters.insert("tenant_id".to_string(), Value::String(tenant_id.to_string()));
    let records = list_rows(
        pool,
        "payment_records",
        Some(&filters),
        2000,
        0,
        "created_at",
        true,
    )
    .await?;

    let (payment_record_id, period, applied) = match application_plan(&entry, &records) {
        ApplicationPlan::Nothing { reason } => {
            return Ok(ApplicationResult::NothingToApply { reason });
        }
        ApplicationPlan::Apply {
            payment_record_id,
            period,
            applied,
        } => (payment_record_id, period, applied),
    };

    // Burn the credit first under a CAS on the remaining balance; the
    // record update follows. If the record side loses its own race the
    // burn is compensated below.
    let remaining = val_f64(&entry, "amount_remaining");
    let mut applications = applications_of(&entry);
    applications.push(json!({
        "payment_record_id": payment_record_id,
        "amount": applied,
        "applied_on": today.to_string(),
    }));

    let mut entry_patch = Map::new();
    entry_patch.insert("amount_remaining".to_string(), json!(remaining - applied));
    entry_patch.insert("applications".to_string(), Value::Array(applications));
    let updated_entry = update_row_guarded(
        pool,
        "credit_balances",
        entry_id,
        &entry_patch,
        "amount_remaining",
        &json!(remaining),
    )
    .await?;

    let record = get_row(pool, "payment_records", &payment_record_id, "id").await?;
    let total = val_f64(&record, "amount");
    let already_paid = val_f64(&record, "amount_paid");
    let new_paid = already_paid + applied;
    let was_overdue = val_str(&record, "status") == "vencido";

    let mut installments = installments_of(&record);
    installments.push(installment(applied, today, ORIGIN_CREDIT));

    let status = derive_status(total, new_paid, was_overdue);
    let mut record_patch = Map::new();
    record_patch.insert("amount_paid".to_string(), json!(new_paid));
    record_patch.insert("status".to_string(), Value::String(status.to_string()));
    record_patch.insert("installments".to_string(), Value::Array(installments));
    if status == STATUS_PAGADO {
        record_patch.insert(
            "paid_at".to_string(),
            Value::String(chrono::Utc::now().to_rfc3339()),
        );
    }
    bump_revision(&record, &mut record_patch);

    let record_update = update_row_guarded(
        pool,
        "payment_records",
        &payment_record_id,
        &record_patch,
        "revision",
        &revision_of(&record),
    )
    .await;

    if let Err(error) = record_update {
        // Give the burned amount back; the caller retries the whole call.
        let mut revert = Map::new();
        revert.insert("amount_remaining".to_string(), json!(remaining));
        revert.insert(
            "applications".to_string(),
            Value::Array(applications_of(&entry)),
        );
        if let Err(revert_error) = update_row_guarded(
            pool,
            "credit_balances",
            entry_id,
            &revert,
            "amount_remaining",
            &json!(remaining - applied),
        )
        .await
        {
            warn!(
                entry_id = %entry_id,
                %revert_error,
                "Could not revert credit burn after a lost payment-record race"
            );
        }
        return Err(error);
    }

    info!(
        tenant_id = %tenant_id,
        entry_id = %entry_id,
        payment_record_id = %payment_record_id,
        applied = applied,
        "Credit applied"
    );

    Ok(ApplicationResult::Applied {
        payment_record_id,
        period_month: period.month_name().to_string(),
        period_year: period.year,
        applied_amount: applied,
        entry_remaining: val_f64(&updated_entry, "amount_remaining"),
    })
}

pub async fn tenant_entries(pool: &PgPool, tenant_id: &str) -> Result<Vec<Value>, AppError> {
    let mut filters = Map::new();
    filters.insert("tenant_id".to_string(), Value::String(tenant_id.to_string()));
    list_rows(
        pool,
        "credit_balances",
        Some(&filters),
        500,
        0,
        "created_on",
        true,
    )
    .await
}

/// The tenant's active entry: the oldest one with a positive remaining
/// balance. Entries are expected sorted by creation date ascending.
pub fn find_active_entry(entries: &[Value]) -> Option<&Value> {
    entries
        .iter()
        .find(|entry| val_f64(entry, "amount_remaining") > AMOUNT_EPSILON)
}

fn merge_description(existing: &str, addition: &str) -> String {
    if existing.is_empty() {
        addition.to_string()
    } else if addition.is_empty() {
        existing.to_string()
    } else {
        format!("{existing} | {addition}")
    }
}

fn applications_of(entry: &Value) -> Vec<Value> {
    entry
        .as_object()
        .and_then(|obj| obj.get("applications"))
        .and_then(Value::as_array)
        .cloned()
        .unwrap_or_default()
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
    use serde_json::{json, Value};

    use super::{application_plan, find_active_entry, merge_description, ApplicationPlan};
    use crate::services::periods::Period;

    fn record(id: &str, month: &str, year: i32, amount: f64, paid: f64, status: &str) -> Value {
        json!({
            "id": id,
            "tenant_id": "t-1",
            "period_month": month,
            "period_year": year,
            "amount": amount,
            "amount_paid": paid,
            "status": status,
        })
    }

    #[test]
    fn credit_covers_the_oldest_record_first() {
        // Jan and Feb both owe 500; a 700 credit pays January in full and
        // keeps 200, leaving February untouched.
        let entry = json!({ "id": "c-1", "amount_remaining": 700.0 });
        let records = vec![
            record("r-feb", "Febrero", 2024, 500.0, 0.0, "pendiente"),
            record("r-jan", "Enero", 2024, 500.0, 0.0, "pendiente"),
        ];

        let plan = application_plan(&entry, &records);
        assert_eq!(
            plan,
            ApplicationPlan::Apply {
                payment_record_id: "r-jan".to_string(),
                period: Period::new(2024, 1).unwrap(),
                applied: 500.0,
            }
        );
    }

    #[test]
    fn exhausted_entry_applies_nothing() {
        let entry = json!({ "id": "c-1", "amount_remaining": 0.0 });
        let records = vec![record("r-jan", "Enero", 2024, 500.0, 0.0, "pendiente")];

        match application_plan(&entry, &records) {
            ApplicationPlan::Nothing { reason } => {
                assert!(reason.contains("no remaining balance"), "{reason}");
            }
            other => panic!("expected NothingToApply, got {other:?}"),
        }
    }

    #[test]
    fn no_outstanding_records_applies_nothing() {
        let entry = json!({ "id": "c-1", "amount_remaining": 300.0 });
        let records = vec![record("r-jan", "Enero", 2024, 500.0, 500.0, "pagado")];

        assert!(matches!(
            application_plan(&entry, &records),
            ApplicationPlan::Nothing { .. }
        ));
    }

    #[test]
    fn partial_credit_is_limited_by_the_entry_balance() {
        let entry = json!({ "id": "c-1", "amount_remaining": 150.0 });
        let records = vec![record("r-mar", "Marzo", 2024, 500.0, 100.0, "parcial")];

        assert_eq!(
            application_plan(&entry, &records),
            ApplicationPlan::Apply {
                payment_record_id: "r-mar".to_string(),
                period: Period::new(2024, 3).unwrap(),
                applied: 150.0,
            }
        );
    }

    #[test]
    fn vencido_records_are_eligible_and_order_spans_years() {
        let entry = json!({ "id": "c-1", "amount_remaining": 1000.0 });
        let records = vec![
            record("r-new", "Enero", 2024, 500.0, 0.0, "pendiente"),
            record("r-old", "Diciembre", 2023, 500.0, 0.0, "vencido"),
        ];

        assert!(matches!(
            application_plan(&entry, &records),
            ApplicationPlan::Apply { ref payment_record_id, .. } if payment_record_id == "r-old"
        ));
    }

    #[test]
    fn active_entry_is_the_oldest_with_balance() {
        let entries = vec![
            json!({ "id": "c-1", "amount_remaining": 0.0 }),
            json!({ "id": "c-2", "amount_remaining": 50.0 }),
            json!({ "id": "c-3", "amount_remaining": 80.0 }),
        ];
        let active = find_active_entry(&entries).expect("active entry");
        assert_eq!(active.get("id").and_then(Value::as_str), Some("c-2"));
        assert!(find_active_entry(&[]).is_none());
    }

    #[test]
    fn descriptions_merge_with_a_separator() {
        assert_eq!(
            merge_description("Excedente Enero", "Excedente Febrero"),
            "Excedente Enero | Excedente Febrero"
        );
        assert_eq!(merge_description("", "Nuevo"), "Nuevo");
    }
}
