use serde_json::{json, Map, Value};
use sqlx::PgPool;
use tracing::warn;

use crate::error::AppError;
use crate::repository::table_service::{create_row, list_rows, update_row_guarded};
use crate::services::arrears::{installments_consistent, STATUS_PAGADO};
use crate::services::periods::{payment_month, record_period, Period};

/// Manager commission: a fixed cut of each month's collected rent.
pub const COMMISSION_RATE: f64 = 0.10;

pub const OCCUPIED: &str = "ocupado";

#[derive(Debug, Clone, PartialEq, serde::Serialize)]
pub struct CommissionSummary {
    pub period_month: String,
    pub period_year: i32,
    /// Rent actually collected in the month, by payment date. Service and
    /// furniture amounts never participate.
    pub rent_collected: f64,
    pub commission: f64,
    pub record_count: usize,
    pub collected: bool,
    pub collected_at: Option<String>,
}

/// Commission for one calendar month, over a snapshot of payment records.
/// Grouping is by the month the rent was *paid* in (explicit payment date
/// first, stored period as fallback), not the month it was owed for.
/// Computed fresh on every call; nothing is trusted from storage while
/// uncollected.
pub fn monthly_commission(records: &[Value], period: Period) -> CommissionSummary {
    let mut rent_collected = 0.0;
    let mut record_count = 0;

    for record in records {
        if val_str(record, "status") != STATUS_PAGADO {
            continue;
        }
        if !installments_consistent(record) {
            warn!(
                record_id = %val_str(record, "id"),
                "Payment record installments do not add up, excluding from commission"
            );
            continue;
        }
        let Some(paid_in) = payment_month(record) else {
            warn!(
                record_id = %val_str(record, "id"),
                "Payment record has no resolvable payment month, excluding from commission"
            );
            continue;
        };
        if paid_in != period {
            continue;
        }

        rent_collected += val_f64(record, "amount_paid");
        record_count += 1;
    }

    CommissionSummary {
        period_month: period.month_name().to_string(),
        period_year: period.year,
        rent_collected,
        commission: rent_collected * COMMISSION_RATE,
        record_count,
        collected: false,
        collected_at: None,
    }
}

/// Occupied properties with no payment record for the period. A month may
/// not be marked collected while this list is non-empty.
pub fn missing_coverage(properties: &[Value], records: &[Value], period: Period) -> Vec<String> {
    properties
        .iter()
        .filter(|property| val_str(property, "occupancy_status") == OCCUPIED)
        .filter(|property| {
            let property_id = val_str(property, "id");
            !records.iter().any(|record| {
                val_str(record, "property_id") == property_id
                    && record_period(record) == Some(period)
            })
        })
        .map(|property| {
            let name = val_str(property, "name");
            if name.is_empty() {
                val_str(property, "id")
            } else {
                name
            }
        })
        .collect()
}

/// On-demand commission summary for a period, merged with the stored
/// collected flag (when a commission record exists).
pub async fn compute_monthly_commission(
    pool: &PgPool,
    period: Period,
) -> Result<CommissionSummary, AppError> {
    let records = list_rows(pool, "payment_records", None, 10000, 0, "created_at", true).await?;
    let mut summary = monthly_commission(&records, period);

    if let Some(stored) = find_commission_record(pool, period).await? {
        summary.collected = stored
            .as_object()
            .and_then(|obj| obj.get("collected"))
            .and_then(Value::as_bool)
            .unwrap_or(false);
        summary.collected_at = val_str_opt(&stored, "collected_at");
    }

    Ok(summary)
}

/// Toggle the collected flag for a month. Collecting is gated on every
/// occupied property having a payment record for the period; the stored
/// amount is refreshed from the on-demand computation at collect time.
pub async fn set_commission_collected(
    pool: &PgPool,
    period: Period,
    collected: bool,
) -> Result<Value, AppError> {
    if collected {
        let properties = list_rows(pool, "properties", None, 2000, 0, "created_at", true).await?;
        let records = list_rows(pool, "payment_records", None, 10000, 0, "created_at", true).await?;
        let missing = missing_coverage(&properties, &records, period);
        if !missing.is_empty() {
            return Err(AppError::UnprocessableEntity(format!(
                "Cannot mark {} as collected: occupied properties without a payment record: {}.",
                period.label(),
                missing.join(", ")
            )));
        }
    }

    let summary = compute_monthly_commission(pool, period).await?;
    let collected_at = if collected {
        Value::String(chrono::Utc::now().to_rfc3339())
    } else {
        Value::Null
    };

    match find_commission_record(pool, period).await? {
        Some(existing) => {
            let previous = existing
                .as_object()
                .and_then(|obj| obj.get("collected"))
                .and_then(Value::as_bool)
                .unwrap_or(false);
            if previous == collected {
                return Ok(existing);
            }

            let mut patch = Map::new();
            patch.insert("collected".to_string(), Value::Bool(collected));
            patch.insert("collected_at".to_string(), collected_at);
            patch.insert("amount".to_string(), json!(summary.commission));

            // CAS on the flag itself: two operators toggling at once
            // surface a conflict instead of a silent double toggle.
            update_row_guarded(
                pool,
                "commission_records",
                &val_str(&existing, "id"),
                &patch,
                "collected",
                &Value::Bool(previous),
            )
            .await
        }
        None => {
            let mut payload = Map::new();
            payload.insert(
                "period_month".to_string(),
                Value::String(period.month_name().to_string()),
            );
            payload.insert("period_year".to_string(), json!(period.year));
            payload.insert("amount".to_string(), json!(summary.commission));
            payload.insert("collected".to_string(), Value::Bool(collected));
            payload.insert("collected_at".to_string(), collected_at);
            create_row(pool, "commission_records", &payload).await
        }
    }
}

async fn find_commission_record(
    pool: &PgPool,
    period: Period,
) -> Result<Option<Value>, AppError> {
    let mut filters = Map::new();
    filters.insert(
        "period_month".to_string(),
        Value::String(period.month_name().to_string()),
    );
    filters.insert("period_year".to_string(), json!(period.year));

    let rows = list_rows(
        pool,
        "commission_records",
        Some(&filters),
        1,
        0,
        "created_at",
        true,
    )
    .await?;
    Ok(rows.into_iter().next())
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

fn val_str_opt(row: &Value, key: &str) -> Option<String> {
    row.as_object()
        .and_then(|obj| obj.get(key))
        .and_then(Value::as_str)
        .map(str::trim)
        .filter(|value| !value.is_empty())
        .map(ToOwned::to_owned)
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

    use super::{missing_coverage, monthly_commission};
    use crate::services::periods::Period;

    fn paid_record(id: &str, property: &str, amount: f64, paid_at: &str) -> Value {
        json!({
            "id": id,
            "tenant_id": "t-1",
            "property_id": property,
            "period_month": "Marzo",
            "period_year": 2024,
            "amount": amount,
            "amount_paid": amount,
            "status": "pagado",
            "installments": [{ "amount": amount, "paid_on": "2024-03-05" }],
            "paid_at": paid_at,
        })
    }

    #[test]
    fn commission_is_ten_percent_of_rent_paid_in_the_month() {
        let march = Period::new(2024, 3).unwrap();
        let records = vec![
            paid_record("r-1", "p-1", 5000.0, "2024-03-05T12:00:00+00:00"),
            paid_record("r-2", "p-2", 3000.0, "2024-03-28T12:00:00+00:00"),
            // Paid in April: belongs to April's commission even though the
            // period owed is March.
            paid_record("r-3", "p-3", 4000.0, "2024-04-02T12:00:00+00:00"),
            // Unpaid records never count.
            json!({
                "id": "r-4",
                "property_id": "p-4",
                "period_month": "Marzo",
                "period_year": 2024,
                "amount": 2000.0,
                "amount_paid": 500.0,
                "status": "parcial",
                "installments": [{ "amount": 500.0 }],
            }),
        ];

        let summary = monthly_commission(&records, march);
        assert_eq!(summary.rent_collected, 8000.0);
        assert_eq!(summary.commission, 800.0);
        assert_eq!(summary.record_count, 2);

        let april = monthly_commission(&records, Period::new(2024, 4).unwrap());
        assert_eq!(april.rent_collected, 4000.0);
    }

    #[test]
    fn payment_month_falls_back_to_period_fields() {
        let record = json!({
            "id": "r-1",
            "property_id": "p-1",
            "period_month": "Marzo",
            "period_year": 2024,
            "amount": 1000.0,
            "amount_paid": 1000.0,
            "status": "pagado",
            "installments": [{ "amount": 1000.0 }],
        });
        let summary = monthly_commission(&[record], Period::new(2024, 3).unwrap());
        assert_eq!(summary.rent_collected, 1000.0);
    }

    #[test]
    fn inconsistent_records_are_excluded() {
        let record = json!({
            "id": "r-1",
            "property_id": "p-1",
            "period_month": "Marzo",
            "period_year": 2024,
            "amount": 1000.0,
            "amount_paid": 1000.0,
            "status": "pagado",
            "installments": [{ "amount": 100.0 }],
        });
        let summary = monthly_commission(&[record], Period::new(2024, 3).unwrap());
        assert_eq!(summary.rent_collected, 0.0);
        assert_eq!(summary.record_count, 0);
    }

    #[test]
    fn coverage_gate_lists_occupied_properties_without_a_record() {
        let march = Period::new(2024, 3).unwrap();
        let properties = vec![
            json!({ "id": "p-1", "name": "Depto 101", "occupancy_status": "ocupado" }),
            json!({ "id": "p-2", "name": "Depto 102", "occupancy_status": "ocupado" }),
            json!({ "id": "p-3", "name": "Depto 103", "occupancy_status": "disponible" }),
        ];
        let records = vec![paid_record("r-1", "p-1", 5000.0, "2024-03-05T12:00:00+00:00")];

        let missing = missing_coverage(&properties, &records, march);
        assert_eq!(missing, vec!["Depto 102".to_string()]);

        // Vacant properties never block collection.
        let none_needed = missing_coverage(
            &[json!({ "id": "p-9", "occupancy_status": "disponible" })],
            &[],
            march,
        );
        assert!(none_needed.is_empty());
    }
}
