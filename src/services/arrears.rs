use std::collections::{BTreeMap, HashMap};

use chrono::NaiveDate;
use serde_json::{Map, Value};
use sqlx::PgPool;
use tracing::warn;

use crate::error::AppError;
use crate::repository::table_service::{get_row, list_rows};
use crate::services::obligations::{
    contracted_services, furniture_monthly_total, has_active_furniture,
};
use crate::services::periods::{billing_periods, record_period, Period};

/// Tolerance for money comparisons, matching the cent-level rounding the
/// rest of the ledger uses.
pub const AMOUNT_EPSILON: f64 = 0.01;

pub const STATUS_PENDIENTE: &str = "pendiente";
pub const STATUS_PARCIAL: &str = "parcial";
pub const STATUS_PAGADO: &str = "pagado";
pub const STATUS_VENCIDO: &str = "vencido";

#[derive(Debug, Clone, PartialEq, serde::Serialize)]
pub struct ServiceArrear {
    pub service_type: String,
    pub amount: f64,
}

/// One period with at least one unsatisfied obligation category.
#[derive(Debug, Clone, PartialEq, serde::Serialize)]
pub struct PeriodArrears {
    pub period_month: String,
    pub period_year: i32,
    pub rent_due: f64,
    pub services_due: Vec<ServiceArrear>,
    pub furniture_due: f64,
    pub total_due: f64,
    /// Stored record status, when a record exists for the period.
    pub record_status: Option<String>,
}

#[derive(Debug, Clone, PartialEq, serde::Serialize)]
pub struct ArrearsSummary {
    pub tenant_id: String,
    pub tenant_name: String,
    pub property_id: Option<String>,
    /// Chronological by (year, month index).
    pub months: Vec<PeriodArrears>,
    pub rent_total: f64,
    pub services_total: f64,
    pub furniture_total: f64,
    pub grand_total: f64,
}

#[derive(Debug, Clone, serde::Serialize)]
pub struct RosterArrears {
    pub tenants: Vec<ArrearsSummary>,
    pub tenant_count: usize,
    pub rent_total: f64,
    pub services_total: f64,
    pub furniture_total: f64,
    pub grand_total: f64,
}

/// Derive the full arrears picture for one tenant from a data snapshot.
/// Pure: same inputs, same output, no side effects beyond log lines for
/// records excluded on integrity grounds.
pub fn derive_tenant_arrears(
    tenant: &Value,
    property: Option<&Value>,
    furniture_items: &[Value],
    payment_records: &[Value],
    today: NaiveDate,
) -> ArrearsSummary {
    let tenant_id = val_str(tenant, "id");
    let mut summary = ArrearsSummary {
        tenant_id: tenant_id.clone(),
        tenant_name: val_str(tenant, "full_name"),
        property_id: val_str_opt(tenant, "property_id"),
        months: Vec::new(),
        rent_total: 0.0,
        services_total: 0.0,
        furniture_total: 0.0,
        grand_total: 0.0,
    };

    let Some(occupancy_start) = parse_date(&val_str(tenant, "occupancy_start_date")) else {
        return summary;
    };
    let end = parse_date(&val_str(tenant, "vacated_on")).unwrap_or(today);

    // Index this tenant's records by canonical period, dropping records
    // that fail integrity checks (unparsable period, installment sum
    // disagreeing with amount_paid). The engine must always finish, so
    // bad rows are logged and treated as absent.
    let mut by_period: HashMap<Period, &Value> = HashMap::new();
    for record in payment_records {
        let Some(period) = record_period(record) else {
            warn!(
                tenant_id = %tenant_id,
                record_id = %val_str(record, "id"),
                "Payment record has an unrecognized period, excluding from arrears"
            );
            continue;
        };
        if !installments_consistent(record) {
            warn!(
                tenant_id = %tenant_id,
                record_id = %val_str(record, "id"),
                "Payment record installments do not add up to amount_paid, excluding"
            );
            continue;
        }
        by_period.insert(period, record);
    }

    let rent_obligation = property
        .map(|property| val_f64(property, "monthly_rent"))
        .unwrap_or(0.0);
    let services = contracted_services(tenant);
    let furniture_obligation = furniture_monthly_total(&tenant_id, furniture_items);
    let owes_furniture = has_active_furniture(&tenant_id, furniture_items);

    let mut derived: BTreeMap<Period, PeriodArrears> = BTreeMap::new();

    for period in billing_periods(occupancy_start, end) {
        let record = by_period.get(&period).copied();

        let (rent_due, record_status) = match record {
            Some(record) => {
                let status = val_str(record, "status");
                let outstanding = (val_f64(record, "amount") - val_f64(record, "amount_paid"))
                    .max(0.0);
                let unsatisfied = status == STATUS_VENCIDO
                    || (status != STATUS_PAGADO && outstanding > AMOUNT_EPSILON);
                (if unsatisfied { outstanding } else { 0.0 }, Some(status))
            }
            None => (rent_obligation, None),
        };

        let services_due = services
            .iter()
            .filter(|(service_type, _)| !service_satisfied(record, service_type))
            .map(|(service_type, contracted_amount)| ServiceArrear {
                service_type: service_type.clone(),
                amount: service_due_amount(record, service_type, *contracted_amount),
            })
            .collect::<Vec<_>>();

        let furniture_due = if owes_furniture && !furniture_satisfied(record) {
            furniture_obligation
        } else {
            0.0
        };

        let services_sum = services_due.iter().map(|entry| entry.amount).sum::<f64>();
        let total_due = rent_due + services_sum + furniture_due;
        if rent_due <= AMOUNT_EPSILON
            && services_due.is_empty()
            && furniture_due <= AMOUNT_EPSILON
        {
            continue;
        }

        derived.insert(
            period,
            PeriodArrears {
                period_month: period.month_name().to_string(),
                period_year: period.year,
                rent_due,
                services_due,
                furniture_due,
                total_due,
                record_status,
            },
        );
    }

    // Stored vencido records are outstanding by definition; pick up any
    // that the calendar walk did not re-derive (e.g. before a corrected
    // occupancy date), de-duplicated by period.
    for (period, record) in &by_period {
        if val_str(record, "status") != STATUS_VENCIDO || derived.contains_key(period) {
            continue;
        }
        let outstanding = (val_f64(record, "amount") - val_f64(record, "amount_paid")).max(0.0);
        derived.insert(
            *period,
            PeriodArrears {
                period_month: period.month_name().to_string(),
                period_year: period.year,
                rent_due: outstanding,
                services_due: Vec::new(),
                furniture_due: 0.0,
                total_due: outstanding,
                record_status: Some(STATUS_VENCIDO.to_string()),
            },
        );
    }

    for entry in derived.values() {
        summary.rent_total += entry.rent_due;
        summary.services_total += entry.services_due.iter().map(|s| s.amount).sum::<f64>();
        summary.furniture_total += entry.furniture_due;
    }
    summary.grand_total = summary.rent_total + summary.services_total + summary.furniture_total;
    summary.months = derived.into_values().collect();
    summary
}

/// Arrears for one tenant, reading the current snapshot from the store.
pub async fn tenant_arrears(
    pool: &PgPool,
    tenant_id: &str,
    today: NaiveDate,
) -> Result<ArrearsSummary, AppError> {
    let tenant = get_row(pool, "tenants", tenant_id, "id").await?;

    let property = match val_str_opt(&tenant, "property_id") {
        Some(property_id) => get_row(pool, "properties", &property_id, "id").await.ok(),
        None => None,
    };

    let furniture_items = list_rows(pool, "furniture_items", None, 1000, 0, "created_at", true).await?;

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

    Ok(derive_tenant_arrears(
        &tenant,
        property.as_ref(),
        &furniture_items,
        &records,
        today,
    ))
}

/// Roster-wide arrears report: every active tenant with at least one
/// outstanding period. One batch read per collection; per-tenant
/// consistency only.
pub async fn roster_arrears(pool: &PgPool, today: NaiveDate) -> Result<RosterArrears, AppError> {
    let mut filters = Map::new();
    filters.insert("active".to_string(), Value::Bool(true));
    let tenants = list_rows(pool, "tenants", Some(&filters), 2000, 0, "created_at", true).await?;

    let properties = list_rows(pool, "properties", None, 2000, 0, "created_at", true).await?;
    let properties_by_id: HashMap<String, &Value> = properties
        .iter()
        .map(|property| (val_str(property, "id"), property))
        .collect();

    let furniture_items = list_rows(pool, "furniture_items", None, 1000, 0, "created_at", true).await?;

    let records = list_rows(pool, "payment_records", None, 10000, 0, "created_at", true).await?;
    let mut records_by_tenant: HashMap<String, Vec<Value>> = HashMap::new();
    for record in records {
        records_by_tenant
            .entry(val_str(&record, "tenant_id"))
            .or_default()
            .push(record);
    }

    let mut roster = RosterArrears {
        tenants: Vec::new(),
        tenant_count: 0,
        rent_total: 0.0,
        services_total: 0.0,
        furniture_total: 0.0,
        grand_total: 0.0,
    };

    for tenant in &tenants {
        let tenant_id = val_str(tenant, "id");
        let property = val_str_opt(tenant, "property_id")
            .and_then(|property_id| properties_by_id.get(&property_id).copied());
        let tenant_records = records_by_tenant
            .get(&tenant_id)
            .map(Vec::as_slice)
            .unwrap_or(&[]);

        let summary =
            derive_tenant_arrears(tenant, property, &furniture_items, tenant_records, today);
        if summary.months.is_empty() {
            continue;
        }

        roster.rent_total += summary.rent_total;
        roster.services_total += summary.services_total;
        roster.furniture_total += summary.furniture_total;
        roster.grand_total += summary.grand_total;
        roster.tenants.push(summary);
    }
    roster.tenant_count = roster.tenants.len();

    Ok(roster)
}

/// `amount_paid` must equal the installment sum (within tolerance) for a
/// record to participate in aggregation.
pub fn installments_consistent(record: &Value) -> bool {
    let paid = val_f64(record, "amount_paid");
    let sum = record
        .as_object()
        .and_then(|obj| obj.get("installments"))
        .and_then(Value::as_array)
        .map(|installments| {
            installments
                .iter()
                .map(|installment| val_f64(installment, "amount"))
                .sum::<f64>()
        })
        .unwrap_or(0.0);
    (paid - sum).abs() <= AMOUNT_EPSILON
}

fn service_satisfied(record: Option<&Value>, service_type: &str) -> bool {
    record
        .and_then(Value::as_object)
        .and_then(|obj| obj.get("services_paid"))
        .and_then(Value::as_object)
        .and_then(|paid| paid.get(service_type))
        .and_then(Value::as_object)
        .and_then(|entry| entry.get("paid"))
        .and_then(Value::as_bool)
        .unwrap_or(false)
}

fn service_due_amount(record: Option<&Value>, service_type: &str, contracted: f64) -> f64 {
    record
        .and_then(Value::as_object)
        .and_then(|obj| obj.get("services_paid"))
        .and_then(Value::as_object)
        .and_then(|paid| paid.get(service_type))
        .map(|entry| val_f64(entry, "amount"))
        .filter(|amount| *amount > 0.0)
        .unwrap_or(contracted)
}

fn furniture_satisfied(record: Option<&Value>) -> bool {
    record
        .and_then(Value::as_object)
        .and_then(|obj| obj.get("furniture_paid"))
        .map(|marker| match marker {
            Value::Object(fields) => !fields.is_empty(),
            Value::Bool(flag) => *flag,
            _ => false,
        })
        .unwrap_or(false)
}

fn parse_date(raw: &str) -> Option<NaiveDate> {
    if raw.is_empty() {
        return None;
    }
    NaiveDate::parse_from_str(raw, "%Y-%m-%d").ok()
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
    use chrono::NaiveDate;
    use serde_json::{json, Value};

    use super::{derive_tenant_arrears, installments_consistent};

    fn date(year: i32, month: u32, day: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(year, month, day).expect("valid date")
    }

    fn tenant() -> Value {
        json!({
            "id": "t-1",
            "full_name": "Laura Méndez",
            "property_id": "p-1",
            "active": true,
            "occupancy_start_date": "2024-01-15",
            "services_billed": false,
            "services": [],
        })
    }

    fn property() -> Value {
        json!({ "id": "p-1", "monthly_rent": 1000.0, "occupancy_status": "ocupado" })
    }

    #[test]
    fn unpaid_span_lists_each_owed_month_until_anchor() {
        // Occupancy 2024-01-15, today 2024-04-10, nothing paid: Jan, Feb
        // and Mar are owed; April's anchor day has not arrived.
        let summary =
            derive_tenant_arrears(&tenant(), Some(&property()), &[], &[], date(2024, 4, 10));

        let labels = summary
            .months
            .iter()
            .map(|m| format!("{} {}", m.period_month, m.period_year))
            .collect::<Vec<_>>();
        assert_eq!(labels, vec!["Enero 2024", "Febrero 2024", "Marzo 2024"]);
        assert_eq!(summary.rent_total, 3000.0);
        assert_eq!(summary.grand_total, 3000.0);
    }

    #[test]
    fn accrual_is_idempotent() {
        let records = vec![json!({
            "id": "r-1",
            "tenant_id": "t-1",
            "period_month": "Enero",
            "period_year": 2024,
            "amount": 1000.0,
            "amount_paid": 400.0,
            "status": "parcial",
            "installments": [{ "amount": 400.0, "paid_on": "2024-01-20" }],
        })];

        let first =
            derive_tenant_arrears(&tenant(), Some(&property()), &[], &records, date(2024, 2, 20));
        let second =
            derive_tenant_arrears(&tenant(), Some(&property()), &[], &records, date(2024, 2, 20));
        assert_eq!(first, second);

        // Jan partial (600 outstanding) + Feb missing (1000).
        assert_eq!(first.months.len(), 2);
        assert_eq!(first.months[0].rent_due, 600.0);
        assert_eq!(first.rent_total, 1600.0);
    }

    #[test]
    fn paid_periods_do_not_appear() {
        let records = vec![json!({
            "id": "r-1",
            "tenant_id": "t-1",
            "period_month": "Enero",
            "period_year": 2024,
            "amount": 1000.0,
            "amount_paid": 1000.0,
            "status": "pagado",
            "installments": [{ "amount": 1000.0, "paid_on": "2024-01-16" }],
        })];

        let summary =
            derive_tenant_arrears(&tenant(), Some(&property()), &[], &records, date(2024, 1, 31));
        assert!(summary.months.is_empty());
        assert_eq!(summary.grand_total, 0.0);
    }

    #[test]
    fn stored_vencido_records_short_circuit_in() {
        // Record from before the (corrected) occupancy date: the calendar
        // walk will not re-derive it, but vencido is outstanding by
        // definition.
        let records = vec![json!({
            "id": "r-0",
            "tenant_id": "t-1",
            "period_month": "Noviembre",
            "period_year": 2023,
            "amount": 900.0,
            "amount_paid": 100.0,
            "status": "vencido",
            "installments": [{ "amount": 100.0, "paid_on": "2023-11-20" }],
        })];

        let summary =
            derive_tenant_arrears(&tenant(), Some(&property()), &[], &records, date(2024, 1, 20));
        assert_eq!(summary.months.len(), 2);
        assert_eq!(summary.months[0].period_month, "Noviembre");
        assert_eq!(summary.months[0].period_year, 2023);
        assert_eq!(summary.months[0].rent_due, 800.0);
        assert_eq!(summary.months[1].period_month, "Enero");
    }

    #[test]
    fn corrupt_records_are_excluded_not_fatal() {
        let records = vec![
            // Installments do not add up to amount_paid.
            json!({
                "id": "r-bad",
                "tenant_id": "t-1",
                "period_month": "Enero",
                "period_year": 2024,
                "amount": 1000.0,
                "amount_paid": 1000.0,
                "status": "pagado",
                "installments": [{ "amount": 400.0, "paid_on": "2024-01-20" }],
            }),
            // Period name outside the canonical table.
            json!({
                "id": "r-bad-2",
                "tenant_id": "t-1",
                "period_month": "Januar",
                "period_year": 2024,
                "amount": 1000.0,
                "amount_paid": 1000.0,
                "status": "pagado",
                "installments": [{ "amount": 1000.0, "paid_on": "2024-01-20" }],
            }),
        ];

        // Both records excluded: January derives as fully owed.
        let summary =
            derive_tenant_arrears(&tenant(), Some(&property()), &[], &records, date(2024, 1, 31));
        assert_eq!(summary.months.len(), 1);
        assert_eq!(summary.months[0].rent_due, 1000.0);
    }

    #[test]
    fn service_and_furniture_categories_accrue_independently() {
        let tenant = json!({
            "id": "t-1",
            "full_name": "Laura Méndez",
            "property_id": "p-1",
            "occupancy_start_date": "2024-01-15",
            "services_billed": true,
            "services": [{ "service_type": "agua", "monthly_amount": 150.0 }],
        });
        let furniture = vec![json!({
            "id": "f-1",
            "monthly_cost": 200.0,
            "assignments": [{ "tenant_id": "t-1", "quantity": 1, "active": true }],
        })];
        // Rent paid, water marked paid, furniture not.
        let records = vec![json!({
            "id": "r-1",
            "tenant_id": "t-1",
            "period_month": "Enero",
            "period_year": 2024,
            "amount": 1000.0,
            "amount_paid": 1000.0,
            "status": "pagado",
            "installments": [{ "amount": 1000.0, "paid_on": "2024-01-16" }],
            "services_paid": { "agua": { "paid": true, "amount": 150.0 } },
        })];

        let summary = derive_tenant_arrears(
            &tenant,
            Some(&property()),
            &furniture,
            &records,
            date(2024, 1, 31),
        );
        assert_eq!(summary.months.len(), 1);
        let month = &summary.months[0];
        assert_eq!(month.rent_due, 0.0);
        assert!(month.services_due.is_empty());
        assert_eq!(month.furniture_due, 200.0);
        assert_eq!(summary.furniture_total, 200.0);
        assert_eq!(summary.grand_total, 200.0);
    }

    #[test]
    fn months_sort_chronologically_across_years() {
        let tenant = json!({
            "id": "t-1",
            "full_name": "Laura Méndez",
            "property_id": "p-1",
            "occupancy_start_date": "2023-11-05",
        });
        let summary =
            derive_tenant_arrears(&tenant, Some(&property()), &[], &[], date(2024, 2, 10));
        let labels = summary
            .months
            .iter()
            .map(|m| format!("{} {}", m.period_month, m.period_year))
            .collect::<Vec<_>>();
        assert_eq!(
            labels,
            vec![
                "Noviembre 2023",
                "Diciembre 2023",
                "Enero 2024",
                "Febrero 2024"
            ]
        );
    }

    #[test]
    fn installment_consistency_check() {
        assert!(installments_consistent(&json!({
            "amount_paid": 500.0,
            "installments": [
                { "amount": 300.0 },
                { "amount": 200.0 },
            ],
        })));
        assert!(!installments_consistent(&json!({
            "amount_paid": 500.0,
            "installments": [{ "amount": 300.0 }],
        })));
        assert!(installments_consistent(&json!({
            "amount_paid": 0.0,
        })));
    }
}
