use serde_json::Value;

/// One obligation category owed by a tenant in a billing period.
#[derive(Debug, Clone, PartialEq)]
pub enum ObligationCategory {
    Rent,
    Service(String),
    Furniture,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Obligation {
    pub category: ObligationCategory,
    pub amount: f64,
}

/// Resolve which obligations apply to a tenant in a period and their
/// amounts. The rent amount is the property's current monthly rent,
/// snapshotted at computation time. Categories with a zero or missing
/// contracted value are not emitted.
pub fn resolve_obligations(
    tenant: &Value,
    property: Option<&Value>,
    furniture_items: &[Value],
) -> Vec<Obligation> {
    let mut obligations = Vec::new();

    if let Some(property) = property {
        let rent = val_f64(property, "monthly_rent");
        if rent > 0.0 {
            obligations.push(Obligation {
                category: ObligationCategory::Rent,
                amount: rent,
            });
        }
    }

    for (service_type, amount) in contracted_services(tenant) {
        obligations.push(Obligation {
            category: ObligationCategory::Service(service_type),
            amount,
        });
    }

    let tenant_id = val_str(tenant, "id");
    let furniture_total = furniture_monthly_total(&tenant_id, furniture_items);
    if furniture_total > 0.0 {
        obligations.push(Obligation {
            category: ObligationCategory::Furniture,
            amount: furniture_total,
        });
    }

    obligations
}

/// Contracted services billed to the tenant: one (type, monthly amount)
/// pair per entry, only when the tenant is in services-billed mode.
pub fn contracted_services(tenant: &Value) -> Vec<(String, f64)> {
    let billed = tenant
        .as_object()
        .and_then(|obj| obj.get("services_billed"))
        .and_then(Value::as_bool)
        .unwrap_or(false);
    if !billed {
        return Vec::new();
    }

    tenant
        .as_object()
        .and_then(|obj| obj.get("services"))
        .and_then(Value::as_array)
        .map(|entries| {
            entries
                .iter()
                .filter_map(|entry| {
                    let service_type = val_str(entry, "service_type");
                    let amount = val_f64(entry, "monthly_amount");
                    if service_type.is_empty() || amount <= 0.0 {
                        None
                    } else {
                        Some((service_type, amount))
                    }
                })
                .collect()
        })
        .unwrap_or_default()
}

/// Monthly furniture total for a tenant: sum of cost x quantity over
/// active assignments, evaluated as a single aggregate.
pub fn furniture_monthly_total(tenant_id: &str, furniture_items: &[Value]) -> f64 {
    if tenant_id.is_empty() {
        return 0.0;
    }

    furniture_items
        .iter()
        .map(|item| {
            let cost = val_f64(item, "monthly_cost");
            if cost <= 0.0 {
                return 0.0;
            }
            item.as_object()
                .and_then(|obj| obj.get("assignments"))
                .and_then(Value::as_array)
                .map(|assignments| {
                    assignments
                        .iter()
                        .filter(|assignment| {
                            val_str(assignment, "tenant_id") == tenant_id
                                && assignment
                                    .as_object()
                                    .and_then(|obj| obj.get("active"))
                                    .and_then(Value::as_bool)
                                    .unwrap_or(false)
                        })
                        .map(|assignment| {
                            let quantity = val_f64(assignment, "quantity");
                            if quantity > 0.0 {
                                cost * quantity
                            } else {
                                0.0
                            }
                        })
                        .sum::<f64>()
                })
                .unwrap_or(0.0)
        })
        .sum()
}

pub fn has_active_furniture(tenant_id: &str, furniture_items: &[Value]) -> bool {
    furniture_monthly_total(tenant_id, furniture_items) > 0.0
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
    use serde_json::json;

    use super::{
        contracted_services, furniture_monthly_total, resolve_obligations, Obligation,
        ObligationCategory,
    };

    #[test]
    fn resolves_rent_services_and_furniture() {
        let tenant = json!({
            "id": "t-1",
            "services_billed": true,
            "services": [
                { "service_type": "agua", "monthly_amount": 150.0 },
                { "service_type": "luz", "monthly_amount": 300.0 },
            ],
        });
        let property = json!({ "id": "p-1", "monthly_rent": 5000.0 });
        let furniture = vec![json!({
            "id": "f-1",
            "monthly_cost": 200.0,
            "assignments": [
                { "tenant_id": "t-1", "quantity": 2, "active": true },
                { "tenant_id": "t-2", "quantity": 1, "active": true },
            ],
        })];

        let obligations = resolve_obligations(&tenant, Some(&property), &furniture);
        assert_eq!(
            obligations,
            vec![
                Obligation {
                    category: ObligationCategory::Rent,
                    amount: 5000.0
                },
                Obligation {
                    category: ObligationCategory::Service("agua".to_string()),
                    amount: 150.0
                },
                Obligation {
                    category: ObligationCategory::Service("luz".to_string()),
                    amount: 300.0
                },
                Obligation {
                    category: ObligationCategory::Furniture,
                    amount: 400.0
                },
            ]
        );
    }

    #[test]
    fn zero_or_missing_amounts_are_not_emitted() {
        let tenant = json!({
            "id": "t-1",
            "services_billed": true,
            "services": [
                { "service_type": "agua", "monthly_amount": 0.0 },
                { "service_type": "", "monthly_amount": 100.0 },
            ],
        });
        let property = json!({ "id": "p-1", "monthly_rent": 0 });

        assert!(resolve_obligations(&tenant, Some(&property), &[]).is_empty());
        assert!(resolve_obligations(&tenant, None, &[]).is_empty());
    }

    #[test]
    fn services_require_billed_mode() {
        let tenant = json!({
            "id": "t-1",
            "services_billed": false,
            "services": [{ "service_type": "agua", "monthly_amount": 150.0 }],
        });
        assert!(contracted_services(&tenant).is_empty());
    }

    #[test]
    fn furniture_ignores_inactive_and_zero_quantity_assignments() {
        let furniture = vec![
            json!({
                "monthly_cost": 100.0,
                "assignments": [
                    { "tenant_id": "t-1", "quantity": 1, "active": false },
                    { "tenant_id": "t-1", "quantity": 0, "active": true },
                ],
            }),
            json!({
                "monthly_cost": 250.0,
                "assignments": [{ "tenant_id": "t-1", "quantity": 1, "active": true }],
            }),
        ];
        assert_eq!(furniture_monthly_total("t-1", &furniture), 250.0);
        assert_eq!(furniture_monthly_total("t-9", &furniture), 0.0);
    }
}
