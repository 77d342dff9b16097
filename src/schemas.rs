use serde::Deserialize;
use validator::Validate;

use crate::error::AppError;

pub fn validate_input<T: Validate>(input: &T) -> Result<(), AppError> {
    input
        .validate()
        .map_err(|errors| AppError::UnprocessableEntity(format!("Validation failed: {errors}")))
}

pub fn serialize_to_map<T>(value: &T) -> serde_json::Map<String, serde_json::Value>
where
    T: serde::Serialize,
{
    let json = serde_json::to_value(value)
        .unwrap_or_else(|_| serde_json::Value::Object(serde_json::Map::new()));
    json.as_object().cloned().unwrap_or_default()
}

pub fn remove_nulls(
    mut map: serde_json::Map<String, serde_json::Value>,
) -> serde_json::Map<String, serde_json::Value> {
    map.retain(|_, value| !value.is_null());
    map
}

pub fn clamp_limit_in_range(limit: i64, minimum: i64, maximum: i64) -> i64 {
    limit.clamp(minimum, maximum)
}

fn default_limit() -> i64 {
    100
}
fn default_true() -> bool {
    true
}
fn default_available() -> String {
    "disponible".to_string()
}

#[derive(Debug, Clone, Deserialize, serde::Serialize, Validate)]
pub struct ServiceContractInput {
    #[validate(length(min = 1, max = 64))]
    pub service_type: String,
    pub monthly_amount: f64,
}

#[derive(Debug, Clone, Deserialize, serde::Serialize, Validate)]
pub struct CreateTenantInput {
    #[validate(length(min = 1, max = 255))]
    pub full_name: String,
    pub property_id: Option<String>,
    /// YYYY-MM-DD; the day-of-month is the billing anchor.
    pub occupancy_start_date: String,
    #[serde(default)]
    pub services: Vec<ServiceContractInput>,
    #[serde(default)]
    pub services_billed: bool,
    pub notes: Option<String>,
}

#[derive(Debug, Clone, Deserialize, serde::Serialize)]
pub struct UpdateTenantInput {
    pub full_name: Option<String>,
    pub property_id: Option<String>,
    pub occupancy_start_date: Option<String>,
    pub services: Option<Vec<ServiceContractInput>>,
    pub services_billed: Option<bool>,
    pub notes: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct VacateTenantInput {
    /// Defaults to today in the business timezone.
    pub vacated_on: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct TenantsQuery {
    pub active: Option<bool>,
    #[serde(default = "default_limit")]
    pub limit: i64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct TenantPath {
    pub tenant_id: String,
}

#[derive(Debug, Clone, Deserialize, serde::Serialize, Validate)]
pub struct CreatePropertyInput {
    #[validate(length(min = 1, max = 255))]
    pub name: String,
    pub monthly_rent: f64,
    #[serde(default = "default_available")]
    pub occupancy_status: String,
}

#[derive(Debug, Clone, Deserialize, serde::Serialize)]
pub struct UpdatePropertyInput {
    pub name: Option<String>,
    pub monthly_rent: Option<f64>,
    pub occupancy_status: Option<String>,
    pub tenant_id: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct PropertiesQuery {
    pub occupancy_status: Option<String>,
    #[serde(default = "default_limit")]
    pub limit: i64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct PropertyPath {
    pub property_id: String,
}

#[derive(Debug, Clone, Deserialize, serde::Serialize, Validate)]
pub struct CreateFurnitureItemInput {
    #[validate(length(min = 1, max = 255))]
    pub name: String,
    pub monthly_cost: f64,
}

#[derive(Debug, Clone, Deserialize, serde::Serialize)]
pub struct UpdateFurnitureItemInput {
    pub name: Option<String>,
    pub monthly_cost: Option<f64>,
}

#[derive(Debug, Clone, Deserialize, Validate)]
pub struct AssignFurnitureInput {
    pub tenant_id: String,
    #[validate(range(min = 1))]
    pub quantity: i64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct FurnitureItemPath {
    pub item_id: String,
}

#[derive(Debug, Clone, Deserialize, Validate)]
pub struct RegisterPaymentInput {
    pub tenant_id: String,
    pub property_id: String,
    #[validate(length(min = 1, max = 32))]
    pub period_month: String,
    pub period_year: i32,
    pub amount: f64,
    /// YYYY-MM-DD; defaults to today in the business timezone.
    pub paid_on: Option<String>,
}

#[derive(Debug, Clone, Deserialize, Validate)]
pub struct MarkServicePaidInput {
    #[validate(length(min = 1, max = 64))]
    pub service_type: String,
    pub amount: Option<f64>,
    pub paid_on: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct MarkFurniturePaidInput {
    pub amount: f64,
    pub paid_on: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct PaymentsQuery {
    pub tenant_id: Option<String>,
    pub property_id: Option<String>,
    pub status: Option<String>,
    pub period_year: Option<i64>,
    #[serde(default = "default_limit")]
    pub limit: i64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct PaymentPath {
    pub payment_id: String,
}

#[derive(Debug, Clone, Deserialize, Validate)]
pub struct CreateCreditInput {
    pub tenant_id: String,
    pub amount: f64,
    #[validate(length(min = 1, max = 500))]
    pub description: String,
    pub created_on: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ApplyCreditInput {
    pub tenant_id: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CreditsQuery {
    pub tenant_id: String,
    #[serde(default = "default_true")]
    pub include_exhausted: bool,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CreditPath {
    pub entry_id: String,
}

#[derive(Debug, Clone, Deserialize, Validate)]
pub struct CommissionQuery {
    #[validate(length(min = 1, max = 32))]
    pub period_month: String,
    pub period_year: i32,
}

#[derive(Debug, Clone, Deserialize, Validate)]
pub struct SetCommissionCollectedInput {
    #[validate(length(min = 1, max = 32))]
    pub period_month: String,
    pub period_year: i32,
    pub collected: bool,
}

#[cfg(test)]
mod tests {
    use super::{remove_nulls, serialize_to_map, UpdateTenantInput};

    #[test]
    fn partial_updates_drop_null_fields() {
        let input = UpdateTenantInput {
            full_name: Some("Ana Ruiz".to_string()),
            property_id: None,
            occupancy_start_date: None,
            services: None,
            services_billed: Some(true),
            notes: None,
        };
        let map = remove_nulls(serialize_to_map(&input));
        assert_eq!(map.len(), 2);
        assert!(map.contains_key("full_name"));
        assert!(map.contains_key("services_billed"));
    }
}
