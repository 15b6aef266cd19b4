use serde::Deserialize;
use validator::Validate;

use crate::error::AppError;

pub fn validate_input<T: Validate>(input: &T) -> Result<(), AppError> {
    input
        .validate()
        .map_err(|errors| AppError::UnprocessableEntity(format!("Validation failed: {errors}")))
}

fn default_currency_pyg() -> String {
    "PYG".to_string()
}

#[derive(Debug, Clone, Deserialize, serde::Serialize, Validate)]
pub struct CreateOwnerStatementInput {
    #[validate(length(min = 1))]
    pub organization_id: String,
    #[validate(length(min = 10, max = 10))]
    pub period_start: String,
    #[validate(length(min = 10, max = 10))]
    pub period_end: String,
    #[serde(default = "default_currency_pyg")]
    #[validate(length(min = 3, max = 3))]
    pub currency: String,
    pub property_id: Option<String>,
    pub unit_id: Option<String>,
}

/// How a lease's monthly billing schedule is laid out.
#[derive(Debug, Clone, Deserialize, serde::Serialize, Validate)]
pub struct LeaseScheduleRequest {
    pub starts_on: String,
    pub first_collection_due_date: Option<String>,
    pub ends_on: Option<String>,
    /// Ignored when `ends_on` is set; otherwise must be at least 1.
    pub collection_schedule_months: Option<i32>,
    #[serde(default)]
    #[validate(range(min = 0.0))]
    pub amount: f64,
    #[serde(default = "default_currency_pyg")]
    #[validate(length(min = 3, max = 3))]
    pub currency: String,
}
