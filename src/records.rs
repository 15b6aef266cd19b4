//! Typed views of the rows the billing engine reads.
//!
//! Rows arrive from the [`crate::repository::RowStore`] as JSON objects. They
//! are converted here, once, so the aggregation code never handles loose maps.
//! Field names mirror the persisted columns exactly.

use chrono::NaiveDate;
use serde::{de::DeserializeOwned, Deserialize, Deserializer, Serialize};
use serde_json::Value;

use crate::error::{AppError, AppResult};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ReservationStatus {
    Pending,
    Confirmed,
    CheckedIn,
    CheckedOut,
    Cancelled,
    NoShow,
    #[serde(other)]
    Other,
}

impl ReservationStatus {
    /// Statuses whose money counts toward an owner statement.
    pub const REPORTABLE: [ReservationStatus; 3] = [
        ReservationStatus::Confirmed,
        ReservationStatus::CheckedIn,
        ReservationStatus::CheckedOut,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Confirmed => "confirmed",
            Self::CheckedIn => "checked_in",
            Self::CheckedOut => "checked_out",
            Self::Cancelled => "cancelled",
            Self::NoShow => "no_show",
            Self::Other => "other",
        }
    }

    pub fn is_reportable(self) -> bool {
        Self::REPORTABLE.contains(&self)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CollectionStatus {
    Scheduled,
    Pending,
    Late,
    Paid,
    #[serde(other)]
    Other,
}

impl CollectionStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Scheduled => "scheduled",
            Self::Pending => "pending",
            Self::Late => "late",
            Self::Paid => "paid",
            Self::Other => "other",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum StatementStatus {
    Draft,
    Finalized,
}

impl StatementStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Draft => "draft",
            Self::Finalized => "finalized",
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct Reservation {
    pub id: String,
    #[serde(default, deserialize_with = "optional_id")]
    pub unit_id: Option<String>,
    #[serde(default, deserialize_with = "optional_id")]
    pub property_id: Option<String>,
    pub status: ReservationStatus,
    pub check_in_date: NaiveDate,
    pub check_out_date: NaiveDate,
    #[serde(default, deserialize_with = "amount")]
    pub total_amount: f64,
    #[serde(default, deserialize_with = "amount")]
    pub platform_fee: f64,
    #[serde(default, deserialize_with = "amount")]
    pub tax_amount: f64,
    #[serde(default)]
    pub currency: Option<String>,
}

impl Reservation {
    /// `[check_in, check_out)` touches the inclusive period `[start, end]`.
    pub fn overlaps(&self, start: NaiveDate, end: NaiveDate) -> bool {
        !(self.check_out_date <= start || self.check_in_date > end)
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct Expense {
    pub id: String,
    #[serde(default, deserialize_with = "optional_id")]
    pub unit_id: Option<String>,
    #[serde(default, deserialize_with = "optional_id")]
    pub property_id: Option<String>,
    pub expense_date: NaiveDate,
    #[serde(default, deserialize_with = "amount")]
    pub amount: f64,
    #[serde(default = "settlement_currency", deserialize_with = "currency_or_settlement")]
    pub currency: String,
    #[serde(default, deserialize_with = "lenient_number")]
    pub fx_rate_to_pyg: Option<f64>,
    #[serde(default)]
    pub category: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Lease {
    pub id: String,
    #[serde(default, deserialize_with = "optional_id")]
    pub unit_id: Option<String>,
    #[serde(default, deserialize_with = "optional_id")]
    pub property_id: Option<String>,
    #[serde(default)]
    pub lease_status: Option<String>,
    #[serde(default, deserialize_with = "amount")]
    pub monthly_rent: f64,
    #[serde(default, deserialize_with = "amount")]
    pub platform_fee: f64,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct LeaseCharge {
    pub id: String,
    pub lease_id: String,
    pub charge_type: String,
    pub charge_date: NaiveDate,
    #[serde(default, deserialize_with = "amount")]
    pub amount: f64,
    #[serde(default = "settlement_currency", deserialize_with = "currency_or_settlement")]
    pub currency: String,
    #[serde(default)]
    pub status: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct CollectionRecord {
    pub id: String,
    pub lease_id: String,
    #[serde(default, deserialize_with = "optional_id")]
    pub lease_charge_id: Option<String>,
    pub due_date: NaiveDate,
    #[serde(default)]
    pub paid_at: Option<String>,
    #[serde(default, deserialize_with = "amount")]
    pub amount: f64,
    #[serde(default = "settlement_currency", deserialize_with = "currency_or_settlement")]
    pub currency: String,
    pub status: CollectionStatus,
}

impl CollectionRecord {
    /// Date the money landed: `paid_at` truncated to its date, else `due_date`.
    /// A `paid_at` that does not start with an ISO date also falls back.
    pub fn effective_paid_on(&self) -> NaiveDate {
        self.paid_at
            .as_deref()
            .map(str::trim)
            .filter(|value| !value.is_empty())
            .and_then(|value| value.get(..10))
            .and_then(|day| NaiveDate::parse_from_str(day, "%Y-%m-%d").ok())
            .unwrap_or(self.due_date)
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct Unit {
    pub id: String,
    #[serde(default, deserialize_with = "optional_id")]
    pub property_id: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Property {
    pub id: String,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default, deserialize_with = "optional_id")]
    pub asset_owner_id: Option<String>,
    #[serde(default)]
    pub is_active: Option<bool>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct OwnerStatement {
    pub id: String,
    pub organization_id: String,
    pub period_start: NaiveDate,
    pub period_end: NaiveDate,
    #[serde(default, deserialize_with = "optional_id")]
    pub property_id: Option<String>,
    #[serde(default, deserialize_with = "optional_id")]
    pub unit_id: Option<String>,
    #[serde(default)]
    pub currency: Option<String>,
    pub status: StatementStatus,
    #[serde(default)]
    pub approval_status: Option<String>,
    #[serde(default, deserialize_with = "amount")]
    pub gross_revenue: f64,
    #[serde(default, deserialize_with = "amount")]
    pub lease_collections: f64,
    #[serde(default, deserialize_with = "amount")]
    pub service_fees: f64,
    #[serde(default, deserialize_with = "amount")]
    pub collection_fees: f64,
    #[serde(default, deserialize_with = "amount")]
    pub platform_fees: f64,
    #[serde(default, deserialize_with = "amount")]
    pub taxes_collected: f64,
    #[serde(default, deserialize_with = "amount")]
    pub operating_expenses: f64,
    #[serde(default, deserialize_with = "amount")]
    pub net_payout: f64,
}

/// Converts one store row into its typed record, naming the table and row id
/// when the shape is wrong.
pub fn from_row<T: DeserializeOwned>(table: &str, row: Value) -> AppResult<T> {
    let row_id = row
        .get("id")
        .and_then(Value::as_str)
        .unwrap_or("?")
        .to_string();
    serde_json::from_value(row).map_err(|error| {
        tracing::error!(table, row_id = %row_id, error = %error, "Malformed row");
        AppError::Internal(format!("Malformed {table} row {row_id}: {error}"))
    })
}

pub fn from_rows<T: DeserializeOwned>(table: &str, rows: Vec<Value>) -> AppResult<Vec<T>> {
    rows.into_iter().map(|row| from_row(table, row)).collect()
}

/// Money columns come back from Postgres `numeric` either as JSON numbers or
/// as strings. `null` counts as zero; anything else non-numeric is rejected.
fn amount<'de, D>(deserializer: D) -> Result<f64, D::Error>
where
    D: Deserializer<'de>,
{
    match Value::deserialize(deserializer)? {
        Value::Null => Ok(0.0),
        Value::Number(number) => number
            .as_f64()
            .ok_or_else(|| serde::de::Error::custom("amount out of range")),
        Value::String(text) if text.trim().is_empty() => Ok(0.0),
        Value::String(text) => text
            .trim()
            .parse::<f64>()
            .map_err(|_| serde::de::Error::custom(format!("invalid amount '{text}'"))),
        other => Err(serde::de::Error::custom(format!(
            "invalid amount {other}"
        ))),
    }
}

fn lenient_number<'de, D>(deserializer: D) -> Result<Option<f64>, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(match Value::deserialize(deserializer)? {
        Value::Number(number) => number.as_f64(),
        Value::String(text) => text.trim().parse::<f64>().ok(),
        _ => None,
    })
}

fn settlement_currency() -> String {
    "PYG".to_string()
}

/// Legacy rows may carry no currency at all; those amounts are PYG.
fn currency_or_settlement<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(Option::<String>::deserialize(deserializer)?
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
        .unwrap_or_else(settlement_currency))
}

fn optional_id<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(Option::<String>::deserialize(deserializer)?
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty()))
}
