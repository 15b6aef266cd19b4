pub mod memory;
pub mod table_service;

use serde_json::{Map, Value};

use crate::error::{AppError, AppResult};

pub use memory::MemoryRowStore;
pub use table_service::PgRowStore;

/// Row-oriented persistence the billing engine reads from and writes to.
///
/// Filters are keyed by column name with an optional `__gt`, `__gte`, `__lt`,
/// `__lte`, `__is_null` or `__in` suffix. An array value
/// means "column is one of"; an empty array or `null` value leaves the column
/// unfiltered, so callers must short-circuit empty id sets themselves.
#[allow(async_fn_in_trait)]
pub trait RowStore {
    async fn list_rows(
        &self,
        table: &str,
        filters: Option<&Map<String, Value>>,
        limit: i64,
        order_by: &str,
        ascending: bool,
    ) -> AppResult<Vec<Value>>;

    async fn get_row(&self, table: &str, row_id: &str) -> AppResult<Value>;

    async fn create_row(&self, table: &str, payload: &Map<String, Value>) -> AppResult<Value>;

    async fn update_row(
        &self,
        table: &str,
        row_id: &str,
        payload: &Map<String, Value>,
    ) -> AppResult<Value>;
}

pub(crate) const ALLOWED_TABLES: &[&str] = &[
    "collection_records",
    "expenses",
    "lease_charges",
    "leases",
    "organizations",
    "owner_statements",
    "properties",
    "reservations",
    "units",
];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum FilterOperator {
    Eq,
    Gt,
    Gte,
    Lt,
    Lte,
    IsNull,
}

pub(crate) fn parse_filter_key(filter_key: &str) -> AppResult<(&str, FilterOperator)> {
    let mut column = filter_key;
    let mut operator = FilterOperator::Eq;

    if let Some((candidate_column, suffix)) = filter_key.rsplit_once("__") {
        operator = match suffix {
            "gt" => FilterOperator::Gt,
            "gte" => FilterOperator::Gte,
            "lt" => FilterOperator::Lt,
            "lte" => FilterOperator::Lte,
            "is_null" => FilterOperator::IsNull,
            _ => FilterOperator::Eq,
        };
        if !matches!(operator, FilterOperator::Eq) || suffix == "in" {
            column = candidate_column;
        }
    }

    Ok((validate_identifier(column)?, operator))
}

pub(crate) fn validate_table(table: &str) -> AppResult<&str> {
    let normalized = validate_identifier(table)?;
    if ALLOWED_TABLES.contains(&normalized) {
        return Ok(normalized);
    }
    Err(AppError::Forbidden(format!(
        "Table '{normalized}' is not allowed."
    )))
}

pub(crate) fn validate_identifier(identifier: &str) -> AppResult<&str> {
    let trimmed = identifier.trim();
    if trimmed.is_empty() {
        return Err(AppError::BadRequest(
            "Identifier cannot be empty.".to_string(),
        ));
    }
    if !trimmed.chars().all(|character| {
        character.is_ascii_lowercase() || character.is_ascii_digit() || character == '_'
    }) || trimmed
        .chars()
        .next()
        .is_some_and(|first| first.is_ascii_digit())
    {
        return Err(AppError::BadRequest(format!(
            "Invalid identifier '{trimmed}'."
        )));
    }
    Ok(trimmed)
}

pub(crate) fn render_scalar(value: &Value) -> String {
    match value {
        Value::Null => String::new(),
        Value::String(text) => text.clone(),
        Value::Bool(flag) => flag.to_string(),
        Value::Number(number) => number.to_string(),
        Value::Array(_) | Value::Object(_) => value.to_string(),
    }
}

pub(crate) fn parse_bool_filter_value(value: &Value) -> bool {
    match value {
        Value::Null => true,
        Value::Bool(flag) => *flag,
        Value::Number(number) => number.as_f64().is_some_and(|parsed| parsed != 0.0),
        Value::String(text) => matches!(
            text.trim().to_ascii_lowercase().as_str(),
            "true" | "t" | "1" | "yes" | "y"
        ),
        _ => false,
    }
}

/// Builds a filter map from literal pairs.
pub fn json_map(entries: &[(&str, Value)]) -> Map<String, Value> {
    let mut map = Map::new();
    for (key, value) in entries {
        map.insert((*key).to_string(), value.clone());
    }
    map
}

pub fn string_array<I, S>(values: I) -> Value
where
    I: IntoIterator<Item = S>,
    S: Into<String>,
{
    Value::Array(
        values
            .into_iter()
            .map(|value| Value::String(value.into()))
            .collect(),
    )
}

#[cfg(test)]
mod tests {
    use super::{parse_filter_key, validate_identifier, validate_table, FilterOperator};

    #[test]
    fn parses_filter_suffixes() {
        assert_eq!(
            parse_filter_key("expense_date__gte").expect("valid key"),
            ("expense_date", FilterOperator::Gte)
        );
        assert_eq!(
            parse_filter_key("lease_id__in").expect("valid key"),
            ("lease_id", FilterOperator::Eq)
        );
        assert_eq!(
            parse_filter_key("paid_at__is_null").expect("valid key"),
            ("paid_at", FilterOperator::IsNull)
        );
        assert_eq!(
            parse_filter_key("organization_id").expect("valid key"),
            ("organization_id", FilterOperator::Eq)
        );
    }

    #[test]
    fn rejects_unsafe_identifiers() {
        assert!(validate_identifier("amount; drop table").is_err());
        assert!(validate_identifier("1st").is_err());
        assert!(validate_identifier("  ").is_err());
        assert!(validate_table("audit_logs").is_err());
        assert_eq!(validate_table(" lease_charges ").ok(), Some("lease_charges"));
    }
}
