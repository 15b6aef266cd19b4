use std::cmp::Ordering;
use std::collections::HashMap;
use std::sync::Mutex;

use serde_json::{Map, Value};

use super::{
    parse_bool_filter_value, parse_filter_key, render_scalar, validate_table, FilterOperator,
    RowStore,
};
use crate::error::{AppError, AppResult};

/// In-process row store with the same filter semantics as [`super::PgRowStore`].
///
/// Created rows get sequential `<table>-<n>` ids unless the payload carries one.
#[derive(Debug, Default)]
pub struct MemoryRowStore {
    tables: Mutex<HashMap<String, Vec<Map<String, Value>>>>,
    created: Mutex<HashMap<String, usize>>,
    sequence: Mutex<u64>,
}

impl MemoryRowStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seeds a table without counting the rows as created.
    pub fn insert_rows(&self, table: &str, rows: Vec<Value>) {
        let mut tables = lock(&self.tables);
        let entries = tables.entry(table.to_string()).or_default();
        entries.extend(rows.into_iter().filter_map(|row| match row {
            Value::Object(obj) => Some(obj),
            _ => None,
        }));
    }

    pub fn rows(&self, table: &str) -> Vec<Value> {
        lock(&self.tables)
            .get(table)
            .map(|rows| rows.iter().cloned().map(Value::Object).collect())
            .unwrap_or_default()
    }

    /// Number of rows written through `create_row` for `table`.
    pub fn created_count(&self, table: &str) -> usize {
        lock(&self.created).get(table).copied().unwrap_or(0)
    }

    fn next_id(&self, table: &str) -> String {
        let mut sequence = lock(&self.sequence);
        *sequence += 1;
        format!("{table}-{}", *sequence)
    }
}

fn lock<T>(mutex: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    mutex
        .lock()
        .unwrap_or_else(std::sync::PoisonError::into_inner)
}

impl RowStore for MemoryRowStore {
    async fn list_rows(
        &self,
        table: &str,
        filters: Option<&Map<String, Value>>,
        limit: i64,
        order_by: &str,
        ascending: bool,
    ) -> AppResult<Vec<Value>> {
        let table_name = validate_table(table)?;
        let mut predicates = Vec::new();
        if let Some(filter_map) = filters {
            for (key, value) in filter_map {
                let (column, operator) = parse_filter_key(key)?;
                if matches!(value, Value::Array(_)) && operator != FilterOperator::Eq {
                    return Err(AppError::BadRequest(format!(
                        "Filter '{key}' does not support array values."
                    )));
                }
                predicates.push((column.to_string(), operator, value.clone()));
            }
        }

        let mut matched = lock(&self.tables)
            .get(table_name)
            .map(|rows| {
                rows.iter()
                    .filter(|row| {
                        predicates
                            .iter()
                            .all(|(column, operator, value)| {
                                row_matches(row.get(column), *operator, value)
                            })
                    })
                    .cloned()
                    .collect::<Vec<_>>()
            })
            .unwrap_or_default();

        let order_key = if order_by.trim().is_empty() {
            "created_at"
        } else {
            order_by.trim()
        };
        matched.sort_by(|left, right| {
            let ordering = compare_values(left.get(order_key), right.get(order_key));
            if ascending {
                ordering
            } else {
                ordering.reverse()
            }
        });

        let take = usize::try_from(limit.max(1)).unwrap_or(usize::MAX);
        Ok(matched.into_iter().take(take).map(Value::Object).collect())
    }

    async fn get_row(&self, table: &str, row_id: &str) -> AppResult<Value> {
        let table_name = validate_table(table)?;
        lock(&self.tables)
            .get(table_name)
            .and_then(|rows| rows.iter().find(|row| id_matches(row, row_id)))
            .cloned()
            .map(Value::Object)
            .ok_or_else(|| AppError::NotFound(format!("{table_name} record not found.")))
    }

    async fn create_row(&self, table: &str, payload: &Map<String, Value>) -> AppResult<Value> {
        let table_name = validate_table(table)?;
        if payload.is_empty() {
            return Err(AppError::BadRequest(format!(
                "Could not create {table_name} record."
            )));
        }

        let mut row = payload.clone();
        let has_id = row
            .get("id")
            .and_then(Value::as_str)
            .is_some_and(|id| !id.trim().is_empty());
        if !has_id {
            row.insert("id".to_string(), Value::String(self.next_id(table_name)));
        }

        lock(&self.tables)
            .entry(table_name.to_string())
            .or_default()
            .push(row.clone());
        *lock(&self.created).entry(table_name.to_string()).or_default() += 1;
        Ok(Value::Object(row))
    }

    async fn update_row(
        &self,
        table: &str,
        row_id: &str,
        payload: &Map<String, Value>,
    ) -> AppResult<Value> {
        let table_name = validate_table(table)?;
        if payload.is_empty() {
            return Err(AppError::BadRequest("No fields to update.".to_string()));
        }

        let mut tables = lock(&self.tables);
        let row = tables
            .get_mut(table_name)
            .and_then(|rows| rows.iter_mut().find(|row| id_matches(row, row_id)))
            .ok_or_else(|| AppError::NotFound(format!("{table_name} record not found.")))?;
        for (key, value) in payload {
            row.insert(key.clone(), value.clone());
        }
        Ok(Value::Object(row.clone()))
    }
}

fn id_matches(row: &Map<String, Value>, row_id: &str) -> bool {
    row.get("id")
        .and_then(Value::as_str)
        .is_some_and(|id| id.trim() == row_id.trim())
}

fn row_matches(cell: Option<&Value>, operator: FilterOperator, expected: &Value) -> bool {
    if operator == FilterOperator::IsNull {
        let is_null = cell.map_or(true, Value::is_null);
        return is_null == parse_bool_filter_value(expected);
    }

    match expected {
        Value::Null => true,
        Value::Array(items) if items.is_empty() => true,
        Value::Array(items) => cell.is_some_and(|actual| {
            items
                .iter()
                .any(|item| compare_values(Some(actual), Some(item)) == Ordering::Equal)
        }),
        _ => {
            let Some(actual) = cell.filter(|value| !value.is_null()) else {
                return false;
            };
            let ordering = compare_values(Some(actual), Some(expected));
            match operator {
                FilterOperator::Eq => ordering == Ordering::Equal,
                FilterOperator::Gt => ordering == Ordering::Greater,
                FilterOperator::Gte => ordering != Ordering::Less,
                FilterOperator::Lt => ordering == Ordering::Less,
                FilterOperator::Lte => ordering != Ordering::Greater,
                FilterOperator::IsNull => false,
            }
        }
    }
}

/// Numbers compare numerically, everything else by rendered text, which is
/// chronological for ISO dates and timestamps. Missing values sort last.
fn compare_values(left: Option<&Value>, right: Option<&Value>) -> Ordering {
    let left = left.filter(|value| !value.is_null());
    let right = right.filter(|value| !value.is_null());
    match (left, right) {
        (None, None) => Ordering::Equal,
        (None, Some(_)) => Ordering::Greater,
        (Some(_), None) => Ordering::Less,
        (Some(left), Some(right)) => match (as_number(left), as_number(right)) {
            (Some(a), Some(b)) if left.is_number() || right.is_number() => {
                a.partial_cmp(&b).unwrap_or(Ordering::Equal)
            }
            _ => render_scalar(left).trim().cmp(render_scalar(right).trim()),
        },
    }
}

fn as_number(value: &Value) -> Option<f64> {
    match value {
        Value::Number(number) => number.as_f64(),
        Value::String(text) => text.trim().parse::<f64>().ok(),
        _ => None,
    }
}
