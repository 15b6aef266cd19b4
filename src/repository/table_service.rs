use chrono::{DateTime, FixedOffset, NaiveDate};
use serde_json::{Map, Value};
use sqlx::{postgres::PgRow, Postgres, QueryBuilder, Row};

use super::{
    parse_bool_filter_value, parse_filter_key, render_scalar, validate_identifier, validate_table,
    FilterOperator, RowStore,
};
use crate::error::{AppError, AppResult};

/// PostgreSQL-backed row store. Rows travel as `row_to_json` objects and
/// writes go through `jsonb_populate_record` so column types are resolved by
/// the table definition.
#[derive(Debug, Clone)]
pub struct PgRowStore {
    pool: sqlx::PgPool,
    max_limit: i64,
}

impl PgRowStore {
    pub fn new(pool: sqlx::PgPool, max_limit: i64) -> Self {
        Self {
            pool,
            max_limit: max_limit.max(1),
        }
    }
}

impl RowStore for PgRowStore {
    async fn list_rows(
        &self,
        table: &str,
        filters: Option<&Map<String, Value>>,
        limit: i64,
        order_by: &str,
        ascending: bool,
    ) -> AppResult<Vec<Value>> {
        let table_name = validate_table(table)?;
        let order_name = if order_by.trim().is_empty() {
            "created_at"
        } else {
            validate_identifier(order_by)?
        };

        let mut query = QueryBuilder::<Postgres>::new("SELECT row_to_json(t) AS row FROM ");
        query.push(table_name).push(" t WHERE 1=1");
        if let Some(filter_map) = filters {
            for (key, value) in filter_map {
                push_filter_clause(&mut query, key, value)?;
            }
        }

        query
            .push(" ORDER BY t.")
            .push(order_name)
            .push(if ascending { " ASC" } else { " DESC" })
            .push(" LIMIT ")
            .push_bind(limit.clamp(1, self.max_limit));

        let rows = query
            .build()
            .fetch_all(&self.pool)
            .await
            .map_err(map_db_error)?;
        Ok(read_rows(rows))
    }

    async fn get_row(&self, table: &str, row_id: &str) -> AppResult<Value> {
        let table_name = validate_table(table)?;
        let mut query = QueryBuilder::<Postgres>::new("SELECT row_to_json(t) AS row FROM ");
        query.push(table_name).push(" t WHERE ");
        push_comparison(
            &mut query,
            "id",
            " = ",
            infer_bind("id", &Value::String(row_id.to_string())),
        );
        query.push(" LIMIT 1");

        let row = query
            .build()
            .fetch_optional(&self.pool)
            .await
            .map_err(map_db_error)?;
        read_row(row).ok_or_else(|| AppError::NotFound(format!("{table_name} record not found.")))
    }

    async fn create_row(&self, table: &str, payload: &Map<String, Value>) -> AppResult<Value> {
        let table_name = validate_table(table)?;
        if payload.is_empty() {
            return Err(AppError::BadRequest(format!(
                "Could not create {table_name} record."
            )));
        }
        let keys = sorted_columns(payload)?;

        let mut query = QueryBuilder::<Postgres>::new("INSERT INTO ");
        query.push(table_name).push(" (").push(keys.join(", "));
        query.push(") SELECT ").push(
            keys.iter()
                .map(|key| format!("r.{key}"))
                .collect::<Vec<_>>()
                .join(", "),
        );
        query
            .push(" FROM jsonb_populate_record(NULL::")
            .push(table_name)
            .push(", ")
            .push_bind(Value::Object(payload.clone()))
            .push(") r RETURNING row_to_json(")
            .push(table_name)
            .push(".*) AS row");

        let row = query
            .build()
            .fetch_optional(&self.pool)
            .await
            .map_err(map_db_error)?;
        read_row(row)
            .ok_or_else(|| AppError::Internal(format!("Could not create {table_name} record.")))
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
        let keys = sorted_columns(payload)?;

        let mut query = QueryBuilder::<Postgres>::new("UPDATE ");
        query.push(table_name).push(" t SET ").push(
            keys.iter()
                .map(|key| format!("{key} = r.{key}"))
                .collect::<Vec<_>>()
                .join(", "),
        );
        query
            .push(" FROM jsonb_populate_record(NULL::")
            .push(table_name)
            .push(", ")
            .push_bind(Value::Object(payload.clone()))
            .push(") r WHERE ");
        push_comparison(
            &mut query,
            "id",
            " = ",
            infer_bind("id", &Value::String(row_id.to_string())),
        );
        query.push(" RETURNING row_to_json(t) AS row");

        let row = query
            .build()
            .fetch_optional(&self.pool)
            .await
            .map_err(map_db_error)?;
        read_row(row).ok_or_else(|| AppError::NotFound(format!("{table_name} record not found.")))
    }
}

fn sorted_columns(payload: &Map<String, Value>) -> AppResult<Vec<&str>> {
    let mut keys = payload
        .keys()
        .map(|key| validate_identifier(key))
        .collect::<AppResult<Vec<_>>>()?;
    keys.sort_unstable();
    Ok(keys)
}

fn read_row(row: Option<PgRow>) -> Option<Value> {
    row.and_then(|value| value.try_get::<Option<Value>, _>("row").ok().flatten())
}

fn read_rows(rows: Vec<PgRow>) -> Vec<Value> {
    rows.into_iter().filter_map(|row| read_row(Some(row))).collect()
}

/// A filter operand with the Postgres type it should be bound as.
#[derive(Debug, Clone)]
enum Bind {
    Text(String),
    Uuid(uuid::Uuid),
    Bool(bool),
    I64(i64),
    F64(f64),
    Date(NaiveDate),
    Timestamp(DateTime<FixedOffset>),
}

fn push_filter_clause(
    query: &mut QueryBuilder<Postgres>,
    filter_key: &str,
    value: &Value,
) -> AppResult<()> {
    let (column, operator) = parse_filter_key(filter_key)?;

    if operator == FilterOperator::IsNull {
        query.push(" AND t.").push(column);
        query.push(if parse_bool_filter_value(value) {
            " IS NULL"
        } else {
            " IS NOT NULL"
        });
        return Ok(());
    }

    match value {
        Value::Null => Ok(()),
        Value::Array(items) => {
            if operator != FilterOperator::Eq {
                return Err(AppError::BadRequest(format!(
                    "Filter '{filter_key}' does not support array values."
                )));
            }
            if items.is_empty() {
                return Ok(());
            }
            query.push(" AND ");
            push_any(query, column, items);
            Ok(())
        }
        _ => {
            query.push(" AND ");
            push_comparison(query, column, sql_operator(operator), infer_bind(column, value));
            Ok(())
        }
    }
}

fn sql_operator(operator: FilterOperator) -> &'static str {
    match operator {
        FilterOperator::Gt => " > ",
        FilterOperator::Gte => " >= ",
        FilterOperator::Lt => " < ",
        FilterOperator::Lte => " <= ",
        _ => " = ",
    }
}

fn push_comparison(query: &mut QueryBuilder<Postgres>, column: &str, operator: &str, bind: Bind) {
    query.push("t.").push(column);
    match bind {
        Bind::Text(text) => {
            query.push("::text").push(operator).push_bind(text);
        }
        Bind::Uuid(id) => {
            query.push(operator).push_bind(id);
        }
        Bind::Bool(flag) => {
            query.push(operator).push_bind(flag);
        }
        Bind::I64(number) => {
            query.push(operator).push_bind(number);
        }
        Bind::F64(number) => {
            query.push(operator).push_bind(number);
        }
        Bind::Date(date) => {
            query.push(operator).push_bind(date);
        }
        Bind::Timestamp(timestamp) => {
            query.push(operator).push_bind(timestamp);
        }
    }
}

/// `column = ANY(...)`, typed as uuid[] when every item parses as one and as
/// text[] otherwise.
fn push_any(query: &mut QueryBuilder<Postgres>, column: &str, items: &[Value]) {
    query.push("t.").push(column);
    if is_uuid_identifier(column) {
        let parsed = items
            .iter()
            .map(|item| {
                item.as_str()
                    .and_then(|text| uuid::Uuid::parse_str(text.trim()).ok())
            })
            .collect::<Option<Vec<_>>>();
        if let Some(ids) = parsed {
            query.push(" = ANY(").push_bind(ids).push(")");
            return;
        }
    }
    let texts = items.iter().map(render_scalar).collect::<Vec<_>>();
    query.push("::text = ANY(").push_bind(texts).push(")");
}

fn infer_bind(column: &str, value: &Value) -> Bind {
    match value {
        Value::Bool(flag) => Bind::Bool(*flag),
        Value::Number(number) => number
            .as_i64()
            .map(Bind::I64)
            .or_else(|| number.as_f64().map(Bind::F64))
            .unwrap_or_else(|| Bind::Text(number.to_string())),
        Value::String(text) => {
            let trimmed = text.trim();
            if is_uuid_identifier(column) {
                if let Ok(parsed) = uuid::Uuid::parse_str(trimmed) {
                    return Bind::Uuid(parsed);
                }
            }
            if column.ends_with("_at") {
                if let Ok(parsed) = DateTime::parse_from_rfc3339(trimmed) {
                    return Bind::Timestamp(parsed);
                }
            }
            if is_date_identifier(column) {
                if let Ok(parsed) = NaiveDate::parse_from_str(trimmed, "%Y-%m-%d") {
                    return Bind::Date(parsed);
                }
            }
            Bind::Text(text.clone())
        }
        _ => Bind::Text(render_scalar(value)),
    }
}

fn is_uuid_identifier(column: &str) -> bool {
    column == "id" || column.ends_with("_id")
}

fn is_date_identifier(column: &str) -> bool {
    column.ends_with("_date")
        || column.ends_with("_on")
        || matches!(column, "period_start" | "period_end")
}

fn map_db_error(error: sqlx::Error) -> AppError {
    let message = error.to_string();
    tracing::error!(db_error = %message, "Database query failed");

    if message.contains("23505")
        || message
            .to_ascii_lowercase()
            .contains("duplicate key value violates unique constraint")
    {
        return AppError::Conflict("Duplicate value violates a unique constraint.".to_string());
    }
    AppError::Dependency("Database operation failed.".to_string())
}
