use chrono::{Datelike, NaiveDate, Utc};
use serde_json::{Map, Value};

use crate::{
    error::{AppError, AppResult},
    records::{from_row, from_rows, OwnerStatement, Property, StatementStatus},
    repository::{json_map, RowStore},
    schemas::{validate_input, CreateOwnerStatementInput},
    services::{
        fx::SETTLEMENT_CURRENCY,
        owner_statement::{build_statement_breakdown, StatementBreakdown},
        reconciliation::{reconcile_stored_statement, StatementReconciliation},
        statement_scope::{aggregate_period, StatementScope},
    },
};

/// Computes a statement for the input period and stores it as a draft.
///
/// The response is the stored row plus its `line_items` and a
/// `reconciliation` block, which is zero-diff by construction.
pub async fn create_owner_statement<S: RowStore>(
    store: &S,
    input: &CreateOwnerStatementInput,
    user_id: Option<&str>,
) -> AppResult<Value> {
    validate_input(input)?;
    let currency = input.currency.trim().to_ascii_uppercase();
    if currency != SETTLEMENT_CURRENCY {
        return Err(AppError::BadRequest(format!(
            "Owner statements are computed in {SETTLEMENT_CURRENCY}."
        )));
    }

    let scope = StatementScope::parse(
        &input.organization_id,
        &input.period_start,
        &input.period_end,
        input.property_id.as_deref(),
        input.unit_id.as_deref(),
    )?;
    let scoped = aggregate_period(store, &scope).await?;
    let breakdown = build_statement_breakdown(&scoped)?;

    let mut statement = statement_payload(&scope, &breakdown);
    statement.insert("currency".to_string(), Value::String(currency));
    let created = store.create_row("owner_statements", &statement).await?;

    let statement_id = created.get("id").and_then(Value::as_str).unwrap_or_default();
    tracing::info!(
        organization_id = %scope.organization_id,
        statement_id,
        user_id = user_id.unwrap_or_default(),
        net_payout = breakdown.net_payout,
        "Created owner statement"
    );

    let reconciliation = StatementReconciliation::from_breakdown(breakdown.net_payout, &breakdown);
    with_breakdown(created, &breakdown, reconciliation)
}

/// Stored statement with a fresh breakdown and its drift from the snapshot.
pub async fn get_owner_statement<S: RowStore>(store: &S, statement_id: &str) -> AppResult<Value> {
    let record = store.get_row("owner_statements", statement_id).await?;
    let stored: OwnerStatement = from_row("owner_statements", record.clone())?;
    let (breakdown, reconciliation) = reconcile_stored_statement(store, &stored).await?;
    with_breakdown(record, &breakdown, reconciliation)
}

pub async fn request_owner_statement_approval<S: RowStore>(
    store: &S,
    statement_id: &str,
) -> AppResult<Value> {
    let stored = load_statement(store, statement_id).await?;
    if stored.status != StatementStatus::Draft {
        return Err(AppError::BadRequest(
            "Only draft statements can be submitted for approval.".to_string(),
        ));
    }

    let patch = json_map(&[
        ("approval_status", Value::String("pending".to_string())),
        ("approval_requested_at", Value::String(Utc::now().to_rfc3339())),
    ]);
    store.update_row("owner_statements", statement_id, &patch).await
}

pub async fn approve_owner_statement<S: RowStore>(
    store: &S,
    statement_id: &str,
    user_id: &str,
) -> AppResult<Value> {
    let stored = load_statement(store, statement_id).await?;
    if stored.approval_status.as_deref() != Some("pending") {
        return Err(AppError::BadRequest(
            "Only statements with pending approval can be approved.".to_string(),
        ));
    }

    let patch = json_map(&[
        ("approval_status", Value::String("approved".to_string())),
        ("approved_by", Value::String(user_id.to_string())),
        ("approved_at", Value::String(Utc::now().to_rfc3339())),
    ]);
    store.update_row("owner_statements", statement_id, &patch).await
}

/// Freezes a draft. Finalized statements are never recomputed or changed.
pub async fn finalize_owner_statement<S: RowStore>(
    store: &S,
    statement_id: &str,
) -> AppResult<Value> {
    let stored = load_statement(store, statement_id).await?;
    if stored.status == StatementStatus::Finalized {
        return Err(AppError::BadRequest(
            "Statement is already finalized.".to_string(),
        ));
    }

    let patch = json_map(&[(
        "status",
        Value::String(StatementStatus::Finalized.as_str().to_string()),
    )]);
    store.update_row("owner_statements", statement_id, &patch).await
}

/// First and last day of the calendar month before `today`.
pub fn previous_month_period(today: NaiveDate) -> (NaiveDate, NaiveDate) {
    let first_of_this_month = today.with_day(1).unwrap_or(today);
    let period_end = first_of_this_month.pred_opt().unwrap_or(first_of_this_month);
    let period_start = period_end.with_day(1).unwrap_or(period_end);
    (period_start, period_end)
}

/// Drafts last month's statement for every active, owned property of the
/// organization that does not have one yet. Properties whose statement cannot
/// be computed are logged and skipped. Returns how many were created.
pub async fn auto_generate_monthly_statements<S: RowStore>(
    store: &S,
    org_id: &str,
    today: NaiveDate,
) -> AppResult<u32> {
    let (period_start, period_end) = previous_month_period(today);

    let properties = store
        .list_rows(
            "properties",
            Some(&json_map(&[
                ("organization_id", Value::String(org_id.to_string())),
                ("is_active", Value::Bool(true)),
                ("asset_owner_id__is_null", Value::Bool(false)),
            ])),
            1000,
            "created_at",
            true,
        )
        .await?;
    let properties: Vec<Property> = from_rows("properties", properties)?;

    let mut created_count: u32 = 0;
    for property in properties
        .iter()
        .filter(|property| property.asset_owner_id.is_some() && property.is_active != Some(false))
    {
        let property_id = property.id.as_str();
        if statement_exists(store, org_id, property_id, period_start, period_end).await {
            continue;
        }

        let scope = StatementScope {
            organization_id: org_id.to_string(),
            period_start,
            period_end,
            property_id: Some(property_id.to_string()),
            unit_id: None,
        };
        let breakdown = match aggregate_period(store, &scope)
            .await
            .and_then(|scoped| build_statement_breakdown(&scoped))
        {
            Ok(breakdown) => breakdown,
            Err(error) => {
                tracing::warn!(property_id, error = %error, "Failed to build statement breakdown");
                continue;
            }
        };

        let mut statement = statement_payload(&scope, &breakdown);
        statement.insert(
            "currency".to_string(),
            Value::String(SETTLEMENT_CURRENCY.to_string()),
        );
        statement.insert(
            "title".to_string(),
            Value::String(format!(
                "{} - {} {}",
                property.name.as_deref().unwrap_or_default().trim(),
                month_name(period_start.month()),
                period_start.year()
            )),
        );

        match store.create_row("owner_statements", &statement).await {
            Ok(_) => created_count += 1,
            Err(error) => {
                tracing::warn!(property_id, error = %error, "Failed to create owner statement");
            }
        }
    }

    if created_count > 0 {
        tracing::info!(org_id, created_count, "Auto-generated owner statements");
    }
    Ok(created_count)
}

/// A failed lookup counts as existing so a flaky read never double-books.
async fn statement_exists<S: RowStore>(
    store: &S,
    org_id: &str,
    property_id: &str,
    period_start: NaiveDate,
    period_end: NaiveDate,
) -> bool {
    let filters = json_map(&[
        ("organization_id", Value::String(org_id.to_string())),
        ("property_id", Value::String(property_id.to_string())),
        ("period_start", Value::String(period_start.to_string())),
        ("period_end", Value::String(period_end.to_string())),
    ]);
    match store
        .list_rows("owner_statements", Some(&filters), 1, "created_at", false)
        .await
    {
        Ok(rows) => !rows.is_empty(),
        Err(error) => {
            tracing::warn!(property_id, error = %error, "Could not check for an existing statement");
            true
        }
    }
}

async fn load_statement<S: RowStore>(store: &S, statement_id: &str) -> AppResult<OwnerStatement> {
    let record = store.get_row("owner_statements", statement_id).await?;
    from_row("owner_statements", record)
}

fn statement_payload(scope: &StatementScope, breakdown: &StatementBreakdown) -> Map<String, Value> {
    let mut statement = json_map(&[
        ("organization_id", Value::String(scope.organization_id.clone())),
        ("period_start", Value::String(scope.period_start.to_string())),
        ("period_end", Value::String(scope.period_end.to_string())),
        ("status", Value::String(StatementStatus::Draft.as_str().to_string())),
    ]);
    if let Some(property_id) = scope.property_id.as_ref() {
        statement.insert("property_id".to_string(), Value::String(property_id.clone()));
    }
    if let Some(unit_id) = scope.unit_id.as_ref() {
        statement.insert("unit_id".to_string(), Value::String(unit_id.clone()));
    }
    statement.extend(breakdown.totals_payload());
    statement
}

fn with_breakdown(
    record: Value,
    breakdown: &StatementBreakdown,
    reconciliation: StatementReconciliation,
) -> AppResult<Value> {
    let mut response = record.as_object().cloned().unwrap_or_default();
    response.insert("line_items".to_string(), breakdown.line_items_json()?);
    response.insert(
        "reconciliation".to_string(),
        serde_json::to_value(reconciliation).map_err(|error| {
            AppError::Internal(format!("Could not serialize reconciliation: {error}"))
        })?,
    );
    Ok(Value::Object(response))
}

fn month_name(month: u32) -> &'static str {
    match month {
        1 => "January",
        2 => "February",
        3 => "March",
        4 => "April",
        5 => "May",
        6 => "June",
        7 => "July",
        8 => "August",
        9 => "September",
        10 => "October",
        11 => "November",
        12 => "December",
        _ => "Unknown",
    }
}
