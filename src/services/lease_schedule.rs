use std::collections::{HashMap, HashSet};

use chrono::{Months, NaiveDate};
use serde::Serialize;
use serde_json::{Map, Value};

use crate::{
    config::AppConfig,
    error::{AppError, AppResult},
    repository::{json_map, RowStore},
    schemas::{validate_input, LeaseScheduleRequest},
    services::{round2, statement_scope::parse_iso_date},
};

pub const DEFAULT_COLLECTION_SCHEDULE_MONTHS: u32 = 12;
pub const MAX_COLLECTION_SCHEDULE_MONTHS: u32 = 120;

const MONTHLY_RENT_CHARGE_TYPE: &str = "monthly_rent";

/// Rows written (or found) for one lease schedule.
#[derive(Debug, Clone, Default, Serialize)]
pub struct LeaseScheduleResult {
    pub due_dates: Vec<NaiveDate>,
    /// Charges created by this call. Reused rows are not repeated here.
    pub charges: Vec<Value>,
    pub collections: Vec<Value>,
    /// Collection for the first due date, whether it was created or reused.
    pub first_collection: Option<Value>,
}

pub fn ensure_lease_collections_enabled(config: &AppConfig) -> AppResult<()> {
    if config.lease_collections_enabled {
        return Ok(());
    }
    Err(AppError::Forbidden(
        "Lease collections are disabled.".to_string(),
    ))
}

/// `anchor` moved `offset` calendar months ahead, with the day clamped to the
/// last day of the target month (Jan 31 + 1 month is Feb 28 or 29).
pub fn add_months_clamped(anchor: NaiveDate, offset: u32) -> AppResult<NaiveDate> {
    anchor
        .checked_add_months(Months::new(offset))
        .ok_or_else(|| {
            AppError::BadRequest(format!("Due date out of range: {anchor} + {offset} months."))
        })
}

/// Monthly due dates anchored on `first_collection_due_date` (or `starts_on`).
///
/// With `ends_on` the walk stops at the first date past it, and falls back to
/// a single date when the anchor already lies beyond `ends_on`. Otherwise
/// `collection_schedule_months` dates are produced (12 when absent, capped
/// at 120).
pub fn build_monthly_schedule_dates(
    starts_on: NaiveDate,
    first_collection_due_date: Option<NaiveDate>,
    ends_on: Option<NaiveDate>,
    collection_schedule_months: Option<i32>,
) -> AppResult<Vec<NaiveDate>> {
    let due_anchor = first_collection_due_date.unwrap_or(starts_on);

    if let Some(end_date) = ends_on {
        let mut schedule = Vec::new();
        for offset in 0..MAX_COLLECTION_SCHEDULE_MONTHS {
            let due_date = add_months_clamped(due_anchor, offset)?;
            if due_date > end_date {
                break;
            }
            schedule.push(due_date);
        }
        if schedule.is_empty() {
            schedule.push(due_anchor.max(starts_on));
        }
        return Ok(schedule);
    }

    let months = match collection_schedule_months {
        None => DEFAULT_COLLECTION_SCHEDULE_MONTHS,
        Some(value) if value < 1 => {
            return Err(AppError::BadRequest(
                "collection_schedule_months must be >= 1.".to_string(),
            ))
        }
        Some(value) => u32::try_from(value)
            .unwrap_or(MAX_COLLECTION_SCHEDULE_MONTHS)
            .min(MAX_COLLECTION_SCHEDULE_MONTHS),
    };

    (0..months)
        .map(|offset| add_months_clamped(due_anchor, offset))
        .collect()
}

/// Makes sure every due date has a `monthly_rent` charge and a collection
/// record for the lease, creating only the missing ones.
///
/// Rows are matched on their date, so running this again with the same
/// arguments writes nothing. Two concurrent runs for one lease can still both
/// create a row; the store's uniqueness on `(lease_id, date)` has to reject
/// the second.
pub async fn ensure_lease_schedule_rows<S: RowStore>(
    store: &S,
    organization_id: &str,
    lease_id: &str,
    due_dates: &[NaiveDate],
    amount: f64,
    currency: &str,
    created_by_user_id: Option<&str>,
) -> AppResult<LeaseScheduleResult> {
    let due_keys = due_dates
        .iter()
        .map(NaiveDate::to_string)
        .collect::<HashSet<_>>();
    let lease_filter = json_map(&[("lease_id", Value::String(lease_id.to_string()))]);
    let limit = std::cmp::max(300, (due_dates.len() as i64) * 4);

    let (existing_charges, existing_collections) = tokio::try_join!(
        store.list_rows("lease_charges", Some(&lease_filter), limit, "charge_date", true),
        store.list_rows("collection_records", Some(&lease_filter), limit, "due_date", true),
    )?;

    let mut charge_by_due = index_by_date(existing_charges, "charge_date", &due_keys, |row| {
        row.get("charge_type").and_then(Value::as_str) == Some(MONTHLY_RENT_CHARGE_TYPE)
    });
    let mut collection_by_due =
        index_by_date(existing_collections, "due_date", &due_keys, |_| true);

    let amount = round2(amount);
    let mut result = LeaseScheduleResult {
        due_dates: due_dates.to_vec(),
        ..LeaseScheduleResult::default()
    };

    for (index, due_date) in due_dates.iter().enumerate() {
        let due_iso = due_date.to_string();

        let charge = match charge_by_due.get(&due_iso) {
            Some(existing) => existing.clone(),
            None => {
                let payload = json_map(&[
                    ("organization_id", Value::String(organization_id.to_string())),
                    ("lease_id", Value::String(lease_id.to_string())),
                    ("charge_date", Value::String(due_iso.clone())),
                    ("charge_type", Value::String(MONTHLY_RENT_CHARGE_TYPE.to_string())),
                    (
                        "description",
                        Value::String(format!("Recurring monthly lease charge ({due_iso})")),
                    ),
                    ("amount", Value::from(amount)),
                    ("currency", Value::String(currency.to_string())),
                    ("status", Value::String("scheduled".to_string())),
                ]);
                let created = store.create_row("lease_charges", &payload).await?;
                charge_by_due.insert(due_iso.clone(), created.clone());
                result.charges.push(created.clone());
                created
            }
        };

        let collection = match collection_by_due.get(&due_iso) {
            Some(existing) => existing.clone(),
            None => {
                let payload = json_map(&[
                    ("organization_id", Value::String(organization_id.to_string())),
                    ("lease_id", Value::String(lease_id.to_string())),
                    ("lease_charge_id", charge.get("id").cloned().unwrap_or(Value::Null)),
                    ("due_date", Value::String(due_iso.clone())),
                    ("amount", Value::from(amount)),
                    ("currency", Value::String(currency.to_string())),
                    ("status", Value::String("scheduled".to_string())),
                    (
                        "created_by_user_id",
                        created_by_user_id
                            .map(|id| Value::String(id.to_string()))
                            .unwrap_or(Value::Null),
                    ),
                ]);
                let created = store.create_row("collection_records", &payload).await?;
                collection_by_due.insert(due_iso.clone(), created.clone());
                result.collections.push(created.clone());
                created
            }
        };

        if index == 0 {
            result.first_collection = Some(collection);
        }
    }

    tracing::info!(
        organization_id,
        lease_id,
        due_dates = due_dates.len(),
        charges_created = result.charges.len(),
        collections_created = result.collections.len(),
        "Ensured monthly lease schedule"
    );

    Ok(result)
}

/// Validates `request`, derives its due dates and materializes them.
/// Nothing is written when the request is invalid.
pub async fn ensure_monthly_lease_schedule<S: RowStore>(
    store: &S,
    organization_id: &str,
    lease_id: &str,
    request: &LeaseScheduleRequest,
    created_by_user_id: Option<&str>,
) -> AppResult<LeaseScheduleResult> {
    validate_input(request)?;

    let starts_on = parse_iso_date(&request.starts_on, "starts_on")?;
    let first_due = optional_date(
        request.first_collection_due_date.as_deref(),
        "first_collection_due_date",
    )?;
    let ends_on = optional_date(request.ends_on.as_deref(), "ends_on")?;
    let due_dates = build_monthly_schedule_dates(
        starts_on,
        first_due,
        ends_on,
        request.collection_schedule_months,
    )?;

    ensure_lease_schedule_rows(
        store,
        organization_id,
        lease_id,
        &due_dates,
        request.amount,
        &request.currency,
        created_by_user_id,
    )
    .await
}

fn optional_date(value: Option<&str>, field_name: &str) -> AppResult<Option<NaiveDate>> {
    match value.map(str::trim).filter(|item| !item.is_empty()) {
        Some(item) => parse_iso_date(item, field_name).map(Some),
        None => Ok(None),
    }
}

/// First row per date among `due_keys`.
fn index_by_date(
    rows: Vec<Value>,
    date_key: &str,
    due_keys: &HashSet<String>,
    keep: impl Fn(&Map<String, Value>) -> bool,
) -> HashMap<String, Value> {
    let mut indexed = HashMap::new();
    for row in rows {
        let Some(obj) = row.as_object() else {
            continue;
        };
        if !keep(obj) {
            continue;
        }
        let Some(day) = obj
            .get(date_key)
            .and_then(Value::as_str)
            .map(str::trim)
            .and_then(|value| value.get(..10))
            .filter(|day| due_keys.contains(*day))
            .map(ToOwned::to_owned)
        else {
            continue;
        };
        indexed.entry(day).or_insert(row);
    }
    indexed
}

#[cfg(test)]
mod tests {
    use chrono::NaiveDate;
    use serde_json::{json, Value};

    use super::{
        add_months_clamped, build_monthly_schedule_dates, ensure_lease_collections_enabled,
        ensure_monthly_lease_schedule,
    };
    use crate::{
        config::AppConfig, error::AppError, repository::MemoryRowStore,
        schemas::LeaseScheduleRequest,
    };

    fn date(value: &str) -> NaiveDate {
        NaiveDate::parse_from_str(value, "%Y-%m-%d").expect("valid date")
    }

    fn iso(dates: &[NaiveDate]) -> Vec<String> {
        dates.iter().map(NaiveDate::to_string).collect()
    }

    fn request(starts_on: &str) -> LeaseScheduleRequest {
        LeaseScheduleRequest {
            starts_on: starts_on.to_string(),
            first_collection_due_date: None,
            ends_on: None,
            collection_schedule_months: Some(3),
            amount: 3_500_000.004,
            currency: "PYG".to_string(),
        }
    }

    #[test]
    fn month_end_anchor_clamps_instead_of_drifting() {
        let dates =
            build_monthly_schedule_dates(date("2026-05-31"), None, Some(date("2026-08-31")), None)
                .expect("dates");
        assert_eq!(
            iso(&dates),
            vec!["2026-05-31", "2026-06-30", "2026-07-31", "2026-08-31"]
        );
        assert_eq!(
            add_months_clamped(date("2028-01-31"), 1).expect("date"),
            date("2028-02-29")
        );
    }

    #[test]
    fn defaults_to_twelve_months() {
        let dates = build_monthly_schedule_dates(date("2026-05-15"), None, None, None)
            .expect("dates");
        assert_eq!(dates.len(), 12);
        assert_eq!(dates.first(), Some(&date("2026-05-15")));
        assert_eq!(dates.last(), Some(&date("2027-04-15")));
    }

    #[test]
    fn month_counts_are_validated_and_capped() {
        assert!(matches!(
            build_monthly_schedule_dates(date("2026-05-15"), None, None, Some(0)),
            Err(AppError::BadRequest(_))
        ));
        let capped = build_monthly_schedule_dates(date("2026-05-15"), None, None, Some(500))
            .expect("dates");
        assert_eq!(capped.len(), 120);
    }

    #[test]
    fn ends_on_before_anchor_keeps_one_date() {
        let dates = build_monthly_schedule_dates(
            date("2026-05-01"),
            Some(date("2026-06-10")),
            Some(date("2026-05-20")),
            Some(6),
        )
        .expect("dates");
        assert_eq!(iso(&dates), vec!["2026-06-10"]);

        let dates = build_monthly_schedule_dates(
            date("2026-05-01"),
            Some(date("2026-04-10")),
            Some(date("2026-03-01")),
            None,
        )
        .expect("dates");
        assert_eq!(iso(&dates), vec!["2026-05-01"]);
    }

    #[tokio::test]
    async fn second_run_creates_nothing_and_keeps_first_collection() {
        let store = MemoryRowStore::new();
        let first = ensure_monthly_lease_schedule(
            &store,
            "org-1",
            "lease-1",
            &request("2026-05-31"),
            Some("user-1"),
        )
        .await
        .expect("first run");
        assert_eq!(first.charges.len(), 3);
        assert_eq!(first.collections.len(), 3);
        assert_eq!(first.charges[0]["amount"], json!(3_500_000.0));
        assert_eq!(
            first.charges[1]["description"],
            json!("Recurring monthly lease charge (2026-06-30)")
        );
        assert_eq!(first.collections[0]["lease_charge_id"], first.charges[0]["id"]);
        assert_eq!(first.collections[0]["created_by_user_id"], json!("user-1"));

        let second = ensure_monthly_lease_schedule(
            &store,
            "org-1",
            "lease-1",
            &request("2026-05-31"),
            Some("user-1"),
        )
        .await
        .expect("second run");
        assert!(second.charges.is_empty());
        assert!(second.collections.is_empty());
        assert_eq!(store.created_count("lease_charges"), 3);
        assert_eq!(store.created_count("collection_records"), 3);

        let first_id = first.first_collection.as_ref().and_then(|row| row.get("id"));
        let second_id = second.first_collection.as_ref().and_then(|row| row.get("id"));
        assert!(first_id.is_some());
        assert_eq!(first_id, second_id);
    }

    #[tokio::test]
    async fn fills_only_the_missing_rows() {
        let store = MemoryRowStore::new();
        store.insert_rows(
            "lease_charges",
            vec![
                json!({"id": "charge-may", "lease_id": "lease-1", "charge_type": "monthly_rent",
                       "charge_date": "2026-05-10", "amount": 100}),
                json!({"id": "fee-jun", "lease_id": "lease-1", "charge_type": "service_fee_flat",
                       "charge_date": "2026-06-10", "amount": 50}),
            ],
        );
        store.insert_rows(
            "collection_records",
            vec![
                json!({"id": "col-may", "lease_id": "lease-1", "lease_charge_id": "charge-may",
                       "due_date": "2026-05-10", "status": "paid"}),
                json!({"id": "col-may-dup", "lease_id": "lease-1", "due_date": "2026-05-10", "status": "scheduled"}),
                json!({"id": "col-other-lease", "lease_id": "lease-2", "due_date": "2026-06-10", "status": "scheduled"}),
            ],
        );

        let mut req = request("2026-05-10");
        req.collection_schedule_months = Some(2);
        let result = ensure_monthly_lease_schedule(&store, "org-1", "lease-1", &req, None)
            .await
            .expect("schedule");

        assert_eq!(result.charges.len(), 1);
        assert_eq!(result.charges[0]["charge_date"], json!("2026-06-10"));
        assert_eq!(result.collections.len(), 1);
        assert_eq!(result.collections[0]["created_by_user_id"], Value::Null);
        assert_eq!(
            result.first_collection.as_ref().and_then(|row| row.get("id")),
            Some(&json!("col-may"))
        );
    }

    #[tokio::test]
    async fn invalid_requests_write_nothing() {
        let store = MemoryRowStore::new();

        let mut bad_date = request("2026-02-30");
        bad_date.collection_schedule_months = None;
        assert!(matches!(
            ensure_monthly_lease_schedule(&store, "org-1", "lease-1", &bad_date, None).await,
            Err(AppError::BadRequest(_))
        ));

        let mut bad_months = request("2026-05-01");
        bad_months.collection_schedule_months = Some(-1);
        assert!(matches!(
            ensure_monthly_lease_schedule(&store, "org-1", "lease-1", &bad_months, None).await,
            Err(AppError::BadRequest(_))
        ));

        assert_eq!(store.created_count("lease_charges"), 0);
        assert_eq!(store.created_count("collection_records"), 0);
    }

    #[tokio::test]
    async fn month_count_is_ignored_when_the_lease_has_an_end() {
        let store = MemoryRowStore::new();
        let mut bounded = request("2026-05-01");
        bounded.ends_on = Some("2026-07-31".to_string());
        bounded.collection_schedule_months = Some(0);

        let result = ensure_monthly_lease_schedule(&store, "org-1", "lease-1", &bounded, None)
            .await
            .expect("schedule");
        assert_eq!(
            iso(&result.due_dates),
            vec!["2026-05-01", "2026-06-01", "2026-07-01"]
        );
        assert_eq!(store.created_count("collection_records"), 3);
    }

    #[test]
    fn lease_collections_can_be_switched_off() {
        let mut config = AppConfig::default();
        config.lease_collections_enabled = false;
        assert!(matches!(
            ensure_lease_collections_enabled(&config),
            Err(AppError::Forbidden(_))
        ));
        config.lease_collections_enabled = true;
        assert!(ensure_lease_collections_enabled(&config).is_ok());
    }
}
