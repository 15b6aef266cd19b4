use std::collections::HashSet;

use chrono::NaiveDate;
use serde_json::{Map, Value};

use crate::{
    error::{AppError, AppResult},
    records::{
        from_rows, CollectionRecord, Expense, Lease, LeaseCharge, Reservation, ReservationStatus,
        Unit,
    },
    repository::{json_map, string_array, RowStore},
    services::owner_statement::SERVICE_FEE_CHARGE_TYPES,
};

/// Which slice of an organization a statement covers. `unit_id` wins over
/// `property_id` when both are set.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StatementScope {
    pub organization_id: String,
    pub period_start: NaiveDate,
    pub period_end: NaiveDate,
    pub property_id: Option<String>,
    pub unit_id: Option<String>,
}

impl StatementScope {
    pub fn parse(
        organization_id: &str,
        period_start: &str,
        period_end: &str,
        property_id: Option<&str>,
        unit_id: Option<&str>,
    ) -> AppResult<Self> {
        let organization_id = organization_id.trim();
        if organization_id.is_empty() {
            return Err(AppError::BadRequest(
                "organization_id is required.".to_string(),
            ));
        }
        let start = parse_iso_date(period_start, "period_start")?;
        let end = parse_iso_date(period_end, "period_end")?;
        if end < start {
            return Err(AppError::BadRequest(
                "period_end must be on or after period_start.".to_string(),
            ));
        }

        Ok(Self {
            organization_id: organization_id.to_string(),
            period_start: start,
            period_end: end,
            property_id: non_empty_opt(property_id),
            unit_id: non_empty_opt(unit_id),
        })
    }

    pub fn contains(&self, day: NaiveDate) -> bool {
        self.period_start <= day && day <= self.period_end
    }
}

/// Every row that can feed one owner statement.
#[derive(Debug, Clone)]
pub struct ScopedRecords {
    pub scope: StatementScope,
    pub reservations: Vec<Reservation>,
    pub expenses: Vec<Expense>,
    pub leases: Vec<Lease>,
    pub lease_charges: Vec<LeaseCharge>,
    pub collections: Vec<CollectionRecord>,
}

/// Unit-level targeting resolved once per aggregation.
struct UnitScope {
    unit_id: Option<String>,
    property_id: Option<String>,
    allowed_unit_ids: Option<HashSet<String>>,
}

impl UnitScope {
    fn unit_in_scope(&self, unit_id: Option<&str>) -> bool {
        if let Some(scoped_unit) = self.unit_id.as_deref() {
            return unit_id == Some(scoped_unit);
        }
        match self.allowed_unit_ids.as_ref() {
            Some(allowed) => unit_id.is_some_and(|id| allowed.contains(id)),
            None => true,
        }
    }

    /// Rows that carry both a unit and a property reference match on either.
    fn unit_or_property_in_scope(&self, unit_id: Option<&str>, property_id: Option<&str>) -> bool {
        if self.unit_id.is_some() {
            return self.unit_in_scope(unit_id);
        }
        let Some(scoped_property) = self.property_id.as_deref() else {
            return true;
        };
        property_id == Some(scoped_property) || self.unit_in_scope(unit_id)
    }

    fn allowed_list(&self) -> Vec<String> {
        let mut ids = self
            .allowed_unit_ids
            .as_ref()
            .map(|allowed| allowed.iter().cloned().collect::<Vec<_>>())
            .unwrap_or_default();
        ids.sort_unstable();
        ids
    }
}

/// Loads the reservations, expenses, leases, lease charges and collections
/// that fall in `scope`.
///
/// Store filters narrow the reads; the same predicates are re-applied to the
/// typed rows so the result does not depend on how faithfully a store
/// implements them. Lease charges and collections are only read for leases
/// in scope; no leases means none of either.
pub async fn aggregate_period<S: RowStore>(
    store: &S,
    scope: &StatementScope,
) -> AppResult<ScopedRecords> {
    let org_id = Value::String(scope.organization_id.clone());
    let start_iso = scope.period_start.to_string();
    let end_iso = scope.period_end.to_string();

    let mut allowed_unit_ids = None;
    if let Some(property_id) = scope.property_id.as_deref() {
        let units = store
            .list_rows(
                "units",
                Some(&json_map(&[
                    ("organization_id", org_id.clone()),
                    ("property_id", Value::String(property_id.to_string())),
                ])),
                3000,
                "created_at",
                false,
            )
            .await?;
        let units: Vec<Unit> = from_rows("units", units)?;
        allowed_unit_ids = Some(
            units
                .into_iter()
                .filter(|unit| unit.property_id.as_deref() == Some(property_id))
                .map(|unit| unit.id)
                .collect::<HashSet<_>>(),
        );
    }
    let targeting = UnitScope {
        unit_id: scope.unit_id.clone(),
        property_id: scope.property_id.clone(),
        allowed_unit_ids,
    };

    let reservation_filters = json_map(&[
        ("organization_id", org_id.clone()),
        ("check_out_date__gt", Value::String(start_iso.clone())),
        ("check_in_date__lte", Value::String(end_iso.clone())),
        (
            "status",
            string_array(ReservationStatus::REPORTABLE.iter().map(|status| status.as_str())),
        ),
    ]);
    let expense_filters = json_map(&[
        ("organization_id", org_id.clone()),
        ("expense_date__gte", Value::String(start_iso.clone())),
        ("expense_date__lte", Value::String(end_iso.clone())),
    ]);
    let lease_filters = json_map(&[("organization_id", org_id.clone())]);

    let (reservations, expenses, leases) = tokio::try_join!(
        list_for_units(
            store,
            "reservations",
            reservation_filters,
            &targeting,
            5000,
            "check_in_date",
            true,
        ),
        list_for_units_or_property(
            store,
            "expenses",
            expense_filters,
            &targeting,
            5000,
            "expense_date",
            false,
        ),
        list_for_units_or_property(
            store,
            "leases",
            lease_filters,
            &targeting,
            6000,
            "created_at",
            false,
        ),
    )?;

    let reservations = from_rows::<Reservation>("reservations", reservations)?
        .into_iter()
        .filter(|reservation| {
            reservation.status.is_reportable()
                && reservation.overlaps(scope.period_start, scope.period_end)
                && targeting.unit_in_scope(reservation.unit_id.as_deref())
        })
        .collect::<Vec<_>>();
    let expenses = from_rows::<Expense>("expenses", expenses)?
        .into_iter()
        .filter(|expense| {
            scope.contains(expense.expense_date)
                && targeting.unit_or_property_in_scope(
                    expense.unit_id.as_deref(),
                    expense.property_id.as_deref(),
                )
        })
        .collect::<Vec<_>>();
    let leases = from_rows::<Lease>("leases", leases)?
        .into_iter()
        .filter(|lease| {
            targeting
                .unit_or_property_in_scope(lease.unit_id.as_deref(), lease.property_id.as_deref())
        })
        .collect::<Vec<_>>();

    let lease_ids = leases
        .iter()
        .map(|lease| lease.id.clone())
        .collect::<HashSet<_>>();
    let (lease_charges, collections) = if lease_ids.is_empty() {
        (Vec::new(), Vec::new())
    } else {
        let mut sorted_ids = lease_ids.iter().cloned().collect::<Vec<_>>();
        sorted_ids.sort_unstable();
        let lease_count = sorted_ids.len() as i64;

        let charge_filters = json_map(&[
            ("organization_id", org_id.clone()),
            ("lease_id", string_array(sorted_ids.iter().cloned())),
            ("charge_type", string_array(SERVICE_FEE_CHARGE_TYPES)),
            ("charge_date__gte", Value::String(start_iso.clone())),
            ("charge_date__lte", Value::String(end_iso.clone())),
        ]);
        let collection_filters = json_map(&[
            ("organization_id", org_id.clone()),
            ("lease_id", string_array(sorted_ids.iter().cloned())),
            ("status", Value::String("paid".to_string())),
        ]);

        let (charges, collections) = tokio::try_join!(
            store.list_rows(
                "lease_charges",
                Some(&charge_filters),
                std::cmp::max(3000, lease_count * 12),
                "charge_date",
                false,
            ),
            store.list_rows(
                "collection_records",
                Some(&collection_filters),
                std::cmp::max(4000, lease_count * 24),
                "paid_at",
                false,
            ),
        )?;

        let charges = from_rows::<LeaseCharge>("lease_charges", charges)?
            .into_iter()
            .filter(|charge| lease_ids.contains(&charge.lease_id))
            .collect::<Vec<_>>();
        let collections = from_rows::<CollectionRecord>("collection_records", collections)?
            .into_iter()
            .filter(|collection| lease_ids.contains(&collection.lease_id))
            .collect::<Vec<_>>();
        (charges, collections)
    };

    tracing::debug!(
        organization_id = %scope.organization_id,
        period_start = %scope.period_start,
        period_end = %scope.period_end,
        reservations = reservations.len(),
        expenses = expenses.len(),
        leases = leases.len(),
        lease_charges = lease_charges.len(),
        collections = collections.len(),
        "Aggregated statement period"
    );

    Ok(ScopedRecords {
        scope: scope.clone(),
        reservations,
        expenses,
        leases,
        lease_charges,
        collections,
    })
}

/// Rows keyed only by unit. A property with no units matches nothing.
async fn list_for_units<S: RowStore>(
    store: &S,
    table: &str,
    mut filters: Map<String, Value>,
    targeting: &UnitScope,
    limit: i64,
    order_by: &str,
    ascending: bool,
) -> AppResult<Vec<Value>> {
    if let Some(unit_id) = targeting.unit_id.as_ref() {
        filters.insert("unit_id".to_string(), Value::String(unit_id.clone()));
    } else if targeting.allowed_unit_ids.is_some() {
        let allowed = targeting.allowed_list();
        if allowed.is_empty() {
            return Ok(Vec::new());
        }
        filters.insert("unit_id".to_string(), string_array(allowed));
    }
    store
        .list_rows(table, Some(&filters), limit, order_by, ascending)
        .await
}

/// Rows keyed by unit and property: with a property scope this is the union
/// of rows on the property itself and rows on any of its units.
async fn list_for_units_or_property<S: RowStore>(
    store: &S,
    table: &str,
    mut filters: Map<String, Value>,
    targeting: &UnitScope,
    limit: i64,
    order_by: &str,
    ascending: bool,
) -> AppResult<Vec<Value>> {
    if let Some(unit_id) = targeting.unit_id.as_ref() {
        filters.insert("unit_id".to_string(), Value::String(unit_id.clone()));
        return store
            .list_rows(table, Some(&filters), limit, order_by, ascending)
            .await;
    }
    let Some(property_id) = targeting.property_id.as_ref() else {
        return store
            .list_rows(table, Some(&filters), limit, order_by, ascending)
            .await;
    };

    let mut property_filters = filters.clone();
    property_filters.insert(
        "property_id".to_string(),
        Value::String(property_id.clone()),
    );
    let mut rows = store
        .list_rows(table, Some(&property_filters), limit, order_by, ascending)
        .await?;

    let allowed = targeting.allowed_list();
    if !allowed.is_empty() {
        filters.insert("unit_id".to_string(), string_array(allowed));
        let unit_rows = store
            .list_rows(table, Some(&filters), limit, order_by, ascending)
            .await?;
        let mut seen = rows
            .iter()
            .map(|row| row_id(row).to_string())
            .collect::<HashSet<_>>();
        for row in unit_rows {
            if seen.insert(row_id(&row).to_string()) {
                rows.push(row);
            }
        }
    }
    Ok(rows)
}

fn row_id(row: &Value) -> &str {
    row.get("id").and_then(Value::as_str).unwrap_or_default()
}

pub fn parse_iso_date(value: &str, field_name: &str) -> AppResult<NaiveDate> {
    NaiveDate::parse_from_str(value.trim(), "%Y-%m-%d").map_err(|_| {
        AppError::BadRequest(format!("{field_name} must be an ISO date (YYYY-MM-DD)."))
    })
}

fn non_empty_opt(value: Option<&str>) -> Option<String> {
    value
        .map(str::trim)
        .filter(|item| !item.is_empty())
        .map(ToOwned::to_owned)
}
