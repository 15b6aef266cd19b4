use std::collections::{BTreeMap, BTreeSet, HashMap};

use chrono::NaiveDate;
use serde::Serialize;
use serde_json::{Map, Value};

use crate::{
    error::{AppError, AppResult, StatementComputationError},
    records::{CollectionStatus, Lease},
    services::{
        fx::{amount_in_pyg, FxSupport, FxWarning, MoneyRecord},
        round2,
        statement_scope::ScopedRecords,
    },
};

/// Lease charge types billed to the owner as service fees.
pub const SERVICE_FEE_CHARGE_TYPES: [&str; 2] = ["service_fee_flat", "admin_fee"];

const MAX_SAMPLE_IDS: usize = 8;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Bucket {
    GrossRevenue,
    PlatformFees,
    TaxesCollected,
    OperatingExpenses,
    LeaseCollections,
    ServiceFees,
    CollectionFees,
}

/// One record's contribution to a bucket.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StatementLineItem {
    pub bucket: Bucket,
    pub source_table: &'static str,
    pub source_id: String,
    pub kind: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub date: Option<NaiveDate>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub from: Option<NaiveDate>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub to: Option<NaiveDate>,
    pub amount_pyg: f64,
}

impl StatementLineItem {
    fn new(
        bucket: Bucket,
        source_table: &'static str,
        source_id: &str,
        kind: &str,
        amount: f64,
    ) -> Self {
        Self {
            bucket,
            source_table,
            source_id: source_id.to_string(),
            kind: kind.to_string(),
            date: None,
            from: None,
            to: None,
            amount_pyg: round2(amount),
        }
    }

    fn on(mut self, date: NaiveDate) -> Self {
        self.date = Some(date);
        self
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StatementBreakdown {
    pub gross_revenue: f64,
    pub lease_collections: f64,
    pub service_fees: f64,
    pub collection_fees: f64,
    pub platform_fees: f64,
    pub taxes_collected: f64,
    pub operating_expenses: f64,
    pub gross_total: f64,
    pub net_payout: f64,
    pub line_items: Vec<StatementLineItem>,
}

impl StatementBreakdown {
    /// Totals in the column layout of `owner_statements`.
    pub fn totals_payload(&self) -> Map<String, Value> {
        let mut payload = Map::new();
        for (key, value) in [
            ("gross_revenue", self.gross_revenue),
            ("lease_collections", self.lease_collections),
            ("service_fees", self.service_fees),
            ("collection_fees", self.collection_fees),
            ("platform_fees", self.platform_fees),
            ("taxes_collected", self.taxes_collected),
            ("operating_expenses", self.operating_expenses),
            ("net_payout", self.net_payout),
        ] {
            payload.insert(key.to_string(), Value::from(value));
        }
        payload
    }

    pub fn line_items_json(&self) -> AppResult<Value> {
        serde_json::to_value(&self.line_items).map_err(|error| {
            AppError::Internal(format!("Could not serialize statement line items: {error}"))
        })
    }
}

/// Currency problems found while summing, grouped by warning in the order
/// each warning first appeared.
#[derive(Default)]
struct FxWarnings {
    groups: Vec<(FxWarning, Vec<String>)>,
}

impl FxWarnings {
    fn convert<R: MoneyRecord>(&mut self, record: &R, support: FxSupport) -> f64 {
        match amount_in_pyg(record, support) {
            Ok(amount) => amount,
            Err(warning) => {
                let record_id = record.record_id().to_string();
                match self.groups.iter_mut().find(|(kind, _)| *kind == warning) {
                    Some((_, ids)) => ids.push(record_id),
                    None => self.groups.push((warning, vec![record_id])),
                }
                0.0
            }
        }
    }

    fn into_error(self) -> Option<StatementComputationError> {
        if self.groups.is_empty() {
            return None;
        }

        let mut counts_by_kind = BTreeMap::new();
        let mut missing_fx_rate_to_pyg = 0;
        let mut unsupported_currency = 0;
        let mut sample_ids: Vec<String> = Vec::new();
        for (warning, record_ids) in self.groups {
            if warning.is_missing_rate() {
                missing_fx_rate_to_pyg += record_ids.len();
            } else {
                unsupported_currency += record_ids.len();
            }
            *counts_by_kind.entry(warning.to_string()).or_insert(0) += record_ids.len();

            for record_id in &record_ids {
                let record_id = record_id.trim();
                if sample_ids.len() < MAX_SAMPLE_IDS
                    && !record_id.is_empty()
                    && !sample_ids.iter().any(|existing| existing == record_id)
                {
                    sample_ids.push(record_id.to_string());
                }
            }
        }

        Some(StatementComputationError {
            missing_fx_rate_to_pyg,
            unsupported_currency,
            counts_by_kind,
            sample_ids,
        })
    }
}

/// Turns the rows of one statement period into its totals and line items.
///
/// Fails as a whole when any expense, collection or service-fee charge
/// cannot be expressed in PYG.
pub fn build_statement_breakdown(scoped: &ScopedRecords) -> AppResult<StatementBreakdown> {
    let scope = &scoped.scope;
    let mut line_items = Vec::new();
    let mut warnings = FxWarnings::default();

    let mut gross_revenue = 0.0;
    let mut platform_fees = 0.0;
    let mut taxes_collected = 0.0;
    for reservation in &scoped.reservations {
        if !reservation.status.is_reportable()
            || !reservation.overlaps(scope.period_start, scope.period_end)
        {
            continue;
        }

        gross_revenue += reservation.total_amount;
        platform_fees += reservation.platform_fee;
        taxes_collected += reservation.tax_amount;

        if reservation.total_amount != 0.0 {
            let mut item = StatementLineItem::new(
                Bucket::GrossRevenue,
                "reservations",
                &reservation.id,
                "reservation_total",
                reservation.total_amount,
            );
            item.from = Some(reservation.check_in_date);
            item.to = Some(reservation.check_out_date);
            line_items.push(item);
        }
        if reservation.platform_fee != 0.0 {
            line_items.push(StatementLineItem::new(
                Bucket::PlatformFees,
                "reservations",
                &reservation.id,
                "reservation_platform_fee",
                reservation.platform_fee,
            ));
        }
        if reservation.tax_amount != 0.0 {
            line_items.push(StatementLineItem::new(
                Bucket::TaxesCollected,
                "reservations",
                &reservation.id,
                "reservation_tax",
                reservation.tax_amount,
            ));
        }
    }

    let mut operating_expenses = 0.0;
    for expense in &scoped.expenses {
        if !scope.contains(expense.expense_date) {
            continue;
        }
        let amount_pyg = warnings.convert(expense, FxSupport::UsdWithRecordRate);
        operating_expenses += amount_pyg;

        let kind = expense
            .category
            .as_deref()
            .map(str::trim)
            .filter(|value| !value.is_empty())
            .unwrap_or("expense");
        line_items.push(
            StatementLineItem::new(
                Bucket::OperatingExpenses,
                "expenses",
                &expense.id,
                kind,
                amount_pyg,
            )
            .on(expense.expense_date),
        );
    }

    let mut lease_collections = 0.0;
    let mut paid_lease_ids = BTreeSet::new();
    for collection in &scoped.collections {
        if collection.status != CollectionStatus::Paid {
            continue;
        }
        let paid_on = collection.effective_paid_on();
        if !scope.contains(paid_on) {
            continue;
        }

        let amount_pyg = warnings.convert(collection, FxSupport::SettlementOnly);
        lease_collections += amount_pyg;
        if !collection.lease_id.trim().is_empty() {
            paid_lease_ids.insert(collection.lease_id.as_str());
        }
        line_items.push(
            StatementLineItem::new(
                Bucket::LeaseCollections,
                "collection_records",
                &collection.id,
                "collection_paid",
                amount_pyg,
            )
            .on(paid_on),
        );
    }

    let mut service_fees = 0.0;
    for charge in &scoped.lease_charges {
        if !scope.contains(charge.charge_date)
            || !SERVICE_FEE_CHARGE_TYPES.contains(&charge.charge_type.as_str())
        {
            continue;
        }
        let amount_pyg = warnings.convert(charge, FxSupport::SettlementOnly);
        service_fees += amount_pyg;
        line_items.push(
            StatementLineItem::new(
                Bucket::ServiceFees,
                "lease_charges",
                &charge.id,
                &charge.charge_type,
                amount_pyg,
            )
            .on(charge.charge_date),
        );
    }

    let lease_index = scoped
        .leases
        .iter()
        .map(|lease| (lease.id.as_str(), lease))
        .collect::<HashMap<&str, &Lease>>();
    let mut collection_fees = 0.0;
    for lease_id in paid_lease_ids {
        let platform_fee = lease_index
            .get(lease_id)
            .map(|lease| lease.platform_fee)
            .unwrap_or(0.0);
        collection_fees += platform_fee;
        line_items.push(StatementLineItem::new(
            Bucket::CollectionFees,
            "leases",
            lease_id,
            "platform_fee_per_paid_lease",
            platform_fee,
        ));
    }

    if let Some(error) = warnings.into_error() {
        tracing::warn!(
            organization_id = %scope.organization_id,
            period_start = %scope.period_start,
            period_end = %scope.period_end,
            missing_fx_rate_to_pyg = error.missing_fx_rate_to_pyg,
            unsupported_currency = error.unsupported_currency,
            "Owner statement is not computable in PYG"
        );
        return Err(error.into());
    }

    let gross_revenue = round2(gross_revenue);
    let lease_collections = round2(lease_collections);
    let service_fees = round2(service_fees);
    let collection_fees = round2(collection_fees);
    let platform_fees = round2(platform_fees);
    let taxes_collected = round2(taxes_collected);
    let operating_expenses = round2(operating_expenses);
    let gross_total = round2(gross_revenue + lease_collections);
    let net_payout = round2(
        gross_total - platform_fees - service_fees - collection_fees - operating_expenses,
    );

    Ok(StatementBreakdown {
        gross_revenue,
        lease_collections,
        service_fees,
        collection_fees,
        platform_fees,
        taxes_collected,
        operating_expenses,
        gross_total,
        net_payout,
        line_items,
    })
}

#[cfg(test)]
mod tests {
    use serde_json::{json, Value};

    use super::{build_statement_breakdown, Bucket};
    use crate::{
        error::AppError,
        records::{from_rows, CollectionRecord, Expense, Lease, LeaseCharge, Reservation},
        services::statement_scope::{ScopedRecords, StatementScope},
    };

    fn may_2026() -> StatementScope {
        StatementScope::parse("org-1", "2026-05-01", "2026-05-31", None, None)
            .expect("valid scope")
    }

    fn scoped(
        reservations: Vec<Value>,
        expenses: Vec<Value>,
        leases: Vec<Value>,
        lease_charges: Vec<Value>,
        collections: Vec<Value>,
    ) -> ScopedRecords {
        ScopedRecords {
            scope: may_2026(),
            reservations: from_rows::<Reservation>("reservations", reservations).expect("rows"),
            expenses: from_rows::<Expense>("expenses", expenses).expect("rows"),
            leases: from_rows::<Lease>("leases", leases).expect("rows"),
            lease_charges: from_rows::<LeaseCharge>("lease_charges", lease_charges).expect("rows"),
            collections: from_rows::<CollectionRecord>("collection_records", collections)
                .expect("rows"),
        }
    }

    fn collection(id: &str, lease_id: &str, status: &str, due: &str, amount: f64) -> Value {
        json!({"id": id, "lease_id": lease_id, "status": status, "due_date": due,
               "amount": amount, "currency": "PYG"})
    }

    fn charge(id: &str, charge_type: &str, amount: f64) -> Value {
        json!({"id": id, "lease_id": "lease-1", "charge_type": charge_type,
               "charge_date": "2026-05-01", "amount": amount, "currency": "PYG"})
    }

    #[test]
    fn lease_only_period_nets_collections_against_fees() {
        let records = scoped(
            Vec::new(),
            Vec::new(),
            vec![json!({"id": "lease-1", "platform_fee": 1200})],
            vec![
                charge("ch-1", "service_fee_flat", 500.0),
                charge("ch-2", "monthly_rent", 2000.0),
                charge("ch-3", "admin_fee", 80.0),
            ],
            vec![
                collection("col-1", "lease-1", "paid", "2026-05-05", 3000.0),
                collection("col-2", "lease-1", "paid", "2026-05-20", 3200.0),
                collection("col-3", "lease-1", "scheduled", "2026-05-25", 3200.0),
                collection("col-4", "lease-1", "paid", "2026-06-02", 1111.0),
            ],
        );
        let breakdown = build_statement_breakdown(&records).expect("breakdown");

        assert_eq!(breakdown.lease_collections, 6200.0);
        assert_eq!(breakdown.service_fees, 580.0);
        assert_eq!(breakdown.collection_fees, 1200.0);
        assert_eq!(breakdown.gross_revenue, 0.0);
        assert_eq!(breakdown.net_payout, 4420.0);

        let collection_fee_items = breakdown
            .line_items
            .iter()
            .filter(|item| item.bucket == Bucket::CollectionFees)
            .count();
        assert_eq!(collection_fee_items, 1);
    }

    #[test]
    fn collection_fees_are_charged_once_per_paid_lease() {
        let records = scoped(
            Vec::new(),
            Vec::new(),
            vec![
                json!({"id": "lease-1", "platform_fee": 1000}),
                json!({"id": "lease-2", "platform_fee": 700}),
            ],
            Vec::new(),
            vec![
                collection("col-1", "lease-1", "paid", "2026-05-05", 3000.0),
                collection("col-2", "lease-1", "paid", "2026-05-15", 3000.0),
                collection("col-3", "lease-2", "paid", "2026-05-06", 2000.0),
            ],
        );
        let breakdown = build_statement_breakdown(&records).expect("breakdown");
        assert_eq!(breakdown.collection_fees, 1700.0);
        assert_eq!(breakdown.lease_collections, 8000.0);
        assert_eq!(breakdown.net_payout, 6300.0);
    }

    #[test]
    fn paid_at_decides_the_collection_period() {
        let records = scoped(
            Vec::new(),
            Vec::new(),
            vec![json!({"id": "lease-1", "platform_fee": 0})],
            Vec::new(),
            vec![
                json!({"id": "col-1", "lease_id": "lease-1", "status": "paid", "due_date": "2026-04-28",
                       "paid_at": "2026-05-02T09:00:00Z", "amount": 500, "currency": "PYG"}),
                json!({"id": "col-2", "lease_id": "lease-1", "status": "paid", "due_date": "2026-05-28",
                       "paid_at": "2026-06-01T09:00:00Z", "amount": 900, "currency": "PYG"}),
            ],
        );
        let breakdown = build_statement_breakdown(&records).expect("breakdown");
        assert_eq!(breakdown.lease_collections, 500.0);
    }

    #[test]
    fn reservations_and_expenses_feed_their_buckets() {
        let records = scoped(
            vec![
                json!({"id": "res-1", "status": "checked_out", "check_in_date": "2026-04-29",
                       "check_out_date": "2026-05-03", "total_amount": 1000000,
                       "platform_fee": 150000, "tax_amount": 90909.091}),
                json!({"id": "res-2", "status": "cancelled", "check_in_date": "2026-05-10",
                       "check_out_date": "2026-05-12", "total_amount": 500000}),
            ],
            vec![
                json!({"id": "exp-1", "expense_date": "2026-05-10", "amount": 20, "currency": "usd",
                       "fx_rate_to_pyg": 7300, "category": "cleaning"}),
                json!({"id": "exp-2", "expense_date": "2026-05-11", "amount": 4000, "currency": "PYG"}),
            ],
            Vec::new(),
            Vec::new(),
            Vec::new(),
        );
        let breakdown = build_statement_breakdown(&records).expect("breakdown");

        assert_eq!(breakdown.gross_revenue, 1_000_000.0);
        assert_eq!(breakdown.platform_fees, 150_000.0);
        assert_eq!(breakdown.taxes_collected, 90_909.09);
        assert_eq!(breakdown.operating_expenses, 150_000.0);
        assert_eq!(breakdown.gross_total, 1_000_000.0);
        assert_eq!(breakdown.net_payout, 700_000.0);

        let items = serde_json::to_value(&breakdown.line_items).expect("json");
        assert_eq!(
            items[0],
            json!({"bucket": "gross_revenue", "source_table": "reservations", "source_id": "res-1",
                   "kind": "reservation_total", "from": "2026-04-29", "to": "2026-05-03",
                   "amount_pyg": 1000000.0})
        );
        let expense_kinds = breakdown
            .line_items
            .iter()
            .filter(|item| item.bucket == Bucket::OperatingExpenses)
            .map(|item| item.kind.as_str())
            .collect::<Vec<_>>();
        assert_eq!(expense_kinds, vec!["cleaning", "expense"]);
    }

    #[test]
    fn any_currency_warning_fails_the_whole_statement() {
        let records = scoped(
            Vec::new(),
            vec![
                json!({"id": "exp-1", "expense_date": "2026-05-10", "amount": 20, "currency": "USD"}),
                json!({"id": "exp-2", "expense_date": "2026-05-10", "amount": 20, "currency": "PYG"}),
            ],
            vec![json!({"id": "lease-1", "platform_fee": 0})],
            Vec::new(),
            vec![json!({"id": "col-1", "lease_id": "lease-1", "status": "paid", "due_date": "2026-05-05",
                        "amount": 100, "currency": "USD"})],
        );
        let error = build_statement_breakdown(&records).expect_err("not computable");
        let AppError::StatementComputation(details) = error else {
            panic!("expected a statement computation error");
        };
        assert_eq!(details.missing_fx_rate_to_pyg, 1);
        assert_eq!(details.unsupported_currency, 1);
        assert_eq!(details.counts_by_kind.get("unsupported_currency:USD"), Some(&1));
        assert_eq!(details.sample_ids, vec!["exp-1", "col-1"]);
    }

    #[test]
    fn foreign_service_fee_charges_fail_the_statement() {
        let mut admin_fee = charge("ch-1", "admin_fee", 15.0);
        admin_fee["currency"] = json!("USD");
        let records = scoped(
            Vec::new(),
            Vec::new(),
            vec![json!({"id": "lease-1", "platform_fee": 0})],
            vec![admin_fee, charge("ch-2", "service_fee_flat", 500.0)],
            Vec::new(),
        );
        let Err(AppError::StatementComputation(details)) = build_statement_breakdown(&records)
        else {
            panic!("expected a statement computation error");
        };
        assert_eq!(details.missing_fx_rate_to_pyg, 0);
        assert_eq!(details.unsupported_currency, 1);
        assert_eq!(details.counts_by_kind.get("unsupported_currency:USD"), Some(&1));
        assert_eq!(details.sample_ids, vec!["ch-1"]);
    }

    #[test]
    fn rows_without_currency_count_as_pyg() {
        let records = scoped(
            Vec::new(),
            vec![
                json!({"id": "exp-1", "expense_date": "2026-05-10", "amount": 100}),
                json!({"id": "exp-2", "expense_date": "2026-05-11", "amount": 50, "currency": null}),
            ],
            vec![json!({"id": "lease-1", "platform_fee": 0})],
            Vec::new(),
            vec![json!({"id": "col-1", "lease_id": "lease-1", "status": "paid",
                        "due_date": "2026-05-05", "amount": 300})],
        );
        let breakdown = build_statement_breakdown(&records).expect("breakdown");
        assert_eq!(breakdown.operating_expenses, 150.0);
        assert_eq!(breakdown.lease_collections, 300.0);
        assert_eq!(breakdown.net_payout, 150.0);
    }

    #[test]
    fn sample_ids_are_grouped_by_warning() {
        let records = scoped(
            Vec::new(),
            vec![
                json!({"id": "exp-1", "expense_date": "2026-05-10", "amount": 20, "currency": "USD"}),
                json!({"id": "exp-2", "expense_date": "2026-05-10", "amount": 20, "currency": "EUR"}),
                json!({"id": "exp-3", "expense_date": "2026-05-10", "amount": 20, "currency": "USD"}),
            ],
            Vec::new(),
            Vec::new(),
            Vec::new(),
        );
        let Err(AppError::StatementComputation(details)) = build_statement_breakdown(&records)
        else {
            panic!("expected a statement computation error");
        };
        assert_eq!(details.missing_fx_rate_to_pyg, 2);
        assert_eq!(details.sample_ids, vec!["exp-1", "exp-3", "exp-2"]);
    }

    #[test]
    fn out_of_period_records_do_not_trigger_warnings() {
        let records = scoped(
            Vec::new(),
            vec![json!({"id": "exp-1", "expense_date": "2026-06-10", "amount": 20, "currency": "EUR"})],
            Vec::new(),
            Vec::new(),
            Vec::new(),
        );
        let breakdown = build_statement_breakdown(&records).expect("breakdown");
        assert_eq!(breakdown.operating_expenses, 0.0);
        assert!(breakdown.line_items.is_empty());
    }

    #[test]
    fn sample_ids_are_capped() {
        let expenses = (0..12)
            .map(|index| {
                json!({"id": format!("exp-{index}"), "expense_date": "2026-05-10",
                       "amount": 1, "currency": "BRL"})
            })
            .collect();
        let records = scoped(Vec::new(), expenses, Vec::new(), Vec::new(), Vec::new());
        let Err(AppError::StatementComputation(details)) = build_statement_breakdown(&records)
        else {
            panic!("expected a statement computation error");
        };
        assert_eq!(details.unsupported_currency, 12);
        assert_eq!(details.sample_ids.len(), 8);
    }
}
