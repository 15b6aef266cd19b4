use serde::Serialize;

use crate::{
    error::AppResult,
    records::OwnerStatement,
    repository::RowStore,
    services::{
        owner_statement::{build_statement_breakdown, StatementBreakdown},
        round2,
        statement_scope::{aggregate_period, ScopedRecords, StatementScope},
    },
};

/// Drift between a stored statement snapshot and what its period computes to
/// now. A non-zero diff is reported, never corrected.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct StatementReconciliation {
    pub gross_total: f64,
    pub computed_net_payout: f64,
    pub stored_net_payout: f64,
    #[serde(rename = "stored_vs_computed_diff")]
    pub diff: f64,
}

impl StatementReconciliation {
    pub fn from_breakdown(stored_net_payout: f64, breakdown: &StatementBreakdown) -> Self {
        let stored_net_payout = round2(stored_net_payout);
        Self {
            gross_total: breakdown.gross_total,
            computed_net_payout: breakdown.net_payout,
            stored_net_payout,
            diff: round2(stored_net_payout - breakdown.net_payout),
        }
    }

    pub fn is_drifted(&self) -> bool {
        self.diff != 0.0
    }
}

/// Recomputes `scoped` and compares it with the stored snapshot.
pub fn reconcile(
    stored: &OwnerStatement,
    scoped: &ScopedRecords,
) -> AppResult<(StatementBreakdown, StatementReconciliation)> {
    let breakdown = build_statement_breakdown(scoped)?;
    let reconciliation = StatementReconciliation::from_breakdown(stored.net_payout, &breakdown);
    if reconciliation.is_drifted() {
        tracing::info!(
            statement_id = %stored.id,
            stored_net_payout = reconciliation.stored_net_payout,
            computed_net_payout = reconciliation.computed_net_payout,
            diff = reconciliation.diff,
            "Owner statement drifted from its snapshot"
        );
    }
    Ok((breakdown, reconciliation))
}

/// Scope a stored statement was computed for.
pub fn stored_statement_scope(stored: &OwnerStatement) -> StatementScope {
    StatementScope {
        organization_id: stored.organization_id.clone(),
        period_start: stored.period_start,
        period_end: stored.period_end,
        property_id: stored.property_id.clone(),
        unit_id: stored.unit_id.clone(),
    }
}

/// Reads the statement's period again and reconciles it. Nothing is written.
pub async fn reconcile_stored_statement<S: RowStore>(
    store: &S,
    stored: &OwnerStatement,
) -> AppResult<(StatementBreakdown, StatementReconciliation)> {
    let scoped = aggregate_period(store, &stored_statement_scope(stored)).await?;
    reconcile(stored, &scoped)
}
