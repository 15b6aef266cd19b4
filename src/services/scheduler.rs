use chrono::NaiveDate;
use serde_json::Value;

use crate::{
    config::AppConfig,
    error::AppResult,
    records::from_rows,
    repository::{json_map, RowStore},
    services::owner_statements::auto_generate_monthly_statements,
};

#[derive(Debug, serde::Deserialize)]
struct OrganizationRow {
    id: String,
}

/// Organizations the statement job covers: the configured list, or every
/// active organization when none is configured.
pub async fn statement_organization_ids<S: RowStore>(
    store: &S,
    config: &AppConfig,
) -> AppResult<Vec<String>> {
    if !config.statement_org_ids.is_empty() {
        return Ok(config.statement_org_ids.clone());
    }
    let rows = store
        .list_rows(
            "organizations",
            Some(&json_map(&[("is_active", Value::Bool(true))])),
            100,
            "created_at",
            true,
        )
        .await?;
    Ok(from_rows::<OrganizationRow>("organizations", rows)?
        .into_iter()
        .map(|row| row.id)
        .collect())
}

/// Runs monthly owner statement generation for every covered organization.
/// One organization failing does not stop the others.
pub async fn run_monthly_statement_job<S: RowStore>(
    store: &S,
    config: &AppConfig,
    today: NaiveDate,
) -> AppResult<u32> {
    if !config.auto_owner_statements_enabled {
        tracing::info!("Scheduler: owner statement generation is disabled");
        return Ok(0);
    }

    let org_ids = statement_organization_ids(store, config).await?;
    let mut total = 0u32;
    for org_id in &org_ids {
        match auto_generate_monthly_statements(store, org_id, today).await {
            Ok(created) => total += created,
            Err(error) => {
                tracing::warn!(org_id, error = %error, "Scheduler: owner statement generation failed");
            }
        }
    }
    tracing::info!(
        organizations = org_ids.len(),
        total,
        "Scheduler: owner statements auto-generated"
    );
    Ok(total)
}
