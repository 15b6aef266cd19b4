use casaora_billing::{
    config::AppConfig, db::build_pool, repository::PgRowStore,
    services::scheduler::run_monthly_statement_job,
};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let _ = dotenvy::dotenv();
    init_tracing();

    let config = AppConfig::from_env();
    let pool = build_pool(&config)?;
    let store = PgRowStore::new(pool, config.row_store_max_limit);

    tracing::info!(
        app_name = %config.app_name,
        environment = %config.environment,
        production = config.is_production(),
        "Running monthly owner statement job"
    );

    let today = chrono::Utc::now().date_naive();
    let created = run_monthly_statement_job(&store, &config, today).await?;
    tracing::info!(created, "Monthly owner statement job finished");
    Ok(())
}

fn init_tracing() {
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_target(false)
        .compact()
        .init();
}
