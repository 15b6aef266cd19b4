use std::time::Duration;

use sqlx::postgres::PgPoolOptions;

use crate::{
    config::AppConfig,
    error::{AppError, AppResult},
};

/// Builds a lazily-connecting pool; the first query opens the connection.
pub fn build_pool(config: &AppConfig) -> AppResult<sqlx::PgPool> {
    let Some(database_url) = config.supabase_db_url.as_deref() else {
        return Err(AppError::Dependency(
            "Supabase database is not configured. Set SUPABASE_DB_URL or DATABASE_URL.".to_string(),
        ));
    };

    PgPoolOptions::new()
        .max_connections(config.db_pool_max_connections.max(1))
        .min_connections(
            config
                .db_pool_min_connections
                .min(config.db_pool_max_connections.max(1)),
        )
        .acquire_timeout(Duration::from_secs(config.db_pool_acquire_timeout_seconds))
        .idle_timeout(Duration::from_secs(config.db_pool_idle_timeout_seconds))
        .connect_lazy(database_url)
        .map_err(|error| {
            tracing::error!(error = %error, "Invalid database connection string");
            AppError::Dependency("Could not configure database pool.".to_string())
        })
}
