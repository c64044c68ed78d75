use std::path::Path;
use std::time::Duration;

use sqlx::migrate::{MigrateError, Migrator};
use sqlx::{postgres::PgPoolOptions, PgPool};
use thiserror::Error;
use tracing::{info, warn};

use crate::config::DatabaseConfig;

/// Default location of the SQL migrations, relative to the working directory
pub const MIGRATIONS_DIR: &str = "./migrations";

/// Tables the wallet store reads and writes
pub const WALLET_TABLES: &[&str] = &[
    "accounts",
    "user_balances",
    "ledger_entries",
    "withdrawal_methods",
    "pending_operations",
    "bets",
    "coupons",
    "coupon_bets",
];

#[derive(Error, Debug)]
pub enum DatabaseError {
    #[error("Failed to create database pool: {0}")]
    PoolCreation(sqlx::Error),

    #[error("Database query error: {0}")]
    Query(sqlx::Error),

    #[error("Database connection timeout")]
    ConnectionTimeout,

    #[error("Database migration failed: {0}")]
    Migration(#[from] MigrateError),

    #[error("Wallet schema is incomplete, missing tables: {}", .0.join(", "))]
    MissingTables(Vec<String>),
}

impl From<sqlx::Error> for DatabaseError {
    fn from(err: sqlx::Error) -> Self {
        match err {
            sqlx::Error::PoolTimedOut => DatabaseError::ConnectionTimeout,
            other => DatabaseError::Query(other),
        }
    }
}

/// Open the pool and make sure a connection can actually be acquired
pub async fn create_pool(config: &DatabaseConfig) -> Result<PgPool, DatabaseError> {
    let pool = PgPoolOptions::new()
        .max_connections(config.max_connections)
        .acquire_timeout(Duration::from_secs(config.acquire_timeout_secs))
        .idle_timeout(Duration::from_secs(config.idle_timeout_secs))
        .max_lifetime(Duration::from_secs(config.max_lifetime_secs))
        .test_before_acquire(config.test_before_acquire)
        .connect(&config.url)
        .await
        .map_err(DatabaseError::PoolCreation)?;

    sqlx::query("SELECT 1")
        .execute(&pool)
        .await
        .map_err(DatabaseError::PoolCreation)?;

    info!(
        "Database pool ready (max {} connections, acquire timeout {}s)",
        config.max_connections, config.acquire_timeout_secs
    );
    Ok(pool)
}

/// Apply pending migrations from `dir`; returns how many migrations the directory holds
pub async fn run_migrations(pool: &PgPool, dir: &Path) -> Result<usize, DatabaseError> {
    let migrator = Migrator::new(dir).await?;
    let known = migrator.iter().count();
    migrator.run(pool).await?;
    info!("Schema up to date ({} migrations in {})", known, dir.display());
    Ok(known)
}

/// Wallet tables absent from `found`, in declaration order
pub fn missing_tables(found: &[String]) -> Vec<String> {
    WALLET_TABLES
        .iter()
        .filter(|table| !found.iter().any(|f| f == *table))
        .map(|table| table.to_string())
        .collect()
}

/// Confirm every wallet table exists before serving traffic
pub async fn verify_schema(pool: &PgPool) -> Result<(), DatabaseError> {
    let wanted: Vec<String> = WALLET_TABLES.iter().map(|t| t.to_string()).collect();
    let found: Vec<String> = sqlx::query_scalar(
        "SELECT table_name::text FROM information_schema.tables \
         WHERE table_schema = current_schema() AND table_name = ANY($1)",
    )
    .bind(&wanted)
    .fetch_all(pool)
    .await?;

    let missing = missing_tables(&found);
    if !missing.is_empty() {
        warn!("Wallet schema check failed: {:?}", missing);
        return Err(DatabaseError::MissingTables(missing));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_missing_tables() {
        let all: Vec<String> = WALLET_TABLES.iter().map(|t| t.to_string()).collect();
        assert!(missing_tables(&all).is_empty());

        let partial = vec!["accounts".to_string(), "ledger_entries".to_string()];
        let missing = missing_tables(&partial);
        assert_eq!(missing.len(), WALLET_TABLES.len() - 2);
        assert_eq!(missing[0], "user_balances");
        assert!(!missing.contains(&"accounts".to_string()));
    }

    #[test]
    fn test_missing_tables_message() {
        let err = DatabaseError::MissingTables(vec!["bets".into(), "coupons".into()]);
        assert_eq!(
            err.to_string(),
            "Wallet schema is incomplete, missing tables: bets, coupons"
        );
    }

    #[test]
    fn test_pool_timeout_is_classified() {
        assert!(matches!(
            DatabaseError::from(sqlx::Error::PoolTimedOut),
            DatabaseError::ConnectionTimeout
        ));
        assert!(matches!(
            DatabaseError::from(sqlx::Error::RowNotFound),
            DatabaseError::Query(_)
        ));
    }
}
