//! LooseLINE Backend Service
//!
//! Main entry point for the LooseLINE wallet core.
//! This process:
//! - connects to Postgres and applies migrations
//! - wires the ledger, deposit, withdrawal and settlement services
//! - runs the pending-deposit expiry sweeper until shutdown

use looseline_backend::config::AppConfig;
use looseline_backend::database::{create_pool, run_migrations, verify_schema, MIGRATIONS_DIR};
use looseline_backend::error::{AppError, AppResult};
use looseline_backend::payments::StripeGateway;
use looseline_backend::repositories::PgWalletStore;
use looseline_backend::sweeper::ExpirySweeper;
use looseline_backend::AppState;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

fn init_tracing(config: &AppConfig) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        format!("looseline_backend={},sqlx=warn", config.log_level).into()
    });

    if config.json_logs() {
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .json()
            .init();
    } else {
        tracing_subscriber::fmt().with_env_filter(filter).init();
    }
}

#[tokio::main]
async fn main() -> AppResult<()> {
    // Load environment variables first
    dotenv::dotenv().ok();

    let config = AppConfig::from_env().map_err(|e| {
        eprintln!("Configuration error: {}", e);
        AppError::Config(e)
    })?;

    init_tracing(&config);

    info!("LooseLINE backend starting");
    info!("Environment: {}", config.environment);
    info!("Log level: {}", config.log_level);
    info!(
        "Limits: deposit {}-{}, withdrawal {}-{}, daily {} {}",
        config.limits.min_deposit,
        config.limits.max_deposit,
        config.limits.min_withdrawal,
        config.limits.max_withdrawal,
        config.limits.daily_withdrawal_limit,
        config.limits.currency
    );

    // =========================================================================
    // DATABASE SETUP
    // =========================================================================
    info!("Connecting to database...");

    let pool = create_pool(&config.database).await.map_err(|e| {
        error!("Failed to create database pool: {}", e);
        AppError::Database(e)
    })?;
    info!("Max connections: {}", config.database.max_connections);

    info!("Running database migrations...");
    run_migrations(&pool, Path::new(MIGRATIONS_DIR))
        .await
        .map_err(|e| {
            error!("Database migration failed: {}", e);
            AppError::Database(e)
        })?;

    verify_schema(&pool).await?;
    info!("Database ready");

    // =========================================================================
    // SERVICES
    // =========================================================================
    if config.gateway.secret_key.is_empty() {
        if config.is_production() {
            return Err(AppError::Config("STRIPE_SECRET_KEY is required in production".into()));
        }
        warn!("STRIPE_SECRET_KEY is not set; gateway calls will be rejected");
    }

    let gateway = Arc::new(StripeGateway::new(
        config.gateway.clone(),
        &config.limits.currency,
    )?);
    let store = Arc::new(PgWalletStore::new(pool.clone()));
    let app_state = AppState::new(store, gateway, config.limits.clone());
    info!("Wallet services initialized");

    // =========================================================================
    // BACKGROUND TASKS
    // =========================================================================
    let sweeper = ExpirySweeper::new(
        app_state.deposits.clone(),
        Duration::from_secs(config.expiry_sweep_interval_secs),
    );
    let sweeper_handle = tokio::spawn(async move {
        sweeper.start().await;
    });

    info!("LooseLINE backend ready, press Ctrl+C to shut down");

    // =========================================================================
    // SHUTDOWN HANDLING
    // =========================================================================
    tokio::select! {
        _ = tokio::signal::ctrl_c() => {
            info!("Shutdown signal received, shutting down gracefully...");
        }
        _ = sweeper_handle => {
            error!("Expiry sweeper exited unexpectedly");
        }
    }

    pool.close().await;
    info!("LooseLINE backend shutdown complete");
    Ok(())
}
