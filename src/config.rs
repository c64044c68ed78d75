use chrono::Duration as ChronoDuration;
use rust_decimal::Decimal;
use std::env;
use std::str::FromStr;
use std::time::Duration;

/// Database configuration
#[derive(Debug, Clone)]
pub struct DatabaseConfig {
    pub url: String,
    pub max_connections: u32,
    pub acquire_timeout_secs: u64,
    pub idle_timeout_secs: u64,
    pub max_lifetime_secs: u64,
    pub test_before_acquire: bool,
}

/// Monetary limits and timing rules applied by the wallet workflows.
///
/// Injected into every service at construction so tests and environments can
/// override any value without touching process-wide state.
#[derive(Debug, Clone, PartialEq)]
pub struct WalletLimits {
    pub min_deposit: Decimal,
    pub max_deposit: Decimal,
    pub min_withdrawal: Decimal,
    pub max_withdrawal: Decimal,
    pub daily_withdrawal_limit: Decimal,
    pub pending_deposit_ttl_hours: i64,
    pub withdrawal_eta_days: i64,
    pub min_leg_coefficient: Decimal,
    pub max_conflict_retries: u32,
    pub currency: String,
}

/// Payment gateway (Stripe-compatible) configuration
#[derive(Debug, Clone)]
pub struct GatewayConfig {
    pub api_base: String,
    pub secret_key: String,
    pub webhook_secret: String,
    pub signature_tolerance_secs: i64,
    pub request_timeout_secs: u64,
}

/// Application configuration
#[derive(Debug, Clone)]
pub struct AppConfig {
    pub database: DatabaseConfig,
    pub limits: WalletLimits,
    pub gateway: GatewayConfig,
    pub log_level: String,
    pub log_format: String,
    pub environment: String,
    pub expiry_sweep_interval_secs: u64,
}

fn env_parse<T: FromStr>(key: &str) -> Result<Option<T>, String> {
    match env::var(key) {
        Ok(raw) => raw
            .trim()
            .parse::<T>()
            .map(Some)
            .map_err(|_| format!("{} has an invalid value: {}", key, raw)),
        Err(_) => Ok(None),
    }
}

impl DatabaseConfig {
    /// Create database config from environment variables
    pub fn from_env() -> Result<Self, String> {
        let url = env::var("DATABASE_URL")
            .map_err(|_| "DATABASE_URL environment variable is required")?;

        let max_connections = env::var("DATABASE_MAX_CONNECTIONS")
            .ok()
            .and_then(|s| s.parse::<u32>().ok())
            .unwrap_or(10);

        let acquire_timeout_secs = env::var("DATABASE_ACQUIRE_TIMEOUT_SECS")
            .ok()
            .and_then(|s| s.parse::<u64>().ok())
            .unwrap_or(30);

        let idle_timeout_secs = env::var("DATABASE_IDLE_TIMEOUT_SECS")
            .ok()
            .and_then(|s| s.parse::<u64>().ok())
            .unwrap_or(600); // 10 minutes

        let max_lifetime_secs = env::var("DATABASE_MAX_LIFETIME_SECS")
            .ok()
            .and_then(|s| s.parse::<u64>().ok())
            .unwrap_or(1800); // 30 minutes

        let test_before_acquire = env::var("DATABASE_TEST_BEFORE_ACQUIRE")
            .ok()
            .and_then(|s| s.parse::<bool>().ok())
            .unwrap_or(true);

        if max_connections == 0 {
            return Err("DATABASE_MAX_CONNECTIONS must be greater than 0".to_string());
        }

        if acquire_timeout_secs == 0 {
            return Err("DATABASE_ACQUIRE_TIMEOUT_SECS must be greater than 0".to_string());
        }

        Ok(Self {
            url,
            max_connections,
            acquire_timeout_secs,
            idle_timeout_secs,
            max_lifetime_secs,
            test_before_acquire,
        })
    }

    /// Get acquire timeout as Duration
    pub fn acquire_timeout(&self) -> Duration {
        Duration::from_secs(self.acquire_timeout_secs)
    }

    /// Get idle timeout as Duration
    pub fn idle_timeout(&self) -> Duration {
        Duration::from_secs(self.idle_timeout_secs)
    }

    /// Get max lifetime as Duration
    pub fn max_lifetime(&self) -> Duration {
        Duration::from_secs(self.max_lifetime_secs)
    }
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            url: "postgresql://localhost/looseline".to_string(),
            max_connections: 10,
            acquire_timeout_secs: 30,
            idle_timeout_secs: 600,
            max_lifetime_secs: 1800,
            test_before_acquire: true,
        }
    }
}

impl WalletLimits {
    /// Load limits from the environment, falling back to the platform defaults
    pub fn from_env() -> Result<Self, String> {
        let defaults = Self::default();

        let limits = Self {
            min_deposit: env_parse("WALLET_MIN_DEPOSIT")?.unwrap_or(defaults.min_deposit),
            max_deposit: env_parse("WALLET_MAX_DEPOSIT")?.unwrap_or(defaults.max_deposit),
            min_withdrawal: env_parse("WALLET_MIN_WITHDRAWAL")?.unwrap_or(defaults.min_withdrawal),
            max_withdrawal: env_parse("WALLET_MAX_WITHDRAWAL")?.unwrap_or(defaults.max_withdrawal),
            daily_withdrawal_limit: env_parse("WALLET_DAILY_WITHDRAWAL_LIMIT")?
                .unwrap_or(defaults.daily_withdrawal_limit),
            pending_deposit_ttl_hours: env_parse("WALLET_PENDING_DEPOSIT_TTL_HOURS")?
                .unwrap_or(defaults.pending_deposit_ttl_hours),
            withdrawal_eta_days: env_parse("WALLET_WITHDRAWAL_ETA_DAYS")?
                .unwrap_or(defaults.withdrawal_eta_days),
            min_leg_coefficient: env_parse("WALLET_MIN_LEG_COEFFICIENT")?
                .unwrap_or(defaults.min_leg_coefficient),
            max_conflict_retries: env_parse("WALLET_MAX_CONFLICT_RETRIES")?
                .unwrap_or(defaults.max_conflict_retries),
            currency: env::var("WALLET_CURRENCY").unwrap_or(defaults.currency),
        };

        limits.validate()?;
        Ok(limits)
    }

    /// Reject internally inconsistent limits
    pub fn validate(&self) -> Result<(), String> {
        if self.min_deposit <= Decimal::ZERO || self.min_deposit > self.max_deposit {
            return Err(format!(
                "Deposit bounds are invalid: min {} max {}",
                self.min_deposit, self.max_deposit
            ));
        }
        if self.min_withdrawal <= Decimal::ZERO || self.min_withdrawal > self.max_withdrawal {
            return Err(format!(
                "Withdrawal bounds are invalid: min {} max {}",
                self.min_withdrawal, self.max_withdrawal
            ));
        }
        if self.daily_withdrawal_limit <= Decimal::ZERO {
            return Err("Daily withdrawal limit must be positive".to_string());
        }
        if self.pending_deposit_ttl_hours <= 0 {
            return Err("Pending deposit TTL must be positive".to_string());
        }
        if self.min_leg_coefficient < Decimal::ONE {
            return Err("Minimum leg coefficient must be at least 1".to_string());
        }
        if self.currency.len() != 3 {
            return Err(format!("Currency must be an ISO 4217 code: {}", self.currency));
        }
        Ok(())
    }

    /// How long a pending deposit stays claimable
    pub fn pending_deposit_ttl(&self) -> ChronoDuration {
        ChronoDuration::hours(self.pending_deposit_ttl_hours)
    }

    /// Informational payout delay quoted to users
    pub fn withdrawal_eta(&self) -> ChronoDuration {
        ChronoDuration::days(self.withdrawal_eta_days)
    }
}

impl Default for WalletLimits {
    fn default() -> Self {
        Self {
            min_deposit: Decimal::new(100, 2),
            max_deposit: Decimal::new(10_000_000, 2),
            min_withdrawal: Decimal::new(1000, 2),
            max_withdrawal: Decimal::new(10_000_000, 2),
            daily_withdrawal_limit: Decimal::new(5_000_000, 2),
            pending_deposit_ttl_hours: 24,
            withdrawal_eta_days: 2,
            min_leg_coefficient: Decimal::new(101, 2),
            max_conflict_retries: 3,
            currency: "USD".to_string(),
        }
    }
}

impl GatewayConfig {
    /// Create gateway config from environment variables
    pub fn from_env() -> Result<Self, String> {
        let secret_key = env::var("STRIPE_SECRET_KEY")
            .map_err(|_| "STRIPE_SECRET_KEY environment variable is required")?;
        let webhook_secret = env::var("STRIPE_WEBHOOK_SECRET")
            .map_err(|_| "STRIPE_WEBHOOK_SECRET environment variable is required")?;

        Ok(Self {
            api_base: env::var("STRIPE_API_BASE")
                .unwrap_or_else(|_| "https://api.stripe.com".to_string()),
            secret_key,
            webhook_secret,
            signature_tolerance_secs: env_parse("STRIPE_SIGNATURE_TOLERANCE_SECS")?.unwrap_or(300),
            request_timeout_secs: env_parse("STRIPE_REQUEST_TIMEOUT_SECS")?.unwrap_or(30),
        })
    }

    /// Get request timeout as Duration
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }
}

impl AppConfig {
    /// Create application config from environment variables
    pub fn from_env() -> Result<Self, String> {
        let database = DatabaseConfig::from_env()?;
        let limits = WalletLimits::from_env()?;
        let gateway = GatewayConfig::from_env()?;

        let log_level = env::var("LOG_LEVEL").unwrap_or_else(|_| "info".to_string());
        let log_format = env::var("LOG_FORMAT").unwrap_or_else(|_| "pretty".to_string());
        let environment = env::var("ENVIRONMENT").unwrap_or_else(|_| "development".to_string());
        let expiry_sweep_interval_secs = env_parse("EXPIRY_SWEEP_INTERVAL_SECS")?.unwrap_or(300);

        let valid_log_levels = ["trace", "debug", "info", "warn", "error"];
        if !valid_log_levels.contains(&log_level.to_lowercase().as_str()) {
            return Err(format!(
                "Invalid LOG_LEVEL: {}. Must be one of: {:?}",
                log_level, valid_log_levels
            ));
        }

        let valid_log_formats = ["pretty", "json"];
        if !valid_log_formats.contains(&log_format.to_lowercase().as_str()) {
            return Err(format!(
                "Invalid LOG_FORMAT: {}. Must be one of: {:?}",
                log_format, valid_log_formats
            ));
        }

        let valid_environments = ["development", "staging", "production"];
        if !valid_environments.contains(&environment.to_lowercase().as_str()) {
            return Err(format!(
                "Invalid ENVIRONMENT: {}. Must be one of: {:?}",
                environment, valid_environments
            ));
        }

        if expiry_sweep_interval_secs == 0 {
            return Err("EXPIRY_SWEEP_INTERVAL_SECS must be greater than 0".to_string());
        }

        Ok(Self {
            database,
            limits,
            gateway,
            log_level: log_level.to_lowercase(),
            log_format: log_format.to_lowercase(),
            environment: environment.to_lowercase(),
            expiry_sweep_interval_secs,
        })
    }

    /// Check if running in production
    pub fn is_production(&self) -> bool {
        self.environment == "production"
    }

    /// Check if JSON log output was requested
    pub fn json_logs(&self) -> bool {
        self.log_format == "json"
    }

    /// Get database URL (convenience method)
    pub fn database_url(&self) -> &str {
        &self.database.url
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_database_config_default() {
        let config = DatabaseConfig::default();
        assert_eq!(config.max_connections, 10);
        assert_eq!(config.acquire_timeout_secs, 30);
    }

    #[test]
    fn test_wallet_limits_default_values() {
        let limits = WalletLimits::default();
        assert_eq!(limits.min_deposit, Decimal::from_str("1.00").unwrap());
        assert_eq!(limits.max_deposit, Decimal::from_str("100000.00").unwrap());
        assert_eq!(limits.min_withdrawal, Decimal::from_str("10.00").unwrap());
        assert_eq!(limits.max_withdrawal, Decimal::from_str("100000.00").unwrap());
        assert_eq!(limits.daily_withdrawal_limit, Decimal::from_str("50000.00").unwrap());
        assert_eq!(limits.min_leg_coefficient, Decimal::from_str("1.01").unwrap());
        assert_eq!(limits.pending_deposit_ttl(), ChronoDuration::hours(24));
        assert_eq!(limits.withdrawal_eta(), ChronoDuration::days(2));
        assert!(limits.validate().is_ok());
    }

    #[test]
    fn test_wallet_limits_rejects_inverted_bounds() {
        let limits = WalletLimits {
            min_deposit: Decimal::new(500, 0),
            max_deposit: Decimal::new(100, 0),
            ..WalletLimits::default()
        };
        assert!(limits.validate().is_err());
    }

    #[test]
    fn test_wallet_limits_rejects_bad_currency() {
        let limits = WalletLimits {
            currency: "DOLLARS".to_string(),
            ..WalletLimits::default()
        };
        assert!(limits.validate().is_err());
    }
}
