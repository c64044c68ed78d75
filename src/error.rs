use crate::database::DatabaseError;
use crate::odds::OddsError;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use sqlx::Error as SqlxError;
use thiserror::Error;

/// Application-level error types
#[derive(Error, Debug)]
pub enum AppError {
    /// Database-related errors
    #[error("Database error: {0}")]
    Database(#[from] DatabaseError),

    /// SQLx database errors
    #[error("SQL error: {0}")]
    Sqlx(#[from] SqlxError),

    /// Configuration errors
    #[error("Configuration error: {0}")]
    Config(String),

    /// Amount out of bounds or malformed input
    #[error("Validation error: {0}")]
    Validation(String),

    /// Not found errors
    #[error("Resource not found: {0}")]
    NotFound(String),

    #[error("Insufficient funds: available {available}, requested {requested}")]
    InsufficientFunds { available: Decimal, requested: Decimal },

    /// Withdrawal destination exists but has not been verified
    #[error("Withdrawal method not verified: {0}")]
    NotVerified(String),

    #[error("Daily withdrawal limit exceeded: limit {limit}, used today {used_today}, remaining {remaining}")]
    DailyLimitExceeded {
        limit: Decimal,
        used_today: Decimal,
        remaining: Decimal,
    },

    /// Optimistic concurrency retries were exhausted
    #[error("Concurrent balance update, please retry: {0}")]
    Conflict(String),

    #[error("Already settled: {0}")]
    AlreadySettled(String),

    /// Unauthenticated payment gateway callback
    #[error("Invalid signature: {0}")]
    InvalidSignature(String),

    /// Payment processor failure, message passed through from the gateway
    #[error("Payment gateway error: {0}")]
    ExternalGateway(String),

    /// Serialization/deserialization errors
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Generic error with message
    #[error("{0}")]
    Message(String),
}

/// Result type alias for application errors
pub type AppResult<T> = Result<T, AppError>;

/// Machine-checkable error kind exposed to callers and adapters
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    Validation,
    NotFound,
    InsufficientFunds,
    NotVerified,
    DailyLimitExceeded,
    Conflict,
    AlreadySettled,
    InvalidSignature,
    ExternalGateway,
    Internal,
}

impl AppError {
    /// Classify the error for callers that branch on the failure
    pub fn kind(&self) -> ErrorKind {
        match self {
            AppError::Validation(_) => ErrorKind::Validation,
            AppError::NotFound(_) => ErrorKind::NotFound,
            AppError::InsufficientFunds { .. } => ErrorKind::InsufficientFunds,
            AppError::NotVerified(_) => ErrorKind::NotVerified,
            AppError::DailyLimitExceeded { .. } => ErrorKind::DailyLimitExceeded,
            AppError::Conflict(_) => ErrorKind::Conflict,
            AppError::AlreadySettled(_) => ErrorKind::AlreadySettled,
            AppError::InvalidSignature(_) => ErrorKind::InvalidSignature,
            AppError::ExternalGateway(_) => ErrorKind::ExternalGateway,
            AppError::Database(_)
            | AppError::Sqlx(_)
            | AppError::Config(_)
            | AppError::Serialization(_)
            | AppError::Message(_) => ErrorKind::Internal,
        }
    }

    /// Check if error is a not found error
    pub fn is_not_found(&self) -> bool {
        matches!(self, AppError::NotFound(_))
    }

    /// Whether the caller may simply retry the same request
    pub fn is_transient(&self) -> bool {
        matches!(self, AppError::Conflict(_) | AppError::ExternalGateway(_))
            || matches!(
                self,
                AppError::Database(DatabaseError::PoolCreation(_))
                    | AppError::Database(DatabaseError::ConnectionTimeout)
            )
    }

    /// Get HTTP status code for the error
    pub fn status_code(&self) -> u16 {
        match self {
            AppError::Validation(_) => 400,
            AppError::InsufficientFunds { .. } => 400,
            AppError::InvalidSignature(_) => 400,
            AppError::NotVerified(_) => 403,
            AppError::NotFound(_) => 404,
            AppError::AlreadySettled(_) => 409,
            AppError::Conflict(_) => 409,
            AppError::DailyLimitExceeded { .. } => 429,
            AppError::ExternalGateway(_) => 502,
            _ => 500,
        }
    }
}

/// Flat result shape for adapters: success flag, error kind and message
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OperationResult {
    pub success: bool,
    pub error_kind: Option<ErrorKind>,
    pub message: String,
}

impl OperationResult {
    /// Build from any workflow result, using `message` for the success case
    pub fn from_result<T>(result: &AppResult<T>, message: &str) -> Self {
        match result {
            Ok(_) => Self {
                success: true,
                error_kind: None,
                message: message.to_string(),
            },
            Err(e) => Self {
                success: false,
                error_kind: Some(e.kind()),
                message: e.to_string(),
            },
        }
    }
}

/// Repository-specific error types
#[derive(Error, Debug)]
pub enum RepositoryError {
    /// Database query error
    #[error("Query error: {0}")]
    Query(SqlxError),

    /// Record not found
    #[error("Record not found: {0}")]
    NotFound(String),

    /// Duplicate record
    #[error("Duplicate record: {0}")]
    Duplicate(String),

    /// Constraint violation
    #[error("Constraint violation: {0}")]
    ConstraintViolation(String),

    /// The balance moved between read and write
    #[error("Balance changed concurrently: expected {expected}, found {actual}")]
    Conflict { expected: Decimal, actual: Decimal },

    /// The write would take balance or locked funds below zero
    #[error("Insufficient balance: available {available}, required {required}")]
    NegativeBalance { available: Decimal, required: Decimal },

    /// Bet or coupon has already left its pending state
    #[error("Already settled: {0}")]
    AlreadySettled(String),

    /// Bet is a leg of another open coupon
    #[error("Bet {0} is already part of an open coupon")]
    BetAlreadyInCoupon(uuid::Uuid),
}

/// Result type alias for storage operations
pub type RepositoryResult<T> = Result<T, RepositoryError>;

impl From<RepositoryError> for AppError {
    fn from(err: RepositoryError) -> Self {
        match err {
            RepositoryError::NotFound(msg) => AppError::NotFound(msg),
            RepositoryError::Query(e) => AppError::Sqlx(e),
            RepositoryError::Duplicate(msg) => AppError::Validation(format!("Duplicate: {}", msg)),
            RepositoryError::ConstraintViolation(msg) => AppError::Validation(msg),
            RepositoryError::Conflict { expected, actual } => AppError::Conflict(format!(
                "expected balance {}, found {}",
                expected, actual
            )),
            RepositoryError::NegativeBalance {
                available,
                required,
            } => AppError::InsufficientFunds {
                available,
                requested: required,
            },
            RepositoryError::AlreadySettled(msg) => AppError::AlreadySettled(msg),
            e @ RepositoryError::BetAlreadyInCoupon(_) => AppError::Validation(e.to_string()),
        }
    }
}

impl From<OddsError> for AppError {
    fn from(err: OddsError) -> Self {
        AppError::Validation(err.to_string())
    }
}

impl From<SqlxError> for RepositoryError {
    fn from(err: SqlxError) -> Self {
        match &err {
            SqlxError::RowNotFound => RepositoryError::NotFound("Record not found".to_string()),
            SqlxError::Database(db_err) => {
                let code = db_err.code().map(|c| c.to_string());
                if code.as_deref() == Some("23505") {
                    // Unique violation
                    RepositoryError::Duplicate(db_err.message().to_string())
                } else if code.as_deref() == Some("23503") {
                    // Foreign key violation
                    RepositoryError::ConstraintViolation(db_err.message().to_string())
                } else if code.as_deref() == Some("23514") {
                    // Check constraint violation
                    RepositoryError::ConstraintViolation(db_err.message().to_string())
                } else {
                    RepositoryError::Query(err)
                }
            }
            _ => RepositoryError::Query(err),
        }
    }
}
