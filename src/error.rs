use std::time::Duration;

use rust_decimal::Decimal;
use sqlx::migrate::MigrateError;
use thiserror::Error;
use uuid::Uuid;

use crate::gasbank::models::TransactionStatus;
use crate::oracle::models::OracleStatus;

/// Top-level error type for the service layer
#[derive(Error, Debug)]
pub enum AppError {
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Ledger error: {0}")]
    Ledger(#[from] LedgerError),

    #[error("Oracle error: {0}")]
    Oracle(#[from] OracleError),

    #[error("Resolver error: {0}")]
    Resolver(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Internal error: {0}")]
    Internal(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("External error: {0}")]
    ExternalError(String),

    #[error("{service} did not stop within {grace:?}")]
    ShutdownTimeout { service: String, grace: Duration },
}

impl AppError {
    /// True when the error reports that the record already reached a terminal
    /// state, i.e. someone else settled it first.
    pub fn is_settlement_conflict(&self) -> bool {
        matches!(
            self,
            AppError::Ledger(LedgerError::AlreadySettled { .. })
                | AppError::Oracle(OracleError::AlreadyTerminal { .. })
        )
    }
}

/// Gas bank ledger errors
#[derive(Error, Debug)]
pub enum LedgerError {
    #[error("Invalid amount: {0}")]
    InvalidAmount(Decimal),

    #[error("Insufficient funds: required {required}, available {available}")]
    InsufficientFunds { required: Decimal, available: Decimal },

    #[error("Wallet already bound to another gas account: {0}")]
    WalletInUse(String),

    #[error("Transaction {transaction_id} already settled with status {status}")]
    AlreadySettled {
        transaction_id: Uuid,
        status: TransactionStatus,
    },

    #[error("Transaction {0} is not a withdrawal")]
    NotAWithdrawal(Uuid),
}

/// Oracle request errors
#[derive(Error, Debug)]
pub enum OracleError {
    #[error("Oracle request {request_id} already {status}")]
    AlreadyTerminal {
        request_id: Uuid,
        status: OracleStatus,
    },
}

impl From<MigrateError> for AppError {
    fn from(error: MigrateError) -> Self {
        AppError::Internal(format!("Migration error: {:?}", error))
    }
}

impl From<rust_decimal::Error> for AppError {
    fn from(error: rust_decimal::Error) -> Self {
        AppError::InvalidInput(format!("Decimal conversion error: {:?}", error))
    }
}

impl From<reqwest::Error> for AppError {
    fn from(error: reqwest::Error) -> Self {
        AppError::ExternalError(format!("HTTP request error: {}", error))
    }
}

impl From<config::ConfigError> for AppError {
    fn from(error: config::ConfigError) -> Self {
        AppError::Config(error.to_string())
    }
}

impl From<validator::ValidationErrors> for AppError {
    fn from(errors: validator::ValidationErrors) -> Self {
        let details = errors
            .field_errors()
            .into_iter()
            .map(|(field, errors)| {
                let codes: Vec<String> = errors
                    .iter()
                    .map(|e| {
                        e.message
                            .as_ref()
                            .map(|m| m.to_string())
                            .unwrap_or_else(|| e.code.to_string())
                    })
                    .collect();
                format!("{}: {}", field, codes.join(", "))
            })
            .collect::<Vec<String>>()
            .join("; ");

        AppError::InvalidInput(format!("Validation failed: {}", details))
    }
}

/// Result type alias for the service layer
pub type AppResult<T> = Result<T, AppError>;
