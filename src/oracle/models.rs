use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::Type;
use std::fmt;
use uuid::Uuid;
use validator::Validate;

use crate::engine::{Outcome, PendingItem};
use crate::error::OracleError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Type)]
#[serde(rename_all = "lowercase")]
#[sqlx(type_name = "oracle_request_status", rename_all = "lowercase")]
pub enum OracleStatus {
    Pending,
    Completed,
    Failed,
}

impl OracleStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            OracleStatus::Pending => "pending",
            OracleStatus::Completed => "completed",
            OracleStatus::Failed => "failed",
        }
    }

    pub fn is_terminal(&self) -> bool {
        !matches!(self, OracleStatus::Pending)
    }
}

impl fmt::Display for OracleStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Oracle fetch request. The fetch description is opaque to the engine.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OracleRequest {
    pub id: Uuid,
    pub account_id: Uuid,
    pub url: String,
    pub method: String,
    pub body: Option<String>,
    pub status: OracleStatus,
    pub result: Option<String>,
    pub error: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
}

impl OracleRequest {
    pub fn new(input: CreateOracleRequest) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            account_id: input.account_id,
            url: input.url.trim().to_string(),
            method: input.method.trim().to_uppercase(),
            body: input.body,
            status: OracleStatus::Pending,
            result: None,
            error: None,
            created_at: now,
            updated_at: now,
            completed_at: None,
        }
    }

    /// Pending → Completed | Failed, exactly once
    pub fn finish(&mut self, outcome: Outcome) -> Result<(), OracleError> {
        if self.status.is_terminal() {
            return Err(OracleError::AlreadyTerminal {
                request_id: self.id,
                status: self.status,
            });
        }

        match outcome {
            Outcome::Succeeded(result) => {
                self.status = OracleStatus::Completed;
                self.result = Some(result);
            }
            Outcome::Failed(reason) => {
                self.status = OracleStatus::Failed;
                self.error = Some(reason);
            }
        }
        let now = Utc::now();
        self.updated_at = now;
        self.completed_at = Some(now);
        Ok(())
    }
}

impl PendingItem for OracleRequest {
    fn pending_id(&self) -> Uuid {
        self.id
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct CreateOracleRequest {
    pub account_id: Uuid,
    #[validate(url)]
    pub url: String,
    #[validate(length(min = 1, max = 16))]
    pub method: String,
    pub body: Option<String>,
}

impl CreateOracleRequest {
    pub fn get(account_id: Uuid, url: impl Into<String>) -> Self {
        Self {
            account_id,
            url: url.into(),
            method: "GET".to_string(),
            body: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_finish_once() {
        let mut request = OracleRequest::new(CreateOracleRequest::get(
            Uuid::new_v4(),
            "https://api.example/price",
        ));
        request.finish(Outcome::Succeeded("42".to_string())).unwrap();
        assert_eq!(request.status, OracleStatus::Completed);
        assert_eq!(request.result.as_deref(), Some("42"));

        let err = request.finish(Outcome::Failed("late".to_string())).unwrap_err();
        assert!(matches!(
            err,
            OracleError::AlreadyTerminal { status: OracleStatus::Completed, .. }
        ));
        assert!(request.error.is_none());
    }

    #[test]
    fn test_create_validation() {
        let mut input = CreateOracleRequest::get(Uuid::new_v4(), "ftp//broken");
        assert!(input.validate().is_err());

        input.url = "https://api.example/price".to_string();
        assert!(input.validate().is_ok());

        input.method = String::new();
        assert!(input.validate().is_err());
    }
}
