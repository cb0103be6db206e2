use std::sync::Arc;
use tracing::{info, warn};
use uuid::Uuid;
use validator::Validate;

use super::models::{CreateOracleRequest, OracleRequest};
use crate::engine::Outcome;
use crate::error::{AppError, AppResult};
use crate::store::{OracleStore, DEFAULT_PENDING_BATCH};

pub struct OracleService {
    store: Arc<dyn OracleStore>,
    pending_batch: usize,
}

impl OracleService {
    pub fn new(store: Arc<dyn OracleStore>) -> Self {
        Self {
            store,
            pending_batch: DEFAULT_PENDING_BATCH,
        }
    }

    pub fn with_pending_batch(mut self, pending_batch: usize) -> Self {
        self.pending_batch = pending_batch.max(1);
        self
    }

    /// Record a pending request; the dispatcher picks it up on its next tick
    pub async fn create_request(&self, mut input: CreateOracleRequest) -> AppResult<OracleRequest> {
        input.url = input.url.trim().to_string();
        input.method = input.method.trim().to_string();
        input.validate()?;

        let request = self.store.create_request(OracleRequest::new(input)).await?;
        info!(
            request_id = %request.id,
            account_id = %request.account_id,
            method = %request.method,
            "oracle request created"
        );
        Ok(request)
    }

    pub async fn get_request(&self, id: Uuid) -> AppResult<OracleRequest> {
        self.store
            .get_request(id)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("Oracle request {} not found", id)))
    }

    pub async fn list_requests(&self, account_id: Uuid, limit: usize) -> AppResult<Vec<OracleRequest>> {
        self.store.list_requests(account_id, limit).await
    }

    pub async fn list_pending(&self) -> AppResult<Vec<OracleRequest>> {
        self.store.list_pending_requests(self.pending_batch).await
    }

    pub async fn complete_request(&self, id: Uuid, result: &str) -> AppResult<OracleRequest> {
        let request = self
            .store
            .finish_request(id, Outcome::Succeeded(result.to_string()))
            .await?;
        info!(request_id = %id, "oracle request completed");
        Ok(request)
    }

    pub async fn fail_request(&self, id: Uuid, message: &str) -> AppResult<OracleRequest> {
        let request = self
            .store
            .finish_request(id, Outcome::Failed(message.to_string()))
            .await?;
        warn!(request_id = %id, error = message, "oracle request failed");
        Ok(request)
    }
}
