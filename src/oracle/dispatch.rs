use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;

use super::models::OracleRequest;
use super::service::OracleService;
use crate::engine::{EngineConfig, Outcome, Resolver, SettlementDomain, SettlementEngine};
use crate::error::AppResult;

pub const ENGINE_NAME: &str = "oracle-dispatcher";

pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(10);

pub type DispatchEngine = SettlementEngine<OracleDispatch>;

/// Pending oracle requests as a settlement domain
pub struct OracleDispatch {
    service: Arc<OracleService>,
}

impl OracleDispatch {
    pub fn new(service: Arc<OracleService>) -> Self {
        Self { service }
    }

    /// Without a resolver the engine stays disabled
    pub fn engine(
        service: Arc<OracleService>,
        resolver: Option<Arc<dyn Resolver<OracleRequest>>>,
        interval: Duration,
    ) -> DispatchEngine {
        SettlementEngine::new(
            Arc::new(Self::new(service)),
            resolver,
            EngineConfig::every(interval),
        )
    }
}

#[async_trait]
impl SettlementDomain for OracleDispatch {
    type Item = OracleRequest;

    fn name(&self) -> &'static str {
        ENGINE_NAME
    }

    async fn list_pending(&self) -> AppResult<Vec<OracleRequest>> {
        self.service.list_pending().await
    }

    async fn settle(&self, item: &OracleRequest, outcome: Outcome) -> AppResult<()> {
        match outcome {
            Outcome::Succeeded(result) => self.service.complete_request(item.id, &result).await?,
            Outcome::Failed(reason) => self.service.fail_request(item.id, &reason).await?,
        };
        Ok(())
    }
}
