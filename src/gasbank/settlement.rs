use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;

use super::models::GasTransaction;
use super::service::GasBankService;
use crate::engine::{EngineConfig, Outcome, Resolver, SettlementDomain, SettlementEngine};
use crate::error::AppResult;
use crate::resolver::TimeoutResolver;

pub const ENGINE_NAME: &str = "gasbank-settlement";

pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(15);

/// Deadline the timeout resolver gives an unconfirmed withdrawal
pub const DEFAULT_CONFIRMATION_TIMEOUT: Duration = Duration::from_secs(120);

pub type WithdrawalEngine = SettlementEngine<WithdrawalSettlement>;

/// Pending withdrawals as a settlement domain
pub struct WithdrawalSettlement {
    service: Arc<GasBankService>,
}

impl WithdrawalSettlement {
    pub fn new(service: Arc<GasBankService>) -> Self {
        Self { service }
    }

    pub fn engine(
        service: Arc<GasBankService>,
        resolver: Arc<dyn Resolver<GasTransaction>>,
        interval: Duration,
    ) -> WithdrawalEngine {
        SettlementEngine::new(
            Arc::new(Self::new(service)),
            Some(resolver),
            EngineConfig::every(interval),
        )
    }

    /// Engine that fails withdrawals left unconfirmed past the default deadline
    pub fn with_timeout(service: Arc<GasBankService>) -> WithdrawalEngine {
        Self::engine(
            service,
            Arc::new(TimeoutResolver::new(DEFAULT_CONFIRMATION_TIMEOUT)),
            DEFAULT_POLL_INTERVAL,
        )
    }
}

#[async_trait]
impl SettlementDomain for WithdrawalSettlement {
    type Item = GasTransaction;

    fn name(&self) -> &'static str {
        ENGINE_NAME
    }

    async fn list_pending(&self) -> AppResult<Vec<GasTransaction>> {
        self.service.list_pending_withdrawals().await
    }

    async fn settle(&self, item: &GasTransaction, outcome: Outcome) -> AppResult<()> {
        let (success, message) = match outcome {
            Outcome::Succeeded(tx_hash) => (true, tx_hash),
            Outcome::Failed(reason) => (false, reason),
        };
        self.service
            .complete_withdrawal(item.id, success, &message)
            .await?;
        Ok(())
    }
}
