// Persistent store contracts and their implementations
pub mod memory;
pub mod postgres;

pub use memory::MemoryStore;
pub use postgres::PgStore;

use async_trait::async_trait;
use rust_decimal::Decimal;
use uuid::Uuid;

use crate::engine::Outcome;
use crate::error::AppResult;
use crate::gasbank::models::{GasAccount, GasBankSummary, GasTransaction};
use crate::oracle::models::OracleRequest;

/// Upper bound on rows returned by a pending query
pub const DEFAULT_PENDING_BATCH: usize = 500;

/// Wallet addresses are unique regardless of case
pub fn wallet_key(wallet: &str) -> String {
    wallet.trim().to_lowercase()
}

/// Gas bank persistence. Every mutating call is atomic per record.
#[async_trait]
pub trait GasBankStore: Send + Sync {
    /// Fails with `WalletInUse` if the wallet is already bound
    async fn create_account(&self, account: GasAccount) -> AppResult<GasAccount>;

    async fn get_account(&self, id: Uuid) -> AppResult<Option<GasAccount>>;

    async fn find_account_by_wallet(&self, wallet: &str) -> AppResult<Option<GasAccount>>;

    async fn list_accounts(&self, owner: Uuid) -> AppResult<Vec<GasAccount>>;

    /// Credit the account and record the completed deposit
    async fn record_deposit(&self, tx: GasTransaction) -> AppResult<(GasAccount, GasTransaction)>;

    /// Reserve `tx.amount` out of available and record the pending withdrawal
    async fn reserve_withdrawal(&self, tx: GasTransaction) -> AppResult<(GasAccount, GasTransaction)>;

    /// Pending withdrawal → Completed | Failed; rejects anything not pending
    async fn settle_withdrawal(
        &self,
        transaction_id: Uuid,
        success: bool,
        message: &str,
    ) -> AppResult<(GasAccount, GasTransaction)>;

    async fn get_transaction(&self, id: Uuid) -> AppResult<Option<GasTransaction>>;

    /// Newest first
    async fn list_transactions(&self, account_id: Uuid, limit: usize) -> AppResult<Vec<GasTransaction>>;

    /// Oldest first
    async fn list_pending_withdrawals(&self, limit: usize) -> AppResult<Vec<GasTransaction>>;

    async fn summary(&self) -> AppResult<GasBankSummary>;
}

/// Oracle request persistence
#[async_trait]
pub trait OracleStore: Send + Sync {
    async fn create_request(&self, request: OracleRequest) -> AppResult<OracleRequest>;

    async fn get_request(&self, id: Uuid) -> AppResult<Option<OracleRequest>>;

    /// Newest first
    async fn list_requests(&self, account_id: Uuid, limit: usize) -> AppResult<Vec<OracleRequest>>;

    /// Oldest first
    async fn list_pending_requests(&self, limit: usize) -> AppResult<Vec<OracleRequest>>;

    /// Pending → Completed | Failed; rejects anything already terminal
    async fn finish_request(&self, id: Uuid, outcome: Outcome) -> AppResult<OracleRequest>;
}

pub(crate) fn sum_by<T>(items: &[T], f: impl Fn(&T) -> Decimal) -> Decimal {
    items.iter().map(f).sum()
}
