use async_trait::async_trait;
use std::collections::HashMap;
use tokio::sync::RwLock;
use uuid::Uuid;

use super::{sum_by, wallet_key, GasBankStore, OracleStore};
use crate::engine::Outcome;
use crate::error::{AppError, AppResult, LedgerError};
use crate::gasbank::models::{
    GasAccount, GasBankSummary, GasTransaction, TransactionStatus, TransactionType,
};
use crate::oracle::models::{OracleRequest, OracleStatus};

#[derive(Default)]
struct GasBankState {
    accounts: HashMap<Uuid, GasAccount>,
    /// lowercase wallet -> gas account id
    wallets: HashMap<String, Uuid>,
    transactions: HashMap<Uuid, GasTransaction>,
}

impl GasBankState {
    fn account_mut(&mut self, id: Uuid) -> AppResult<&mut GasAccount> {
        self.accounts
            .get_mut(&id)
            .ok_or_else(|| AppError::NotFound(format!("Gas account {} not found", id)))
    }
}

/// In-process store. Each mutation holds a single write guard, so
/// read-modify-write is atomic.
#[derive(Default)]
pub struct MemoryStore {
    gasbank: RwLock<GasBankState>,
    oracle: RwLock<HashMap<Uuid, OracleRequest>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

fn oldest_first<T>(items: &mut [T], key: impl Fn(&T) -> (chrono::DateTime<chrono::Utc>, Uuid)) {
    items.sort_by_key(key);
}

#[async_trait]
impl GasBankStore for MemoryStore {
    async fn create_account(&self, account: GasAccount) -> AppResult<GasAccount> {
        let mut state = self.gasbank.write().await;
        let key = wallet_key(&account.wallet_address);
        if state.wallets.contains_key(&key) {
            return Err(LedgerError::WalletInUse(account.wallet_address).into());
        }
        state.wallets.insert(key, account.id);
        state.accounts.insert(account.id, account.clone());
        Ok(account)
    }

    async fn get_account(&self, id: Uuid) -> AppResult<Option<GasAccount>> {
        Ok(self.gasbank.read().await.accounts.get(&id).cloned())
    }

    async fn find_account_by_wallet(&self, wallet: &str) -> AppResult<Option<GasAccount>> {
        let state = self.gasbank.read().await;
        Ok(state
            .wallets
            .get(&wallet_key(wallet))
            .and_then(|id| state.accounts.get(id))
            .cloned())
    }

    async fn list_accounts(&self, owner: Uuid) -> AppResult<Vec<GasAccount>> {
        let state = self.gasbank.read().await;
        let mut accounts: Vec<GasAccount> = state
            .accounts
            .values()
            .filter(|a| a.account_id == owner)
            .cloned()
            .collect();
        oldest_first(&mut accounts, |a| (a.created_at, a.id));
        Ok(accounts)
    }

    async fn record_deposit(&self, tx: GasTransaction) -> AppResult<(GasAccount, GasTransaction)> {
        let mut state = self.gasbank.write().await;
        let account = state.account_mut(tx.account_id)?;
        account.credit(tx.amount);
        let account = account.clone();
        state.transactions.insert(tx.id, tx.clone());
        Ok((account, tx))
    }

    async fn reserve_withdrawal(&self, tx: GasTransaction) -> AppResult<(GasAccount, GasTransaction)> {
        let mut state = self.gasbank.write().await;
        let account = state.account_mut(tx.account_id)?;
        account.reserve(tx.amount)?;
        let account = account.clone();
        state.transactions.insert(tx.id, tx.clone());
        Ok((account, tx))
    }

    async fn settle_withdrawal(
        &self,
        transaction_id: Uuid,
        success: bool,
        message: &str,
    ) -> AppResult<(GasAccount, GasTransaction)> {
        let mut state = self.gasbank.write().await;

        let mut tx = state
            .transactions
            .get(&transaction_id)
            .cloned()
            .ok_or_else(|| AppError::NotFound(format!("Transaction {} not found", transaction_id)))?;
        tx.finish(success, message)?;

        let account = state.account_mut(tx.account_id)?;
        account.settle(tx.amount, success);
        let account = account.clone();

        state.transactions.insert(tx.id, tx.clone());
        Ok((account, tx))
    }

    async fn get_transaction(&self, id: Uuid) -> AppResult<Option<GasTransaction>> {
        Ok(self.gasbank.read().await.transactions.get(&id).cloned())
    }

    async fn list_transactions(&self, account_id: Uuid, limit: usize) -> AppResult<Vec<GasTransaction>> {
        let state = self.gasbank.read().await;
        let mut txs: Vec<GasTransaction> = state
            .transactions
            .values()
            .filter(|tx| tx.account_id == account_id)
            .cloned()
            .collect();
        oldest_first(&mut txs, |tx| (tx.created_at, tx.id));
        txs.reverse();
        txs.truncate(limit);
        Ok(txs)
    }

    async fn list_pending_withdrawals(&self, limit: usize) -> AppResult<Vec<GasTransaction>> {
        let state = self.gasbank.read().await;
        let mut txs: Vec<GasTransaction> = state
            .transactions
            .values()
            .filter(|tx| {
                tx.tx_type == TransactionType::Withdrawal && tx.status == TransactionStatus::Pending
            })
            .cloned()
            .collect();
        oldest_first(&mut txs, |tx| (tx.created_at, tx.id));
        txs.truncate(limit);
        Ok(txs)
    }

    async fn summary(&self) -> AppResult<GasBankSummary> {
        let state = self.gasbank.read().await;
        let accounts: Vec<GasAccount> = state.accounts.values().cloned().collect();
        let pending_withdrawals = state
            .transactions
            .values()
            .filter(|tx| {
                tx.tx_type == TransactionType::Withdrawal && tx.status == TransactionStatus::Pending
            })
            .count();

        Ok(GasBankSummary {
            accounts: accounts.len() as u64,
            total_balance: sum_by(&accounts, |a| a.balance),
            total_available: sum_by(&accounts, |a| a.available),
            total_pending: sum_by(&accounts, |a| a.pending),
            pending_withdrawals: pending_withdrawals as u64,
        })
    }
}

#[async_trait]
impl OracleStore for MemoryStore {
    async fn create_request(&self, request: OracleRequest) -> AppResult<OracleRequest> {
        self.oracle.write().await.insert(request.id, request.clone());
        Ok(request)
    }

    async fn get_request(&self, id: Uuid) -> AppResult<Option<OracleRequest>> {
        Ok(self.oracle.read().await.get(&id).cloned())
    }

    async fn list_requests(&self, account_id: Uuid, limit: usize) -> AppResult<Vec<OracleRequest>> {
        let requests = self.oracle.read().await;
        let mut matching: Vec<OracleRequest> = requests
            .values()
            .filter(|r| r.account_id == account_id)
            .cloned()
            .collect();
        oldest_first(&mut matching, |r| (r.created_at, r.id));
        matching.reverse();
        matching.truncate(limit);
        Ok(matching)
    }

    async fn list_pending_requests(&self, limit: usize) -> AppResult<Vec<OracleRequest>> {
        let requests = self.oracle.read().await;
        let mut pending: Vec<OracleRequest> = requests
            .values()
            .filter(|r| r.status == OracleStatus::Pending)
            .cloned()
            .collect();
        oldest_first(&mut pending, |r| (r.created_at, r.id));
        pending.truncate(limit);
        Ok(pending)
    }

    async fn finish_request(&self, id: Uuid, outcome: Outcome) -> AppResult<OracleRequest> {
        let mut requests = self.oracle.write().await;
        let request = requests
            .get_mut(&id)
            .ok_or_else(|| AppError::NotFound(format!("Oracle request {} not found", id)))?;
        request.finish(outcome)?;
        Ok(request.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[tokio::test]
    async fn test_wallet_uniqueness_ignores_case() {
        let store = MemoryStore::new();
        store
            .create_account(GasAccount::new(Uuid::new_v4(), "WalletX".to_string()))
            .await
            .unwrap();

        let err = store
            .create_account(GasAccount::new(Uuid::new_v4(), "walletx".to_string()))
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::Ledger(LedgerError::WalletInUse(_))));
        assert!(store.find_account_by_wallet("WALLETX").await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_failed_reservation_records_nothing() {
        let store = MemoryStore::new();
        let account = store
            .create_account(GasAccount::new(Uuid::new_v4(), "w".to_string()))
            .await
            .unwrap();

        let tx = GasTransaction::withdrawal(account.id, dec!(1), "dest".to_string());
        let tx_id = tx.id;
        assert!(store.reserve_withdrawal(tx).await.is_err());
        assert!(store.get_transaction(tx_id).await.unwrap().is_none());
        assert!(store.list_pending_withdrawals(10).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_pending_withdrawals_exclude_deposits_and_settled() {
        let store = MemoryStore::new();
        let account = store
            .create_account(GasAccount::new(Uuid::new_v4(), "w".to_string()))
            .await
            .unwrap();
        store
            .record_deposit(GasTransaction::deposit(account.id, dec!(5), None, None, None))
            .await
            .unwrap();
        let (_, first) = store
            .reserve_withdrawal(GasTransaction::withdrawal(account.id, dec!(1), "a".to_string()))
            .await
            .unwrap();
        let (_, second) = store
            .reserve_withdrawal(GasTransaction::withdrawal(account.id, dec!(1), "b".to_string()))
            .await
            .unwrap();
        store.settle_withdrawal(first.id, true, "").await.unwrap();

        let pending = store.list_pending_withdrawals(10).await.unwrap();
        assert_eq!(pending.len(), 1);
        assert_eq!(pending[0].id, second.id);

        let summary = store.summary().await.unwrap();
        assert_eq!(summary.accounts, 1);
        assert_eq!(summary.total_balance, dec!(4));
        assert_eq!(summary.total_pending, dec!(1));
        assert_eq!(summary.pending_withdrawals, 1);
    }
}
