use rust_decimal::Decimal;
use std::sync::Arc;
use tracing::{debug, info, warn};
use uuid::Uuid;

use super::models::{GasAccount, GasBankSummary, GasTransaction};
use crate::error::{AppError, AppResult, LedgerError};
use crate::store::{GasBankStore, DEFAULT_PENDING_BATCH};

fn non_empty(value: Option<String>) -> Option<String> {
    value
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

fn ensure_positive(amount: Decimal) -> AppResult<()> {
    if amount <= Decimal::ZERO {
        return Err(LedgerError::InvalidAmount(amount).into());
    }
    Ok(())
}

/// Gas bank operations over a [`GasBankStore`]
pub struct GasBankService {
    store: Arc<dyn GasBankStore>,
    pending_batch: usize,
}

impl GasBankService {
    pub fn new(store: Arc<dyn GasBankStore>) -> Self {
        Self {
            store,
            pending_batch: DEFAULT_PENDING_BATCH,
        }
    }

    pub fn with_pending_batch(mut self, pending_batch: usize) -> Self {
        self.pending_batch = pending_batch.max(1);
        self
    }

    /// Return the gas account bound to `wallet`, creating it for `account_id`
    /// if the wallet is unbound.
    pub async fn ensure_account(&self, account_id: Uuid, wallet: &str) -> AppResult<GasAccount> {
        let wallet = wallet.trim();
        if wallet.is_empty() {
            return Err(AppError::InvalidInput("wallet address is required".to_string()));
        }

        if let Some(existing) = self.store.find_account_by_wallet(wallet).await? {
            return Self::owned_by(existing, account_id, wallet);
        }

        match self
            .store
            .create_account(GasAccount::new(account_id, wallet.to_string()))
            .await
        {
            Ok(account) => {
                info!(
                    gas_account_id = %account.id,
                    account_id = %account_id,
                    wallet = %account.wallet_address,
                    "gas account created"
                );
                Ok(account)
            }
            // Lost a race with a concurrent registration of the same wallet
            Err(AppError::Ledger(LedgerError::WalletInUse(_))) => {
                match self.store.find_account_by_wallet(wallet).await? {
                    Some(existing) => Self::owned_by(existing, account_id, wallet),
                    None => Err(LedgerError::WalletInUse(wallet.to_string()).into()),
                }
            }
            Err(err) => Err(err),
        }
    }

    fn owned_by(existing: GasAccount, account_id: Uuid, wallet: &str) -> AppResult<GasAccount> {
        if existing.account_id == account_id {
            Ok(existing)
        } else {
            warn!(account_id = %account_id, wallet, "wallet already bound to another account");
            Err(LedgerError::WalletInUse(wallet.to_string()).into())
        }
    }

    pub async fn get_account(&self, id: Uuid) -> AppResult<GasAccount> {
        self.store
            .get_account(id)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("Gas account {} not found", id)))
    }

    pub async fn list_accounts(&self, owner: Uuid) -> AppResult<Vec<GasAccount>> {
        self.store.list_accounts(owner).await
    }

    /// Credit a confirmed on-chain deposit. Final on arrival.
    pub async fn deposit(
        &self,
        gas_account_id: Uuid,
        amount: Decimal,
        tx_hash: Option<String>,
        from_address: Option<String>,
        to_address: Option<String>,
    ) -> AppResult<(GasAccount, GasTransaction)> {
        ensure_positive(amount)?;

        let tx = GasTransaction::deposit(
            gas_account_id,
            amount,
            non_empty(tx_hash),
            non_empty(from_address),
            non_empty(to_address),
        );
        let (account, tx) = self.store.record_deposit(tx).await?;

        info!(
            gas_account_id = %account.id,
            transaction_id = %tx.id,
            amount = %amount,
            available = %account.available,
            "gas deposit recorded"
        );
        Ok((account, tx))
    }

    /// Reserve `amount` for a withdrawal to `destination`; settled later
    pub async fn withdraw(
        &self,
        gas_account_id: Uuid,
        amount: Decimal,
        destination: &str,
    ) -> AppResult<(GasAccount, GasTransaction)> {
        ensure_positive(amount)?;
        let destination = destination.trim();
        if destination.is_empty() {
            return Err(AppError::InvalidInput(
                "withdrawal destination is required".to_string(),
            ));
        }

        let tx = GasTransaction::withdrawal(gas_account_id, amount, destination.to_string());
        let (account, tx) = self.store.reserve_withdrawal(tx).await?;

        info!(
            gas_account_id = %account.id,
            transaction_id = %tx.id,
            amount = %amount,
            pending = %account.pending,
            "gas withdrawal reserved"
        );
        Ok((account, tx))
    }

    /// Settle a pending withdrawal. Rejected once the transaction is terminal.
    pub async fn complete_withdrawal(
        &self,
        transaction_id: Uuid,
        success: bool,
        message: &str,
    ) -> AppResult<(GasAccount, GasTransaction)> {
        let (account, tx) = self
            .store
            .settle_withdrawal(transaction_id, success, message)
            .await?;

        info!(
            gas_account_id = %account.id,
            transaction_id = %tx.id,
            status = %tx.status,
            balance = %account.balance,
            "gas withdrawal settled"
        );
        Ok((account, tx))
    }

    pub async fn get_transaction(&self, id: Uuid) -> AppResult<GasTransaction> {
        self.store
            .get_transaction(id)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("Transaction {} not found", id)))
    }

    pub async fn list_transactions(
        &self,
        gas_account_id: Uuid,
        limit: usize,
    ) -> AppResult<Vec<GasTransaction>> {
        self.store.list_transactions(gas_account_id, limit).await
    }

    pub async fn list_pending_withdrawals(&self) -> AppResult<Vec<GasTransaction>> {
        let pending = self.store.list_pending_withdrawals(self.pending_batch).await?;
        debug!(count = pending.len(), "pending withdrawals listed");
        Ok(pending)
    }

    pub async fn summary(&self) -> AppResult<GasBankSummary> {
        self.store.summary().await
    }
}
