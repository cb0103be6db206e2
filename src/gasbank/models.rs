use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use sqlx::Type;
use std::fmt;
use uuid::Uuid;

use crate::engine::PendingItem;
use crate::error::LedgerError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Type)]
#[serde(rename_all = "lowercase")]
#[sqlx(type_name = "gas_tx_type", rename_all = "lowercase")]
pub enum TransactionType {
    Deposit,
    Withdrawal,
}

/// Gas transaction status.
///
/// Pending → Completed | Failed, exactly once.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Type)]
#[serde(rename_all = "lowercase")]
#[sqlx(type_name = "gas_tx_status", rename_all = "lowercase")]
pub enum TransactionStatus {
    Pending,
    Completed,
    Failed,
}

impl TransactionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            TransactionStatus::Pending => "pending",
            TransactionStatus::Completed => "completed",
            TransactionStatus::Failed => "failed",
        }
    }

    pub fn is_terminal(&self) -> bool {
        !matches!(self, TransactionStatus::Pending)
    }
}

impl fmt::Display for TransactionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Custodied gas balance for one wallet.
///
/// INVARIANT: balance == available + pending, available >= 0, pending >= 0
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GasAccount {
    pub id: Uuid,
    /// Owning tenant account
    pub account_id: Uuid,
    pub wallet_address: String,
    #[serde(with = "rust_decimal::serde::float")]
    pub balance: Decimal,
    #[serde(with = "rust_decimal::serde::float")]
    pub available: Decimal,
    #[serde(with = "rust_decimal::serde::float")]
    pub pending: Decimal,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl GasAccount {
    pub fn new(account_id: Uuid, wallet_address: String) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            account_id,
            wallet_address,
            balance: Decimal::ZERO,
            available: Decimal::ZERO,
            pending: Decimal::ZERO,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn is_consistent(&self) -> bool {
        self.balance == self.available + self.pending
            && self.available >= Decimal::ZERO
            && self.pending >= Decimal::ZERO
    }

    /// Deposits are final on arrival
    pub fn credit(&mut self, amount: Decimal) {
        self.available += amount;
        self.balance += amount;
        self.updated_at = Utc::now();
    }

    /// Move `amount` from available into the withdrawal reservation
    pub fn reserve(&mut self, amount: Decimal) -> Result<(), LedgerError> {
        if self.available < amount {
            return Err(LedgerError::InsufficientFunds {
                required: amount,
                available: self.available,
            });
        }
        self.available -= amount;
        self.pending += amount;
        self.updated_at = Utc::now();
        Ok(())
    }

    /// Confirmed withdrawal: reserved value leaves custody
    pub fn release_to_chain(&mut self, amount: Decimal) {
        self.pending -= amount;
        self.balance -= amount;
        self.updated_at = Utc::now();
    }

    /// Failed withdrawal: reservation rolled back to available
    pub fn rollback(&mut self, amount: Decimal) {
        self.pending -= amount;
        self.available += amount;
        self.updated_at = Utc::now();
    }

    /// Apply a settled withdrawal of `amount`
    pub fn settle(&mut self, amount: Decimal, success: bool) {
        if success {
            self.release_to_chain(amount);
        } else {
            self.rollback(amount);
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GasTransaction {
    pub id: Uuid,
    /// Gas account the transaction belongs to
    pub account_id: Uuid,
    pub tx_type: TransactionType,
    #[serde(with = "rust_decimal::serde::float")]
    pub amount: Decimal,
    pub status: TransactionStatus,
    pub tx_hash: Option<String>,
    pub from_address: Option<String>,
    pub to_address: Option<String>,
    pub error: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
}

impl GasTransaction {
    pub fn deposit(
        account_id: Uuid,
        amount: Decimal,
        tx_hash: Option<String>,
        from_address: Option<String>,
        to_address: Option<String>,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            account_id,
            tx_type: TransactionType::Deposit,
            amount,
            status: TransactionStatus::Completed,
            tx_hash,
            from_address,
            to_address,
            error: None,
            created_at: now,
            updated_at: now,
            completed_at: Some(now),
        }
    }

    pub fn withdrawal(account_id: Uuid, amount: Decimal, destination: String) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            account_id,
            tx_type: TransactionType::Withdrawal,
            amount,
            status: TransactionStatus::Pending,
            tx_hash: None,
            from_address: None,
            to_address: Some(destination),
            error: None,
            created_at: now,
            updated_at: now,
            completed_at: None,
        }
    }

    /// Guard for settling a withdrawal: must be a withdrawal and still pending
    pub fn ensure_settleable(&self) -> Result<(), LedgerError> {
        if self.tx_type != TransactionType::Withdrawal {
            return Err(LedgerError::NotAWithdrawal(self.id));
        }
        if self.status.is_terminal() {
            return Err(LedgerError::AlreadySettled {
                transaction_id: self.id,
                status: self.status,
            });
        }
        Ok(())
    }

    /// Pending → Completed | Failed
    pub fn finish(&mut self, success: bool, message: &str) -> Result<(), LedgerError> {
        self.ensure_settleable()?;

        let now = Utc::now();
        if success {
            self.status = TransactionStatus::Completed;
        } else {
            self.status = TransactionStatus::Failed;
            self.error = Some(message.to_string()).filter(|m| !m.is_empty());
        }
        if success && !message.is_empty() {
            self.tx_hash = Some(message.to_string());
        }
        self.updated_at = now;
        self.completed_at = Some(now);
        Ok(())
    }
}

impl PendingItem for GasTransaction {
    fn pending_id(&self) -> Uuid {
        self.id
    }
}

/// Aggregate view over every gas account
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct GasBankSummary {
    pub accounts: u64,
    #[serde(with = "rust_decimal::serde::float")]
    pub total_balance: Decimal,
    #[serde(with = "rust_decimal::serde::float")]
    pub total_available: Decimal,
    #[serde(with = "rust_decimal::serde::float")]
    pub total_pending: Decimal,
    pub pending_withdrawals: u64,
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn test_reserve_and_settle_keep_invariant() {
        let mut account = GasAccount::new(Uuid::new_v4(), "wallet".to_string());
        account.credit(dec!(10));
        assert!(account.is_consistent());

        account.reserve(dec!(4)).unwrap();
        assert_eq!((account.balance, account.available, account.pending), (dec!(10), dec!(6), dec!(4)));
        assert!(account.is_consistent());

        account.settle(dec!(4), true);
        assert_eq!((account.balance, account.available, account.pending), (dec!(6), dec!(6), dec!(0)));

        account.reserve(dec!(6)).unwrap();
        account.settle(dec!(6), false);
        assert_eq!((account.balance, account.available, account.pending), (dec!(6), dec!(6), dec!(0)));
        assert!(account.is_consistent());
    }

    #[test]
    fn test_reserve_rejects_overdraw() {
        let mut account = GasAccount::new(Uuid::new_v4(), "wallet".to_string());
        account.credit(dec!(1));

        let err = account.reserve(dec!(1.5)).unwrap_err();
        assert!(matches!(err, LedgerError::InsufficientFunds { .. }));
        assert_eq!(account.available, dec!(1));
        assert_eq!(account.pending, dec!(0));
    }

    #[test]
    fn test_finish_is_single_transition() {
        let mut tx = GasTransaction::withdrawal(Uuid::new_v4(), dec!(2), "dest".to_string());
        tx.finish(false, "reverted").unwrap();
        assert_eq!(tx.status, TransactionStatus::Failed);
        assert_eq!(tx.error.as_deref(), Some("reverted"));
        assert!(tx.completed_at.is_some());

        let err = tx.finish(true, "").unwrap_err();
        assert!(matches!(
            err,
            LedgerError::AlreadySettled { status: TransactionStatus::Failed, .. }
        ));
    }

    #[test]
    fn test_wire_shape() {
        let mut account = GasAccount::new(Uuid::new_v4(), "wallet".to_string());
        account.credit(dec!(10.5));
        let json = serde_json::to_value(&account).unwrap();
        assert_eq!(json["balance"], serde_json::json!(10.5));
        assert_eq!(json["pending"], serde_json::json!(0.0));

        let tx = GasTransaction::withdrawal(account.id, dec!(1), "dest".to_string());
        let json = serde_json::to_value(&tx).unwrap();
        assert_eq!(json["tx_type"], "withdrawal");
        assert_eq!(json["status"], "pending");
    }

    #[test]
    fn test_deposit_cannot_be_settled() {
        let mut tx = GasTransaction::deposit(Uuid::new_v4(), dec!(2), None, None, None);
        assert!(matches!(tx.finish(true, ""), Err(LedgerError::NotAWithdrawal(_))));
    }
}
