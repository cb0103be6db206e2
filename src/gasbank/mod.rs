// Gas bank - custodied gas balances with two-phase withdrawals
//
// Deposits credit available immediately. Withdrawals reserve funds into
// `pending` and are settled later by the withdrawal settlement engine.
pub mod models;
pub mod service;
pub mod settlement;

pub use models::{GasAccount, GasBankSummary, GasTransaction, TransactionStatus, TransactionType};
pub use service::GasBankService;
pub use settlement::{WithdrawalEngine, WithdrawalSettlement};
