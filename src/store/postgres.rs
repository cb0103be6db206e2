use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use sqlx::postgres::PgPoolOptions;
use sqlx::types::BigDecimal;
use sqlx::{FromRow, PgConnection, PgPool};
use std::str::FromStr;
use std::time::Duration;
use tracing::info;
use uuid::Uuid;

use super::{wallet_key, GasBankStore, OracleStore};
use crate::engine::Outcome;
use crate::error::{AppError, AppResult, LedgerError};
use crate::gasbank::models::{
    GasAccount, GasBankSummary, GasTransaction, TransactionStatus, TransactionType,
};
use crate::oracle::models::{OracleRequest, OracleStatus};

const ACCOUNT_COLUMNS: &str =
    "id, account_id, wallet_address, balance, available, pending, created_at, updated_at";

const TRANSACTION_COLUMNS: &str = "id, account_id, tx_type, amount, status, tx_hash, from_address, \
     to_address, error, created_at, updated_at, completed_at";

const REQUEST_COLUMNS: &str =
    "id, account_id, url, method, body, status, result, error, created_at, updated_at, completed_at";

/// Postgres-backed store - the durable source of truth for both domains
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub async fn connect(database_url: &str, max_connections: u32) -> AppResult<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(max_connections)
            .acquire_timeout(Duration::from_secs(5))
            .connect(database_url)
            .await?;
        info!("✅ Database pool connected");
        Ok(Self::new(pool))
    }

    pub async fn migrate(&self) -> AppResult<()> {
        sqlx::migrate!("./migrations").run(&self.pool).await?;
        info!("✅ Database migrations applied");
        Ok(())
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }
}

// ========== ROW MAPPING ==========

fn to_decimal(value: &BigDecimal) -> AppResult<Decimal> {
    let text = value.to_string();
    Ok(Decimal::from_str(&text).or_else(|_| Decimal::from_scientific(&text))?)
}

fn to_big_decimal(value: Decimal) -> AppResult<BigDecimal> {
    BigDecimal::from_str(&value.to_string())
        .map_err(|e| AppError::Internal(format!("Decimal conversion error: {}", e)))
}

fn is_unique_violation(err: &sqlx::Error) -> bool {
    matches!(err, sqlx::Error::Database(db) if db.code().as_deref() == Some("23505"))
}

#[derive(FromRow)]
struct GasAccountRow {
    id: Uuid,
    account_id: Uuid,
    wallet_address: String,
    balance: BigDecimal,
    available: BigDecimal,
    pending: BigDecimal,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl TryFrom<GasAccountRow> for GasAccount {
    type Error = AppError;

    fn try_from(row: GasAccountRow) -> AppResult<Self> {
        Ok(GasAccount {
            id: row.id,
            account_id: row.account_id,
            wallet_address: row.wallet_address,
            balance: to_decimal(&row.balance)?,
            available: to_decimal(&row.available)?,
            pending: to_decimal(&row.pending)?,
            created_at: row.created_at,
            updated_at: row.updated_at,
        })
    }
}

#[derive(FromRow)]
struct GasTransactionRow {
    id: Uuid,
    account_id: Uuid,
    tx_type: TransactionType,
    amount: BigDecimal,
    status: TransactionStatus,
    tx_hash: Option<String>,
    from_address: Option<String>,
    to_address: Option<String>,
    error: Option<String>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
    completed_at: Option<DateTime<Utc>>,
}

impl TryFrom<GasTransactionRow> for GasTransaction {
    type Error = AppError;

    fn try_from(row: GasTransactionRow) -> AppResult<Self> {
        Ok(GasTransaction {
            id: row.id,
            account_id: row.account_id,
            tx_type: row.tx_type,
            amount: to_decimal(&row.amount)?,
            status: row.status,
            tx_hash: row.tx_hash,
            from_address: row.from_address,
            to_address: row.to_address,
            error: row.error,
            created_at: row.created_at,
            updated_at: row.updated_at,
            completed_at: row.completed_at,
        })
    }
}

#[derive(FromRow)]
struct OracleRequestRow {
    id: Uuid,
    account_id: Uuid,
    url: String,
    method: String,
    body: Option<String>,
    status: OracleStatus,
    result: Option<String>,
    error: Option<String>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
    completed_at: Option<DateTime<Utc>>,
}

impl From<OracleRequestRow> for OracleRequest {
    fn from(row: OracleRequestRow) -> Self {
        OracleRequest {
            id: row.id,
            account_id: row.account_id,
            url: row.url,
            method: row.method,
            body: row.body,
            status: row.status,
            result: row.result,
            error: row.error,
            created_at: row.created_at,
            updated_at: row.updated_at,
            completed_at: row.completed_at,
        }
    }
}

#[derive(FromRow)]
struct SummaryRow {
    accounts: i64,
    total_balance: BigDecimal,
    total_available: BigDecimal,
    total_pending: BigDecimal,
}

fn collect<R, T>(rows: Vec<R>) -> AppResult<Vec<T>>
where
    T: TryFrom<R, Error = AppError>,
{
    rows.into_iter().map(T::try_from).collect()
}

// ========== GAS BANK ==========

impl PgStore {
    async fn insert_transaction(
        conn: &mut PgConnection,
        tx: &GasTransaction,
    ) -> AppResult<GasTransaction> {
        let row = sqlx::query_as::<_, GasTransactionRow>(&format!(
            r#"
            INSERT INTO gas_transactions (
                id, account_id, tx_type, amount, status, tx_hash, from_address,
                to_address, error, created_at, updated_at, completed_at
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12)
            RETURNING {TRANSACTION_COLUMNS}
            "#
        ))
        .bind(tx.id)
        .bind(tx.account_id)
        .bind(tx.tx_type)
        .bind(to_big_decimal(tx.amount)?)
        .bind(tx.status)
        .bind(&tx.tx_hash)
        .bind(&tx.from_address)
        .bind(&tx.to_address)
        .bind(&tx.error)
        .bind(tx.created_at)
        .bind(tx.updated_at)
        .bind(tx.completed_at)
        .fetch_one(&mut *conn)
        .await?;

        row.try_into()
    }

    async fn account_for_update(conn: &mut PgConnection, id: Uuid) -> AppResult<GasAccount> {
        sqlx::query_as::<_, GasAccountRow>(&format!(
            "SELECT {ACCOUNT_COLUMNS} FROM gas_accounts WHERE id = $1 FOR UPDATE"
        ))
        .bind(id)
        .fetch_optional(&mut *conn)
        .await?
        .ok_or_else(|| AppError::NotFound(format!("Gas account {} not found", id)))?
        .try_into()
    }
}

#[async_trait]
impl GasBankStore for PgStore {
    async fn create_account(&self, account: GasAccount) -> AppResult<GasAccount> {
        let result = sqlx::query_as::<_, GasAccountRow>(&format!(
            r#"
            INSERT INTO gas_accounts (
                id, account_id, wallet_address, balance, available, pending, created_at, updated_at
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
            RETURNING {ACCOUNT_COLUMNS}
            "#
        ))
        .bind(account.id)
        .bind(account.account_id)
        .bind(&account.wallet_address)
        .bind(to_big_decimal(account.balance)?)
        .bind(to_big_decimal(account.available)?)
        .bind(to_big_decimal(account.pending)?)
        .bind(account.created_at)
        .bind(account.updated_at)
        .fetch_one(&self.pool)
        .await;

        match result {
            Ok(row) => row.try_into(),
            Err(err) if is_unique_violation(&err) => {
                Err(LedgerError::WalletInUse(account.wallet_address).into())
            }
            Err(err) => Err(err.into()),
        }
    }

    async fn get_account(&self, id: Uuid) -> AppResult<Option<GasAccount>> {
        sqlx::query_as::<_, GasAccountRow>(&format!(
            "SELECT {ACCOUNT_COLUMNS} FROM gas_accounts WHERE id = $1"
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await?
        .map(GasAccount::try_from)
        .transpose()
    }

    async fn find_account_by_wallet(&self, wallet: &str) -> AppResult<Option<GasAccount>> {
        sqlx::query_as::<_, GasAccountRow>(&format!(
            "SELECT {ACCOUNT_COLUMNS} FROM gas_accounts WHERE LOWER(wallet_address) = $1"
        ))
        .bind(wallet_key(wallet))
        .fetch_optional(&self.pool)
        .await?
        .map(GasAccount::try_from)
        .transpose()
    }

    async fn list_accounts(&self, owner: Uuid) -> AppResult<Vec<GasAccount>> {
        let rows = sqlx::query_as::<_, GasAccountRow>(&format!(
            "SELECT {ACCOUNT_COLUMNS} FROM gas_accounts WHERE account_id = $1 ORDER BY created_at, id"
        ))
        .bind(owner)
        .fetch_all(&self.pool)
        .await?;

        collect(rows)
    }

    async fn record_deposit(&self, tx: GasTransaction) -> AppResult<(GasAccount, GasTransaction)> {
        let mut db_tx = self.pool.begin().await?;

        let account: GasAccount = sqlx::query_as::<_, GasAccountRow>(&format!(
            r#"
            UPDATE gas_accounts
            SET available = available + $2, balance = balance + $2, updated_at = NOW()
            WHERE id = $1
            RETURNING {ACCOUNT_COLUMNS}
            "#
        ))
        .bind(tx.account_id)
        .bind(to_big_decimal(tx.amount)?)
        .fetch_optional(&mut *db_tx)
        .await?
        .ok_or_else(|| AppError::NotFound(format!("Gas account {} not found", tx.account_id)))?
        .try_into()?;

        let tx = Self::insert_transaction(&mut db_tx, &tx).await?;
        db_tx.commit().await?;

        Ok((account, tx))
    }

    async fn reserve_withdrawal(&self, tx: GasTransaction) -> AppResult<(GasAccount, GasTransaction)> {
        let mut db_tx = self.pool.begin().await?;
        let amount = to_big_decimal(tx.amount)?;

        let reserved = sqlx::query_as::<_, GasAccountRow>(&format!(
            r#"
            UPDATE gas_accounts
            SET available = available - $2, pending = pending + $2, updated_at = NOW()
            WHERE id = $1 AND available >= $2
            RETURNING {ACCOUNT_COLUMNS}
            "#
        ))
        .bind(tx.account_id)
        .bind(amount)
        .fetch_optional(&mut *db_tx)
        .await?;

        let account: GasAccount = match reserved {
            Some(row) => row.try_into()?,
            None => {
                let current = Self::account_for_update(&mut db_tx, tx.account_id).await?;
                return Err(LedgerError::InsufficientFunds {
                    required: tx.amount,
                    available: current.available,
                }
                .into());
            }
        };

        let tx = Self::insert_transaction(&mut db_tx, &tx).await?;
        db_tx.commit().await?;

        Ok((account, tx))
    }

    async fn settle_withdrawal(
        &self,
        transaction_id: Uuid,
        success: bool,
        message: &str,
    ) -> AppResult<(GasAccount, GasTransaction)> {
        let mut db_tx = self.pool.begin().await?;

        let mut tx: GasTransaction = sqlx::query_as::<_, GasTransactionRow>(&format!(
            "SELECT {TRANSACTION_COLUMNS} FROM gas_transactions WHERE id = $1 FOR UPDATE"
        ))
        .bind(transaction_id)
        .fetch_optional(&mut *db_tx)
        .await?
        .ok_or_else(|| AppError::NotFound(format!("Transaction {} not found", transaction_id)))?
        .try_into()?;

        // Row lock held: a concurrent settlement waits here and then sees the terminal status
        tx.finish(success, message)?;

        let mut account = Self::account_for_update(&mut db_tx, tx.account_id).await?;
        account.settle(tx.amount, success);

        sqlx::query(
            r#"
            UPDATE gas_transactions
            SET status = $2, tx_hash = $3, error = $4, updated_at = $5, completed_at = $6
            WHERE id = $1 AND status = 'pending'
            "#,
        )
        .bind(tx.id)
        .bind(tx.status)
        .bind(&tx.tx_hash)
        .bind(&tx.error)
        .bind(tx.updated_at)
        .bind(tx.completed_at)
        .execute(&mut *db_tx)
        .await?;

        sqlx::query(
            r#"
            UPDATE gas_accounts
            SET balance = $2, available = $3, pending = $4, updated_at = $5
            WHERE id = $1
            "#,
        )
        .bind(account.id)
        .bind(to_big_decimal(account.balance)?)
        .bind(to_big_decimal(account.available)?)
        .bind(to_big_decimal(account.pending)?)
        .bind(account.updated_at)
        .execute(&mut *db_tx)
        .await?;

        db_tx.commit().await?;

        Ok((account, tx))
    }

    async fn get_transaction(&self, id: Uuid) -> AppResult<Option<GasTransaction>> {
        sqlx::query_as::<_, GasTransactionRow>(&format!(
            "SELECT {TRANSACTION_COLUMNS} FROM gas_transactions WHERE id = $1"
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await?
        .map(GasTransaction::try_from)
        .transpose()
    }

    async fn list_transactions(&self, account_id: Uuid, limit: usize) -> AppResult<Vec<GasTransaction>> {
        let rows = sqlx::query_as::<_, GasTransactionRow>(&format!(
            r#"
            SELECT {TRANSACTION_COLUMNS} FROM gas_transactions
            WHERE account_id = $1
            ORDER BY created_at DESC, id DESC
            LIMIT $2
            "#
        ))
        .bind(account_id)
        .bind(limit as i64)
        .fetch_all(&self.pool)
        .await?;

        collect(rows)
    }

    async fn list_pending_withdrawals(&self, limit: usize) -> AppResult<Vec<GasTransaction>> {
        let rows = sqlx::query_as::<_, GasTransactionRow>(&format!(
            r#"
            SELECT {TRANSACTION_COLUMNS} FROM gas_transactions
            WHERE status = 'pending' AND tx_type = 'withdrawal'
            ORDER BY created_at, id
            LIMIT $1
            "#
        ))
        .bind(limit as i64)
        .fetch_all(&self.pool)
        .await?;

        collect(rows)
    }

    async fn summary(&self) -> AppResult<GasBankSummary> {
        let totals = sqlx::query_as::<_, SummaryRow>(
            r#"
            SELECT
                COUNT(*) AS accounts,
                COALESCE(SUM(balance), 0) AS total_balance,
                COALESCE(SUM(available), 0) AS total_available,
                COALESCE(SUM(pending), 0) AS total_pending
            FROM gas_accounts
            "#,
        )
        .fetch_one(&self.pool)
        .await?;

        let pending_withdrawals: i64 = sqlx::query_scalar(
            "SELECT COUNT(*) FROM gas_transactions WHERE status = 'pending' AND tx_type = 'withdrawal'",
        )
        .fetch_one(&self.pool)
        .await?;

        Ok(GasBankSummary {
            accounts: totals.accounts as u64,
            total_balance: to_decimal(&totals.total_balance)?,
            total_available: to_decimal(&totals.total_available)?,
            total_pending: to_decimal(&totals.total_pending)?,
            pending_withdrawals: pending_withdrawals as u64,
        })
    }
}

// ========== ORACLE ==========

#[async_trait]
impl OracleStore for PgStore {
    async fn create_request(&self, request: OracleRequest) -> AppResult<OracleRequest> {
        let row = sqlx::query_as::<_, OracleRequestRow>(&format!(
            r#"
            INSERT INTO oracle_requests (
                id, account_id, url, method, body, status, result, error,
                created_at, updated_at, completed_at
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11)
            RETURNING {REQUEST_COLUMNS}
            "#
        ))
        .bind(request.id)
        .bind(request.account_id)
        .bind(&request.url)
        .bind(&request.method)
        .bind(&request.body)
        .bind(request.status)
        .bind(&request.result)
        .bind(&request.error)
        .bind(request.created_at)
        .bind(request.updated_at)
        .bind(request.completed_at)
        .fetch_one(&self.pool)
        .await?;

        Ok(row.into())
    }

    async fn get_request(&self, id: Uuid) -> AppResult<Option<OracleRequest>> {
        let row = sqlx::query_as::<_, OracleRequestRow>(&format!(
            "SELECT {REQUEST_COLUMNS} FROM oracle_requests WHERE id = $1"
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.map(OracleRequest::from))
    }

    async fn list_requests(&self, account_id: Uuid, limit: usize) -> AppResult<Vec<OracleRequest>> {
        let rows = sqlx::query_as::<_, OracleRequestRow>(&format!(
            r#"
            SELECT {REQUEST_COLUMNS} FROM oracle_requests
            WHERE account_id = $1
            ORDER BY created_at DESC, id DESC
            LIMIT $2
            "#
        ))
        .bind(account_id)
        .bind(limit as i64)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows.into_iter().map(OracleRequest::from).collect())
    }

    async fn list_pending_requests(&self, limit: usize) -> AppResult<Vec<OracleRequest>> {
        let rows = sqlx::query_as::<_, OracleRequestRow>(&format!(
            r#"
            SELECT {REQUEST_COLUMNS} FROM oracle_requests
            WHERE status = 'pending'
            ORDER BY created_at, id
            LIMIT $1
            "#
        ))
        .bind(limit as i64)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows.into_iter().map(OracleRequest::from).collect())
    }

    async fn finish_request(&self, id: Uuid, outcome: Outcome) -> AppResult<OracleRequest> {
        let mut db_tx = self.pool.begin().await?;

        let mut request: OracleRequest = sqlx::query_as::<_, OracleRequestRow>(&format!(
            "SELECT {REQUEST_COLUMNS} FROM oracle_requests WHERE id = $1 FOR UPDATE"
        ))
        .bind(id)
        .fetch_optional(&mut *db_tx)
        .await?
        .ok_or_else(|| AppError::NotFound(format!("Oracle request {} not found", id)))?
        .into();

        request.finish(outcome)?;

        sqlx::query(
            r#"
            UPDATE oracle_requests
            SET status = $2, result = $3, error = $4, updated_at = $5, completed_at = $6
            WHERE id = $1 AND status = 'pending'
            "#,
        )
        .bind(request.id)
        .bind(request.status)
        .bind(&request.result)
        .bind(&request.error)
        .bind(request.updated_at)
        .bind(request.completed_at)
        .execute(&mut *db_tx)
        .await?;

        db_tx.commit().await?;
        Ok(request)
    }
}
