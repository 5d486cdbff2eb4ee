//! Token Ledger — the only code allowed to touch `token_accounts.balance`.
//!
//! ARCHITECTURAL RULE: balances change exclusively through `TokenLedger`
//! operations. No handler or service may read-then-write a balance as two
//! steps; the Postgres implementation serializes contention with a single
//! conditional UPDATE, so a balance can never be observed negative.
//!
//! Every mutation takes a caller-supplied dedup key. Only *applied*
//! operations are journaled: a debit refused for insufficient funds leaves
//! no trace, so the caller can top up and retry the same key.

use async_trait::async_trait;
use sqlx::PgPool;
use thiserror::Error;
use tracing::info;
use uuid::Uuid;

use crate::models::account::LedgerOperationRow;

/// Result of a debit attempt. Running out of tokens is a normal outcome,
/// not an error — only infrastructure faults surface as `LedgerError`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DebitOutcome {
    Applied,
    Insufficient,
}

#[derive(Debug, Error)]
pub enum LedgerError {
    /// The backing store failed. Retryable by the caller; never means the
    /// balance condition failed.
    #[error("ledger store unavailable: {0}")]
    Unavailable(String),

    #[error("unknown token account {0}")]
    UnknownAccount(Uuid),

    /// The dedup key was already used for an operation with a different
    /// account, kind, or amount. Programmer error — surfaced, never absorbed.
    #[error("operation key '{0}' was already used for a different operation")]
    KeyReuse(String),
}

impl From<sqlx::Error> for LedgerError {
    fn from(e: sqlx::Error) -> Self {
        LedgerError::Unavailable(e.to_string())
    }
}

/// Atomic, idempotent token balance mutations.
///
/// Amounts are always non-negative; callers validate before invoking.
#[async_trait]
pub trait TokenLedger: Send + Sync {
    /// Atomically checks `balance >= amount` and decrements in the same
    /// operation. Replaying an applied `op_key` with the same intent is a
    /// no-op returning `Applied` without a second charge.
    async fn debit(
        &self,
        account_id: Uuid,
        amount: i64,
        op_key: &str,
    ) -> Result<DebitOutcome, LedgerError>;

    /// Atomically increments the balance (token grants / purchases).
    /// Same replay semantics as `debit`.
    async fn credit(&self, account_id: Uuid, amount: i64, op_key: &str)
        -> Result<(), LedgerError>;

    /// Compensation for a debit whose paired state transition failed:
    /// restores the debited amount and releases `debit_key` so the whole
    /// operation can be retried from scratch. Idempotent — reversing a key
    /// that was never applied (or already reversed) is a no-op.
    async fn reverse_debit(&self, debit_key: &str) -> Result<(), LedgerError>;

    async fn balance(&self, account_id: Uuid) -> Result<i64, LedgerError>;
}

/// Postgres-backed ledger.
///
/// Debit shape: claim the op key, then
/// `UPDATE token_accounts SET balance = balance - $amt
///  WHERE id = $acct AND balance >= $amt`
/// in one transaction. A failed balance condition rolls the transaction
/// back, which also releases the op key.
pub struct PgTokenLedger {
    pool: PgPool,
}

impl PgTokenLedger {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Claims `op_key` inside `tx`. Returns `false` when the key is already
    /// journaled; the caller must then check the prior operation matches.
    async fn claim_key(
        tx: &mut sqlx::Transaction<'_, sqlx::Postgres>,
        op_key: &str,
        account_id: Uuid,
        kind: &str,
        amount: i64,
    ) -> Result<bool, LedgerError> {
        let claimed: Option<String> = sqlx::query_scalar(
            r#"
            INSERT INTO ledger_operations (op_key, account_id, kind, amount)
            VALUES ($1, $2, $3, $4)
            ON CONFLICT (op_key) DO NOTHING
            RETURNING op_key
            "#,
        )
        .bind(op_key)
        .bind(account_id)
        .bind(kind)
        .bind(amount)
        .fetch_optional(&mut **tx)
        .await?;
        Ok(claimed.is_some())
    }

    /// Verifies a pre-existing journal row has the same intent as the replay.
    async fn check_replay(
        &self,
        op_key: &str,
        account_id: Uuid,
        kind: &str,
        amount: i64,
    ) -> Result<(), LedgerError> {
        let prior: Option<LedgerOperationRow> =
            sqlx::query_as("SELECT * FROM ledger_operations WHERE op_key = $1")
                .bind(op_key)
                .fetch_optional(&self.pool)
                .await?;

        match prior {
            Some(op) if op.account_id == account_id && op.kind == kind && op.amount == amount => {
                Ok(())
            }
            _ => Err(LedgerError::KeyReuse(op_key.to_string())),
        }
    }
}

#[async_trait]
impl TokenLedger for PgTokenLedger {
    async fn debit(
        &self,
        account_id: Uuid,
        amount: i64,
        op_key: &str,
    ) -> Result<DebitOutcome, LedgerError> {
        let mut tx = self.pool.begin().await?;

        if !Self::claim_key(&mut tx, op_key, account_id, "debit", amount).await? {
            tx.rollback().await?;
            self.check_replay(op_key, account_id, "debit", amount).await?;
            return Ok(DebitOutcome::Applied);
        }

        let updated = sqlx::query(
            r#"
            UPDATE token_accounts
            SET balance = balance - $1, updated_at = now()
            WHERE id = $2 AND balance >= $1
            "#,
        )
        .bind(amount)
        .bind(account_id)
        .execute(&mut *tx)
        .await?;

        if updated.rows_affected() == 0 {
            let exists: Option<i64> =
                sqlx::query_scalar("SELECT balance FROM token_accounts WHERE id = $1")
                    .bind(account_id)
                    .fetch_optional(&mut *tx)
                    .await?;
            // Roll back so the op key is released — refused debits are not journaled.
            tx.rollback().await?;
            return match exists {
                Some(_) => Ok(DebitOutcome::Insufficient),
                None => Err(LedgerError::UnknownAccount(account_id)),
            };
        }

        tx.commit().await?;
        info!(account = %account_id, amount, op_key, "debited tokens");
        Ok(DebitOutcome::Applied)
    }

    async fn credit(
        &self,
        account_id: Uuid,
        amount: i64,
        op_key: &str,
    ) -> Result<(), LedgerError> {
        let mut tx = self.pool.begin().await?;

        if !Self::claim_key(&mut tx, op_key, account_id, "credit", amount).await? {
            tx.rollback().await?;
            return self.check_replay(op_key, account_id, "credit", amount).await;
        }

        let updated = sqlx::query(
            "UPDATE token_accounts SET balance = balance + $1, updated_at = now() WHERE id = $2",
        )
        .bind(amount)
        .bind(account_id)
        .execute(&mut *tx)
        .await?;

        if updated.rows_affected() == 0 {
            tx.rollback().await?;
            return Err(LedgerError::UnknownAccount(account_id));
        }

        tx.commit().await?;
        info!(account = %account_id, amount, op_key, "credited tokens");
        Ok(())
    }

    async fn reverse_debit(&self, debit_key: &str) -> Result<(), LedgerError> {
        let mut tx = self.pool.begin().await?;

        let reversed: Option<(Uuid, i64)> = sqlx::query_as(
            "DELETE FROM ledger_operations WHERE op_key = $1 AND kind = 'debit' RETURNING account_id, amount",
        )
        .bind(debit_key)
        .fetch_optional(&mut *tx)
        .await?;

        let Some((account_id, amount)) = reversed else {
            // Never applied, or already reversed.
            tx.rollback().await?;
            return Ok(());
        };

        sqlx::query(
            "UPDATE token_accounts SET balance = balance + $1, updated_at = now() WHERE id = $2",
        )
        .bind(amount)
        .bind(account_id)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;
        info!(account = %account_id, amount, op_key = debit_key, "reversed debit");
        Ok(())
    }

    async fn balance(&self, account_id: Uuid) -> Result<i64, LedgerError> {
        let balance: Option<i64> =
            sqlx::query_scalar("SELECT balance FROM token_accounts WHERE id = $1")
                .bind(account_id)
                .fetch_optional(&self.pool)
                .await?;
        balance.ok_or(LedgerError::UnknownAccount(account_id))
    }
}

/// In-memory ledger with the same semantics as `PgTokenLedger`, for tests
/// of everything layered on top of the trait.
#[cfg(test)]
pub struct MemoryTokenLedger {
    inner: std::sync::Mutex<MemoryLedgerState>,
    unavailable: std::sync::atomic::AtomicBool,
}

#[cfg(test)]
#[derive(Default)]
struct MemoryLedgerState {
    balances: std::collections::HashMap<Uuid, i64>,
    ops: std::collections::HashMap<String, (Uuid, String, i64)>,
}

#[cfg(test)]
impl MemoryTokenLedger {
    pub fn new() -> Self {
        Self {
            inner: std::sync::Mutex::new(MemoryLedgerState::default()),
            unavailable: std::sync::atomic::AtomicBool::new(false),
        }
    }

    pub fn with_account(self, account_id: Uuid, balance: i64) -> Self {
        self.inner
            .lock()
            .unwrap()
            .balances
            .insert(account_id, balance);
        self
    }

    /// Makes every subsequent call fail with `Unavailable`.
    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable
            .store(unavailable, std::sync::atomic::Ordering::SeqCst);
    }

    fn check_available(&self) -> Result<(), LedgerError> {
        if self.unavailable.load(std::sync::atomic::Ordering::SeqCst) {
            Err(LedgerError::Unavailable("ledger offline".to_string()))
        } else {
            Ok(())
        }
    }
}

#[cfg(test)]
#[async_trait]
impl TokenLedger for MemoryTokenLedger {
    async fn debit(
        &self,
        account_id: Uuid,
        amount: i64,
        op_key: &str,
    ) -> Result<DebitOutcome, LedgerError> {
        self.check_available()?;
        let mut state = self.inner.lock().unwrap();

        if let Some((acct, kind, amt)) = state.ops.get(op_key) {
            return if *acct == account_id && kind == "debit" && *amt == amount {
                Ok(DebitOutcome::Applied)
            } else {
                Err(LedgerError::KeyReuse(op_key.to_string()))
            };
        }

        let balance = state
            .balances
            .get_mut(&account_id)
            .ok_or(LedgerError::UnknownAccount(account_id))?;
        if *balance < amount {
            return Ok(DebitOutcome::Insufficient);
        }
        *balance -= amount;
        state.ops.insert(
            op_key.to_string(),
            (account_id, "debit".to_string(), amount),
        );
        Ok(DebitOutcome::Applied)
    }

    async fn credit(
        &self,
        account_id: Uuid,
        amount: i64,
        op_key: &str,
    ) -> Result<(), LedgerError> {
        self.check_available()?;
        let mut state = self.inner.lock().unwrap();

        if let Some((acct, kind, amt)) = state.ops.get(op_key) {
            return if *acct == account_id && kind == "credit" && *amt == amount {
                Ok(())
            } else {
                Err(LedgerError::KeyReuse(op_key.to_string()))
            };
        }

        let balance = state
            .balances
            .get_mut(&account_id)
            .ok_or(LedgerError::UnknownAccount(account_id))?;
        *balance += amount;
        state.ops.insert(
            op_key.to_string(),
            (account_id, "credit".to_string(), amount),
        );
        Ok(())
    }

    async fn reverse_debit(&self, debit_key: &str) -> Result<(), LedgerError> {
        self.check_available()?;
        let mut state = self.inner.lock().unwrap();

        let Some((account_id, kind, amount)) = state.ops.get(debit_key).cloned() else {
            return Ok(());
        };
        if kind != "debit" {
            return Ok(());
        }
        state.ops.remove(debit_key);
        if let Some(balance) = state.balances.get_mut(&account_id) {
            *balance += amount;
        }
        Ok(())
    }

    async fn balance(&self, account_id: Uuid) -> Result<i64, LedgerError> {
        self.check_available()?;
        let state = self.inner.lock().unwrap();
        state
            .balances
            .get(&account_id)
            .copied()
            .ok_or(LedgerError::UnknownAccount(account_id))
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;

    #[tokio::test]
    async fn test_debit_reduces_balance() {
        let acct = Uuid::new_v4();
        let ledger = MemoryTokenLedger::new().with_account(acct, 10);

        let outcome = ledger.debit(acct, 4, "op-1").await.unwrap();
        assert_eq!(outcome, DebitOutcome::Applied);
        assert_eq!(ledger.balance(acct).await.unwrap(), 6);
    }

    #[tokio::test]
    async fn test_insufficient_leaves_balance_untouched() {
        let acct = Uuid::new_v4();
        let ledger = MemoryTokenLedger::new().with_account(acct, 3);

        let outcome = ledger.debit(acct, 5, "op-1").await.unwrap();
        assert_eq!(outcome, DebitOutcome::Insufficient);
        assert_eq!(ledger.balance(acct).await.unwrap(), 3);
    }

    #[tokio::test]
    async fn test_replayed_debit_key_charges_once() {
        let acct = Uuid::new_v4();
        let ledger = MemoryTokenLedger::new().with_account(acct, 10);

        assert_eq!(
            ledger.debit(acct, 4, "job-1:publish").await.unwrap(),
            DebitOutcome::Applied
        );
        assert_eq!(
            ledger.debit(acct, 4, "job-1:publish").await.unwrap(),
            DebitOutcome::Applied
        );
        assert_eq!(ledger.balance(acct).await.unwrap(), 6);
    }

    #[tokio::test]
    async fn test_key_reuse_with_different_amount_is_rejected() {
        let acct = Uuid::new_v4();
        let ledger = MemoryTokenLedger::new().with_account(acct, 10);

        ledger.debit(acct, 4, "op-1").await.unwrap();
        let err = ledger.debit(acct, 5, "op-1").await.unwrap_err();
        assert!(matches!(err, LedgerError::KeyReuse(_)));
        assert_eq!(ledger.balance(acct).await.unwrap(), 6);
    }

    #[tokio::test]
    async fn test_refused_debit_is_not_journaled() {
        let acct = Uuid::new_v4();
        let ledger = MemoryTokenLedger::new().with_account(acct, 3);

        assert_eq!(
            ledger.debit(acct, 5, "job-1:publish").await.unwrap(),
            DebitOutcome::Insufficient
        );
        // Top up, then retry the same key — it must apply now.
        ledger.credit(acct, 10, "grant-1").await.unwrap();
        assert_eq!(
            ledger.debit(acct, 5, "job-1:publish").await.unwrap(),
            DebitOutcome::Applied
        );
        assert_eq!(ledger.balance(acct).await.unwrap(), 8);
    }

    #[tokio::test]
    async fn test_reverse_debit_restores_balance_and_releases_key() {
        let acct = Uuid::new_v4();
        let ledger = MemoryTokenLedger::new().with_account(acct, 10);

        ledger.debit(acct, 4, "job-1:publish").await.unwrap();
        ledger.reverse_debit("job-1:publish").await.unwrap();
        assert_eq!(ledger.balance(acct).await.unwrap(), 10);

        // The key is free again: a retry debits for real.
        ledger.debit(acct, 4, "job-1:publish").await.unwrap();
        assert_eq!(ledger.balance(acct).await.unwrap(), 6);
    }

    #[tokio::test]
    async fn test_reverse_debit_is_idempotent() {
        let acct = Uuid::new_v4();
        let ledger = MemoryTokenLedger::new().with_account(acct, 10);

        ledger.debit(acct, 4, "op-1").await.unwrap();
        ledger.reverse_debit("op-1").await.unwrap();
        ledger.reverse_debit("op-1").await.unwrap();
        assert_eq!(ledger.balance(acct).await.unwrap(), 10);
    }

    #[tokio::test]
    async fn test_credit_replay_applies_once() {
        let acct = Uuid::new_v4();
        let ledger = MemoryTokenLedger::new().with_account(acct, 0);

        ledger.credit(acct, 25, "grant-1").await.unwrap();
        ledger.credit(acct, 25, "grant-1").await.unwrap();
        assert_eq!(ledger.balance(acct).await.unwrap(), 25);
    }

    #[tokio::test]
    async fn test_unknown_account() {
        let ledger = MemoryTokenLedger::new();
        let err = ledger.debit(Uuid::new_v4(), 1, "op-1").await.unwrap_err();
        assert!(matches!(err, LedgerError::UnknownAccount(_)));
    }

    #[tokio::test]
    async fn test_unavailable_ledger_reports_infrastructure_error() {
        let acct = Uuid::new_v4();
        let ledger = MemoryTokenLedger::new().with_account(acct, 10);
        ledger.set_unavailable(true);

        let err = ledger.debit(acct, 1, "op-1").await.unwrap_err();
        assert!(matches!(err, LedgerError::Unavailable(_)));
    }

    #[tokio::test]
    async fn test_concurrent_debits_never_drive_balance_negative() {
        let acct = Uuid::new_v4();
        let ledger = Arc::new(MemoryTokenLedger::new().with_account(acct, 50));

        let mut handles = Vec::new();
        for i in 0..20 {
            let ledger = ledger.clone();
            handles.push(tokio::spawn(async move {
                ledger.debit(acct, 10, &format!("op-{i}")).await.unwrap()
            }));
        }

        let mut applied = 0;
        for handle in handles {
            if handle.await.unwrap() == DebitOutcome::Applied {
                applied += 1;
            }
        }

        assert_eq!(applied, 5);
        assert_eq!(ledger.balance(acct).await.unwrap(), 0);
    }
}
