use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

/// A paying company's token account. `balance` is mutated only through
/// the ledger — never read-modify-write from handler code.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct TokenAccountRow {
    pub id: Uuid,
    pub company_name: String,
    pub balance: i64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// One applied ledger operation, keyed by the caller's dedup key.
/// Refused debits are not journaled, so a topped-up account can retry
/// the same key.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct LedgerOperationRow {
    pub op_key: String,
    pub account_id: Uuid,
    pub kind: String,
    pub amount: i64,
    pub created_at: DateTime<Utc>,
}
