//! Token account endpoints: provisioning, balance reads, and grants.
//!
//! Grants are the recovery path for `INSUFFICIENT_TOKENS` — they go
//! through the ledger's idempotent `credit`, so a retried purchase
//! callback can never top an account up twice.

use axum::{
    extract::{Path, State},
    http::StatusCode,
    Json,
};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::errors::AppError;
use crate::models::account::TokenAccountRow;
use crate::state::AppState;

#[derive(Debug, Deserialize)]
pub struct CreateAccountRequest {
    pub company_name: String,
}

#[derive(Debug, Deserialize)]
pub struct GrantTokensRequest {
    pub amount: i64,
    /// Caller-supplied dedup key, e.g. a payment reference.
    pub op_key: String,
}

#[derive(Debug, Serialize)]
pub struct BalanceResponse {
    pub account_id: Uuid,
    pub balance: i64,
}

/// POST /api/v1/accounts
///
/// Creates an account with a zero balance; tokens arrive via grants.
pub async fn handle_create_account(
    State(state): State<AppState>,
    Json(request): Json<CreateAccountRequest>,
) -> Result<(StatusCode, Json<TokenAccountRow>), AppError> {
    if request.company_name.trim().is_empty() {
        return Err(AppError::Validation(
            "company_name cannot be empty".to_string(),
        ));
    }

    let account: TokenAccountRow = sqlx::query_as(
        r#"
        INSERT INTO token_accounts (id, company_name, balance)
        VALUES ($1, $2, 0)
        RETURNING *
        "#,
    )
    .bind(Uuid::new_v4())
    .bind(&request.company_name)
    .fetch_one(&state.db)
    .await?;

    Ok((StatusCode::CREATED, Json(account)))
}

/// GET /api/v1/accounts/:id
pub async fn handle_get_account(
    State(state): State<AppState>,
    Path(account_id): Path<Uuid>,
) -> Result<Json<TokenAccountRow>, AppError> {
    let account: Option<TokenAccountRow> =
        sqlx::query_as("SELECT * FROM token_accounts WHERE id = $1")
            .bind(account_id)
            .fetch_optional(&state.db)
            .await?;

    account
        .map(Json)
        .ok_or_else(|| AppError::NotFound(format!("Token account {account_id} not found")))
}

/// POST /api/v1/accounts/:id/tokens/grant
pub async fn handle_grant_tokens(
    State(state): State<AppState>,
    Path(account_id): Path<Uuid>,
    Json(request): Json<GrantTokensRequest>,
) -> Result<Json<BalanceResponse>, AppError> {
    if request.amount <= 0 {
        return Err(AppError::Validation("amount must be positive".to_string()));
    }
    if request.op_key.trim().is_empty() {
        return Err(AppError::Validation("op_key cannot be empty".to_string()));
    }

    state
        .ledger
        .credit(account_id, request.amount, &request.op_key)
        .await?;
    let balance = state.ledger.balance(account_id).await?;

    Ok(Json(BalanceResponse {
        account_id,
        balance,
    }))
}
