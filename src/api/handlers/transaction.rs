//! Pending transaction handlers (deposits and withdrawals) and the history
//! listing.

use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::routing::{delete, get, post};
use axum::{Json, Router};
use uuid::Uuid;

use crate::api::dto::{
    DepositDto, HistoryDto, HistoryListQuery, HistoryListResponse, PaginationMeta,
    PaginationParams, SubmitTransactionBody, SubmitWithdrawalBody, TransactionDto,
};
use crate::app_state::AppState;
use crate::domain::{PageRequest, TransactionId, UserId};
use crate::error::{AccrualError, ErrorResponse};
use crate::service::{SubmitDepositRequest, WithdrawalRequest};

/// `POST /transactions` — Submit a deposit for approval.
///
/// # Errors
///
/// Returns [`AccrualError`] on validation failure.
#[utoipa::path(
    post,
    path = "/api/v1/transactions",
    tag = "Transactions",
    summary = "Submit pending deposit",
    description = "Records a deposit awaiting approval and reserves its amount in the wallet's pending bucket.",
    request_body = SubmitTransactionBody,
    responses(
        (status = 201, description = "Transaction recorded", body = TransactionDto),
        (status = 400, description = "Invalid request", body = ErrorResponse),
        (status = 404, description = "Plan, user or wallet not found", body = ErrorResponse),
    )
)]
pub async fn submit_transaction(
    State(state): State<AppState>,
    Json(body): Json<SubmitTransactionBody>,
) -> Result<impl IntoResponse, AccrualError> {
    let txn = state
        .deposit_service
        .submit_deposit(SubmitDepositRequest {
            user_id: UserId::from_uuid(body.user_id),
            wallet_id: body.wallet_id.into(),
            plan_name: body.plan_name,
            amount: body.amount,
        })
        .await?;
    Ok((StatusCode::CREATED, Json(TransactionDto::from(txn))))
}

/// `POST /transactions/{id}/approve` — Approve a pending deposit.
///
/// # Errors
///
/// Returns [`AccrualError::TransactionNotFound`] if it was already handled.
#[utoipa::path(
    post,
    path = "/api/v1/transactions/{id}/approve",
    tag = "Transactions",
    summary = "Approve pending deposit",
    description = "Opens the deposit from the pending bucket, pays any one-time referral commission and starts accruing.",
    params(("id" = Uuid, Path, description = "Transaction UUID")),
    responses(
        (status = 201, description = "Deposit opened", body = DepositDto),
        (status = 404, description = "Transaction not found", body = ErrorResponse),
        (status = 422, description = "Pending bucket short", body = ErrorResponse),
    )
)]
pub async fn approve_transaction(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<impl IntoResponse, AccrualError> {
    let deposit = state
        .deposit_service
        .approve_deposit(TransactionId::from_uuid(id))
        .await?;
    Ok((StatusCode::CREATED, Json(DepositDto::from(deposit))))
}

/// `DELETE /transactions/{id}` — Cancel a pending deposit or withdrawal.
///
/// # Errors
///
/// Returns [`AccrualError::TransactionNotFound`] if it was already handled.
#[utoipa::path(
    delete,
    path = "/api/v1/transactions/{id}",
    tag = "Transactions",
    summary = "Cancel pending transaction",
    description = "Deletes the transaction and undoes its reservation. A cancelled withdrawal returns its amount to the wallet balance.",
    params(("id" = Uuid, Path, description = "Transaction UUID")),
    responses(
        (status = 200, description = "Transaction cancelled", body = TransactionDto),
        (status = 404, description = "Transaction not found", body = ErrorResponse),
    )
)]
pub async fn cancel_transaction(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<impl IntoResponse, AccrualError> {
    let txn = state
        .deposit_service
        .cancel_pending_transaction(TransactionId::from_uuid(id))
        .await?;
    Ok(Json(TransactionDto::from(txn)))
}

/// `POST /withdrawals` — Submit a withdrawal for approval.
///
/// # Errors
///
/// Returns [`AccrualError`] on validation failure or insufficient funds.
#[utoipa::path(
    post,
    path = "/api/v1/withdrawals",
    tag = "Transactions",
    summary = "Submit withdrawal",
    description = "Moves the amount out of the wallet balance into the pending-withdrawal bucket until it is approved or cancelled.",
    request_body = SubmitWithdrawalBody,
    responses(
        (status = 201, description = "Withdrawal recorded", body = TransactionDto),
        (status = 400, description = "Invalid request", body = ErrorResponse),
        (status = 404, description = "User or wallet not found", body = ErrorResponse),
        (status = 422, description = "Insufficient balance", body = ErrorResponse),
    )
)]
pub async fn submit_withdrawal(
    State(state): State<AppState>,
    Json(body): Json<SubmitWithdrawalBody>,
) -> Result<impl IntoResponse, AccrualError> {
    let txn = state
        .deposit_service
        .submit_withdrawal(WithdrawalRequest {
            user_id: UserId::from_uuid(body.user_id),
            wallet_id: body.wallet_id.into(),
            amount: body.amount,
        })
        .await?;
    Ok((StatusCode::CREATED, Json(TransactionDto::from(txn))))
}

/// `POST /withdrawals/{id}/approve` — Approve a pending withdrawal.
///
/// # Errors
///
/// Returns [`AccrualError::TransactionNotFound`] if it was already handled.
#[utoipa::path(
    post,
    path = "/api/v1/withdrawals/{id}/approve",
    tag = "Transactions",
    summary = "Approve withdrawal",
    description = "Releases the pending-withdrawal amount, adds it to the currency's withdrawal total and records a history row.",
    params(("id" = Uuid, Path, description = "Transaction UUID")),
    responses(
        (status = 200, description = "Withdrawal approved", body = TransactionDto),
        (status = 400, description = "Transaction is a deposit", body = ErrorResponse),
        (status = 404, description = "Transaction not found", body = ErrorResponse),
    )
)]
pub async fn approve_withdrawal(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<impl IntoResponse, AccrualError> {
    let txn = state
        .deposit_service
        .approve_withdrawal(TransactionId::from_uuid(id))
        .await?;
    Ok(Json(TransactionDto::from(txn)))
}

/// `GET /history` — List deposit openings and approved withdrawals.
///
/// # Errors
///
/// Returns [`AccrualError`] on store failure.
#[utoipa::path(
    get,
    path = "/api/v1/history",
    tag = "Transactions",
    summary = "List history",
    description = "Returns the history log newest first, optionally for one user.",
    params(HistoryListQuery, PaginationParams),
    responses(
        (status = 200, description = "Paginated history", body = HistoryListResponse),
    )
)]
pub async fn list_history(
    State(state): State<AppState>,
    Query(query): Query<HistoryListQuery>,
    Query(params): Query<PaginationParams>,
) -> Result<impl IntoResponse, AccrualError> {
    let page = state
        .deposit_service
        .list_history(
            query.user_id.map(UserId::from_uuid),
            PageRequest::from(&params),
        )
        .await?;
    let pagination = PaginationMeta::from(&page);
    Ok(Json(HistoryListResponse {
        data: page.items.into_iter().map(HistoryDto::from).collect(),
        pagination,
    }))
}

/// Transaction, withdrawal and history routes.
pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/transactions", post(submit_transaction))
        .route("/transactions/{id}", delete(cancel_transaction))
        .route("/transactions/{id}/approve", post(approve_transaction))
        .route("/withdrawals", post(submit_withdrawal))
        .route("/withdrawals/{id}/approve", post(approve_withdrawal))
        .route("/history", get(list_history))
}
