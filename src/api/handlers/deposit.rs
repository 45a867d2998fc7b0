//! Deposit handlers: open, list, get, earnings, suspend and resume.

use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::routing::{get, post};
use axum::{Json, Router};
use rust_decimal::Decimal;
use uuid::Uuid;

use crate::accrual::ResumeReport;
use crate::api::dto::{
    CreateDepositBody, DepositDto, DepositListQuery, DepositListResponse, EarningDto,
    EarningListResponse, PaginationMeta, PaginationParams,
};
use crate::app_state::AppState;
use crate::domain::{DepositFilter, DepositId, DepositSort, DepositStatus, PageRequest, UserId};
use crate::error::{AccrualError, ErrorResponse};
use crate::service::CreateDepositRequest;

/// `POST /deposits` — Open a deposit from a wallet.
///
/// # Errors
///
/// Returns [`AccrualError`] on validation failure or insufficient funds.
#[utoipa::path(
    post,
    path = "/api/v1/deposits",
    tag = "Deposits",
    summary = "Open a deposit",
    description = "Debits the wallet (balance, or balance plus pending bucket for reinvestment), registers the deposit and starts its accrual timer.",
    request_body = CreateDepositBody,
    responses(
        (status = 201, description = "Deposit opened", body = DepositDto),
        (status = 400, description = "Invalid request", body = ErrorResponse),
        (status = 404, description = "Plan, user or wallet not found", body = ErrorResponse),
        (status = 422, description = "Insufficient funds", body = ErrorResponse),
    )
)]
pub async fn create_deposit(
    State(state): State<AppState>,
    Json(body): Json<CreateDepositBody>,
) -> Result<impl IntoResponse, AccrualError> {
    let deposit = state
        .deposit_service
        .create_active_deposit(CreateDepositRequest {
            user_id: UserId::from_uuid(body.user_id),
            wallet_id: body.wallet_id.into(),
            plan_name: body.plan_name,
            amount: body.amount,
            source: body.source,
        })
        .await?;
    Ok((StatusCode::CREATED, Json(DepositDto::from(deposit))))
}

/// `GET /deposits` — List active deposits.
///
/// # Errors
///
/// Returns [`AccrualError::InvalidRequest`] for an unknown status or sort.
#[utoipa::path(
    get,
    path = "/api/v1/deposits",
    tag = "Deposits",
    summary = "List active deposits",
    description = "Returns a paginated, sorted list of registered deposits, optionally filtered by user, status and plan.",
    params(DepositListQuery, PaginationParams),
    responses(
        (status = 200, description = "Paginated deposit list", body = DepositListResponse),
        (status = 400, description = "Invalid filter or sort", body = ErrorResponse),
    )
)]
pub async fn list_deposits(
    State(state): State<AppState>,
    Query(query): Query<DepositListQuery>,
    Query(params): Query<PaginationParams>,
) -> Result<impl IntoResponse, AccrualError> {
    let status = query
        .status
        .as_deref()
        .map(|s| {
            DepositStatus::parse(s)
                .ok_or_else(|| AccrualError::InvalidRequest(format!("unknown status {s:?}")))
        })
        .transpose()?;
    let sort = query
        .sort
        .as_deref()
        .map(|s| {
            DepositSort::parse(s)
                .ok_or_else(|| AccrualError::InvalidRequest(format!("unknown sort {s:?}")))
        })
        .transpose()?
        .unwrap_or_default();
    let filter = DepositFilter {
        user_id: query.user_id.map(UserId::from_uuid),
        status,
        plan_name: query.plan,
    };

    let page = state
        .deposit_service
        .list_active_deposits(&filter, sort, PageRequest::from(&params))
        .await?;
    let pagination = PaginationMeta::from(&page);
    Ok(Json(DepositListResponse {
        data: page.items.into_iter().map(DepositDto::from).collect(),
        pagination,
    }))
}

/// `GET /deposits/{id}` — Get one deposit.
///
/// # Errors
///
/// Returns [`AccrualError::DepositNotFound`] if it is not registered.
#[utoipa::path(
    get,
    path = "/api/v1/deposits/{id}",
    tag = "Deposits",
    summary = "Get deposit",
    params(("id" = Uuid, Path, description = "Deposit UUID")),
    responses(
        (status = 200, description = "Deposit details", body = DepositDto),
        (status = 404, description = "Deposit not found", body = ErrorResponse),
    )
)]
pub async fn get_deposit(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<impl IntoResponse, AccrualError> {
    let deposit = state
        .deposit_service
        .get_active_deposit(DepositId::from_uuid(id))
        .await?;
    Ok(Json(DepositDto::from(deposit)))
}

/// `GET /deposits/{id}/earnings` — Earning rows of a deposit.
///
/// # Errors
///
/// Returns [`AccrualError`] on store failure.
#[utoipa::path(
    get,
    path = "/api/v1/deposits/{id}/earnings",
    tag = "Deposits",
    summary = "List earnings",
    description = "Returns every credited tick of the deposit in order. Rows remain after the deposit settles.",
    params(("id" = Uuid, Path, description = "Deposit UUID")),
    responses(
        (status = 200, description = "Earning rows", body = EarningListResponse),
    )
)]
pub async fn list_earnings(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<impl IntoResponse, AccrualError> {
    let earnings = state
        .deposit_service
        .list_earnings(DepositId::from_uuid(id))
        .await?;
    let total = earnings.iter().map(|e| e.amount).sum::<Decimal>();
    Ok(Json(EarningListResponse {
        data: earnings.into_iter().map(EarningDto::from).collect(),
        total,
    }))
}

/// `POST /deposits/{id}/suspend` — Pause a deposit.
///
/// # Errors
///
/// Returns [`AccrualError::DepositNotFound`] if it is not registered.
#[utoipa::path(
    post,
    path = "/api/v1/deposits/{id}/suspend",
    tag = "Deposits",
    summary = "Suspend deposit",
    description = "Stops the deposit's timer and marks it suspended. It keeps its registry row and is skipped on restart.",
    params(("id" = Uuid, Path, description = "Deposit UUID")),
    responses(
        (status = 200, description = "Deposit suspended", body = DepositDto),
        (status = 404, description = "Deposit not found", body = ErrorResponse),
    )
)]
pub async fn suspend_deposit(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<impl IntoResponse, AccrualError> {
    let deposit = state
        .deposit_service
        .suspend_deposit(DepositId::from_uuid(id))
        .await?;
    Ok(Json(DepositDto::from(deposit)))
}

/// `POST /deposits/{id}/resume` — Restart one deposit's timer.
///
/// # Errors
///
/// Returns [`AccrualError::DepositNotFound`] if it is not registered.
#[utoipa::path(
    post,
    path = "/api/v1/deposits/{id}/resume",
    tag = "Deposits",
    summary = "Resume deposit",
    description = "Marks the deposit active and rebuilds its timer from the last tick time, applying catch-up ticks if cycles were missed.",
    params(("id" = Uuid, Path, description = "Deposit UUID")),
    responses(
        (status = 200, description = "Deposit resumed", body = DepositDto),
        (status = 404, description = "Deposit not found", body = ErrorResponse),
    )
)]
pub async fn resume_deposit(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<impl IntoResponse, AccrualError> {
    let deposit = state
        .deposit_service
        .resume_one(DepositId::from_uuid(id))
        .await?;
    Ok(Json(DepositDto::from(deposit)))
}

/// `POST /deposits/resume` — Restart the timer of every active deposit that has none.
#[utoipa::path(
    post,
    path = "/api/v1/deposits/resume",
    tag = "Deposits",
    summary = "Resume all deposits",
    description = "Runs the start-up resumption pass again. Suspended deposits and deposits with a running timer are skipped; matured ones are settled.",
    responses(
        (status = 200, description = "Resumption report", body = ResumeReport),
    )
)]
pub async fn resume_all(State(state): State<AppState>) -> impl IntoResponse {
    Json(state.deposit_service.resume_all().await)
}

/// Deposit routes.
pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/deposits", post(create_deposit).get(list_deposits))
        .route("/deposits/resume", post(resume_all))
        .route("/deposits/{id}", get(get_deposit))
        .route("/deposits/{id}/earnings", get(list_earnings))
        .route("/deposits/{id}/suspend", post(suspend_deposit))
        .route("/deposits/{id}/resume", post(resume_deposit))
}
