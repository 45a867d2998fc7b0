//! OpenAPI document for the REST surface.

use utoipa::OpenApi;

use super::dto::{
    CreateDepositBody, DepositDto, DepositListResponse, EarningDto, EarningListResponse,
    HistoryDto, HistoryListResponse, PaginationMeta, SubmitTransactionBody, SubmitWithdrawalBody,
    TransactionDto,
};
use super::handlers::{deposit, system, transaction};
use crate::accrual::ResumeReport;
use crate::error::{ErrorBody, ErrorResponse};

/// Generated OpenAPI specification, served by Swagger UI when the
/// `swagger-ui` feature is on.
#[derive(Debug, OpenApi)]
#[openapi(
    info(
        title = "deposit-accrual",
        description = "Time-driven accrual engine for fixed-term investment deposits."
    ),
    paths(
        deposit::create_deposit,
        deposit::list_deposits,
        deposit::get_deposit,
        deposit::list_earnings,
        deposit::suspend_deposit,
        deposit::resume_deposit,
        deposit::resume_all,
        transaction::submit_transaction,
        transaction::approve_transaction,
        transaction::cancel_transaction,
        transaction::submit_withdrawal,
        transaction::approve_withdrawal,
        transaction::list_history,
        system::health_handler,
    ),
    components(schemas(
        CreateDepositBody,
        DepositDto,
        DepositListResponse,
        EarningDto,
        EarningListResponse,
        PaginationMeta,
        SubmitTransactionBody,
        SubmitWithdrawalBody,
        TransactionDto,
        HistoryDto,
        HistoryListResponse,
        ResumeReport,
        ErrorResponse,
        ErrorBody,
        system::HealthResponse,
    )),
    tags(
        (name = "Deposits", description = "Active deposits and their earnings"),
        (name = "Transactions", description = "Deposits and withdrawals awaiting approval, and the history log"),
        (name = "System", description = "Health"),
    )
)]
pub struct ApiDoc;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn document_lists_every_route() {
        let doc = ApiDoc::openapi();
        for path in [
            "/api/v1/deposits",
            "/api/v1/deposits/{id}",
            "/api/v1/deposits/{id}/earnings",
            "/api/v1/transactions/{id}/approve",
            "/api/v1/withdrawals/{id}/approve",
            "/api/v1/history",
            "/health",
        ] {
            assert!(doc.paths.paths.contains_key(path), "missing {path}");
        }
    }
}
