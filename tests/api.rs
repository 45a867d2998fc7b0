//! REST surface tests driving the router against the in-memory store.

#![allow(clippy::panic, clippy::indexing_slicing)]

use std::sync::Arc;
use std::time::Duration;

use axum::Router;
use axum::body::{Body, to_bytes};
use axum::http::{Method, Request, StatusCode};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde_json::{Value, json};
use tower::ServiceExt;

use deposit_accrual::accrual::{CatchUpPolicy, RetryPolicy, SchedulerOptions};
use deposit_accrual::api::build_router;
use deposit_accrual::app_state::AppState;
use deposit_accrual::domain::{
    Clock, Currency, CurrencyId, EventBus, MS_PER_DAY, Plan, UserAccount, UserId, Wallet,
    WalletId,
};
use deposit_accrual::notification::{NotificationSink, RecordingNotifier};
use deposit_accrual::persistence::{AccrualStore, MemoryStore, PlanCatalog};
use deposit_accrual::service::{DepositService, EngineSettings};

struct Harness {
    app: Router,
    store: Arc<MemoryStore>,
    currency_id: CurrencyId,
}

impl Harness {
    async fn new() -> Self {
        let store = Arc::new(MemoryStore::new());
        let currency_id = CurrencyId::new();
        store
            .put_currency(Currency {
                id: currency_id,
                name: "Tether".to_string(),
                symbol: "USDT".to_string(),
                total_deposit: Decimal::ZERO,
                total_withdrawal: Decimal::ZERO,
            })
            .await;
        store
            .put_plan(Plan {
                name: "daily".to_string(),
                percentage: dec!(2),
                cycle_length_ms: MS_PER_DAY,
                duration_days: 10,
                referral_commission_percent: dec!(5),
            })
            .await;

        let service = DepositService::new(
            Arc::clone(&store) as Arc<dyn AccrualStore>,
            Arc::clone(&store) as Arc<dyn PlanCatalog>,
            Arc::new(RecordingNotifier::new()) as Arc<dyn NotificationSink>,
            EventBus::new(64),
            Clock::system(),
            EngineSettings {
                catch_up: CatchUpPolicy::SingleTick,
                resume_stagger: Duration::ZERO,
                scheduler: SchedulerOptions {
                    retry: RetryPolicy::none(),
                    notify_payouts: false,
                },
            },
        );
        let state = AppState {
            deposit_service: Arc::new(service),
        };
        Self {
            app: build_router().with_state(state),
            store,
            currency_id,
        }
    }

    async fn user(
        &self,
        username: &str,
        balance: Decimal,
        referred_by: Option<&str>,
    ) -> (UserId, WalletId) {
        let user_id = UserId::new();
        let wallet_id = WalletId::new();
        self.store
            .put_user(UserAccount {
                id: user_id,
                username: username.to_string(),
                email: format!("{username}@example.com"),
                total_balance: balance,
                commission: Decimal::ZERO,
                referred_by: referred_by.map(str::to_string),
            })
            .await;
        self.store
            .put_wallet(Wallet {
                id: wallet_id,
                user_id,
                currency_id: self.currency_id,
                name: "Tether".to_string(),
                symbol: "USDT".to_string(),
                balance,
                total_deposit: Decimal::ZERO,
                pending_deposit: Decimal::ZERO,
                total_withdrawal: Decimal::ZERO,
                pending_withdrawal: Decimal::ZERO,
            })
            .await;
        (user_id, wallet_id)
    }

    async fn send(&self, method: Method, uri: &str, body: Option<Value>) -> (StatusCode, Value) {
        let builder = Request::builder().method(method).uri(uri);
        let request = match body {
            Some(json) => builder
                .header("content-type", "application/json")
                .body(Body::from(json.to_string())),
            None => builder.body(Body::empty()),
        };
        let Ok(request) = request else {
            panic!("bad request");
        };
        let Ok(response) = self.app.clone().oneshot(request).await else {
            panic!("router failed");
        };
        let status = response.status();
        let Ok(bytes) = to_bytes(response.into_body(), usize::MAX).await else {
            panic!("body read failed");
        };
        let value = if bytes.is_empty() {
            Value::Null
        } else {
            let Ok(value) = serde_json::from_slice(&bytes) else {
                panic!("body is not JSON");
            };
            value
        };
        (status, value)
    }

    async fn balance(&self, wallet_id: WalletId) -> Decimal {
        let Ok(Some(wallet)) = self.store.get_wallet(wallet_id).await else {
            panic!("wallet missing");
        };
        wallet.balance
    }
}

fn decimal(value: &Value) -> Option<Decimal> {
    value.as_str().and_then(|s| s.parse().ok())
}

fn deposit_body(user_id: UserId, wallet_id: WalletId, amount: &str) -> Value {
    json!({
        "user_id": user_id.to_string(),
        "wallet_id": wallet_id.to_string(),
        "plan_name": "daily",
        "amount": amount,
    })
}

#[tokio::test]
async fn health_reports_timers() {
    let h = Harness::new().await;
    let (status, body) = h.send(Method::GET, "/health", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "healthy");
    assert_eq!(body["active_timers"], 0);
}

#[tokio::test]
async fn open_get_and_list_deposit() {
    let h = Harness::new().await;
    let (user_id, wallet_id) = h.user("alice", dec!(1000), None).await;

    let (status, created) = h
        .send(
            Method::POST,
            "/api/v1/deposits",
            Some(deposit_body(user_id, wallet_id, "1000")),
        )
        .await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(decimal(&created["earning_per_cycle"]), Some(dec!(20)));
    assert_eq!(created["status"], "active");
    assert!(h.balance(wallet_id).await.is_zero());

    let Some(id) = created["deposit_id"].as_str() else {
        panic!("missing deposit_id");
    };
    let (status, fetched) = h
        .send(Method::GET, &format!("/api/v1/deposits/{id}"), None)
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(fetched["plan_name"], "daily");

    let (status, listed) = h
        .send(
            Method::GET,
            &format!("/api/v1/deposits?user_id={user_id}&sort=largest_principal"),
            None,
        )
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(listed["pagination"]["total"], 1);
    assert_eq!(listed["data"][0]["deposit_id"], id);

    let (status, earnings) = h
        .send(Method::GET, &format!("/api/v1/deposits/{id}/earnings"), None)
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(earnings["data"].as_array().map(Vec::len), Some(0));
}

#[tokio::test]
async fn insufficient_funds_is_422() {
    let h = Harness::new().await;
    let (user_id, wallet_id) = h.user("bob", dec!(100), None).await;

    let (status, body) = h
        .send(
            Method::POST,
            "/api/v1/deposits",
            Some(deposit_body(user_id, wallet_id, "150")),
        )
        .await;
    assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
    assert_eq!(body["error"]["code"], 4001);
    assert_eq!(h.balance(wallet_id).await, dec!(100));
}

#[tokio::test]
async fn unknown_deposit_is_404() {
    let h = Harness::new().await;
    let (status, body) = h
        .send(
            Method::GET,
            &format!("/api/v1/deposits/{}", uuid::Uuid::new_v4()),
            None,
        )
        .await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["error"]["code"], 2001);
}

#[tokio::test]
async fn bad_sort_is_400() {
    let h = Harness::new().await;
    let (status, body) = h
        .send(Method::GET, "/api/v1/deposits?sort=sideways", None)
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"]["code"], 1001);
}

#[tokio::test]
async fn submit_approve_pays_referrer_once() {
    let h = Harness::new().await;
    let (_, referrer_wallet) = h.user("carol", Decimal::ZERO, None).await;
    let (user_id, wallet_id) = h.user("dave", Decimal::ZERO, Some("carol")).await;

    let (status, txn) = h
        .send(
            Method::POST,
            "/api/v1/transactions",
            Some(deposit_body(user_id, wallet_id, "500")),
        )
        .await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(txn["transaction_type"], "deposit");
    let Some(txn_id) = txn["transaction_id"].as_str() else {
        panic!("missing transaction_id");
    };

    let approve = format!("/api/v1/transactions/{txn_id}/approve");
    let (status, deposit) = h.send(Method::POST, &approve, None).await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(deposit["referral_username"], "carol");

    let (status, _) = h.send(Method::POST, &approve, None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(h.balance(referrer_wallet).await, dec!(25));
}

#[tokio::test]
async fn cancel_transaction_then_approve_is_404() {
    let h = Harness::new().await;
    let (user_id, wallet_id) = h.user("erin", Decimal::ZERO, None).await;
    let (_, txn) = h
        .send(
            Method::POST,
            "/api/v1/transactions",
            Some(deposit_body(user_id, wallet_id, "80")),
        )
        .await;
    let Some(txn_id) = txn["transaction_id"].as_str() else {
        panic!("missing transaction_id");
    };

    let (status, _) = h
        .send(Method::DELETE, &format!("/api/v1/transactions/{txn_id}"), None)
        .await;
    assert_eq!(status, StatusCode::OK);
    let (status, body) = h
        .send(
            Method::POST,
            &format!("/api/v1/transactions/{txn_id}/approve"),
            None,
        )
        .await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["error"]["code"], 2002);
}

#[tokio::test]
async fn suspend_and_resume_round_trip() {
    let h = Harness::new().await;
    let (user_id, wallet_id) = h.user("frank", dec!(300), None).await;
    let (_, created) = h
        .send(
            Method::POST,
            "/api/v1/deposits",
            Some(deposit_body(user_id, wallet_id, "300")),
        )
        .await;
    let Some(id) = created["deposit_id"].as_str() else {
        panic!("missing deposit_id");
    };

    let (status, suspended) = h
        .send(Method::POST, &format!("/api/v1/deposits/{id}/suspend"), None)
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(suspended["status"], "suspended");

    let (_, health) = h.send(Method::GET, "/health", None).await;
    assert_eq!(health["active_timers"], 0);

    let (status, report) = h.send(Method::POST, "/api/v1/deposits/resume", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(report["skipped"], 1);

    let (status, resumed) = h
        .send(Method::POST, &format!("/api/v1/deposits/{id}/resume"), None)
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(resumed["status"], "active");
    let (_, health) = h.send(Method::GET, "/health", None).await;
    assert_eq!(health["active_timers"], 1);

    let (status, report) = h.send(Method::POST, "/api/v1/deposits/resume", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!((report["resumed"].as_u64(), report["running"].as_u64()), (Some(0), Some(1)));
}

#[tokio::test]
async fn withdrawal_submit_approve_and_history() {
    let h = Harness::new().await;
    let (user_id, wallet_id) = h.user("gina", dec!(400), None).await;
    let body = json!({
        "user_id": user_id.to_string(),
        "wallet_id": wallet_id.to_string(),
        "amount": "150",
    });

    let (status, txn) = h
        .send(Method::POST, "/api/v1/withdrawals", Some(body))
        .await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(txn["transaction_type"], "withdrawal");
    assert_eq!(txn["plan_name"], Value::Null);
    assert_eq!(h.balance(wallet_id).await, dec!(250));
    let Some(txn_id) = txn["transaction_id"].as_str() else {
        panic!("missing transaction_id");
    };

    let (status, _) = h
        .send(
            Method::POST,
            &format!("/api/v1/transactions/{txn_id}/approve"),
            None,
        )
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let approve = format!("/api/v1/withdrawals/{txn_id}/approve");
    let (status, _) = h.send(Method::POST, &approve, None).await;
    assert_eq!(status, StatusCode::OK);
    let (status, _) = h.send(Method::POST, &approve, None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    let Ok(Some(wallet)) = h.store.get_wallet(wallet_id).await else {
        panic!("wallet missing");
    };
    assert_eq!(wallet.balance, dec!(250));
    assert!(wallet.pending_withdrawal.is_zero());
    assert_eq!(wallet.total_withdrawal, dec!(150));

    let (status, history) = h
        .send(Method::GET, &format!("/api/v1/history?user_id={user_id}"), None)
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(history["pagination"]["total"], 1);
    assert_eq!(history["data"][0]["kind"], "withdrawal");
    assert_eq!(decimal(&history["data"][0]["amount"]), Some(dec!(150)));
}

#[tokio::test]
async fn cancelled_withdrawal_refunds_and_overdraw_is_422() {
    let h = Harness::new().await;
    let (user_id, wallet_id) = h.user("hank", dec!(100), None).await;
    let withdraw = |amount: &str| {
        json!({
            "user_id": user_id.to_string(),
            "wallet_id": wallet_id.to_string(),
            "amount": amount,
        })
    };

    let (status, body) = h
        .send(Method::POST, "/api/v1/withdrawals", Some(withdraw("101")))
        .await;
    assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
    assert_eq!(body["error"]["code"], 4001);

    let (_, txn) = h
        .send(Method::POST, "/api/v1/withdrawals", Some(withdraw("60")))
        .await;
    let Some(txn_id) = txn["transaction_id"].as_str() else {
        panic!("missing transaction_id");
    };
    assert_eq!(h.balance(wallet_id).await, dec!(40));

    let (status, _) = h
        .send(Method::DELETE, &format!("/api/v1/transactions/{txn_id}"), None)
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(h.balance(wallet_id).await, dec!(100));

    let (_, history) = h.send(Method::GET, "/api/v1/history", None).await;
    assert_eq!(history["pagination"]["total"], 0);
}
