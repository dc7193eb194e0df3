mod common;

use std::collections::HashMap;

use common::{attempt, first_attempt, harness, order, RecordingSender, PROCESS_URL, SECRET};
use webhook_notifier::MAX_ATTEMPTS;
use webhook_notifier::{
    parse_authorization_header, verify_signature, webhook_key, NotifyError, Order, OrderStatus, PaymentMethodOrder,
    ProcessError, ProcessOutcome, SignatureAlgorithm, HEADER_AUTHORIZATION, HEADER_SIGNATURE,
};

const CHECK_URL: &str = "http://merchant.test/check";

fn cardpay_order() -> Order {
    let mut order = order("cardpay");
    order.payment_method = Some(PaymentMethodOrder {
        id: "pm-1".to_string(),
        name: "Bank card".to_string(),
        group_alias: "BANKCARD".to_string(),
    });
    order.payment_method_payer_account = "400000******0002".to_string();
    order.payment_method_txn_params = HashMap::from([
        ("card_holder".to_string(), "MR CARD HOLDER".to_string()),
        ("emission_country".to_string(), "US".to_string()),
        ("token".to_string(), "tok_123".to_string()),
        ("rrn".to_string(), "000111".to_string()),
        ("is_3ds".to_string(), "true".to_string()),
    ]);
    order
}

fn wallet_order() -> Order {
    let mut order = order("xsolla");
    order.project.url_check_account = CHECK_URL.to_string();
    order.project.merchant_payout_currency = "USD".to_string();
    order.amounts.payment_method_outcome_currency = "EUR".to_string();
    order.amounts.amount_out_merchant_accounting_currency = 10.0;
    order.amounts.psp_fee_merchant_currency = 1.0;
    order
}

#[tokio::test]
async fn test_cardpay_callback_is_signed_in_signature_header() {
    let h = harness(RecordingSender::always(200));
    let mut order = cardpay_order();

    let outcome = h.dispatcher.process(&mut order, &first_attempt()).await.expect("process");
    assert_eq!(outcome, ProcessOutcome::Delivered);
    assert_eq!(order.private_status, OrderStatus::ProjectComplete);

    let requests = h.sender.requests().await;
    assert_eq!(requests.len(), 1);
    assert_eq!(requests[0].url, PROCESS_URL);

    let signature = requests[0].header(HEADER_SIGNATURE).expect("signature header");
    assert!(verify_signature(SignatureAlgorithm::Sha512, &requests[0].body, SECRET, signature));

    let body: serde_json::Value = serde_json::from_slice(&requests[0].body).expect("json");
    assert_eq!(body["payment_method"], "BANKCARD");
    assert_eq!(body["payment_data"]["status"], "COMPLETED");
    assert_eq!(body["payment_data"]["is_3d"], true);
    assert_eq!(body["card_account"]["token"], "tok_123");
}

#[tokio::test]
async fn test_cardpay_unprocessable_rejects_order() {
    let h = harness(RecordingSender::always(422));
    let mut order = cardpay_order();

    let outcome = h.dispatcher.process(&mut order, &first_attempt()).await.expect("process");
    assert_eq!(outcome, ProcessOutcome::Rejected);
    assert_eq!(order.private_status, OrderStatus::ProjectReject);
    assert!(h.publisher.published().await.is_empty());
}

#[tokio::test]
async fn test_cardpay_server_error_is_retried() {
    let h = harness(RecordingSender::always(503));
    let mut order = cardpay_order();

    let outcome = h.dispatcher.process(&mut order, &first_attempt()).await.expect("process");
    assert_eq!(outcome, ProcessOutcome::RetryScheduled { attempt_count: 1 });
    assert_eq!(order.private_status, OrderStatus::PaymentSystemComplete);
}

#[tokio::test]
async fn test_cardpay_missing_rrn_is_terminal() {
    let h = harness(RecordingSender::always(200));
    let mut order = cardpay_order();
    order.payment_method_txn_params.remove("rrn");

    let err = h.dispatcher.process(&mut order, &first_attempt()).await.expect_err("terminal");
    assert!(matches!(err, ProcessError::Notify(NotifyError::MissingTxnParam("rrn"))));
    assert_eq!(h.sender.calls(), 0);
    assert!(h.publisher.published().await.is_empty());
}

#[tokio::test]
async fn test_wallet_checks_user_then_notifies_payment() {
    let h = harness(RecordingSender::sequence(&[204], 200));
    let mut order = wallet_order();

    let outcome = h.dispatcher.process(&mut order, &first_attempt()).await.expect("process");
    assert_eq!(outcome, ProcessOutcome::Delivered);
    assert_eq!(order.private_status, OrderStatus::ProjectComplete);

    let requests = h.sender.requests().await;
    assert_eq!(requests.len(), 2);
    assert_eq!(requests[0].url, CHECK_URL);
    assert_eq!(requests[1].url, PROCESS_URL);

    for request in &requests {
        let header = request.header(HEADER_AUTHORIZATION).expect("authorization");
        let signature = parse_authorization_header(header).expect("signature");
        assert!(verify_signature(SignatureAlgorithm::Sha1, &request.body, SECRET, signature));
    }

    let check: serde_json::Value = serde_json::from_slice(&requests[0].body).expect("json");
    assert_eq!(check["notification_type"], "user_validation");

    let payment: serde_json::Value = serde_json::from_slice(&requests[1].body).expect("json");
    assert_eq!(payment["notification_type"], "payment");
    assert_eq!(payment["payment_details"]["payout_currency_rate"], 0.5);
    assert_eq!(payment["payment_details"]["payout"]["amount"], 9.0);
    assert_eq!(payment["payment_details"]["payout"]["currency"], "USD");

    let rates = h.repository.rate_requests.lock().await.clone();
    assert_eq!(rates, vec![("EUR".to_string(), "USD".to_string())]);
}

#[tokio::test]
async fn test_wallet_failed_check_skips_payment_and_retries() {
    let h = harness(RecordingSender::always(500));
    let mut order = wallet_order();

    let outcome = h.dispatcher.process(&mut order, &first_attempt()).await.expect("process");
    assert_eq!(outcome, ProcessOutcome::RetryScheduled { attempt_count: 1 });
    assert_eq!(h.sender.calls(), 1);
    assert!(h.repository.rate_requests.lock().await.is_empty());
}

#[tokio::test]
async fn test_wallet_refused_user_rejects_order() {
    let h = harness(RecordingSender::always(422));
    let mut order = wallet_order();

    let outcome = h.dispatcher.process(&mut order, &first_attempt()).await.expect("process");
    assert_eq!(outcome, ProcessOutcome::Rejected);
    assert_eq!(order.private_status, OrderStatus::ProjectReject);
    assert_eq!(h.sender.calls(), 1);
}

#[tokio::test]
async fn test_cardpay_no_content_is_not_accepted() {
    let h = harness(RecordingSender::always(204));
    let mut order = cardpay_order();

    let outcome = h.dispatcher.process(&mut order, &first_attempt()).await.expect("process");
    assert_eq!(outcome, ProcessOutcome::RetryScheduled { attempt_count: 1 });
    assert_eq!(order.private_status, OrderStatus::PaymentSystemComplete);
    assert!(!order.notification_flag("processed"));
}

#[tokio::test]
async fn test_cardpay_redelivery_with_flag_set_is_suppressed() {
    let h = harness(RecordingSender::always(200));
    let mut order = cardpay_order();
    order.set_notification_flag("processed", true);

    let outcome = h.dispatcher.process(&mut order, &first_attempt()).await.expect("process");
    assert_eq!(outcome, ProcessOutcome::Suppressed);
    assert_eq!(h.sender.calls(), 0);
    assert_eq!(h.repository.update_count().await, 1);
}

#[tokio::test]
async fn test_cardpay_delivery_is_recorded_once() {
    let h = harness(RecordingSender::always(200));
    let mut first = cardpay_order();
    h.dispatcher.process(&mut first, &first_attempt()).await.expect("first");
    assert!(first.notification_flag("processed"));
    assert_eq!(h.store.snapshot().await[&webhook_key(&first.id)]["processed"], "1");

    let mut second = cardpay_order();
    let outcome = h.dispatcher.process(&mut second, &attempt(1)).await.expect("second");
    assert_eq!(outcome, ProcessOutcome::Suppressed);
    assert_eq!(h.sender.calls(), 1);
}

#[tokio::test]
async fn test_cardpay_rejection_is_not_sent_again() {
    let h = harness(RecordingSender::always(422));
    let mut first = cardpay_order();
    h.dispatcher.process(&mut first, &first_attempt()).await.expect("first");
    assert_eq!(h.store.snapshot().await[&webhook_key(&first.id)]["processed"], "0");

    let mut second = cardpay_order();
    let outcome = h.dispatcher.process(&mut second, &first_attempt()).await.expect("second");
    assert_eq!(outcome, ProcessOutcome::Suppressed);
    assert_eq!(h.sender.calls(), 1);
}

#[tokio::test]
async fn test_wallet_redelivery_makes_no_calls() {
    let h = harness(RecordingSender::sequence(&[204], 200));
    let mut first = wallet_order();
    let outcome = h.dispatcher.process(&mut first, &first_attempt()).await.expect("first");
    assert_eq!(outcome, ProcessOutcome::Delivered);
    assert_eq!(h.sender.calls(), 2);

    let mut second = wallet_order();
    let outcome = h.dispatcher.process(&mut second, &first_attempt()).await.expect("second");
    assert_eq!(outcome, ProcessOutcome::Suppressed);
    assert_eq!(h.sender.calls(), 2);
    assert_eq!(h.repository.rate_requests.lock().await.len(), 1);
}

#[tokio::test]
async fn test_wallet_unreachable_on_last_attempt_records_failure() {
    let h = harness(RecordingSender::unreachable());
    let mut order = wallet_order();

    let outcome = h.dispatcher.process(&mut order, &attempt(MAX_ATTEMPTS)).await.expect("process");
    assert_eq!(outcome, ProcessOutcome::RetryExhausted);
    assert_eq!(order.private_status, OrderStatus::ProjectReject);
    assert_eq!(h.store.snapshot().await[&webhook_key(&order.id)]["processed"], "0");
    assert_eq!(h.sender.calls(), 1);
}
