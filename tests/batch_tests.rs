/// End-to-end batch runs over the in-memory store with mocked gateway, calendar and telephony
mod common;

use bigdecimal::BigDecimal;
use common::*;
use overdue_settlement::batch::{BatchMode, Pipeline};
use overdue_settlement::errors::AppError;
use overdue_settlement::memory_store::InMemorySettlementStore;
use overdue_settlement::models::{CallSubject, CallType, OverdueChargeStatus};
use serde_json::json;
use std::sync::Arc;
use wiremock::matchers::{body_partial_json, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

async fn mount_gateway(server: &MockServer, body: serde_json::Value, expected_calls: u64) {
    Mock::given(method("POST"))
        .and(path(GATEWAY_PATH))
        .respond_with(ResponseTemplate::new(200).set_body_json(body))
        .expect(expected_calls)
        .mount(server)
        .await;
}

#[tokio::test]
async fn test_rate_50_grace_2_five_days_late_charges_daily_rate_once() {
    let server = MockServer::start().await;
    mount_no_holidays(&server).await;

    Mock::given(method("POST"))
        .and(path(GATEWAY_PATH))
        .and(body_partial_json(json!({"total": "5000", "token": "tok-1"})))
        .respond_with(ResponseTemplate::new(200).set_body_json(approved_body(None)))
        .expect(1)
        .mount(&server)
        .await;

    let store = Arc::new(InMemorySettlementStore::new());
    let holder = customer(Some("tok-1"));
    let late = rental(&holder, day(2026, 10, 8), 50, Some(2));
    store.insert_customer(holder);
    store.insert_rental(late.clone());

    let summary = runner(&store, &server.uri(), true, false)
        .run_on(today(), BatchMode::Charges)
        .await
        .unwrap();

    assert!(summary.success);
    assert!(!summary.skipped);
    assert_eq!(summary.processed, 1);
    assert_eq!(summary.successful, 1);
    assert_eq!(summary.results[0].status, "charged");
    assert_eq!(summary.results[0].amount, Some(BigDecimal::from(50)));

    let charges = store.overdue_charges();
    assert_eq!(charges.len(), 1);
    assert_eq!(charges[0].rental_id, late.id);
    assert_eq!(charges[0].days_overdue, 3);
    assert_eq!(charges[0].status, OverdueChargeStatus::Charged);
    assert_eq!(charges[0].charge_date, today());
    assert!(charges[0]
        .transaction_id
        .as_deref()
        .unwrap()
        .starts_with(&format!("overdue-{}-2026-10-13-", late.id)));
    assert_eq!(store.invoices().len(), 1);
}

#[tokio::test]
async fn test_inside_grace_window_writes_nothing() {
    let server = MockServer::start().await;
    mount_no_holidays(&server).await;
    mount_gateway(&server, approved_body(None), 0).await;

    let store = Arc::new(InMemorySettlementStore::new());
    let holder = customer(Some("tok-1"));
    store.insert_rental(rental(&holder, day(2026, 10, 11), 50, Some(2)));
    store.insert_customer(holder);

    let summary = runner(&store, &server.uri(), true, false)
        .run_on(today(), BatchMode::Charges)
        .await
        .unwrap();

    assert_eq!(summary.results[0].status, "grace_period");
    assert_eq!(summary.successful, 0);
    assert!(store.overdue_charges().is_empty());
    assert!(store.transactions().is_empty());
}

#[tokio::test]
async fn test_second_run_same_day_is_already_processed() {
    let server = MockServer::start().await;
    mount_no_holidays(&server).await;
    mount_gateway(&server, approved_body(None), 1).await;

    let store = Arc::new(InMemorySettlementStore::new());
    let holder = customer(Some("tok-1"));
    store.insert_rental(rental(&holder, day(2026, 10, 10), 30, None));
    store.insert_customer(holder);

    let runner = runner(&store, &server.uri(), true, false);
    let first = runner.run_on(today(), BatchMode::Charges).await.unwrap();
    let second = runner.run_on(today(), BatchMode::Charges).await.unwrap();

    assert_eq!(first.results[0].status, "charged");
    assert_eq!(second.results[0].status, "already_processed");
    assert_eq!(store.overdue_charges().len(), 1);
    assert_eq!(store.transactions().len(), 1);
}

#[tokio::test]
async fn test_concurrent_runs_charge_once() {
    let server = MockServer::start().await;
    mount_no_holidays(&server).await;
    mount_gateway(&server, approved_body(None), 1).await;

    let store = Arc::new(InMemorySettlementStore::new());
    let holder = customer(Some("tok-1"));
    store.insert_rental(rental(&holder, day(2026, 10, 10), 30, None));
    store.insert_customer(holder);

    let first_runner = runner(&store, &server.uri(), true, false);
    let second_runner = runner(&store, &server.uri(), true, false);
    let (a, b) = tokio::join!(
        first_runner.run_on(today(), BatchMode::Charges),
        second_runner.run_on(today(), BatchMode::Charges)
    );

    let statuses = [a.unwrap().results[0].status.clone(), b.unwrap().results[0].status.clone()];
    assert!(statuses.contains(&"charged".to_string()));
    assert!(statuses.contains(&"already_processed".to_string()));
    assert_eq!(store.overdue_charges().len(), 1);
}

#[tokio::test]
async fn test_no_token_records_pending_row_without_gateway_call() {
    let server = MockServer::start().await;
    mount_no_holidays(&server).await;
    mount_gateway(&server, approved_body(None), 0).await;

    let store = Arc::new(InMemorySettlementStore::new());
    let holder = customer(None);
    store.insert_rental(rental(&holder, day(2026, 10, 10), 30, None));
    store.insert_customer(holder);

    let summary = runner(&store, &server.uri(), true, false)
        .run_on(today(), BatchMode::Charges)
        .await
        .unwrap();

    assert_eq!(summary.results[0].status, "no_token");
    let charges = store.overdue_charges();
    assert_eq!(charges.len(), 1);
    assert_eq!(charges[0].status, OverdueChargeStatus::Pending);
    assert_eq!(charges[0].error_message.as_deref(), Some("no token"));
    assert!(store.transactions().is_empty());
}

#[tokio::test]
async fn test_auto_charge_disabled_records_reason() {
    let server = MockServer::start().await;
    mount_no_holidays(&server).await;
    mount_gateway(&server, approved_body(None), 0).await;

    let store = Arc::new(InMemorySettlementStore::new());
    let holder = customer(Some("tok-1"));
    let mut manual = rental(&holder, day(2026, 10, 10), 30, None);
    manual.auto_charge_enabled = false;
    store.insert_rental(manual);
    store.insert_customer(holder);

    let summary = runner(&store, &server.uri(), true, false)
        .run_on(today(), BatchMode::Charges)
        .await
        .unwrap();

    assert_eq!(summary.results[0].status, "no_token");
    assert_eq!(
        store.overdue_charges()[0].error_message.as_deref(),
        Some("auto-charge disabled")
    );
}

#[tokio::test]
async fn test_rest_day_skips_without_selecting() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path(CALENDAR_PATH))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"items": []})))
        .expect(0)
        .mount(&server)
        .await;
    mount_gateway(&server, approved_body(None), 0).await;

    let store = Arc::new(InMemorySettlementStore::new());
    let holder = customer(Some("tok-1"));
    store.insert_rental(rental(&holder, day(2026, 10, 10), 30, None));
    store.insert_customer(holder);

    // 2026-10-17 is a Saturday.
    let summary = runner(&store, &server.uri(), true, false)
        .run_on(day(2026, 10, 17), BatchMode::Charges)
        .await
        .unwrap();

    assert!(summary.skipped);
    assert_eq!(summary.processed, 0);
    assert!(summary.results.is_empty());
    assert_eq!(store.selector_queries(), 0);
}

#[tokio::test]
async fn test_holiday_skips_without_selecting() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path(CALENDAR_PATH))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "items": [{"date": "2026-10-13", "title": "Shmini Atzeret", "yomtov": true}]
        })))
        .mount(&server)
        .await;

    let store = Arc::new(InMemorySettlementStore::new());
    let summary = runner(&store, &server.uri(), true, true)
        .run_on(today(), BatchMode::All)
        .await
        .unwrap();

    assert!(summary.skipped);
    assert_eq!(store.selector_queries(), 0);
}

#[tokio::test]
async fn test_one_broken_rental_does_not_block_another() {
    let server = MockServer::start().await;
    mount_no_holidays(&server).await;
    mount_gateway(&server, approved_body(None), 1).await;

    let store = Arc::new(InMemorySettlementStore::new());
    let orphan_owner = customer(Some("tok-x"));
    // Customer record missing from the store.
    let broken = rental(&orphan_owner, day(2026, 10, 9), 40, None);
    let holder = customer(Some("tok-1"));
    let healthy = rental(&holder, day(2026, 10, 10), 30, None);
    store.insert_rental(broken.clone());
    store.insert_rental(healthy.clone());
    store.insert_customer(holder);

    let summary = runner(&store, &server.uri(), true, false)
        .run_on(today(), BatchMode::Charges)
        .await
        .unwrap();

    assert_eq!(summary.processed, 2);
    assert_eq!(summary.successful, 1);

    let broken_result = summary.results.iter().find(|r| r.rental_id == broken.id).unwrap();
    assert_eq!(broken_result.status, "error");
    assert!(broken_result.error.as_deref().unwrap().contains("customer"));

    let healthy_result = summary.results.iter().find(|r| r.rental_id == healthy.id).unwrap();
    assert_eq!(healthy_result.status, "charged");
}

#[tokio::test]
async fn test_renewed_token_is_stored_on_success() {
    let server = MockServer::start().await;
    mount_no_holidays(&server).await;
    mount_gateway(&server, approved_body(Some("tok-renewed")), 1).await;

    let store = Arc::new(InMemorySettlementStore::new());
    let holder = customer(Some("tok-1"));
    let holder_id = holder.id;
    store.insert_rental(rental(&holder, day(2026, 10, 10), 30, None));
    store.insert_customer(holder);

    runner(&store, &server.uri(), true, false)
        .run_on(today(), BatchMode::Charges)
        .await
        .unwrap();

    let updated = store.customer(holder_id).unwrap();
    assert_eq!(updated.payment_token.as_deref(), Some("tok-renewed"));
    assert_eq!(updated.payment_token_last4.as_deref(), Some("4242"));
    assert_eq!(updated.payment_token_expiry.as_deref(), Some("1229"));
}

#[tokio::test]
async fn test_decline_leaves_token_and_marks_failed() {
    let server = MockServer::start().await;
    mount_no_holidays(&server).await;
    mount_gateway(&server, declined_body(), 1).await;

    let store = Arc::new(InMemorySettlementStore::new());
    let holder = customer(Some("tok-1"));
    let holder_id = holder.id;
    store.insert_rental(rental(&holder, day(2026, 10, 10), 30, None));
    store.insert_customer(holder);

    let summary = runner(&store, &server.uri(), true, false)
        .run_on(today(), BatchMode::Charges)
        .await
        .unwrap();

    assert_eq!(summary.results[0].status, "failed");
    assert_eq!(summary.results[0].error.as_deref(), Some("card blocked"));
    assert_eq!(summary.successful, 0);

    let charge = &store.overdue_charges()[0];
    assert_eq!(charge.status, OverdueChargeStatus::Failed);
    assert_eq!(charge.error_message.as_deref(), Some("card blocked"));
    assert!(charge.transaction_id.is_some());

    let unchanged = store.customer(holder_id).unwrap();
    assert_eq!(unchanged.payment_token.as_deref(), Some("tok-1"));
    assert_eq!(unchanged.payment_token_last4.as_deref(), Some("1111"));
    assert_eq!(unchanged.payment_token_expiry.as_deref(), Some("1228"));
    assert!(store.invoices().is_empty());
}

#[tokio::test]
async fn test_payment_store_failure_marks_charge_failed_without_reference() {
    let server = MockServer::start().await;
    mount_no_holidays(&server).await;
    mount_gateway(&server, approved_body(None), 0).await;

    let store = Arc::new(InMemorySettlementStore::new());
    store.fail_transactions(true);
    let holder = customer(Some("tok-1"));
    store.insert_rental(rental(&holder, day(2026, 10, 10), 30, None));
    store.insert_customer(holder);

    let summary = runner(&store, &server.uri(), true, false)
        .run_on(today(), BatchMode::Charges)
        .await
        .unwrap();

    assert_eq!(summary.results[0].status, "failed");
    assert!(store.transactions().is_empty());

    let charge = &store.overdue_charges()[0];
    assert_eq!(charge.status, OverdueChargeStatus::Failed);
    assert!(charge.transaction_id.is_none());
    assert!(charge
        .error_message
        .as_deref()
        .unwrap()
        .contains("transaction store unavailable"));
}

#[tokio::test]
async fn test_invoice_failure_does_not_undo_charge() {
    let server = MockServer::start().await;
    mount_no_holidays(&server).await;
    mount_gateway(&server, approved_body(None), 1).await;

    let store = Arc::new(InMemorySettlementStore::new());
    store.fail_invoices(true);
    let holder = customer(Some("tok-1"));
    store.insert_rental(rental(&holder, day(2026, 10, 10), 30, None));
    store.insert_customer(holder);

    let summary = runner(&store, &server.uri(), true, false)
        .run_on(today(), BatchMode::Charges)
        .await
        .unwrap();

    assert_eq!(summary.results[0].status, "charged");
    assert_eq!(store.overdue_charges()[0].status, OverdueChargeStatus::Charged);
    assert!(store.invoices().is_empty());
}

#[tokio::test]
async fn test_missing_gateway_config_is_fatal_before_any_work() {
    let server = MockServer::start().await;
    mount_no_holidays(&server).await;

    let store = Arc::new(InMemorySettlementStore::new());
    let holder = customer(Some("tok-1"));
    store.insert_rental(rental(&holder, day(2026, 10, 10), 30, None));
    store.insert_customer(holder);

    let err = runner(&store, &server.uri(), false, true)
        .run_on(today(), BatchMode::All)
        .await
        .unwrap_err();

    assert!(matches!(err, AppError::Configuration(_)));
    assert_eq!(store.selector_queries(), 0);
    assert!(store.call_logs().is_empty());
}

#[tokio::test]
async fn test_returned_and_zero_rate_rentals_are_not_selected() {
    let server = MockServer::start().await;
    mount_no_holidays(&server).await;
    mount_gateway(&server, approved_body(None), 0).await;

    let store = Arc::new(InMemorySettlementStore::new());
    let holder = customer(Some("tok-1"));
    let mut returned = rental(&holder, day(2026, 10, 10), 30, None);
    returned.status = overdue_settlement::models::RentalStatus::Returned;
    let free = rental(&holder, day(2026, 10, 10), 0, None);
    let mut unpriced = rental(&holder, day(2026, 10, 10), 30, None);
    unpriced.overdue_daily_rate = None;
    let due_today = rental(&holder, today(), 30, None);
    store.insert_rental(returned);
    store.insert_rental(free);
    store.insert_rental(unpriced);
    store.insert_rental(due_today);
    store.insert_customer(holder);

    let summary = runner(&store, &server.uri(), true, false)
        .run_on(today(), BatchMode::Charges)
        .await
        .unwrap();

    assert_eq!(summary.processed, 0);
    assert_eq!(store.selector_queries(), 1);
}

// ============ Reminder calls ============

async fn mount_telephony(server: &MockServer, body: &str, expected_calls: u64) {
    Mock::given(method("GET"))
        .and(path(TELEPHONY_PATH))
        .respond_with(ResponseTemplate::new(200).set_body_string(body))
        .expect(expected_calls)
        .mount(server)
        .await;
}

#[tokio::test]
async fn test_sim_rental_gets_one_call_per_day() {
    let server = MockServer::start().await;
    mount_no_holidays(&server).await;
    mount_telephony(&server, r#"{"campaignId":"c-100"}"#, 1).await;

    let store = Arc::new(InMemorySettlementStore::new());
    let holder = customer(Some("tok-1"));
    let mut sim = rental(&holder, day(2026, 10, 11), 30, Some(5));
    sim.has_sim_item = true;
    let plain = rental(&holder, day(2026, 10, 11), 30, None);
    store.insert_rental(sim.clone());
    store.insert_rental(plain.clone());
    store.insert_customer(holder);

    let runner = runner(&store, &server.uri(), false, true);
    let first = runner.run_on(today(), BatchMode::Calls).await.unwrap();
    let second = runner.run_on(today(), BatchMode::Calls).await.unwrap();

    let sim_first = first.results.iter().find(|r| r.rental_id == sim.id).unwrap();
    assert_eq!(sim_first.status, "call_placed");
    assert_eq!(sim_first.pipeline, Pipeline::Call);
    assert_eq!(sim_first.campaign_id.as_deref(), Some("c-100"));
    let plain_first = first.results.iter().find(|r| r.rental_id == plain.id).unwrap();
    assert_eq!(plain_first.status, "no_sim_item");
    assert_eq!(first.successful, 1);

    let sim_second = second.results.iter().find(|r| r.rental_id == sim.id).unwrap();
    assert_eq!(sim_second.status, "already_called");

    let logs = store.call_logs();
    assert_eq!(logs.len(), 1);
    assert_eq!(logs[0].subject, CallSubject::Rental(sim.id));
    assert_eq!(logs[0].call_type, CallType::Automatic);
    assert_eq!(logs[0].phone, "0525551234");
    assert_eq!(logs[0].campaign_id.as_deref(), Some("c-100"));
    assert!(logs[0].message.contains("2 days ago"));
}

#[tokio::test]
async fn test_unparseable_telephony_reply_still_counts_as_attempted() {
    let server = MockServer::start().await;
    mount_no_holidays(&server).await;
    mount_telephony(&server, "<html>oops</html>", 1).await;

    let store = Arc::new(InMemorySettlementStore::new());
    let holder = customer(None);
    let mut sim = rental(&holder, day(2026, 10, 11), 30, None);
    sim.has_sim_item = true;
    store.insert_rental(sim);
    store.insert_customer(holder);

    let runner = runner(&store, &server.uri(), false, true);
    let first = runner.run_on(today(), BatchMode::Calls).await.unwrap();
    let second = runner.run_on(today(), BatchMode::Calls).await.unwrap();

    assert_eq!(first.results[0].status, "call_failed");
    assert_eq!(second.results[0].status, "already_called");

    let logs = store.call_logs();
    assert_eq!(logs.len(), 1);
    assert!(logs[0].campaign_id.is_none());
    assert!(logs[0].error_message.as_deref().unwrap().contains("oops"));
}

#[tokio::test]
async fn test_customer_without_phone_is_an_error() {
    let server = MockServer::start().await;
    mount_no_holidays(&server).await;
    mount_telephony(&server, r#"{"campaignId":"c-1"}"#, 0).await;

    let store = Arc::new(InMemorySettlementStore::new());
    let mut holder = customer(None);
    holder.phone = None;
    let mut sim = rental(&holder, day(2026, 10, 11), 30, None);
    sim.has_sim_item = true;
    store.insert_rental(sim);
    store.insert_customer(holder);

    let summary = runner(&store, &server.uri(), false, true)
        .run_on(today(), BatchMode::Calls)
        .await
        .unwrap();

    assert_eq!(summary.results[0].status, "error");
    assert!(store.call_logs().is_empty());
}

#[tokio::test]
async fn test_all_mode_runs_both_pipelines_per_rental() {
    let server = MockServer::start().await;
    mount_no_holidays(&server).await;
    mount_gateway(&server, approved_body(None), 1).await;
    mount_telephony(&server, "7781", 1).await;

    let store = Arc::new(InMemorySettlementStore::new());
    let holder = customer(Some("tok-1"));
    let mut sim = rental(&holder, day(2026, 10, 10), 30, None);
    sim.has_sim_item = true;
    store.insert_rental(sim);
    store.insert_customer(holder);

    let summary = runner(&store, &server.uri(), true, true)
        .run_on(today(), BatchMode::All)
        .await
        .unwrap();

    assert_eq!(summary.processed, 2);
    assert_eq!(summary.successful, 2);
    assert_eq!(summary.results[0].pipeline, Pipeline::Charge);
    assert_eq!(summary.results[1].pipeline, Pipeline::Call);
    assert_eq!(summary.results[1].campaign_id.as_deref(), Some("7781"));
}
