//! Shared fixtures for the integration suites.
#![allow(dead_code)]

use bigdecimal::BigDecimal;
use chrono::{DateTime, Duration as ChronoDuration, NaiveDate, Utc};
use overdue_settlement::batch::BatchRunner;
use overdue_settlement::calendar::CalendarGate;
use overdue_settlement::calls::{CallOrchestrator, MessageLocale};
use overdue_settlement::charges::ChargeOrchestrator;
use overdue_settlement::config::{CalendarConfig, GatewayConfig, TelephonyConfig};
use overdue_settlement::db_storage::SettlementStore;
use overdue_settlement::gateway_client::CardGatewayClient;
use overdue_settlement::invoices::{BusinessIdentity, InvoiceIssuer};
use overdue_settlement::memory_store::InMemorySettlementStore;
use overdue_settlement::models::{Customer, Rental, RentalStatus};
use overdue_settlement::overdue::start_of_local_day;
use overdue_settlement::payments::PaymentService;
use overdue_settlement::telephony_client::TelephonyClient;
use serde_json::{json, Value};
use std::sync::Arc;
use std::time::Duration;
use uuid::Uuid;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

pub const GATEWAY_PATH: &str = "/DebitRegularType";
pub const CALENDAR_PATH: &str = "/hebcal";
pub const TELEPHONY_PATH: &str = "/campaign";

pub fn day(y: i32, m: u32, d: u32) -> NaiveDate {
    NaiveDate::from_ymd_opt(y, m, d).unwrap()
}

/// A Tuesday, so the weekly rest day never interferes.
pub fn today() -> NaiveDate {
    day(2026, 10, 13)
}

/// Midday local time on `date`, the way a due date is usually stored.
pub fn midday(date: NaiveDate) -> DateTime<Utc> {
    start_of_local_day(date) + ChronoDuration::hours(12)
}

pub fn gateway_config(uri: &str) -> GatewayConfig {
    GatewayConfig {
        base_url: uri.to_string(),
        terminal: "0962210".to_string(),
        user: "shop".to_string(),
        password: "gw-secret".to_string(),
    }
}

pub fn telephony_config(uri: &str) -> TelephonyConfig {
    TelephonyConfig {
        base_url: format!("{}{}", uri, TELEPHONY_PATH),
        user: "calls".to_string(),
        password: "tel-secret".to_string(),
        template_id: "tpl-7".to_string(),
    }
}

pub fn calendar_config(uri: &str) -> CalendarConfig {
    CalendarConfig {
        base_url: format!("{}{}", uri, CALENDAR_PATH),
        timeout_secs: 2,
        ..CalendarConfig::default()
    }
}

pub fn customer(token: Option<&str>) -> Customer {
    Customer {
        id: Uuid::new_v4(),
        name: "Dana Levi".to_string(),
        phone: Some("052-555-1234".to_string()),
        national_id: Some("123456782".to_string()),
        payment_token: token.map(str::to_string),
        payment_token_last4: token.map(|_| "1111".to_string()),
        payment_token_expiry: token.map(|_| "1228".to_string()),
        payment_token_updated_at: None,
    }
}

pub fn rental(customer: &Customer, end: NaiveDate, rate: i64, grace: Option<i32>) -> Rental {
    Rental {
        id: Uuid::new_v4(),
        customer_id: customer.id,
        customer_name: customer.name.clone(),
        start_date: midday(end) - ChronoDuration::days(7),
        end_date: midday(end),
        currency: "ILS".to_string(),
        status: RentalStatus::Active,
        overdue_daily_rate: Some(BigDecimal::from(rate)),
        overdue_grace_days: grace,
        auto_charge_enabled: true,
        has_sim_item: false,
    }
}

pub fn approved_body(token: Option<&str>) -> Value {
    let mut result = json!({
        "TransactionId": "9001",
        "CreditCardNumber": "458000******4242",
        "CreditCardExpDate": "1229"
    });
    if let Some(token) = token {
        result["Token"] = json!(token);
    }
    json!({
        "StatusCode": "000",
        "ErrorMessage": "operation success",
        "ResultData": result
    })
}

pub fn declined_body() -> Value {
    json!({
        "StatusCode": "033",
        "ErrorMessage": "card blocked",
        "ResultData": {}
    })
}

pub async fn mount_no_holidays(server: &MockServer) {
    Mock::given(method("GET"))
        .and(path(CALENDAR_PATH))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "items": [] })))
        .mount(server)
        .await;
}

pub fn payment_service(store: &Arc<InMemorySettlementStore>, gateway_uri: &str) -> PaymentService {
    let dyn_store: Arc<dyn SettlementStore> = store.clone();
    let gateway =
        CardGatewayClient::new(&gateway_config(gateway_uri), Duration::from_secs(5)).unwrap();
    let invoices = InvoiceIssuer::new(
        dyn_store.clone(),
        BusinessIdentity {
            name: "Rent-a-Line".to_string(),
            tax_id: "514000000".to_string(),
            address: "1 Herzl St, Tel Aviv".to_string(),
        },
    );
    PaymentService::new(dyn_store, gateway, invoices)
}

/// Runner wired against one mock server for every external service.
pub fn runner(
    store: &Arc<InMemorySettlementStore>,
    server_uri: &str,
    with_gateway: bool,
    with_telephony: bool,
) -> BatchRunner {
    let dyn_store: Arc<dyn SettlementStore> = store.clone();
    let calendar = CalendarGate::new(&calendar_config(server_uri)).unwrap();

    let charges = with_gateway
        .then(|| ChargeOrchestrator::new(dyn_store.clone(), payment_service(store, server_uri)));
    let calls = with_telephony.then(|| {
        let client =
            TelephonyClient::new(&telephony_config(server_uri), Duration::from_secs(5)).unwrap();
        CallOrchestrator::new(dyn_store.clone(), client, MessageLocale::English)
    });

    BatchRunner::new(dyn_store, calendar, charges, calls).with_concurrency(4)
}
