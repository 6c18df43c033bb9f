use crate::batch::{BatchMode, BatchRunner, BatchSummary};
use crate::db_storage::SettlementStore;
use crate::errors::AppError;
use crate::gateway_client::PaymentMethod;
use crate::payments::{PaymentRequest, PaymentResult, PaymentService};
use axum::{
    extract::{Query, State},
    http::StatusCode,
    Json,
};
use bigdecimal::BigDecimal;
use serde::Deserialize;
use serde_json::json;
use std::sync::Arc;
use uuid::Uuid;

/// Shared application state injected into handlers.
#[derive(Clone)]
pub struct AppState {
    pub store: Arc<dyn SettlementStore>,
    pub runner: Arc<BatchRunner>,
    /// Absent when no gateway credentials are configured.
    pub payments: Option<PaymentService>,
}

/// Health check endpoint.
pub async fn health() -> (StatusCode, Json<serde_json::Value>) {
    (
        StatusCode::OK,
        Json(json!({
            "status": "healthy",
            "service": "overdue-settlement",
            "version": env!("CARGO_PKG_VERSION")
        })),
    )
}

#[derive(Debug, Deserialize)]
pub struct RunParams {
    pub mode: Option<String>,
}

/// GET /api/v1/overdue/run?mode=charges|calls|all
///
/// Runs the daily settlement batch for today. Safe to call repeatedly on the
/// same day: rentals already handled today report `already_processed` or
/// `already_called`.
pub async fn run_overdue_batch(
    State(state): State<Arc<AppState>>,
    Query(params): Query<RunParams>,
) -> Result<Json<BatchSummary>, AppError> {
    let mode = params
        .mode
        .as_deref()
        .unwrap_or("all")
        .parse::<BatchMode>()
        .map_err(AppError::BadRequest)?;

    tracing::info!("GET /overdue/run - mode: {}", mode);

    let summary = state.runner.run(mode).await?;
    Ok(Json(summary))
}

#[derive(Deserialize)]
pub struct CardInput {
    pub number: String,
    /// `MMYY`; `MM/YY` is accepted.
    pub expiry: String,
    pub cvv: String,
}

#[derive(Deserialize)]
pub struct ChargeRequestBody {
    pub transaction_id: String,
    pub amount: BigDecimal,
    pub currency: Option<String>,
    pub customer_id: Option<Uuid>,
    pub rental_id: Option<Uuid>,
    pub description: Option<String>,
    pub token: Option<String>,
    pub card: Option<CardInput>,
}

/// POST /api/v1/payments/charge
///
/// Interactive charge with the same idempotency as the overdue batch: a
/// repeated `transaction_id` returns the stored outcome. Without a token or
/// card, the customer's stored token is used.
pub async fn charge_payment(
    State(state): State<Arc<AppState>>,
    Json(body): Json<ChargeRequestBody>,
) -> Result<Json<PaymentResult>, AppError> {
    let payments = state.payments.as_ref().ok_or_else(|| {
        AppError::Configuration("card gateway is not configured".to_string())
    })?;

    tracing::info!(
        "POST /payments/charge - transaction_id: {}, amount: {}",
        body.transaction_id,
        body.amount
    );

    let customer = match body.customer_id {
        Some(id) => Some(
            state
                .store
                .get_customer(id)
                .await?
                .ok_or_else(|| AppError::NotFound(format!("customer {}", id)))?,
        ),
        None => None,
    };

    let method = match (body.token, body.card) {
        (Some(_), Some(_)) => {
            return Err(AppError::BadRequest(
                "provide either token or card, not both".to_string(),
            ))
        }
        (Some(token), None) if !token.trim().is_empty() => PaymentMethod::Token { token },
        (_, Some(card)) => PaymentMethod::Card {
            number: card.number,
            expiry: card.expiry,
            cvv: card.cvv,
        },
        _ => match customer.as_ref().and_then(|c| c.stored_token()) {
            Some(stored) => PaymentMethod::Token {
                token: stored.to_string(),
            },
            None => {
                return Err(AppError::BadRequest(
                    "no payment method: supply token or card, or a customer with a stored token"
                        .to_string(),
                ))
            }
        },
    };

    let request = PaymentRequest {
        transaction_id: body.transaction_id,
        amount: body.amount,
        currency: body.currency.unwrap_or_else(|| "ILS".to_string()),
        customer_id: body.customer_id,
        rental_id: body.rental_id,
        customer_identifier: customer.and_then(|c| c.national_id),
        description: body.description.unwrap_or_else(|| "Counter payment".to_string()),
        method,
    };

    let result = payments.charge(&request).await?;
    Ok(Json(result))
}
