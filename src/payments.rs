use crate::config::Config;
use crate::db_storage::SettlementStore;
use crate::errors::{AppError, ResultExt};
use crate::gateway_client::{
    token_fingerprint, CardGatewayClient, ChargeResult, GatewayChargeRequest, PaymentMethod,
};
use crate::invoices::InvoiceIssuer;
use crate::models::{
    NewPaymentTransaction, PaymentTransaction, RenewedToken, TransactionOutcome,
    TransactionStatus,
};
use bigdecimal::BigDecimal;
use serde::Serialize;
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;
use uuid::Uuid;

/// One payment attempt keyed by a caller-supplied idempotency id.
#[derive(Debug, Clone)]
pub struct PaymentRequest {
    pub transaction_id: String,
    pub amount: BigDecimal,
    pub currency: String,
    pub customer_id: Option<Uuid>,
    pub rental_id: Option<Uuid>,
    /// Merchant-side identifier forwarded to the gateway when numeric.
    pub customer_identifier: Option<String>,
    pub description: String,
    pub method: PaymentMethod,
}

#[derive(Debug, Clone, Serialize)]
pub struct PaymentResult {
    pub transaction_id: String,
    pub status: TransactionStatus,
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub gateway_transaction_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_code: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub invoice_number: Option<i64>,
    /// True when the outcome came from the transaction table, not a new gateway call.
    pub replayed: bool,
}

impl PaymentResult {
    fn from_stored(row: &PaymentTransaction) -> Self {
        let error_code = row
            .gateway_response
            .as_ref()
            .and_then(|r| r.get("StatusCode").or_else(|| r.get("code")))
            .and_then(|c| c.as_str())
            .filter(|_| row.status == TransactionStatus::Failed)
            .map(str::to_string);

        Self {
            transaction_id: row.transaction_id.clone(),
            status: row.status,
            success: row.status == TransactionStatus::Success,
            gateway_transaction_id: row.gateway_transaction_id.clone(),
            error_message: row.error_message.clone(),
            error_code,
            invoice_number: None,
            replayed: true,
        }
    }
}

/// Idempotent charging on top of the card gateway.
///
/// The payment transaction table is the idempotency record: a known
/// `transaction_id` is answered from the table and never reaches the gateway
/// twice. A row stuck in `pending` means a previous attempt's outcome is
/// unknown, and the service refuses to guess.
#[derive(Clone)]
pub struct PaymentService {
    store: Arc<dyn SettlementStore>,
    gateway: CardGatewayClient,
    invoices: InvoiceIssuer,
}

impl PaymentService {
    pub fn new(
        store: Arc<dyn SettlementStore>,
        gateway: CardGatewayClient,
        invoices: InvoiceIssuer,
    ) -> Self {
        Self {
            store,
            gateway,
            invoices,
        }
    }

    /// Builds the service when gateway credentials are configured.
    pub fn from_config(
        config: &Config,
        store: Arc<dyn SettlementStore>,
    ) -> Result<Option<Self>, AppError> {
        let Some(gateway_config) = &config.gateway else {
            return Ok(None);
        };

        let gateway = CardGatewayClient::new(
            gateway_config,
            Duration::from_secs(config.http_timeout_secs),
        )?;
        let invoices = InvoiceIssuer::new(store.clone(), config.business.clone());
        Ok(Some(Self::new(store, gateway, invoices)))
    }

    #[tracing::instrument(skip(self, request), fields(transaction_id = %request.transaction_id))]
    pub async fn charge(&self, request: &PaymentRequest) -> Result<PaymentResult, AppError> {
        if request.transaction_id.trim().is_empty() {
            return Err(AppError::BadRequest("transaction_id is required".to_string()));
        }

        if let Some(existing) = self.store.find_transaction(&request.transaction_id).await? {
            return replay(&existing);
        }

        let pending = NewPaymentTransaction {
            transaction_id: request.transaction_id.clone(),
            rental_id: request.rental_id,
            customer_id: request.customer_id,
            amount: request.amount.clone(),
            currency: request.currency.clone(),
        };

        if self.store.insert_pending_transaction(&pending).await?.is_none() {
            // Another caller inserted the same id between our lookup and insert.
            let existing = self
                .store
                .find_transaction(&request.transaction_id)
                .await?
                .ok_or_else(|| {
                    AppError::InternalError(format!(
                        "transaction {} vanished after insert conflict",
                        request.transaction_id
                    ))
                })?;
            return replay(&existing);
        }

        if let PaymentMethod::Token { token } = &request.method {
            tracing::debug!("Charging stored token {}", token_fingerprint(token));
        }

        let gateway_request = GatewayChargeRequest {
            amount: &request.amount,
            currency: &request.currency,
            customer_identifier: request.customer_identifier.as_deref(),
            description: &request.description,
            method: &request.method,
        };

        let result = match self.gateway.charge(&gateway_request).await {
            Ok(result) => result,
            Err(e) => unreachable_gateway(e),
        };

        let outcome = TransactionOutcome {
            status: if result.success {
                TransactionStatus::Success
            } else {
                TransactionStatus::Failed
            },
            gateway_transaction_id: result.gateway_transaction_id.clone(),
            error_message: result.error_message.clone(),
            gateway_response: result.raw_response.clone(),
        };

        // On failure the row stays pending, which blocks automatic retries.
        self.store
            .complete_transaction(&request.transaction_id, &outcome)
            .await
            .with_context(|| {
                format!(
                    "gateway outcome for {} could not be recorded",
                    request.transaction_id
                )
            })?;

        let mut invoice_number = None;
        if result.success {
            self.refresh_token(request, &result).await;
            invoice_number = self
                .invoices
                .issue(
                    &request.transaction_id,
                    request.rental_id,
                    request.customer_id,
                    &request.amount,
                    &request.currency,
                )
                .await
                .map(|invoice| invoice.invoice_number);
        }

        Ok(PaymentResult {
            transaction_id: request.transaction_id.clone(),
            status: outcome.status,
            success: result.success,
            gateway_transaction_id: result.gateway_transaction_id,
            error_message: result.error_message,
            error_code: result.error_code,
            invoice_number,
            replayed: false,
        })
    }

    async fn refresh_token(&self, request: &PaymentRequest, result: &ChargeResult) {
        let (Some(customer_id), Some(token)) = (request.customer_id, &result.renewed_token) else {
            return;
        };

        let renewed = RenewedToken {
            token: token.clone(),
            last4: result.card_last4.clone(),
            expiry: result.card_expiry.clone(),
        };

        match self.store.update_customer_token(customer_id, &renewed).await {
            Ok(()) => tracing::info!(
                "Stored renewed payment token {} for customer {}",
                token_fingerprint(token),
                customer_id
            ),
            Err(e) => tracing::error!(
                "Charge succeeded but renewed token for customer {} was not saved: {}",
                customer_id,
                e
            ),
        }
    }
}

fn replay(existing: &PaymentTransaction) -> Result<PaymentResult, AppError> {
    match existing.status {
        TransactionStatus::Pending => {
            tracing::warn!(
                "Transaction {} is pending from an earlier attempt; refusing to charge again",
                existing.transaction_id
            );
            Err(AppError::Conflict(format!(
                "transaction {} has an inconclusive earlier attempt",
                existing.transaction_id
            )))
        }
        TransactionStatus::Success | TransactionStatus::Failed => {
            tracing::info!(
                "Transaction {} already {}; returning stored outcome",
                existing.transaction_id,
                existing.status
            );
            Ok(PaymentResult::from_stored(existing))
        }
    }
}

/// Error code recorded when the gateway gave no usable answer.
pub const UNREACHABLE_GATEWAY: &str = "unreachable_gateway";

/// A gateway that could not be reached, or whose reply was unusable, is a failed charge.
fn unreachable_gateway(error: AppError) -> ChargeResult {
    let message = error.to_string();
    ChargeResult {
        success: false,
        gateway_transaction_id: None,
        renewed_token: None,
        card_last4: None,
        card_expiry: None,
        error_message: Some(message.clone()),
        error_code: Some(UNREACHABLE_GATEWAY.to_string()),
        raw_response: json!({ "code": UNREACHABLE_GATEWAY, "error": message }),
    }
}
