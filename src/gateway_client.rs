use crate::circuit_breaker::{create_gateway_circuit_breaker, GatewayCircuitBreaker};
use crate::config::GatewayConfig;
use crate::errors::AppError;
use bigdecimal::{BigDecimal, ToPrimitive, Zero};
use failsafe::futures::CircuitBreaker;
use regex::Regex;
use serde_json::{json, Map, Value};
use sha2::{Digest, Sha256};
use std::fmt;
use std::sync::OnceLock;
use std::time::Duration;

/// Status code the gateway returns in the body for an approved charge.
pub const SUCCESS_STATUS_CODE: &str = "000";

/// Replacement for every credential value before logging or storage.
pub const REDACTED: &str = "****";

const SENSITIVE_KEYS: &[&str] = &["password", "creditcard", "cvv2", "cvv", "token"];

/// How the card is presented to the gateway.
#[derive(Clone)]
pub enum PaymentMethod {
    /// Previously stored gateway token.
    Token { token: String },
    /// Raw card entry. Expiry is `MMYY`, separators are tolerated.
    Card {
        number: String,
        expiry: String,
        cvv: String,
    },
}

impl PaymentMethod {
    pub fn mode(&self) -> &'static str {
        match self {
            PaymentMethod::Token { .. } => "token",
            PaymentMethod::Card { .. } => "card",
        }
    }
}

impl fmt::Debug for PaymentMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PaymentMethod::Token { token } => f
                .debug_struct("Token")
                .field("fingerprint", &token_fingerprint(token))
                .finish(),
            PaymentMethod::Card { number, .. } => f
                .debug_struct("Card")
                .field("last4", &last_digits(number, 4))
                .finish_non_exhaustive(),
        }
    }
}

/// One charge as the gateway sees it.
#[derive(Debug)]
pub struct GatewayChargeRequest<'a> {
    pub amount: &'a BigDecimal,
    pub currency: &'a str,
    /// Internal customer identifier; forwarded only when purely numeric.
    pub customer_identifier: Option<&'a str>,
    pub description: &'a str,
    pub method: &'a PaymentMethod,
}

/// Classified gateway response.
#[derive(Debug, Clone)]
pub struct ChargeResult {
    pub success: bool,
    pub gateway_transaction_id: Option<String>,
    pub renewed_token: Option<String>,
    pub card_last4: Option<String>,
    pub card_expiry: Option<String>,
    pub error_message: Option<String>,
    pub error_code: Option<String>,
    /// Full gateway body with credentials redacted; unknown fields pass through.
    pub raw_response: Value,
}

/// Client for the external card gateway.
///
/// A narrow adapter: it translates a charge into the gateway's JSON wire
/// format, classifies the reply, and nothing else. Idempotency and
/// persistence live in [`crate::payments::PaymentService`].
#[derive(Clone)]
pub struct CardGatewayClient {
    client: reqwest::Client,
    base_url: String,
    terminal: String,
    user: String,
    password: String,
    breaker: GatewayCircuitBreaker,
}

impl CardGatewayClient {
    /// Creates a new `CardGatewayClient`.
    ///
    /// # Arguments
    ///
    /// * `config` - Gateway endpoint and terminal credentials.
    /// * `timeout` - Per-request timeout; a charge never blocks longer than this.
    pub fn new(config: &GatewayConfig, timeout: Duration) -> Result<Self, AppError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| {
                AppError::ExternalApiError(format!("Failed to create gateway client: {}", e))
            })?;

        Ok(Self {
            client,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            terminal: config.terminal.clone(),
            user: config.user.clone(),
            password: config.password.clone(),
            breaker: create_gateway_circuit_breaker(),
        })
    }

    /// Builds the JSON body for a debit request.
    pub fn build_request_body(&self, request: &GatewayChargeRequest<'_>) -> Result<Value, AppError> {
        let mut body = Map::new();
        body.insert("terminalNumber".to_string(), json!(self.terminal));
        body.insert("user".to_string(), json!(self.user));
        body.insert("password".to_string(), json!(self.password));
        body.insert("total".to_string(), json!(to_minor_units(request.amount)?));
        body.insert(
            "currency".to_string(),
            json!(gateway_currency_code(request.currency)?),
        );
        body.insert(
            "id".to_string(),
            json!(numeric_customer_id(request.customer_identifier.unwrap_or(""))),
        );
        body.insert("paramX".to_string(), json!(request.description));

        match request.method {
            PaymentMethod::Token { token } => {
                body.insert("token".to_string(), json!(token));
            }
            PaymentMethod::Card {
                number,
                expiry,
                cvv,
            } => {
                let digits: String = expiry.chars().filter(|c| c.is_ascii_digit()).collect();
                if digits.len() != 4 {
                    return Err(AppError::BadRequest(
                        "Card expiry must be MMYY".to_string(),
                    ));
                }
                body.insert("creditCard".to_string(), json!(number.replace([' ', '-'], "")));
                body.insert("creditCardDateMmYy".to_string(), json!(digits));
                body.insert("cvv2".to_string(), json!(cvv));
            }
        }

        Ok(Value::Object(body))
    }

    /// Sends one debit to the gateway and classifies the reply.
    ///
    /// Transport failures, non-2xx statuses and non-JSON bodies are errors and
    /// count against the circuit breaker. A decline is `Ok` with `success == false`.
    pub async fn charge(&self, request: &GatewayChargeRequest<'_>) -> Result<ChargeResult, AppError> {
        let body = self.build_request_body(request)?;
        let url = format!("{}/DebitRegularType", self.base_url);

        tracing::info!(
            amount = %request.amount,
            currency = request.currency,
            mode = request.method.mode(),
            "Sending charge to card gateway"
        );
        tracing::debug!("Gateway request body: {}", redact_payload(&body));

        let call = async {
            let response = self
                .client
                .post(&url)
                .json(&body)
                .send()
                .await
                .map_err(|e| AppError::ExternalApiError(format!("Gateway request failed: {}", e)))?;

            if !response.status().is_success() {
                let status = response.status();
                let error_text = response
                    .text()
                    .await
                    .unwrap_or_else(|_| "Unknown error".to_string());
                return Err(AppError::ExternalApiError(format!(
                    "Gateway returned {}: {}",
                    status, error_text
                )));
            }

            let text = response.text().await.map_err(|e| {
                AppError::ExternalApiError(format!("Failed to read gateway response: {}", e))
            })?;

            serde_json::from_str::<Value>(&text).map_err(|e| {
                AppError::ExternalApiError(format!("Malformed gateway response: {}", e))
            })
        };

        let raw = match self.breaker.call(call).await {
            Ok(raw) => raw,
            Err(failsafe::Error::Inner(e)) => {
                tracing::error!("✗ Card gateway call failed: {}", e);
                return Err(e);
            }
            Err(failsafe::Error::Rejected) => {
                tracing::warn!("Card gateway circuit open; failing charge without a request");
                return Err(AppError::ExternalApiError(
                    "payment gateway circuit open".to_string(),
                ));
            }
        };

        let result = classify_response(raw);
        if result.success {
            tracing::info!(
                gateway_transaction_id = ?result.gateway_transaction_id,
                token_renewed = result.renewed_token.is_some(),
                "✓ Charge approved"
            );
        } else {
            tracing::warn!(
                error_code = ?result.error_code,
                error_message = ?result.error_message,
                "Charge declined"
            );
        }

        Ok(result)
    }
}

/// Classifies a gateway body by its status code; everything but the sentinel is a failure.
pub fn classify_response(raw: Value) -> ChargeResult {
    let status_code = raw.get("StatusCode").and_then(value_as_string);
    let success = status_code.as_deref() == Some(SUCCESS_STATUS_CODE);
    let data = raw.get("ResultData");

    let field = |name: &str| {
        data.and_then(|d| d.get(name))
            .and_then(value_as_string)
            .filter(|s| !s.trim().is_empty())
    };

    let gateway_transaction_id = field("TransactionId").or_else(|| field("DebitApproveNumber"));
    let renewed_token = if success { field("Token") } else { None };
    let card_last4 = field("CreditCardNumber").and_then(|masked| last_digits(&masked, 4));
    let card_expiry = field("CreditCardExpDate");

    let (error_message, error_code) = if success {
        (None, None)
    } else {
        let message = raw
            .get("ErrorMessage")
            .and_then(value_as_string)
            .filter(|s| !s.trim().is_empty())
            .unwrap_or_else(|| match &status_code {
                Some(code) => format!("Gateway declined with status {}", code),
                None => "Gateway response missing status code".to_string(),
            });
        (Some(message), status_code.clone())
    };

    ChargeResult {
        success,
        gateway_transaction_id,
        renewed_token,
        card_last4,
        card_expiry,
        error_message,
        error_code,
        raw_response: redact_payload(&raw),
    }
}

/// Converts a major-unit amount into the gateway's minor-unit string.
pub fn to_minor_units(amount: &BigDecimal) -> Result<String, AppError> {
    if amount <= &BigDecimal::zero() {
        return Err(AppError::BadRequest(format!(
            "Charge amount must be positive, got {}",
            amount
        )));
    }

    (amount * BigDecimal::from(100))
        .round(0)
        .to_i64()
        .map(|minor| minor.to_string())
        .ok_or_else(|| AppError::BadRequest(format!("Charge amount out of range: {}", amount)))
}

/// Maps an ISO currency to the gateway's numeric code. Blank means local currency.
pub fn gateway_currency_code(currency: &str) -> Result<&'static str, AppError> {
    match currency.trim().to_ascii_uppercase().as_str() {
        "" | "ILS" | "NIS" => Ok("1"),
        "USD" => Ok("2"),
        "EUR" => Ok("978"),
        other => Err(AppError::BadRequest(format!(
            "Unsupported gateway currency: {}",
            other
        ))),
    }
}

/// The gateway accepts only a short purely numeric merchant-side id;
/// anything else is sent as an empty string.
pub fn numeric_customer_id(identifier: &str) -> String {
    static NUMERIC_ID: OnceLock<Regex> = OnceLock::new();
    let re = NUMERIC_ID.get_or_init(|| Regex::new(r"^[0-9]{1,9}$").expect("static regex"));

    let trimmed = identifier.trim();
    if re.is_match(trimmed) {
        trimmed.to_string()
    } else {
        String::new()
    }
}

/// Masks credential fields at any depth of a JSON payload.
pub fn redact_payload(value: &Value) -> Value {
    match value {
        Value::Object(map) => Value::Object(
            map.iter()
                .map(|(key, v)| {
                    let lowered = key.to_ascii_lowercase();
                    if SENSITIVE_KEYS.contains(&lowered.as_str()) && !v.is_null() {
                        (key.clone(), json!(REDACTED))
                    } else {
                        (key.clone(), redact_payload(v))
                    }
                })
                .collect(),
        ),
        Value::Array(items) => Value::Array(items.iter().map(redact_payload).collect()),
        other => other.clone(),
    }
}

/// Short SHA-256 fingerprint, the only form in which a token may appear in logs.
pub fn token_fingerprint(token: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(token.as_bytes());
    hex::encode(hasher.finalize())[..12].to_string()
}

fn last_digits(value: &str, n: usize) -> Option<String> {
    let digits: Vec<char> = value.chars().filter(|c| c.is_ascii_digit()).collect();
    if digits.len() < n {
        return None;
    }
    Some(digits[digits.len() - n..].iter().collect())
}

fn value_as_string(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}
