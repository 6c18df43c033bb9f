use crate::db_storage::SettlementStore;
use crate::errors::AppError;
use crate::gateway_client::PaymentMethod;
use crate::models::{NewOverdueCharge, OverdueChargeStatus, Rental};
use crate::overdue::{count_overdue_days, local_date, OverdueDays};
use crate::payments::{PaymentRequest, PaymentService};
use bigdecimal::{BigDecimal, Zero};
use chrono::{NaiveDate, Utc};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use uuid::Uuid;

pub const REASON_NO_TOKEN: &str = "no token";
pub const REASON_AUTO_CHARGE_DISABLED: &str = "auto-charge disabled";
const REASON_CHARGING: &str = "charging";

/// Terminal result of the charge pipeline for one rental on one day.
#[derive(Debug, Clone, PartialEq)]
pub enum ChargeOutcome {
    /// Still inside the grace window. Nothing is written.
    GracePeriod(OverdueDays),
    AlreadyProcessed,
    /// Recorded as a `pending` row with the reason; no charge attempted.
    NoToken { reason: &'static str },
    Charged {
        amount: BigDecimal,
        transaction_id: String,
    },
    Failed { amount: BigDecimal, error: String },
}

impl ChargeOutcome {
    pub fn status(&self) -> &'static str {
        match self {
            ChargeOutcome::GracePeriod(_) => "grace_period",
            ChargeOutcome::AlreadyProcessed => "already_processed",
            ChargeOutcome::NoToken { .. } => "no_token",
            ChargeOutcome::Charged { .. } => "charged",
            ChargeOutcome::Failed { .. } => "failed",
        }
    }

    pub fn amount(&self) -> Option<&BigDecimal> {
        match self {
            ChargeOutcome::Charged { amount, .. } | ChargeOutcome::Failed { amount, .. } => {
                Some(amount)
            }
            _ => None,
        }
    }

    pub fn error(&self) -> Option<&str> {
        match self {
            ChargeOutcome::Failed { error, .. } => Some(error),
            ChargeOutcome::NoToken { reason } => Some(reason),
            _ => None,
        }
    }
}

/// Builds the idempotency key for one overdue charge attempt.
///
/// Format: `overdue-{rental_id}-{YYYY-MM-DD}-{counter}` where the counter is
/// the current time in microseconds followed by a process-local sequence.
pub fn overdue_transaction_id(rental_id: Uuid, day: NaiveDate) -> String {
    static SEQUENCE: AtomicU64 = AtomicU64::new(0);

    let micros = Utc::now().timestamp_micros();
    let seq = SEQUENCE.fetch_add(1, Ordering::Relaxed) % 10_000;
    format!(
        "overdue-{}-{}-{}{:04}",
        rental_id,
        day.format("%Y-%m-%d"),
        micros,
        seq
    )
}

/// Charges each overdue rental its daily rate at most once per day.
#[derive(Clone)]
pub struct ChargeOrchestrator {
    store: Arc<dyn SettlementStore>,
    payments: PaymentService,
}

impl ChargeOrchestrator {
    pub fn new(store: Arc<dyn SettlementStore>, payments: PaymentService) -> Self {
        Self { store, payments }
    }

    pub async fn process(&self, rental: &Rental, today: NaiveDate) -> Result<ChargeOutcome, AppError> {
        let days = count_overdue_days(local_date(rental.end_date), today, rental.overdue_grace_days);
        if !days.is_chargeable() {
            tracing::debug!(
                "Rental {} inside grace window ({} of {} days)",
                rental.id,
                days.total,
                days.grace
            );
            return Ok(ChargeOutcome::GracePeriod(days));
        }

        if self.store.find_overdue_charge(rental.id, today).await?.is_some() {
            tracing::debug!("Rental {} already has a charge row for {}", rental.id, today);
            return Ok(ChargeOutcome::AlreadyProcessed);
        }

        let rate = rental
            .overdue_daily_rate
            .clone()
            .filter(|rate| rate > &BigDecimal::zero())
            .ok_or_else(|| {
                AppError::BadRequest(format!("rental {} has no positive daily rate", rental.id))
            })?;

        let days_overdue = i32::try_from(days.effective).map_err(|_| {
            AppError::InternalError(format!(
                "rental {} overdue day count out of range: {}",
                rental.id, days.effective
            ))
        })?;

        let customer = self
            .store
            .get_customer(rental.customer_id)
            .await?
            .ok_or_else(|| {
                AppError::NotFound(format!("customer {} for rental {}", rental.customer_id, rental.id))
            })?;

        let claim = |status: OverdueChargeStatus, reason: &str| NewOverdueCharge {
            rental_id: rental.id,
            customer_id: customer.id,
            charge_date: today,
            days_overdue,
            amount: rate.clone(),
            currency: rental.currency.clone(),
            status,
            error_message: Some(reason.to_string()),
        };

        let token = match customer.stored_token() {
            Some(token) if rental.auto_charge_enabled => token.to_string(),
            stored => {
                let reason = if rental.auto_charge_enabled || stored.is_none() {
                    REASON_NO_TOKEN
                } else {
                    REASON_AUTO_CHARGE_DISABLED
                };
                let recorded = self
                    .store
                    .claim_overdue_charge(&claim(OverdueChargeStatus::Pending, reason))
                    .await?;
                if recorded.is_none() {
                    return Ok(ChargeOutcome::AlreadyProcessed);
                }
                tracing::info!("Rental {} not charged: {}", rental.id, reason);
                return Ok(ChargeOutcome::NoToken { reason });
            }
        };

        let Some(charge_id) = self
            .store
            .claim_overdue_charge(&claim(OverdueChargeStatus::Pending, REASON_CHARGING))
            .await?
        else {
            tracing::info!("Rental {} charge claimed by a concurrent run", rental.id);
            return Ok(ChargeOutcome::AlreadyProcessed);
        };

        let transaction_id = overdue_transaction_id(rental.id, today);
        let request = PaymentRequest {
            transaction_id: transaction_id.clone(),
            amount: rate.clone(),
            currency: rental.currency.clone(),
            customer_id: Some(customer.id),
            rental_id: Some(rental.id),
            customer_identifier: customer.national_id.clone(),
            description: format!("Overdue rental fee, {} day(s) past due", days.effective),
            method: PaymentMethod::Token { token },
        };

        tracing::info!(
            "Charging rental {} {} {} for {} overdue day(s)",
            rental.id,
            rate,
            rental.currency,
            days.effective
        );

        let outcome = match self.payments.charge(&request).await {
            Ok(result) if result.success => ChargeOutcome::Charged {
                amount: rate,
                transaction_id: transaction_id.clone(),
            },
            Ok(result) => ChargeOutcome::Failed {
                amount: rate,
                error: result
                    .error_message
                    .unwrap_or_else(|| "payment declined".to_string()),
            },
            Err(e) => ChargeOutcome::Failed {
                amount: rate,
                error: e.to_string(),
            },
        };

        match &outcome {
            ChargeOutcome::Charged { .. } => {
                self.store
                    .finalize_overdue_charge(
                        charge_id,
                        OverdueChargeStatus::Charged,
                        Some(&transaction_id),
                        None,
                    )
                    .await?;
                tracing::info!("✓ Rental {} charged ({})", rental.id, transaction_id);
            }
            ChargeOutcome::Failed { error, .. } => {
                // The payment may have failed before its row was written.
                let recorded = matches!(
                    self.store.find_transaction(&transaction_id).await,
                    Ok(Some(_))
                );
                self.store
                    .finalize_overdue_charge(
                        charge_id,
                        OverdueChargeStatus::Failed,
                        recorded.then_some(transaction_id.as_str()),
                        Some(error),
                    )
                    .await?;
                tracing::warn!("✗ Rental {} charge failed: {}", rental.id, error);
            }
            _ => {}
        }

        Ok(outcome)
    }
}
