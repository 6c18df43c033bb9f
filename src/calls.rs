use crate::db_storage::SettlementStore;
use crate::errors::AppError;
use crate::models::{CallSubject, CallType, NewCallLog, Rental};
use crate::overdue::{count_overdue_days, local_date};
use crate::telephony_client::TelephonyClient;
use chrono::NaiveDate;
use phonenumber::country::Id as CountryId;
use phonenumber::Mode;
use serde::Serialize;
use std::str::FromStr;
use std::sync::Arc;

/// Language of the spoken reminder.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum MessageLocale {
    #[default]
    Hebrew,
    English,
}

impl FromStr for MessageLocale {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "he" | "iw" | "hebrew" => Ok(MessageLocale::Hebrew),
            "en" | "english" => Ok(MessageLocale::English),
            other => Err(format!("unsupported message locale '{}'", other)),
        }
    }
}

/// Per-rental result of the reminder-call pipeline.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum CallOutcome {
    NoSimItem,
    AlreadyCalled,
    CallPlaced { campaign_id: String },
    CallFailed { error: String },
}

impl CallOutcome {
    pub fn status(&self) -> &'static str {
        match self {
            CallOutcome::NoSimItem => "no_sim_item",
            CallOutcome::AlreadyCalled => "already_called",
            CallOutcome::CallPlaced { .. } => "call_placed",
            CallOutcome::CallFailed { .. } => "call_failed",
        }
    }
}

/// Places at most one automatic reminder call per SIM rental per day.
#[derive(Clone)]
pub struct CallOrchestrator {
    store: Arc<dyn SettlementStore>,
    telephony: TelephonyClient,
    locale: MessageLocale,
}

impl CallOrchestrator {
    pub fn new(
        store: Arc<dyn SettlementStore>,
        telephony: TelephonyClient,
        locale: MessageLocale,
    ) -> Self {
        Self {
            store,
            telephony,
            locale,
        }
    }

    pub async fn process(&self, rental: &Rental, today: NaiveDate) -> Result<CallOutcome, AppError> {
        if !rental.has_sim_item {
            tracing::debug!("Rental {} has no SIM item; no reminder call", rental.id);
            return Ok(CallOutcome::NoSimItem);
        }

        let subject = CallSubject::Rental(rental.id);
        if self.store.find_automatic_call(subject, today).await?.is_some() {
            tracing::debug!("Rental {} already called on {}", rental.id, today);
            return Ok(CallOutcome::AlreadyCalled);
        }

        let customer = self
            .store
            .get_customer(rental.customer_id)
            .await?
            .ok_or_else(|| {
                AppError::NotFound(format!("customer {} for rental {}", rental.customer_id, rental.id))
            })?;

        let raw_phone = customer
            .phone
            .as_deref()
            .filter(|p| !p.trim().is_empty())
            .ok_or_else(|| AppError::BadRequest(format!("customer {} has no phone number", customer.id)))?;
        let phone = normalize_phone(raw_phone).ok_or_else(|| {
            AppError::BadRequest(format!("customer {} phone has no digits", customer.id))
        })?;

        // Calls remind from the first day after the due date; grace applies to charging only.
        let days = count_overdue_days(local_date(rental.end_date), today, None).total;
        let message = compose_reminder(self.locale, &rental.customer_name, days);

        let claim = NewCallLog {
            subject,
            customer_id: customer.id,
            phone: phone.clone(),
            call_type: CallType::Automatic,
            message: message.clone(),
            call_date: today,
        };
        let Some(call_id) = self.store.claim_call_log(&claim).await? else {
            tracing::info!("Rental {} call claimed by a concurrent run", rental.id);
            return Ok(CallOutcome::AlreadyCalled);
        };

        let outcome = match self.telephony.run_campaign(&phone, &message).await {
            Ok(response) => match response.campaign_id {
                Some(campaign_id) => CallOutcome::CallPlaced { campaign_id },
                None => CallOutcome::CallFailed {
                    error: response
                        .error
                        .unwrap_or_else(|| "no campaign id returned".to_string()),
                },
            },
            Err(e) => {
                tracing::error!("✗ Reminder call for rental {} failed: {}", rental.id, e);
                CallOutcome::CallFailed {
                    error: e.to_string(),
                }
            }
        };

        match &outcome {
            CallOutcome::CallPlaced { campaign_id } => {
                self.store
                    .record_call_result(call_id, Some(campaign_id), None)
                    .await?
            }
            CallOutcome::CallFailed { error } => {
                self.store
                    .record_call_result(call_id, None, Some(error))
                    .await?
            }
            _ => {}
        }

        Ok(outcome)
    }
}

/// Normalizes a phone number to the digits the telephony API dials.
///
/// Parseable Israeli numbers are rendered in national format first, so
/// `+972-52-555-1234` and `052-555-1234` both become `0525551234`. Anything
/// else is reduced to its digits.
pub fn normalize_phone(raw: &str) -> Option<String> {
    let national = phonenumber::parse(Some(CountryId::IL), raw)
        .ok()
        .filter(phonenumber::is_valid)
        .map(|number| number.format().mode(Mode::National).to_string());

    let digits: String = national
        .as_deref()
        .unwrap_or(raw)
        .chars()
        .filter(|c| c.is_ascii_digit())
        .collect();

    if digits.is_empty() {
        None
    } else {
        Some(digits)
    }
}

pub fn compose_reminder(locale: MessageLocale, customer_name: &str, days_overdue: i64) -> String {
    let name = customer_name.trim();
    match locale {
        MessageLocale::Hebrew => format!(
            "שלום {}, תקופת השכירות של ציוד הסלולר הסתיימה לפני {} ימים. נא להחזיר את הציוד או ליצור קשר עם החנות.",
            name, days_overdue
        ),
        MessageLocale::English => format!(
            "Hello {}, your cellular equipment rental ended {} day{} ago. Please return the equipment or contact the shop.",
            name,
            days_overdue,
            if days_overdue == 1 { "" } else { "s" }
        ),
    }
}
