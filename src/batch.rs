use crate::calendar::CalendarGate;
use crate::calls::{CallOrchestrator, CallOutcome};
use crate::charges::{ChargeOrchestrator, ChargeOutcome};
use crate::config::Config;
use crate::db_storage::SettlementStore;
use crate::errors::AppError;
use crate::models::Rental;
use crate::overdue::{start_of_local_day, today_local};
use crate::payments::PaymentService;
use crate::telephony_client::TelephonyClient;
use bigdecimal::BigDecimal;
use chrono::NaiveDate;
use futures::stream::{self, StreamExt};
use serde::Serialize;
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;
use tracing::Instrument;
use uuid::Uuid;

pub const DEFAULT_CONCURRENCY: usize = 4;

/// Which pipelines a run drives.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum BatchMode {
    Charges,
    Calls,
    All,
}

impl BatchMode {
    pub fn includes_charges(self) -> bool {
        matches!(self, BatchMode::Charges | BatchMode::All)
    }

    pub fn includes_calls(self) -> bool {
        matches!(self, BatchMode::Calls | BatchMode::All)
    }
}

impl FromStr for BatchMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "charges" => Ok(BatchMode::Charges),
            "calls" => Ok(BatchMode::Calls),
            "all" | "both" => Ok(BatchMode::All),
            other => Err(format!(
                "unknown mode '{}', expected charges, calls or all",
                other
            )),
        }
    }
}

impl fmt::Display for BatchMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            BatchMode::Charges => "charges",
            BatchMode::Calls => "calls",
            BatchMode::All => "all",
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Pipeline {
    Charge,
    Call,
}

/// One line of the batch report.
#[derive(Debug, Clone, Serialize)]
pub struct RentalResult {
    pub rental_id: Uuid,
    pub pipeline: Pipeline,
    pub status: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub amount: Option<BigDecimal>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub campaign_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl RentalResult {
    fn from_charge(rental_id: Uuid, outcome: &ChargeOutcome) -> Self {
        Self {
            rental_id,
            pipeline: Pipeline::Charge,
            status: outcome.status().to_string(),
            amount: outcome.amount().cloned(),
            campaign_id: None,
            error: outcome.error().map(str::to_string),
        }
    }

    fn from_call(rental_id: Uuid, outcome: &CallOutcome) -> Self {
        let (campaign_id, error) = match outcome {
            CallOutcome::CallPlaced { campaign_id } => (Some(campaign_id.clone()), None),
            CallOutcome::CallFailed { error } => (None, Some(error.clone())),
            _ => (None, None),
        };
        Self {
            rental_id,
            pipeline: Pipeline::Call,
            status: outcome.status().to_string(),
            amount: None,
            campaign_id,
            error,
        }
    }

    fn from_error(rental_id: Uuid, pipeline: Pipeline, error: &AppError) -> Self {
        Self {
            rental_id,
            pipeline,
            status: "error".to_string(),
            amount: None,
            campaign_id: None,
            error: Some(error.to_string()),
        }
    }

    fn is_successful(&self) -> bool {
        self.status == "charged" || self.status == "call_placed"
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct BatchSummary {
    pub success: bool,
    pub mode: BatchMode,
    pub skipped: bool,
    /// Number of result entries (one per rental per pipeline).
    pub processed: usize,
    /// Entries that ended `charged` or `call_placed`.
    pub successful: usize,
    pub results: Vec<RentalResult>,
}

/// Single result reported when a run fails as a whole.
#[derive(Debug, Clone, Serialize)]
pub struct BatchFailure {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub mode: Option<BatchMode>,
    pub error: String,
    /// The run was refused before any rental was touched.
    pub configuration: bool,
}

impl BatchFailure {
    pub fn new(mode: Option<BatchMode>, err: &AppError) -> Self {
        Self {
            success: false,
            mode,
            error: err.to_string(),
            configuration: err.is_configuration(),
        }
    }
}

/// Top-level entry point for the daily settlement run.
///
/// A run is: configuration check, calendar gate, one selector query, then
/// every selected rental through the requested pipelines with bounded
/// parallelism. Per-rental failures are reported in the summary and never
/// stop the run; only configuration errors and a failed selector query do.
/// Re-running on the same day is safe because every pipeline claims its
/// per-day row in the store before touching an external service.
pub struct BatchRunner {
    store: Arc<dyn SettlementStore>,
    calendar: CalendarGate,
    charges: Option<ChargeOrchestrator>,
    calls: Option<CallOrchestrator>,
    concurrency: usize,
}

impl BatchRunner {
    pub fn new(
        store: Arc<dyn SettlementStore>,
        calendar: CalendarGate,
        charges: Option<ChargeOrchestrator>,
        calls: Option<CallOrchestrator>,
    ) -> Self {
        Self {
            store,
            calendar,
            charges,
            calls,
            concurrency: DEFAULT_CONCURRENCY,
        }
    }

    pub fn with_concurrency(mut self, concurrency: usize) -> Self {
        self.concurrency = concurrency.max(1);
        self
    }

    /// Wires every collaborator from configuration. Missing gateway or
    /// telephony credentials leave that pipeline unavailable.
    pub fn from_config(config: &Config, store: Arc<dyn SettlementStore>) -> Result<Self, AppError> {
        let calendar = CalendarGate::new(&config.calendar)?;

        let charges = PaymentService::from_config(config, store.clone())?
            .map(|payments| ChargeOrchestrator::new(store.clone(), payments));

        let calls = match &config.telephony {
            Some(telephony) => {
                let client =
                    TelephonyClient::new(telephony, Duration::from_secs(config.http_timeout_secs))?;
                Some(CallOrchestrator::new(
                    store.clone(),
                    client,
                    config.message_locale,
                ))
            }
            None => None,
        };

        Ok(Self::new(store, calendar, charges, calls).with_concurrency(config.batch_concurrency))
    }

    pub async fn run(&self, mode: BatchMode) -> Result<BatchSummary, AppError> {
        self.run_on(today_local(), mode).await
    }

    pub async fn run_on(&self, today: NaiveDate, mode: BatchMode) -> Result<BatchSummary, AppError> {
        self.check_configuration(mode)?;

        tracing::info!("Starting overdue settlement run for {} (mode: {})", today, mode);

        if self.calendar.should_skip(today).await {
            tracing::info!("{} is not a processing day; nothing to do", today);
            return Ok(BatchSummary {
                success: true,
                mode,
                skipped: true,
                processed: 0,
                successful: 0,
                results: Vec::new(),
            });
        }

        let rentals = self
            .store
            .find_overdue_rentals(start_of_local_day(today))
            .await?;

        tracing::info!("Found {} overdue rental(s)", rentals.len());

        let mut jobs: Vec<(usize, Pipeline)> = Vec::new();
        for (rental_index, _) in rentals.iter().enumerate() {
            if mode.includes_charges() {
                jobs.push((rental_index, Pipeline::Charge));
            }
            if mode.includes_calls() {
                jobs.push((rental_index, Pipeline::Call));
            }
        }

        let rentals = &rentals;
        let mut indexed: Vec<(usize, RentalResult)> = stream::iter(jobs.into_iter().enumerate())
            .map(|(index, (rental_index, pipeline))| async move {
                let rental: &Rental = &rentals[rental_index];
                let span = tracing::info_span!(
                    "rental",
                    rental_id = %rental.id,
                    pipeline = ?pipeline
                );
                let result = self
                    .process_rental(rental, pipeline, today)
                    .instrument(span)
                    .await;
                (index, result)
            })
            .buffer_unordered(self.concurrency)
            .collect()
            .await;
        indexed.sort_by_key(|(index, _)| *index);

        let results: Vec<RentalResult> = indexed.into_iter().map(|(_, result)| result).collect();
        let successful = results.iter().filter(|r| r.is_successful()).count();
        let errors = results.iter().filter(|r| r.status == "error").count();

        tracing::info!(
            "✓ Settlement run finished: {} result(s), {} successful, {} error(s)",
            results.len(),
            successful,
            errors
        );

        Ok(BatchSummary {
            success: true,
            mode,
            skipped: false,
            processed: results.len(),
            successful,
            results,
        })
    }

    fn check_configuration(&self, mode: BatchMode) -> Result<(), AppError> {
        if mode.includes_charges() && self.charges.is_none() {
            return Err(AppError::Configuration(
                "card gateway is not configured (GATEWAY_URL, GATEWAY_TERMINAL, GATEWAY_USER, GATEWAY_PASSWORD)"
                    .to_string(),
            ));
        }
        if mode.includes_calls() && self.calls.is_none() {
            return Err(AppError::Configuration(
                "telephony is not configured (TELEPHONY_URL, TELEPHONY_USER, TELEPHONY_PASSWORD, TELEPHONY_TEMPLATE_ID)"
                    .to_string(),
            ));
        }
        Ok(())
    }

    async fn process_rental(&self, rental: &Rental, pipeline: Pipeline, today: NaiveDate) -> RentalResult {
        let result = match pipeline {
            Pipeline::Charge => match &self.charges {
                Some(charges) => charges
                    .process(rental, today)
                    .await
                    .map(|outcome| RentalResult::from_charge(rental.id, &outcome)),
                None => Err(AppError::Configuration("card gateway is not configured".to_string())),
            },
            Pipeline::Call => match &self.calls {
                Some(calls) => calls
                    .process(rental, today)
                    .await
                    .map(|outcome| RentalResult::from_call(rental.id, &outcome)),
                None => Err(AppError::Configuration("telephony is not configured".to_string())),
            },
        };

        result.unwrap_or_else(|e| {
            tracing::error!("✗ Rental {} {:?} pipeline error: {}", rental.id, pipeline, e);
            RentalResult::from_error(rental.id, pipeline, &e)
        })
    }
}
