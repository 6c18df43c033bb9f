use crate::config::CalendarConfig;
use crate::errors::AppError;
use chrono::{Datelike, NaiveDate, Weekday};
use moka::future::Cache;
use serde_json::Value;
use std::time::Duration;

/// Decides whether the settlement batch may run on a given day.
///
/// A day is skipped when it is the weekly rest day or when the calendar
/// service flags any item on that date as a day of festivity. Holiday
/// lookups fail open: an unreachable calendar never stops billing.
#[derive(Clone)]
pub struct CalendarGate {
    client: reqwest::Client,
    base_url: String,
    locale: String,
    rest_day: Weekday,
    /// Successful holiday verdicts per date (6 hour TTL). Failures are never cached.
    holidays: Cache<NaiveDate, bool>,
}

impl CalendarGate {
    pub fn new(config: &CalendarConfig) -> Result<Self, AppError> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|e| {
                AppError::ExternalApiError(format!("Failed to create calendar client: {}", e))
            })?;

        Ok(Self {
            client,
            base_url: config.base_url.clone(),
            locale: config.locale.clone(),
            rest_day: config.rest_day,
            holidays: Cache::builder()
                .time_to_live(Duration::from_secs(6 * 3600))
                .max_capacity(64)
                .build(),
        })
    }

    pub async fn should_skip(&self, day: NaiveDate) -> bool {
        if self.is_rest_day(day) {
            tracing::info!("{} is the weekly rest day ({:?}); skipping", day, self.rest_day);
            return true;
        }

        if self.is_holiday(day).await {
            tracing::info!("{} is flagged as a holiday; skipping", day);
            return true;
        }

        false
    }

    pub fn is_rest_day(&self, day: NaiveDate) -> bool {
        day.weekday() == self.rest_day
    }

    async fn is_holiday(&self, day: NaiveDate) -> bool {
        if let Some(cached) = self.holidays.get(&day).await {
            tracing::debug!("Holiday verdict for {} served from cache: {}", day, cached);
            return cached;
        }

        match self.fetch_holiday_flag(day).await {
            Ok(flag) => {
                self.holidays.insert(day, flag).await;
                flag
            }
            Err(e) => {
                tracing::warn!(
                    "Calendar lookup for {} failed, treating as a regular day: {}",
                    day,
                    e
                );
                false
            }
        }
    }

    async fn fetch_holiday_flag(&self, day: NaiveDate) -> Result<bool, AppError> {
        let date = day.format("%Y-%m-%d").to_string();
        let url = url::Url::parse_with_params(
            &self.base_url,
            &[
                ("v", "1"),
                ("cfg", "json"),
                ("maj", "on"),
                ("min", "on"),
                ("mod", "on"),
                ("i", "on"),
                ("lg", self.locale.as_str()),
                ("start", date.as_str()),
                ("end", date.as_str()),
            ],
        )
        .map_err(|e| AppError::ExternalApiError(format!("Failed to build calendar URL: {}", e)))?;

        let response = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|e| AppError::ExternalApiError(format!("Calendar request failed: {}", e)))?;

        if !response.status().is_success() {
            return Err(AppError::ExternalApiError(format!(
                "Calendar returned {}",
                response.status()
            )));
        }

        let body: Value = response.json().await.map_err(|e| {
            AppError::ExternalApiError(format!("Failed to parse calendar response: {}", e))
        })?;

        Ok(has_festivity(&body, day))
    }
}

/// True when any item dated `day` carries the festivity flag.
pub fn has_festivity(body: &Value, day: NaiveDate) -> bool {
    let date = day.format("%Y-%m-%d").to_string();
    body.get("items")
        .and_then(|items| items.as_array())
        .map(|items| {
            items.iter().any(|item| {
                let same_day = item
                    .get("date")
                    .and_then(|d| d.as_str())
                    .map(|d| d.starts_with(&date))
                    .unwrap_or(false);
                let festive = item
                    .get("yomtov")
                    .and_then(|y| y.as_bool())
                    .unwrap_or(false);
                same_day && festive
            })
        })
        .unwrap_or(false)
}
