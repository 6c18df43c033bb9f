use crate::config::TelephonyConfig;
use crate::errors::AppError;
use serde_json::Value;
use std::time::Duration;

/// Reply from the campaign API after defensive parsing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CampaignResponse {
    pub campaign_id: Option<String>,
    /// Set when no campaign id could be extracted.
    pub error: Option<String>,
}

/// Client for the text-to-speech telephony campaign API.
#[derive(Clone)]
pub struct TelephonyClient {
    client: reqwest::Client,
    base_url: String,
    user: String,
    password: String,
    template_id: String,
}

impl TelephonyClient {
    pub fn new(config: &TelephonyConfig, timeout: Duration) -> Result<Self, AppError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| {
                AppError::ExternalApiError(format!("Failed to create telephony client: {}", e))
            })?;

        Ok(Self {
            client,
            base_url: config.base_url.clone(),
            user: config.user.clone(),
            password: config.password.clone(),
            template_id: config.template_id.clone(),
        })
    }

    /// Starts a single-recipient voice campaign reading `message` to `phone`.
    ///
    /// Transport errors and non-2xx statuses are `Err`. A 2xx body without a
    /// recognizable campaign id is `Ok` with `error` set.
    pub async fn run_campaign(&self, phone: &str, message: &str) -> Result<CampaignResponse, AppError> {
        let auth = format!("{}:{}", self.user, self.password);

        tracing::info!("Starting telephony campaign for {}", phone);

        let response = self
            .client
            .get(&self.base_url)
            .query(&[
                ("token", auth.as_str()),
                ("phones", phone),
                ("ttsMessage", message),
                ("templateId", self.template_id.as_str()),
            ])
            .send()
            .await
            .map_err(|e| {
                // reqwest includes the URL in its error text; the query carries credentials.
                AppError::ExternalApiError(format!(
                    "Telephony request failed: {}",
                    e.without_url()
                ))
            })?;

        let status = response.status();
        let body = response.text().await.unwrap_or_default();

        if !status.is_success() {
            return Err(AppError::ExternalApiError(format!(
                "Telephony API returned {}: {}",
                status,
                snippet(&body)
            )));
        }

        let parsed = parse_campaign_response(&body);
        match &parsed.campaign_id {
            Some(id) => tracing::info!("✓ Telephony campaign {} started", id),
            None => tracing::warn!(
                "Telephony response had no campaign id: {}",
                snippet(&body)
            ),
        }
        Ok(parsed)
    }
}

/// Extracts a campaign id from whatever the campaign API returned.
///
/// Accepts a JSON `campaignId` (string or number), the same field nested under
/// `data`, a bare JSON scalar, or a plain-text identifier containing a digit.
pub fn parse_campaign_response(body: &str) -> CampaignResponse {
    let trimmed = body.trim();
    if trimmed.is_empty() {
        return CampaignResponse {
            campaign_id: None,
            error: Some("empty telephony response".to_string()),
        };
    }

    let campaign_id = match serde_json::from_str::<Value>(trimmed) {
        Ok(value) => campaign_id_from_json(&value),
        Err(_) => is_plain_identifier(trimmed).then(|| trimmed.to_string()),
    };

    match campaign_id {
        Some(id) => CampaignResponse {
            campaign_id: Some(id),
            error: None,
        },
        None => CampaignResponse {
            campaign_id: None,
            error: Some(format!("unrecognized telephony response: {}", snippet(trimmed))),
        },
    }
}

fn campaign_id_from_json(value: &Value) -> Option<String> {
    match value {
        Value::Object(map) => map
            .get("campaignId")
            .and_then(scalar_to_string)
            .or_else(|| map.get("data").and_then(campaign_id_from_json)),
        other => scalar_to_string(other),
    }
}

fn scalar_to_string(value: &Value) -> Option<String> {
    match value {
        Value::String(s) if !s.trim().is_empty() => Some(s.trim().to_string()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

// Bare words such as "Unauthorized" are status text, not campaign ids.
fn is_plain_identifier(text: &str) -> bool {
    text.len() <= 64
        && text.chars().any(|c| c.is_ascii_digit())
        && text
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
}

fn snippet(text: &str) -> String {
    text.chars().take(200).collect()
}
