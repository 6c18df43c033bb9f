use crate::calls::MessageLocale;
use crate::invoices::BusinessIdentity;
use chrono::Weekday;
use std::fmt;

pub const DEFAULT_CALENDAR_URL: &str = "https://www.hebcal.com/hebcal";

/// Card gateway terminal credentials.
#[derive(Clone)]
pub struct GatewayConfig {
    pub base_url: String,
    pub terminal: String,
    pub user: String,
    pub password: String,
}

impl fmt::Debug for GatewayConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("GatewayConfig")
            .field("base_url", &self.base_url)
            .field("terminal", &self.terminal)
            .field("user", &self.user)
            .field("password", &"[REDACTED]")
            .finish()
    }
}

/// Telephony campaign API credentials. `user:password` forms the auth token pair.
#[derive(Clone)]
pub struct TelephonyConfig {
    pub base_url: String,
    pub user: String,
    pub password: String,
    pub template_id: String,
}

impl fmt::Debug for TelephonyConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TelephonyConfig")
            .field("base_url", &self.base_url)
            .field("user", &self.user)
            .field("password", &"[REDACTED]")
            .field("template_id", &self.template_id)
            .finish()
    }
}

#[derive(Debug, Clone)]
pub struct CalendarConfig {
    pub base_url: String,
    /// Locale passed to the calendar service (`lg` parameter).
    pub locale: String,
    pub timeout_secs: u64,
    pub rest_day: Weekday,
}

impl Default for CalendarConfig {
    fn default() -> Self {
        Self {
            base_url: DEFAULT_CALENDAR_URL.to_string(),
            locale: "he".to_string(),
            timeout_secs: 5,
            rest_day: Weekday::Sat,
        }
    }
}

#[derive(Debug, Clone)]
pub struct Config {
    pub database_url: String,
    pub port: u16,
    /// Absent when the service runs without charging.
    pub gateway: Option<GatewayConfig>,
    /// Absent when the service runs without reminder calls.
    pub telephony: Option<TelephonyConfig>,
    pub calendar: CalendarConfig,
    pub http_timeout_secs: u64,
    pub message_locale: MessageLocale,
    pub batch_concurrency: usize,
    pub business: BusinessIdentity,
}

impl Config {
    pub fn from_env() -> anyhow::Result<Self> {
        dotenvy::dotenv().ok();

        let config = Self {
            database_url: std::env::var("DB_URL")
                .or_else(|_| std::env::var("DATABASE_URL"))
                .map_err(|_| {
                    anyhow::anyhow!("DB_URL or DATABASE_URL environment variable required")
                })
                .and_then(|url| {
                    if url.trim().is_empty() {
                        anyhow::bail!("DB_URL cannot be empty");
                    }
                    if !url.starts_with("postgresql://") && !url.starts_with("postgres://") {
                        anyhow::bail!("DB_URL must start with postgresql:// or postgres://");
                    }
                    Ok(url)
                })?,
            port: std::env::var("PORT")
                .unwrap_or_else(|_| "3000".to_string())
                .parse()
                .map_err(|_| anyhow::anyhow!("PORT must be a valid number between 1-65535"))?,
            gateway: gateway_from_env()?,
            telephony: telephony_from_env()?,
            calendar: CalendarConfig {
                base_url: match optional_var("CALENDAR_URL") {
                    Some(url) => validate_http_url("CALENDAR_URL", url)?,
                    None => DEFAULT_CALENDAR_URL.to_string(),
                },
                locale: optional_var("CALENDAR_LOCALE").unwrap_or_else(|| "he".to_string()),
                timeout_secs: parse_var("CALENDAR_TIMEOUT_SECS", 5)?,
                rest_day: match optional_var("WEEKLY_REST_DAY") {
                    Some(day) => day.parse::<Weekday>().map_err(|_| {
                        anyhow::anyhow!("WEEKLY_REST_DAY must be a weekday name (e.g. Sat)")
                    })?,
                    None => Weekday::Sat,
                },
            },
            http_timeout_secs: parse_var("HTTP_TIMEOUT_SECS", 30)?,
            message_locale: match optional_var("MESSAGE_LOCALE") {
                Some(locale) => locale
                    .parse()
                    .map_err(|e: String| anyhow::anyhow!("MESSAGE_LOCALE: {}", e))?,
                None => MessageLocale::Hebrew,
            },
            batch_concurrency: parse_var("BATCH_CONCURRENCY", 4usize)?.max(1),
            business: BusinessIdentity {
                name: optional_var("BUSINESS_NAME").unwrap_or_default(),
                tax_id: optional_var("BUSINESS_TAX_ID").unwrap_or_default(),
                address: optional_var("BUSINESS_ADDRESS").unwrap_or_default(),
            },
        };

        // Log successful configuration load (without sensitive values)
        tracing::info!("Configuration loaded successfully");
        tracing::debug!("Database URL: {}...", url_preview(&config.database_url));
        match config.gateway {
            Some(ref gateway) => tracing::info!("Card gateway configured: {}", gateway.base_url),
            None => tracing::warn!("Card gateway not configured; overdue charging disabled"),
        }
        match config.telephony {
            Some(ref telephony) => {
                tracing::info!("Telephony campaign API configured: {}", telephony.base_url)
            }
            None => tracing::warn!("Telephony not configured; reminder calls disabled"),
        }
        tracing::debug!(
            "Calendar: {} (rest day {:?})",
            config.calendar.base_url,
            config.calendar.rest_day
        );
        tracing::debug!("Server Port: {}", config.port);

        Ok(config)
    }
}

fn optional_var(name: &str) -> Option<String> {
    std::env::var(name).ok().filter(|s| !s.trim().is_empty())
}

fn parse_var<T: std::str::FromStr>(name: &str, default: T) -> anyhow::Result<T> {
    match optional_var(name) {
        Some(raw) => raw
            .trim()
            .parse()
            .map_err(|_| anyhow::anyhow!("{} must be a valid number", name)),
        None => Ok(default),
    }
}

fn validate_http_url(name: &str, url: String) -> anyhow::Result<String> {
    if !url.starts_with("http://") && !url.starts_with("https://") {
        anyhow::bail!("{} must start with http:// or https://", name);
    }
    Ok(url.trim_end_matches('/').to_string())
}

/// Reads a credential group: all variables set, or none of them.
fn credential_group<const N: usize>(names: [&str; N]) -> anyhow::Result<Option<[String; N]>> {
    let values = names.map(optional_var);
    let present = values.iter().filter(|v| v.is_some()).count();
    if present == 0 {
        return Ok(None);
    }
    if present < N {
        let missing: Vec<&str> = names
            .iter()
            .zip(values.iter())
            .filter(|(_, v)| v.is_none())
            .map(|(n, _)| *n)
            .collect();
        anyhow::bail!("Incomplete credentials, missing: {}", missing.join(", "));
    }
    Ok(Some(values.map(|v| v.unwrap_or_default())))
}

fn gateway_from_env() -> anyhow::Result<Option<GatewayConfig>> {
    let Some([base_url, terminal, user, password]) = credential_group([
        "GATEWAY_URL",
        "GATEWAY_TERMINAL",
        "GATEWAY_USER",
        "GATEWAY_PASSWORD",
    ])?
    else {
        return Ok(None);
    };

    Ok(Some(GatewayConfig {
        base_url: validate_http_url("GATEWAY_URL", base_url)?,
        terminal,
        user,
        password,
    }))
}

fn telephony_from_env() -> anyhow::Result<Option<TelephonyConfig>> {
    let Some([base_url, user, password, template_id]) = credential_group([
        "TELEPHONY_URL",
        "TELEPHONY_USER",
        "TELEPHONY_PASSWORD",
        "TELEPHONY_TEMPLATE_ID",
    ])?
    else {
        return Ok(None);
    };

    Ok(Some(TelephonyConfig {
        base_url: validate_http_url("TELEPHONY_URL", base_url)?,
        user,
        password,
        template_id,
    }))
}

/// First 20 characters of a URL, cut on a character boundary.
fn url_preview(url: &str) -> String {
    url.chars().take(20).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_url_preview_respects_multibyte_characters() {
        let url = "postgres://üsér:pässwörd@db/settlement";
        assert!(!url.is_char_boundary(20));
        assert_eq!(url_preview(url), "postgres://üsér:päss");
        assert_eq!(url_preview("postgres://a"), "postgres://a");
    }

    #[test]
    fn test_url_validation() {
        assert!(validate_http_url("X", "ftp://example.com".to_string()).is_err());
        assert_eq!(
            validate_http_url("X", "https://example.com/".to_string()).unwrap(),
            "https://example.com"
        );
    }

    #[test]
    fn test_debug_redacts_passwords() {
        let gateway = GatewayConfig {
            base_url: "https://gw.example.com".to_string(),
            terminal: "0962210".to_string(),
            user: "shop".to_string(),
            password: "hunter2".to_string(),
        };
        let rendered = format!("{:?}", gateway);
        assert!(!rendered.contains("hunter2"));
        assert!(rendered.contains("[REDACTED]"));
    }

    #[test]
    fn test_rest_day_names_parse() {
        assert_eq!("Sat".parse::<Weekday>().unwrap(), Weekday::Sat);
        assert_eq!("friday".parse::<Weekday>().unwrap(), Weekday::Fri);
    }
}
