use crate::idempotency::Source;
use crate::merge::DEFAULT_POLL_INTERVAL;
use crate::normalize::image::DEFAULT_PLACEHOLDER;
use crate::reconcile::LabelPolicy;
use chrono::NaiveDateTime;
use std::time::Duration;
use thiserror::Error;

pub const DEFAULT_SYNC_AFTER: &str = "2025-12-20T00:00:00";
pub const DEFAULT_ETSY_API_ROOT: &str = "https://openapi.etsy.com/v3/application";
const SYNC_AFTER_FORMAT: &str = "%Y-%m-%dT%H:%M:%S";

#[derive(Debug, Error)]
#[error("invalid {key}: {value:?}")]
pub struct ConfigError {
    pub key: &'static str,
    pub value: String,
}

#[derive(Debug, Clone)]
pub struct HttpConfig {
    pub timeout: Duration,
    pub connect_timeout: Duration,
}

/// Settings for the `watch` subcommand.
#[derive(Debug, Clone)]
pub struct WatchConfig {
    pub dashboard_url: String,
    pub dashboard_key: Option<String>,
    pub poll_interval: Duration,
}

#[derive(Debug, Clone)]
pub struct AppConfig {
    pub port: u16,
    /// `None` keeps orders in process memory.
    pub database_url: Option<String>,
    pub sync_after: NaiveDateTime,
    pub sync_page_size: u32,
    pub sync_interval: Option<Duration>,
    pub sync_sources: Vec<Source>,
    pub label_policy: LabelPolicy,
    pub placeholder_image: String,
    pub etsy_api_root: String,
    pub request_max_bytes: usize,
    pub queue_capacity: usize,
    pub metrics_key: Option<String>,
    pub staff_api_keys: Option<String>,
    pub http: HttpConfig,
    pub watch: WatchConfig,
}

impl AppConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let text = |key: &str| {
            lookup(key)
                .map(|value| value.trim().to_string())
                .filter(|value| !value.is_empty())
        };
        let number = |key: &str| text(key).and_then(|value| value.parse::<u64>().ok());

        let sync_after = match text("SYNC_AFTER") {
            Some(raw) => NaiveDateTime::parse_from_str(&raw, SYNC_AFTER_FORMAT)
                .map_err(|_| ConfigError {
                    key: "SYNC_AFTER",
                    value: raw,
                })?,
            None => NaiveDateTime::parse_from_str(DEFAULT_SYNC_AFTER, SYNC_AFTER_FORMAT)
                .map_err(|_| ConfigError {
                    key: "SYNC_AFTER",
                    value: DEFAULT_SYNC_AFTER.to_string(),
                })?,
        };
        let label_policy = match text("LABEL_POLICY") {
            Some(raw) => LabelPolicy::parse(&raw).ok_or(ConfigError {
                key: "LABEL_POLICY",
                value: raw,
            })?,
            None => LabelPolicy::default(),
        };
        let sync_sources = match text("SYNC_SOURCES") {
            Some(raw) => parse_sources(&raw)?,
            None => vec![Source::WooCommerce],
        };

        Ok(Self {
            port: text("PORT")
                .and_then(|value| value.parse().ok())
                .unwrap_or(8000),
            database_url: text("DATABASE_URL"),
            sync_after,
            sync_page_size: number("SYNC_PAGE_SIZE")
                .filter(|value| (1..=100).contains(value))
                .map(|value| value as u32)
                .unwrap_or(20),
            sync_interval: number("SYNC_INTERVAL_SECS")
                .filter(|value| *value > 0)
                .map(Duration::from_secs),
            sync_sources,
            label_policy,
            placeholder_image: text("PLACEHOLDER_IMAGE_URL")
                .unwrap_or_else(|| DEFAULT_PLACEHOLDER.to_string()),
            etsy_api_root: text("ETSY_API_ROOT")
                .unwrap_or_else(|| DEFAULT_ETSY_API_ROOT.to_string()),
            request_max_bytes: number("REQUEST_MAX_BYTES")
                .filter(|value| *value > 0)
                .map(|value| value as usize)
                .unwrap_or(256 * 1024),
            queue_capacity: number("QUEUE_CAPACITY")
                .filter(|value| *value > 0)
                .map(|value| value as usize)
                .unwrap_or(64),
            metrics_key: text("METRICS_KEY"),
            staff_api_keys: text("STAFF_API_KEYS"),
            http: HttpConfig {
                timeout: Duration::from_secs(number("HTTP_TIMEOUT_SECS").unwrap_or(15)),
                connect_timeout: Duration::from_secs(
                    number("HTTP_CONNECT_TIMEOUT_SECS").unwrap_or(5),
                ),
            },
            watch: WatchConfig {
                dashboard_url: text("DASHBOARD_URL")
                    .unwrap_or_else(|| "http://127.0.0.1:8000".to_string()),
                dashboard_key: text("DASHBOARD_KEY"),
                poll_interval: number("POLL_INTERVAL_SECS")
                    .filter(|value| *value > 0)
                    .map(Duration::from_secs)
                    .unwrap_or(DEFAULT_POLL_INTERVAL),
            },
        })
    }
}

fn parse_sources(raw: &str) -> Result<Vec<Source>, ConfigError> {
    let mut sources = Vec::new();
    for token in raw.split(',').map(str::trim).filter(|token| !token.is_empty()) {
        match Source::parse(token) {
            Some(Source::Manual) | None => {
                return Err(ConfigError {
                    key: "SYNC_SOURCES",
                    value: token.to_string(),
                });
            }
            Some(source) if !sources.contains(&source) => sources.push(source),
            Some(_) => {}
        }
    }
    Ok(sources)
}
