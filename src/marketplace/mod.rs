pub mod etsy;
pub mod woo;

use crate::idempotency::Source;
use crate::normalize::LineItem;
use async_trait::async_trait;
use chrono::{DateTime, NaiveDateTime, Utc};
use reqwest::Client;
use serde_json::Value;
use std::collections::HashMap;
use thiserror::Error;

pub use etsy::{EtsyReceipt, RawEtsyReceipt};
pub use woo::{RawWooOrder, WooOrder};

const ERROR_BODY_LIMIT: usize = 200;

#[derive(Debug, Error)]
pub enum PayloadError {
    #[error("missing required field `{0}`")]
    MissingField(&'static str),
    #[error("malformed payload: {0}")]
    Malformed(String),
}

#[derive(Debug, Error)]
pub enum MarketplaceError {
    #[error("request failed: {0}")]
    Request(String),
    #[error("HTTP {status}: {body}")]
    Transport { status: u16, body: String },
    #[error("invalid response: {0}")]
    Deserialize(String),
}

/// Validated inbound payload from one of the storefronts.
#[derive(Debug, Clone)]
pub enum MarketplaceOrder {
    WooCommerce(WooOrder),
    Etsy(EtsyReceipt),
}

impl MarketplaceOrder {
    /// Typed decode of a raw JSON payload for `source`.
    pub fn decode(source: Source, payload: &Value) -> Result<Self, PayloadError> {
        match source {
            Source::WooCommerce => {
                let raw: RawWooOrder = serde_json::from_value(payload.clone())
                    .map_err(|err| PayloadError::Malformed(err.to_string()))?;
                WooOrder::try_from(raw).map(MarketplaceOrder::WooCommerce)
            }
            Source::Etsy => {
                let raw: RawEtsyReceipt = serde_json::from_value(payload.clone())
                    .map_err(|err| PayloadError::Malformed(err.to_string()))?;
                EtsyReceipt::try_from(raw).map(MarketplaceOrder::Etsy)
            }
            Source::Manual => Err(PayloadError::Malformed(
                "manual orders have no marketplace payload".into(),
            )),
        }
    }

    pub fn source(&self) -> Source {
        match self {
            MarketplaceOrder::WooCommerce(_) => Source::WooCommerce,
            MarketplaceOrder::Etsy(_) => Source::Etsy,
        }
    }

    pub fn external_id(&self) -> String {
        match self {
            MarketplaceOrder::WooCommerce(order) => order.id.to_string(),
            MarketplaceOrder::Etsy(receipt) => receipt.receipt_id.to_string(),
        }
    }
}

impl From<MarketplaceOrder> for IncomingOrder {
    fn from(order: MarketplaceOrder) -> Self {
        match order {
            MarketplaceOrder::WooCommerce(order) => order.into(),
            MarketplaceOrder::Etsy(receipt) => receipt.into(),
        }
    }
}

/// Source-agnostic order content, still carrying the external status and raw
/// line items.
#[derive(Debug, Clone)]
pub struct IncomingOrder {
    pub source: Source,
    pub external_id: String,
    pub external_status: String,
    pub customer: Option<String>,
    pub phone: Option<String>,
    pub email: Option<String>,
    pub address: Option<String>,
    pub city: Option<String>,
    pub state: Option<String>,
    pub total: String,
    pub date: Option<DateTime<Utc>>,
    pub note: Option<String>,
    pub payment_method: Option<String>,
    pub cargo_barcode: Option<String>,
    pub cargo_tracking_number: Option<String>,
    pub items: Vec<LineItem>,
}

/// Text form of a scalar JSON value; arrays, objects and null yield `None`.
pub fn scalar_text(value: &Value) -> Option<String> {
    match value {
        Value::String(text) => Some(text.clone()),
        Value::Number(number) => Some(number.to_string()),
        Value::Bool(flag) => Some(flag.to_string()),
        _ => None,
    }
}

/// Accepts RFC 3339 or the zone-less `YYYY-MM-DDTHH:MM:SS` WooCommerce emits
/// (read as UTC).
pub fn parse_timestamp(raw: &str) -> Option<DateTime<Utc>> {
    let raw = raw.trim();
    DateTime::parse_from_rfc3339(raw)
        .map(|parsed| parsed.with_timezone(&Utc))
        .ok()
        .or_else(|| {
            NaiveDateTime::parse_from_str(raw, "%Y-%m-%dT%H:%M:%S")
                .ok()
                .map(|naive| naive.and_utc())
        })
}

pub(crate) async fn read_error_body(response: reqwest::Response) -> MarketplaceError {
    let status = response.status().as_u16();
    let body = response.text().await.unwrap_or_default();
    MarketplaceError::Transport {
        status,
        body: body.chars().take(ERROR_BODY_LIMIT).collect(),
    }
}

/// Required settings are missing; no request was attempted.
#[derive(Debug, Clone, Error)]
#[error("{} ayarları eksik: {}", .marketplace.label(), .fields.join(", "))]
pub struct MissingConfig {
    pub marketplace: Source,
    pub fields: Vec<&'static str>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Credentials {
    WooCommerce {
        base_url: String,
        key: String,
        secret: String,
    },
    Etsy {
        shop_id: String,
        api_key: String,
        access_token: String,
    },
}

impl Credentials {
    pub fn required_settings(source: Source) -> &'static [&'static str] {
        match source {
            Source::WooCommerce => &["wc_url", "wc_key", "wc_secret"],
            Source::Etsy => &["etsy_shop_id", "etsy_api_key", "etsy_access_token"],
            Source::Manual => &[],
        }
    }

    pub fn from_settings(
        source: Source,
        settings: &HashMap<String, String>,
    ) -> Result<Self, MissingConfig> {
        let required = Self::required_settings(source);
        let missing: Vec<&'static str> = required
            .iter()
            .copied()
            .filter(|key| settings.get(*key).is_none_or(|value| value.trim().is_empty()))
            .collect();
        if !missing.is_empty() || required.is_empty() {
            return Err(MissingConfig {
                marketplace: source,
                fields: missing,
            });
        }
        let value = |key: &str| {
            settings
                .get(key)
                .map(|value| value.trim().to_string())
                .unwrap_or_default()
        };
        Ok(match source {
            Source::WooCommerce => Credentials::WooCommerce {
                base_url: value("wc_url"),
                key: value("wc_key"),
                secret: value("wc_secret"),
            },
            Source::Etsy | Source::Manual => Credentials::Etsy {
                shop_id: value("etsy_shop_id"),
                api_key: value("etsy_api_key"),
                access_token: value("etsy_access_token"),
            },
        })
    }
}

#[derive(Debug, Clone, Copy)]
pub struct FeedQuery {
    pub after: NaiveDateTime,
    pub page_size: u32,
}

/// Pull side of a storefront: one page of raw order payloads.
#[async_trait]
pub trait OrderFeed: Send + Sync {
    async fn fetch_orders(
        &self,
        credentials: &Credentials,
        query: FeedQuery,
    ) -> Result<Vec<Value>, MarketplaceError>;
}

#[derive(Clone)]
pub struct HttpOrderFeed {
    client: Client,
    etsy_api_root: String,
}

impl HttpOrderFeed {
    pub fn new(client: Client, etsy_api_root: impl Into<String>) -> Self {
        Self {
            client,
            etsy_api_root: etsy_api_root.into(),
        }
    }
}

#[async_trait]
impl OrderFeed for HttpOrderFeed {
    async fn fetch_orders(
        &self,
        credentials: &Credentials,
        query: FeedQuery,
    ) -> Result<Vec<Value>, MarketplaceError> {
        match credentials {
            Credentials::WooCommerce {
                base_url,
                key,
                secret,
            } => {
                woo::fetch_orders(
                    &self.client,
                    base_url,
                    key,
                    secret,
                    query.after,
                    query.page_size,
                )
                .await
            }
            Credentials::Etsy {
                shop_id,
                api_key,
                access_token,
            } => {
                etsy::fetch_receipts(
                    &self.client,
                    &self.etsy_api_root,
                    shop_id,
                    api_key,
                    access_token,
                    query.after,
                    query.page_size,
                )
                .await
            }
        }
    }
}
