use super::{
    IncomingOrder, MarketplaceError, PayloadError, parse_timestamp, read_error_body, scalar_text,
};
use crate::idempotency::Source;
use crate::normalize::{LineItem, MetaEntry};
use base64::{Engine, engine::general_purpose::STANDARD as BASE64};
use chrono::{DateTime, NaiveDateTime, Utc};
use reqwest::{Client, header::AUTHORIZATION};
use serde::Deserialize;
use serde_json::Value;
use serde_with::{DefaultOnNull, serde_as};

pub const CARGO_BARCODE_META: &str = "_gcargo_barcode_exposed";
pub const CARGO_TRACKING_META: &str = "_gcargo_tracking_exposed";
const DEFAULT_CURRENCY_SYMBOL: &str = "₺";

/// Order as WooCommerce sends it, before validation.
#[serde_as]
#[derive(Debug, Clone, Default, Deserialize)]
pub struct RawWooOrder {
    #[serde(default)]
    pub id: Option<u64>,
    #[serde(default)]
    pub status: Option<String>,
    #[serde(default)]
    pub billing: Option<RawBilling>,
    #[serde(default)]
    pub total: Option<Value>,
    #[serde(default)]
    pub currency_symbol: Option<String>,
    #[serde(default)]
    pub date_created: Option<String>,
    #[serde(default)]
    pub date_created_gmt: Option<String>,
    #[serde(default)]
    pub customer_note: Option<String>,
    #[serde(default)]
    pub payment_method_title: Option<String>,
    #[serde_as(deserialize_as = "DefaultOnNull")]
    #[serde(default)]
    pub meta_data: Vec<RawMeta>,
    #[serde_as(deserialize_as = "DefaultOnNull")]
    #[serde(default)]
    pub line_items: Vec<RawLineItem>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct RawBilling {
    #[serde(default)]
    pub first_name: Option<String>,
    #[serde(default)]
    pub last_name: Option<String>,
    #[serde(default)]
    pub phone: Option<String>,
    #[serde(default)]
    pub email: Option<String>,
    #[serde(default)]
    pub address_1: Option<String>,
    #[serde(default)]
    pub address_2: Option<String>,
    #[serde(default)]
    pub city: Option<String>,
    #[serde(default)]
    pub state: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct RawMeta {
    #[serde(default)]
    pub key: Option<String>,
    #[serde(default)]
    pub display_key: Option<String>,
    #[serde(default)]
    pub value: Option<Value>,
    #[serde(default)]
    pub display_value: Option<Value>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct RawImage {
    #[serde(default)]
    pub src: Option<String>,
}

#[serde_as]
#[derive(Debug, Clone, Default, Deserialize)]
pub struct RawLineItem {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub quantity: Option<i64>,
    #[serde(default)]
    pub sku: Option<String>,
    #[serde(default)]
    pub image: Option<RawImage>,
    #[serde_as(deserialize_as = "DefaultOnNull")]
    #[serde(default)]
    pub meta_data: Vec<RawMeta>,
}

impl From<RawMeta> for MetaEntry {
    fn from(raw: RawMeta) -> Self {
        MetaEntry {
            key: raw.key.unwrap_or_default(),
            display_key: raw.display_key,
            value: raw.value.as_ref().and_then(scalar_text),
            display_value: raw.display_value.as_ref().and_then(scalar_text),
        }
    }
}

impl From<RawLineItem> for LineItem {
    fn from(raw: RawLineItem) -> Self {
        LineItem {
            name: raw.name,
            quantity: raw.quantity,
            sku: raw.sku,
            image: raw.image.and_then(|image| image.src),
            meta: raw.meta_data.into_iter().map(MetaEntry::from).collect(),
        }
    }
}

/// Validated WooCommerce order: it has an id and a billing block.
#[derive(Debug, Clone)]
pub struct WooOrder {
    pub id: u64,
    pub status: String,
    pub billing: RawBilling,
    pub total: String,
    pub currency_symbol: String,
    pub created: Option<DateTime<Utc>>,
    pub customer_note: Option<String>,
    pub payment_method_title: Option<String>,
    pub cargo_barcode: Option<String>,
    pub cargo_tracking: Option<String>,
    pub line_items: Vec<LineItem>,
}

impl TryFrom<RawWooOrder> for WooOrder {
    type Error = PayloadError;

    fn try_from(raw: RawWooOrder) -> Result<Self, Self::Error> {
        let id = raw.id.ok_or(PayloadError::MissingField("id"))?;
        let billing = raw.billing.ok_or(PayloadError::MissingField("billing"))?;
        let order_meta = |key: &str| {
            raw.meta_data
                .iter()
                .find(|meta| meta.key.as_deref() == Some(key))
                .and_then(|meta| meta.value.as_ref())
                .and_then(scalar_text)
        };
        let cargo_barcode = order_meta(CARGO_BARCODE_META);
        let cargo_tracking = order_meta(CARGO_TRACKING_META);
        let created = raw
            .date_created_gmt
            .as_deref()
            .or(raw.date_created.as_deref())
            .and_then(parse_timestamp);
        Ok(WooOrder {
            id,
            status: raw.status.unwrap_or_default(),
            billing,
            total: raw
                .total
                .as_ref()
                .and_then(scalar_text)
                .unwrap_or_else(|| "0.00".to_string()),
            currency_symbol: raw
                .currency_symbol
                .unwrap_or_else(|| DEFAULT_CURRENCY_SYMBOL.to_string()),
            created,
            customer_note: raw.customer_note,
            payment_method_title: raw.payment_method_title,
            cargo_barcode,
            cargo_tracking,
            line_items: raw.line_items.into_iter().map(LineItem::from).collect(),
        })
    }
}

fn joined(parts: &[Option<&str>]) -> Option<String> {
    let text = parts
        .iter()
        .flatten()
        .map(|part| part.trim())
        .filter(|part| !part.is_empty())
        .collect::<Vec<_>>()
        .join(" ");
    (!text.is_empty()).then_some(text)
}

impl From<WooOrder> for IncomingOrder {
    fn from(order: WooOrder) -> Self {
        let billing = order.billing;
        IncomingOrder {
            source: Source::WooCommerce,
            external_id: order.id.to_string(),
            external_status: order.status,
            customer: joined(&[billing.first_name.as_deref(), billing.last_name.as_deref()]),
            phone: billing.phone,
            email: billing.email,
            address: joined(&[billing.address_1.as_deref(), billing.address_2.as_deref()]),
            city: billing.city,
            state: billing.state,
            total: format!("{} {}", order.total, order.currency_symbol),
            date: order.created,
            note: order.customer_note,
            payment_method: order.payment_method_title,
            cargo_barcode: order.cargo_barcode,
            cargo_tracking_number: order.cargo_tracking,
            items: order.line_items,
        }
    }
}

fn basic_auth_header(key: &str, secret: &str) -> String {
    format!("Basic {}", BASE64.encode(format!("{key}:{secret}")))
}

pub(super) async fn fetch_orders(
    client: &Client,
    base_url: &str,
    key: &str,
    secret: &str,
    after: NaiveDateTime,
    page_size: u32,
) -> Result<Vec<Value>, MarketplaceError> {
    let url = format!("{}/wp-json/wc/v3/orders", base_url.trim_end_matches('/'));
    let response = client
        .get(url)
        .header(AUTHORIZATION, basic_auth_header(key, secret))
        .query(&[
            ("per_page", page_size.to_string()),
            ("after", after.format("%Y-%m-%dT%H:%M:%S").to_string()),
        ])
        .send()
        .await
        .map_err(|err| MarketplaceError::Request(err.to_string()))?;
    if !response.status().is_success() {
        return Err(read_error_body(response).await);
    }
    response
        .json::<Vec<Value>>()
        .await
        .map_err(|err| MarketplaceError::Deserialize(err.to_string()))
}
