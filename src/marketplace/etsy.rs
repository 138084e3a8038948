use super::{IncomingOrder, MarketplaceError, PayloadError, read_error_body};
use crate::idempotency::Source;
use crate::normalize::{LineItem, MetaEntry};
use chrono::{DateTime, NaiveDateTime, Utc};
use reqwest::Client;
use serde::Deserialize;
use serde_json::Value;
use serde_with::{DefaultOnNull, serde_as};

pub const PAYMENT_METHOD: &str = "Etsy Payments";

#[serde_as]
#[derive(Debug, Clone, Default, Deserialize)]
pub struct RawEtsyReceipt {
    #[serde(default)]
    pub receipt_id: Option<u64>,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub status: Option<String>,
    #[serde(default)]
    pub grandtotal: Option<Money>,
    #[serde(default)]
    pub create_timestamp: Option<i64>,
    #[serde(default)]
    pub buyer_email: Option<String>,
    #[serde(default)]
    pub first_line: Option<String>,
    #[serde(default)]
    pub second_line: Option<String>,
    #[serde(default)]
    pub city: Option<String>,
    #[serde(default)]
    pub state: Option<String>,
    #[serde(default)]
    pub zip: Option<String>,
    #[serde(default)]
    pub message_from_buyer: Option<String>,
    #[serde_as(deserialize_as = "DefaultOnNull")]
    #[serde(default)]
    pub transactions: Vec<RawTransaction>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct Money {
    pub amount: i64,
    pub divisor: i64,
    #[serde(default)]
    pub currency_code: String,
}

impl Money {
    pub fn display(&self) -> String {
        let divisor = if self.divisor == 0 { 1 } else { self.divisor };
        let value = self.amount as f64 / divisor as f64;
        format!("{value:.2} {}", self.currency_code).trim().to_string()
    }
}

#[serde_as]
#[derive(Debug, Clone, Default, Deserialize)]
pub struct RawTransaction {
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub quantity: Option<i64>,
    #[serde(default)]
    pub sku: Option<String>,
    #[serde(default)]
    pub main_image: Option<RawListingImage>,
    #[serde_as(deserialize_as = "DefaultOnNull")]
    #[serde(default)]
    pub variations: Vec<RawVariation>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct RawListingImage {
    #[serde(default)]
    pub url_fullxfull: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct RawVariation {
    #[serde(default)]
    pub formatted_name: Option<String>,
    #[serde(default)]
    pub formatted_value: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ReceiptPage {
    #[serde(default)]
    results: Vec<Value>,
}

/// Receipt with a known id; everything else stays optional.
#[derive(Debug, Clone)]
pub struct EtsyReceipt {
    pub receipt_id: u64,
    pub raw: RawEtsyReceipt,
}

impl TryFrom<RawEtsyReceipt> for EtsyReceipt {
    type Error = PayloadError;

    fn try_from(raw: RawEtsyReceipt) -> Result<Self, Self::Error> {
        let receipt_id = raw
            .receipt_id
            .ok_or(PayloadError::MissingField("receipt_id"))?;
        Ok(Self { receipt_id, raw })
    }
}

/// Etsy receipt state in WooCommerce vocabulary, so one status table serves both.
pub fn woo_equivalent_status(etsy_status: &str) -> &'static str {
    match etsy_status.trim().to_lowercase().as_str() {
        "completed" => "completed",
        "canceled" => "cancelled",
        "fully refunded" => "refunded",
        _ => "processing",
    }
}

impl From<RawVariation> for MetaEntry {
    fn from(variation: RawVariation) -> Self {
        MetaEntry {
            key: variation.formatted_name.unwrap_or_default(),
            display_key: None,
            value: variation.formatted_value,
            display_value: None,
        }
    }
}

impl From<RawTransaction> for LineItem {
    fn from(raw: RawTransaction) -> Self {
        LineItem {
            name: raw.title,
            quantity: raw.quantity,
            sku: raw.sku,
            image: raw.main_image.and_then(|image| image.url_fullxfull),
            meta: raw.variations.into_iter().map(MetaEntry::from).collect(),
        }
    }
}

impl From<EtsyReceipt> for IncomingOrder {
    fn from(receipt: EtsyReceipt) -> Self {
        let raw = receipt.raw;
        let address = [raw.first_line.as_deref(), raw.second_line.as_deref()]
            .into_iter()
            .flatten()
            .map(str::trim)
            .filter(|line| !line.is_empty())
            .collect::<Vec<_>>()
            .join(" ");
        let city = match (raw.city.as_deref(), raw.zip.as_deref()) {
            (Some(city), Some(zip)) if !zip.trim().is_empty() => Some(format!("{city} {zip}")),
            (city, _) => city.map(str::to_string),
        };
        IncomingOrder {
            source: Source::Etsy,
            external_id: receipt.receipt_id.to_string(),
            external_status: woo_equivalent_status(raw.status.as_deref().unwrap_or_default())
                .to_string(),
            customer: raw.name,
            phone: None,
            email: raw.buyer_email,
            address: (!address.is_empty()).then_some(address),
            city,
            state: raw.state,
            total: raw
                .grandtotal
                .as_ref()
                .map(Money::display)
                .unwrap_or_else(|| "0.00".to_string()),
            date: raw
                .create_timestamp
                .and_then(|secs| DateTime::<Utc>::from_timestamp(secs, 0)),
            note: raw.message_from_buyer,
            payment_method: Some(PAYMENT_METHOD.to_string()),
            cargo_barcode: None,
            cargo_tracking_number: None,
            items: raw.transactions.into_iter().map(LineItem::from).collect(),
        }
    }
}

pub(super) async fn fetch_receipts(
    client: &Client,
    api_root: &str,
    shop_id: &str,
    api_key: &str,
    access_token: &str,
    after: NaiveDateTime,
    page_size: u32,
) -> Result<Vec<Value>, MarketplaceError> {
    let url = format!(
        "{}/shops/{}/receipts",
        api_root.trim_end_matches('/'),
        urlencoding::encode(shop_id)
    );
    let response = client
        .get(url)
        .header("x-api-key", api_key)
        .bearer_auth(access_token)
        .query(&[
            ("state", "paid".to_string()),
            ("was_paid", "true".to_string()),
            ("limit", page_size.to_string()),
            ("min_created", after.and_utc().timestamp().to_string()),
        ])
        .send()
        .await
        .map_err(|err| MarketplaceError::Request(err.to_string()))?;
    if !response.status().is_success() {
        return Err(read_error_body(response).await);
    }
    let page: ReceiptPage = response
        .json()
        .await
        .map_err(|err| MarketplaceError::Deserialize(err.to_string()))?;
    Ok(page.results)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::normalize::{aliases::MetaField, get_meta};
    use serde_json::json;

    #[test]
    fn translates_receipt_states() {
        assert_eq!(woo_equivalent_status("completed"), "completed");
        assert_eq!(woo_equivalent_status("Canceled"), "cancelled");
        assert_eq!(woo_equivalent_status("fully refunded"), "refunded");
        assert_eq!(woo_equivalent_status("paid"), "processing");
        assert_eq!(woo_equivalent_status(""), "processing");
    }

    #[test]
    fn receipt_becomes_incoming_order() {
        let raw: RawEtsyReceipt = serde_json::from_value(json!({
            "receipt_id": 3141592653u64,
            "name": "Jane Doe",
            "status": "paid",
            "grandtotal": {"amount": 12999, "divisor": 100, "currency_code": "USD"},
            "create_timestamp": 1766311200,
            "buyer_email": "jane@example.com",
            "first_line": "1 Main St",
            "second_line": null,
            "city": "Springfield",
            "state": "IL",
            "zip": "62701",
            "transactions": [{
                "title": "Botanical Wallpaper",
                "quantity": 1,
                "variations": [
                    {"formatted_name": "Size", "formatted_value": "100 x 250 cm"},
                    {"formatted_name": "Material", "formatted_value": "Peel & Stick"}
                ]
            }]
        }))
        .expect("raw");
        let incoming = IncomingOrder::from(EtsyReceipt::try_from(raw).expect("valid"));
        assert_eq!(incoming.external_id, "3141592653");
        assert_eq!(incoming.external_status, "processing");
        assert_eq!(incoming.total, "129.99 USD");
        assert_eq!(incoming.address.as_deref(), Some("1 Main St"));
        assert_eq!(incoming.city.as_deref(), Some("Springfield 62701"));
        assert_eq!(incoming.payment_method.as_deref(), Some(PAYMENT_METHOD));
        let meta = &incoming.items[0].meta;
        assert_eq!(
            get_meta(meta, MetaField::Dimensions).as_deref(),
            Some("100 x 250 cm")
        );
        assert_eq!(
            get_meta(meta, MetaField::Material).as_deref(),
            Some("Peel & Stick")
        );
    }

    #[test]
    fn receipt_without_id_is_rejected() {
        let raw: RawEtsyReceipt = serde_json::from_value(json!({"name": "x"})).expect("raw");
        assert!(matches!(
            EtsyReceipt::try_from(raw),
            Err(PayloadError::MissingField("receipt_id"))
        ));
    }
}
