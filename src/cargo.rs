use crate::idempotency::{ExternalKey, Source};
use crate::marketplace::scalar_text;
use crate::marketplace::woo::{CARGO_BARCODE_META, CARGO_TRACKING_META};
use crate::store::{OrderPatch, OrderStore, StoreError};
use crate::webhook::WebhookReply;
use axum::http::StatusCode;
use serde_json::{Value, json};
use std::sync::Arc;
use tracing::{error, info};

pub const LAST_CARGO_WEBHOOK: &str = "last_cargo_webhook";

/// Carrier data found in an integrator callback. Order-level meta entries win
/// over top-level fields.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CargoUpdate {
    pub order_id: Option<String>,
    pub barcode: Option<String>,
    pub tracking_number: Option<String>,
}

impl CargoUpdate {
    pub fn from_payload(payload: &Value) -> Self {
        let field = |name: &str| {
            payload
                .get(name)
                .and_then(scalar_text)
                .map(|value| value.trim().to_string())
                .filter(|value| !value.is_empty())
        };
        let meta = |keys: &[&str]| {
            payload
                .get("meta_data")
                .and_then(Value::as_array)
                .and_then(|entries| {
                    entries.iter().find(|entry| {
                        entry
                            .get("key")
                            .and_then(Value::as_str)
                            .is_some_and(|key| keys.contains(&key))
                    })
                })
                .and_then(|entry| entry.get("value"))
                .and_then(scalar_text)
                .filter(|value| !value.trim().is_empty())
        };

        let barcode = field("barcode")
            .or_else(|| field("cargo_barcode"))
            .or_else(|| field("tracking_number"));
        let tracking_number = field("tracking_number").or_else(|| field("cargo_tracking_number"));
        CargoUpdate {
            order_id: field("order_id").or_else(|| field("id")),
            barcode: meta(&[CARGO_BARCODE_META, "barcode"]).or(barcode),
            tracking_number: meta(&[CARGO_TRACKING_META, "tracking_number"]).or(tracking_number),
        }
    }

    fn has_cargo_data(&self) -> bool {
        self.barcode.is_some() || self.tracking_number.is_some()
    }
}

#[derive(Clone)]
pub struct CargoWebhook {
    store: Arc<dyn OrderStore>,
}

impl CargoWebhook {
    pub fn new(store: Arc<dyn OrderStore>) -> Self {
        Self { store }
    }

    pub async fn handle(&self, body: &str) -> WebhookReply {
        match self.apply(body).await {
            Ok(reply) => reply,
            Err(err) => {
                error!(target = "orderdesk.webhook", "cargo webhook failed: {err}");
                WebhookReply::new(
                    StatusCode::INTERNAL_SERVER_ERROR,
                    json!({"error": err.to_string()}),
                )
            }
        }
    }

    async fn apply(&self, body: &str) -> Result<WebhookReply, StoreError> {
        if body.trim().is_empty() {
            return Ok(message(StatusCode::BAD_REQUEST, "Empty body"));
        }
        let Ok(payload) = serde_json::from_str::<Value>(body) else {
            return Ok(message(StatusCode::BAD_REQUEST, "Invalid payload"));
        };
        let pretty = serde_json::to_string_pretty(&payload).unwrap_or_else(|_| body.to_string());
        self.store.put_setting(LAST_CARGO_WEBHOOK, &pretty).await?;

        let update = CargoUpdate::from_payload(&payload);
        let Some(order_id) = update.order_id.as_deref() else {
            return Ok(message(
                StatusCode::BAD_REQUEST,
                "Order ID not found in payload",
            ));
        };
        if !update.has_cargo_data() {
            return Ok(message(StatusCode::OK, "No cargo data found to update"));
        }

        let key = ExternalKey::new(Source::WooCommerce, order_id);
        let Some(order) = self.store.find_by_external_key(key.as_str()).await? else {
            info!(target = "orderdesk.webhook", external_key = %key, "cargo update for unknown order");
            return Ok(message(StatusCode::NOT_FOUND, "Order not found in system"));
        };
        self.store
            .update_order(
                order.id,
                OrderPatch {
                    cargo_barcode: update.barcode.clone(),
                    cargo_tracking_number: update.tracking_number.clone(),
                    ..OrderPatch::default()
                },
            )
            .await?;
        info!(
            target = "orderdesk.webhook",
            order_id = order.id,
            barcode = ?update.barcode,
            tracking = ?update.tracking_number,
            "cargo data updated"
        );
        Ok(WebhookReply::new(
            StatusCode::OK,
            json!({"success": true, "message": "Cargo data updated"}),
        ))
    }
}

fn message(status: StatusCode, text: &str) -> WebhookReply {
    WebhookReply::new(status, json!({ "message": text }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::{MemoryStore, test_support::new_order};

    #[test]
    fn meta_entries_override_top_level_fields() {
        let update = CargoUpdate::from_payload(&json!({
            "id": 500,
            "tracking_number": "TOP-1",
            "meta_data": [
                {"key": "_gcargo_barcode_exposed", "value": "BC-9"},
                {"key": "other", "value": "x"}
            ]
        }));
        assert_eq!(update.order_id.as_deref(), Some("500"));
        assert_eq!(update.barcode.as_deref(), Some("BC-9"));
        assert_eq!(update.tracking_number.as_deref(), Some("TOP-1"));

        let fallback = CargoUpdate::from_payload(&json!({"order_id": "7", "tracking_number": 123}));
        assert_eq!(fallback.barcode.as_deref(), Some("123"));
        assert_eq!(fallback.tracking_number.as_deref(), Some("123"));
    }

    #[tokio::test]
    async fn updates_cargo_fields_by_external_key() {
        let store = Arc::new(MemoryStore::new());
        let order = store
            .insert_order(new_order("WC-500", "incoming"))
            .await
            .expect("insert");
        let hook = CargoWebhook::new(store.clone());

        let reply = hook
            .handle(r#"{"order_id": 500, "barcode": "BC-1", "cargo_tracking_number": "TRK-1"}"#)
            .await;
        assert_eq!(reply.status, StatusCode::OK);
        assert_eq!(reply.body["success"], true);

        let stored = store.get(order.id).await.unwrap().unwrap();
        assert_eq!(stored.cargo_barcode.as_deref(), Some("BC-1"));
        assert_eq!(stored.cargo_tracking_number.as_deref(), Some("TRK-1"));
        assert!(store.settings().await.unwrap().contains_key(LAST_CARGO_WEBHOOK));
    }

    #[tokio::test]
    async fn rejects_and_ignores_incomplete_callbacks() {
        let store = Arc::new(MemoryStore::new());
        let hook = CargoWebhook::new(store.clone());

        assert_eq!(hook.handle("").await.status, StatusCode::BAD_REQUEST);
        assert_eq!(
            hook.handle(r#"{"barcode": "BC-1"}"#).await.status,
            StatusCode::BAD_REQUEST
        );
        let no_data = hook.handle(r#"{"order_id": 500}"#).await;
        assert_eq!(no_data.status, StatusCode::OK);
        assert_eq!(no_data.body["message"], "No cargo data found to update");

        let unknown = hook.handle(r#"{"order_id": 501, "barcode": "BC-2"}"#).await;
        assert_eq!(unknown.status, StatusCode::NOT_FOUND);
    }
}
