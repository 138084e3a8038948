use crate::idempotency::Source;
use crate::marketplace::{MarketplaceOrder, PayloadError};
use crate::reconcile::{Disposition, IngestPath, Reconciler};
use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde_json::{Value, json};
use thiserror::Error;
use tracing::{error, info, warn};

pub const LAST_WEBHOOK_PAYLOAD: &str = "last_webhook_payload";
const PING_PREFIX: &str = "webhook_id=";

/// A classified WooCommerce webhook body.
#[derive(Debug)]
pub enum WebhookDelivery {
    /// Form-encoded liveness check sent when the hook is (re)registered.
    Ping,
    Order {
        payload: Value,
        order: Box<MarketplaceOrder>,
    },
}

#[derive(Debug, Error)]
#[error("{reason}")]
pub struct RejectedDelivery {
    /// Parsed body, when it was JSON at all.
    pub payload: Option<Value>,
    pub reason: PayloadError,
}

impl WebhookDelivery {
    pub fn parse(body: &str) -> Result<Self, RejectedDelivery> {
        let trimmed = body.trim_start();
        if trimmed.starts_with(PING_PREFIX) {
            return Ok(WebhookDelivery::Ping);
        }
        if trimmed.is_empty() {
            return Err(RejectedDelivery {
                payload: None,
                reason: PayloadError::Malformed("empty body".into()),
            });
        }
        let payload: Value = serde_json::from_str(trimmed).map_err(|err| RejectedDelivery {
            payload: None,
            reason: PayloadError::Malformed(err.to_string()),
        })?;
        match MarketplaceOrder::decode(Source::WooCommerce, &payload) {
            Ok(order) => Ok(WebhookDelivery::Order {
                payload,
                order: Box::new(order),
            }),
            Err(reason) => Err(RejectedDelivery {
                payload: Some(payload),
                reason,
            }),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct WebhookReply {
    pub status: StatusCode,
    pub body: Value,
}

impl WebhookReply {
    pub(crate) fn new(status: StatusCode, body: Value) -> Self {
        Self { status, body }
    }
}

impl IntoResponse for WebhookReply {
    fn into_response(self) -> Response {
        (self.status, Json(self.body)).into_response()
    }
}

#[derive(Clone)]
pub struct WebhookIngester {
    reconciler: Reconciler,
}

impl WebhookIngester {
    pub fn new(reconciler: Reconciler) -> Self {
        Self { reconciler }
    }

    pub async fn ingest(&self, body: &str) -> WebhookReply {
        let delivery = match WebhookDelivery::parse(body) {
            Ok(delivery) => delivery,
            Err(rejected) => {
                if let Some(payload) = &rejected.payload {
                    self.remember(payload).await;
                }
                warn!(
                    target = "orderdesk.webhook",
                    reason = %rejected.reason,
                    "rejected webhook delivery"
                );
                crate::metrics::ingest_outcome("webhook", "rejected");
                return WebhookReply::new(
                    StatusCode::BAD_REQUEST,
                    json!({"message": "Invalid payload"}),
                );
            }
        };

        let (payload, order) = match delivery {
            WebhookDelivery::Ping => {
                info!(target = "orderdesk.webhook", "webhook ping received");
                return WebhookReply::new(
                    StatusCode::OK,
                    json!({"message": "Webhook ping received"}),
                );
            }
            WebhookDelivery::Order { payload, order } => (payload, order),
        };
        self.remember(&payload).await;
        info!(
            target = "orderdesk.webhook",
            source = %order.source(),
            external_id = %order.external_id(),
            "order delivery received"
        );

        match self.reconciler.reconcile(*order, IngestPath::Webhook).await {
            Ok(outcome) => {
                let message = match outcome.disposition {
                    Disposition::Duplicate => "Order already exists",
                    Disposition::Created | Disposition::Refreshed => "Order processed successfully",
                };
                WebhookReply::new(
                    StatusCode::OK,
                    json!({"success": true, "message": message, "id": outcome.order_id}),
                )
            }
            Err(err) => {
                error!(target = "orderdesk.webhook", "webhook ingestion failed: {err}");
                WebhookReply::new(
                    StatusCode::INTERNAL_SERVER_ERROR,
                    json!({"error": "Internal Server Error"}),
                )
            }
        }
    }

    async fn remember(&self, payload: &Value) {
        let text = serde_json::to_string_pretty(payload).unwrap_or_else(|_| payload.to_string());
        if let Err(err) = self
            .reconciler
            .store()
            .put_setting(LAST_WEBHOOK_PAYLOAD, &text)
            .await
        {
            warn!(
                target = "orderdesk.webhook",
                "failed to record last webhook payload: {err}"
            );
        }
    }
}
