use crate::activity::{ActionKind, ActivityLogger, status_changed};
use crate::idempotency::{ExternalKey, Source};
use crate::normalize::{DEFAULT_ITEM_NAME, NormalizedItem};
use crate::status;
use crate::store::{
    Attachment, Comment, NewComment, NewOrder, Order, OrderActivity, OrderFields, OrderPatch,
    OrderStore, StoreError,
};
use chrono::Utc;
use serde::Deserialize;
use std::sync::Arc;
use thiserror::Error;
use tracing::info;

const MANUAL_TOTAL: &str = "0.00 ₺";

#[derive(Debug, Error)]
pub enum StaffError {
    #[error("Barkod bulunamadı: {0}")]
    UnknownBarcode(String),
    #[error("{0}")]
    Invalid(&'static str),
    #[error(transparent)]
    Store(#[from] StoreError),
}

/// Line item typed in by staff on the manual order form.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ManualItem {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub quantity: Option<i64>,
    #[serde(default)]
    pub image_src: Option<String>,
    #[serde(default)]
    pub sku: Option<String>,
    #[serde(default)]
    pub material: Option<String>,
    #[serde(default)]
    pub dimensions: Option<String>,
    #[serde(default)]
    pub product_note: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ManualOrder {
    pub customer: String,
    #[serde(default)]
    pub phone: Option<String>,
    #[serde(default)]
    pub email: Option<String>,
    #[serde(default)]
    pub address: Option<String>,
    #[serde(default)]
    pub city: Option<String>,
    #[serde(default)]
    pub note: Option<String>,
    #[serde(default)]
    pub status: Option<String>,
    #[serde(default)]
    pub items: Vec<ManualItem>,
}

/// Edits made by staff through the dashboard. Every mutation raises the
/// order's notification flag and leaves an activity entry behind.
#[derive(Clone)]
pub struct StaffDesk {
    store: Arc<dyn OrderStore>,
    activity: ActivityLogger,
    placeholder_image: Arc<str>,
}

impl StaffDesk {
    pub fn new(store: Arc<dyn OrderStore>, placeholder_image: impl Into<Arc<str>>) -> Self {
        Self {
            activity: ActivityLogger::new(store.clone()),
            store,
            placeholder_image: placeholder_image.into(),
        }
    }

    /// Card moved to another column; the mover becomes responsible for it.
    pub async fn update_status(&self, id: i64, status: &str, actor: &str) -> Result<Order, StaffError> {
        let status = status::canonical_status(status.trim());
        if status.is_empty() {
            return Err(StaffError::Invalid("Durum boş olamaz."));
        }
        let order = self
            .store
            .update_order(
                id,
                OrderPatch {
                    status: Some(status.to_string()),
                    assigned_to: Some(actor.to_string()),
                    has_notification: Some(true),
                    ..OrderPatch::default()
                },
            )
            .await?;
        self.activity
            .record(id, actor, ActionKind::StatusChange, status_changed(status))
            .await?;
        info!(target = "orderdesk.api", order_id = id, status, actor, "status updated");
        Ok(order)
    }

    pub async fn update_details(
        &self,
        id: i64,
        mut patch: OrderPatch,
        actor: &str,
    ) -> Result<Order, StaffError> {
        if patch.is_empty() {
            return Err(StaffError::Invalid("Değişiklik yok."));
        }
        let before = self.store.get(id).await?.ok_or(StoreError::NotFound(id))?;
        if let Some(status) = patch.status.take() {
            patch.status = Some(status::canonical_status(status.trim()).to_string());
        }
        patch.has_notification = Some(true);
        let after = self.store.update_order(id, patch).await?;
        let logged = self.activity.record_changes(actor, &before, &after).await?;
        info!(target = "orderdesk.api", order_id = id, changes = logged, actor, "details updated");
        Ok(after)
    }

    pub async fn add_comment(
        &self,
        id: i64,
        actor: &str,
        message: &str,
        attachments: Vec<Attachment>,
    ) -> Result<Comment, StaffError> {
        let message = message.trim();
        if message.is_empty() && attachments.is_empty() {
            return Err(StaffError::Invalid("Mesaj boş olamaz."));
        }
        let comment = self
            .store
            .add_comment(
                id,
                NewComment {
                    author: actor.to_string(),
                    message: message.to_string(),
                    attachments,
                },
            )
            .await?;
        self.store
            .update_order(
                id,
                OrderPatch {
                    has_notification: Some(true),
                    ..OrderPatch::default()
                },
            )
            .await?;
        self.activity
            .record(id, actor, ActionKind::CommentAdded, "Yeni mesaj yazdı.")
            .await?;
        Ok(comment)
    }

    /// Client-side events (print, PDF export) reported for the audit log.
    pub async fn log_activity(
        &self,
        id: i64,
        actor: &str,
        action: &str,
        details: &str,
    ) -> Result<OrderActivity, StaffError> {
        if action.trim().is_empty() {
            return Err(StaffError::Invalid("İşlem türü boş olamaz."));
        }
        Ok(self
            .activity
            .record(id, actor, ActionKind::parse(action), details)
            .await?)
    }

    pub async fn mark_read(&self, id: i64) -> Result<Order, StaffError> {
        Ok(self
            .store
            .update_order(
                id,
                OrderPatch {
                    has_notification: Some(false),
                    ..OrderPatch::default()
                },
            )
            .await?)
    }

    pub async fn create_manual(&self, form: ManualOrder, actor: &str) -> Result<Order, StaffError> {
        let customer = form.customer.trim();
        if customer.is_empty() {
            return Err(StaffError::Invalid("Müşteri adı boş olamaz."));
        }
        let now = Utc::now();
        let status = form
            .status
            .as_deref()
            .map(|value| status::canonical_status(value.trim()))
            .filter(|value| !value.is_empty())
            .unwrap_or(status::INCOMING)
            .to_string();
        let items = form
            .items
            .into_iter()
            .map(|item| self.manual_item(item))
            .collect();
        let order = self
            .store
            .insert_order(NewOrder {
                external_key: ExternalKey::manual(now).into_string(),
                fields: OrderFields {
                    customer: customer.to_string(),
                    phone: form.phone,
                    email: form.email,
                    address: form.address,
                    city: form.city,
                    total: MANUAL_TOTAL.to_string(),
                    note: form.note,
                    payment_method: None,
                    cargo_barcode: None,
                    cargo_tracking_number: None,
                    date: now,
                },
                status,
                labels: [Source::Manual.label().to_string()].into_iter().collect(),
                assigned_to: None,
                has_notification: true,
                items,
            })
            .await?;
        self.activity
            .record(
                order.id,
                actor,
                ActionKind::OrderCreated,
                "Manuel sipariş oluşturuldu.",
            )
            .await?;
        info!(
            target = "orderdesk.api",
            order_id = order.id,
            external_key = %order.external_key,
            actor,
            "manual order created"
        );
        Ok(order)
    }

    /// A scanned label matches an external key or an internal id; the order ships.
    pub async fn scan_barcode(&self, code: &str, actor: &str) -> Result<Order, StaffError> {
        let code = code.trim();
        let found = match self.store.find_by_external_key(code).await? {
            Some(order) => Some(order),
            None => match code.parse::<i64>() {
                Ok(id) => self.store.get(id).await?,
                Err(_) => None,
            },
        };
        let order = found.ok_or_else(|| StaffError::UnknownBarcode(code.to_string()))?;
        self.update_status(order.id, status::SHIPPED, actor).await
    }

    fn manual_item(&self, item: ManualItem) -> NormalizedItem {
        NormalizedItem {
            name: item
                .name
                .filter(|name| !name.trim().is_empty())
                .unwrap_or_else(|| DEFAULT_ITEM_NAME.to_string()),
            quantity: item.quantity.filter(|qty| *qty > 0).unwrap_or(1),
            image_src: item
                .image_src
                .filter(|src| !src.trim().is_empty())
                .unwrap_or_else(|| self.placeholder_image.to_string()),
            sku: item.sku,
            url: None,
            material: item.material,
            dimensions: item.dimensions,
            product_note: item.product_note,
            sample_data: None,
        }
    }
}
