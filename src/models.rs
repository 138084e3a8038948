use crate::store::{Attachment, OrderPatch};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use serde_with::skip_serializing_none;
use std::collections::{BTreeMap, BTreeSet};

/// Settings the admin endpoint may write; diagnostics keys are server-owned.
pub const WRITABLE_SETTINGS: &[&str] = &[
    "wc_url",
    "wc_key",
    "wc_secret",
    "etsy_shop_id",
    "etsy_api_key",
    "etsy_access_token",
    "etsy_refresh_token",
];

#[skip_serializing_none]
#[derive(Debug, Serialize)]
pub struct ApiError {
    pub error: String,
    pub detail: Option<String>,
    /// Machine-readable code when `error` carries the human-readable message.
    pub code: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
pub struct OrderListQuery {
    #[serde(default)]
    pub status: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct StatusUpdateRequest {
    pub status: String,
}

/// Detail-panel edit. Absent fields are left as they are.
#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OrderEditRequest {
    #[serde(default)]
    pub status: Option<String>,
    #[serde(default)]
    pub labels: Option<BTreeSet<String>>,
    #[serde(default)]
    pub assigned_to: Option<String>,
    #[serde(default)]
    pub customer: Option<String>,
    #[serde(default)]
    pub phone: Option<String>,
    #[serde(default)]
    pub email: Option<String>,
    #[serde(default)]
    pub address: Option<String>,
    #[serde(default)]
    pub city: Option<String>,
    #[serde(default)]
    pub tracking_number: Option<String>,
    #[serde(default)]
    pub print_notes: Option<String>,
}

impl From<OrderEditRequest> for OrderPatch {
    fn from(edit: OrderEditRequest) -> Self {
        OrderPatch {
            status: edit.status,
            labels: edit.labels,
            assigned_to: edit.assigned_to,
            customer: edit.customer,
            phone: edit.phone,
            email: edit.email,
            address: edit.address,
            city: edit.city,
            tracking_number: edit.tracking_number,
            print_notes: edit.print_notes,
            ..OrderPatch::default()
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct CommentRequest {
    #[serde(default)]
    pub message: String,
    #[serde(default)]
    pub attachments: Vec<Attachment>,
}

#[derive(Debug, Deserialize)]
pub struct ActivityRequest {
    pub action: String,
    #[serde(default)]
    pub details: String,
}

#[derive(Debug, Deserialize)]
pub struct ScanRequest {
    pub code: String,
}

#[derive(Debug, Deserialize)]
pub struct SettingsUpdate {
    pub settings: BTreeMap<String, String>,
}

impl SettingsUpdate {
    pub fn unknown_keys(&self) -> Vec<&str> {
        self.settings
            .keys()
            .map(String::as_str)
            .filter(|key| !WRITABLE_SETTINGS.contains(key))
            .collect()
    }
}

#[derive(Debug, Serialize)]
pub struct SettingsSaved {
    pub saved: Vec<String>,
}

#[derive(Debug, Serialize)]
pub struct JobAccepted {
    pub job_id: String,
}

#[derive(Debug, Default, Serialize)]
pub struct LastWebhooks {
    pub order: Option<Value>,
    pub cargo: Option<Value>,
}
