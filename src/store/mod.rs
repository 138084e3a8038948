pub mod memory;
pub mod sqlite;

use crate::normalize::NormalizedItem;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashMap};
use thiserror::Error;

pub use memory::MemoryStore;
pub use sqlite::SqliteStore;

pub type OrderItem = NormalizedItem;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Order {
    pub id: i64,
    pub external_key: String,
    pub customer: String,
    pub phone: Option<String>,
    pub email: Option<String>,
    pub address: Option<String>,
    pub city: Option<String>,
    pub total: String,
    pub status: String,
    pub labels: BTreeSet<String>,
    pub assigned_to: Option<String>,
    pub tracking_number: Option<String>,
    pub print_notes: Option<String>,
    pub note: Option<String>,
    pub payment_method: Option<String>,
    pub cargo_barcode: Option<String>,
    pub cargo_tracking_number: Option<String>,
    pub has_notification: bool,
    pub date: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    #[serde(default)]
    pub items: Vec<OrderItem>,
    #[serde(default)]
    pub comments: Vec<Comment>,
    #[serde(default)]
    pub activities: Vec<OrderActivity>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OrderActivity {
    pub id: i64,
    pub author: String,
    pub action: String,
    pub details: String,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Comment {
    pub id: i64,
    pub author: String,
    pub message: String,
    pub timestamp: DateTime<Utc>,
    #[serde(default)]
    pub attachments: Vec<Attachment>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Attachment {
    pub name: String,
    #[serde(rename = "type")]
    pub kind: AttachmentKind,
    pub url: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AttachmentKind {
    Image,
    File,
}

/// Order content derived from an external payload or a manual entry form.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct OrderFields {
    pub customer: String,
    pub phone: Option<String>,
    pub email: Option<String>,
    pub address: Option<String>,
    pub city: Option<String>,
    pub total: String,
    pub note: Option<String>,
    pub payment_method: Option<String>,
    pub cargo_barcode: Option<String>,
    pub cargo_tracking_number: Option<String>,
    pub date: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct NewOrder {
    pub external_key: String,
    pub fields: OrderFields,
    pub status: String,
    pub labels: BTreeSet<String>,
    pub assigned_to: Option<String>,
    pub has_notification: bool,
    pub items: Vec<OrderItem>,
}

/// Re-sync of an existing order. Staff-owned fields (assignee, tracking number,
/// print notes) are left alone; cargo fields are only overwritten when present.
#[derive(Debug, Clone)]
pub struct OrderRefresh {
    pub fields: OrderFields,
    pub status: String,
    pub labels: BTreeSet<String>,
    pub items: Vec<OrderItem>,
}

/// Partial staff edit; `None` leaves the field unchanged.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct OrderPatch {
    pub status: Option<String>,
    pub labels: Option<BTreeSet<String>>,
    pub assigned_to: Option<String>,
    pub customer: Option<String>,
    pub phone: Option<String>,
    pub email: Option<String>,
    pub address: Option<String>,
    pub city: Option<String>,
    pub tracking_number: Option<String>,
    pub print_notes: Option<String>,
    pub cargo_barcode: Option<String>,
    pub cargo_tracking_number: Option<String>,
    pub has_notification: Option<bool>,
}

impl OrderPatch {
    pub fn is_empty(&self) -> bool {
        *self == Self::default()
    }

    pub(crate) fn apply(self, order: &mut Order) {
        fn set<T>(slot: &mut T, value: Option<T>) {
            if let Some(value) = value {
                *slot = value;
            }
        }
        fn set_opt(slot: &mut Option<String>, value: Option<String>) {
            if value.is_some() {
                *slot = value;
            }
        }
        set(&mut order.status, self.status);
        set(&mut order.labels, self.labels);
        set(&mut order.customer, self.customer);
        set(&mut order.has_notification, self.has_notification);
        set_opt(&mut order.assigned_to, self.assigned_to);
        set_opt(&mut order.phone, self.phone);
        set_opt(&mut order.email, self.email);
        set_opt(&mut order.address, self.address);
        set_opt(&mut order.city, self.city);
        set_opt(&mut order.tracking_number, self.tracking_number);
        set_opt(&mut order.print_notes, self.print_notes);
        set_opt(&mut order.cargo_barcode, self.cargo_barcode);
        set_opt(&mut order.cargo_tracking_number, self.cargo_tracking_number);
    }
}

#[derive(Debug, Clone)]
pub struct NewActivity {
    pub author: String,
    pub action: String,
    pub details: String,
}

#[derive(Debug, Clone)]
pub struct NewComment {
    pub author: String,
    pub message: String,
    pub attachments: Vec<Attachment>,
}

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("order {0} not found")]
    NotFound(i64),
    #[error("order with external key {0} already exists")]
    Duplicate(String),
    #[error("database error: {0}")]
    Database(String),
}

/// Persistent order entities. Listing returns orders newest `updated_at`
/// first, each with its items, comments (oldest first) and activities
/// (newest first).
#[async_trait]
pub trait OrderStore: Send + Sync {
    async fn find_by_external_key(&self, key: &str) -> Result<Option<Order>, StoreError>;

    async fn get(&self, id: i64) -> Result<Option<Order>, StoreError>;

    async fn list(&self, status: Option<&str>) -> Result<Vec<Order>, StoreError>;

    /// Fails with [`StoreError::Duplicate`] when the external key already exists.
    async fn insert_order(&self, order: NewOrder) -> Result<Order, StoreError>;

    /// Updates the order row and replaces its items in one transaction. The id,
    /// comments and activity log are untouched.
    async fn refresh_order(&self, id: i64, refresh: OrderRefresh) -> Result<Order, StoreError>;

    async fn update_order(&self, id: i64, patch: OrderPatch) -> Result<Order, StoreError>;

    async fn append_activity(
        &self,
        order_id: i64,
        activity: NewActivity,
    ) -> Result<OrderActivity, StoreError>;

    async fn add_comment(&self, order_id: i64, comment: NewComment)
    -> Result<Comment, StoreError>;

    async fn settings(&self) -> Result<HashMap<String, String>, StoreError>;

    async fn put_setting(&self, key: &str, value: &str) -> Result<(), StoreError>;
}

pub(crate) fn sort_history(order: &mut Order) {
    order
        .comments
        .sort_by(|a, b| a.timestamp.cmp(&b.timestamp).then(a.id.cmp(&b.id)));
    order
        .activities
        .sort_by(|a, b| b.timestamp.cmp(&a.timestamp).then(b.id.cmp(&a.id)));
}

#[cfg(test)]
pub(crate) mod test_support {
    use super::*;
    use chrono::TimeZone;

    pub fn new_order(key: &str, status: &str) -> NewOrder {
        NewOrder {
            external_key: key.to_string(),
            fields: OrderFields {
                customer: "Ayşe Yılmaz".into(),
                phone: Some("05550000000".into()),
                email: Some("ayse@example.com".into()),
                address: Some("Moda Cd. 1".into()),
                city: Some("Kadıköy / İSTANBUL".into()),
                total: "450.00 ₺".into(),
                note: None,
                payment_method: Some("Kredi Kartı".into()),
                cargo_barcode: None,
                cargo_tracking_number: None,
                date: Utc.with_ymd_and_hms(2025, 12, 21, 10, 0, 0).unwrap(),
            },
            status: status.to_string(),
            labels: ["WooCommerce".to_string()].into_iter().collect(),
            assigned_to: None,
            has_notification: true,
            items: vec![item("Duvar Kağıdı")],
        }
    }

    /// Memory store that fails the selected operations with a database error.
    #[derive(Default)]
    pub struct FaultyStore {
        pub inner: super::MemoryStore,
        pub fail_lookup: bool,
        pub fail_refresh: bool,
    }

    impl FaultyStore {
        fn fault() -> StoreError {
            StoreError::Database("disk I/O error".into())
        }
    }

    #[async_trait]
    impl OrderStore for FaultyStore {
        async fn find_by_external_key(&self, key: &str) -> Result<Option<Order>, StoreError> {
            if self.fail_lookup {
                return Err(Self::fault());
            }
            self.inner.find_by_external_key(key).await
        }

        async fn get(&self, id: i64) -> Result<Option<Order>, StoreError> {
            self.inner.get(id).await
        }

        async fn list(&self, status: Option<&str>) -> Result<Vec<Order>, StoreError> {
            self.inner.list(status).await
        }

        async fn insert_order(&self, order: NewOrder) -> Result<Order, StoreError> {
            self.inner.insert_order(order).await
        }

        async fn refresh_order(&self, id: i64, refresh: OrderRefresh) -> Result<Order, StoreError> {
            if self.fail_refresh {
                return Err(Self::fault());
            }
            self.inner.refresh_order(id, refresh).await
        }

        async fn update_order(&self, id: i64, patch: OrderPatch) -> Result<Order, StoreError> {
            self.inner.update_order(id, patch).await
        }

        async fn append_activity(
            &self,
            order_id: i64,
            activity: NewActivity,
        ) -> Result<OrderActivity, StoreError> {
            self.inner.append_activity(order_id, activity).await
        }

        async fn add_comment(
            &self,
            order_id: i64,
            comment: NewComment,
        ) -> Result<Comment, StoreError> {
            self.inner.add_comment(order_id, comment).await
        }

        async fn settings(&self) -> Result<HashMap<String, String>, StoreError> {
            self.inner.settings().await
        }

        async fn put_setting(&self, key: &str, value: &str) -> Result<(), StoreError> {
            self.inner.put_setting(key, value).await
        }
    }

    pub fn item(name: &str) -> OrderItem {
        OrderItem {
            name: name.into(),
            quantity: 1,
            image_src: crate::normalize::image::DEFAULT_PLACEHOLDER.into(),
            sku: None,
            url: None,
            material: Some("Mat".into()),
            dimensions: Some("100 x 200 cm".into()),
            product_note: None,
            sample_data: None,
        }
    }

    /// Behaviour every `OrderStore` implementation must share.
    pub async fn exercise_store(store: &dyn OrderStore) {
        let created = store
            .insert_order(new_order("WC-1", "incoming"))
            .await
            .expect("insert");
        assert!(created.id > 0);
        assert_eq!(created.items.len(), 1);

        let err = store
            .insert_order(new_order("WC-1", "incoming"))
            .await
            .expect_err("duplicate key");
        assert!(matches!(err, StoreError::Duplicate(ref key) if key == "WC-1"));

        let found = store
            .find_by_external_key("WC-1")
            .await
            .expect("lookup")
            .expect("present");
        assert_eq!(found.id, created.id);
        assert!(store.find_by_external_key("WC-2").await.expect("lookup").is_none());

        store
            .append_activity(
                created.id,
                NewActivity {
                    author: "Mehmet".into(),
                    action: "NOTE_ADDED".into(),
                    details: "ilk".into(),
                },
            )
            .await
            .expect("activity");
        store
            .append_activity(
                created.id,
                NewActivity {
                    author: "Mehmet".into(),
                    action: "NOTE_ADDED".into(),
                    details: "ikinci".into(),
                },
            )
            .await
            .expect("activity");
        store
            .add_comment(
                created.id,
                NewComment {
                    author: "Mehmet".into(),
                    message: "Dosya hazır".into(),
                    attachments: vec![Attachment {
                        name: "prova.pdf".into(),
                        kind: AttachmentKind::File,
                        url: "https://files.example/prova.pdf".into(),
                    }],
                },
            )
            .await
            .expect("comment");

        let refreshed = store
            .refresh_order(
                created.id,
                OrderRefresh {
                    fields: OrderFields {
                        customer: "Ayşe Y.".into(),
                        ..new_order("WC-1", "completed").fields
                    },
                    status: "completed".into(),
                    labels: ["WooCommerce".to_string()].into_iter().collect(),
                    items: vec![item("Poster"), item("Tablo")],
                },
            )
            .await
            .expect("refresh");
        assert_eq!(refreshed.id, created.id);
        assert_eq!(refreshed.customer, "Ayşe Y.");
        assert_eq!(refreshed.status, "completed");
        assert!(refreshed.has_notification);
        let names: Vec<&str> = refreshed.items.iter().map(|i| i.name.as_str()).collect();
        assert_eq!(names, vec!["Poster", "Tablo"]);
        assert_eq!(refreshed.comments.len(), 1);
        assert_eq!(refreshed.comments[0].attachments.len(), 1);
        let details: Vec<&str> = refreshed
            .activities
            .iter()
            .map(|a| a.details.as_str())
            .collect();
        assert_eq!(details, vec!["ikinci", "ilk"]);

        let patched = store
            .update_order(
                created.id,
                OrderPatch {
                    tracking_number: Some("TRK-9".into()),
                    has_notification: Some(false),
                    ..OrderPatch::default()
                },
            )
            .await
            .expect("patch");
        assert_eq!(patched.tracking_number.as_deref(), Some("TRK-9"));
        assert!(!patched.has_notification);
        assert_eq!(patched.customer, "Ayşe Y.");
        assert!(patched.updated_at >= refreshed.updated_at);

        let missing = store.update_order(9_999, OrderPatch::default()).await;
        assert!(matches!(missing, Err(StoreError::NotFound(9_999))));

        let second = store
            .insert_order(new_order("ETSY-2", "incoming"))
            .await
            .expect("insert second");
        let all = store.list(None).await.expect("list");
        assert_eq!(all.len(), 2);
        assert_eq!(all[0].id, second.id);
        let completed = store.list(Some("completed")).await.expect("filtered");
        assert_eq!(completed.len(), 1);
        assert_eq!(completed[0].external_key, "WC-1");

        store.put_setting("wc_url", "https://a.example").await.expect("put");
        store.put_setting("wc_url", "https://b.example").await.expect("overwrite");
        let settings = store.settings().await.expect("settings");
        assert_eq!(settings.get("wc_url").map(String::as_str), Some("https://b.example"));
    }
}
