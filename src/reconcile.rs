use crate::activity::{ActionKind, ActivityLogger, SYSTEM_AUTHOR, delivered};
use crate::idempotency::ExternalKey;
use crate::locale::compose_city;
use crate::marketplace::{IncomingOrder, MarketplaceOrder};
use crate::normalize::{NormalizedItem, normalize_item};
use crate::status::{self, NEW_LABEL};
use crate::store::{NewOrder, Order, OrderFields, OrderRefresh, OrderStore, StoreError};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::{collections::BTreeSet, sync::Arc, time::Instant};
use thiserror::Error;
use tracing::{info, warn};

const GUEST_CUSTOMER: &str = "Misafir";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IngestPath {
    /// Push delivery: an existing order is a duplicate.
    Webhook,
    /// Pull reconciliation: an existing order is refreshed in place.
    PullSync,
}

impl IngestPath {
    pub fn as_str(self) -> &'static str {
        match self {
            IngestPath::Webhook => "webhook",
            IngestPath::PullSync => "pull_sync",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Disposition {
    Created,
    Refreshed,
    Duplicate,
}

impl Disposition {
    pub fn as_str(self) -> &'static str {
        match self {
            Disposition::Created => "created",
            Disposition::Refreshed => "refreshed",
            Disposition::Duplicate => "duplicate",
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct ReconcileOutcome {
    pub disposition: Disposition,
    pub order_id: i64,
    pub external_key: String,
    pub logs: Vec<String>,
}

impl ReconcileOutcome {
    pub fn created(&self) -> bool {
        self.disposition == Disposition::Created
    }
}

/// What happens to staff-applied labels when a pull refresh rewrites an order.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LabelPolicy {
    /// Labels become exactly the source-derived set.
    #[default]
    Reset,
    /// Source-derived labels are added to the existing ones.
    Preserve,
}

impl LabelPolicy {
    pub fn parse(raw: &str) -> Option<Self> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "reset" => Some(LabelPolicy::Reset),
            "preserve" => Some(LabelPolicy::Preserve),
            _ => None,
        }
    }
}

#[derive(Debug, Error)]
pub enum ReconcileError {
    #[error(transparent)]
    Store(#[from] StoreError),
}

/// Normalized order content ready to persist.
struct Prepared {
    key: ExternalKey,
    external_id: String,
    source_label: &'static str,
    fields: OrderFields,
    status: &'static str,
    labels: BTreeSet<String>,
    items: Vec<NormalizedItem>,
}

#[derive(Clone)]
pub struct Reconciler {
    store: Arc<dyn OrderStore>,
    activity: ActivityLogger,
    label_policy: LabelPolicy,
    placeholder_image: Arc<str>,
}

impl Reconciler {
    pub fn new(
        store: Arc<dyn OrderStore>,
        label_policy: LabelPolicy,
        placeholder_image: impl Into<Arc<str>>,
    ) -> Self {
        Self {
            activity: ActivityLogger::new(store.clone()),
            store,
            label_policy,
            placeholder_image: placeholder_image.into(),
        }
    }

    pub fn store(&self) -> &Arc<dyn OrderStore> {
        &self.store
    }

    /// One external payload into at most one store write.
    pub async fn reconcile(
        &self,
        payload: MarketplaceOrder,
        path: IngestPath,
    ) -> Result<ReconcileOutcome, ReconcileError> {
        let started = Instant::now();
        let prepared = self.prepare(IncomingOrder::from(payload));
        let existing = self.store.find_by_external_key(prepared.key.as_str()).await?;

        let outcome = match (existing, path) {
            (Some(existing), IngestPath::Webhook) => duplicate(&prepared, existing.id),
            (Some(existing), IngestPath::PullSync) => self.refresh(prepared, existing).await?,
            (None, _) => self.create(prepared, path).await?,
        };

        crate::metrics::ingest_outcome(path.as_str(), outcome.disposition.as_str());
        crate::metrics::stage_elapsed("reconcile", started.elapsed().as_millis());
        info!(
            target = "orderdesk.sync",
            path = path.as_str(),
            disposition = outcome.disposition.as_str(),
            order_id = outcome.order_id,
            external_key = %outcome.external_key,
            "order reconciled"
        );
        Ok(outcome)
    }

    fn prepare(&self, incoming: IncomingOrder) -> Prepared {
        let mapping = status::map_external_status(&incoming.external_status);
        let mut labels: BTreeSet<String> = BTreeSet::new();
        labels.insert(incoming.source.label().to_string());
        labels.extend(mapping.labels.iter().map(|label| label.to_string()));

        let items = incoming
            .items
            .iter()
            .map(|item| normalize_item(item, &self.placeholder_image))
            .collect();
        let city = compose_city(incoming.city.as_deref(), incoming.state.as_deref());

        Prepared {
            key: ExternalKey::new(incoming.source, &incoming.external_id),
            external_id: incoming.external_id,
            source_label: incoming.source.label(),
            fields: OrderFields {
                customer: incoming
                    .customer
                    .filter(|name| !name.trim().is_empty())
                    .unwrap_or_else(|| GUEST_CUSTOMER.to_string()),
                phone: incoming.phone,
                email: incoming.email,
                address: incoming.address,
                city,
                total: incoming.total,
                note: incoming.note.filter(|note| !note.trim().is_empty()),
                payment_method: incoming.payment_method,
                cargo_barcode: incoming.cargo_barcode,
                cargo_tracking_number: incoming.cargo_tracking_number,
                date: incoming.date.unwrap_or_else(Utc::now),
            },
            status: mapping.status,
            labels,
            items,
        }
    }

    async fn create(
        &self,
        prepared: Prepared,
        path: IngestPath,
    ) -> Result<ReconcileOutcome, ReconcileError> {
        let mut labels = prepared.labels.clone();
        labels.insert(NEW_LABEL.to_string());
        let new_order = NewOrder {
            external_key: prepared.key.as_str().to_string(),
            fields: prepared.fields.clone(),
            status: prepared.status.to_string(),
            labels,
            assigned_to: None,
            has_notification: true,
            items: prepared.items.clone(),
        };
        match self.store.insert_order(new_order).await {
            Ok(order) => {
                self.note_completion(&prepared, "", order.id).await?;
                Ok(ReconcileOutcome {
                    disposition: Disposition::Created,
                    order_id: order.id,
                    external_key: prepared.key.into_string(),
                    logs: vec![format!("Order {}: Synced successfully.", prepared.external_id)],
                })
            }
            // A concurrent first delivery won the insert.
            Err(StoreError::Duplicate(key)) => {
                let winner = self
                    .store
                    .find_by_external_key(&key)
                    .await?
                    .ok_or_else(|| StoreError::Database(format!("{key} vanished after insert race")))?;
                warn!(
                    target = "orderdesk.sync",
                    external_key = %key,
                    "lost insert race for external key"
                );
                match path {
                    IngestPath::Webhook => Ok(duplicate(&prepared, winner.id)),
                    IngestPath::PullSync => self.refresh(prepared, winner).await,
                }
            }
            Err(err) => Err(err.into()),
        }
    }

    async fn refresh(
        &self,
        prepared: Prepared,
        existing: Order,
    ) -> Result<ReconcileOutcome, ReconcileError> {
        let labels = match self.label_policy {
            LabelPolicy::Reset => prepared.labels.clone(),
            LabelPolicy::Preserve => existing
                .labels
                .union(&prepared.labels)
                .cloned()
                .collect(),
        };
        let refreshed = self
            .store
            .refresh_order(
                existing.id,
                OrderRefresh {
                    fields: prepared.fields.clone(),
                    status: prepared.status.to_string(),
                    labels,
                    items: prepared.items.clone(),
                },
            )
            .await?;
        self.note_completion(&prepared, &existing.status, refreshed.id)
            .await?;
        Ok(ReconcileOutcome {
            disposition: Disposition::Refreshed,
            order_id: refreshed.id,
            external_key: prepared.key.into_string(),
            logs: vec![format!(
                "Order {}: Synced successfully (updated in place).",
                prepared.external_id
            )],
        })
    }

    async fn note_completion(
        &self,
        prepared: &Prepared,
        previous_status: &str,
        order_id: i64,
    ) -> Result<(), StoreError> {
        if prepared.status == status::COMPLETED && !status::is_completed(previous_status) {
            self.activity
                .record(
                    order_id,
                    SYSTEM_AUTHOR,
                    ActionKind::StatusChange,
                    delivered(prepared.source_label),
                )
                .await?;
        }
        Ok(())
    }
}

fn duplicate(prepared: &Prepared, order_id: i64) -> ReconcileOutcome {
    ReconcileOutcome {
        disposition: Disposition::Duplicate,
        order_id,
        external_key: prepared.key.as_str().to_string(),
        logs: vec![format!(
            "Order {}: already ingested, skipped.",
            prepared.external_id
        )],
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::idempotency::Source;
    use crate::normalize::image::DEFAULT_PLACEHOLDER;
    use crate::store::{MemoryStore, NewActivity, NewComment, OrderPatch, test_support::FaultyStore};
    use serde_json::{Value, json};

    fn woo(payload: Value) -> MarketplaceOrder {
        MarketplaceOrder::decode(Source::WooCommerce, &payload).expect("valid payload")
    }

    fn scenario_payload() -> Value {
        json!({
            "id": 500,
            "billing": {"first_name": "A", "last_name": "B"},
            "status": "processing",
            "line_items": []
        })
    }

    fn reconciler(store: Arc<dyn OrderStore>, policy: LabelPolicy) -> Reconciler {
        Reconciler::new(store, policy, DEFAULT_PLACEHOLDER)
    }

    #[tokio::test]
    async fn repeated_webhook_delivery_yields_one_order() {
        let store = Arc::new(MemoryStore::new());
        let engine = reconciler(store.clone(), LabelPolicy::Reset);

        let first = engine
            .reconcile(woo(scenario_payload()), IngestPath::Webhook)
            .await
            .expect("first");
        assert!(first.created());
        assert_eq!(first.external_key, "WC-500");

        let mut changed = scenario_payload();
        changed["billing"]["first_name"] = json!("Başka");
        for _ in 0..3 {
            let again = engine
                .reconcile(woo(changed.clone()), IngestPath::Webhook)
                .await
                .expect("again");
            assert_eq!(again.disposition, Disposition::Duplicate);
            assert_eq!(again.order_id, first.order_id);
        }

        let orders = store.list(None).await.expect("list");
        assert_eq!(orders.len(), 1);
        assert_eq!(orders[0].external_key, "WC-500");
        assert_eq!(orders[0].status, status::INCOMING);
        assert_eq!(orders[0].customer, "A B");
        let labels: Vec<&str> = orders[0].labels.iter().map(String::as_str).collect();
        assert_eq!(labels, vec!["WooCommerce", "new"]);
    }

    #[tokio::test]
    async fn failed_payment_lands_in_incoming_with_label() {
        let store = Arc::new(MemoryStore::new());
        let engine = reconciler(store.clone(), LabelPolicy::Reset);
        let mut payload = scenario_payload();
        payload["status"] = json!("cancelled");
        let outcome = engine
            .reconcile(woo(payload), IngestPath::Webhook)
            .await
            .expect("ingest");
        let order = store.get(outcome.order_id).await.expect("get").expect("order");
        assert_eq!(order.status, status::INCOMING);
        assert!(order.labels.contains(status::PAYMENT_FAILED_LABEL));
    }

    #[tokio::test]
    async fn pull_refresh_keeps_id_history_and_logs_completion_once() {
        let store = Arc::new(MemoryStore::new());
        let engine = reconciler(store.clone(), LabelPolicy::Reset);
        let created = engine
            .reconcile(woo(scenario_payload()), IngestPath::PullSync)
            .await
            .expect("create");

        store
            .append_activity(
                created.order_id,
                NewActivity {
                    author: "Mehmet".into(),
                    action: "NOTE_ADDED".into(),
                    details: "Yeni işlem notu ekledi.".into(),
                },
            )
            .await
            .expect("activity");
        store
            .add_comment(
                created.order_id,
                NewComment {
                    author: "Mehmet".into(),
                    message: "Prova onaylandı".into(),
                    attachments: Vec::new(),
                },
            )
            .await
            .expect("comment");
        store
            .update_order(
                created.order_id,
                OrderPatch {
                    labels: Some(["Acil".to_string()].into_iter().collect()),
                    has_notification: Some(false),
                    ..OrderPatch::default()
                },
            )
            .await
            .expect("manual label");

        let mut completed = scenario_payload();
        completed["status"] = json!("completed");
        completed["line_items"] = json!([{"name": "Poster", "quantity": 3, "meta_data": []}]);
        for _ in 0..2 {
            let outcome = engine
                .reconcile(woo(completed.clone()), IngestPath::PullSync)
                .await
                .expect("refresh");
            assert_eq!(outcome.disposition, Disposition::Refreshed);
            assert_eq!(outcome.order_id, created.order_id);
        }

        let order = store.get(created.order_id).await.expect("get").expect("order");
        assert_eq!(order.status, status::COMPLETED);
        assert!(order.has_notification);
        assert_eq!(order.comments.len(), 1);
        assert_eq!(order.activities.len(), 2);
        assert_eq!(order.activities[0].author, SYSTEM_AUTHOR);
        assert_eq!(order.activities[0].details, "Müşteriye teslim edildi (WooCommerce)");
        assert_eq!(order.items.len(), 1);
        assert_eq!(order.items[0].quantity, 3);
        let labels: Vec<&str> = order.labels.iter().map(String::as_str).collect();
        assert_eq!(labels, vec!["WooCommerce"]);
    }

    #[tokio::test]
    async fn preserve_policy_unions_manual_labels() {
        let store = Arc::new(MemoryStore::new());
        let engine = reconciler(store.clone(), LabelPolicy::Preserve);
        let created = engine
            .reconcile(woo(scenario_payload()), IngestPath::PullSync)
            .await
            .expect("create");
        store
            .update_order(
                created.order_id,
                OrderPatch {
                    labels: Some(["Acil".to_string()].into_iter().collect()),
                    ..OrderPatch::default()
                },
            )
            .await
            .expect("label");
        engine
            .reconcile(woo(scenario_payload()), IngestPath::PullSync)
            .await
            .expect("refresh");
        let order = store.get(created.order_id).await.expect("get").expect("order");
        let labels: Vec<&str> = order.labels.iter().map(String::as_str).collect();
        assert_eq!(labels, vec!["Acil", "WooCommerce"]);
    }

    #[tokio::test]
    async fn city_and_items_are_normalized() {
        let store = Arc::new(MemoryStore::new());
        let engine = reconciler(store.clone(), LabelPolicy::Reset);
        let payload = json!({
            "id": 501,
            "billing": {"first_name": "", "city": "Bornova", "state": "TR35"},
            "status": "on-hold",
            "line_items": [{
                "name": "Duvar Kağıdı",
                "quantity": 0,
                "meta_data": [
                    {"key": "Genişlik", "value": "100"},
                    {"key": "Yükseklik", "value": "200"},
                    {"key": "Toplam Ölçü", "value": "2m2"}
                ]
            }]
        });
        let outcome = engine
            .reconcile(woo(payload), IngestPath::Webhook)
            .await
            .expect("ingest");
        let order = store.get(outcome.order_id).await.expect("get").expect("order");
        assert_eq!(order.customer, GUEST_CUSTOMER);
        assert_eq!(order.city.as_deref(), Some("Bornova / İZMİR"));
        assert_eq!(order.status, status::AWAITING_CUSTOMER);
        assert_eq!(order.items[0].quantity, 1);
        assert_eq!(
            order.items[0].dimensions.as_deref(),
            Some("100 x 200 cm (2 m²)")
        );
    }

    #[tokio::test]
    async fn failed_refresh_leaves_previous_order_and_history() {
        let store = Arc::new(FaultyStore {
            fail_refresh: true,
            ..FaultyStore::default()
        });
        let engine = reconciler(store.clone(), LabelPolicy::Reset);
        let created = engine
            .reconcile(woo(scenario_payload()), IngestPath::PullSync)
            .await
            .expect("create");
        store
            .add_comment(
                created.order_id,
                NewComment {
                    author: "Mehmet".into(),
                    message: "Not".into(),
                    attachments: Vec::new(),
                },
            )
            .await
            .expect("comment");
        let before = store.get(created.order_id).await.expect("get").expect("order");

        let mut completed = scenario_payload();
        completed["status"] = json!("completed");
        let err = engine
            .reconcile(woo(completed), IngestPath::PullSync)
            .await
            .expect_err("refresh fails");
        assert!(matches!(err, ReconcileError::Store(StoreError::Database(_))));

        let after = store.get(created.order_id).await.expect("get").expect("order");
        assert_eq!(after, before);
        assert_eq!(after.comments.len(), 1);
        assert!(after.activities.is_empty());
    }
}
