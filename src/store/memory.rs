use super::{
    Comment, NewActivity, NewComment, NewOrder, Order, OrderActivity, OrderPatch, OrderRefresh,
    OrderStore, StoreError, sort_history,
};
use async_trait::async_trait;
use chrono::Utc;
use std::collections::{BTreeMap, HashMap};
use tokio::sync::Mutex;

/// Process-local store used when no `DATABASE_URL` is configured and in tests.
#[derive(Default)]
pub struct MemoryStore {
    state: Mutex<MemoryState>,
}

#[derive(Default)]
struct MemoryState {
    next_id: i64,
    orders: BTreeMap<i64, Order>,
    by_key: HashMap<String, i64>,
    settings: HashMap<String, String>,
}

impl MemoryState {
    fn allocate_id(&mut self) -> i64 {
        self.next_id += 1;
        self.next_id
    }

    fn order_mut(&mut self, id: i64) -> Result<&mut Order, StoreError> {
        self.orders.get_mut(&id).ok_or(StoreError::NotFound(id))
    }
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

fn snapshot(order: &Order) -> Order {
    let mut copy = order.clone();
    sort_history(&mut copy);
    copy
}

#[async_trait]
impl OrderStore for MemoryStore {
    async fn find_by_external_key(&self, key: &str) -> Result<Option<Order>, StoreError> {
        let guard = self.state.lock().await;
        Ok(guard
            .by_key
            .get(key)
            .and_then(|id| guard.orders.get(id))
            .map(snapshot))
    }

    async fn get(&self, id: i64) -> Result<Option<Order>, StoreError> {
        let guard = self.state.lock().await;
        Ok(guard.orders.get(&id).map(snapshot))
    }

    async fn list(&self, status: Option<&str>) -> Result<Vec<Order>, StoreError> {
        let guard = self.state.lock().await;
        let mut orders: Vec<Order> = guard
            .orders
            .values()
            .filter(|order| status.is_none_or(|wanted| order.status == wanted))
            .map(snapshot)
            .collect();
        orders.sort_by(|a, b| b.updated_at.cmp(&a.updated_at).then(b.id.cmp(&a.id)));
        Ok(orders)
    }

    async fn insert_order(&self, order: NewOrder) -> Result<Order, StoreError> {
        let mut guard = self.state.lock().await;
        if guard.by_key.contains_key(&order.external_key) {
            return Err(StoreError::Duplicate(order.external_key));
        }
        let id = guard.allocate_id();
        let now = Utc::now();
        let fields = order.fields;
        let created = Order {
            id,
            external_key: order.external_key,
            customer: fields.customer,
            phone: fields.phone,
            email: fields.email,
            address: fields.address,
            city: fields.city,
            total: fields.total,
            status: order.status,
            labels: order.labels,
            assigned_to: order.assigned_to,
            tracking_number: None,
            print_notes: None,
            note: fields.note,
            payment_method: fields.payment_method,
            cargo_barcode: fields.cargo_barcode,
            cargo_tracking_number: fields.cargo_tracking_number,
            has_notification: order.has_notification,
            date: fields.date,
            created_at: now,
            updated_at: now,
            items: order.items,
            comments: Vec::new(),
            activities: Vec::new(),
        };
        guard.by_key.insert(created.external_key.clone(), id);
        guard.orders.insert(id, created.clone());
        Ok(created)
    }

    async fn refresh_order(&self, id: i64, refresh: OrderRefresh) -> Result<Order, StoreError> {
        let mut guard = self.state.lock().await;
        let order = guard.order_mut(id)?;
        let fields = refresh.fields;
        order.customer = fields.customer;
        order.phone = fields.phone;
        order.email = fields.email;
        order.address = fields.address;
        order.city = fields.city;
        order.total = fields.total;
        order.note = fields.note;
        order.payment_method = fields.payment_method;
        if fields.cargo_barcode.is_some() {
            order.cargo_barcode = fields.cargo_barcode;
        }
        if fields.cargo_tracking_number.is_some() {
            order.cargo_tracking_number = fields.cargo_tracking_number;
        }
        order.date = fields.date;
        order.status = refresh.status;
        order.labels = refresh.labels;
        order.items = refresh.items;
        order.has_notification = true;
        order.updated_at = Utc::now();
        Ok(snapshot(order))
    }

    async fn update_order(&self, id: i64, patch: OrderPatch) -> Result<Order, StoreError> {
        let mut guard = self.state.lock().await;
        let order = guard.order_mut(id)?;
        patch.apply(order);
        order.updated_at = Utc::now();
        Ok(snapshot(order))
    }

    async fn append_activity(
        &self,
        order_id: i64,
        activity: NewActivity,
    ) -> Result<OrderActivity, StoreError> {
        let mut guard = self.state.lock().await;
        guard.order_mut(order_id)?;
        let entry = OrderActivity {
            id: guard.allocate_id(),
            author: activity.author,
            action: activity.action,
            details: activity.details,
            timestamp: Utc::now(),
        };
        guard.order_mut(order_id)?.activities.push(entry.clone());
        Ok(entry)
    }

    async fn add_comment(
        &self,
        order_id: i64,
        comment: NewComment,
    ) -> Result<Comment, StoreError> {
        let mut guard = self.state.lock().await;
        guard.order_mut(order_id)?;
        let entry = Comment {
            id: guard.allocate_id(),
            author: comment.author,
            message: comment.message,
            timestamp: Utc::now(),
            attachments: comment.attachments,
        };
        guard.order_mut(order_id)?.comments.push(entry.clone());
        Ok(entry)
    }

    async fn settings(&self) -> Result<HashMap<String, String>, StoreError> {
        Ok(self.state.lock().await.settings.clone())
    }

    async fn put_setting(&self, key: &str, value: &str) -> Result<(), StoreError> {
        self.state
            .lock()
            .await
            .settings
            .insert(key.to_string(), value.to_string());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::test_support::{exercise_store, new_order};

    #[tokio::test]
    async fn memory_store_contract() {
        exercise_store(&MemoryStore::new()).await;
    }

    #[tokio::test]
    async fn concurrent_inserts_of_one_key_admit_a_single_order() {
        let store = std::sync::Arc::new(MemoryStore::new());
        let mut handles = Vec::new();
        for _ in 0..8 {
            let store = store.clone();
            handles.push(tokio::spawn(async move {
                store.insert_order(new_order("WC-77", "incoming")).await
            }));
        }
        let mut created = 0;
        for handle in handles {
            if handle.await.expect("join").is_ok() {
                created += 1;
            }
        }
        assert_eq!(created, 1);
        assert_eq!(store.list(None).await.expect("list").len(), 1);
    }
}
