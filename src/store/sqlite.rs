use super::{
    Attachment, Comment, NewActivity, NewComment, NewOrder, Order, OrderActivity, OrderItem,
    OrderPatch, OrderRefresh, OrderStore, StoreError, sort_history,
};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{
    FromRow, SqliteConnection, SqlitePool,
    sqlite::{SqliteConnectOptions, SqlitePoolOptions},
};
use std::{
    collections::{BTreeSet, HashMap},
    str::FromStr,
};
use tracing::info;

const SCHEMA: &[&str] = &[
    "CREATE TABLE IF NOT EXISTS orders (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        external_key TEXT NOT NULL UNIQUE,
        customer TEXT NOT NULL,
        phone TEXT,
        email TEXT,
        address TEXT,
        city TEXT,
        total TEXT NOT NULL,
        status TEXT NOT NULL,
        labels TEXT NOT NULL DEFAULT '[]',
        assigned_to TEXT,
        tracking_number TEXT,
        print_notes TEXT,
        note TEXT,
        payment_method TEXT,
        cargo_barcode TEXT,
        cargo_tracking_number TEXT,
        has_notification INTEGER NOT NULL DEFAULT 0,
        date TEXT NOT NULL,
        created_at TEXT NOT NULL,
        updated_at TEXT NOT NULL
    )",
    "CREATE TABLE IF NOT EXISTS order_items (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        order_id INTEGER NOT NULL REFERENCES orders(id) ON DELETE CASCADE,
        position INTEGER NOT NULL,
        name TEXT NOT NULL,
        quantity INTEGER NOT NULL,
        image_src TEXT NOT NULL,
        sku TEXT,
        url TEXT,
        material TEXT,
        dimensions TEXT,
        product_note TEXT,
        sample_data TEXT
    )",
    "CREATE TABLE IF NOT EXISTS order_activities (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        order_id INTEGER NOT NULL REFERENCES orders(id) ON DELETE CASCADE,
        author TEXT NOT NULL,
        action TEXT NOT NULL,
        details TEXT NOT NULL,
        timestamp TEXT NOT NULL
    )",
    "CREATE TABLE IF NOT EXISTS comments (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        order_id INTEGER NOT NULL REFERENCES orders(id) ON DELETE CASCADE,
        author TEXT NOT NULL,
        message TEXT NOT NULL,
        attachments TEXT NOT NULL DEFAULT '[]',
        timestamp TEXT NOT NULL
    )",
    "CREATE TABLE IF NOT EXISTS system_settings (
        key TEXT PRIMARY KEY,
        value TEXT NOT NULL
    )",
    "CREATE INDEX IF NOT EXISTS idx_orders_status ON orders(status)",
    "CREATE INDEX IF NOT EXISTS idx_order_items_order ON order_items(order_id)",
    "CREATE INDEX IF NOT EXISTS idx_order_activities_order ON order_activities(order_id)",
    "CREATE INDEX IF NOT EXISTS idx_comments_order ON comments(order_id)",
];

const ORDER_COLUMNS: &str = "id, external_key, customer, phone, email, address, city, total, \
     status, labels, assigned_to, tracking_number, print_notes, note, payment_method, \
     cargo_barcode, cargo_tracking_number, has_notification, date, created_at, updated_at";

#[derive(Clone)]
pub struct SqliteStore {
    pool: SqlitePool,
}

#[derive(FromRow)]
struct OrderRow {
    id: i64,
    external_key: String,
    customer: String,
    phone: Option<String>,
    email: Option<String>,
    address: Option<String>,
    city: Option<String>,
    total: String,
    status: String,
    labels: String,
    assigned_to: Option<String>,
    tracking_number: Option<String>,
    print_notes: Option<String>,
    note: Option<String>,
    payment_method: Option<String>,
    cargo_barcode: Option<String>,
    cargo_tracking_number: Option<String>,
    has_notification: bool,
    date: DateTime<Utc>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

#[derive(FromRow)]
struct ItemRow {
    order_id: i64,
    name: String,
    quantity: i64,
    image_src: String,
    sku: Option<String>,
    url: Option<String>,
    material: Option<String>,
    dimensions: Option<String>,
    product_note: Option<String>,
    sample_data: Option<String>,
}

#[derive(FromRow)]
struct ActivityRow {
    id: i64,
    order_id: i64,
    author: String,
    action: String,
    details: String,
    timestamp: DateTime<Utc>,
}

#[derive(FromRow)]
struct CommentRow {
    id: i64,
    order_id: i64,
    author: String,
    message: String,
    attachments: String,
    timestamp: DateTime<Utc>,
}

#[derive(Default)]
struct Children {
    items: HashMap<i64, Vec<OrderItem>>,
    activities: HashMap<i64, Vec<OrderActivity>>,
    comments: HashMap<i64, Vec<Comment>>,
}

fn db_err(err: sqlx::Error) -> StoreError {
    StoreError::Database(err.to_string())
}

fn json_err(err: serde_json::Error) -> StoreError {
    StoreError::Database(format!("corrupt json column: {err}"))
}

impl OrderRow {
    fn into_order(self, children: &mut Children) -> Result<Order, StoreError> {
        let labels: BTreeSet<String> = serde_json::from_str(&self.labels).map_err(json_err)?;
        let mut order = Order {
            id: self.id,
            external_key: self.external_key,
            customer: self.customer,
            phone: self.phone,
            email: self.email,
            address: self.address,
            city: self.city,
            total: self.total,
            status: self.status,
            labels,
            assigned_to: self.assigned_to,
            tracking_number: self.tracking_number,
            print_notes: self.print_notes,
            note: self.note,
            payment_method: self.payment_method,
            cargo_barcode: self.cargo_barcode,
            cargo_tracking_number: self.cargo_tracking_number,
            has_notification: self.has_notification,
            date: self.date,
            created_at: self.created_at,
            updated_at: self.updated_at,
            items: children.items.remove(&self.id).unwrap_or_default(),
            comments: children.comments.remove(&self.id).unwrap_or_default(),
            activities: children.activities.remove(&self.id).unwrap_or_default(),
        };
        sort_history(&mut order);
        Ok(order)
    }
}

impl SqliteStore {
    /// Opens (creating if needed) the database and applies the schema.
    pub async fn connect(database_url: &str) -> Result<Self, StoreError> {
        let options = SqliteConnectOptions::from_str(database_url)
            .map_err(db_err)?
            .create_if_missing(true)
            .foreign_keys(true);
        // An in-memory database lives and dies with its single connection.
        let in_memory = database_url.contains(":memory:");
        let mut pool_options = SqlitePoolOptions::new().max_connections(if in_memory { 1 } else { 5 });
        if in_memory {
            pool_options = pool_options.idle_timeout(None).max_lifetime(None);
        }
        let pool = pool_options.connect_with(options).await.map_err(db_err)?;
        let store = Self { pool };
        store.apply_schema().await?;
        info!(target = "orderdesk.store", in_memory, "sqlite store ready");
        Ok(store)
    }

    async fn apply_schema(&self) -> Result<(), StoreError> {
        for statement in SCHEMA {
            sqlx::query(statement)
                .execute(&self.pool)
                .await
                .map_err(db_err)?;
        }
        Ok(())
    }

    async fn load_children(&self, order_id: Option<i64>) -> Result<Children, StoreError> {
        let mut children = Children::default();

        let items: Vec<ItemRow> = sqlx::query_as(
            "SELECT order_id, name, quantity, image_src, sku, url, material, dimensions, \
             product_note, sample_data FROM order_items \
             WHERE ? IS NULL OR order_id = ? ORDER BY order_id, position",
        )
        .bind(order_id)
        .bind(order_id)
        .fetch_all(&self.pool)
        .await
        .map_err(db_err)?;
        for row in items {
            children.items.entry(row.order_id).or_default().push(OrderItem {
                name: row.name,
                quantity: row.quantity,
                image_src: row.image_src,
                sku: row.sku,
                url: row.url,
                material: row.material,
                dimensions: row.dimensions,
                product_note: row.product_note,
                sample_data: row.sample_data,
            });
        }

        let activities: Vec<ActivityRow> = sqlx::query_as(
            "SELECT id, order_id, author, action, details, timestamp FROM order_activities \
             WHERE ? IS NULL OR order_id = ?",
        )
        .bind(order_id)
        .bind(order_id)
        .fetch_all(&self.pool)
        .await
        .map_err(db_err)?;
        for row in activities {
            children
                .activities
                .entry(row.order_id)
                .or_default()
                .push(OrderActivity {
                    id: row.id,
                    author: row.author,
                    action: row.action,
                    details: row.details,
                    timestamp: row.timestamp,
                });
        }

        let comments: Vec<CommentRow> = sqlx::query_as(
            "SELECT id, order_id, author, message, attachments, timestamp FROM comments \
             WHERE ? IS NULL OR order_id = ?",
        )
        .bind(order_id)
        .bind(order_id)
        .fetch_all(&self.pool)
        .await
        .map_err(db_err)?;
        for row in comments {
            let attachments: Vec<Attachment> =
                serde_json::from_str(&row.attachments).map_err(json_err)?;
            children.comments.entry(row.order_id).or_default().push(Comment {
                id: row.id,
                author: row.author,
                message: row.message,
                timestamp: row.timestamp,
                attachments,
            });
        }

        Ok(children)
    }

    async fn fetch_one(&self, id: i64) -> Result<Order, StoreError> {
        self.get(id).await?.ok_or(StoreError::NotFound(id))
    }
}

async fn insert_items(
    conn: &mut SqliteConnection,
    order_id: i64,
    items: &[OrderItem],
) -> Result<(), StoreError> {
    for (position, item) in items.iter().enumerate() {
        sqlx::query(
            "INSERT INTO order_items (order_id, position, name, quantity, image_src, sku, url, \
             material, dimensions, product_note, sample_data) \
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(order_id)
        .bind(position as i64)
        .bind(&item.name)
        .bind(item.quantity)
        .bind(&item.image_src)
        .bind(&item.sku)
        .bind(&item.url)
        .bind(&item.material)
        .bind(&item.dimensions)
        .bind(&item.product_note)
        .bind(&item.sample_data)
        .execute(&mut *conn)
        .await
        .map_err(db_err)?;
    }
    Ok(())
}

fn missing_parent(err: sqlx::Error, order_id: i64) -> StoreError {
    match &err {
        sqlx::Error::Database(db) if db.is_foreign_key_violation() => {
            StoreError::NotFound(order_id)
        }
        _ => db_err(err),
    }
}

#[async_trait]
impl OrderStore for SqliteStore {
    async fn find_by_external_key(&self, key: &str) -> Result<Option<Order>, StoreError> {
        let id: Option<i64> = sqlx::query_scalar("SELECT id FROM orders WHERE external_key = ?")
            .bind(key)
            .fetch_optional(&self.pool)
            .await
            .map_err(db_err)?;
        match id {
            Some(id) => self.get(id).await,
            None => Ok(None),
        }
    }

    async fn get(&self, id: i64) -> Result<Option<Order>, StoreError> {
        let row: Option<OrderRow> =
            sqlx::query_as(&format!("SELECT {ORDER_COLUMNS} FROM orders WHERE id = ?"))
                .bind(id)
                .fetch_optional(&self.pool)
                .await
                .map_err(db_err)?;
        let Some(row) = row else {
            return Ok(None);
        };
        let mut children = self.load_children(Some(id)).await?;
        row.into_order(&mut children).map(Some)
    }

    async fn list(&self, status: Option<&str>) -> Result<Vec<Order>, StoreError> {
        let rows: Vec<OrderRow> = sqlx::query_as(&format!(
            "SELECT {ORDER_COLUMNS} FROM orders WHERE ? IS NULL OR status = ?"
        ))
        .bind(status)
        .bind(status)
        .fetch_all(&self.pool)
        .await
        .map_err(db_err)?;
        let mut children = self.load_children(None).await?;
        let mut orders = rows
            .into_iter()
            .map(|row| row.into_order(&mut children))
            .collect::<Result<Vec<_>, _>>()?;
        orders.sort_by(|a, b| b.updated_at.cmp(&a.updated_at).then(b.id.cmp(&a.id)));
        Ok(orders)
    }

    async fn insert_order(&self, order: NewOrder) -> Result<Order, StoreError> {
        let labels = serde_json::to_string(&order.labels).map_err(json_err)?;
        let now = Utc::now();
        let fields = &order.fields;
        let mut tx = self.pool.begin().await.map_err(db_err)?;
        let inserted = sqlx::query(
            "INSERT INTO orders (external_key, customer, phone, email, address, city, total, \
             status, labels, assigned_to, note, payment_method, cargo_barcode, \
             cargo_tracking_number, has_notification, date, created_at, updated_at) \
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(&order.external_key)
        .bind(&fields.customer)
        .bind(&fields.phone)
        .bind(&fields.email)
        .bind(&fields.address)
        .bind(&fields.city)
        .bind(&fields.total)
        .bind(&order.status)
        .bind(&labels)
        .bind(&order.assigned_to)
        .bind(&fields.note)
        .bind(&fields.payment_method)
        .bind(&fields.cargo_barcode)
        .bind(&fields.cargo_tracking_number)
        .bind(order.has_notification)
        .bind(fields.date)
        .bind(now)
        .bind(now)
        .execute(&mut *tx)
        .await;
        let id = match inserted {
            Ok(result) => result.last_insert_rowid(),
            Err(sqlx::Error::Database(db)) if db.is_unique_violation() => {
                return Err(StoreError::Duplicate(order.external_key));
            }
            Err(err) => return Err(db_err(err)),
        };
        insert_items(&mut tx, id, &order.items).await?;
        tx.commit().await.map_err(db_err)?;
        self.fetch_one(id).await
    }

    async fn refresh_order(&self, id: i64, refresh: OrderRefresh) -> Result<Order, StoreError> {
        let labels = serde_json::to_string(&refresh.labels).map_err(json_err)?;
        let fields = &refresh.fields;
        let mut tx = self.pool.begin().await.map_err(db_err)?;
        let updated = sqlx::query(
            "UPDATE orders SET customer = ?, phone = ?, email = ?, address = ?, city = ?, \
             total = ?, note = ?, payment_method = ?, \
             cargo_barcode = COALESCE(?, cargo_barcode), \
             cargo_tracking_number = COALESCE(?, cargo_tracking_number), \
             date = ?, status = ?, labels = ?, has_notification = 1, updated_at = ? \
             WHERE id = ?",
        )
        .bind(&fields.customer)
        .bind(&fields.phone)
        .bind(&fields.email)
        .bind(&fields.address)
        .bind(&fields.city)
        .bind(&fields.total)
        .bind(&fields.note)
        .bind(&fields.payment_method)
        .bind(&fields.cargo_barcode)
        .bind(&fields.cargo_tracking_number)
        .bind(fields.date)
        .bind(&refresh.status)
        .bind(&labels)
        .bind(Utc::now())
        .bind(id)
        .execute(&mut *tx)
        .await
        .map_err(db_err)?;
        if updated.rows_affected() == 0 {
            return Err(StoreError::NotFound(id));
        }
        sqlx::query("DELETE FROM order_items WHERE order_id = ?")
            .bind(id)
            .execute(&mut *tx)
            .await
            .map_err(db_err)?;
        insert_items(&mut tx, id, &refresh.items).await?;
        tx.commit().await.map_err(db_err)?;
        self.fetch_one(id).await
    }

    async fn update_order(&self, id: i64, patch: OrderPatch) -> Result<Order, StoreError> {
        let labels = patch
            .labels
            .as_ref()
            .map(serde_json::to_string)
            .transpose()
            .map_err(json_err)?;
        let updated = sqlx::query(
            "UPDATE orders SET status = COALESCE(?, status), labels = COALESCE(?, labels), \
             assigned_to = COALESCE(?, assigned_to), customer = COALESCE(?, customer), \
             phone = COALESCE(?, phone), email = COALESCE(?, email), \
             address = COALESCE(?, address), city = COALESCE(?, city), \
             tracking_number = COALESCE(?, tracking_number), \
             print_notes = COALESCE(?, print_notes), \
             cargo_barcode = COALESCE(?, cargo_barcode), \
             cargo_tracking_number = COALESCE(?, cargo_tracking_number), \
             has_notification = COALESCE(?, has_notification), updated_at = ? \
             WHERE id = ?",
        )
        .bind(&patch.status)
        .bind(&labels)
        .bind(&patch.assigned_to)
        .bind(&patch.customer)
        .bind(&patch.phone)
        .bind(&patch.email)
        .bind(&patch.address)
        .bind(&patch.city)
        .bind(&patch.tracking_number)
        .bind(&patch.print_notes)
        .bind(&patch.cargo_barcode)
        .bind(&patch.cargo_tracking_number)
        .bind(patch.has_notification)
        .bind(Utc::now())
        .bind(id)
        .execute(&self.pool)
        .await
        .map_err(db_err)?;
        if updated.rows_affected() == 0 {
            return Err(StoreError::NotFound(id));
        }
        self.fetch_one(id).await
    }

    async fn append_activity(
        &self,
        order_id: i64,
        activity: NewActivity,
    ) -> Result<OrderActivity, StoreError> {
        let timestamp = Utc::now();
        let result = sqlx::query(
            "INSERT INTO order_activities (order_id, author, action, details, timestamp) \
             VALUES (?, ?, ?, ?, ?)",
        )
        .bind(order_id)
        .bind(&activity.author)
        .bind(&activity.action)
        .bind(&activity.details)
        .bind(timestamp)
        .execute(&self.pool)
        .await
        .map_err(|err| missing_parent(err, order_id))?;
        Ok(OrderActivity {
            id: result.last_insert_rowid(),
            author: activity.author,
            action: activity.action,
            details: activity.details,
            timestamp,
        })
    }

    async fn add_comment(
        &self,
        order_id: i64,
        comment: NewComment,
    ) -> Result<Comment, StoreError> {
        let attachments = serde_json::to_string(&comment.attachments).map_err(json_err)?;
        let timestamp = Utc::now();
        let result = sqlx::query(
            "INSERT INTO comments (order_id, author, message, attachments, timestamp) \
             VALUES (?, ?, ?, ?, ?)",
        )
        .bind(order_id)
        .bind(&comment.author)
        .bind(&comment.message)
        .bind(&attachments)
        .bind(timestamp)
        .execute(&self.pool)
        .await
        .map_err(|err| missing_parent(err, order_id))?;
        Ok(Comment {
            id: result.last_insert_rowid(),
            author: comment.author,
            message: comment.message,
            timestamp,
            attachments: comment.attachments,
        })
    }

    async fn settings(&self) -> Result<HashMap<String, String>, StoreError> {
        let rows: Vec<(String, String)> = sqlx::query_as("SELECT key, value FROM system_settings")
            .fetch_all(&self.pool)
            .await
            .map_err(db_err)?;
        Ok(rows.into_iter().collect())
    }

    async fn put_setting(&self, key: &str, value: &str) -> Result<(), StoreError> {
        sqlx::query(
            "INSERT INTO system_settings (key, value) VALUES (?, ?) \
             ON CONFLICT(key) DO UPDATE SET value = excluded.value",
        )
        .bind(key)
        .bind(value)
        .execute(&self.pool)
        .await
        .map_err(db_err)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::test_support::{exercise_store, item, new_order};
    use crate::store::OrderFields;

    async fn memory_db() -> SqliteStore {
        SqliteStore::connect("sqlite::memory:").await.expect("sqlite")
    }

    #[tokio::test]
    async fn sqlite_store_contract() {
        exercise_store(&memory_db().await).await;
    }

    #[tokio::test]
    async fn refresh_of_unknown_order_is_not_found() {
        let store = memory_db().await;
        let err = store
            .refresh_order(
                42,
                OrderRefresh {
                    fields: OrderFields::default(),
                    status: "incoming".into(),
                    labels: BTreeSet::new(),
                    items: vec![item("Poster")],
                },
            )
            .await
            .expect_err("missing");
        assert!(matches!(err, StoreError::NotFound(42)));
    }

    #[tokio::test]
    async fn history_rows_reject_unknown_orders() {
        let store = memory_db().await;
        let err = store
            .append_activity(
                7,
                NewActivity {
                    author: "Sistem".into(),
                    action: "STATUS_CHANGE".into(),
                    details: "-".into(),
                },
            )
            .await
            .expect_err("fk");
        assert!(matches!(err, StoreError::NotFound(7)));
    }

    #[tokio::test]
    async fn refresh_keeps_cargo_fields_when_payload_has_none() {
        let store = memory_db().await;
        let mut order = new_order("WC-5", "incoming");
        order.fields.cargo_barcode = Some("BC-1".into());
        let created = store.insert_order(order).await.expect("insert");
        let refreshed = store
            .refresh_order(
                created.id,
                OrderRefresh {
                    fields: new_order("WC-5", "incoming").fields,
                    status: "incoming".into(),
                    labels: created.labels.clone(),
                    items: Vec::new(),
                },
            )
            .await
            .expect("refresh");
        assert_eq!(refreshed.cargo_barcode.as_deref(), Some("BC-1"));
        assert!(refreshed.items.is_empty());
    }
}
