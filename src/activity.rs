use crate::store::{NewActivity, Order, OrderActivity, OrderStore, StoreError};
use std::sync::Arc;
use tracing::debug;

pub const SYSTEM_AUTHOR: &str = "Sistem";

/// Audit entry kinds; unknown client-supplied kinds are kept verbatim.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ActionKind {
    StatusChange,
    AssignChange,
    DetailsUpdate,
    TrackingUpdate,
    NoteAdded,
    LabelUpdate,
    CommentAdded,
    OrderCreated,
    Other(String),
}

impl ActionKind {
    pub fn as_str(&self) -> &str {
        match self {
            ActionKind::StatusChange => "STATUS_CHANGE",
            ActionKind::AssignChange => "ASSIGN_CHANGE",
            ActionKind::DetailsUpdate => "DETAILS_UPDATE",
            ActionKind::TrackingUpdate => "TRACKING_UPDATE",
            ActionKind::NoteAdded => "NOTE_ADDED",
            ActionKind::LabelUpdate => "LABEL_UPDATE",
            ActionKind::CommentAdded => "COMMENT_ADDED",
            ActionKind::OrderCreated => "ORDER_CREATED",
            ActionKind::Other(kind) => kind,
        }
    }

    pub fn parse(raw: &str) -> Self {
        let normalized = raw.trim().to_ascii_uppercase();
        match normalized.as_str() {
            "STATUS_CHANGE" => ActionKind::StatusChange,
            "ASSIGN_CHANGE" => ActionKind::AssignChange,
            "DETAILS_UPDATE" => ActionKind::DetailsUpdate,
            "TRACKING_UPDATE" => ActionKind::TrackingUpdate,
            "NOTE_ADDED" => ActionKind::NoteAdded,
            "LABEL_UPDATE" => ActionKind::LabelUpdate,
            "COMMENT_ADDED" => ActionKind::CommentAdded,
            "ORDER_CREATED" => ActionKind::OrderCreated,
            _ => ActionKind::Other(normalized),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Change {
    pub kind: ActionKind,
    pub details: String,
}

pub fn status_changed(status: &str) -> String {
    format!("Durum '{status}' olarak değiştirildi.")
}

pub fn delivered(source_label: &str) -> String {
    format!("Müşteriye teslim edildi ({source_label})")
}

/// One entry per changed field group, in a fixed order.
pub fn diff(before: &Order, after: &Order) -> Vec<Change> {
    let mut changes = Vec::new();
    let mut push = |kind, details: String| changes.push(Change { kind, details });

    if before.assigned_to != after.assigned_to {
        push(
            ActionKind::AssignChange,
            format!(
                "Sorumluluk alındı: {}",
                after.assigned_to.as_deref().unwrap_or("-")
            ),
        );
    }
    if before.status != after.status {
        push(ActionKind::StatusChange, status_changed(&after.status));
    }
    let contact_changed = before.customer != after.customer
        || before.phone != after.phone
        || before.address != after.address
        || before.city != after.city;
    if contact_changed {
        push(
            ActionKind::DetailsUpdate,
            "Müşteri ve teslimat bilgileri güncellendi.".to_string(),
        );
    }
    if before.tracking_number != after.tracking_number
        && let Some(tracking) = after.tracking_number.as_deref().filter(|t| !t.is_empty())
    {
        push(
            ActionKind::TrackingUpdate,
            format!("Kargo takip no girildi: {tracking}"),
        );
    }
    if before.print_notes != after.print_notes {
        push(ActionKind::NoteAdded, "Yeni işlem notu ekledi.".to_string());
    }
    if before.labels != after.labels {
        push(ActionKind::LabelUpdate, "Etiketler güncellendi.".to_string());
    }
    changes
}

#[derive(Clone)]
pub struct ActivityLogger {
    store: Arc<dyn OrderStore>,
}

impl ActivityLogger {
    pub fn new(store: Arc<dyn OrderStore>) -> Self {
        Self { store }
    }

    pub async fn record(
        &self,
        order_id: i64,
        author: &str,
        kind: ActionKind,
        details: impl Into<String>,
    ) -> Result<OrderActivity, StoreError> {
        let details = details.into();
        debug!(
            target = "orderdesk.store",
            order_id,
            author,
            action = kind.as_str(),
            "activity recorded"
        );
        self.store
            .append_activity(
                order_id,
                NewActivity {
                    author: author.to_string(),
                    action: kind.as_str().to_string(),
                    details,
                },
            )
            .await
    }

    /// Appends one entry per changed field group between two snapshots.
    pub async fn record_changes(
        &self,
        author: &str,
        before: &Order,
        after: &Order,
    ) -> Result<usize, StoreError> {
        let changes = diff(before, after);
        for change in &changes {
            self.record(after.id, author, change.kind.clone(), change.details.clone())
                .await?;
        }
        Ok(changes.len())
    }
}
