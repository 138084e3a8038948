use serde::Serialize;

pub const INCOMING: &str = "incoming";
pub const COMPLETED: &str = "completed";
pub const AWAITING_CUSTOMER: &str = "awaiting-customer";
pub const SHIPPED: &str = "shipped";

pub const PAYMENT_FAILED_LABEL: &str = "payment-failed";
pub const NEW_LABEL: &str = "new";

/// Internal pipeline placement for an external order state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct StatusMapping {
    pub status: &'static str,
    pub labels: &'static [&'static str],
}

const NO_LABELS: &[&str] = &[];
const FAILED_LABELS: &[&str] = &[PAYMENT_FAILED_LABEL];

// Failure states stay on the incoming column so staff still see them.
const EXTERNAL_STATUS_TABLE: &[(&str, &str, &[&str])] = &[
    ("processing", INCOMING, NO_LABELS),
    ("completed", COMPLETED, NO_LABELS),
    ("on-hold", AWAITING_CUSTOMER, NO_LABELS),
    ("pending", AWAITING_CUSTOMER, NO_LABELS),
    ("failed", INCOMING, FAILED_LABELS),
    ("cancelled", INCOMING, FAILED_LABELS),
    ("refunded", INCOMING, FAILED_LABELS),
];

// Column titles used before the board switched to stable identifiers.
const LEGACY_STATUS_TABLE: &[(&str, &str)] = &[
    ("Gelen Siparişler", INCOMING),
    ("Tamamlandı", COMPLETED),
    ("Müşteri Beklemede", AWAITING_CUSTOMER),
    ("Kargolandı", SHIPPED),
];

pub fn map_external_status(external: &str) -> StatusMapping {
    let key = external.trim().to_lowercase();
    EXTERNAL_STATUS_TABLE
        .iter()
        .find(|(name, _, _)| *name == key)
        .map(|(_, status, labels)| StatusMapping {
            status: *status,
            labels: *labels,
        })
        .unwrap_or(StatusMapping {
            status: INCOMING,
            labels: NO_LABELS,
        })
}

/// Resolves a stored status to its current identifier; unknown values pass through.
pub fn canonical_status(stored: &str) -> &str {
    LEGACY_STATUS_TABLE
        .iter()
        .find(|(legacy, _)| *legacy == stored.trim())
        .map(|(_, current)| *current)
        .unwrap_or(stored)
}

pub fn is_completed(stored: &str) -> bool {
    canonical_status(stored) == COMPLETED
}
