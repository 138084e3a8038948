use crate::models::ApiError;
use axum::{
    Json,
    body::Body,
    extract::State,
    http::{self, Request, StatusCode},
    middleware::Next,
    response::{IntoResponse, Response},
};
use std::{collections::HashMap, convert::Infallible, sync::Arc};
use tracing::{info, warn};

const STAFF_KEY_HEADER: &str = "X-Staff-Key";
const DEV_STAFF: &str = "Atölye";
const DEV_KEY: &str = "orderdesk-dev-key";

#[derive(Clone)]
pub struct AuthState {
    records: Arc<HashMap<String, StaffRecord>>,
}

/// The staff member behind a request; their name is the author of every
/// activity entry the request produces.
#[derive(Clone, Debug)]
pub struct AuthContext {
    pub staff: String,
    pub key_id: String,
}

#[derive(Clone)]
struct StaffRecord {
    staff: String,
    key_id: String,
}

impl AuthState {
    pub fn from_config(raw: Option<&str>) -> Self {
        Self {
            records: Arc::new(load_keys(raw)),
        }
    }

    fn authenticate(&self, presented: &str) -> Option<AuthContext> {
        self.records.get(presented).map(|record| AuthContext {
            staff: record.staff.clone(),
            key_id: record.key_id.clone(),
        })
    }
}

pub async fn require_staff_key(
    State(state): State<AuthState>,
    mut request: Request<Body>,
    next: Next,
) -> Result<Response, Infallible> {
    let Some(presented) = extract_api_key(request.headers()) else {
        return Ok(unauthorized_response(
            "missing_api_key",
            "Provide X-Staff-Key or Bearer token",
        ));
    };

    let Some(context) = state.authenticate(&presented) else {
        return Ok(unauthorized_response("invalid_api_key", "Key not recognized"));
    };

    request.extensions_mut().insert(context);
    Ok(next.run(request).await)
}

fn extract_api_key(headers: &http::HeaderMap) -> Option<String> {
    if let Some(value) = headers.get(http::header::AUTHORIZATION)
        && let Ok(raw) = value.to_str()
        && raw.len() >= 7
        && raw[..6].eq_ignore_ascii_case("bearer")
    {
        return Some(raw[6..].trim().to_string());
    }
    headers
        .get(STAFF_KEY_HEADER)
        .and_then(|value| value.to_str().ok())
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
}

fn unauthorized_response(code: &str, message: &str) -> Response {
    let payload = ApiError {
        error: code.to_string(),
        detail: Some(message.to_string()),
        code: None,
    };
    (StatusCode::UNAUTHORIZED, Json(payload)).into_response()
}

/// Parses `Name:key,Name:key`. Names may contain spaces and non-ASCII letters.
fn load_keys(raw: Option<&str>) -> HashMap<String, StaffRecord> {
    let mut entries = HashMap::new();
    for (idx, token) in raw.unwrap_or_default().split(',').enumerate() {
        let trimmed = token.trim();
        if trimmed.is_empty() {
            continue;
        }
        let mut parts = trimmed.splitn(2, ':');
        let staff = parts.next().map(str::trim).filter(|s| !s.is_empty());
        let key = parts.next().map(str::trim).filter(|s| !s.is_empty());
        match (staff, key) {
            (Some(staff), Some(secret)) => {
                entries.insert(
                    secret.to_string(),
                    StaffRecord {
                        staff: staff.to_string(),
                        key_id: format!("key-{:02}", idx + 1),
                    },
                );
            }
            _ => warn!(
                target = "orderdesk.api",
                "ignored malformed STAFF_API_KEYS entry #{}",
                idx + 1
            ),
        }
    }

    if entries.is_empty() {
        warn!(
            target = "orderdesk.api",
            "STAFF_API_KEYS produced no keys; falling back to the development key"
        );
        entries.insert(
            DEV_KEY.to_string(),
            StaffRecord {
                staff: DEV_STAFF.to_string(),
                key_id: "key-01".to_string(),
            },
        );
    } else {
        info!(
            target = "orderdesk.api",
            key_count = entries.len(),
            "loaded staff keys"
        );
    }

    entries
}
