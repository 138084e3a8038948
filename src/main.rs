mod activity;
mod cargo;
mod config;
mod http;
mod idempotency;
mod jobs;
mod locale;
mod marketplace;
mod merge;
mod metrics;
mod models;
mod normalize;
mod reconcile;
mod security;
mod staff;
mod status;
mod store;
mod sync;
mod webhook;

use axum::{
    Json, Router,
    extract::{Extension, Path, Query, State},
    http::{HeaderMap, StatusCode},
    middleware,
    response::{IntoResponse, Response},
    routing::{get, patch, post, put},
};
use cargo::{CargoWebhook, LAST_CARGO_WEBHOOK};
use config::AppConfig;
use eyre::WrapErr;
use idempotency::Source;
use marketplace::{FeedQuery, HttpOrderFeed, OrderFeed};
use merge::{HttpOrderList, MergeSession, OrderListSource, SystemClock, TerminalBell};
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use models::{
    ActivityRequest, ApiError, CommentRequest, JobAccepted, LastWebhooks, OrderEditRequest,
    OrderListQuery, ScanRequest, SettingsSaved, SettingsUpdate, StatusUpdateRequest,
};
use reconcile::Reconciler;
use security::{AuthContext, AuthState, require_staff_key};
use serde_json::{Value, json};
use staff::{ManualOrder, StaffDesk, StaffError};
use std::{net::SocketAddr, sync::Arc};
use store::{
    Comment, MemoryStore, Order, OrderActivity, OrderStore, SqliteStore, StoreError,
};
use sync::{PullSyncer, SyncError, SyncReport};
use tokio::sync::{Mutex, oneshot};
use tower_http::{
    cors::{Any, CorsLayer},
    trace::TraceLayer,
};
use tracing::{error, info, warn};
use tracing_subscriber::{EnvFilter, fmt};
use webhook::{LAST_WEBHOOK_PAYLOAD, WebhookIngester, WebhookReply};

#[tokio::main]
async fn main() -> eyre::Result<()> {
    dotenvy::dotenv().ok();
    init_tracing();

    let config = AppConfig::from_env().wrap_err("invalid configuration")?;
    match std::env::args().nth(1).as_deref() {
        Some("watch") => run_watch(config).await,
        Some("serve") | None => run(config).await,
        Some(other) => eyre::bail!("unknown command `{other}` (expected `serve` or `watch`)"),
    }
}

async fn run(config: AppConfig) -> eyre::Result<()> {
    let store: Arc<dyn OrderStore> = match &config.database_url {
        Some(url) => Arc::new(
            SqliteStore::connect(url)
                .await
                .wrap_err("failed to open the order database")?,
        ),
        None => {
            warn!(
                target = "orderdesk.api",
                "DATABASE_URL not set; orders are kept in memory only"
            );
            Arc::new(MemoryStore::new())
        }
    };
    let client = http::build_client(&config.http);
    let feed: Arc<dyn OrderFeed> = Arc::new(HttpOrderFeed::new(client, &config.etsy_api_root));
    let prometheus = PrometheusBuilder::new()
        .install_recorder()
        .wrap_err("failed to install the Prometheus recorder")?;

    let state = build_state(&config, store, feed, Some(prometheus));
    if let Some(period) = config.sync_interval {
        info!(
            target = "orderdesk.sync",
            every_secs = period.as_secs(),
            sources = ?config.sync_sources,
            "scheduled sync enabled"
        );
        jobs::spawn_schedule(state.queue.clone(), config.sync_sources.clone(), period);
    }

    let auth = AuthState::from_config(config.staff_api_keys.as_deref());
    let app = build_router(state, auth, config.request_max_bytes);

    let addr: SocketAddr = ([0, 0, 0, 0], config.port).into();
    info!(target = "orderdesk.api", "listening on {addr}");
    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app.into_make_service()).await?;
    Ok(())
}

/// Polls a running dashboard and rings the bell when the board grows.
async fn run_watch(config: AppConfig) -> eyre::Result<()> {
    let Some(key) = config.watch.dashboard_key.clone() else {
        eyre::bail!("DASHBOARD_KEY is required in watch mode");
    };
    let client = http::build_client(&config.http);
    let source: Arc<dyn OrderListSource> = Arc::new(HttpOrderList::new(
        client,
        config.watch.dashboard_url.clone(),
        key,
    ));

    let initial = match source.fetch().await {
        Ok(orders) => orders,
        Err(err) => {
            warn!(target = "orderdesk.merge", "initial fetch failed: {err}");
            Vec::new()
        }
    };
    info!(
        target = "orderdesk.merge",
        url = %config.watch.dashboard_url,
        orders = initial.len(),
        "watching order board"
    );
    let session = Arc::new(Mutex::new(MergeSession::new(SystemClock, initial)));
    let (stop, shutdown) = oneshot::channel();
    let poller = tokio::spawn(merge::run_poller(
        session,
        source,
        Arc::new(TerminalBell),
        config.watch.poll_interval,
        shutdown,
    ));

    tokio::signal::ctrl_c().await?;
    let _ = stop.send(());
    poller.await?;
    Ok(())
}

#[derive(Clone)]
struct AppState {
    store: Arc<dyn OrderStore>,
    webhook: WebhookIngester,
    cargo: CargoWebhook,
    staff: StaffDesk,
    syncer: PullSyncer,
    queue: jobs::JobQueue,
    openapi: Arc<Value>,
    prometheus: Option<PrometheusHandle>,
    metrics_key: Option<String>,
}

fn build_state(
    config: &AppConfig,
    store: Arc<dyn OrderStore>,
    feed: Arc<dyn OrderFeed>,
    prometheus: Option<PrometheusHandle>,
) -> AppState {
    let placeholder: Arc<str> = Arc::from(config.placeholder_image.as_str());
    let reconciler = Reconciler::new(store.clone(), config.label_policy, placeholder.clone());
    let syncer = PullSyncer::new(
        reconciler.clone(),
        feed,
        FeedQuery {
            after: config.sync_after,
            page_size: config.sync_page_size,
        },
    );
    let (queue, _worker) = jobs::JobQueue::spawn(syncer.clone(), config.queue_capacity);
    let openapi: Value = serde_yaml::from_str(include_str!("../docs/openapi.yaml"))
        .unwrap_or_else(|_| json!({"openapi": "3.0.3"}));

    AppState {
        webhook: WebhookIngester::new(reconciler),
        cargo: CargoWebhook::new(store.clone()),
        staff: StaffDesk::new(store.clone(), placeholder),
        syncer,
        queue,
        openapi: Arc::new(openapi),
        prometheus,
        metrics_key: config.metrics_key.clone(),
        store,
    }
}

fn build_router(state: AppState, auth: AuthState, body_limit: usize) -> Router {
    let cors = CorsLayer::new()
        .allow_headers(Any)
        .allow_methods(Any)
        .allow_origin(Any);

    let staff = Router::new()
        .route("/orders", get(list_orders).post(create_order))
        .route("/orders/scan", post(scan_barcode))
        .route("/orders/{id}", patch(edit_order))
        .route("/orders/{id}/status", post(update_status))
        .route("/orders/{id}/comments", post(add_comment))
        .route("/orders/{id}/activity", post(log_activity))
        .route("/orders/{id}/read", post(mark_read))
        .route("/sync/{source}", post(sync_now))
        .nest(
            "/jobs",
            Router::new()
                .route("/sync/{source}", post(enqueue_sync_job))
                .route("/{id}", get(get_job_status)),
        )
        .route("/admin/settings", put(save_settings))
        .route("/admin/webhooks/last", get(last_webhooks))
        .route_layer(middleware::from_fn_with_state(auth, require_staff_key));

    Router::new()
        .route("/health", get(health))
        .route("/metrics", get(metrics_endpoint))
        .route("/openapi.json", get(openapi_json))
        .route("/webhook", post(order_webhook))
        .route("/webhook/cargo", post(cargo_webhook))
        .merge(staff)
        .with_state(state)
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .layer(axum::extract::DefaultBodyLimit::max(body_limit))
}

async fn health() -> Json<Value> {
    Json(json!({
        "status": "ok",
        "service": "orderdesk-api-rs",
    }))
}

async fn openapi_json(State(state): State<AppState>) -> Json<Value> {
    Json((*state.openapi).clone())
}

async fn metrics_endpoint(State(state): State<AppState>, headers: HeaderMap) -> Response {
    if let Some(secret) = &state.metrics_key {
        let presented = headers
            .get("X-Metrics-Key")
            .and_then(|v| v.to_str().ok())
            .unwrap_or("");
        if presented != secret {
            return (StatusCode::UNAUTHORIZED, "unauthorized").into_response();
        }
    }
    let body = state
        .prometheus
        .as_ref()
        .map(PrometheusHandle::render)
        .unwrap_or_default();
    (
        [(axum::http::header::CONTENT_TYPE, "text/plain; version=0.0.4")],
        body,
    )
        .into_response()
}

/// WooCommerce order webhook. Unauthenticated; the storefront signs nothing
/// we verify, so every outcome is answered with a JSON status body.
async fn order_webhook(State(state): State<AppState>, body: String) -> WebhookReply {
    crate::metrics::inc_requests("/webhook");
    state.webhook.ingest(&body).await
}

async fn cargo_webhook(State(state): State<AppState>, body: String) -> WebhookReply {
    crate::metrics::inc_requests("/webhook/cargo");
    state.cargo.handle(&body).await
}

/// Board listing, newest `updated_at` first.
///
/// - Method: `GET`
/// - Path: `/orders`
/// - Query: optional `status`
async fn list_orders(
    State(state): State<AppState>,
    Query(query): Query<OrderListQuery>,
) -> Result<Json<Vec<Order>>, AppError> {
    crate::metrics::inc_requests("/orders");
    let status = query
        .status
        .as_deref()
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(status::canonical_status);
    Ok(Json(state.store.list(status.as_deref()).await?))
}

async fn create_order(
    State(state): State<AppState>,
    Extension(context): Extension<AuthContext>,
    Json(form): Json<ManualOrder>,
) -> Result<(StatusCode, Json<Order>), AppError> {
    crate::metrics::inc_requests("/orders:create");
    let order = state.staff.create_manual(form, &context.staff).await?;
    Ok((StatusCode::CREATED, Json(order)))
}

async fn edit_order(
    State(state): State<AppState>,
    Extension(context): Extension<AuthContext>,
    Path(id): Path<i64>,
    Json(edit): Json<OrderEditRequest>,
) -> Result<Json<Order>, AppError> {
    crate::metrics::inc_requests("/orders/{id}");
    let order = state
        .staff
        .update_details(id, edit.into(), &context.staff)
        .await?;
    Ok(Json(order))
}

async fn update_status(
    State(state): State<AppState>,
    Extension(context): Extension<AuthContext>,
    Path(id): Path<i64>,
    Json(request): Json<StatusUpdateRequest>,
) -> Result<Json<Order>, AppError> {
    crate::metrics::inc_requests("/orders/{id}/status");
    let order = state
        .staff
        .update_status(id, &request.status, &context.staff)
        .await?;
    Ok(Json(order))
}

async fn add_comment(
    State(state): State<AppState>,
    Extension(context): Extension<AuthContext>,
    Path(id): Path<i64>,
    Json(request): Json<CommentRequest>,
) -> Result<(StatusCode, Json<Comment>), AppError> {
    crate::metrics::inc_requests("/orders/{id}/comments");
    let comment = state
        .staff
        .add_comment(id, &context.staff, &request.message, request.attachments)
        .await?;
    Ok((StatusCode::CREATED, Json(comment)))
}

async fn log_activity(
    State(state): State<AppState>,
    Extension(context): Extension<AuthContext>,
    Path(id): Path<i64>,
    Json(request): Json<ActivityRequest>,
) -> Result<(StatusCode, Json<OrderActivity>), AppError> {
    crate::metrics::inc_requests("/orders/{id}/activity");
    let entry = state
        .staff
        .log_activity(id, &context.staff, &request.action, &request.details)
        .await?;
    Ok((StatusCode::CREATED, Json(entry)))
}

async fn mark_read(
    State(state): State<AppState>,
    Path(id): Path<i64>,
) -> Result<Json<Order>, AppError> {
    crate::metrics::inc_requests("/orders/{id}/read");
    Ok(Json(state.staff.mark_read(id).await?))
}

async fn scan_barcode(
    State(state): State<AppState>,
    Extension(context): Extension<AuthContext>,
    Json(request): Json<ScanRequest>,
) -> Result<Json<Order>, AppError> {
    crate::metrics::inc_requests("/orders/scan");
    let order = state
        .staff
        .scan_barcode(&request.code, &context.staff)
        .await?;
    Ok(Json(order))
}

/// Pull-sync one storefront inline and return the batch report.
///
/// - Method: `POST`
/// - Path: `/sync/{source}` where source is `woocommerce` or `etsy`
async fn sync_now(
    State(state): State<AppState>,
    Extension(context): Extension<AuthContext>,
    Path(source): Path<String>,
) -> Result<Json<SyncReport>, AppError> {
    crate::metrics::inc_requests("/sync/{source}");
    let source = parse_source(&source)?;
    info!(
        target = "orderdesk.api",
        staff = %context.staff,
        key_id = %context.key_id,
        source = %source,
        "manual sync requested"
    );
    Ok(Json(state.syncer.sync(source).await?))
}

async fn enqueue_sync_job(
    State(state): State<AppState>,
    Extension(context): Extension<AuthContext>,
    Path(source): Path<String>,
) -> Result<(StatusCode, Json<JobAccepted>), AppError> {
    crate::metrics::inc_requests("/jobs/sync/{source}");
    let source = parse_source(&source)?;
    let id = state
        .queue
        .enqueue_sync(source, &context.staff)
        .await
        .map_err(AppError::Unavailable)?;
    Ok((
        StatusCode::ACCEPTED,
        Json(JobAccepted {
            job_id: id.to_string(),
        }),
    ))
}

async fn get_job_status(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<jobs::JobInfo>, AppError> {
    let Ok(uuid) = uuid::Uuid::parse_str(&id) else {
        return Err(AppError::bad_request("invalid_job_id", id));
    };
    state
        .queue
        .get(uuid)
        .await
        .map(Json)
        .ok_or(AppError::NotFound("job_not_found", id))
}

async fn save_settings(
    State(state): State<AppState>,
    Extension(context): Extension<AuthContext>,
    Json(update): Json<SettingsUpdate>,
) -> Result<Json<SettingsSaved>, AppError> {
    crate::metrics::inc_requests("/admin/settings");
    let unknown = update.unknown_keys();
    if !unknown.is_empty() {
        return Err(AppError::bad_request("unknown_setting", unknown.join(", ")));
    }
    let mut saved = Vec::with_capacity(update.settings.len());
    for (key, value) in &update.settings {
        state.store.put_setting(key, value.trim()).await?;
        saved.push(key.clone());
    }
    info!(
        target = "orderdesk.api",
        staff = %context.staff,
        keys = ?saved,
        "storefront settings saved"
    );
    Ok(Json(SettingsSaved { saved }))
}

async fn last_webhooks(State(state): State<AppState>) -> Result<Json<LastWebhooks>, AppError> {
    let settings = state.store.settings().await?;
    let decode = |key: &str| {
        settings.get(key).map(|raw| {
            serde_json::from_str::<Value>(raw).unwrap_or_else(|_| Value::String(raw.clone()))
        })
    };
    Ok(Json(LastWebhooks {
        order: decode(LAST_WEBHOOK_PAYLOAD),
        cargo: decode(LAST_CARGO_WEBHOOK),
    }))
}

fn parse_source(raw: &str) -> Result<Source, AppError> {
    match Source::parse(raw) {
        Some(source) if source != Source::Manual => Ok(source),
        _ => Err(AppError::bad_request("unknown_source", raw.to_string())),
    }
}

#[derive(Debug)]
enum AppError {
    Store(StoreError),
    Staff(StaffError),
    Sync(SyncError),
    BadRequest(&'static str, String),
    NotFound(&'static str, String),
    Unavailable(ApiError),
}

impl AppError {
    fn bad_request(code: &'static str, detail: impl Into<String>) -> Self {
        Self::BadRequest(code, detail.into())
    }
}

impl From<StoreError> for AppError {
    fn from(value: StoreError) -> Self {
        Self::Store(value)
    }
}

impl From<StaffError> for AppError {
    fn from(value: StaffError) -> Self {
        match value {
            StaffError::Store(err) => Self::Store(err),
            other => Self::Staff(other),
        }
    }
}

impl From<SyncError> for AppError {
    fn from(value: SyncError) -> Self {
        match value {
            SyncError::Store(err) => Self::Store(err),
            other => Self::Sync(other),
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, code, detail) = match self {
            AppError::Store(err) => match err {
                StoreError::NotFound(_) => (StatusCode::NOT_FOUND, "not_found", err.to_string()),
                StoreError::Duplicate(_) => (StatusCode::CONFLICT, "duplicate", err.to_string()),
                StoreError::Database(_) => {
                    error!(target = "orderdesk.api", "store failure: {err}");
                    (
                        StatusCode::INTERNAL_SERVER_ERROR,
                        "store_error",
                        err.to_string(),
                    )
                }
            },
            AppError::Staff(err) => match err {
                StaffError::UnknownBarcode(_) => {
                    (StatusCode::NOT_FOUND, "unknown_barcode", err.to_string())
                }
                StaffError::Invalid(_) | StaffError::Store(_) => {
                    (StatusCode::BAD_REQUEST, "invalid_request", err.to_string())
                }
            },
            AppError::Sync(err) => {
                let (status, code) = match &err {
                    SyncError::MissingConfig(_) => (StatusCode::BAD_REQUEST, "missing_config"),
                    SyncError::Unsupported(_) => (StatusCode::BAD_REQUEST, "unsupported_source"),
                    SyncError::Transport { .. } | SyncError::Upstream { .. } => {
                        warn!(target = "orderdesk.api", "upstream failure: {err}");
                        (StatusCode::BAD_GATEWAY, "upstream_error")
                    }
                    SyncError::Store(_) => {
                        error!(target = "orderdesk.api", "sync store failure: {err}");
                        (StatusCode::INTERNAL_SERVER_ERROR, "store_error")
                    }
                };
                let payload = ApiError {
                    error: err.to_string(),
                    detail: None,
                    code: Some(code.to_string()),
                };
                return (status, Json(payload)).into_response();
            }
            AppError::BadRequest(code, detail) => (StatusCode::BAD_REQUEST, code, detail),
            AppError::NotFound(code, detail) => (StatusCode::NOT_FOUND, code, detail),
            AppError::Unavailable(payload) => {
                return (StatusCode::SERVICE_UNAVAILABLE, Json(payload)).into_response();
            }
        };
        let payload = ApiError {
            error: code.to_string(),
            detail: Some(detail),
            code: None,
        };
        (status, Json(payload)).into_response()
    }
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info,tower_http=debug"));
    let _ = fmt().with_env_filter(filter).try_init();
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::marketplace::{Credentials, MarketplaceError};
    use async_trait::async_trait;
    use axum::{body::Body, http::Request};
    use tower::ServiceExt;

    const STAFF_KEY: &str = "test-key";

    struct EmptyFeed;

    #[async_trait]
    impl OrderFeed for EmptyFeed {
        async fn fetch_orders(
            &self,
            _credentials: &Credentials,
            _query: FeedQuery,
        ) -> Result<Vec<Value>, MarketplaceError> {
            Ok(Vec::new())
        }
    }

    struct RejectingFeed;

    #[async_trait]
    impl OrderFeed for RejectingFeed {
        async fn fetch_orders(
            &self,
            _credentials: &Credentials,
            _query: FeedQuery,
        ) -> Result<Vec<Value>, MarketplaceError> {
            Err(MarketplaceError::Transport {
                status: 401,
                body: "invalid consumer key".into(),
            })
        }
    }

    fn app() -> (Router, Arc<MemoryStore>) {
        app_with(Arc::new(EmptyFeed))
    }

    fn app_with(feed: Arc<dyn OrderFeed>) -> (Router, Arc<MemoryStore>) {
        let store = Arc::new(MemoryStore::new());
        let config = AppConfig::from_lookup(|_| None).expect("defaults");
        let state = build_state(&config, store.clone(), feed, None);
        let auth = AuthState::from_config(Some(&format!("Mehmet:{STAFF_KEY}")));
        (build_router(state, auth, config.request_max_bytes), store)
    }

    fn staff_request(method: &str, uri: &str, body: Value) -> Request<Body> {
        Request::builder()
            .method(method)
            .uri(uri)
            .header("X-Staff-Key", STAFF_KEY)
            .header("Content-Type", "application/json")
            .body(Body::from(body.to_string()))
            .unwrap()
    }

    async fn send(app: &Router, request: Request<Body>) -> (StatusCode, Value) {
        let response = app.clone().oneshot(request).await.unwrap();
        let status = response.status();
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        let body = serde_json::from_slice(&bytes).unwrap_or(Value::Null);
        (status, body)
    }

    fn webhook_body(id: i64, status: &str) -> String {
        json!({
            "id": id,
            "status": status,
            "total": "450.00",
            "currency": "TRY",
            "billing": {"first_name": "Ayşe", "last_name": "Yılmaz", "city": "Kadıköy", "state": "TR34"},
            "line_items": [{"name": "Kanvas Tablo", "quantity": 1}]
        })
        .to_string()
    }

    #[tokio::test]
    async fn health_is_public() {
        let (app, _) = app();
        let request = Request::get("/health").body(Body::empty()).unwrap();
        let (status, body) = send(&app, request).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["status"], "ok");
    }

    #[tokio::test]
    async fn staff_routes_require_a_key() {
        let (app, _) = app();
        let request = Request::get("/orders").body(Body::empty()).unwrap();
        let (status, body) = send(&app, request).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
        assert_eq!(body["error"], "missing_api_key");
    }

    #[tokio::test]
    async fn webhook_order_appears_on_the_board() {
        let (app, _) = app();
        let request = Request::post("/webhook")
            .header("Content-Type", "application/json")
            .body(Body::from(webhook_body(500, "processing")))
            .unwrap();
        let (status, _) = send(&app, request).await;
        assert_eq!(status, StatusCode::OK);

        let (status, body) = send(&app, staff_request("GET", "/orders", Value::Null)).await;
        assert_eq!(status, StatusCode::OK);
        let orders = body.as_array().expect("order list");
        assert_eq!(orders.len(), 1);
        assert_eq!(orders[0]["externalKey"], "WC-500");

        let (status, body) =
            send(&app, staff_request("GET", "/admin/webhooks/last", Value::Null)).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["order"]["id"], 500);
        assert!(body["cargo"].is_null());
    }

    #[tokio::test]
    async fn status_change_is_attributed_to_the_key_owner() {
        let (app, store) = app();
        let order = store
            .insert_order(crate::store::test_support::new_order("WC-7", status::INCOMING))
            .await
            .unwrap();
        let uri = format!("/orders/{}/status", order.id);
        let (status, body) =
            send(&app, staff_request("POST", &uri, json!({"status": "shipped"}))).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["status"], status::SHIPPED);
        assert_eq!(body["assignedTo"], "Mehmet");

        let (status, _) = send(
            &app,
            staff_request("POST", "/orders/999/status", json!({"status": "shipped"})),
        )
        .await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn unknown_barcode_is_not_found() {
        let (app, _) = app();
        let (status, body) =
            send(&app, staff_request("POST", "/orders/scan", json!({"code": "XYZ"}))).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert_eq!(body["error"], "unknown_barcode");
    }

    #[tokio::test]
    async fn manual_order_is_created() {
        let (app, _) = app();
        let (status, body) = send(
            &app,
            staff_request(
                "POST",
                "/orders",
                json!({"customer": "Zeynep Demir", "items": [{"name": "Poster", "quantity": 2}]}),
            ),
        )
        .await;
        assert_eq!(status, StatusCode::CREATED);
        assert!(body["externalKey"].as_str().unwrap().starts_with("MANUAL-"));

        let (status, _) =
            send(&app, staff_request("POST", "/orders", json!({"customer": "  "}))).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn sync_without_settings_reports_missing_config() {
        let (app, _) = app();
        let (status, body) =
            send(&app, staff_request("POST", "/sync/woocommerce", Value::Null)).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert!(body["error"].as_str().unwrap().contains("eksik"));
        assert_eq!(body["code"], "missing_config");

        let (status, body) = send(&app, staff_request("POST", "/sync/manual", Value::Null)).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["error"], "unknown_source");
    }

    #[tokio::test]
    async fn sync_transport_failure_carries_the_message() {
        let (app, store) = app_with(Arc::new(RejectingFeed));
        for (key, value) in [
            ("wc_url", "https://shop.example"),
            ("wc_key", "ck"),
            ("wc_secret", "cs"),
        ] {
            store.put_setting(key, value).await.expect("setting");
        }
        let (status, body) =
            send(&app, staff_request("POST", "/sync/woocommerce", Value::Null)).await;
        assert_eq!(status, StatusCode::BAD_GATEWAY);
        assert_eq!(body["code"], "upstream_error");
        assert!(body["error"].as_str().unwrap().contains("401"));
    }

    #[tokio::test]
    async fn settings_reject_server_owned_keys() {
        let (app, store) = app();
        let (status, body) = send(
            &app,
            staff_request(
                "PUT",
                "/admin/settings",
                json!({"settings": {"wc_url": "https://shop.example", "last_webhook_payload": "{}"}}),
            ),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["detail"], "last_webhook_payload");
        assert!(store.settings().await.unwrap().get("wc_url").is_none());

        let (status, body) = send(
            &app,
            staff_request(
                "PUT",
                "/admin/settings",
                json!({"settings": {"wc_url": " https://shop.example "}}),
            ),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["saved"], json!(["wc_url"]));
        assert_eq!(
            store.settings().await.unwrap().get("wc_url").map(String::as_str),
            Some("https://shop.example")
        );
    }

    #[tokio::test]
    async fn job_lookup_validates_ids() {
        let (app, _) = app();
        let (status, body) = send(&app, staff_request("GET", "/jobs/not-a-uuid", Value::Null)).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["error"], "invalid_job_id");

        let uri = format!("/jobs/{}", uuid::Uuid::new_v4());
        let (status, _) = send(&app, staff_request("GET", &uri, Value::Null)).await;
        assert_eq!(status, StatusCode::NOT_FOUND);

        let (status, body) =
            send(&app, staff_request("POST", "/jobs/sync/etsy", Value::Null)).await;
        assert_eq!(status, StatusCode::ACCEPTED);
        assert!(body["job_id"].is_string());
    }

    #[tokio::test]
    async fn metrics_honors_the_key() {
        let store = Arc::new(MemoryStore::new());
        let config = AppConfig::from_lookup(|key| {
            (key == "METRICS_KEY").then(|| "secret".to_string())
        })
        .expect("config");
        let state = build_state(&config, store, Arc::new(EmptyFeed), None);
        let app = build_router(state, AuthState::from_config(None), 1024);

        let request = Request::get("/metrics").body(Body::empty()).unwrap();
        let response = app.clone().oneshot(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);

        let request = Request::get("/metrics")
            .header("X-Metrics-Key", "secret")
            .body(Body::empty())
            .unwrap();
        let response = app.oneshot(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }
}
