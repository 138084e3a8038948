use crate::idempotency::Source;
use crate::marketplace::{
    Credentials, FeedQuery, MarketplaceError, MarketplaceOrder, MissingConfig, OrderFeed,
    scalar_text,
};
use crate::reconcile::{Disposition, IngestPath, Reconciler};
use crate::store::StoreError;
use serde::Serialize;
use serde_json::Value;
use std::{sync::Arc, time::Instant};
use thiserror::Error;
use tracing::{error, info, warn};

#[derive(Debug, Clone, Serialize)]
pub struct SyncReport {
    pub success: bool,
    pub message: String,
    pub logs: Vec<String>,
    pub created: usize,
    pub refreshed: usize,
    pub failed: usize,
}

#[derive(Debug, Error)]
pub enum SyncError {
    #[error(transparent)]
    MissingConfig(#[from] MissingConfig),
    #[error("{} bağlantı hatası: HTTP {status} {body}", .marketplace.label())]
    Transport {
        marketplace: Source,
        status: u16,
        body: String,
    },
    #[error("{} senkronizasyon hatası: {detail}", .marketplace.label())]
    Upstream { marketplace: Source, detail: String },
    #[error("{} kaynağı için senkronizasyon desteklenmiyor", .0.label())]
    Unsupported(Source),
    #[error(transparent)]
    Store(#[from] StoreError),
}

impl SyncError {
    fn from_marketplace(marketplace: Source, err: MarketplaceError) -> Self {
        match err {
            MarketplaceError::Transport { status, body } => SyncError::Transport {
                marketplace,
                status,
                body,
            },
            other => SyncError::Upstream {
                marketplace,
                detail: other.to_string(),
            },
        }
    }
}

/// Batch reconciliation of one storefront against the store.
#[derive(Clone)]
pub struct PullSyncer {
    reconciler: Reconciler,
    feed: Arc<dyn OrderFeed>,
    query: FeedQuery,
}

impl PullSyncer {
    pub fn new(reconciler: Reconciler, feed: Arc<dyn OrderFeed>, query: FeedQuery) -> Self {
        Self {
            reconciler,
            feed,
            query,
        }
    }

    pub async fn sync(&self, source: Source) -> Result<SyncReport, SyncError> {
        if source == Source::Manual {
            return Err(SyncError::Unsupported(source));
        }
        let started = Instant::now();
        let settings = self.reconciler.store().settings().await?;
        let credentials = Credentials::from_settings(source, &settings).inspect_err(|missing| {
            warn!(
                target = "orderdesk.sync",
                source = %source,
                missing = ?missing.fields,
                "sync skipped: credentials incomplete"
            );
        })?;

        let payloads = self
            .feed
            .fetch_orders(&credentials, self.query)
            .await
            .map_err(|err| SyncError::from_marketplace(source, err))?;
        info!(
            target = "orderdesk.sync",
            source = %source,
            fetched = payloads.len(),
            "fetched orders"
        );

        let mut report = SyncReport {
            success: true,
            message: String::new(),
            logs: Vec::with_capacity(payloads.len()),
            created: 0,
            refreshed: 0,
            failed: 0,
        };
        for payload in &payloads {
            self.sync_one(source, payload, &mut report).await;
        }
        report.message = format!(
            "{} sipariş işlendi ({} yeni, {} güncellendi).",
            report.created + report.refreshed,
            report.created,
            report.refreshed
        );
        if report.failed > 0 {
            report.message.push_str(&format!(" {} sipariş hatalı.", report.failed));
        }

        crate::metrics::sync_elapsed(source.prefix(), started.elapsed().as_millis());
        info!(
            target = "orderdesk.sync",
            source = %source,
            created = report.created,
            refreshed = report.refreshed,
            failed = report.failed,
            "sync finished"
        );
        Ok(report)
    }

    async fn sync_one(&self, source: Source, payload: &Value, report: &mut SyncReport) {
        let hint = external_id_hint(source, payload);
        let order = match MarketplaceOrder::decode(source, payload) {
            Ok(order) => order,
            Err(err) => {
                report.logs.push(format!("Order {hint}: SKIPPED - {err}"));
                return;
            }
        };
        match self.reconciler.reconcile(order, IngestPath::PullSync).await {
            Ok(outcome) => {
                match outcome.disposition {
                    Disposition::Created => report.created += 1,
                    Disposition::Refreshed => report.refreshed += 1,
                    Disposition::Duplicate => {}
                }
                report.logs.extend(outcome.logs);
            }
            Err(err) => {
                error!(
                    target = "orderdesk.sync",
                    source = %source,
                    order = %hint,
                    "order sync failed: {err}"
                );
                report.failed += 1;
                report.logs.push(format!("Order {hint}: ERROR - {err}"));
            }
        }
    }
}

fn external_id_hint(source: Source, payload: &Value) -> String {
    let field = match source {
        Source::Etsy => "receipt_id",
        Source::WooCommerce | Source::Manual => "id",
    };
    payload
        .get(field)
        .and_then(scalar_text)
        .unwrap_or_else(|| "?".to_string())
}
