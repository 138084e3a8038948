use crate::{
    idempotency::Source,
    models::ApiError,
    sync::{PullSyncer, SyncError, SyncReport},
};
use serde::Serialize;
use std::{
    collections::{HashMap, VecDeque},
    sync::Arc,
    time::Duration,
};
use tokio::{
    sync::{Mutex, mpsc},
    task::JoinHandle,
};
use tracing::{info, warn};
use uuid::Uuid;

/// Completed and failed jobs kept for status polling; older ones are dropped.
pub const FINISHED_JOB_RETENTION: usize = 512;

#[derive(Clone)]
pub struct JobQueue {
    tx: mpsc::Sender<Job>,
    statuses: Arc<Mutex<JobTable>>,
}

struct JobTable {
    states: HashMap<Uuid, JobState>,
    finished: VecDeque<Uuid>,
    retain: usize,
}

impl JobTable {
    fn new(retain: usize) -> Self {
        Self {
            states: HashMap::new(),
            finished: VecDeque::new(),
            retain,
        }
    }

    fn finish(&mut self, id: Uuid, state: JobState) {
        self.states.insert(id, state);
        self.finished.push_back(id);
        while self.finished.len() > self.retain {
            if let Some(oldest) = self.finished.pop_front() {
                self.states.remove(&oldest);
            }
        }
    }
}

#[derive(Clone)]
struct Job {
    id: Uuid,
    source: Source,
    requested_by: String,
}

#[derive(Clone, Serialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum JobState {
    Queued,
    Running,
    Completed {
        result: SyncReport,
    },
    Failed {
        error: String,
        stage: Option<String>,
    },
}

#[derive(Clone, Serialize)]
pub struct JobInfo {
    pub id: String,
    #[serde(flatten)]
    pub state: JobState,
}

fn failure_stage(err: &SyncError) -> &'static str {
    match err {
        SyncError::MissingConfig(_) => "config",
        SyncError::Transport { .. } | SyncError::Upstream { .. } => "transport",
        SyncError::Unsupported(_) => "request",
        SyncError::Store(_) => "store",
    }
}

impl JobQueue {
    pub fn spawn(syncer: PullSyncer, capacity: usize) -> (Self, JoinHandle<()>) {
        Self::spawn_with_retention(syncer, capacity, FINISHED_JOB_RETENTION)
    }

    pub fn spawn_with_retention(
        syncer: PullSyncer,
        capacity: usize,
        retain: usize,
    ) -> (Self, JoinHandle<()>) {
        let (tx, mut rx) = mpsc::channel::<Job>(capacity.max(1));
        let statuses = Arc::new(Mutex::new(JobTable::new(retain.max(1))));
        let statuses_bg = statuses.clone();

        let handle = tokio::spawn(async move {
            while let Some(job) = rx.recv().await {
                {
                    let mut guard = statuses_bg.lock().await;
                    guard.states.insert(job.id, JobState::Running);
                }

                info!(
                    target = "orderdesk.sync",
                    job_id = %job.id,
                    source = %job.source,
                    requested_by = %job.requested_by,
                    "sync job started"
                );
                let result = syncer.sync(job.source).await;
                let mut guard = statuses_bg.lock().await;
                match result {
                    Ok(report) => {
                        guard.finish(job.id, JobState::Completed { result: report });
                    }
                    Err(err) => {
                        warn!(
                            target = "orderdesk.sync",
                            job_id = %job.id,
                            "sync job failed: {err}"
                        );
                        guard.finish(
                            job.id,
                            JobState::Failed {
                                error: err.to_string(),
                                stage: Some(failure_stage(&err).to_string()),
                            },
                        );
                    }
                }
            }
        });

        (Self { tx, statuses }, handle)
    }

    pub async fn enqueue_sync(&self, source: Source, requested_by: &str) -> Result<Uuid, ApiError> {
        let id = Uuid::new_v4();
        {
            let mut guard = self.statuses.lock().await;
            guard.states.insert(id, JobState::Queued);
        }
        let job = Job {
            id,
            source,
            requested_by: requested_by.to_string(),
        };
        if self.tx.send(job).await.is_err() {
            self.statuses.lock().await.states.remove(&id);
            return Err(ApiError {
                error: "queue_send_failed".into(),
                detail: Some("worker not available".into()),
                code: None,
            });
        }
        Ok(id)
    }

    pub async fn get(&self, id: Uuid) -> Option<JobInfo> {
        let guard = self.statuses.lock().await;
        guard.states.get(&id).cloned().map(|state| JobInfo {
            id: id.to_string(),
            state,
        })
    }
}

/// Enqueues a sync for every source on a fixed period. The first round runs
/// one full period after startup.
pub fn spawn_schedule(queue: JobQueue, sources: Vec<Source>, period: Duration) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval_at(tokio::time::Instant::now() + period, period);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
        loop {
            ticker.tick().await;
            for source in &sources {
                match queue.enqueue_sync(*source, "scheduler").await {
                    Ok(id) => info!(
                        target = "orderdesk.sync",
                        job_id = %id,
                        source = %source,
                        "scheduled sync enqueued"
                    ),
                    Err(err) => {
                        warn!(
                            target = "orderdesk.sync",
                            "scheduler stopped: {}",
                            err.error
                        );
                        return;
                    }
                }
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::marketplace::{Credentials, FeedQuery, MarketplaceError, OrderFeed};
    use crate::normalize::image::DEFAULT_PLACEHOLDER;
    use crate::reconcile::{LabelPolicy, Reconciler};
    use crate::store::{MemoryStore, OrderStore};
    use async_trait::async_trait;
    use chrono::NaiveDate;
    use serde_json::{Value, json};

    struct OnePage;

    #[async_trait]
    impl OrderFeed for OnePage {
        async fn fetch_orders(
            &self,
            _credentials: &Credentials,
            _query: FeedQuery,
        ) -> Result<Vec<Value>, MarketplaceError> {
            Ok(vec![json!({
                "id": 900,
                "status": "processing",
                "billing": {"first_name": "Elif", "last_name": "Kaya"}
            })])
        }
    }

    fn queue(store: Arc<MemoryStore>) -> JobQueue {
        JobQueue::spawn(syncer(store), 4).0
    }

    fn syncer(store: Arc<MemoryStore>) -> PullSyncer {
        PullSyncer::new(
            Reconciler::new(store, LabelPolicy::Reset, DEFAULT_PLACEHOLDER),
            Arc::new(OnePage),
            FeedQuery {
                after: NaiveDate::from_ymd_opt(2025, 12, 20)
                    .unwrap()
                    .and_hms_opt(0, 0, 0)
                    .unwrap(),
                page_size: 20,
            },
        )
    }

    async fn settle(queue: &JobQueue, id: Uuid) -> JobInfo {
        for _ in 0..100 {
            if let Some(info) = queue.get(id).await
                && !matches!(info.state, JobState::Queued | JobState::Running)
            {
                return info;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("job {id} did not finish");
    }

    #[tokio::test]
    async fn sync_job_completes_with_report() {
        let store = Arc::new(MemoryStore::new());
        store.put_setting("wc_url", "https://shop.example").await.unwrap();
        store.put_setting("wc_key", "ck").await.unwrap();
        store.put_setting("wc_secret", "cs").await.unwrap();
        let queue = queue(store.clone());

        let id = queue
            .enqueue_sync(Source::WooCommerce, "Mehmet")
            .await
            .expect("enqueue");
        let info = settle(&queue, id).await;
        let JobState::Completed { result } = info.state else {
            panic!("job failed");
        };
        assert_eq!(result.created, 1);
        assert!(store.find_by_external_key("WC-900").await.unwrap().is_some());

        let body = serde_json::to_value(queue.get(id).await.expect("info")).unwrap();
        assert_eq!(body["state"], "completed");
        assert_eq!(body["id"], id.to_string());
    }

    #[tokio::test]
    async fn missing_settings_fail_the_job_at_config_stage() {
        let queue = queue(Arc::new(MemoryStore::new()));
        let id = queue
            .enqueue_sync(Source::WooCommerce, "Mehmet")
            .await
            .expect("enqueue");
        let info = settle(&queue, id).await;
        let JobState::Failed { error, stage } = info.state else {
            panic!("job should fail");
        };
        assert!(error.contains("eksik"));
        assert_eq!(stage.as_deref(), Some("config"));
        assert!(queue.get(Uuid::new_v4()).await.is_none());
    }

    #[tokio::test]
    async fn finished_jobs_beyond_retention_are_dropped() {
        let queue = JobQueue::spawn_with_retention(syncer(Arc::new(MemoryStore::new())), 2, 3).0;
        let mut ids = Vec::new();
        for _ in 0..5 {
            ids.push(
                queue
                    .enqueue_sync(Source::WooCommerce, "scheduler")
                    .await
                    .expect("enqueue"),
            );
        }
        settle(&queue, ids[4]).await;

        assert!(queue.get(ids[0]).await.is_none());
        assert!(queue.get(ids[1]).await.is_none());
        for id in &ids[2..] {
            assert!(queue.get(*id).await.is_some());
        }
        assert_eq!(queue.statuses.lock().await.states.len(), 3);
    }
}
