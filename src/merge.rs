use crate::store::Order;
use async_trait::async_trait;
use chrono::{DateTime, TimeDelta, Utc};
use reqwest::Client;
use std::{collections::HashMap, io::Write, sync::Arc, time::Duration};
use thiserror::Error;
use tokio::sync::{Mutex, oneshot};
use tracing::{debug, info, warn};

/// Seconds a local edit shields an order from server overwrites.
pub const LOCK_WINDOW_SECS: i64 = 15;
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(5);

pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;
}

#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

#[derive(Debug, Clone)]
pub struct MergeOutcome {
    pub orders: Vec<Order>,
    /// The server list grew since the last merge.
    pub notify: bool,
}

/// Client-side view of the order board: the local list, the interaction
/// locks and whether a drag is in progress.
pub struct MergeSession<C: Clock> {
    clock: C,
    orders: Vec<Order>,
    locks: HashMap<i64, DateTime<Utc>>,
    dragging: bool,
}

impl<C: Clock> MergeSession<C> {
    pub fn new(clock: C, orders: Vec<Order>) -> Self {
        Self {
            clock,
            orders,
            locks: HashMap::new(),
            dragging: false,
        }
    }

    pub fn orders(&self) -> &[Order] {
        &self.orders
    }

    pub fn acquire_lock(&mut self, id: i64) {
        self.locks.insert(id, self.clock.now());
    }

    pub fn is_locked(&self, id: i64) -> bool {
        self.locks
            .get(&id)
            .is_some_and(|locked_at| {
                self.clock.now() - *locked_at < TimeDelta::seconds(LOCK_WINDOW_SECS)
            })
    }

    /// Optimistic local edit: stamped now, locked, and shown immediately.
    pub fn apply_local(&mut self, mut order: Order) {
        order.updated_at = self.clock.now();
        self.acquire_lock(order.id);
        match self.orders.iter_mut().find(|local| local.id == order.id) {
            Some(slot) => *slot = order,
            None => self.orders.push(order),
        }
    }

    pub fn begin_drag(&mut self) {
        self.dragging = true;
    }

    pub fn end_drag(&mut self) {
        self.dragging = false;
    }

    /// Merges a server snapshot into the local list. Skipped while dragging.
    pub fn tick(&mut self, server: Vec<Order>) -> Option<MergeOutcome> {
        if self.dragging {
            return None;
        }
        let notify = server.len() > self.orders.len();
        let local: HashMap<i64, &Order> = self.orders.iter().map(|order| (order.id, order)).collect();
        let merged: Vec<Order> = server
            .into_iter()
            .map(|remote| match local.get(&remote.id) {
                Some(mine) if self.is_locked(remote.id) => (*mine).clone(),
                Some(mine) if mine.updated_at > remote.updated_at => (*mine).clone(),
                _ => remote,
            })
            .collect();
        self.orders = merged.clone();
        Some(MergeOutcome {
            orders: merged,
            notify,
        })
    }
}

#[derive(Debug, Error)]
pub enum PollError {
    #[error("request failed: {0}")]
    Request(String),
    #[error("HTTP {0}")]
    Status(u16),
    #[error("invalid response: {0}")]
    Deserialize(String),
}

#[async_trait]
pub trait OrderListSource: Send + Sync {
    async fn fetch(&self) -> Result<Vec<Order>, PollError>;
}

#[async_trait]
pub trait Notifier: Send + Sync {
    async fn new_orders(&self, total: usize);
}

/// Reads the board from a running dashboard API.
#[derive(Clone)]
pub struct HttpOrderList {
    client: Client,
    base_url: String,
    staff_key: String,
}

impl HttpOrderList {
    pub fn new(client: Client, base_url: impl Into<String>, staff_key: impl Into<String>) -> Self {
        Self {
            client,
            base_url: base_url.into(),
            staff_key: staff_key.into(),
        }
    }
}

#[async_trait]
impl OrderListSource for HttpOrderList {
    async fn fetch(&self) -> Result<Vec<Order>, PollError> {
        let url = format!("{}/orders", self.base_url.trim_end_matches('/'));
        let response = self
            .client
            .get(url)
            .header("X-Staff-Key", &self.staff_key)
            .send()
            .await
            .map_err(|err| PollError::Request(err.to_string()))?;
        if !response.status().is_success() {
            return Err(PollError::Status(response.status().as_u16()));
        }
        response
            .json::<Vec<Order>>()
            .await
            .map_err(|err| PollError::Deserialize(err.to_string()))
    }
}

/// Rings the terminal bell when new orders arrive.
#[derive(Debug, Clone, Copy, Default)]
pub struct TerminalBell;

#[async_trait]
impl Notifier for TerminalBell {
    async fn new_orders(&self, total: usize) {
        info!(target = "orderdesk.merge", total, "new orders on the board");
        let mut stdout = std::io::stdout();
        if let Err(err) = writeln!(stdout, "\x07{total} sipariş panoda").and_then(|_| stdout.flush()) {
            warn!(target = "orderdesk.merge", "bell failed: {err}");
        }
    }
}

/// Polls `source` every `interval` until `shutdown` fires or its sender is dropped.
pub async fn run_poller<C: Clock + 'static>(
    session: Arc<Mutex<MergeSession<C>>>,
    source: Arc<dyn OrderListSource>,
    notifier: Arc<dyn Notifier>,
    interval: Duration,
    mut shutdown: oneshot::Receiver<()>,
) {
    let mut ticker = tokio::time::interval(interval);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
    loop {
        tokio::select! {
            _ = &mut shutdown => {
                info!(target = "orderdesk.merge", "poller stopped");
                return;
            }
            _ = ticker.tick() => {}
        }
        let server = match source.fetch().await {
            Ok(orders) => orders,
            Err(err) => {
                warn!(target = "orderdesk.merge", "poll failed, skipping tick: {err}");
                continue;
            }
        };
        let outcome = session.lock().await.tick(server);
        match outcome {
            Some(outcome) if outcome.notify => notifier.new_orders(outcome.orders.len()).await,
            Some(outcome) => debug!(
                target = "orderdesk.merge",
                orders = outcome.orders.len(),
                "board merged"
            ),
            None => debug!(target = "orderdesk.merge", "drag in progress, tick skipped"),
        }
    }
}
