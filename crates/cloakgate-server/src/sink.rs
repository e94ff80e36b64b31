use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, RwLock};
use std::time::{Duration, Instant};

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use cloakgate_core::store::TrafficStore;
use cloakgate_core::traffic::{MetricPoint, TrafficRecord};

/// Largest batch a worker takes from the channel per store write.
const DRAIN_BATCH: usize = 100;

/// One request's worth of analytics: a traffic record for the primary store
/// and a metric point for the time-series table.
#[derive(Debug)]
pub struct SinkPayload {
    pub record: TrafficRecord,
    pub point: MetricPoint,
}

/// Non-blocking traffic sink: a bounded channel drained by a worker pool.
///
/// `enqueue` never waits — when the channel is full the payload is dropped
/// and counted. Store saturation shows up in the dropped counter, never in
/// request latency.
pub struct TrafficSink {
    tx: RwLock<Option<mpsc::Sender<SinkPayload>>>,
    dropped: AtomicU64,
    workers: std::sync::Mutex<Vec<JoinHandle<()>>>,
}

impl TrafficSink {
    pub fn spawn(store: Arc<dyn TrafficStore>, capacity: usize, worker_count: usize) -> Self {
        let (tx, rx) = mpsc::channel(capacity);
        let rx = Arc::new(tokio::sync::Mutex::new(rx));
        let mut workers = Vec::with_capacity(worker_count);
        for worker_id in 0..worker_count {
            let rx = Arc::clone(&rx);
            let store = Arc::clone(&store);
            workers.push(tokio::spawn(async move {
                drain_loop(worker_id, rx, store).await;
            }));
        }
        info!(capacity, workers = worker_count, "traffic sink started");
        Self {
            tx: RwLock::new(Some(tx)),
            dropped: AtomicU64::new(0),
            workers: std::sync::Mutex::new(workers),
        }
    }

    /// Append one request's records. Never blocks; full or closed channel
    /// drops the payload and bumps the counter.
    pub fn enqueue(&self, payload: SinkPayload) {
        let sender = match self.tx.read() {
            Ok(guard) => guard.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        };
        let Some(sender) = sender else {
            self.dropped.fetch_add(1, Ordering::Relaxed);
            return;
        };
        if let Err(e) = sender.try_send(payload) {
            self.dropped.fetch_add(1, Ordering::Relaxed);
            debug!(error = %e, "traffic record dropped");
        }
    }

    /// Total payloads dropped since startup. Non-decreasing.
    pub fn dropped_count(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }

    /// Close the channel and wait for the workers to drain, bounded by
    /// `grace`. Called once by the shutdown coordinator.
    pub async fn shutdown(&self, grace: Duration) {
        match self.tx.write() {
            Ok(mut guard) => drop(guard.take()),
            Err(poisoned) => drop(poisoned.into_inner().take()),
        }
        let handles: Vec<JoinHandle<()>> = match self.workers.lock() {
            Ok(mut guard) => guard.drain(..).collect(),
            Err(poisoned) => poisoned.into_inner().drain(..).collect(),
        };
        let deadline = Instant::now() + grace;
        for handle in handles {
            let remaining = deadline.saturating_duration_since(Instant::now());
            if tokio::time::timeout(remaining, handle).await.is_err() {
                warn!("sink worker did not drain within the grace period");
            }
        }
        info!(dropped = self.dropped_count(), "traffic sink stopped");
    }
}

async fn drain_loop(
    worker_id: usize,
    rx: Arc<tokio::sync::Mutex<mpsc::Receiver<SinkPayload>>>,
    store: Arc<dyn TrafficStore>,
) {
    let mut buffer: Vec<SinkPayload> = Vec::with_capacity(DRAIN_BATCH);
    loop {
        let taken = {
            let mut rx = rx.lock().await;
            rx.recv_many(&mut buffer, DRAIN_BATCH).await
        };
        if taken == 0 {
            debug!(worker_id, "sink channel closed, worker exiting");
            return;
        }

        let mut records = Vec::with_capacity(buffer.len());
        let mut points = Vec::with_capacity(buffer.len());
        for payload in buffer.drain(..) {
            records.push(payload.record);
            points.push(payload.point);
        }
        if let Err(e) = store.append_traffic(&records).await {
            error!(worker_id, count = records.len(), error = %e, "traffic append failed, batch lost");
        }
        if let Err(e) = store.append_metrics(&points).await {
            error!(worker_id, count = points.len(), error = %e, "metric append failed, batch lost");
        }
    }
}
