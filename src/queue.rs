use crate::config::Config;
use anyhow::Result;
use async_trait::async_trait;
use rand::Rng;
use serde::Serialize;
use serde_json::Value;
use std::cmp::Ordering as CmpOrdering;
use std::collections::{BinaryHeap, VecDeque};
use std::sync::Mutex;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::sync::{Notify, Semaphore};
use tokio::time::{Duration, Instant, sleep};
use tracing::{error, info, warn};

/// Number of recent delivery durations kept for the rolling average.
const PROCESSING_TIME_WINDOW: usize = 50;

/// Destination for queued sync records. Production wires the spreadsheet
/// tracking endpoint here; tests substitute counting fakes.
#[async_trait]
pub trait SyncSink: Send + Sync {
    async fn deliver(&self, item: &QueueItem) -> Result<()>;
}

#[derive(Debug, Clone)]
pub struct QueueConfig {
    pub max_concurrent: usize,
    pub dispatch_delay_ms: u64,
    pub max_retries: u32,
    pub backoff_base_ms: u64,
    pub backoff_max_ms: u64,
    pub depth_warn: usize,
}

impl QueueConfig {
    pub fn from_config(config: &Config) -> Self {
        Self {
            max_concurrent: config.queue_max_concurrent,
            dispatch_delay_ms: config.queue_dispatch_delay_ms,
            max_retries: config.queue_max_retries,
            backoff_base_ms: config.queue_backoff_base_ms,
            backoff_max_ms: config.queue_backoff_max_ms,
            depth_warn: config.queue_depth_warn,
        }
    }
}

/// One pending outbound synchronization task. `attempts` counts dispatches
/// already made; an item is dropped after `max_retries` retries, i.e.
/// `max_retries + 1` dispatches in total.
#[derive(Debug, Clone)]
pub struct QueueItem {
    pub id: String,
    pub kind: String,
    pub payload: Value,
    pub priority: u8,
    pub enqueued_at_epoch_ms: i64,
    pub attempts: u32,
}

struct HeapEntry {
    priority: u8,
    seq: u64,
    item: QueueItem,
}

// BinaryHeap is a max-heap; invert so the lowest (priority, seq) pops first.
// Priority 1 is the highest priority, insertion order breaks ties.
impl Ord for HeapEntry {
    fn cmp(&self, other: &Self) -> CmpOrdering {
        (other.priority, other.seq).cmp(&(self.priority, self.seq))
    }
}

impl PartialOrd for HeapEntry {
    fn partial_cmp(&self, other: &Self) -> Option<CmpOrdering> {
        Some(self.cmp(other))
    }
}

impl PartialEq for HeapEntry {
    fn eq(&self, other: &Self) -> bool {
        self.priority == other.priority && self.seq == other.seq
    }
}

impl Eq for HeapEntry {}

struct Lanes {
    fresh: BinaryHeap<HeapEntry>,
    /// Retries land here after their backoff elapses and are drained before
    /// fresh items, so a backoff storm cannot starve them and they cannot
    /// starve fresh high-priority work while still waiting.
    retry: VecDeque<QueueItem>,
    next_seq: u64,
}

#[derive(Debug, Clone, Serialize)]
pub struct QueueStats {
    pub depth: usize,
    pub in_flight: usize,
    pub processed: u64,
    pub failed: u64,
    pub avg_processing_ms: u64,
    pub healthy: bool,
}

pub struct SyncQueue {
    config: QueueConfig,
    lanes: Mutex<Lanes>,
    notify: Notify,
    semaphore: Arc<Semaphore>,
    in_flight: AtomicUsize,
    processed: AtomicU64,
    failed: AtomicU64,
    processing_times: Mutex<VecDeque<u64>>,
}

impl SyncQueue {
    pub fn new(config: QueueConfig) -> Arc<Self> {
        let semaphore = Arc::new(Semaphore::new(config.max_concurrent));
        Arc::new(Self {
            config,
            lanes: Mutex::new(Lanes {
                fresh: BinaryHeap::new(),
                retry: VecDeque::new(),
                next_seq: 0,
            }),
            notify: Notify::new(),
            semaphore,
            in_flight: AtomicUsize::new(0),
            processed: AtomicU64::new(0),
            failed: AtomicU64::new(0),
            processing_times: Mutex::new(VecDeque::new()),
        })
    }

    /// Adds a sync task; priority 1 is dispatched first. Returns the item id.
    pub fn enqueue(&self, payload: Value, kind: &str, priority: u8) -> String {
        let item = QueueItem {
            id: uuid::Uuid::new_v4().to_string(),
            kind: kind.to_string(),
            payload,
            priority: priority.max(1),
            enqueued_at_epoch_ms: chrono::Utc::now().timestamp_millis(),
            attempts: 0,
        };
        let item_id = item.id.clone();

        {
            let mut lanes = self.lock_lanes();
            let seq = lanes.next_seq;
            lanes.next_seq += 1;
            lanes.fresh.push(HeapEntry {
                priority: item.priority,
                seq,
                item,
            });
        }

        self.notify.notify_one();
        item_id
    }

    /// Pops the next dispatchable item: due retries first, then the fresh
    /// lane by (priority, insertion order).
    pub fn dequeue(&self) -> Option<QueueItem> {
        let mut lanes = self.lock_lanes();
        if let Some(item) = lanes.retry.pop_front() {
            return Some(item);
        }
        lanes.fresh.pop().map(|entry| entry.item)
    }

    pub fn depth(&self) -> usize {
        let lanes = self.lock_lanes();
        lanes.fresh.len() + lanes.retry.len()
    }

    pub fn stats(&self) -> QueueStats {
        let depth = self.depth();
        let in_flight = self.in_flight.load(Ordering::SeqCst);
        let avg_processing_ms = {
            let times = self
                .processing_times
                .lock()
                .unwrap_or_else(|poisoned| poisoned.into_inner());
            if times.is_empty() {
                0
            } else {
                times.iter().sum::<u64>() / times.len() as u64
            }
        };

        QueueStats {
            depth,
            in_flight,
            processed: self.processed.load(Ordering::SeqCst),
            failed: self.failed.load(Ordering::SeqCst),
            avg_processing_ms,
            healthy: depth <= self.config.depth_warn && in_flight < self.config.max_concurrent,
        }
    }

    async fn next_item(&self) -> QueueItem {
        loop {
            if let Some(item) = self.dequeue() {
                return item;
            }
            self.notify.notified().await;
        }
    }

    fn requeue_for_retry(&self, item: QueueItem) {
        self.lock_lanes().retry.push_back(item);
        self.notify.notify_one();
    }

    fn record_success(&self, elapsed_ms: u64) {
        self.processed.fetch_add(1, Ordering::SeqCst);
        let mut times = self
            .processing_times
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        if times.len() >= PROCESSING_TIME_WINDOW {
            times.pop_front();
        }
        times.push_back(elapsed_ms);
    }

    fn lock_lanes(&self) -> std::sync::MutexGuard<'_, Lanes> {
        self.lanes.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

/// Long-running dispatch loop: takes the highest-priority due item, hands it
/// to a delivery task bounded by the concurrency semaphore, and paces takes
/// by the configured inter-dispatch delay to respect downstream rate limits.
pub async fn run_dispatcher(queue: Arc<SyncQueue>, sink: Arc<dyn SyncSink>) {
    info!(
        max_concurrent = queue.config.max_concurrent,
        dispatch_delay_ms = queue.config.dispatch_delay_ms,
        "sync queue dispatcher running"
    );

    loop {
        let item = queue.next_item().await;

        let permit = match queue.semaphore.clone().acquire_owned().await {
            Ok(permit) => permit,
            Err(_) => {
                error!("sync queue semaphore closed; dispatcher stopping");
                return;
            }
        };

        queue.in_flight.fetch_add(1, Ordering::SeqCst);
        let task_queue = queue.clone();
        let task_sink = sink.clone();
        tokio::spawn(async move {
            deliver_item(task_queue, task_sink, item).await;
            drop(permit);
        });

        sleep(Duration::from_millis(queue.config.dispatch_delay_ms)).await;
    }
}

async fn deliver_item(queue: Arc<SyncQueue>, sink: Arc<dyn SyncSink>, mut item: QueueItem) {
    item.attempts += 1;
    let started = Instant::now();
    let result = sink.deliver(&item).await;
    let elapsed_ms = started.elapsed().as_millis() as u64;
    queue.in_flight.fetch_sub(1, Ordering::SeqCst);

    match result {
        Ok(()) => {
            queue.record_success(elapsed_ms);
            info!(
                item_id = %item.id,
                kind = %item.kind,
                attempt = item.attempts,
                elapsed_ms,
                "sync item delivered"
            );
        }
        Err(error) if item.attempts <= queue.config.max_retries => {
            let backoff = retry_backoff_ms(
                queue.config.backoff_base_ms,
                queue.config.backoff_max_ms,
                item.attempts - 1,
            );
            warn!(
                item_id = %item.id,
                kind = %item.kind,
                attempt = item.attempts,
                backoff_ms = backoff,
                error = %error,
                "sync delivery failed; scheduling retry"
            );

            let retry_queue = queue.clone();
            tokio::spawn(async move {
                sleep(Duration::from_millis(backoff)).await;
                retry_queue.requeue_for_retry(item);
            });
        }
        Err(error) => {
            queue.failed.fetch_add(1, Ordering::SeqCst);
            error!(
                item_id = %item.id,
                kind = %item.kind,
                attempts = item.attempts,
                error = %error,
                "sync item dropped after exhausting retries"
            );
        }
    }
}

/// Exponential backoff with a cap and up to 25% additive jitter.
pub fn retry_backoff_ms(base_ms: u64, max_ms: u64, attempt_index: u32) -> u64 {
    let exponent = attempt_index.min(31);
    let scaled = base_ms.saturating_mul(1u64 << exponent).min(max_ms);
    let jitter = rand::thread_rng().gen_range(0..=scaled / 4);
    scaled.saturating_add(jitter)
}
