//! Detection stream fan-out (C8), grounded bit-for-bit in
//! `original_source/services/stream_processor.py`'s `_enqueue` (evict-oldest
//! then enqueue) and broadcast loop (`put_nowait` guarded by `QueueFull`),
//! which pins the asymmetric drop policy used here: the ingest queue drops
//! the *oldest* item on overflow, subscriber queues drop the *new* message.

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use tokio::sync::{mpsc, Mutex, Notify};

use crate::analytics::{fingerprint, security};
use crate::models::record::{Record, WifiDetection};

const DEFAULT_INGEST_CAPACITY: usize = 1000;
const DEFAULT_SUBSCRIBER_CAPACITY: usize = 100;
const DEFAULT_RATE_LIMIT_PER_SEC: u64 = 20;

#[derive(Debug, Clone, Serialize)]
pub struct StreamMessage {
    pub timestamp: String,
    pub source: &'static str,
    pub records: Vec<Record>,
    pub stats: HashMap<&'static str, u64>,
    pub seq: u64,
}

enum Ingested {
    Wifi(Vec<WifiDetection>),
    Bluetooth(Vec<Record>),
    Cellular(Vec<Record>),
}

struct Subscriber {
    tx: mpsc::Sender<StreamMessage>,
    next_seq: AtomicU64,
}

struct IngestQueue {
    capacity: usize,
    buffer: Mutex<VecDeque<Ingested>>,
    notify: Notify,
}

pub struct StreamProcessor {
    ingest: Arc<IngestQueue>,
    subscribers: Arc<Mutex<Vec<Subscriber>>>,
    stats: Arc<Mutex<HashMap<&'static str, u64>>>,
}

impl StreamProcessor {
    pub fn spawn() -> Self {
        Self::spawn_with(DEFAULT_INGEST_CAPACITY, DEFAULT_SUBSCRIBER_CAPACITY, DEFAULT_RATE_LIMIT_PER_SEC)
    }

    pub fn spawn_with(ingest_capacity: usize, subscriber_capacity: usize, rate_limit_per_sec: u64) -> Self {
        let ingest = Arc::new(IngestQueue {
            capacity: ingest_capacity,
            buffer: Mutex::new(VecDeque::with_capacity(ingest_capacity)),
            notify: Notify::new(),
        });
        let subscribers: Arc<Mutex<Vec<Subscriber>>> = Arc::new(Mutex::new(Vec::new()));
        let stats = Arc::new(Mutex::new(HashMap::new()));

        let ingest_clone = ingest.clone();
        let subscribers_clone = subscribers.clone();
        let stats_clone = stats.clone();
        tokio::spawn(run(ingest_clone, subscribers_clone, stats_clone, subscriber_capacity, rate_limit_per_sec));

        Self { ingest, subscribers, stats }
    }

    /// Enqueue a batch; on a full ingest queue, evict the oldest buffered
    /// item before enqueuing the new one (the new item is never dropped).
    async fn publish(&self, item: Ingested) {
        let mut buffer = self.ingest.buffer.lock().await;
        if buffer.len() >= self.ingest.capacity {
            buffer.pop_front();
        }
        buffer.push_back(item);
        drop(buffer);
        self.ingest.notify.notify_one();
    }

    pub async fn publish_wifi(&self, records: Vec<WifiDetection>) {
        self.publish(Ingested::Wifi(records)).await;
    }

    pub async fn publish_bluetooth(&self, records: Vec<Record>) {
        self.publish(Ingested::Bluetooth(records)).await;
    }

    pub async fn publish_cellular(&self, records: Vec<Record>) {
        self.publish(Ingested::Cellular(records)).await;
    }

    /// Register a new subscriber with its own bounded, lossy queue.
    pub async fn subscribe(&self) -> mpsc::Receiver<StreamMessage> {
        let (tx, rx) = mpsc::channel(DEFAULT_SUBSCRIBER_CAPACITY);
        let mut subs = self.subscribers.lock().await;
        subs.push(Subscriber { tx, next_seq: AtomicU64::new(0) });
        rx
    }

    pub async fn stats_snapshot(&self) -> HashMap<&'static str, u64> {
        self.stats.lock().await.clone()
    }
}

async fn next_item(ingest: &IngestQueue) -> Ingested {
    loop {
        let mut buffer = ingest.buffer.lock().await;
        if let Some(item) = buffer.pop_front() {
            return item;
        }
        drop(buffer);
        ingest.notify.notified().await;
    }
}

async fn run(
    ingest: Arc<IngestQueue>,
    subscribers: Arc<Mutex<Vec<Subscriber>>>,
    stats: Arc<Mutex<HashMap<&'static str, u64>>>,
    _subscriber_capacity: usize,
    rate_limit_per_sec: u64,
) {
    let min_interval = Duration::from_secs_f64(1.0 / rate_limit_per_sec.max(1) as f64);

    loop {
        let item = next_item(&ingest).await;
        let (source, records, new_stats_count) = match item {
            Ingested::Wifi(mut wifi) => {
                for det in wifi.iter_mut() {
                    let fp = fingerprint::fingerprint_wifi(det);
                    tracing::debug!(bssid = %det.bssid, fingerprint = %fp.hash, "fingerprinted");
                }
                let _findings = security::evaluate_wifi_batch(&wifi);
                let count = wifi.len();
                (
                    "wifi",
                    wifi.into_iter().map(Record::Wifi).collect::<Vec<_>>(),
                    count,
                )
            }
            Ingested::Bluetooth(records) => {
                let count = records.len();
                ("bluetooth", records, count)
            }
            Ingested::Cellular(records) => {
                let count = records.len();
                ("cellular", records, count)
            }
        };

        let mut stats_guard = stats.lock().await;
        *stats_guard.entry(source).or_insert(0) += new_stats_count as u64;
        let stats_snapshot = stats_guard.clone();
        drop(stats_guard);

        let message_base = StreamMessage {
            timestamp: chrono::Utc::now().to_rfc3339(),
            source,
            records,
            stats: stats_snapshot,
            seq: 0,
        };

        let subs = subscribers.lock().await;
        for sub in subs.iter() {
            let seq = sub.next_seq.fetch_add(1, Ordering::SeqCst);
            let mut message = message_base.clone();
            message.seq = seq;
            // Non-blocking send: a full subscriber queue drops this message
            // for that subscriber only; the subscriber stays registered.
            let _ = sub.tx.try_send(message);
        }
        drop(subs);

        tokio::time::sleep(min_interval).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::record::WifiDetection;

    #[tokio::test]
    async fn subscriber_receives_broadcast_wifi_batch() {
        let processor = StreamProcessor::spawn_with(10, 10, 1000);
        let mut rx = processor.subscribe().await;

        let det = WifiDetection::new("adhoc", "AA:BB:CC:DD:EE:FF", "2024-01-01T00:00:00Z").unwrap();
        processor.publish_wifi(vec![det]).await;

        let msg = tokio::time::timeout(Duration::from_secs(1), rx.recv()).await.unwrap().unwrap();
        assert_eq!(msg.source, "wifi");
        assert_eq!(msg.records.len(), 1);
        assert_eq!(msg.seq, 0);
    }

    #[tokio::test]
    async fn subscriber_queue_overflow_drops_new_message_without_deregistering() {
        let processor = StreamProcessor::spawn_with(100, 1, 1000);
        let mut rx = processor.subscribe().await;

        for _ in 0..5 {
            let det = WifiDetection::new("adhoc", "AA:BB:CC:DD:EE:FF", "2024-01-01T00:00:00Z").unwrap();
            processor.publish_wifi(vec![det]).await;
        }
        tokio::time::sleep(Duration::from_millis(50)).await;

        let mut received = 0;
        while rx.try_recv().is_ok() {
            received += 1;
        }
        assert!(received >= 1, "subscriber should still receive at least one message");
    }
}
