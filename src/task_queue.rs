//! Background task queues (C7): an FCFs worker pool and a priority variant,
//! ported from `original_source/task_queue.py`'s `asyncio.Queue` /
//! `PriorityQueue` worker pools into Tokio's `mpsc`, following the teacher's
//! engine idiom of logging-and-swallowing job errors rather than crashing a
//! worker.

use std::cmp::Ordering;
use std::collections::BinaryHeap;
use std::sync::Arc;

use tokio::sync::{mpsc, Mutex, Notify};
use tokio::task::JoinHandle;

pub type Job = Box<dyn FnOnce() -> futures_util::future::BoxFuture<'static, anyhow::Result<()>> + Send>;

/// FIFO worker pool: `workers` cooperative Tokio tasks pull jobs off an
/// `mpsc` channel. A job's error is logged and swallowed; the worker keeps
/// pulling.
pub struct BackgroundTaskQueue {
    tx: Option<mpsc::UnboundedSender<Job>>,
    workers: Vec<JoinHandle<()>>,
}

impl BackgroundTaskQueue {
    pub fn new(workers: usize) -> Self {
        let (tx, rx) = mpsc::unbounded_channel::<Job>();
        let rx = Arc::new(Mutex::new(rx));
        let mut handles = Vec::with_capacity(workers);
        for id in 0..workers.max(1) {
            let rx = rx.clone();
            handles.push(tokio::spawn(async move {
                loop {
                    let job = {
                        let mut guard = rx.lock().await;
                        guard.recv().await
                    };
                    match job {
                        Some(job) => {
                            if let Err(e) = job().await {
                                tracing::warn!(worker = id, error = %e, "background task failed");
                            }
                        }
                        None => return,
                    }
                }
            }));
        }
        Self { tx: Some(tx), workers: handles }
    }

    pub fn enqueue(&self, job: Job) {
        if let Some(tx) = &self.tx {
            let _ = tx.send(job);
        }
    }

    /// Close the queue, await drain, then join every worker.
    pub async fn stop(mut self) {
        self.tx.take();
        for handle in self.workers.drain(..) {
            let _ = handle.await;
        }
    }
}

struct PriorityJob {
    priority: i64,
    seq: u64,
    job: Job,
}

impl PartialEq for PriorityJob {
    fn eq(&self, other: &Self) -> bool {
        self.priority == other.priority && self.seq == other.seq
    }
}
impl Eq for PriorityJob {}

impl PartialOrd for PriorityJob {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for PriorityJob {
    fn cmp(&self, other: &Self) -> Ordering {
        // BinaryHeap is a max-heap; invert priority so lower values pop first,
        // then break ties by insertion order (earlier seq pops first).
        other.priority.cmp(&self.priority).then_with(|| other.seq.cmp(&self.seq))
    }
}

/// Same worker-pool contract as [`BackgroundTaskQueue`], but jobs carry a
/// numeric priority (lower runs first) and are ordered by a `BinaryHeap`.
pub struct PriorityTaskQueue {
    heap: Arc<Mutex<BinaryHeap<PriorityJob>>>,
    notify: Arc<Notify>,
    closed: Arc<std::sync::atomic::AtomicBool>,
    next_seq: std::sync::atomic::AtomicU64,
    workers: Vec<JoinHandle<()>>,
}

impl PriorityTaskQueue {
    pub fn new(workers: usize) -> Self {
        let heap = Arc::new(Mutex::new(BinaryHeap::new()));
        let notify = Arc::new(Notify::new());
        let closed = Arc::new(std::sync::atomic::AtomicBool::new(false));

        let mut handles = Vec::with_capacity(workers);
        for id in 0..workers.max(1) {
            let heap = heap.clone();
            let notify = notify.clone();
            let closed = closed.clone();
            handles.push(tokio::spawn(async move {
                loop {
                    let popped = {
                        let mut guard = heap.lock().await;
                        guard.pop()
                    };
                    match popped {
                        Some(entry) => {
                            if let Err(e) = (entry.job)().await {
                                tracing::warn!(worker = id, error = %e, "priority task failed");
                            }
                        }
                        None => {
                            if closed.load(std::sync::atomic::Ordering::SeqCst) {
                                return;
                            }
                            notify.notified().await;
                        }
                    }
                }
            }));
        }

        Self { heap, notify, closed, next_seq: std::sync::atomic::AtomicU64::new(0), workers: handles }
    }

    pub async fn enqueue(&self, priority: i64, job: Job) {
        let seq = self.next_seq.fetch_add(1, std::sync::atomic::Ordering::SeqCst);
        let mut guard = self.heap.lock().await;
        guard.push(PriorityJob { priority, seq, job });
        drop(guard);
        self.notify.notify_one();
    }

    pub async fn stop(self) {
        self.closed.store(true, std::sync::atomic::Ordering::SeqCst);
        self.notify.notify_waiters();
        for handle in self.workers {
            let _ = handle.await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[tokio::test]
    async fn background_queue_runs_all_jobs() {
        let queue = BackgroundTaskQueue::new(2);
        let counter = Arc::new(AtomicUsize::new(0));
        for _ in 0..10 {
            let counter = counter.clone();
            queue.enqueue(Box::new(move || {
                Box::pin(async move {
                    counter.fetch_add(1, Ordering::SeqCst);
                    Ok(())
                })
            }));
        }
        queue.stop().await;
        assert_eq!(counter.load(Ordering::SeqCst), 10);
    }

    #[tokio::test]
    async fn priority_queue_runs_lower_priority_first() {
        let queue = PriorityTaskQueue::new(1);
        let order = Arc::new(Mutex::new(Vec::new()));

        for (priority, label) in [(5, "low"), (1, "high"), (3, "mid")] {
            let order = order.clone();
            queue
                .enqueue(
                    priority,
                    Box::new(move || {
                        Box::pin(async move {
                            order.lock().await.push(label);
                            Ok(())
                        })
                    }),
                )
                .await;
        }
        // Give the single worker a moment to drain before stopping.
        tokio::time::sleep(std::time::Duration::from_millis(20)).await;
        queue.stop().await;

        let recorded = order.lock().await.clone();
        assert_eq!(recorded, vec!["high", "mid", "low"]);
    }
}
