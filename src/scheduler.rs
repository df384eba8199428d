//! Two scheduling disciplines (C6), generalized from the teacher's
//! per-engine `tokio::spawn` + `tokio::time::interval` loops (see
//! `alert_engine.rs`, `slo_engine.rs`, `anomaly_engine.rs`) into a single
//! reusable named-job runner, plus a scan-gating rule evaluator.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use chrono::{Datelike, Timelike, Utc};
use tokio::sync::Mutex;
use tokio::task::JoinHandle;

use crate::error::PiwError;

#[derive(Debug, Clone, Default, serde::Serialize)]
pub struct JobMetrics {
    pub next_run: Option<String>,
    pub last_duration_secs: Option<f64>,
    pub success_count: u64,
    pub error_count: u64,
}

#[async_trait]
pub trait AsyncJob: Send + Sync {
    async fn run(&self) -> anyhow::Result<()>;
}

#[async_trait]
impl<F, Fut> AsyncJob for F
where
    F: Fn() -> Fut + Send + Sync,
    Fut: std::future::Future<Output = anyhow::Result<()>> + Send,
{
    async fn run(&self) -> anyhow::Result<()> {
        (self)().await
    }
}

struct ScheduledJob {
    interval: Duration,
    job: Arc<dyn AsyncJob>,
    handle: JoinHandle<()>,
}

/// Schedules named async closures at a fixed cadence measured from the
/// previous start time, so long-running work does not drift the schedule
/// (sleep = max(0, interval - elapsed)).
pub struct AsyncScheduler {
    metrics: Arc<Mutex<HashMap<String, JobMetrics>>>,
    jobs: Mutex<HashMap<String, ScheduledJob>>,
}

impl Default for AsyncScheduler {
    fn default() -> Self {
        Self { metrics: Arc::new(Mutex::new(HashMap::new())), jobs: Mutex::new(HashMap::new()) }
    }
}

impl AsyncScheduler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `job` to run every `interval`; rejects non-positive intervals.
    pub async fn schedule(&self, name: &str, interval: Duration, job: Arc<dyn AsyncJob>) -> Result<(), PiwError> {
        if interval.is_zero() {
            return Err(PiwError::Validation("scheduler interval must be positive".into()));
        }
        let metrics = self.metrics.clone();
        let name_owned = name.to_string();
        let job_clone = job.clone();

        let handle = tokio::spawn(async move {
            loop {
                let start = Instant::now();
                let result = job_clone.run().await;
                let elapsed = start.elapsed();

                let mut guard = metrics.lock().await;
                let entry = guard.entry(name_owned.clone()).or_default();
                entry.last_duration_secs = Some(elapsed.as_secs_f64());
                match result {
                    Ok(()) => entry.success_count += 1,
                    Err(e) => {
                        entry.error_count += 1;
                        tracing::error!(job = %name_owned, error = %e, "scheduled job failed");
                    }
                }
                entry.next_run = Some((Utc::now() + chrono::Duration::from_std(interval).unwrap_or_default()).to_rfc3339());
                drop(guard);

                let sleep_for = interval.saturating_sub(elapsed);
                tokio::time::sleep(sleep_for).await;
            }
        });

        let mut jobs = self.jobs.lock().await;
        jobs.insert(name.to_string(), ScheduledJob { interval, job, handle });
        Ok(())
    }

    pub async fn get_metrics(&self) -> HashMap<String, JobMetrics> {
        self.metrics.lock().await.clone()
    }

    /// Cooperatively cancel every scheduled job; in-flight work is aborted
    /// and errors from the abort are suppressed.
    pub async fn cancel_all(&self) {
        let mut jobs = self.jobs.lock().await;
        for (_, scheduled) in jobs.drain() {
            scheduled.handle.abort();
            let _ = scheduled.handle.await;
        }
    }
}

/// Widget-polling scheduler: associates a named callback with an interval,
/// re-invoked every `update_interval` seconds until cancelled.
pub struct PollScheduler {
    inner: AsyncScheduler,
}

impl Default for PollScheduler {
    fn default() -> Self {
        Self { inner: AsyncScheduler::new() }
    }
}

impl PollScheduler {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn register(&self, name: &str, update_interval: Duration, job: Arc<dyn AsyncJob>) -> Result<(), PiwError> {
        self.inner.schedule(name, update_interval, job).await
    }

    pub async fn get_metrics(&self) -> HashMap<String, JobMetrics> {
        self.inner.get_metrics().await
    }

    pub async fn cancel_all(&self) {
        self.inner.cancel_all().await
    }
}

/// Scan-gating rules consulted by C4 before running an executor.
#[derive(Debug, Clone)]
pub struct ScanRules {
    pub enabled: bool,
    /// Allowed time-of-day window, inclusive, in local hours [0, 24).
    pub window_start_hour: u32,
    pub window_end_hour: u32,
    /// Allowed weekdays, 0 = Monday .. 6 = Sunday (chrono convention).
    pub allowed_weekdays: Vec<u32>,
}

impl Default for ScanRules {
    fn default() -> Self {
        Self { enabled: true, window_start_hour: 0, window_end_hour: 24, allowed_weekdays: (0..7).collect() }
    }
}

/// True iff every configured rule passes against the current wall clock.
pub fn check_rules(rules: &ScanRules) -> bool {
    if !rules.enabled {
        return false;
    }
    let now = Utc::now();
    let hour = now.hour();
    let weekday = now.weekday().num_days_from_monday();

    let in_window = if rules.window_start_hour <= rules.window_end_hour {
        hour >= rules.window_start_hour && hour < rules.window_end_hour
    } else {
        // Window wraps past midnight.
        hour >= rules.window_start_hour || hour < rules.window_end_hour
    };

    in_window && rules.allowed_weekdays.contains(&weekday)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    #[test]
    fn disabled_rules_always_fail() {
        let rules = ScanRules { enabled: false, ..Default::default() };
        assert!(!check_rules(&rules));
    }

    #[test]
    fn full_window_always_passes_when_enabled() {
        let rules = ScanRules::default();
        assert!(check_rules(&rules));
    }

    #[tokio::test]
    async fn rejects_non_positive_interval() {
        let scheduler = AsyncScheduler::new();
        let counter = Arc::new(AtomicU32::new(0));
        let job: Arc<dyn AsyncJob> = Arc::new(move || {
            let counter = counter.clone();
            async move {
                counter.fetch_add(1, Ordering::SeqCst);
                Ok(())
            }
        });
        let result = scheduler.schedule("noop", Duration::from_secs(0), job).await;
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn scheduled_job_runs_and_records_metrics() {
        let scheduler = AsyncScheduler::new();
        let counter = Arc::new(AtomicU32::new(0));
        let counter_for_job = counter.clone();
        let job: Arc<dyn AsyncJob> = Arc::new(move || {
            let counter = counter_for_job.clone();
            async move {
                counter.fetch_add(1, Ordering::SeqCst);
                Ok(())
            }
        });
        scheduler.schedule("tick", Duration::from_millis(10), job).await.unwrap();
        tokio::time::sleep(Duration::from_millis(50)).await;
        scheduler.cancel_all().await;

        assert!(counter.load(Ordering::SeqCst) >= 2);
        let metrics = scheduler.get_metrics().await;
        assert!(metrics.get("tick").unwrap().success_count >= 2);
    }
}
