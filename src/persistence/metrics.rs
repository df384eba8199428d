//! Query timing aggregator. Every execution through [`super::queries`] records
//! its verb and duration here; `GET /status` embeds a [`QueryMetrics::snapshot`]
//! alongside health history.

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::Instant;

#[derive(Debug, Default, Clone, Copy, serde::Serialize)]
pub struct VerbStats {
    pub count: u64,
    pub mean_secs: f64,
}

#[derive(Default)]
pub struct QueryMetrics {
    inner: Mutex<HashMap<&'static str, VerbStats>>,
}

impl QueryMetrics {
    pub fn record(&self, verb: &'static str, elapsed_secs: f64) {
        let mut guard = self.inner.lock().unwrap();
        let stats = guard.entry(verb).or_insert(VerbStats { count: 0, mean_secs: 0.0 });
        let new_count = stats.count + 1;
        stats.mean_secs = (stats.mean_secs * stats.count as f64 + elapsed_secs) / new_count as f64;
        stats.count = new_count;
    }

    pub fn snapshot(&self) -> HashMap<&'static str, VerbStats> {
        self.inner.lock().unwrap().clone()
    }

    /// Time a closure and record it under `verb`; returns the closure's result.
    pub fn timed<T>(&self, verb: &'static str, f: impl FnOnce() -> T) -> T {
        let start = Instant::now();
        let result = f();
        self.record(verb, start.elapsed().as_secs_f64());
        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tracks_running_mean() {
        let metrics = QueryMetrics::default();
        metrics.record("SELECT", 0.1);
        metrics.record("SELECT", 0.3);
        let snapshot = metrics.snapshot();
        let stats = snapshot.get("SELECT").unwrap();
        assert_eq!(stats.count, 2);
        assert!((stats.mean_secs - 0.2).abs() < 1e-9);
    }
}
