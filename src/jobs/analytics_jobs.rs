//! Analytics job manager (C14), grounded in
//! `original_source/jobs/analytics_jobs.py`: four named jobs wired onto the
//! async scheduler, each dispatched through the background task queue and
//! status-tracked the same way as the maintenance jobs (C13). The anomaly
//! sweep additionally notifies on newly-raised findings, one of the three
//! `send_notifications` call sites alongside the maintenance jobs' db health
//! check.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use rusqlite::params;
use tokio::sync::Mutex as AsyncMutex;

use crate::analytics::aggregation::{self, DailySighting};
use crate::analytics::fingerprint;
use crate::analytics::security;
use crate::config::AppConfig;
use crate::error::PiwError;
use crate::models::record::{GpsFix, WifiDetection};
use crate::notifications::{self, NotificationChannel, SmtpConfig};
use crate::persistence::pool::Pool;
use crate::scheduler::AsyncScheduler;
use crate::task_queue::BackgroundTaskQueue;

use super::JobStatusMap;

fn load_wifi_detections_since(conn: &rusqlite::Connection, since: &str) -> rusqlite::Result<Vec<WifiDetection>> {
    let mut stmt = conn.prepare(
        "SELECT session_id, detection_timestamp, bssid, ssid, channel, frequency_mhz, signal_dbm,
                encryption, vendor, station_count, heading_degrees, lat, lon, first_seen, last_seen
         FROM wifi_detections WHERE detection_timestamp >= ?1",
    )?;
    stmt.query_map([since], |row| {
        let lat: Option<f64> = row.get(11)?;
        let lon: Option<f64> = row.get(12)?;
        Ok(WifiDetection {
            session_id: row.get(0)?,
            detection_timestamp: row.get(1)?,
            bssid: row.get(2)?,
            ssid: row.get(3)?,
            channel: row.get(4)?,
            frequency_mhz: row.get(5)?,
            signal_dbm: row.get(6)?,
            encryption: row.get(7)?,
            vendor: row.get(8)?,
            station_count: row.get(9)?,
            heading_degrees: row.get(10)?,
            gps: lat.zip(lon).map(|(lat, lon)| GpsFix { lat, lon, altitude_m: None, accuracy_m: None, fix_type: None }),
            first_seen: row.get(13)?,
            last_seen: row.get(14)?,
            cipher_suite: None,
            beacon_interval: None,
            ht_caps: None,
            vht_caps: None,
            he_caps: None,
            country: None,
            tx_power_dbm: None,
            device_type: None,
        })
    })?
    .collect()
}

pub struct AnalyticsJobManager {
    pool: Arc<Pool>,
    task_queue: Arc<BackgroundTaskQueue>,
    statuses: JobStatusMap,
    config: Arc<AsyncMutex<AppConfig>>,
    smtp_config: Option<SmtpConfig>,
    smtp_transport: Option<lettre::AsyncSmtpTransport<lettre::Tokio1Executor>>,
    http_client: reqwest::Client,
}

impl AnalyticsJobManager {
    pub fn new(
        pool: Arc<Pool>,
        task_queue: Arc<BackgroundTaskQueue>,
        config: Arc<AsyncMutex<AppConfig>>,
        smtp_config: Option<SmtpConfig>,
        smtp_transport: Option<lettre::AsyncSmtpTransport<lettre::Tokio1Executor>>,
        http_client: reqwest::Client,
    ) -> Arc<Self> {
        Arc::new(Self { pool, task_queue, statuses: JobStatusMap::new(), config, smtp_config, smtp_transport, http_client })
    }

    pub fn statuses(&self) -> JobStatusMap {
        self.statuses.clone()
    }

    async fn notify_channels(&self) -> Vec<NotificationChannel> {
        let config = self.config.lock().await;
        config.notification_webhooks.iter().map(|url| NotificationChannel::Webhook { url: url.clone() }).collect()
    }

    pub async fn register_all(self: &Arc<Self>, scheduler: &AsyncScheduler) -> Result<(), PiwError> {
        self.register_hourly_aggregation(scheduler).await?;
        self.register_anomaly_sweep(scheduler).await?;
        self.register_fingerprint_refresh(scheduler).await?;
        self.register_old_data_cleanup(scheduler).await?;
        Ok(())
    }

    async fn register_hourly_aggregation(self: &Arc<Self>, scheduler: &AsyncScheduler) -> Result<(), PiwError> {
        let this = Arc::clone(self);
        scheduler
            .schedule("hourly_aggregation", Duration::from_secs(3_600), Arc::new(move || {
                let this = Arc::clone(&this);
                async move {
                    this.dispatch("hourly_aggregation", move |this| async move { this.run_hourly_aggregation().await });
                    Ok(())
                }
            }))
            .await
    }

    async fn register_anomaly_sweep(self: &Arc<Self>, scheduler: &AsyncScheduler) -> Result<(), PiwError> {
        let this = Arc::clone(self);
        scheduler
            .schedule("anomaly_detection_sweep", Duration::from_secs(1_800), Arc::new(move || {
                let this = Arc::clone(&this);
                async move {
                    this.dispatch("anomaly_detection_sweep", move |this| async move { this.run_anomaly_sweep().await });
                    Ok(())
                }
            }))
            .await
    }

    async fn register_fingerprint_refresh(self: &Arc<Self>, scheduler: &AsyncScheduler) -> Result<(), PiwError> {
        let this = Arc::clone(self);
        scheduler
            .schedule("fingerprint_refresh", Duration::from_secs(3_600), Arc::new(move || {
                let this = Arc::clone(&this);
                async move {
                    this.dispatch("fingerprint_refresh", move |this| async move { this.run_fingerprint_refresh().await });
                    Ok(())
                }
            }))
            .await
    }

    async fn register_old_data_cleanup(self: &Arc<Self>, scheduler: &AsyncScheduler) -> Result<(), PiwError> {
        let this = Arc::clone(self);
        scheduler
            .schedule("old_data_cleanup", Duration::from_secs(86_400), Arc::new(move || {
                let this = Arc::clone(&this);
                async move {
                    this.dispatch("old_data_cleanup", move |this| async move { this.run_old_data_cleanup().await });
                    Ok(())
                }
            }))
            .await
    }

    fn dispatch<F, Fut>(self: &Arc<Self>, name: &'static str, work: F)
    where
        F: FnOnce(Arc<Self>) -> Fut + Send + 'static,
        Fut: std::future::Future<Output = anyhow::Result<()>> + Send + 'static,
    {
        let this = Arc::clone(self);
        let statuses = self.statuses.clone();
        self.task_queue.enqueue(Box::new(move || {
            Box::pin(async move {
                statuses.mark_running(name).await;
                match work(this).await {
                    Ok(()) => {
                        statuses.mark_completed(name).await;
                        Ok(())
                    }
                    Err(e) => {
                        statuses.mark_error(name, e.to_string()).await;
                        Err(e)
                    }
                }
            })
        }));
    }

    /// Re-aggregate every BSSID seen today into `network_analytics`.
    async fn run_hourly_aggregation(self: Arc<Self>) -> anyhow::Result<()> {
        let today = Utc::now().format("%Y-%m-%d").to_string();
        let reader = self.pool.get_reader().await;
        let mut stmt = reader.prepare(
            "SELECT bssid, signal_dbm, lat, lon, encryption, ssid, channel
             FROM wifi_detections WHERE substr(detection_timestamp,1,10) = ?1",
        )?;
        let rows: Vec<(String, Option<f64>, Option<f64>, Option<f64>, Option<String>, Option<String>, Option<i64>)> = stmt
            .query_map([&today], |row| {
                Ok((row.get(0)?, row.get(1)?, row.get(2)?, row.get(3)?, row.get(4)?, row.get(5)?, row.get(6)?))
            })?
            .collect::<Result<_, _>>()?;
        drop(stmt);
        drop(reader);

        let mut by_bssid: std::collections::HashMap<String, Vec<DailySighting>> = std::collections::HashMap::new();
        for (bssid, signal_dbm, lat, lon, encryption, ssid, channel) in rows {
            by_bssid.entry(bssid).or_default().push(DailySighting { signal_dbm, lat, lon, encryption, ssid, channel });
        }

        let writer = self.pool.get_writer().await;
        for (bssid, sightings) in by_bssid {
            let suspicious_count: i64 = writer.query_row(
                "SELECT COUNT(*) FROM suspicious_activities WHERE target_bssid = ?1 AND substr(detected_at,1,10) = ?2",
                params![bssid, today],
                |row| row.get(0),
            )?;
            let row = aggregation::aggregate_bssid_day(&bssid, &today, &sightings, suspicious_count as usize);
            writer.execute(
                "INSERT INTO network_analytics
                    (bssid, date, detection_count, unique_locations, signal_min, signal_max, signal_mean,
                     signal_variance, coverage_radius_m, mobility_score, encryption_changes, ssid_changes,
                     channel_changes, suspicious_score)
                 VALUES (?1,?2,?3,?4,?5,?6,?7,?8,?9,?10,?11,?12,?13,?14)
                 ON CONFLICT(bssid, date) DO UPDATE SET
                    detection_count=excluded.detection_count,
                    unique_locations=excluded.unique_locations,
                    signal_min=excluded.signal_min,
                    signal_max=excluded.signal_max,
                    signal_mean=excluded.signal_mean,
                    signal_variance=excluded.signal_variance,
                    coverage_radius_m=excluded.coverage_radius_m,
                    mobility_score=excluded.mobility_score,
                    encryption_changes=excluded.encryption_changes,
                    ssid_changes=excluded.ssid_changes,
                    channel_changes=excluded.channel_changes,
                    suspicious_score=excluded.suspicious_score",
                params![
                    row.bssid,
                    row.date,
                    row.detection_count,
                    row.unique_locations,
                    row.signal_min,
                    row.signal_max,
                    row.signal_mean,
                    row.signal_variance,
                    row.coverage_radius_m,
                    row.mobility_score,
                    row.encryption_changes,
                    row.ssid_changes,
                    row.channel_changes,
                    row.suspicious_score,
                ],
            )?;
        }
        Ok(())
    }

    /// Re-run the security heuristics over the last 30 minutes of Wi-Fi
    /// detections, inserting any new findings.
    async fn run_anomaly_sweep(self: Arc<Self>) -> anyhow::Result<()> {
        let since = (Utc::now() - chrono::Duration::minutes(30)).to_rfc3339();
        let reader = self.pool.get_reader().await;
        let detections = load_wifi_detections_since(&reader, &since)?;
        drop(reader);

        let findings = security::evaluate_wifi_batch(&detections);
        if findings.is_empty() {
            return Ok(());
        }

        let writer = self.pool.get_writer().await;
        for f in &findings {
            writer.execute(
                "INSERT INTO suspicious_activities
                    (session_id, activity_type, severity, target_bssid, target_ssid, evidence,
                     detected_at, lat, lon, analyst_flag)
                 VALUES (?1,?2,?3,?4,?5,?6,?7,?8,?9,?10)",
                params![
                    f.session_id,
                    serde_json::to_string(&f.activity_type)?,
                    serde_json::to_string(&f.severity)?,
                    f.target_bssid,
                    f.target_ssid,
                    f.evidence.to_string(),
                    f.detected_at,
                    f.latitude,
                    f.longitude,
                    f.analyst_flag,
                ],
            )?;
        }
        drop(writer);

        let channels = self.notify_channels().await;
        let message = format!(
            "anomaly sweep raised {} new finding(s): {}",
            findings.len(),
            findings.iter().map(|f| f.target_bssid.as_deref().unwrap_or("unknown")).collect::<Vec<_>>().join(", ")
        );
        notifications::send_notifications(
            &message,
            "suspicious_activity",
            &channels,
            self.smtp_config.as_ref(),
            self.smtp_transport.as_ref(),
            &self.http_client,
        )
        .await;

        Ok(())
    }

    /// Re-fingerprint every BSSID seen in the last hour.
    async fn run_fingerprint_refresh(self: Arc<Self>) -> anyhow::Result<()> {
        let since = (Utc::now() - chrono::Duration::hours(1)).to_rfc3339();
        let reader = self.pool.get_reader().await;
        let detections = load_wifi_detections_since(&reader, &since)?;
        drop(reader);

        let mut latest_by_bssid: std::collections::HashMap<String, WifiDetection> = std::collections::HashMap::new();
        for d in detections {
            latest_by_bssid.insert(d.bssid.clone(), d);
        }

        let writer = self.pool.get_writer().await;
        for (_, d) in latest_by_bssid {
            let fp = fingerprint::fingerprint_wifi(&d);
            writer.execute(
                "INSERT INTO network_fingerprints (bssid, ssid, content_hash, classification, risk_level, confidence, created_at)
                 VALUES (?1,?2,?3,?4,?5,?6,?7)
                 ON CONFLICT(bssid) DO UPDATE SET
                    ssid=excluded.ssid, content_hash=excluded.content_hash,
                    classification=excluded.classification, risk_level=excluded.risk_level,
                    confidence=excluded.confidence, created_at=excluded.created_at",
                params![
                    fp.bssid,
                    fp.ssid,
                    fp.content_hash,
                    serde_json::to_string(&fp.classification)?,
                    serde_json::to_string(&fp.risk_level)?,
                    fp.confidence,
                    fp.created_at,
                ],
            )?;
        }
        Ok(())
    }

    /// Prune analytics and fingerprint rows older than 90 days.
    async fn run_old_data_cleanup(self: Arc<Self>) -> anyhow::Result<()> {
        let cutoff = (Utc::now() - chrono::Duration::days(90)).format("%Y-%m-%d").to_string();
        let writer = self.pool.get_writer().await;
        writer.execute("DELETE FROM network_analytics WHERE date < ?1", params![cutoff])?;
        writer.execute(
            "DELETE FROM network_fingerprints WHERE created_at < ?1",
            params![(Utc::now() - chrono::Duration::days(90)).to_rfc3339()],
        )?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::persistence::pool::Pool;

    fn tempfile_dir(label: &str) -> std::path::PathBuf {
        let dir = std::env::temp_dir().join(format!("piwardrive-analyticsjobs-{label}-{}", std::process::id()));
        std::fs::create_dir_all(&dir).unwrap();
        dir
    }

    #[tokio::test]
    async fn hourly_aggregation_runs_against_empty_store() {
        let dir = tempfile_dir("agg");
        let pool = Pool::open(dir.join("store.sqlite3"), 1).unwrap();
        let manager = AnalyticsJobManager::new(
            pool,
            Arc::new(BackgroundTaskQueue::new(1)),
            Arc::new(AsyncMutex::new(AppConfig::default())),
            None,
            None,
            reqwest::Client::new(),
        );
        manager.run_hourly_aggregation().await.unwrap();
    }

    #[tokio::test]
    async fn old_data_cleanup_runs_against_empty_store() {
        let dir = tempfile_dir("cleanup");
        let pool = Pool::open(dir.join("store.sqlite3"), 1).unwrap();
        let manager = AnalyticsJobManager::new(
            pool,
            Arc::new(BackgroundTaskQueue::new(1)),
            Arc::new(AsyncMutex::new(AppConfig::default())),
            None,
            None,
            reqwest::Client::new(),
        );
        manager.run_old_data_cleanup().await.unwrap();
    }
}
