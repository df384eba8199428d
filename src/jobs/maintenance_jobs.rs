//! Database maintenance job manager (C13), grounded in
//! `original_source/jobs/maintenance_jobs.py`: six named jobs wired onto the
//! async scheduler (C6), each tick dispatching its actual work through the
//! background task queue (C7) so a slow `VACUUM` or backup never stalls the
//! scheduler's own tick loop.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio::sync::Mutex as AsyncMutex;

use crate::config::AppConfig;
use crate::error::PiwError;
use crate::notifications::{self, NotificationChannel, SmtpConfig};
use crate::persistence::{maintenance, migrations, pool::Pool};
use crate::scheduler::AsyncScheduler;
use crate::task_queue::BackgroundTaskQueue;

use super::JobStatusMap;

pub struct MaintenanceJobManager {
    pool: Arc<Pool>,
    task_queue: Arc<BackgroundTaskQueue>,
    statuses: JobStatusMap,
    reports_dir: PathBuf,
    backup_dir: PathBuf,
    config: Arc<AsyncMutex<AppConfig>>,
    smtp_config: Option<SmtpConfig>,
    smtp_transport: Option<lettre::AsyncSmtpTransport<lettre::Tokio1Executor>>,
    http_client: reqwest::Client,
}

impl MaintenanceJobManager {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        pool: Arc<Pool>,
        task_queue: Arc<BackgroundTaskQueue>,
        reports_dir: PathBuf,
        backup_dir: PathBuf,
        config: Arc<AsyncMutex<AppConfig>>,
        smtp_config: Option<SmtpConfig>,
        smtp_transport: Option<lettre::AsyncSmtpTransport<lettre::Tokio1Executor>>,
        http_client: reqwest::Client,
    ) -> Arc<Self> {
        Arc::new(Self {
            pool,
            task_queue,
            statuses: JobStatusMap::new(),
            reports_dir,
            backup_dir,
            config,
            smtp_config,
            smtp_transport,
            http_client,
        })
    }

    /// Re-derive notification channels from the live config rather than a
    /// startup snapshot, so `POST /webhooks` takes effect on the next send.
    async fn notify_channels(&self) -> Vec<NotificationChannel> {
        let config = self.config.lock().await;
        config.notification_webhooks.iter().map(|url| NotificationChannel::Webhook { url: url.clone() }).collect()
    }

    /// Upload the just-taken backup to `remote_sync_url` when configured,
    /// carrying `remote_sync_token` as a bearer header; logs and swallows
    /// failure so a sync hiccup never fails the backup job itself.
    async fn maybe_sync_database_remote(&self, path: &std::path::Path) {
        let config = self.config.lock().await;
        let Some(url) = config.remote_sync_url.clone() else { return };
        let token = config.remote_sync_token.clone();
        let timeout = Duration::from_secs(config.remote_sync_timeout);
        let retries = config.remote_sync_retries;
        drop(config);

        if let Err(e) =
            crate::remote_sync::sync_database_to_server(&self.http_client, path, &url, timeout, retries, token.as_deref()).await
        {
            tracing::warn!(error = %e, "remote database sync failed");
        }
    }

    pub fn statuses(&self) -> JobStatusMap {
        self.statuses.clone()
    }

    /// Register all six jobs on `scheduler`. Each job's scheduler closure
    /// only enqueues work onto the task queue and returns immediately.
    pub async fn register_all(self: &Arc<Self>, scheduler: &AsyncScheduler) -> Result<(), PiwError> {
        self.register_vacuum(scheduler).await?;
        self.register_optimize_indexes(scheduler).await?;
        self.register_archive_old_data(scheduler).await?;
        self.register_health_reports(scheduler).await?;
        self.register_backup_database(scheduler).await?;
        self.register_db_health_check(scheduler).await?;
        Ok(())
    }

    async fn register_vacuum(self: &Arc<Self>, scheduler: &AsyncScheduler) -> Result<(), PiwError> {
        let this = Arc::clone(self);
        scheduler
            .schedule("vacuum_database", Duration::from_secs(86_400), Arc::new(move || {
                let this = Arc::clone(&this);
                async move {
                    this.dispatch("vacuum_database", move |this| async move {
                        let conn = this.pool.get_writer().await;
                        conn.execute_batch("VACUUM;")?;
                        Ok(())
                    });
                    Ok(())
                }
            }))
            .await
    }

    async fn register_optimize_indexes(self: &Arc<Self>, scheduler: &AsyncScheduler) -> Result<(), PiwError> {
        let this = Arc::clone(self);
        scheduler
            .schedule("optimize_indexes", Duration::from_secs(604_800), Arc::new(move || {
                let this = Arc::clone(&this);
                async move {
                    this.dispatch("optimize_indexes", move |this| async move {
                        let conn = this.pool.get_writer().await;
                        conn.execute_batch("ANALYZE; REINDEX;")?;
                        Ok(())
                    });
                    Ok(())
                }
            }))
            .await
    }

    async fn register_archive_old_data(self: &Arc<Self>, scheduler: &AsyncScheduler) -> Result<(), PiwError> {
        let this = Arc::clone(self);
        scheduler
            .schedule("archive_old_data", Duration::from_secs(604_800), Arc::new(move || {
                let this = Arc::clone(&this);
                async move {
                    this.dispatch("archive_old_data", move |this| async move {
                        let mut conn = this.pool.get_writer().await;
                        maintenance::archive_old(&mut conn, 30)?;
                        Ok(())
                    });
                    Ok(())
                }
            }))
            .await
    }

    async fn register_health_reports(self: &Arc<Self>, scheduler: &AsyncScheduler) -> Result<(), PiwError> {
        let this = Arc::clone(self);
        scheduler
            .schedule("health_reports", Duration::from_secs(86_400), Arc::new(move || {
                let this = Arc::clone(&this);
                async move {
                    this.dispatch("health_reports", move |this| async move { this.write_health_report().await });
                    Ok(())
                }
            }))
            .await
    }

    async fn register_backup_database(self: &Arc<Self>, scheduler: &AsyncScheduler) -> Result<(), PiwError> {
        let this = Arc::clone(self);
        scheduler
            .schedule("backup_database", Duration::from_secs(86_400), Arc::new(move || {
                let this = Arc::clone(&this);
                async move {
                    this.dispatch("backup_database", move |this| async move {
                        let stamp = Utc::now().format("%Y%m%dT%H%M%SZ");
                        let dest = this.backup_dir.join(format!("piwardrive-{stamp}.sqlite3"));
                        maintenance::backup(&this.pool, &dest).await?;
                        this.maybe_sync_database_remote(&dest).await;
                        Ok(())
                    });
                    Ok(())
                }
            }))
            .await
    }

    async fn register_db_health_check(self: &Arc<Self>, scheduler: &AsyncScheduler) -> Result<(), PiwError> {
        let this = Arc::clone(self);
        scheduler
            .schedule("db_health_check", Duration::from_secs(300), Arc::new(move || {
                let this = Arc::clone(&this);
                async move {
                    this.dispatch("db_health_check", move |this| async move { this.check_db_health().await });
                    Ok(())
                }
            }))
            .await
    }

    /// Enqueue `work` on the task queue, wrapping it so `statuses` reflects
    /// running/completed/error around the call.
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

    async fn write_health_report(self: Arc<Self>) -> anyhow::Result<()> {
        let conn = self.pool.get_reader().await;
        let mut stmt = conn.prepare(
            "SELECT recorded_at, cpu_percent, memory_percent, disk_percent, temperature_c
             FROM health_records WHERE recorded_at >= ?1 ORDER BY recorded_at ASC",
        )?;
        let since = (Utc::now() - chrono::Duration::hours(24)).to_rfc3339();
        let rows: Vec<(String, Option<f64>, Option<f64>, Option<f64>, Option<f64>)> = stmt
            .query_map([&since], |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?, row.get(3)?, row.get(4)?)))?
            .collect::<Result<_, _>>()?;
        drop(stmt);
        drop(conn);

        tokio::fs::create_dir_all(&self.reports_dir).await?;
        let stamp = Utc::now().format("%Y%m%d");
        let csv_path = self.reports_dir.join(format!("health-{stamp}.csv"));
        let json_path = self.reports_dir.join(format!("health-{stamp}.json"));

        let mut csv = String::from("recorded_at,cpu_percent,memory_percent,disk_percent,temperature_c\n");
        for (recorded_at, cpu, mem, disk, temp) in &rows {
            csv.push_str(&format!(
                "{},{},{},{},{}\n",
                recorded_at,
                cpu.map(|v| v.to_string()).unwrap_or_default(),
                mem.map(|v| v.to_string()).unwrap_or_default(),
                disk.map(|v| v.to_string()).unwrap_or_default(),
                temp.map(|v| v.to_string()).unwrap_or_default(),
            ));
        }
        tokio::fs::write(&csv_path, csv).await?;

        let json_rows: Vec<serde_json::Value> = rows
            .iter()
            .map(|(recorded_at, cpu, mem, disk, temp)| {
                serde_json::json!({
                    "recorded_at": recorded_at,
                    "cpu_percent": cpu,
                    "memory_percent": mem,
                    "disk_percent": disk,
                    "temperature_c": temp,
                })
            })
            .collect();
        tokio::fs::write(&json_path, serde_json::to_vec_pretty(&json_rows)?).await?;
        Ok(())
    }

    async fn check_db_health(self: Arc<Self>) -> anyhow::Result<()> {
        let conn = self.pool.get_reader().await;
        let result = migrations::check_integrity(&conn);
        drop(conn);

        if let Err(e) = result {
            let channels = self.notify_channels().await;
            notifications::send_notifications(
                &format!("database integrity check failed: {e}"),
                "db_health_check",
                &channels,
                self.smtp_config.as_ref(),
                self.smtp_transport.as_ref(),
                &self.http_client,
            )
            .await;
            return Err(e.into());
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::persistence::pool::Pool;

    fn tempfile_dir(label: &str) -> PathBuf {
        let dir = std::env::temp_dir().join(format!("piwardrive-maintjobs-{label}-{}", std::process::id()));
        std::fs::create_dir_all(&dir).unwrap();
        dir
    }

    #[tokio::test]
    async fn health_report_writes_csv_and_json() {
        let dir = tempfile_dir("db");
        let pool = Pool::open(dir.join("store.sqlite3"), 1).unwrap();
        {
            let conn = pool.get_writer().await;
            conn.execute(
                "INSERT INTO health_records (recorded_at, cpu_percent) VALUES (?1, 12.5)",
                [Utc::now().to_rfc3339()],
            )
            .unwrap();
        }

        let reports_dir = tempfile_dir("reports");
        let manager = MaintenanceJobManager::new(
            pool,
            Arc::new(BackgroundTaskQueue::new(1)),
            reports_dir.clone(),
            tempfile_dir("backups"),
            Arc::new(AsyncMutex::new(AppConfig::default())),
            None,
            None,
            reqwest::Client::new(),
        );

        manager.clone().write_health_report().await.unwrap();
        let stamp = Utc::now().format("%Y%m%d");
        assert!(reports_dir.join(format!("health-{stamp}.csv")).exists());
        assert!(reports_dir.join(format!("health-{stamp}.json")).exists());
    }

    #[tokio::test]
    async fn db_health_check_passes_on_fresh_store() {
        let dir = tempfile_dir("health");
        let pool = Pool::open(dir.join("store.sqlite3"), 1).unwrap();
        let manager = MaintenanceJobManager::new(
            pool,
            Arc::new(BackgroundTaskQueue::new(1)),
            tempfile_dir("reports2"),
            tempfile_dir("backups2"),
            Arc::new(AsyncMutex::new(AppConfig::default())),
            None,
            None,
            reqwest::Client::new(),
        );
        manager.check_db_health().await.unwrap();
    }
}
