//! Library surface for the `piwardrive-webui`/`piwardrive-kiosk` binaries:
//! every component from C1 through C15, assembled into [`AppState`] by
//! `main.rs`.

pub mod analytics;
pub mod auth;
pub mod config;
pub mod error;
pub mod export;
pub mod handlers;
pub mod jobs;
pub mod models;
pub mod notifications;
pub mod oui;
pub mod persistence;
pub mod remote_sync;
pub mod scanners;
pub mod scheduler;
pub mod sensors;
pub mod stream_processor;
pub mod task_queue;
pub mod tile_maintenance;

use std::path::PathBuf;
use std::sync::Arc;

use tokio::sync::Mutex as AsyncMutex;

use auth::TokenStore;
use config::AppConfig;
use jobs::analytics_jobs::AnalyticsJobManager;
use jobs::maintenance_jobs::MaintenanceJobManager;
use persistence::{Pool, QueryMetrics};
use scheduler::{AsyncScheduler, PollScheduler};
use sensors::gps::GpsdClient;
use sensors::orientation::OrientationSensor;
use stream_processor::StreamProcessor;
use task_queue::BackgroundTaskQueue;

/// Shared application state handed to every Axum handler (C11), gathering
/// every long-lived component assembled in `main.rs`.
#[derive(Clone)]
pub struct AppState {
    pub pool: Arc<Pool>,
    pub tokens: Arc<TokenStore>,
    pub config: Arc<AsyncMutex<AppConfig>>,
    pub gps: Arc<GpsdClient>,
    pub orientation: Arc<OrientationSensor>,
    pub http_client: reqwest::Client,
    pub log_allowlist: Arc<Vec<PathBuf>>,
    pub service_allowlist: Arc<Vec<String>>,
    pub stream: Arc<StreamProcessor>,
    pub query_metrics: Arc<QueryMetrics>,
    pub scheduler: Arc<AsyncScheduler>,
    pub poll_scheduler: Arc<PollScheduler>,
    pub task_queue: Arc<BackgroundTaskQueue>,
    pub maintenance_jobs: Arc<MaintenanceJobManager>,
    pub analytics_jobs: Arc<AnalyticsJobManager>,
    pub sigint_export_dir: Arc<PathBuf>,
}
