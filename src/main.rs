use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use axum::routing::{get, post, put};
use axum::Router;
use piwardrive_core::auth::TokenStore;
use piwardrive_core::config::{self, EnvOverrides};
use piwardrive_core::handlers;
use piwardrive_core::jobs::analytics_jobs::AnalyticsJobManager;
use piwardrive_core::jobs::maintenance_jobs::MaintenanceJobManager;
use piwardrive_core::models::record::Record;
use piwardrive_core::notifications::{self, SmtpConfig};
use piwardrive_core::oui;
use piwardrive_core::persistence::{self, pool::Pool, queries};
use piwardrive_core::scanners::{bluetooth::BluetoothScanner, cellular::CellularScanner, wifi::WifiScanner, ScanConfig};
use piwardrive_core::scheduler::{self, AsyncScheduler, PollScheduler, ScanRules};
use piwardrive_core::sensors::gps::GpsdClient;
use piwardrive_core::sensors::orientation::OrientationSensor;
use piwardrive_core::stream_processor::StreamProcessor;
use piwardrive_core::task_queue::BackgroundTaskQueue;
use piwardrive_core::tile_maintenance::{TileMaintainer, TileMaintenanceConfig};
use piwardrive_core::AppState;
use sysinfo::{Disks, System};
use tower_http::cors::CorsLayer;
use tower_http::services::ServeDir;
use tower_http::trace::TraceLayer;
use tracing_subscriber::EnvFilter;
use uuid::Uuid;

fn cors_layer(origins: Option<&str>) -> CorsLayer {
    match origins {
        Some(raw) if !raw.trim().is_empty() => {
            let parsed: Vec<_> = raw.split(',').filter_map(|o| o.trim().parse().ok()).collect();
            if parsed.is_empty() {
                CorsLayer::permissive()
            } else {
                CorsLayer::new().allow_origin(parsed).allow_methods(tower_http::cors::Any).allow_headers(tower_http::cors::Any)
            }
        }
        _ => CorsLayer::permissive(),
    }
}

fn scan_rules_from(cfg: &piwardrive_core::config::ScanRule) -> ScanRules {
    ScanRules { enabled: cfg.enabled, window_start_hour: cfg.window_start_hour, window_end_hour: cfg.window_end_hour, allowed_weekdays: cfg.allowed_weekdays.clone() }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("piwardrive_core=debug,tower_http=debug")))
        .init();

    let env = EnvOverrides::from_env();

    let config_path = std::env::var("PW_CONFIG_PATH").unwrap_or_else(|_| "./piwardrive.toml".to_string());
    let app_config = config::load(&config_path)?;
    tracing::info!("config loaded from {config_path}");

    let db_path = env.db_path.clone().unwrap_or_else(|| "./piwardrive.db".to_string());
    let pool = Pool::open(&db_path, persistence::pool::default_reader_count())?;
    tracing::info!("database opened at {db_path}");

    {
        let conn = pool.get_writer().await;
        if let (Some(user), Some(hash)) = (&env.api_user, &env.api_password_hash) {
            if queries::find_user_password_hash(&conn, user)?.is_none() {
                queries::create_user(&conn, user, hash)?;
                tracing::info!("bootstrapped admin user {user}");
            }
        }
    }

    let (writer, _writer_handle) = persistence::writer::spawn(pool.clone());

    let gpsd_host = env.gpsd_host.clone().unwrap_or_else(|| "127.0.0.1".to_string());
    let gpsd_port = env.gpsd_port.unwrap_or(2947);
    let gps = Arc::new(GpsdClient::new(gpsd_host, gpsd_port));
    let orientation = Arc::new(OrientationSensor::new());

    // §5: a single client covers both the 10 s webhook bound and the 30 s
    // tile/sync bound by taking the looser figure as the default; webhook
    // call sites in `notifications.rs` are expected to tighten it per-call
    // if that ever matters in practice.
    let http_client = reqwest::Client::builder().timeout(Duration::from_secs(30)).build()?;

    let log_allowlist = Arc::new(vec![PathBuf::from("/var/log/syslog"), PathBuf::from("/var/log/piwardrive.log")]);
    let service_allowlist = Arc::new(vec!["piwardrive".to_string(), "gpsd".to_string(), "bluetooth".to_string()]);

    let stream = Arc::new(StreamProcessor::spawn());
    let query_metrics = Arc::new(persistence::QueryMetrics::default());

    let scheduler = Arc::new(AsyncScheduler::new());
    let poll_scheduler = Arc::new(PollScheduler::new());
    let task_queue = Arc::new(BackgroundTaskQueue::new(4));

    let smtp_config = SmtpConfig {
        host: std::env::var("PW_SMTP_HOST").ok(),
        port: std::env::var("PW_SMTP_PORT").ok().and_then(|p| p.parse().ok()).unwrap_or(587),
        user: std::env::var("PW_SMTP_USER").ok(),
        pass: std::env::var("PW_SMTP_PASS").ok(),
        from: std::env::var("PW_SMTP_FROM").unwrap_or_else(|_| "piwardrive@localhost".to_string()),
    };
    let smtp_transport = notifications::build_smtp_transport(&smtp_config);
    let config = Arc::new(tokio::sync::Mutex::new(app_config.clone()));

    let reports_dir = PathBuf::from(&app_config.reports_dir);
    let backup_dir = reports_dir.join("backups");
    tokio::fs::create_dir_all(&reports_dir).await.ok();
    tokio::fs::create_dir_all(&backup_dir).await.ok();

    let maintenance_jobs = MaintenanceJobManager::new(
        pool.clone(),
        task_queue.clone(),
        reports_dir.clone(),
        backup_dir,
        config.clone(),
        Some(smtp_config.clone()),
        smtp_transport.clone(),
        http_client.clone(),
    );
    maintenance_jobs.register_all(&scheduler).await?;

    let analytics_jobs = AnalyticsJobManager::new(
        pool.clone(),
        task_queue.clone(),
        config.clone(),
        Some(smtp_config),
        smtp_transport,
        http_client.clone(),
    );
    analytics_jobs.register_all(&scheduler).await?;

    let sigint_export_dir = Arc::new(
        env.sigint_export_dir.clone().map(PathBuf::from).unwrap_or_else(std::env::temp_dir),
    );
    tokio::fs::create_dir_all(sigint_export_dir.as_path()).await.ok();

    if let Some(oui_path) = &env.sigint_oui_path {
        oui::reload(std::path::Path::new(oui_path));
    }

    let mut _tile_maintainer = None;
    if app_config.map_use_offline {
        if let Some(tile_path) = &app_config.offline_tile_path {
            let tile_config = TileMaintenanceConfig {
                cache_dir: PathBuf::from(tile_path),
                max_age_days: 30,
                max_total_bytes: 2 * 1024 * 1024 * 1024,
                mbtiles_path: None,
                trigger_file_count: 5_000,
            };
            match TileMaintainer::spawn(tile_config) {
                Ok(maintainer) => _tile_maintainer = Some(maintainer),
                Err(e) => tracing::warn!("tile maintenance not started: {e}"),
            }
        }
    }

    let state = AppState {
        pool: pool.clone(),
        tokens: Arc::new(TokenStore::new()),
        config: config.clone(),
        gps: gps.clone(),
        orientation: orientation.clone(),
        http_client: http_client.clone(),
        log_allowlist,
        service_allowlist,
        stream: stream.clone(),
        query_metrics,
        scheduler: scheduler.clone(),
        poll_scheduler,
        task_queue,
        maintenance_jobs,
        analytics_jobs,
        sigint_export_dir: sigint_export_dir.clone(),
    };

    let oui_path = env.sigint_oui_path.clone().unwrap_or_else(|| "./oui.txt".to_string());

    spawn_health_poller(pool.clone(), scheduler.clone(), app_config.health_poll_interval).await?;
    spawn_scan_loops(&app_config, &scheduler, writer, gps.clone(), orientation.clone(), stream.clone(), oui_path).await?;

    let app = Router::new()
        .route("/token", post(handlers::token::issue_token))
        .route("/status", get(handlers::status::status))
        .route("/cpu", get(handlers::status::cpu))
        .route("/ram", get(handlers::status::ram))
        .route("/storage", get(handlers::status::storage))
        .route("/gps", get(handlers::status::gps))
        .route("/logs", get(handlers::logs::logs))
        .route("/config", get(handlers::config::get_config).post(handlers::config::update_config))
        .route("/webhooks", get(handlers::webhooks::list_webhooks).post(handlers::webhooks::replace_webhooks))
        .route("/geofences", get(handlers::geofences::list_geofences).post(handlers::geofences::create_geofence))
        .route(
            "/geofences/{name}",
            put(handlers::geofences::update_geofence).delete(handlers::geofences::delete_geofence),
        )
        .route("/export/aps", get(handlers::export::export_aps))
        .route("/service/{name}", get(handlers::service::service_status))
        .route("/service/{name}/{action}", post(handlers::service::service_action))
        .route("/sync", post(handlers::sync::sync))
        .route("/api/widgets", get(handlers::widgets::list_widgets))
        .route(
            "/dashboard-settings",
            get(handlers::dashboard::get_dashboard_settings).post(handlers::dashboard::put_dashboard_settings),
        )
        .route("/ws/aps", get(handlers::stream::ws_aps))
        .route("/ws/status", get(handlers::stream::ws_status))
        .route("/stream/ws/detections", get(handlers::stream::ws_detections))
        .route("/sse/aps", get(handlers::stream::sse_aps))
        .route("/sse/status", get(handlers::stream::sse_status))
        .route("/stream/sse/detections", get(handlers::stream::sse_detections))
        .route("/sse/history", get(handlers::stream::sse_history))
        .route("/healthz", get(handlers::health::healthz))
        .layer(cors_layer(env.cors_origins.as_deref()))
        .layer(TraceLayer::new_for_http())
        .with_state(state);

    let app = match &env.webui_dist {
        Some(dist) if std::path::Path::new(dist).is_dir() => {
            tracing::info!("serving web UI static assets from {dist}");
            app.fallback_service(ServeDir::new(dist))
        }
        Some(dist) => {
            tracing::warn!("PW_WEBUI_DIST={dist} does not exist; skipping static asset mount");
            app
        }
        None => app,
    };

    let addr = std::net::SocketAddr::from(([0, 0, 0, 0], 8080));
    tracing::info!("piwardrive listening on {addr}");

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}

/// Samples CPU/RAM/disk at `interval_secs` and writes a row into
/// `health_records`; the appliance has no on-board temperature sensor path,
/// so `temperature_c` is left `NULL`.
async fn spawn_health_poller(pool: Arc<Pool>, scheduler: Arc<AsyncScheduler>, interval_secs: u64) -> anyhow::Result<()> {
    scheduler
        .schedule("health_poll", Duration::from_secs(interval_secs.max(1)), Arc::new(move || {
            let pool = pool.clone();
            async move {
                let mut sys = System::new();
                sys.refresh_cpu_usage();
                tokio::time::sleep(Duration::from_millis(200)).await;
                sys.refresh_cpu_usage();
                sys.refresh_memory();
                let cpu_percent = sys.global_cpu_usage() as f64;
                let total_mem = sys.total_memory();
                let used_mem = sys.used_memory();
                let memory_percent = if total_mem > 0 { used_mem as f64 / total_mem as f64 * 100.0 } else { 0.0 };
                let disks = Disks::new_with_refreshed_list();
                let total_disk: u64 = disks.iter().map(|d| d.total_space()).sum();
                let avail_disk: u64 = disks.iter().map(|d| d.available_space()).sum();
                let disk_percent =
                    if total_disk > 0 { (total_disk.saturating_sub(avail_disk)) as f64 / total_disk as f64 * 100.0 } else { 0.0 };

                let conn = pool.get_writer().await;
                let recorded_at = chrono::Utc::now().to_rfc3339();
                if let Err(e) = conn.execute(
                    "INSERT INTO health_records (recorded_at, temperature_c, cpu_percent, memory_percent, disk_percent)
                     VALUES (?1, NULL, ?2, ?3, ?4)",
                    rusqlite::params![recorded_at, cpu_percent, memory_percent, disk_percent],
                ) {
                    tracing::warn!("health poll insert failed: {e}");
                }
                Ok(())
            }
        })
        .await?;
    Ok(())
}

/// Starts the three scan executor loops (C4), gated on `scheduler::check_rules`
/// so a configured quiet window or day-of-week restriction actually skips
/// the scan rather than just logging past it.
async fn spawn_scan_loops(
    app_config: &piwardrive_core::config::AppConfig,
    scheduler: &Arc<AsyncScheduler>,
    writer: persistence::writer::BatchWriter,
    gps: Arc<GpsdClient>,
    orientation: Arc<OrientationSensor>,
    stream: Arc<StreamProcessor>,
    oui_path: String,
) -> anyhow::Result<()> {
    let wifi_rules = scan_rules_from(&app_config.scan_rules.wifi);
    let bt_rules = scan_rules_from(&app_config.scan_rules.bluetooth);
    let cell_rules = scan_rules_from(&app_config.scan_rules.cellular);

    {
        let writer = writer.clone();
        let gps = gps.clone();
        let orientation = orientation.clone();
        let stream = stream.clone();
        let oui_path = oui_path.clone();
        scheduler
            .schedule("wifi_scan", Duration::from_secs(app_config.map_poll_aps.max(1)), Arc::new(move || {
                let writer = writer.clone();
                let gps = gps.clone();
                let orientation = orientation.clone();
                let stream = stream.clone();
                let rules = wifi_rules.clone();
                let oui_path = oui_path.clone();
                async move {
                    if !scheduler::check_rules(&rules) {
                        return Ok(());
                    }
                    let scanner = WifiScanner::default();
                    let session_id = Uuid::new_v4().to_string();
                    let timestamp = chrono::Utc::now().to_rfc3339();
                    let heading = orientation.heading_degrees().await;
                    let gps_pos = gps.position().await;
                    let oui_path = std::path::PathBuf::from(oui_path);
                    let detections = scanner.scan(&ScanConfig::default(), &session_id, &timestamp, heading, gps_pos, |bssid| {
                        oui::lookup_vendor(&oui_path, bssid)
                    }).await;
                    if !detections.is_empty() {
                        stream.publish_wifi(detections.clone()).await;
                        for d in detections {
                            writer.enqueue(Record::Wifi(d));
                        }
                    }
                    Ok(())
                }
            }))
            .await?;
    }

    {
        let writer = writer.clone();
        let gps = gps.clone();
        let orientation = orientation.clone();
        let stream = stream.clone();
        scheduler
            .schedule("bluetooth_scan", Duration::from_secs(app_config.map_poll_bt.max(1)), Arc::new(move || {
                let writer = writer.clone();
                let gps = gps.clone();
                let orientation = orientation.clone();
                let stream = stream.clone();
                let rules = bt_rules.clone();
                async move {
                    if !scheduler::check_rules(&rules) {
                        return Ok(());
                    }
                    let scanner = BluetoothScanner::default();
                    let session_id = Uuid::new_v4().to_string();
                    let timestamp = chrono::Utc::now().to_rfc3339();
                    let heading = orientation.heading_degrees().await;
                    let gps_pos = gps.position().await;
                    let detections = scanner.scan(&ScanConfig::default(), &session_id, &timestamp, heading, gps_pos).await;
                    if !detections.is_empty() {
                        let records: Vec<Record> = detections.into_iter().map(Record::Bluetooth).collect();
                        stream.publish_bluetooth(records.clone()).await;
                        for r in records {
                            writer.enqueue(r);
                        }
                    }
                    Ok(())
                }
            }))
            .await?;
    }

    {
        let writer = writer.clone();
        let gps = gps.clone();
        let stream = stream.clone();
        scheduler
            .schedule("cellular_scan", Duration::from_secs(app_config.map_poll_gps.max(1) * 10), Arc::new(move || {
                let writer = writer.clone();
                let gps = gps.clone();
                let stream = stream.clone();
                let rules = cell_rules.clone();
                async move {
                    if !scheduler::check_rules(&rules) {
                        return Ok(());
                    }
                    let scanner = CellularScanner::default();
                    let session_id = Uuid::new_v4().to_string();
                    let timestamp = chrono::Utc::now().to_rfc3339();
                    let gps_pos = gps.position().await;
                    let detections = scanner.scan(&ScanConfig::default(), &session_id, &timestamp, gps_pos).await;
                    if !detections.is_empty() {
                        let records: Vec<Record> = detections.into_iter().map(Record::Cellular).collect();
                        stream.publish_cellular(records.clone()).await;
                        for r in records {
                            writer.enqueue(r);
                        }
                    }
                    Ok(())
                }
            }))
            .await?;
    }

    Ok(())
}
