//! `/status`, `/cpu`, `/ram`, `/storage`, `/gps` (§4.11): health history and
//! live resource/GPS snapshots.

use std::collections::HashMap;

use axum::extract::{Query, State};
use axum::Json;
use rusqlite::params;
use serde::{Deserialize, Serialize};
use sysinfo::{Disks, System};

use crate::error::PiwError;
use crate::models::record::HealthSample;
use crate::persistence::VerbStats;
use crate::AppState;

#[derive(Debug, Deserialize)]
pub struct StatusQuery {
    #[serde(default = "default_limit")]
    pub limit: i64,
}

fn default_limit() -> i64 {
    100
}

#[derive(Debug, Serialize)]
pub struct StatusResponse {
    pub health_history: Vec<HealthSample>,
    pub query_metrics: HashMap<&'static str, VerbStats>,
}

pub async fn status(
    State(state): State<AppState>,
    Query(query): Query<StatusQuery>,
) -> Result<Json<StatusResponse>, PiwError> {
    let conn = state.pool.get_reader().await;
    let mut stmt = conn.prepare_cached(
        "SELECT recorded_at, temperature_c, cpu_percent, memory_percent, disk_percent
         FROM health_records ORDER BY recorded_at DESC LIMIT ?1",
    )?;
    let health_history = state.query_metrics.timed("health_history", || {
        stmt.query_map(params![query.limit.max(1)], |row| {
            Ok(HealthSample {
                timestamp: row.get(0)?,
                cpu_temp: row.get(1)?,
                cpu_percent: row.get(2)?,
                memory_percent: row.get(3)?,
                disk_percent: row.get(4)?,
            })
        })?
        .collect::<Result<Vec<_>, _>>()
    })?;
    Ok(Json(StatusResponse { health_history, query_metrics: state.query_metrics.snapshot() }))
}

#[derive(Debug, Serialize)]
pub struct CpuSnapshot {
    pub percent: f32,
    pub core_count: usize,
}

pub async fn cpu() -> Json<CpuSnapshot> {
    let mut sys = System::new();
    sys.refresh_cpu_usage();
    tokio::time::sleep(std::time::Duration::from_millis(200)).await;
    sys.refresh_cpu_usage();
    let percent = sys.global_cpu_usage();
    Json(CpuSnapshot { percent, core_count: sys.cpus().len() })
}

#[derive(Debug, Serialize)]
pub struct RamSnapshot {
    pub total_bytes: u64,
    pub used_bytes: u64,
    pub percent: f64,
}

pub async fn ram() -> Json<RamSnapshot> {
    let mut sys = System::new();
    sys.refresh_memory();
    let total = sys.total_memory();
    let used = sys.used_memory();
    let percent = if total > 0 { used as f64 / total as f64 * 100.0 } else { 0.0 };
    Json(RamSnapshot { total_bytes: total, used_bytes: used, percent })
}

#[derive(Debug, Serialize)]
pub struct StorageSnapshot {
    pub total_bytes: u64,
    pub available_bytes: u64,
    pub percent: f64,
}

pub async fn storage() -> Json<StorageSnapshot> {
    let disks = Disks::new_with_refreshed_list();
    let total: u64 = disks.iter().map(|d| d.total_space()).sum();
    let available: u64 = disks.iter().map(|d| d.available_space()).sum();
    let used = total.saturating_sub(available);
    let percent = if total > 0 { used as f64 / total as f64 * 100.0 } else { 0.0 };
    Json(StorageSnapshot { total_bytes: total, available_bytes: available, percent })
}

#[derive(Debug, Serialize)]
pub struct GpsSnapshot {
    pub latitude: Option<f64>,
    pub longitude: Option<f64>,
    pub accuracy_m: Option<f64>,
    pub heading_degrees: Option<f64>,
    pub speed_kmh: Option<f64>,
    pub fix_quality: &'static str,
}

pub async fn gps(State(state): State<AppState>) -> Json<GpsSnapshot> {
    let position = state.gps.position().await;
    let accuracy_m = state.gps.accuracy_m().await;
    let heading_degrees = state.gps.heading_degrees().await;
    let speed_kmh = state.gps.speed_kmh().await;
    let fix_quality = state.gps.fix_quality().await;
    Json(GpsSnapshot {
        latitude: position.map(|(lat, _)| lat),
        longitude: position.map(|(_, lon)| lon),
        accuracy_m,
        heading_degrees,
        speed_kmh,
        fix_quality: fix_quality.as_str(),
    })
}
