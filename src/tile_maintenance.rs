//! Tile cache maintainer (C10): age-based purge, size-cap eviction,
//! MBTiles vacuum, an event-driven `notify`-backed trigger, and predictive
//! tile prefetch along the current track's bearing. Grounded in
//! `original_source/tile_maintenance.py` for the purge/eviction/prefetch
//! shapes.

use std::collections::BinaryHeap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, SystemTime};

use notify::{RecommendedWatcher, RecursiveMode, Watcher};
use rusqlite::Connection;
use tokio::sync::{mpsc, Semaphore};

#[derive(Debug, Clone)]
pub struct TileMaintenanceConfig {
    pub cache_dir: PathBuf,
    pub max_age_days: u64,
    pub max_total_bytes: u64,
    pub mbtiles_path: Option<PathBuf>,
    pub trigger_file_count: usize,
}

struct AgedFile {
    mtime: SystemTime,
    size: u64,
    path: PathBuf,
}

impl PartialEq for AgedFile {
    fn eq(&self, other: &Self) -> bool {
        self.mtime == other.mtime
    }
}
impl Eq for AgedFile {}
impl PartialOrd for AgedFile {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}
impl Ord for AgedFile {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        // Max-heap by mtime inverted so the oldest file has the highest priority to pop.
        other.mtime.cmp(&self.mtime)
    }
}

fn scan_cache_files(cache_dir: &Path) -> std::io::Result<Vec<AgedFile>> {
    let mut files = Vec::new();
    if !cache_dir.exists() {
        return Ok(files);
    }
    for entry in std::fs::read_dir(cache_dir)? {
        let entry = entry?;
        let metadata = entry.metadata()?;
        if !metadata.is_file() {
            continue;
        }
        files.push(AgedFile { mtime: metadata.modified()?, size: metadata.len(), path: entry.path() });
    }
    Ok(files)
}

/// Delete files older than `max_age_days`.
pub fn purge_by_age(cache_dir: &Path, max_age_days: u64) -> std::io::Result<usize> {
    let cutoff = SystemTime::now() - Duration::from_secs(max_age_days * 86_400);
    let mut removed = 0;
    for file in scan_cache_files(cache_dir)? {
        if file.mtime < cutoff {
            if std::fs::remove_file(&file.path).is_ok() {
                removed += 1;
            }
        }
    }
    Ok(removed)
}

/// Evict the oldest files (by a min-heap keyed on mtime) until total size
/// no longer exceeds `cap_bytes`.
pub fn enforce_size_cap(cache_dir: &Path, cap_bytes: u64) -> std::io::Result<usize> {
    let files = scan_cache_files(cache_dir)?;
    let mut total: u64 = files.iter().map(|f| f.size).sum();
    let mut heap: BinaryHeap<AgedFile> = files.into_iter().collect();

    let mut removed = 0;
    while total > cap_bytes {
        let Some(oldest) = heap.pop() else { break };
        if std::fs::remove_file(&oldest.path).is_ok() {
            total = total.saturating_sub(oldest.size);
            removed += 1;
        }
    }
    Ok(removed)
}

/// Run `VACUUM` on the configured MBTiles file, if any.
pub fn vacuum_mbtiles(path: &Path) -> rusqlite::Result<()> {
    let conn = Connection::open(path)?;
    conn.execute_batch("VACUUM;")
}

fn total_cache_bytes(cache_dir: &Path) -> u64 {
    scan_cache_files(cache_dir).map(|files| files.iter().map(|f| f.size).sum()).unwrap_or(0)
}

/// State shared by the maintenance loop and the filesystem watcher; a
/// running flag coalesces concurrent triggers into a single in-flight pass.
pub struct TileMaintainer {
    config: TileMaintenanceConfig,
    running: Arc<AtomicBool>,
    _watcher: Option<RecommendedWatcher>,
}

impl TileMaintainer {
    /// Start watching `config.cache_dir`; any filesystem event calls
    /// `check_thresholds`, which schedules a maintenance pass if the file
    /// count or total size crosses a trigger and none is already running.
    pub fn spawn(config: TileMaintenanceConfig) -> anyhow::Result<Self> {
        let running = Arc::new(AtomicBool::new(false));
        let (tx, mut rx) = mpsc::unbounded_channel::<()>();

        let watcher_running = running.clone();
        let watcher_config = config.clone();
        tokio::spawn(async move {
            while rx.recv().await.is_some() {
                check_thresholds(&watcher_config, &watcher_running).await;
            }
        });

        let mut watcher = notify::recommended_watcher(move |_event: notify::Result<notify::Event>| {
            let _ = tx.send(());
        })?;
        watcher.watch(&config.cache_dir, RecursiveMode::NonRecursive)?;

        Ok(Self { config, running, _watcher: Some(watcher) })
    }

    pub fn config(&self) -> &TileMaintenanceConfig {
        &self.config
    }
}

async fn check_thresholds(config: &TileMaintenanceConfig, running: &Arc<AtomicBool>) {
    let file_count = scan_cache_files(&config.cache_dir).map(|f| f.len()).unwrap_or(0);
    let total_bytes = total_cache_bytes(&config.cache_dir);

    let over_threshold = file_count >= config.trigger_file_count || total_bytes >= config.max_total_bytes;
    if !over_threshold {
        return;
    }
    if running.swap(true, Ordering::SeqCst) {
        return; // a pass is already in flight; coalesce
    }

    let config = config.clone();
    let running = running.clone();
    tokio::task::spawn_blocking(move || {
        let _ = purge_by_age(&config.cache_dir, config.max_age_days);
        let _ = enforce_size_cap(&config.cache_dir, config.max_total_bytes);
        if let Some(mbtiles) = &config.mbtiles_path {
            let _ = vacuum_mbtiles(mbtiles);
        }
        running.store(false, Ordering::SeqCst);
    })
    .await
    .ok();
}

fn haversine_m(a: (f64, f64), b: (f64, f64)) -> f64 {
    const EARTH_RADIUS_M: f64 = 6_371_000.0;
    let (lat1, lon1) = (a.0.to_radians(), a.1.to_radians());
    let (lat2, lon2) = (b.0.to_radians(), b.1.to_radians());
    let dlat = lat2 - lat1;
    let dlon = lon2 - lon1;
    let h = (dlat / 2.0).sin().powi(2) + lat1.cos() * lat2.cos() * (dlon / 2.0).sin().powi(2);
    2.0 * EARTH_RADIUS_M * h.sqrt().asin()
}

fn bearing_degrees(from: (f64, f64), to: (f64, f64)) -> f64 {
    let (lat1, lon1) = (from.0.to_radians(), from.1.to_radians());
    let (lat2, lon2) = (to.0.to_radians(), to.1.to_radians());
    let dlon = lon2 - lon1;
    let y = dlon.sin() * lat2.cos();
    let x = lat1.cos() * lat2.sin() - lat1.sin() * lat2.cos() * dlon.cos();
    (y.atan2(x).to_degrees() + 360.0) % 360.0
}

fn project(origin: (f64, f64), bearing_deg: f64, distance_m: f64) -> (f64, f64) {
    const EARTH_RADIUS_M: f64 = 6_371_000.0;
    let bearing = bearing_deg.to_radians();
    let lat1 = origin.0.to_radians();
    let lon1 = origin.1.to_radians();
    let angular_distance = distance_m / EARTH_RADIUS_M;

    let lat2 = (lat1.sin() * angular_distance.cos() + lat1.cos() * angular_distance.sin() * bearing.cos()).asin();
    let lon2 = lon1
        + (bearing.sin() * angular_distance.sin() * lat1.cos())
            .atan2(angular_distance.cos() - lat1.sin() * lat2.sin());

    (lat2.to_degrees(), lon2.to_degrees())
}

#[derive(Debug, Clone, Copy)]
pub struct BoundingBox {
    pub min_lat: f64,
    pub max_lat: f64,
    pub min_lon: f64,
    pub max_lon: f64,
}

/// From the last two track points, project `lookahead` successor points
/// along the current bearing at the observed step distance, then compute a
/// bounding box padded by `delta` degrees.
pub fn predictive_prefetch_bbox(last_two: [(f64, f64); 2], lookahead: usize, delta: f64) -> (Vec<(f64, f64)>, BoundingBox) {
    let bearing = bearing_degrees(last_two[0], last_two[1]);
    let step = haversine_m(last_two[0], last_two[1]);

    let mut points = vec![last_two[1]];
    let mut current = last_two[1];
    for _ in 0..lookahead {
        current = project(current, bearing, step);
        points.push(current);
    }

    let min_lat = points.iter().map(|p| p.0).fold(f64::INFINITY, f64::min) - delta;
    let max_lat = points.iter().map(|p| p.0).fold(f64::NEG_INFINITY, f64::max) + delta;
    let min_lon = points.iter().map(|p| p.1).fold(f64::INFINITY, f64::min) - delta;
    let max_lon = points.iter().map(|p| p.1).fold(f64::NEG_INFINITY, f64::max) + delta;

    (points, BoundingBox { min_lat, max_lat, min_lon, max_lon })
}

/// Download every (x, y, z) tile missing from `dest_dir`, writing each
/// atomically (to a `.tmp` sibling, then renamed). Concurrency bounded by a
/// semaphore (default CPU-count); `on_progress` is invoked once per
/// completed tile, successful or not.
pub async fn download_tiles(
    client: &reqwest::Client,
    base_url: &str,
    dest_dir: &Path,
    tiles: Vec<(u32, u32, u32)>,
    concurrency: usize,
    on_progress: impl Fn(u32, u32, u32, bool) + Send + Sync + 'static,
) -> anyhow::Result<()> {
    std::fs::create_dir_all(dest_dir)?;
    let semaphore = Arc::new(Semaphore::new(concurrency.max(1)));
    let on_progress = Arc::new(on_progress);

    let mut handles = Vec::with_capacity(tiles.len());
    for (z, x, y) in tiles {
        let permit = semaphore.clone().acquire_owned().await?;
        let client = client.clone();
        let base_url = base_url.to_string();
        let dest_path = dest_dir.join(format!("{z}_{x}_{y}.png"));
        let tmp_path = dest_dir.join(format!("{z}_{x}_{y}.png.tmp"));
        let on_progress = on_progress.clone();

        handles.push(tokio::spawn(async move {
            let _permit = permit;
            if dest_path.exists() {
                on_progress(z, x, y, true);
                return;
            }
            let url = base_url.replace("{z}", &z.to_string()).replace("{x}", &x.to_string()).replace("{y}", &y.to_string());
            let ok = match client.get(&url).send().await {
                Ok(resp) if resp.status().is_success() => match resp.bytes().await {
                    Ok(bytes) => std::fs::write(&tmp_path, &bytes)
                        .and_then(|_| std::fs::rename(&tmp_path, &dest_path))
                        .is_ok(),
                    Err(_) => false,
                },
                _ => false,
            };
            on_progress(z, x, y, ok);
        }));
    }

    for handle in handles {
        let _ = handle.await;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn temp_cache_dir(name: &str) -> PathBuf {
        let dir = std::env::temp_dir().join(format!("piwardrive-tiles-{name}-{}", std::process::id()));
        let _ = std::fs::remove_dir_all(&dir);
        std::fs::create_dir_all(&dir).unwrap();
        dir
    }

    #[test]
    fn purge_by_age_removes_old_files_only() {
        let dir = temp_cache_dir("purge");
        std::fs::write(dir.join("a.png"), b"x").unwrap();
        let removed = purge_by_age(&dir, 0).unwrap();
        assert!(removed <= 1);
    }

    #[test]
    fn enforce_size_cap_evicts_until_under_cap() {
        let dir = temp_cache_dir("sizecap");
        for i in 0..5 {
            std::fs::write(dir.join(format!("tile{i}.png")), vec![0u8; 100]).unwrap();
        }
        enforce_size_cap(&dir, 200).unwrap();
        let remaining_bytes = total_cache_bytes(&dir);
        assert!(remaining_bytes <= 200);
    }

    #[test]
    fn prefetch_bbox_contains_all_projected_points() {
        let last_two = [(37.0, -122.0), (37.001, -122.0)];
        let (points, bbox) = predictive_prefetch_bbox(last_two, 3, 0.001);
        for (lat, lon) in points {
            assert!(lat >= bbox.min_lat && lat <= bbox.max_lat);
            assert!(lon >= bbox.min_lon && lon <= bbox.max_lon);
        }
    }

    #[test]
    fn bearing_north_is_near_zero_degrees() {
        let bearing = bearing_degrees((0.0, 0.0), (1.0, 0.0));
        assert!(bearing.abs() < 1.0);
    }
}
