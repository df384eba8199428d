//! Batched write path, adapted from the teacher's `usage_tracker.rs`
//! (`mpsc`-fed background task, `tokio::select!` between receive and an
//! interval tick). Unlike the teacher's fire-and-forget tracker, shutdown
//! here is observed: dropping the sender and awaiting the returned
//! `JoinHandle` drains and flushes whatever remains buffered.

use std::time::Duration;

use rusqlite::{params, Connection};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use crate::models::record::Record;

use super::pool::Pool;
use std::sync::Arc;

const DEFAULT_BATCH_SIZE: usize = 128;
const DEFAULT_FLUSH_INTERVAL: Duration = Duration::from_secs(2);
const MAX_RETRIES: u32 = 3;

pub type WriteBatch = Vec<Record>;

#[derive(Clone)]
pub struct BatchWriter {
    tx: mpsc::UnboundedSender<Record>,
}

impl BatchWriter {
    pub fn enqueue(&self, record: Record) {
        let _ = self.tx.send(record);
    }
}

/// Spawn the background writer task; returns a handle to enqueue records and
/// the `JoinHandle` to await at shutdown for a forced final flush.
pub fn spawn(pool: Arc<Pool>) -> (BatchWriter, JoinHandle<()>) {
    let (tx, rx) = mpsc::unbounded_channel();
    let handle = tokio::spawn(run(pool, rx));
    (BatchWriter { tx }, handle)
}

async fn run(pool: Arc<Pool>, mut rx: mpsc::UnboundedReceiver<Record>) {
    let mut buffer: Vec<Record> = Vec::new();
    let mut interval = tokio::time::interval(DEFAULT_FLUSH_INTERVAL);

    loop {
        tokio::select! {
            maybe = rx.recv() => {
                match maybe {
                    Some(record) => {
                        buffer.push(record);
                        if buffer.len() >= DEFAULT_BATCH_SIZE {
                            let batch = std::mem::take(&mut buffer);
                            flush_with_retry(&pool, batch).await;
                        }
                    }
                    None => {
                        // Sender dropped: drain anything left and exit.
                        if !buffer.is_empty() {
                            let batch = std::mem::take(&mut buffer);
                            flush_with_retry(&pool, batch).await;
                        }
                        return;
                    }
                }
            }
            _ = interval.tick() => {
                if !buffer.is_empty() {
                    let batch = std::mem::take(&mut buffer);
                    flush_with_retry(&pool, batch).await;
                }
            }
        }
    }
}

async fn flush_with_retry(pool: &Arc<Pool>, batch: WriteBatch) {
    let mut attempt = 0;
    loop {
        attempt += 1;
        let conn_guard = pool.get_writer().await;
        match flush(&conn_guard, &batch) {
            Ok(()) => return,
            Err(e) if attempt < MAX_RETRIES && is_transient(&e) => {
                drop(conn_guard);
                let backoff = Duration::from_millis(50 * 2u64.pow(attempt));
                tracing::warn!(attempt, error = %e, "transient write failure, retrying");
                tokio::time::sleep(backoff).await;
            }
            Err(e) => {
                tracing::error!(error = %e, batch_size = batch.len(), "dropping batch after repeated failures");
                return;
            }
        }
    }
}

fn is_transient(err: &rusqlite::Error) -> bool {
    matches!(
        err,
        rusqlite::Error::SqliteFailure(e, _)
            if matches!(e.code, rusqlite::ErrorCode::DatabaseBusy | rusqlite::ErrorCode::DatabaseLocked)
    )
}

fn flush(conn: &Connection, batch: &[Record]) -> rusqlite::Result<()> {
    let mut wifi = Vec::new();
    let mut bt = Vec::new();
    let mut cellular = Vec::new();

    for record in batch {
        match record {
            Record::Wifi(d) => wifi.push(d),
            Record::Bluetooth(d) => bt.push(d),
            Record::Cellular(d) => cellular.push(d),
        }
    }

    if !wifi.is_empty() {
        let mut stmt = conn.prepare_cached(
            "INSERT INTO wifi_detections
                (session_id, detection_timestamp, bssid, ssid, channel, frequency_mhz,
                 signal_dbm, encryption, vendor, station_count, heading_degrees, lat, lon,
                 first_seen, last_seen)
             VALUES (?1,?2,?3,?4,?5,?6,?7,?8,?9,?10,?11,?12,?13,?14,?15)",
        )?;
        for d in wifi {
            stmt.execute(params![
                d.session_id, d.detection_timestamp, d.bssid, d.ssid, d.channel, d.frequency_mhz,
                d.signal_dbm, d.encryption, d.vendor, d.station_count, d.heading_degrees,
                d.gps.map(|g| g.lat), d.gps.map(|g| g.lon), d.first_seen, d.last_seen,
            ])?;
        }
    }

    if !bt.is_empty() {
        let mut stmt = conn.prepare_cached(
            "INSERT INTO bluetooth_detections
                (session_id, detection_timestamp, mac_address, device_name, rssi_dbm,
                 device_class, heading_degrees, lat, lon, first_seen, last_seen)
             VALUES (?1,?2,?3,?4,?5,?6,?7,?8,?9,?10,?11)",
        )?;
        for d in bt {
            stmt.execute(params![
                d.session_id, d.detection_timestamp, d.mac_address, d.device_name, d.rssi_dbm,
                d.device_class, d.heading_degrees, d.gps.map(|g| g.lat), d.gps.map(|g| g.lon),
                d.first_seen, d.last_seen,
            ])?;
        }
    }

    if !cellular.is_empty() {
        let mut stmt = conn.prepare_cached(
            "INSERT INTO cellular_detections
                (session_id, detection_timestamp, cell_id, lac, mcc, mnc, technology, band,
                 signal_strength_dbm, lat, lon, first_seen, last_seen)
             VALUES (?1,?2,?3,?4,?5,?6,?7,?8,?9,?10,?11,?12,?13)",
        )?;
        for d in cellular {
            stmt.execute(params![
                d.session_id, d.detection_timestamp, d.cell_id, d.lac, d.mcc, d.mnc,
                d.technology, d.band, d.signal_strength_dbm, d.gps.map(|g| g.lat),
                d.gps.map(|g| g.lon), d.first_seen, d.last_seen,
            ])?;
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::record::WifiDetection;

    #[tokio::test]
    async fn forced_flush_drains_on_shutdown() {
        let dir = std::env::temp_dir().join(format!("piwardrive-writer-test-{}", std::process::id()));
        std::fs::create_dir_all(&dir).unwrap();
        let pool = Pool::open(dir.join("store.sqlite3"), 1).unwrap();
        let (writer, handle) = spawn(pool.clone());

        let det = WifiDetection::new("adhoc", "AA:BB:CC:DD:EE:FF", "2024-01-01T00:00:00Z").unwrap();
        writer.enqueue(Record::Wifi(det));
        drop(writer);
        handle.await.unwrap();

        let reader = pool.get_reader().await;
        let count: i64 = reader.query_row("SELECT COUNT(*) FROM wifi_detections", [], |row| row.get(0)).unwrap();
        assert_eq!(count, 1);
    }
}
