//! Maintenance operations over the store: materialized-view refresh,
//! archival/pruning, and backup/restore. Grounded in the teacher's
//! `retention_enforcer.rs` for the archive-then-delete-in-one-transaction
//! shape.

use std::path::Path;

use chrono::{Duration as ChronoDuration, Utc};
use rusqlite::{params, Connection};

use crate::error::PiwError;

use super::pool::Pool;
use std::sync::Arc;

const ARCHIVED_TABLES: &[&str] = &["wifi_detections", "bluetooth_detections", "cellular_detections"];

/// Refresh `daily_detection_stats` and `network_coverage_grid` via idempotent
/// `INSERT OR REPLACE ... SELECT`.
pub fn refresh_materialized_views(conn: &Connection) -> Result<(), PiwError> {
    conn.execute_batch(
        "
        INSERT OR REPLACE INTO daily_detection_stats (day, wifi_count, bluetooth_count, cellular_count)
        SELECT
            day,
            COALESCE((SELECT COUNT(*) FROM wifi_detections w WHERE substr(w.detection_timestamp,1,10) = day), 0),
            COALESCE((SELECT COUNT(*) FROM bluetooth_detections b WHERE substr(b.detection_timestamp,1,10) = day), 0),
            COALESCE((SELECT COUNT(*) FROM cellular_detections c WHERE substr(c.detection_timestamp,1,10) = day), 0)
        FROM (
            SELECT DISTINCT substr(detection_timestamp,1,10) AS day FROM wifi_detections
            UNION SELECT DISTINCT substr(detection_timestamp,1,10) FROM bluetooth_detections
            UNION SELECT DISTINCT substr(detection_timestamp,1,10) FROM cellular_detections
        );

        INSERT OR REPLACE INTO network_coverage_grid (grid_cell, detection_count, updated_at)
        SELECT
            printf('%.2f,%.2f', round(lat,2), round(lon,2)) AS grid_cell,
            COUNT(*),
            strftime('%Y-%m-%dT%H:%M:%SZ','now')
        FROM wifi_detections
        WHERE lat IS NOT NULL AND lon IS NOT NULL
        GROUP BY grid_cell;
        ",
    )?;
    Ok(())
}

/// Copy rows older than `days` into `<table>_archive` and delete them from the
/// live table, one transaction per table.
pub fn archive_old(conn: &mut Connection, days: i64) -> Result<(), PiwError> {
    let cutoff = (Utc::now() - ChronoDuration::days(days)).to_rfc3339();
    for table in ARCHIVED_TABLES {
        let archive_table = format!("{table}_archive");
        let tx = conn.transaction()?;
        tx.execute(
            &format!("CREATE TABLE IF NOT EXISTS {archive_table} AS SELECT * FROM {table} WHERE 0"),
            [],
        )?;
        tx.execute(
            &format!("INSERT INTO {archive_table} SELECT * FROM {table} WHERE detection_timestamp < ?1"),
            params![cutoff],
        )?;
        tx.execute(&format!("DELETE FROM {table} WHERE detection_timestamp < ?1"), params![cutoff])?;
        tx.commit()?;
    }
    Ok(())
}

/// Delete health samples older than `days`.
pub fn purge_old_health(conn: &Connection, days: i64) -> Result<usize, PiwError> {
    let cutoff = (Utc::now() - ChronoDuration::days(days)).to_rfc3339();
    let affected = conn.execute("DELETE FROM health_records WHERE recorded_at < ?1", params![cutoff])?;
    Ok(affected)
}

/// Create a consistent copy of the store file via SQLite's backup API.
pub async fn backup(pool: &Arc<Pool>, dest: &Path) -> Result<(), PiwError> {
    let conn = pool.get_writer().await;
    let mut dest_conn = Connection::open(dest)?;
    let backup = rusqlite::backup::Backup::new(&conn, &mut dest_conn)?;
    backup.run_to_completion(100, std::time::Duration::from_millis(50), None)?;
    Ok(())
}

/// Replace the live store file with `source` and reopen the pool.
pub async fn restore(pool: &Arc<Pool>, source: &Path) -> Result<Arc<Pool>, PiwError> {
    {
        let _writer = pool.get_writer().await;
        std::fs::copy(source, pool.path()).map_err(|e| PiwError::Config(e.to_string()))?;
    }
    pool.reopen()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::persistence::migrations;

    #[test]
    fn archive_moves_old_rows() {
        let mut conn = Connection::open_in_memory().unwrap();
        migrations::run(&mut conn).unwrap();
        conn.execute(
            "INSERT INTO wifi_detections (session_id, detection_timestamp, bssid, ssid, first_seen, last_seen)
             VALUES ('adhoc', '2000-01-01T00:00:00Z', 'AA:BB:CC:DD:EE:FF', '', '2000-01-01T00:00:00Z', '2000-01-01T00:00:00Z')",
            [],
        )
        .unwrap();

        archive_old(&mut conn, 30).unwrap();

        let live: i64 = conn.query_row("SELECT COUNT(*) FROM wifi_detections", [], |row| row.get(0)).unwrap();
        let archived: i64 = conn.query_row("SELECT COUNT(*) FROM wifi_detections_archive", [], |row| row.get(0)).unwrap();
        assert_eq!(live, 0);
        assert_eq!(archived, 1);
    }
}
