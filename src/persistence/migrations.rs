//! Versioned schema migrations tracked in a `schema_migrations` table,
//! adapted from the teacher's `migrations.rs` (there, a flat ClickHouse DDL
//! list; here, a SQLite-dialect runner that records applied versions).

use rusqlite::{Connection, params};

use crate::error::PiwError;

pub struct Migration {
    pub version: i64,
    pub description: &'static str,
    pub ddl: &'static str,
}

pub const MIGRATIONS: &[Migration] = &[
    Migration {
        version: 1,
        description: "detections and sessions",
        ddl: r#"
            CREATE TABLE IF NOT EXISTS scan_sessions (
                id         TEXT PRIMARY KEY,
                label      TEXT NOT NULL DEFAULT '',
                started_at TEXT NOT NULL,
                ended_at   TEXT
            );

            CREATE TABLE IF NOT EXISTS wifi_detections (
                id                  INTEGER PRIMARY KEY AUTOINCREMENT,
                session_id          TEXT NOT NULL,
                detection_timestamp TEXT NOT NULL,
                bssid               TEXT NOT NULL,
                ssid                TEXT NOT NULL DEFAULT '',
                channel             INTEGER,
                frequency_mhz       REAL,
                signal_dbm          REAL,
                encryption          TEXT,
                vendor              TEXT,
                station_count       INTEGER,
                heading_degrees     REAL,
                lat                 REAL,
                lon                 REAL,
                first_seen          TEXT NOT NULL,
                last_seen           TEXT NOT NULL
            );
            CREATE INDEX IF NOT EXISTS idx_wifi_bssid ON wifi_detections(bssid);
            CREATE INDEX IF NOT EXISTS idx_wifi_session ON wifi_detections(session_id);

            CREATE TABLE IF NOT EXISTS bluetooth_detections (
                id                  INTEGER PRIMARY KEY AUTOINCREMENT,
                session_id          TEXT NOT NULL,
                detection_timestamp TEXT NOT NULL,
                mac_address         TEXT NOT NULL,
                device_name         TEXT,
                rssi_dbm            REAL,
                device_class        TEXT,
                heading_degrees     REAL,
                lat                 REAL,
                lon                 REAL,
                first_seen          TEXT NOT NULL,
                last_seen           TEXT NOT NULL
            );
            CREATE INDEX IF NOT EXISTS idx_bt_mac ON bluetooth_detections(mac_address);

            CREATE TABLE IF NOT EXISTS cellular_detections (
                id                  INTEGER PRIMARY KEY AUTOINCREMENT,
                session_id          TEXT NOT NULL,
                detection_timestamp TEXT NOT NULL,
                cell_id             TEXT NOT NULL,
                lac                 TEXT,
                mcc                 TEXT,
                mnc                 TEXT,
                technology          TEXT,
                band                TEXT,
                signal_strength_dbm REAL,
                lat                 REAL,
                lon                 REAL,
                first_seen          TEXT NOT NULL,
                last_seen           TEXT NOT NULL
            );
            CREATE INDEX IF NOT EXISTS idx_cell_id ON cellular_detections(cell_id);

            CREATE TABLE IF NOT EXISTS gps_tracks (
                id        INTEGER PRIMARY KEY AUTOINCREMENT,
                session_id TEXT NOT NULL,
                timestamp TEXT NOT NULL,
                lat       REAL NOT NULL,
                lon       REAL NOT NULL,
                altitude_m REAL,
                speed_kmh REAL,
                heading_degrees REAL
            );
            CREATE INDEX IF NOT EXISTS idx_gps_session ON gps_tracks(session_id, timestamp);
        "#,
    },
    Migration {
        version: 2,
        description: "analytics and fingerprints",
        ddl: r#"
            CREATE TABLE IF NOT EXISTS network_fingerprints (
                bssid          TEXT PRIMARY KEY,
                ssid           TEXT NOT NULL DEFAULT '',
                content_hash   TEXT NOT NULL,
                classification TEXT NOT NULL,
                risk_level     TEXT NOT NULL,
                confidence     REAL NOT NULL DEFAULT 0.0,
                created_at     TEXT NOT NULL
            );

            CREATE TABLE IF NOT EXISTS suspicious_activities (
                id            INTEGER PRIMARY KEY AUTOINCREMENT,
                session_id    TEXT NOT NULL,
                activity_type TEXT NOT NULL,
                severity      TEXT NOT NULL,
                target_bssid  TEXT,
                target_ssid   TEXT,
                evidence      TEXT NOT NULL,
                detected_at   TEXT NOT NULL,
                lat           REAL,
                lon           REAL,
                analyst_flag  INTEGER NOT NULL DEFAULT 0
            );
            CREATE INDEX IF NOT EXISTS idx_suspicious_bssid ON suspicious_activities(target_bssid);

            CREATE TABLE IF NOT EXISTS network_analytics (
                bssid              TEXT NOT NULL,
                date               TEXT NOT NULL,
                detection_count    INTEGER NOT NULL DEFAULT 0,
                unique_locations   INTEGER NOT NULL DEFAULT 0,
                signal_min         REAL,
                signal_max         REAL,
                signal_mean        REAL,
                signal_variance    REAL,
                coverage_radius_m  REAL,
                mobility_score     REAL NOT NULL DEFAULT 0.0,
                encryption_changes INTEGER NOT NULL DEFAULT 0,
                ssid_changes       INTEGER NOT NULL DEFAULT 0,
                channel_changes    INTEGER NOT NULL DEFAULT 0,
                suspicious_score   REAL NOT NULL DEFAULT 0.0,
                PRIMARY KEY (bssid, date)
            );

            CREATE TABLE IF NOT EXISTS ap_cache (
                bssid      TEXT PRIMARY KEY,
                ssid       TEXT NOT NULL DEFAULT '',
                encryption TEXT,
                lat        REAL,
                lon        REAL,
                last_seen  TEXT NOT NULL
            );

            CREATE TABLE IF NOT EXISTS health_records (
                id          INTEGER PRIMARY KEY AUTOINCREMENT,
                recorded_at TEXT NOT NULL,
                cpu_percent REAL,
                memory_percent REAL,
                disk_percent REAL,
                temperature_c REAL
            );

            CREATE TABLE IF NOT EXISTS daily_detection_stats (
                day         TEXT PRIMARY KEY,
                wifi_count  INTEGER NOT NULL DEFAULT 0,
                bluetooth_count INTEGER NOT NULL DEFAULT 0,
                cellular_count  INTEGER NOT NULL DEFAULT 0
            );

            CREATE TABLE IF NOT EXISTS network_coverage_grid (
                grid_cell   TEXT PRIMARY KEY,
                detection_count INTEGER NOT NULL DEFAULT 0,
                updated_at  TEXT NOT NULL
            );
        "#,
    },
    Migration {
        version: 3,
        description: "users, settings, geofences",
        ddl: r#"
            CREATE TABLE IF NOT EXISTS users (
                id            TEXT PRIMARY KEY,
                username      TEXT NOT NULL UNIQUE,
                password_hash TEXT NOT NULL,
                created_at    TEXT NOT NULL
            );

            CREATE TABLE IF NOT EXISTS dashboard_settings (
                user_id TEXT PRIMARY KEY,
                layout  TEXT NOT NULL DEFAULT '[]',
                theme   TEXT NOT NULL DEFAULT 'dark'
            );

            CREATE TABLE IF NOT EXISTS geofences (
                name          TEXT PRIMARY KEY,
                vertices      TEXT NOT NULL,
                enter_message TEXT,
                exit_message  TEXT,
                inside        INTEGER NOT NULL DEFAULT 0
            );
        "#,
    },
    Migration {
        version: 4,
        description: "remote sync watermark",
        ddl: r#"
            CREATE TABLE IF NOT EXISTS sync_state (
                key   TEXT PRIMARY KEY,
                value TEXT NOT NULL
            );
        "#,
    },
];

/// Apply every migration with `version` greater than the highest recorded one,
/// each in its own transaction alongside the bookkeeping insert.
pub fn run(conn: &mut Connection) -> Result<(), PiwError> {
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS schema_migrations (
            version     INTEGER PRIMARY KEY,
            description TEXT NOT NULL,
            applied_at  TEXT NOT NULL DEFAULT (strftime('%Y-%m-%dT%H:%M:%SZ','now'))
        );",
    )?;

    let applied_max: i64 = conn.query_row(
        "SELECT COALESCE(MAX(version), 0) FROM schema_migrations",
        [],
        |row| row.get(0),
    )?;

    for migration in MIGRATIONS {
        if migration.version <= applied_max {
            continue;
        }
        let tx = conn.transaction()?;
        tx.execute_batch(migration.ddl)?;
        tx.execute(
            "INSERT INTO schema_migrations (version, description) VALUES (?1, ?2)",
            params![migration.version, migration.description],
        )?;
        tx.commit()?;
        tracing::info!(version = migration.version, description = migration.description, "applied migration");
    }

    Ok(())
}

/// Integrity check run on pool startup; corruption is reported, never repaired.
pub fn check_integrity(conn: &Connection) -> Result<(), PiwError> {
    let result: String = conn.query_row("PRAGMA integrity_check", [], |row| row.get(0))?;
    if result != "ok" {
        return Err(PiwError::Corruption(result));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn migrations_apply_idempotently() {
        let mut conn = Connection::open_in_memory().unwrap();
        run(&mut conn).unwrap();
        run(&mut conn).unwrap();
        let count: i64 = conn
            .query_row("SELECT COUNT(*) FROM schema_migrations", [], |row| row.get(0))
            .unwrap();
        assert_eq!(count, MIGRATIONS.len() as i64);
    }

    #[test]
    fn integrity_check_passes_on_fresh_db() {
        let conn = Connection::open_in_memory().unwrap();
        check_integrity(&conn).unwrap();
    }
}
