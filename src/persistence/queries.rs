//! Read/write queries used directly by HTTP handlers (as opposed to the
//! batched detection inserts in [`super::writer`]), adapted from the
//! teacher's `config_db.rs` CRUD methods (dashboards/widgets/api_keys)
//! generalized to the new schema.

use chrono::Utc;
use rusqlite::{params, Connection, OptionalExtension};
use uuid::Uuid;

use crate::error::PiwError;
use crate::models::record::{ApCacheRow, DashboardSettings, Geofence, WidgetPlacement};

pub fn recent_wifi_detections(conn: &Connection, limit: i64) -> Result<Vec<(String, String, Option<f64>)>, PiwError> {
    let mut stmt = conn.prepare_cached(
        "SELECT bssid, ssid, signal_dbm FROM wifi_detections ORDER BY detection_timestamp DESC LIMIT ?1",
    )?;
    let rows = stmt
        .query_map(params![limit], |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?)))?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(rows)
}

pub fn all_ap_cache_rows(conn: &Connection) -> Result<Vec<ApCacheRow>, PiwError> {
    let mut stmt = conn.prepare_cached("SELECT bssid, ssid, encryption, lat, lon, last_seen FROM ap_cache")?;
    let rows = stmt
        .query_map([], |row| {
            Ok(ApCacheRow {
                bssid: row.get(0)?,
                ssid: row.get(1)?,
                encryption: row.get(2)?,
                latitude: row.get(3)?,
                longitude: row.get(4)?,
                last_seen: row.get(5)?,
            })
        })?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(rows)
}

pub fn create_geofence(conn: &Connection, fence: &Geofence) -> Result<(), PiwError> {
    let vertices = serde_json::to_string(&fence.vertices).map_err(|e| PiwError::Validation(e.to_string()))?;
    let existing: Option<String> = conn
        .query_row("SELECT name FROM geofences WHERE name = ?1", params![fence.name], |row| row.get(0))
        .optional()?;
    if existing.is_some() {
        return Err(PiwError::Conflict(format!("geofence '{}' already exists", fence.name)));
    }
    conn.execute(
        "INSERT INTO geofences (name, vertices, enter_message, exit_message, inside) VALUES (?1,?2,?3,?4,?5)",
        params![fence.name, vertices, fence.enter_message, fence.exit_message, fence.inside as i64],
    )?;
    Ok(())
}

pub fn list_geofences(conn: &Connection) -> Result<Vec<Geofence>, PiwError> {
    let mut stmt = conn.prepare_cached("SELECT name, vertices, enter_message, exit_message, inside FROM geofences")?;
    let rows = stmt
        .query_map([], |row| {
            let vertices_json: String = row.get(1)?;
            Ok((row.get::<_, String>(0)?, vertices_json, row.get(2)?, row.get(3)?, row.get::<_, i64>(4)?))
        })?
        .collect::<Result<Vec<_>, _>>()?;

    rows.into_iter()
        .map(|(name, vertices_json, enter_message, exit_message, inside)| {
            let vertices = serde_json::from_str(&vertices_json).map_err(|e| PiwError::Validation(e.to_string()))?;
            Ok(Geofence { name, vertices, enter_message, exit_message, inside: inside != 0 })
        })
        .collect()
}

pub fn delete_geofence(conn: &Connection, name: &str) -> Result<(), PiwError> {
    let affected = conn.execute("DELETE FROM geofences WHERE name = ?1", params![name])?;
    if affected == 0 {
        return Err(PiwError::NotFound(format!("geofence '{name}' not found")));
    }
    Ok(())
}

pub fn get_dashboard_settings(conn: &Connection, user_id: &str) -> Result<DashboardSettings, PiwError> {
    let row: Option<(String, String)> = conn
        .query_row("SELECT layout, theme FROM dashboard_settings WHERE user_id = ?1", params![user_id], |row| {
            Ok((row.get(0)?, row.get(1)?))
        })
        .optional()?;

    match row {
        Some((layout_json, theme)) => {
            let widgets: Vec<WidgetPlacement> =
                serde_json::from_str(&layout_json).map_err(|e| PiwError::Validation(e.to_string()))?;
            Ok(DashboardSettings { widgets, theme })
        }
        None => Ok(DashboardSettings { widgets: Vec::new(), theme: "dark".to_string() }),
    }
}

pub fn put_dashboard_settings(conn: &Connection, user_id: &str, settings: &DashboardSettings) -> Result<(), PiwError> {
    let layout = serde_json::to_string(&settings.widgets).map_err(|e| PiwError::Validation(e.to_string()))?;
    conn.execute(
        "INSERT INTO dashboard_settings (user_id, layout, theme) VALUES (?1, ?2, ?3)
         ON CONFLICT(user_id) DO UPDATE SET layout = excluded.layout, theme = excluded.theme",
        params![user_id, layout, settings.theme],
    )?;
    Ok(())
}

pub fn create_user(conn: &Connection, username: &str, password_hash: &str) -> Result<String, PiwError> {
    let id = Uuid::new_v4().to_string();
    conn.execute(
        "INSERT INTO users (id, username, password_hash, created_at) VALUES (?1, ?2, ?3, ?4)",
        params![id, username, password_hash, Utc::now().to_rfc3339()],
    )
    .map_err(|e| match e {
        rusqlite::Error::SqliteFailure(code, _) if code.code == rusqlite::ErrorCode::ConstraintViolation => {
            PiwError::Conflict(format!("username '{username}' already exists"))
        }
        other => other.into(),
    })?;
    Ok(id)
}

const SYNC_WATERMARK_KEY: &str = "health_records_watermark";

pub fn get_sync_watermark(conn: &Connection) -> Result<String, PiwError> {
    let value: Option<String> = conn
        .query_row("SELECT value FROM sync_state WHERE key = ?1", params![SYNC_WATERMARK_KEY], |row| row.get(0))
        .optional()?;
    Ok(value.unwrap_or_else(|| "1970-01-01T00:00:00Z".to_string()))
}

pub fn set_sync_watermark(conn: &Connection, watermark: &str) -> Result<(), PiwError> {
    conn.execute(
        "INSERT INTO sync_state (key, value) VALUES (?1, ?2)
         ON CONFLICT(key) DO UPDATE SET value = excluded.value",
        params![SYNC_WATERMARK_KEY, watermark],
    )?;
    Ok(())
}

pub fn find_user_password_hash(conn: &Connection, username: &str) -> Result<Option<(String, String)>, PiwError> {
    let row = conn
        .query_row("SELECT id, password_hash FROM users WHERE username = ?1", params![username], |row| {
            Ok((row.get(0)?, row.get(1)?))
        })
        .optional()?;
    Ok(row)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::persistence::migrations;

    fn fresh_conn() -> Connection {
        let mut conn = Connection::open_in_memory().unwrap();
        migrations::run(&mut conn).unwrap();
        conn
    }

    #[test]
    fn geofence_roundtrip_and_conflict() {
        let conn = fresh_conn();
        let fence = Geofence {
            name: "home".to_string(),
            vertices: vec![(1.0, 2.0), (3.0, 4.0)],
            enter_message: Some("welcome".to_string()),
            exit_message: None,
            inside: false,
        };
        create_geofence(&conn, &fence).unwrap();
        assert!(matches!(create_geofence(&conn, &fence), Err(PiwError::Conflict(_))));

        let all = list_geofences(&conn).unwrap();
        assert_eq!(all.len(), 1);
        assert_eq!(all[0].name, "home");

        delete_geofence(&conn, "home").unwrap();
        assert!(matches!(delete_geofence(&conn, "home"), Err(PiwError::NotFound(_))));
    }

    #[test]
    fn user_creation_rejects_duplicate_username() {
        let conn = fresh_conn();
        create_user(&conn, "alice", "hash1").unwrap();
        assert!(matches!(create_user(&conn, "alice", "hash2"), Err(PiwError::Conflict(_))));
    }

    #[test]
    fn sync_watermark_defaults_then_persists() {
        let conn = fresh_conn();
        assert_eq!(get_sync_watermark(&conn).unwrap(), "1970-01-01T00:00:00Z");
        set_sync_watermark(&conn, "2024-01-02T00:00:00Z").unwrap();
        assert_eq!(get_sync_watermark(&conn).unwrap(), "2024-01-02T00:00:00Z");
    }

    #[test]
    fn dashboard_settings_default_when_absent() {
        let conn = fresh_conn();
        let settings = get_dashboard_settings(&conn, "nobody").unwrap();
        assert!(settings.widgets.is_empty());
        assert_eq!(settings.theme, "dark");
    }
}
