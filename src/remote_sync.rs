//! Remote aggregation sync (C12), ported from
//! `original_source/remote_sync.py`'s retry/backoff semantics: multipart
//! file upload with exponential backoff, and incremental record sync
//! advancing a watermark only on success. Both request types carry
//! `remote_sync_token` as an `Authorization: Bearer` header when configured,
//! matching `original_source/piwardrive/sync.py`'s `upload_data`.

use std::path::Path;
use std::time::Duration;

use rusqlite::Connection;

use crate::error::PiwError;

/// Stream the database file as a multipart `file` upload, retrying up to
/// `retries` times with exponential backoff (1s, 2s, 4s, ...) on network
/// errors or non-2xx responses. Returns `Err` only after the final attempt
/// fails.
pub async fn sync_database_to_server(
    client: &reqwest::Client,
    path: &Path,
    url: &str,
    timeout: Duration,
    retries: u32,
    token: Option<&str>,
) -> Result<(), PiwError> {
    let mut attempt = 0;
    loop {
        attempt += 1;
        let bytes = tokio::fs::read(path).await.map_err(|e| PiwError::Config(e.to_string()))?;
        let file_name = path.file_name().and_then(|n| n.to_str()).unwrap_or("store.sqlite3").to_string();
        let part = reqwest::multipart::Part::bytes(bytes).file_name(file_name);
        let form = reqwest::multipart::Form::new().part("file", part);

        let mut request = client.post(url).timeout(timeout).multipart(form);
        if let Some(token) = token {
            request = request.bearer_auth(token);
        }
        let result = request.send().await;
        match result {
            Ok(resp) if resp.status().is_success() => return Ok(()),
            Ok(resp) => {
                tracing::warn!(status = %resp.status(), attempt, "remote sync upload rejected");
            }
            Err(e) => {
                tracing::warn!(error = %e, attempt, "remote sync upload failed");
            }
        }

        if attempt >= retries {
            return Err(PiwError::Network(format!("remote sync failed after {attempt} attempts")));
        }
        tokio::time::sleep(Duration::from_secs(1 << (attempt - 1).min(6))).await;
    }
}

/// A record batch shipped incrementally, with the watermark it was read up to.
pub struct IncrementalBatch {
    pub rows: Vec<serde_json::Value>,
    pub new_watermark: String,
}

fn read_new_health_rows(conn: &Connection, watermark: &str) -> rusqlite::Result<IncrementalBatch> {
    let mut stmt = conn.prepare(
        "SELECT id, recorded_at, cpu_percent, memory_percent, disk_percent, temperature_c
         FROM health_records WHERE recorded_at > ?1 ORDER BY recorded_at ASC",
    )?;
    let mut new_watermark = watermark.to_string();
    let rows = stmt
        .query_map([watermark], |row| {
            let recorded_at: String = row.get(1)?;
            Ok((
                recorded_at,
                serde_json::json!({
                    "id": row.get::<_, i64>(0)?,
                    "recorded_at": row.get::<_, String>(1)?,
                    "cpu_percent": row.get::<_, Option<f64>>(2)?,
                    "memory_percent": row.get::<_, Option<f64>>(3)?,
                    "disk_percent": row.get::<_, Option<f64>>(4)?,
                    "temperature_c": row.get::<_, Option<f64>>(5)?,
                }),
            ))
        })?
        .collect::<Result<Vec<_>, _>>()?;

    let mut values = Vec::with_capacity(rows.len());
    for (recorded_at, value) in rows {
        if recorded_at > new_watermark {
            new_watermark = recorded_at;
        }
        values.push(value);
    }

    Ok(IncrementalBatch { rows: values, new_watermark })
}

/// Ship health records inserted since `watermark`; the caller persists the
/// returned watermark only after a successful upload.
pub async fn sync_new_records(
    client: &reqwest::Client,
    conn: &Connection,
    url: &str,
    watermark: &str,
    token: Option<&str>,
) -> Result<String, PiwError> {
    let batch = read_new_health_rows(conn, watermark)?;
    if batch.rows.is_empty() {
        return Ok(batch.new_watermark);
    }

    let mut request = client.post(url).json(&serde_json::json!({"records": batch.rows}));
    if let Some(token) = token {
        request = request.bearer_auth(token);
    }
    let resp = request.send().await.map_err(|e| PiwError::Network(e.to_string()))?;

    if !resp.status().is_success() {
        return Err(PiwError::Network(format!("incremental sync rejected with status {}", resp.status())));
    }

    Ok(batch.new_watermark)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::persistence::migrations;

    #[test]
    fn read_new_health_rows_advances_watermark() {
        let mut conn = Connection::open_in_memory().unwrap();
        migrations::run(&mut conn).unwrap();
        conn.execute(
            "INSERT INTO health_records (recorded_at, cpu_percent) VALUES ('2024-01-01T00:00:00Z', 10.0)",
            [],
        )
        .unwrap();
        conn.execute(
            "INSERT INTO health_records (recorded_at, cpu_percent) VALUES ('2024-01-02T00:00:00Z', 20.0)",
            [],
        )
        .unwrap();

        let batch = read_new_health_rows(&conn, "2024-01-01T00:00:00Z").unwrap();
        assert_eq!(batch.rows.len(), 1);
        assert_eq!(batch.new_watermark, "2024-01-02T00:00:00Z");
    }

    #[test]
    fn read_new_health_rows_empty_when_no_new_data() {
        let mut conn = Connection::open_in_memory().unwrap();
        migrations::run(&mut conn).unwrap();
        let batch = read_new_health_rows(&conn, "2099-01-01T00:00:00Z").unwrap();
        assert!(batch.rows.is_empty());
        assert_eq!(batch.new_watermark, "2099-01-01T00:00:00Z");
    }
}
