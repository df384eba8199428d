//! WebSocket and SSE live feeds (§4.11): `/ws/aps`, `/ws/status`,
//! `/stream/ws/detections` and their SSE counterparts plus `/sse/history`.
//! Every message carries a monotonic `seq`, a `timestamp`, the payload, an
//! `errors` counter, and a `load_time`; sends are bounded by [`SEND_TIMEOUT`]
//! and paced by [`MESSAGE_INTERVAL`].

use std::convert::Infallible;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::State;
use axum::response::sse::{Event, KeepAlive, Sse};
use axum::response::Response;
use chrono::Utc;
use futures_util::stream::{unfold, Stream, StreamExt};
use serde::Serialize;

use crate::auth::AuthenticatedUser;
use crate::models::record::{ApCacheRow, HealthSample};
use crate::persistence::queries;
use crate::stream_processor::StreamMessage;
use crate::AppState;

/// §5: "WebSocket send: 5 s".
const SEND_TIMEOUT: Duration = Duration::from_secs(5);
const STREAM_SLEEP: Duration = Duration::from_secs(1);
const MIN_EVENT_INTERVAL: Duration = Duration::from_millis(250);

fn message_interval() -> Duration {
    STREAM_SLEEP.max(MIN_EVENT_INTERVAL)
}

#[derive(Debug, Clone, Serialize)]
struct StreamEnvelope<T: Serialize> {
    seq: u64,
    timestamp: String,
    payload: T,
    errors: u64,
    load_time: f64,
}

fn ticks(period: Duration) -> impl Stream<Item = ()> {
    unfold(tokio::time::interval(period), |mut interval| async move {
        interval.tick().await;
        Some(((), interval))
    })
}

async fn latest_ap_cache(state: &AppState) -> Result<Vec<ApCacheRow>, crate::error::PiwError> {
    let conn = state.pool.get_reader().await;
    state.query_metrics.timed("all_ap_cache_rows", || queries::all_ap_cache_rows(&conn))
}

async fn latest_health(state: &AppState) -> Result<Option<HealthSample>, crate::error::PiwError> {
    let conn = state.pool.get_reader().await;
    let mut stmt = conn.prepare_cached(
        "SELECT recorded_at, temperature_c, cpu_percent, memory_percent, disk_percent
         FROM health_records ORDER BY recorded_at DESC LIMIT 1",
    )?;
    let row = stmt
        .query_row([], |row| {
            Ok(HealthSample {
                timestamp: row.get(0)?,
                cpu_temp: row.get(1)?,
                cpu_percent: row.get(2)?,
                memory_percent: row.get(3)?,
                disk_percent: row.get(4)?,
            })
        })
        .optional_or_none();
    Ok(row)
}

// rusqlite's `query_row` returns `QueryReturnedNoRows` for an empty result
// set; surfacing that as `None` rather than an error matches every other
// "latest sample" accessor in this codebase.
trait OptionalOrNone<T> {
    fn optional_or_none(self) -> Option<T>;
}
impl<T> OptionalOrNone<T> for rusqlite::Result<T> {
    fn optional_or_none(self) -> Option<T> {
        match self {
            Ok(v) => Some(v),
            Err(rusqlite::Error::QueryReturnedNoRows) => None,
            Err(_) => None,
        }
    }
}

async fn send_ws_json<T: Serialize>(socket: &mut WebSocket, value: &T) -> bool {
    let Ok(json) = serde_json::to_string(value) else { return true };
    matches!(tokio::time::timeout(SEND_TIMEOUT, socket.send(Message::Text(json.into()))).await, Ok(Ok(())))
}

pub async fn ws_aps(_auth: AuthenticatedUser, ws: WebSocketUpgrade, State(state): State<AppState>) -> Response {
    ws.on_upgrade(move |socket| run_ws_aps(socket, state))
}

async fn run_ws_aps(mut socket: WebSocket, state: AppState) {
    let mut seq = 0u64;
    let mut errors = 0u64;
    let interval = message_interval();
    loop {
        tokio::time::sleep(interval).await;
        let start = Instant::now();
        let payload = match latest_ap_cache(&state).await {
            Ok(rows) => rows,
            Err(_) => {
                errors += 1;
                continue;
            }
        };
        let envelope =
            StreamEnvelope { seq, timestamp: Utc::now().to_rfc3339(), payload, errors, load_time: start.elapsed().as_secs_f64() };
        seq += 1;
        if !send_ws_json(&mut socket, &envelope).await {
            return;
        }
    }
}

pub async fn ws_status(_auth: AuthenticatedUser, ws: WebSocketUpgrade, State(state): State<AppState>) -> Response {
    ws.on_upgrade(move |socket| run_ws_status(socket, state))
}

async fn run_ws_status(mut socket: WebSocket, state: AppState) {
    let mut seq = 0u64;
    let mut errors = 0u64;
    let interval = message_interval();
    loop {
        tokio::time::sleep(interval).await;
        let start = Instant::now();
        let payload = match latest_health(&state).await {
            Ok(sample) => sample,
            Err(_) => {
                errors += 1;
                continue;
            }
        };
        let envelope =
            StreamEnvelope { seq, timestamp: Utc::now().to_rfc3339(), payload, errors, load_time: start.elapsed().as_secs_f64() };
        seq += 1;
        if !send_ws_json(&mut socket, &envelope).await {
            return;
        }
    }
}

pub async fn ws_detections(_auth: AuthenticatedUser, ws: WebSocketUpgrade, State(state): State<AppState>) -> Response {
    ws.on_upgrade(move |socket| run_ws_detections(socket, state))
}

async fn run_ws_detections(mut socket: WebSocket, state: AppState) {
    let mut rx = state.stream.subscribe().await;
    let errors = 0u64;
    let interval = message_interval();
    while let Some(msg) = rx.recv().await {
        let start = Instant::now();
        let envelope = StreamEnvelope {
            seq: msg.seq,
            timestamp: msg.timestamp.clone(),
            payload: msg,
            errors,
            load_time: start.elapsed().as_secs_f64(),
        };
        if !send_ws_json(&mut socket, &envelope).await {
            return;
        }
        tokio::time::sleep(interval).await;
    }
}

pub async fn sse_aps(_auth: AuthenticatedUser, State(state): State<AppState>) -> Sse<impl Stream<Item = Result<Event, Infallible>>> {
    let seq = Arc::new(AtomicU64::new(0));
    let stream = ticks(message_interval()).then(move |_| {
        let state = state.clone();
        let seq = seq.clone();
        async move {
            let start = Instant::now();
            let payload = latest_ap_cache(&state).await.unwrap_or_default();
            let n = seq.fetch_add(1, Ordering::SeqCst);
            let envelope =
                StreamEnvelope { seq: n, timestamp: Utc::now().to_rfc3339(), payload, errors: 0, load_time: start.elapsed().as_secs_f64() };
            Ok(Event::default().json_data(envelope).unwrap_or_else(|_| Event::default().data("{}")))
        }
    });
    Sse::new(stream).keep_alive(KeepAlive::default())
}

pub async fn sse_status(_auth: AuthenticatedUser, State(state): State<AppState>) -> Sse<impl Stream<Item = Result<Event, Infallible>>> {
    let seq = Arc::new(AtomicU64::new(0));
    let stream = ticks(message_interval()).then(move |_| {
        let state = state.clone();
        let seq = seq.clone();
        async move {
            let start = Instant::now();
            let payload = latest_health(&state).await.unwrap_or(None);
            let n = seq.fetch_add(1, Ordering::SeqCst);
            let envelope =
                StreamEnvelope { seq: n, timestamp: Utc::now().to_rfc3339(), payload, errors: 0, load_time: start.elapsed().as_secs_f64() };
            Ok(Event::default().json_data(envelope).unwrap_or_else(|_| Event::default().data("{}")))
        }
    });
    Sse::new(stream).keep_alive(KeepAlive::default())
}

pub async fn sse_detections(
    _auth: AuthenticatedUser,
    State(state): State<AppState>,
) -> Sse<impl Stream<Item = Result<Event, Infallible>>> {
    let rx = state.stream.subscribe().await;
    let stream = unfold(rx, |mut rx| async move {
        let msg: StreamMessage = rx.recv().await?;
        Some((msg, rx))
    })
    .map(|msg| {
        let envelope = StreamEnvelope {
            seq: msg.seq,
            timestamp: msg.timestamp.clone(),
            payload: msg,
            errors: 0,
            load_time: 0.0,
        };
        Ok(Event::default().json_data(envelope).unwrap_or_else(|_| Event::default().data("{}")))
    });
    Sse::new(stream).keep_alive(KeepAlive::default())
}

/// One-shot SSE reply carrying the last 24 h of health samples, for clients
/// that want backlog before switching to a live feed.
pub async fn sse_history(
    _auth: AuthenticatedUser,
    State(state): State<AppState>,
) -> Result<Sse<impl Stream<Item = Result<Event, Infallible>>>, crate::error::PiwError> {
    let conn = state.pool.get_reader().await;
    let since = (Utc::now() - chrono::Duration::hours(24)).to_rfc3339();
    let mut stmt = conn.prepare_cached(
        "SELECT recorded_at, temperature_c, cpu_percent, memory_percent, disk_percent
         FROM health_records WHERE recorded_at >= ?1 ORDER BY recorded_at ASC",
    )?;
    let rows: Vec<HealthSample> = stmt
        .query_map([&since], |row| {
            Ok(HealthSample {
                timestamp: row.get(0)?,
                cpu_temp: row.get(1)?,
                cpu_percent: row.get(2)?,
                memory_percent: row.get(3)?,
                disk_percent: row.get(4)?,
            })
        })?
        .collect::<Result<Vec<_>, _>>()?;
    drop(stmt);
    drop(conn);

    let envelope = StreamEnvelope { seq: 0, timestamp: Utc::now().to_rfc3339(), payload: rows, errors: 0, load_time: 0.0 };
    let event = Event::default().json_data(envelope).unwrap_or_else(|_| Event::default().data("{}"));
    let stream = futures_util::stream::once(async move { Ok(event) });
    Ok(Sse::new(stream))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn message_interval_is_the_larger_of_the_two_floors() {
        assert_eq!(message_interval(), STREAM_SLEEP.max(MIN_EVENT_INTERVAL));
    }
}
