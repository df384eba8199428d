//! Async GPSD client, grounded in `original_source/gpsd_client_async.py` for the
//! reconnect/degrade-to-None contract and in the `gpsd_proto` crate's wire-message
//! shapes (`?WATCH={"enable":true,"json":true};`, the `TPV`/`class` JSON framing).

use std::time::Duration;

use serde::Deserialize;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::TcpStream;
use tokio::sync::Mutex;

use super::FixQuality;

const DEFAULT_TIMEOUT: Duration = Duration::from_secs(1);
const WATCH_CMD: &str = "?WATCH={\"enable\":true,\"json\":true};\r\n";
const POLL_CMD: &str = "?POLL;\r\n";

#[derive(Debug, Clone, Deserialize)]
struct Tpv {
    #[serde(default)]
    mode: u8,
    lat: Option<f64>,
    lon: Option<f64>,
    alt: Option<f64>,
    epx: Option<f64>,
    epy: Option<f64>,
    track: Option<f64>,
    speed: Option<f64>,
}

#[derive(Debug, Clone, Deserialize)]
struct Sky {
    #[serde(default)]
    satellites: Vec<serde_json::Value>,
    hdop: Option<f64>,
    vdop: Option<f64>,
    pdop: Option<f64>,
}

struct ConnectionState {
    stream: Option<TcpStream>,
    last_tpv: Option<Tpv>,
    last_sky: Option<Sky>,
    warned: bool,
}

/// Adapter over a `gpsd` TCP/JSON endpoint.
pub struct GpsdClient {
    host: String,
    port: u16,
    timeout: Duration,
    state: Mutex<ConnectionState>,
}

impl GpsdClient {
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
            timeout: DEFAULT_TIMEOUT,
            state: Mutex::new(ConnectionState {
                stream: None,
                last_tpv: None,
                last_sky: None,
                warned: false,
            }),
        }
    }

    async fn ensure_connected(&self, state: &mut ConnectionState) -> bool {
        if state.stream.is_some() {
            return true;
        }
        match tokio::time::timeout(self.timeout, TcpStream::connect((self.host.as_str(), self.port))).await {
            Ok(Ok(mut stream)) => {
                if stream.write_all(WATCH_CMD.as_bytes()).await.is_err() {
                    return false;
                }
                state.stream = Some(stream);
                state.warned = false;
                true
            }
            _ => {
                if !state.warned {
                    tracing::warn!(host = %self.host, port = self.port, "gpsd connection failed, degrading to no-fix");
                    state.warned = true;
                }
                false
            }
        }
    }

    /// Poll gpsd for the latest TPV/SKY reports, updating cached state.
    /// Returns without error on any failure; callers observe this via the
    /// accessor methods returning `None`.
    async fn poll(&self) {
        let mut state = self.state.lock().await;
        if !self.ensure_connected(&mut state).await {
            return;
        }
        let result = tokio::time::timeout(self.timeout, async {
            let stream = state.stream.as_mut().unwrap();
            stream.write_all(POLL_CMD.as_bytes()).await?;
            let mut reader = BufReader::new(stream);
            let mut line = String::new();
            // gpsd answers POLL with a single JSON object containing tpv/sky arrays,
            // but also streams unsolicited TPV/SKY class reports; read a handful of
            // lines and keep whichever classes we see.
            for _ in 0..5 {
                line.clear();
                if reader.read_line(&mut line).await? == 0 {
                    break;
                }
                let Ok(value) = serde_json::from_str::<serde_json::Value>(line.trim()) else {
                    continue;
                };
                match value.get("class").and_then(|c| c.as_str()) {
                    Some("TPV") => {
                        if let Ok(tpv) = serde_json::from_value::<Tpv>(value) {
                            return Ok::<_, std::io::Error>((Some(tpv), None));
                        }
                    }
                    Some("SKY") => {
                        if let Ok(sky) = serde_json::from_value::<Sky>(value) {
                            return Ok((None, Some(sky)));
                        }
                    }
                    Some("POLL") => {
                        if let Some(tpv_arr) = value.get("tpv").and_then(|v| v.as_array()) {
                            if let Some(first) = tpv_arr.first() {
                                if let Ok(tpv) = serde_json::from_value::<Tpv>(first.clone()) {
                                    return Ok((Some(tpv), None));
                                }
                            }
                        }
                    }
                    _ => {}
                }
            }
            Ok((None, None))
        })
        .await;

        match result {
            Ok(Ok((Some(tpv), _))) => state.last_tpv = Some(tpv),
            Ok(Ok((_, Some(sky)))) => state.last_sky = Some(sky),
            Ok(Ok(_)) => {}
            _ => {
                // Drop the connection so the next call attempts a fresh reconnect.
                state.stream = None;
            }
        }
    }

    pub async fn position(&self) -> Option<(f64, f64)> {
        self.poll().await;
        let state = self.state.lock().await;
        let tpv = state.last_tpv.as_ref()?;
        Some((tpv.lat?, tpv.lon?))
    }

    pub async fn accuracy_m(&self) -> Option<f64> {
        let state = self.state.lock().await;
        let tpv = state.last_tpv.as_ref()?;
        match (tpv.epx, tpv.epy) {
            (Some(x), Some(y)) => Some(x.max(y)),
            (Some(x), None) => Some(x),
            (None, Some(y)) => Some(y),
            (None, None) => None,
        }
    }

    pub async fn heading_degrees(&self) -> Option<f64> {
        let state = self.state.lock().await;
        state.last_tpv.as_ref()?.track
    }

    pub async fn speed_kmh(&self) -> Option<f64> {
        let state = self.state.lock().await;
        state.last_tpv.as_ref()?.speed.map(|s| s * 3.6)
    }

    pub async fn fix_quality(&self) -> FixQuality {
        let state = self.state.lock().await;
        match state.last_tpv.as_ref().map(|t| t.mode) {
            Some(0) | Some(1) => FixQuality::NoFix,
            Some(2) => FixQuality::Fix2D,
            Some(3) => FixQuality::Fix3D,
            Some(_) => FixQuality::Unknown,
            None => FixQuality::Unknown,
        }
    }

    pub async fn dops(&self) -> (Option<f64>, Option<f64>, Option<f64>) {
        let state = self.state.lock().await;
        match &state.last_sky {
            Some(sky) => (sky.hdop, sky.vdop, sky.pdop),
            None => (None, None, None),
        }
    }

    pub async fn satellite_count(&self) -> Option<i64> {
        let state = self.state.lock().await;
        state.last_sky.as_ref().map(|s| s.satellites.len() as i64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn degrades_to_none_when_gpsd_unreachable() {
        let client = GpsdClient::new("127.0.0.1", 1);
        assert_eq!(client.position().await, None);
        assert_eq!(client.fix_quality().await, FixQuality::Unknown);
    }
}
