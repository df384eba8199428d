//! Wi-Fi scan executor, grounded in
//! `original_source/integrations/sigint_suite/wifi/scanner.py` (the `iwlist`
//! cell/ESSID/encryption grammar) and `original_source/src/piwardrive/advanced_localization.py`-adjacent
//! enrichment steps (GPS + heading + vendor, §4.4).

use std::collections::HashMap;
use std::process::Stdio;
use std::time::Duration;

use tokio::process::Command;

use crate::models::record::WifiDetection;

use super::{build_argv, PostProcessors, ScanConfig};

#[derive(Debug, Default, Clone)]
struct RawCell {
    bssid: Option<String>,
    ssid: Option<String>,
    encryption: Option<String>,
    ie: Vec<String>,
    channel: Option<String>,
    frequency: Option<String>,
}

impl RawCell {
    fn finalize(mut self) -> RawCell {
        if !self.ie.is_empty() {
            let extra = self.ie.join(" ");
            self.encryption = Some(match self.encryption {
                Some(enc) => format!("{enc} {extra}").trim().to_string(),
                None => extra,
            });
        }
        self
    }
}

/// Parse `iwlist <iface> scanning` stdout into per-cell records.
pub fn parse_iwlist_output(output: &str) -> Vec<RawCell> {
    let mut cells = Vec::new();
    let mut current: Option<RawCell> = None;

    for raw_line in output.lines() {
        let line = raw_line.trim();
        if line.starts_with("Cell") {
            if let Some(cell) = current.take() {
                cells.push(cell.finalize());
            }
            let mut cell = RawCell::default();
            if let Some(idx) = line.find("Address:") {
                cell.bssid = Some(line[idx + "Address:".len()..].trim().to_string());
            }
            current = Some(cell);
            continue;
        }
        let Some(cell) = current.as_mut() else { continue };
        if line.contains("ESSID") {
            if let Some((_, rest)) = line.split_once(':') {
                cell.ssid = Some(rest.trim().trim_matches('"').to_string());
            }
        } else if let Some(rest) = line.strip_prefix("Encryption key:") {
            cell.encryption = Some(rest.trim().to_string());
        } else if let Some(rest) = line.strip_prefix("IE:") {
            cell.ie.push(rest.trim().to_string());
        } else if line.contains("Address") {
            if let Some(idx) = line.find("Address:") {
                cell.bssid = Some(line[idx + "Address:".len()..].trim().to_string());
            }
        } else if line.contains("Frequency") {
            if let Some(idx) = line.find("Frequency:") {
                let rest = &line[idx + "Frequency:".len()..];
                cell.frequency = rest.split_whitespace().next().map(str::to_string);
                if let Some(ch_idx) = line.find("(Channel") {
                    let tail = &line[ch_idx + "(Channel".len()..];
                    cell.channel = tail.split(')').next().map(|s| s.trim().to_string());
                }
            }
        } else if let Some(rest) = line.strip_prefix("Channel:") {
            cell.channel = Some(rest.trim().to_string());
        }
    }
    if let Some(cell) = current.take() {
        cells.push(cell.finalize());
    }
    cells
}

fn to_detection(cell: RawCell, session_id: &str, timestamp: &str) -> Option<WifiDetection> {
    let bssid = cell.bssid?;
    let mut det = WifiDetection::new(session_id, bssid, timestamp).ok()?;
    det.ssid = cell.ssid.unwrap_or_default();
    det.encryption = cell.encryption;
    det.channel = cell.channel.and_then(|c| c.trim().parse().ok());
    det.frequency_mhz = cell.frequency.and_then(|f| f.replace("GHz", "").trim().parse::<f64>().ok().map(|ghz| ghz * 1000.0));
    Some(det)
}

pub struct WifiScanner {
    pub hooks: PostProcessors<WifiDetection>,
}

impl Default for WifiScanner {
    fn default() -> Self {
        Self { hooks: PostProcessors::default() }
    }
}

impl WifiScanner {
    /// Run the scan, parse, enrich, and post-process. Never raises: any
    /// failure (timeout, non-zero exit, unparseable output) yields `Ok(vec![])`.
    pub async fn scan(
        &self,
        config: &ScanConfig,
        session_id: &str,
        timestamp: &str,
        heading: Option<f64>,
        gps: Option<(f64, f64)>,
        vendor_lookup: impl Fn(&str) -> Option<String>,
    ) -> Vec<WifiDetection> {
        let cmd = config.command_override.clone().unwrap_or_else(|| "iwlist".to_string());
        let argv = build_argv(&cmd, config.privilege_prefix.as_deref(), &[config.interface.as_str(), "scanning"]);
        let Some((program, args)) = argv.split_first() else { return Vec::new() };

        let run = async {
            let output = Command::new(program)
                .args(args)
                .stdout(Stdio::piped())
                .stderr(Stdio::null())
                .output()
                .await
                .ok()?;
            if !output.status.success() {
                return None;
            }
            Some(String::from_utf8_lossy(&output.stdout).into_owned())
        };

        let stdout = match tokio::time::timeout(config.timeout, run).await {
            Ok(Some(text)) => text,
            _ => {
                tracing::warn!(interface = %config.interface, "wifi scan failed or timed out");
                return Vec::new();
            }
        };

        let mut records: Vec<WifiDetection> = parse_iwlist_output(&stdout)
            .into_iter()
            .filter_map(|c| to_detection(c, session_id, timestamp))
            .collect();

        for rec in records.iter_mut() {
            rec.heading_degrees = heading;
            if let Some((lat, lon)) = gps {
                rec.gps = Some(crate::models::record::GpsFix { lat, lon, altitude_m: None, accuracy_m: None, fix_type: None });
            }
            rec.vendor = vendor_lookup(&rec.bssid);
        }

        self.hooks.apply(&mut records);
        records
    }
}

#[allow(dead_code)]
fn _unused_map_reference() -> HashMap<&'static str, &'static str> {
    HashMap::new()
}

const _DEFAULT_SCAN_TIMEOUT: Duration = Duration::from_secs(10);

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = r#"
wlan0     Scan completed :
          Cell 01 - Address: AA:BB:CC:DD:EE:01
                    Channel:6
                    Frequency:2.437 GHz (Channel 6)
                    Quality=58/70  Signal level=-52 dBm
                    Encryption key:on
                    ESSID:"HomeNet"
                    IE: IEEE 802.11i/WPA2 Version 1
          Cell 02 - Address: AA:BB:CC:DD:EE:02
                    Channel:11
                    Encryption key:off
                    ESSID:""
"#;

    #[test]
    fn parses_two_cells() {
        let cells = parse_iwlist_output(SAMPLE);
        assert_eq!(cells.len(), 2);
        assert_eq!(cells[0].bssid.as_deref(), Some("AA:BB:CC:DD:EE:01"));
        assert_eq!(cells[0].ssid.as_deref(), Some("HomeNet"));
        assert!(cells[0].encryption.as_deref().unwrap().contains("WPA2"));
        assert_eq!(cells[1].ssid.as_deref(), Some(""));
    }

    #[test]
    fn to_detection_requires_bssid() {
        let cell = RawCell::default();
        assert!(to_detection(cell, "adhoc", "2024-01-01T00:00:00Z").is_none());
    }
}
