//! Bluetooth scan executor. `bluetoothctl --timeout N scan on` emits
//! `[NEW] Device <MAC> <name>` lines as peers are discovered; grounded in the
//! discovery-line contract described for Bluetooth scanning (§4.4), since
//! the original's `bluetooth_scanner.py` only wraps a suite-level async
//! scan without exposing its own device-line grammar.

use std::process::Stdio;

use tokio::process::Command;

use crate::models::record::BluetoothDetection;

use super::{build_argv, PostProcessors, ScanConfig};

#[derive(Debug, Default, Clone)]
struct RawDevice {
    mac_address: String,
    name: Option<String>,
}

/// Parse `bluetoothctl` discovery output into `[NEW] Device MAC name` hits.
/// Duplicate MACs keep the last-seen name.
pub fn parse_bluetoothctl_output(output: &str) -> Vec<RawDevice> {
    let mut seen = std::collections::HashMap::new();
    let mut order = Vec::new();

    for raw_line in output.lines() {
        let line = raw_line.trim();
        let Some(rest) = line.strip_prefix("[NEW] Device ") else { continue };
        let mut parts = rest.splitn(2, ' ');
        let Some(mac) = parts.next() else { continue };
        if !mac.contains(':') {
            continue;
        }
        let name = parts.next().map(str::trim).filter(|s| !s.is_empty()).map(str::to_string);
        if !seen.contains_key(mac) {
            order.push(mac.to_string());
        }
        seen.insert(mac.to_string(), name);
    }

    order
        .into_iter()
        .map(|mac| {
            let name = seen.remove(&mac).flatten();
            RawDevice { mac_address: mac, name }
        })
        .collect()
}

fn to_detection(dev: RawDevice, session_id: &str, timestamp: &str) -> Option<BluetoothDetection> {
    let mut det = BluetoothDetection::new(session_id, dev.mac_address, timestamp).ok()?;
    det.device_name = dev.name;
    Some(det)
}

pub struct BluetoothScanner {
    pub hooks: PostProcessors<BluetoothDetection>,
}

impl Default for BluetoothScanner {
    fn default() -> Self {
        Self { hooks: PostProcessors::default() }
    }
}

impl BluetoothScanner {
    pub async fn scan(
        &self,
        config: &ScanConfig,
        session_id: &str,
        timestamp: &str,
        heading: Option<f64>,
        gps: Option<(f64, f64)>,
    ) -> Vec<BluetoothDetection> {
        let cmd = config.command_override.clone().unwrap_or_else(|| "bluetoothctl".to_string());
        let timeout_secs = config.timeout.as_secs().max(1).to_string();
        let argv = build_argv(&cmd, config.privilege_prefix.as_deref(), &["--timeout", timeout_secs.as_str(), "scan", "on"]);
        let Some((program, args)) = argv.split_first() else { return Vec::new() };

        let run = async {
            let output = Command::new(program)
                .args(args)
                .stdout(Stdio::piped())
                .stderr(Stdio::null())
                .output()
                .await
                .ok()?;
            Some(String::from_utf8_lossy(&output.stdout).into_owned())
        };

        let stdout = match tokio::time::timeout(config.timeout, run).await {
            Ok(Some(text)) => text,
            _ => {
                tracing::warn!(interface = %config.interface, "bluetooth scan failed or timed out");
                return Vec::new();
            }
        };

        let mut records: Vec<BluetoothDetection> = parse_bluetoothctl_output(&stdout)
            .into_iter()
            .filter_map(|d| to_detection(d, session_id, timestamp))
            .collect();

        for rec in records.iter_mut() {
            rec.heading_degrees = heading;
            if let Some((lat, lon)) = gps {
                rec.gps = Some(crate::models::record::GpsFix { lat, lon, altitude_m: None, accuracy_m: None, fix_type: None });
            }
        }

        self.hooks.apply(&mut records);
        records
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = "\
[NEW] Device AA:BB:CC:DD:EE:01 Pixel 7\n\
[CHG] Device AA:BB:CC:DD:EE:01 RSSI: -60\n\
[NEW] Device AA:BB:CC:DD:EE:02\n\
[NEW] Device AA:BB:CC:DD:EE:01 Pixel 7 Pro\n";

    #[test]
    fn parses_devices_keeping_latest_name() {
        let devices = parse_bluetoothctl_output(SAMPLE);
        assert_eq!(devices.len(), 2);
        assert_eq!(devices[0].mac_address, "AA:BB:CC:DD:EE:01");
        assert_eq!(devices[0].name.as_deref(), Some("Pixel 7 Pro"));
        assert_eq!(devices[1].name, None);
    }

    #[test]
    fn ignores_non_new_lines() {
        let devices = parse_bluetoothctl_output("[CHG] Controller AA:BB:CC:DD:EE:FF Powered: yes\n");
        assert!(devices.is_empty());
    }
}
