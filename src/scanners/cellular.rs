//! Cellular scan executor. The configured tool emits one comma-separated
//! line per tower: `cell_id,lac,mcc,mnc,rssi[,technology[,band]]` (§4.4).
//! As with Bluetooth, `original_source/cellular_scanner.py` only wraps a
//! suite-level async scan, so the line grammar is authored from the
//! specification's textual description rather than ported from Python.

use std::process::Stdio;

use tokio::process::Command;

use crate::models::record::CellularDetection;

use super::{build_argv, PostProcessors, ScanConfig};

#[derive(Debug, Default, Clone)]
struct RawTower {
    cell_id: String,
    lac: Option<String>,
    mcc: Option<String>,
    mnc: Option<String>,
    rssi: Option<f64>,
    technology: Option<String>,
    band: Option<String>,
}

fn non_empty(field: &str) -> Option<String> {
    let trimmed = field.trim();
    if trimmed.is_empty() {
        None
    } else {
        Some(trimmed.to_string())
    }
}

/// Parse `cell_id,lac,mcc,mnc,rssi[,technology[,band]]` lines.
/// Lines with fewer than 5 fields, or an empty `cell_id`, are skipped.
pub fn parse_cellular_output(output: &str) -> Vec<RawTower> {
    output
        .lines()
        .filter_map(|raw_line| {
            let fields: Vec<&str> = raw_line.trim().split(',').collect();
            if fields.len() < 5 {
                return None;
            }
            let cell_id = non_empty(fields[0])?;
            Some(RawTower {
                cell_id,
                lac: non_empty(fields[1]),
                mcc: non_empty(fields[2]),
                mnc: non_empty(fields[3]),
                rssi: fields[4].trim().parse().ok(),
                technology: fields.get(5).and_then(|f| non_empty(f)),
                band: fields.get(6).and_then(|f| non_empty(f)),
            })
        })
        .collect()
}

fn to_detection(tower: RawTower, session_id: &str, timestamp: &str) -> Option<CellularDetection> {
    let mut det = CellularDetection::new(session_id, tower.cell_id, timestamp).ok()?;
    det.lac = tower.lac;
    det.mcc = tower.mcc;
    det.mnc = tower.mnc;
    det.signal_strength_dbm = tower.rssi;
    det.technology = tower.technology;
    det.band = tower.band;
    Some(det)
}

pub struct CellularScanner {
    pub hooks: PostProcessors<CellularDetection>,
}

impl Default for CellularScanner {
    fn default() -> Self {
        Self { hooks: PostProcessors::default() }
    }
}

impl CellularScanner {
    pub async fn scan(
        &self,
        config: &ScanConfig,
        session_id: &str,
        timestamp: &str,
        gps: Option<(f64, f64)>,
    ) -> Vec<CellularDetection> {
        let cmd = config.command_override.clone().unwrap_or_else(|| "cell-scan".to_string());
        let argv = build_argv(&cmd, config.privilege_prefix.as_deref(), &[config.interface.as_str()]);
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
                tracing::warn!(interface = %config.interface, "cellular scan failed or timed out");
                return Vec::new();
            }
        };

        let mut records: Vec<CellularDetection> = parse_cellular_output(&stdout)
            .into_iter()
            .filter_map(|t| to_detection(t, session_id, timestamp))
            .collect();

        if let Some((lat, lon)) = gps {
            for rec in records.iter_mut() {
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

    #[test]
    fn parses_full_line() {
        let towers = parse_cellular_output("310410,1234,310,410,-85,LTE,B2\n");
        assert_eq!(towers.len(), 1);
        let t = &towers[0];
        assert_eq!(t.cell_id, "310410");
        assert_eq!(t.rssi, Some(-85.0));
        assert_eq!(t.technology.as_deref(), Some("LTE"));
        assert_eq!(t.band.as_deref(), Some("B2"));
    }

    #[test]
    fn skips_short_lines_and_blank_cell_id() {
        let towers = parse_cellular_output(",1234,310,410,-85\nshort,line\n");
        assert!(towers.is_empty());
    }

    #[test]
    fn minimal_fields_without_technology() {
        let towers = parse_cellular_output("310410,1234,310,410,-70\n");
        assert_eq!(towers.len(), 1);
        assert_eq!(towers[0].technology, None);
    }
}
