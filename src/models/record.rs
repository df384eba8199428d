use serde::{Deserialize, Serialize};

use crate::error::PiwError;

/// Literal session id used when no scan session is active.
pub const ADHOC_SESSION: &str = "adhoc";

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GpsFix {
    pub lat: f64,
    pub lon: f64,
    pub altitude_m: Option<f64>,
    pub accuracy_m: Option<f64>,
    pub fix_type: Option<String>,
}

/// A single Wi-Fi access point sighting.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WifiDetection {
    pub session_id: String,
    pub detection_timestamp: String,
    pub bssid: String,
    pub ssid: String,
    pub channel: Option<i64>,
    pub frequency_mhz: Option<f64>,
    pub signal_dbm: Option<f64>,
    pub encryption: Option<String>,
    pub vendor: Option<String>,
    pub station_count: Option<i64>,
    pub heading_degrees: Option<f64>,
    pub gps: Option<GpsFix>,
    pub first_seen: String,
    pub last_seen: String,
    /// Additional fingerprinting characteristics (§4.9), populated by
    /// post-processing hooks when the scan tool's output carries them.
    pub cipher_suite: Option<String>,
    pub beacon_interval: Option<i64>,
    pub ht_caps: Option<String>,
    pub vht_caps: Option<String>,
    pub he_caps: Option<String>,
    pub country: Option<String>,
    pub tx_power_dbm: Option<f64>,
    pub device_type: Option<String>,
}

impl WifiDetection {
    pub fn new(session_id: impl Into<String>, bssid: impl Into<String>, timestamp: impl Into<String>) -> Result<Self, PiwError> {
        let bssid = bssid.into();
        if bssid.trim().is_empty() {
            return Err(PiwError::Validation("bssid must not be empty".into()));
        }
        let ts = timestamp.into();
        Ok(Self {
            session_id: session_id.into(),
            detection_timestamp: ts.clone(),
            bssid,
            ssid: String::new(),
            channel: None,
            frequency_mhz: None,
            signal_dbm: None,
            encryption: None,
            vendor: None,
            station_count: None,
            heading_degrees: None,
            gps: None,
            first_seen: ts.clone(),
            last_seen: ts,
            cipher_suite: None,
            beacon_interval: None,
            ht_caps: None,
            vht_caps: None,
            he_caps: None,
            country: None,
            tx_power_dbm: None,
            device_type: None,
        })
    }
}

/// A single Bluetooth device sighting.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BluetoothDetection {
    pub session_id: String,
    pub detection_timestamp: String,
    pub mac_address: String,
    pub device_name: Option<String>,
    pub rssi_dbm: Option<f64>,
    pub device_class: Option<String>,
    pub heading_degrees: Option<f64>,
    pub gps: Option<GpsFix>,
    pub first_seen: String,
    pub last_seen: String,
}

impl BluetoothDetection {
    pub fn new(session_id: impl Into<String>, mac_address: impl Into<String>, timestamp: impl Into<String>) -> Result<Self, PiwError> {
        let mac_address = mac_address.into();
        if mac_address.trim().is_empty() {
            return Err(PiwError::Validation("mac_address must not be empty".into()));
        }
        let ts = timestamp.into();
        Ok(Self {
            session_id: session_id.into(),
            detection_timestamp: ts.clone(),
            mac_address,
            device_name: None,
            rssi_dbm: None,
            device_class: None,
            heading_degrees: None,
            gps: None,
            first_seen: ts.clone(),
            last_seen: ts,
        })
    }
}

/// A single cellular tower sighting.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CellularDetection {
    pub session_id: String,
    pub detection_timestamp: String,
    pub cell_id: String,
    pub lac: Option<String>,
    pub mcc: Option<String>,
    pub mnc: Option<String>,
    pub technology: Option<String>,
    pub band: Option<String>,
    pub signal_strength_dbm: Option<f64>,
    pub gps: Option<GpsFix>,
    pub first_seen: String,
    pub last_seen: String,
}

impl CellularDetection {
    pub fn new(session_id: impl Into<String>, cell_id: impl Into<String>, timestamp: impl Into<String>) -> Result<Self, PiwError> {
        let cell_id = cell_id.into();
        if cell_id.trim().is_empty() {
            return Err(PiwError::Validation("cell_id must not be empty".into()));
        }
        let ts = timestamp.into();
        Ok(Self {
            session_id: session_id.into(),
            detection_timestamp: ts.clone(),
            cell_id,
            lac: None,
            mcc: None,
            mnc: None,
            technology: None,
            band: None,
            signal_strength_dbm: None,
            gps: None,
            first_seen: ts.clone(),
            last_seen: ts,
        })
    }
}

/// Tagged union over the three scan-executor outputs (§9 redesign note: no ad-hoc mappings).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Record {
    Wifi(WifiDetection),
    Bluetooth(BluetoothDetection),
    Cellular(CellularDetection),
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GpsTrackPoint {
    pub session_id: String,
    pub timestamp: String,
    pub latitude: f64,
    pub longitude: f64,
    pub altitude_meters: Option<f64>,
    pub accuracy_meters: Option<f64>,
    pub heading_degrees: Option<f64>,
    pub speed_kmh: Option<f64>,
    pub satellite_count: Option<i64>,
    pub hdop: Option<f64>,
    pub vdop: Option<f64>,
    pub pdop: Option<f64>,
    pub fix_type: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthSample {
    pub timestamp: String,
    pub cpu_temp: Option<f64>,
    pub cpu_percent: Option<f64>,
    pub memory_percent: Option<f64>,
    pub disk_percent: Option<f64>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Classification {
    Home,
    Business,
    Public,
    IotSensor,
    SmartAppliance,
    Generic,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RiskLevel {
    Low,
    Medium,
    High,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NetworkFingerprint {
    pub bssid: String,
    pub ssid: String,
    pub content_hash: String,
    pub classification: Classification,
    pub risk_level: RiskLevel,
    pub confidence: f64,
    pub created_at: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActivityType {
    EvilTwin,
    HiddenSsid,
    DeauthAttack,
    RogueAp,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Low,
    Medium,
    High,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SuspiciousActivity {
    pub session_id: String,
    pub activity_type: ActivityType,
    pub severity: Severity,
    pub target_bssid: Option<String>,
    pub target_ssid: Option<String>,
    pub evidence: serde_json::Value,
    pub detected_at: String,
    pub latitude: Option<f64>,
    pub longitude: Option<f64>,
    pub analyst_flag: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NetworkAnalyticsRow {
    pub bssid: String,
    pub date: String,
    pub detection_count: i64,
    pub unique_locations: i64,
    pub signal_min: Option<f64>,
    pub signal_max: Option<f64>,
    pub signal_mean: Option<f64>,
    pub signal_variance: Option<f64>,
    pub coverage_radius_m: Option<f64>,
    pub mobility_score: f64,
    pub encryption_changes: i64,
    pub ssid_changes: i64,
    pub channel_changes: i64,
    pub suspicious_score: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApCacheRow {
    pub bssid: String,
    pub ssid: String,
    pub encryption: Option<String>,
    pub latitude: Option<f64>,
    pub longitude: Option<f64>,
    pub last_seen: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WidgetPlacement {
    pub widget_id: String,
    pub x: i64,
    pub y: i64,
    pub width: i64,
    pub height: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DashboardSettings {
    pub widgets: Vec<WidgetPlacement>,
    #[serde(default = "default_theme")]
    pub theme: String,
}

fn default_theme() -> String {
    "dark".to_string()
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Geofence {
    pub name: String,
    pub vertices: Vec<(f64, f64)>,
    pub enter_message: Option<String>,
    pub exit_message: Option<String>,
    #[serde(default)]
    pub inside: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn wifi_detection_rejects_empty_bssid() {
        let err = WifiDetection::new(ADHOC_SESSION, "", "2024-01-01T00:00:00Z").unwrap_err();
        assert!(matches!(err, PiwError::Validation(_)));
    }

    #[test]
    fn wifi_detection_accepts_valid_bssid() {
        let rec = WifiDetection::new(ADHOC_SESSION, "AA:BB:CC:DD:EE:FF", "2024-01-01T00:00:00Z").unwrap();
        assert_eq!(rec.bssid, "AA:BB:CC:DD:EE:FF");
        assert_eq!(rec.first_seen, rec.last_seen);
    }

    #[test]
    fn bluetooth_detection_rejects_empty_mac() {
        assert!(BluetoothDetection::new(ADHOC_SESSION, "  ", "2024-01-01T00:00:00Z").is_err());
    }

    #[test]
    fn cellular_detection_rejects_empty_cell_id() {
        assert!(CellularDetection::new(ADHOC_SESSION, "", "2024-01-01T00:00:00Z").is_err());
    }
}
