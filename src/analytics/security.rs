//! Security heuristics over a Wi-Fi batch (§4.9): hidden SSID, evil twin,
//! and the deauth-attack heuristic.

use std::collections::HashMap;

use chrono::Utc;
use serde_json::json;

use crate::models::record::{ActivityType, Severity, SuspiciousActivity, WifiDetection};

fn hidden_ssid(detections: &[WifiDetection]) -> Vec<SuspiciousActivity> {
    detections
        .iter()
        .filter(|d| d.ssid.trim().is_empty())
        .map(|d| SuspiciousActivity {
            session_id: d.session_id.clone(),
            activity_type: ActivityType::HiddenSsid,
            severity: Severity::Low,
            target_bssid: Some(d.bssid.clone()),
            target_ssid: None,
            evidence: json!({"bssid": d.bssid}),
            detected_at: Utc::now().to_rfc3339(),
            latitude: d.gps.map(|g| g.lat),
            longitude: d.gps.map(|g| g.lon),
            analyst_flag: false,
        })
        .collect()
}

fn evil_twin(detections: &[WifiDetection]) -> Vec<SuspiciousActivity> {
    let mut by_ssid: HashMap<&str, Vec<&WifiDetection>> = HashMap::new();
    for d in detections {
        if d.ssid.trim().is_empty() {
            continue;
        }
        by_ssid.entry(d.ssid.as_str()).or_default().push(d);
    }

    let mut findings = Vec::new();
    for (ssid, group) in by_ssid {
        let distinct_bssids: std::collections::HashSet<&str> = group.iter().map(|d| d.bssid.as_str()).collect();
        if distinct_bssids.len() < 2 {
            continue;
        }
        let distinct_encryptions: std::collections::HashSet<&str> =
            group.iter().filter_map(|d| d.encryption.as_deref()).collect();
        let distinct_vendors: std::collections::HashSet<&str> = group.iter().filter_map(|d| d.vendor.as_deref()).collect();

        if distinct_encryptions.len() < 2 && distinct_vendors.len() < 2 {
            continue;
        }

        let evidence = json!({
            "ssid": ssid,
            "bssids": distinct_bssids.iter().collect::<Vec<_>>(),
            "encryptions": distinct_encryptions.iter().collect::<Vec<_>>(),
            "vendors": distinct_vendors.iter().collect::<Vec<_>>(),
        });

        for d in &group {
            findings.push(SuspiciousActivity {
                session_id: d.session_id.clone(),
                activity_type: ActivityType::EvilTwin,
                severity: Severity::High,
                target_bssid: Some(d.bssid.clone()),
                target_ssid: Some(ssid.to_string()),
                evidence: evidence.clone(),
                detected_at: Utc::now().to_rfc3339(),
                latitude: d.gps.map(|g| g.lat),
                longitude: d.gps.map(|g| g.lon),
                analyst_flag: false,
            });
        }
    }
    findings
}

fn deauth_attack(detections: &[WifiDetection]) -> Vec<SuspiciousActivity> {
    detections
        .iter()
        .filter(|d| d.station_count == Some(0) && d.signal_dbm.map(|s| s > -40.0).unwrap_or(false))
        .map(|d| SuspiciousActivity {
            session_id: d.session_id.clone(),
            activity_type: ActivityType::DeauthAttack,
            severity: Severity::Medium,
            target_bssid: Some(d.bssid.clone()),
            target_ssid: Some(d.ssid.clone()),
            evidence: json!({"signal_dbm": d.signal_dbm, "station_count": d.station_count}),
            detected_at: Utc::now().to_rfc3339(),
            latitude: d.gps.map(|g| g.lat),
            longitude: d.gps.map(|g| g.lon),
            analyst_flag: false,
        })
        .collect()
}

/// Run every heuristic over a Wi-Fi batch, returning every finding.
pub fn evaluate_wifi_batch(detections: &[WifiDetection]) -> Vec<SuspiciousActivity> {
    let mut findings = hidden_ssid(detections);
    findings.extend(evil_twin(detections));
    findings.extend(deauth_attack(detections));
    findings
}

#[cfg(test)]
mod tests {
    use super::*;

    fn det(bssid: &str, ssid: &str) -> WifiDetection {
        WifiDetection::new("adhoc", bssid, "2024-01-01T00:00:00Z").unwrap().with_ssid(ssid)
    }

    trait TestExt {
        fn with_ssid(self, ssid: &str) -> Self;
    }
    impl TestExt for WifiDetection {
        fn with_ssid(mut self, ssid: &str) -> Self {
            self.ssid = ssid.to_string();
            self
        }
    }

    #[test]
    fn flags_hidden_ssid() {
        let findings = evaluate_wifi_batch(&[det("AA:BB:CC:DD:EE:01", "")]);
        assert_eq!(findings.len(), 1);
        assert_eq!(findings[0].activity_type, ActivityType::HiddenSsid);
    }

    #[test]
    fn flags_evil_twin_on_differing_encryption() {
        let mut a = det("AA:BB:CC:DD:EE:01", "FreeWifi");
        a.encryption = Some("WPA2".to_string());
        let mut b = det("AA:BB:CC:DD:EE:02", "FreeWifi");
        b.encryption = Some("OPEN".to_string());
        let findings = evaluate_wifi_batch(&[a, b]);
        assert_eq!(findings.iter().filter(|f| f.activity_type == ActivityType::EvilTwin).count(), 2);
    }

    #[test]
    fn does_not_flag_same_ssid_single_bssid() {
        let a = det("AA:BB:CC:DD:EE:01", "Home");
        let findings = evaluate_wifi_batch(&[a]);
        assert!(findings.iter().all(|f| f.activity_type != ActivityType::EvilTwin));
    }

    #[test]
    fn flags_deauth_heuristic() {
        let mut a = det("AA:BB:CC:DD:EE:01", "Home");
        a.station_count = Some(0);
        a.signal_dbm = Some(-30.0);
        let findings = evaluate_wifi_batch(&[a]);
        assert!(findings.iter().any(|f| f.activity_type == ActivityType::DeauthAttack));
    }
}
