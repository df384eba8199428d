//! Network fingerprinting (§4.9): a canonical-JSON (sorted keys) SHA-256
//! hash over a fixed characteristic allowlist, plus the ordered
//! classification/risk rules.

use std::collections::BTreeMap;

use chrono::Utc;
use serde_json::Value;
use sha2::{Digest, Sha256};

use crate::models::record::{Classification, NetworkFingerprint, RiskLevel, WifiDetection};

const ENTERPRISE_VENDOR_PREFIXES: &[&str] = &["Cisco", "Aruba", "Ruckus", "Ubiquiti", "Juniper", "Extreme Networks"];

/// Build the non-null characteristic map for a Wi-Fi record (§4.9's fixed set).
pub fn characteristics(detection: &WifiDetection) -> BTreeMap<&'static str, Value> {
    let mut map = BTreeMap::new();
    let mut put = |key: &'static str, value: Option<Value>| {
        if let Some(v) = value {
            map.insert(key, v);
        }
    };

    put("vendor", detection.vendor.clone().map(Value::String));
    put("encryption", detection.encryption.clone().map(Value::String));
    put("cipher_suite", detection.cipher_suite.clone().map(Value::String));
    put("beacon_interval", detection.beacon_interval.map(Value::from));
    put("ht_caps", detection.ht_caps.clone().map(Value::String));
    put("vht_caps", detection.vht_caps.clone().map(Value::String));
    put("he_caps", detection.he_caps.clone().map(Value::String));
    put("country", detection.country.clone().map(Value::String));
    put("channel", detection.channel.map(Value::from));
    put("frequency_mhz", detection.frequency_mhz.and_then(serde_json::Number::from_f64).map(Value::Number));
    put("tx_power_dbm", detection.tx_power_dbm.and_then(serde_json::Number::from_f64).map(Value::Number));
    put("device_type", detection.device_type.clone().map(Value::String));

    map
}

/// SHA-256 over the canonical (sorted-key) JSON serialization of the
/// characteristic map. `BTreeMap`'s iteration order is already sorted, and
/// `serde_json` preserves map insertion order on serialization, so the JSON
/// text is deterministic across equal maps.
pub fn content_hash(characteristics: &BTreeMap<&'static str, Value>) -> String {
    use std::fmt::Write;
    let canonical = serde_json::to_string(characteristics).expect("characteristic map always serializes");
    let digest = Sha256::digest(canonical.as_bytes());
    let mut out = String::with_capacity(digest.len() * 2);
    for byte in digest {
        let _ = write!(out, "{byte:02x}");
    }
    out
}

fn classify(detection: &WifiDetection, characteristic_count: usize) -> (Classification, RiskLevel) {
    let encryption = detection.encryption.as_deref().unwrap_or("").trim();
    let is_open = encryption.is_empty() || encryption.eq_ignore_ascii_case("OPEN");

    let (classification, mut risk) = if is_open {
        (Classification::Public, RiskLevel::Medium)
    } else if detection
        .vendor
        .as_deref()
        .map(|v| ENTERPRISE_VENDOR_PREFIXES.iter().any(|p| v.contains(p)))
        .unwrap_or(false)
    {
        (Classification::Business, RiskLevel::Low)
    } else {
        (Classification::Home, RiskLevel::Low)
    };

    if encryption.to_ascii_uppercase().contains("WEP") {
        risk = RiskLevel::High;
    }

    let _ = characteristic_count;
    (classification, risk)
}

/// Fingerprint a Wi-Fi detection: hash, classification, risk, confidence.
pub fn fingerprint_wifi(detection: &WifiDetection) -> NetworkFingerprint {
    let chars = characteristics(detection);
    let hash = content_hash(&chars);
    let (classification, risk_level) = classify(detection, chars.len());
    let confidence = (chars.len() as f64 / 10.0).min(1.0);

    NetworkFingerprint {
        bssid: detection.bssid.clone(),
        ssid: detection.ssid.clone(),
        content_hash: hash,
        classification,
        risk_level,
        confidence,
        created_at: Utc::now().to_rfc3339(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn base_detection() -> WifiDetection {
        WifiDetection::new("adhoc", "AA:BB:CC:DD:EE:FF", "2024-01-01T00:00:00Z").unwrap()
    }

    #[test]
    fn identical_characteristics_yield_identical_hash() {
        let mut a = base_detection();
        a.vendor = Some("Cisco".to_string());
        a.encryption = Some("WPA2".to_string());
        let mut b = base_detection();
        b.bssid = "11:22:33:44:55:66".to_string();
        b.vendor = Some("Cisco".to_string());
        b.encryption = Some("WPA2".to_string());

        let fp_a = fingerprint_wifi(&a);
        let fp_b = fingerprint_wifi(&b);
        assert_eq!(fp_a.content_hash, fp_b.content_hash);
    }

    #[test]
    fn open_encryption_classifies_public_medium() {
        let mut det = base_detection();
        det.encryption = Some("".to_string());
        let fp = fingerprint_wifi(&det);
        assert_eq!(fp.classification, Classification::Public);
        assert_eq!(fp.risk_level, RiskLevel::Medium);
    }

    #[test]
    fn enterprise_vendor_classifies_business_low() {
        let mut det = base_detection();
        det.encryption = Some("WPA2".to_string());
        det.vendor = Some("Cisco Systems".to_string());
        let fp = fingerprint_wifi(&det);
        assert_eq!(fp.classification, Classification::Business);
        assert_eq!(fp.risk_level, RiskLevel::Low);
    }

    #[test]
    fn wep_raises_risk_to_high_regardless_of_classification() {
        let mut det = base_detection();
        det.encryption = Some("WEP".to_string());
        det.vendor = Some("Cisco Systems".to_string());
        let fp = fingerprint_wifi(&det);
        assert_eq!(fp.risk_level, RiskLevel::High);
    }

    #[test]
    fn confidence_caps_at_one() {
        let mut det = base_detection();
        det.vendor = Some("Cisco".to_string());
        det.encryption = Some("WPA2".to_string());
        det.cipher_suite = Some("AES".to_string());
        det.beacon_interval = Some(100);
        det.ht_caps = Some("x".to_string());
        det.vht_caps = Some("x".to_string());
        det.he_caps = Some("x".to_string());
        det.country = Some("US".to_string());
        det.channel = Some(6);
        det.frequency_mhz = Some(2437.0);
        det.tx_power_dbm = Some(20.0);
        det.device_type = Some("router".to_string());
        let fp = fingerprint_wifi(&det);
        assert_eq!(fp.confidence, 1.0);
    }
}
