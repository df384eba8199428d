//! Daily per-BSSID aggregation (§4.9, §3): detection counts, signal
//! statistics, coverage radius, mobility score, change counts, and
//! suspicious score, recomputed per bucket and upserted by (BSSID, date).

use std::collections::HashSet;

use crate::models::record::NetworkAnalyticsRow;

/// A single day's raw sighting used as aggregation input; one row per
/// detection of a given BSSID on the target day.
#[derive(Debug, Clone)]
pub struct DailySighting {
    pub signal_dbm: Option<f64>,
    pub lat: Option<f64>,
    pub lon: Option<f64>,
    pub encryption: Option<String>,
    pub ssid: Option<String>,
    pub channel: Option<i64>,
}

const EARTH_RADIUS_M: f64 = 6_371_000.0;

fn haversine_m(a: (f64, f64), b: (f64, f64)) -> f64 {
    let (lat1, lon1) = (a.0.to_radians(), a.1.to_radians());
    let (lat2, lon2) = (b.0.to_radians(), b.1.to_radians());
    let dlat = lat2 - lat1;
    let dlon = lon2 - lon1;
    let h = (dlat / 2.0).sin().powi(2) + lat1.cos() * lat2.cos() * (dlon / 2.0).sin().powi(2);
    2.0 * EARTH_RADIUS_M * h.sqrt().asin()
}

fn centroid(points: &[(f64, f64)]) -> (f64, f64) {
    let n = points.len() as f64;
    let (sum_lat, sum_lon) = points.iter().fold((0.0, 0.0), |(a, b), p| (a + p.0, b + p.1));
    (sum_lat / n, sum_lon / n)
}

/// Aggregate one BSSID's sightings for a single day, plus the count of
/// suspicious findings attributed to it that day, into a `network_analytics` row.
pub fn aggregate_bssid_day(bssid: &str, date: &str, sightings: &[DailySighting], suspicious_findings: usize) -> NetworkAnalyticsRow {
    let detection_count = sightings.len() as i64;

    let locations: Vec<(f64, f64)> = sightings.iter().filter_map(|s| Some((s.lat?, s.lon?))).collect();
    let unique_locations = locations
        .iter()
        .map(|(lat, lon)| (format!("{lat:.4}"), format!("{lon:.4}")))
        .collect::<HashSet<_>>()
        .len() as i64;

    let signals: Vec<f64> = sightings.iter().filter_map(|s| s.signal_dbm).collect();
    let (signal_min, signal_max, signal_mean, signal_variance) = if signals.is_empty() {
        (None, None, None, None)
    } else {
        let min = signals.iter().cloned().fold(f64::INFINITY, f64::min);
        let max = signals.iter().cloned().fold(f64::NEG_INFINITY, f64::max);
        let mean = signals.iter().sum::<f64>() / signals.len() as f64;
        let variance = signals.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / signals.len() as f64;
        (Some(min), Some(max), Some(mean), Some(variance))
    };

    let coverage_radius_m = if locations.len() >= 2 {
        let center = centroid(&locations);
        locations.iter().map(|p| haversine_m(center, *p)).fold(0.0, f64::max).into()
    } else {
        None
    };

    let mobility_score = if detection_count > 0 {
        (unique_locations as f64 / detection_count as f64).min(1.0)
    } else {
        0.0
    };

    let encryption_changes = sightings.iter().filter_map(|s| s.encryption.as_deref()).collect::<HashSet<_>>().len() as i64;
    let ssid_changes = sightings.iter().filter_map(|s| s.ssid.as_deref()).collect::<HashSet<_>>().len() as i64;
    let channel_changes = sightings.iter().filter_map(|s| s.channel).collect::<HashSet<_>>().len() as i64;

    let suspicious_score = if detection_count > 0 {
        (suspicious_findings as f64 / detection_count as f64).min(1.0)
    } else {
        0.0
    };

    NetworkAnalyticsRow {
        bssid: bssid.to_string(),
        date: date.to_string(),
        detection_count,
        unique_locations,
        signal_min,
        signal_max,
        signal_mean,
        signal_variance,
        coverage_radius_m,
        mobility_score,
        encryption_changes,
        ssid_changes,
        channel_changes,
        suspicious_score,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sighting(lat: f64, lon: f64, signal: f64) -> DailySighting {
        DailySighting {
            signal_dbm: Some(signal),
            lat: Some(lat),
            lon: Some(lon),
            encryption: Some("WPA2".to_string()),
            ssid: Some("Home".to_string()),
            channel: Some(6),
        }
    }

    #[test]
    fn unique_locations_never_exceeds_total_detections() {
        let sightings = vec![sighting(1.0, 1.0, -50.0); 5];
        let row = aggregate_bssid_day("AA:BB:CC:DD:EE:FF", "2024-01-01", &sightings, 0);
        assert!(row.unique_locations <= row.detection_count);
        assert_eq!(row.unique_locations, 1);
    }

    #[test]
    fn suspicious_score_capped_at_one() {
        let sightings = vec![sighting(1.0, 1.0, -50.0); 3];
        let row = aggregate_bssid_day("AA:BB:CC:DD:EE:FF", "2024-01-01", &sightings, 10);
        assert_eq!(row.suspicious_score, 1.0);
    }

    #[test]
    fn coverage_radius_is_max_distance_from_centroid() {
        let sightings = vec![sighting(0.0, 0.0, -50.0), sighting(0.0, 0.001, -50.0)];
        let row = aggregate_bssid_day("AA:BB:CC:DD:EE:FF", "2024-01-01", &sightings, 0);
        assert!(row.coverage_radius_m.unwrap() > 0.0);
    }

    #[test]
    fn empty_signals_yield_none_statistics() {
        let sightings = vec![DailySighting { signal_dbm: None, lat: None, lon: None, encryption: None, ssid: None, channel: None }];
        let row = aggregate_bssid_day("AA:BB:CC:DD:EE:FF", "2024-01-01", &sightings, 0);
        assert!(row.signal_min.is_none());
        assert_eq!(row.coverage_radius_m, None);
    }
}
