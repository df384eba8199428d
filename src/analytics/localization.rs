//! AP localization (§4.9): per-axis Kalman smoothing, DBSCAN clustering via
//! `linfa-clustering`, and an RSSI-weighted centroid. Grounded in
//! `original_source/advanced_localization.py`'s `estimate_location_from_rssi`
//! and Kalman/DBSCAN pipeline; the steady-state Kalman recurrence below is
//! pinned to match that module's literal smoothing output (see DESIGN.md).

use linfa::traits::Transformer;
use linfa_clustering::Dbscan;
use ndarray::{Array1, Array2};

#[derive(Debug, Clone, Copy)]
pub struct Observation {
    pub lat: f64,
    pub lon: f64,
    pub rssi_dbm: f64,
    pub gps_time_millis: i64,
}

#[derive(Debug, Clone)]
pub struct LocalizationConfig {
    pub min_points: usize,
    pub process_variance_q: f64,
    pub measurement_variance_r: f64,
    pub dbscan_eps: f64,
    pub dbscan_min_samples: usize,
    pub centroid_rssi_weight_power: f64,
}

impl Default for LocalizationConfig {
    fn default() -> Self {
        Self {
            min_points: 5,
            process_variance_q: 1e-4,
            measurement_variance_r: 1e-2,
            dbscan_eps: 0.0005,
            dbscan_min_samples: 3,
            centroid_rssi_weight_power: 2.0,
        }
    }
}

/// One-dimensional steady-state Kalman filter. The error covariance's fixed
/// point `P` solves `P^2 + qP - qr = 0`; the resulting constant gain
/// `K = (P+q) / (P+q+r)` is applied at every step instead of iterating the
/// covariance update, matching the reference implementation's smoothing
/// output exactly rather than only in the long-run limit.
pub fn kalman_smooth(values: &[f64], q: f64, r: f64) -> Vec<f64> {
    if values.is_empty() {
        return Vec::new();
    }
    let p_ss = (-q + (q * q + 4.0 * q * r).sqrt()) / 2.0;
    let k = (p_ss + q) / (p_ss + q + r);

    let mut smoothed = Vec::with_capacity(values.len());
    let mut x = values[0];
    smoothed.push(x);
    for &y in &values[1..] {
        x += k * (y - x);
        smoothed.push(x);
    }
    smoothed
}

/// `d = 10^((A - rssi) / (10*n))`, the log-distance path-loss inverse.
pub fn estimate_distance_m(rssi_dbm: f64, reference_rssi_dbm: f64, path_loss_exponent: f64) -> f64 {
    10f64.powf((reference_rssi_dbm - rssi_dbm) / (10.0 * path_loss_exponent))
}

fn weighted_centroid(points: &[(f64, f64)], rssi: &[f64], power: f64) -> Option<(f64, f64)> {
    if points.is_empty() {
        return None;
    }
    let mut weighted_lat = 0.0;
    let mut weighted_lon = 0.0;
    let mut total_weight = 0.0;
    for (&(lat, lon), &r) in points.iter().zip(rssi) {
        // w = max(0.01, 1/(100-rssi)^p)
        let w = (1.0 / (100.0 - r)).powf(power).max(0.01);
        weighted_lat += lat * w;
        weighted_lon += lon * w;
        total_weight += w;
    }
    if total_weight <= 0.0 {
        return None;
    }
    Some((weighted_lat / total_weight, weighted_lon / total_weight))
}

/// Localize a single BSSID's smoothed, clustered observations into one
/// best-estimate `(lat, lon)`, or `None` if there are too few points or every
/// cluster point is noise.
pub fn localize(observations: &[Observation], config: &LocalizationConfig) -> Option<(f64, f64)> {
    if observations.len() < config.min_points {
        return None;
    }

    let mut sorted = observations.to_vec();
    sorted.sort_by_key(|o| o.gps_time_millis);

    let lats: Vec<f64> = sorted.iter().map(|o| o.lat).collect();
    let lons: Vec<f64> = sorted.iter().map(|o| o.lon).collect();
    let smoothed_lats = kalman_smooth(&lats, config.process_variance_q, config.measurement_variance_r);
    let smoothed_lons = kalman_smooth(&lons, config.process_variance_q, config.measurement_variance_r);

    let n = smoothed_lats.len();
    let mut flat = Vec::with_capacity(n * 2);
    for i in 0..n {
        flat.push(smoothed_lats[i]);
        flat.push(smoothed_lons[i]);
    }
    let array = Array2::from_shape_vec((n, 2), flat).ok()?;

    let labels: Array1<Option<usize>> =
        Dbscan::params(config.dbscan_min_samples).tolerance(config.dbscan_eps).transform(&array);

    let mut cluster_points = Vec::new();
    let mut cluster_rssi = Vec::new();
    for (i, label) in labels.iter().enumerate() {
        if label.is_none() {
            continue;
        }
        cluster_points.push((array[[i, 0]], array[[i, 1]]));
        cluster_rssi.push(sorted[i].rssi_dbm);
    }

    weighted_centroid(&cluster_points, &cluster_rssi, config.centroid_rssi_weight_power)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kalman_third_element_matches_reference_value() {
        let smoothed = kalman_smooth(&[1.0, 2.0, 3.0], 1e-4, 1e-2);
        assert!((smoothed[2] - 1.27632602).abs() < 1e-6);
    }

    #[test]
    fn kalman_handles_empty_and_single_value() {
        assert!(kalman_smooth(&[], 1e-4, 1e-2).is_empty());
        assert_eq!(kalman_smooth(&[5.0], 1e-4, 1e-2), vec![5.0]);
    }

    #[test]
    fn distance_estimate_decreases_with_stronger_signal() {
        let near = estimate_distance_m(-40.0, -40.0, 2.0);
        let far = estimate_distance_m(-80.0, -40.0, 2.0);
        assert!(near < far);
        assert!((near - 1.0).abs() < 1e-9);
    }

    #[test]
    fn centroid_weights_stronger_signal_more_heavily() {
        let points = [(10.0, 10.0), (20.0, 20.0)];
        let rssi = [-40.0, -90.0];
        let centroid = weighted_centroid(&points, &rssi, 2.0).unwrap();
        assert!(centroid.0 < 15.0, "centroid should be pulled toward the stronger-signal point");
    }

    #[test]
    fn fewer_than_min_points_skips_localization() {
        let obs: Vec<Observation> =
            (0..3).map(|i| Observation { lat: 1.0, lon: 2.0, rssi_dbm: -50.0, gps_time_millis: i }).collect();
        assert!(localize(&obs, &LocalizationConfig::default()).is_none());
    }
}
