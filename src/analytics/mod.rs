//! Analytics engine (C9): fingerprinting, security heuristics, AP
//! localization (Kalman + DBSCAN + weighted centroid), daily aggregation,
//! and route suggestion. Grounded in `original_source/advanced_analytics.py`
//! and `original_source/advanced_localization.py`.

pub mod aggregation;
pub mod fingerprint;
pub mod localization;
pub mod route;
pub mod security;
