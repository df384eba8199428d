//! `GET /api/widgets` (§4.11): the set of widget identifiers the dashboard
//! may place, mirroring the teacher's `dashboards::create_widget` catalog
//! but fixed rather than stored (this appliance has one dashboard).

use axum::Json;

use crate::auth::AuthenticatedUser;

const WIDGETS: &[&str] = &[
    "gps_status",
    "wifi_detections",
    "bluetooth_detections",
    "cellular_detections",
    "health_snapshot",
    "suspicious_activity",
    "coverage_map",
    "route_suggestion",
];

pub async fn list_widgets(_auth: AuthenticatedUser) -> Json<Vec<&'static str>> {
    Json(WIDGETS.to_vec())
}
