//! `GET/POST /dashboard-settings` (§4.11): widget layout and theme for the
//! appliance's single dashboard.

use axum::extract::State;
use axum::Json;

use crate::auth::AuthenticatedUser;
use crate::error::PiwError;
use crate::models::record::DashboardSettings;
use crate::persistence::queries;
use crate::AppState;

const DASHBOARD_USER_ID: &str = "default";

pub async fn get_dashboard_settings(State(state): State<AppState>, _auth: AuthenticatedUser) -> Result<Json<DashboardSettings>, PiwError> {
    let conn = state.pool.get_reader().await;
    Ok(Json(state.query_metrics.timed("get_dashboard_settings", || queries::get_dashboard_settings(&conn, DASHBOARD_USER_ID))?))
}

pub async fn put_dashboard_settings(
    State(state): State<AppState>,
    _auth: AuthenticatedUser,
    Json(settings): Json<DashboardSettings>,
) -> Result<Json<DashboardSettings>, PiwError> {
    let conn = state.pool.get_writer().await;
    state.query_metrics.timed("put_dashboard_settings", || queries::put_dashboard_settings(&conn, DASHBOARD_USER_ID, &settings))?;
    Ok(Json(settings))
}
