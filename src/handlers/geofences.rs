//! `GET/POST/PUT/DELETE /geofences[/name]` (§4.11): CRUD over geofences.
//! Names containing path separators are rejected (§4.11 path-safety note).

use axum::extract::{Path, State};
use axum::Json;

use crate::auth::AuthenticatedUser;
use crate::error::PiwError;
use crate::models::record::Geofence;
use crate::persistence::queries;
use crate::AppState;

fn validate_name(name: &str) -> Result<(), PiwError> {
    if name.contains('/') || name.contains('\\') || name.is_empty() {
        return Err(PiwError::Validation(format!("invalid geofence name '{name}'")));
    }
    Ok(())
}

pub async fn list_geofences(State(state): State<AppState>, _auth: AuthenticatedUser) -> Result<Json<Vec<Geofence>>, PiwError> {
    let conn = state.pool.get_reader().await;
    Ok(Json(state.query_metrics.timed("list_geofences", || queries::list_geofences(&conn))?))
}

pub async fn create_geofence(
    State(state): State<AppState>,
    _auth: AuthenticatedUser,
    Json(fence): Json<Geofence>,
) -> Result<Json<Geofence>, PiwError> {
    validate_name(&fence.name)?;
    let conn = state.pool.get_writer().await;
    state.query_metrics.timed("create_geofence", || queries::create_geofence(&conn, &fence))?;
    Ok(Json(fence))
}

pub async fn update_geofence(
    State(state): State<AppState>,
    _auth: AuthenticatedUser,
    Path(name): Path<String>,
    Json(mut fence): Json<Geofence>,
) -> Result<Json<Geofence>, PiwError> {
    validate_name(&name)?;
    fence.name = name.clone();
    let conn = state.pool.get_writer().await;
    state.query_metrics.timed("delete_geofence", || queries::delete_geofence(&conn, &name)).ok();
    state.query_metrics.timed("create_geofence", || queries::create_geofence(&conn, &fence))?;
    Ok(Json(fence))
}

pub async fn delete_geofence(
    State(state): State<AppState>,
    _auth: AuthenticatedUser,
    Path(name): Path<String>,
) -> Result<(), PiwError> {
    validate_name(&name)?;
    let conn = state.pool.get_writer().await;
    state.query_metrics.timed("delete_geofence", || queries::delete_geofence(&conn, &name))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_names_with_path_separators() {
        assert!(validate_name("../etc").is_err());
        assert!(validate_name("home").is_ok());
    }
}
