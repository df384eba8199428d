//! `GET /service/{name}`, `POST /service/{name}/{action}` (§4.11), ported from
//! `original_source/scripts/watch_service.py`'s `run_service_cmd` (shells out
//! to `systemctl`), restricted to an allow-listed set of names and actions.

use axum::extract::{Path, State};
use axum::Json;
use serde::Serialize;
use tokio::process::Command;

use crate::auth::AuthenticatedUser;
use crate::error::PiwError;
use crate::AppState;

const ALLOWED_ACTIONS: &[&str] = &["start", "stop", "restart"];

fn validate_service(name: &str, allowlist: &[String]) -> Result<(), PiwError> {
    if !allowlist.iter().any(|allowed| allowed == name) {
        return Err(PiwError::Validation(format!("service '{name}' is not allow-listed")));
    }
    Ok(())
}

#[derive(Debug, Serialize)]
pub struct ServiceStatus {
    pub active: bool,
}

pub async fn service_status(
    State(state): State<AppState>,
    _auth: AuthenticatedUser,
    Path(name): Path<String>,
) -> Result<Json<ServiceStatus>, PiwError> {
    validate_service(&name, &state.service_allowlist)?;
    let output = Command::new("systemctl")
        .args(["is-active", &format!("{name}.service")])
        .output()
        .await
        .map_err(|e| PiwError::Config(e.to_string()))?;
    Ok(Json(ServiceStatus { active: output.status.success() }))
}

#[derive(Debug, Serialize)]
pub struct ServiceActionResult {
    pub ok: bool,
    pub message: String,
}

pub async fn service_action(
    State(state): State<AppState>,
    _auth: AuthenticatedUser,
    Path((name, action)): Path<(String, String)>,
) -> Result<Json<ServiceActionResult>, PiwError> {
    validate_service(&name, &state.service_allowlist)?;
    if !ALLOWED_ACTIONS.contains(&action.as_str()) {
        return Err(PiwError::Validation(format!("action '{action}' is not allow-listed")));
    }
    let output = Command::new("systemctl")
        .args([action.as_str(), &format!("{name}.service")])
        .output()
        .await
        .map_err(|e| PiwError::Config(e.to_string()))?;
    Ok(Json(ServiceActionResult {
        ok: output.status.success(),
        message: String::from_utf8_lossy(&output.stderr).trim().to_string(),
    }))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_services_outside_the_allowlist() {
        let allowlist = vec!["piwardrive".to_string()];
        assert!(validate_service("sshd", &allowlist).is_err());
        assert!(validate_service("piwardrive", &allowlist).is_ok());
    }
}
