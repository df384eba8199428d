//! `GET/POST /config` (§4.11, §6): read or merge-update the live config.
//! Unknown top-level keys on POST are rejected with 400 (`config::merge_update`).

use axum::extract::State;
use axum::Json;
use serde_json::Value;

use crate::auth::AuthenticatedUser;
use crate::config::AppConfig;
use crate::error::PiwError;
use crate::AppState;

pub async fn get_config(State(state): State<AppState>, _auth: AuthenticatedUser) -> Json<AppConfig> {
    let config = state.config.lock().await;
    Json(config.clone())
}

pub async fn update_config(
    State(state): State<AppState>,
    _auth: AuthenticatedUser,
    Json(patch): Json<Value>,
) -> Result<Json<AppConfig>, PiwError> {
    let mut config = state.config.lock().await;
    let merged = crate::config::merge_update(&config, &patch).map_err(PiwError::Validation)?;
    *config = merged.clone();
    Ok(Json(merged))
}
