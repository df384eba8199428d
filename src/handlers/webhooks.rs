//! `GET/POST /webhooks` (§4.11): list or replace the configured notification
//! webhook URLs, stored on the live config (§6's `notification_webhooks`).

use axum::extract::State;
use axum::Json;
use serde::{Deserialize, Serialize};

use crate::auth::AuthenticatedUser;
use crate::AppState;

#[derive(Debug, Serialize, Deserialize)]
pub struct Webhooks {
    pub urls: Vec<String>,
}

pub async fn list_webhooks(State(state): State<AppState>, _auth: AuthenticatedUser) -> Json<Webhooks> {
    let config = state.config.lock().await;
    Json(Webhooks { urls: config.notification_webhooks.clone() })
}

pub async fn replace_webhooks(
    State(state): State<AppState>,
    _auth: AuthenticatedUser,
    Json(body): Json<Webhooks>,
) -> Json<Webhooks> {
    let mut config = state.config.lock().await;
    config.notification_webhooks = body.urls.clone();
    Json(body)
}
