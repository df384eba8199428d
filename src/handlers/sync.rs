//! `POST /sync?limit=` (§4.11/§4.12): ship health rows inserted since the
//! last successful sync to `remote_sync_url`, advancing the persisted
//! watermark only on success.

use axum::extract::{Query, State};
use axum::Json;
use serde::{Deserialize, Serialize};

use crate::auth::AuthenticatedUser;
use crate::error::PiwError;
use crate::persistence::queries;
use crate::{remote_sync, AppState};

#[derive(Debug, Deserialize)]
pub struct SyncQuery {
    #[allow(dead_code)]
    pub limit: Option<i64>,
}

#[derive(Debug, Serialize)]
pub struct SyncResult {
    pub watermark: String,
}

pub async fn sync(
    State(state): State<AppState>,
    _auth: AuthenticatedUser,
    Query(_query): Query<SyncQuery>,
) -> Result<Json<SyncResult>, PiwError> {
    let config = state.config.lock().await;
    let url = config.remote_sync_url.clone().ok_or_else(|| PiwError::Config("remote_sync_url is not configured".into()))?;
    let token = config.remote_sync_token.clone();
    drop(config);

    let conn = state.pool.get_reader().await;
    let watermark = state.query_metrics.timed("get_sync_watermark", || queries::get_sync_watermark(&conn))?;
    drop(conn);

    let reader = state.pool.get_reader().await;
    let new_watermark =
        remote_sync::sync_new_records(&state.http_client, &reader, &url, &watermark, token.as_deref()).await?;
    drop(reader);

    let conn = state.pool.get_writer().await;
    state.query_metrics.timed("set_sync_watermark", || queries::set_sync_watermark(&conn, &new_watermark))?;

    Ok(Json(SyncResult { watermark: new_watermark }))
}
