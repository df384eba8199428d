//! `GET /export/aps?fmt=` (§4.11, §6): export the AP cache in one of six
//! formats via [`crate::export`]. The shapefile format needs a scratch
//! directory for its sidecar files; that scratch directory is rooted at
//! `SIGINT_EXPORT_DIR` (`AppState::sigint_export_dir`) rather than the
//! process-wide temp dir.

use axum::extract::{Query, State};
use axum::http::header;
use axum::response::{IntoResponse, Response};
use serde::Deserialize;

use crate::auth::AuthenticatedUser;
use crate::error::PiwError;
use crate::persistence::queries;
use crate::{export, AppState};

#[derive(Debug, Deserialize)]
pub struct ExportQuery {
    #[serde(default = "default_fmt")]
    pub fmt: String,
}

fn default_fmt() -> String {
    "json".to_string()
}

pub async fn export_aps(
    State(state): State<AppState>,
    _auth: AuthenticatedUser,
    Query(query): Query<ExportQuery>,
) -> Result<Response, PiwError> {
    let conn = state.pool.get_reader().await;
    let rows = state.query_metrics.timed("all_ap_cache_rows", || queries::all_ap_cache_rows(&conn))?;
    drop(conn);

    match query.fmt.as_str() {
        "json" => Ok(([(header::CONTENT_TYPE, "application/json")], export::to_json(&rows)?).into_response()),
        "csv" => Ok(([(header::CONTENT_TYPE, "text/csv")], export::to_csv(&rows)?).into_response()),
        "gpx" => Ok(([(header::CONTENT_TYPE, "application/gpx+xml")], export::to_gpx(&rows)).into_response()),
        "kml" => Ok(([(header::CONTENT_TYPE, "application/vnd.google-earth.kml+xml")], export::to_kml(&rows)).into_response()),
        "kmz" => Ok(([(header::CONTENT_TYPE, "application/vnd.google-earth.kmz")], export::to_kmz(&rows)?).into_response()),
        "geojson" => Ok(([(header::CONTENT_TYPE, "application/geo+json")], export::to_geojson(&rows)).into_response()),
        "shp" => {
            let dir = state.sigint_export_dir.join(format!("piwardrive-export-{}", uuid::Uuid::new_v4()));
            tokio::fs::create_dir_all(&dir).await.map_err(|e| PiwError::Config(e.to_string()))?;
            let dest = dir.join("ap_cache.shp");
            export::to_shapefile(&rows, &dest)?;
            let bytes = tokio::fs::read(&dest).await.map_err(|e| PiwError::Config(e.to_string()))?;
            let _ = tokio::fs::remove_dir_all(&dir).await;
            Ok(([(header::CONTENT_TYPE, "application/octet-stream")], bytes).into_response())
        }
        other => Err(PiwError::Validation(format!("unsupported export format '{other}'"))),
    }
}
