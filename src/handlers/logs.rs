//! `GET /logs?lines=&path=` (§4.11): tail an allow-listed log file.

use std::path::{Path, PathBuf};

use axum::extract::{Query, State};
use axum::Json;
use serde::Deserialize;

use crate::error::PiwError;
use crate::AppState;

#[derive(Debug, Deserialize)]
pub struct LogsQuery {
    #[serde(default = "default_lines")]
    pub lines: usize,
    pub path: Option<String>,
}

fn default_lines() -> usize {
    200
}

fn is_allowed(requested: &Path, allowlist: &[PathBuf]) -> bool {
    allowlist.iter().any(|allowed| requested == allowed)
}

pub async fn logs(State(state): State<AppState>, Query(query): Query<LogsQuery>) -> Result<Json<Vec<String>>, PiwError> {
    let target = match &query.path {
        Some(p) => PathBuf::from(p),
        None => state.log_allowlist.first().cloned().ok_or_else(|| PiwError::Validation("no log path configured".into()))?,
    };

    if !is_allowed(&target, &state.log_allowlist) {
        return Err(PiwError::Validation(format!("path '{}' is not allow-listed", target.display())));
    }

    let contents = tokio::fs::read_to_string(&target).await.map_err(|e| PiwError::Config(e.to_string()))?;
    let tail: Vec<String> = contents.lines().rev().take(query.lines.max(1)).map(str::to_string).collect();
    Ok(Json(tail.into_iter().rev().collect()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_paths_outside_the_allowlist() {
        let allowlist = vec![PathBuf::from("/var/log/piwardrive/app.log")];
        assert!(!is_allowed(Path::new("/etc/passwd"), &allowlist));
        assert!(is_allowed(Path::new("/var/log/piwardrive/app.log"), &allowlist));
    }
}
