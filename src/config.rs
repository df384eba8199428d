//! Application configuration (§6): a TOML file at a platform config
//! directory, overridden by environment variables, following the teacher's
//! nested-`Deserialize`-with-defaults shape.

use std::collections::HashMap;
use std::path::Path;

use serde::{Deserialize, Serialize};

fn default_true() -> bool {
    true
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScanRule {
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default)]
    pub window_start_hour: u32,
    #[serde(default = "default_window_end")]
    pub window_end_hour: u32,
    #[serde(default = "default_all_weekdays")]
    pub allowed_weekdays: Vec<u32>,
}

fn default_window_end() -> u32 {
    24
}

fn default_all_weekdays() -> Vec<u32> {
    vec![0, 1, 2, 3, 4, 5, 6]
}

impl Default for ScanRule {
    fn default() -> Self {
        Self { enabled: true, window_start_hour: 0, window_end_hour: default_window_end(), allowed_weekdays: default_all_weekdays() }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct ScanRulesConfig {
    #[serde(default)]
    pub wifi: ScanRule,
    #[serde(default)]
    pub bluetooth: ScanRule,
    #[serde(default)]
    pub cellular: ScanRule,
}

/// Top-level config loaded from `piwardrive.toml`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    #[serde(default = "default_poll_aps")]
    pub map_poll_aps: u64,
    #[serde(default = "default_poll_bt")]
    pub map_poll_bt: u64,
    #[serde(default = "default_poll_gps")]
    pub map_poll_gps: u64,
    #[serde(default = "default_poll_gps_max")]
    pub map_poll_gps_max: u64,
    #[serde(default = "default_health_poll_interval")]
    pub health_poll_interval: u64,

    #[serde(default = "default_log_rotate_interval")]
    pub log_rotate_interval: u64,
    #[serde(default = "default_log_rotate_archives")]
    pub log_rotate_archives: u32,
    #[serde(default = "default_true")]
    pub cleanup_rotated_logs: bool,

    #[serde(default)]
    pub map_use_offline: bool,
    #[serde(default)]
    pub offline_tile_path: Option<String>,
    #[serde(default)]
    pub map_auto_prefetch: bool,

    #[serde(default)]
    pub map_cluster_aps: bool,
    #[serde(default = "default_cluster_capacity")]
    pub map_cluster_capacity: u32,

    #[serde(default = "default_tile_maintenance_interval")]
    pub tile_maintenance_interval: u64,
    #[serde(default = "default_route_prefetch_interval")]
    pub route_prefetch_interval: u64,

    #[serde(default)]
    pub remote_sync_url: Option<String>,
    #[serde(default)]
    pub remote_sync_token: Option<String>,
    #[serde(default = "default_remote_sync_timeout")]
    pub remote_sync_timeout: u64,
    #[serde(default = "default_remote_sync_retries")]
    pub remote_sync_retries: u32,

    #[serde(default)]
    pub notification_webhooks: Vec<String>,

    #[serde(default)]
    pub scan_rules: ScanRulesConfig,

    #[serde(default = "default_reports_dir")]
    pub reports_dir: String,

    /// Unrecognized keys, preserved so a POST can be rejected with a 400
    /// naming the offending key rather than silently dropped.
    #[serde(flatten)]
    pub extra: HashMap<String, serde_json::Value>,
}

fn default_poll_aps() -> u64 {
    10
}
fn default_poll_bt() -> u64 {
    15
}
fn default_poll_gps() -> u64 {
    1
}
fn default_poll_gps_max() -> u64 {
    30
}
fn default_health_poll_interval() -> u64 {
    10
}
fn default_log_rotate_interval() -> u64 {
    86_400
}
fn default_log_rotate_archives() -> u32 {
    7
}
fn default_cluster_capacity() -> u32 {
    8
}
fn default_tile_maintenance_interval() -> u64 {
    3_600
}
fn default_route_prefetch_interval() -> u64 {
    300
}
fn default_remote_sync_timeout() -> u64 {
    30
}
fn default_remote_sync_retries() -> u32 {
    3
}
fn default_reports_dir() -> String {
    "./reports".to_string()
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            map_poll_aps: default_poll_aps(),
            map_poll_bt: default_poll_bt(),
            map_poll_gps: default_poll_gps(),
            map_poll_gps_max: default_poll_gps_max(),
            health_poll_interval: default_health_poll_interval(),
            log_rotate_interval: default_log_rotate_interval(),
            log_rotate_archives: default_log_rotate_archives(),
            cleanup_rotated_logs: true,
            map_use_offline: false,
            offline_tile_path: None,
            map_auto_prefetch: false,
            map_cluster_aps: false,
            map_cluster_capacity: default_cluster_capacity(),
            tile_maintenance_interval: default_tile_maintenance_interval(),
            route_prefetch_interval: default_route_prefetch_interval(),
            remote_sync_url: None,
            remote_sync_token: None,
            remote_sync_timeout: default_remote_sync_timeout(),
            remote_sync_retries: default_remote_sync_retries(),
            notification_webhooks: Vec::new(),
            scan_rules: ScanRulesConfig::default(),
            reports_dir: default_reports_dir(),
            extra: HashMap::new(),
        }
    }
}

/// Environment variables consulted on top of the TOML file; process-boundary
/// values that don't belong in the declarative document (paths, secrets).
#[derive(Debug, Clone, Default)]
pub struct EnvOverrides {
    pub db_path: Option<String>,
    pub gpsd_host: Option<String>,
    pub gpsd_port: Option<u16>,
    pub api_user: Option<String>,
    pub api_password_hash: Option<String>,
    pub cors_origins: Option<String>,
    pub webui_dist: Option<String>,
    pub sigint_export_dir: Option<String>,
    pub sigint_oui_path: Option<String>,
}

impl EnvOverrides {
    pub fn from_env() -> Self {
        Self {
            db_path: std::env::var("PW_DB_PATH").ok(),
            gpsd_host: std::env::var("PW_GPSD_HOST").ok(),
            gpsd_port: std::env::var("PW_GPSD_PORT").ok().and_then(|p| p.parse().ok()),
            api_user: std::env::var("PW_API_USER").ok(),
            api_password_hash: std::env::var("PW_API_PASSWORD_HASH").ok(),
            cors_origins: std::env::var("PW_CORS_ORIGINS").ok(),
            webui_dist: std::env::var("PW_WEBUI_DIST").ok(),
            sigint_export_dir: std::env::var("SIGINT_EXPORT_DIR").ok(),
            sigint_oui_path: std::env::var("SIGINT_OUI_PATH").ok(),
        }
    }
}

/// Load config from `path`, falling back to defaults if the file is absent.
pub fn load(path: impl AsRef<Path>) -> anyhow::Result<AppConfig> {
    let path = path.as_ref();
    if !path.exists() {
        tracing::info!("config file not found at {}, using defaults", path.display());
        return Ok(AppConfig::default());
    }
    let raw = std::fs::read_to_string(path)?;
    let config: AppConfig = toml::from_str(&raw)?;
    tracing::info!("loaded config from {}", path.display());
    Ok(config)
}

/// Merge a JSON patch into `config`, rejecting unknown top-level keys with
/// the offending key name.
pub fn merge_update(config: &AppConfig, patch: &serde_json::Value) -> Result<AppConfig, String> {
    let mut merged = serde_json::to_value(config).map_err(|e| e.to_string())?;
    let patch_obj = patch.as_object().ok_or_else(|| "config patch must be a JSON object".to_string())?;
    let known_keys: std::collections::HashSet<&str> =
        merged.as_object().map(|o| o.keys().map(String::as_str).collect()).unwrap_or_default();
    for key in patch_obj.keys() {
        if !known_keys.contains(key.as_str()) {
            return Err(format!("unknown config key: {key}"));
        }
    }
    if let Some(obj) = merged.as_object_mut() {
        for (k, v) in patch_obj {
            obj.insert(k.clone(), v.clone());
        }
    }
    serde_json::from_value(merged).map_err(|e| e.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_sane() {
        let cfg = AppConfig::default();
        assert_eq!(cfg.map_poll_aps, 10);
        assert!(cfg.scan_rules.wifi.enabled);
    }

    #[test]
    fn load_falls_back_to_defaults_when_absent() {
        let cfg = load("/nonexistent/piwardrive.toml").unwrap();
        assert_eq!(cfg.reports_dir, "./reports");
    }

    #[test]
    fn merge_update_rejects_unknown_key() {
        let cfg = AppConfig::default();
        let result = merge_update(&cfg, &serde_json::json!({"not_a_real_key": 1}));
        assert!(result.is_err());
    }

    #[test]
    fn merge_update_applies_known_key() {
        let cfg = AppConfig::default();
        let updated = merge_update(&cfg, &serde_json::json!({"map_poll_aps": 20})).unwrap();
        assert_eq!(updated.map_poll_aps, 20);
    }
}
