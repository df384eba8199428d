//! MAC-prefix-to-vendor lookup (C2), grounded in `original_source/sigint_suite/enrichment/oui.py`.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, OnceLock};

fn load_oui_map(path: &Path) -> HashMap<String, String> {
    let mut mapping = HashMap::new();
    let Ok(mut reader) = csv::Reader::from_path(path) else {
        return mapping;
    };
    for record in reader.records().flatten() {
        let headers = reader.headers().cloned().unwrap_or_default();
        let assignment = field(&headers, &record, "Assignment");
        let vendor = field(&headers, &record, "Organization Name");
        let (assignment, vendor) = (assignment.trim(), vendor.trim());
        if !assignment.is_empty() && !vendor.is_empty() {
            let prefix = assignment.replace('-', ":").to_uppercase();
            mapping.insert(prefix, vendor.to_string());
        }
    }
    mapping
}

fn field(headers: &csv::StringRecord, record: &csv::StringRecord, name: &str) -> String {
    headers
        .iter()
        .position(|h| h == name)
        .and_then(|idx| record.get(idx))
        .unwrap_or("")
        .to_string()
}

struct OuiCache {
    path: PathBuf,
    map: HashMap<String, String>,
}

static CACHE: OnceLock<Mutex<OuiCache>> = OnceLock::new();

fn cache(path: &Path) -> &'static Mutex<OuiCache> {
    CACHE.get_or_init(|| {
        Mutex::new(OuiCache {
            path: path.to_path_buf(),
            map: load_oui_map(path),
        })
    })
}

/// Reload the OUI map from disk, replacing whatever was cached.
pub fn reload(path: &Path) {
    let lock = cache(path);
    let mut guard = lock.lock().unwrap();
    guard.path = path.to_path_buf();
    guard.map = load_oui_map(path);
}

/// Look up the vendor name for `bssid`'s first three octets.
pub fn lookup_vendor(path: &Path, bssid: &str) -> Option<String> {
    if bssid.is_empty() {
        return None;
    }
    let normalized = bssid.to_uppercase().replace('-', ":");
    let parts: Vec<&str> = normalized.split(':').collect();
    if parts.len() < 3 {
        return None;
    }
    let prefix = parts[..3].join(":");
    let lock = cache(path);
    let guard = lock.lock().unwrap();
    guard.map.get(&prefix).cloned()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn lookup_finds_known_prefix() {
        let dir = std::env::temp_dir().join(format!("oui_test_{}", std::process::id()));
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join("oui.csv");
        let mut f = std::fs::File::create(&path).unwrap();
        writeln!(f, "Assignment,Organization Name").unwrap();
        writeln!(f, "AA-BB-CC,Acme Radio Co").unwrap();
        drop(f);

        reload(&path);
        assert_eq!(
            lookup_vendor(&path, "aa:bb:cc:dd:ee:ff"),
            Some("Acme Radio Co".to_string())
        );
        assert_eq!(lookup_vendor(&path, ""), None);
    }
}
