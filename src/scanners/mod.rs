//! Scan executors (C4): Wi-Fi, Bluetooth, cellular. Each shells out to an
//! external tool with a timeout, parses its stdout with a dedicated
//! line-oriented parser, and enriches the result with GPS, heading, and
//! vendor before invoking registered post-processors.

pub mod bluetooth;
pub mod cellular;
pub mod wifi;

use std::time::Duration;

/// Inputs shared by all three executor families.
#[derive(Debug, Clone)]
pub struct ScanConfig {
    pub interface: String,
    pub command_override: Option<String>,
    pub privilege_prefix: Option<String>,
    pub timeout: Duration,
}

impl Default for ScanConfig {
    fn default() -> Self {
        Self {
            interface: "wlan0".to_string(),
            command_override: None,
            privilege_prefix: Some("sudo".to_string()),
            timeout: Duration::from_secs(10),
        }
    }
}

/// Build the argument vector for launching a scan tool: optional privilege
/// prefix, then the command and its arguments.
pub fn build_argv(cmd: &str, priv_cmd: Option<&str>, rest: &[&str]) -> Vec<String> {
    let mut argv = Vec::new();
    if let Some(p) = priv_cmd {
        if !p.is_empty() {
            argv.extend(p.split_whitespace().map(str::to_string));
        }
    }
    argv.push(cmd.to_string());
    argv.extend(rest.iter().map(|s| s.to_string()));
    argv
}

/// A typed post-processing hook applied to every record of a given variant
/// after enrichment (§9: post-processing hooks become typed transforms per
/// variant, replacing the original's mapping-based hook registry).
pub type PostProcessor<T> = Box<dyn Fn(&mut T) + Send + Sync>;

#[derive(Default)]
pub struct PostProcessors<T> {
    hooks: Vec<PostProcessor<T>>,
}

impl<T> PostProcessors<T> {
    pub fn register(&mut self, hook: PostProcessor<T>) {
        self.hooks.push(hook);
    }

    pub fn apply(&self, records: &mut [T]) {
        for record in records.iter_mut() {
            for hook in &self.hooks {
                hook(record);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn build_argv_without_privilege_prefix() {
        let argv = build_argv("iwlist", None, &["wlan0", "scanning"]);
        assert_eq!(argv, vec!["iwlist", "wlan0", "scanning"]);
    }

    #[test]
    fn build_argv_with_privilege_prefix() {
        let argv = build_argv("iwlist", Some("sudo"), &["wlan0", "scanning"]);
        assert_eq!(argv, vec!["sudo", "iwlist", "wlan0", "scanning"]);
    }
}
