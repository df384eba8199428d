//! `piwardrive-kiosk`: start `piwardrive-webui` as a child process, wait for
//! it to come up, then open Chromium in kiosk mode against the dashboard
//! URL. Exits 0 on clean shutdown, non-zero if no browser is found or the
//! service process fails to start.

use std::process::{Child, Command};
use std::time::Duration;

const DEFAULT_URL: &str = "http://localhost:8080";
const STARTUP_DELAY: Duration = Duration::from_secs(2);

fn find_browser() -> Option<String> {
    for name in ["chromium-browser", "chromium", "google-chrome"] {
        if Command::new("which").arg(name).output().map(|o| o.status.success()).unwrap_or(false) {
            return Some(name.to_string());
        }
    }
    None
}

struct ServiceGuard(Child);

impl Drop for ServiceGuard {
    fn drop(&mut self) {
        let _ = self.0.kill();
        let _ = self.0.wait();
    }
}

fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt().init();

    let url = std::env::var("PW_KIOSK_URL").unwrap_or_else(|_| DEFAULT_URL.to_string());

    let child = Command::new("piwardrive-webui").spawn().map_err(|e| {
        tracing::error!("failed to start piwardrive-webui: {e}");
        e
    })?;
    let _guard = ServiceGuard(child);

    std::thread::sleep(STARTUP_DELAY);

    let Some(browser) = find_browser() else {
        tracing::error!("no Chromium-family browser found on PATH");
        std::process::exit(1);
    };

    let status = Command::new(&browser).args(["--kiosk", &url]).status()?;
    if !status.success() {
        tracing::error!("{browser} exited with {status}");
        std::process::exit(status.code().unwrap_or(1));
    }

    Ok(())
}
