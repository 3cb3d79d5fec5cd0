//! Locating and starting Chromium with a DevTools endpoint.

use crate::error::Pptx2PdfError;
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;
use tempfile::TempDir;
use tokio::process::{Child, Command};
use tokio::time::Instant;
use tracing::{debug, info};

/// Environment variable naming the Chromium executable.
pub const CHROME_ENV: &str = "PPTX2PDF_CHROME";

/// File Chromium writes into its profile once the DevTools port is open.
const ACTIVE_PORT_FILE: &str = "DevToolsActivePort";

const STARTUP_POLL: Duration = Duration::from_millis(100);

/// A running Chromium process and its throwaway profile.
///
/// The process is killed when this value is dropped; the profile directory
/// goes with it.
#[derive(Debug)]
pub(crate) struct BrowserProcess {
    pub child: Child,
    pub devtools_port: u16,
    pub profile: TempDir,
}

/// Resolve the Chromium executable: explicit path, then `PPTX2PDF_CHROME`,
/// then well-known install locations and `PATH`.
pub fn find_chrome(explicit: Option<&Path>) -> Result<PathBuf, Pptx2PdfError> {
    if let Some(path) = explicit {
        return if path.is_file() {
            Ok(path.to_path_buf())
        } else {
            Err(Pptx2PdfError::BrowserNotFound(format!(
                "Configured browser '{}' does not exist.",
                path.display()
            )))
        };
    }

    if let Some(path) = std::env::var_os(CHROME_ENV).map(PathBuf::from) {
        if path.is_file() {
            return Ok(path);
        }
        return Err(Pptx2PdfError::BrowserNotFound(format!(
            "{CHROME_ENV}='{}' does not exist.",
            path.display()
        )));
    }

    let candidates: &[&str] = if cfg!(target_os = "macos") {
        &[
            "/Applications/Google Chrome.app/Contents/MacOS/Google Chrome",
            "/Applications/Chromium.app/Contents/MacOS/Chromium",
            "/Applications/Microsoft Edge.app/Contents/MacOS/Microsoft Edge",
        ]
    } else if cfg!(target_os = "windows") {
        &[
            r"C:\Program Files\Google\Chrome\Application\chrome.exe",
            r"C:\Program Files (x86)\Google\Chrome\Application\chrome.exe",
            r"C:\Program Files (x86)\Microsoft\Edge\Application\msedge.exe",
        ]
    } else {
        &[
            "google-chrome",
            "google-chrome-stable",
            "chromium",
            "chromium-browser",
            "chrome",
        ]
    };

    for candidate in candidates {
        let path = Path::new(candidate);
        if path.is_absolute() {
            if path.is_file() {
                return Ok(path.to_path_buf());
            }
        } else if let Some(found) = search_path(candidate) {
            return Ok(found);
        }
    }

    Err(Pptx2PdfError::BrowserNotFound(
        "Could not find a Chrome or Chromium executable.".into(),
    ))
}

fn search_path(name: &str) -> Option<PathBuf> {
    let paths = std::env::var_os("PATH")?;
    std::env::split_paths(&paths)
        .map(|dir| dir.join(name))
        .find(|p| p.is_file())
}

/// Start Chromium and wait until its DevTools port is known.
pub(crate) async fn spawn_browser(
    executable: &Path,
    headless: bool,
    startup_timeout: Duration,
) -> Result<BrowserProcess, Pptx2PdfError> {
    let profile = tempfile::Builder::new()
        .prefix("pptx2pdf-chrome-")
        .tempdir()
        .map_err(|e| Pptx2PdfError::BrowserLaunchFailed {
            reason: format!("cannot create profile directory: {e}"),
        })?;

    let mut cmd = Command::new(executable);
    cmd.arg("--remote-debugging-port=0")
        .arg(format!("--user-data-dir={}", profile.path().display()))
        .args([
            "--no-first-run",
            "--no-default-browser-check",
            "--no-sandbox",
            "--disable-extensions",
            "--disable-background-networking",
            "--disable-sync",
            "--mute-audio",
        ]);
    if headless {
        cmd.arg("--headless=new");
    }
    cmd.arg("about:blank")
        .stdin(Stdio::null())
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .kill_on_drop(true);

    info!(browser = %executable.display(), headless, "launching browser");
    let mut child = cmd.spawn().map_err(|e| Pptx2PdfError::BrowserLaunchFailed {
        reason: format!("cannot start '{}': {e}", executable.display()),
    })?;

    let port_file = profile.path().join(ACTIVE_PORT_FILE);
    let deadline = Instant::now() + startup_timeout;
    let devtools_port = loop {
        if let Ok(contents) = tokio::fs::read_to_string(&port_file).await {
            if let Some(port) = parse_active_port(&contents) {
                break port;
            }
        }
        if let Ok(Some(status)) = child.try_wait() {
            return Err(Pptx2PdfError::BrowserLaunchFailed {
                reason: format!("browser exited during startup ({status})"),
            });
        }
        if Instant::now() >= deadline {
            return Err(Pptx2PdfError::BrowserLaunchFailed {
                reason: format!(
                    "DevTools endpoint not announced within {}s",
                    startup_timeout.as_secs()
                ),
            });
        }
        tokio::time::sleep(STARTUP_POLL).await;
    };

    debug!(devtools_port, "browser DevTools endpoint open");
    Ok(BrowserProcess {
        child,
        devtools_port,
        profile,
    })
}

/// First line of `DevToolsActivePort` is the port; the second the browser path.
pub(crate) fn parse_active_port(contents: &str) -> Option<u16> {
    contents
        .lines()
        .next()
        .and_then(|line| line.trim().parse::<u16>().ok())
        .filter(|port| *port != 0)
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct TargetInfo {
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(default)]
    pub url: String,
    pub web_socket_debugger_url: Option<String>,
}

/// WebSocket URL of the first page target, retried until `timeout`.
pub(crate) async fn page_websocket_url(
    client: &reqwest::Client,
    devtools_port: u16,
    timeout: Duration,
) -> Result<String, Pptx2PdfError> {
    let url = format!("http://127.0.0.1:{devtools_port}/json/list");
    let deadline = Instant::now() + timeout;

    loop {
        let last_error = match client.get(&url).send().await {
            Ok(resp) => match resp.json::<Vec<TargetInfo>>().await {
                Ok(targets) => match first_page(targets) {
                    Some(ws) => return Ok(ws),
                    None => "no page target yet".to_string(),
                },
                Err(e) => format!("malformed target list: {e}"),
            },
            Err(e) => format!("target list unreachable: {e}"),
        };

        if Instant::now() >= deadline {
            return Err(Pptx2PdfError::BrowserLaunchFailed { reason: last_error });
        }
        tokio::time::sleep(STARTUP_POLL).await;
    }
}

fn first_page(targets: Vec<TargetInfo>) -> Option<String> {
    targets
        .into_iter()
        .filter(|t| t.kind == "page")
        .inspect(|t| debug!(url = %t.url, "page target"))
        .find_map(|t| t.web_socket_debugger_url)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn active_port_first_line() {
        let contents = "40123\n/devtools/browser/8f1c2d3e\n";
        assert_eq!(parse_active_port(contents), Some(40123));
        assert_eq!(parse_active_port(""), None);
        assert_eq!(parse_active_port("0\n"), None);
        assert_eq!(parse_active_port("not-a-port"), None);
    }

    #[test]
    fn picks_first_page_target() {
        let raw = r#"[
            {"type": "service_worker", "url": "chrome://sw", "webSocketDebuggerUrl": "ws://sw"},
            {"type": "page", "url": "about:blank", "webSocketDebuggerUrl": "ws://127.0.0.1:1/devtools/page/A"},
            {"type": "page", "url": "about:blank", "webSocketDebuggerUrl": "ws://127.0.0.1:1/devtools/page/B"}
        ]"#;
        let targets: Vec<TargetInfo> = serde_json::from_str(raw).unwrap();
        assert_eq!(
            first_page(targets).as_deref(),
            Some("ws://127.0.0.1:1/devtools/page/A")
        );
    }

    #[test]
    fn missing_explicit_browser_is_reported() {
        let err = find_chrome(Some(Path::new("/no/such/chrome"))).unwrap_err();
        assert!(matches!(err, Pptx2PdfError::BrowserNotFound(_)));
        assert!(err.to_string().contains("/no/such/chrome"));
    }

    #[test]
    fn explicit_browser_is_used_verbatim() {
        let dir = tempfile::tempdir().unwrap();
        let fake = dir.path().join("chrome");
        std::fs::write(&fake, b"").unwrap();
        assert_eq!(find_chrome(Some(&fake)).unwrap(), fake);
    }
}
