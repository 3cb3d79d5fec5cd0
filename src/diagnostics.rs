//! Console-log collection and failure artifacts.
//!
//! A failed conversion inside a WebAssembly engine is opaque from the host
//! side: the entry point simply returns nothing. The page's console output and
//! its rendered markup are the only evidence, so every failure after the
//! browser started persists both to fixed file names in the diagnostics
//! directory.

use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use tracing::info;

/// File name of the persisted console log.
pub const LOG_ARTIFACT: &str = "browser_logs.txt";

/// File name of the persisted page snapshot.
pub const SNAPSHOT_ARTIFACT: &str = "debug_page.html";

/// Ordered, append-only sequence of in-page console lines.
///
/// Cloning yields another handle to the same log: the browser driver appends
/// from its event reader while the session reads once it is finished.
#[derive(Debug, Clone, Default)]
pub struct ConsoleLog {
    lines: Arc<Mutex<Vec<String>>>,
}

impl ConsoleLog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&self, line: impl Into<String>) {
        self.lines
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .push(line.into());
    }

    /// Copy of every line collected so far, in arrival order.
    pub fn lines(&self) -> Vec<String> {
        self.lines
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
    }

    pub fn len(&self) -> usize {
        self.lines
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Paths of the artifacts written for one failed conversion.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DiagnosticArtifacts {
    pub log_path: PathBuf,
    pub snapshot_path: PathBuf,
}

impl DiagnosticArtifacts {
    pub fn in_dir(dir: &Path) -> Self {
        Self {
            log_path: dir.join(LOG_ARTIFACT),
            snapshot_path: dir.join(SNAPSHOT_ARTIFACT),
        }
    }
}

/// Write `lines` and `snapshot` into `dir`, replacing earlier artifacts.
pub async fn write_artifacts(
    dir: &Path,
    lines: &[String],
    snapshot: &str,
) -> std::io::Result<DiagnosticArtifacts> {
    tokio::fs::create_dir_all(dir).await?;
    let artifacts = DiagnosticArtifacts::in_dir(dir);
    tokio::fs::write(&artifacts.log_path, lines.join("\n")).await?;
    tokio::fs::write(&artifacts.snapshot_path, snapshot).await?;
    info!(
        log = %artifacts.log_path.display(),
        snapshot = %artifacts.snapshot_path.display(),
        lines = lines.len(),
        "wrote diagnostic artifacts"
    );
    Ok(artifacts)
}

/// Placeholder markup for when the page could not be captured.
pub fn unavailable_snapshot(reason: &str) -> String {
    format!("<!-- page snapshot unavailable: {} -->\n", reason.replace("--", "- -"))
}
