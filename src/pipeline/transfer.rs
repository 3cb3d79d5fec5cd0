//! Input transfer: make the document's bytes reachable from the page.
//!
//! Two strategies cross the host/sandbox boundary:
//!
//! * [`TransferStrategy::InlineBase64`] encodes the whole file and passes it
//!   as the entry point's argument. Needs no filesystem coordination, but the
//!   payload is held twice in memory and travels through a single DevTools
//!   message, so inputs are capped at [`MAX_INLINE_INPUT_BYTES`].
//! * [`TransferStrategy::ServedFile`] copies the file into the static root and
//!   passes its URL; the engine fetches it itself. Capped at
//!   [`MAX_SERVED_INPUT_BYTES`]. The copy is named
//!   `input-<pid>-<n>.<ext>` so sessions sharing one server never collide,
//!   and it is deleted when the [`PreparedTransfer`] is dropped.

use crate::error::Pptx2PdfError;
use crate::pipeline::input::ResolvedInput;
use base64::{engine::general_purpose::STANDARD, Engine as _};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use tracing::{debug, warn};

/// Largest input accepted by [`TransferStrategy::InlineBase64`] (32 MiB).
pub const MAX_INLINE_INPUT_BYTES: u64 = 32 * 1024 * 1024;

/// Largest input accepted by [`TransferStrategy::ServedFile`] (512 MiB).
pub const MAX_SERVED_INPUT_BYTES: u64 = 512 * 1024 * 1024;

static SERVED_COUNTER: AtomicU64 = AtomicU64::new(0);

/// How input bytes reach the in-page engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum TransferStrategy {
    /// Base64 string passed as the entry point argument. (default)
    #[default]
    InlineBase64,
    /// Copy served from the static root; the entry point receives its URL.
    ServedFile,
}

impl TransferStrategy {
    /// Input-size ceiling for this strategy, in bytes.
    pub const fn max_input_bytes(self) -> u64 {
        match self {
            TransferStrategy::InlineBase64 => MAX_INLINE_INPUT_BYTES,
            TransferStrategy::ServedFile => MAX_SERVED_INPUT_BYTES,
        }
    }

    pub const fn name(self) -> &'static str {
        match self {
            TransferStrategy::InlineBase64 => "inline-base64",
            TransferStrategy::ServedFile => "served-file",
        }
    }

    /// Fail fast when `input` exceeds this strategy's ceiling.
    pub fn check_size(self, input: &ResolvedInput) -> Result<(), Pptx2PdfError> {
        let limit = self.max_input_bytes();
        if input.size() > limit {
            return Err(Pptx2PdfError::InputTooLarge {
                path: input.path().to_path_buf(),
                size: input.size(),
                limit,
                strategy: self.name(),
            });
        }
        Ok(())
    }
}

impl fmt::Display for TransferStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// The entry point argument, plus the served copy that backs it (if any).
#[derive(Debug)]
pub struct PreparedTransfer {
    argument: String,
    served: Option<ServedCopy>,
}

impl PreparedTransfer {
    /// The string handed to the in-page entry point.
    pub fn argument(&self) -> &str {
        &self.argument
    }

    /// Path of the temporary served copy, when the served-file strategy was used.
    pub fn served_path(&self) -> Option<&Path> {
        self.served.as_ref().map(|s| s.path.as_path())
    }
}

/// A file in the static root that is removed on drop.
#[derive(Debug)]
struct ServedCopy {
    path: PathBuf,
}

impl Drop for ServedCopy {
    fn drop(&mut self) {
        match std::fs::remove_file(&self.path) {
            Ok(()) => debug!(path = %self.path.display(), "removed served input copy"),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => warn!(path = %self.path.display(), error = %e, "failed to remove served input copy"),
        }
    }
}

/// Prepare `input` for the page according to `strategy`.
///
/// `origin` is the server's base URL (`http://localhost:<port>`), used to
/// build the served copy's URL.
pub async fn prepare(
    input: &ResolvedInput,
    strategy: TransferStrategy,
    static_root: &Path,
    origin: &str,
) -> Result<PreparedTransfer, Pptx2PdfError> {
    strategy.check_size(input)?;

    match strategy {
        TransferStrategy::InlineBase64 => {
            let bytes = tokio::fs::read(input.path()).await.map_err(|_| {
                Pptx2PdfError::InputNotFound {
                    path: input.path().to_path_buf(),
                }
            })?;
            let argument = STANDARD.encode(&bytes);
            debug!(raw = bytes.len(), encoded = argument.len(), "encoded input inline");
            Ok(PreparedTransfer {
                argument,
                served: None,
            })
        }
        TransferStrategy::ServedFile => {
            let name = format!(
                "input-{}-{}.{}",
                std::process::id(),
                SERVED_COUNTER.fetch_add(1, Ordering::Relaxed),
                input.extension()
            );
            let path = static_root.join(&name);
            tokio::fs::copy(input.path(), &path)
                .await
                .map_err(|e| Pptx2PdfError::Internal(format!(
                    "failed to copy input into '{}': {e}",
                    static_root.display()
                )))?;
            let served = ServedCopy { path };
            let argument = format!("{}/{}", origin.trim_end_matches('/'), name);
            debug!(url = %argument, "serving input copy");
            Ok(PreparedTransfer {
                argument,
                served: Some(served),
            })
        }
    }
}
