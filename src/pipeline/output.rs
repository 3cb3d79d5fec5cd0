//! Output handling: base64 result → validated bytes → PDF on disk.
//!
//! The engine hands back base64 because DevTools can only return strings.
//! A decoded document below the configured minimum is treated as a failed
//! conversion; this is a guard against truncated output, not a PDF
//! validator.

use crate::error::Pptx2PdfError;
use base64::{engine::general_purpose::STANDARD, Engine as _};
use std::io::Write;
use std::path::Path;
use tracing::debug;

/// Decode the engine's base64 result and apply the size guard.
pub fn decode_document(encoded: &str, min_bytes: usize) -> Result<Vec<u8>, Pptx2PdfError> {
    let trimmed = encoded.trim();
    // Some builds return a data URL instead of a bare payload.
    let payload = match trimmed.split_once(";base64,") {
        Some((prefix, rest)) if prefix.starts_with("data:") => rest,
        _ => trimmed,
    };

    let bytes = STANDARD
        .decode(payload)
        .map_err(|e| Pptx2PdfError::InvalidOutputEncoding(e.to_string()))?;

    if bytes.len() < min_bytes {
        return Err(Pptx2PdfError::OutputTooSmall {
            size: bytes.len(),
            min: min_bytes,
        });
    }

    debug!(bytes = bytes.len(), "decoded engine output");
    Ok(bytes)
}

/// Write `bytes` to `path` atomically.
///
/// The data goes to a temporary file in the destination directory which is
/// then renamed over `path`, so readers never observe a partial PDF and a
/// failure leaves any previous file untouched.
pub async fn write_atomic(path: &Path, bytes: Vec<u8>) -> Result<(), Pptx2PdfError> {
    let path = path.to_path_buf();
    let write_err = |path: &Path, source: std::io::Error| Pptx2PdfError::OutputWriteFailed {
        path: path.to_path_buf(),
        source,
    };

    tokio::task::spawn_blocking(move || {
        let parent = match path.parent() {
            Some(p) if !p.as_os_str().is_empty() => p.to_path_buf(),
            _ => std::path::PathBuf::from("."),
        };
        std::fs::create_dir_all(&parent).map_err(|e| write_err(&path, e))?;

        let mut tmp = tempfile::NamedTempFile::new_in(&parent).map_err(|e| write_err(&path, e))?;
        tmp.write_all(&bytes).map_err(|e| write_err(&path, e))?;
        tmp.as_file().sync_all().map_err(|e| write_err(&path, e))?;
        tmp.persist(&path).map_err(|e| write_err(&path, e.error))?;
        Ok(())
    })
    .await
    .map_err(|e| Pptx2PdfError::Internal(format!("output writer panicked: {e}")))?
}
