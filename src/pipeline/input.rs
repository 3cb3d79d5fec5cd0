//! Input resolution: validate a user-supplied source path.
//!
//! All checks here run before assets are provisioned or the origin server is
//! started, so a bad path never costs a browser launch. The magic-byte check
//! accepts the two container formats office engines read: ZIP (PPTX, ODP and
//! the other OOXML/ODF formats) and OLE2 compound files (legacy PPT).

use crate::error::Pptx2PdfError;
use std::io::Read;
use std::path::{Path, PathBuf};
use tracing::debug;

const ZIP_MAGIC: [u8; 4] = [0x50, 0x4B, 0x03, 0x04];
const OLE_MAGIC: [u8; 4] = [0xD0, 0xCF, 0x11, 0xE0];

/// A source document that passed its precondition checks.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedInput {
    path: PathBuf,
    size: u64,
}

impl ResolvedInput {
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Size on disk in bytes.
    pub fn size(&self) -> u64 {
        self.size
    }

    /// Lower-cased file extension, `pptx` when the path has none.
    pub fn extension(&self) -> String {
        self.path
            .extension()
            .and_then(|e| e.to_str())
            .filter(|e| !e.is_empty() && e.chars().all(|c| c.is_ascii_alphanumeric()))
            .map(str::to_ascii_lowercase)
            .unwrap_or_else(|| "pptx".to_string())
    }
}

/// Validate that `path` exists, is readable and looks like an office document.
pub fn resolve_input(path: &Path) -> Result<ResolvedInput, Pptx2PdfError> {
    let path = path.to_path_buf();

    if !path.is_file() {
        return Err(Pptx2PdfError::InputNotFound { path });
    }

    let mut file = match std::fs::File::open(&path) {
        Ok(f) => f,
        Err(e) if e.kind() == std::io::ErrorKind::PermissionDenied => {
            return Err(Pptx2PdfError::PermissionDenied { path });
        }
        Err(_) => return Err(Pptx2PdfError::InputNotFound { path }),
    };

    let mut magic = [0u8; 4];
    let read = read_prefix(&mut file, &mut magic);
    if read < magic.len() || (magic != ZIP_MAGIC && magic != OLE_MAGIC) {
        return Err(Pptx2PdfError::UnsupportedInput { path, magic });
    }

    let size = file
        .metadata()
        .map(|m| m.len())
        .map_err(|_| Pptx2PdfError::InputNotFound { path: path.clone() })?;

    debug!(path = %path.display(), size, "resolved input document");
    Ok(ResolvedInput { path, size })
}

/// Fill as much of `buf` as the file allows.
fn read_prefix(file: &mut std::fs::File, buf: &mut [u8]) -> usize {
    let mut filled = 0;
    while filled < buf.len() {
        match file.read(&mut buf[filled..]) {
            Ok(0) => break,
            Ok(n) => filled += n,
            Err(ref e) if e.kind() == std::io::ErrorKind::Interrupted => continue,
            Err(_) => break,
        }
    }
    filled
}
