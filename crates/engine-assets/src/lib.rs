//! # engine-assets
//!
//! Provision the static asset bundle of a browser-hosted office engine: the
//! bootstrap `index.html`, the compiled `.wasm` module and its JavaScript
//! glue. Callers point [`ensure_assets`] at a static root; afterwards the
//! directory is guaranteed to hold a servable bundle or an error explains
//! why it could not.
//!
//! ## How it works
//!
//! On every call to [`ensure_assets`]:
//!
//! 1. If `{root}/static.tar.gz` or `{root}/static.zip` exists it is unpacked
//!    into `root` and then deleted. A failed extraction leaves the archive in
//!    place.
//! 2. If the root is still not provisioned and the `bundled` feature is
//!    active, the archive embedded at compile time is unpacked.
//! 3. If the root is still not provisioned and a download URL is known
//!    (argument or `PPTX2PDF_ASSETS_URL`), the archive is downloaded and
//!    unpacked.
//! 4. The root must now contain `index.html`; otherwise
//!    [`AssetError::Missing`] is returned.
//!
//! Re-running on a provisioned root without an archive is a cheap no-op.
//!
//! ## Usage
//!
//! ```rust,no_run
//! use engine_assets::{default_static_root, ensure_assets, ProvisionOptions};
//!
//! let root = default_static_root();
//! let report = ensure_assets(&root, &ProvisionOptions::default()).expect("assets unavailable");
//! println!("assets ready in {} ({:?})", report.root.display(), report.source);
//! ```
//!
//! ## Environment variable overrides
//!
//! - `PPTX2PDF_STATIC_DIR`: use this directory as the static root.
//! - `PPTX2PDF_ASSETS_URL`: download the archive from here when the root is empty.

use std::io::{Cursor, Read};
use std::path::{Path, PathBuf};

use thiserror::Error;
use tracing::{debug, info, warn};

#[cfg(feature = "bundled")]
mod bundled {
    include!(concat!(env!("OUT_DIR"), "/bundled.rs"));
}

// ── Public constants ─────────────────────────────────────────────────────────

/// File name of the gzipped tar bundle looked for inside the static root.
pub const ARCHIVE_NAME: &str = "static.tar.gz";

/// File name of the zip bundle looked for inside the static root.
pub const ZIP_ARCHIVE_NAME: &str = "static.zip";

/// Every archive name recognised inside the static root, in the order tried.
pub const ARCHIVE_NAMES: [&str; 2] = [ARCHIVE_NAME, ZIP_ARCHIVE_NAME];

/// The page the browser is pointed at; its presence marks a provisioned root.
pub const BOOTSTRAP_PAGE: &str = "index.html";

/// Environment variable overriding the static root.
pub const STATIC_DIR_ENV: &str = "PPTX2PDF_STATIC_DIR";

/// Environment variable naming a download URL for the archive.
pub const ASSETS_URL_ENV: &str = "PPTX2PDF_ASSETS_URL";

// ── Error type ───────────────────────────────────────────────────────────────

/// Errors returned by asset provisioning.
#[derive(Error, Debug)]
pub enum AssetError {
    /// Could not create, read or clean up part of the static root.
    #[error("I/O error on '{path}': {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Network download failed.
    #[error("Download failed: {0}")]
    Download(String),

    /// gzip/tar or zip extraction failed.
    #[error("Archive extraction failed: {0}")]
    Extract(String),

    /// After every source was tried the root still holds no bundle.
    #[error("No engine assets found in '{}' (expected index.html)", root.display())]
    Missing { root: PathBuf },
}

// ── Report types ─────────────────────────────────────────────────────────────

/// Where the provisioned bundle came from on this call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AssetSource {
    /// The root was already provisioned; nothing was unpacked.
    AlreadyPresent,
    /// An archive inside the root was unpacked (and deleted).
    LocalArchive,
    /// The archive embedded at compile time was unpacked.
    Bundled,
    /// The archive was downloaded and unpacked.
    Downloaded,
}

/// Result of a successful [`ensure_assets`] call.
#[derive(Debug, Clone)]
pub struct AssetReport {
    /// The provisioned static root.
    pub root: PathBuf,
    /// How the bundle got there.
    pub source: AssetSource,
    /// Number of archive entries unpacked on this call (0 when none).
    pub unpacked_entries: usize,
}

/// Optional inputs to [`ensure_assets`].
#[derive(Default)]
pub struct ProvisionOptions<'a> {
    /// Archive URL used when the root is empty. Falls back to `PPTX2PDF_ASSETS_URL`.
    pub download_url: Option<&'a str>,
    /// Receives `(bytes_downloaded, total_size_option)` during a download.
    pub on_progress: Option<&'a dyn Fn(u64, Option<u64>)>,
}

// ── Static root resolution ───────────────────────────────────────────────────

/// Returns the static root used when the caller does not name one.
///
/// Default locations:
/// - **macOS**: `~/Library/Caches/pptx2pdf/static/`
/// - **Linux**: `~/.cache/pptx2pdf/static/`
/// - **Windows**: `%LOCALAPPDATA%\pptx2pdf\static\`
///
/// Override by setting `PPTX2PDF_STATIC_DIR`.
pub fn default_static_root() -> PathBuf {
    if let Ok(override_dir) = std::env::var(STATIC_DIR_ENV) {
        if !override_dir.is_empty() {
            return PathBuf::from(override_dir);
        }
    }

    let base = dirs::cache_dir()
        .or_else(|| dirs::home_dir().map(|h| h.join(".cache")))
        .unwrap_or_else(std::env::temp_dir);

    base.join("pptx2pdf").join("static")
}

// ── Public API ───────────────────────────────────────────────────────────────

/// Returns `true` when `root` holds a servable bundle (the bootstrap page).
pub fn is_provisioned(root: &Path) -> bool {
    root.join(BOOTSTRAP_PAGE).is_file()
}

/// Archives in `root` still waiting to be unpacked.
pub fn pending_archives(root: &Path) -> Vec<PathBuf> {
    ARCHIVE_NAMES
        .iter()
        .map(|name| root.join(name))
        .filter(|p| p.is_file())
        .collect()
}

/// Ensures the engine's static assets are present under `root`.
///
/// See the crate docs for the order in which sources are tried. Provisioning
/// is a one-shot local operation: nothing is retried.
pub fn ensure_assets(root: &Path, options: &ProvisionOptions<'_>) -> Result<AssetReport, AssetError> {
    let mut source = AssetSource::AlreadyPresent;
    let mut unpacked_entries = 0;

    // 1. Archives dropped into the root.
    for archive_path in pending_archives(root) {
        info!(archive = %archive_path.display(), "unpacking engine asset archive");
        let bytes = std::fs::read(&archive_path).map_err(|e| AssetError::Io {
            path: archive_path.clone(),
            source: e,
        })?;
        unpacked_entries += extract_archive(&bytes, root)?;
        std::fs::remove_file(&archive_path).map_err(|e| AssetError::Io {
            path: archive_path.clone(),
            source: e,
        })?;
        debug!(entries = unpacked_entries, "archive unpacked and removed");
        source = AssetSource::LocalArchive;
    }

    // 2. Archive embedded at compile time.
    #[cfg(feature = "bundled")]
    if !is_provisioned(root) {
        info!(root = %root.display(), "unpacking bundled engine assets");
        unpacked_entries = extract_archive(bundled::ARCHIVE_BYTES, root)?;
        source = AssetSource::Bundled;
    }

    // 3. Remote archive.
    if !is_provisioned(root) {
        let env_url = std::env::var(ASSETS_URL_ENV).ok().filter(|u| !u.is_empty());
        if let Some(url) = options.download_url.map(str::to_string).or(env_url) {
            info!(url = %url, "downloading engine asset archive");
            let bytes = download_archive(&url, options.on_progress)?;
            unpacked_entries = extract_archive(&bytes, root)?;
            source = AssetSource::Downloaded;
        }
    }

    // 4. Post-condition.
    if !is_provisioned(root) {
        return Err(AssetError::Missing {
            root: root.to_path_buf(),
        });
    }

    Ok(AssetReport {
        root: root.to_path_buf(),
        source,
        unpacked_entries,
    })
}

/// Unpacks a gzipped tar or zip archive into `dest`, creating it if needed.
///
/// The format is sniffed from the leading bytes, so downloaded and embedded
/// archives may use either. Entries whose paths would land outside `dest` are
/// skipped. Returns the number of entries written.
pub fn extract_archive(archive_bytes: &[u8], dest: &Path) -> Result<usize, AssetError> {
    std::fs::create_dir_all(dest).map_err(|e| AssetError::Io {
        path: dest.to_path_buf(),
        source: e,
    })?;

    let count = if is_zip(archive_bytes) {
        extract_zip(archive_bytes, dest)?
    } else {
        extract_tar_gz(archive_bytes, dest)?
    };

    if count == 0 {
        return Err(AssetError::Extract("archive contains no entries".into()));
    }
    Ok(count)
}

fn is_zip(bytes: &[u8]) -> bool {
    bytes.starts_with(b"PK\x03\x04") || bytes.starts_with(b"PK\x05\x06")
}

/// Tar entries go through [`tar::Entry::unpack_in`], which refuses escapes.
fn extract_tar_gz(archive_bytes: &[u8], dest: &Path) -> Result<usize, AssetError> {
    use flate2::read::GzDecoder;
    use tar::Archive;

    let gz = GzDecoder::new(archive_bytes);
    let mut archive = Archive::new(gz);
    let mut count = 0;

    for entry in archive
        .entries()
        .map_err(|e| AssetError::Extract(e.to_string()))?
    {
        let mut entry = entry.map_err(|e| AssetError::Extract(e.to_string()))?;
        let unpacked = entry
            .unpack_in(dest)
            .map_err(|e| AssetError::Extract(format!("Unpack failed: {e}")))?;
        if unpacked {
            count += 1;
        } else {
            let path = entry
                .path()
                .map(|p| p.display().to_string())
                .unwrap_or_default();
            warn!(entry = %path, "skipped archive entry outside the static root");
        }
    }

    Ok(count)
}

/// Zip entries are placed via [`zip::read::ZipFile::enclosed_name`].
fn extract_zip(archive_bytes: &[u8], dest: &Path) -> Result<usize, AssetError> {
    let io_err = |path: &Path, e: std::io::Error| AssetError::Io {
        path: path.to_path_buf(),
        source: e,
    };

    let mut archive = zip::ZipArchive::new(Cursor::new(archive_bytes))
        .map_err(|e| AssetError::Extract(format!("Failed to open ZIP: {e}")))?;
    let mut count = 0;

    for i in 0..archive.len() {
        let mut file = archive
            .by_index(i)
            .map_err(|e| AssetError::Extract(format!("Failed to read ZIP entry: {e}")))?;
        let Some(relative) = file.enclosed_name() else {
            warn!(entry = %file.name(), "skipped archive entry outside the static root");
            continue;
        };
        let out = dest.join(relative);

        if file.is_dir() {
            std::fs::create_dir_all(&out).map_err(|e| io_err(&out, e))?;
        } else {
            if let Some(parent) = out.parent() {
                std::fs::create_dir_all(parent).map_err(|e| io_err(parent, e))?;
            }
            let mut target = std::fs::File::create(&out).map_err(|e| io_err(&out, e))?;
            std::io::copy(&mut file, &mut target).map_err(|e| io_err(&out, e))?;
        }
        count += 1;
    }

    Ok(count)
}

/// Streams a URL into a `Vec<u8>`, calling `on_progress` every 64 KiB.
pub fn download_archive(
    url: &str,
    on_progress: Option<&dyn Fn(u64, Option<u64>)>,
) -> Result<Vec<u8>, AssetError> {
    let client = reqwest::blocking::Client::builder()
        .user_agent(concat!("engine-assets/", env!("CARGO_PKG_VERSION")))
        .redirect(reqwest::redirect::Policy::limited(5))
        .build()
        .map_err(|e| AssetError::Download(e.to_string()))?;

    let response = client
        .get(url)
        .send()
        .map_err(|e| AssetError::Download(format!("GET {url}: {e}")))?;

    if !response.status().is_success() {
        return Err(AssetError::Download(format!(
            "HTTP {} for {url}",
            response.status()
        )));
    }

    let total = response.content_length();
    let capacity = total.unwrap_or(64 * 1024 * 1024) as usize;
    let mut buf = Vec::with_capacity(capacity);

    let mut stream = response;
    let mut chunk = vec![0u8; 64 * 1024];
    let mut downloaded: u64 = 0;

    loop {
        match stream.read(&mut chunk) {
            Ok(0) => break,
            Ok(n) => {
                buf.extend_from_slice(&chunk[..n]);
                downloaded += n as u64;
                if let Some(cb) = on_progress {
                    cb(downloaded, total);
                }
            }
            Err(ref e) if e.kind() == std::io::ErrorKind::Interrupted => continue,
            Err(e) => {
                return Err(AssetError::Download(format!("Read error: {e}")));
            }
        }
    }

    Ok(buf)
}

// ── Tests ─────────────────────────────────────────────────────────────────────
