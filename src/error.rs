//! Error types for the pptx2pdf library.
//!
//! Every failure is fatal to the `convert` call that hit it; nothing is
//! retried internally. [`Pptx2PdfError`] carries the detail a human needs to
//! act on the failure, while [`ErrorKind`] groups the variants into the few
//! categories a caller actually branches on:
//!
//! * **Precondition**: missing input or engine assets, no browser. Raised
//!   before any resource is acquired.
//! * **ResourceConflict**: the origin port is taken. Retrying with another
//!   port may succeed.
//! * **EngineInitTimeout**: the engine never signalled readiness. The served
//!   assets are broken; retrying will not help.
//! * **ConversionFailed**: the engine ran but produced nothing usable.
//!   Diagnostic artifacts are always written on this path.
//! * **DriverCrash**: the browser died or stopped answering.

use std::path::PathBuf;
use thiserror::Error;

/// Coarse classification of [`Pptx2PdfError`] variants.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    Precondition,
    ResourceConflict,
    EngineInitTimeout,
    ConversionFailed,
    DriverCrash,
    Io,
    Config,
}

/// All fatal errors returned by the pptx2pdf library.
#[derive(Debug, Error)]
pub enum Pptx2PdfError {
    // ── Preconditions ─────────────────────────────────────────────────────
    /// Input file was not found at the given path.
    #[error("Input file not found: '{path}'\nCheck the path exists and is readable.")]
    InputNotFound { path: PathBuf },

    /// Process does not have read permission on the file.
    #[error("Permission denied reading '{path}'\nTry: chmod +r {path:?}")]
    PermissionDenied { path: PathBuf },

    /// The file exists but is not an office container the engine can open.
    #[error("File is not a supported presentation: '{path}'\nFirst bytes: {magic:?}")]
    UnsupportedInput { path: PathBuf, magic: [u8; 4] },

    /// The input exceeds what the configured transfer strategy can carry.
    #[error(
        "Input '{path}' is {size} bytes; the {strategy} transfer accepts at most {limit} bytes.\n\
         Try --transfer served-file for large documents."
    )]
    InputTooLarge {
        path: PathBuf,
        size: u64,
        limit: u64,
        strategy: &'static str,
    },

    /// The static root holds no engine bundle after provisioning.
    #[error(
        "Engine assets missing in '{}'.\n\
         Place static.tar.gz there, set PPTX2PDF_STATIC_DIR to an unpacked bundle, \
         or set PPTX2PDF_ASSETS_URL to download one.",
        root.display()
    )]
    MissingAssets { root: PathBuf },

    /// Unpacking or downloading the asset bundle failed.
    #[error("Failed to provision engine assets: {0}")]
    AssetProvisioning(String),

    /// No Chromium-family executable could be located.
    #[error("{0}\nSet PPTX2PDF_CHROME=/path/to/chrome or pass --chrome.")]
    BrowserNotFound(String),

    // ── Resource conflicts ────────────────────────────────────────────────
    /// Another process already listens on the origin port.
    #[error("Port {port} is already in use.\nStop the process using it or choose another with --port.")]
    PortInUse { port: u16 },

    // ── Engine readiness ──────────────────────────────────────────────────
    /// The in-page readiness flag was never observed.
    #[error(
        "Engine did not become ready within {secs}s.\n\
         The served assets are likely broken; see browser_logs.txt and debug_page.html."
    )]
    EngineInitTimeout { secs: u64 },

    // ── Conversion failures ───────────────────────────────────────────────
    /// The in-page entry point returned a null/falsy result.
    #[error("The engine returned no document.\nSee browser_logs.txt and debug_page.html.")]
    EmptyResult,

    /// The produced document is implausibly small.
    #[error("Generated PDF is suspiciously small ({size} bytes, minimum {min}).")]
    OutputTooSmall { size: usize, min: usize },

    /// The in-page entry point threw.
    #[error("The engine raised an exception: {message}")]
    InPageException { message: String },

    /// The entry point reported a stored result but the virtual filesystem holds none.
    #[error("The engine reported success but wrote no document to '{path}': {message}")]
    OutputMissing { path: String, message: String },

    /// The engine's result could not be base64-decoded.
    #[error("The engine returned malformed output: {0}")]
    InvalidOutputEncoding(String),

    // ── Browser driver ────────────────────────────────────────────────────
    /// The browser process could not be started.
    #[error("Failed to launch browser: {reason}")]
    BrowserLaunchFailed { reason: String },

    /// The browser process died or the DevTools connection dropped.
    #[error("Browser crashed: {detail}")]
    DriverCrash { detail: String },

    /// A DevTools command failed or timed out.
    #[error("DevTools command '{method}' failed: {message}")]
    DriverProtocol { method: String, message: String },

    /// The bootstrap page could not be loaded.
    #[error("Navigation to '{url}' failed: {reason}")]
    NavigationFailed { url: String, reason: String },

    // ── Server lifecycle ──────────────────────────────────────────────────
    /// A conversion was requested from a converter whose server is not running.
    #[error("The origin server is not running; call start() first.")]
    ServerNotRunning,

    /// `start()` was called on a handle that has already been stopped.
    #[error("Server handle for port {port} was already stopped; create a new handle.")]
    ServerRetired { port: u16 },

    /// The serving task exited while the handle was still marked running.
    #[error("The origin server on port {port} stopped unexpectedly.")]
    ServerFaulted { port: u16 },

    /// Binding or serving failed for a reason other than a port conflict.
    #[error("Origin server I/O error on port {port}: {source}")]
    ServerIo {
        port: u16,
        #[source]
        source: std::io::Error,
    },

    // ── I/O errors ────────────────────────────────────────────────────────
    /// Could not create or write the output PDF file.
    #[error("Failed to write output file '{path}': {source}")]
    OutputWriteFailed {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    // ── Config errors ─────────────────────────────────────────────────────
    /// Builder validation failed.
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    // ── Catch-all ─────────────────────────────────────────────────────────
    /// Unexpected internal error.
    #[error("Internal error: {0}")]
    Internal(String),
}

impl Pptx2PdfError {
    /// The taxonomy bucket this error belongs to.
    pub fn kind(&self) -> ErrorKind {
        use Pptx2PdfError::*;
        match self {
            InputNotFound { .. }
            | PermissionDenied { .. }
            | UnsupportedInput { .. }
            | InputTooLarge { .. }
            | MissingAssets { .. }
            | AssetProvisioning(_)
            | BrowserNotFound(_) => ErrorKind::Precondition,
            PortInUse { .. } => ErrorKind::ResourceConflict,
            EngineInitTimeout { .. } => ErrorKind::EngineInitTimeout,
            EmptyResult
            | OutputTooSmall { .. }
            | InPageException { .. }
            | OutputMissing { .. }
            | InvalidOutputEncoding(_) => ErrorKind::ConversionFailed,
            BrowserLaunchFailed { .. }
            | DriverCrash { .. }
            | DriverProtocol { .. }
            | NavigationFailed { .. } => ErrorKind::DriverCrash,
            ServerIo { .. } | OutputWriteFailed { .. } | Internal(_) => ErrorKind::Io,
            ServerNotRunning | ServerRetired { .. } | ServerFaulted { .. } | InvalidConfig(_) => {
                ErrorKind::Config
            }
        }
    }
}

impl From<engine_assets::AssetError> for Pptx2PdfError {
    fn from(e: engine_assets::AssetError) -> Self {
        match e {
            engine_assets::AssetError::Missing { root } => Pptx2PdfError::MissingAssets { root },
            other => Pptx2PdfError::AssetProvisioning(other.to_string()),
        }
    }
}
