//! Configuration types for presentation-to-PDF conversion.
//!
//! All conversion behaviour is controlled through [`ConversionConfig`], built
//! via its [`ConversionConfigBuilder`]. A [`ConversionRequest`] pairs one
//! source document with its destination and is created fresh for every
//! `convert` call.

use crate::bridge::BridgeContract;
use crate::error::Pptx2PdfError;
use crate::pipeline::transfer::TransferStrategy;
use crate::progress::ProgressCallback;
use std::fmt;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Conventional port of the local engine origin.
pub const DEFAULT_PORT: u16 = 8000;

/// Configuration for a conversion (or a batch of conversions).
///
/// Built via [`ConversionConfig::builder()`] or using
/// [`ConversionConfig::default()`].
///
/// # Example
/// ```rust
/// use pptx2pdf::{ConversionConfig, TransferStrategy};
///
/// let config = ConversionConfig::builder()
///     .port(8711)
///     .headless(true)
///     .transfer(TransferStrategy::ServedFile)
///     .build()
///     .unwrap();
/// ```
#[derive(Clone)]
pub struct ConversionConfig {
    /// Run Chromium without a window. Default: true.
    pub headless: bool,

    /// Log served requests and echo in-page console lines at INFO. Default: false.
    pub verbose: bool,

    /// Port of the local origin server. `0` binds an OS-assigned port. Default: 8000.
    pub port: u16,

    /// Directory holding the engine bundle. `None` resolves to
    /// `PPTX2PDF_STATIC_DIR` or the per-user cache directory.
    pub static_root: Option<PathBuf>,

    /// Download URL for the asset archive when the static root is empty.
    pub assets_url: Option<String>,

    /// Chromium executable. `None` resolves to `PPTX2PDF_CHROME` or a platform search.
    pub chrome_path: Option<PathBuf>,

    /// Upper bound on the wait for the in-page readiness flag. Default: 120.
    ///
    /// The engine compiles a large WebAssembly module on first load; two
    /// minutes covers cold caches on slow machines.
    pub ready_timeout_secs: u64,

    /// Upper bound on loading the bootstrap page. Default: 30.
    pub navigation_timeout_secs: u64,

    /// Upper bound on every DevTools command except the conversion itself. Default: 30.
    pub command_timeout_secs: u64,

    /// Smallest output accepted as a real document, in bytes. Default: 100.
    ///
    /// A heuristic guard against truncated output, not a format validator.
    pub min_output_bytes: usize,

    /// How the input bytes reach the engine. Default: [`TransferStrategy::InlineBase64`].
    pub transfer: TransferStrategy,

    /// Names of the in-page globals the engine exposes.
    pub contract: BridgeContract,

    /// Where `browser_logs.txt` and `debug_page.html` are written on failure. Default: `.`.
    pub diagnostics_dir: PathBuf,

    /// Optional stage-progress observer.
    pub progress_callback: Option<ProgressCallback>,
}

impl Default for ConversionConfig {
    fn default() -> Self {
        Self {
            headless: true,
            verbose: false,
            port: DEFAULT_PORT,
            static_root: None,
            assets_url: None,
            chrome_path: None,
            ready_timeout_secs: 120,
            navigation_timeout_secs: 30,
            command_timeout_secs: 30,
            min_output_bytes: 100,
            transfer: TransferStrategy::default(),
            contract: BridgeContract::default(),
            diagnostics_dir: PathBuf::from("."),
            progress_callback: None,
        }
    }
}

impl fmt::Debug for ConversionConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConversionConfig")
            .field("headless", &self.headless)
            .field("verbose", &self.verbose)
            .field("port", &self.port)
            .field("static_root", &self.static_root)
            .field("assets_url", &self.assets_url)
            .field("chrome_path", &self.chrome_path)
            .field("ready_timeout_secs", &self.ready_timeout_secs)
            .field("min_output_bytes", &self.min_output_bytes)
            .field("transfer", &self.transfer)
            .field("contract", &self.contract)
            .field("diagnostics_dir", &self.diagnostics_dir)
            .field(
                "progress_callback",
                &self.progress_callback.as_ref().map(|_| "<dyn ConversionProgressCallback>"),
            )
            .finish()
    }
}

impl ConversionConfig {
    /// Create a new builder for `ConversionConfig`.
    pub fn builder() -> ConversionConfigBuilder {
        ConversionConfigBuilder {
            config: Self::default(),
        }
    }

    /// The static root after applying the environment/cache-dir fallback.
    pub fn resolved_static_root(&self) -> PathBuf {
        self.static_root
            .clone()
            .unwrap_or_else(engine_assets::default_static_root)
    }

    pub fn ready_timeout(&self) -> Duration {
        Duration::from_secs(self.ready_timeout_secs)
    }

    pub fn navigation_timeout(&self) -> Duration {
        Duration::from_secs(self.navigation_timeout_secs)
    }

    pub fn command_timeout(&self) -> Duration {
        Duration::from_secs(self.command_timeout_secs)
    }
}

/// Builder for [`ConversionConfig`].
#[derive(Debug)]
pub struct ConversionConfigBuilder {
    config: ConversionConfig,
}

impl ConversionConfigBuilder {
    pub fn headless(mut self, v: bool) -> Self {
        self.config.headless = v;
        self
    }

    pub fn verbose(mut self, v: bool) -> Self {
        self.config.verbose = v;
        self
    }

    pub fn port(mut self, port: u16) -> Self {
        self.config.port = port;
        self
    }

    pub fn static_root(mut self, dir: impl Into<PathBuf>) -> Self {
        self.config.static_root = Some(dir.into());
        self
    }

    pub fn assets_url(mut self, url: impl Into<String>) -> Self {
        self.config.assets_url = Some(url.into());
        self
    }

    pub fn chrome_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.config.chrome_path = Some(path.into());
        self
    }

    pub fn ready_timeout_secs(mut self, secs: u64) -> Self {
        self.config.ready_timeout_secs = secs;
        self
    }

    pub fn navigation_timeout_secs(mut self, secs: u64) -> Self {
        self.config.navigation_timeout_secs = secs;
        self
    }

    pub fn command_timeout_secs(mut self, secs: u64) -> Self {
        self.config.command_timeout_secs = secs;
        self
    }

    pub fn min_output_bytes(mut self, n: usize) -> Self {
        self.config.min_output_bytes = n;
        self
    }

    pub fn transfer(mut self, strategy: TransferStrategy) -> Self {
        self.config.transfer = strategy;
        self
    }

    pub fn contract(mut self, contract: BridgeContract) -> Self {
        self.config.contract = contract;
        self
    }

    pub fn diagnostics_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.config.diagnostics_dir = dir.into();
        self
    }

    pub fn progress_callback(mut self, cb: ProgressCallback) -> Self {
        self.config.progress_callback = Some(cb);
        self
    }

    /// Build the configuration, validating constraints.
    pub fn build(self) -> Result<ConversionConfig, Pptx2PdfError> {
        let c = &self.config;
        if c.ready_timeout_secs == 0 {
            return Err(Pptx2PdfError::InvalidConfig(
                "Ready timeout must be ≥ 1 second".into(),
            ));
        }
        if c.navigation_timeout_secs == 0 || c.command_timeout_secs == 0 {
            return Err(Pptx2PdfError::InvalidConfig(
                "Navigation and command timeouts must be ≥ 1 second".into(),
            ));
        }
        if c.min_output_bytes == 0 {
            return Err(Pptx2PdfError::InvalidConfig(
                "Minimum output size must be ≥ 1 byte".into(),
            ));
        }
        c.contract.validate()?;
        Ok(self.config)
    }
}

/// One source document and where its PDF should go.
///
/// Immutable once built; create a new request for every conversion.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConversionRequest {
    source: PathBuf,
    destination: PathBuf,
    diagnostics_dir: Option<PathBuf>,
}

impl ConversionRequest {
    pub fn new(source: impl Into<PathBuf>, destination: impl Into<PathBuf>) -> Self {
        Self {
            source: source.into(),
            destination: destination.into(),
            diagnostics_dir: None,
        }
    }

    /// Write this request's failure artifacts to `dir` instead of
    /// [`ConversionConfig::diagnostics_dir`]. Concurrent conversions sharing
    /// one config need this to keep their artifacts apart.
    pub fn with_diagnostics_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.diagnostics_dir = Some(dir.into());
        self
    }

    pub fn diagnostics_dir(&self) -> Option<&Path> {
        self.diagnostics_dir.as_deref()
    }

    pub fn source(&self) -> &Path {
        &self.source
    }

    pub fn destination(&self) -> &Path {
        &self.destination
    }
}
