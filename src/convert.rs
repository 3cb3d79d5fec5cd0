//! Conversion entry points and the server lifecycle around them.
//!
//! ## Lifecycle modes
//!
//! Two ways to manage the origin server, both explicit in the API:
//!
//! * **Scoped**: [`convert`] provisions assets, starts a server, runs one
//!   session and stops the server again, exactly once, whatever happened.
//!   Simple, but every call pays for a server start.
//! * **Reuse**: a [`Converter`] is started once, serves any number of
//!   [`Converter::convert`] calls (concurrently if desired, each with its own
//!   browser) and is stopped by the caller at the end of the batch.

use crate::bridge::BridgeLauncher;
use crate::browser::ChromeLauncher;
use crate::config::{ConversionConfig, ConversionRequest};
use crate::error::Pptx2PdfError;
use crate::pipeline::input::{self, ResolvedInput};
use crate::pipeline::output;
use crate::pipeline::transfer::TransferStrategy;
use crate::server::ServerHandle;
use crate::session::ConversionSession;
use serde::Serialize;
use std::path::{Path, PathBuf};
use std::time::Instant;
use tokio::sync::Mutex;
use tracing::{error, info, warn};

/// Statistics for one successful conversion.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ConversionStats {
    /// Size of the source document.
    pub input_bytes: u64,
    /// Size of the written PDF.
    pub output_bytes: usize,
    /// How the input reached the engine.
    pub transfer: TransferStrategy,
    /// In-page console lines collected during the session.
    pub console_lines: usize,
    /// Navigation start until the engine reported ready.
    pub ready_ms: u64,
    /// Time inside the engine's entry point.
    pub conversion_ms: u64,
    /// Wall-clock time for the whole call.
    pub total_duration_ms: u64,
}

/// Converts presentations against one long-lived origin server.
///
/// # Example
/// ```rust,no_run
/// use pptx2pdf::{ConversionConfig, ConversionRequest, Converter};
///
/// # #[tokio::main]
/// # async fn main() -> Result<(), Box<dyn std::error::Error>> {
/// let converter = Converter::new(ConversionConfig::default())?;
/// converter.start().await?;
/// for name in ["q1", "q2", "q3"] {
///     let request = ConversionRequest::new(format!("{name}.pptx"), format!("{name}.pdf"));
///     converter.convert(&request).await?;
/// }
/// converter.stop().await?;
/// # Ok(())
/// # }
/// ```
pub struct Converter<L: BridgeLauncher = ChromeLauncher> {
    config: ConversionConfig,
    launcher: L,
    static_root: PathBuf,
    server: Mutex<Option<ServerHandle>>,
}

impl Converter<ChromeLauncher> {
    /// A converter that drives a locally installed Chromium.
    pub fn new(config: ConversionConfig) -> Result<Self, Pptx2PdfError> {
        Ok(Self::with_launcher(config, ChromeLauncher::new()?))
    }
}

impl<L: BridgeLauncher> Converter<L> {
    /// A converter using `launcher` to create each session's bridge.
    pub fn with_launcher(config: ConversionConfig, launcher: L) -> Self {
        let static_root = config.resolved_static_root();
        Self {
            config,
            launcher,
            static_root,
            server: Mutex::new(None),
        }
    }

    pub fn config(&self) -> &ConversionConfig {
        &self.config
    }

    pub fn static_root(&self) -> &Path {
        &self.static_root
    }

    /// Port of the running server, if any.
    pub async fn port(&self) -> Option<u16> {
        self.server
            .lock()
            .await
            .as_ref()
            .filter(|s| s.is_running())
            .map(ServerHandle::port)
    }

    /// Provision assets and start the origin server.
    ///
    /// Starting an already running converter logs a warning and returns the
    /// current port.
    pub async fn start(&self) -> Result<u16, Pptx2PdfError> {
        let mut guard = self.server.lock().await;
        if let Some(server) = guard.as_ref().filter(|s| s.is_running()) {
            warn!(port = server.port(), "converter already started");
            return Ok(server.port());
        }

        provision(&self.static_root, self.config.assets_url.clone()).await?;

        let mut server = ServerHandle::new(&self.static_root, self.config.port, self.config.verbose);
        server.start().await?;
        let port = server.port();
        *guard = Some(server);
        Ok(port)
    }

    /// Stop the origin server. Idempotent.
    pub async fn stop(&self) -> Result<(), Pptx2PdfError> {
        match self.server.lock().await.take() {
            Some(mut server) => server.stop().await,
            None => {
                warn!("converter not started; stop ignored");
                Ok(())
            }
        }
    }

    /// Convert one document against the running server.
    ///
    /// The destination is only created once the PDF passed validation; on
    /// any error it is left untouched.
    pub async fn convert(
        &self,
        request: &ConversionRequest,
    ) -> Result<ConversionStats, Pptx2PdfError> {
        let started = Instant::now();
        let resolved = preflight(request, &self.config)?;

        if let Some(ref cb) = self.config.progress_callback {
            cb.on_conversion_start(request.source());
        }
        info!(
            input = %request.source().display(),
            output = %request.destination().display(),
            transfer = %self.config.transfer,
            "starting conversion"
        );

        match self.run(request, &resolved, started).await {
            Ok(stats) => {
                if let Some(ref cb) = self.config.progress_callback {
                    cb.on_conversion_complete(request.destination(), stats.output_bytes);
                }
                info!(
                    output = %request.destination().display(),
                    bytes = stats.output_bytes,
                    elapsed_ms = stats.total_duration_ms,
                    "conversion finished"
                );
                Ok(stats)
            }
            Err(e) => {
                error!(input = %request.source().display(), error = %e, "conversion failed");
                if let Some(ref cb) = self.config.progress_callback {
                    cb.on_conversion_error(&e.to_string());
                }
                self.stop_if_faulted().await;
                Err(e)
            }
        }
    }

    async fn run(
        &self,
        request: &ConversionRequest,
        resolved: &ResolvedInput,
        started: Instant,
    ) -> Result<ConversionStats, Pptx2PdfError> {
        let origin = self.live_origin().await?;

        let bridge = self.launcher.launch(&self.config).await?;
        let mut session = ConversionSession::new(bridge, &self.config);
        if let Some(dir) = request.diagnostics_dir() {
            session = session.with_diagnostics_dir(dir);
        }
        let out = session.run(resolved, &origin, &self.static_root).await?;

        let output_bytes = out.document.len();
        output::write_atomic(request.destination(), out.document).await?;

        Ok(ConversionStats {
            input_bytes: resolved.size(),
            output_bytes,
            transfer: self.config.transfer,
            console_lines: out.console_lines,
            ready_ms: out.ready_after.as_millis() as u64,
            conversion_ms: out.conversion_time.as_millis() as u64,
            total_duration_ms: started.elapsed().as_millis() as u64,
        })
    }

    /// Origin of the running server, failing if it is absent or faulted.
    async fn live_origin(&self) -> Result<String, Pptx2PdfError> {
        let guard = self.server.lock().await;
        match guard.as_ref() {
            Some(server) if server.is_faulted() => Err(Pptx2PdfError::ServerFaulted {
                port: server.port(),
            }),
            Some(server) if server.is_running() => Ok(server.origin()),
            _ => Err(Pptx2PdfError::ServerNotRunning),
        }
    }

    async fn stop_if_faulted(&self) {
        let mut guard = self.server.lock().await;
        if guard.as_ref().is_some_and(ServerHandle::is_faulted) {
            if let Some(mut server) = guard.take() {
                warn!(port = server.port(), "origin server faulted; stopping it");
                if let Err(e) = server.stop().await {
                    warn!(error = %e, "failed to stop faulted server");
                }
            }
        }
    }
}

/// Input checks that must pass before any resource is acquired.
fn preflight(
    request: &ConversionRequest,
    config: &ConversionConfig,
) -> Result<ResolvedInput, Pptx2PdfError> {
    let resolved = input::resolve_input(request.source())?;
    config.transfer.check_size(&resolved)?;
    Ok(resolved)
}

/// Unpack (or fetch) the engine bundle off the async executor.
async fn provision(root: &Path, assets_url: Option<String>) -> Result<(), Pptx2PdfError> {
    let root = root.to_path_buf();
    let report = tokio::task::spawn_blocking(move || {
        let options = engine_assets::ProvisionOptions {
            download_url: assets_url.as_deref(),
            on_progress: None,
        };
        engine_assets::ensure_assets(&root, &options)
    })
    .await
    .map_err(|e| Pptx2PdfError::Internal(format!("asset provisioning panicked: {e}")))??;

    info!(root = %report.root.display(), source = ?report.source, "engine assets ready");
    Ok(())
}

/// Convert `input` to a PDF at `output` with a server scoped to this call.
///
/// The input is validated first: a missing or unsupported file fails without
/// provisioning assets or binding a port. Otherwise the server is started,
/// one session runs, and the server is stopped exactly once.
///
/// # Example
/// ```rust,no_run
/// use pptx2pdf::{convert, ConversionConfig};
///
/// # #[tokio::main]
/// # async fn main() -> Result<(), Box<dyn std::error::Error>> {
/// let config = ConversionConfig::builder().port(8711).build()?;
/// let stats = convert("slides.pptx", "slides.pdf", &config).await?;
/// println!("{} bytes written", stats.output_bytes);
/// # Ok(())
/// # }
/// ```
///
/// # Errors
/// Every [`Pptx2PdfError`] is fatal; use [`Pptx2PdfError::kind`] to decide
/// whether retrying (e.g. on another port) makes sense.
pub async fn convert(
    input: impl AsRef<Path>,
    output: impl AsRef<Path>,
    config: &ConversionConfig,
) -> Result<ConversionStats, Pptx2PdfError> {
    let launcher = ChromeLauncher::new()?;
    convert_with_launcher(
        &ConversionRequest::new(input.as_ref(), output.as_ref()),
        config,
        launcher,
    )
    .await
}

/// Scoped-mode conversion with a caller-supplied bridge launcher.
pub async fn convert_with_launcher<L: BridgeLauncher>(
    request: &ConversionRequest,
    config: &ConversionConfig,
    launcher: L,
) -> Result<ConversionStats, Pptx2PdfError> {
    preflight(request, config)?;

    let converter = Converter::with_launcher(config.clone(), launcher);
    converter.start().await?;
    let result = converter.convert(request).await;
    let stopped = converter.stop().await;

    let stats = result?;
    stopped?;
    Ok(stats)
}

/// Synchronous wrapper around [`convert`].
///
/// Creates a temporary tokio runtime internally.
pub fn convert_sync(
    input: impl AsRef<Path>,
    output: impl AsRef<Path>,
    config: &ConversionConfig,
) -> Result<ConversionStats, Pptx2PdfError> {
    tokio::runtime::Runtime::new()
        .map_err(|e| Pptx2PdfError::Internal(format!("Failed to create tokio runtime: {}", e)))?
        .block_on(convert(input, output, config))
}

/// Convert presentation bytes held in memory and return the PDF bytes.
///
/// The input is written to a managed temporary file (removed on return or
/// panic), so callers holding data from a database or upload need no
/// scratch files of their own.
pub async fn convert_bytes(
    bytes: &[u8],
    config: &ConversionConfig,
) -> Result<Vec<u8>, Pptx2PdfError> {
    let scratch = tempfile::Builder::new()
        .prefix("pptx2pdf-")
        .tempdir()
        .map_err(|e| Pptx2PdfError::Internal(format!("scratch directory: {e}")))?;
    let source = scratch.path().join("input.pptx");
    let destination = scratch.path().join("output.pdf");

    tokio::fs::write(&source, bytes)
        .await
        .map_err(|e| Pptx2PdfError::Internal(format!("scratch input: {e}")))?;
    convert(&source, &destination, config).await?;
    tokio::fs::read(&destination)
        .await
        .map_err(|e| Pptx2PdfError::Internal(format!("scratch output: {e}")))
}
