//! CLI binary for pptx2pdf.
//!
//! A thin shim over the library crate that maps CLI flags
//! to `ConversionConfig` and prints results.

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use futures::stream::{self, StreamExt};
use indicatif::{ProgressBar, ProgressStyle};
use pptx2pdf::pipeline::input::resolve_input;
use pptx2pdf::{
    ConversionConfig, ConversionProgressCallback, ConversionRequest, ConversionStats, Converter,
    Pptx2PdfError, ProgressCallback, ServerHandle, SessionState, TransferStrategy,
};
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tracing_subscriber::EnvFilter;

// ── ANSI colour helpers (no extra deps) ──────────────────────────────────────

fn green(s: &str) -> String {
    format!("\x1b[32m{s}\x1b[0m")
}
fn red(s: &str) -> String {
    format!("\x1b[31m{s}\x1b[0m")
}
fn dim(s: &str) -> String {
    format!("\x1b[2m{s}\x1b[0m")
}
fn bold(s: &str) -> String {
    format!("\x1b[1m{s}\x1b[0m")
}

const TICKS: &[&str] = &["⠋", "⠙", "⠹", "⠸", "⠼", "⠴", "⠦", "⠧", "⠇", "⠏", "⠿"];

// ── CLI progress callback using indicatif ────────────────────────────────────

/// Spinner that follows session stages and prints one line per finished file.
struct CliProgressCallback {
    bar: ProgressBar,
}

impl CliProgressCallback {
    fn new() -> Arc<Self> {
        let bar = ProgressBar::new_spinner();
        bar.set_style(
            ProgressStyle::with_template("{spinner:.cyan} {prefix:.bold}  {msg}  {elapsed:.dim}")
                .unwrap_or_else(|_| ProgressStyle::default_spinner())
                .tick_strings(TICKS),
        );
        bar.set_prefix("Preparing");
        bar.enable_steady_tick(Duration::from_millis(80));
        Arc::new(Self { bar })
    }

    fn finish(&self) {
        self.bar.finish_and_clear();
    }
}

impl ConversionProgressCallback for CliProgressCallback {
    fn on_conversion_start(&self, input: &Path) {
        let name = input
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| input.display().to_string());
        self.bar.set_prefix(name);
        self.bar.set_message("starting…");
    }

    fn on_stage(&self, state: SessionState) {
        if !state.is_terminal() {
            self.bar.set_message(format!("{state}…"));
        }
    }

    fn on_conversion_complete(&self, output: &Path, bytes: usize) {
        self.bar.println(format!(
            "  {} {}  {}",
            green("✓"),
            output.display(),
            dim(&format!("{} KiB", bytes.div_ceil(1024))),
        ));
    }

    fn on_conversion_error(&self, error: &str) {
        let first_line = error.lines().next().unwrap_or(error);
        self.bar.println(format!("  {} {}", red("✗"), red(first_line)));
    }
}

const AFTER_HELP: &str = r#"EXAMPLES:
  # Convert one presentation
  pptx2pdf convert slides.pptx slides.pdf

  # Another port, visible browser, engine output in the log
  pptx2pdf convert --port 8711 --headed --verbose slides.pptx slides.pdf

  # Large decks: let the engine fetch the file instead of passing base64
  pptx2pdf convert --transfer served-file big.pptx big.pdf

  # Many decks through one long-lived server
  pptx2pdf batch --out-dir pdf/ decks/*.pptx

  # Serve the engine bundle for manual debugging in a browser
  pptx2pdf serve --port 8000

ENVIRONMENT VARIABLES:
  PPTX2PDF_STATIC_DIR   Directory holding the engine bundle (index.html, .wasm, .js)
  PPTX2PDF_ASSETS_URL   Download URL for static.tar.gz when the bundle is missing
  PPTX2PDF_CHROME       Chrome/Chromium executable
  PPTX2PDF_PORT         Origin server port (default 8000)
  RUST_LOG              Overrides the log filter

SETUP:
  The engine bundle is read from ~/.cache/pptx2pdf/static/ unless
  PPTX2PDF_STATIC_DIR says otherwise. Drop static.tar.gz or static.zip into
  that directory; it is unpacked (and removed) on first use.

FAILURES:
  When the engine produces nothing, browser_logs.txt and debug_page.html are
  written to the current directory (see --diagnostics-dir). batch writes
  them to one subdirectory per input, named after the input file.
"#;

/// Convert presentations to PDF with a WebAssembly office engine in Chromium.
#[derive(Parser, Debug)]
#[command(
    name = "pptx2pdf",
    version,
    about = "Convert presentations to PDF with a WebAssembly office engine in headless Chromium",
    arg_required_else_help = true,
    color = clap::ColorChoice::Auto,
    after_long_help = AFTER_HELP
)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Convert one presentation.
    Convert {
        /// Source presentation (.pptx, .ppt, .odp).
        input: PathBuf,
        /// Destination PDF.
        output: PathBuf,
        #[command(flatten)]
        common: CommonArgs,
    },
    /// Convert many presentations through one server.
    Batch {
        /// Directory receiving `<name>.pdf` for every input.
        #[arg(short, long)]
        out_dir: PathBuf,
        /// Concurrent conversions, each with its own browser.
        #[arg(short, long, env = "PPTX2PDF_JOBS", default_value_t = 1,
              value_parser = clap::value_parser!(u16).range(1..=16))]
        jobs: u16,
        /// Print per-file statistics as JSON on stdout.
        #[arg(long)]
        json: bool,
        /// Source presentations.
        #[arg(required = true)]
        inputs: Vec<PathBuf>,
        #[command(flatten)]
        common: CommonArgs,
    },
    /// Serve the engine bundle with isolation headers until Ctrl-C.
    Serve {
        #[arg(short, long, env = "PPTX2PDF_PORT", default_value_t = pptx2pdf::DEFAULT_PORT)]
        port: u16,
        /// Static root (default: PPTX2PDF_STATIC_DIR or the cache directory).
        #[arg(long, env = "PPTX2PDF_STATIC_DIR")]
        static_dir: Option<PathBuf>,
        /// Suppress request logging.
        #[arg(short, long)]
        quiet: bool,
    },
}

#[derive(Args, Debug)]
struct CommonArgs {
    /// Origin server port.
    #[arg(short, long, env = "PPTX2PDF_PORT", default_value_t = pptx2pdf::DEFAULT_PORT)]
    port: u16,

    /// Run the browser without a window (default).
    #[arg(long, conflicts_with = "headed")]
    headless: bool,

    /// Show the browser window.
    #[arg(long, env = "PPTX2PDF_HEADED")]
    headed: bool,

    /// How the input reaches the engine.
    #[arg(long, env = "PPTX2PDF_TRANSFER", value_enum, default_value = "inline-base64")]
    transfer: TransferArg,

    /// Chrome/Chromium executable.
    #[arg(long, env = "PPTX2PDF_CHROME")]
    chrome: Option<PathBuf>,

    /// Directory holding the engine bundle.
    #[arg(long, env = "PPTX2PDF_STATIC_DIR")]
    static_dir: Option<PathBuf>,

    /// Download URL for static.tar.gz when the bundle is missing.
    #[arg(long, env = "PPTX2PDF_ASSETS_URL")]
    assets_url: Option<String>,

    /// Where browser_logs.txt and debug_page.html go on failure.
    #[arg(long, env = "PPTX2PDF_DIAGNOSTICS_DIR", default_value = ".")]
    diagnostics_dir: PathBuf,

    /// Seconds to wait for the engine to initialise.
    #[arg(long, env = "PPTX2PDF_READY_TIMEOUT", default_value_t = 120)]
    ready_timeout: u64,

    /// Smallest PDF accepted, in bytes.
    #[arg(long, env = "PPTX2PDF_MIN_OUTPUT", default_value_t = 100)]
    min_output: usize,

    /// Enable DEBUG-level tracing logs and echo the page console.
    #[arg(short, long, env = "PPTX2PDF_VERBOSE")]
    verbose: bool,

    /// Suppress all output except errors.
    #[arg(short, long, env = "PPTX2PDF_QUIET")]
    quiet: bool,

    /// Disable the progress spinner.
    #[arg(long, env = "PPTX2PDF_NO_PROGRESS")]
    no_progress: bool,
}

#[derive(clap::ValueEnum, Clone, Copy, Debug)]
enum TransferArg {
    InlineBase64,
    ServedFile,
}

impl From<TransferArg> for TransferStrategy {
    fn from(v: TransferArg) -> Self {
        match v {
            TransferArg::InlineBase64 => TransferStrategy::InlineBase64,
            TransferArg::ServedFile => TransferStrategy::ServedFile,
        }
    }
}

impl CommonArgs {
    fn show_progress(&self) -> bool {
        !self.quiet && !self.no_progress && !self.verbose
    }

    fn log_filter(&self) -> &'static str {
        if self.verbose {
            "debug"
        } else if self.quiet || self.show_progress() {
            "error"
        } else {
            "info"
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let filter = match &cli.command {
        Command::Convert { common, .. } | Command::Batch { common, .. } => common.log_filter(),
        Command::Serve { quiet: true, .. } => "warn",
        Command::Serve { .. } => "info",
    };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter)),
        )
        .with_writer(io::stderr)
        .init();

    match cli.command {
        Command::Convert {
            input,
            output,
            common,
        } => run_convert(input, output, common).await,
        Command::Batch {
            out_dir,
            jobs,
            json,
            inputs,
            common,
        } => run_batch(out_dir, jobs as usize, json, inputs, common).await,
        Command::Serve {
            port,
            static_dir,
            quiet,
        } => run_serve(port, static_dir, quiet).await,
    }
}

async fn run_convert(input: PathBuf, output: PathBuf, common: CommonArgs) -> Result<()> {
    preflight(&input, common.transfer.into()).context("Invalid input")?;

    let progress = common.show_progress().then(CliProgressCallback::new);
    let config = build_config(&common, progress.clone().map(|p| p as ProgressCallback))?;
    prepare_assets(&config, common.quiet)?;

    let result = pptx2pdf::convert(&input, &output, &config).await;
    if let Some(ref p) = progress {
        p.finish();
    }
    let stats = result.context("Conversion failed")?;

    if !common.quiet {
        print_summary(&output, &stats);
    }
    Ok(())
}

async fn run_batch(
    out_dir: PathBuf,
    jobs: usize,
    json: bool,
    inputs: Vec<PathBuf>,
    common: CommonArgs,
) -> Result<()> {
    tokio::fs::create_dir_all(&out_dir)
        .await
        .with_context(|| format!("Failed to create {}", out_dir.display()))?;

    // Each input gets its own diagnostics subdirectory so concurrent
    // failures do not overwrite each other's artifacts.
    let requests: Vec<ConversionRequest> = inputs
        .iter()
        .map(|input| {
            let stem = input
                .file_stem()
                .map(|s| s.to_string_lossy().into_owned())
                .unwrap_or_else(|| "output".into());
            ConversionRequest::new(input, out_dir.join(format!("{stem}.pdf")))
                .with_diagnostics_dir(common.diagnostics_dir.join(&stem))
        })
        .collect();

    let progress = common.show_progress().then(CliProgressCallback::new);
    let mut results = Vec::with_capacity(requests.len());
    let mut runnable = Vec::with_capacity(requests.len());
    for request in &requests {
        match preflight(request.source(), common.transfer.into()) {
            Ok(()) => runnable.push(request),
            Err(e) => {
                if let Some(ref p) = progress {
                    p.on_conversion_error(&format!("{}: {e}", request.source().display()));
                }
                results.push((request, Err(e)));
            }
        }
    }

    if !runnable.is_empty() {
        let config = build_config(&common, progress.clone().map(|p| p as ProgressCallback))?;
        prepare_assets(&config, common.quiet)?;

        let converter = Converter::new(config).context("Failed to initialise converter")?;
        let port = converter.start().await.context("Failed to start origin server")?;
        if !common.quiet {
            eprintln!(
                "{} serving engine on port {}  ({} files, {} at a time)",
                bold("◆"),
                port,
                runnable.len(),
                jobs
            );
        }

        let converted: Vec<_> = stream::iter(runnable)
            .map(|request| {
                let converter = &converter;
                async move { (request, converter.convert(request).await) }
            })
            .buffer_unordered(jobs)
            .collect()
            .await;
        results.extend(converted);

        converter.stop().await.context("Failed to stop origin server")?;
    }
    if let Some(ref p) = progress {
        p.finish();
    }

    let mut failed = 0usize;
    let mut report = Vec::new();
    for (request, result) in &results {
        match result {
            Ok(stats) => report.push(serde_json::json!({
                "input": request.source(),
                "output": request.destination(),
                "stats": stats,
            })),
            Err(e) => {
                failed += 1;
                if progress.is_none() && !common.quiet {
                    eprintln!("{} {}: {}", red("✗"), request.source().display(), e);
                }
                report.push(serde_json::json!({
                    "input": request.source(),
                    "error": e.to_string(),
                }));
            }
        }
    }

    if json {
        println!(
            "{}",
            serde_json::to_string_pretty(&report).context("Failed to serialise report")?
        );
    }
    if !common.quiet {
        eprintln!(
            "{} {}/{} converted",
            if failed == 0 { green("✔") } else { red("✘") },
            bold(&(results.len() - failed).to_string()),
            results.len()
        );
    }

    if failed > 0 {
        anyhow::bail!("{failed} of {} conversions failed", results.len());
    }
    Ok(())
}

async fn run_serve(port: u16, static_dir: Option<PathBuf>, quiet: bool) -> Result<()> {
    let root = static_dir.unwrap_or_else(engine_assets::default_static_root);
    tokio::task::block_in_place(|| {
        engine_assets::ensure_assets(&root, &engine_assets::ProvisionOptions::default())
    })
    .context("Engine assets unavailable")?;

    let mut server = ServerHandle::new(&root, port, !quiet);
    server.start().await.context("Failed to start origin server")?;
    eprintln!(
        "{} serving {} at {}/index.html  (Ctrl-C to stop)",
        green("◆"),
        root.display(),
        server.origin()
    );

    tokio::signal::ctrl_c()
        .await
        .context("Failed to listen for Ctrl-C")?;
    server.stop().await.context("Failed to stop origin server")?;
    Ok(())
}

/// Input checks that need neither assets nor a server.
fn preflight(input: &Path, transfer: TransferStrategy) -> Result<(), Pptx2PdfError> {
    let resolved = resolve_input(input)?;
    transfer.check_size(&resolved)
}

/// Unpack or download the engine bundle up front so a download gets a progress bar.
fn prepare_assets(config: &ConversionConfig, quiet: bool) -> Result<()> {
    let root = config.resolved_static_root();
    if engine_assets::is_provisioned(&root) && engine_assets::pending_archives(&root).is_empty() {
        return Ok(());
    }

    if quiet {
        let options = engine_assets::ProvisionOptions {
            download_url: config.assets_url.as_deref(),
            on_progress: None,
        };
        tokio::task::block_in_place(|| engine_assets::ensure_assets(&root, &options))
            .context("Engine assets unavailable")?;
        return Ok(());
    }

    let bar = ProgressBar::new(0);
    bar.set_style(
        ProgressStyle::with_template(
            "{spinner:.cyan} {prefix:.bold}  \
             [{bar:42.green/238}] {bytes}/{total_bytes}  ETA {eta_precise}",
        )
        .unwrap_or_else(|_| ProgressStyle::default_bar())
        .progress_chars("█▉▊▋▌▍▎▏  ")
        .tick_strings(TICKS),
    );
    bar.set_prefix("Engine assets");
    bar.enable_steady_tick(Duration::from_millis(80));

    let on_progress = |downloaded: u64, total: Option<u64>| {
        if let Some(t) = total {
            if bar.length().unwrap_or(0) != t {
                bar.set_length(t);
            }
        }
        bar.set_position(downloaded);
    };
    let options = engine_assets::ProvisionOptions {
        download_url: config.assets_url.as_deref(),
        on_progress: Some(&on_progress),
    };
    let report = tokio::task::block_in_place(|| engine_assets::ensure_assets(&root, &options));
    bar.finish_and_clear();

    let report = report.context("Engine assets unavailable")?;
    eprintln!(
        "{} engine assets ready in {}  {}",
        green("✔"),
        report.root.display(),
        dim(&format!("({:?}, {} entries)", report.source, report.unpacked_entries)),
    );
    Ok(())
}

/// Map CLI args to `ConversionConfig`.
fn build_config(common: &CommonArgs, progress: Option<ProgressCallback>) -> Result<ConversionConfig> {
    let mut builder = ConversionConfig::builder()
        .port(common.port)
        .headless(common.headless || !common.headed)
        .verbose(common.verbose)
        .transfer(common.transfer.into())
        .diagnostics_dir(&common.diagnostics_dir)
        .ready_timeout_secs(common.ready_timeout)
        .min_output_bytes(common.min_output);

    if let Some(ref dir) = common.static_dir {
        builder = builder.static_root(dir);
    }
    if let Some(ref url) = common.assets_url {
        builder = builder.assets_url(url);
    }
    if let Some(ref chrome) = common.chrome {
        builder = builder.chrome_path(chrome);
    }
    if let Some(cb) = progress {
        builder = builder.progress_callback(cb);
    }

    builder.build().context("Invalid configuration")
}

fn print_summary(output: &Path, stats: &ConversionStats) {
    eprintln!(
        "{}  {}  {}  →  {}",
        green("✔"),
        dim(&format!("{} KiB", stats.output_bytes.div_ceil(1024))),
        dim(&format!("{}ms", stats.total_duration_ms)),
        bold(&output.display().to_string()),
    );
    eprintln!(
        "   engine ready after {}ms, conversion {}ms, {} console lines",
        stats.ready_ms, stats.conversion_ms, stats.console_lines
    );
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse_convert(args: &[&str]) -> (PathBuf, PathBuf, CommonArgs) {
        let argv = ["pptx2pdf", "convert"].iter().chain(args.iter());
        match Cli::try_parse_from(argv).unwrap().command {
            Command::Convert {
                input,
                output,
                common,
            } => (input, output, common),
            other => panic!("unexpected command: {other:?}"),
        }
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn invalid_input_is_rejected_before_assets_are_fetched() {
        let dir = tempfile::tempdir().unwrap();
        let static_dir = dir.path().join("static");
        std::fs::create_dir(&static_dir).unwrap();
        let input = dir.path().join("notes.pptx");
        std::fs::write(&input, "just some text, not a presentation").unwrap();
        let output = dir.path().join("notes.pdf");

        let (input, output, common) = parse_convert(&[
            "--quiet",
            "--static-dir",
            static_dir.to_str().unwrap(),
            "--assets-url",
            "http://127.0.0.1:9/static.tar.gz",
            input.to_str().unwrap(),
            output.to_str().unwrap(),
        ]);
        let err = run_convert(input, output.clone(), common).await.unwrap_err();

        assert!(
            format!("{err:#}").contains("not a supported presentation"),
            "got: {err:#}"
        );
        assert_eq!(std::fs::read_dir(&static_dir).unwrap().count(), 0);
        assert!(!output.exists());
    }

    #[test]
    fn oversized_inline_input_fails_preflight() {
        let dir = tempfile::tempdir().unwrap();
        let input = dir.path().join("huge.pptx");
        let file = std::fs::File::create(&input).unwrap();
        std::io::Write::write_all(&mut &file, b"PK\x03\x04").unwrap();
        file.set_len(TransferStrategy::InlineBase64.max_input_bytes() + 1)
            .unwrap();

        let err = preflight(&input, TransferStrategy::InlineBase64).unwrap_err();
        assert!(matches!(err, Pptx2PdfError::InputTooLarge { .. }), "got: {err:?}");
        preflight(&input, TransferStrategy::ServedFile).unwrap();
    }

    #[test]
    fn batch_inputs_parse_with_shared_flags() {
        let cli = Cli::try_parse_from([
            "pptx2pdf", "batch", "--out-dir", "pdf", "--jobs", "3", "a.pptx", "b.pptx",
        ])
        .unwrap();
        match cli.command {
            Command::Batch { jobs, inputs, .. } => {
                assert_eq!(jobs, 3);
                assert_eq!(inputs.len(), 2);
            }
            other => panic!("unexpected command: {other:?}"),
        }
    }
}
