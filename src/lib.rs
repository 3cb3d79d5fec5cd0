//! # pptx2pdf
//!
//! Convert presentations to PDF by driving a LibreOffice build compiled to
//! WebAssembly inside headless Chromium.
//!
//! ## Why a browser?
//!
//! The office engine ships as a browser-executable bundle (`index.html`, a
//! large `.wasm` module and JavaScript glue) that relies on shared-memory
//! threads. Rather than embedding a WebAssembly runtime, this crate serves
//! the bundle from a local, cross-origin-isolated origin and lets Chromium
//! run it. The crate itself is the orchestration around that: server and
//! browser lifecycles, readiness synchronisation, moving bytes across the
//! page boundary, and turning every way this can go wrong into a typed error
//! with diagnostics on disk.
//!
//! ## Pipeline Overview
//!
//! ```text
//! presentation
//!  │
//!  ├─ 1. Input      existence, permissions, container magic, size ceiling
//!  ├─ 2. Assets     unpack static.tar.gz into the static root (engine-assets)
//!  ├─ 3. Server     axum origin on localhost:<port> with COOP/COEP headers
//!  ├─ 4. Session    Chromium → index.html → wait for readiness → convertPPTX
//!  ├─ 5. Output     base64 → bytes, minimum-size guard
//!  └─ 6. Write      atomic rename onto the destination
//! ```
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use pptx2pdf::{convert, ConversionConfig};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = ConversionConfig::default();
//!     let stats = convert("slides.pptx", "slides.pdf", &config).await?;
//!     eprintln!("{} bytes in {}ms", stats.output_bytes, stats.total_duration_ms);
//!     Ok(())
//! }
//! ```
//!
//! For many documents, start a [`Converter`] once and reuse its server.
//!
//! ## Feature Flags
//!
//! | Feature   | Default | Description |
//! |-----------|---------|-------------|
//! | `cli`     | on      | Enables the `pptx2pdf` binary (clap + anyhow + tracing-subscriber + indicatif) |
//! | `bundled` | off     | Embeds the engine archive named by `PPTX2PDF_BUNDLE_ARCHIVE` at build time |
//!
//! ## Environment
//!
//! | Variable              | Effect |
//! |-----------------------|--------|
//! | `PPTX2PDF_STATIC_DIR` | Static root holding the engine bundle |
//! | `PPTX2PDF_ASSETS_URL` | Where to download `static.tar.gz` from when the root is empty |
//! | `PPTX2PDF_CHROME`     | Chromium executable |

// ── Modules ──────────────────────────────────────────────────────────────

pub mod bridge;
pub mod browser;
pub mod config;
pub mod convert;
pub mod diagnostics;
pub mod error;
pub mod pipeline;
pub mod progress;
pub mod server;
pub mod session;

// ── Re-exports ───────────────────────────────────────────────────────────

pub use bridge::{BridgeContract, BridgeLauncher, EngineBridge, InvocationOutcome};
pub use browser::{ChromeBridge, ChromeLauncher};
pub use config::{ConversionConfig, ConversionConfigBuilder, ConversionRequest, DEFAULT_PORT};
pub use convert::{
    convert, convert_bytes, convert_sync, convert_with_launcher, ConversionStats, Converter,
};
pub use diagnostics::ConsoleLog;
pub use error::{ErrorKind, Pptx2PdfError};
pub use pipeline::transfer::TransferStrategy;
pub use progress::{ConversionProgressCallback, NoopProgressCallback, ProgressCallback};
pub use server::{ServerHandle, ServerState};
pub use session::SessionState;
