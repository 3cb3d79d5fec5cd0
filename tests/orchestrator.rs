//! Orchestrator integration tests.
//!
//! These run the real origin server and the real orchestration code against
//! a scripted engine bridge, so no browser or engine bundle is needed. The
//! fake bridge talks to the server over HTTP exactly like the page would:
//! navigation fetches `index.html` and checks the isolation headers, and the
//! served-file strategy fetches the input copy.
//!
//! Run with:
//!   cargo test --test orchestrator

use async_trait::async_trait;
use base64::{engine::general_purpose::STANDARD, Engine as _};
use pptx2pdf::{
    convert_with_launcher, BridgeLauncher, ConsoleLog, ConversionConfig, ConversionRequest,
    Converter, EngineBridge, ErrorKind, InvocationOutcome, Pptx2PdfError, TransferStrategy,
};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio_test::{assert_err, assert_ok};

// ── Scripted engine ──────────────────────────────────────────────────────────

#[derive(Clone, Copy, Debug)]
enum Engine {
    /// Returns a base64 document of this many bytes.
    Inline(usize),
    /// Writes a document of this many bytes to the virtual FS, returns `true`.
    Stored(usize),
    /// Returns `true` without writing anything.
    StoredNothing,
    /// Returns `null`.
    Null,
    /// Readiness flag never set.
    NeverReady,
    /// Fetches the URL it was given and echoes the bytes back as the document.
    EchoServed,
}

/// Shared between launches, like a page reused across conversions.
#[derive(Default)]
struct VirtualFs {
    output: Mutex<Option<String>>,
}

#[derive(Clone)]
struct FakeLauncher {
    engine: Engine,
    vfs: Arc<VirtualFs>,
    launches: Arc<AtomicUsize>,
}

impl FakeLauncher {
    fn new(engine: Engine) -> Self {
        Self {
            engine,
            vfs: Arc::default(),
            launches: Arc::default(),
        }
    }

    fn launches(&self) -> usize {
        self.launches.load(Ordering::SeqCst)
    }
}

struct FakeBridge {
    engine: Engine,
    vfs: Arc<VirtualFs>,
    console: ConsoleLog,
    http: reqwest::Client,
}

#[async_trait]
impl BridgeLauncher for FakeLauncher {
    type Bridge = FakeBridge;

    async fn launch(&self, _config: &ConversionConfig) -> Result<FakeBridge, Pptx2PdfError> {
        self.launches.fetch_add(1, Ordering::SeqCst);
        Ok(FakeBridge {
            engine: self.engine,
            vfs: self.vfs.clone(),
            console: ConsoleLog::new(),
            http: reqwest::Client::builder().no_proxy().build().unwrap(),
        })
    }
}

fn pdf_b64(len: usize) -> String {
    let mut doc = b"%PDF-1.7\n".to_vec();
    doc.resize(len, b' ');
    STANDARD.encode(doc)
}

#[async_trait]
impl EngineBridge for FakeBridge {
    async fn navigate(&mut self, url: &str) -> Result<(), Pptx2PdfError> {
        let failed = |reason: String| Pptx2PdfError::NavigationFailed {
            url: url.to_string(),
            reason,
        };
        let resp = self
            .http
            .get(url)
            .send()
            .await
            .map_err(|e| failed(e.to_string()))?;
        if !resp.status().is_success() {
            return Err(failed(format!("HTTP {}", resp.status())));
        }
        let coop = resp.headers().get("cross-origin-opener-policy").cloned();
        let coep = resp.headers().get("cross-origin-embedder-policy").cloned();
        if coop.as_ref().map(|v| v.as_bytes()) != Some(b"same-origin")
            || coep.as_ref().map(|v| v.as_bytes()) != Some(b"require-corp")
        {
            self.console.push("SharedArrayBuffer is not defined");
            return Err(failed("page is not cross-origin isolated".into()));
        }
        self.console.push("soffice.js loading");
        Ok(())
    }

    async fn is_ready(&mut self, _timeout: Duration) -> Result<bool, Pptx2PdfError> {
        Ok(!matches!(self.engine, Engine::NeverReady))
    }

    async fn invoke_conversion(
        &mut self,
        argument: &str,
    ) -> Result<InvocationOutcome, Pptx2PdfError> {
        self.console.push("convertPPTX called");
        match self.engine {
            Engine::Inline(n) => Ok(InvocationOutcome::Inline(pdf_b64(n))),
            Engine::Stored(n) => {
                *self.vfs.output.lock().unwrap() = Some(pdf_b64(n));
                Ok(InvocationOutcome::Stored)
            }
            Engine::StoredNothing => Ok(InvocationOutcome::Stored),
            Engine::Null | Engine::NeverReady => Ok(InvocationOutcome::Empty),
            Engine::EchoServed => {
                let resp = self.http.get(argument).send().await.map_err(|e| {
                    Pptx2PdfError::InPageException {
                        message: format!("fetch failed: {e}"),
                    }
                })?;
                if !resp.status().is_success() {
                    return Err(Pptx2PdfError::InPageException {
                        message: format!("fetch returned {}", resp.status()),
                    });
                }
                let bytes = resp.bytes().await.unwrap();
                Ok(InvocationOutcome::Inline(STANDARD.encode(&bytes)))
            }
        }
    }

    async fn read_output(&mut self) -> Result<String, Pptx2PdfError> {
        self.vfs
            .output
            .lock()
            .unwrap()
            .clone()
            .ok_or_else(|| Pptx2PdfError::OutputMissing {
                path: "/tmp/output.pdf".into(),
                message: "ErrnoError: No such file or directory".into(),
            })
    }

    async fn clear_output(&mut self) -> Result<bool, Pptx2PdfError> {
        Ok(self.vfs.output.lock().unwrap().take().is_some())
    }

    async fn page_snapshot(&mut self) -> Result<String, Pptx2PdfError> {
        Ok("<html><body><div id=\"status\">failed</div></body></html>".into())
    }

    fn console_log(&self) -> ConsoleLog {
        self.console.clone()
    }

    async fn close(&mut self) -> Result<(), Pptx2PdfError> {
        Ok(())
    }
}

// ── Fixture ──────────────────────────────────────────────────────────────────

struct Workspace {
    dir: tempfile::TempDir,
}

impl Workspace {
    fn new() -> Self {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path().join("static");
        std::fs::create_dir_all(&root).unwrap();
        std::fs::write(root.join("index.html"), "<html><script src=\"soffice.js\"></script></html>")
            .unwrap();
        std::fs::create_dir_all(dir.path().join("diag")).unwrap();
        Self { dir }
    }

    fn path(&self, name: &str) -> PathBuf {
        self.dir.path().join(name)
    }

    fn static_root(&self) -> PathBuf {
        self.path("static")
    }

    fn diag(&self) -> PathBuf {
        self.path("diag")
    }

    /// A small but well-formed-looking presentation container.
    fn deck(&self, name: &str) -> PathBuf {
        let p = self.path(name);
        let mut bytes = b"PK\x03\x04".to_vec();
        bytes.extend_from_slice(name.as_bytes());
        bytes.resize(50 * 1024, 0x20);
        std::fs::write(&p, bytes).unwrap();
        p
    }

    fn config(&self) -> ConversionConfig {
        ConversionConfig::builder()
            .port(0)
            .static_root(self.static_root())
            .diagnostics_dir(self.diag())
            .ready_timeout_secs(1)
            .build()
            .unwrap()
    }
}

fn free_port_listener() -> (std::net::TcpListener, u16) {
    let l = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
    let port = l.local_addr().unwrap().port();
    (l, port)
}

fn static_root_entries(root: &Path) -> usize {
    std::fs::read_dir(root).unwrap().count()
}

// ── Scoped mode ──────────────────────────────────────────────────────────────

#[tokio::test]
async fn scoped_conversion_writes_pdf() {
    let ws = Workspace::new();
    let input = ws.deck("quarterly.pptx");
    let output = ws.path("out/quarterly.pdf");
    let launcher = FakeLauncher::new(Engine::Inline(4096));

    let stats = assert_ok!(
        convert_with_launcher(&ConversionRequest::new(&input, &output), &ws.config(), launcher.clone())
            .await
    );

    assert_eq!(std::fs::metadata(&output).unwrap().len(), 4096);
    assert!(std::fs::read(&output).unwrap().starts_with(b"%PDF"));
    assert_eq!(stats.output_bytes, 4096);
    assert_eq!(stats.input_bytes, 50 * 1024);
    assert_eq!(stats.console_lines, 2);
    assert_eq!(launcher.launches(), 1);
    assert!(!ws.diag().join("browser_logs.txt").exists());
}

#[tokio::test]
async fn null_result_leaves_destination_untouched() {
    let ws = Workspace::new();
    let input = ws.deck("broken.pptx");
    let output = ws.path("broken.pdf");
    std::fs::write(&output, b"previous contents").unwrap();

    let err = assert_err!(
        convert_with_launcher(
            &ConversionRequest::new(&input, &output),
            &ws.config(),
            FakeLauncher::new(Engine::Null),
        )
        .await
    );

    assert!(matches!(err, Pptx2PdfError::EmptyResult), "got: {err:?}");
    assert_eq!(err.kind(), ErrorKind::ConversionFailed);
    assert_eq!(std::fs::read(&output).unwrap(), b"previous contents");

    let log = std::fs::read_to_string(ws.diag().join("browser_logs.txt")).unwrap();
    assert_eq!(log, "soffice.js loading\nconvertPPTX called");
    let html = std::fs::read_to_string(ws.diag().join("debug_page.html")).unwrap();
    assert!(html.contains("status"));
}

#[tokio::test]
async fn tiny_output_is_rejected_without_output_file() {
    let ws = Workspace::new();
    let input = ws.deck("tiny.pptx");
    let output = ws.path("tiny.pdf");

    let err = convert_with_launcher(
        &ConversionRequest::new(&input, &output),
        &ws.config(),
        FakeLauncher::new(Engine::Inline(40)),
    )
    .await
    .unwrap_err();

    assert!(matches!(err, Pptx2PdfError::OutputTooSmall { size: 40, min: 100 }));
    assert!(!output.exists());
    assert!(ws.diag().join("debug_page.html").exists());
}

#[tokio::test]
async fn missing_input_starts_nothing() {
    let ws = Workspace::new();
    let (blocker, port) = free_port_listener();
    drop(blocker);
    let config = ConversionConfig::builder()
        .port(port)
        .static_root(ws.path("never-created"))
        .build()
        .unwrap();
    let launcher = FakeLauncher::new(Engine::Inline(4096));

    let err = convert_with_launcher(
        &ConversionRequest::new(ws.path("nope.pptx"), ws.path("nope.pdf")),
        &config,
        launcher.clone(),
    )
    .await
    .unwrap_err();

    assert_eq!(err.kind(), ErrorKind::Precondition);
    assert_eq!(launcher.launches(), 0);
    assert!(!ws.path("never-created").exists());
    // No server was bound.
    assert!(std::net::TcpStream::connect(("127.0.0.1", port)).is_err());
}

#[tokio::test]
async fn occupied_port_is_reported() {
    let ws = Workspace::new();
    let input = ws.deck("deck.pptx");
    let (_blocker, port) = free_port_listener();
    let config = ConversionConfig::builder()
        .port(port)
        .static_root(ws.static_root())
        .build()
        .unwrap();
    let launcher = FakeLauncher::new(Engine::Inline(4096));

    let err = convert_with_launcher(
        &ConversionRequest::new(&input, ws.path("deck.pdf")),
        &config,
        launcher.clone(),
    )
    .await
    .unwrap_err();

    assert!(matches!(err, Pptx2PdfError::PortInUse { port: p } if p == port));
    assert_eq!(err.kind(), ErrorKind::ResourceConflict);
    assert!(err.to_string().contains(&port.to_string()));
    assert_eq!(launcher.launches(), 0);
}

#[tokio::test]
async fn missing_assets_is_a_precondition() {
    let ws = Workspace::new();
    let input = ws.deck("deck.pptx");
    let empty_root = ws.path("empty-static");
    std::fs::create_dir_all(&empty_root).unwrap();
    let config = ConversionConfig::builder()
        .port(0)
        .static_root(&empty_root)
        .build()
        .unwrap();

    let err = convert_with_launcher(
        &ConversionRequest::new(&input, ws.path("deck.pdf")),
        &config,
        FakeLauncher::new(Engine::Inline(4096)),
    )
    .await
    .unwrap_err();

    assert!(matches!(err, Pptx2PdfError::MissingAssets { .. }), "got: {err:?}");
    assert_eq!(err.kind(), ErrorKind::Precondition);
}

#[tokio::test]
async fn readiness_timeout_after_full_bound() {
    let ws = Workspace::new();
    let input = ws.deck("deck.pptx");
    let output = ws.path("deck.pdf");

    let started = std::time::Instant::now();
    let err = convert_with_launcher(
        &ConversionRequest::new(&input, &output),
        &ws.config(),
        FakeLauncher::new(Engine::NeverReady),
    )
    .await
    .unwrap_err();

    assert!(matches!(err, Pptx2PdfError::EngineInitTimeout { secs: 1 }));
    assert_eq!(err.kind(), ErrorKind::EngineInitTimeout);
    assert!(started.elapsed() >= Duration::from_secs(1));
    assert!(!output.exists());
    assert!(ws.diag().join("browser_logs.txt").exists());
}

#[tokio::test]
async fn served_file_transfer_round_trips_through_server() {
    let ws = Workspace::new();
    let input = ws.deck("served.pptx");
    let output = ws.path("served.pdf");
    let config = ConversionConfig::builder()
        .port(0)
        .static_root(ws.static_root())
        .diagnostics_dir(ws.diag())
        .transfer(TransferStrategy::ServedFile)
        .build()
        .unwrap();

    let stats = convert_with_launcher(
        &ConversionRequest::new(&input, &output),
        &config,
        FakeLauncher::new(Engine::EchoServed),
    )
    .await
    .unwrap();

    assert_eq!(stats.transfer, TransferStrategy::ServedFile);
    assert_eq!(std::fs::read(&output).unwrap(), std::fs::read(&input).unwrap());
    // Only index.html remains: the served copy was removed.
    assert_eq!(static_root_entries(&ws.static_root()), 1);
}

// ── Reuse mode ───────────────────────────────────────────────────────────────

#[tokio::test]
async fn reused_server_serves_sequential_conversions() {
    let ws = Workspace::new();
    let launcher = FakeLauncher::new(Engine::Stored(2048));
    let converter = Converter::with_launcher(ws.config(), launcher.clone());
    let port = converter.start().await.unwrap();
    assert_eq!(converter.port().await, Some(port));

    for name in ["a", "b", "c"] {
        let input = ws.deck(&format!("{name}.pptx"));
        let output = ws.path(&format!("{name}.pdf"));
        converter
            .convert(&ConversionRequest::new(&input, &output))
            .await
            .unwrap();
        assert_eq!(std::fs::metadata(&output).unwrap().len(), 2048);
        assert!(launcher.vfs.output.lock().unwrap().is_none(), "output path not cleared");
    }

    converter.stop().await.unwrap();
    converter.stop().await.unwrap();
    assert!(converter.port().await.is_none());
    assert_eq!(launcher.launches(), 3);
}

#[tokio::test]
async fn previous_output_never_leaks_into_next_result() {
    let ws = Workspace::new();
    let first = FakeLauncher::new(Engine::Stored(4096));
    let vfs = first.vfs.clone();

    let converter = Converter::with_launcher(ws.config(), first);
    converter.start().await.unwrap();
    converter
        .convert(&ConversionRequest::new(ws.deck("one.pptx"), ws.path("one.pdf")))
        .await
        .unwrap();
    converter.stop().await.unwrap();

    // Same virtual filesystem, but this time the engine writes nothing.
    let second = FakeLauncher {
        engine: Engine::StoredNothing,
        vfs,
        launches: Arc::default(),
    };
    let converter = Converter::with_launcher(ws.config(), second);
    converter.start().await.unwrap();
    let err = converter
        .convert(&ConversionRequest::new(ws.deck("two.pptx"), ws.path("two.pdf")))
        .await
        .unwrap_err();
    converter.stop().await.unwrap();

    assert!(matches!(err, Pptx2PdfError::OutputMissing { .. }), "got: {err:?}");
    assert_eq!(err.kind(), ErrorKind::ConversionFailed);
    assert!(!ws.path("two.pdf").exists());
    assert!(ws.diag().join("browser_logs.txt").exists());
}

#[tokio::test]
async fn concurrent_conversions_share_one_server() {
    let ws = Workspace::new();
    let config = ConversionConfig::builder()
        .port(0)
        .static_root(ws.static_root())
        .diagnostics_dir(ws.diag())
        .transfer(TransferStrategy::ServedFile)
        .build()
        .unwrap();
    let launcher = FakeLauncher::new(Engine::EchoServed);
    let converter = Converter::with_launcher(config, launcher.clone());
    converter.start().await.unwrap();

    let (a_in, b_in) = (ws.deck("left.pptx"), ws.deck("right.pptx"));
    let (a_out, b_out) = (ws.path("left.pdf"), ws.path("right.pdf"));
    let a_req = ConversionRequest::new(&a_in, &a_out);
    let b_req = ConversionRequest::new(&b_in, &b_out);
    let (a, b) = tokio::join!(converter.convert(&a_req), converter.convert(&b_req));
    converter.stop().await.unwrap();

    a.unwrap();
    b.unwrap();
    assert_eq!(std::fs::read(&a_out).unwrap(), std::fs::read(&a_in).unwrap());
    assert_eq!(std::fs::read(&b_out).unwrap(), std::fs::read(&b_in).unwrap());
    assert_eq!(launcher.launches(), 2);
}

#[tokio::test]
async fn concurrent_failures_keep_separate_diagnostics() {
    let ws = Workspace::new();
    let converter = Converter::with_launcher(ws.config(), FakeLauncher::new(Engine::Null));
    converter.start().await.unwrap();

    let (a_diag, b_diag) = (ws.diag().join("left"), ws.diag().join("right"));
    let a_req = ConversionRequest::new(ws.deck("left.pptx"), ws.path("left.pdf"))
        .with_diagnostics_dir(&a_diag);
    let b_req = ConversionRequest::new(ws.deck("right.pptx"), ws.path("right.pdf"))
        .with_diagnostics_dir(&b_diag);
    let (a, b) = tokio::join!(converter.convert(&a_req), converter.convert(&b_req));
    converter.stop().await.unwrap();

    assert!(matches!(a, Err(Pptx2PdfError::EmptyResult)), "got: {a:?}");
    assert!(matches!(b, Err(Pptx2PdfError::EmptyResult)), "got: {b:?}");
    for dir in [&a_diag, &b_diag] {
        assert!(dir.join("browser_logs.txt").exists(), "{}", dir.display());
        assert!(dir.join("debug_page.html").exists(), "{}", dir.display());
    }
    assert!(!ws.diag().join("browser_logs.txt").exists());
}

#[tokio::test]
async fn start_twice_keeps_the_same_server() {
    let ws = Workspace::new();
    let converter = Converter::with_launcher(ws.config(), FakeLauncher::new(Engine::Inline(200)));
    let first = converter.start().await.unwrap();
    let second = converter.start().await.unwrap();
    assert_eq!(first, second);
    converter.stop().await.unwrap();
}

#[test]
fn sync_wrapper_reports_missing_input() {
    let err = pptx2pdf::convert_sync(
        "/definitely/not/here.pptx",
        "/tmp/never-written.pdf",
        &ConversionConfig::default(),
    )
    .unwrap_err();
    assert!(matches!(err, Pptx2PdfError::InputNotFound { .. }));
}
