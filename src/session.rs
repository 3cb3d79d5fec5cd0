//! One browser-driven conversion attempt.
//!
//! ```text
//! Created → Navigating → AwaitingEngineReady → Transferring → Converting → Completed
//!     └──────────┴──────────────┴────────────────────┴─────────────┴────→ Failed
//! ```
//!
//! The steps run strictly in this order because the in-page engine is not
//! re-entrant. Both terminal states close the bridge and drop the served input
//! copy. `Failed` additionally persists the console log and a page snapshot
//! to the diagnostics directory before the error is returned.

use crate::bridge::{EngineBridge, InvocationOutcome};
use crate::config::ConversionConfig;
use crate::diagnostics::{self, ConsoleLog};
use crate::error::Pptx2PdfError;
use crate::pipeline::input::ResolvedInput;
use crate::pipeline::{output, transfer};
use std::fmt;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, info, warn};

/// Interval between two evaluations of the readiness expression.
pub const READY_POLL_INTERVAL: Duration = Duration::from_millis(250);

/// Where a session currently is in its lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Created,
    Navigating,
    AwaitingEngineReady,
    Transferring,
    Converting,
    Completed,
    Failed,
}

impl SessionState {
    pub fn is_terminal(self) -> bool {
        matches!(self, SessionState::Completed | SessionState::Failed)
    }
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            SessionState::Created => "created",
            SessionState::Navigating => "navigating",
            SessionState::AwaitingEngineReady => "awaiting engine",
            SessionState::Transferring => "transferring input",
            SessionState::Converting => "converting",
            SessionState::Completed => "completed",
            SessionState::Failed => "failed",
        };
        f.write_str(s)
    }
}

/// Result of a successful session.
#[derive(Debug, Clone)]
pub struct SessionOutput {
    /// The decoded PDF.
    pub document: Vec<u8>,
    /// Console lines collected while the page was open.
    pub console_lines: usize,
    /// Time from navigation start until the engine reported ready.
    pub ready_after: Duration,
    /// Time spent inside the engine's entry point, read-back included.
    pub conversion_time: Duration,
}

/// Drives one [`EngineBridge`] through a single conversion.
///
/// The bridge is owned exclusively and released when [`run`](Self::run)
/// returns, whatever the outcome.
pub struct ConversionSession<'a, B: EngineBridge> {
    bridge: B,
    config: &'a ConversionConfig,
    console: ConsoleLog,
    diagnostics_dir: PathBuf,
    state: SessionState,
    ready_after: Duration,
    conversion_time: Duration,
}

impl<'a, B: EngineBridge> ConversionSession<'a, B> {
    pub fn new(bridge: B, config: &'a ConversionConfig) -> Self {
        let console = bridge.console_log();
        Self {
            bridge,
            config,
            console,
            diagnostics_dir: config.diagnostics_dir.clone(),
            state: SessionState::Created,
            ready_after: Duration::ZERO,
            conversion_time: Duration::ZERO,
        }
    }

    /// Persist failure artifacts to `dir` rather than the configured directory.
    pub fn with_diagnostics_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.diagnostics_dir = dir.into();
        self
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    /// Convert `input` using the engine served at `origin` from `static_root`.
    pub async fn run(
        mut self,
        input: &ResolvedInput,
        origin: &str,
        static_root: &Path,
    ) -> Result<SessionOutput, Pptx2PdfError> {
        let result = self.drive(input, origin, static_root).await;

        let result = match result {
            Ok(document) => {
                self.transition(SessionState::Completed);
                Ok(SessionOutput {
                    document,
                    console_lines: self.console.len(),
                    ready_after: self.ready_after,
                    conversion_time: self.conversion_time,
                })
            }
            Err(e) => {
                self.transition(SessionState::Failed);
                self.persist_diagnostics(&e).await;
                Err(e)
            }
        };

        if let Err(e) = self.bridge.close().await {
            warn!(error = %e, "failed to close browser");
        }
        result
    }

    async fn drive(
        &mut self,
        input: &ResolvedInput,
        origin: &str,
        static_root: &Path,
    ) -> Result<Vec<u8>, Pptx2PdfError> {
        let started = Instant::now();

        self.transition(SessionState::Navigating);
        let url = format!(
            "{}/{}",
            origin.trim_end_matches('/'),
            engine_assets::BOOTSTRAP_PAGE
        );
        self.bridge.navigate(&url).await?;

        self.transition(SessionState::AwaitingEngineReady);
        self.await_ready().await?;
        self.ready_after = started.elapsed();
        info!(ready_ms = self.ready_after.as_millis() as u64, "engine ready");

        self.transition(SessionState::Transferring);
        // Held until the end of this call; dropping it removes a served copy.
        let prepared =
            transfer::prepare(input, self.config.transfer, static_root, origin).await?;

        self.transition(SessionState::Converting);
        let converting = Instant::now();
        let outcome = self.bridge.invoke_conversion(prepared.argument()).await?;
        let encoded = match outcome {
            InvocationOutcome::Inline(encoded) => Ok(Some(encoded)),
            InvocationOutcome::Stored => self.bridge.read_output().await.map(Some),
            InvocationOutcome::Empty => Ok(None),
        };
        self.clear_output().await;
        self.conversion_time = converting.elapsed();

        let encoded = encoded?.ok_or(Pptx2PdfError::EmptyResult)?;
        output::decode_document(&encoded, self.config.min_output_bytes)
    }

    /// Poll the readiness expression until it holds or the bound elapses.
    ///
    /// The timeout is only reported once the full bound has passed. A single
    /// evaluation never outlives the bound, so a stalled page cannot extend it.
    async fn await_ready(&mut self) -> Result<(), Pptx2PdfError> {
        let bound = self.config.ready_timeout();
        let deadline = Instant::now() + bound;
        let mut polls = 0u32;

        loop {
            polls += 1;
            let remaining = deadline.saturating_duration_since(Instant::now());
            let budget = self
                .config
                .command_timeout()
                .min(remaining.max(Duration::from_millis(1)));
            match self.bridge.is_ready(budget).await {
                Ok(true) => {
                    debug!(polls, "readiness flag observed");
                    return Ok(());
                }
                Ok(false) => {}
                Err(e @ Pptx2PdfError::DriverCrash { .. }) => return Err(e),
                Err(e) => debug!(error = %e, "readiness check failed; treating as not ready"),
            }

            let now = Instant::now();
            if now >= deadline {
                return Err(Pptx2PdfError::EngineInitTimeout {
                    secs: bound.as_secs(),
                });
            }
            tokio::time::sleep(READY_POLL_INTERVAL.min(deadline - now)).await;
        }
    }

    async fn clear_output(&mut self) {
        match self.bridge.clear_output().await {
            Ok(true) => debug!("cleared engine output path"),
            Ok(false) => {}
            Err(e) => warn!(error = %e, "failed to clear engine output path"),
        }
    }

    async fn persist_diagnostics(&mut self, error: &Pptx2PdfError) {
        let snapshot = match self.bridge.page_snapshot().await {
            Ok(html) => html,
            Err(e) => diagnostics::unavailable_snapshot(&format!("{e} (after: {error})")),
        };
        let lines = self.console.lines();
        if let Err(e) =
            diagnostics::write_artifacts(&self.diagnostics_dir, &lines, &snapshot).await
        {
            warn!(
                dir = %self.diagnostics_dir.display(),
                error = %e,
                "failed to write diagnostic artifacts"
            );
        }
    }

    fn transition(&mut self, next: SessionState) {
        debug!(from = %self.state, to = %next, "session state");
        self.state = next;
        if let Some(ref cb) = self.config.progress_callback {
            cb.on_stage(next);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::diagnostics::{LOG_ARTIFACT, SNAPSHOT_ARTIFACT};
    use crate::error::ErrorKind;
    use crate::pipeline::input::resolve_input;
    use crate::pipeline::transfer::TransferStrategy;
    use crate::progress::ConversionProgressCallback;
    use async_trait::async_trait;
    use base64::{engine::general_purpose::STANDARD, Engine as _};
    use std::sync::{Arc, Mutex};

    /// Scripted stand-in for the in-page engine.
    struct FakeBridge {
        ready_after: Option<u32>,
        polls: u32,
        /// Every readiness check hangs for its whole budget, like a frozen page.
        stall: bool,
        budgets: Arc<Mutex<Vec<Duration>>>,
        outcome: InvocationOutcome,
        stored: Option<String>,
        calls: Arc<Mutex<Vec<String>>>,
        console: ConsoleLog,
    }

    impl FakeBridge {
        fn new(outcome: InvocationOutcome) -> Self {
            Self {
                ready_after: Some(0),
                polls: 0,
                stall: false,
                budgets: Arc::default(),
                outcome,
                stored: None,
                calls: Arc::default(),
                console: ConsoleLog::new(),
            }
        }

        fn record(&self, call: impl Into<String>) {
            self.calls.lock().unwrap().push(call.into());
        }
    }

    #[async_trait]
    impl EngineBridge for FakeBridge {
        async fn navigate(&mut self, url: &str) -> Result<(), Pptx2PdfError> {
            self.record(format!("navigate {url}"));
            self.console.push("bootstrap loaded");
            Ok(())
        }

        async fn is_ready(&mut self, timeout: Duration) -> Result<bool, Pptx2PdfError> {
            self.polls += 1;
            self.budgets.lock().unwrap().push(timeout);
            if self.stall {
                tokio::time::sleep(timeout).await;
                return Err(Pptx2PdfError::DriverProtocol {
                    method: "Runtime.evaluate".into(),
                    message: format!("timed out after {}ms", timeout.as_millis()),
                });
            }
            Ok(matches!(self.ready_after, Some(n) if self.polls > n))
        }

        async fn invoke_conversion(
            &mut self,
            argument: &str,
        ) -> Result<InvocationOutcome, Pptx2PdfError> {
            self.record(format!("invoke {}", argument.len()));
            if argument.is_empty() {
                return Err(Pptx2PdfError::InPageException {
                    message: "empty argument".into(),
                });
            }
            Ok(self.outcome.clone())
        }

        async fn read_output(&mut self) -> Result<String, Pptx2PdfError> {
            self.record("read");
            self.stored.clone().ok_or(Pptx2PdfError::OutputMissing {
                path: "/tmp/output.pdf".into(),
                message: "no such file".into(),
            })
        }

        async fn clear_output(&mut self) -> Result<bool, Pptx2PdfError> {
            self.record("clear");
            Ok(self.stored.take().is_some())
        }

        async fn page_snapshot(&mut self) -> Result<String, Pptx2PdfError> {
            Ok("<html><body>engine page</body></html>".into())
        }

        fn console_log(&self) -> ConsoleLog {
            self.console.clone()
        }

        async fn close(&mut self) -> Result<(), Pptx2PdfError> {
            self.record("close");
            Ok(())
        }
    }

    struct Fixture {
        _dir: tempfile::TempDir,
        input: ResolvedInput,
        static_root: std::path::PathBuf,
        diagnostics: std::path::PathBuf,
    }

    fn fixture() -> Fixture {
        let dir = tempfile::tempdir().unwrap();
        let input_path = dir.path().join("deck.pptx");
        std::fs::write(&input_path, b"PK\x03\x04presentation").unwrap();
        let static_root = dir.path().join("static");
        let diagnostics = dir.path().join("diag");
        std::fs::create_dir_all(&static_root).unwrap();
        Fixture {
            input: resolve_input(&input_path).unwrap(),
            static_root,
            diagnostics,
            _dir: dir,
        }
    }

    fn config(fx: &Fixture) -> ConversionConfig {
        ConversionConfig::builder()
            .ready_timeout_secs(1)
            .diagnostics_dir(&fx.diagnostics)
            .build()
            .unwrap()
    }

    fn pdf(len: usize) -> String {
        STANDARD.encode(vec![b'%'; len])
    }

    #[tokio::test]
    async fn inline_result_completes() {
        let fx = fixture();
        let cfg = config(&fx);
        let bridge = FakeBridge::new(InvocationOutcome::Inline(pdf(2048)));
        let calls = bridge.calls.clone();

        let out = ConversionSession::new(bridge, &cfg)
            .run(&fx.input, "http://localhost:8711", &fx.static_root)
            .await
            .unwrap();

        assert_eq!(out.document.len(), 2048);
        assert_eq!(out.console_lines, 1);
        let calls = calls.lock().unwrap().clone();
        assert_eq!(calls.first().unwrap(), "navigate http://localhost:8711/index.html");
        assert_eq!(calls.last().unwrap(), "close");
        assert!(calls.iter().any(|c| c == "clear"));
        assert!(!fx.diagnostics.join(LOG_ARTIFACT).exists());
    }

    #[tokio::test]
    async fn stored_result_is_read_then_cleared() {
        let fx = fixture();
        let cfg = config(&fx);
        let mut bridge = FakeBridge::new(InvocationOutcome::Stored);
        bridge.stored = Some(pdf(512));
        let calls = bridge.calls.clone();

        let out = ConversionSession::new(bridge, &cfg)
            .run(&fx.input, "http://localhost:8711", &fx.static_root)
            .await
            .unwrap();

        assert_eq!(out.document.len(), 512);
        let calls = calls.lock().unwrap().clone();
        let read = calls.iter().position(|c| c == "read").unwrap();
        let clear = calls.iter().position(|c| c == "clear").unwrap();
        assert!(read < clear);
    }

    #[tokio::test]
    async fn empty_result_fails_and_writes_artifacts() {
        let fx = fixture();
        let cfg = config(&fx);
        let bridge = FakeBridge::new(InvocationOutcome::Empty);
        let calls = bridge.calls.clone();

        let err = ConversionSession::new(bridge, &cfg)
            .run(&fx.input, "http://localhost:8711", &fx.static_root)
            .await
            .unwrap_err();

        assert!(matches!(err, Pptx2PdfError::EmptyResult));
        assert_eq!(err.kind(), ErrorKind::ConversionFailed);
        let log = std::fs::read_to_string(fx.diagnostics.join(LOG_ARTIFACT)).unwrap();
        assert_eq!(log, "bootstrap loaded");
        let html = std::fs::read_to_string(fx.diagnostics.join(SNAPSHOT_ARTIFACT)).unwrap();
        assert!(html.contains("engine page"));
        assert_eq!(calls.lock().unwrap().last().unwrap(), "close");
    }

    #[tokio::test]
    async fn undersized_output_fails() {
        let fx = fixture();
        let cfg = config(&fx);
        let bridge = FakeBridge::new(InvocationOutcome::Inline(pdf(12)));

        let err = ConversionSession::new(bridge, &cfg)
            .run(&fx.input, "http://localhost:8711", &fx.static_root)
            .await
            .unwrap_err();

        assert!(matches!(err, Pptx2PdfError::OutputTooSmall { size: 12, min: 100 }));
        assert!(fx.diagnostics.join(SNAPSHOT_ARTIFACT).exists());
    }

    #[tokio::test]
    async fn readiness_timeout_waits_for_full_bound() {
        let fx = fixture();
        let cfg = config(&fx);
        let mut bridge = FakeBridge::new(InvocationOutcome::Empty);
        bridge.ready_after = None;
        let calls = bridge.calls.clone();

        let started = std::time::Instant::now();
        let err = ConversionSession::new(bridge, &cfg)
            .run(&fx.input, "http://localhost:8711", &fx.static_root)
            .await
            .unwrap_err();

        assert!(matches!(err, Pptx2PdfError::EngineInitTimeout { secs: 1 }));
        assert!(started.elapsed() >= Duration::from_secs(1));
        let calls = calls.lock().unwrap().clone();
        assert!(!calls.iter().any(|c| c.starts_with("invoke")));
        assert!(fx.diagnostics.join(LOG_ARTIFACT).exists());
    }

    #[tokio::test]
    async fn stalled_page_cannot_stretch_readiness_bound() {
        let fx = fixture();
        // Command timeout (30s) is far longer than the readiness bound (1s).
        let cfg = config(&fx);
        let mut bridge = FakeBridge::new(InvocationOutcome::Empty);
        bridge.stall = true;
        let budgets = bridge.budgets.clone();

        let started = std::time::Instant::now();
        let err = ConversionSession::new(bridge, &cfg)
            .run(&fx.input, "http://localhost:8711", &fx.static_root)
            .await
            .unwrap_err();

        assert!(matches!(err, Pptx2PdfError::EngineInitTimeout { secs: 1 }), "got: {err:?}");
        assert!(started.elapsed() >= Duration::from_secs(1));
        assert!(started.elapsed() < Duration::from_secs(5), "took {:?}", started.elapsed());
        let budgets = budgets.lock().unwrap().clone();
        assert!(!budgets.is_empty());
        assert!(budgets.iter().all(|b| *b <= Duration::from_secs(1)), "{budgets:?}");
    }

    #[tokio::test]
    async fn engine_ready_after_a_few_polls() {
        let fx = fixture();
        let cfg = config(&fx);
        let mut bridge = FakeBridge::new(InvocationOutcome::Inline(pdf(200)));
        bridge.ready_after = Some(2);

        let out = ConversionSession::new(bridge, &cfg)
            .run(&fx.input, "http://localhost:8711", &fx.static_root)
            .await
            .unwrap();
        assert!(out.ready_after >= READY_POLL_INTERVAL * 2);
    }

    #[tokio::test]
    async fn served_copy_is_gone_after_session() {
        let fx = fixture();
        let cfg = ConversionConfig::builder()
            .transfer(TransferStrategy::ServedFile)
            .diagnostics_dir(&fx.diagnostics)
            .build()
            .unwrap();
        let bridge = FakeBridge::new(InvocationOutcome::Inline(pdf(200)));
        let calls = bridge.calls.clone();

        ConversionSession::new(bridge, &cfg)
            .run(&fx.input, "http://localhost:8711", &fx.static_root)
            .await
            .unwrap();

        let invoked = calls
            .lock()
            .unwrap()
            .iter()
            .any(|c| c.starts_with("invoke"));
        assert!(invoked);
        assert_eq!(std::fs::read_dir(&fx.static_root).unwrap().count(), 0);
    }

    #[tokio::test]
    async fn stages_are_reported_in_order() {
        #[derive(Default)]
        struct Stages(Mutex<Vec<SessionState>>);
        impl ConversionProgressCallback for Stages {
            fn on_stage(&self, state: SessionState) {
                self.0.lock().unwrap().push(state);
            }
        }

        let fx = fixture();
        let stages = Arc::new(Stages::default());
        let cfg = ConversionConfig::builder()
            .diagnostics_dir(&fx.diagnostics)
            .progress_callback(stages.clone())
            .build()
            .unwrap();
        let bridge = FakeBridge::new(InvocationOutcome::Inline(pdf(200)));

        ConversionSession::new(bridge, &cfg)
            .run(&fx.input, "http://localhost:8711", &fx.static_root)
            .await
            .unwrap();

        assert_eq!(
            *stages.0.lock().unwrap(),
            vec![
                SessionState::Navigating,
                SessionState::AwaitingEngineReady,
                SessionState::Transferring,
                SessionState::Converting,
                SessionState::Completed,
            ]
        );
    }
}
