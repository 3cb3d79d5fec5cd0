//! Local origin server for the engine's static assets.
//!
//! The engine relies on `SharedArrayBuffer`, which browsers only expose to
//! cross-origin-isolated pages. Every response, error pages included,
//! therefore carries:
//!
//! ```text
//! Cross-Origin-Opener-Policy:   same-origin
//! Cross-Origin-Embedder-Policy: require-corp
//! ```
//!
//! Without them the engine never finishes initialising and the only symptom
//! is a readiness timeout.
//!
//! A [`ServerHandle`] is single-use: `Idle → Running → Stopped`. Serving runs
//! on its own tokio task and needs no coordination with the sessions that
//! read from it.

use crate::error::Pptx2PdfError;
use axum::extract::Request;
use axum::http::{HeaderName, HeaderValue};
use axum::middleware::{self, Next};
use axum::response::Response;
use axum::Router;
use std::net::{Ipv4Addr, SocketAddr};
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tower_http::services::ServeDir;
use tower_http::set_header::SetResponseHeaderLayer;
use tracing::{debug, info, warn};

const COOP: HeaderName = HeaderName::from_static("cross-origin-opener-policy");
const COEP: HeaderName = HeaderName::from_static("cross-origin-embedder-policy");

/// Connect-probe budget before binding.
const PROBE_TIMEOUT: Duration = Duration::from_millis(500);

/// How long `stop()` waits for in-flight connections to drain.
const SHUTDOWN_GRACE: Duration = Duration::from_secs(5);

/// Lifecycle state of a [`ServerHandle`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ServerState {
    Idle,
    Running,
    Stopped,
}

/// One origin server instance, exclusively owned by its creator.
#[derive(Debug)]
pub struct ServerHandle {
    root: PathBuf,
    port: u16,
    log_enabled: bool,
    state: ServerState,
    shutdown: Option<oneshot::Sender<()>>,
    task: Option<JoinHandle<std::io::Result<()>>>,
}

impl ServerHandle {
    /// An idle handle. Nothing is bound until [`start`](Self::start).
    ///
    /// `port = 0` lets the OS pick; read it back with [`port`](Self::port).
    pub fn new(root: impl Into<PathBuf>, port: u16, log_enabled: bool) -> Self {
        Self {
            root: root.into(),
            port,
            log_enabled,
            state: ServerState::Idle,
            shutdown: None,
            task: None,
        }
    }

    /// The requested port, or the bound one once running.
    pub fn port(&self) -> u16 {
        self.port
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn state(&self) -> ServerState {
        self.state
    }

    pub fn is_running(&self) -> bool {
        self.state == ServerState::Running
    }

    /// Base URL the browser uses to reach this server.
    pub fn origin(&self) -> String {
        format!("http://localhost:{}", self.port)
    }

    /// `true` when the serving task ended while the handle still reports running.
    pub fn is_faulted(&self) -> bool {
        self.state == ServerState::Running
            && self.task.as_ref().map_or(true, |t| t.is_finished())
    }

    /// Probe the port, bind it and start serving.
    ///
    /// # Errors
    /// * [`Pptx2PdfError::PortInUse`] if anything already listens on the port
    /// * [`Pptx2PdfError::ServerRetired`] if this handle was stopped before
    /// * [`Pptx2PdfError::ServerIo`] for other bind failures
    pub async fn start(&mut self) -> Result<(), Pptx2PdfError> {
        match self.state {
            ServerState::Running => {
                warn!(port = self.port, "origin server already running; start ignored");
                return Ok(());
            }
            ServerState::Stopped => return Err(Pptx2PdfError::ServerRetired { port: self.port }),
            ServerState::Idle => {}
        }

        if self.port != 0 && port_is_taken(self.port).await {
            return Err(Pptx2PdfError::PortInUse { port: self.port });
        }

        let addr = SocketAddr::from((Ipv4Addr::LOCALHOST, self.port));
        let listener = TcpListener::bind(addr).await.map_err(|e| {
            if e.kind() == std::io::ErrorKind::AddrInUse {
                Pptx2PdfError::PortInUse { port: self.port }
            } else {
                Pptx2PdfError::ServerIo {
                    port: self.port,
                    source: e,
                }
            }
        })?;
        let bound = listener
            .local_addr()
            .map_err(|e| Pptx2PdfError::ServerIo {
                port: self.port,
                source: e,
            })?
            .port();

        let app = router(&self.root, self.log_enabled);
        let (tx, rx) = oneshot::channel::<()>();
        let task = tokio::spawn(async move {
            axum::serve(listener, app)
                .with_graceful_shutdown(async {
                    let _ = rx.await;
                })
                .await
        });

        self.port = bound;
        self.shutdown = Some(tx);
        self.task = Some(task);
        self.state = ServerState::Running;
        info!(port = bound, root = %self.root.display(), "origin server started");
        Ok(())
    }

    /// Shut down and wait for the serving task. Idempotent.
    pub async fn stop(&mut self) -> Result<(), Pptx2PdfError> {
        if self.state != ServerState::Running {
            warn!(port = self.port, state = ?self.state, "origin server not running; stop ignored");
            return Ok(());
        }
        self.state = ServerState::Stopped;

        if let Some(tx) = self.shutdown.take() {
            let _ = tx.send(());
        }
        let Some(mut task) = self.task.take() else {
            return Ok(());
        };

        match tokio::time::timeout(SHUTDOWN_GRACE, &mut task).await {
            Ok(Ok(Ok(()))) => {}
            Ok(Ok(Err(e))) => warn!(port = self.port, error = %e, "origin server exited with error"),
            Ok(Err(e)) => warn!(port = self.port, error = %e, "origin server task panicked"),
            Err(_) => {
                warn!(port = self.port, "connections did not drain; aborting origin server");
                task.abort();
                let _ = task.await;
            }
        }
        info!(port = self.port, "origin server stopped");
        Ok(())
    }
}

impl Drop for ServerHandle {
    fn drop(&mut self) {
        if let Some(tx) = self.shutdown.take() {
            let _ = tx.send(());
            debug!(port = self.port, "origin server handle dropped while running");
        }
    }
}

fn router(root: &Path, log_enabled: bool) -> Router {
    let mut app = Router::new().fallback_service(ServeDir::new(root));
    if log_enabled {
        app = app.layer(middleware::from_fn(log_request));
    }
    app.layer(SetResponseHeaderLayer::overriding(
        COOP,
        HeaderValue::from_static("same-origin"),
    ))
    .layer(SetResponseHeaderLayer::overriding(
        COEP,
        HeaderValue::from_static("require-corp"),
    ))
}

async fn log_request(req: Request, next: Next) -> Response {
    let method = req.method().clone();
    let path = req.uri().path().to_owned();
    let started = Instant::now();
    let response = next.run(req).await;
    info!(
        %method,
        path = %path,
        status = response.status().as_u16(),
        elapsed_ms = started.elapsed().as_millis() as u64,
        "served"
    );
    response
}

async fn port_is_taken(port: u16) -> bool {
    matches!(
        tokio::time::timeout(PROBE_TIMEOUT, TcpStream::connect((Ipv4Addr::LOCALHOST, port))).await,
        Ok(Ok(_))
    )
}
