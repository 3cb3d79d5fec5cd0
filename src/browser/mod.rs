//! Chromium implementation of [`EngineBridge`] over the DevTools protocol.
//!
//! Each [`ChromeLauncher::launch`] starts a fresh browser process with its own
//! temporary profile and attaches to its single page. Nothing is shared
//! between bridges, so concurrent sessions are fully isolated.

mod cdp;
mod launch;

pub use launch::{find_chrome, CHROME_ENV};

use crate::bridge::{
    BridgeContract, BridgeLauncher, EngineBridge, InvocationOutcome, DOCUMENT_READY_SCRIPT,
    SNAPSHOT_SCRIPT,
};
use crate::config::ConversionConfig;
use crate::diagnostics::ConsoleLog;
use crate::error::Pptx2PdfError;
use async_trait::async_trait;
use cdp::CdpConnection;
use launch::BrowserProcess;
use serde_json::{json, Value};
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, warn};

const HTTP_TIMEOUT: Duration = Duration::from_secs(10);
const LOAD_POLL: Duration = Duration::from_millis(100);
const EXIT_GRACE: Duration = Duration::from_secs(5);

/// Starts one headless (or headed) Chromium per session.
#[derive(Debug, Clone)]
pub struct ChromeLauncher {
    client: reqwest::Client,
}

impl ChromeLauncher {
    pub fn new() -> Result<Self, Pptx2PdfError> {
        let client = reqwest::Client::builder()
            .timeout(HTTP_TIMEOUT)
            .no_proxy()
            .build()
            .map_err(|e| Pptx2PdfError::Internal(format!("HTTP client: {e}")))?;
        Ok(Self { client })
    }
}

#[async_trait]
impl BridgeLauncher for ChromeLauncher {
    type Bridge = ChromeBridge;

    async fn launch(&self, config: &ConversionConfig) -> Result<ChromeBridge, Pptx2PdfError> {
        let executable = launch::find_chrome(config.chrome_path.as_deref())?;
        let startup = config.command_timeout();
        let process = launch::spawn_browser(&executable, config.headless, startup).await?;
        let ws_url =
            launch::page_websocket_url(&self.client, process.devtools_port, startup).await?;

        let console = ConsoleLog::new();
        let conn = CdpConnection::connect(&ws_url, console.clone(), config.verbose, startup).await?;

        let mut bridge = ChromeBridge {
            conn,
            process: Some(process),
            contract: config.contract.clone(),
            command_timeout: config.command_timeout(),
            navigation_timeout: config.navigation_timeout(),
            console,
        };
        for domain in ["Runtime.enable", "Page.enable", "Inspector.enable"] {
            bridge.command(domain, json!({})).await?;
        }
        Ok(bridge)
    }
}

/// One page in one dedicated Chromium process.
pub struct ChromeBridge {
    conn: CdpConnection,
    process: Option<BrowserProcess>,
    contract: BridgeContract,
    command_timeout: Duration,
    navigation_timeout: Duration,
    console: ConsoleLog,
}

impl ChromeBridge {
    async fn command(&mut self, method: &str, params: Value) -> Result<Value, Pptx2PdfError> {
        self.conn.call(method, params, Some(self.command_timeout)).await
    }

    /// `Runtime.evaluate` with promise awaiting; in-page exceptions surface as `Err(text)`.
    async fn evaluate(
        &mut self,
        expression: &str,
        timeout: Option<Duration>,
    ) -> Result<Result<Value, String>, Pptx2PdfError> {
        let params = json!({
            "expression": expression,
            "returnByValue": true,
            "awaitPromise": true,
        });
        let response = self.conn.call("Runtime.evaluate", params, timeout).await?;
        Ok(runtime_value(&response))
    }

    /// Evaluate a helper script whose exceptions are protocol failures.
    async fn evaluate_helper(&mut self, expression: &str) -> Result<Value, Pptx2PdfError> {
        let timeout = Some(self.command_timeout);
        self.evaluate(expression, timeout)
            .await?
            .map_err(|message| Pptx2PdfError::DriverProtocol {
                method: "Runtime.evaluate".into(),
                message,
            })
    }
}

#[async_trait]
impl EngineBridge for ChromeBridge {
    async fn navigate(&mut self, url: &str) -> Result<(), Pptx2PdfError> {
        let nav_failed = |reason: String| Pptx2PdfError::NavigationFailed {
            url: url.to_string(),
            reason,
        };

        let response = self
            .conn
            .call("Page.navigate", json!({ "url": url }), Some(self.navigation_timeout))
            .await
            .map_err(|e| match e {
                Pptx2PdfError::DriverProtocol { message, .. } => nav_failed(message),
                other => other,
            })?;
        if let Some(error) = response.get("errorText").and_then(Value::as_str) {
            return Err(nav_failed(error.to_string()));
        }

        let deadline = Instant::now() + self.navigation_timeout;
        loop {
            if let Ok(Value::Bool(true)) = self.evaluate_helper(DOCUMENT_READY_SCRIPT).await {
                debug!(url, "document loaded");
                return Ok(());
            }
            if Instant::now() >= deadline {
                return Err(nav_failed(format!(
                    "document did not finish loading within {}s",
                    self.navigation_timeout.as_secs()
                )));
            }
            tokio::time::sleep(LOAD_POLL).await;
        }
    }

    async fn is_ready(&mut self, timeout: Duration) -> Result<bool, Pptx2PdfError> {
        let script = self.contract.ready_script();
        let value = self.evaluate(&script, Some(timeout)).await?;
        Ok(matches!(value, Ok(Value::Bool(true))))
    }

    async fn invoke_conversion(
        &mut self,
        argument: &str,
    ) -> Result<InvocationOutcome, Pptx2PdfError> {
        let script = self.contract.invoke_script(argument)?;
        match self.evaluate(&script, None).await? {
            Ok(value) => Ok(invocation_outcome(value)),
            Err(message) => Err(Pptx2PdfError::InPageException { message }),
        }
    }

    async fn read_output(&mut self) -> Result<String, Pptx2PdfError> {
        let script = self.contract.read_output_script()?;
        let timeout = Some(self.command_timeout);
        match self.evaluate(&script, timeout).await? {
            Ok(Value::String(encoded)) => Ok(encoded),
            Ok(other) => Err(Pptx2PdfError::OutputMissing {
                path: self.contract.output_path.clone(),
                message: format!("expected base64 output, got {other}"),
            }),
            // readFile throws when the engine wrote nothing.
            Err(message) => Err(Pptx2PdfError::OutputMissing {
                path: self.contract.output_path.clone(),
                message,
            }),
        }
    }

    async fn clear_output(&mut self) -> Result<bool, Pptx2PdfError> {
        let script = self.contract.clear_output_script()?;
        Ok(matches!(self.evaluate_helper(&script).await?, Value::Bool(true)))
    }

    async fn page_snapshot(&mut self) -> Result<String, Pptx2PdfError> {
        match self.evaluate_helper(SNAPSHOT_SCRIPT).await? {
            Value::String(html) => Ok(html),
            other => Ok(format!("<!-- unexpected snapshot value: {other} -->\n")),
        }
    }

    fn console_log(&self) -> ConsoleLog {
        self.console.clone()
    }

    async fn close(&mut self) -> Result<(), Pptx2PdfError> {
        let Some(mut process) = self.process.take() else {
            return Ok(());
        };
        self.conn.shutdown().await;

        if let Err(e) = process.child.start_kill() {
            debug!(error = %e, "browser already gone");
        }
        match tokio::time::timeout(EXIT_GRACE, process.child.wait()).await {
            Ok(Ok(status)) => debug!(%status, "browser exited"),
            Ok(Err(e)) => warn!(error = %e, "failed to reap browser"),
            Err(_) => warn!("browser did not exit in time"),
        }
        debug!(profile = %process.profile.path().display(), "removing browser profile");
        Ok(())
    }
}

/// Split a `Runtime.evaluate` response into its value or exception text.
fn runtime_value(response: &Value) -> Result<Value, String> {
    if let Some(details) = response.get("exceptionDetails") {
        return Err(cdp::exception_text(details));
    }
    Ok(response
        .get("result")
        .and_then(|r| r.get("value"))
        .cloned()
        .unwrap_or(Value::Null))
}

fn invocation_outcome(value: Value) -> InvocationOutcome {
    match value {
        Value::String(s) if !s.is_empty() => InvocationOutcome::Inline(s),
        Value::Bool(true) => InvocationOutcome::Stored,
        _ => InvocationOutcome::Empty,
    }
}
