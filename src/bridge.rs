//! The narrow capability interface between the orchestration core and the
//! in-page engine.
//!
//! The engine is a third-party WebAssembly build driven from inside a
//! browser page. The session only needs a handful of things from it, and
//! those are exactly the methods of [`EngineBridge`]. The production
//! implementation lives in [`crate::browser`]; tests substitute a fake.
//!
//! [`BridgeContract`] names the in-page globals the engine exposes and
//! renders the small scripts evaluated against them:
//!
//! | Contract field     | Default                          | Used for                 |
//! |--------------------|----------------------------------|--------------------------|
//! | `ready_expression` | `window.sofficeLoaded === true`  | readiness polling        |
//! | `entry_point`      | `convertPPTX`                    | starting a conversion    |
//! | `fs_global`        | `FS`                             | virtual filesystem calls |
//! | `output_path`      | `/tmp/output.pdf`                | stored results           |

use crate::config::ConversionConfig;
use crate::diagnostics::ConsoleLog;
use crate::error::Pptx2PdfError;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Script returning `true` once the bootstrap page finished loading.
pub const DOCUMENT_READY_SCRIPT: &str = "document.readyState === 'complete'";

/// Script returning the rendered page markup.
pub const SNAPSHOT_SCRIPT: &str =
    "document.documentElement ? document.documentElement.outerHTML : ''";

/// What the in-page entry point handed back.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InvocationOutcome {
    /// The entry point returned the base64-encoded document directly.
    Inline(String),
    /// The entry point returned a truthy non-string; the document waits at
    /// [`BridgeContract::output_path`] in the engine's virtual filesystem.
    Stored,
    /// The entry point returned `null`, `false`, `""` or `undefined`.
    Empty,
}

/// The operations a conversion session needs from the in-page engine.
///
/// Every call suspends the session until the browser answers. Calls are
/// issued strictly in session order; implementations need not be re-entrant.
#[async_trait]
pub trait EngineBridge: Send {
    /// Load `url` and return once the document finished loading.
    async fn navigate(&mut self, url: &str) -> Result<(), Pptx2PdfError>;

    /// Evaluate the readiness flag once, giving up after `timeout`.
    /// Errors inside the page count as "not ready".
    async fn is_ready(&mut self, timeout: Duration) -> Result<bool, Pptx2PdfError>;

    /// Call the conversion entry point with a base64 payload or a URL.
    ///
    /// Runs to completion; there is no timeout on this call.
    async fn invoke_conversion(&mut self, argument: &str)
        -> Result<InvocationOutcome, Pptx2PdfError>;

    /// Read the stored result from the virtual filesystem as base64.
    ///
    /// A missing or unreadable result is [`Pptx2PdfError::OutputMissing`].
    async fn read_output(&mut self) -> Result<String, Pptx2PdfError>;

    /// Remove the stored result. Returns `false` when there was nothing to remove.
    async fn clear_output(&mut self) -> Result<bool, Pptx2PdfError>;

    /// The rendered page markup, for post-mortem debugging.
    async fn page_snapshot(&mut self) -> Result<String, Pptx2PdfError>;

    /// Handle to the ordered console log the bridge appends to.
    fn console_log(&self) -> ConsoleLog;

    /// Release the browser. Must be safe to call after a crash.
    async fn close(&mut self) -> Result<(), Pptx2PdfError>;
}

/// Produces one exclusively owned [`EngineBridge`] per session.
#[async_trait]
pub trait BridgeLauncher: Send + Sync {
    type Bridge: EngineBridge + 'static;

    async fn launch(&self, config: &ConversionConfig) -> Result<Self::Bridge, Pptx2PdfError>;
}

/// Names of the in-page globals the engine exposes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BridgeContract {
    /// JavaScript expression that is truthy once the engine initialised.
    pub ready_expression: String,
    /// Global function taking a base64 string or URL.
    pub entry_point: String,
    /// Global exposing `readFile(path)` and `unlink(path)`.
    pub fs_global: String,
    /// Virtual filesystem path of a stored result.
    pub output_path: String,
}

impl Default for BridgeContract {
    fn default() -> Self {
        Self {
            ready_expression: "window.sofficeLoaded === true".into(),
            entry_point: "convertPPTX".into(),
            fs_global: "FS".into(),
            output_path: "/tmp/output.pdf".into(),
        }
    }
}

impl BridgeContract {
    /// Reject contracts that would render broken scripts.
    pub fn validate(&self) -> Result<(), Pptx2PdfError> {
        if self.ready_expression.trim().is_empty() {
            return Err(Pptx2PdfError::InvalidConfig(
                "ready_expression must not be empty".into(),
            ));
        }
        for (name, value) in [("entry_point", &self.entry_point), ("fs_global", &self.fs_global)] {
            if !is_js_path(value) {
                return Err(Pptx2PdfError::InvalidConfig(format!(
                    "{name} must be a JavaScript identifier path, got '{value}'"
                )));
            }
        }
        if self.output_path.is_empty() {
            return Err(Pptx2PdfError::InvalidConfig(
                "output_path must not be empty".into(),
            ));
        }
        Ok(())
    }

    /// Evaluates the readiness expression, mapping exceptions to `false`.
    pub fn ready_script(&self) -> String {
        format!(
            "(() => {{ try {{ return Boolean({}); }} catch (e) {{ return false; }} }})()",
            self.ready_expression
        )
    }

    /// Calls the entry point with `argument` as a string literal.
    ///
    /// Resolves to the returned string, `true` for any other truthy value,
    /// or `null`.
    pub fn invoke_script(&self, argument: &str) -> Result<String, Pptx2PdfError> {
        let literal = serde_json::to_string(argument)
            .map_err(|e| Pptx2PdfError::Internal(format!("argument encoding: {e}")))?;
        Ok(format!(
            "(async () => {{ const r = await {entry}({literal}); \
             if (!r) return null; \
             return typeof r === 'string' ? r : true; }})()",
            entry = self.entry_point,
        ))
    }

    /// Reads [`Self::output_path`] and returns it base64-encoded.
    pub fn read_output_script(&self) -> Result<String, Pptx2PdfError> {
        let path = self.output_path_literal()?;
        Ok(format!(
            "(() => {{ const d = {fs}.readFile({path}); let s = ''; \
             for (let i = 0; i < d.length; i += 0x8000) {{ \
             s += String.fromCharCode.apply(null, d.subarray(i, i + 0x8000)); }} \
             return btoa(s); }})()",
            fs = self.fs_global,
        ))
    }

    /// Unlinks [`Self::output_path`]; `false` when it did not exist.
    pub fn clear_output_script(&self) -> Result<String, Pptx2PdfError> {
        let path = self.output_path_literal()?;
        Ok(format!(
            "(() => {{ try {{ {fs}.unlink({path}); return true; }} catch (e) {{ return false; }} }})()",
            fs = self.fs_global,
        ))
    }

    fn output_path_literal(&self) -> Result<String, Pptx2PdfError> {
        serde_json::to_string(&self.output_path)
            .map_err(|e| Pptx2PdfError::Internal(format!("path encoding: {e}")))
    }
}

/// Dotted identifiers only: `foo`, `window.foo`, `Module.FS`.
fn is_js_path(s: &str) -> bool {
    !s.is_empty()
        && s.split('.').all(|seg| {
            let mut chars = seg.chars();
            matches!(chars.next(), Some(c) if c.is_ascii_alphabetic() || c == '_' || c == '$')
                && chars.all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '$')
        })
}
