//! Progress-callback trait for conversion stage events.
//!
//! Inject an [`Arc<dyn ConversionProgressCallback>`] via
//! [`crate::config::ConversionConfigBuilder::progress_callback`] to follow a
//! conversion through its session states. The CLI renders these as a
//! spinner; a service could forward them to a channel or a job record.
//!
//! # Example
//!
//! ```rust
//! use pptx2pdf::{ConversionConfig, ConversionProgressCallback, SessionState};
//! use std::sync::{Arc, atomic::{AtomicUsize, Ordering}};
//!
//! struct StageCounter {
//!     stages: AtomicUsize,
//! }
//!
//! impl ConversionProgressCallback for StageCounter {
//!     fn on_stage(&self, state: SessionState) {
//!         self.stages.fetch_add(1, Ordering::SeqCst);
//!         eprintln!("now {state}");
//!     }
//! }
//!
//! let counter = Arc::new(StageCounter { stages: AtomicUsize::new(0) });
//!
//! let config = ConversionConfig::builder()
//!     .progress_callback(counter as Arc<dyn ConversionProgressCallback>)
//!     .build()
//!     .unwrap();
//! ```

use crate::session::SessionState;
use std::path::Path;
use std::sync::Arc;

/// Called by the orchestrator and session as a conversion advances.
///
/// Implementations must be `Send + Sync`: independent conversions sharing a
/// [`crate::Converter`] may report concurrently. All methods have default
/// no-op implementations so callers only override what they care about.
pub trait ConversionProgressCallback: Send + Sync {
    /// Called once the input passed its precondition checks.
    fn on_conversion_start(&self, input: &Path) {
        let _ = input;
    }

    /// Called on every session state transition, terminal states included.
    fn on_stage(&self, state: SessionState) {
        let _ = state;
    }

    /// Called after the PDF was written.
    ///
    /// # Arguments
    /// * `output`: destination path
    /// * `bytes`: size of the written document
    fn on_conversion_complete(&self, output: &Path, bytes: usize) {
        let _ = (output, bytes);
    }

    /// Called when the conversion fails, before the error is returned.
    fn on_conversion_error(&self, error: &str) {
        let _ = error;
    }
}

/// A no-op implementation for callers that don't need progress events.
pub struct NoopProgressCallback;

impl ConversionProgressCallback for NoopProgressCallback {}

/// Convenience alias matching the type stored in [`crate::config::ConversionConfig`].
pub type ProgressCallback = Arc<dyn ConversionProgressCallback>;
