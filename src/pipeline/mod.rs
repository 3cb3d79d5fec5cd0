//! Pipeline stages around a conversion session.
//!
//! Each submodule implements exactly one step on the host side of the
//! sandbox boundary. The session itself (browser + engine) sits between
//! [`transfer`] and [`output`].
//!
//! ## Data Flow
//!
//! ```text
//! input ──▶ transfer ──▶ [ session: engine converts ] ──▶ output
//! (path)    (base64/URL)                                   (decode, write)
//! ```
//!
//! 1. [`input`]: validate the source path before any resource is acquired
//! 2. [`transfer`]: make the bytes reachable from the page: inline base64
//!    argument or a copy served next to the engine assets
//! 3. [`output`]: decode the engine's base64 result, reject implausibly
//!    small documents, and write the PDF atomically

pub mod input;
pub mod output;
pub mod transfer;
