//! A persistent Chrome DevTools Protocol connection to one page target.
//!
//! Commands are written to the socket directly; a background reader task
//! routes every response to its caller by message id and turns console
//! events into [`ConsoleLog`] lines. When the socket closes or the page
//! crashes, every pending and future command fails with
//! [`Pptx2PdfError::DriverCrash`].

use crate::diagnostics::ConsoleLog;
use crate::error::Pptx2PdfError;
use futures::stream::{SplitSink, SplitStream};
use futures::{SinkExt, StreamExt};
use serde_json::{json, Value};
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tokio::net::TcpStream;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::protocol::WebSocketConfig;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};
use tracing::{debug, info, warn};

type Socket = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Largest accepted DevTools message. Results carry whole documents as base64.
const MAX_MESSAGE_BYTES: usize = 768 * 1024 * 1024;

#[derive(Debug)]
enum Reply {
    Result(Value),
    Error(String),
    Closed(String),
}

#[derive(Default)]
struct Shared {
    pending: HashMap<u64, oneshot::Sender<Reply>>,
    /// Set once by the reader; nothing can be sent afterwards.
    closed: Option<String>,
}

fn lock(shared: &Mutex<Shared>) -> MutexGuard<'_, Shared> {
    shared.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

pub(crate) struct CdpConnection {
    sink: SplitSink<Socket, Message>,
    shared: Arc<Mutex<Shared>>,
    reader: JoinHandle<()>,
    next_id: u64,
}

impl CdpConnection {
    /// Open the page socket and start the reader.
    ///
    /// `verbose` echoes console lines at INFO instead of DEBUG.
    pub async fn connect(
        ws_url: &str,
        console: ConsoleLog,
        verbose: bool,
        timeout: Duration,
    ) -> Result<Self, Pptx2PdfError> {
        let mut config = WebSocketConfig::default();
        config.max_message_size = Some(MAX_MESSAGE_BYTES);
        config.max_frame_size = Some(MAX_MESSAGE_BYTES);

        let (socket, _response) = tokio::time::timeout(
            timeout,
            tokio_tungstenite::connect_async_with_config(ws_url, Some(config), true),
        )
        .await
        .map_err(|_| Pptx2PdfError::BrowserLaunchFailed {
            reason: format!("DevTools socket '{ws_url}' did not open within {}s", timeout.as_secs()),
        })?
        .map_err(|e| Pptx2PdfError::BrowserLaunchFailed {
            reason: format!("DevTools socket '{ws_url}' failed: {e}"),
        })?;

        let (sink, stream) = socket.split();
        let shared = Arc::new(Mutex::new(Shared::default()));
        let reader = tokio::spawn(read_loop(stream, shared.clone(), console, verbose));
        debug!(ws_url, "DevTools socket open");

        Ok(Self {
            sink,
            shared,
            reader,
            next_id: 1,
        })
    }

    /// Send `method` and wait for its result.
    ///
    /// `timeout = None` waits indefinitely; the call still fails promptly if
    /// the browser goes away.
    pub async fn call(
        &mut self,
        method: &str,
        params: Value,
        timeout: Option<Duration>,
    ) -> Result<Value, Pptx2PdfError> {
        let id = self.next_id;
        self.next_id += 1;

        let (tx, rx) = oneshot::channel();
        {
            let mut shared = lock(&self.shared);
            if let Some(ref reason) = shared.closed {
                return Err(Pptx2PdfError::DriverCrash {
                    detail: reason.clone(),
                });
            }
            shared.pending.insert(id, tx);
        }

        let text = json!({ "id": id, "method": method, "params": params }).to_string();
        debug!(id, method, bytes = text.len(), "DevTools command");
        if let Err(e) = self.sink.send(Message::Text(text.into())).await {
            lock(&self.shared).pending.remove(&id);
            return Err(Pptx2PdfError::DriverCrash {
                detail: format!("cannot send '{method}': {e}"),
            });
        }

        let reply = match timeout {
            Some(limit) => match tokio::time::timeout(limit, rx).await {
                Ok(reply) => reply,
                Err(_) => {
                    lock(&self.shared).pending.remove(&id);
                    return Err(Pptx2PdfError::DriverProtocol {
                        method: method.to_string(),
                        message: format!("no response within {}s", limit.as_secs()),
                    });
                }
            },
            None => rx.await,
        };

        match reply {
            Ok(Reply::Result(value)) => Ok(value),
            Ok(Reply::Error(message)) => Err(Pptx2PdfError::DriverProtocol {
                method: method.to_string(),
                message,
            }),
            Ok(Reply::Closed(detail)) => Err(Pptx2PdfError::DriverCrash { detail }),
            Err(_) => Err(Pptx2PdfError::DriverCrash {
                detail: "DevTools reader stopped".into(),
            }),
        }
    }

    /// Close the socket and stop the reader.
    pub async fn shutdown(&mut self) {
        let _ = self.sink.send(Message::Close(None)).await;
        self.reader.abort();
    }
}

impl Drop for CdpConnection {
    fn drop(&mut self) {
        self.reader.abort();
    }
}

async fn read_loop(
    mut stream: SplitStream<Socket>,
    shared: Arc<Mutex<Shared>>,
    console: ConsoleLog,
    verbose: bool,
) {
    let reason = loop {
        let text = match stream.next().await {
            Some(Ok(Message::Text(text))) => text,
            Some(Ok(Message::Close(_))) => break "DevTools socket closed".to_string(),
            Some(Ok(_)) => continue,
            Some(Err(e)) => break format!("DevTools socket error: {e}"),
            None => break "DevTools socket ended".to_string(),
        };

        let message: Value = match serde_json::from_str(text.as_str()) {
            Ok(v) => v,
            Err(e) => {
                warn!(error = %e, "unparseable DevTools message");
                continue;
            }
        };

        if let Some(id) = message.get("id").and_then(Value::as_u64) {
            let reply = match message.get("error") {
                Some(error) => Reply::Error(
                    error
                        .get("message")
                        .and_then(Value::as_str)
                        .unwrap_or("unknown DevTools error")
                        .to_string(),
                ),
                None => Reply::Result(message.get("result").cloned().unwrap_or(Value::Null)),
            };
            if let Some(tx) = lock(&shared).pending.remove(&id) {
                let _ = tx.send(reply);
            }
            continue;
        }

        let method = message.get("method").and_then(Value::as_str).unwrap_or("");
        let params = message.get("params").unwrap_or(&Value::Null);
        match method {
            "Runtime.consoleAPICalled" | "Runtime.exceptionThrown" => {
                if let Some(line) = console_line(method, params) {
                    if verbose {
                        info!(target: "pptx2pdf::page", "{line}");
                    } else {
                        debug!(target: "pptx2pdf::page", "{line}");
                    }
                    console.push(line);
                }
            }
            "Inspector.targetCrashed" => break "page crashed".to_string(),
            "Inspector.detached" => {
                let why = params
                    .get("reason")
                    .and_then(Value::as_str)
                    .unwrap_or("unknown reason");
                break format!("DevTools detached: {why}");
            }
            _ => {}
        }
    };

    warn!(reason = %reason, "DevTools connection lost");
    let mut shared = lock(&shared);
    shared.closed = Some(reason.clone());
    for (_, tx) in shared.pending.drain() {
        let _ = tx.send(Reply::Closed(reason.clone()));
    }
}

/// Render a console or exception event as one log line.
pub(crate) fn console_line(method: &str, params: &Value) -> Option<String> {
    match method {
        "Runtime.consoleAPICalled" => {
            let args = params.get("args")?.as_array()?;
            let text = args
                .iter()
                .map(remote_object_text)
                .collect::<Vec<_>>()
                .join(" ");
            match params.get("type").and_then(Value::as_str) {
                Some("error") | Some("warning") | Some("assert") => {
                    let kind = params.get("type").and_then(Value::as_str).unwrap_or("error");
                    Some(format!("[{kind}] {text}"))
                }
                _ => Some(text),
            }
        }
        "Runtime.exceptionThrown" => Some(format!(
            "[exception] {}",
            exception_text(params.get("exceptionDetails")?)
        )),
        _ => None,
    }
}

/// The human-readable message of a `Runtime.ExceptionDetails` object.
pub(crate) fn exception_text(details: &Value) -> String {
    details
        .get("exception")
        .and_then(|e| e.get("description"))
        .and_then(Value::as_str)
        .or_else(|| details.get("text").and_then(Value::as_str))
        .unwrap_or("unknown exception")
        .to_string()
}

fn remote_object_text(obj: &Value) -> String {
    match obj.get("value") {
        Some(Value::String(s)) => s.clone(),
        Some(v) if !v.is_null() => v.to_string(),
        _ => obj
            .get("description")
            .and_then(Value::as_str)
            .or_else(|| obj.get("type").and_then(Value::as_str))
            .unwrap_or("")
            .to_string(),
    }
}
