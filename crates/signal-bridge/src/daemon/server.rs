//! Stdio tool server.
//!
//! Reads NDJSON tool calls line by line and dispatches each on its own task,
//! so a long `wait_for_message` never holds up other calls. Responses are
//! written by a single writer task, one line each, in completion order.
//!
//! Input EOF means the host is gone: pending waits are cancelled rather than
//! left to run out their deadline.
//!
//! CHANGELOG:
//! - 10/19/2026 - Cancel pending waits when input closes
//! - 10/19/2026 - Concurrent dispatch over stdio replaces the sequential UNIX socket loop
//! - 10/19/2026 - Initial implementation

use anyhow::{Context, Result};
use std::sync::Arc;
use std::time::Instant;
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncWrite, AsyncWriteExt, BufReader};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::daemon::protocol::{CallError, Request, Response};
use crate::daemon::service::ToolService;

/// Tool server bound to one input and one output stream.
#[derive(Debug, Clone)]
pub struct ToolServer {
    service: Arc<ToolService>,
}

impl ToolServer {
    pub fn new(service: ToolService) -> Self {
        Self {
            service: Arc::new(service),
        }
    }

    /// Serve stdin/stdout until stdin closes.
    pub async fn serve_stdio(&self) -> Result<()> {
        self.serve(tokio::io::stdin(), tokio::io::stdout()).await
    }

    /// Serve until `reader` reaches EOF, then cancel waits and drain in-flight calls.
    pub async fn serve<R, W>(&self, reader: R, writer: W) -> Result<()>
    where
        R: AsyncRead + Unpin,
        W: AsyncWrite + Unpin + Send + 'static,
    {
        let (tx, mut rx) = mpsc::unbounded_channel::<String>();
        let writer_task = tokio::spawn(async move {
            let mut writer = writer;
            while let Some(line) = rx.recv().await {
                if let Err(e) = writer.write_all(line.as_bytes()).await {
                    warn!(error = %e, "failed to write response");
                    break;
                }
                let _ = writer.flush().await;
            }
        });

        info!("tool server listening on stdio");
        let mut lines = BufReader::new(reader).lines();
        while let Some(line) = lines.next_line().await.context("Failed to read request")? {
            if line.trim().is_empty() {
                continue;
            }
            let service = Arc::clone(&self.service);
            let tx = tx.clone();
            tokio::spawn(async move {
                let response = handle_line(&service, &line).await;
                match response.to_line() {
                    Ok(out) => {
                        let _ = tx.send(out);
                    }
                    Err(e) => warn!(error = %e, "failed to serialize response"),
                }
            });
        }

        debug!("input closed, cancelling waits and draining in-flight calls");
        self.service.bridge().router().close();
        drop(tx);
        writer_task.await.context("response writer panicked")?;
        Ok(())
    }
}

/// Parse, dispatch and wrap a single request line.
pub async fn handle_line(service: &ToolService, line: &str) -> Response {
    let started = Instant::now();
    let request = match Request::parse(line) {
        Ok(request) => request,
        Err(e) => {
            warn!(error = %e, "invalid request line");
            return Response::new(request_id(line), Err(e), started);
        }
    };

    let outcome = match request.check_version() {
        Err(e) => Err(e),
        Ok(()) if !ToolService::handles(&request.method) => {
            Err(CallError::UnknownMethod(request.method.clone()))
        }
        Ok(()) => {
            debug!(id = %request.id, method = %request.method, "dispatching");
            service
                .dispatch(&request.method, request.params)
                .await
                .map_err(|e| CallError::InvalidParams(format!("{:#}", e)))
        }
    };
    Response::new(request.id, outcome, started)
}

/// Best-effort id from a line that failed to parse as a request.
fn request_id(line: &str) -> String {
    serde_json::from_str::<serde_json::Value>(line)
        .ok()
        .and_then(|v| v.get("id").and_then(|id| id.as_str()).map(str::to_string))
        .unwrap_or_default()
}
