//! UDS JSON-RPC server for the shell and the CLI.
//! Connection-per-request, newline-delimited JSON.

use std::path::Path;
use std::sync::Arc;

use serde::Deserialize;
use serde_json::{Value, json};
use tokio::io::{AsyncBufReadExt, AsyncReadExt, AsyncWriteExt, BufReader};
use tokio::net::{UnixListener, UnixStream};
use tokio::sync::{mpsc, watch};
use tokio_util::sync::CancellationToken;

use kiosk_core::{Geometry, PaneIndex, Placement, Resolution, WindowId};

use crate::supervisor::{PaneView, SupervisorCommand};

const PARSE_ERROR: i64 = -32700;
const METHOD_NOT_FOUND: i64 = -32601;
const INVALID_PARAMS: i64 = -32602;
const INTERNAL_ERROR: i64 = -32603;

/// Longest request line read from a client. Anything past it is cut off and
/// answered with a parse error.
const MAX_REQUEST_BYTES: u64 = 64 * 1024;

/// Everything a request handler can see. Cheap to clone per connection.
#[derive(Clone)]
pub struct ShellState {
    pub panes: watch::Receiver<Vec<PaneView>>,
    pub ready: watch::Receiver<bool>,
    pub resolution: watch::Receiver<Arc<Resolution>>,
    pub commands: mpsc::Sender<SupervisorCommand>,
}

#[derive(Debug, PartialEq, Eq)]
pub(crate) struct RpcError {
    pub code: i64,
    pub message: String,
}

impl RpcError {
    fn new(code: i64, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }
}

#[derive(Debug, Deserialize)]
struct ResizeParams {
    pane: PaneIndex,
    x: i32,
    y: i32,
    width: u32,
    height: u32,
    #[serde(default)]
    parent_window: Option<WindowId>,
}

/// Run the UDS JSON-RPC server until `cancel` fires.
pub async fn run_server(
    socket_path: &str,
    state: ShellState,
    cancel: CancellationToken,
) -> anyhow::Result<()> {
    // Create socket directory with mode 0700
    let socket_dir = Path::new(socket_path)
        .parent()
        .ok_or_else(|| anyhow::anyhow!("invalid socket path"))?;

    std::fs::create_dir_all(socket_dir)?;

    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        std::fs::set_permissions(socket_dir, std::fs::Permissions::from_mode(0o700))?;
    }

    // Check for stale socket
    if Path::new(socket_path).exists() {
        if UnixStream::connect(socket_path).await.is_err() {
            std::fs::remove_file(socket_path)?;
            tracing::info!("removed stale socket at {socket_path}");
        } else {
            anyhow::bail!("another daemon is already running at {socket_path}");
        }
    }

    let listener = UnixListener::bind(socket_path)?;

    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        std::fs::set_permissions(socket_path, std::fs::Permissions::from_mode(0o600))?;
    }

    tracing::info!("UDS server listening on {socket_path}");

    let result = loop {
        let stream = tokio::select! {
            () = cancel.cancelled() => break Ok(()),
            accepted = listener.accept() => match accepted {
                Ok((stream, _)) => stream,
                Err(e) => break Err(e.into()),
            },
        };
        let state = state.clone();
        tokio::spawn(async move {
            if let Err(e) = handle_connection(stream, state).await {
                tracing::debug!("connection error: {e}");
            }
        });
    };

    let _ = std::fs::remove_file(socket_path);
    result
}

async fn handle_connection(stream: UnixStream, state: ShellState) -> anyhow::Result<()> {
    let (reader, mut writer) = stream.into_split();
    let mut reader = BufReader::new(reader.take(MAX_REQUEST_BYTES));
    let mut line = String::new();
    reader.read_line(&mut line).await?;

    let response = match serde_json::from_str::<Value>(line.trim()) {
        Ok(request) => {
            let method = request["method"].as_str().unwrap_or("");
            let id = request["id"].clone();
            match dispatch(&state, method, &request["params"]).await {
                Ok(result) => json!({"jsonrpc": "2.0", "result": result, "id": id}),
                Err(e) => error_response(&e, id),
            }
        }
        Err(e) => error_response(&RpcError::new(PARSE_ERROR, e.to_string()), Value::Null),
    };

    let mut resp = serde_json::to_string(&response)?;
    resp.push('\n');
    writer.write_all(resp.as_bytes()).await?;

    Ok(())
}

fn error_response(error: &RpcError, id: Value) -> Value {
    json!({
        "jsonrpc": "2.0",
        "error": {"code": error.code, "message": error.message},
        "id": id,
    })
}

pub(crate) async fn dispatch(
    state: &ShellState,
    method: &str,
    params: &Value,
) -> Result<Value, RpcError> {
    match method {
        "list_panes" => {
            // Clone out of the borrow; never hold it across an await.
            let panes = state.panes.borrow().clone();
            to_value(&panes)
        }
        "readiness" => Ok(json!({"ready": *state.ready.borrow()})),
        "schedule" => {
            let resolution = Arc::clone(&state.resolution.borrow());
            Ok(json!({
                "desired": to_value(&resolution.desired)?,
                "conflicts": to_value(&resolution.conflicts)?,
            }))
        }
        "resize" => {
            let params: ResizeParams = serde_json::from_value(params.clone())
                .map_err(|e| RpcError::new(INVALID_PARAMS, e.to_string()))?;
            let pane_count = state.panes.borrow().len();
            if params.pane >= pane_count {
                return Err(RpcError::new(
                    INVALID_PARAMS,
                    format!("pane {} out of range ({pane_count} panes)", params.pane),
                ));
            }
            let placement = Placement {
                geometry: Geometry {
                    x: params.x,
                    y: params.y,
                    width: params.width,
                    height: params.height,
                },
                parent: params.parent_window,
            };
            tracing::debug!(pane = params.pane, ?placement, "resize requested");
            state
                .commands
                .send(SupervisorCommand::Resize {
                    pane: params.pane,
                    placement,
                })
                .await
                .map_err(|_| RpcError::new(INTERNAL_ERROR, "supervisor stopped"))?;
            Ok(json!({"accepted": true}))
        }
        _ => Err(RpcError::new(METHOD_NOT_FOUND, "method not found")),
    }
}

fn to_value<T: serde::Serialize>(value: &T) -> Result<Value, RpcError> {
    serde_json::to_value(value).map_err(|e| RpcError::new(INTERNAL_ERROR, e.to_string()))
}
