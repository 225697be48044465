//! UDS JSON-RPC client for CLI subcommands.

use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::UnixStream;

pub(crate) async fn rpc_call(
    socket_path: &str,
    method: &str,
    params: serde_json::Value,
) -> anyhow::Result<serde_json::Value> {
    let stream = UnixStream::connect(socket_path)
        .await
        .map_err(|e| anyhow::anyhow!("cannot connect to daemon at {socket_path}: {e}"))?;

    let (reader, mut writer) = stream.into_split();

    let request = serde_json::json!({
        "jsonrpc": "2.0",
        "method": method,
        "params": params,
        "id": 1,
    });
    let mut req = serde_json::to_string(&request)?;
    req.push('\n');
    writer.write_all(req.as_bytes()).await?;
    writer.shutdown().await?;

    let mut reader = BufReader::new(reader);
    let mut line = String::new();
    reader.read_line(&mut line).await?;

    let response: serde_json::Value = serde_json::from_str(line.trim())?;

    if let Some(error) = response.get("error") {
        anyhow::bail!("RPC error: {error}");
    }

    Ok(response["result"].clone())
}

/// `kioskd panes`: one line per pane, `--json` for the raw list.
pub async fn cmd_panes(socket_path: &str, json: bool) -> anyhow::Result<()> {
    let panes = rpc_call(socket_path, "list_panes", serde_json::Value::Null).await?;
    if json {
        println!("{}", serde_json::to_string_pretty(&panes)?);
    } else {
        print!("{}", format_panes(&panes));
    }
    Ok(())
}

/// `kioskd ready`: prints the gate and exits 0 when ready, 1 otherwise.
pub async fn cmd_ready(socket_path: &str) -> anyhow::Result<i32> {
    let readiness = rpc_call(socket_path, "readiness", serde_json::Value::Null).await?;
    let ready = readiness["ready"].as_bool().unwrap_or(false);
    println!("{}", if ready { "ready" } else { "not ready" });
    Ok(if ready { 0 } else { 1 })
}

/// Pure formatting for `kioskd panes`, separated for testability.
pub(crate) fn format_panes(panes: &serde_json::Value) -> String {
    let Some(arr) = panes.as_array() else {
        return String::new();
    };

    let mut out = String::new();
    for pane in arr {
        let index = pane["pane"].as_u64().unwrap_or_default();
        let source = pane["source"].as_str().unwrap_or("-");
        let state = pane["state"].as_str().unwrap_or("-");
        let surface = &pane["surface"];
        let shown = match surface["type"].as_str() {
            Some("native") => format!("window {}", surface["window"].as_str().unwrap_or("?")),
            Some("remote") => format!(
                "{} (gen {})",
                surface["address"].as_str().unwrap_or("?"),
                surface["reload_generation"].as_u64().unwrap_or_default()
            ),
            Some("placeholder") => {
                format!("placeholder: {}", surface["reason"].as_str().unwrap_or(""))
            }
            _ => "empty".to_string(),
        };
        let g = &pane["placement"]["geometry"];
        let restarts = pane["restart_count"].as_u64().unwrap_or_default();
        let marker = if pane["fallback_override"].as_bool() == Some(true) {
            " [fallback]"
        } else {
            ""
        };
        out.push_str(&format!(
            "{index:>2}  {source:<16} {state:<16} {w}x{h}+{x}+{y}  restarts={restarts}  {shown}{marker}\n",
            w = g["width"],
            h = g["height"],
            x = g["x"],
            y = g["y"],
        ));
    }
    out
}
