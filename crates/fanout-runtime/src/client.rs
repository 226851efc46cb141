//! UDS JSON-RPC client for CLI subcommands.

use serde_json::{Value, json};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::UnixStream;

use fanout_core::{Event, Outcome, SessionSnapshot, SessionSummary};

use crate::cli::{StartOpts, StatusOpts};

pub(crate) async fn rpc_call(socket_path: &str, method: &str, params: Value) -> anyhow::Result<Value> {
    let stream = UnixStream::connect(socket_path)
        .await
        .map_err(|e| anyhow::anyhow!("cannot connect to daemon at {socket_path}: {e}"))?;

    let (reader, mut writer) = stream.into_split();

    let request = json!({
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

    let response: Value = serde_json::from_str(line.trim())?;

    if let Some(error) = response.get("error") {
        let message = error["message"].as_str().unwrap_or("unknown error");
        anyhow::bail!("RPC error {}: {message}", error["code"]);
    }

    Ok(response["result"].clone())
}

/// `fanout start`
pub async fn cmd_start(socket_path: &str, opts: StartOpts) -> anyhow::Result<()> {
    let mut params = json!({ "id": opts.id });
    if let Some(payload) = opts.payload {
        params["payload"] = json!(payload);
    }
    if let Some(interval) = opts.interval {
        params["interval_secs"] = json!(interval);
    }
    if let Some(expiry) = opts.expiry {
        params["expiry_secs"] = json!(expiry);
    }
    if !opts.targets.is_empty() {
        params["targets"] = json!(opts.targets);
    }

    let result = rpc_call(socket_path, "create_session", params).await?;
    println!(
        "session {} {} with {} worker(s)",
        result["id"].as_str().unwrap_or("?"),
        result["state"].as_str().unwrap_or("?"),
        result["workers"]
    );
    Ok(())
}

/// `fanout stop`
pub async fn cmd_stop(socket_path: &str, id: &str) -> anyhow::Result<()> {
    let result = rpc_call(socket_path, "stop_session", json!({ "id": id })).await?;
    println!("{}", result["message"].as_str().unwrap_or(""));
    Ok(())
}

/// `fanout status`
pub async fn cmd_status(socket_path: &str, opts: &StatusOpts) -> anyhow::Result<()> {
    let result = rpc_call(socket_path, "get_status", json!({ "id": opts.id })).await?;
    if opts.json {
        println!("{}", serde_json::to_string_pretty(&result)?);
        return Ok(());
    }
    let snapshot: SessionSnapshot = serde_json::from_value(result)?;
    print!("{}", format_status(&snapshot, opts.tail));
    Ok(())
}

/// `fanout ls`
pub async fn cmd_ls(socket_path: &str) -> anyhow::Result<()> {
    let result = rpc_call(socket_path, "list_sessions", Value::Null).await?;
    let sessions: Vec<SessionSummary> = serde_json::from_value(result)?;
    print!("{}", format_list(&sessions));
    Ok(())
}

/// `fanout prune`
pub async fn cmd_prune(socket_path: &str) -> anyhow::Result<()> {
    let result = rpc_call(socket_path, "prune_sessions", Value::Null).await?;
    println!("removed {} stopped session(s)", result["removed"]);
    Ok(())
}

/// Header line plus the last `tail` events, oldest first.
pub(crate) fn format_status(snapshot: &SessionSnapshot, tail: usize) -> String {
    if snapshot.created_at.is_none() {
        return format!("{}: no such session\n", snapshot.id);
    }

    let mut out = format!(
        "{}: {}  events={} ok={} err={}\n",
        snapshot.id,
        snapshot.state,
        snapshot.counter,
        snapshot.success_count,
        snapshot.error_count
    );
    let skip = snapshot.history.len().saturating_sub(tail);
    for event in &snapshot.history[skip..] {
        out.push_str(&format_event(event));
        out.push('\n');
    }
    out
}

fn format_event(event: &Event) -> String {
    let mark = match event.outcome {
        Outcome::Success => "+",
        Outcome::Error => "!",
        Outcome::Info => "-",
    };
    format!(
        "{mark} #{:<6} {} {:<24} {}",
        event.sequence,
        event.timestamp.format("%H:%M:%S"),
        event.target,
        event.message
    )
}

pub(crate) fn format_list(sessions: &[SessionSummary]) -> String {
    if sessions.is_empty() {
        return "no sessions\n".to_string();
    }
    let mut out = String::new();
    for s in sessions {
        out.push_str(&format!(
            "{:<20} {:<9} targets={:<3} events={:<6} ok={} err={}\n",
            s.id,
            s.state.as_str(),
            s.targets,
            s.counter,
            s.success_count,
            s.error_count
        ));
    }
    out
}
