//! UDS JSON-RPC server: connection-per-request, newline-delimited JSON.

use std::sync::Arc;
use std::time::Duration;

use serde::Deserialize;
use serde_json::{Value, json};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::{UnixListener, UnixStream};

use fanout_core::{SessionError, TargetDescriptor};
use fanout_daemon::{Dispatcher, SessionParams, SessionRegistry};

use crate::config::positive_secs;

pub const METHOD_NOT_FOUND: i64 = -32601;
pub const INVALID_PARAMS: i64 = -32602;
pub const INTERNAL_ERROR: i64 = -32603;
pub const PARSE_ERROR: i64 = -32700;
pub const SESSION_CONFLICT: i64 = -32001;

/// What the request handlers need: the registry plus daemon defaults.
pub struct ServerContext<D> {
    pub registry: SessionRegistry<D>,
    pub targets: Vec<TargetDescriptor>,
    pub interval: Duration,
    pub expiry: Duration,
    pub history_capacity: usize,
}

#[derive(Debug)]
pub struct RpcError {
    code: i64,
    message: String,
}

impl RpcError {
    fn invalid_params(message: impl Into<String>) -> Self {
        Self {
            code: INVALID_PARAMS,
            message: message.into(),
        }
    }
}

impl From<SessionError> for RpcError {
    fn from(err: SessionError) -> Self {
        let code = match err {
            SessionError::Conflict(_) => SESSION_CONFLICT,
            SessionError::EmptyId | SessionError::InvalidInterval | SessionError::InvalidExpiry => {
                INVALID_PARAMS
            }
        };
        Self {
            code,
            message: err.to_string(),
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct CreateParams {
    id: String,
    #[serde(default)]
    payload: String,
    #[serde(default)]
    targets: Option<Vec<String>>,
    #[serde(default)]
    interval_secs: Option<f64>,
    #[serde(default)]
    expiry_secs: Option<u64>,
}

#[derive(Debug, Deserialize)]
struct IdParams {
    id: String,
}

/// Run the UDS JSON-RPC server until the listener fails.
pub async fn run_server<D: Dispatcher>(
    socket_path: &str,
    ctx: Arc<ServerContext<D>>,
) -> anyhow::Result<()> {
    let socket_dir = std::path::Path::new(socket_path)
        .parent()
        .ok_or_else(|| anyhow::anyhow!("invalid socket path"))?;

    std::fs::create_dir_all(socket_dir)?;

    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        std::fs::set_permissions(socket_dir, std::fs::Permissions::from_mode(0o700))?;
    }

    // Check for stale socket
    if std::path::Path::new(socket_path).exists() {
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
    serve(listener, ctx).await
}

pub(crate) async fn serve<D: Dispatcher>(
    listener: UnixListener,
    ctx: Arc<ServerContext<D>>,
) -> anyhow::Result<()> {
    loop {
        let (stream, _) = listener.accept().await?;
        let ctx = Arc::clone(&ctx);
        tokio::spawn(async move {
            if let Err(e) = handle_connection(stream, ctx).await {
                tracing::debug!("connection error: {e}");
            }
        });
    }
}

async fn handle_connection<D: Dispatcher>(
    stream: UnixStream,
    ctx: Arc<ServerContext<D>>,
) -> anyhow::Result<()> {
    let (reader, mut writer) = stream.into_split();
    let mut reader = BufReader::new(reader);
    let mut line = String::new();
    reader.read_line(&mut line).await?;

    let response = match serde_json::from_str::<Value>(line.trim()) {
        Ok(request) => handle_request(&ctx, &request).await,
        Err(e) => error_response(
            Value::Null,
            RpcError {
                code: PARSE_ERROR,
                message: e.to_string(),
            },
        ),
    };

    let mut resp = serde_json::to_string(&response)?;
    resp.push('\n');
    writer.write_all(resp.as_bytes()).await?;
    Ok(())
}

/// Route one parsed request and wrap the result in a JSON-RPC envelope.
pub(crate) async fn handle_request<D: Dispatcher>(
    ctx: &ServerContext<D>,
    request: &Value,
) -> Value {
    let id = request["id"].clone();
    let method = request["method"].as_str().unwrap_or("");
    let params = request.get("params").cloned().unwrap_or(Value::Null);

    let result = match method {
        "create_session" => create_session(ctx, params).await,
        "stop_session" => match parse_params::<IdParams>(params) {
            Ok(p) => {
                let ack = ctx.registry.stop(&p.id).await;
                Ok(json!({"ok": true, "was_active": ack.was_active, "message": ack.message}))
            }
            Err(e) => Err(e),
        },
        "get_status" => match parse_params::<IdParams>(params) {
            Ok(p) => to_value(ctx.registry.status(&p.id).await),
            Err(e) => Err(e),
        },
        "list_sessions" => to_value(ctx.registry.list().await),
        "prune_sessions" => Ok(json!({"removed": ctx.registry.prune().await})),
        _ => Err(RpcError {
            code: METHOD_NOT_FOUND,
            message: "method not found".to_owned(),
        }),
    };

    match result {
        Ok(result) => json!({"jsonrpc": "2.0", "result": result, "id": id}),
        Err(err) => error_response(id, err),
    }
}

async fn create_session<D: Dispatcher>(
    ctx: &ServerContext<D>,
    params: Value,
) -> Result<Value, RpcError> {
    let p: CreateParams = parse_params(params)?;

    let interval = match p.interval_secs {
        Some(secs) => positive_secs(secs)
            .ok_or_else(|| RpcError::invalid_params("interval_secs must be positive"))?,
        None => ctx.interval,
    };
    let expiry = match p.expiry_secs {
        Some(0) => return Err(RpcError::invalid_params("expiry_secs must be positive")),
        Some(secs) => Duration::from_secs(secs),
        None => ctx.expiry,
    };
    let targets = match p.targets {
        Some(addresses) => addresses.into_iter().map(TargetDescriptor::new).collect(),
        None => ctx.targets.clone(),
    };

    let params = SessionParams::new(p.id, targets)
        .with_payload(p.payload.into_bytes())
        .with_interval(interval)
        .with_expiry(expiry)
        .with_history_capacity(ctx.history_capacity);
    let session = ctx.registry.create(params).await?;

    Ok(json!({
        "ok": true,
        "id": session.id(),
        "state": session.state(),
        "workers": session.spawned_workers(),
    }))
}

fn parse_params<T: for<'de> Deserialize<'de>>(params: Value) -> Result<T, RpcError> {
    serde_json::from_value(params).map_err(|e| RpcError::invalid_params(e.to_string()))
}

fn to_value<T: serde::Serialize>(value: T) -> Result<Value, RpcError> {
    serde_json::to_value(value).map_err(|e| RpcError {
        code: INTERNAL_ERROR,
        message: e.to_string(),
    })
}

fn error_response(id: Value, err: RpcError) -> Value {
    json!({
        "jsonrpc": "2.0",
        "error": {"code": err.code, "message": err.message},
        "id": id,
    })
}
