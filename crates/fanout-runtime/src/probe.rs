//! TCP reachability probe: the dispatcher the daemon ships with.
//!
//! Each attempt opens a connection to the target's `host:port` under a
//! fixed timeout, writes the payload if there is one, and closes.

use std::io::ErrorKind;
use std::time::Duration;

use tokio::io::AsyncWriteExt;
use tokio::net::TcpStream;

use fanout_core::DispatchOutcome;
use fanout_daemon::{DispatchRequest, Dispatcher};

#[derive(Debug, Clone)]
pub struct TcpProbe {
    timeout: Duration,
}

impl TcpProbe {
    pub fn new(timeout: Duration) -> Self {
        Self { timeout }
    }

    async fn attempt(&self, authority: &str, payload: &[u8]) -> std::io::Result<()> {
        let mut stream = TcpStream::connect(authority).await?;
        if !payload.is_empty() {
            stream.write_all(payload).await?;
        }
        stream.shutdown().await
    }
}

impl Dispatcher for TcpProbe {
    async fn dispatch(&self, request: DispatchRequest<'_>) -> DispatchOutcome {
        let authority = authority(&request.target.address);
        match tokio::time::timeout(self.timeout, self.attempt(authority, request.payload)).await {
            Ok(Ok(())) => DispatchOutcome::Success { status: None },
            Ok(Err(e)) => classify(&e),
            Err(_) => DispatchOutcome::Timeout,
        }
    }
}

/// `scheme://user:pw@host:port/path` → `host:port`.
pub fn authority(address: &str) -> &str {
    let rest = address.split_once("://").map_or(address, |(_, rest)| rest);
    let rest = rest.rsplit_once('@').map_or(rest, |(_, host)| host);
    rest.split('/').next().unwrap_or(rest)
}

fn classify(err: &std::io::Error) -> DispatchOutcome {
    match err.kind() {
        ErrorKind::TimedOut => DispatchOutcome::Timeout,
        ErrorKind::InvalidInput | ErrorKind::Unsupported => DispatchOutcome::Unexpected {
            detail: err.to_string(),
        },
        _ => DispatchOutcome::ConnectionError {
            reason: err.to_string(),
        },
    }
}
