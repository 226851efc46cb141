//! CLI definition using clap derive.

use std::path::PathBuf;

use clap::{Parser, Subcommand};

#[derive(Parser)]
#[command(name = "fanout", about = "fan repeated dispatches out across targets")]
pub struct Cli {
    /// UDS socket path (default: /tmp/fanout-$USER/fanoutd.sock)
    #[arg(long, short = 's', global = true, env = "FANOUT_SOCKET")]
    pub socket_path: Option<String>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand)]
pub enum Command {
    /// Run the daemon (session registry + UDS server)
    Daemon(DaemonOpts),
    /// Create and start a session
    Start(StartOpts),
    /// Stop a session (no-op if it is not running)
    Stop(IdOpts),
    /// Show one session's state and history
    Status(StatusOpts),
    /// List all sessions
    Ls,
    /// Drop stopped sessions from the daemon
    Prune,
}

#[derive(clap::Args)]
pub struct DaemonOpts {
    /// TOML config with defaults and the target list
    #[arg(long, short = 'c', env = "FANOUT_CONFIG")]
    pub config: Option<PathBuf>,
}

#[derive(clap::Args)]
pub struct StartOpts {
    /// Session id
    pub id: String,

    /// Payload handed to the dispatcher on every attempt
    #[arg(long, short = 'p')]
    pub payload: Option<String>,

    /// Seconds between a worker's attempts (daemon default if omitted)
    #[arg(long)]
    pub interval: Option<f64>,

    /// Seconds until the session stops itself (daemon default if omitted)
    #[arg(long)]
    pub expiry: Option<u64>,

    /// Target address; repeat to override the daemon's configured list
    #[arg(long = "target", short = 't')]
    pub targets: Vec<String>,
}

#[derive(clap::Args)]
pub struct IdOpts {
    /// Session id
    pub id: String,
}

#[derive(clap::Args)]
pub struct StatusOpts {
    /// Session id
    pub id: String,

    /// Print the raw JSON snapshot
    #[arg(long)]
    pub json: bool,

    /// Number of most recent events to print
    #[arg(long, short = 'n', default_value = "20")]
    pub tail: usize,
}

/// Default socket path using $USER for per-user isolation.
pub fn default_socket_path() -> String {
    if let Ok(dir) = std::env::var("XDG_RUNTIME_DIR") {
        return format!("{dir}/fanout/fanoutd.sock");
    }
    let user = std::env::var("USER").unwrap_or_else(|_| "unknown".to_string());
    format!("/tmp/fanout-{user}/fanoutd.sock")
}
