//! Daemon wiring: config → probe dispatcher → registry → UDS server.
//! Runs until SIGINT/SIGTERM, then stops every session and waits for drain.

use std::sync::Arc;

use fanout_daemon::SessionRegistry;

use crate::cli::DaemonOpts;
use crate::config::DaemonConfig;
use crate::probe::TcpProbe;
use crate::server::{self, ServerContext};

pub async fn run_daemon(opts: DaemonOpts, socket_path: &str) -> anyhow::Result<()> {
    let config = DaemonConfig::load(opts.config.as_deref())?;
    let targets = config.target_descriptors();
    if targets.is_empty() {
        tracing::warn!("no targets configured; sessions without explicit targets will stop at once");
    } else {
        let labels: Vec<&str> = targets.iter().map(|t| t.label.as_str()).collect();
        tracing::info!(count = targets.len(), targets = ?labels, "targets loaded");
    }

    let probe = Arc::new(TcpProbe::new(config.defaults.probe_timeout()));
    let ctx = Arc::new(ServerContext {
        registry: SessionRegistry::new(probe),
        targets,
        interval: config.defaults.interval()?,
        expiry: config.defaults.expiry()?,
        history_capacity: config.defaults.history_capacity,
    });

    let server_ctx = Arc::clone(&ctx);
    let server_socket = socket_path.to_string();
    let mut server_handle = tokio::spawn(async move {
        if let Err(e) = server::run_server(&server_socket, server_ctx).await {
            tracing::error!("UDS server error: {e}");
        }
    });

    // Wait for shutdown signal (ctrl-c or SIGTERM)
    let shutdown = async {
        let ctrl_c = tokio::signal::ctrl_c();

        #[cfg(unix)]
        {
            match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
                Ok(mut sigterm) => {
                    tokio::select! {
                        _ = ctrl_c => tracing::info!("received ctrl-c, shutting down"),
                        _ = sigterm.recv() => tracing::info!("received SIGTERM, shutting down"),
                    }
                }
                Err(e) => {
                    tracing::warn!("cannot register SIGTERM handler: {e}");
                    ctrl_c.await.ok();
                    tracing::info!("received ctrl-c, shutting down");
                }
            }
        }

        #[cfg(not(unix))]
        {
            ctrl_c.await.ok();
            tracing::info!("received ctrl-c, shutting down");
        }
    };

    tokio::select! {
        () = shutdown => {}
        _ = &mut server_handle => {
            tracing::warn!("server exited unexpectedly");
        }
    }

    server_handle.abort();
    ctx.registry.shutdown().await;

    // Cleanup socket
    let _ = std::fs::remove_file(socket_path);
    tracing::info!("daemon stopped");
    Ok(())
}
