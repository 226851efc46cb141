//! fanout: session orchestrator daemon and its CLI client.

use clap::Parser;

mod cli;
mod client;
mod config;
mod daemon;
mod probe;
mod server;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = cli::Cli::parse();
    let socket_path = args.socket_path.unwrap_or_else(cli::default_socket_path);

    match args.command {
        cli::Command::Daemon(opts) => {
            let filter = std::env::var("FANOUT_LOG")
                .or_else(|_| std::env::var("RUST_LOG"))
                .unwrap_or_else(|_| "info".to_string());
            tracing_subscriber::fmt()
                .with_env_filter(tracing_subscriber::EnvFilter::new(filter))
                .init();

            tracing::info!("fanout daemon starting");
            daemon::run_daemon(opts, &socket_path).await?;
        }
        cli::Command::Start(opts) => client::cmd_start(&socket_path, opts).await?,
        cli::Command::Stop(opts) => client::cmd_stop(&socket_path, &opts.id).await?,
        cli::Command::Status(opts) => client::cmd_status(&socket_path, &opts).await?,
        cli::Command::Ls => client::cmd_ls(&socket_path).await?,
        cli::Command::Prune => client::cmd_prune(&socket_path).await?,
    }

    Ok(())
}
