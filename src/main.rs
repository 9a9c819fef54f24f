mod bootstrap;
mod config;
mod health;
mod keys;
mod process;
mod signals;
mod supervisor;
mod tail;

use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::process::ExitCode;
use std::time::Duration;

use bootstrap::BootstrapPlan;
use keys::SubkeyRpcOps;
use process::OsProcessControl;
use supervisor::{Supervisor, WatchTarget};

/// Supervise a mining worker from its log tail, and bootstrap validator
/// nodes by injecting session keys over local RPC.
#[derive(Parser, Debug)]
#[command(name = "minewatch", version, about)]
struct Cli {
    /// Config file path
    #[arg(short, long, default_value = "minewatch.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: CliCommand,
}

#[derive(Subcommand, Debug)]
enum CliCommand {
    /// Watch a worker and restart it when its log output freezes
    Watch {
        /// Worker name: locates running instances, respawns `./<name>`, and
        /// reads `<name>.log` unless overridden
        target: String,

        /// Override the respawn command (default: ./<target>)
        #[arg(long)]
        command: Option<String>,

        /// Override the log file path (default: <target>.log)
        #[arg(long)]
        log_file: Option<PathBuf>,

        /// Override poll interval in seconds
        #[arg(long)]
        interval: Option<u64>,

        /// Override the stall threshold
        #[arg(long)]
        threshold: Option<u32>,

        /// Arguments passed to the respawned worker, after `--`
        #[arg(last = true)]
        worker_args: Vec<String>,
    },
    /// Start a node, inject babe/gran session keys over RPC, and restart it
    Bootstrap {
        /// Node RPC port; also forwarded to the node command line
        #[arg(long)]
        rpc_port: u16,

        /// BABE private key material (secret seed or URI)
        #[arg(long)]
        babe_key: String,

        /// GRANDPA private key material (secret seed or URI)
        #[arg(long)]
        gran_key: String,

        /// Log file base name; node output goes to <log-file>.log
        #[arg(long)]
        log_file: String,

        /// Forwarded verbatim to the node
        #[arg(long)]
        port: Option<u16>,

        /// Forwarded verbatim to the node
        #[arg(long)]
        ws_port: Option<u16>,

        /// Forwarded verbatim to the node
        #[arg(long)]
        node_key_file: Option<PathBuf>,

        /// Forwarded verbatim to the node
        #[arg(long)]
        name: Option<String>,

        /// Forwarded verbatim to the node
        #[arg(long)]
        base_path: Option<PathBuf>,
    },
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "minewatch=info".parse().unwrap()),
        )
        .with_target(false)
        .init();

    let config = match config::load(&cli.config) {
        Ok(config) => config,
        Err(err) => {
            tracing::error!(%err, "cannot load configuration");
            return ExitCode::FAILURE;
        }
    };

    match cli.command {
        CliCommand::Watch {
            target,
            command,
            log_file,
            interval,
            threshold,
            worker_args,
        } => {
            let mut watch_config = config.watch;
            if let Some(secs) = interval {
                watch_config.poll_interval_secs = secs;
            }
            if let Some(n) = threshold {
                watch_config.stall_threshold = n;
            }

            let mut watch_target = WatchTarget::from_name(&target);
            if let Some(command) = command {
                watch_target.command = command;
            }
            if let Some(path) = log_file {
                watch_target.log_path = path;
            }
            watch_target.args = worker_args;

            let handler = match signals::SignalHandler::install() {
                Ok(handler) => handler,
                Err(err) => {
                    tracing::error!(%err, "cannot install signal handlers");
                    return ExitCode::FAILURE;
                }
            };

            Supervisor::new(watch_target, &watch_config, OsProcessControl)
                .run(handler.shutdown())
                .await;
            ExitCode::SUCCESS
        }
        CliCommand::Bootstrap {
            rpc_port,
            babe_key,
            gran_key,
            log_file,
            port,
            ws_port,
            node_key_file,
            name,
            base_path,
        } => {
            let mut node_args = config.node.base_args.clone();
            node_args.push("--rpc-port".to_string());
            node_args.push(rpc_port.to_string());
            if let Some(port) = port {
                node_args.push("--port".to_string());
                node_args.push(port.to_string());
            }
            if let Some(ws_port) = ws_port {
                node_args.push("--ws-port".to_string());
                node_args.push(ws_port.to_string());
            }
            if let Some(path) = node_key_file {
                node_args.push("--node-key-file".to_string());
                node_args.push(path.to_string_lossy().into_owned());
            }
            if let Some(name) = name {
                node_args.push("--name".to_string());
                node_args.push(name);
            }
            if let Some(path) = base_path {
                node_args.push("--base-path".to_string());
                node_args.push(path.to_string_lossy().into_owned());
            }

            let plan = BootstrapPlan {
                node_command: config.node.command.clone(),
                node_args,
                rpc_port,
                gran_key,
                babe_key,
                log_path: PathBuf::from(format!("{log_file}.log")),
                warmup: Duration::from_secs(config.bootstrap.warmup_secs),
            };

            let keys = SubkeyRpcOps::new(&config.bootstrap.subkey_command, rpc_port);
            match bootstrap::run(plan, &OsProcessControl, &keys).await {
                Ok(()) => ExitCode::SUCCESS,
                Err(err) => {
                    tracing::error!(%err, "bootstrap failed");
                    ExitCode::FAILURE
                }
            }
        }
    }
}
