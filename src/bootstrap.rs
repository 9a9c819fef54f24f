/// One-shot validator bootstrap: start the node, wait for its RPC endpoint,
/// derive and inject the gran and babe session keys, then restart the node
/// once so it picks the keys up. No retries; any failure after the node is
/// up kills it and aborts.
use crate::keys::{KeyError, KeyOps, SessionKeyType};
use crate::process::{ProcessControl, ProcessError};
use std::path::PathBuf;
use std::time::Duration;

/// Everything the bootstrap sequence needs, resolved from config + CLI.
#[derive(Debug, Clone)]
pub struct BootstrapPlan {
    pub node_command: String,
    /// Fixed base flags plus the pass-through flags, forwarded verbatim.
    pub node_args: Vec<String>,
    pub rpc_port: u16,
    pub gran_key: String,
    pub babe_key: String,
    pub log_path: PathBuf,
    pub warmup: Duration,
}

#[derive(Debug)]
pub enum BootstrapError {
    /// The node binary failed to start.
    NodeStart(ProcessError),
    /// Deriving or injecting a session key failed; the node has been killed.
    Inject {
        key_type: SessionKeyType,
        source: KeyError,
    },
    /// The final restart failed to respawn the node.
    Restart(ProcessError),
}

impl std::fmt::Display for BootstrapError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            BootstrapError::NodeStart(source) => write!(f, "failed to start node: {}", source),
            BootstrapError::Inject { key_type, source } => {
                write!(f, "failed to inject {} key: {}", key_type.rpc_name(), source)
            }
            BootstrapError::Restart(source) => {
                write!(f, "failed to restart node after key injection: {}", source)
            }
        }
    }
}

impl std::error::Error for BootstrapError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            BootstrapError::NodeStart(source) | BootstrapError::Restart(source) => Some(source),
            BootstrapError::Inject { source, .. } => Some(source),
        }
    }
}

/// Run the bootstrap sequence to completion.
pub async fn run<P: ProcessControl, K: KeyOps>(
    plan: BootstrapPlan,
    control: &P,
    keys: &K,
) -> Result<(), BootstrapError> {
    let pid = control
        .spawn_redirected(&plan.node_command, &plan.node_args, &plan.log_path)
        .map_err(BootstrapError::NodeStart)?;
    tracing::info!(pid, command = %plan.node_command, "node started");

    tracing::info!(
        warmup_secs = plan.warmup.as_secs(),
        rpc_port = plan.rpc_port,
        "waiting for node RPC endpoint"
    );
    tokio::time::sleep(plan.warmup).await;

    // Gran first, then babe; the first failure kills the node and aborts, so
    // a gran failure never attempts the babe key.
    for key_type in [SessionKeyType::Gran, SessionKeyType::Babe] {
        if let Err(source) = inject(plan_key(&plan, key_type), key_type, keys).await {
            tracing::error!(
                key_type = key_type.rpc_name(),
                %source,
                "key injection failed, killing node"
            );
            kill_node(&plan, control, Some(pid));
            return Err(BootstrapError::Inject { key_type, source });
        }
    }

    // Mandatory restart so the node loads the injected keys.
    kill_node(&plan, control, Some(pid));
    let pid = control
        .spawn_redirected(&plan.node_command, &plan.node_args, &plan.log_path)
        .map_err(BootstrapError::Restart)?;
    tracing::info!(pid, "node restarted with injected keys");
    Ok(())
}

fn plan_key(plan: &BootstrapPlan, key_type: SessionKeyType) -> &str {
    match key_type {
        SessionKeyType::Gran => &plan.gran_key,
        SessionKeyType::Babe => &plan.babe_key,
    }
}

async fn inject<K: KeyOps>(
    suri: &str,
    key_type: SessionKeyType,
    keys: &K,
) -> Result<(), KeyError> {
    let public = keys.derive_public(key_type, suri)?;
    keys.insert_key(key_type, suri, &public).await
}

/// Kill the node: the tracked PID first, then any process whose command line
/// carries this bootstrap's rpc-port flag (the original matched the node by
/// port to spare unrelated instances). Finding nothing is logged, not fatal.
fn kill_node<P: ProcessControl>(plan: &BootstrapPlan, control: &P, pid: Option<u32>) {
    if let Some(pid) = pid {
        control.kill_pid(pid);
    }
    let pattern = format!("--rpc-port {}", plan.rpc_port);
    let killed = control.kill_matching(&pattern);
    tracing::info!(killed, rpc_port = plan.rpc_port, "node instances terminated");
}
