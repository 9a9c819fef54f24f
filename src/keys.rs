/// Session-key plumbing for the bootstrapper: derive public keys with the
/// external `subkey` tool, and register keypairs with a running node through
/// its local JSON-RPC endpoint (`author_insertKey`).
use serde_json::json;
use std::io;
use std::process::Command;

/// The two session keys a validator node needs before it can author blocks.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionKeyType {
    /// GRANDPA finality key (ed25519).
    Gran,
    /// BABE block-production key (sr25519, the subkey default).
    Babe,
}

impl SessionKeyType {
    /// Key-type identifier used in the `author_insertKey` params.
    pub fn rpc_name(&self) -> &'static str {
        match self {
            SessionKeyType::Gran => "gran",
            SessionKeyType::Babe => "babe",
        }
    }

    /// `--scheme` flag for subkey; `None` means the tool default.
    pub fn scheme(&self) -> Option<&'static str> {
        match self {
            SessionKeyType::Gran => Some("ed25519"),
            SessionKeyType::Babe => None,
        }
    }
}

/// Errors from key derivation or RPC injection.
#[derive(Debug)]
pub enum KeyError {
    /// The derivation tool could not be started.
    ToolSpawn { command: String, source: io::Error },
    /// The derivation tool exited non-zero.
    ToolFailed { command: String, stderr: String },
    /// The tool's output did not have the expected shape.
    Parse { output: String },
    /// The RPC request could not be sent or its body was unreadable.
    Rpc { source: reqwest::Error },
    /// The node answered but refused the key.
    Rejected { message: String },
}

impl std::fmt::Display for KeyError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            KeyError::ToolSpawn { command, source } => {
                write!(f, "failed to run key tool {}: {}", command, source)
            }
            KeyError::ToolFailed { command, stderr } => {
                write!(f, "key tool {} failed: {}", command, stderr.trim())
            }
            KeyError::Parse { output } => {
                write!(f, "unexpected key tool output: {:?}", output)
            }
            KeyError::Rpc { source } => write!(f, "key injection RPC failed: {}", source),
            KeyError::Rejected { message } => {
                write!(f, "node rejected the key: {}", message)
            }
        }
    }
}

impl std::error::Error for KeyError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            KeyError::ToolSpawn { source, .. } => Some(source),
            KeyError::Rpc { source } => Some(source),
            _ => None,
        }
    }
}

/// Key operations the bootstrap sequence depends on, behind a trait so the
/// sequence can be tested without subkey or a live node.
pub trait KeyOps {
    /// Derive the public key for `suri` with the external tool.
    fn derive_public(&self, key_type: SessionKeyType, suri: &str) -> Result<String, KeyError>;

    /// Register the keypair with the running node over JSON-RPC.
    fn insert_key(
        &self,
        key_type: SessionKeyType,
        suri: &str,
        public: &str,
    ) -> impl std::future::Future<Output = Result<(), KeyError>> + Send;
}

/// Production implementation: shells out to subkey and posts to the node's
/// local HTTP JSON-RPC endpoint.
pub struct SubkeyRpcOps {
    subkey_command: String,
    rpc_port: u16,
    client: reqwest::Client,
}

impl SubkeyRpcOps {
    pub fn new(subkey_command: &str, rpc_port: u16) -> Self {
        Self {
            subkey_command: subkey_command.to_string(),
            rpc_port,
            client: reqwest::Client::new(),
        }
    }
}

/// Fixed-position parse of `subkey inspect` output: the public key is the
/// last whitespace token on the fourth line.
fn parse_public_key(output: &str) -> Result<String, KeyError> {
    output
        .lines()
        .nth(3)
        .and_then(|line| line.split_whitespace().last())
        .map(str::to_string)
        .ok_or_else(|| KeyError::Parse {
            output: output.to_string(),
        })
}

impl KeyOps for SubkeyRpcOps {
    fn derive_public(&self, key_type: SessionKeyType, suri: &str) -> Result<String, KeyError> {
        let mut command = Command::new(&self.subkey_command);
        command.arg("inspect");
        if let Some(scheme) = key_type.scheme() {
            command.args(["--scheme", scheme]);
        }
        command.arg(suri);

        let output = command.output().map_err(|e| KeyError::ToolSpawn {
            command: self.subkey_command.clone(),
            source: e,
        })?;
        if !output.status.success() {
            return Err(KeyError::ToolFailed {
                command: self.subkey_command.clone(),
                stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
            });
        }

        let public = parse_public_key(&String::from_utf8_lossy(&output.stdout))?;
        tracing::info!(key_type = key_type.rpc_name(), %public, "derived public key");
        Ok(public)
    }

    async fn insert_key(
        &self,
        key_type: SessionKeyType,
        suri: &str,
        public: &str,
    ) -> Result<(), KeyError> {
        let body = json!({
            "jsonrpc": "2.0",
            "id": 1,
            "method": "author_insertKey",
            "params": [key_type.rpc_name(), suri, public],
        });

        let response = self
            .client
            .post(format!("http://localhost:{}", self.rpc_port))
            .json(&body)
            .send()
            .await
            .map_err(|e| KeyError::Rpc { source: e })?;

        let status = response.status();
        if !status.is_success() {
            return Err(KeyError::Rejected {
                message: format!("HTTP {status}"),
            });
        }

        let envelope: serde_json::Value =
            response.json().await.map_err(|e| KeyError::Rpc { source: e })?;
        if let Some(error) = envelope.get("error") {
            return Err(KeyError::Rejected {
                message: error.to_string(),
            });
        }

        tracing::info!(key_type = key_type.rpc_name(), "key injected");
        Ok(())
    }
}
