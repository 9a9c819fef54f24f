use serde::Deserialize;
use std::path::{Path, PathBuf};

/// Top-level configuration loaded from minewatch.toml.
#[derive(Debug, Deserialize)]
#[serde(default)]
#[derive(Default)]
pub struct MinewatchConfig {
    pub watch: WatchConfig,
    pub node: NodeConfig,
    pub bootstrap: BootstrapConfig,
}

#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct WatchConfig {
    /// Seconds between log-tail polls.
    pub poll_interval_secs: u64,
    /// Seconds to wait between killing the worker and respawning it.
    pub post_kill_delay_secs: u64,
    /// Consecutive stalled polls before a restart cycle.
    pub stall_threshold: u32,
    /// A log line containing this marker counts as a stall even if it changed.
    pub error_marker: String,
}

#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct NodeConfig {
    /// Node binary launched by the bootstrapper.
    pub command: String,
    /// Fixed flags prepended before the forwarded CLI flags.
    pub base_args: Vec<String>,
}

#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct BootstrapConfig {
    /// Seconds to wait after starting the node before key injection.
    pub warmup_secs: u64,
    /// Key-derivation tool invoked as `<subkey_command> inspect ...`.
    pub subkey_command: String,
}

// --- Default implementations ---

impl Default for WatchConfig {
    fn default() -> Self {
        Self {
            poll_interval_secs: 10,
            post_kill_delay_secs: 5,
            stall_threshold: 5,
            error_marker: "Client Error".to_string(),
        }
    }
}

impl Default for NodeConfig {
    fn default() -> Self {
        Self {
            command: "./node".to_string(),
            base_args: vec![
                "--chain".to_string(),
                "customspec.json".to_string(),
                "--validator".to_string(),
                "--ws-external".to_string(),
                "--rpc-external".to_string(),
                "--rpc-methods=Unsafe".to_string(),
                "--rpc-cors=all".to_string(),
                "--execution=NativeElseWasm".to_string(),
            ],
        }
    }
}

impl Default for BootstrapConfig {
    fn default() -> Self {
        Self {
            warmup_secs: 30,
            subkey_command: "./subkey".to_string(),
        }
    }
}

/// Errors loading or parsing the config file.
#[derive(Debug)]
pub enum ConfigError {
    Read {
        path: PathBuf,
        source: std::io::Error,
    },
    Parse {
        path: PathBuf,
        source: toml::de::Error,
    },
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConfigError::Read { path, source } => {
                write!(f, "failed to read config {}: {}", path.display(), source)
            }
            ConfigError::Parse { path, source } => {
                write!(f, "failed to parse config {}: {}", path.display(), source)
            }
        }
    }
}

impl std::error::Error for ConfigError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            ConfigError::Read { source, .. } => Some(source),
            ConfigError::Parse { source, .. } => Some(source),
        }
    }
}

/// Load the config file, falling back to defaults when it does not exist.
pub fn load(path: &Path) -> Result<MinewatchConfig, ConfigError> {
    if !path.exists() {
        tracing::debug!(path = %path.display(), "no config file, using defaults");
        return Ok(MinewatchConfig::default());
    }
    let text = std::fs::read_to_string(path).map_err(|e| ConfigError::Read {
        path: path.to_path_buf(),
        source: e,
    })?;
    toml::from_str(&text).map_err(|e| ConfigError::Parse {
        path: path.to_path_buf(),
        source: e,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn defaults_match_reference_constants() {
        let config = MinewatchConfig::default();
        assert_eq!(config.watch.poll_interval_secs, 10);
        assert_eq!(config.watch.post_kill_delay_secs, 5);
        assert_eq!(config.watch.stall_threshold, 5);
        assert_eq!(config.watch.error_marker, "Client Error");
        assert_eq!(config.bootstrap.warmup_secs, 30);
        assert!(config.node.base_args.contains(&"--validator".to_string()));
    }

    #[test]
    fn missing_file_loads_defaults() {
        let dir = TempDir::new().unwrap();
        let config = load(&dir.path().join("absent.toml")).unwrap();
        assert_eq!(config.watch.stall_threshold, 5);
    }

    #[test]
    fn partial_file_overrides_only_named_keys() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("minewatch.toml");
        std::fs::write(
            &path,
            "[watch]\nstall_threshold = 8\nerror_marker = \"FATAL\"\n\n[bootstrap]\nsubkey_command = \"/usr/local/bin/subkey\"\n",
        )
        .unwrap();

        let config = load(&path).unwrap();
        assert_eq!(config.watch.stall_threshold, 8);
        assert_eq!(config.watch.error_marker, "FATAL");
        // Unnamed keys keep their defaults.
        assert_eq!(config.watch.poll_interval_secs, 10);
        assert_eq!(config.bootstrap.subkey_command, "/usr/local/bin/subkey");
        assert_eq!(config.bootstrap.warmup_secs, 30);
    }

    #[test]
    fn malformed_toml_is_a_parse_error() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("broken.toml");
        std::fs::write(&path, "[watch\nstall_threshold = 8").unwrap();

        let err = load(&path).unwrap_err();
        assert!(matches!(err, ConfigError::Parse { .. }));
        assert!(err.to_string().contains("failed to parse config"));
    }
}
