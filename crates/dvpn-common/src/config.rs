//! Node configuration file (`config.toml`).
//!
//! Layout:
//! - `[node]` ledger identity of the node and job intervals
//! - `[pool]` address ranges handed out to peers
//! - `[ledger]` query RPC and settlement endpoints
//!
//! Every field except `node.address` and the ledger endpoints has a
//! default. `validate()` checks ranges and formats and returns the resolved
//! values the daemon runs with.

use anyhow::{Context, Result};
use ipnet::{Ipv4Net, Ipv6Net};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// File name of the node configuration inside the node home.
pub const CONFIG_FILE_NAME: &str = "config.toml";

/// Default node home directory name under `$HOME`.
pub const DEFAULT_HOME_DIR: &str = ".dvpn-node";

pub const DEFAULT_INTERVAL_STATUS_SECS: u64 = 60;
pub const DEFAULT_INTERVAL_SESSIONS_SECS: u64 = 120;
pub const DEFAULT_SERVICE_TYPE: &str = "wireguard";
pub const DEFAULT_POOL_IPV4: &str = "10.8.0.2/24";
pub const DEFAULT_POOL_IPV6: &str = "fd86:ea04:1115::2/120";
pub const DEFAULT_TIMEOUT_SECS: u64 = 15;

const INTERVAL_RANGE_SECS: std::ops::RangeInclusive<u64> = 5..=3600;

// ============================================================================
// Configuration Structures
// ============================================================================

/// `[node]` section.
#[derive(Serialize, Deserialize, Default, Clone, Debug)]
pub struct NodeSection {
    /// Ledger address of this node (required).
    #[serde(default)]
    pub address: String,
    /// Account paying the node's fees.
    pub operator: Option<String>,
    /// Status heartbeat interval in seconds (5-3600, default: 60)
    pub interval_status_secs: Option<u64>,
    /// Usage reconciliation interval in seconds (5-3600, default: 120)
    pub interval_sessions_secs: Option<u64>,
    /// Tunnel backend (default: "wireguard")
    pub service_type: Option<String>,
}

/// `[pool]` section.
///
/// The address part of each CIDR is the first address handed out.
#[derive(Serialize, Deserialize, Default, Clone, Debug)]
pub struct PoolSection {
    pub ipv4: Option<String>,
    pub ipv6: Option<String>,
}

/// `[ledger]` section.
#[derive(Serialize, Deserialize, Default, Clone, Debug)]
pub struct LedgerSection {
    /// Tendermint RPC endpoint used for ABCI queries.
    #[serde(default)]
    pub rpc_url: String,
    /// HTTP endpoint accepting status and usage reports.
    #[serde(default)]
    pub settlement_url: String,
    /// Request timeout in seconds (default: 15)
    pub timeout_secs: Option<u64>,
}

#[derive(Serialize, Deserialize, Default, Clone, Debug)]
pub struct NodeConfig {
    #[serde(default)]
    pub node: NodeSection,
    #[serde(default)]
    pub pool: PoolSection,
    #[serde(default)]
    pub ledger: LedgerSection,
}

/// Validated configuration with defaults applied.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ResolvedConfig {
    pub address: String,
    pub operator: Option<String>,
    pub interval_status: Duration,
    pub interval_sessions: Duration,
    pub service_type: String,
    pub pool_ipv4: Ipv4Net,
    pub pool_ipv6: Ipv6Net,
    pub rpc_url: String,
    pub settlement_url: String,
    pub timeout: Duration,
}

// ============================================================================
// Validation
// ============================================================================

fn validate_interval(value: Option<u64>, default: u64, key: &str) -> Result<Duration> {
    let secs = value.unwrap_or(default);
    if !INTERVAL_RANGE_SECS.contains(&secs) {
        anyhow::bail!(
            "[node] '{}' must be between {} and {} seconds, got {}",
            key,
            INTERVAL_RANGE_SECS.start(),
            INTERVAL_RANGE_SECS.end(),
            secs
        );
    }
    Ok(Duration::from_secs(secs))
}

fn validate_http_url(value: &str, key: &str) -> Result<String> {
    if value.is_empty() {
        anyhow::bail!("[ledger] '{}' is required", key);
    }
    let url = url::Url::parse(value)
        .with_context(|| format!("[ledger] Invalid {} '{}'", key, value))?;
    if url.scheme() != "http" && url.scheme() != "https" {
        anyhow::bail!(
            "[ledger] {} '{}' must use http or https, got '{}'",
            key,
            value,
            url.scheme()
        );
    }
    if url.host_str().is_none() {
        anyhow::bail!("[ledger] {} '{}' missing host", key, value);
    }
    Ok(value.trim_end_matches('/').to_string())
}

impl NodeConfig {
    /// Default configuration for a node registered as `address`.
    pub fn new(address: &str) -> Self {
        Self {
            node: NodeSection {
                address: address.to_string(),
                operator: None,
                interval_status_secs: Some(DEFAULT_INTERVAL_STATUS_SECS),
                interval_sessions_secs: Some(DEFAULT_INTERVAL_SESSIONS_SECS),
                service_type: Some(DEFAULT_SERVICE_TYPE.to_string()),
            },
            pool: PoolSection {
                ipv4: Some(DEFAULT_POOL_IPV4.to_string()),
                ipv6: Some(DEFAULT_POOL_IPV6.to_string()),
            },
            ledger: LedgerSection {
                rpc_url: "http://127.0.0.1:26657".to_string(),
                settlement_url: "http://127.0.0.1:8080".to_string(),
                timeout_secs: Some(DEFAULT_TIMEOUT_SECS),
            },
        }
    }

    /// Check every section and return the values the node runs with.
    pub fn validate(&self) -> Result<ResolvedConfig> {
        let address = self.node.address.trim();
        if address.is_empty() {
            anyhow::bail!("[node] 'address' is required. Add: address = \"<node address>\"");
        }
        let operator = match self.node.operator.as_deref().map(str::trim) {
            Some("") => anyhow::bail!("[node] 'operator' must not be empty when set"),
            other => other.map(str::to_string),
        };

        let interval_status = validate_interval(
            self.node.interval_status_secs,
            DEFAULT_INTERVAL_STATUS_SECS,
            "interval_status_secs",
        )?;
        let interval_sessions = validate_interval(
            self.node.interval_sessions_secs,
            DEFAULT_INTERVAL_SESSIONS_SECS,
            "interval_sessions_secs",
        )?;

        let service_type = self
            .node
            .service_type
            .as_deref()
            .unwrap_or(DEFAULT_SERVICE_TYPE)
            .to_ascii_lowercase();
        if service_type != DEFAULT_SERVICE_TYPE {
            anyhow::bail!(
                "[node] Unsupported 'service_type' \"{}\". Supported: \"{}\"",
                service_type,
                DEFAULT_SERVICE_TYPE
            );
        }

        let ipv4 = self.pool.ipv4.as_deref().unwrap_or(DEFAULT_POOL_IPV4);
        let pool_ipv4: Ipv4Net = ipv4
            .parse()
            .with_context(|| format!("[pool] Invalid 'ipv4' CIDR '{}'", ipv4))?;
        let ipv6 = self.pool.ipv6.as_deref().unwrap_or(DEFAULT_POOL_IPV6);
        let pool_ipv6: Ipv6Net = ipv6
            .parse()
            .with_context(|| format!("[pool] Invalid 'ipv6' CIDR '{}'", ipv6))?;

        let rpc_url = validate_http_url(&self.ledger.rpc_url, "rpc_url")?;
        let settlement_url = validate_http_url(&self.ledger.settlement_url, "settlement_url")?;
        let timeout_secs = self.ledger.timeout_secs.unwrap_or(DEFAULT_TIMEOUT_SECS);
        if timeout_secs == 0 {
            anyhow::bail!("[ledger] 'timeout_secs' must be greater than zero");
        }

        Ok(ResolvedConfig {
            address: address.to_string(),
            operator,
            interval_status,
            interval_sessions,
            service_type,
            pool_ipv4,
            pool_ipv6,
            rpc_url,
            settlement_url,
            timeout: Duration::from_secs(timeout_secs),
        })
    }

    /// Write the configuration as TOML, refusing to overwrite unless `force`.
    pub fn save(&self, path: &Path, force: bool) -> Result<()> {
        if path.exists() && !force {
            anyhow::bail!(
                "File already exists: {}. Use --force to overwrite.",
                path.display()
            );
        }
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).context("Failed to create parent directory")?;
        }
        let content = toml::to_string_pretty(self).context("Failed to serialize config")?;
        std::fs::write(path, content)
            .with_context(|| format!("Failed to write config file: {}", path.display()))?;
        log::info!("Config saved to: {}", path.display());
        Ok(())
    }
}

// ============================================================================
// Path Expansion
// ============================================================================

/// Expand tilde (~) in paths to the user's home directory.
pub fn expand_tilde(path: &Path) -> PathBuf {
    let path_str = path.to_string_lossy();
    if let Some(stripped) = path_str.strip_prefix("~/") {
        if let Some(home) = dirs::home_dir() {
            return home.join(stripped);
        }
    } else if path_str == "~" {
        if let Some(home) = dirs::home_dir() {
            return home;
        }
    }
    path.to_path_buf()
}

// ============================================================================
// Config Loading
// ============================================================================

/// Resolve the default node home (~/.dvpn-node).
pub fn default_home() -> Option<PathBuf> {
    dirs::home_dir().map(|home| home.join(DEFAULT_HOME_DIR))
}

/// Resolve the node home from an explicit path, or the default location.
pub fn resolve_home(path: Option<&Path>) -> Result<PathBuf> {
    match path {
        Some(p) => Ok(expand_tilde(p)),
        None => default_home().ok_or_else(|| {
            anyhow::anyhow!("Could not find home directory. Use --home to specify one.")
        }),
    }
}

/// Load node configuration from a TOML file.
pub fn load_node_config(path: &Path) -> Result<NodeConfig> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;
    toml::from_str(&content)
        .with_context(|| format!("Failed to parse config file: {}", path.display()))
}

#[cfg(test)]
mod tests {
    use super::*;

    const MINIMAL: &str = r#"
[node]
address = "sentnode1local"

[ledger]
rpc_url = "http://127.0.0.1:26657/"
settlement_url = "https://settle.example/api"
"#;

    fn parse(content: &str) -> NodeConfig {
        toml::from_str(content).unwrap()
    }

    #[test]
    fn test_minimal_config_uses_defaults() {
        let resolved = parse(MINIMAL).validate().unwrap();
        assert_eq!(resolved.address, "sentnode1local");
        assert_eq!(resolved.operator, None);
        assert_eq!(resolved.interval_status, Duration::from_secs(60));
        assert_eq!(resolved.interval_sessions, Duration::from_secs(120));
        assert_eq!(resolved.service_type, "wireguard");
        assert_eq!(resolved.pool_ipv4.to_string(), "10.8.0.2/24");
        assert_eq!(resolved.pool_ipv6.to_string(), "fd86:ea04:1115::2/120");
        assert_eq!(resolved.rpc_url, "http://127.0.0.1:26657");
        assert_eq!(resolved.timeout, Duration::from_secs(15));
    }

    #[test]
    fn test_missing_address_names_section() {
        let mut config = parse(MINIMAL);
        config.node.address = String::new();
        let err = config.validate().unwrap_err().to_string();
        assert!(err.contains("[node]"));
        assert!(err.contains("address"));
    }

    #[test]
    fn test_interval_range() {
        let mut config = parse(MINIMAL);
        config.node.interval_sessions_secs = Some(4);
        let err = config.validate().unwrap_err().to_string();
        assert!(err.contains("interval_sessions_secs"));

        config.node.interval_sessions_secs = Some(3600);
        config.node.interval_status_secs = Some(5);
        config.validate().unwrap();
    }

    #[test]
    fn test_invalid_pool_and_urls() {
        let mut config = parse(MINIMAL);
        config.pool.ipv4 = Some("10.8.0.300/24".to_string());
        assert!(format!("{:#}", config.validate().unwrap_err()).contains("[pool]"));

        let mut config = parse(MINIMAL);
        config.ledger.settlement_url = "ftp://settle.example".to_string();
        assert!(config.validate().unwrap_err().to_string().contains("settlement_url"));

        let mut config = parse(MINIMAL);
        config.ledger.rpc_url = String::new();
        assert!(config.validate().unwrap_err().to_string().contains("rpc_url"));
    }

    #[test]
    fn test_unsupported_service_type() {
        let mut config = parse(MINIMAL);
        config.node.service_type = Some("OpenVPN".to_string());
        assert!(config.validate().is_err());

        config.node.service_type = Some("WireGuard".to_string());
        assert_eq!(config.validate().unwrap().service_type, "wireguard");
    }

    #[test]
    fn test_save_and_load() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("home").join(CONFIG_FILE_NAME);

        let mut config = NodeConfig::new("sentnode1local");
        config.node.operator = Some("sent1operator".to_string());
        config.save(&path, false).unwrap();

        let loaded = load_node_config(&path).unwrap();
        let resolved = loaded.validate().unwrap();
        assert_eq!(resolved.operator.as_deref(), Some("sent1operator"));
        assert_eq!(resolved, config.validate().unwrap());

        assert!(config.save(&path, false).is_err());
        config.save(&path, true).unwrap();
    }

    #[test]
    fn test_load_missing_file() {
        let dir = tempfile::tempdir().unwrap();
        let err = load_node_config(&dir.path().join(CONFIG_FILE_NAME)).unwrap_err();
        assert!(err.to_string().contains("Failed to read config file"));
    }

    #[test]
    fn test_expand_tilde() {
        let plain = Path::new("/etc/dvpn");
        assert_eq!(expand_tilde(plain), PathBuf::from("/etc/dvpn"));
        if let Some(home) = dirs::home_dir() {
            assert_eq!(expand_tilde(Path::new("~/.dvpn-node")), home.join(".dvpn-node"));
        }
    }
}
