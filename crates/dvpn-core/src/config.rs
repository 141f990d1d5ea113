//! WireGuard backend configuration (`<home>/wireguard.toml`).

use crate::error::{NodeError, NodeResult};
use crate::keys::WgKeyPair;
use crate::pool::AddressPool;
use ipnet::{Ipv4Net, Ipv6Net};
use serde::{Deserialize, Serialize};
use std::net::IpAddr;
use std::path::{Path, PathBuf};

/// File name of the backend configuration inside the node home.
pub const CONFIG_FILE_NAME: &str = "wireguard.toml";

/// Default WireGuard interface name.
pub const DEFAULT_INTERFACE: &str = "wg0";

/// Default WireGuard listen port.
pub const DEFAULT_LISTEN_PORT: u16 = 51820;

/// Directory `wg-quick` reads interface configurations from.
pub const DEFAULT_CONFIG_DIR: &str = "/etc/wireguard";

/// Linux IFNAMSIZ minus the trailing NUL.
const MAX_INTERFACE_LEN: usize = 15;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WireGuardConfig {
    /// Interface name handed to `wg` / `wg-quick`.
    #[serde(default = "default_interface")]
    pub interface: String,

    /// UDP listen port advertised in the service info.
    #[serde(default = "default_listen_port")]
    pub listen_port: u16,

    /// Base64 X25519 private key of the node.
    pub private_key: String,

    /// Interface IPv4 address (gateway for peers).
    #[serde(default = "default_ipv4_address")]
    pub ipv4_address: Ipv4Net,

    /// Interface IPv6 address (gateway for peers).
    #[serde(default = "default_ipv6_address")]
    pub ipv6_address: Ipv6Net,

    /// Uplink interface used for NAT in PostUp/PostDown rules.
    #[serde(default = "default_out_interface")]
    pub out_interface: String,

    /// Where the rendered `<interface>.conf` is installed.
    #[serde(default = "default_config_dir")]
    pub config_dir: PathBuf,
}

impl Default for WireGuardConfig {
    fn default() -> Self {
        Self {
            interface: default_interface(),
            listen_port: DEFAULT_LISTEN_PORT,
            private_key: String::new(),
            ipv4_address: default_ipv4_address(),
            ipv6_address: default_ipv6_address(),
            out_interface: default_out_interface(),
            config_dir: default_config_dir(),
        }
    }
}

impl WireGuardConfig {
    /// Default configuration with a freshly generated private key.
    pub fn generate() -> Self {
        Self {
            private_key: WgKeyPair::generate().private_key_base64(),
            ..Self::default()
        }
    }

    /// Load and validate the configuration from a TOML file.
    pub fn load(path: &Path) -> NodeResult<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            NodeError::config_with_source(format!("Failed to read {}", path.display()), e)
        })?;
        let config: Self = toml::from_str(&content).map_err(|e| {
            NodeError::config_with_source(format!("Failed to parse {}", path.display()), e)
        })?;
        config.validate()?;
        Ok(config)
    }

    /// Write the configuration as TOML.
    pub fn save(&self, path: &Path) -> NodeResult<()> {
        let content = toml::to_string_pretty(self)
            .map_err(|e| NodeError::config_with_source("Failed to serialize WireGuard config", e))?;
        std::fs::write(path, content)?;
        Ok(())
    }

    pub fn validate(&self) -> NodeResult<()> {
        if self.interface.is_empty()
            || self.interface.len() > MAX_INTERFACE_LEN
            || !self
                .interface
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-' || c == '.')
        {
            return Err(NodeError::config(format!(
                "Invalid interface name '{}'",
                self.interface
            )));
        }
        if self.listen_port == 0 {
            return Err(NodeError::config("listen_port must be non-zero"));
        }
        if self.out_interface.is_empty() {
            return Err(NodeError::config("out_interface must not be empty"));
        }
        self.keypair()?;
        Ok(())
    }

    /// Reject a peer pool that would hand out the interface's own addresses.
    pub fn check_pool(&self, pool: &AddressPool) -> NodeResult<()> {
        let gateways = [
            IpAddr::V4(self.ipv4_address.addr()),
            IpAddr::V6(self.ipv6_address.addr()),
        ];
        for gateway in gateways {
            if pool.covers(gateway) {
                return Err(NodeError::config(format!(
                    "Address pool includes interface {} address {}",
                    self.interface, gateway
                )));
            }
        }
        Ok(())
    }

    pub fn keypair(&self) -> NodeResult<WgKeyPair> {
        WgKeyPair::from_base64_private_key(&self.private_key)
    }

    /// Path of the installed `wg-quick` configuration.
    pub fn interface_config_path(&self) -> PathBuf {
        self.config_dir.join(format!("{}.conf", self.interface))
    }

    /// Render the `wg-quick` configuration file.
    pub fn render(&self) -> String {
        let out = &self.out_interface;
        format!(
            "[Interface]\n\
             Address = {v4}, {v6}\n\
             ListenPort = {port}\n\
             PrivateKey = {key}\n\
             PostUp = iptables -A FORWARD -i %i -j ACCEPT; iptables -A FORWARD -o %i -j ACCEPT; \
             iptables -t nat -A POSTROUTING -o {out} -j MASQUERADE; \
             ip6tables -A FORWARD -i %i -j ACCEPT; ip6tables -A FORWARD -o %i -j ACCEPT; \
             ip6tables -t nat -A POSTROUTING -o {out} -j MASQUERADE\n\
             PostDown = iptables -D FORWARD -i %i -j ACCEPT; iptables -D FORWARD -o %i -j ACCEPT; \
             iptables -t nat -D POSTROUTING -o {out} -j MASQUERADE; \
             ip6tables -D FORWARD -i %i -j ACCEPT; ip6tables -D FORWARD -o %i -j ACCEPT; \
             ip6tables -t nat -D POSTROUTING -o {out} -j MASQUERADE\n",
            v4 = self.ipv4_address,
            v6 = self.ipv6_address,
            port = self.listen_port,
            key = self.private_key,
            out = out,
        )
    }
}

// Default value functions for serde
fn default_interface() -> String {
    DEFAULT_INTERFACE.to_string()
}

fn default_listen_port() -> u16 {
    DEFAULT_LISTEN_PORT
}

fn default_ipv4_address() -> Ipv4Net {
    Ipv4Net::new_assert(std::net::Ipv4Addr::new(10, 8, 0, 1), 24)
}

fn default_ipv6_address() -> Ipv6Net {
    Ipv6Net::new_assert(
        std::net::Ipv6Addr::new(0xfd86, 0xea04, 0x1115, 0, 0, 0, 0, 1),
        120,
    )
}

fn default_out_interface() -> String {
    "eth0".to_string()
}

fn default_config_dir() -> PathBuf {
    PathBuf::from(DEFAULT_CONFIG_DIR)
}
