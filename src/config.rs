use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
pub enum NetworkType {
    #[default]
    Mainnet,
    Testnet,
    Regtest,
}

impl NetworkType {
    pub fn default_port(&self) -> u16 {
        match self {
            NetworkType::Mainnet => 8333,
            NetworkType::Testnet => 18333,
            NetworkType::Regtest => 18444,
        }
    }

    pub fn magic_bytes(&self) -> u32 {
        match self {
            NetworkType::Mainnet => 0xD9B4_BEF9,
            NetworkType::Testnet => 0x0709_110B,
            NetworkType::Regtest => 0xDAB5_BFFA,
        }
    }
}

/// Everything the peer-discovery/transport substrate needs to start: where
/// to listen, who to bootstrap from, and which discovery sources are live.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct P2pConfig {
    pub listen_addr: SocketAddr,
    pub external_addr: Option<SocketAddr>,
    pub max_peers: usize,
    pub connection_timeout: Duration,
    pub bootstrap_seeds: Vec<SocketAddr>,
    pub tracker_addr: Option<SocketAddr>,
    pub enable_mdns: bool,
    pub enable_upnp: bool,
    pub enable_broadcast_discovery: bool,
    pub enable_port_scanner: bool,
}

impl Default for P2pConfig {
    fn default() -> Self {
        Self {
            listen_addr: "0.0.0.0:8333".parse().unwrap(),
            external_addr: None,
            max_peers: crate::autodiscovery::DEFAULT_MAX_PEERS,
            connection_timeout: Duration::from_secs(30),
            bootstrap_seeds: Vec::new(),
            tracker_addr: None,
            enable_mdns: true,
            enable_upnp: true,
            enable_broadcast_discovery: true,
            enable_port_scanner: false,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    pub level: String,
    pub file_path: Option<PathBuf>,
    pub max_files: usize,
    pub max_size_mb: usize,
    pub enable_console: bool,
    pub enable_file: bool,
    pub log_network: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            file_path: Some(PathBuf::from("logs/eastsea.log")),
            max_files: 7,
            max_size_mb: 100,
            enable_console: true,
            enable_file: true,
            log_network: true,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    pub network: NetworkType,
    pub data_dir: PathBuf,
    pub user_agent: String,
    pub p2p: P2pConfig,
    pub logging: LoggingConfig,
}

impl Default for Config {
    fn default() -> Self {
        let data_dir = dirs::data_dir()
            .unwrap_or_else(|| PathBuf::from("./data"))
            .join("eastsea");

        Self {
            network: NetworkType::Mainnet,
            data_dir,
            user_agent: "eastsea-node/0.1.0".to_string(),
            p2p: P2pConfig::default(),
            logging: LoggingConfig::default(),
        }
    }
}

impl Config {
    pub fn new(network: NetworkType, data_dir: Option<PathBuf>) -> Self {
        let mut config = Self {
            network,
            ..Self::default()
        };

        if let Some(dir) = data_dir {
            config.data_dir = dir;
        }

        config.p2p.listen_addr = format!("0.0.0.0:{}", config.network.default_port())
            .parse()
            .unwrap();

        config
    }

    pub fn from_file(path: &PathBuf) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|e| ConfigError::IoError(e.to_string()))?;
        let config: Config = toml::from_str(&content).map_err(|e| ConfigError::ParseError(e.to_string()))?;
        Ok(config)
    }

    pub fn to_file(&self, path: &PathBuf) -> Result<(), ConfigError> {
        let content = toml::to_string_pretty(self).map_err(|e| ConfigError::SerializeError(e.to_string()))?;
        std::fs::write(path, content).map_err(|e| ConfigError::IoError(e.to_string()))?;
        Ok(())
    }

    pub fn get_network_magic(&self) -> u32 {
        self.network.magic_bytes()
    }

    pub fn get_network_port(&self) -> u16 {
        self.network.default_port()
    }

    pub fn get_data_subdir(&self, subdir: &str) -> PathBuf {
        self.data_dir.join(subdir)
    }

    pub fn get_logs_dir(&self) -> PathBuf {
        self.get_data_subdir("logs")
    }

    pub fn get_config_file(&self) -> PathBuf {
        self.data_dir.join("config.toml")
    }

    pub fn get_peers_file(&self) -> PathBuf {
        self.data_dir.join("peers.json")
    }
}

#[derive(Debug)]
pub enum ConfigError {
    IoError(String),
    ParseError(String),
    SerializeError(String),
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConfigError::IoError(msg) => write!(f, "IO error: {msg}"),
            ConfigError::ParseError(msg) => write!(f, "parse error: {msg}"),
            ConfigError::SerializeError(msg) => write!(f, "serialize error: {msg}"),
        }
    }
}

impl std::error::Error for ConfigError {}

pub fn get_default_config_path(network: NetworkType) -> PathBuf {
    let base_dir = dirs::data_dir()
        .unwrap_or_else(|| PathBuf::from("./data"))
        .join("eastsea");

    match network {
        NetworkType::Mainnet => base_dir.join("config.toml"),
        NetworkType::Testnet => base_dir.join("testnet").join("config.toml"),
        NetworkType::Regtest => base_dir.join("regtest").join("config.toml"),
    }
}

pub fn create_default_config(network: NetworkType) -> Result<Config, ConfigError> {
    let config = Config::new(network, None);

    std::fs::create_dir_all(&config.data_dir).map_err(|e| ConfigError::IoError(e.to_string()))?;
    std::fs::create_dir_all(config.get_logs_dir()).map_err(|e| ConfigError::IoError(e.to_string()))?;

    let config_path = config.get_config_file();
    config.to_file(&config_path)?;

    Ok(config)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn default_config_uses_mainnet() {
        let config = Config::default();
        assert_eq!(config.network, NetworkType::Mainnet);
    }

    #[test]
    fn network_type_methods() {
        assert_eq!(NetworkType::Mainnet.default_port(), 8333);
        assert_eq!(NetworkType::Testnet.default_port(), 18333);
        assert_eq!(NetworkType::Regtest.default_port(), 18444);
        assert_eq!(NetworkType::Mainnet.magic_bytes(), 0xD9B4_BEF9);
    }

    #[test]
    fn config_roundtrips_through_toml() -> Result<(), ConfigError> {
        let temp_dir = tempdir().unwrap();
        let config_path = temp_dir.path().join("config.toml");

        let config = Config::default();
        config.to_file(&config_path)?;

        let loaded = Config::from_file(&config_path)?;
        assert_eq!(config.network, loaded.network);
        assert_eq!(config.p2p.max_peers, loaded.p2p.max_peers);

        Ok(())
    }

    #[test]
    fn new_sets_the_network_specific_listen_port() {
        let testnet_config = Config::new(NetworkType::Testnet, None);
        assert_eq!(testnet_config.p2p.listen_addr.port(), 18333);
    }
}
