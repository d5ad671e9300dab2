use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{bail, Context, Result};
use serde::{Deserialize, Serialize};

/// Main node configuration, loaded from a single YAML file.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    pub identity: IdentityConfig,
    pub tl_bus: TlBusConfig,
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub connections: ConnectionsConfig,
    #[serde(default)]
    pub intelligence: IntelligenceConfig,
    #[serde(default)]
    pub recommendation: RecommendationConfig,
    #[serde(default)]
    pub file_share: FileShareConfig,
    #[serde(default)]
    pub organisations: OrgConfig,
    #[serde(default)]
    pub peer_discovery: PeerDiscoveryConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct IdentityConfig {
    /// Generate a fresh keypair at startup. Mutually exclusive with
    /// `load_key_from_file`.
    #[serde(default)]
    pub generate_new_key: bool,
    #[serde(default)]
    pub load_key_from_file: Option<PathBuf>,
    #[serde(default)]
    pub save_key_to_file: Option<PathBuf>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TlBusConfig {
    pub host: String,
    #[serde(default = "default_tl_port")]
    pub port: u16,
    /// Channel the TL publishes on; everything the node emits carries
    /// the `nl2tl` type prefix instead.
    pub tl2nl_channel: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Overlay listen port. 0 means scan `[9000..11000)` for a free
    /// one.
    #[serde(default)]
    pub port: u16,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConnectionsConfig {
    #[serde(default = "default_conn_low")]
    pub low: usize,
    #[serde(default = "default_conn_medium")]
    pub medium: usize,
    #[serde(default = "default_conn_high")]
    pub high: usize,
    #[serde(default = "default_reconnect_interval", with = "humantime_serde")]
    pub reconnect_interval: Duration,
}

impl Default for ConnectionsConfig {
    fn default() -> Self {
        ConnectionsConfig {
            low: default_conn_low(),
            medium: default_conn_medium(),
            high: default_conn_high(),
            reconnect_interval: default_reconnect_interval(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IntelligenceConfig {
    #[serde(default = "default_ttl")]
    pub max_ttl: u32,
    #[serde(default = "default_ttl")]
    pub ttl: u32,
    #[serde(default = "default_proto_timeout", with = "humantime_serde")]
    pub root_timeout: Duration,
    #[serde(default = "default_proto_timeout", with = "humantime_serde")]
    pub max_parent_timeout: Duration,
}

impl Default for IntelligenceConfig {
    fn default() -> Self {
        IntelligenceConfig {
            max_ttl: default_ttl(),
            ttl: default_ttl(),
            root_timeout: default_proto_timeout(),
            max_parent_timeout: default_proto_timeout(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RecommendationConfig {
    #[serde(default = "default_proto_timeout", with = "humantime_serde")]
    pub timeout: Duration,
}

impl Default for RecommendationConfig {
    fn default() -> Self {
        RecommendationConfig {
            timeout: default_proto_timeout(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FileShareConfig {
    #[serde(default = "default_download_dir")]
    pub download_dir: PathBuf,
    /// Per-severity spread overrides keyed by severity name.
    #[serde(default)]
    pub spread: HashMap<String, SpreadStrategyConfig>,
}

impl Default for FileShareConfig {
    fn default() -> Self {
        FileShareConfig {
            download_dir: default_download_dir(),
            spread: HashMap::new(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SpreadStrategyConfig {
    pub peers: usize,
    #[serde(with = "humantime_serde")]
    pub every: Duration,
    #[serde(with = "humantime_serde")]
    pub until: Duration,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct OrgConfig {
    /// Organisations whose endorsements we accept, hex ids.
    #[serde(default)]
    pub trustworthy: Vec<String>,
    /// Endorsements of our own key, presented to peers on request.
    #[serde(default)]
    pub signatures: Vec<OrgSignatureConfig>,
    #[serde(default = "default_dht_update_period", with = "humantime_serde")]
    pub dht_update_period: Duration,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrgSignatureConfig {
    pub id: String,
    pub signature: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PeerDiscoveryConfig {
    /// Connection strings `"<address> <peer-id>"` used for the first
    /// contact with the overlay.
    #[serde(default)]
    pub bootstrap: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    #[serde(default = "default_log_level")]
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        LoggingConfig {
            level: default_log_level(),
        }
    }
}

fn default_tl_port() -> u16 {
    6379
}

fn default_conn_low() -> usize {
    15
}

fn default_conn_medium() -> usize {
    30
}

fn default_conn_high() -> usize {
    50
}

fn default_reconnect_interval() -> Duration {
    Duration::from_secs(10 * 60)
}

fn default_ttl() -> u32 {
    5
}

fn default_proto_timeout() -> Duration {
    Duration::from_secs(10)
}

fn default_download_dir() -> PathBuf {
    PathBuf::from("/tmp")
}

fn default_dht_update_period() -> Duration {
    Duration::from_secs(5 * 60)
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Config {
    /// Load configuration from a YAML file.
    pub fn load(path: &Path) -> Result<Self> {
        let contents = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read configuration file {}", path.display()))?;
        let config: Config =
            serde_yaml::from_str(&contents).context("failed to parse configuration file")?;
        Ok(config)
    }

    /// Default location when no `--conf` flag is given.
    pub fn default_path() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("vigilnode")
            .join("config.yaml")
    }

    /// Structural validation, run before anything is built.
    pub fn check(&self) -> Result<()> {
        if self.identity.generate_new_key && self.identity.load_key_from_file.is_some() {
            bail!("cannot generate a new key and load one from file at the same time");
        }
        if !self.identity.generate_new_key && self.identity.load_key_from_file.is_none() {
            bail!("specify either to generate a new key or load one from a file");
        }
        if self.tl_bus.host.is_empty() {
            bail!("tl_bus.host must be set");
        }
        if self.tl_bus.tl2nl_channel.is_empty() {
            bail!("tl_bus.tl2nl_channel must be set");
        }
        if self.connections.low > self.connections.medium
            || self.connections.medium > self.connections.high
        {
            bail!("connections band must satisfy low <= medium <= high");
        }
        Ok(())
    }
}

mod humantime_serde {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(&humantime::format_duration(*duration).to_string())
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        humantime::parse_duration(&s).map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn minimal_yaml() -> &'static str {
        r#"
identity:
  generate_new_key: true
tl_bus:
  host: 127.0.0.1
  tl2nl_channel: tl2nl
"#
    }

    #[test]
    fn test_minimal_config_gets_defaults() {
        let config: Config = serde_yaml::from_str(minimal_yaml()).unwrap();
        config.check().unwrap();

        assert_eq!(config.connections.low, 15);
        assert_eq!(config.connections.medium, 30);
        assert_eq!(config.connections.high, 50);
        assert_eq!(config.connections.reconnect_interval, Duration::from_secs(600));
        assert_eq!(config.intelligence.ttl, 5);
        assert_eq!(config.intelligence.root_timeout, Duration::from_secs(10));
        assert_eq!(config.file_share.download_dir, PathBuf::from("/tmp"));
        assert_eq!(
            config.organisations.dht_update_period,
            Duration::from_secs(300)
        );
        assert_eq!(config.server.port, 0);
        assert_eq!(config.logging.level, "info");
    }

    #[test]
    fn test_identity_xor_enforced() {
        let both = r#"
identity:
  generate_new_key: true
  load_key_from_file: /tmp/key
tl_bus:
  host: 127.0.0.1
  tl2nl_channel: tl2nl
"#;
        let config: Config = serde_yaml::from_str(both).unwrap();
        assert!(config.check().is_err());

        let neither = r#"
identity: {}
tl_bus:
  host: 127.0.0.1
  tl2nl_channel: tl2nl
"#;
        let config: Config = serde_yaml::from_str(neither).unwrap();
        assert!(config.check().is_err());
    }

    #[test]
    fn test_durations_and_spread_overrides() {
        let yaml = r#"
identity:
  generate_new_key: true
tl_bus:
  host: 127.0.0.1
  tl2nl_channel: tl2nl
connections:
  low: 2
  medium: 4
  high: 8
  reconnect_interval: 1m
file_share:
  download_dir: /var/cache/vigil
  spread:
    CRITICAL:
      peers: 20
      every: 30s
      until: 10m
"#;
        let config: Config = serde_yaml::from_str(yaml).unwrap();
        config.check().unwrap();

        assert_eq!(config.connections.reconnect_interval, Duration::from_secs(60));
        let critical = &config.file_share.spread["CRITICAL"];
        assert_eq!(critical.peers, 20);
        assert_eq!(critical.every, Duration::from_secs(30));
        assert_eq!(critical.until, Duration::from_secs(600));
    }

    #[test]
    fn test_band_ordering_enforced() {
        let yaml = r#"
identity:
  generate_new_key: true
tl_bus:
  host: 127.0.0.1
  tl2nl_channel: tl2nl
connections:
  low: 10
  medium: 5
  high: 50
"#;
        let config: Config = serde_yaml::from_str(yaml).unwrap();
        assert!(config.check().is_err());
    }
}
