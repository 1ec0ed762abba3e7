//! configuration of the mirrored zones

use std::net::{IpAddr, SocketAddr};
use std::str::FromStr;

use serde::Deserialize;

use crate::dns::logging::{self, LoggerConfig};
use crate::dns::names::Fallthrough;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConfigError {
    NoZones,
    InvalidZone(String),
    InvalidUpstream(String),
    MissingUpstream,
    InvalidInterval,
    Syntax(String),
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConfigError::NoZones => write!(f, "no zones configured"),
            ConfigError::InvalidZone(zone) => write!(f, "invalid zone '{}'", zone),
            ConfigError::InvalidUpstream(addr) => write!(f, "invalid upstream '{}'", addr),
            ConfigError::MissingUpstream => {
                write!(f, "upstream addresses configured but no resolver supplied")
            }
            ConfigError::InvalidInterval => write!(f, "refresh interval must be positive"),
            ConfigError::Syntax(e) => write!(f, "invalid configuration: {}", e),
        }
    }
}

impl std::error::Error for ConfigError {}

type Result<T> = std::result::Result<T, ConfigError>;

pub const DEFAULT_REFRESH_INTERVAL_SECS: u64 = 60;

const DEFAULT_UPSTREAM_PORT: u16 = 53;

/// One managed zone to mirror
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct ZoneBinding {
    pub project: String,
    pub managed_zone: String,
    /// Expected apex name; the value reported by the API is authoritative
    #[serde(default)]
    pub apex: Option<String>,
}

impl ZoneBinding {
    pub fn new(project: &str, managed_zone: &str) -> ZoneBinding {
        ZoneBinding {
            project: project.to_string(),
            managed_zone: managed_zone.to_string(),
            apex: None,
        }
    }

    pub fn with_apex(mut self, apex: &str) -> ZoneBinding {
        self.apex = Some(apex.to_string());
        self
    }
}

impl FromStr for ZoneBinding {
    type Err = ConfigError;

    /// Parses the `project:managed_zone` form
    fn from_str(s: &str) -> Result<ZoneBinding> {
        let mut parts = s.splitn(2, ':');
        let project = parts.next().unwrap_or_default();
        let managed_zone = parts.next().unwrap_or_default();

        if project.is_empty() || managed_zone.is_empty() {
            return Err(ConfigError::InvalidZone(s.to_string()));
        }

        Ok(ZoneBinding::new(project, managed_zone))
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct CloudDnsConfig {
    pub zones: Vec<ZoneBinding>,
    #[serde(default)]
    pub upstream: Vec<String>,
    #[serde(default)]
    pub fallthrough: Option<Vec<String>>,
    #[serde(default = "default_refresh_interval")]
    pub refresh_interval_secs: u64,
    /// Subscriber settings for hosts that call `init_logging`
    #[serde(default)]
    pub logging: LoggerConfig,
}

fn default_refresh_interval() -> u64 {
    DEFAULT_REFRESH_INTERVAL_SECS
}

impl CloudDnsConfig {
    pub fn new(zones: Vec<ZoneBinding>) -> CloudDnsConfig {
        CloudDnsConfig {
            zones,
            upstream: Vec::new(),
            fallthrough: None,
            refresh_interval_secs: DEFAULT_REFRESH_INTERVAL_SECS,
            logging: LoggerConfig::default(),
        }
    }

    pub fn from_toml_str(s: &str) -> Result<CloudDnsConfig> {
        let config: CloudDnsConfig =
            toml::from_str(s).map_err(|e| ConfigError::Syntax(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.zones.is_empty() {
            return Err(ConfigError::NoZones);
        }

        for binding in &self.zones {
            if binding.project.trim().is_empty() || binding.managed_zone.trim().is_empty() {
                return Err(ConfigError::InvalidZone(format!(
                    "{}:{}",
                    binding.project, binding.managed_zone
                )));
            }
        }

        self.upstream_addrs()?;

        if self.refresh_interval_secs == 0 {
            return Err(ConfigError::InvalidInterval);
        }

        Ok(())
    }

    /// Upstream resolvers as socket addresses, defaulting to port 53
    pub fn upstream_addrs(&self) -> Result<Vec<SocketAddr>> {
        self.upstream
            .iter()
            .map(|addr| parse_upstream(addr))
            .collect()
    }

    /// Install the subscriber described by the `[logging]` table
    ///
    /// Meant for hosts without a subscriber of their own, once after loading
    /// the configuration. Returns false if a subscriber was already installed.
    pub fn init_logging(&self) -> bool {
        logging::init_logging(&self.logging)
    }

    pub fn fallthrough(&self) -> Fallthrough {
        match self.fallthrough {
            Some(ref zones) => Fallthrough::from_zones(zones),
            None => Fallthrough::none(),
        }
    }
}

fn parse_upstream(addr: &str) -> Result<SocketAddr> {
    let addr = addr.trim();

    if let Ok(sock) = addr.parse::<SocketAddr>() {
        return Ok(sock);
    }

    addr.parse::<IpAddr>()
        .map(|ip| SocketAddr::new(ip, DEFAULT_UPSTREAM_PORT))
        .map_err(|_| ConfigError::InvalidUpstream(addr.to_string()))
}
