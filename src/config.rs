use std::net::IpAddr;
use std::time::Duration;

use tracing::trace;

/// Default port of the management protocol endpoint
const DEFAULT_MGMT_PORT: u16 = 8728;

#[derive(Debug, Clone, serde::Deserialize)]
pub struct Config {
    pub devices: Vec<DeviceConfig>,

    /// Polling engine tuning (optional - defaults match production values)
    #[serde(default)]
    pub poll: PollConfig,
}

/// One monitored device.
///
/// A device without a `managed` section is ping-only: it is probed for
/// reachability but no management session is ever opened for it.
#[derive(Debug, Clone, serde::Deserialize)]
pub struct DeviceConfig {
    /// Stable identifier, also used as pub/sub topic suffix
    pub id: String,
    pub name: String,
    pub address: IpAddr,
    #[serde(default = "default_mgmt_port")]
    pub port: u16,
    /// Wrap the management session in TLS
    #[serde(default)]
    pub use_tls: bool,
    /// Device role, e.g. "router", "switch", "ap" (informational)
    pub role: Option<String>,
    /// Interface whose byte counters feed the traffic rates
    pub interface: Option<String>,
    /// Present only for fully managed devices
    pub managed: Option<ManagedConfig>,
}

impl DeviceConfig {
    /// Pool key for this device's management endpoint.
    pub fn endpoint(&self) -> (IpAddr, u16) {
        (self.address, self.port)
    }
}

/// Credentials for the management session.
#[derive(Debug, Clone, serde::Deserialize)]
pub struct ManagedConfig {
    pub username: String,
    pub password: String,
}

#[derive(Debug, Clone, serde::Deserialize)]
pub struct PollConfig {
    /// Seconds between poll cycles
    #[serde(default = "default_interval_secs")]
    pub interval_secs: u64,

    /// Devices polled concurrently within one chunk
    #[serde(default = "default_chunk_size")]
    pub chunk_size: usize,

    /// Liveness probe timeout (per attempt)
    #[serde(default = "default_probe_timeout_ms")]
    pub probe_timeout_ms: u64,

    /// Management session connect+login timeout
    #[serde(default = "default_connect_timeout_ms")]
    pub connect_timeout_ms: u64,
}

impl PollConfig {
    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.interval_secs)
    }

    pub fn probe_timeout(&self) -> Duration {
        Duration::from_millis(self.probe_timeout_ms)
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }
}

impl Default for PollConfig {
    fn default() -> Self {
        Self {
            interval_secs: default_interval_secs(),
            chunk_size: default_chunk_size(),
            probe_timeout_ms: default_probe_timeout_ms(),
            connect_timeout_ms: default_connect_timeout_ms(),
        }
    }
}

fn default_mgmt_port() -> u16 {
    DEFAULT_MGMT_PORT
}

fn default_interval_secs() -> u64 {
    30
}

fn default_chunk_size() -> usize {
    20
}

fn default_probe_timeout_ms() -> u64 {
    2000
}

fn default_connect_timeout_ms() -> u64 {
    5000
}

pub fn read_config_file(path: &str) -> anyhow::Result<Config> {
    let file_content = std::fs::read_to_string(path)?;
    serde_json::from_str(&file_content)
        .map_err(|_| anyhow::anyhow!("Invalid configuration file provided!"))
        .inspect(|config: &Config| trace!("loaded config: {config:?}"))
}
