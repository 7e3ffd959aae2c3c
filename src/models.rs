use std::fmt;
use std::path::PathBuf;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize};

use crate::core::StatsConfig;
use crate::utils::parse_timestamp;

/// Server configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Server host
    pub host: String,
    /// Server port
    pub port: u16,
}

/// Backing file locations
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    /// Directory holding the three rule list files
    pub data_dir: String,
    /// Directory holding the request ledger
    pub logs_dir: String,
}

impl StorageConfig {
    pub fn requests_log(&self) -> PathBuf {
        PathBuf::from(&self.logs_dir).join("requests.jsonl")
    }
}

/// Which packet-filter implementation receives rule directives
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FilterBackend {
    Iptables,
    Noop,
}

/// Packet filter configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FilterConfig {
    /// Adapter implementation
    pub backend: FilterBackend,
    /// Command used for IPv4 and MAC directives
    pub binary: String,
    /// Command used for IPv6 directives
    pub binary_v6: String,
    /// Upper bound for a single directive, in milliseconds
    pub timeout_ms: u64,
    /// Re-apply persisted lists at startup
    pub reconcile_on_start: bool,
}

/// Request ledger configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LedgerConfig {
    /// Records older than this are compacted away; 0 keeps everything
    pub retention_hours: u64,
}

/// Monitoring configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MonitoringConfig {
    /// Whether to run the background monitoring loop
    pub enabled: bool,
    /// Monitoring interval in seconds
    pub interval_seconds: u32,
}

/// Application configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    pub server: ServerConfig,
    pub storage: StorageConfig,
    pub filter: FilterConfig,
    pub stats: StatsConfig,
    pub ledger: LedgerConfig,
    pub monitoring: MonitoringConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            server: ServerConfig {
                host: "0.0.0.0".to_string(),
                port: 8080,
            },
            storage: StorageConfig {
                data_dir: "/app/data".to_string(),
                logs_dir: "/app/logs".to_string(),
            },
            filter: FilterConfig {
                backend: FilterBackend::Iptables,
                binary: "iptables".to_string(),
                binary_v6: "ip6tables".to_string(),
                timeout_ms: 2000,
                reconcile_on_start: true,
            },
            stats: StatsConfig::default(),
            ledger: LedgerConfig { retention_hours: 24 },
            monitoring: MonitoringConfig {
                enabled: true,
                interval_seconds: 60,
            },
        }
    }
}

/// The three address lists the control plane maintains.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Category {
    BlockedIp,
    AllowedIp,
    BlockedMac,
}

impl Category {
    pub const ALL: [Category; 3] = [Category::BlockedIp, Category::AllowedIp, Category::BlockedMac];

    pub fn as_str(&self) -> &'static str {
        match self {
            Category::BlockedIp => "blocked_ip",
            Category::AllowedIp => "allowed_ip",
            Category::BlockedMac => "blocked_mac",
        }
    }

    pub fn file_name(&self) -> &'static str {
        match self {
            Category::BlockedIp => "blocked_ips.txt",
            Category::AllowedIp => "allowed_ips.txt",
            Category::BlockedMac => "blocked_macs.txt",
        }
    }

    pub fn is_mac(&self) -> bool {
        matches!(self, Category::BlockedMac)
    }
}

impl fmt::Display for Category {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

fn unknown_ip() -> String {
    "unknown".to_string()
}

fn ok_status() -> u16 {
    200
}

// Writers may emit `null` for fields they did not observe; treat it like an
// absent field.
fn null_as_default<'de, D, T>(deserializer: D) -> Result<T, D::Error>
where
    D: Deserializer<'de>,
    T: Default + Deserialize<'de>,
{
    Ok(Option::<T>::deserialize(deserializer)?.unwrap_or_default())
}

fn null_as_unknown_ip<'de, D: Deserializer<'de>>(deserializer: D) -> Result<String, D::Error> {
    Ok(Option::<String>::deserialize(deserializer)?.unwrap_or_else(unknown_ip))
}

fn null_as_ok_status<'de, D: Deserializer<'de>>(deserializer: D) -> Result<u16, D::Error> {
    Ok(Option::<u16>::deserialize(deserializer)?.unwrap_or_else(ok_status))
}

/// One observed request, as written to the request ledger.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TrafficRecord {
    pub timestamp: String,
    #[serde(default = "unknown_ip", deserialize_with = "null_as_unknown_ip")]
    pub client_ip: String,
    #[serde(default, deserialize_with = "null_as_default")]
    pub method: String,
    #[serde(default, deserialize_with = "null_as_default")]
    pub path: String,
    #[serde(default = "ok_status", deserialize_with = "null_as_ok_status")]
    pub status: u16,
    #[serde(default, deserialize_with = "null_as_default")]
    pub blocked: bool,
}

impl TrafficRecord {
    pub fn parsed_timestamp(&self) -> Option<DateTime<Utc>> {
        parse_timestamp(&self.timestamp)
    }

    /// Whether the request counts as blocked in statistics.
    pub fn is_blocked(&self) -> bool {
        self.blocked || self.status >= 400
    }
}

/// Requests seen from a single address.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IpCount {
    pub ip: String,
    pub count: usize,
}

/// Rule list sizes.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RuleCounts {
    pub blocked_ip: usize,
    pub allowed_ip: usize,
    pub blocked_mac: usize,
}

/// Aggregate view over recent traffic and current rule lists.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatsSnapshot {
    pub total_requests: usize,
    pub allowed_requests: usize,
    pub blocked_requests: usize,
    pub ddos_alerts: Vec<IpCount>,
    pub top_ips: Vec<IpCount>,
    pub blocked_ips_count: usize,
    pub allowed_ips_count: usize,
    pub blocked_macs_count: usize,
}

/// All three rule lists, in display order.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RuleLists {
    pub blocked_ips: Vec<String>,
    pub allowed_ips: Vec<String>,
    pub blocked_macs: Vec<String>,
}
