//! Core functionality for the firewall control plane.
//!
//! This module contains the core components of the service: the rule store,
//! the packet-filter adapter, the request ledger, the statistics engine and
//! the control surface that ties them together.

pub mod address;
pub mod control;
pub mod filter_adapter;
pub mod monitoring;
pub mod rule_store;
pub mod stats_engine;
pub mod traffic_ledger;

use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StatsConfig {
    /// Requests per DDoS window above which an address raises an alert
    pub ddos_threshold: usize,
    pub ddos_window_seconds: u64,
    pub hourly_window_seconds: u64,
    pub top_ips_limit: usize,
    /// Window used by log queries that do not name one
    pub default_log_minutes: u64,
}

impl Default for StatsConfig {
    fn default() -> Self {
        Self {
            ddos_threshold: 10,
            ddos_window_seconds: 60,
            hourly_window_seconds: 3600,
            top_ips_limit: 5,
            default_log_minutes: 10,
        }
    }
}

/// Errors surfaced to callers of the control plane
#[derive(Error, Debug)]
pub enum FirewallError {
    #[error("invalid entry: {0}")]
    InvalidEntry(#[from] AddressError),
    #[error("invalid traffic record: {0}")]
    InvalidRecord(String),
    #[error("persistence failure: {0}")]
    PersistenceFailure(String),
    #[error("backing store unavailable: {0}")]
    Unavailable(String),
}

impl FirewallError {
    /// Stable name used in error payloads
    pub fn kind(&self) -> &'static str {
        match self {
            FirewallError::InvalidEntry(_) => "invalid_entry",
            FirewallError::InvalidRecord(_) => "invalid_record",
            FirewallError::PersistenceFailure(_) => "persistence_failure",
            FirewallError::Unavailable(_) => "unavailable",
        }
    }
}

impl From<RuleStoreError> for FirewallError {
    fn from(err: RuleStoreError) -> Self {
        match err {
            RuleStoreError::InvalidEntry(e) => FirewallError::InvalidEntry(e),
            e @ RuleStoreError::Persistence { .. } => FirewallError::PersistenceFailure(e.to_string()),
            e @ RuleStoreError::Unavailable { .. } => FirewallError::Unavailable(e.to_string()),
        }
    }
}

impl From<LedgerError> for FirewallError {
    fn from(err: LedgerError) -> Self {
        match err {
            LedgerError::InvalidTimestamp(ts) => {
                FirewallError::InvalidRecord(format!("unparseable timestamp {:?}", ts))
            }
            LedgerError::Serialization(e) => FirewallError::InvalidRecord(e.to_string()),
            e @ LedgerError::Io { .. } => FirewallError::Unavailable(e.to_string()),
        }
    }
}

pub use address::AddressError;
pub use control::{FirewallControl, MutationReport};
pub use filter_adapter::{build_adapter, FilterAdapter, FilterError, IptablesAdapter, NoopAdapter};
pub use monitoring::Monitoring;
pub use rule_store::{Mutation, RuleStore, RuleStoreError};
pub use stats_engine::StatsEngine;
pub use traffic_ledger::{LedgerError, TrafficLedger};
