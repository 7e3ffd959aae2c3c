//! Control surface for the firewall control plane.
//!
//! Each mutating call validates its input, delegates to the rule store and
//! answers with the outcome plus a fresh statistics snapshot.

use std::sync::Arc;

use log::warn;
use serde::{Deserialize, Serialize};

use crate::core::rule_store::{Mutation, RuleStore};
use crate::core::stats_engine::StatsEngine;
use crate::core::traffic_ledger::TrafficLedger;
use crate::core::{address, FirewallError};
use crate::models::{Category, RuleLists, StatsSnapshot, TrafficRecord};
use crate::utils::window_seconds;

/// Acknowledgment of a rule list mutation
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MutationReport {
    pub status: Mutation,
    pub category: Category,
    pub entry: String,
    /// Absent when statistics could not be computed after the change
    pub stats: Option<StatsSnapshot>,
}

pub struct FirewallControl {
    rules: Arc<RuleStore>,
    ledger: Arc<TrafficLedger>,
    stats: StatsEngine,
}

impl FirewallControl {
    pub fn new(rules: Arc<RuleStore>, ledger: Arc<TrafficLedger>, stats: StatsEngine) -> Self {
        Self {
            rules,
            ledger,
            stats,
        }
    }

    pub async fn get_stats(&self) -> Result<StatsSnapshot, FirewallError> {
        self.stats.snapshot().await
    }

    /// Ledger records from the last `minutes` (configured default when absent), newest first.
    pub async fn get_recent_logs(
        &self,
        minutes: Option<u64>,
    ) -> Result<Vec<TrafficRecord>, FirewallError> {
        let minutes = minutes.unwrap_or(self.stats.config().default_log_minutes);
        Ok(self.ledger.recent(window_seconds(minutes.saturating_mul(60))).await?)
    }

    /// Append a record on behalf of the request-logging collaborator.
    pub async fn record_request(&self, record: &TrafficRecord) -> Result<(), FirewallError> {
        Ok(self.ledger.append(record).await?)
    }

    pub async fn get_lists(&self) -> Result<RuleLists, FirewallError> {
        Ok(self.rules.all_lists().await?)
    }

    pub async fn block_ip(&self, ip: &str) -> Result<MutationReport, FirewallError> {
        self.add(Category::BlockedIp, ip).await
    }

    pub async fn unblock_ip(&self, ip: &str) -> Result<MutationReport, FirewallError> {
        self.remove(Category::BlockedIp, ip).await
    }

    pub async fn allow_ip(&self, ip: &str) -> Result<MutationReport, FirewallError> {
        self.add(Category::AllowedIp, ip).await
    }

    pub async fn disallow_ip(&self, ip: &str) -> Result<MutationReport, FirewallError> {
        self.remove(Category::AllowedIp, ip).await
    }

    pub async fn block_mac(&self, mac: &str) -> Result<MutationReport, FirewallError> {
        self.add(Category::BlockedMac, mac).await
    }

    pub async fn unblock_mac(&self, mac: &str) -> Result<MutationReport, FirewallError> {
        self.remove(Category::BlockedMac, mac).await
    }

    async fn add(&self, category: Category, raw: &str) -> Result<MutationReport, FirewallError> {
        let entry = address::normalize(category, raw)?;
        let status = self.rules.add(category, &entry).await?;
        Ok(self.report(status, category, entry).await)
    }

    async fn remove(&self, category: Category, raw: &str) -> Result<MutationReport, FirewallError> {
        let entry = address::normalize(category, raw)?;
        let status = self.rules.remove(category, &entry).await?;
        Ok(self.report(status, category, entry).await)
    }

    async fn report(&self, status: Mutation, category: Category, entry: String) -> MutationReport {
        let stats = match self.stats.snapshot().await {
            Ok(stats) => Some(stats),
            Err(e) => {
                warn!("statistics unavailable after {} change: {}", category, e);
                None
            }
        };
        MutationReport {
            status,
            category,
            entry,
            stats,
        }
    }
}
