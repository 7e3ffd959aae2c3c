//! Traffic statistics and DDoS heuristics for the firewall control plane.
//!
//! Snapshots are recomputed from the request ledger and rule lists on every
//! call; nothing is cached between calls.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};

use crate::core::rule_store::RuleStore;
use crate::core::traffic_ledger::TrafficLedger;
use crate::core::{FirewallError, StatsConfig};
use crate::models::{IpCount, RuleCounts, StatsSnapshot, TrafficRecord};
use crate::utils::window_seconds;

/// Computes [`StatsSnapshot`]s over borrowed ledger and rule state
#[derive(Clone)]
pub struct StatsEngine {
    ledger: Arc<TrafficLedger>,
    rules: Arc<RuleStore>,
    config: StatsConfig,
}

impl StatsEngine {
    pub fn new(ledger: Arc<TrafficLedger>, rules: Arc<RuleStore>, config: StatsConfig) -> Self {
        Self {
            ledger,
            rules,
            config,
        }
    }

    pub fn config(&self) -> &StatsConfig {
        &self.config
    }

    pub async fn snapshot(&self) -> Result<StatsSnapshot, FirewallError> {
        self.snapshot_at(Utc::now()).await
    }

    pub async fn snapshot_at(&self, now: DateTime<Utc>) -> Result<StatsSnapshot, FirewallError> {
        let hourly = self
            .ledger
            .recent_at(window_seconds(self.config.hourly_window_seconds), now)
            .await?;
        let minute = self
            .ledger
            .recent_at(window_seconds(self.config.ddos_window_seconds), now)
            .await?;
        let counts = self.rules.counts().await?;
        Ok(compute_snapshot(&hourly, &minute, counts, &self.config))
    }
}

/// Per-address request counts, in first-seen order.
pub fn count_by_ip(records: &[TrafficRecord]) -> Vec<IpCount> {
    let mut index: HashMap<&str, usize> = HashMap::new();
    let mut counts: Vec<IpCount> = Vec::new();
    for record in records {
        match index.get(record.client_ip.as_str()) {
            Some(&i) => counts[i].count += 1,
            None => {
                index.insert(&record.client_ip, counts.len());
                counts.push(IpCount {
                    ip: record.client_ip.clone(),
                    count: 1,
                });
            }
        }
    }
    counts
}

/// Build a snapshot from already-windowed inputs.
///
/// `hourly` feeds the totals and top talkers, `minute` feeds DDoS alerts.
/// An address is flagged once it exceeds `ddos_threshold` requests in the
/// short window. Top talkers tie-break on first-seen order.
pub fn compute_snapshot(
    hourly: &[TrafficRecord],
    minute: &[TrafficRecord],
    counts: RuleCounts,
    config: &StatsConfig,
) -> StatsSnapshot {
    let total_requests = hourly.len();
    let blocked_requests = hourly.iter().filter(|r| r.is_blocked()).count();

    let ddos_alerts = count_by_ip(minute)
        .into_iter()
        .filter(|c| c.count > config.ddos_threshold)
        .collect();

    let mut top_ips = count_by_ip(hourly);
    top_ips.sort_by(|a, b| b.count.cmp(&a.count));
    top_ips.truncate(config.top_ips_limit);

    StatsSnapshot {
        total_requests,
        allowed_requests: total_requests - blocked_requests,
        blocked_requests,
        ddos_alerts,
        top_ips,
        blocked_ips_count: counts.blocked_ip,
        allowed_ips_count: counts.allowed_ip,
        blocked_macs_count: counts.blocked_mac,
    }
}
