//! Monitoring for the firewall control plane.
//!
//! This module runs the periodic pass that publishes statistics gauges, warns
//! about DDoS alerts and applies the request ledger retention policy.

use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use chrono::Utc;
use log::{error, info, warn};
use metrics::gauge;
use tokio::time;

use crate::core::stats_engine::StatsEngine;
use crate::core::traffic_ledger::TrafficLedger;
use crate::models::{LedgerConfig, MonitoringConfig};
use crate::utils::window_seconds;

/// Outcome of one monitoring pass
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MonitoringReport {
    pub ddos_alerts: usize,
    pub compacted: usize,
}

/// Monitoring service
pub struct Monitoring {
    stats: StatsEngine,
    ledger: Arc<TrafficLedger>,
    config: MonitoringConfig,
    ledger_config: LedgerConfig,
}

impl Monitoring {
    pub fn new(
        stats: StatsEngine,
        ledger: Arc<TrafficLedger>,
        config: MonitoringConfig,
        ledger_config: LedgerConfig,
    ) -> Self {
        Self {
            stats,
            ledger,
            config,
            ledger_config,
        }
    }

    /// Start monitoring; runs until the task is dropped.
    pub async fn start_monitoring(&self) {
        info!("Starting monitoring service...");
        let mut interval = time::interval(Duration::from_secs(self.config.interval_seconds.max(1) as u64));

        loop {
            interval.tick().await;
            if let Err(e) = self.run_once().await {
                error!("monitoring pass failed: {:#}", e);
            }
        }
    }

    pub async fn run_once(&self) -> Result<MonitoringReport> {
        let snapshot = self.stats.snapshot().await?;

        gauge!("firewall_ddos_alerts", snapshot.ddos_alerts.len() as f64);
        gauge!("firewall_requests_last_hour", snapshot.total_requests as f64);
        for alert in &snapshot.ddos_alerts {
            warn!(
                "possible DDoS from {}: {} requests in the last {}s",
                alert.ip,
                alert.count,
                self.stats.config().ddos_window_seconds
            );
        }

        let compacted = match self.ledger_config.retention_hours {
            0 => 0,
            hours => {
                self.ledger
                    .compact(window_seconds(hours.saturating_mul(3600)), Utc::now())
                    .await?
            }
        };

        Ok(MonitoringReport {
            ddos_alerts: snapshot.ddos_alerts.len(),
            compacted,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::filter_adapter::NoopAdapter;
    use crate::core::rule_store::RuleStore;
    use crate::core::StatsConfig;
    use crate::models::TrafficRecord;

    async fn setup(retention_hours: u64) -> (tempfile::TempDir, Arc<TrafficLedger>, Monitoring) {
        let dir = tempfile::tempdir().unwrap();
        let rules = Arc::new(RuleStore::open(dir.path().join("data"), Arc::new(NoopAdapter)).await);
        let ledger = Arc::new(
            TrafficLedger::open(dir.path().join("logs/requests.jsonl"))
                .await
                .unwrap(),
        );
        let stats = StatsEngine::new(ledger.clone(), rules, StatsConfig::default());
        let monitoring = Monitoring::new(
            stats,
            ledger.clone(),
            MonitoringConfig {
                enabled: true,
                interval_seconds: 1,
            },
            LedgerConfig { retention_hours },
        );
        (dir, ledger, monitoring)
    }

    fn record(ip: &str, age: chrono::Duration) -> TrafficRecord {
        TrafficRecord {
            timestamp: (Utc::now() - age).to_rfc3339(),
            client_ip: ip.to_string(),
            method: "POST".to_string(),
            path: "/api/employees".to_string(),
            status: 201,
            blocked: false,
        }
    }

    #[tokio::test]
    async fn test_run_once_reports_alerts_and_compacts() {
        let (_dir, ledger, monitoring) = setup(24).await;
        for _ in 0..11 {
            ledger.append(&record("10.0.0.5", chrono::Duration::seconds(1))).await.unwrap();
        }
        ledger.append(&record("10.0.0.6", chrono::Duration::hours(48))).await.unwrap();

        let report = monitoring.run_once().await.unwrap();
        assert_eq!(report, MonitoringReport { ddos_alerts: 1, compacted: 1 });
    }

    #[tokio::test]
    async fn test_zero_retention_keeps_everything() {
        let (_dir, ledger, monitoring) = setup(0).await;
        ledger.append(&record("10.0.0.6", chrono::Duration::days(30))).await.unwrap();

        let report = monitoring.run_once().await.unwrap();
        assert_eq!(report.compacted, 0);
        let all = ledger.recent(chrono::Duration::days(365)).await.unwrap();
        assert_eq!(all.len(), 1);
    }

    #[tokio::test]
    async fn test_huge_retention_does_not_panic() {
        let (_dir, ledger, monitoring) = setup(u64::MAX).await;
        ledger.append(&record("10.0.0.6", chrono::Duration::days(30))).await.unwrap();

        let report = monitoring.run_once().await.unwrap();
        assert_eq!(report.compacted, 0);
    }
}
