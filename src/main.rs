//! Firewall control plane service
//!
//! This is the main entry point for the firewall control plane.
//! It opens the rule lists and request ledger, converges the packet filter
//! and starts the web server.

use std::sync::Arc;

use actix_web::{web, App, HttpServer};
use anyhow::Context;
use dotenv::dotenv;
use log::{info, warn};
use metrics_exporter_prometheus::PrometheusBuilder;

use firewall_control::api::{self, ApiState};
use firewall_control::config;
use firewall_control::core::{
    build_adapter, FirewallControl, Monitoring, RuleStore, StatsEngine, TrafficLedger,
};

#[actix_web::main]
async fn main() -> anyhow::Result<()> {
    // Load environment variables
    dotenv().ok();

    // Initialize logging
    env_logger::init();

    info!("Starting firewall control plane...");

    let config = config::load_config().context("Failed to load configuration")?;

    let metrics = match PrometheusBuilder::new().install_recorder() {
        Ok(handle) => Some(handle),
        Err(e) => {
            warn!("metrics recorder unavailable: {}", e);
            None
        }
    };

    let adapter = build_adapter(&config.filter);
    let rules = Arc::new(RuleStore::open(&config.storage.data_dir, adapter).await);
    if config.filter.reconcile_on_start {
        rules.reconcile().await;
    }

    let ledger = Arc::new(
        TrafficLedger::open(config.storage.requests_log())
            .await
            .context("Failed to open request ledger")?,
    );
    let stats = StatsEngine::new(ledger.clone(), rules.clone(), config.stats.clone());

    let monitor = if config.monitoring.enabled {
        let monitoring = Monitoring::new(
            stats.clone(),
            ledger.clone(),
            config.monitoring.clone(),
            config.ledger.clone(),
        );
        Some(actix_rt::spawn(async move { monitoring.start_monitoring().await }))
    } else {
        None
    };

    let state = web::Data::new(ApiState {
        control: Arc::new(FirewallControl::new(rules, ledger, stats)),
        metrics,
    });

    info!(
        "Listening on {}:{}",
        config.server.host, config.server.port
    );
    HttpServer::new(move || App::new().app_data(state.clone()).configure(api::config))
        .bind((config.server.host.as_str(), config.server.port))?
        .run()
        .await?;

    if let Some(monitor) = monitor {
        monitor.abort();
    }
    info!("Firewall control plane stopped");
    Ok(())
}
