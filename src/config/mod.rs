//! Configuration management for the firewall control plane.
//!
//! This module handles loading application configuration from an optional
//! configuration file and `FIREWALL__`-prefixed environment variables.

use std::env;

use config::{Config as ConfigBuilder, ConfigError, Environment, File};

use crate::models::Config;

/// Load configuration from file and environment, falling back to defaults
pub fn load_config() -> Result<Config, ConfigError> {
    let config_file = env::var("CONFIG_FILE").unwrap_or_else(|_| "config/default.toml".to_string());
    let environment = Environment::with_prefix("FIREWALL")
        .prefix_separator("__")
        .separator("__");
    load_from(&config_file, environment)
}

fn load_from(config_file: &str, environment: Environment) -> Result<Config, ConfigError> {
    let defaults = Config::default();

    let config = ConfigBuilder::builder()
        .set_default("server.host", defaults.server.host)?
        .set_default("server.port", defaults.server.port as i64)?
        .set_default("storage.data_dir", defaults.storage.data_dir)?
        .set_default("storage.logs_dir", defaults.storage.logs_dir)?
        .set_default("filter.backend", "iptables")?
        .set_default("filter.binary", defaults.filter.binary)?
        .set_default("filter.binary_v6", defaults.filter.binary_v6)?
        .set_default("filter.timeout_ms", defaults.filter.timeout_ms as i64)?
        .set_default("filter.reconcile_on_start", defaults.filter.reconcile_on_start)?
        .set_default("stats.ddos_threshold", defaults.stats.ddos_threshold as i64)?
        .set_default("stats.ddos_window_seconds", defaults.stats.ddos_window_seconds as i64)?
        .set_default("stats.hourly_window_seconds", defaults.stats.hourly_window_seconds as i64)?
        .set_default("stats.top_ips_limit", defaults.stats.top_ips_limit as i64)?
        .set_default("stats.default_log_minutes", defaults.stats.default_log_minutes as i64)?
        .set_default("ledger.retention_hours", defaults.ledger.retention_hours as i64)?
        .set_default("monitoring.enabled", defaults.monitoring.enabled)?
        .set_default("monitoring.interval_seconds", defaults.monitoring.interval_seconds as i64)?
        .add_source(File::with_name(config_file).required(false))
        .add_source(environment.try_parsing(true))
        .build()?;

    config.try_deserialize()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::FilterBackend;
    use std::collections::HashMap;

    #[test]
    fn test_defaults_without_file() {
        let config = load_from(
            "/nonexistent/firewall",
            Environment::with_prefix("FIREWALL_TEST_UNSET").prefix_separator("__").separator("__"),
        )
        .unwrap();
        assert_eq!(config.server.port, 8080);
        assert_eq!(config.filter.backend, FilterBackend::Iptables);
        assert_eq!(config.stats.ddos_threshold, 10);
        assert_eq!(config.ledger.retention_hours, 24);
    }

    #[test]
    fn test_file_and_env_overrides() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("firewall.toml");
        std::fs::write(
            &path,
            "[filter]\nbackend = \"noop\"\n\n[storage]\ndata_dir = \"/tmp/fw\"\n",
        )
        .unwrap();

        let mut vars = HashMap::new();
        vars.insert("FIREWALL__STATS__DDOS_THRESHOLD".to_string(), "25".to_string());
        let environment = Environment::with_prefix("FIREWALL")
            .prefix_separator("__")
            .separator("__")
            .source(Some(vars));

        let config = load_from(path.to_str().unwrap(), environment).unwrap();
        assert_eq!(config.filter.backend, FilterBackend::Noop);
        assert_eq!(config.storage.data_dir, "/tmp/fw");
        assert_eq!(config.stats.ddos_threshold, 25);
    }
}
