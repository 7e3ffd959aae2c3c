//! Packet-filter adapter for the firewall control plane.
//!
//! This module turns rule list decisions into packet-filter directives.
//! Adapters hold no state of their own and never read filter state back;
//! the rule lists stay the authoritative record.

use std::process::Output;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use log::{debug, info};
use thiserror::Error;
use tokio::process::Command;
use tokio::sync::Mutex;

use crate::core::address::is_ipv6;
use crate::models::{Category, FilterBackend, FilterConfig};

/// Errors that can occur while issuing a filter directive
#[derive(Error, Debug)]
pub enum FilterError {
    #[error("failed to spawn `{directive}`: {source}")]
    Spawn {
        directive: String,
        #[source]
        source: std::io::Error,
    },
    #[error("`{directive}` exited with {code:?}: {stderr}")]
    Failed {
        directive: String,
        code: Option<i32>,
        stderr: String,
    },
    #[error("`{directive}` timed out after {timeout_ms}ms")]
    Timeout { directive: String, timeout_ms: u64 },
}

/// Direction of a filter change
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FilterOp {
    Apply,
    Retract,
}

impl FilterOp {
    pub fn as_str(&self) -> &'static str {
        match self {
            FilterOp::Apply => "apply",
            FilterOp::Retract => "retract",
        }
    }
}

/// Converges live filter state toward the rule lists.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait FilterAdapter: Send + Sync {
    /// Install the rules for `entry`. Installing an existing rule is not an error.
    async fn apply(&self, category: Category, entry: &str) -> Result<(), FilterError>;

    /// Remove the rules for `entry`. Removing an absent rule is not an error.
    async fn retract(&self, category: Category, entry: &str) -> Result<(), FilterError>;
}

/// Where a rule lands in its chain
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Position {
    /// Appended after existing rules (`-A`)
    Append,
    /// Inserted at the head of the chain (`-I`)
    Insert,
}

/// One packet-filter rule, independent of the action taken on it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RuleSpec {
    pub chain: &'static str,
    pub matcher: Vec<String>,
    pub target: &'static str,
    pub position: Position,
}

impl RuleSpec {
    /// Command arguments for `flag` (`-A`, `-I`, `-C` or `-D`).
    pub fn args(&self, flag: &str) -> Vec<String> {
        let mut args = vec![flag.to_string(), self.chain.to_string()];
        args.extend(self.matcher.iter().cloned());
        args.push("-j".to_string());
        args.push(self.target.to_string());
        args
    }

    fn install_flag(&self) -> &'static str {
        match self.position {
            Position::Append => "-A",
            Position::Insert => "-I",
        }
    }
}

/// Rules backing a list entry.
///
/// Blocks drop on both the inbound and forwarding chains; allow-list entries
/// are inserted at the chain head so they win over any drop rule.
pub fn rule_specs(category: Category, entry: &str) -> Vec<RuleSpec> {
    let (matcher, target, position) = match category {
        Category::BlockedIp => (
            vec!["-s".to_string(), entry.to_string()],
            "DROP",
            Position::Append,
        ),
        Category::AllowedIp => (
            vec!["-s".to_string(), entry.to_string()],
            "ACCEPT",
            Position::Insert,
        ),
        Category::BlockedMac => (
            vec![
                "-m".to_string(),
                "mac".to_string(),
                "--mac-source".to_string(),
                entry.to_string(),
            ],
            "DROP",
            Position::Append,
        ),
    };
    ["FORWARD", "INPUT"]
        .into_iter()
        .map(|chain| RuleSpec {
            chain,
            matcher: matcher.clone(),
            target,
            position,
        })
        .collect()
}

/// Exit status `iptables -C` uses for "no matching rule".
const RULE_ABSENT: i32 = 1;

/// Adapter driving `iptables`/`ip6tables` as child processes.
///
/// Directives run one at a time: legacy iptables rejects a second concurrent
/// caller outright, and `-w` covers callers outside this process.
pub struct IptablesAdapter {
    binary: String,
    binary_v6: String,
    timeout: Duration,
    serial: Mutex<()>,
}

impl IptablesAdapter {
    pub fn new(binary: impl Into<String>, binary_v6: impl Into<String>, timeout: Duration) -> Self {
        Self {
            binary: binary.into(),
            binary_v6: binary_v6.into(),
            timeout,
            serial: Mutex::new(()),
        }
    }

    /// Full argument list, waiting on the xtables lock for at most the timeout.
    fn command_args(&self, args: &[String]) -> Vec<String> {
        let wait = self.timeout.as_secs();
        let mut full = Vec::with_capacity(args.len() + 2);
        if wait > 0 {
            full.push("-w".to_string());
            full.push(wait.to_string());
        }
        full.extend(args.iter().cloned());
        full
    }

    fn program_for(&self, category: Category, entry: &str) -> &str {
        if !category.is_mac() && is_ipv6(entry) {
            &self.binary_v6
        } else {
            &self.binary
        }
    }

    /// Spawn one directive under the configured timeout.
    async fn exec(&self, program: &str, args: &[String]) -> Result<(String, Output), FilterError> {
        let args = self.command_args(args);
        let directive = format!("{} {}", program, args.join(" "));
        let child = Command::new(program).args(&args).kill_on_drop(true).output();
        match tokio::time::timeout(self.timeout, child).await {
            Ok(Ok(output)) => Ok((directive, output)),
            Ok(Err(source)) => Err(FilterError::Spawn { directive, source }),
            Err(_) => Err(FilterError::Timeout {
                directive,
                timeout_ms: self.timeout.as_millis() as u64,
            }),
        }
    }

    /// Run a `-C` probe: `Ok(true)` when the rule exists, `Ok(false)` when it
    /// does not. Any other exit status is an error.
    async fn probe(&self, program: &str, args: &[String]) -> Result<bool, FilterError> {
        let (directive, output) = self.exec(program, args).await?;
        debug!("`{}` exited with {:?}", directive, output.status.code());
        match output.status.code() {
            Some(0) => Ok(true),
            Some(RULE_ABSENT) => Ok(false),
            code => Err(failed(directive, code, &output)),
        }
    }

    /// Run an install or removal; a non-zero exit is an error.
    async fn run_checked(&self, program: &str, args: &[String]) -> Result<(), FilterError> {
        let (directive, output) = self.exec(program, args).await?;
        if output.status.success() {
            info!("filter directive applied: {}", directive);
            Ok(())
        } else {
            Err(failed(directive, output.status.code(), &output))
        }
    }
}

fn failed(directive: String, code: Option<i32>, output: &Output) -> FilterError {
    FilterError::Failed {
        directive,
        code,
        stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
    }
}

#[async_trait]
impl FilterAdapter for IptablesAdapter {
    async fn apply(&self, category: Category, entry: &str) -> Result<(), FilterError> {
        let _serial = self.serial.lock().await;
        let program = self.program_for(category, entry);
        for spec in rule_specs(category, entry) {
            if self.probe(program, &spec.args("-C")).await? {
                debug!("rule already present on {} for {}", spec.chain, entry);
                continue;
            }
            self.run_checked(program, &spec.args(spec.install_flag())).await?;
        }
        Ok(())
    }

    async fn retract(&self, category: Category, entry: &str) -> Result<(), FilterError> {
        let _serial = self.serial.lock().await;
        let program = self.program_for(category, entry);
        for spec in rule_specs(category, entry) {
            if !self.probe(program, &spec.args("-C")).await? {
                debug!("no rule to remove on {} for {}", spec.chain, entry);
                continue;
            }
            self.run_checked(program, &spec.args("-D")).await?;
        }
        Ok(())
    }
}

/// Adapter that only logs what it would do.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopAdapter;

#[async_trait]
impl FilterAdapter for NoopAdapter {
    async fn apply(&self, category: Category, entry: &str) -> Result<(), FilterError> {
        debug!("noop filter: apply {} {}", category, entry);
        Ok(())
    }

    async fn retract(&self, category: Category, entry: &str) -> Result<(), FilterError> {
        debug!("noop filter: retract {} {}", category, entry);
        Ok(())
    }
}

/// Build the adapter selected by configuration
pub fn build_adapter(config: &FilterConfig) -> Arc<dyn FilterAdapter> {
    match config.backend {
        FilterBackend::Iptables => Arc::new(IptablesAdapter::new(
            config.binary.clone(),
            config.binary_v6.clone(),
            Duration::from_millis(config.timeout_ms),
        )),
        FilterBackend::Noop => Arc::new(NoopAdapter),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::os::unix::fs::PermissionsExt;
    use std::path::Path;

    fn strings(args: &[&str]) -> Vec<String> {
        args.iter().map(|s| s.to_string()).collect()
    }

    /// Write an executable shell script standing in for iptables.
    fn fake_iptables(dir: &Path, body: &str) -> String {
        let path = dir.join("iptables");
        std::fs::write(&path, format!("#!/bin/sh\n{}\n", body)).unwrap();
        std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755)).unwrap();
        path.to_string_lossy().into_owned()
    }

    #[test]
    fn test_blocked_ip_rules() {
        let specs = rule_specs(Category::BlockedIp, "10.0.0.5");
        assert_eq!(specs.len(), 2);
        assert_eq!(
            specs[0].args(specs[0].install_flag()),
            strings(&["-A", "FORWARD", "-s", "10.0.0.5", "-j", "DROP"])
        );
        assert_eq!(
            specs[1].args("-D"),
            strings(&["-D", "INPUT", "-s", "10.0.0.5", "-j", "DROP"])
        );
    }

    #[test]
    fn test_allowed_ip_rules_go_first() {
        for spec in rule_specs(Category::AllowedIp, "10.0.0.7") {
            assert_eq!(spec.position, Position::Insert);
            assert_eq!(spec.target, "ACCEPT");
            assert_eq!(spec.install_flag(), "-I");
        }
    }

    #[test]
    fn test_mac_rules() {
        let specs = rule_specs(Category::BlockedMac, "aa:bb:cc:00:11:22");
        assert_eq!(
            specs[0].args("-A"),
            strings(&[
                "-A",
                "FORWARD",
                "-m",
                "mac",
                "--mac-source",
                "aa:bb:cc:00:11:22",
                "-j",
                "DROP"
            ])
        );
    }

    #[test]
    fn test_ipv6_uses_v6_binary() {
        let adapter = IptablesAdapter::new("iptables", "ip6tables", Duration::from_secs(1));
        assert_eq!(adapter.program_for(Category::BlockedIp, "2001:db8::1"), "ip6tables");
        assert_eq!(adapter.program_for(Category::BlockedIp, "10.0.0.1"), "iptables");
        assert_eq!(
            adapter.program_for(Category::BlockedMac, "aa:bb:cc:00:11:22"),
            "iptables"
        );
    }

    #[tokio::test]
    async fn test_apply_skips_existing_rule() {
        // `true` succeeds on the -C probe, so nothing is installed.
        let adapter = IptablesAdapter::new("true", "true", Duration::from_secs(5));
        assert!(adapter.apply(Category::BlockedIp, "10.0.0.5").await.is_ok());
    }

    #[tokio::test]
    async fn test_apply_reports_failure() {
        let adapter = IptablesAdapter::new("false", "false", Duration::from_secs(5));
        let result = adapter.apply(Category::BlockedIp, "10.0.0.5").await;
        assert!(matches!(result, Err(FilterError::Failed { .. })));
    }

    #[tokio::test]
    async fn test_retract_missing_rule_is_swallowed() {
        let adapter = IptablesAdapter::new("false", "false", Duration::from_secs(5));
        assert!(adapter.retract(Category::BlockedIp, "10.0.0.5").await.is_ok());
    }

    #[test]
    fn test_wait_flag_bounded_by_timeout() {
        let adapter = IptablesAdapter::new("iptables", "ip6tables", Duration::from_millis(2500));
        assert_eq!(
            adapter.command_args(&strings(&["-C", "INPUT"])),
            strings(&["-w", "2", "-C", "INPUT"])
        );

        let adapter = IptablesAdapter::new("iptables", "ip6tables", Duration::from_millis(500));
        assert_eq!(
            adapter.command_args(&strings(&["-C", "INPUT"])),
            strings(&["-C", "INPUT"])
        );
    }

    #[tokio::test]
    async fn test_retract_reports_lock_contention() {
        let dir = tempfile::tempdir().unwrap();
        let binary = fake_iptables(
            dir.path(),
            "echo 'Another app is currently holding the xtables lock.' >&2\nexit 4",
        );
        let adapter = IptablesAdapter::new(binary.clone(), binary, Duration::from_secs(5));

        let result = adapter.retract(Category::BlockedIp, "10.0.0.5").await;
        assert!(matches!(result, Err(FilterError::Failed { code: Some(4), .. })));
    }

    #[tokio::test]
    async fn test_retract_reports_failed_delete() {
        // The -C probe finds the rule; the delete itself is refused.
        let dir = tempfile::tempdir().unwrap();
        let binary = fake_iptables(
            dir.path(),
            "for arg in \"$@\"; do [ \"$arg\" = \"-C\" ] && exit 0; done\n\
             echo 'Permission denied (you must be root)' >&2\nexit 3",
        );
        let adapter = IptablesAdapter::new(binary.clone(), binary, Duration::from_secs(5));

        match adapter.retract(Category::BlockedIp, "10.0.0.5").await {
            Err(FilterError::Failed { code, stderr, .. }) => {
                assert_eq!(code, Some(3));
                assert!(stderr.contains("Permission denied"));
            }
            other => panic!("expected Failed, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_retract_present_rule() {
        let adapter = IptablesAdapter::new("true", "true", Duration::from_secs(5));
        assert!(adapter.retract(Category::AllowedIp, "10.0.0.5").await.is_ok());
    }

    #[tokio::test]
    async fn test_slow_directive_times_out() {
        let dir = tempfile::tempdir().unwrap();
        let binary = fake_iptables(dir.path(), "exec sleep 5");
        let adapter = IptablesAdapter::new(binary.clone(), binary, Duration::from_millis(50));

        let started = std::time::Instant::now();
        let result = adapter.apply(Category::BlockedIp, "10.0.0.5").await;
        assert!(matches!(
            result,
            Err(FilterError::Timeout { timeout_ms: 50, .. })
        ));
        assert!(started.elapsed() < Duration::from_secs(4));
    }

    #[tokio::test]
    async fn test_missing_binary() {
        let adapter = IptablesAdapter::new(
            "/nonexistent/iptables",
            "/nonexistent/ip6tables",
            Duration::from_secs(5),
        );
        let result = adapter.retract(Category::BlockedMac, "aa:bb:cc:00:11:22").await;
        assert!(matches!(result, Err(FilterError::Spawn { .. })));
    }

    #[tokio::test]
    async fn test_noop_adapter() {
        let adapter = build_adapter(&FilterConfig {
            backend: FilterBackend::Noop,
            binary: "iptables".to_string(),
            binary_v6: "ip6tables".to_string(),
            timeout_ms: 100,
            reconcile_on_start: false,
        });
        assert!(adapter.apply(Category::AllowedIp, "10.0.0.1").await.is_ok());
        assert!(adapter.retract(Category::AllowedIp, "10.0.0.1").await.is_ok());
    }
}
