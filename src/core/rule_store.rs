//! Address rule lists for the firewall control plane.
//!
//! This module owns the blocked-IP, allowed-IP and blocked-MAC lists and their
//! line-oriented backing files. The lists are the source of truth for what the
//! packet filter should enforce.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use futures::future::join_all;
use log::{debug, error, info, warn};
use metrics::{counter, gauge};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::sync::{Mutex, MutexGuard};

use crate::core::address::{self, AddressError};
use crate::core::filter_adapter::{FilterAdapter, FilterOp};
use crate::models::{Category, RuleCounts, RuleLists};
use crate::utils::write_atomic;

/// Errors that can occur during rule list operations
#[derive(Error, Debug)]
pub enum RuleStoreError {
    #[error("invalid entry: {0}")]
    InvalidEntry(#[from] AddressError),
    #[error("failed to persist {path}: {source}")]
    Persistence {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("rule list {path} is unavailable: {source}")]
    Unavailable {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// Outcome of an add or remove
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Mutation {
    Changed,
    AlreadyPresent,
    NotPresent,
}

/// Result of re-applying every persisted entry to the filter
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ReconcileReport {
    pub applied: usize,
    pub failed: usize,
}

/// One list and its backing file
struct RuleList {
    path: PathBuf,
    entries: Vec<String>,
    loaded: bool,
}

impl RuleList {
    async fn reload(&mut self, category: Category) -> Result<(), RuleStoreError> {
        match tokio::fs::read_to_string(&self.path).await {
            Ok(content) => {
                self.entries = parse_list(category, &content);
                self.loaded = true;
                Ok(())
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                self.entries.clear();
                self.loaded = true;
                Ok(())
            }
            Err(source) => Err(RuleStoreError::Unavailable {
                path: self.path.clone(),
                source,
            }),
        }
    }
}

/// Parse a list file: one entry per line, blank and `#` lines ignored.
///
/// Entries that fail normalization are skipped; duplicates keep their first
/// position.
pub fn parse_list(category: Category, content: &str) -> Vec<String> {
    let mut entries: Vec<String> = Vec::new();
    for (line_num, line) in content.lines().enumerate() {
        let trimmed = line.trim();
        if trimmed.is_empty() || trimmed.starts_with('#') {
            continue;
        }
        match address::normalize(category, trimmed) {
            Ok(entry) if !entries.contains(&entry) => entries.push(entry),
            Ok(_) => {}
            Err(e) => warn!(
                "skipping {} entry on line {}: {}",
                category,
                line_num + 1,
                e
            ),
        }
    }
    entries
}

fn render_list(entries: &[String]) -> String {
    entries.iter().map(|e| format!("{}\n", e)).collect()
}

/// Rule store state
pub struct RuleStore {
    lists: HashMap<Category, Mutex<RuleList>>,
    adapter: Arc<dyn FilterAdapter>,
}

impl RuleStore {
    /// Open the store rooted at `dir`, creating the directory and empty list
    /// files as needed.
    ///
    /// A list that cannot be read stays unavailable until a later operation
    /// manages to load it.
    pub async fn open(dir: impl AsRef<Path>, adapter: Arc<dyn FilterAdapter>) -> Self {
        let dir = dir.as_ref();
        if let Err(e) = tokio::fs::create_dir_all(dir).await {
            error!("cannot create data directory {}: {}", dir.display(), e);
        }

        let mut lists = HashMap::new();
        for category in Category::ALL {
            let mut list = RuleList {
                path: dir.join(category.file_name()),
                entries: Vec::new(),
                loaded: false,
            };
            if tokio::fs::metadata(&list.path).await.is_err() {
                if let Err(e) = tokio::fs::write(&list.path, b"").await {
                    warn!("cannot create {}: {}", list.path.display(), e);
                }
            }
            match list.reload(category).await {
                Ok(()) => info!("loaded {} {} entries", list.entries.len(), category),
                Err(e) => error!("{}", e),
            }
            lists.insert(category, Mutex::new(list));
        }

        Self { lists, adapter }
    }

    async fn lock(&self, category: Category) -> Result<MutexGuard<'_, RuleList>, RuleStoreError> {
        let mut list = self.lists[&category].lock().await;
        if !list.loaded {
            list.reload(category).await?;
            info!("{} list recovered from {}", category, list.path.display());
        }
        Ok(list)
    }

    /// Add `raw` to the list, persisting before the filter is touched.
    pub async fn add(&self, category: Category, raw: &str) -> Result<Mutation, RuleStoreError> {
        let entry = address::normalize(category, raw)?;
        let mut list = self.lock(category).await?;
        if list.entries.contains(&entry) {
            debug!("{} already in {}", entry, category);
            return Ok(Mutation::AlreadyPresent);
        }

        let mut next = list.entries.clone();
        next.push(entry.clone());
        self.persist(&list.path, &next).await?;
        list.entries = next;
        self.record_mutation(category, FilterOp::Apply, list.entries.len());
        info!("added {} to {}", entry, category);

        self.sync(category, FilterOp::Apply, &entry).await;
        Ok(Mutation::Changed)
    }

    /// Remove `raw` from the list, persisting before the filter is touched.
    pub async fn remove(&self, category: Category, raw: &str) -> Result<Mutation, RuleStoreError> {
        let entry = address::normalize(category, raw)?;
        let mut list = self.lock(category).await?;
        if !list.entries.contains(&entry) {
            debug!("{} not in {}", entry, category);
            return Ok(Mutation::NotPresent);
        }

        let next: Vec<String> = list
            .entries
            .iter()
            .filter(|e| **e != entry)
            .cloned()
            .collect();
        self.persist(&list.path, &next).await?;
        list.entries = next;
        self.record_mutation(category, FilterOp::Retract, list.entries.len());
        info!("removed {} from {}", entry, category);

        self.sync(category, FilterOp::Retract, &entry).await;
        Ok(Mutation::Changed)
    }

    /// Current entries of one list, in insertion order.
    pub async fn list(&self, category: Category) -> Result<Vec<String>, RuleStoreError> {
        Ok(self.lock(category).await?.entries.clone())
    }

    pub async fn all_lists(&self) -> Result<RuleLists, RuleStoreError> {
        Ok(RuleLists {
            blocked_ips: self.list(Category::BlockedIp).await?,
            allowed_ips: self.list(Category::AllowedIp).await?,
            blocked_macs: self.list(Category::BlockedMac).await?,
        })
    }

    pub async fn counts(&self) -> Result<RuleCounts, RuleStoreError> {
        Ok(RuleCounts {
            blocked_ip: self.lock(Category::BlockedIp).await?.entries.len(),
            allowed_ip: self.lock(Category::AllowedIp).await?.entries.len(),
            blocked_mac: self.lock(Category::BlockedMac).await?.entries.len(),
        })
    }

    /// Re-apply every persisted entry to the packet filter.
    ///
    /// Allow-list entries go last so their accept rules end up ahead of any
    /// drop rules.
    pub async fn reconcile(&self) -> ReconcileReport {
        let mut report = ReconcileReport::default();
        for category in [Category::BlockedIp, Category::BlockedMac, Category::AllowedIp] {
            let entries = match self.list(category).await {
                Ok(entries) => entries,
                Err(e) => {
                    error!("skipping reconcile of {}: {}", category, e);
                    continue;
                }
            };
            let results = join_all(
                entries
                    .iter()
                    .map(|entry| self.adapter.apply(category, entry)),
            )
            .await;
            for (entry, result) in entries.iter().zip(results) {
                match result {
                    Ok(()) => report.applied += 1,
                    Err(e) => {
                        report.failed += 1;
                        self.sync_failed(category, FilterOp::Apply, entry, &e.to_string());
                    }
                }
            }
        }
        info!(
            "reconciled packet filter: {} applied, {} failed",
            report.applied, report.failed
        );
        report
    }

    async fn persist(&self, path: &Path, entries: &[String]) -> Result<(), RuleStoreError> {
        write_atomic(path, render_list(entries).as_bytes())
            .await
            .map_err(|source| {
                error!("failed to persist {}: {}", path.display(), source);
                RuleStoreError::Persistence {
                    path: path.to_path_buf(),
                    source,
                }
            })
    }

    /// Push a change to the packet filter. Failures never undo the list change.
    async fn sync(&self, category: Category, op: FilterOp, entry: &str) {
        let result = match op {
            FilterOp::Apply => self.adapter.apply(category, entry).await,
            FilterOp::Retract => self.adapter.retract(category, entry).await,
        };
        if let Err(e) = result {
            self.sync_failed(category, op, entry, &e.to_string());
        }
    }

    fn sync_failed(&self, category: Category, op: FilterOp, entry: &str, reason: &str) {
        warn!(
            "filter sync failed ({} {} {}): {}",
            op.as_str(),
            category,
            entry,
            reason
        );
        counter!(
            "firewall_filter_sync_failures_total",
            1,
            "category" => category.as_str(),
            "op" => op.as_str()
        );
    }

    fn record_mutation(&self, category: Category, op: FilterOp, size: usize) {
        counter!(
            "firewall_rule_mutations_total",
            1,
            "category" => category.as_str(),
            "op" => op.as_str()
        );
        gauge!("firewall_rule_list_size", size as f64, "category" => category.as_str());
    }
}
