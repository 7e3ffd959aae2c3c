//! Request ledger for the firewall control plane.
//!
//! This module owns the append-only newline-delimited JSON log of observed
//! requests and provides time-windowed retrieval over it.

use std::path::{Path, PathBuf};

use chrono::{DateTime, Duration, Utc};
use log::{debug, info};
use metrics::counter;
use thiserror::Error;
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;

use crate::models::TrafficRecord;
use crate::utils::write_atomic;

/// Errors that can occur during ledger operations
#[derive(Error, Debug)]
pub enum LedgerError {
    #[error("ledger I/O error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
    #[error("unparseable timestamp: {0}")]
    InvalidTimestamp(String),
}

/// Append-only request ledger
pub struct TrafficLedger {
    path: PathBuf,
    write_lock: Mutex<()>,
}

impl TrafficLedger {
    /// Open the ledger at `path`, creating parent directories and the file.
    pub async fn open(path: impl Into<PathBuf>) -> Result<Self, LedgerError> {
        let path = path.into();
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|source| io_error(&path, source))?;
        }
        tokio::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .await
            .map_err(|source| io_error(&path, source))?;

        Ok(Self {
            path,
            write_lock: Mutex::new(()),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Append one record as a single complete line.
    pub async fn append(&self, record: &TrafficRecord) -> Result<(), LedgerError> {
        if record.parsed_timestamp().is_none() {
            return Err(LedgerError::InvalidTimestamp(record.timestamp.clone()));
        }
        let line = format!("{}\n", serde_json::to_string(record)?);

        let _guard = self.write_lock.lock().await;
        let mut file = tokio::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .await
            .map_err(|source| io_error(&self.path, source))?;
        file.write_all(line.as_bytes())
            .await
            .map_err(|source| io_error(&self.path, source))?;
        file.flush()
            .await
            .map_err(|source| io_error(&self.path, source))?;
        Ok(())
    }

    /// Records from the last `window`, newest first.
    pub async fn recent(&self, window: Duration) -> Result<Vec<TrafficRecord>, LedgerError> {
        self.recent_at(window, Utc::now()).await
    }

    /// Records with `timestamp >= now - window`, newest first.
    pub async fn recent_at(
        &self,
        window: Duration,
        now: DateTime<Utc>,
    ) -> Result<Vec<TrafficRecord>, LedgerError> {
        let content = self.read().await?;
        let cutoff = now - window;

        let mut records: Vec<(DateTime<Utc>, TrafficRecord)> = parse_lines(&content)
            .filter(|(ts, _)| *ts >= cutoff)
            .collect();
        records.sort_by(|a, b| b.0.cmp(&a.0));
        Ok(records.into_iter().map(|(_, record)| record).collect())
    }

    /// Drop records older than `now - retention`, rewriting the file atomically.
    ///
    /// Malformed lines are dropped as well. An unterminated trailing fragment is
    /// carried over byte for byte. Returns how many lines went away.
    pub async fn compact(&self, retention: Duration, now: DateTime<Utc>) -> Result<usize, LedgerError> {
        let _guard = self.write_lock.lock().await;
        let content = self.read().await?;
        let (complete, fragment) = split_fragment(&content);
        let cutoff = now - retention;

        let total = complete.lines().filter(|l| !l.trim().is_empty()).count();
        let mut kept: String = parse_lines(complete)
            .filter(|(ts, _)| *ts >= cutoff)
            .map(|(_, record)| serde_json::to_string(&record).map(|json| json + "\n"))
            .collect::<Result<_, _>>()?;
        let kept_count = kept.lines().count();
        let dropped = total.saturating_sub(kept_count);
        if dropped == 0 {
            return Ok(0);
        }
        kept.push_str(fragment);

        write_atomic(&self.path, kept.as_bytes())
            .await
            .map_err(|source| io_error(&self.path, source))?;
        counter!("firewall_ledger_compacted_total", dropped as u64);
        info!(
            "compacted request ledger: dropped {}, kept {}",
            dropped, kept_count
        );
        Ok(dropped)
    }

    async fn read(&self) -> Result<String, LedgerError> {
        match tokio::fs::read_to_string(&self.path).await {
            Ok(content) => Ok(content),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(String::new()),
            Err(source) => Err(io_error(&self.path, source)),
        }
    }
}

fn io_error(path: &Path, source: std::io::Error) -> LedgerError {
    LedgerError::Io {
        path: path.to_path_buf(),
        source,
    }
}

/// Split off a trailing fragment that has no newline yet.
///
/// The ledger has a single writer, which always ends a record with `\n`, so
/// such a fragment is an append still in flight.
fn split_fragment(content: &str) -> (&str, &str) {
    match content.rfind('\n') {
        Some(idx) => content.split_at(idx + 1),
        None => ("", content),
    }
}

/// Parse complete ledger lines, skipping anything malformed.
fn parse_lines(content: &str) -> impl Iterator<Item = (DateTime<Utc>, TrafficRecord)> + '_ {
    let (complete, _) = split_fragment(content);
    complete.lines().filter_map(|line| {
        let line = line.trim();
        if line.is_empty() {
            return None;
        }
        let record: TrafficRecord = match serde_json::from_str(line) {
            Ok(record) => record,
            Err(e) => {
                debug!("skipping malformed ledger line: {}", e);
                return None;
            }
        };
        match record.parsed_timestamp() {
            Some(ts) => Some((ts, record)),
            None => {
                debug!("skipping ledger line with bad timestamp {:?}", record.timestamp);
                None
            }
        }
    })
}
