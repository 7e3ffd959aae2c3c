use std::path::Path;

use chrono::{DateTime, Duration, Local, NaiveDateTime, TimeZone, Utc};
use tokio::io::AsyncWriteExt;

const NAIVE_FORMATS: [&str; 2] = ["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%d %H:%M:%S%.f"];

/// Ten years; longer lookback windows are clamped.
pub const MAX_WINDOW_SECONDS: u64 = 60 * 60 * 24 * 365 * 10;

/// Lookback window of `seconds`, clamped so time arithmetic cannot overflow.
pub fn window_seconds(seconds: u64) -> Duration {
    Duration::seconds(seconds.min(MAX_WINDOW_SECONDS) as i64)
}

/// Parse a ledger timestamp.
///
/// Accepts RFC 3339 with an offset, or a naive ISO-8601 date-time which is
/// read as local time.
pub fn parse_timestamp(raw: &str) -> Option<DateTime<Utc>> {
    let raw = raw.trim();
    if let Ok(dt) = DateTime::parse_from_rfc3339(raw) {
        return Some(dt.with_timezone(&Utc));
    }
    NAIVE_FORMATS.iter().find_map(|fmt| {
        let naive = NaiveDateTime::parse_from_str(raw, fmt).ok()?;
        Local
            .from_local_datetime(&naive)
            .earliest()
            .map(|dt| dt.with_timezone(&Utc))
    })
}

/// Replace `path` with `data` without ever exposing a truncated file.
///
/// Data goes to a uniquely named sibling first, is synced, then renamed over
/// the target.
pub async fn write_atomic(path: &Path, data: &[u8]) -> std::io::Result<()> {
    let file_name = path
        .file_name()
        .and_then(|n| n.to_str())
        .unwrap_or("data");
    let temp_path = path.with_file_name(format!(".{}.{}.tmp", file_name, uuid::Uuid::new_v4()));

    let result = async {
        let mut file = tokio::fs::File::create(&temp_path).await?;
        file.write_all(data).await?;
        file.sync_all().await?;
        drop(file);
        tokio::fs::rename(&temp_path, path).await
    }
    .await;

    if result.is_err() {
        let _ = tokio::fs::remove_file(&temp_path).await;
    }
    result
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_rfc3339() {
        let ts = parse_timestamp("2024-05-01T12:00:00+02:00").unwrap();
        assert_eq!(ts.to_rfc3339(), "2024-05-01T10:00:00+00:00");
    }

    #[test]
    fn test_parse_naive_local() {
        let ts = parse_timestamp("2024-05-01T12:00:00.123456").unwrap();
        let local = ts.with_timezone(&Local).naive_local();
        assert_eq!(local.format("%H:%M:%S").to_string(), "12:00:00");
        assert!(parse_timestamp("2024-05-01 12:00:00").is_some());
    }

    #[test]
    fn test_window_seconds_clamps() {
        assert_eq!(window_seconds(90), Duration::seconds(90));
        assert_eq!(
            window_seconds(u64::MAX),
            Duration::seconds(MAX_WINDOW_SECONDS as i64)
        );
        // Must not overflow when subtracted from the current time.
        let _ = Utc::now() - window_seconds(u64::MAX);
    }

    #[test]
    fn test_parse_garbage() {
        assert!(parse_timestamp("yesterday").is_none());
        assert!(parse_timestamp("").is_none());
    }

    #[tokio::test]
    async fn test_write_atomic_replaces_contents() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("list.txt");
        tokio::fs::write(&path, b"old\n").await.unwrap();

        write_atomic(&path, b"new\n").await.unwrap();

        assert_eq!(tokio::fs::read_to_string(&path).await.unwrap(), "new\n");
        let leftovers = std::fs::read_dir(dir.path()).unwrap().count();
        assert_eq!(leftovers, 1);
    }

    #[tokio::test]
    async fn test_write_atomic_missing_dir_fails() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("gone").join("list.txt");
        assert!(write_atomic(&path, b"x").await.is_err());
    }
}
