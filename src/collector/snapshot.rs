//! Process-list snapshots written by the diagnostic step.

use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime};

use chrono::{DateTime, Utc};
use serde_json::{Map, Value};

use crate::collector::{RawValue, Row};

const SNAPSHOT_PREFIX: &str = "processlist-";
const SNAPSHOT_EXT: &str = "json";
const SECS_PER_DAY: u64 = 24 * 60 * 60;

fn to_json(value: &RawValue) -> Value {
    match value {
        RawValue::Null => Value::Null,
        RawValue::Int(v) => Value::from(*v),
        RawValue::UInt(v) => Value::from(*v),
        RawValue::Float(v) => Value::from(*v),
        RawValue::Text(s) => Value::from(s.as_str()),
    }
}

/// Render rows as a JSON array of column objects.
pub fn rows_to_json(rows: &[Row]) -> Value {
    Value::Array(
        rows.iter()
            .map(|row| {
                let object: Map<String, Value> = row
                    .columns()
                    .map(|(name, value)| (name.to_string(), to_json(value)))
                    .collect();
                Value::Object(object)
            })
            .collect(),
    )
}

/// Write one snapshot file into `dir` and return its path.
pub async fn write_snapshot(
    dir: &Path,
    timestamp: DateTime<Utc>,
    rows: &[Row],
) -> std::io::Result<PathBuf> {
    let path = dir.join(format!(
        "{SNAPSHOT_PREFIX}{}.{SNAPSHOT_EXT}",
        timestamp.format("%Y%m%d-%H%M%S")
    ));
    let body = serde_json::to_vec_pretty(&rows_to_json(rows))?;
    tokio::fs::write(&path, body).await?;
    Ok(path)
}

/// Remove snapshot files in `dir` older than `days`. Returns how many were removed.
pub async fn purge_snapshots(dir: &Path, days: u32) -> std::io::Result<usize> {
    let max_age = Duration::from_secs(u64::from(days) * SECS_PER_DAY);
    let now = SystemTime::now();
    let mut removed = 0;

    let mut entries = tokio::fs::read_dir(dir).await?;
    while let Some(entry) = entries.next_entry().await? {
        let path = entry.path();
        let is_snapshot = path
            .file_name()
            .and_then(|n| n.to_str())
            .is_some_and(|n| n.starts_with(SNAPSHOT_PREFIX) && n.ends_with(SNAPSHOT_EXT));
        if !is_snapshot {
            continue;
        }

        let modified = entry.metadata().await?.modified()?;
        let age = now.duration_since(modified).unwrap_or_default();
        if age > max_age {
            tokio::fs::remove_file(&path).await?;
            removed += 1;
        }
    }

    Ok(removed)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rows_to_json() {
        let rows = vec![
            Row::new()
                .with("Id", RawValue::UInt(7))
                .with("Command", "Query")
                .with("Info", RawValue::Null),
        ];
        let json = rows_to_json(&rows);
        assert_eq!(json[0]["Id"], 7);
        assert_eq!(json[0]["Command"], "Query");
        assert!(json[0]["Info"].is_null());
    }

    #[tokio::test]
    async fn test_write_and_purge_keeps_fresh_files() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_snapshot(dir.path(), Utc::now(), &[Row::new().with("Id", 1i64)])
            .await
            .unwrap();
        assert!(path.exists());
        std::fs::write(dir.path().join("unrelated.txt"), "keep").unwrap();

        let removed = purge_snapshots(dir.path(), 10).await.unwrap();
        assert_eq!(removed, 0);
        assert!(path.exists());
    }

    #[tokio::test]
    async fn test_purge_zero_days_removes_old_snapshots_only() {
        let dir = tempfile::tempdir().unwrap();
        let old = dir.path().join("processlist-20200101-000000.json");
        std::fs::write(&old, "[]").unwrap();
        std::fs::write(dir.path().join("unrelated.json"), "{}").unwrap();
        std::thread::sleep(Duration::from_millis(20));

        let removed = purge_snapshots(dir.path(), 0).await.unwrap();
        assert_eq!(removed, 1);
        assert!(!old.exists());
        assert!(dir.path().join("unrelated.json").exists());
    }
}
