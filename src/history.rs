//! Metrics history store
//!
//! One JSON file per snapshot under the metrics directory, plus
//! `latest_metrics.json` which is overwritten on every run. Snapshot files
//! are never overwritten and their timestamps strictly increase.

use crate::stats::{ComplianceMetrics, PerformanceMetrics, TrendMetrics};
use chrono::{DateTime, Duration, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use thiserror::Error;

pub const LATEST_FILE: &str = "latest_metrics.json";

#[derive(Debug, Error)]
pub enum HistoryError {
    #[error("metrics I/O error on {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid metrics file {}: {source}", path.display())]
    Json {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
}

/// Contents of `latest_metrics.json`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LatestMetrics {
    pub compliance: ComplianceMetrics,
    pub performance: Option<PerformanceMetrics>,
    pub trends: Option<TrendMetrics>,
    pub generated_at: DateTime<Utc>,
}

/// Append-only store with a single writer
#[derive(Debug)]
pub struct MetricsStore {
    dir: PathBuf,
    last: Mutex<Option<DateTime<Utc>>>,
}

impl MetricsStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self {
            dir: dir.into(),
            last: Mutex::new(None),
        }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Record one run: compliance, optional performance, and the trend over the window
    pub fn record(
        &self,
        mut compliance: ComplianceMetrics,
        mut performance: Option<PerformanceMetrics>,
        window_days: u32,
    ) -> Result<LatestMetrics, HistoryError> {
        let mut last = self.last.lock().unwrap_or_else(|e| e.into_inner());

        fs::create_dir_all(&self.dir).map_err(|source| HistoryError::Io {
            path: self.dir.clone(),
            source,
        })?;
        if last.is_none() {
            *last = self.newest_on_disk();
        }

        let stamp = next_stamp(*last, Utc::now());
        compliance.timestamp = stamp;
        if let Some(perf) = performance.as_mut() {
            perf.timestamp = stamp;
        }

        let suffix = file_stamp(stamp);
        self.write_new(&format!("compliance_{}.json", suffix), &compliance)?;
        if let Some(perf) = &performance {
            self.write_new(&format!("performance_{}.json", suffix), perf)?;
        }
        *last = Some(stamp);

        let trends = TrendMetrics::compute(&self.load_compliance_since(stamp, window_days)?);
        if let Some(trend) = &trends {
            self.write_new(&format!("trends_{}.json", suffix), trend)?;
        }

        let latest = LatestMetrics {
            compliance,
            performance,
            trends,
            generated_at: stamp,
        };
        let path = self.dir.join(LATEST_FILE);
        let json = serde_json::to_string_pretty(&latest).map_err(|source| HistoryError::Json {
            path: path.clone(),
            source,
        })?;
        fs::write(&path, json).map_err(|source| HistoryError::Io { path, source })?;

        log::info!("metrics saved to {}", self.dir.display());
        Ok(latest)
    }

    /// Compliance snapshots from the last `window_days` days, oldest first
    pub fn load_compliance(&self, window_days: u32) -> Result<Vec<ComplianceMetrics>, HistoryError> {
        self.load_compliance_since(Utc::now(), window_days)
    }

    /// Trend over the window, if at least two snapshots fall inside it
    pub fn trend(&self, window_days: u32) -> Result<Option<TrendMetrics>, HistoryError> {
        Ok(TrendMetrics::compute(&self.load_compliance(window_days)?))
    }

    pub fn load_latest(&self) -> Result<Option<LatestMetrics>, HistoryError> {
        let path = self.dir.join(LATEST_FILE);
        if !path.exists() {
            return Ok(None);
        }
        let content = fs::read_to_string(&path).map_err(|source| HistoryError::Io {
            path: path.clone(),
            source,
        })?;
        serde_json::from_str(&content)
            .map(Some)
            .map_err(|source| HistoryError::Json { path, source })
    }

    fn load_compliance_since(
        &self,
        now: DateTime<Utc>,
        window_days: u32,
    ) -> Result<Vec<ComplianceMetrics>, HistoryError> {
        let cutoff = now - Duration::days(i64::from(window_days));
        let mut snapshots: Vec<ComplianceMetrics> = self
            .compliance_files()?
            .into_iter()
            .filter_map(|path| match read_snapshot(&path) {
                Ok(m) => Some(m),
                Err(e) => {
                    log::warn!("skipping {}", e);
                    None
                }
            })
            .filter(|m| m.timestamp >= cutoff)
            .collect();
        snapshots.sort_by_key(|m| m.timestamp);
        Ok(snapshots)
    }

    fn compliance_files(&self) -> Result<Vec<PathBuf>, HistoryError> {
        let entries = match fs::read_dir(&self.dir) {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(source) => {
                return Err(HistoryError::Io {
                    path: self.dir.clone(),
                    source,
                })
            }
        };
        Ok(entries
            .flatten()
            .map(|e| e.path())
            .filter(|p| {
                p.file_name()
                    .and_then(|n| n.to_str())
                    .map(|n| n.starts_with("compliance_") && n.ends_with(".json"))
                    .unwrap_or(false)
            })
            .collect())
    }

    fn newest_on_disk(&self) -> Option<DateTime<Utc>> {
        self.compliance_files()
            .ok()?
            .iter()
            .filter_map(|p| read_snapshot(p).ok())
            .map(|m| m.timestamp)
            .max()
    }

    fn write_new<T: Serialize>(&self, name: &str, value: &T) -> Result<(), HistoryError> {
        let path = self.dir.join(name);
        let json = serde_json::to_string_pretty(value).map_err(|source| HistoryError::Json {
            path: path.clone(),
            source,
        })?;
        let mut file = OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(&path)
            .map_err(|source| HistoryError::Io {
                path: path.clone(),
                source,
            })?;
        file.write_all(json.as_bytes())
            .map_err(|source| HistoryError::Io { path, source })
    }
}

fn read_snapshot(path: &Path) -> Result<ComplianceMetrics, HistoryError> {
    let content = fs::read_to_string(path).map_err(|source| HistoryError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    serde_json::from_str(&content).map_err(|source| HistoryError::Json {
        path: path.to_path_buf(),
        source,
    })
}

/// Now, or one millisecond past the previous stamp if the clock has not moved on
fn next_stamp(last: Option<DateTime<Utc>>, now: DateTime<Utc>) -> DateTime<Utc> {
    let now = truncate_millis(now);
    match last {
        Some(prev) if now <= prev => prev + Duration::milliseconds(1),
        _ => now,
    }
}

fn truncate_millis(t: DateTime<Utc>) -> DateTime<Utc> {
    DateTime::from_timestamp_millis(t.timestamp_millis()).unwrap_or(t)
}

fn file_stamp(t: DateTime<Utc>) -> String {
    t.to_rfc3339_opts(SecondsFormat::Millis, true).replace(':', "-")
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn snapshot(total_files: usize, dirty: usize) -> ComplianceMetrics {
        ComplianceMetrics::new(total_files, dirty, &[])
    }

    #[test]
    fn test_next_stamp_is_monotonic() {
        let now = Utc::now();
        let later = next_stamp(Some(now + Duration::seconds(5)), now);
        assert_eq!(later, now + Duration::seconds(5) + Duration::milliseconds(1));
        assert_eq!(next_stamp(None, now), truncate_millis(now));
    }

    #[test]
    fn test_file_stamp_has_no_colons() {
        let t = DateTime::from_timestamp_millis(1_700_000_000_123).unwrap();
        assert_eq!(file_stamp(t), "2023-11-14T22-13-20.123Z");
    }

    #[test]
    fn test_record_writes_files() {
        let dir = TempDir::new().unwrap();
        let store = MetricsStore::new(dir.path().join("metrics"));
        let perf = PerformanceMetrics::new(0.5, 0.1, 4, 2, 100.0);

        let latest = store.record(snapshot(4, 1), Some(perf), 30).unwrap();
        assert!(latest.trends.is_none());

        let names: Vec<String> = fs::read_dir(store.dir())
            .unwrap()
            .flatten()
            .map(|e| e.file_name().to_string_lossy().into_owned())
            .collect();
        assert_eq!(names.len(), 3);
        assert!(names.iter().any(|n| n == LATEST_FILE));
        assert!(names.iter().any(|n| n.starts_with("compliance_")));
        assert!(names.iter().any(|n| n.starts_with("performance_")));

        let loaded = store.load_latest().unwrap().unwrap();
        assert_eq!(loaded.generated_at, latest.generated_at);
        assert_eq!(loaded.compliance.files_with_violations, 1);
    }

    #[test]
    fn test_rapid_writes_stay_ordered() {
        let dir = TempDir::new().unwrap();
        let store = MetricsStore::new(dir.path());

        let stamps: Vec<_> = (0..5)
            .map(|i| store.record(snapshot(10, i), None, 30).unwrap().generated_at)
            .collect();
        assert!(stamps.windows(2).all(|w| w[0] < w[1]));

        let loaded = store.load_compliance(30).unwrap();
        assert_eq!(loaded.len(), 5);
        assert_eq!(loaded[4].files_with_violations, 4);
    }

    #[test]
    fn test_second_run_produces_trend() {
        let dir = TempDir::new().unwrap();
        let store = MetricsStore::new(dir.path());
        store.record(snapshot(10, 5), None, 30).unwrap();
        let latest = store.record(snapshot(10, 2), None, 30).unwrap();

        let trend = latest.trends.unwrap();
        assert_eq!(trend.files_improved, 3);
        assert!(store.trend(30).unwrap().is_some());
    }

    #[test]
    fn test_new_store_continues_after_existing_snapshots() {
        let dir = TempDir::new().unwrap();
        let first = MetricsStore::new(dir.path())
            .record(snapshot(1, 0), None, 30)
            .unwrap();
        let second = MetricsStore::new(dir.path())
            .record(snapshot(1, 0), None, 30)
            .unwrap();
        assert!(second.generated_at > first.generated_at);
    }

    #[test]
    fn test_corrupt_snapshot_is_skipped() {
        let dir = TempDir::new().unwrap();
        let store = MetricsStore::new(dir.path());
        store.record(snapshot(2, 1), None, 30).unwrap();
        fs::write(dir.path().join("compliance_garbage.json"), "{ not json").unwrap();

        assert_eq!(store.load_compliance(30).unwrap().len(), 1);
    }

    #[test]
    fn test_missing_dir_is_empty() {
        let dir = TempDir::new().unwrap();
        let store = MetricsStore::new(dir.path().join("absent"));
        assert!(store.load_compliance(30).unwrap().is_empty());
        assert!(store.load_latest().unwrap().is_none());
    }
}
