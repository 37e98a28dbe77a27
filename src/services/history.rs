//! Local consumption archive.
//!
//! The provider only serves a short rolling window of daily readings, so
//! every run merges what it fetched into a per-meter archive on disk:
//! - daily samples are unioned by day, existing entries win
//! - daily samples older than the retention window are pruned
//! - the monthly series is replaced wholesale
//!
//! Writes are a whole-archive read-modify-write under an exclusive lock on
//! a sidecar file, landing via temp file + rename.

use chrono::{DateTime, Duration, NaiveDate, Utc};
use fs2::FileExt;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashSet};
use std::fs::{self, OpenOptions};
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

use crate::config::HistoryConfig;
use crate::error::StoreError;
use crate::models::{DailySample, MonthlySample};

/// Persisted archive, keyed by meter identifier
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HistoryArchive {
    #[serde(default)]
    pub day_list: BTreeMap<String, Vec<DailySample>>,
    #[serde(default)]
    pub month_list: BTreeMap<String, Vec<MonthlySample>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_update: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_update_cons_no: Option<String>,
}

impl HistoryArchive {
    pub fn daily(&self, meter_id: &str) -> &[DailySample] {
        self.day_list.get(meter_id).map(Vec::as_slice).unwrap_or_default()
    }

    pub fn monthly(&self, meter_id: &str) -> &[MonthlySample] {
        self.month_list.get(meter_id).map(Vec::as_slice).unwrap_or_default()
    }

    /// Merge one meter's fetch into the archive, returning the stored daily count
    ///
    /// Afterwards the meter's daily list holds one entry per day, sorted
    /// ascending, none before `today - retention_days` and none without a reading.
    pub fn merge(
        &mut self,
        meter_id: &str,
        new_daily: &[DailySample],
        new_monthly: &[MonthlySample],
        retention_days: u32,
        today: NaiveDate,
    ) -> usize {
        let cutoff = today - Duration::days(i64::from(retention_days));

        let daily = self.day_list.entry(meter_id.to_string()).or_default();
        daily.retain(|sample| !sample.is_no_reading());
        let mut seen: HashSet<NaiveDate> = daily.iter().map(|sample| sample.day).collect();
        for sample in new_daily.iter().filter(|sample| !sample.is_no_reading()) {
            if seen.insert(sample.day) {
                daily.push(sample.clone());
            }
        }

        daily.retain(|sample| sample.day >= cutoff);
        daily.sort_by_key(|sample| sample.day);
        daily.dedup_by_key(|sample| sample.day);
        let stored = daily.len();

        self.month_list
            .insert(meter_id.to_string(), new_monthly.to_vec());
        stored
    }
}

/// File-backed archive honoring the save flag and retention window
#[derive(Debug, Clone)]
pub struct HistoryStore {
    path: PathBuf,
    enabled: bool,
    retention_days: u32,
}

impl HistoryStore {
    pub fn new(config: &HistoryConfig) -> Self {
        Self {
            path: config.file.clone(),
            enabled: config.enabled,
            retention_days: config.retention_days,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    fn lock_path(&self) -> PathBuf {
        self.path.with_extension("json.lock")
    }

    /// Current archive; missing or unreadable files load as empty
    pub fn load(&self) -> HistoryArchive {
        match fs::read_to_string(&self.path) {
            Ok(content) => serde_json::from_str(&content).unwrap_or_else(|e| {
                warn!(
                    "History archive {} is unreadable, starting empty: {}",
                    self.path.display(),
                    e
                );
                HistoryArchive::default()
            }),
            Err(e) if e.kind() == ErrorKind::NotFound => HistoryArchive::default(),
            Err(e) => {
                warn!(
                    "Failed to read history archive {}: {}",
                    self.path.display(),
                    e
                );
                HistoryArchive::default()
            }
        }
    }

    /// Merge and persist one meter's samples
    ///
    /// Returns the stored daily count, or `None` when saving is disabled.
    pub fn record(
        &self,
        meter_id: &str,
        daily: &[DailySample],
        monthly: &[MonthlySample],
        now: DateTime<Utc>,
        today: NaiveDate,
    ) -> Result<Option<usize>, StoreError> {
        if !self.enabled {
            debug!("History saving disabled, skipping {}", meter_id);
            return Ok(None);
        }

        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent)?;
        }

        let lock = OpenOptions::new()
            .create(true)
            .truncate(false)
            .write(true)
            .open(self.lock_path())?;
        FileExt::lock_exclusive(&lock)?;

        let mut archive = self.load();
        let stored = archive.merge(meter_id, daily, monthly, self.retention_days, today);
        archive.last_update = Some(now);
        archive.last_update_cons_no = Some(meter_id.to_string());

        let content = serde_json::to_string_pretty(&archive)?;
        let temp_path = self.path.with_extension("json.tmp");
        fs::write(&temp_path, content)?;
        fs::rename(&temp_path, &self.path)?;

        FileExt::unlock(&lock)?;

        info!("✅ History saved, {} daily records for {}", stored, meter_id);
        Ok(Some(stored))
    }
}
