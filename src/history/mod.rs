// src/history/mod.rs

use crate::rewrite::RunReport;
use crate::store::RowKey;
use anyhow::{Context, Result};
use chrono::Utc;
use glob::glob;
use std::{
    collections::HashSet,
    fs,
    path::{Path, PathBuf},
};
use tracing::warn;

/// A directory of JSON run reports, one file per pass.
///
/// Files are named `<target key>---<ts_micros>.json`, where the target key is
/// `<table>@<columns>`, so the most recent report for a target is found from
/// the filename alone.
pub struct ReportLog {
    dir: PathBuf,
}

impl ReportLog {
    /// Construct a log at `dir`, creating the directory if needed.
    pub fn new(dir: impl Into<PathBuf>) -> Result<Self> {
        let dir = dir.into();
        fs::create_dir_all(&dir)
            .with_context(|| format!("creating report directory {:?}", &dir))?;
        Ok(Self { dir })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Persist `report`, writing to a `.tmp` file first and renaming it into
    /// place.
    pub fn record(&self, report: &RunReport) -> Result<PathBuf> {
        let ts = Utc::now().timestamp_micros();
        let file_name = format!("{}---{}.json", report.target_key(), ts);
        let final_path = self.dir.join(&file_name);
        let tmp_path = self.dir.join(format!("{}.tmp", file_name));

        let body = serde_json::to_vec_pretty(report).context("serializing run report")?;
        fs::write(&tmp_path, body).with_context(|| format!("writing {:?}", &tmp_path))?;
        fs::rename(&tmp_path, &final_path)
            .with_context(|| format!("renaming {:?} -> {:?}", &tmp_path, &final_path))?;
        Ok(final_path)
    }

    /// The newest report for the target with key `target`, if any.
    pub fn latest(&self, target: &str) -> Result<Option<RunReport>> {
        let pattern = format!(
            "{}/{}---*.json",
            self.dir.display(),
            glob::Pattern::escape(target)
        );
        let mut newest: Option<(i64, PathBuf)> = None;

        for entry in glob(&pattern).context("invalid glob pattern for ReportLog::latest")? {
            let path = match entry {
                Ok(p) => p,
                Err(e) => {
                    warn!("cannot read glob entry: {:?}", e);
                    continue;
                }
            };
            let Some(stem) = path.file_stem().and_then(|s| s.to_str()) else {
                continue;
            };
            // stem = "<target key>---<ts>"
            let Some((name, ts)) = stem.rsplit_once("---") else {
                continue;
            };
            if name != target {
                continue;
            }
            let Ok(ts) = ts.parse::<i64>() else {
                continue;
            };
            if newest.as_ref().map_or(true, |(best, _)| ts > *best) {
                newest = Some((ts, path));
            }
        }

        match newest {
            Some((_, path)) => {
                let raw = fs::read(&path).with_context(|| format!("reading {:?}", &path))?;
                let report = serde_json::from_slice(&raw)
                    .with_context(|| format!("parsing report {:?}", &path))?;
                Ok(Some(report))
            }
            None => Ok(None),
        }
    }

    /// Keys that failed in the newest report for `target`. Empty when there
    /// is no report.
    pub fn latest_failed_keys(&self, target: &str) -> Result<HashSet<RowKey>> {
        Ok(self
            .latest(target)?
            .map(|r| r.failed_keys().into_iter().collect())
            .unwrap_or_default())
    }
}
