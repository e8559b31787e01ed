// src/rewrite/report.rs

use crate::rewrite::target::target_key;
use crate::store::RowKey;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

pub const EXIT_ROW_FAILURES: i32 = 1;
pub const EXIT_FATAL: i32 = 2;
pub const EXIT_CANCELLED: i32 = 3;

/// What happened to a single row during a pass.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RowOutcome {
    Unchanged,
    Updated { columns: Vec<String> },
    Failed { reason: String },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FailedRow {
    pub key: RowKey,
    pub reason: String,
}

/// Summary of one Target Spec pass.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunReport {
    pub table: String,
    pub columns: Vec<String>,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub dry_run: bool,
    pub cancelled: bool,
    pub unchanged: usize,
    pub updated: usize,
    pub failed: usize,
    /// Rows in the snapshot that were never attempted because of cancellation.
    pub not_attempted: usize,
    pub failed_rows: Vec<FailedRow>,
}

impl RunReport {
    pub fn new(table: impl Into<String>, columns: &[String], dry_run: bool) -> Self {
        let now = Utc::now();
        Self {
            table: table.into(),
            columns: columns.to_vec(),
            started_at: now,
            finished_at: now,
            dry_run,
            cancelled: false,
            unchanged: 0,
            updated: 0,
            failed: 0,
            not_attempted: 0,
            failed_rows: Vec::new(),
        }
    }

    pub fn record(&mut self, key: &RowKey, outcome: RowOutcome) {
        match outcome {
            RowOutcome::Unchanged => self.unchanged += 1,
            RowOutcome::Updated { .. } => self.updated += 1,
            RowOutcome::Failed { reason } => {
                self.failed += 1;
                self.failed_rows.push(FailedRow {
                    key: key.clone(),
                    reason,
                });
            }
        }
    }

    pub fn finish(&mut self) {
        self.finished_at = Utc::now();
    }

    /// Same value as [`TargetSpec::key`](crate::rewrite::TargetSpec::key)
    /// for the target this report came from.
    pub fn target_key(&self) -> String {
        target_key(&self.table, &self.columns)
    }

    pub fn attempted(&self) -> usize {
        self.unchanged + self.updated + self.failed
    }

    pub fn failed_keys(&self) -> Vec<RowKey> {
        self.failed_rows.iter().map(|f| f.key.clone()).collect()
    }

    pub fn is_clean(&self) -> bool {
        self.failed == 0 && !self.cancelled
    }
}

/// All passes of a migration run, plus the fatal error that halted it, if any.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MigrationReport {
    pub targets: Vec<RunReport>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl MigrationReport {
    pub fn failed(&self) -> usize {
        self.targets.iter().map(|r| r.failed).sum()
    }

    pub fn cancelled(&self) -> bool {
        self.targets.iter().any(|r| r.cancelled)
    }

    /// Process exit status for this run: 0 clean, 1 row failures, 2 halted by
    /// a fatal error, 3 cancelled.
    pub fn exit_code(&self) -> i32 {
        if self.error.is_some() {
            EXIT_FATAL
        } else if self.cancelled() {
            EXIT_CANCELLED
        } else if self.failed() > 0 {
            EXIT_ROW_FAILURES
        } else {
            0
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn counts_outcomes() {
        let mut report = RunReport::new("article", &["body".to_string()], false);
        report.record(&RowKey::from("1"), RowOutcome::Unchanged);
        report.record(
            &RowKey::from("2"),
            RowOutcome::Updated {
                columns: vec!["body".into()],
            },
        );
        report.record(
            &RowKey::from("3"),
            RowOutcome::Failed {
                reason: "constraint violation".into(),
            },
        );

        assert_eq!(report.attempted(), 3);
        assert_eq!((report.unchanged, report.updated, report.failed), (1, 1, 1));
        assert_eq!(report.failed_keys(), vec![RowKey::from("3")]);
        assert!(!report.is_clean());
    }

    #[test]
    fn exit_codes() {
        let clean = RunReport::new("article", &[], false);
        let mut failing = clean.clone();
        failing.record(
            &RowKey::from("1"),
            RowOutcome::Failed {
                reason: "x".into(),
            },
        );
        let mut cancelled = clean.clone();
        cancelled.cancelled = true;

        let run = |targets: Vec<RunReport>, error: Option<&str>| MigrationReport {
            targets,
            error: error.map(str::to_string),
        };
        assert_eq!(run(vec![clean.clone()], None).exit_code(), 0);
        assert_eq!(run(vec![], None).exit_code(), 0);
        assert_eq!(run(vec![clean.clone(), failing.clone()], None).exit_code(), 1);
        assert_eq!(run(vec![failing], Some("read failed")).exit_code(), 2);
        assert_eq!(run(vec![clean, cancelled], None).exit_code(), 3);
    }

    #[test]
    fn serializes_as_json() -> anyhow::Result<()> {
        let mut report = RunReport::new("article", &["body".to_string()], true);
        report.record(
            &RowKey::from("7"),
            RowOutcome::Failed {
                reason: "boom".into(),
            },
        );
        let json = serde_json::to_value(&report)?;
        assert_eq!(json["failed_rows"][0]["key"], "7");
        assert_eq!(json["dry_run"], true);

        let back: RunReport = serde_json::from_value(json)?;
        assert_eq!(back, report);
        Ok(())
    }
}
