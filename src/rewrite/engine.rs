// src/rewrite/engine.rs

use crate::error::{RewriteError, StoreError};
use crate::rewrite::report::{MigrationReport, RowOutcome, RunReport};
use crate::rewrite::target::TargetSpec;
use crate::store::{ColumnChange, Row, RowKey, TableSchema, TableStore};
use std::borrow::Cow;
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, error, info, info_span, warn, Instrument};

/// Shared stop signal, checked between rows and between targets.
#[derive(Debug, Clone, Default)]
pub struct CancelFlag(Arc<AtomicBool>);

impl CancelFlag {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

#[derive(Debug, Clone, Default)]
pub struct RewriteOptions {
    /// Compute outcomes without issuing any update.
    pub dry_run: bool,
    /// Restrict each pass to these keys, per target (see
    /// [`TargetSpec::key`]). Targets without an entry are processed in full.
    pub only_keys: HashMap<String, HashSet<RowKey>>,
}

/// Runs Target Specs against a store it owns for the duration of the run.
pub struct Rewriter<S: TableStore> {
    store: S,
    options: RewriteOptions,
    cancel: CancelFlag,
}

impl<S: TableStore> Rewriter<S> {
    pub fn new(store: S, options: RewriteOptions) -> Self {
        Self {
            store,
            options,
            cancel: CancelFlag::new(),
        }
    }

    pub fn with_cancel(mut self, cancel: CancelFlag) -> Self {
        self.cancel = cancel;
        self
    }

    pub fn cancel_flag(&self) -> CancelFlag {
        self.cancel.clone()
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    pub fn store_mut(&mut self) -> &mut S {
        &mut self.store
    }

    /// Close the store and hand it back.
    pub async fn close(mut self) -> S {
        if let Err(e) = self.store.close().await {
            warn!("closing store failed: {}", e);
        }
        self.store
    }

    /// Execute targets in order. Every target is checked against the live
    /// table first, so an invalid target halts the run before any row is
    /// read. A fatal error during the passes halts the run too; the reports
    /// of targets finished before it are kept.
    pub async fn run(&mut self, targets: &[TargetSpec]) -> MigrationReport {
        let mut report = MigrationReport::default();

        let mut schemas = Vec::with_capacity(targets.len());
        for target in targets {
            match self.validate(target).await {
                Ok(schema) => schemas.push(schema),
                Err(e) => {
                    error!(table = %target.table, "run halted before any pass: {}", e);
                    report.error = Some(e.to_string());
                    return report;
                }
            }
        }

        for (target, schema) in targets.iter().zip(&schemas) {
            if self.cancel.is_cancelled() {
                warn!(table = %target.table, "cancelled before target");
                break;
            }
            match self.pass(target, schema).await {
                Ok(r) => {
                    let stop = r.cancelled;
                    report.targets.push(r);
                    if stop {
                        break;
                    }
                }
                Err(e) => {
                    error!(table = %target.table, "run halted: {}", e);
                    report.error = Some(e.to_string());
                    break;
                }
            }
        }
        report
    }

    /// One pass over one table.
    pub async fn rewrite(&mut self, target: &TargetSpec) -> Result<RunReport, RewriteError> {
        let schema = self.validate(target).await?;
        self.pass(target, &schema).await
    }

    async fn pass(
        &mut self,
        target: &TargetSpec,
        schema: &TableSchema,
    ) -> Result<RunReport, RewriteError> {
        let span = info_span!("rewrite", table = %target.table);
        self.pass_inner(target, schema).instrument(span).await
    }

    async fn pass_inner(
        &mut self,
        target: &TargetSpec,
        schema: &TableSchema,
    ) -> Result<RunReport, RewriteError> {
        let start = Instant::now();
        for hazard in target.rules.idempotence_hazards() {
            warn!(
                rule = hazard.rule,
                reintroduces = hazard.reintroduces,
                "rule output contains a match string; re-running will rewrite again"
            );
        }

        let snapshot = self
            .store
            .fetch_all(schema, &target.columns)
            .await
            .map_err(|source| RewriteError::Read {
                table: target.table.to_string(),
                source,
            })?;

        let only = self.options.only_keys.get(&target.key());
        let rows: Vec<Row> = match only {
            Some(keys) => snapshot
                .into_iter()
                .filter(|r| keys.contains(&r.key))
                .collect(),
            None => snapshot,
        };
        info!(rows = rows.len(), dry_run = self.options.dry_run, "snapshot loaded");

        let mut report = RunReport::new(
            target.table.to_string(),
            &target.columns,
            self.options.dry_run,
        );
        let total = rows.len();
        for (i, row) in rows.iter().enumerate() {
            if self.cancel.is_cancelled() {
                report.cancelled = true;
                report.not_attempted = total - i;
                warn!(not_attempted = report.not_attempted, "cancelled");
                break;
            }
            let outcome = self.process_row(target, schema, row).await;
            report.record(&row.key, outcome);
        }
        report.finish();

        info!(
            unchanged = report.unchanged,
            updated = report.updated,
            failed = report.failed,
            elapsed = ?start.elapsed(),
            "pass finished"
        );
        Ok(report)
    }

    /// Check the target against the live table before any row is read.
    async fn validate(&mut self, target: &TargetSpec) -> Result<TableSchema, RewriteError> {
        let schema = self
            .store
            .describe(&target.table)
            .await
            .map_err(|e| match e {
                StoreError::TableNotFound(_)
                | StoreError::ColumnNotFound { .. }
                | StoreError::PrimaryKey { .. } => {
                    RewriteError::invalid_target(target.table.to_string(), e.to_string())
                }
                source => RewriteError::Read {
                    table: target.table.to_string(),
                    source,
                },
            })?;

        for column in &target.columns {
            let info = schema.column(column).ok_or_else(|| {
                RewriteError::invalid_target(
                    target.table.to_string(),
                    format!("no column `{}`", column),
                )
            })?;
            if info.name == schema.primary_key.name {
                return Err(RewriteError::invalid_target(
                    target.table.to_string(),
                    format!("`{}` is the primary key and cannot be rewritten", column),
                ));
            }
            if !info.is_text {
                return Err(RewriteError::invalid_target(
                    target.table.to_string(),
                    format!("column `{}` has non-text type {}", column, info.type_name),
                ));
            }
        }
        Ok(schema)
    }

    async fn process_row(
        &mut self,
        target: &TargetSpec,
        schema: &TableSchema,
        row: &Row,
    ) -> RowOutcome {
        let mut changes = Vec::new();
        for column in &target.columns {
            let Some(Some(value)) = row.values.get(column) else {
                continue;
            };
            if let Cow::Owned(new_value) = target.rules.apply(value) {
                changes.push(ColumnChange {
                    column: column.clone(),
                    value: new_value,
                });
            }
        }

        if changes.is_empty() {
            return RowOutcome::Unchanged;
        }
        let columns: Vec<String> = changes.iter().map(|c| c.column.clone()).collect();

        if self.options.dry_run {
            debug!(key = %row.key, ?columns, "would update");
            return RowOutcome::Updated { columns };
        }

        match self.store.update(schema, &row.key, &changes).await {
            Ok(()) => {
                debug!(key = %row.key, ?columns, "updated");
                RowOutcome::Updated { columns }
            }
            Err(e) => {
                error!(key = %row.key, "update failed: {}", e);
                RowOutcome::Failed {
                    reason: e.to_string(),
                }
            }
        }
    }
}
