pub mod engine;
pub mod report;
pub mod rules;
pub mod target;

pub use engine::{CancelFlag, RewriteOptions, Rewriter};
pub use report::{FailedRow, MigrationReport, RowOutcome, RunReport};
pub use rules::{RewriteRule, RuleSet};
pub use target::{TableName, TargetDef, TargetSpec};
