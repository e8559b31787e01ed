pub mod config;
pub mod error;
pub mod history;
pub mod rewrite;
pub mod store;

pub use config::{DbConfig, Plan};
pub use error::{RewriteError, StoreError};
pub use history::ReportLog;
pub use rewrite::{
    CancelFlag, MigrationReport, RewriteOptions, RewriteRule, Rewriter, RowOutcome, RuleSet,
    RunReport, TargetSpec,
};
pub use store::{MemoryStore, PgStore, TableStore};
