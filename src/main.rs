use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use fieldshift::{
    rewrite::report::EXIT_FATAL, CancelFlag, DbConfig, PgStore, Plan, ReportLog, RewriteError,
    RewriteOptions, RewriteRule, Rewriter, TargetSpec,
};
use std::path::PathBuf;
use tracing::{error, info, warn};
use tracing_subscriber::{fmt, EnvFilter};

#[derive(Parser)]
#[command(name = "fieldshift", version)]
#[command(about = "Rewrite substrings in text columns, row by row, keyed by primary key")]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Report what would change without writing anything
    #[arg(long, global = true)]
    dry_run: bool,

    /// Where run reports are kept
    #[arg(long, global = true, default_value = "reports")]
    report_dir: PathBuf,

    /// Only retry the rows that failed in each target's latest report
    #[arg(long, global = true)]
    retry_failed: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Execute every target in a YAML plan
    Run {
        #[arg(long)]
        plan: PathBuf,
    },
    /// Rewrite columns of a single table
    Rewrite {
        #[arg(long)]
        table: String,
        /// Column to rewrite (repeatable)
        #[arg(long = "column", required = true)]
        columns: Vec<String>,
        /// Rule as FROM=>TO, applied in the order given (repeatable)
        #[arg(long = "rule", required = true, value_parser = RewriteRule::parse)]
        rules: Vec<RewriteRule>,
    },
}

#[tokio::main]
async fn main() {
    // ─── 1) init logging ─────────────────────────────────────────────
    let env = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    fmt::Subscriber::builder()
        .with_env_filter(env)
        .with_writer(std::io::stderr)
        .with_span_events(fmt::format::FmtSpan::CLOSE)
        .init();

    let cli = Cli::parse();
    let code = match run(cli).await {
        Ok(code) => code,
        Err(e) => {
            error!("{:#}", e);
            EXIT_FATAL
        }
    };
    std::process::exit(code);
}

async fn run(cli: Cli) -> Result<i32> {
    // ─── 2) validate targets before touching the database ────────────
    let targets: Vec<TargetSpec> = match cli.command {
        Commands::Run { plan } => Plan::load(&plan)?.into_targets()?,
        Commands::Rewrite {
            table,
            columns,
            rules,
        } => vec![TargetSpec::new(&table, columns, rules)?],
    };
    info!("{} target(s) to process", targets.len());

    let log = ReportLog::new(&cli.report_dir)?;
    let mut options = RewriteOptions {
        dry_run: cli.dry_run,
        ..Default::default()
    };
    if cli.retry_failed {
        for target in &targets {
            let key = target.key();
            let keys = log
                .latest_failed_keys(&key)
                .with_context(|| format!("loading failed keys for {}", key))?;
            info!(target = %key, keys = keys.len(), "retrying failed rows");
            options.only_keys.insert(key, keys);
        }
    }

    // ─── 3) connect ──────────────────────────────────────────────────
    let config = DbConfig::from_env()?;
    let store = PgStore::connect(&config)
        .await
        .map_err(RewriteError::Connection)?;

    let cancel = CancelFlag::new();
    tokio::spawn({
        let cancel = cancel.clone();
        async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                warn!("interrupt received; stopping after the current row");
                cancel.cancel();
            }
        }
    });

    // ─── 4) rewrite, then always release the connection ──────────────
    let mut rewriter = Rewriter::new(store, options).with_cancel(cancel);
    let report = rewriter.run(&targets).await;
    rewriter.close().await;

    // ─── 5) persist and print the report ─────────────────────────────
    if !cli.dry_run {
        for r in &report.targets {
            match log.record(r) {
                Ok(path) => info!("wrote report {}", path.display()),
                Err(e) => error!("failed to write report for {}: {:#}", r.table, e),
            }
        }
    }
    println!(
        "{}",
        serde_json::to_string_pretty(&report).context("serializing report")?
    );

    Ok(report.exit_code())
}
