use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use owo_colors::OwoColorize;
use tracing_subscriber::EnvFilter;

mod config;
mod discover;

use config::{Config, EngineEntry};
use crosscheck::progress::human_duration;
use crosscheck::runner::{RunOptions, RunSummary, DEFAULT_CONCURRENCY};
use crosscheck::{CliEngine, Engine, Orchestrator};

#[derive(Parser, Debug)]
#[command(name = "crosscheck")]
#[command(version = "0.1.0")]
#[command(about = "Check SQL compatibility between two database engines")]
#[command(long_about = "crosscheck runs the same SQL cases against a reference and a \
candidate engine and compares their results.

Each case is a directory under the SQL root containing a check.sql (shared \
comparison queries) and optional setup.sql/action.sql scripts, either shared \
or per engine:

  sql/order/check.sql
  sql/order/databend/setup.sql
  sql/order/snowflake/setup.sql

Engines are configured in crosscheck.toml or via flags. The process exits \
non-zero when any case has a failed statement.")]
struct Args {
    /// Directory containing the SQL cases
    #[arg(long, default_value = "sql", value_name = "DIR")]
    sql_dir: PathBuf,

    /// Config file with engine definitions
    #[arg(long, default_value = "crosscheck.toml", value_name = "FILE")]
    config: PathBuf,

    /// Database name, overriding the configured one for both engines
    #[arg(long, value_name = "NAME")]
    database: Option<String>,

    /// Run only these cases (repeatable)
    #[arg(long = "case", value_name = "NAME")]
    cases: Vec<String>,

    /// Skip these cases (repeatable, in addition to the config skip-list)
    #[arg(long = "skip", value_name = "NAME")]
    skip: Vec<String>,

    /// Skip setup and action phases, only run comparison queries
    #[arg(long)]
    check_only: bool,

    /// Drop and recreate each engine's working database before running
    #[arg(long)]
    setup: bool,

    /// Worker-pool width for statements inside one group
    #[arg(long, value_name = "N")]
    concurrency: Option<usize>,

    /// Per-statement timeout in seconds (0 = no limit)
    #[arg(long, value_name = "SECS")]
    timeout: Option<u64>,

    /// Suspend/resume warehouses before every comparison query
    #[arg(long)]
    cold: bool,

    /// Write a plain-text result file
    #[arg(long, value_name = "FILE")]
    output: Option<PathBuf>,

    /// Force colored output on or off (default: auto-detect)
    #[arg(long, value_name = "WHEN", value_parser = ["auto", "always", "never"], default_value = "auto")]
    color: String,
}

fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let config = Config::load(&args.config)?;
    let colorize = match args.color.as_str() {
        "always" => true,
        "never" => false,
        _ => atty::is(atty::Stream::Stdout),
    };

    let timeout = args
        .timeout
        .or(Some(config.run.timeout_seconds).filter(|&t| t > 0))
        .filter(|&t| t > 0)
        .map(Duration::from_secs);

    let reference = build_engine(
        config.engines.reference.as_ref(),
        default_reference(),
        args.database.as_deref(),
        timeout,
    )?;
    let candidate = build_engine(
        config.engines.candidate.as_ref(),
        default_candidate(),
        args.database.as_deref(),
        timeout,
    )?;

    let mut cases = discover::discover_cases(&args.sql_dir, reference.name(), candidate.name())?;
    if !args.cases.is_empty() {
        cases.retain(|c| args.cases.contains(&c.name));
        anyhow::ensure!(!cases.is_empty(), "no cases match the --case filter");
    }

    if args.setup {
        for engine in [&reference, &candidate] {
            crosscheck::engine::setup_database(engine, &engine.config().database)?;
        }
    }

    let mut skip = config.run.skip.clone();
    skip.extend(args.skip.iter().cloned());

    let options = RunOptions {
        concurrency: args
            .concurrency
            .or(config.run.concurrency)
            .unwrap_or(DEFAULT_CONCURRENCY),
        check_only: args.check_only,
        skip,
        cold_runs: args.cold,
    };

    let orchestrator = Orchestrator::new(Arc::new(reference), Arc::new(candidate), options)?;
    let summary = orchestrator.run(&cases);

    print_summary(&summary, colorize);

    if let Some(output) = &args.output {
        crosscheck::report::write_report(output, &summary)?;
        eprintln!("results written to {}", output.display());
    }

    if !summary.is_success() {
        std::process::exit(1);
    }
    Ok(())
}

/// The conventional reference engine when none is configured.
fn default_reference() -> EngineEntry {
    EngineEntry {
        name: Some("snowflake".to_string()),
        kind: "snowsql".to_string(),
        program: None,
        database: None,
        warehouse: Some("COMPUTE_WH".to_string()),
    }
}

/// The conventional candidate engine when none is configured.
fn default_candidate() -> EngineEntry {
    EngineEntry {
        name: Some("databend".to_string()),
        kind: "bendsql".to_string(),
        program: None,
        database: None,
        warehouse: None,
    }
}

fn build_engine(
    entry: Option<&EngineEntry>,
    fallback: EngineEntry,
    database_override: Option<&str>,
    timeout: Option<Duration>,
) -> anyhow::Result<CliEngine> {
    let entry = entry.cloned().unwrap_or(fallback);
    let config = entry.to_engine_config(database_override, timeout)?;
    Ok(CliEngine::new(config))
}

fn print_summary(summary: &RunSummary, colorize: bool) {
    for case in &summary.cases {
        let status = if case.skipped {
            "SKIP".to_string()
        } else if let Some(reason) = &case.aborted {
            format!("ABORTED ({reason})")
        } else if case.is_failed() {
            format!("FAIL ({} of {} statements)", case.failed, case.total)
        } else {
            format!("OK ({} statements, {} unsuitable)", case.total, case.unsuitable)
        };
        let line = format!(
            "{:<24} {} [{}]",
            case.case,
            status,
            human_duration(case.elapsed)
        );
        if !colorize {
            println!("{line}");
        } else if case.is_failed() {
            println!("{}", line.bright_red());
        } else if case.skipped {
            println!("{}", line.bright_black());
        } else {
            println!("{}", line.bright_green());
        }

        for result in &case.results {
            if result.outcome.is_fail() {
                println!("  [{}] {}: {}", result.statement_id, result.outcome, result.sql);
                for (engine, message) in &result.engine_errors {
                    println!("    {engine}: {message}");
                }
                if let Some(detail) = &result.diff_detail {
                    for line in detail.lines() {
                        println!("    {line}");
                    }
                }
            }
        }
    }

    let verdict = format!(
        "{} cases, {} failed, {} elapsed",
        summary.cases.len(),
        summary.failed_cases(),
        human_duration(summary.elapsed)
    );
    if !colorize {
        println!("{verdict}");
    } else if summary.is_success() {
        println!("{}", verdict.bright_green());
    } else {
        println!("{}", verdict.bright_red());
    }
}
