//! CLI binary for running and checking munger jobs.

mod config;
mod csv_io;

use std::path::{Path, PathBuf};

use anyhow::Context as _;
use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;
use munger_pipeline::{default_registry, lint, HookRouter, Munger, Severity};
use munger_types::FunctionKind;

use crate::config::JobConfig;
use crate::csv_io::{read_records, CsvSink};

#[derive(Parser)]
#[command(name = "munger", version, about = "Filter, coerce, validate and route CSV records")]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Run a job over its input file
    Run {
        /// Path to the job .json file
        job: PathBuf,

        /// Input CSV (overrides the job's `source`)
        #[arg(short, long)]
        input: Option<PathBuf>,
    },

    /// Check a job's schema and hooks without reading any records
    Check {
        /// Path to the job .json file
        job: PathBuf,
    },

    /// List the built-in coercions and predicates
    Functions,
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // Setup tracing; RUST_LOG wins over --verbose, stdout is reserved for the run summary
    let filter = if cli.verbose { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter)))
        .with_writer(std::io::stderr)
        .init();

    match cli.command {
        Commands::Run { job, input } => {
            cmd_run(&job, input)?;
        }
        Commands::Check { job } => {
            cmd_check(&job)?;
        }
        Commands::Functions => {
            cmd_functions();
        }
    }

    Ok(())
}

fn cmd_run(path: &Path, input: Option<PathBuf>) -> anyhow::Result<()> {
    let job = JobConfig::load(path)?;
    let source = input
        .or_else(|| job.source.clone())
        .context("no input file: pass --input or set `source` in the job")?;

    let munger = Munger::builder()
        .spec(job.pipeline.clone())
        .on_write_error(job.on_write_error)
        .build()?;
    job.check_destinations(munger.router().destinations())?;
    for id in job.destinations.keys() {
        if !munger.router().destinations().contains(&id.as_str()) {
            tracing::warn!(destination = %id, "Destination is configured but no hook routes to it");
        }
    }

    let mut sink = CsvSink::new(job.resolve_destinations(Some(source.as_path()))?);
    let records = read_records(&source)?;
    let summary = munger.try_run(records, &mut sink)?;

    tracing::info!("{summary}");
    println!("{}", serde_json::to_string_pretty(&summary)?);
    Ok(())
}

fn cmd_check(path: &Path) -> anyhow::Result<()> {
    let job = JobConfig::load(path)?;
    let registry = default_registry();

    let mut problems: Vec<(Severity, &str, String)> = Vec::new();
    if job.pipeline.schema.is_empty() {
        problems.push((Severity::Error, "no_stages", "no stage is configured".to_string()));
    }
    for issue in lint(&job.pipeline.schema, &registry) {
        problems.push((issue.severity, issue.code, issue.message));
    }
    match HookRouter::from_specs(&job.pipeline.hooks) {
        Ok(router) => {
            if let Err(e) = job.check_destinations(router.destinations()) {
                problems.push((Severity::Error, "undeclared_destination", e.to_string()));
            }
        }
        Err(e) => problems.push((Severity::Error, "invalid_hook", e.to_string())),
    }
    for (id, dest) in &job.destinations {
        if let Err(e) = dest.resolve(id, job.source.as_deref().or(Some(Path::new("input.csv")))) {
            problems.push((Severity::Error, "bad_destination", e.to_string()));
        }
    }

    if problems.is_empty() {
        println!("Job is valid");
        return Ok(());
    }

    let mut has_error = false;
    for (severity, code, message) in &problems {
        if *severity == Severity::Error {
            has_error = true;
        }
        println!("[{}] {}: {}", severity, code, message);
    }

    if has_error {
        std::process::exit(1);
    }
    Ok(())
}

fn cmd_functions() {
    let registry = default_registry();
    for (title, kind) in [("Coercions", FunctionKind::Coercion), ("Predicates", FunctionKind::Predicate)] {
        println!("{title}:");
        for name in registry.names(kind) {
            println!("  {name}");
        }
    }
}
