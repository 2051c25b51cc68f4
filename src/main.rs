use std::path::{Path, PathBuf};
use std::time::Duration;

use clap::{Parser, ValueEnum};
use tracing_subscriber::EnvFilter;

use procsched::config::{EngineConfig, MlfqConfig, Policy, Regime, SrtfPreemption};
use procsched::feed::LineFeed;
use procsched::metrics::{ContextSwitchTrace, CsvSink, JsonLinesSink};
use procsched::scheduler::{Engine, RunSummary};
use procsched::shutdown::install_shutdown_handler;
use procsched::worker::ProcessRunner;

#[derive(Parser, Debug)]
#[command(name = "procsched")]
#[command(version)]
#[command(about = "CPU scheduling simulator driving real processes")]
#[command(propagate_version = true)]
struct Args {
    #[command(subcommand)]
    command: Commands,
}

#[derive(clap::Subcommand, Debug)]
enum Commands {
    /// Schedule a fixed list of jobs known up front
    Offline(OfflineArgs),

    /// Schedule jobs read from stdin, one command per line, as they arrive
    Online(OnlineArgs),
}

// =============================================================================
// Shared Engine Arguments
// =============================================================================

#[derive(clap::Args, Debug)]
struct EngineArgs {
    /// Scheduling policy
    #[arg(long, short = 'p', value_enum, default_value = "fcfs")]
    policy: Policy,

    /// Quantum for round robin and SRTF, in milliseconds
    #[arg(long, default_value = "100")]
    quantum_ms: u64,

    /// MLFQ tier quanta in milliseconds, highest priority first
    #[arg(long, value_delimiter = ',', default_value = "100,200,300")]
    tier_quanta_ms: Vec<u64>,

    /// MLFQ priority boost interval in milliseconds
    #[arg(long, default_value = "1000")]
    boost_ms: u64,

    /// Poll interval while a job runs, in milliseconds
    #[arg(long, default_value = "1")]
    poll_ms: u64,

    /// Burst time assumed for commands with no history, in milliseconds
    #[arg(long, default_value = "1000")]
    default_estimate_ms: u64,

    /// SRTF: preempt the running job as soon as a shorter one arrives
    #[arg(long)]
    preempt_on_arrival: bool,

    /// Metrics file (default: result_<regime>_<POLICY>.csv or .jsonl)
    #[arg(long, short = 'o')]
    output: Option<PathBuf>,

    /// Metrics file format
    #[arg(long, default_value = "csv")]
    format: OutputFormat,

    /// Do not print the command|start|end context-switch trace on stdout
    #[arg(long)]
    no_trace: bool,
}

#[derive(Debug, Clone, ValueEnum)]
enum OutputFormat {
    Csv,
    Json,
}

#[derive(clap::Args, Debug)]
struct OfflineArgs {
    #[command(flatten)]
    engine: EngineArgs,

    /// File with one job per line; `<ms>:<command>` gives a known burst time
    #[arg(long)]
    jobs_file: Option<PathBuf>,

    /// Job commands, same syntax as the jobs file
    commands: Vec<String>,
}

#[derive(clap::Args, Debug)]
struct OnlineArgs {
    #[command(flatten)]
    engine: EngineArgs,
}

// =============================================================================
// Helper Functions
// =============================================================================

fn engine_config(args: &EngineArgs, regime: Regime) -> EngineConfig {
    let quanta = args
        .tier_quanta_ms
        .iter()
        .map(|&ms| Duration::from_millis(ms))
        .collect();
    let preemption = if args.preempt_on_arrival {
        SrtfPreemption::OnArrival
    } else {
        SrtfPreemption::Boundary
    };

    EngineConfig::new(args.policy, regime)
        .with_quantum(Duration::from_millis(args.quantum_ms))
        .with_mlfq(MlfqConfig::new(quanta, Duration::from_millis(args.boost_ms)))
        .with_srtf_preemption(preemption)
        .with_poll_interval(Duration::from_millis(args.poll_ms))
        .with_default_estimate(Duration::from_millis(args.default_estimate_ms))
}

fn default_output(regime: Regime, policy: Policy, format: &OutputFormat) -> PathBuf {
    let ext = match format {
        OutputFormat::Csv => "csv",
        OutputFormat::Json => "jsonl",
    };
    PathBuf::from(format!("result_{}_{}.{}", regime, policy.label(), ext))
}

/// Parse one job line. Blank lines and `#` comments yield `None`.
fn parse_job_line(line: &str) -> Option<(String, Option<Duration>)> {
    let line = line.trim();
    if line.is_empty() || line.starts_with('#') {
        return None;
    }
    if let Some((prefix, rest)) = line.split_once(':') {
        if let Ok(ms) = prefix.trim().parse::<u64>() {
            let command = rest.trim();
            if !command.is_empty() {
                return Some((command.to_string(), Some(Duration::from_millis(ms))));
            }
        }
    }
    Some((line.to_string(), None))
}

async fn read_jobs_file(path: &Path) -> Result<Vec<(String, Option<Duration>)>, std::io::Error> {
    let text = tokio::fs::read_to_string(path).await?;
    Ok(text.lines().filter_map(parse_job_line).collect())
}

fn build_engine(
    args: &EngineArgs,
    regime: Regime,
) -> Result<Engine<ProcessRunner>, Box<dyn std::error::Error>> {
    let config = engine_config(args, regime);
    let output = args
        .output
        .clone()
        .unwrap_or_else(|| default_output(regime, config.policy, &args.format));

    tracing::info!(
        policy = %config.policy,
        regime = %regime,
        quantum_ms = args.quantum_ms,
        tier_quanta_ms = ?args.tier_quanta_ms,
        boost_ms = args.boost_ms,
        output = %output.display(),
        "Starting procsched"
    );

    let mut engine = Engine::new(config, ProcessRunner::new())?;
    engine = match args.format {
        OutputFormat::Csv => engine.with_sink(CsvSink::create(&output)?),
        OutputFormat::Json => engine.with_sink(JsonLinesSink::create(&output)?),
    };
    if !args.no_trace {
        engine = engine.with_sink(ContextSwitchTrace::new(std::io::stdout()));
    }
    Ok(engine)
}

fn report(summary: &RunSummary) {
    let finished = summary.completions.iter().filter(|r| r.finished()).count();
    let errored = summary.completions.len() - finished;
    tracing::info!(
        finished,
        errored,
        pending = summary.pending.len(),
        dispatches = summary.dispatches.len(),
        boosts = summary.boosts,
        "Scheduling complete"
    );
}

// =============================================================================
// Command Handlers
// =============================================================================

async fn run_offline(args: OfflineArgs) -> Result<(), Box<dyn std::error::Error>> {
    let mut jobs = match &args.jobs_file {
        Some(path) => read_jobs_file(path).await?,
        None => Vec::new(),
    };
    jobs.extend(args.commands.iter().filter_map(|c| parse_job_line(c)));
    if jobs.is_empty() {
        return Err("no jobs given (pass commands or --jobs-file)".into());
    }

    let mut engine = build_engine(&args.engine, Regime::Offline)?;
    for (command, hint) in jobs {
        match hint {
            Some(burst) => engine.admit_with_estimate(command, burst)?,
            None => engine.admit(command)?,
        };
    }

    let summary = engine.run(install_shutdown_handler()).await?;
    report(&summary);
    Ok(())
}

async fn run_online(args: OnlineArgs) -> Result<(), Box<dyn std::error::Error>> {
    let mut engine = build_engine(&args.engine, Regime::Online)?.with_feed(LineFeed::stdin()?);
    let summary = engine.run(install_shutdown_handler()).await?;
    report(&summary);
    Ok(())
}

// =============================================================================
// Main Entry Point
// =============================================================================

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();

    // Logs go to stderr; stdout carries the context-switch trace
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    match args.command {
        Commands::Offline(offline) => run_offline(offline).await?,
        Commands::Online(online) => run_online(online).await?,
    }

    Ok(())
}
