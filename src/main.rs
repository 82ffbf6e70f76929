use std::fs::{self, File};
use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};
use clap::Parser;
use serde_json::Value;
use tracing::info;

use nmap_relay_rs::config::PipelineConfig;
use nmap_relay_rs::history::read_history;
use nmap_relay_rs::pipeline::{ItemResult, Pipeline};
use nmap_relay_rs::runner::ProcessRunner;
use nmap_relay_rs::types::{OutputFormat, ScanMode, ScanRequest};
use nmap_relay_rs::{logging, scripts, server};

/// nmap-relay-rs — run nmap presets with timeouts, unreachable-host retry and XML summaries.
#[derive(Debug, Clone, Parser)]
#[command(
    name = "nmap-relay-rs",
    version,
    about = "Run nmap presets with timeouts, unreachable-host retry, XML summaries and an append-only history.",
    long_about = None
)]
struct Cli {
    /// Host, IP or subnet to scan. Ignored when --input is given.
    #[arg(long)]
    target: Option<String>,

    /// Scan preset: quick, full, version-detect, os-detect, script-set, custom-flags.
    #[arg(long, default_value = "quick")]
    mode: String,

    /// Comma-separated NSE script names for script-set mode.
    #[arg(long)]
    scripts: Option<String>,

    /// File of NSE script names (one per line or comma separated).
    #[arg(long = "scripts-file")]
    scripts_file: Option<PathBuf>,

    /// Raw scanner flags for custom-flags mode, passed through unvalidated.
    #[arg(long = "custom-flags", default_value = "", allow_hyphen_values = true)]
    custom_flags: String,

    /// Output encoding requested from the scanner: text, xml or greppable.
    #[arg(long, default_value = "text")]
    format: String,

    /// Wall-clock limit per scanner invocation, in seconds.
    #[arg(long = "timeout", default_value_t = 300)]
    timeout_secs: u64,

    /// Scanner binary to execute.
    #[arg(long, default_value = "nmap")]
    binary: String,

    /// Summarize XML output into status, address, open ports and script findings.
    #[arg(long, default_value_t = false)]
    summarize: bool,

    /// Do not append this run to the history file.
    #[arg(long = "no-history", default_value_t = false)]
    no_history: bool,

    /// JSON file holding one scan request object or an array of them.
    #[arg(long)]
    input: Option<PathBuf>,

    /// Write results as a pretty JSON array to this path instead of JSON lines on stdout.
    #[arg(long)]
    output: Option<PathBuf>,

    /// Pipeline config file (JSON).
    #[arg(long)]
    config: Option<PathBuf>,

    /// History file path; overrides the config value.
    #[arg(long)]
    history: Option<PathBuf>,

    /// Print the recorded history as JSON lines and exit.
    #[arg(long = "show-history", default_value_t = false)]
    show_history: bool,

    /// Serve the scan API on this address (e.g. 127.0.0.1:8080) instead of scanning.
    #[arg(long)]
    serve: Option<String>,

    /// Increase log verbosity (-v info, -vv debug, -vvv trace).
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    logging::init(cli.verbose);

    let mut config = PipelineConfig::load_or_default(cli.config.as_deref())?;
    if let Some(path) = &cli.history {
        config.history_path = path.clone();
    }

    if cli.show_history {
        for record in read_history(&config.history_path)? {
            println!("{}", serde_json::to_string(&record)?);
        }
        return Ok(());
    }

    let pipeline = Pipeline::new(ProcessRunner, &config)?;

    if let Some(bind) = cli.serve.as_deref() {
        tokio::select! {
            res = server::spawn_server(bind, pipeline) => res?,
            _ = tokio::signal::ctrl_c() => info!("shutting down"),
        }
        return Ok(());
    }

    let requests = load_requests(&cli)?;
    info!(items = requests.len(), history = %config.history_path.display(), "processing batch");
    let results = pipeline.process_batch(&requests).await;

    let failed = results.iter().filter(|r| !r.outcome.is_success()).count();
    info!(total = results.len(), failed, "batch finished");

    match cli.output.as_deref() {
        Some(path) => {
            write_results_json(path, &results)?;
            eprintln!("Wrote {} results to {}", results.len(), path.display());
        }
        None => {
            for result in &results {
                println!("{}", result.to_json());
            }
        }
    }
    Ok(())
}

fn load_requests(cli: &Cli) -> Result<Vec<ScanRequest>> {
    if let Some(path) = cli.input.as_deref() {
        return load_requests_from_path(path);
    }

    let Some(target) = cli.target.as_deref() else {
        bail!("nothing to scan: pass --target or --input");
    };

    let mut script_names = match cli.scripts.as_deref() {
        Some(s) => scripts::parse_scripts_str(s)?,
        None => Vec::new(),
    };
    if let Some(path) = cli.scripts_file.as_deref() {
        for name in scripts::load_scripts_from_path(path)? {
            if !script_names.contains(&name) {
                script_names.push(name);
            }
        }
    }

    let mode = ScanMode::from_name(&cli.mode, script_names, cli.custom_flags.clone())?;
    let mut request = ScanRequest::new(target, mode);
    request.output_format = cli.format.parse::<OutputFormat>()?;
    request.timeout_seconds = cli.timeout_secs;
    request.binary_path = cli.binary.clone();
    request.auto_summarize = cli.summarize;
    request.persist_history = !cli.no_history;
    Ok(vec![request])
}

fn load_requests_from_path(path: &Path) -> Result<Vec<ScanRequest>> {
    let content = fs::read_to_string(path)
        .with_context(|| format!("failed to read input file: {}", path.display()))?;
    let value: Value = serde_json::from_str(&content)
        .with_context(|| format!("input file is not valid JSON: {}", path.display()))?;
    let requests = match value {
        Value::Array(_) => serde_json::from_value::<Vec<ScanRequest>>(value),
        other => serde_json::from_value::<ScanRequest>(other).map(|r| vec![r]),
    }
    .with_context(|| format!("invalid scan request in {}", path.display()))?;
    Ok(requests)
}

fn write_results_json(path: &Path, results: &[ItemResult]) -> Result<()> {
    let file = File::create(path)
        .with_context(|| format!("failed to create output file: {}", path.display()))?;
    let values: Vec<Value> = results.iter().map(ItemResult::to_json).collect();
    serde_json::to_writer_pretty(file, &values)?;
    Ok(())
}
