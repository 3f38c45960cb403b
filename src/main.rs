//! Cadence CLI - deterministic music pipeline runner

use std::path::{Path, PathBuf};
use std::sync::Arc;

use clap::{Args, Parser, Subcommand};
use colored::Colorize;
use serde_json::{json, Value};
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use cadence::ast::Stage;
use cadence::error::{CadenceError, FixSuggestion};
use cadence::event::{list_traces, read_trace};
use cadence::retrieval::{export_citations, pinned_retrieve, Source};
use cadence::skill::mock::demo_registry;
use cadence::util::TRACE_DIR;
use cadence::{
    derive_seed, hash_artifact, EngineConfig, EventLog, InMemoryRunStore, Manifest, Orchestrator,
    RunRequest, TraceWriter,
};

#[derive(Parser)]
#[command(name = "cadence")]
#[command(about = "Cadence - deterministic workflow orchestration for music generation")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run a manifest with the demo skills
    Run(RunArgs),

    /// Validate a manifest (parse + load-time checks only)
    Validate {
        /// Path to the manifest YAML
        file: PathBuf,
    },

    /// Print the content hash of a file
    Hash {
        file: PathBuf,

        /// Parse the file as JSON and hash its canonical form
        #[arg(long)]
        json: bool,
    },

    /// Print the seed derived for a node index
    Seed {
        #[arg(allow_negative_numbers = true)]
        base: i64,
        #[arg(allow_negative_numbers = true)]
        index: i64,
    },

    /// Pinned retrieval over a JSON corpus (array of sources)
    Retrieve {
        corpus: PathBuf,

        /// Previously pinned content hash (repeatable)
        #[arg(long = "pin")]
        pins: Vec<String>,

        /// Defaults to `default_top_k` from the config
        #[arg(long)]
        top_k: Option<usize>,

        /// Informational only, never used for ranking
        #[arg(long, default_value = "")]
        query: String,
    },

    /// Inspect NDJSON run traces
    Trace {
        #[command(subcommand)]
        action: TraceAction,
    },
}

#[derive(Args)]
struct RunArgs {
    /// Path to the manifest YAML
    file: PathBuf,

    #[arg(long, default_value_t = 0)]
    seed: i64,

    #[arg(long, default_value = "cli")]
    subject: String,

    #[arg(long)]
    run_id: Option<String>,

    /// JSON file with the run inputs
    #[arg(long)]
    inputs: Option<PathBuf>,

    /// Enable a feature flag (repeatable)
    #[arg(long = "flag")]
    flags: Vec<String>,

    /// complete | fail
    #[arg(long)]
    on_fix_exhausted: Option<String>,

    /// Repairs the demo validator needs before it passes
    #[arg(long, default_value_t = 1)]
    pass_after: u32,

    /// Config file (default: ~/.config/cadence/config.toml)
    #[arg(long)]
    config: Option<PathBuf>,

    /// Write the event trace to .cadence/traces/<run_id>.ndjson
    #[arg(long)]
    trace: bool,

    /// Print the run summary as JSON
    #[arg(long)]
    json: bool,
}

#[derive(Subcommand)]
enum TraceAction {
    /// List recorded traces, newest first
    List {
        #[arg(long, default_value = TRACE_DIR)]
        dir: PathBuf,
    },
    /// Print the events of one run
    Show {
        run_id: String,
        #[arg(long, default_value = TRACE_DIR)]
        dir: PathBuf,
    },
}

#[tokio::main]
async fn main() {
    // Logs go to stderr so stdout stays machine-readable
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive(tracing::Level::INFO.into()),
        )
        .init();

    let cli = Cli::parse();

    let result = match cli.command {
        Commands::Run(args) => run_manifest(args).await,
        Commands::Validate { file } => validate_manifest(&file),
        Commands::Hash { file, json } => hash_file(&file, json),
        Commands::Seed { base, index } => derive_seed(base, index).map(|seed| println!("{}", seed)),
        Commands::Retrieve {
            corpus,
            pins,
            top_k,
            query,
        } => retrieve(&corpus, &pins, top_k, &query),
        Commands::Trace { action } => trace(action),
    };

    if let Err(e) = result {
        eprintln!("{} {}", "Error:".red().bold(), e);
        if let Some(suggestion) = e.fix_suggestion() {
            eprintln!("  {} {}", "Fix:".yellow(), suggestion);
        }
        std::process::exit(1);
    }
}

async fn run_manifest(args: RunArgs) -> Result<(), CadenceError> {
    let yaml = tokio::fs::read_to_string(&args.file).await?;
    let manifest = Manifest::from_yaml(&yaml)?;

    let config = match &args.config {
        Some(path) => EngineConfig::load_from(path)?,
        None => EngineConfig::load()?,
    }
    .with_env()?;

    let inputs: Value = match &args.inputs {
        Some(path) => serde_json::from_str(&tokio::fs::read_to_string(path).await?)?,
        None => json!({}),
    };

    let run_id = args.run_id.unwrap_or_else(|| Uuid::new_v4().to_string());
    let mut request = RunRequest::new(args.subject, args.seed)
        .with_run_id(run_id.as_str())
        .with_inputs(inputs);
    for flag in args.flags {
        request = request.with_flag(flag, true);
    }
    if let Some(policy) = args.on_fix_exhausted {
        request = request.with_exhaustion_policy(policy.parse()?);
    }

    // Opened before the run so a bad run id is rejected up front
    let writer = if args.trace {
        Some(TraceWriter::new(&run_id)?)
    } else {
        None
    };

    if !args.json {
        println!(
            "{} Running '{}' | run: {} | seed: {}",
            "→".cyan(),
            manifest.name.as_deref().unwrap_or("(unnamed)").cyan().bold(),
            run_id.cyan(),
            args.seed
        );
    }

    let log = EventLog::new();
    let orchestrator = Orchestrator::new(
        demo_registry(args.pass_after),
        Arc::new(InMemoryRunStore::new()),
        Arc::new(log.clone()),
        config,
    );

    let cancel = CancellationToken::new();
    let on_ctrl_c = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            on_ctrl_c.cancel();
        }
    });

    let result = orchestrator
        .run_with_cancel(&manifest, request, cancel)
        .await;

    // The trace is written for failed runs too; the run's own error wins
    let traced = match &writer {
        Some(writer) => writer.write_all(&log).and_then(|()| writer.close()),
        None => Ok(()),
    };
    match (&writer, &traced) {
        (Some(writer), Ok(())) if !args.json => {
            println!("{} Trace: {}", "→".cyan(), writer.path().display());
        }
        (_, Err(e)) if result.is_err() => tracing::warn!(error = %e, "trace not written"),
        _ => {}
    }

    let summary = result?;
    if args.json {
        println!("{}", serde_json::to_string_pretty(&summary)?);
        return traced;
    }

    println!(
        "{} Run {} {} in {}ms ({} executions)",
        "✓".green(),
        summary.run_id,
        summary.status.as_str().green().bold(),
        summary.duration_ms,
        summary.executed
    );
    let exhausted = if summary.fix_exhausted {
        " (exhausted)".yellow().to_string()
    } else {
        String::new()
    };
    println!("  Fix iterations: {}{}", summary.fix_iterations, exhausted);
    if let Some(scores) = summary.scores() {
        println!("  Scores: {}", Value::Object(scores.clone()));
    }
    println!("  Outputs: {}", summary.outputs.keys().cloned().collect::<Vec<_>>().join(", "));

    traced
}

fn validate_manifest(file: &Path) -> Result<(), CadenceError> {
    let manifest = Manifest::from_path(file)?;

    println!("{} Manifest '{}' is valid", "✓".green(), file.display());
    println!("  Name: {}", manifest.name.as_deref().unwrap_or("(unnamed)"));
    println!("  Nodes: {}", manifest.len());
    println!("  Validator: {}", manifest.validator);
    for stage in manifest.stages() {
        match stage {
            Stage::Single(node) if node.is_fix_loop() => {
                println!("    {} (fix loop)", node.id)
            }
            Stage::Single(node) => println!("    {}", node.id),
            Stage::Parallel { group, nodes } => {
                let ids: Vec<&str> = nodes.iter().map(|n| &*n.id).collect();
                println!("    [{}] {}", group, ids.join(" | "));
            }
        }
    }
    println!("  Hash: {}", manifest.content_hash());

    Ok(())
}

fn hash_file(file: &Path, as_json: bool) -> Result<(), CadenceError> {
    let bytes = std::fs::read(file)?;
    let digest = if as_json {
        let value: Value = serde_json::from_slice(&bytes)?;
        hash_artifact(&value)
    } else {
        hash_artifact(bytes.as_slice())
    };
    println!("{}", digest);
    Ok(())
}

fn retrieve(
    corpus: &Path,
    pins: &[String],
    top_k: Option<usize>,
    query: &str,
) -> Result<(), CadenceError> {
    let top_k = match top_k {
        Some(k) => k,
        None => EngineConfig::load()?.default_top_k,
    };
    let sources: Vec<Source> = serde_json::from_str(&std::fs::read_to_string(corpus)?)?;
    let result = pinned_retrieve(query, &sources, pins, top_k);

    for hash in &result.missing {
        eprintln!("{} pinned hash no longer resolves: {}", "Drift:".yellow(), hash);
    }

    let output = json!({
        "chunks": result.chunks,
        "missing": result.missing,
        "citations": export_citations(&result.chunks),
    });
    println!("{}", serde_json::to_string_pretty(&output)?);
    Ok(())
}

fn trace(action: TraceAction) -> Result<(), CadenceError> {
    match action {
        TraceAction::List { dir } => {
            let traces = list_traces(&dir)?;
            if traces.is_empty() {
                println!("No traces in {}", dir.display());
            }
            for info in traces {
                println!("{}  {} bytes", info.run_id, info.size_bytes);
            }
        }
        TraceAction::Show { run_id, dir } => {
            for event in read_trace(&dir, &run_id)? {
                println!(
                    "{:>4} {:>8}ms {}",
                    event.id,
                    event.timestamp_ms,
                    serde_json::to_string(&event.kind)?
                );
            }
        }
    }
    Ok(())
}
