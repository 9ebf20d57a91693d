//! # cascade-cli
//!
//! Thin command-line runner for cascade workflow graphs.
//!
//! Exit codes: 0 on success, 1 on runtime failure, 2 on invalid arguments
//! (clap's default).

use anyhow::{anyhow, Context};
use cascade_checkpoint::{CheckpointStore, FileCheckpointStore, InMemoryCheckpointStore};
use cascade_core::engine::{ExecutionEngine, RunConfig, RunInput, RunOutcome};
use cascade_core::graph::compile::compile_file;
use cascade_core::prompt::TemplatePromptExecutor;
use cascade_core::viz::to_mermaid;
use clap::{Parser, Subcommand};
use llm::ClientCache;
use serde_json::{Map, Value};
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "cascade")]
#[command(about = "Run declarative LLM workflow graphs", long_about = None)]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run a workflow graph
    Run {
        /// Path to the graph YAML file
        graph: PathBuf,

        /// Input variables, repeatable: --var topic=rust
        #[arg(long = "var", value_name = "KEY=VALUE")]
        vars: Vec<String>,

        /// Thread id for checkpointing and resume
        #[arg(long)]
        thread: Option<String>,

        /// Total timeout in seconds
        #[arg(long)]
        timeout: Option<u64>,

        /// Maximum supersteps for this run
        #[arg(long)]
        recursion_limit: Option<u64>,

        /// Resume a suspended run with this value (JSON or raw string)
        #[arg(long)]
        resume: Option<String>,

        /// Default LLM provider (overrides CASCADE_DEFAULT_PROVIDER)
        #[arg(long, env = "CASCADE_DEFAULT_PROVIDER")]
        provider: Option<String>,
    },

    /// Validate a graph without running it
    Validate {
        /// Path to the graph YAML file
        graph: PathBuf,
    },

    /// Print a graph as a Mermaid flowchart
    Graph {
        /// Path to the graph YAML file
        graph: PathBuf,
    },
}

fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    match run(cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            eprintln!("error: {:#}", err);
            ExitCode::FAILURE
        }
    }
}

fn run(cli: Cli) -> anyhow::Result<()> {
    match cli.command {
        Commands::Run {
            graph,
            vars,
            thread,
            timeout,
            recursion_limit,
            resume,
            provider,
        } => {
            let runtime = tokio::runtime::Runtime::new().context("building tokio runtime")?;
            runtime.block_on(run_graph(
                graph,
                vars,
                thread,
                timeout,
                recursion_limit,
                resume,
                provider,
            ))
        }
        Commands::Validate { graph } => {
            cascade_core::config::load(&graph)?;
            println!("ok: {}", graph.display());
            Ok(())
        }
        Commands::Graph { graph } => {
            let compiled = compile_file(&graph)?;
            println!("{}", to_mermaid(&compiled));
            Ok(())
        }
    }
}

#[allow(clippy::too_many_arguments)]
async fn run_graph(
    graph_path: PathBuf,
    vars: Vec<String>,
    thread: Option<String>,
    timeout: Option<u64>,
    recursion_limit: Option<u64>,
    resume: Option<String>,
    provider: Option<String>,
) -> anyhow::Result<()> {
    let config = cascade_core::config::load(&graph_path)?;
    let checkpointer = build_checkpointer(&config)?;
    let data = cascade_core::config::load_data_files(&config)?;

    let mut cache = ClientCache::new();
    if let Some(provider) = provider {
        cache = cache.with_default_provider(provider);
    }
    let mut prompts = TemplatePromptExecutor::new(Arc::new(cache)).with_defaults(
        config.defaults.provider.clone(),
        config.defaults.model.clone(),
    );
    if let Some(prompt_dir) = &config.defaults.prompt_dir {
        prompts = prompts.with_default_dir(cascade_core::config::resolve_path(&config, prompt_dir));
    }

    let compiled = cascade_core::graph::compile(config, data)?;
    let mut engine =
        ExecutionEngine::new(compiled).with_prompt_executor(Arc::new(prompts));
    if let Some(store) = checkpointer {
        engine = engine.with_checkpointer(store);
    }

    let run = RunConfig {
        thread_id: thread,
        recursion_limit,
        timeout: timeout.map(Duration::from_secs),
    };

    let input = match resume {
        Some(raw) => RunInput::Resume(parse_value(&raw)),
        None => RunInput::Values(parse_vars(&vars)?),
    };

    match engine.invoke(input, &run).await {
        Ok(RunOutcome::Completed { state }) => {
            println!("{}", serde_json::to_string_pretty(&state)?);
            Ok(())
        }
        Ok(RunOutcome::Interrupted { state, payload }) => {
            eprintln!("suspended: {}", payload);
            println!("{}", serde_json::to_string_pretty(&state)?);
            Ok(())
        }
        Err(err) => {
            eprintln!(
                "partial state: {}",
                serde_json::to_string_pretty(&err.state).unwrap_or_default()
            );
            Err(anyhow!(err.error))
        }
    }
}

fn build_checkpointer(
    config: &cascade_core::WorkflowConfig,
) -> anyhow::Result<Option<Arc<dyn CheckpointStore>>> {
    let Some(settings) = &config.checkpointer else {
        return Ok(None);
    };

    let store: Arc<dyn CheckpointStore> = match settings.kind.as_str() {
        "memory" => Arc::new(InMemoryCheckpointStore::new()),
        "file" => {
            let path = settings
                .path
                .as_ref()
                .ok_or_else(|| anyhow!("checkpointer.path is required for the file backend"))?;
            let root = cascade_core::config::resolve_path(config, path);
            Arc::new(FileCheckpointStore::new(root)?)
        }
        other => return Err(anyhow!("unknown checkpointer backend '{}'", other)),
    };
    Ok(Some(store))
}

/// Parse repeated `--var key=value` flags into an input object.
fn parse_vars(vars: &[String]) -> anyhow::Result<Value> {
    let mut map = Map::new();
    for var in vars {
        let (key, raw) = var
            .split_once('=')
            .ok_or_else(|| anyhow!("--var expects KEY=VALUE, got '{}'", var))?;
        map.insert(key.to_string(), parse_value(raw));
    }
    Ok(Value::Object(map))
}

// Values parse as JSON when they can, and fall back to plain strings:
// --var count=3 is a number, --var topic=rust a string.
fn parse_value(raw: &str) -> Value {
    serde_json::from_str(raw).unwrap_or_else(|_| Value::String(raw.to_string()))
}
