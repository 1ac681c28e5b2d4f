//! taskweave command line runner
//!
//! Runs one workflow file to completion with the local executor and
//! prints the workflow output.

use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Context};
use clap::Parser;
use tokio::sync::broadcast::error::RecvError;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use taskweave_engine::{
    config::{DatabaseConfig, EngineConfig, StoreKind},
    db::{models::WorkflowState, MemoryStore, PgStore, Store},
    engine::{Engine, StartParams},
    executor::LocalExecutor,
    spec::{parse_workflow_file, JsonMap},
};

#[derive(Parser)]
#[command(name = "taskweave")]
#[command(version, about = "Run a taskweave workflow", long_about = None)]
struct Cli {
    /// Workflow definition (YAML)
    #[arg(value_name = "WORKFLOW")]
    workflow: PathBuf,

    /// Workflow input as a JSON object
    #[arg(long, value_name = "JSON")]
    input: Option<String>,

    /// Single input value, repeatable (value parsed as JSON, else a string)
    #[arg(long = "set", value_name = "KEY=VALUE")]
    variables: Vec<String>,

    /// Run only this task and the tasks it requires
    #[arg(short = 't', long)]
    target: Option<String>,

    /// Workflow files that tasks may call as sub-workflows
    #[arg(short = 'l', long = "library", value_name = "FILE")]
    libraries: Vec<PathBuf>,

    /// Give up after this many seconds
    #[arg(long, value_name = "SECS")]
    timeout: Option<u64>,

    /// Return sample results instead of running actions
    #[arg(long)]
    dry_run: bool,
}

/// Initialize tracing/logging.
fn init_tracing(json: bool) {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| "info,taskweave_engine=debug".into());
    let registry = tracing_subscriber::registry().with(filter);
    if json {
        registry
            .with(tracing_subscriber::fmt::layer().json().with_writer(std::io::stderr))
            .init();
    } else {
        registry
            .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
            .init();
    }
}

/// Merge `--input` and `--set` into one input map.
fn build_input(input: Option<&str>, variables: &[String]) -> anyhow::Result<JsonMap> {
    let mut map = match input {
        Some(raw) => match serde_json::from_str(raw).context("--input is not valid JSON")? {
            serde_json::Value::Object(map) => map,
            _ => bail!("--input must be a JSON object"),
        },
        None => JsonMap::new(),
    };
    for var in variables {
        let Some((key, value)) = var.split_once('=') else {
            bail!("invalid --set '{}', expected KEY=VALUE", var);
        };
        let value = serde_json::from_str(value)
            .unwrap_or_else(|_| serde_json::Value::String(value.to_string()));
        map.insert(key.to_string(), value);
    }
    Ok(map)
}

async fn open_store(config: &EngineConfig) -> anyhow::Result<Arc<dyn Store>> {
    match config.store {
        StoreKind::Memory => Ok(Arc::new(MemoryStore::new())),
        StoreKind::Postgres => {
            let db_config = DatabaseConfig::from_env().unwrap_or_else(|e| {
                tracing::warn!(error = %e, "Failed to load database config, using defaults");
                DatabaseConfig::default()
            });
            let store = PgStore::connect(&db_config).await?;
            store.init_schema().await?;
            Ok(Arc::new(store))
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<ExitCode> {
    // Load environment variables from .env file if present
    dotenvy::dotenv().ok();

    let cli = Cli::parse();

    let mut config = EngineConfig::from_env().unwrap_or_else(|e| {
        eprintln!("Failed to load engine config, using defaults: {}", e);
        EngineConfig::default()
    });
    config.dry_run |= cli.dry_run;

    init_tracing(config.log_json);

    tracing::info!(
        version = env!("CARGO_PKG_VERSION"),
        store = ?config.store,
        dry_run = config.dry_run,
        "Starting taskweave"
    );

    let input = build_input(cli.input.as_deref(), &cli.variables)?;
    let spec = parse_workflow_file(&cli.workflow)?;

    let registry = Arc::new(taskweave_actions::create_default_registry());
    let (executor, completions) = LocalExecutor::new(registry.clone(), &config);
    let store = open_store(&config).await?;
    let engine = Arc::new(Engine::new(store, Arc::new(executor), registry, config));

    for library in &cli.libraries {
        engine.register_workflow(parse_workflow_file(library)?).await?;
    }

    let mut events = engine.subscribe();
    engine.clone().start(completions).await?;

    let params = StartParams {
        task_name: cli.target,
        env: JsonMap::new(),
    };
    let wf = engine.start_workflow_execution(spec, input, params).await?;
    tracing::info!(workflow_execution_id = %wf.id, workflow = %wf.name, "Workflow started");

    let wait = async {
        loop {
            match events.recv().await {
                Ok(event) if event.workflow_execution_id == wf.id && event.state.is_terminal() => {
                    return Ok::<_, anyhow::Error>(event.state);
                }
                Ok(_) => {}
                Err(RecvError::Lagged(skipped)) => {
                    tracing::debug!(skipped, "Event receiver lagged, polling state");
                    let state = engine.get_workflow_execution_state(wf.id).await?;
                    if state.is_terminal() {
                        return Ok(state);
                    }
                }
                Err(RecvError::Closed) => bail!("engine event channel closed"),
            }
        }
    };

    let state = match cli.timeout {
        Some(secs) => tokio::time::timeout(Duration::from_secs(secs), wait)
            .await
            .with_context(|| format!("workflow did not finish within {} seconds", secs))??,
        None => wait.await?,
    };

    let finished = engine.get_workflow_execution(wf.id).await?;
    println!(
        "{}",
        serde_json::to_string_pretty(&serde_json::Value::Object(finished.output))?
    );

    match state {
        WorkflowState::Success => Ok(ExitCode::SUCCESS),
        state => {
            tracing::error!(
                workflow_execution_id = %wf.id,
                %state,
                info = finished.state_info.as_deref().unwrap_or(""),
                "Workflow did not succeed"
            );
            Ok(ExitCode::FAILURE)
        }
    }
}
