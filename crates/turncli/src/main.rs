// crates/turncli/src/main.rs

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing_subscriber::EnvFilter;
use turncore::{ContextSnapshot, ExecutionEvent, FlowError, Node, Step, Workflow};
use turnruntime::lock::{LockStore, SqliteLockStore};
use turnruntime::planner::{dropped_order_ids, has_edge_cycle, plan};
use turnruntime::{RuntimeConfig, TurnRuntime};

#[derive(Parser)]
#[command(name = "turn")]
#[command(about = "Run workflows as exclusive turns", long_about = None)]
struct Cli {
    /// Runtime configuration file (TOML)
    #[arg(long, global = true, env = "TURN_CONFIG")]
    config: Option<PathBuf>,

    /// SQLite file holding turn locks
    #[arg(long, global = true, env = "TURN_LOCK_DB")]
    lock_db: Option<PathBuf>,

    /// Show debug output
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run a workflow file as one turn
    Run {
        /// Path to workflow JSON file
        #[arg(short, long)]
        file: PathBuf,

        /// Turn key; defaults to the workflow id
        #[arg(short, long)]
        key: Option<String>,

        /// Initial shared context as a JSON object
        #[arg(short, long)]
        input: Option<String>,

        /// Override how long to wait for a busy key
        #[arg(long)]
        wait_timeout_ms: Option<u64>,
    },

    /// Show how a workflow file would be executed
    Plan {
        /// Path to workflow JSON file
        file: PathBuf,
    },

    /// Validate a workflow file
    Validate {
        /// Path to workflow JSON file
        file: PathBuf,
    },

    /// List built-in node types
    Nodes,

    /// Create a new example workflow
    Init {
        /// Output file path
        #[arg(short, long, default_value = "workflow.json")]
        output: PathBuf,

        /// Write a two-agent cyclic workflow instead of a DAG
        #[arg(long)]
        cyclic: bool,
    },

    /// Inspect or clear turn locks
    Locks {
        #[command(subcommand)]
        command: LockCommands,
    },
}

#[derive(Subcommand)]
enum LockCommands {
    /// List held locks
    List,
    /// Force-release the lock for a key
    Clear { key: String },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    let mut config = match &cli.config {
        Some(path) => RuntimeConfig::from_toml_file(path)
            .with_context(|| format!("Failed to load config {}", path.display()))?,
        None => RuntimeConfig::default(),
    };
    if cli.lock_db.is_some() {
        config.lock_db = cli.lock_db.clone();
    }

    match cli.command {
        Commands::Run {
            file,
            key,
            input,
            wait_timeout_ms,
        } => {
            if let Some(ms) = wait_timeout_ms {
                config.gate.wait_timeout_ms = ms;
            }
            run_workflow(config, file, key, input).await?;
        }

        Commands::Plan { file } => {
            let workflow = load_workflow(&file)?;
            println!("{}", serde_json::to_string_pretty(&plan(&workflow))?);
        }

        Commands::Validate { file } => {
            validate_workflow(&file)?;
        }

        Commands::Nodes => {
            list_nodes();
        }

        Commands::Init { output, cyclic } => {
            create_example_workflow(output, cyclic)?;
        }

        Commands::Locks { command } => {
            manage_locks(&config, command)?;
        }
    }

    Ok(())
}

fn init_logging(verbose: bool) {
    let default = if verbose { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default)))
        .with_writer(std::io::stderr)
        .init();
}

fn load_workflow(file: &Path) -> Result<Workflow> {
    let workflow_json = std::fs::read_to_string(file)
        .with_context(|| format!("Failed to read {}", file.display()))?;
    let workflow: Workflow = serde_json::from_str(&workflow_json)
        .with_context(|| format!("Failed to parse {}", file.display()))?;
    Ok(workflow)
}

fn parse_input(input: Option<String>) -> Result<Option<ContextSnapshot>> {
    let Some(input_str) = input else {
        return Ok(None);
    };
    match serde_json::from_str::<serde_json::Value>(&input_str)? {
        serde_json::Value::Object(obj) => Ok(Some(obj.into_iter().collect())),
        _ => Err(anyhow::anyhow!("Input must be a JSON object")),
    }
}

async fn run_workflow(
    config: RuntimeConfig,
    file: PathBuf,
    key: Option<String>,
    input: Option<String>,
) -> Result<()> {
    println!("🚀 Loading workflow from: {}", file.display());

    let workflow = load_workflow(&file)?;
    let initial_context = parse_input(input)?;
    let key = key.unwrap_or_else(|| workflow.id.clone());

    println!("📋 Workflow: {}", workflow.name.as_deref().unwrap_or(&workflow.id));
    println!("   Nodes: {}", workflow.nodes.len());
    println!("   Edges: {}", workflow.edges.len());
    println!("   Turn key: {}", key);
    println!();

    let runtime = TurnRuntime::from_config(config, turnnodes::builtin_handlers())?;

    // Subscribe to events for real-time output
    let mut events = runtime.subscribe_events();
    let event_task = tokio::spawn(async move {
        while let Ok(event) = events.recv().await {
            match event {
                ExecutionEvent::LockAcquired { key, waited_ms, .. } => {
                    println!("🔒 Acquired turn '{}' after {}ms", key, waited_ms);
                }
                ExecutionEvent::LockReleased { key, .. } => {
                    println!("🔓 Released turn '{}'", key);
                }
                ExecutionEvent::RunStarted { mode, .. } => {
                    println!("▶️  Run started ({} mode)", mode);
                }
                ExecutionEvent::LevelStarted { level, node_ids, .. } => {
                    println!("  ▸ Level {}: {}", level, node_ids.join(", "));
                }
                ExecutionEvent::RoundStarted { round, .. } => {
                    println!("  ↻ Round {}", round);
                }
                ExecutionEvent::NodeStarted { node_id, node_type, .. } => {
                    println!("  ⚡ Starting node: {} ({})", node_id, node_type);
                }
                ExecutionEvent::NodeCompleted { node_id, duration_ms, .. } => {
                    println!("  ✅ Node {} completed in {}ms", node_id, duration_ms);
                }
                ExecutionEvent::NodeFailed { node_id, error, .. } => {
                    println!("  ❌ Node {} failed: {}", node_id, error);
                }
                ExecutionEvent::RunCompleted { success, duration_ms, .. } => {
                    if success {
                        println!("✨ Run completed successfully in {}ms", duration_ms);
                    } else {
                        println!("💥 Run failed after {}ms", duration_ms);
                    }
                }
            }
        }
    });

    let result = runtime.run_turn(&key, &workflow, initial_context).await;

    // Wait for events to finish printing
    tokio::time::sleep(tokio::time::Duration::from_millis(100)).await;
    event_task.abort();

    let outcome = match result {
        Ok(outcome) => outcome,
        Err(FlowError::Lock(e)) if e.is_timeout() => {
            println!("⏳ Another turn for '{}' is still running", key);
            return Err(e.into());
        }
        Err(e) => return Err(e.into()),
    };

    println!();
    println!("📤 Outcome:");
    println!("{}", serde_json::to_string_pretty(&outcome)?);

    Ok(())
}

fn validate_workflow(file: &Path) -> Result<()> {
    println!("🔍 Validating workflow: {}", file.display());

    let workflow = load_workflow(file)?;
    let handlers = turnnodes::builtin_handlers();
    let execution = plan(&workflow);

    println!("✅ Workflow parsed:");
    println!("   Id: {}", workflow.id);
    println!("   Nodes: {}", workflow.nodes.len());
    println!("   Edges: {}", workflow.edges.len());
    println!("   Mode: {}", execution.mode.name());

    let mut warnings = Vec::new();
    for node in &workflow.nodes {
        if !handlers.contains(&node.node_type) {
            warnings.push(format!(
                "node '{}' has type '{}' with no built-in handler",
                node.id, node.node_type
            ));
        }
    }
    for id in dropped_order_ids(&workflow) {
        warnings.push(format!("executionOrder names unknown node '{}' (ignored)", id));
    }
    if workflow.round_limit().is_none() && has_edge_cycle(&workflow) {
        warnings.push("edges form a cycle but maxRounds is not set; running as a DAG".to_string());
    }

    if warnings.is_empty() {
        println!("   No warnings");
    } else {
        for warning in warnings {
            println!("   ⚠️  {}", warning);
        }
    }

    Ok(())
}

fn list_nodes() {
    println!("📦 Available Node Types:");
    println!();

    let handlers = turnnodes::builtin_handlers();
    for node_type in handlers.list_node_types() {
        if let Some(metadata) = handlers.get_metadata(&node_type) {
            println!("  • {} ({})", node_type, metadata.category);
            println!("    {}", metadata.description);
        } else {
            println!("  • {}", node_type);
        }
    }
}

fn create_example_workflow(output: PathBuf, cyclic: bool) -> Result<()> {
    let workflow = if cyclic {
        let mut workflow = Workflow::new("example-debate")
            .with_name("Two agents taking turns")
            .with_max_rounds(3);
        workflow.add_node(
            Node::new("agent-a", "transform.template")
                .with_parameter("template", "A (round {{__round}}) replies to: {{__output_agent-b}}")
                .with_position(100.0, 100.0),
        );
        workflow.add_node(
            Node::new("agent-b", "transform.template")
                .with_parameter("template", "B (round {{__round}}) replies to: {{__output_agent-a}}")
                .with_position(300.0, 100.0),
        );
        workflow.connect("agent-a", "agent-b");
        workflow.connect("agent-b", "agent-a");
        workflow
    } else {
        let mut workflow = Workflow::new("example-fanout").with_name("Fan-out example");
        workflow.add_node(
            Node::new("start", "debug.log")
                .with_parameter("message", "starting")
                .with_position(100.0, 100.0),
        );
        workflow.add_node(
            Node::new("remember", "context.set")
                .with_parameter("key", "topic")
                .with_parameter("value", "rust")
                .with_position(300.0, 50.0),
        );
        workflow.add_node(
            Node::new("pause", "time.delay")
                .with_parameter("delay_ms", 200)
                .with_position(300.0, 150.0),
        );
        workflow.add_node(
            Node::new("summary", "transform.template")
                .with_parameter("template", "{{__output_start}} / topic: {{topic}}")
                .with_position(500.0, 100.0),
        );
        workflow.with_execution_order(vec![
            Step::node("start"),
            Step::parallel(["remember", "pause"]),
            Step::node("summary"),
        ])
    };

    let json = serde_json::to_string_pretty(&workflow)?;
    std::fs::write(&output, json)?;

    println!("✨ Created example workflow: {}", output.display());
    println!();
    println!("Run it with:");
    println!("  turn run --file {} --input '{{\"user\": \"hello\"}}'", output.display());

    Ok(())
}

fn manage_locks(config: &RuntimeConfig, command: LockCommands) -> Result<()> {
    let path = config
        .lock_db
        .as_ref()
        .context("No lock database configured (use --lock-db or TURN_LOCK_DB)")?;
    let store: Arc<dyn LockStore> = Arc::new(SqliteLockStore::open(path)?);

    match command {
        LockCommands::List => {
            let records = store.list()?;
            if records.is_empty() {
                println!("No turns in progress");
            }
            let now = chrono::Utc::now();
            for record in records {
                let age = record.age(now);
                let stale = record.is_stale(now, config.gate.stale_after());
                println!(
                    "  • {}: held for {}s{}",
                    record.key,
                    age.as_secs(),
                    if stale { " (stale)" } else { "" }
                );
            }
        }
        LockCommands::Clear { key } => {
            if store.release(&key)? {
                println!("🔓 Cleared lock for '{}'", key);
            } else {
                println!("No lock held for '{}'", key);
            }
        }
    }

    Ok(())
}
