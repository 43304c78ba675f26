// crates/chatflow-cli/src/main.rs

use anyhow::{bail, Context, Result};
use chatflow_core::{ExecutionEvent, FlowDefinition, NodeEvent, NodeSpec, Value};
use chatflow_nodes::{OpenAiChatModel, OpenAiConfig};
use chatflow_runtime::{
    EngineConfig, ExecutionResult, FlowRuntime, NodeRegistry, RunOptions, Transcript,
};
use clap::{Args, Parser, Subcommand};
use futures::StreamExt;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast::error::RecvError;
use tokio::sync::broadcast::Receiver;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "chatflow")]
#[command(about = "Chat flow engine CLI", long_about = None)]
struct Cli {
    /// Show debug logging
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Execute a flow file
    Run {
        /// Path to flow JSON file
        #[arg(short, long)]
        file: PathBuf,

        /// Input data as a JSON object
        #[arg(short, long)]
        input: Option<String>,

        /// Shorthand for an input holding just the user message
        #[arg(short, long, conflicts_with = "input")]
        message: Option<String>,

        /// Relay the first streaming node's output as it is produced
        #[arg(long)]
        stream: bool,

        /// Start at this node instead of the first entry node
        #[arg(long)]
        start: Option<String>,

        /// Run budget in seconds, overriding the config
        #[arg(long)]
        timeout: Option<u64>,

        #[arg(long)]
        max_parallel: Option<usize>,

        /// Engine config JSON file
        #[arg(long)]
        config: Option<PathBuf>,

        #[command(flatten)]
        llm: LlmArgs,
    },

    /// Validate a flow file against the built-in node types
    Validate {
        /// Path to flow JSON file
        file: PathBuf,

        #[command(flatten)]
        llm: LlmArgs,
    },

    /// List available node types
    Nodes {
        #[command(flatten)]
        llm: LlmArgs,
    },

    /// Create a new example flow
    Init {
        /// Output file path
        #[arg(short, long, default_value = "flow.json")]
        output: PathBuf,
    },
}

/// Chat model connection. The model nodes are only available when a base
/// URL is given.
#[derive(Args)]
struct LlmArgs {
    #[arg(long, env = "CHATFLOW_LLM_BASE_URL")]
    llm_base_url: Option<String>,

    #[arg(long, env = "CHATFLOW_LLM_API_KEY", hide_env_values = true)]
    llm_api_key: Option<String>,

    #[arg(long, env = "CHATFLOW_LLM_MODEL", default_value = "gpt-4o-mini")]
    llm_model: String,
}

impl LlmArgs {
    fn registry(&self) -> NodeRegistry {
        let mut registry = NodeRegistry::new();
        chatflow_nodes::register_all(&mut registry);

        if let Some(base_url) = &self.llm_base_url {
            let model = OpenAiChatModel::new(OpenAiConfig {
                base_url: base_url.clone(),
                api_key: self.llm_api_key.clone(),
                model: self.llm_model.clone(),
            });
            chatflow_nodes::register_model_nodes(&mut registry, Arc::new(model));
        } else {
            tracing::debug!("no chat model configured, agents and intent_classification unavailable");
        }

        registry
    }
}

fn init_logging(verbose: bool) {
    let default = if verbose { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    match cli.command {
        Commands::Run {
            file,
            input,
            message,
            stream,
            start,
            timeout,
            max_parallel,
            config,
            llm,
        } => {
            let mut engine = match config {
                Some(path) => {
                    let json = std::fs::read_to_string(&path)
                        .with_context(|| format!("reading config {}", path.display()))?;
                    EngineConfig::from_json(&json).context("parsing engine config")?
                }
                None => EngineConfig::default(),
            };
            if let Some(seconds) = timeout {
                engine.execution_timeout = seconds;
            }
            if let Some(limit) = max_parallel {
                engine.max_parallel_nodes = limit;
            }

            let input = parse_input(input, message, &engine.default_slot)?;
            let mut options = RunOptions::new();
            if let Some(node_id) = start {
                options = options.start_at(node_id);
            }

            let runtime = FlowRuntime::with_registry(Arc::new(llm.registry()), engine);
            let flow = load_flow(&file)?;
            run_flow(&runtime, &flow, input, options, stream).await?;
        }

        Commands::Validate { file, llm } => {
            validate_flow(&file, llm.registry())?;
        }

        Commands::Nodes { llm } => {
            list_nodes(&llm.registry());
        }

        Commands::Init { output } => {
            create_example_flow(&output)?;
        }
    }

    Ok(())
}

fn load_flow(file: &Path) -> Result<FlowDefinition> {
    let json = std::fs::read_to_string(file)
        .with_context(|| format!("reading flow {}", file.display()))?;
    Ok(FlowDefinition::parse(&json)?)
}

fn parse_input(input: Option<String>, message: Option<String>, slot: &str) -> Result<Value> {
    if let Some(message) = message {
        let mut input = serde_json::Map::new();
        input.insert(slot.to_string(), Value::String(message));
        return Ok(Value::Object(input));
    }

    match input {
        Some(text) => {
            let json: Value = serde_json::from_str(&text).context("parsing --input")?;
            if !json.is_object() {
                bail!("Input must be a JSON object");
            }
            Ok(json)
        }
        None => Ok(Value::Object(serde_json::Map::new())),
    }
}

async fn run_flow(
    runtime: &FlowRuntime,
    flow: &FlowDefinition,
    input: Value,
    options: RunOptions,
    stream: bool,
) -> Result<()> {
    println!("📋 Flow: {}", flow.name.as_deref().unwrap_or(&flow.id));
    println!("   Nodes: {}", flow.nodes.len());
    println!("   Edges: {}", flow.edges.len());
    println!();

    let event_task = tokio::spawn(relay_events(runtime.subscribe_events(), print_event));

    let result = if stream {
        let mut chunks = runtime.stream_execute(flow, input, options).await?;
        println!("💬 Streaming:");
        while let Some(chunk) = chunks.next().await {
            match chunk {
                Ok(chunk) => {
                    let mut transcript = Transcript::new();
                    transcript.push(&chunk);
                    print!("{}", transcript.text());
                }
                Err(e) => eprintln!("\n  ❌ stream error: {}", e),
            }
        }
        println!();
        chunks.finish().await?
    } else {
        runtime.execute(flow, input, options).await
    };

    // Let the listener catch up before printing the summary
    tokio::time::sleep(Duration::from_millis(100)).await;
    event_task.abort();

    print_summary(&result)?;
    if !result.success {
        bail!("flow failed");
    }
    Ok(())
}

/// Hand every event to `sink` until the bus closes. Events the receiver fell
/// behind on are skipped.
async fn relay_events(mut events: Receiver<ExecutionEvent>, mut sink: impl FnMut(ExecutionEvent)) {
    loop {
        match events.recv().await {
            Ok(event) => sink(event),
            Err(RecvError::Lagged(skipped)) => {
                tracing::debug!("progress printer fell behind, {} event(s) dropped", skipped);
            }
            Err(RecvError::Closed) => break,
        }
    }
}

fn print_event(event: ExecutionEvent) {
    match event {
        ExecutionEvent::WorkflowStarted { streaming, .. } => {
            let mode = if streaming { " (streaming)" } else { "" };
            println!("▶️  Flow started{}", mode);
        }
        ExecutionEvent::NodeStarted {
            node_id, node_type, ..
        } => {
            println!("  ⚡ Starting node: {} ({})", node_id, node_type);
        }
        ExecutionEvent::NodeCompleted {
            node_id,
            duration_ms,
            ..
        } => {
            println!("  ✅ Node {} completed in {}ms", node_id, duration_ms);
        }
        ExecutionEvent::NodeFailed { node_id, error, .. } => {
            println!("  ❌ Node {} failed: {}", node_id, error);
        }
        ExecutionEvent::NodeSkipped {
            node_id, reason, ..
        } => {
            println!("  ⏭️  Node {} skipped: {}", node_id, reason);
        }
        ExecutionEvent::NodeEvent { node_id, event, .. } => match event {
            NodeEvent::Info { message } => {
                println!("     ℹ️  [{}] {}", node_id, message);
            }
            NodeEvent::Warning { message } => {
                println!("     ⚠️  [{}] {}", node_id, message);
            }
        },
        ExecutionEvent::WorkflowCompleted {
            success,
            duration_ms,
            ..
        } => {
            if success {
                println!("✨ Flow completed successfully in {}ms", duration_ms);
            } else {
                println!("💥 Flow failed after {}ms", duration_ms);
            }
        }
        ExecutionEvent::StreamChunk { .. } => {}
    }
}

fn print_summary(result: &ExecutionResult) -> Result<()> {
    println!();
    println!("📊 Execution Summary:");
    println!("   Execution ID: {}", result.execution_id);
    println!("   Executed: {}", result.executed_nodes().join(" → "));
    if let Some(error) = &result.error {
        println!("   Error: {}", error);
    }
    println!();
    println!("📤 Output:");
    println!("{}", serde_json::to_string_pretty(&result.final_output)?);
    Ok(())
}

fn validate_flow(file: &Path, registry: NodeRegistry) -> Result<()> {
    println!("🔍 Validating flow: {}", file.display());

    let flow = load_flow(file)?;
    let runtime = FlowRuntime::with_registry(Arc::new(registry), EngineConfig::default());
    let summary = runtime.summary(&flow);

    println!("   Name: {}", summary.name.as_deref().unwrap_or("-"));
    println!("   Nodes: {}", summary.node_count);
    println!("   Edges: {}", summary.edge_count);
    println!("   Entry nodes: {}", summary.entry_nodes.join(", "));

    if summary.is_runnable() {
        println!("✅ Flow is valid");
        Ok(())
    } else {
        for problem in &summary.problems {
            println!("   ❌ {}", problem);
        }
        bail!("{} problem(s) found", summary.problems.len())
    }
}

fn list_nodes(registry: &NodeRegistry) {
    println!("📦 Available Node Types:");
    println!();

    for node_type in registry.list_node_types() {
        if let Some(metadata) = registry.get_metadata(&node_type) {
            let streaming = if metadata.streaming { ", streaming" } else { "" };
            println!("  • {} ({}{})", node_type, metadata.category, streaming);
            println!("    {}", metadata.description);
        } else {
            println!("  • {}", node_type);
        }
    }
}

fn create_example_flow(output: &Path) -> Result<()> {
    let mut flow = FlowDefinition::new("Example triage flow");

    flow.add_node(NodeSpec::new("entry", "restful").with_label("Incoming message"));
    flow.add_node(
        NodeSpec::new("is_refund", "condition")
            .with_label("Mentions a refund?")
            .with_config("conditionField", "last_message")
            .with_config("conditionOperator", "contains")
            .with_config("conditionValue", "refund"),
    );
    flow.add_node(
        NodeSpec::new("refund", "function")
            .with_label("Refund reply")
            .with_config("template", "A refund request was filed for: {{ last_message }}"),
    );
    flow.add_node(
        NodeSpec::new("other", "function")
            .with_label("Default reply")
            .with_config("template", "Thanks, we received: {{ last_message }}"),
    );
    flow.add_node(NodeSpec::new("exit", "exit"));

    flow.connect("entry", "is_refund");
    flow.connect_branch("is_refund", "refund", true);
    flow.connect_branch("is_refund", "other", false);
    flow.connect("refund", "exit");
    flow.connect("other", "exit");

    let json = serde_json::to_string_pretty(&flow)?;
    std::fs::write(output, json)?;

    println!("✨ Created example flow: {}", output.display());
    println!();
    println!("Run it with:");
    println!(
        "  chatflow run --file {} --message 'I want a refund'",
        output.display()
    );

    Ok(())
}
