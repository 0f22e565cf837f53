// crates/keelcli/src/main.rs

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use keelcore::{StatusFilter, TaskEvent, TaskSpec, WorkflowEvent, WorkflowStatus};
use keelruntime::{EngineConfig, WorkflowEngine, WorkflowHandle};
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "keel")]
#[command(about = "Keel durable workflow CLI", long_about = None)]
struct Cli {
    /// Path to the workflow registry
    #[arg(long, global = true, env = "KEEL_DB", default_value = "keel.redb")]
    db: PathBuf,

    /// Show verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Submit a workflow and wait for it to finish
    Submit {
        /// Task type to run (see `keel tasks`)
        #[arg(short, long)]
        task: String,

        /// Task arguments as a JSON string
        #[arg(short, long)]
        args: Option<String>,

        /// Workflow ID; generated when omitted
        #[arg(long)]
        id: Option<String>,
    },

    /// Print the status of a workflow
    Status { id: String },

    /// Print the full record of a workflow as JSON
    Show { id: String },

    /// List workflows, optionally filtered by status
    List {
        /// Status to include; repeat for several
        #[arg(short, long = "status", value_parser = parse_status)]
        statuses: Vec<WorkflowStatus>,
    },

    /// Resume a FAILED or CANCELED workflow and wait for it
    Resume { id: String },

    /// Resume every CANCELED (and optionally FAILED) workflow
    ResumeAll {
        #[arg(long)]
        include_failed: bool,
    },

    /// Resume workflows left RUNNING by a process that exited
    Recover,

    /// Cancel a RUNNING workflow
    Cancel { id: String },

    /// List available task types
    Tasks,
}

fn parse_status(label: &str) -> std::result::Result<WorkflowStatus, String> {
    label.parse().map_err(|e: keelcore::EngineError| e.to_string())
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let level = if cli.verbose { "debug" } else { "warn" };
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level)))
        .init();

    if let Commands::Tasks = cli.command {
        list_tasks();
        return Ok(());
    }

    let engine = WorkflowEngine::open(EngineConfig::durable(&cli.db), keeltasks::builtin_registry())
        .await
        .with_context(|| format!("failed to open registry {}", cli.db.display()))?;
    tracing::debug!("Opened registry {}", cli.db.display());

    match cli.command {
        Commands::Submit { task, args, id } => submit(&engine, task, args, id).await?,
        Commands::Status { id } => {
            let status = engine.get_status(&id).await?;
            if status.is_terminal() {
                println!("{}", status);
            } else {
                println!("{} (not executing here; `keel recover` resumes it)", status);
            }
        }
        Commands::Show { id } => {
            let record = engine.get_metadata(&id).await?;
            println!("{}", serde_json::to_string_pretty(&record)?);
        }
        Commands::List { statuses } => list(&engine, statuses).await?,
        Commands::Resume { id } => {
            println!("🔁 Resuming workflow {}", id);
            let handle = engine.resume(&id).await?;
            follow(&engine, vec![handle]).await?;
        }
        Commands::ResumeAll { include_failed } => {
            let resumed = engine.resume_all(include_failed).await?;
            println!("🔁 Resuming {} workflows", resumed.len());
            follow(&engine, resumed.into_iter().map(|(_, handle)| handle).collect()).await?;
        }
        Commands::Recover => {
            let recovered = engine.recover_stale().await?;
            println!("🩹 Recovering {} workflows", recovered.len());
            follow(&engine, recovered.into_iter().map(|(_, handle)| handle).collect()).await?;
        }
        Commands::Cancel { id } => {
            engine.cancel(&id).await?;
            println!("🛑 Workflow {} canceled", id);
        }
        Commands::Tasks => {}
    }

    Ok(())
}

async fn submit(engine: &WorkflowEngine, task: String, args: Option<String>, id: Option<String>) -> Result<()> {
    let mut spec = TaskSpec::new(task);
    if let Some(args) = args {
        let args: serde_json::Value = serde_json::from_str(&args).context("--args must be valid JSON")?;
        spec = spec.with_args(args);
    }

    let handle = match id {
        Some(id) => engine.submit(id, spec).await?,
        None => engine.submit_auto(spec).await?,
    };
    println!("🚀 Submitted workflow {}", handle.workflow_id());

    follow(engine, vec![handle]).await
}

/// Print events until every handle has an outcome. Ctrl-C leaves the
/// workflows RUNNING so a later `resume` can pick them up.
async fn follow(engine: &WorkflowEngine, handles: Vec<WorkflowHandle>) -> Result<()> {
    let mut events = engine.subscribe_events();
    let event_task = tokio::spawn(async move {
        while let Ok(event) = events.recv().await {
            print_event(&event);
        }
    });

    let waiting = async {
        for handle in &handles {
            match handle.wait().await {
                Ok(value) => println!("✨ {} -> {}", handle.workflow_id(), value),
                Err(e) => println!("💥 {}: {}", handle.workflow_id(), e),
            }
        }
    };

    tokio::select! {
        _ = waiting => {}
        _ = tokio::signal::ctrl_c() => {
            println!();
            println!("⏸️  Interrupted; workflows stay RUNNING and can be resumed");
            engine.shutdown().await;
        }
    }

    // Let the last events print
    tokio::time::sleep(tokio::time::Duration::from_millis(50)).await;
    event_task.abort();
    Ok(())
}

fn print_event(event: &WorkflowEvent) {
    match event {
        WorkflowEvent::Submitted { .. } => {}
        WorkflowEvent::StatusChanged {
            workflow_id,
            from,
            to,
            attempt,
            ..
        } => match from {
            Some(from) => println!("  ⚡ {} {} -> {} (attempt {})", workflow_id, from, to, attempt),
            None => println!("  ⚡ {} {} (attempt {})", workflow_id, to, attempt),
        },
        WorkflowEvent::OutcomeDiscarded { workflow_id, run_id, .. } => {
            println!("  🗑️  {} discarded outcome of run {}", workflow_id, run_id);
        }
        WorkflowEvent::Task {
            workflow_id, event, ..
        } => match event {
            TaskEvent::Info { message } => println!("     ℹ️  [{}] {}", workflow_id, message),
            TaskEvent::Warning { message } => println!("     ⚠️  [{}] {}", workflow_id, message),
            TaskEvent::Progress { percent, message } => match message {
                Some(msg) => println!("     📊 [{}] {}% - {}", workflow_id, percent, msg),
                None => println!("     📊 [{}] {}%", workflow_id, percent),
            },
            TaskEvent::Retrying { try_number, error } => {
                println!("     🔁 [{}] try {} failed: {}", workflow_id, try_number, error)
            }
        },
    }
}

async fn list(engine: &WorkflowEngine, statuses: Vec<WorkflowStatus>) -> Result<()> {
    let workflows = engine.list_all(StatusFilter::from(statuses)).await?;
    if workflows.is_empty() {
        println!("No workflows");
        return Ok(());
    }

    println!("📋 {} workflows:", workflows.len());
    for (id, status) in workflows {
        println!("  {:<10} {}", status.as_str(), id);
    }
    Ok(())
}

fn list_tasks() {
    println!("📦 Available Task Types:");
    println!();

    let registry = keeltasks::builtin_registry();
    for task_type in registry.list_task_types() {
        if let Some(metadata) = registry.get_metadata(&task_type) {
            println!("  • {} ({})", task_type, metadata.category);
            println!("    {}", metadata.description);
        } else {
            println!("  • {}", task_type);
        }
    }
}
