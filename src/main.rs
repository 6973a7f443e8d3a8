use anyhow::{Context, Result};
use stagegate::cli::commands::{HistoryCommand, ListCommand, RunCommand, ValidateCommand};
use stagegate::cli::output::*;
use stagegate::cli::{Cli, Command};
use stagegate::core::config::PipelineConfig;
use stagegate::core::RunStatus;
use stagegate::execution::PipelineEngine;
use stagegate::persistence::{record_execution, ExecutionSummary, InMemoryPersistence, PersistenceBackend};
use stagegate::tools::{AuditLog, CommandNotifier, Toolbox};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::warn;
use tracing_subscriber::{EnvFilter, FmtSubscriber};

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::from_args();

    // Initialize logging; RUST_LOG takes precedence over --verbose
    let default_level = if cli.verbose { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    let subscriber = FmtSubscriber::builder()
        .with_env_filter(filter)
        .with_target(false)
        .finish();
    tracing::subscriber::set_global_default(subscriber)
        .context("Failed to set logging subscriber")?;

    // Execute command
    match &cli.command {
        Command::Run(cmd) => run_pipeline(cmd).await?,
        Command::Validate(cmd) => validate_pipeline(cmd)?,
        Command::List(cmd) => list_pipelines(cmd).await?,
        Command::History(cmd) => show_history(cmd).await?,
    }

    Ok(())
}

async fn run_pipeline(cmd: &RunCommand) -> Result<()> {
    // Load pipeline config
    let config = PipelineConfig::from_file(&cmd.file).context("Failed to load pipeline config")?;

    if !cmd.json {
        println!("{} Loaded pipeline: {}", INFO, style(&config.name).bold());
    }

    let mut pipeline = config.to_pipeline();

    // Apply variable overrides
    for (key, value) in &cmd.variable {
        pipeline.variables.insert(key.clone(), value.clone());
        if !cmd.json {
            println!(
                "{} Variable override: {} = {}",
                INFO,
                style(key).cyan(),
                style(value).dim()
            );
        }
    }

    let base_dir = match &cmd.workdir {
        Some(dir) => dir.clone(),
        None => std::env::current_dir().context("Failed to read current directory")?,
    };
    let mut context = pipeline.create_context(base_dir);
    context.env.extend(cmd.env.iter().cloned());
    let mut context = context.with_process_env();

    // Set up persistence
    let store: Arc<dyn PersistenceBackend> = if cmd.no_history {
        Arc::new(InMemoryPersistence::new())
    } else {
        history_store().await?
    };

    let mut toolbox = Toolbox::system().context("Failed to set up tools")?;
    if let Some(notifications) = &config.notifications {
        toolbox = toolbox.with_notifier(Arc::new(CommandNotifier::new(
            notifications.command.clone(),
            context.working_dir.clone(),
        )));
    }
    if let Some(path) = &cmd.log_file {
        toolbox = toolbox.with_audit(AuditLog::to_file(path));
    }

    let engine = PipelineEngine::new(toolbox);

    // Set up event handler for console output
    if !cmd.json {
        engine.add_event_handler(|event| {
            if let Some(line) = format_execution_event(&event) {
                println!("{}", line);
            }
        });
    }

    // Ctrl-C aborts the run; post actions still execute
    let cancel = CancellationToken::new();
    let interrupt = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Interrupt received, aborting run");
            interrupt.cancel();
        }
    });

    let outcome = engine.run(&pipeline, &mut context, &cancel).await;

    // Save to history
    if !cmd.no_history {
        let saved = record_execution(store.as_ref(), &context).await;
        if let (Some(summary), false) = (saved, cmd.json) {
            println!(
                "\n{} Execution saved to history (ID: {})",
                INFO,
                style(&summary.execution_id.to_string()[..8]).dim()
            );
        }
    }

    if cmd.json {
        println!("{}", serde_json::to_string_pretty(&outcome)?);
    } else {
        println!("\n{}", format_outcome(&outcome));
    }

    let code = outcome.exit_code();
    if code != 0 {
        std::process::exit(code);
    }

    Ok(())
}

fn validate_pipeline(cmd: &ValidateCommand) -> Result<()> {
    if !cmd.json {
        println!("{} Validating pipeline...", INFO);
    }

    match PipelineConfig::from_file(&cmd.file) {
        Ok(config) => {
            if cmd.json {
                println!("{}", serde_json::to_string_pretty(&config)?);
                return Ok(());
            }

            println!("{} Pipeline configuration is valid!", CHECK);
            println!("  Name: {}", style(&config.name).bold());
            println!("  Stages: {}", style(config.stages.len()).cyan());
            for stage in &config.stages {
                println!("    - {} ({} steps)", stage.name, stage.steps.len());
            }
            println!(
                "  Variables: {}",
                style(config.variables_as_string_map().len()).cyan()
            );
            Ok(())
        }
        Err(e) => {
            println!("{} Validation failed:", CROSS);
            println!("  {}", style(format!("{:#}", e)).red());
            std::process::exit(1);
        }
    }
}

async fn list_pipelines(cmd: &ListCommand) -> Result<()> {
    let store = history_store().await?;
    let pipelines = store.list_pipelines().await?;

    if cmd.json {
        let mut json_data = Vec::new();
        for pipeline in &pipelines {
            let executions = store.list_executions(pipeline).await?;
            json_data.push(serde_json::json!({
                "name": pipeline,
                "execution_count": executions.len(),
            }));
        }
        let data = serde_json::json!({ "pipelines": json_data });
        println!("{}", serde_json::to_string_pretty(&data)?);
        return Ok(());
    }

    if pipelines.is_empty() {
        println!("{} No pipelines found in history", INFO);
        return Ok(());
    }

    println!("{} Pipelines in history:", INFO);

    for pipeline_name in &pipelines {
        if cmd.with_counts {
            let executions = store.list_executions(pipeline_name).await?;
            let count = |status: RunStatus| executions.iter().filter(|e| e.status == status).count();
            println!(
                "  {} ({} runs: {} succeeded, {} failed, {} aborted)",
                style(pipeline_name).bold(),
                style(executions.len()).cyan(),
                style(count(RunStatus::Succeeded)).green(),
                style(count(RunStatus::Failed)).red(),
                style(count(RunStatus::Aborted)).yellow()
            );
        } else {
            println!("  {}", style(pipeline_name).bold());
        }
    }

    Ok(())
}

async fn show_history(cmd: &HistoryCommand) -> Result<()> {
    let store = history_store().await?;

    // If specific execution ID is requested
    if let Some(exec_id_str) = &cmd.execution_id {
        let exec_id = uuid::Uuid::parse_str(exec_id_str).context("Invalid execution ID format")?;

        match store.load_execution(exec_id).await? {
            Some(summary) => print_execution_details(&summary, cmd.details)?,
            None => println!("{} Execution not found", WARN),
        }
        return Ok(());
    }

    // List executions for pipeline or all
    let mut executions = if let Some(pipeline_name) = &cmd.pipeline {
        store.list_executions(pipeline_name).await?
    } else {
        let mut all_execs = Vec::new();
        for pipeline in store.list_pipelines().await? {
            all_execs.extend(store.list_executions(&pipeline).await?);
        }
        all_execs.sort_by(|a, b| b.started_at.cmp(&a.started_at));
        all_execs
    };
    if let Some(status) = cmd.status {
        executions.retain(|e| e.status == status);
    }
    executions.truncate(cmd.limit);

    if cmd.json {
        let data = serde_json::json!({ "executions": executions });
        println!("{}", serde_json::to_string_pretty(&data)?);
        return Ok(());
    }

    if executions.is_empty() {
        println!("{} No executions found", INFO);
        return Ok(());
    }

    println!("{} Execution history (showing latest {}):", INFO, cmd.limit);
    for summary in &executions {
        println!("  {}", format_execution_summary(summary));
    }

    Ok(())
}

fn print_execution_details(summary: &ExecutionSummary, verbose: bool) -> Result<()> {
    println!("{} Execution Details", INFO);
    println!("  ID: {}", style(summary.execution_id).cyan());
    println!("  Pipeline: {}", style(&summary.pipeline_name).bold());
    println!("  Status: {}", format_status(summary.status));
    println!("  Started: {}", style(summary.started_at.to_rfc3339()).dim());
    if let Some(completed) = summary.completed_at {
        println!("  Completed: {}", style(completed.to_rfc3339()).dim());
        if let Ok(duration) = completed.signed_duration_since(summary.started_at).to_std() {
            println!("  Duration: {}", style(format_duration(duration)).dim());
        }
    }
    println!(
        "  Progress: {} ({}/{} stages)",
        style(format!("{:.0}%", summary.progress() * 100.0)).cyan(),
        summary.completed_stages,
        summary.total_stages
    );
    if let Some(stage) = &summary.failed_stage {
        println!(
            "  Failed at: {} / {}",
            style(stage).red(),
            summary.failed_step.as_deref().unwrap_or("-")
        );
    }

    if verbose {
        println!("\n  {}", style("Full details:").bold());
        let json = serde_json::to_string_pretty(summary)?;
        for line in json.lines() {
            println!("    {}", line);
        }
    }

    Ok(())
}

#[cfg(feature = "sqlite")]
async fn history_store() -> Result<Arc<dyn PersistenceBackend>> {
    let store = stagegate::persistence::SqliteExecutionStore::with_default_path().await?;
    Ok(Arc::new(store))
}

#[cfg(not(feature = "sqlite"))]
async fn history_store() -> Result<Arc<dyn PersistenceBackend>> {
    anyhow::bail!("Run history needs the `sqlite` feature")
}
