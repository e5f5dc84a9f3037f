use anyhow::{bail, Context, Result};
use std::path::Path;
use std::sync::Arc;
use tracing::error;
use tracing_subscriber::{EnvFilter, FmtSubscriber};
use transporter::adapter::ComponentRegistry;
use transporter::cli::commands::{HistoryCommand, ListCommand, RunCommand, ValidateCommand};
use transporter::cli::output::*;
use transporter::cli::{Cli, Command};
use transporter::core::{PipelineConfig, RunState, RunStatus, TransporterConfig};
use transporter::execution::Transporter;
use transporter::persistence::{InMemoryRunStore, RunStore};
use transporter::script::ScriptInvoker;

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::from_args();

    let default_level = if cli.verbose { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    let subscriber = FmtSubscriber::builder()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .finish();
    tracing::subscriber::set_global_default(subscriber).context("Failed to set logging subscriber")?;

    match &cli.command {
        Command::Run(cmd) => run_pipeline(cmd, &cli).await?,
        Command::Validate(cmd) => validate_pipeline(cmd)?,
        Command::List(cmd) => list_pipelines(cmd, &cli).await?,
        Command::History(cmd) => show_history(cmd, &cli).await?,
    }

    Ok(())
}

fn load_config(cli: &Cli) -> Result<TransporterConfig> {
    match &cli.config {
        Some(path) => TransporterConfig::from_file(path).with_context(|| format!("Failed to load config {}", path)),
        None => Ok(TransporterConfig::default()),
    }
}

async fn open_store(config: &TransporterConfig, no_history: bool) -> Result<Arc<dyn RunStore>> {
    if no_history {
        return Ok(Arc::new(InMemoryRunStore::new()));
    }

    #[cfg(feature = "sqlite")]
    {
        use transporter::persistence::SqliteRunStore;
        let store = match &config.history_db {
            Some(path) => SqliteRunStore::new(config.resolve(path)).await?,
            None => SqliteRunStore::with_default_path().await?,
        };
        Ok(Arc::new(store))
    }

    #[cfg(not(feature = "sqlite"))]
    {
        let _ = config;
        Ok(Arc::new(InMemoryRunStore::new()))
    }
}

fn script_invoker() -> Result<Arc<dyn ScriptInvoker>> {
    #[cfg(feature = "lua")]
    {
        let lua = transporter::script::LuaScriptInvoker::new().context("Failed to start the Lua engine")?;
        Ok(Arc::new(lua))
    }

    #[cfg(not(feature = "lua"))]
    {
        Ok(Arc::new(transporter::script::FunctionRegistry::new()))
    }
}

async fn run_pipeline(cmd: &RunCommand, cli: &Cli) -> Result<()> {
    let config = load_config(cli)?;
    let params = cmd.params_list().map_err(anyhow::Error::msg)?;
    let store = open_store(&config, cmd.no_history).await?;

    let registry = Arc::new(ComponentRegistry::with_builtins());
    let transporter = Transporter::from_config(&config, registry, script_invoker()?, store)?;

    if let Some(file) = &cmd.file {
        transporter
            .register_file(&cmd.pipeline, Path::new(file))
            .with_context(|| format!("Failed to register {}", file))?;
        println!("{} Loaded pipeline: {}", INFO, style(&cmd.pipeline).bold());
    }

    if cli.events {
        transporter
            .service()
            .events()
            .subscribe(|event| eprintln!("{}", format_run_event(event)));
    }

    match transporter.run(&cmd.pipeline, params).await {
        Ok(run_id) => {
            println!(
                "\n{} {} completed {} (run {})",
                CHECK,
                style(&cmd.pipeline).bold(),
                style("successfully").green(),
                style(&run_id).dim()
            );
            Ok(())
        }
        Err(e) => {
            println!("\n{} {} {}", CROSS, style(&cmd.pipeline).bold(), style("failed").red());
            error!("{}", e);
            std::process::exit(1);
        }
    }
}

fn validate_pipeline(cmd: &ValidateCommand) -> Result<()> {
    println!("{} Validating pipeline...", INFO);

    let key = Path::new(&cmd.file)
        .file_stem()
        .and_then(|s| s.to_str())
        .unwrap_or("pipeline")
        .to_string();
    let result = PipelineConfig::from_file(&cmd.file).and_then(|config| config.into_pipeline(key));

    match result {
        Ok(pipeline) => {
            println!("{} Pipeline definition is valid!", CHECK);
            println!("  Key: {}", style(&pipeline.key).bold());
            println!(
                "  Flows: {} ({} reader flows)",
                style(pipeline.flows.len()).cyan(),
                pipeline.reader_flow_count()
            );
            println!("  Schedules: {}", style(pipeline.schedules.len()).cyan());
            println!("  Components: {}", style(pipeline.components.len()).cyan());

            let registry = ComponentRegistry::with_builtins();
            for (name, spec) in &pipeline.components {
                if !registry.has_factory(&spec.factory) {
                    println!(
                        "  {} component '{}' uses factory '{}', which this binary does not provide",
                        WARN, name, spec.factory
                    );
                }
            }

            if cmd.json {
                println!("\n{}", serde_json::to_string_pretty(&pipeline)?);
            }
            Ok(())
        }
        Err(e) => {
            println!("{} Validation failed:", CROSS);
            println!("  {}", style(e).red());
            std::process::exit(1);
        }
    }
}

async fn list_pipelines(cmd: &ListCommand, cli: &Cli) -> Result<()> {
    if cli.config.is_none() {
        bail!("`list` needs --config pointing at an engine configuration file");
    }
    let config = load_config(cli)?;

    if config.pipelines.is_empty() {
        println!("{} No pipelines configured", INFO);
        return Ok(());
    }

    let store = if cmd.with_counts || cmd.json {
        Some(open_store(&config, false).await?)
    } else {
        None
    };

    let mut json_data = Vec::new();
    println!("{} Configured pipelines:", INFO);
    for (key, path) in &config.pipelines {
        let runs = match &store {
            Some(store) => store.list_runs(key).await?,
            None => Vec::new(),
        };

        if cmd.with_counts {
            let completed = runs.iter().filter(|r| r.status == RunStatus::Completed).count();
            let failed = runs.iter().filter(|r| r.status == RunStatus::Failed).count();
            println!(
                "  {} ({} runs: {} succeeded, {} failed)",
                style(key).bold(),
                style(runs.len()).cyan(),
                style(completed).green(),
                style(failed).red()
            );
        } else {
            println!("  {} {}", style(key).bold(), style(config.resolve(path).display()).dim());
        }

        json_data.push(serde_json::json!({
            "key": key,
            "path": config.resolve(path),
            "run_count": runs.len(),
        }));
    }

    if cmd.json {
        let data = serde_json::json!({ "pipelines": json_data });
        println!("\n{}", serde_json::to_string_pretty(&data)?);
    }

    Ok(())
}

async fn show_history(cmd: &HistoryCommand, cli: &Cli) -> Result<()> {
    let config = load_config(cli)?;
    let store = open_store(&config, false).await?;

    if let Some(run_id) = &cmd.run_id {
        match store.load_run(run_id).await? {
            Some(run) => print_run_details(&run, cmd.details)?,
            None => println!("{} Run not found", WARN),
        }
        return Ok(());
    }

    let runs = match &cmd.pipeline {
        Some(key) => store.list_runs(key).await?.into_iter().take(cmd.limit).collect(),
        None => store.recent_runs(cmd.limit).await?,
    };

    if runs.is_empty() {
        println!("{} No runs found", INFO);
        return Ok(());
    }

    if cmd.json {
        let data = serde_json::json!({ "runs": runs });
        println!("{}", serde_json::to_string_pretty(&data)?);
    } else {
        println!("{} Run history (showing latest {}):", INFO, cmd.limit);
        for run in &runs {
            println!("  {}", format_run_summary(run));
        }
    }

    Ok(())
}

fn print_run_details(run: &RunState, details: bool) -> Result<()> {
    println!("{} Run Details", INFO);
    println!("  ID: {}", style(&run.run_id).cyan());
    println!("  Pipeline: {}", style(&run.pipeline_key).bold());
    println!("  Status: {}", format_status(run.status));
    println!("  Submitted: {}", style(run.submitted_at.to_rfc3339()).dim());
    if let Some(started) = run.started_at {
        println!("  Started: {}", style(started.to_rfc3339()).dim());
        if let Some(completed) = run.completed_at {
            println!("  Completed: {}", style(completed.to_rfc3339()).dim());
            if let Ok(duration) = completed.signed_duration_since(started).to_std() {
                println!("  Duration: {}", style(format_duration(duration)).dim());
            }
        }
    }
    if let Some(error) = &run.error {
        println!("  Error: {}", style(error).red());
    }

    if details {
        println!("\n  {}", style("Full details:").bold());
        let json = serde_json::to_string_pretty(run)?;
        for line in json.lines() {
            println!("    {}", line);
        }
    }

    Ok(())
}
