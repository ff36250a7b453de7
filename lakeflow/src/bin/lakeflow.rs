//! Command-line front end of the lakeflow runtime.

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};

use lakeflow::{ExecutionMode, LakeflowOptions, LakeflowRuntime, PipelineId, TaskId};

#[derive(Parser)]
#[command(name = "lakeflow", version, about = "Run data collection pipelines")]
struct Cli {
    /// Home directory (defaults to $LAKEFLOW_HOME or ~/.lakeflow)
    #[arg(long, global = true)]
    home: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// List registered plugins
    Plugins,
    /// Apply pending database migrations
    Migrate,
    /// Run every runnable task of a pipeline, stage by stage
    RunPipeline {
        id: PipelineId,
        /// Maximum tasks running at once within a stage
        #[arg(long, default_value_t = 4)]
        parallelism: usize,
    },
    /// Run a single task
    RunTask { id: TaskId },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let mut options = LakeflowOptions::from_env();
    if let Some(home) = cli.home {
        options.home_dir = std::path::absolute(&home)
            .with_context(|| format!("cannot resolve home directory {}", home.display()))?;
    }
    if matches!(cli.command, Command::Migrate) {
        options.auto_migrate = false;
    }

    let runtime = LakeflowRuntime::new(options)
        .await
        .context("failed to start runtime")?;

    match cli.command {
        Command::Plugins => {
            for name in runtime.registry().names() {
                let plugin = runtime.registry().get(&name)?;
                if plugin.description().is_empty() {
                    println!("{name}");
                } else {
                    println!("{name}\t{}", plugin.description());
                }
            }
        }
        Command::Migrate => {
            let pending = runtime.pending_migrations()?;
            for migration in &pending {
                println!(
                    "{}/{}\t{}",
                    migration.component, migration.version, migration.name
                );
            }
            let applied = runtime.migrate()?;
            println!("applied {applied} migration(s)");
        }
        Command::RunPipeline { id, parallelism } => {
            cancel_on_ctrl_c(runtime.clone(), id);
            let metrics = runtime
                .run_pipeline(id, ExecutionMode::parallel(parallelism))
                .await
                .with_context(|| format!("pipeline {id} failed"))?;
            let pipeline = runtime.get_pipeline(id)?;
            println!(
                "pipeline {id} {} in {}ms ({} stage(s), {}/{} task(s) finished)",
                pipeline.status,
                metrics.total_duration_ms,
                metrics.stages.len(),
                pipeline.finished_tasks,
                pipeline.total_tasks
            );
        }
        Command::RunTask { id } => {
            let task = runtime.get_task(id)?;
            cancel_on_ctrl_c(runtime.clone(), task.pipeline_id);
            runtime
                .run_task(id)
                .await
                .with_context(|| format!("task {id} failed"))?;
            let task = runtime.get_task(id)?;
            println!("task {id} {}", task.status);
        }
    }
    Ok(())
}

fn cancel_on_ctrl_c(runtime: LakeflowRuntime, pipeline_id: PipelineId) {
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            eprintln!("cancelling pipeline {pipeline_id}");
            if let Err(e) = runtime.cancel_pipeline(pipeline_id) {
                eprintln!("cancel failed: {e}");
            }
        }
    });
}
