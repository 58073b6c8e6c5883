use anyhow::{Result, bail};
use chrono::Utc;
use std::sync::Arc;
use taskweave::cli::{Args, Commands, ConfigDiscovery, OrchestratorConfig, TaskArgs};
use taskweave::task::{
    CronSchedule, ExecutionServices, HeuristicComplexityEstimator, LoggingEventHandler, Planner,
    ProgressCallback, Scheduler, Task, TaskStatus,
};
use tracing::info;

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(args.log_filter())
        .with_writer(std::io::stderr)
        .init();

    match args.command {
        Commands::Plan { task } => plan_command(task).await,
        Commands::Run { task } => run_command(task).await,
        Commands::Cron { expression, count } => cron_command(&expression, count),
        Commands::ShowConfig => {
            ConfigDiscovery::show_discovery_info();
            let config = ConfigDiscovery::discover_config()?;
            println!();
            println!("{}", config.to_toml_string()?);
            Ok(())
        }
    }
}

fn build_planner(config: &OrchestratorConfig) -> Result<Planner> {
    Ok(Planner::builder()
        .with_config(config.planner.clone())
        .with_complexity_estimator(Arc::new(HeuristicComplexityEstimator::new()))
        .build()?)
}

async fn plan_command(args: TaskArgs) -> Result<()> {
    let config = ConfigDiscovery::load(args.config.as_deref())?;
    let planner = build_planner(&config)?;

    let plan = planner.create_plan(args.to_task()).await;
    println!("{}", serde_json::to_string_pretty(&plan)?);

    let validation = planner.validate_plan(&plan);
    if validation.valid {
        eprintln!("Plan is valid: {}", plan.summary());
    } else {
        for error in &validation.errors {
            eprintln!("  ✗ {}", error);
        }
        bail!("Plan has {} validation errors", validation.errors.len());
    }
    Ok(())
}

async fn run_command(args: TaskArgs) -> Result<()> {
    let config = ConfigDiscovery::load(args.config.as_deref())?;
    let planner = build_planner(&config)?;
    let scheduler = Scheduler::new(config.scheduler.clone(), ExecutionServices::default());
    scheduler.add_event_handler(Arc::new(LoggingEventHandler));

    let plan = planner.create_plan(args.to_task()).await;
    let validation = planner.validate_plan(&plan);
    if !validation.valid {
        for error in &validation.errors {
            eprintln!("  ✗ {}", error);
        }
        bail!("Refusing to run an invalid plan");
    }
    info!("Running {}", plan.summary());

    let progress: &ProgressCallback = &|task_id: &str, status: TaskStatus, pct: Option<u8>| {
        println!("[{:>9} {:>3}%] {}", status, pct.unwrap_or(0), task_id);
    };
    let results = planner
        .execute_plan(
            &plan,
            |task: Task| {
                let scheduler = scheduler.clone();
                async move { scheduler.execute_task(task).await.map_err(anyhow::Error::from) }
            },
            Some(progress),
        )
        .await?;

    let failed = results.iter().filter(|r| !r.success).count();
    println!(
        "{} of {} tasks succeeded",
        results.len() - failed,
        results.len()
    );
    if failed > 0 {
        bail!("{} tasks failed", failed);
    }
    Ok(())
}

fn cron_command(expression: &str, count: usize) -> Result<()> {
    let schedule = CronSchedule::parse(expression)?;
    println!("{} is valid; next {} fire times (UTC):", schedule, count);
    for time in schedule.upcoming(Utc::now(), count) {
        println!("  {}", time.to_rfc3339());
    }
    Ok(())
}
