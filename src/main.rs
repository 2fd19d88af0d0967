use std::sync::Arc;
use std::time::Duration;

use clap::{Parser, ValueEnum};
use tracing_subscriber::EnvFilter;

use jobpool::config::{RetryPolicy, SchedulerConfig, ShutdownPolicy};
use jobpool::scheduler::{Job, Scheduler, ShutdownSummary};
use jobpool::shutdown::install_shutdown_handler;
use jobpool::SchedulerError;

#[derive(Parser, Debug)]
#[command(name = "jobpool")]
#[command(version)]
#[command(about = "A bounded worker-pool job scheduler")]
#[command(propagate_version = true)]
struct Args {
    #[command(subcommand)]
    command: Commands,
}

#[derive(clap::Subcommand, Debug)]
enum Commands {
    /// Run a simulated workload through a scheduler and print the summary
    Run(RunArgs),
}

// =============================================================================
// Run Arguments
// =============================================================================

#[derive(Parser, Debug)]
struct RunArgs {
    /// Number of workers in the pool
    #[arg(long, short = 'w', default_value = "4")]
    workers: usize,

    /// Number of jobs to submit
    #[arg(long, short = 'j', default_value = "20")]
    jobs: usize,

    /// How long each simulated job runs
    #[arg(long, default_value = "200")]
    job_duration_ms: u64,

    /// Probability (0.0 - 1.0) that an attempt fails
    #[arg(long, default_value = "0.0")]
    failure_rate: f64,

    /// What happens to queued jobs on shutdown
    #[arg(long, default_value = "drain")]
    policy: PolicyArg,

    /// Bound the queue; submissions back off while it is full
    #[arg(long)]
    queue_capacity: Option<usize>,

    /// Extra attempts for a failed job
    #[arg(long, default_value = "0")]
    max_retries: u32,

    /// Output format
    #[arg(long, short = 'o', default_value = "table")]
    output: OutputFormat,
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum PolicyArg {
    Drain,
    Cancel,
}

impl From<PolicyArg> for ShutdownPolicy {
    fn from(arg: PolicyArg) -> Self {
        match arg {
            PolicyArg::Drain => ShutdownPolicy::Drain,
            PolicyArg::Cancel => ShutdownPolicy::Cancel,
        }
    }
}

#[derive(Debug, Clone, ValueEnum)]
enum OutputFormat {
    Table,
    Json,
}

// =============================================================================
// Helper Functions
// =============================================================================

fn simulated_job(index: usize, duration: Duration, failure_rate: f64) -> Job {
    Job::new(format!("job-{}", index), move || async move {
        tokio::time::sleep(duration).await;
        if rand::random::<f64>() < failure_rate {
            return Err(format!("simulated failure in job-{}", index).into());
        }
        Ok(())
    })
}

fn print_summary(summary: &ShutdownSummary, format: &OutputFormat) -> Result<(), Box<dyn std::error::Error>> {
    match format {
        OutputFormat::Json => println!("{}", serde_json::to_string_pretty(summary)?),
        OutputFormat::Table => {
            let stats = &summary.stats;
            println!("Policy:     {}", summary.policy);
            println!("Workers:    {}", stats.workers);
            println!("Elapsed:    {} ms", summary.elapsed_ms);
            println!("{:<12} {:>8}", "OUTCOME", "COUNT");
            println!("{}", "-".repeat(21));
            println!("{:<12} {:>8}", "submitted", stats.submitted);
            println!("{:<12} {:>8}", "completed", stats.completed);
            println!("{:<12} {:>8}", "failed", stats.failed);
            println!("{:<12} {:>8}", "discarded", stats.discarded);
            println!("{:<12} {:>8}", "retried", stats.retried);
        }
    }
    Ok(())
}

// =============================================================================
// Run Implementation
// =============================================================================

async fn run_workload(args: RunArgs) -> Result<(), Box<dyn std::error::Error>> {
    if !(0.0..=1.0).contains(&args.failure_rate) {
        return Err(format!("--failure-rate must be within 0.0..=1.0, got {}", args.failure_rate).into());
    }

    let mut config = SchedulerConfig::new(args.workers)
        .with_shutdown_policy(args.policy.into())
        .with_retry(RetryPolicy::new(args.max_retries));
    if let Some(capacity) = args.queue_capacity {
        config = config.with_queue_capacity(capacity);
    }

    let scheduler = Arc::new(Scheduler::new(config)?);
    scheduler.start().await?;

    let shutdown = install_shutdown_handler();
    let duration = Duration::from_millis(args.job_duration_ms);
    let jobs = args.jobs;
    let failure_rate = args.failure_rate;

    let submit_scheduler = scheduler.clone();
    let mut submitter = tokio::spawn(async move {
        let mut submitted = 0usize;
        for index in 0..jobs {
            loop {
                match submit_scheduler.submit(simulated_job(index, duration, failure_rate)) {
                    Ok(_) => {
                        submitted += 1;
                        break;
                    }
                    Err(SchedulerError::QueueFull { .. }) => {
                        tokio::time::sleep(Duration::from_millis(10)).await;
                    }
                    Err(e) => {
                        tracing::warn!(error = %e, "Stopping submissions");
                        return submitted;
                    }
                }
            }
        }
        submitted
    });

    let submitted = tokio::select! {
        result = &mut submitter => result?,
        _ = shutdown.cancelled() => {
            tracing::info!("Shutdown requested before all jobs were submitted");
            submitter.abort();
            0
        }
    };
    tracing::info!(submitted, "Submission finished, stopping scheduler");

    let summary = scheduler.stop().await;
    print_summary(&summary, &args.output)
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let args = Args::parse();

    match args.command {
        Commands::Run(run_args) => run_workload(run_args).await,
    }
}
