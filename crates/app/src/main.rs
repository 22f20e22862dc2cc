use anyhow::{Context, Result, bail};
use chrono::NaiveDate;
use clap::{Parser, Subcommand};
use serde::Serialize;

use tradeq_app::{JobFilter, QueueConfig, QueueRuntime};
use tradeq_core::{JobPriority, JobStatus};

#[derive(Parser)]
#[command(name = "tradeq", about = "Analysis job queue and retry scheduler")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Queue an analysis and submit it to the engine
    Submit {
        ticker: String,
        /// Trade date, YYYY-MM-DD
        trade_date: String,
        #[arg(long, default_value = "normal")]
        priority: JobPriority,
    },
    /// Show one job
    Status { id: String },
    /// List jobs, newest first
    List {
        #[arg(long)]
        status: Option<JobStatus>,
        #[arg(long)]
        priority: Option<JobPriority>,
        #[arg(long)]
        ticker: Option<String>,
        /// Earliest trade date, inclusive
        #[arg(long)]
        from: Option<NaiveDate>,
        /// Latest trade date, inclusive
        #[arg(long)]
        to: Option<NaiveDate>,
        #[arg(long)]
        limit: Option<usize>,
    },
    /// Cancel one or more jobs
    Cancel {
        #[arg(required = true)]
        ids: Vec<String>,
    },
    /// Job counts and success rate
    Stats,
    /// Run the dispatch worker and status poller until Ctrl-C
    Run,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let config = QueueConfig::from_env().context("invalid configuration")?;
    tradeq_observability::init(config.log_format);

    let runtime = QueueRuntime::connect(config).await?;

    match cli.command {
        Command::Submit {
            ticker,
            trade_date,
            priority,
        } => {
            let job = runtime
                .queue_analysis()
                .execute(&ticker, &trade_date, priority)
                .await?;
            print_json(&job)?;
        }
        Command::Status { id } => match runtime.get_job_status().execute(&id).await? {
            Some(job) => print_json(&job)?,
            None => bail!("job {id} not found"),
        },
        Command::List {
            status,
            priority,
            ticker,
            from,
            to,
            limit,
        } => {
            let filter = JobFilter {
                status,
                priority,
                ticker,
                start_date: from,
                end_date: to,
                limit,
            };
            let jobs = runtime.get_job_status().get_all(&filter).await?;
            print_json(&jobs)?;
        }
        Command::Cancel { ids } => {
            if let [id] = ids.as_slice() {
                let cancelled = runtime.cancel_job().execute(id).await?;
                println!("{}", if cancelled { "cancelled" } else { "not cancelled" });
            } else {
                let result = runtime.cancel_job().execute_batch(&ids).await;
                println!("{result}");
            }
        }
        Command::Stats => {
            let summary = runtime.get_job_status().get_statistics().await?;
            print_json(&summary)?;
        }
        Command::Run => {
            let running = runtime.start().await?;
            tracing::info!("tradeq running; press Ctrl-C to stop");
            tokio::signal::ctrl_c()
                .await
                .context("failed to listen for Ctrl-C")?;
            running.shutdown().await;
        }
    }

    Ok(())
}

fn print_json<T: Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}
