use std::{path::PathBuf, process, sync::Arc, time::Duration};

use anyhow::{bail, Result};
use clap::{Args, Parser, Subcommand};
use tracing::{debug, error, info};
use tracing_subscriber::EnvFilter;
use uuid::Uuid;

use mapreduce_rpc::{
    common::{parse_file_list, read_files_from_dir, Job, MapReduce},
    config::{FaultConfig, SchedulerConfig, WorkerConfig},
    map_reduce_apps::WordCount,
    map_reduce_seq::SequentialMapReduce,
    mr_distributed::{
        master::Master,
        worker::{MasterClient, Worker, WorkerError},
        DistributedMapReduce,
    },
};

#[derive(Debug, Parser)]
#[command(name = "mapreduce")]
#[command(about = "A small distributed MapReduce runtime")]
#[command(author, version)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Serve the job's tasks to remote workers and merge the result.
    Master {
        #[command(flatten)]
        job: JobArgs,
        #[command(flatten)]
        scheduler: SchedulerArgs,
        #[arg(long, default_value = "0.0.0.0:1234")]
        rpc_addr: String,
        #[arg(long, default_value = "0.0.0.0:8080")]
        monitor_addr: String,
    },
    /// Pull tasks from a master until killed.
    Worker {
        #[arg(long, default_value = "localhost:1234")]
        master: String,
        /// Worker ID; a random one is generated when omitted.
        #[arg(long)]
        id: Option<String>,
        #[command(flatten)]
        faults: FaultArgs,
    },
    /// Run every task in this process, one after the other.
    Sequential {
        #[command(flatten)]
        job: JobArgs,
    },
    /// Run a master and a pool of in-process workers.
    Local {
        #[command(flatten)]
        job: JobArgs,
        #[command(flatten)]
        scheduler: SchedulerArgs,
        #[command(flatten)]
        faults: FaultArgs,
        #[arg(long, default_value_t = 4)]
        workers: usize,
        #[arg(long)]
        monitor_addr: Option<String>,
    },
}

#[derive(Debug, Args)]
struct JobArgs {
    #[arg(long = "job", default_value = "testjob")]
    name: String,
    /// Comma-separated input files.
    #[arg(long, conflicts_with = "input_dir")]
    files: Option<String>,
    /// Directory whose files are the inputs.
    #[arg(long)]
    input_dir: Option<PathBuf>,
    #[arg(long, default_value_t = 2)]
    nreduce: usize,
    /// Directory for intermediate, reduce output and answer files.
    #[arg(long, default_value = ".")]
    work_dir: PathBuf,
}

impl JobArgs {
    fn into_job(self) -> Result<Job> {
        let files = match (self.files, self.input_dir) {
            (Some(files), _) => parse_file_list(&files),
            (None, Some(dir)) => read_files_from_dir(dir)?,
            (None, None) => bail!("no input files provided, use --files or --input-dir"),
        };
        Job::new(self.name, files, self.nreduce, self.work_dir)
    }
}

#[derive(Debug, Args)]
struct SchedulerArgs {
    #[arg(long, default_value_t = 10)]
    task_timeout_secs: u64,
    /// Hand out reduce tasks only once every map task completed.
    #[arg(long)]
    phase_barrier: bool,
    #[arg(long, default_value_t = 30)]
    linger_secs: u64,
}

impl From<SchedulerArgs> for SchedulerConfig {
    fn from(args: SchedulerArgs) -> Self {
        SchedulerConfig {
            task_timeout: Duration::from_secs(args.task_timeout_secs),
            phase_barrier: args.phase_barrier,
            linger: Duration::from_secs(args.linger_secs),
        }
    }
}

#[derive(Debug, Args)]
struct FaultArgs {
    #[arg(long, default_value_t = 0.05, value_parser = parse_probability)]
    crash_probability: f64,
    #[arg(long, default_value_t = 0.1, value_parser = parse_probability)]
    delay_probability: f64,
}

impl From<FaultArgs> for WorkerConfig {
    fn from(args: FaultArgs) -> Self {
        WorkerConfig {
            faults: FaultConfig {
                crash_probability: args.crash_probability,
                delay_probability: args.delay_probability,
                ..FaultConfig::default()
            },
            ..WorkerConfig::default()
        }
    }
}

fn parse_probability(s: &str) -> Result<f64, String> {
    let p: f64 = s.parse().map_err(|e| format!("{e}"))?;
    if (0.0..=1.0).contains(&p) {
        Ok(p)
    } else {
        Err(format!("{p} is not a probability in [0, 1]"))
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let subscriber = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .finish();
    tracing::subscriber::set_global_default(subscriber)?;

    let cli = Cli::parse();
    debug!("Parsed command line arguments: {:?}", cli);

    match cli.command {
        Command::Master {
            job,
            scheduler,
            rpc_addr,
            monitor_addr,
        } => {
            let (master, done_rx) = Master::new(job.into_job()?, scheduler.into());
            let answer = Arc::new(master)
                .run(done_rx, &rpc_addr, Some(&monitor_addr))
                .await?;
            info!(answer = %answer.display(), "master done");
        }
        Command::Worker { master, id, faults } => {
            let id = id.unwrap_or_else(|| Uuid::new_v4().to_string());
            if id.is_empty() {
                bail!("worker ID not provided");
            }
            let worker = Worker::new(
                id,
                MasterClient::new(&master),
                faults.into(),
                Arc::new(WordCount::new()),
            );
            match worker.run().await {
                Err(WorkerError::SimulatedCrash { task_id }) => {
                    error!(task_id, "worker crashed");
                    process::exit(1);
                }
                other => other?,
            }
        }
        Command::Sequential { job } => {
            let answer = SequentialMapReduce::new(job.into_job()?, Box::new(WordCount::new()))
                .run()
                .await?;
            info!(answer = %answer.display(), "sequential run done");
        }
        Command::Local {
            job,
            scheduler,
            faults,
            workers,
            monitor_addr,
        } => {
            let answer = DistributedMapReduce::new(job.into_job()?, Box::new(WordCount::new()))
                .with_workers(workers)
                .with_monitor_addr(monitor_addr)
                .with_scheduler_config(scheduler.into())
                .with_worker_config(faults.into())
                .run()
                .await?;
            info!(answer = %answer.display(), "local run done");
        }
    }

    Ok(())
}
