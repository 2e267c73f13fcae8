use std::{path::Path, sync::Arc, time::Duration};

use rand::{rngs::StdRng, Rng, SeedableRng};
use thiserror::Error;
use tokio::time::sleep;
use tracing::{debug, info, warn};

use super::rpc::{
    GetTaskArgs, GetTaskReply, ReportTaskDoneArgs, ReportTaskDoneReply, GET_TASK_PATH,
    REPORT_TASK_DONE_PATH,
};
use super::scheduler::{Task, TaskType};
use crate::common::MapReduceApp;
use crate::config::{FaultConfig, WorkerConfig};
use crate::engine::{do_map, do_reduce, EngineError};

#[derive(Debug, Error)]
pub enum WorkerError {
    #[error("simulated crash while holding task {task_id}")]
    SimulatedCrash { task_id: usize },
    #[error("map task {task_id} has no input file")]
    MissingInput { task_id: usize },
    #[error(transparent)]
    Engine(#[from] EngineError),
    #[error("task execution panicked: {0}")]
    Join(#[from] tokio::task::JoinError),
}

/// HTTP client for the master's RPC endpoints.
#[derive(Clone)]
pub struct MasterClient {
    base_url: String,
    http_client: reqwest::Client,
}

impl MasterClient {
    pub fn new(master_addr: &str) -> Self {
        let base_url = if master_addr.starts_with("http://") || master_addr.starts_with("https://")
        {
            master_addr.trim_end_matches('/').to_string()
        } else {
            format!("http://{}", master_addr.trim_end_matches('/'))
        };
        Self {
            base_url,
            http_client: reqwest::Client::new(),
        }
    }

    pub async fn get_task(&self, worker_id: &str) -> Result<Task, reqwest::Error> {
        let args = GetTaskArgs {
            worker_id: worker_id.to_string(),
        };
        let reply: GetTaskReply = self
            .http_client
            .post(format!("{}{GET_TASK_PATH}", self.base_url))
            .json(&args)
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;
        Ok(reply.task)
    }

    pub async fn report_task_done(&self, task_id: usize, worker_id: &str) -> Result<(), reqwest::Error> {
        let args = ReportTaskDoneArgs {
            task_id,
            worker_id: worker_id.to_string(),
        };
        let _: ReportTaskDoneReply = self
            .http_client
            .post(format!("{}{REPORT_TASK_DONE_PATH}", self.base_url))
            .json(&args)
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Fault {
    Crash,
    Delay(Duration),
    Proceed,
}

/// Decides, per task, whether the worker crashes or stalls before running it.
pub struct FaultInjector {
    config: FaultConfig,
    rng: StdRng,
    tasks_taken: usize,
}

impl FaultInjector {
    pub fn new(config: FaultConfig) -> Self {
        Self::with_rng(config, StdRng::from_os_rng())
    }

    pub fn with_rng(config: FaultConfig, rng: StdRng) -> Self {
        Self {
            config,
            rng,
            tasks_taken: 0,
        }
    }

    pub fn draw(&mut self) -> Fault {
        self.tasks_taken += 1;
        if self
            .config
            .crash_after
            .is_some_and(|limit| self.tasks_taken > limit)
        {
            return Fault::Crash;
        }
        // Independent draws: a worker that survives the crash roll may still stall.
        if self.rng.random::<f64>() < self.config.crash_probability {
            return Fault::Crash;
        }
        if self.rng.random::<f64>() < self.config.delay_probability {
            return Fault::Delay(self.config.delay);
        }
        Fault::Proceed
    }
}

/// Stateless executor: asks the master for work, runs it, reports it.
pub struct Worker {
    id: String,
    client: MasterClient,
    config: WorkerConfig,
    faults: FaultInjector,
    mr_app: Arc<dyn MapReduceApp>,
}

impl Worker {
    pub fn new(
        id: impl Into<String>,
        client: MasterClient,
        config: WorkerConfig,
        mr_app: Arc<dyn MapReduceApp>,
    ) -> Self {
        let faults = FaultInjector::new(config.faults.clone());
        Self {
            id: id.into(),
            client,
            config,
            faults,
            mr_app,
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    /// Runs until a simulated crash or a fatal task error.
    pub async fn run(mut self) -> Result<(), WorkerError> {
        info!(worker_id = %self.id, master = %self.client.base_url, "worker started");
        loop {
            let task = match self.client.get_task(&self.id).await {
                Ok(task) => task,
                Err(e) => {
                    debug!(worker_id = %self.id, error = %e, "GetTask failed, retrying");
                    sleep(self.config.retry_delay).await;
                    continue;
                }
            };

            if task.task_type == TaskType::Idle {
                sleep(self.config.idle_delay).await;
                continue;
            }

            match self.faults.draw() {
                Fault::Crash => {
                    warn!(worker_id = %self.id, task_id = task.id, "simulating crash");
                    return Err(WorkerError::SimulatedCrash { task_id: task.id });
                }
                Fault::Delay(delay) => {
                    warn!(worker_id = %self.id, task_id = task.id, ?delay, "simulating delay");
                    sleep(delay).await;
                }
                Fault::Proceed => {}
            }

            info!(
                worker_id = %self.id,
                task_id = task.id,
                task_type = ?task.task_type,
                "executing task"
            );
            let mr_app = Arc::clone(&self.mr_app);
            let to_run = task.clone();
            tokio::task::spawn_blocking(move || execute(&to_run, mr_app.as_ref())).await??;

            debug!(worker_id = %self.id, task_id = task.id, pacing = ?self.config.pacing, "resting before report");
            sleep(self.config.pacing).await;

            if let Err(e) = self.client.report_task_done(task.id, &self.id).await {
                warn!(worker_id = %self.id, task_id = task.id, error = %e, "ReportTaskDone failed");
            }
        }
    }
}

/// Runs one map or reduce task through the engine. Idle tasks are a no-op.
pub fn execute(task: &Task, mr_app: &dyn MapReduceApp) -> Result<(), WorkerError> {
    let work_dir: &Path = &task.work_dir;
    match task.task_type {
        TaskType::Map => {
            let file = task
                .file
                .as_deref()
                .ok_or(WorkerError::MissingInput { task_id: task.id })?;
            do_map(
                work_dir,
                &task.job_name,
                task.map_task_number,
                file,
                task.n_reduce,
                mr_app,
            )?;
        }
        TaskType::Reduce => {
            do_reduce(
                work_dir,
                &task.job_name,
                task.reduce_task_number,
                task.n_map,
                mr_app,
            )?;
        }
        TaskType::Idle => {}
    }
    Ok(())
}
