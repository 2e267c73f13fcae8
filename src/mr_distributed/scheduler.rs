//! Authoritative task list and worker registry of a job.
//!
//! Nothing here blocks or touches the network or the filesystem; the
//! [`Master`](super::master::Master) keeps a `Scheduler` behind its lock and
//! passes in the current time.

use std::{collections::BTreeMap, path::PathBuf, time::Duration};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::common::Job;
use crate::config::SchedulerConfig;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TaskType {
    Map,
    Reduce,
    /// Nothing to hand out right now. Never stored in the task list.
    Idle,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TaskStatus {
    Pending,
    Running,
    Completed,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Task {
    pub id: usize,
    #[serde(rename = "type")]
    pub task_type: TaskType,
    pub job_name: String,
    pub work_dir: PathBuf,
    pub n_map: usize,
    pub n_reduce: usize,
    /// Input file, map tasks only.
    pub file: Option<PathBuf>,
    pub map_task_number: usize,
    pub reduce_task_number: usize,
    pub status: TaskStatus,
    pub worker_id: Option<String>,
    pub start_time: Option<DateTime<Utc>>,
}

impl Task {
    pub fn idle() -> Self {
        Self {
            id: 0,
            task_type: TaskType::Idle,
            job_name: String::new(),
            work_dir: PathBuf::new(),
            n_map: 0,
            n_reduce: 0,
            file: None,
            map_task_number: 0,
            reduce_task_number: 0,
            status: TaskStatus::Pending,
            worker_id: None,
            start_time: None,
        }
    }

    fn new(id: usize, task_type: TaskType, job: &Job) -> Self {
        Self {
            id,
            task_type,
            job_name: job.name.clone(),
            work_dir: job.work_dir.clone(),
            n_map: job.n_map(),
            n_reduce: job.n_reduce,
            file: None,
            map_task_number: 0,
            reduce_task_number: 0,
            status: TaskStatus::Pending,
            worker_id: None,
            start_time: None,
        }
    }

    fn is_stale(&self, now: DateTime<Utc>, timeout: Duration) -> bool {
        self.start_time
            .and_then(|start| (now - start).to_std().ok())
            .is_some_and(|elapsed| elapsed > timeout)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WorkerStatus {
    Idle,
    Working,
    /// Advisory only: crashes are detected through task timeouts.
    Crashed,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WorkerInfo {
    pub id: String,
    pub status: WorkerStatus,
    pub address: String,
}

/// Read-only copy of the scheduler state served to monitoring.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Snapshot {
    pub tasks: Vec<Task>,
    pub workers: Vec<WorkerInfo>,
    pub tasks_done: usize,
    pub total_tasks: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReportOutcome {
    /// The reporter owned the running task; it is now completed.
    Accepted { job_done: bool },
    /// Unknown task, task not running, or owned by another worker.
    Ignored,
}

pub struct Scheduler {
    tasks: Vec<Task>,
    workers: BTreeMap<String, WorkerInfo>,
    tasks_done: usize,
    total_tasks: usize,
    config: SchedulerConfig,
}

impl Scheduler {
    /// One map task per input file (IDs `0..n_map`), then `n_reduce` reduce
    /// tasks (IDs `n_map..n_map + n_reduce`).
    pub fn new(job: &Job, config: SchedulerConfig) -> Self {
        let mut tasks = Vec::with_capacity(job.n_map() + job.n_reduce);
        for (i, file) in job.files.iter().enumerate() {
            let mut task = Task::new(i, TaskType::Map, job);
            task.file = Some(file.clone());
            task.map_task_number = i;
            tasks.push(task);
        }
        for r in 0..job.n_reduce {
            let mut task = Task::new(job.n_map() + r, TaskType::Reduce, job);
            task.reduce_task_number = r;
            tasks.push(task);
        }

        let total_tasks = tasks.len();
        Self {
            tasks,
            workers: BTreeMap::new(),
            tasks_done: 0,
            total_tasks,
            config,
        }
    }

    /// Hands `worker_id` the first task, in ID order, that is pending or has
    /// been running longer than the task timeout. Returns an idle task when
    /// there is none.
    pub fn get_task(&mut self, worker_id: &str, address: &str, now: DateTime<Utc>) -> Task {
        let worker = self
            .workers
            .entry(worker_id.to_string())
            .or_insert_with(|| WorkerInfo {
                id: worker_id.to_string(),
                status: WorkerStatus::Idle,
                address: address.to_string(),
            });
        worker.address = address.to_string();

        let maps_completed = self
            .tasks
            .iter()
            .filter(|t| t.task_type == TaskType::Map)
            .all(|t| t.status == TaskStatus::Completed);
        let timeout = self.config.task_timeout;
        let phase_barrier = self.config.phase_barrier;

        let candidate = self.tasks.iter_mut().find(|t| {
            if phase_barrier && t.task_type == TaskType::Reduce && !maps_completed {
                return false;
            }
            match t.status {
                TaskStatus::Pending => true,
                TaskStatus::Running => t.is_stale(now, timeout),
                TaskStatus::Completed => false,
            }
        });

        match candidate {
            Some(task) => {
                if let (TaskStatus::Running, Some(previous)) = (task.status, &task.worker_id) {
                    warn!(
                        task_id = task.id,
                        previous_worker = %previous,
                        worker_id,
                        "task timed out, reassigning"
                    );
                }
                task.status = TaskStatus::Running;
                task.worker_id = Some(worker_id.to_string());
                task.start_time = Some(now);
                worker.status = WorkerStatus::Working;
                info!(
                    task_id = task.id,
                    task_type = ?task.task_type,
                    worker_id,
                    "assigned task"
                );
                task.clone()
            }
            None => {
                worker.status = WorkerStatus::Idle;
                debug!(worker_id, "no task available, assigned idle");
                Task::idle()
            }
        }
    }

    /// Completes `task_id` if it is running and owned by `worker_id`; any
    /// other report is ignored.
    pub fn report_task_done(&mut self, task_id: usize, worker_id: &str) -> ReportOutcome {
        let Some(task) = self.tasks.iter_mut().find(|t| {
            t.id == task_id
                && t.status == TaskStatus::Running
                && t.worker_id.as_deref() == Some(worker_id)
        }) else {
            debug!(task_id, worker_id, "ignoring report from non-owner");
            return ReportOutcome::Ignored;
        };

        task.status = TaskStatus::Completed;
        self.tasks_done += 1;
        if let Some(worker) = self.workers.get_mut(worker_id) {
            worker.status = WorkerStatus::Idle;
        }
        info!(
            task_id,
            worker_id,
            done = self.tasks_done,
            total = self.total_tasks,
            "task completed"
        );
        ReportOutcome::Accepted {
            job_done: self.tasks_done == self.total_tasks,
        }
    }

    pub fn snapshot(&self) -> Snapshot {
        Snapshot {
            tasks: self.tasks.clone(),
            workers: self.workers.values().cloned().collect(),
            tasks_done: self.tasks_done,
            total_tasks: self.total_tasks,
        }
    }

    pub fn is_done(&self) -> bool {
        self.tasks_done == self.total_tasks
    }
}
