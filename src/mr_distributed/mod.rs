pub mod master;
pub mod rpc;
pub mod scheduler;
pub mod worker;
mod worker_pool;

use std::{path::PathBuf, sync::Arc};

use crate::common::{Job, MapReduce, MapReduceApp};
use crate::config::{SchedulerConfig, WorkerConfig};
use anyhow::Context;
use async_trait::async_trait;
use master::Master;
use tokio::{net::TcpListener, sync::oneshot};
use tracing::info;
pub use worker_pool::WorkerPool;

/// Runs a master plus an in-process pool of workers that reach it over
/// its RPC address, as a single local cluster.
pub struct DistributedMapReduce {
    job: Job,
    mr_app: Arc<dyn MapReduceApp>,
    workers: usize,
    rpc_addr: String,
    monitor_addr: Option<String>,
    scheduler_config: SchedulerConfig,
    worker_config: WorkerConfig,
}

impl DistributedMapReduce {
    pub fn with_workers(mut self, workers: usize) -> Self {
        self.workers = workers;
        self
    }

    pub fn with_rpc_addr(mut self, rpc_addr: impl Into<String>) -> Self {
        self.rpc_addr = rpc_addr.into();
        self
    }

    pub fn with_monitor_addr(mut self, monitor_addr: Option<String>) -> Self {
        self.monitor_addr = monitor_addr;
        self
    }

    pub fn with_scheduler_config(mut self, config: SchedulerConfig) -> Self {
        self.scheduler_config = config;
        self
    }

    pub fn with_worker_config(mut self, config: WorkerConfig) -> Self {
        self.worker_config = config;
        self
    }
}

#[async_trait]
impl MapReduce for DistributedMapReduce {
    fn new(job: Job, mr_app: Box<dyn MapReduceApp>) -> Self {
        Self {
            job,
            mr_app: Arc::from(mr_app),
            workers: 2,
            rpc_addr: "127.0.0.1:0".to_string(),
            monitor_addr: None,
            scheduler_config: SchedulerConfig::default(),
            worker_config: WorkerConfig::default(),
        }
    }

    async fn run(self) -> anyhow::Result<PathBuf> {
        let rpc_listener = TcpListener::bind(&self.rpc_addr)
            .await
            .with_context(|| format!("cannot start RPC server on {}", self.rpc_addr))?;
        let monitor_listener = match &self.monitor_addr {
            Some(addr) => Some(
                TcpListener::bind(addr)
                    .await
                    .with_context(|| format!("cannot start monitoring server on {addr}"))?,
            ),
            None => None,
        };
        let master_addr = rpc_listener.local_addr()?.to_string();

        let (master, done_rx) = Master::new(self.job, self.scheduler_config);
        let master = Arc::new(master);

        let (stop_tx, stop_rx) = oneshot::channel();
        let pool = WorkerPool::new(self.workers, master_addr, self.worker_config, self.mr_app);
        let pool_handle = tokio::spawn(pool.run(stop_rx));
        info!(workers = self.workers, "local cluster started");

        let result = master
            .run_with_listeners(done_rx, rpc_listener, monitor_listener)
            .await;

        let _ = stop_tx.send(());
        pool_handle.await?;
        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::FaultConfig;
    use crate::files::{ans_name, merge_name, read_key_value_file, reduce_name};
    use crate::map_reduce_apps::WordCount;
    use std::collections::HashMap;
    use std::fs;
    use std::time::Duration;

    fn quick_worker_config(faults: FaultConfig) -> WorkerConfig {
        WorkerConfig {
            retry_delay: Duration::from_millis(10),
            idle_delay: Duration::from_millis(10),
            pacing: Duration::ZERO,
            faults,
        }
    }

    fn word_count_job(dir: &std::path::Path) -> Job {
        let inputs = [
            "the quick brown fox",
            "jumps over the lazy dog",
            "The dog barks, the fox runs",
        ];
        let files = inputs
            .iter()
            .enumerate()
            .map(|(i, text)| {
                let path = dir.join(format!("pg-{i}.txt"));
                fs::write(&path, text).unwrap();
                path
            })
            .collect();
        Job::new("cluster", files, 3, dir).unwrap()
    }

    fn answer_counts(answer: &std::path::Path) -> HashMap<String, String> {
        read_key_value_file(answer)
            .unwrap()
            .into_iter()
            .map(|kv| (kv.key, kv.value))
            .collect()
    }

    fn assert_cluster_output(dir: &std::path::Path, answer: &std::path::Path) {
        assert_eq!(answer, dir.join(ans_name("cluster")));
        let counts = answer_counts(answer);
        assert_eq!(counts["the"], "4");
        assert_eq!(counts["fox"], "2");
        assert_eq!(counts["dog"], "2");
        assert_eq!(counts["barks"], "1");
        assert_eq!(counts.len(), 10);
        for r in 0..3 {
            assert!(!dir.join(merge_name("cluster", r)).exists());
            for m in 0..3 {
                assert!(!dir.join(reduce_name("cluster", m, r)).exists());
            }
        }
    }

    #[tokio::test]
    async fn local_cluster_runs_word_count() {
        let dir = tempfile::tempdir().unwrap();
        let scheduler_config = SchedulerConfig {
            phase_barrier: true,
            linger: Duration::ZERO,
            ..SchedulerConfig::default()
        };

        let answer = DistributedMapReduce::new(word_count_job(dir.path()), Box::new(WordCount::new()))
            .with_workers(3)
            .with_scheduler_config(scheduler_config)
            .with_worker_config(quick_worker_config(FaultConfig::disabled()))
            .run()
            .await
            .unwrap();

        assert_cluster_output(dir.path(), &answer);
    }

    #[tokio::test]
    async fn local_cluster_survives_crashing_workers() {
        let dir = tempfile::tempdir().unwrap();
        let scheduler_config = SchedulerConfig {
            task_timeout: Duration::from_millis(200),
            phase_barrier: true,
            linger: Duration::ZERO,
        };
        // Every worker finishes one task and crashes while holding its second.
        let faults = FaultConfig {
            crash_after: Some(1),
            ..FaultConfig::disabled()
        };

        let answer = DistributedMapReduce::new(word_count_job(dir.path()), Box::new(WordCount::new()))
            .with_workers(2)
            .with_scheduler_config(scheduler_config)
            .with_worker_config(quick_worker_config(faults))
            .run()
            .await
            .unwrap();

        assert_cluster_output(dir.path(), &answer);
    }
}
