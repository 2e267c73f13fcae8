use std::{net::SocketAddr, path::PathBuf, sync::Arc};

use anyhow::Context;
use chrono::Utc;
use tokio::{
    net::TcpListener,
    sync::{oneshot, Mutex},
    task::JoinHandle,
};
use tracing::{info, warn};

use super::rpc;
use super::scheduler::{ReportOutcome, Scheduler, Snapshot, Task};
use crate::common::Job;
use crate::config::SchedulerConfig;
use crate::files;

struct MasterState {
    scheduler: Scheduler,
    done_tx: Option<oneshot::Sender<()>>,
}

/// Serves tasks of one job to workers and finalizes the job once every task
/// has been reported.
pub struct Master {
    job: Job,
    config: SchedulerConfig,
    state: Mutex<MasterState>,
}

impl Master {
    /// The receiver resolves once, when the last task is reported done.
    pub fn new(job: Job, config: SchedulerConfig) -> (Self, oneshot::Receiver<()>) {
        let (done_tx, done_rx) = oneshot::channel();
        let master = Self {
            state: Mutex::new(MasterState {
                scheduler: Scheduler::new(&job, config.clone()),
                done_tx: Some(done_tx),
            }),
            job,
            config,
        };
        (master, done_rx)
    }

    pub async fn get_task(&self, worker_id: &str, address: &str) -> Task {
        let mut state = self.state.lock().await;
        state.scheduler.get_task(worker_id, address, Utc::now())
    }

    /// Returns whether the report was accepted.
    pub async fn report_task_done(&self, task_id: usize, worker_id: &str) -> bool {
        let mut state = self.state.lock().await;
        match state.scheduler.report_task_done(task_id, worker_id) {
            ReportOutcome::Accepted { job_done } => {
                if job_done {
                    if let Some(done_tx) = state.done_tx.take() {
                        info!(job = %self.job.name, "all tasks completed");
                        let _ = done_tx.send(());
                    }
                }
                true
            }
            ReportOutcome::Ignored => false,
        }
    }

    pub async fn snapshot(&self) -> Snapshot {
        self.state.lock().await.scheduler.snapshot()
    }

    /// Merges the reduce outputs into the answer file and removes every
    /// intermediate file of the job.
    pub async fn finalize(&self) -> anyhow::Result<PathBuf> {
        let job = self.job.clone();
        tokio::task::spawn_blocking(move || {
            let answer = files::merge_reduce_outputs(&job.work_dir, &job.name, job.n_reduce)
                .context("cannot merge output files")?;
            files::clean_intermediary(&job.work_dir, &job.name, job.n_map(), job.n_reduce);
            Ok::<_, anyhow::Error>(answer)
        })
        .await?
    }

    /// Binds the RPC and monitoring addresses, then runs the job to completion.
    pub async fn run(
        self: Arc<Self>,
        done_rx: oneshot::Receiver<()>,
        rpc_addr: &str,
        monitor_addr: Option<&str>,
    ) -> anyhow::Result<PathBuf> {
        let rpc_listener = TcpListener::bind(rpc_addr)
            .await
            .with_context(|| format!("cannot start RPC server on {rpc_addr}"))?;
        let monitor_listener = match monitor_addr {
            Some(addr) => Some(
                TcpListener::bind(addr)
                    .await
                    .with_context(|| format!("cannot start monitoring server on {addr}"))?,
            ),
            None => None,
        };
        self.run_with_listeners(done_rx, rpc_listener, monitor_listener)
            .await
    }

    pub async fn run_with_listeners(
        self: Arc<Self>,
        done_rx: oneshot::Receiver<()>,
        rpc_listener: TcpListener,
        monitor_listener: Option<TcpListener>,
    ) -> anyhow::Result<PathBuf> {
        info!(
            job = %self.job.name,
            rpc_addr = %rpc_listener.local_addr()?,
            "starting RPC server"
        );
        let mut servers = vec![serve(rpc_listener, rpc::rpc_routes(Arc::clone(&self)))];
        if let Some(listener) = monitor_listener {
            info!(monitor_addr = %listener.local_addr()?, "starting monitoring server");
            servers.push(serve(listener, rpc::monitor_routes(Arc::clone(&self))));
        }

        let result = self.wait_and_finalize(done_rx).await;

        if result.is_ok() && !self.config.linger.is_zero() {
            info!(linger = ?self.config.linger, "keeping monitoring server alive");
            tokio::time::sleep(self.config.linger).await;
        }
        for server in servers {
            server.abort();
        }
        result
    }

    async fn wait_and_finalize(&self, done_rx: oneshot::Receiver<()>) -> anyhow::Result<PathBuf> {
        done_rx
            .await
            .context("master dropped its completion signal")?;
        let answer = self.finalize().await?;
        info!(job = %self.job.name, answer = %answer.display(), "job completed");
        Ok(answer)
    }
}

fn serve(listener: TcpListener, router: axum::Router) -> JoinHandle<()> {
    tokio::spawn(async move {
        let service = router.into_make_service_with_connect_info::<SocketAddr>();
        if let Err(e) = axum::serve(listener, service).await {
            warn!(error = %e, "server stopped");
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::files::{merge_name, read_key_value_file, reduce_name};
    use crate::mr_distributed::scheduler::TaskType;
    use std::fs;
    use std::time::Duration;

    fn job(dir: &std::path::Path, n_map: usize, n_reduce: usize) -> Job {
        let files = (0..n_map)
            .map(|i| dir.join(format!("in-{i}.txt")))
            .collect();
        Job::new("mastertest", files, n_reduce, dir).unwrap()
    }

    #[tokio::test]
    async fn completion_signal_fires_once_after_last_report() {
        let dir = tempfile::tempdir().unwrap();
        let (master, mut done_rx) = Master::new(job(dir.path(), 1, 1), SchedulerConfig::default());

        let map = master.get_task("w1", "w1").await;
        let reduce = master.get_task("w2", "w2").await;
        assert_eq!(map.task_type, TaskType::Map);
        assert_eq!(reduce.task_type, TaskType::Reduce);

        assert!(!master.report_task_done(reduce.id, "w1").await);
        assert!(master.report_task_done(map.id, "w1").await);
        assert!(done_rx.try_recv().is_err());

        assert!(master.report_task_done(reduce.id, "w2").await);
        assert!(done_rx.try_recv().is_ok());
        assert!(!master.report_task_done(reduce.id, "w2").await);

        let snap = master.snapshot().await;
        assert_eq!(snap.tasks_done, 2);
        assert_eq!(snap.total_tasks, 2);
    }

    #[tokio::test]
    async fn finalize_merges_and_cleans() {
        let dir = tempfile::tempdir().unwrap();
        let (master, _done_rx) = Master::new(job(dir.path(), 2, 2), SchedulerConfig::default());
        for r in 0..2 {
            for m in 0..2 {
                fs::write(dir.path().join(reduce_name("mastertest", m, r)), "").unwrap();
            }
            fs::write(
                dir.path().join(merge_name("mastertest", r)),
                format!("{{\"Key\":\"k{r}\",\"Value\":\"v{r}\"}}\n"),
            )
            .unwrap();
        }

        let answer = master.finalize().await.unwrap();
        let kvs = read_key_value_file(&answer).unwrap();
        assert_eq!(kvs.len(), 2);
        assert_eq!(kvs[0].key, "k0");
        assert_eq!(kvs[1].key, "k1");
        for r in 0..2 {
            assert!(!dir.path().join(merge_name("mastertest", r)).exists());
            for m in 0..2 {
                assert!(!dir.path().join(reduce_name("mastertest", m, r)).exists());
            }
        }
    }

    #[tokio::test]
    async fn run_serves_rpc_until_done() {
        let dir = tempfile::tempdir().unwrap();
        let config = SchedulerConfig {
            linger: Duration::ZERO,
            ..SchedulerConfig::default()
        };
        let (master, done_rx) = Master::new(job(dir.path(), 1, 1), config);
        let master = Arc::new(master);
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let base_url = format!("http://{}", listener.local_addr().unwrap());
        let monitor = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let monitor_url = format!("http://{}/data", monitor.local_addr().unwrap());

        let handle = tokio::spawn(
            Arc::clone(&master).run_with_listeners(done_rx, listener, Some(monitor)),
        );

        let client = crate::mr_distributed::worker::MasterClient::new(&base_url);
        let map = client.get_task("w1").await.unwrap();
        assert_eq!(map.task_type, TaskType::Map);
        let reduce = client.get_task("w1").await.unwrap();
        assert_eq!(reduce.task_type, TaskType::Reduce);
        assert_eq!(client.get_task("w2").await.unwrap().task_type, TaskType::Idle);

        let snap: Snapshot = reqwest::get(&monitor_url).await.unwrap().json().await.unwrap();
        assert_eq!(snap.total_tasks, 2);
        assert_eq!(snap.workers.len(), 2);
        assert!(snap.workers[0].address.starts_with("127.0.0.1:"));

        // Pretend the tasks ran.
        fs::write(dir.path().join(merge_name("mastertest", 0)), "").unwrap();
        client.report_task_done(map.id, "w1").await.unwrap();
        client.report_task_done(reduce.id, "w1").await.unwrap();

        let answer = handle.await.unwrap().unwrap();
        assert!(answer.exists());
    }
}
