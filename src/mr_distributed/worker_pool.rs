use std::collections::HashMap;
use std::sync::Arc;

use async_channel::{Receiver, Sender};
use tokio::{sync::oneshot, task::JoinHandle};
use tracing::{info, warn};
use uuid::Uuid;

use super::worker::{MasterClient, Worker, WorkerError};
use crate::common::MapReduceApp;
use crate::config::WorkerConfig;

type Exit = (String, Result<(), WorkerError>);

/// In-process workers talking to a master over its RPC address. A worker
/// that exits is replaced by a fresh one with a new ID.
pub struct WorkerPool {
    size: usize,
    master_addr: String,
    config: WorkerConfig,
    app: Arc<dyn MapReduceApp>,
}

impl WorkerPool {
    pub fn new(
        size: usize,
        master_addr: impl Into<String>,
        config: WorkerConfig,
        app: Arc<dyn MapReduceApp>,
    ) -> WorkerPool {
        assert!(size > 0);

        WorkerPool {
            size,
            master_addr: master_addr.into(),
            config,
            app,
        }
    }

    /// Keeps `size` workers alive until `shutdown` fires.
    pub async fn run(self, mut shutdown: oneshot::Receiver<()>) {
        let (exit_tx, exit_rx): (Sender<Exit>, Receiver<Exit>) = async_channel::unbounded();
        let mut workers: HashMap<String, JoinHandle<()>> = HashMap::with_capacity(self.size);

        for _ in 0..self.size {
            self.spawn_worker(&exit_tx, &mut workers);
        }

        loop {
            tokio::select! {
                _ = &mut shutdown => break,
                Ok((id, result)) = exit_rx.recv() => {
                    workers.remove(&id);
                    match result {
                        Err(e) => warn!(worker_id = %id, error = %e, "worker exited, replacing"),
                        Ok(()) => info!(worker_id = %id, "worker stopped, replacing"),
                    }
                    self.spawn_worker(&exit_tx, &mut workers);
                }
            }
        }

        for (_, handle) in workers {
            handle.abort();
        }
        info!(workers = self.size, "worker pool stopped");
    }

    fn spawn_worker(&self, exit_tx: &Sender<Exit>, workers: &mut HashMap<String, JoinHandle<()>>) {
        let worker = Worker::new(
            Uuid::new_v4().to_string(),
            MasterClient::new(&self.master_addr),
            self.config.clone(),
            Arc::clone(&self.app),
        );
        let id = worker.id().to_string();
        let exit_tx = exit_tx.clone();
        let worker_id = id.clone();
        let handle = tokio::spawn(async move {
            let result = worker.run().await;
            let _ = exit_tx.send((worker_id, result)).await;
        });
        workers.insert(id, handle);
    }
}
