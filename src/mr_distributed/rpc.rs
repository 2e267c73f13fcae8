//! JSON-over-HTTP surface of the master.
//!
//! Workers `POST` to [`GET_TASK_PATH`] and [`REPORT_TASK_DONE_PATH`];
//! monitoring reads the snapshot from [`DATA_PATH`].

use std::{net::SocketAddr, sync::Arc};

use axum::{
    extract::{ConnectInfo, State},
    response::Json,
    routing::{get, post},
    Router,
};
use serde::{Deserialize, Serialize};

use super::master::Master;
use super::scheduler::{Snapshot, Task};

pub const GET_TASK_PATH: &str = "/rpc/get-task";
pub const REPORT_TASK_DONE_PATH: &str = "/rpc/report-task-done";
pub const DATA_PATH: &str = "/data";

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GetTaskArgs {
    pub worker_id: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GetTaskReply {
    pub task: Task,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReportTaskDoneArgs {
    pub task_id: usize,
    pub worker_id: String,
}

/// Plain acknowledgement; a stale report is acknowledged like any other.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ReportTaskDoneReply {}

pub fn rpc_routes(master: Arc<Master>) -> Router {
    Router::new()
        .route(GET_TASK_PATH, post(get_task))
        .route(REPORT_TASK_DONE_PATH, post(report_task_done))
        .with_state(master)
}

pub fn monitor_routes(master: Arc<Master>) -> Router {
    Router::new()
        .route(DATA_PATH, get(data))
        .with_state(master)
}

async fn get_task(
    State(master): State<Arc<Master>>,
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
    Json(args): Json<GetTaskArgs>,
) -> Json<GetTaskReply> {
    let task = master.get_task(&args.worker_id, &addr.to_string()).await;
    Json(GetTaskReply { task })
}

async fn report_task_done(
    State(master): State<Arc<Master>>,
    Json(args): Json<ReportTaskDoneArgs>,
) -> Json<ReportTaskDoneReply> {
    master.report_task_done(args.task_id, &args.worker_id).await;
    Json(ReportTaskDoneReply::default())
}

async fn data(State(master): State<Arc<Master>>) -> Json<Snapshot> {
    Json(master.snapshot().await)
}
