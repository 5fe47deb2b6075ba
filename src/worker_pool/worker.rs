//! 工作协程

use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use futures::FutureExt;
use tokio::sync::{Mutex, mpsc};
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{debug, info};

use super::task::Task;

pub(crate) type SharedQueue = Arc<Mutex<mpsc::Receiver<Task>>>;

/// 任务完成报告
#[derive(Debug)]
pub(crate) struct TaskReport {
    pub(crate) worker: usize,
    pub(crate) task_id: String,
    pub(crate) error: Option<String>,
}

pub(crate) struct Worker {
    id: usize,
    log_enabled: Arc<AtomicBool>,
}

impl Worker {
    pub(crate) fn new(id: usize, log_enabled: Arc<AtomicBool>) -> Self {
        Self { id, log_enabled }
    }

    pub(crate) fn spawn(
        self,
        tracker: &TaskTracker,
        queue: SharedQueue,
        reports: mpsc::UnboundedSender<TaskReport>,
        stop: CancellationToken,
    ) {
        tracker.spawn(self.run(queue, reports, stop));
    }

    async fn next_task(&self, queue: &SharedQueue, stop: &CancellationToken) -> Option<Task> {
        let mut rx = tokio::select! {
            biased;
            _ = stop.cancelled() => return None,
            rx = queue.lock() => rx,
        };
        tokio::select! {
            biased;
            _ = stop.cancelled() => None,
            task = rx.recv() => task,
        }
    }

    async fn run(
        self,
        queue: SharedQueue,
        reports: mpsc::UnboundedSender<TaskReport>,
        stop: CancellationToken,
    ) {
        // 只在两个任务之间检查停止信号，当前任务不会被中断
        while let Some(task) = self.next_task(&queue, &stop).await {
            let task_id = task.id().to_string();
            let error = match AssertUnwindSafe(task.execute()).catch_unwind().await {
                Ok(Ok(())) => None,
                Ok(Err(err)) => Some(format!("{err:#}")),
                Err(_) => Some("task panicked".to_string()),
            };

            if self.log_enabled.load(Ordering::Relaxed) {
                debug!(worker = self.id, task_id = %task_id, error = ?error, "Worker done task");
            }
            let report = TaskReport {
                worker: self.id,
                task_id,
                error,
            };
            if reports.send(report).is_err() {
                break;
            }
        }

        if self.log_enabled.load(Ordering::Relaxed) {
            info!(worker = self.id, "Worker stopped");
        }
    }
}
