//! 工作池实现

use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use thiserror::Error;
use tokio::sync::{Notify, mpsc};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{debug, info, warn};

use super::task::Task;
use super::worker::{SharedQueue, TaskReport, Worker};
use crate::config::WorkerPoolConfig;
use crate::error::{Result, SdkError};

/// `try_add_task` 被拒绝时归还任务
#[derive(Debug, Error)]
#[error("task {} rejected: {error}", .task.id())]
pub struct TaskRejected {
    pub task: Task,
    pub error: SdkError,
}

#[derive(Default)]
struct Counters {
    pending: AtomicUsize,
    completed: AtomicU64,
    failed: AtomicU64,
    drained: Notify,
}

impl Counters {
    fn finish_one(&self) {
        if self.pending.fetch_sub(1, Ordering::AcqRel) == 1 {
            self.drained.notify_waiters();
        }
    }
}

struct Running {
    stop: CancellationToken,
    tracker: TaskTracker,
    completion: JoinHandle<()>,
}

struct PoolInner {
    max_concurrent: usize,
    max_queued: usize,
    sender: mpsc::Sender<Task>,
    queue: SharedQueue,
    log_enabled: Arc<AtomicBool>,
    counters: Arc<Counters>,
    running: Mutex<Option<Running>>,
}

/// 固定并发的任务池
///
/// - `add_task` 在队列满时等待（背压），`try_add_task` 立即返回 [`TaskRejected`]
/// - `start` 在已运行时返回 `AlreadyStarted`；`stop` 之后可再次 `start`
/// - `stop` 等待每个 worker 完成当前任务，队列中剩余任务保留到下次 `start`
/// - `done` 在没有排队和执行中的任务时返回
#[derive(Clone)]
pub struct WorkerPool {
    inner: Arc<PoolInner>,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

impl WorkerPool {
    pub fn new(max_concurrent: usize, max_queued: usize) -> Result<Self> {
        if max_concurrent < 1 {
            return Err(SdkError::invalid_parameter("max_concurrent must be at least 1"));
        }
        if max_queued < 1 {
            return Err(SdkError::invalid_parameter("max_queued must be at least 1"));
        }

        let (sender, receiver) = mpsc::channel(max_queued);
        Ok(Self {
            inner: Arc::new(PoolInner {
                max_concurrent,
                max_queued,
                sender,
                queue: Arc::new(tokio::sync::Mutex::new(receiver)),
                log_enabled: Arc::new(AtomicBool::new(true)),
                counters: Arc::new(Counters::default()),
                running: Mutex::new(None),
            }),
        })
    }

    /// 并发数取 CPU 核数
    pub fn with_default_concurrency(max_queued: usize) -> Result<Self> {
        Self::new(num_cpus::get(), max_queued)
    }

    pub fn from_config(config: &WorkerPoolConfig) -> Result<Self> {
        let pool = Self::new(
            config.max_concurrent.unwrap_or_else(num_cpus::get),
            config.max_queued,
        )?;
        pool.set_log_enabled(config.log_enabled);
        Ok(pool)
    }

    pub fn set_log_enabled(&self, enabled: bool) {
        self.inner.log_enabled.store(enabled, Ordering::Relaxed);
    }

    pub fn max_concurrent(&self) -> usize {
        self.inner.max_concurrent
    }

    pub fn max_queued(&self) -> usize {
        self.inner.max_queued
    }

    /// 已提交但未完成的任务数（含排队和执行中）
    pub fn pending(&self) -> usize {
        self.inner.counters.pending.load(Ordering::Acquire)
    }

    pub fn completed(&self) -> u64 {
        self.inner.counters.completed.load(Ordering::Acquire)
    }

    pub fn failed(&self) -> u64 {
        self.inner.counters.failed.load(Ordering::Acquire)
    }

    pub fn is_running(&self) -> bool {
        lock(&self.inner.running).is_some()
    }

    /// 启动 `max_concurrent` 个 worker
    pub fn start(&self) -> Result<()> {
        let mut running = lock(&self.inner.running);
        if running.is_some() {
            return Err(SdkError::already_started("worker pool already started"));
        }

        let stop = CancellationToken::new();
        let tracker = TaskTracker::new();
        let (report_tx, report_rx) = mpsc::unbounded_channel();
        for id in 1..=self.inner.max_concurrent {
            Worker::new(id, Arc::clone(&self.inner.log_enabled)).spawn(
                &tracker,
                Arc::clone(&self.inner.queue),
                report_tx.clone(),
                stop.clone(),
            );
        }
        tracker.close();
        drop(report_tx);

        let completion = tokio::spawn(track_completion(
            Arc::clone(&self.inner.counters),
            Arc::clone(&self.inner.log_enabled),
            report_rx,
        ));

        info!(
            workers = self.inner.max_concurrent,
            max_queued = self.inner.max_queued,
            "🚀 Worker pool started"
        );
        *running = Some(Running {
            stop,
            tracker,
            completion,
        });
        Ok(())
    }

    /// 停止所有 worker 并等待当前任务完成，未启动时直接返回
    pub async fn stop(&self) {
        let Some(running) = lock(&self.inner.running).take() else {
            return;
        };
        running.stop.cancel();
        running.tracker.wait().await;
        if let Err(err) = running.completion.await {
            warn!(error = %err, "⚠️ Worker pool completion tracker failed");
        }
        info!(pending = self.pending(), "Worker pool stopped");
    }

    /// 停止后重新启动
    pub async fn restart(&self) -> Result<()> {
        self.stop().await;
        self.start()
    }

    /// 提交任务，队列满时等待
    ///
    /// 等待期间被取消不会留下计数。
    pub async fn add_task(&self, task: Task) -> Result<()> {
        let permit = self
            .inner
            .sender
            .reserve()
            .await
            .map_err(|_| SdkError::queue_closed("worker pool queue closed"))?;
        self.inner.counters.pending.fetch_add(1, Ordering::AcqRel);
        permit.send(task);
        Ok(())
    }

    /// 提交任务，队列满时立即返回
    pub fn try_add_task(&self, task: Task) -> std::result::Result<(), TaskRejected> {
        let counters = &self.inner.counters;
        counters.pending.fetch_add(1, Ordering::AcqRel);
        match self.inner.sender.try_send(task) {
            Ok(()) => Ok(()),
            Err(mpsc::error::TrySendError::Full(task)) => {
                counters.finish_one();
                Err(TaskRejected {
                    task,
                    error: SdkError::queue_full(format!(
                        "worker pool queue is full ({} queued)",
                        self.inner.max_queued
                    )),
                })
            }
            Err(mpsc::error::TrySendError::Closed(task)) => {
                counters.finish_one();
                Err(TaskRejected {
                    task,
                    error: SdkError::queue_closed("worker pool queue closed"),
                })
            }
        }
    }

    /// 等待所有已提交任务完成
    ///
    /// 没有待处理任务时立即返回。不会停止 worker。
    pub async fn done(&self) {
        let counters = &self.inner.counters;
        loop {
            let drained = counters.drained.notified();
            tokio::pin!(drained);
            drained.as_mut().enable();
            if counters.pending.load(Ordering::Acquire) == 0 {
                return;
            }
            drained.await;
        }
    }
}

async fn track_completion(
    counters: Arc<Counters>,
    log_enabled: Arc<AtomicBool>,
    mut reports: mpsc::UnboundedReceiver<TaskReport>,
) {
    while let Some(report) = reports.recv().await {
        match &report.error {
            None => {
                counters.completed.fetch_add(1, Ordering::AcqRel);
            }
            Some(error) => {
                counters.failed.fetch_add(1, Ordering::AcqRel);
                if log_enabled.load(Ordering::Relaxed) {
                    warn!(worker = report.worker, task_id = %report.task_id, error = %error, "⚠️ Task failed");
                }
            }
        }
        counters.finish_one();
    }
    debug!("Worker pool completion tracker exited");
}
