//! 固定并发的任务池
//!
//! 多个 worker 共享一个有界队列；worker 每完成一个任务向完成跟踪协程报告，
//! 跟踪协程维护待处理计数并在计数归零时唤醒 [`WorkerPool::done`] 的等待者。

pub mod pool;
pub mod task;
mod worker;

pub use pool::{TaskRejected, WorkerPool};
pub use task::Task;
