//! 任务定义

use std::future::Future;

use futures::future::BoxFuture;

type Handler = Box<dyn FnOnce() -> BoxFuture<'static, anyhow::Result<()>> + Send>;

/// 任务：ID + 一次性的异步处理函数
pub struct Task {
    id: String,
    handler: Handler,
}

impl Task {
    pub fn new<F, Fut>(id: impl Into<String>, handler: F) -> Self
    where
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
    {
        Self {
            id: id.into(),
            handler: Box::new(move || Box::pin(handler())),
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub(crate) async fn execute(self) -> anyhow::Result<()> {
        (self.handler)().await
    }
}

impl std::fmt::Debug for Task {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Task").field("id", &self.id).finish_non_exhaustive()
    }
}
