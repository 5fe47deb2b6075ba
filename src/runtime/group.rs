//! 并行组件组
//!
//! 把多个 [`Runnable`] 组合成一个组件：并行运行，任一子组件退出即整体退出。

use super::service::{Runnable, Service};
use crate::error::ServiceResult;
use crate::flags::{FlagSet, ParsedFlags};
use async_trait::async_trait;
use futures::future::join_all;
use std::sync::Arc;
use tokio::task::JoinSet;
use tracing::{debug, error};

pub struct ServiceGroup {
    name: String,
    children: Vec<Arc<dyn Runnable>>,
}

impl ServiceGroup {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            children: Vec::new(),
        }
    }

    pub fn with_service<S: Runnable>(mut self, service: Arc<S>) -> Self {
        self.children.push(service);
        self
    }

    pub fn len(&self) -> usize {
        self.children.len()
    }

    pub fn is_empty(&self) -> bool {
        self.children.is_empty()
    }
}

#[async_trait]
impl Service for ServiceGroup {
    fn name(&self) -> &str {
        &self.name
    }

    fn init_flags(&self, flags: &mut FlagSet) {
        for child in &self.children {
            child.init_flags(flags);
        }
    }

    async fn configure(&self, flags: &ParsedFlags) -> ServiceResult {
        for child in &self.children {
            child.configure(flags).await?;
        }
        Ok(())
    }

    async fn cleanup(&self) {
        for child in &self.children {
            child.cleanup().await;
        }
    }
}

#[async_trait]
impl Runnable for ServiceGroup {
    async fn run(&self) -> ServiceResult {
        if self.children.is_empty() {
            return Ok(());
        }

        let mut join_set = JoinSet::new();
        for child in &self.children {
            let child = Arc::clone(child);
            join_set.spawn(async move {
                let result = child.run().await;
                debug!(service = %child.name(), ok = result.is_ok(), "Group member exited");
                result
            });
        }

        let first = join_set.join_next().await;
        // 其余子组件由 stop 负责结束
        join_set.detach_all();

        match first {
            Some(Ok(result)) => result,
            Some(Err(join_err)) => {
                error!(group = %self.name, error = %join_err, "❌ Group member panicked");
                Err(anyhow::anyhow!("group member of {} failed: {}", self.name, join_err))
            }
            None => Ok(()),
        }
    }

    async fn stop(&self) {
        join_all(self.children.iter().map(|child| child.stop())).await;
    }
}
