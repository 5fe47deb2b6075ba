//! 订阅组件
//!
//! [`SubscriberService`] 把一次订阅包装成 [`Runnable`]：每条消息在独立任务中处理，
//! 处理函数返回时必须已经 ack 或 redeliver，否则处理任务 panic，`run` 随之 panic。

use std::future::Future;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use futures::future::BoxFuture;
use tokio::task::{JoinError, JoinSet};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

use super::broker::PubsubClientProvider;
use super::client::{SubscribeOption, Subscription};
use super::message::Message;
use crate::error::{Result, SdkError, ServiceResult};
use crate::runtime::{Runnable, Service};

/// 消息处理函数
pub type ProcessFn = Arc<dyn Fn(Message) -> BoxFuture<'static, ()> + Send + Sync>;

/// 由异步闭包构造 [`ProcessFn`]
pub fn process_fn<F, Fut>(f: F) -> ProcessFn
where
    F: Fn(Message) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = ()> + Send + 'static,
{
    Arc::new(move |message| Box::pin(f(message)))
}

/// 订阅组件配置
#[derive(Clone, Default)]
pub struct SubscriberConfig {
    name: Option<String>,
    event: String,
    max_concurrent: i32,
    client: Option<Arc<dyn PubsubClientProvider>>,
    process: Option<ProcessFn>,
    wait_for_process: bool,
}

impl SubscriberConfig {
    pub fn new(event: impl Into<String>) -> Self {
        Self {
            event: event.into(),
            ..Self::default()
        }
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    pub fn with_max_concurrent(mut self, max_concurrent: i32) -> Self {
        self.max_concurrent = max_concurrent;
        self
    }

    pub fn with_client<P: PubsubClientProvider>(mut self, client: Arc<P>) -> Self {
        self.client = Some(client);
        self
    }

    pub fn with_process(mut self, process: ProcessFn) -> Self {
        self.process = Some(process);
        self
    }

    pub fn with_process_fn<F, Fut>(self, f: F) -> Self
    where
        F: Fn(Message) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        self.with_process(process_fn(f))
    }

    /// `stop` 是否等待在途处理函数全部完成
    ///
    /// 不等待时在途任务被分离，之后未确认返回的处理函数只记录错误日志，不再影响 `run`。
    pub fn with_wait_for_process(mut self, wait: bool) -> Self {
        self.wait_for_process = wait;
        self
    }
}

pub struct SubscriberService {
    name: String,
    event: String,
    max_concurrent: i32,
    client: Arc<dyn PubsubClientProvider>,
    process: ProcessFn,
    wait_for_process: bool,
    shutdown: CancellationToken,
    finished: CancellationToken,
    running: AtomicBool,
}

impl SubscriberService {
    /// 校验配置：event、client、处理函数都必须提供
    pub fn try_new(config: SubscriberConfig) -> Result<Self> {
        if config.event.is_empty() {
            return Err(SdkError::configuration("subscriber event is required"));
        }
        let client = config.client.ok_or_else(|| {
            SdkError::configuration(format!("subscriber of {} requires a client provider", config.event))
        })?;
        let process = config.process.ok_or_else(|| {
            SdkError::configuration(format!("subscriber of {} requires a process function", config.event))
        })?;

        Ok(Self {
            name: config
                .name
                .unwrap_or_else(|| format!("subscriber-{}", config.event)),
            event: config.event,
            max_concurrent: config.max_concurrent,
            client,
            process,
            wait_for_process: config.wait_for_process,
            shutdown: CancellationToken::new(),
            finished: CancellationToken::new(),
            running: AtomicBool::new(false),
        })
    }

    /// # Panics
    /// 配置不完整时 panic。
    pub fn new(config: SubscriberConfig) -> Self {
        match Self::try_new(config) {
            Ok(service) => service,
            Err(err) => panic!("invalid subscriber configuration: {err}"),
        }
    }

    pub fn event(&self) -> &str {
        &self.event
    }

    async fn subscribe(&self) -> Result<Subscription> {
        let client = self.client.pubsub_client()?;
        let token = self.client.sub_token(&self.event)?;
        let option = SubscribeOption::new(&self.event, token).with_max_concurrent(self.max_concurrent);
        client.subscribe(&self.shutdown, option).await
    }
}

async fn dispatch(process: ProcessFn, message: Message) {
    let handle = message.clone();
    process(message).await;
    if !handle.is_settled() {
        // 未等待的在途任务已被分离，panic 只能通过日志和 panic hook 观察到
        error!(
            message_id = %handle.id(),
            tag = handle.tag(),
            "❌ Message returned from processing without ack or redeliver"
        );
        panic!(
            "message {} (tag {}) returned from processing without ack or redeliver",
            handle.id(),
            handle.tag()
        );
    }
}

fn reap(joined: std::result::Result<(), JoinError>) {
    if let Err(err) = joined {
        if err.is_panic() {
            std::panic::resume_unwind(err.into_panic());
        }
    }
}

#[async_trait]
impl Service for SubscriberService {
    fn name(&self) -> &str {
        &self.name
    }
}

#[async_trait]
impl Runnable for SubscriberService {
    async fn run(&self) -> ServiceResult {
        self.running.store(true, Ordering::SeqCst);
        let _finished = self.finished.clone().drop_guard();

        let mut subscription = match self.subscribe().await {
            Ok(subscription) => subscription,
            Err(err) => panic!("{} failed to subscribe to {}: {err}", self.name, self.event),
        };
        info!(service = %self.name, event = %self.event, "Subscriber running");

        let mut in_flight = JoinSet::new();
        loop {
            tokio::select! {
                message = subscription.recv() => match message {
                    Some(message) => {
                        in_flight.spawn(dispatch(Arc::clone(&self.process), message));
                    }
                    None => break,
                },
                Some(joined) = in_flight.join_next(), if !in_flight.is_empty() => reap(joined),
            }
        }

        debug!(service = %self.name, in_flight = in_flight.len(), "Subscription closed");
        if self.wait_for_process {
            while let Some(joined) = in_flight.join_next().await {
                reap(joined);
            }
        } else {
            in_flight.detach_all();
        }
        info!(service = %self.name, "Subscriber stopped");
        Ok(())
    }

    async fn stop(&self) {
        self.shutdown.cancel();
        if self.wait_for_process && self.running.load(Ordering::SeqCst) {
            self.finished.cancelled().await;
        }
    }
}
