//! Pub/Sub 流式客户端

use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};
use std::time::Duration;

use bytes::Bytes;
use futures::Stream;
use tokio::sync::{mpsc, oneshot};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::grpc::GrpcTransport;
use super::message::{Message, StreamWriter};
use super::proto::{PublishRequest, SubscribeOptions, SubscribeRequest, duration_to_proto};
use super::transport::{BrokerTransport, FrameSource, SubscribeStream};
use crate::error::{Result, SdkError};

/// 客户端配置
#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// 订阅后等待早期错误的时间（默认 1 秒）
    pub setup_wait: Duration,
    /// 投递通道容量（默认 1）
    pub delivery_buffer: usize,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            setup_wait: Duration::from_secs(1),
            delivery_buffer: 1,
        }
    }
}

impl ClientConfig {
    pub fn with_setup_wait(mut self, wait: Duration) -> Self {
        self.setup_wait = wait;
        self
    }

    pub fn with_delivery_buffer(mut self, buffer: usize) -> Self {
        self.delivery_buffer = buffer.max(1);
        self
    }
}

/// 发布请求
#[derive(Debug, Clone)]
pub struct Publishing {
    pub event: String,
    pub token: String,
    pub data: Bytes,
    pub delay: Option<Duration>,
}

impl Publishing {
    pub fn new(event: impl Into<String>, token: impl Into<String>, data: impl Into<Bytes>) -> Self {
        Self {
            event: event.into(),
            token: token.into(),
            data: data.into(),
            delay: None,
        }
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }
}

/// 订阅选项
#[derive(Debug, Clone)]
pub struct SubscribeOption {
    pub event: String,
    pub token: String,
    /// 同时在途的最大消息数，0 表示由 broker 决定
    pub max_concurrent: i32,
}

impl SubscribeOption {
    pub fn new(event: impl Into<String>, token: impl Into<String>) -> Self {
        Self {
            event: event.into(),
            token: token.into(),
            max_concurrent: 0,
        }
    }

    pub fn with_max_concurrent(mut self, max_concurrent: i32) -> Self {
        self.max_concurrent = max_concurrent;
        self
    }
}

/// Pub/Sub 客户端
///
/// 没有传输层的客户端处于 "broker disabled" 状态，发布和订阅都返回 `BrokerDisabled`。
#[derive(Clone)]
pub struct PubsubClient {
    transport: Option<Arc<dyn BrokerTransport>>,
    config: ClientConfig,
}

impl std::fmt::Debug for PubsubClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PubsubClient")
            .field("connected", &self.is_connected())
            .field("config", &self.config)
            .finish()
    }
}

impl PubsubClient {
    pub fn new(transport: Arc<dyn BrokerTransport>) -> Self {
        Self {
            transport: Some(transport),
            config: ClientConfig::default(),
        }
    }

    /// 通过 gRPC 连接 broker（延迟连接）
    pub fn connect_lazy(endpoint: &str) -> Result<Self> {
        let transport = GrpcTransport::connect_lazy(endpoint)?;
        Ok(Self::new(Arc::new(transport)))
    }

    pub fn disabled() -> Self {
        Self {
            transport: None,
            config: ClientConfig::default(),
        }
    }

    pub fn with_config(mut self, config: ClientConfig) -> Self {
        self.config = config;
        self
    }

    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    pub fn is_connected(&self) -> bool {
        self.transport.is_some()
    }

    fn transport(&self) -> Result<&Arc<dyn BrokerTransport>> {
        self.transport.as_ref().ok_or_else(SdkError::broker_disabled)
    }

    /// 发布消息，返回 broker 分配的消息 ID
    ///
    /// event 和 token 原样交给 broker 校验。
    pub async fn publish(&self, publishing: Publishing) -> Result<String> {
        let transport = self.transport()?;
        let event = publishing.event.clone();
        let response = transport
            .publish(PublishRequest {
                event: publishing.event,
                token: publishing.token,
                data: publishing.data,
                delay: publishing.delay.map(duration_to_proto),
            })
            .await?;
        debug!(event = %event, message_id = %response.message_id, "Message published");
        Ok(response.message_id)
    }

    /// 订阅事件
    ///
    /// 打开订阅流并发送订阅选项后，最多等待 `setup_wait` 以暴露早期错误（如 token 无效）。
    /// 之后的错误只体现为投递通道关闭。取消 `ctx` 会结束订阅。
    pub async fn subscribe(
        &self,
        ctx: &CancellationToken,
        option: SubscribeOption,
    ) -> Result<Subscription> {
        let transport = self.transport()?;
        let token = ctx.child_token();

        let SubscribeStream { mut sink, source } = transport.open_stream().await?;
        sink.send(SubscribeRequest::options(SubscribeOptions {
            event: option.event.clone(),
            token: option.token,
            max_concurrent: option.max_concurrent,
        }))
        .await?;

        let writer = Arc::new(StreamWriter::new(sink));
        let (deliveries_tx, deliveries_rx) = mpsc::channel(self.config.delivery_buffer.max(1));
        let (exit_tx, exit_rx) = oneshot::channel();

        tokio::spawn(receive_loop(
            option.event.clone(),
            source,
            writer,
            deliveries_tx,
            token.clone(),
            exit_tx,
        ));

        if let Ok(Ok(Err(err))) = tokio::time::timeout(self.config.setup_wait, exit_rx).await {
            warn!(event = %option.event, error = %err, "❌ Subscribe failed");
            return Err(err);
        }

        info!(event = %option.event, max_concurrent = option.max_concurrent, "Subscribed");
        Ok(Subscription {
            event: option.event,
            deliveries: deliveries_rx,
            token,
        })
    }
}

async fn receive_loop(
    event: String,
    mut source: Box<dyn FrameSource>,
    writer: Arc<StreamWriter>,
    deliveries: mpsc::Sender<Message>,
    token: CancellationToken,
    exit: oneshot::Sender<Result<()>>,
) {
    let mut tag: u64 = 0;

    let result = loop {
        let frame = tokio::select! {
            biased;
            _ = token.cancelled() => break Ok(()),
            frame = source.recv() => frame,
        };
        let delivered = match frame {
            Ok(Some(delivered)) => delivered,
            Ok(None) => break Ok(()),
            Err(err) => break Err(err),
        };

        tag += 1;
        let message = match Message::from_delivery(delivered, tag, Arc::clone(&writer)) {
            Ok(message) => message,
            Err(err) => break Err(err),
        };

        tokio::select! {
            biased;
            _ = token.cancelled() => break Ok(()),
            sent = deliveries.send(message) => {
                if sent.is_err() {
                    break Ok(());
                }
            }
        }
    };

    token.cancel();
    drop(deliveries);
    drop(source);

    match &result {
        Ok(()) => debug!(event = %event, delivered = tag, "Subscription ended"),
        Err(err) => warn!(event = %event, delivered = tag, error = %err, "⚠️ Subscription ended with error"),
    }
    let _ = exit.send(result);
}

/// 一次订阅会话
///
/// 投递通道关闭表示会话结束。丢弃时自动取消订阅。
#[derive(Debug)]
pub struct Subscription {
    event: String,
    deliveries: mpsc::Receiver<Message>,
    token: CancellationToken,
}

impl Subscription {
    pub fn event(&self) -> &str {
        &self.event
    }

    /// 下一条消息，会话结束后返回 `None`
    pub async fn recv(&mut self) -> Option<Message> {
        self.deliveries.recv().await
    }

    pub fn cancel(&self) {
        self.token.cancel();
    }

    pub fn is_cancelled(&self) -> bool {
        self.token.is_cancelled()
    }
}

impl Stream for Subscription {
    type Item = Message;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Message>> {
        self.get_mut().deliveries.poll_recv(cx)
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.token.cancel();
    }
}
