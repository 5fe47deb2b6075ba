//! broker 传输层抽象
//!
//! 客户端只依赖这里的三个 trait：gRPC 实现见 [`GrpcTransport`](super::GrpcTransport)，
//! 进程内实现见 [`MemoryBroker`](super::MemoryBroker)。

use async_trait::async_trait;

use super::proto::{DeliveredMessage, PublishRequest, PublishResponse, SubscribeRequest};
use crate::error::Result;

/// broker 连接
#[async_trait]
pub trait BrokerTransport: Send + Sync + 'static {
    /// 发布一条消息，返回 broker 分配的消息 ID
    async fn publish(&self, request: PublishRequest) -> Result<PublishResponse>;

    /// 打开一条双向订阅流
    async fn open_stream(&self) -> Result<SubscribeStream>;
}

/// 订阅流的两端
pub struct SubscribeStream {
    pub sink: Box<dyn FrameSink>,
    pub source: Box<dyn FrameSource>,
}

/// 出站帧（订阅选项 / ack / redeliver），不支持并发写
#[async_trait]
pub trait FrameSink: Send + 'static {
    async fn send(&mut self, frame: SubscribeRequest) -> Result<()>;
}

/// 入站消息，`Ok(None)` 表示流正常结束
#[async_trait]
pub trait FrameSource: Send + 'static {
    async fn recv(&mut self) -> Result<Option<DeliveredMessage>>;
}
