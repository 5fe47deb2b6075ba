//! 订阅消息句柄
//!
//! 每条 [`Message`] 持有自己的流内标签和共享的流写入端。
//! 必须且只能调用一次 [`Message::ack`] 或 [`Message::redeliver`]，
//! 第二次调用返回 `MessageAlreadySettled` 错误且不发送任何帧。

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use bytes::Bytes;
use chrono::{DateTime, Utc};
use tokio::sync::Mutex;

use super::proto::{DeliveredMessage, SubscribeRequest, duration_to_proto};
use super::transport::FrameSink;
use crate::error::{Result, SdkError};

/// 订阅流写入端，一次只发送一帧
pub(crate) struct StreamWriter {
    sink: Mutex<Box<dyn FrameSink>>,
}

impl StreamWriter {
    pub(crate) fn new(sink: Box<dyn FrameSink>) -> Self {
        Self {
            sink: Mutex::new(sink),
        }
    }

    pub(crate) async fn send(&self, frame: SubscribeRequest) -> Result<()> {
        let mut sink = self.sink.lock().await;
        sink.send(frame).await
    }
}

/// broker 投递的一条消息
#[derive(Clone)]
pub struct Message {
    id: String,
    data: Bytes,
    delivered_count: i32,
    created: DateTime<Utc>,
    tag: u64,
    writer: Arc<StreamWriter>,
    settled: Arc<AtomicBool>,
}

impl std::fmt::Debug for Message {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Message")
            .field("id", &self.id)
            .field("tag", &self.tag)
            .field("delivered_count", &self.delivered_count)
            .field("created", &self.created)
            .field("len", &self.data.len())
            .field("settled", &self.is_settled())
            .finish()
    }
}

impl Message {
    pub(crate) fn from_delivery(
        delivered: DeliveredMessage,
        tag: u64,
        writer: Arc<StreamWriter>,
    ) -> Result<Self> {
        let created = delivered
            .created
            .ok_or_else(|| SdkError::invalid_timestamp(format!("message {} has no created time", delivered.id)))?;
        let nanos = u32::try_from(created.nanos)
            .map_err(|_| SdkError::invalid_timestamp(format!("negative nanos in message {}", delivered.id)))?;
        let created = DateTime::<Utc>::from_timestamp(created.seconds, nanos)
            .ok_or_else(|| SdkError::invalid_timestamp(format!("created time out of range in message {}", delivered.id)))?;

        Ok(Self {
            id: delivered.id,
            data: delivered.data,
            delivered_count: delivered.delivered_count,
            created,
            tag,
            writer,
            settled: Arc::new(AtomicBool::new(false)),
        })
    }

    /// broker 分配的消息 ID
    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn data(&self) -> &Bytes {
        &self.data
    }

    pub fn delivered_count(&self) -> i32 {
        self.delivered_count
    }

    pub fn created(&self) -> DateTime<Utc> {
        self.created
    }

    /// 流内序号，从 1 开始
    pub fn tag(&self) -> u64 {
        self.tag
    }

    /// 是否已 ack 或 redeliver
    pub fn is_settled(&self) -> bool {
        self.settled.load(Ordering::Acquire)
    }

    pub async fn ack(&self, note: &str) -> Result<()> {
        self.settle()?;
        self.writer
            .send(SubscribeRequest::ack(self.tag, note))
            .await
    }

    /// 请求 broker 在 `delay` 后重新投递，`Duration::ZERO` 表示立即
    pub async fn redeliver(&self, note: &str, delay: Duration) -> Result<()> {
        self.settle()?;
        self.writer
            .send(SubscribeRequest::redeliver(
                self.tag,
                note,
                Some(duration_to_proto(delay)),
            ))
            .await
    }

    fn settle(&self) -> Result<()> {
        if self.settled.swap(true, Ordering::AcqRel) {
            return Err(SdkError::already_settled(&self.id));
        }
        Ok(())
    }
}
