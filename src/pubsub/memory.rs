//! 进程内 broker
//!
//! 实现 [`BrokerTransport`]，用于本地开发和测试：
//! - 每个事件一个队列，多个订阅流竞争消费
//! - 订阅选项中的 `max_concurrent` 限制每条流的在途消息数（0 为不限）
//! - ack 删除消息；redeliver 在延迟后重新入队；流断开时未确认的消息重新入队
//! - 记录所有 ack / redeliver 控制帧，便于断言

use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, SystemTime};

use async_trait::async_trait;
use bytes::Bytes;
use tokio::sync::Notify;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use super::proto::{
    DeliveredMessage, PublishRequest, PublishResponse, SubscribeOptions, SubscribeRequest,
    duration_from_proto, subscribe_request::Frame,
};
use super::transport::{BrokerTransport, FrameSink, FrameSource, SubscribeStream};
use crate::error::{Result, SdkError};

/// 订阅流上收到的控制帧
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ControlFrame {
    Ack {
        event: String,
        tag: u64,
        message_id: Option<String>,
        note: String,
    },
    Redeliver {
        event: String,
        tag: u64,
        message_id: Option<String>,
        note: String,
        delay: Duration,
    },
}

impl ControlFrame {
    pub fn tag(&self) -> u64 {
        match self {
            ControlFrame::Ack { tag, .. } | ControlFrame::Redeliver { tag, .. } => *tag,
        }
    }

    /// 帧对应的消息 ID，标签未知时为 `None`
    pub fn message_id(&self) -> Option<&str> {
        match self {
            ControlFrame::Ack { message_id, .. } | ControlFrame::Redeliver { message_id, .. } => {
                message_id.as_deref()
            }
        }
    }

    pub fn is_ack(&self) -> bool {
        matches!(self, ControlFrame::Ack { .. })
    }
}

#[derive(Debug, Clone)]
struct StoredMessage {
    id: String,
    data: Bytes,
    delivered_count: i32,
    created: prost_types::Timestamp,
}

impl StoredMessage {
    fn to_delivered(&self) -> DeliveredMessage {
        DeliveredMessage {
            id: self.id.clone(),
            data: self.data.clone(),
            delivered_count: self.delivered_count,
            created: Some(self.created.clone()),
        }
    }
}

#[derive(Default)]
struct EventQueue {
    ready: VecDeque<StoredMessage>,
    notify: Arc<Notify>,
}

#[derive(Default, Clone)]
struct EventTokens {
    publish: Option<String>,
    subscribe: Option<String>,
}

struct Session {
    options: Option<SubscribeOptions>,
    in_flight: HashMap<u64, StoredMessage>,
    next_tag: u64,
    error: Option<SdkError>,
    wake: Arc<Notify>,
    closed: CancellationToken,
}

#[derive(Default)]
struct State {
    queues: HashMap<String, EventQueue>,
    tokens: HashMap<String, EventTokens>,
    sessions: HashMap<u64, Session>,
    next_session: u64,
    control_frames: Vec<ControlFrame>,
}

enum SessionPoll {
    Deliver(DeliveredMessage),
    Failed(SdkError),
    Closed,
    Wait,
}

/// 进程内 broker，克隆共享同一实例
#[derive(Clone, Default)]
pub struct MemoryBroker {
    state: Arc<Mutex<State>>,
}

impl MemoryBroker {
    pub fn new() -> Self {
        Self::default()
    }

    /// 为事件设置 token，未设置的一方接受任意 token
    pub fn with_tokens(
        self,
        event: impl Into<String>,
        publish: Option<&str>,
        subscribe: Option<&str>,
    ) -> Self {
        self.lock().tokens.insert(
            event.into(),
            EventTokens {
                publish: publish.map(str::to_string),
                subscribe: subscribe.map(str::to_string),
            },
        );
        self
    }

    fn lock(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// 已收到的 ack / redeliver 帧（按到达顺序）
    pub fn control_frames(&self) -> Vec<ControlFrame> {
        self.lock().control_frames.clone()
    }

    /// 事件队列中等待投递的消息数
    pub fn queued(&self, event: &str) -> usize {
        self.lock()
            .queues
            .get(event)
            .map(|queue| queue.ready.len())
            .unwrap_or(0)
    }

    /// 已投递但未确认的消息数
    pub fn in_flight(&self, event: &str) -> usize {
        self.lock()
            .sessions
            .values()
            .filter(|s| s.options.as_ref().is_some_and(|o| o.event == event))
            .map(|s| s.in_flight.len())
            .sum()
    }

    /// 当前打开的订阅流数量
    pub fn session_count(&self) -> usize {
        self.lock().sessions.len()
    }

    /// 关闭所有订阅流，客户端会看到流正常结束
    pub fn close_streams(&self) {
        for session in self.lock().sessions.values() {
            session.closed.cancel();
        }
    }

    fn enqueue(&self, event: &str, message: StoredMessage, front: bool) {
        let notify = {
            let mut state = self.lock();
            let queue = state.queues.entry(event.to_string()).or_default();
            if front {
                queue.ready.push_front(message);
            } else {
                queue.ready.push_back(message);
            }
            Arc::clone(&queue.notify)
        };
        notify.notify_waiters();
    }

    fn schedule(&self, event: String, message: StoredMessage, delay: Duration) {
        if delay.is_zero() {
            self.enqueue(&event, message, false);
            return;
        }
        let broker = self.clone();
        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            broker.enqueue(&event, message, false);
        });
    }

    fn queue_notify(&self, session: u64) -> Arc<Notify> {
        let mut guard = self.lock();
        let state = &mut *guard;
        let event = state
            .sessions
            .get(&session)
            .and_then(|s| s.options.as_ref())
            .map(|o| o.event.clone());
        match event {
            Some(event) => Arc::clone(&state.queues.entry(event).or_default().notify),
            None => Arc::new(Notify::new()),
        }
    }

    fn poll_session(&self, id: u64) -> SessionPoll {
        let mut guard = self.lock();
        let state = &mut *guard;
        let Some(session) = state.sessions.get_mut(&id) else {
            return SessionPoll::Closed;
        };
        if let Some(err) = session.error.take() {
            session.closed.cancel();
            return SessionPoll::Failed(err);
        }
        if session.closed.is_cancelled() {
            return SessionPoll::Closed;
        }
        let Some(options) = session.options.as_ref() else {
            return SessionPoll::Wait;
        };
        let limit = options.max_concurrent;
        if limit > 0 && session.in_flight.len() >= limit as usize {
            return SessionPoll::Wait;
        }
        let event = options.event.clone();
        let Some(mut message) = state
            .queues
            .get_mut(&event)
            .and_then(|queue| queue.ready.pop_front())
        else {
            return SessionPoll::Wait;
        };

        message.delivered_count += 1;
        session.next_tag += 1;
        let delivered = message.to_delivered();
        session.in_flight.insert(session.next_tag, message);
        SessionPoll::Deliver(delivered)
    }

    fn handle_frame(&self, id: u64, frame: SubscribeRequest) -> Result<()> {
        let mut requeue = None;
        let wake = {
            let mut guard = self.lock();
            let state = &mut *guard;
            let Some(session) = state.sessions.get_mut(&id) else {
                return Err(SdkError::connection_closed("subscribe stream closed"));
            };
            if session.closed.is_cancelled() {
                return Err(SdkError::connection_closed("subscribe stream closed"));
            }

            match frame.frame {
                Some(Frame::Options(options)) => {
                    let expected = state
                        .tokens
                        .get(&options.event)
                        .and_then(|t| t.subscribe.clone());
                    if session.options.is_some() {
                        session.error = Some(SdkError::protocol_error("subscribe options sent twice"));
                    } else if expected.is_some_and(|token| token != options.token) {
                        session.error = Some(SdkError::authentication_failed(format!(
                            "invalid subscribe token for event {}",
                            options.event
                        )));
                    } else {
                        state.queues.entry(options.event.clone()).or_default();
                        session.options = Some(options);
                    }
                }
                Some(Frame::Ack(ack)) => {
                    let event = session_event(session);
                    let removed = session.in_flight.remove(&ack.tag);
                    if removed.is_none() {
                        warn!(event = %event, tag = ack.tag, "Ack for unknown tag");
                    }
                    state.control_frames.push(ControlFrame::Ack {
                        event,
                        tag: ack.tag,
                        message_id: removed.map(|m| m.id),
                        note: ack.message,
                    });
                }
                Some(Frame::Redeliver(redeliver)) => {
                    let event = session_event(session);
                    let delay = duration_from_proto(redeliver.delay.as_ref());
                    let removed = session.in_flight.remove(&redeliver.tag);
                    state.control_frames.push(ControlFrame::Redeliver {
                        event: event.clone(),
                        tag: redeliver.tag,
                        message_id: removed.as_ref().map(|m| m.id.clone()),
                        note: redeliver.message,
                        delay,
                    });
                    requeue = removed.map(|message| (event, message, delay));
                }
                None => {
                    session.error = Some(SdkError::protocol_error("empty subscribe frame"));
                }
            }
            Arc::clone(&session.wake)
        };

        if let Some((event, message, delay)) = requeue {
            self.schedule(event, message, delay);
        }
        wake.notify_waiters();
        Ok(())
    }

    fn disconnect(&self, id: u64) {
        let (event, pending) = {
            let mut state = self.lock();
            let Some(session) = state.sessions.remove(&id) else {
                return;
            };
            let mut pending: Vec<(u64, StoredMessage)> = session.in_flight.into_iter().collect();
            pending.sort_by_key(|(tag, _)| *tag);
            (session.options.map(|o| o.event), pending)
        };

        let Some(event) = event else {
            return;
        };
        debug!(event = %event, requeued = pending.len(), "Memory subscribe stream disconnected");
        // 逆序插到队头，保持原投递顺序
        for (_, message) in pending.into_iter().rev() {
            self.enqueue(&event, message, true);
        }
    }
}

fn session_event(session: &Session) -> String {
    session
        .options
        .as_ref()
        .map(|o| o.event.clone())
        .unwrap_or_default()
}

#[async_trait]
impl BrokerTransport for MemoryBroker {
    async fn publish(&self, request: PublishRequest) -> Result<PublishResponse> {
        let expected = self
            .lock()
            .tokens
            .get(&request.event)
            .and_then(|t| t.publish.clone());
        if expected.is_some_and(|token| token != request.token) {
            return Err(SdkError::authentication_failed(format!(
                "invalid publish token for event {}",
                request.event
            )));
        }

        let id = uuid::Uuid::new_v4().to_string();
        let message = StoredMessage {
            id: id.clone(),
            data: request.data,
            delivered_count: 0,
            created: prost_types::Timestamp::from(SystemTime::now()),
        };
        self.schedule(
            request.event,
            message,
            duration_from_proto(request.delay.as_ref()),
        );
        Ok(PublishResponse { message_id: id })
    }

    async fn open_stream(&self) -> Result<SubscribeStream> {
        let wake = Arc::new(Notify::new());
        let closed = CancellationToken::new();
        let id = {
            let mut state = self.lock();
            state.next_session += 1;
            let id = state.next_session;
            state.sessions.insert(
                id,
                Session {
                    options: None,
                    in_flight: HashMap::new(),
                    next_tag: 0,
                    error: None,
                    wake: Arc::clone(&wake),
                    closed: closed.clone(),
                },
            );
            id
        };

        Ok(SubscribeStream {
            sink: Box::new(MemorySink {
                broker: self.clone(),
                session: id,
            }),
            source: Box::new(MemorySource {
                broker: self.clone(),
                session: id,
                wake,
                closed,
            }),
        })
    }
}

struct MemorySink {
    broker: MemoryBroker,
    session: u64,
}

#[async_trait]
impl FrameSink for MemorySink {
    async fn send(&mut self, frame: SubscribeRequest) -> Result<()> {
        self.broker.handle_frame(self.session, frame)
    }
}

struct MemorySource {
    broker: MemoryBroker,
    session: u64,
    wake: Arc<Notify>,
    closed: CancellationToken,
}

#[async_trait]
impl FrameSource for MemorySource {
    async fn recv(&mut self) -> Result<Option<DeliveredMessage>> {
        loop {
            let queue = self.broker.queue_notify(self.session);
            let session_changed = self.wake.notified();
            let queue_changed = queue.notified();
            tokio::pin!(session_changed, queue_changed);
            session_changed.as_mut().enable();
            queue_changed.as_mut().enable();

            match self.broker.poll_session(self.session) {
                SessionPoll::Deliver(message) => return Ok(Some(message)),
                SessionPoll::Failed(err) => return Err(err),
                SessionPoll::Closed => return Ok(None),
                SessionPoll::Wait => {
                    tokio::select! {
                        _ = &mut session_changed => {}
                        _ = &mut queue_changed => {}
                        _ = self.closed.cancelled() => {}
                    }
                }
            }
        }
    }
}

impl Drop for MemorySource {
    fn drop(&mut self) {
        self.broker.disconnect(self.session);
    }
}
