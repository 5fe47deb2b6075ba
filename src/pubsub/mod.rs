//! 流式 Pub/Sub
//!
//! - [`PubsubClient`]：发布和订阅，订阅基于一条双向流，ack / redeliver 帧串行写回同一条流
//! - [`BrokerService`]：broker 地址与事件 token 的参数化组件
//! - [`SubscriberService`]：并发处理订阅消息的可运行组件
//! - [`MemoryBroker`]：进程内 broker

pub mod broker;
pub mod client;
pub mod grpc;
pub mod memory;
pub mod message;
pub mod proto;
pub mod subscriber;
pub mod transport;

pub use broker::{BrokerService, PubsubClientProvider};
pub use client::{ClientConfig, PubsubClient, Publishing, SubscribeOption, Subscription};
pub use grpc::GrpcTransport;
pub use memory::{ControlFrame, MemoryBroker};
pub use message::Message;
pub use subscriber::{ProcessFn, SubscriberConfig, SubscriberService, process_fn};
pub use transport::{BrokerTransport, FrameSink, FrameSource, SubscribeStream};
