//! Flare Service SDK
//!
//! 微服务运行时 SDK：
//! - 应用编排：组件注册、按序配置、并行运行、关键组件监视、信号驱动的热加载与优雅关闭
//! - 流式 Pub/Sub 客户端与订阅组件：基于单条双向流的 ack / redeliver 协议
//! - 固定并发的任务池

pub mod config;
pub mod error;
pub mod flags;
pub mod logging;
pub mod pubsub;
pub mod runtime;
pub mod worker_pool;

// Re-exports
pub use config::{LogConfig, LogFormat, PubsubConfig, SdkConfig, WorkerPoolConfig};
pub use error::{ErrorBuilder, ErrorCategory, ErrorCode, Result, SdkError, ServiceResult};
pub use flags::{FlagSet, ParsedFlags};
pub use logging::LoggerService;

// 运行时 re-exports
pub use runtime::{
    AppConfig, AppExit, AppState, Application, Reloadable, Runnable, Service, ServiceGroup,
    ShutdownWait,
};

// Pub/Sub re-exports
pub use pubsub::{
    BrokerService, ClientConfig, Message, MemoryBroker, PubsubClient, PubsubClientProvider,
    Publishing, SubscribeOption, SubscriberConfig, SubscriberService, Subscription,
};

pub use worker_pool::{Task, WorkerPool};
