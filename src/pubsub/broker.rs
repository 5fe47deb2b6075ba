//! broker 连接组件
//!
//! [`BrokerService`] 是一个普通组件：声明 broker 地址和各事件的发布 / 订阅 token 参数，
//! 配置阶段创建 [`PubsubClient`]，供订阅组件和业务代码使用。

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, PoisonError, RwLock};
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use tracing::{info, warn};

use super::client::{ClientConfig, PubsubClient, Publishing};
use super::transport::BrokerTransport;
use crate::config::PubsubConfig;
use crate::error::{Result, SdkError, ServiceResult};
use crate::flags::{FlagSet, ParsedFlags};
use crate::runtime::Service;

pub const ENDPOINT_FLAG: &str = "grpc-endpoint-pubsub";

/// 事件发布 token 参数名
pub fn pub_token_flag(event: &str) -> String {
    format!("pubsub-pub-token-{event}")
}

/// 事件订阅 token 参数名
pub fn sub_token_flag(event: &str) -> String {
    format!("pubsub-sub-token-{event}")
}

/// 提供 Pub/Sub 客户端和事件 token
pub trait PubsubClientProvider: Send + Sync + 'static {
    fn pubsub_client(&self) -> Result<PubsubClient>;

    fn pub_token(&self, event: &str) -> Result<String>;

    fn sub_token(&self, event: &str) -> Result<String>;
}

struct Configured {
    client: PubsubClient,
    pub_tokens: HashMap<String, String>,
    sub_tokens: HashMap<String, String>,
}

pub struct BrokerService {
    events: Vec<String>,
    default_endpoint: String,
    client_config: ClientConfig,
    transport: Option<Arc<dyn BrokerTransport>>,
    configured: RwLock<Option<Configured>>,
}

impl BrokerService {
    /// # Panics
    /// 事件重复声明时 panic。
    pub fn new<I, S>(events: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut seen = HashSet::new();
        let events: Vec<String> = events
            .into_iter()
            .map(Into::into)
            .inspect(|event| {
                if !seen.insert(event.clone()) {
                    panic!("pubsub event declared twice: {event}");
                }
            })
            .collect();

        Self {
            events,
            default_endpoint: String::new(),
            client_config: ClientConfig::default(),
            transport: None,
            configured: RwLock::new(None),
        }
    }

    pub fn from_config(config: &PubsubConfig) -> Self {
        Self::new(config.events.iter().cloned())
            .with_default_endpoint(config.endpoint.clone())
            .with_client_config(config.client_config())
    }

    /// 地址参数的默认值
    pub fn with_default_endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.default_endpoint = endpoint.into();
        self
    }

    pub fn with_client_config(mut self, config: ClientConfig) -> Self {
        self.client_config = config;
        self
    }

    /// 使用指定传输层，忽略地址参数
    pub fn with_transport(mut self, transport: Arc<dyn BrokerTransport>) -> Self {
        self.transport = Some(transport);
        self
    }

    pub fn events(&self) -> &[String] {
        &self.events
    }

    /// 使用配置的发布 token 发布消息
    pub async fn publish(
        &self,
        event: &str,
        data: impl Into<Bytes>,
        delay: Option<Duration>,
    ) -> Result<String> {
        let client = self.pubsub_client()?;
        let mut publishing = Publishing::new(event, self.pub_token(event)?, data);
        if let Some(delay) = delay {
            publishing = publishing.with_delay(delay);
        }
        client.publish(publishing).await
    }

    fn with_configured<T>(&self, f: impl FnOnce(&Configured) -> Result<T>) -> Result<T> {
        let guard = self
            .configured
            .read()
            .unwrap_or_else(PoisonError::into_inner);
        match guard.as_ref() {
            Some(configured) => f(configured),
            None => Err(SdkError::configuration("broker service is not configured")),
        }
    }
}

fn lookup(tokens: &HashMap<String, String>, event: &str, kind: &str) -> Result<String> {
    tokens
        .get(event)
        .cloned()
        .ok_or_else(|| SdkError::configuration(format!("no {kind} token declared for event {event}")))
}

impl PubsubClientProvider for BrokerService {
    fn pubsub_client(&self) -> Result<PubsubClient> {
        self.with_configured(|c| Ok(c.client.clone()))
    }

    fn pub_token(&self, event: &str) -> Result<String> {
        self.with_configured(|c| lookup(&c.pub_tokens, event, "publish"))
    }

    fn sub_token(&self, event: &str) -> Result<String> {
        self.with_configured(|c| lookup(&c.sub_tokens, event, "subscribe"))
    }
}

#[async_trait]
impl Service for BrokerService {
    fn name(&self) -> &str {
        "pubsub-broker"
    }

    fn init_flags(&self, flags: &mut FlagSet) {
        flags.string(ENDPOINT_FLAG, &self.default_endpoint, "pubsub broker gRPC endpoint");
        for event in &self.events {
            flags
                .string(&pub_token_flag(event), "", &format!("publish token of event {event}"))
                .string(&sub_token_flag(event), "", &format!("subscribe token of event {event}"));
        }
    }

    async fn configure(&self, flags: &ParsedFlags) -> ServiceResult {
        let endpoint = flags.get_str(ENDPOINT_FLAG).unwrap_or_default();

        let client = match &self.transport {
            Some(transport) => PubsubClient::new(Arc::clone(transport)),
            None if endpoint.is_empty() => {
                warn!("⚠️ Pubsub broker endpoint not set, broker disabled");
                PubsubClient::disabled()
            }
            None => PubsubClient::connect_lazy(&endpoint)?,
        }
        .with_config(self.client_config.clone());

        let mut pub_tokens = HashMap::new();
        let mut sub_tokens = HashMap::new();
        for event in &self.events {
            pub_tokens.insert(
                event.clone(),
                flags.get_str(&pub_token_flag(event)).unwrap_or_default(),
            );
            sub_tokens.insert(
                event.clone(),
                flags.get_str(&sub_token_flag(event)).unwrap_or_default(),
            );
        }

        info!(
            endpoint = %endpoint,
            connected = client.is_connected(),
            events = self.events.len(),
            "Pubsub broker configured"
        );
        *self
            .configured
            .write()
            .unwrap_or_else(PoisonError::into_inner) = Some(Configured {
            client,
            pub_tokens,
            sub_tokens,
        });
        Ok(())
    }
}
