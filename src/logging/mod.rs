//! 日志组件
//!
//! [`LoggerService`] 由 [`Application`](crate::runtime::Application) 自动注册，
//! 在配置阶段安装全局 tracing subscriber，热加载时从 `LOG_LEVEL` 重新读取日志级别。

use std::sync::Mutex;

use async_trait::async_trait;
use tracing::{debug, info};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, Layer, Registry, fmt, reload};

use crate::config::{LogConfig, LogFormat};
use crate::error::{SdkError, ServiceResult};
use crate::flags::{FlagSet, ParsedFlags, env_name};
use crate::runtime::{Reloadable, Service};

pub const LOG_LEVEL_FLAG: &str = "log-level";
pub const LOG_FORMAT_FLAG: &str = "log-format";

type FilterHandle = reload::Handle<EnvFilter, Registry>;

pub struct LoggerService {
    defaults: LogConfig,
    level: Mutex<String>,
    handle: Mutex<Option<FilterHandle>>,
}

impl LoggerService {
    pub fn new(defaults: LogConfig) -> Self {
        Self {
            level: Mutex::new(defaults.level.clone()),
            defaults,
            handle: Mutex::new(None),
        }
    }

    /// 当前生效的日志级别表达式
    pub fn level(&self) -> String {
        self.level
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .clone()
    }

    /// 是否由本组件安装了全局 subscriber
    pub fn owns_subscriber(&self) -> bool {
        self.handle
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .is_some()
    }

    fn set_level(&self, level: &str) {
        *self
            .level
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner) = level.to_string();
    }
}

fn parse_filter(level: &str) -> Result<EnvFilter, SdkError> {
    EnvFilter::try_new(level)
        .map_err(|err| SdkError::configuration(format!("invalid log level `{level}`: {err}")))
}

#[async_trait]
impl Service for LoggerService {
    fn name(&self) -> &str {
        "logger"
    }

    fn init_flags(&self, flags: &mut FlagSet) {
        flags
            .string(LOG_LEVEL_FLAG, &self.defaults.level, "log level or filter directives")
            .string(LOG_FORMAT_FLAG, self.defaults.format.as_str(), "log format: text | json");
    }

    async fn configure(&self, flags: &ParsedFlags) -> ServiceResult {
        let level = flags
            .get_str(LOG_LEVEL_FLAG)
            .filter(|level| !level.is_empty())
            .unwrap_or_else(|| self.defaults.level.clone());
        let format = flags
            .get::<LogFormat>(LOG_FORMAT_FLAG)?
            .unwrap_or(self.defaults.format);
        let filter = parse_filter(&level)?;

        let (filter_layer, handle) = reload::Layer::new(filter);
        let fmt_layer = match format {
            LogFormat::Text => fmt::layer().with_target(true).boxed(),
            LogFormat::Json => fmt::layer().json().boxed(),
        };

        match tracing_subscriber::registry()
            .with(filter_layer)
            .with(fmt_layer)
            .try_init()
        {
            Ok(()) => {
                *self
                    .handle
                    .lock()
                    .unwrap_or_else(std::sync::PoisonError::into_inner) = Some(handle);
                info!(level = %level, format = format.as_str(), "Logger initialized");
            }
            Err(err) => {
                debug!(error = %err, "Global subscriber already installed, keeping it");
            }
        }
        self.set_level(&level);
        Ok(())
    }
}

#[async_trait]
impl Reloadable for LoggerService {
    async fn reload(&self) -> ServiceResult {
        let level = std::env::var(env_name(LOG_LEVEL_FLAG)).unwrap_or_else(|_| self.level());
        let filter = parse_filter(&level)?;

        let handle = self
            .handle
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .clone();
        match handle {
            Some(handle) => {
                handle.reload(filter)?;
                info!(level = %level, "Log level reloaded");
            }
            None => debug!(level = %level, "Subscriber owned elsewhere, only recording level"),
        }
        self.set_level(&level);
        Ok(())
    }
}
