//! SDK 配置文件
//!
//! TOML 配置，分为 `[app]`、`[log]`、`[pubsub]`、`[worker_pool]` 几个部分。
//! 命令行参数和环境变量仍由各组件的 flag 声明负责，这里只提供默认值。

use crate::error::{Result, SdkError};
use crate::pubsub::ClientConfig;
use crate::runtime::AppConfig;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct SdkConfig {
    #[serde(default)]
    pub app: AppSection,
    #[serde(default)]
    pub log: LogConfig,
    pub pubsub: Option<PubsubConfig>,
    pub worker_pool: Option<WorkerPoolConfig>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct AppSection {
    pub name: Option<String>,
    pub env_file: Option<String>,
    #[serde(default = "default_true")]
    pub handle_signals: bool,
    #[serde(default = "default_shutdown_timeout_ms")]
    pub shutdown_timeout_ms: u64,
}

impl Default for AppSection {
    fn default() -> Self {
        Self {
            name: None,
            env_file: None,
            handle_signals: true,
            shutdown_timeout_ms: 5000,
        }
    }
}

/// 日志输出格式
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Text,
    Json,
}

impl LogFormat {
    pub fn as_str(&self) -> &'static str {
        match self {
            LogFormat::Text => "text",
            LogFormat::Json => "json",
        }
    }
}

impl std::str::FromStr for LogFormat {
    type Err = SdkError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "text" | "" => Ok(LogFormat::Text),
            "json" => Ok(LogFormat::Json),
            other => Err(SdkError::configuration(format!(
                "unknown log format `{other}`, expected `text` or `json`"
            ))),
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct LogConfig {
    #[serde(default = "default_log_level")]
    pub level: String,
    #[serde(default)]
    pub format: LogFormat,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: LogFormat::Text,
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct PubsubConfig {
    /// broker gRPC 地址，为空表示不启用 broker
    #[serde(default)]
    pub endpoint: String,
    /// 需要 token 的事件列表
    #[serde(default)]
    pub events: Vec<String>,
    #[serde(default = "default_setup_wait_ms")]
    pub setup_wait_ms: u64,
    #[serde(default = "default_delivery_buffer")]
    pub delivery_buffer: usize,
}

impl PubsubConfig {
    pub fn client_config(&self) -> ClientConfig {
        ClientConfig::default()
            .with_setup_wait(Duration::from_millis(self.setup_wait_ms))
            .with_delivery_buffer(self.delivery_buffer)
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct WorkerPoolConfig {
    /// 为空时使用 CPU 核数
    pub max_concurrent: Option<usize>,
    pub max_queued: usize,
    #[serde(default = "default_true")]
    pub log_enabled: bool,
}

fn default_true() -> bool {
    true
}

fn default_shutdown_timeout_ms() -> u64 {
    5000
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_setup_wait_ms() -> u64 {
    1000
}

fn default_delivery_buffer() -> usize {
    1
}

impl SdkConfig {
    pub fn load_from_file(path: impl AsRef<Path>) -> Result<Self> {
        let content = std::fs::read_to_string(path.as_ref())?;
        Self::from_toml_str(&content)
    }

    pub fn from_toml_str(content: &str) -> Result<Self> {
        let config: SdkConfig = toml::from_str(content)?;
        Ok(config)
    }

    /// 转换为应用运行配置
    pub fn app_config(&self) -> AppConfig {
        let mut config = AppConfig::default()
            .with_log(self.log.clone())
            .with_signal_handling(self.app.handle_signals)
            .with_shutdown_timeout(Duration::from_millis(self.app.shutdown_timeout_ms));
        if let Some(name) = &self.app.name {
            config = config.with_name(name.clone());
        }
        if let Some(env_file) = &self.app.env_file {
            config = config.with_env_file(env_file);
        }
        config
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_full_document() {
        let config = SdkConfig::from_toml_str(
            r#"
            [app]
            name = "orders"
            shutdown_timeout_ms = 250

            [log]
            level = "debug"
            format = "json"

            [pubsub]
            endpoint = "broker:9000"
            events = ["orders"]

            [worker_pool]
            max_concurrent = 4
            max_queued = 16
            "#,
        )
        .unwrap();

        assert_eq!(config.app.name.as_deref(), Some("orders"));
        assert!(config.app.handle_signals);
        assert_eq!(config.log.format, LogFormat::Json);
        let pubsub = config.pubsub.as_ref().unwrap();
        assert_eq!(pubsub.setup_wait_ms, 1000);
        assert_eq!(pubsub.client_config().delivery_buffer, 1);
        assert_eq!(config.worker_pool.as_ref().unwrap().max_queued, 16);

        let app = config.app_config();
        assert_eq!(app.name, "orders");
        assert_eq!(app.shutdown_timeout, Duration::from_millis(250));
    }

    #[test]
    fn empty_document_uses_defaults() {
        let config = SdkConfig::from_toml_str("").unwrap();
        assert_eq!(config.log.level, "info");
        assert!(config.pubsub.is_none());
    }

    #[test]
    fn invalid_document_is_configuration_error() {
        let err = SdkConfig::from_toml_str("[log\nlevel=").unwrap_err();
        assert!(err.is(crate::error::ErrorCode::ConfigurationError));
    }
}
