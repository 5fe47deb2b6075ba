//! 应用运行配置

use crate::config::LogConfig;
use std::path::PathBuf;
use std::time::Duration;

/// 应用运行配置
#[derive(Debug, Clone)]
pub struct AppConfig {
    /// 应用名称（默认取可执行文件名）
    pub name: String,
    /// 命令行参数（不含程序名），为空时读取进程参数
    pub args: Option<Vec<String>>,
    /// env 文件路径，为空时读取 `ENV_FILE`，再退回 `.env`
    pub env_file: Option<PathBuf>,
    /// 日志默认配置
    pub log: LogConfig,
    /// 是否监听 SIGINT / SIGTERM / SIGHUP（默认 true）
    pub handle_signals: bool,
    /// 所有 `stop` 返回后等待 `run` 结束的时间（默认 5 秒），超时则中止
    pub shutdown_timeout: Duration,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            name: default_app_name(),
            args: None,
            env_file: None,
            log: LogConfig::default(),
            handle_signals: true,
            shutdown_timeout: Duration::from_secs(5),
        }
    }
}

fn default_app_name() -> String {
    std::env::current_exe()
        .ok()
        .and_then(|path| path.file_stem().map(|s| s.to_string_lossy().into_owned()))
        .unwrap_or_else(|| "app".to_string())
}

impl AppConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    /// 使用显式参数列表代替进程参数
    pub fn with_args<I, T>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = T>,
        T: Into<String>,
    {
        self.args = Some(args.into_iter().map(Into::into).collect());
        self
    }

    pub fn with_env_file(mut self, path: impl Into<PathBuf>) -> Self {
        self.env_file = Some(path.into());
        self
    }

    pub fn with_log(mut self, log: LogConfig) -> Self {
        self.log = log;
        self
    }

    pub fn with_signal_handling(mut self, enable: bool) -> Self {
        self.handle_signals = enable;
        self
    }

    pub fn with_shutdown_timeout(mut self, timeout: Duration) -> Self {
        self.shutdown_timeout = timeout;
        self
    }
}
