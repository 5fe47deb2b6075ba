//! 集成测试公共组件

#![allow(dead_code)]

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use flare_service_sdk::flags::{FlagSet, ParsedFlags};
use flare_service_sdk::pubsub::{MemoryBroker, PubsubClient, PubsubClientProvider};
use flare_service_sdk::{AppConfig, ClientConfig, Reloadable, Result, Runnable, Service, ServiceResult};
use tokio_util::sync::CancellationToken;

/// 测试用应用配置：不读进程参数，不监听信号
pub fn test_config(name: &str) -> AppConfig {
    AppConfig::new()
        .with_name(name)
        .with_args(Vec::<String>::new())
        .with_signal_handling(false)
        .with_shutdown_timeout(Duration::from_secs(2))
}

/// 记录生命周期事件，多个组件共享
#[derive(Clone, Default)]
pub struct Recorder {
    events: Arc<Mutex<Vec<String>>>,
}

impl Recorder {
    pub fn record(&self, event: impl Into<String>) {
        self.events.lock().unwrap().push(event.into());
    }

    pub fn events(&self) -> Vec<String> {
        self.events.lock().unwrap().clone()
    }

    /// 指定前缀的事件，去掉前缀
    pub fn with_prefix(&self, prefix: &str) -> Vec<String> {
        self.events()
            .into_iter()
            .filter_map(|e| e.strip_prefix(prefix).map(str::to_string))
            .collect()
    }

    pub fn contains(&self, event: &str) -> bool {
        self.events().iter().any(|e| e == event)
    }
}

/// 运行指定时长（或直到被停止）的组件
pub struct TestService {
    name: String,
    recorder: Recorder,
    run_for: Option<Duration>,
    fail_configure: bool,
    fail_run: bool,
    stopped: CancellationToken,
}

impl TestService {
    pub fn new(name: &str, recorder: &Recorder) -> Self {
        Self {
            name: name.to_string(),
            recorder: recorder.clone(),
            run_for: None,
            fail_configure: false,
            fail_run: false,
            stopped: CancellationToken::new(),
        }
    }

    pub fn running_for(mut self, duration: Duration) -> Self {
        self.run_for = Some(duration);
        self
    }

    pub fn failing_configure(mut self) -> Self {
        self.fail_configure = true;
        self
    }

    pub fn failing_run(mut self) -> Self {
        self.fail_run = true;
        self
    }
}

#[async_trait]
impl Service for TestService {
    fn name(&self) -> &str {
        &self.name
    }

    async fn configure(&self, _flags: &ParsedFlags) -> ServiceResult {
        self.recorder.record(format!("configure:{}", self.name));
        if self.fail_configure {
            anyhow::bail!("{} refused to configure", self.name);
        }
        Ok(())
    }

    async fn cleanup(&self) {
        self.recorder.record(format!("cleanup:{}", self.name));
    }
}

#[async_trait]
impl Runnable for TestService {
    async fn run(&self) -> ServiceResult {
        self.recorder.record(format!("run:{}", self.name));
        if self.fail_run {
            anyhow::bail!("{} failed", self.name);
        }
        match self.run_for {
            Some(duration) => {
                tokio::select! {
                    _ = tokio::time::sleep(duration) => {}
                    _ = self.stopped.cancelled() => {}
                }
            }
            None => self.stopped.cancelled().await,
        }
        self.recorder.record(format!("exit:{}", self.name));
        Ok(())
    }

    async fn stop(&self) {
        self.recorder.record(format!("stop:{}", self.name));
        self.stopped.cancel();
    }
}

/// 声明一个字符串参数并记录配置值
pub struct FlagService {
    flag: String,
    pub value: Mutex<Option<String>>,
}

impl FlagService {
    pub fn new(flag: &str) -> Self {
        Self {
            flag: flag.to_string(),
            value: Mutex::new(None),
        }
    }
}

#[async_trait]
impl Service for FlagService {
    fn name(&self) -> &str {
        "flag-service"
    }

    fn init_flags(&self, flags: &mut FlagSet) {
        flags.string(&self.flag, "default", "value captured by the test");
    }

    async fn configure(&self, flags: &ParsedFlags) -> ServiceResult {
        *self.value.lock().unwrap() = flags.get_str(&self.flag);
        Ok(())
    }
}

/// 统计热加载次数
#[derive(Default)]
pub struct ReloadCounter {
    pub reloads: AtomicUsize,
    pub fail: bool,
}

impl ReloadCounter {
    pub fn count(&self) -> usize {
        self.reloads.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Service for ReloadCounter {
    fn name(&self) -> &str {
        "reload-counter"
    }
}

#[async_trait]
impl Reloadable for ReloadCounter {
    async fn reload(&self) -> ServiceResult {
        self.reloads.fetch_add(1, Ordering::SeqCst);
        if self.fail {
            anyhow::bail!("reload failed");
        }
        Ok(())
    }
}

/// 固定客户端和 token 的提供者
pub struct StaticProvider {
    client: PubsubClient,
    token: String,
}

impl StaticProvider {
    pub fn new(broker: &MemoryBroker, token: &str) -> Self {
        Self {
            client: PubsubClient::new(Arc::new(broker.clone())).with_config(fast_client_config()),
            token: token.to_string(),
        }
    }
}

impl PubsubClientProvider for StaticProvider {
    fn pubsub_client(&self) -> Result<PubsubClient> {
        Ok(self.client.clone())
    }

    fn pub_token(&self, _event: &str) -> Result<String> {
        Ok(self.token.clone())
    }

    fn sub_token(&self, _event: &str) -> Result<String> {
        Ok(self.token.clone())
    }
}

/// 缩短订阅早期错误窗口
pub fn fast_client_config() -> ClientConfig {
    ClientConfig::default().with_setup_wait(Duration::from_millis(50))
}

/// 轮询等待条件成立
pub async fn eventually(timeout: Duration, mut condition: impl FnMut() -> bool) -> bool {
    let deadline = tokio::time::Instant::now() + timeout;
    while tokio::time::Instant::now() < deadline {
        if condition() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    condition()
}
