//! 应用编排器实现
//!
//! 负责：
//! - 组件注册（普通 / 可运行 / 主组件 / 关键组件 / 可热加载）
//! - 参数解析与按注册顺序配置
//! - 并行运行所有可运行组件，监视主组件和关键组件
//! - 信号驱动的热加载与关闭
//! - 按注册逆序停止和清理

use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use futures::FutureExt;
use tokio::sync::{mpsc, watch};
use tokio::task::{JoinHandle, JoinSet};
use tokio_util::sync::{CancellationToken, WaitForCancellationFutureOwned};
use tracing::{debug, error, info, warn};

use crate::error::SdkError;
use crate::flags::{self, FlagSet};
use crate::logging::LoggerService;
use crate::runtime::config::AppConfig;
use crate::runtime::service::{Reloadable, Runnable, Service};
use crate::runtime::signal::{self, AppCommand};

/// 应用状态
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AppState {
    Created,
    Configuring,
    Running,
    ShuttingDown,
    Shutdown,
}

impl std::fmt::Display for AppState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            AppState::Created => "created",
            AppState::Configuring => "configuring",
            AppState::Running => "running",
            AppState::ShuttingDown => "shutting_down",
            AppState::Shutdown => "shutdown",
        };
        f.write_str(name)
    }
}

/// `run` 的结果
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AppExit {
    failed: bool,
}

impl AppExit {
    /// 配置阶段是否失败
    pub fn is_failure(&self) -> bool {
        self.failed
    }

    pub fn exit_code(&self) -> i32 {
        if self.failed { 1 } else { 0 }
    }

    /// 以对应退出码结束进程
    pub fn exit(self) -> ! {
        std::process::exit(self.exit_code())
    }
}

/// 等待关闭完成
///
/// 可直接 `.await`，也可以用 [`ShutdownWait::is_done`] 非阻塞查询。
#[derive(Debug, Clone)]
pub struct ShutdownWait {
    terminated: CancellationToken,
}

impl ShutdownWait {
    pub fn is_done(&self) -> bool {
        self.terminated.is_cancelled()
    }
}

impl std::future::IntoFuture for ShutdownWait {
    type Output = ();
    type IntoFuture = WaitForCancellationFutureOwned;

    fn into_future(self) -> Self::IntoFuture {
        self.terminated.cancelled_owned()
    }
}

type ExitHandler = Box<dyn FnOnce() + Send>;

struct ServiceEntry {
    id: usize,
    service: Arc<dyn Service>,
    runnable: Option<Arc<dyn Runnable>>,
    reloadable: Option<Arc<dyn Reloadable>>,
    main: bool,
    critical: bool,
}

#[derive(Default)]
struct Registry {
    entries: Vec<ServiceEntry>,
    exit_handlers: Vec<ExitHandler>,
}

impl Registry {
    fn find_mut(&mut self, id: usize) -> Option<&mut ServiceEntry> {
        self.entries.iter_mut().find(|entry| entry.id == id)
    }
}

struct AppInner {
    config: AppConfig,
    registry: Mutex<Registry>,
    flags: Mutex<FlagSet>,
    state: watch::Sender<AppState>,
    shutdown: CancellationToken,
    terminated: CancellationToken,
    commands_tx: mpsc::UnboundedSender<AppCommand>,
    commands_rx: Mutex<Option<mpsc::UnboundedReceiver<AppCommand>>>,
    started: AtomicBool,
    failed: AtomicBool,
}

/// 应用编排器
///
/// 克隆后共享同一个应用实例，组件可以持有克隆在 `run` 内部触发关闭。
///
/// # 使用示例
/// ```rust,no_run
/// use flare_service_sdk::runtime::{AppConfig, Application};
/// # use std::sync::Arc;
/// # async fn demo(api: Arc<impl flare_service_sdk::runtime::Runnable>) {
/// let app = Application::new(AppConfig::default().with_name("orders"));
/// app.register_main_service(api);
/// app.run().await.exit();
/// # }
/// ```
#[derive(Clone)]
pub struct Application {
    inner: Arc<AppInner>,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

fn identity<S: ?Sized>(service: &Arc<S>) -> usize {
    Arc::as_ptr(service).cast::<()>() as usize
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(msg) = payload.downcast_ref::<&str>() {
        (*msg).to_string()
    } else if let Some(msg) = payload.downcast_ref::<String>() {
        msg.clone()
    } else {
        "unknown panic".to_string()
    }
}

impl Application {
    /// 创建应用，并自动注册日志组件
    pub fn new(config: AppConfig) -> Self {
        let (state, _) = watch::channel(AppState::Created);
        let (commands_tx, commands_rx) = mpsc::unbounded_channel();
        let logger = Arc::new(LoggerService::new(config.log.clone()));

        let app = Self {
            inner: Arc::new(AppInner {
                flags: Mutex::new(FlagSet::new(config.name.clone())),
                config,
                registry: Mutex::new(Registry::default()),
                state,
                shutdown: CancellationToken::new(),
                terminated: CancellationToken::new(),
                commands_tx,
                commands_rx: Mutex::new(Some(commands_rx)),
                started: AtomicBool::new(false),
                failed: AtomicBool::new(false),
            }),
        };
        app.register_service(Arc::clone(&logger));
        app.set_reloadable_service(&logger);
        app
    }

    pub fn name(&self) -> &str {
        &self.inner.config.name
    }

    // ============================================================
    // 注册
    // ============================================================

    /// 注册普通组件（只参与配置和清理）
    ///
    /// # Panics
    /// 同一个实例重复注册时 panic。
    pub fn register_service<S: Service>(&self, service: Arc<S>) -> &Self {
        let entry = ServiceEntry {
            id: identity(&service),
            service: service.clone(),
            runnable: None,
            reloadable: None,
            main: false,
            critical: false,
        };
        self.insert(entry, service)
    }

    /// 注册可运行组件
    pub fn register_runnable<S: Runnable>(&self, service: Arc<S>) -> &Self {
        let entry = ServiceEntry {
            id: identity(&service),
            service: service.clone(),
            runnable: Some(service.clone()),
            reloadable: None,
            main: false,
            critical: false,
        };
        self.insert(entry, service)
    }

    /// 注册主组件，主组件退出即触发关闭
    ///
    /// # Panics
    /// 已存在主组件或实例重复注册时 panic。
    pub fn register_main_service<S: Runnable>(&self, service: Arc<S>) -> &Self {
        let entry = ServiceEntry {
            id: identity(&service),
            service: service.clone(),
            runnable: Some(service.clone()),
            reloadable: None,
            main: true,
            critical: false,
        };
        self.insert(entry, service)
    }

    fn main_entry_exists(&self) -> bool {
        lock(&self.inner.registry).entries.iter().any(|e| e.main)
    }

    fn insert<S: Service>(&self, entry: ServiceEntry, service: Arc<S>) -> &Self {
        {
            let mut registry = lock(&self.inner.registry);
            if registry.entries.iter().any(|e| e.id == entry.id) {
                drop(registry);
                panic!("service instance registered twice: {}", service.name());
            }
            // 检查与插入在同一把锁内完成
            if entry.main && registry.entries.iter().any(|e| e.main) {
                drop(registry);
                panic!("main service already registered: {}", service.name());
            }
            if self.inner.started.load(Ordering::SeqCst) {
                warn!(service = %service.name(), "Service registered after run started, it will not be configured");
            }
            registry.entries.push(entry);
        }
        // 注册锁外声明参数
        service.init_flags(&mut lock(&self.inner.flags));
        debug!(service = %service.name(), "Service registered");
        self
    }

    /// 标记关键组件：关键组件退出即触发关闭
    ///
    /// 组件未注册或不可运行时仅记录警告。
    pub fn set_critical_service<S: Runnable>(&self, service: &Arc<S>) -> &Self {
        let mut registry = lock(&self.inner.registry);
        match registry.find_mut(identity(service)) {
            Some(entry) if entry.runnable.is_some() => entry.critical = true,
            _ => warn!(service = %service.name(), "⚠️ Critical service not registered as runnable, ignored"),
        }
        self
    }

    /// 为已注册组件附加热加载能力
    pub fn set_reloadable_service<S: Reloadable>(&self, service: &Arc<S>) -> &Self {
        let mut registry = lock(&self.inner.registry);
        match registry.find_mut(identity(service)) {
            Some(entry) => entry.reloadable = Some(service.clone()),
            None => warn!(service = %service.name(), "⚠️ Reloadable service not registered, ignored"),
        }
        self
    }

    /// 注册退出回调，关闭时按注册顺序执行且只执行一次
    pub fn register_exit_handler<F>(&self, handler: F) -> &Self
    where
        F: FnOnce() + Send + 'static,
    {
        lock(&self.inner.registry).exit_handlers.push(Box::new(handler));
        self
    }

    // ============================================================
    // 查询
    // ============================================================

    /// 已注册组件（关闭后为空）
    pub fn services(&self) -> Vec<Arc<dyn Service>> {
        if self.is_shutdown() {
            return Vec::new();
        }
        lock(&self.inner.registry)
            .entries
            .iter()
            .map(|e| Arc::clone(&e.service))
            .collect()
    }

    /// 主组件（关闭后为 `None`）
    pub fn main_service(&self) -> Option<Arc<dyn Runnable>> {
        if self.is_shutdown() {
            return None;
        }
        lock(&self.inner.registry)
            .entries
            .iter()
            .find(|e| e.main)
            .and_then(|e| e.runnable.clone())
    }

    pub fn is_shutdown(&self) -> bool {
        *self.inner.state.borrow() == AppState::Shutdown
    }

    pub fn state(&self) -> AppState {
        *self.inner.state.borrow()
    }

    pub fn state_changes(&self) -> watch::Receiver<AppState> {
        self.inner.state.subscribe()
    }

    /// 所有已声明参数的示例 env 内容
    pub fn output_env(&self) -> String {
        lock(&self.inner.flags).sample_env()
    }

    fn set_state(&self, state: AppState) {
        self.inner.state.send_replace(state);
        debug!(app = %self.name(), state = %state, "Application state changed");
    }

    // ============================================================
    // 生命周期
    // ============================================================

    /// 运行应用直到关闭完成
    ///
    /// # Panics
    /// 未注册主组件时 panic。
    pub async fn run(&self) -> AppExit {
        if !self.main_entry_exists() {
            panic!("main service not registered for {}", self.name());
        }
        if self.inner.started.swap(true, Ordering::SeqCst) {
            warn!(app = %self.name(), "⚠️ Application already started");
            return self.exit_status();
        }

        let service_count = lock(&self.inner.registry).entries.len();
        info!(app = %self.name(), service_count, "🚀 Starting application");

        let signal_task = self.install_signal_listener();
        let mut run_tasks = JoinSet::new();

        if self.inner.shutdown.is_cancelled() {
            info!(app = %self.name(), "Shutdown requested before start, skipping configuration");
        } else {
            self.set_state(AppState::Configuring);
            match self.configure_all().await {
                Ok(()) => {
                    self.set_state(AppState::Running);
                    self.start_runnables(&mut run_tasks);
                    self.wait_for_shutdown().await;
                }
                Err(err) => {
                    error!(app = %self.name(), error = %err, "❌ Configuration failed, shutting down");
                    self.inner.failed.store(true, Ordering::SeqCst);
                }
            }
        }

        self.teardown(run_tasks).await;
        if let Some(task) = signal_task {
            task.abort();
        }

        self.set_state(AppState::Shutdown);
        self.inner.terminated.cancel();
        info!(app = %self.name(), "Application stopped");
        self.exit_status()
    }

    fn exit_status(&self) -> AppExit {
        AppExit {
            failed: self.inner.failed.load(Ordering::SeqCst),
        }
    }

    fn install_signal_listener(&self) -> Option<JoinHandle<()>> {
        if !self.inner.config.handle_signals {
            return None;
        }
        match signal::spawn_signal_listener(self.inner.commands_tx.clone()) {
            Ok(handle) => Some(handle),
            Err(err) => {
                warn!(error = %err, "⚠️ Failed to install signal handlers");
                None
            }
        }
    }

    async fn configure_all(&self) -> anyhow::Result<()> {
        flags::load_env_file(self.inner.config.env_file.as_deref())?;

        let args = self
            .inner
            .config
            .args
            .clone()
            .unwrap_or_else(|| std::env::args().skip(1).collect());
        let parsed = match lock(&self.inner.flags).parse(args) {
            Ok(parsed) => parsed,
            Err(err) => {
                use clap::error::ErrorKind;
                if matches!(err.kind(), ErrorKind::DisplayHelp | ErrorKind::DisplayVersion) {
                    err.exit();
                }
                return Err(SdkError::configuration(err.to_string()).into());
            }
        };

        let services: Vec<Arc<dyn Service>> = lock(&self.inner.registry)
            .entries
            .iter()
            .map(|e| Arc::clone(&e.service))
            .collect();
        for service in services {
            if self.inner.shutdown.is_cancelled() {
                return Err(anyhow::anyhow!("shutdown requested during configuration"));
            }
            service
                .configure(&parsed)
                .await
                .map_err(|err| err.context(format!("configure {}", service.name())))?;
            debug!(service = %service.name(), "Service configured");
        }
        Ok(())
    }

    fn start_runnables(&self, run_tasks: &mut JoinSet<()>) {
        let runnables: Vec<(Arc<dyn Runnable>, bool)> = lock(&self.inner.registry)
            .entries
            .iter()
            .filter_map(|e| e.runnable.clone().map(|r| (r, e.main || e.critical)))
            .collect();

        for (runnable, watched) in runnables {
            let shutdown = self.inner.shutdown.clone();
            run_tasks.spawn(async move {
                let name = runnable.name().to_string();
                info!(service = %name, watched, "Service running");
                let outcome = AssertUnwindSafe(runnable.run()).catch_unwind().await;
                match outcome {
                    Ok(Ok(())) if watched => {
                        info!(service = %name, "Main or critical service exited, shutting down");
                        shutdown.cancel();
                    }
                    Ok(Ok(())) => {
                        info!(service = %name, "✅ Service run completed");
                    }
                    Ok(Err(err)) => {
                        error!(service = %name, error = %format!("{err:#}"), "❌ Service run failed, shutting down");
                        shutdown.cancel();
                    }
                    Err(payload) => {
                        error!(service = %name, panic = %panic_message(payload.as_ref()), "❌ Service run panicked, shutting down");
                        shutdown.cancel();
                    }
                }
            });
        }
    }

    async fn wait_for_shutdown(&self) {
        let receiver = lock(&self.inner.commands_rx).take();
        let Some(mut commands) = receiver else {
            self.inner.shutdown.cancelled().await;
            return;
        };

        loop {
            tokio::select! {
                _ = self.inner.shutdown.cancelled() => break,
                command = commands.recv() => match command {
                    Some(AppCommand::Reload) => self.reload().await,
                    Some(AppCommand::Shutdown) => {
                        self.inner.shutdown.cancel();
                        break;
                    }
                    None => {
                        self.inner.shutdown.cancelled().await;
                        break;
                    }
                },
            }
        }
    }

    async fn teardown(&self, mut run_tasks: JoinSet<()>) {
        self.set_state(AppState::ShuttingDown);
        self.inner.shutdown.cancel();
        info!(app = %self.name(), "Shutting down application");

        let handlers = std::mem::take(&mut lock(&self.inner.registry).exit_handlers);
        for handler in handlers {
            if let Err(payload) = std::panic::catch_unwind(AssertUnwindSafe(handler)) {
                error!(panic = %panic_message(payload.as_ref()), "❌ Exit handler panicked");
            }
        }

        let (runnables, services): (Vec<Arc<dyn Runnable>>, Vec<Arc<dyn Service>>) = {
            let registry = lock(&self.inner.registry);
            (
                registry.entries.iter().filter_map(|e| e.runnable.clone()).collect(),
                registry.entries.iter().map(|e| Arc::clone(&e.service)).collect(),
            )
        };

        for runnable in runnables.iter().rev() {
            debug!(service = %runnable.name(), "Stopping service");
            if let Err(payload) = AssertUnwindSafe(runnable.stop()).catch_unwind().await {
                error!(service = %runnable.name(), panic = %panic_message(payload.as_ref()), "❌ Service stop panicked");
            }
        }

        self.join_run_tasks(&mut run_tasks).await;

        for service in services.iter().rev() {
            debug!(service = %service.name(), "Cleaning up service");
            if let Err(payload) = AssertUnwindSafe(service.cleanup()).catch_unwind().await {
                error!(service = %service.name(), panic = %panic_message(payload.as_ref()), "❌ Service cleanup panicked");
            }
        }
    }

    async fn join_run_tasks(&self, run_tasks: &mut JoinSet<()>) {
        let timeout = self.inner.config.shutdown_timeout;
        let drained = tokio::time::timeout(timeout, async {
            while run_tasks.join_next().await.is_some() {}
        })
        .await;

        if drained.is_err() {
            warn!(
                remaining = run_tasks.len(),
                timeout_ms = timeout.as_millis() as u64,
                "⚠️ Service run did not return after stop, aborting"
            );
            run_tasks.abort_all();
            while run_tasks.join_next().await.is_some() {}
        }
    }

    /// 触发关闭（幂等），返回关闭完成的等待句柄
    ///
    /// 在 `run` 之前调用时，`run` 会跳过配置和运行直接进入关闭流程。
    pub fn shutdown(&self) -> ShutdownWait {
        if !self.inner.shutdown.is_cancelled() {
            info!(app = %self.name(), "Shutdown requested");
        }
        self.inner.shutdown.cancel();
        ShutdownWait {
            terminated: self.inner.terminated.clone(),
        }
    }

    /// 按注册顺序热加载所有支持热加载的组件，错误只记录日志
    pub async fn reload(&self) {
        let reloadables: Vec<Arc<dyn Reloadable>> = lock(&self.inner.registry)
            .entries
            .iter()
            .filter_map(|e| e.reloadable.clone())
            .collect();

        info!(app = %self.name(), count = reloadables.len(), "Reloading services");
        for service in reloadables {
            if let Err(err) = service.reload().await {
                warn!(service = %service.name(), error = %format!("{err:#}"), "⚠️ Service reload failed");
            }
        }
    }

    /// 通过管理命令队列请求热加载，由运行中的应用处理
    pub fn request_reload(&self) {
        if self.inner.commands_tx.send(AppCommand::Reload).is_err() {
            debug!("Command queue closed, reload request dropped");
        }
    }
}
