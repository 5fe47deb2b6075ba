//! 应用运行时
//!
//! 统一管理组件生命周期：
//!
//! 1. **注册**：组件注册时立即声明命令行参数
//! 2. **配置**：解析参数后按注册顺序调用 `configure`，任一失败即进入关闭流程
//! 3. **运行**：所有 [`Runnable`] 并行运行，主组件或关键组件退出即触发关闭
//! 4. **关闭**：退出回调按注册顺序执行一次，`stop` / `cleanup` 按注册逆序执行
//!
//! SIGHUP 触发热加载，SIGINT / SIGTERM 触发关闭。

pub mod config;
pub mod group;
#[allow(clippy::module_inception)]
pub mod runtime;
pub mod service;
pub mod signal;

pub use config::AppConfig;
pub use group::ServiceGroup;
pub use runtime::{AppExit, AppState, Application, ShutdownWait};
pub use service::{Reloadable, Runnable, Service};
pub use signal::AppCommand;
