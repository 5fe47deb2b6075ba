//! 组件生命周期契约
//!
//! 所有被 [`Application`](super::Application) 管理的组件都实现 [`Service`]；
//! 需要后台运行的组件再实现 [`Runnable`]，支持热加载的实现 [`Reloadable`]。
//! 可选能力在注册时显式声明，运行时不做类型探测。

use crate::error::ServiceResult;
use crate::flags::{FlagSet, ParsedFlags};
use async_trait::async_trait;

/// 基础组件
#[async_trait]
pub trait Service: Send + Sync + 'static {
    /// 组件名称（仅用于日志，不要求唯一）
    fn name(&self) -> &str;

    /// 声明命令行参数，注册时立即调用
    fn init_flags(&self, _flags: &mut FlagSet) {}

    /// 校验配置、建立连接，按注册顺序调用，任一失败则中止启动
    async fn configure(&self, _flags: &ParsedFlags) -> ServiceResult {
        Ok(())
    }

    /// 释放资源，按注册逆序调用
    async fn cleanup(&self) {}
}

/// 可运行组件
#[async_trait]
pub trait Runnable: Service {
    /// 阻塞运行直到完成或被 `stop` 唤醒
    async fn run(&self) -> ServiceResult;

    /// 发出停止信号并等待组件停止
    async fn stop(&self);
}

/// 支持热加载的组件
#[async_trait]
pub trait Reloadable: Service {
    async fn reload(&self) -> ServiceResult;
}
