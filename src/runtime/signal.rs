//! OS 信号与管理命令
//!
//! Unix 下 SIGINT / SIGTERM 转为关闭命令，SIGHUP 转为热加载命令；
//! 其他平台只处理 Ctrl-C。命令统一进入应用的管理命令队列。

use tokio::sync::mpsc::UnboundedSender;
use tokio::task::JoinHandle;
use tracing::info;

/// 管理命令
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AppCommand {
    Reload,
    Shutdown,
}

#[cfg(unix)]
pub(crate) fn spawn_signal_listener(
    commands: UnboundedSender<AppCommand>,
) -> std::io::Result<JoinHandle<()>> {
    use tokio::signal::unix::{SignalKind, signal};

    let mut sigint = signal(SignalKind::interrupt())?;
    let mut sigterm = signal(SignalKind::terminate())?;
    let mut sighup = signal(SignalKind::hangup())?;

    Ok(tokio::spawn(async move {
        loop {
            let command = tokio::select! {
                _ = sigint.recv() => {
                    info!(signal = "SIGINT", "Shutdown signal received");
                    AppCommand::Shutdown
                }
                _ = sigterm.recv() => {
                    info!(signal = "SIGTERM", "Shutdown signal received");
                    AppCommand::Shutdown
                }
                _ = sighup.recv() => {
                    info!(signal = "SIGHUP", "Reload signal received");
                    AppCommand::Reload
                }
            };
            if commands.send(command).is_err() {
                break;
            }
        }
    }))
}

#[cfg(not(unix))]
pub(crate) fn spawn_signal_listener(
    commands: UnboundedSender<AppCommand>,
) -> std::io::Result<JoinHandle<()>> {
    Ok(tokio::spawn(async move {
        while tokio::signal::ctrl_c().await.is_ok() {
            info!(signal = "ctrl-c", "Shutdown signal received");
            if commands.send(AppCommand::Shutdown).is_err() {
                break;
            }
        }
    }))
}
