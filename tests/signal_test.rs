//! OS 信号集成测试
//!
//! 向测试进程自身发送信号，单独成一个测试二进制，避免影响其他测试。

#![cfg(unix)]

mod common;

use std::process::Command;
use std::sync::Arc;
use std::time::Duration;

use common::{Recorder, ReloadCounter, TestService, eventually, test_config};
use flare_service_sdk::{AppState, Application};

fn send_signal(signal: &str) {
    let status = Command::new("kill")
        .arg(signal)
        .arg(std::process::id().to_string())
        .status()
        .expect("failed to run kill");
    assert!(status.success(), "kill {signal} failed");
}

#[tokio::test]
async fn test_sighup_reloads_and_sigterm_shuts_down() {
    let recorder = Recorder::default();
    let app = Application::new(test_config("signals").with_signal_handling(true));
    let counter = Arc::new(ReloadCounter::default());
    app.register_service(counter.clone())
        .register_main_service(Arc::new(TestService::new("main", &recorder)));
    app.set_reloadable_service(&counter);

    let runner = tokio::spawn({
        let app = app.clone();
        async move { app.run().await }
    });
    let mut states = app.state_changes();
    states.wait_for(|s| *s == AppState::Running).await.unwrap();

    send_signal("-HUP");
    assert!(eventually(Duration::from_secs(2), || counter.count() == 1).await);
    assert_eq!(app.state(), AppState::Running);

    send_signal("-TERM");
    let exit = tokio::time::timeout(Duration::from_secs(3), runner)
        .await
        .expect("SIGTERM should shut the application down")
        .unwrap();
    assert_eq!(exit.exit_code(), 0);
    assert_eq!(app.state(), AppState::Shutdown);
    assert!(recorder.contains("stop:main"));
    assert!(recorder.contains("cleanup:main"));
    assert_eq!(counter.count(), 1);
}
