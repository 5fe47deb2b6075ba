//! 应用编排集成测试

mod common;

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use common::{FlagService, Recorder, ReloadCounter, TestService, eventually, test_config};
use flare_service_sdk::{AppState, Application, ServiceGroup};
use tokio::time::Instant;

fn ms(millis: u64) -> Duration {
    Duration::from_millis(millis)
}

#[test]
#[should_panic(expected = "registered twice")]
fn test_duplicate_instance_panics() {
    let recorder = Recorder::default();
    let app = Application::new(test_config("duplicate"));
    let service = Arc::new(TestService::new("a", &recorder));
    app.register_runnable(service.clone());
    app.register_runnable(service);
}

#[test]
fn test_same_name_distinct_instances_allowed() {
    let recorder = Recorder::default();
    let app = Application::new(test_config("same-name"));
    app.register_runnable(Arc::new(TestService::new("worker", &recorder)))
        .register_runnable(Arc::new(TestService::new("worker", &recorder)));

    // 日志组件 + 两个同名组件
    let names: Vec<String> = app.services().iter().map(|s| s.name().to_string()).collect();
    assert_eq!(names, vec!["logger", "worker", "worker"]);
    assert!(app.main_service().is_none());
}

#[test]
#[should_panic(expected = "main service already registered")]
fn test_second_main_service_panics() {
    let recorder = Recorder::default();
    let app = Application::new(test_config("two-mains"));
    app.register_main_service(Arc::new(TestService::new("first", &recorder)));
    app.register_main_service(Arc::new(TestService::new("second", &recorder)));
}

#[test]
fn test_concurrent_main_registration_admits_one() {
    for _ in 0..20 {
        let recorder = Recorder::default();
        let app = Application::new(test_config("racing-mains"));
        let barrier = std::sync::Barrier::new(2);

        let admitted = std::thread::scope(|scope| {
            let handles: Vec<_> = ["first", "second"]
                .into_iter()
                .map(|name| {
                    let (app, barrier, recorder) = (&app, &barrier, &recorder);
                    scope.spawn(move || {
                        let service = Arc::new(TestService::new(name, recorder));
                        barrier.wait();
                        app.register_main_service(service);
                    })
                })
                .collect();
            handles.into_iter().map(|h| h.join().is_ok()).filter(|ok| *ok).count()
        });

        assert_eq!(admitted, 1);
        assert!(app.main_service().is_some());
    }
}

#[tokio::test]
#[should_panic(expected = "main service not registered")]
async fn test_run_without_main_panics() {
    let app = Application::new(test_config("no-main"));
    app.run().await;
}

#[tokio::test]
async fn test_stop_and_cleanup_in_reverse_order() {
    let recorder = Recorder::default();
    let app = Application::new(test_config("reverse"));
    app.register_runnable(Arc::new(TestService::new("a", &recorder)))
        .register_main_service(Arc::new(TestService::new("b", &recorder).running_for(ms(30))))
        .register_runnable(Arc::new(TestService::new("c", &recorder)));

    let exit = app.run().await;

    assert_eq!(exit.exit_code(), 0);
    assert_eq!(recorder.with_prefix("configure:"), vec!["a", "b", "c"]);
    assert_eq!(recorder.with_prefix("stop:"), vec!["c", "b", "a"]);
    assert_eq!(recorder.with_prefix("cleanup:"), vec!["c", "b", "a"]);

    // 所有 stop 在第一个 cleanup 之前
    let events = recorder.events();
    let last_stop = events.iter().rposition(|e| e.starts_with("stop:")).unwrap();
    let first_cleanup = events.iter().position(|e| e.starts_with("cleanup:")).unwrap();
    assert!(last_stop < first_cleanup);
}

#[tokio::test]
async fn test_critical_service_exit_shuts_down() {
    // 关键组件在主组件之前或之后注册，结果一致
    for critical_first in [true, false] {
        let recorder = Recorder::default();
        let app = Application::new(test_config("critical"));
        let main = Arc::new(TestService::new("main", &recorder).running_for(ms(200)));
        let critical = Arc::new(TestService::new("critical", &recorder).running_for(ms(50)));

        if critical_first {
            app.register_runnable(critical.clone());
            app.register_main_service(main);
        } else {
            app.register_main_service(main);
            app.register_runnable(critical.clone());
        }
        app.set_critical_service(&critical);

        let started = Instant::now();
        let exit = app.run().await;

        assert!(!exit.is_failure());
        assert!(
            started.elapsed() < ms(150),
            "critical exit should stop the app early, took {:?}",
            started.elapsed()
        );
        assert!(recorder.contains("stop:main"));
    }
}

#[tokio::test]
async fn test_non_critical_exit_keeps_running() {
    let recorder = Recorder::default();
    let app = Application::new(test_config("non-critical"));
    app.register_runnable(Arc::new(TestService::new("short", &recorder).running_for(ms(20))))
        .register_main_service(Arc::new(TestService::new("main", &recorder).running_for(ms(150))));

    let started = Instant::now();
    app.run().await;

    assert!(started.elapsed() >= ms(140));
    assert!(recorder.contains("exit:short"));
}

#[tokio::test]
async fn test_main_service_with_plain_service() {
    let recorder = Recorder::default();
    let app = Application::new(test_config("logger-stub"));
    app.register_service(Arc::new(TestService::new("logger-stub", &recorder)))
        .register_main_service(Arc::new(TestService::new("main", &recorder).running_for(ms(200))));

    let started = Instant::now();
    let exit = app.run().await;

    assert_eq!(exit.exit_code(), 0);
    assert!(started.elapsed() >= ms(190));
    // 普通组件只参与配置和清理
    assert!(!recorder.contains("run:logger-stub"));
    assert!(!recorder.contains("stop:logger-stub"));
    assert_eq!(recorder.with_prefix("cleanup:"), vec!["main", "logger-stub"]);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_shutdown_runs_exit_handlers_once() {
    let recorder = Recorder::default();
    let app = Application::new(test_config("concurrent-shutdown"));
    let handled = Arc::new(AtomicUsize::new(0));

    app.register_main_service(Arc::new(TestService::new("main", &recorder)));
    for id in 1..=2 {
        let handled = handled.clone();
        let recorder = recorder.clone();
        app.register_exit_handler(move || {
            handled.fetch_add(1, Ordering::SeqCst);
            recorder.record(format!("handler:{id}"));
        });
    }

    let runner = tokio::spawn({
        let app = app.clone();
        async move { app.run().await }
    });
    let mut states = app.state_changes();
    states.wait_for(|s| *s == AppState::Running).await.unwrap();

    let callers: Vec<_> = (0..10)
        .map(|_| {
            let app = app.clone();
            tokio::spawn(async move { app.shutdown().await })
        })
        .collect();
    for caller in callers {
        tokio::time::timeout(Duration::from_secs(2), caller)
            .await
            .expect("shutdown wait timed out")
            .unwrap();
    }

    let exit = runner.await.unwrap();
    assert_eq!(exit.exit_code(), 0);
    assert_eq!(handled.load(Ordering::SeqCst), 2);
    assert_eq!(recorder.with_prefix("handler:"), vec!["1", "2"]);

    // 退出回调先于 stop 执行
    let events = recorder.events();
    let last_handler = events.iter().rposition(|e| e.starts_with("handler:")).unwrap();
    let first_stop = events.iter().position(|e| e.starts_with("stop:")).unwrap();
    assert!(last_handler < first_stop);
    assert!(app.shutdown().is_done());
}

#[tokio::test]
async fn test_panicking_exit_handler_does_not_block_teardown() {
    let recorder = Recorder::default();
    let app = Application::new(test_config("exit-handler-panic"));
    app.register_main_service(Arc::new(TestService::new("main", &recorder)));
    app.register_exit_handler(|| panic!("exit handler failed"));
    {
        let recorder = recorder.clone();
        app.register_exit_handler(move || recorder.record("handler:after"));
    }

    let runner = tokio::spawn({
        let app = app.clone();
        async move { app.run().await }
    });
    let mut states = app.state_changes();
    states.wait_for(|s| *s == AppState::Running).await.unwrap();

    tokio::time::timeout(Duration::from_secs(1), app.shutdown())
        .await
        .expect("shutdown wait should resolve");
    let exit = runner.await.expect("run should not panic");
    assert_eq!(exit.exit_code(), 0);
    assert_eq!(app.state(), AppState::Shutdown);

    // 后续回调、stop 和 cleanup 照常执行
    assert!(recorder.contains("handler:after"));
    assert!(recorder.contains("stop:main"));
    assert!(recorder.contains("cleanup:main"));
}

#[tokio::test]
async fn test_configure_failure_exits_with_code_one() {
    let recorder = Recorder::default();
    let app = Application::new(test_config("configure-failure"));
    app.register_runnable(Arc::new(TestService::new("broken", &recorder).failing_configure()))
        .register_main_service(Arc::new(TestService::new("main", &recorder)))
        .register_service(Arc::new(TestService::new("late", &recorder)));

    let exit = app.run().await;

    assert!(exit.is_failure());
    assert_eq!(exit.exit_code(), 1);
    // 失败后不再配置后续组件，也不运行任何组件
    assert!(!recorder.contains("configure:late"));
    assert!(recorder.with_prefix("run:").is_empty());
    assert_eq!(recorder.with_prefix("cleanup:"), vec!["late", "main", "broken"]);
}

#[tokio::test]
async fn test_unknown_argument_fails_configuration() {
    let recorder = Recorder::default();
    let app = Application::new(test_config("bad-args").with_args(["--no-such-flag"]));
    app.register_main_service(Arc::new(TestService::new("main", &recorder)));

    let exit = app.run().await;

    assert_eq!(exit.exit_code(), 1);
    assert!(recorder.with_prefix("configure:").is_empty());
}

#[tokio::test]
async fn test_run_error_triggers_shutdown() {
    let recorder = Recorder::default();
    let app = Application::new(test_config("run-error"));
    app.register_runnable(Arc::new(TestService::new("flaky", &recorder).failing_run()))
        .register_main_service(Arc::new(TestService::new("main", &recorder).running_for(ms(1000))));

    let started = Instant::now();
    let exit = app.run().await;

    assert!(started.elapsed() < ms(500));
    assert_eq!(exit.exit_code(), 0);
    assert!(recorder.contains("stop:main"));
}

#[tokio::test]
async fn test_flags_reach_configure() {
    let recorder = Recorder::default();
    let app = Application::new(test_config("flags").with_args(["--greeting", "hello"]));
    let flagged = Arc::new(FlagService::new("greeting"));
    app.register_service(flagged.clone())
        .register_main_service(Arc::new(TestService::new("main", &recorder).running_for(ms(10))));

    let env = app.output_env();
    assert!(env.contains("LOG_LEVEL="));
    assert!(env.contains("GREETING=default"));

    app.run().await;
    assert_eq!(flagged.value.lock().unwrap().as_deref(), Some("hello"));
}

#[tokio::test]
async fn test_request_reload_while_running() {
    let recorder = Recorder::default();
    let app = Application::new(test_config("reload"));
    let counter = Arc::new(ReloadCounter::default());
    let failing = Arc::new(ReloadCounter {
        fail: true,
        ..Default::default()
    });
    app.register_service(failing.clone())
        .register_service(counter.clone())
        .register_main_service(Arc::new(TestService::new("main", &recorder)));
    app.set_reloadable_service(&failing)
        .set_reloadable_service(&counter);

    let runner = tokio::spawn({
        let app = app.clone();
        async move { app.run().await }
    });
    let mut states = app.state_changes();
    states.wait_for(|s| *s == AppState::Running).await.unwrap();

    app.request_reload();
    // 前一个组件热加载失败不影响后续组件
    assert!(eventually(Duration::from_secs(1), || counter.count() == 1).await);
    assert_eq!(failing.count(), 1);
    assert_eq!(app.state(), AppState::Running);

    app.shutdown().await;
    assert_eq!(runner.await.unwrap().exit_code(), 0);
}

#[tokio::test]
async fn test_state_transitions() {
    let recorder = Recorder::default();
    let app = Application::new(test_config("states"));
    app.register_main_service(Arc::new(TestService::new("main", &recorder).running_for(ms(20))));
    assert_eq!(app.state(), AppState::Created);
    assert!(!app.is_shutdown());

    let mut states = app.state_changes();
    let observed = tokio::spawn(async move {
        let mut seen = Vec::new();
        while states.changed().await.is_ok() {
            let state = *states.borrow_and_update();
            seen.push(state);
            if state == AppState::Shutdown {
                break;
            }
        }
        seen
    });

    app.run().await;

    assert!(app.is_shutdown());
    assert!(app.services().is_empty());
    assert!(app.main_service().is_none());
    let seen = observed.await.unwrap();
    assert!(seen.contains(&AppState::Running));
    assert_eq!(seen.last(), Some(&AppState::Shutdown));
}

#[tokio::test]
async fn test_shutdown_before_run_skips_start() {
    let recorder = Recorder::default();
    let app = Application::new(test_config("early-shutdown"));
    app.register_main_service(Arc::new(TestService::new("main", &recorder)));
    let handled = Arc::new(AtomicUsize::new(0));
    {
        let handled = handled.clone();
        app.register_exit_handler(move || {
            handled.fetch_add(1, Ordering::SeqCst);
        });
    }

    let wait = app.shutdown();
    assert!(!wait.is_done());

    let exit = tokio::time::timeout(Duration::from_secs(1), app.run())
        .await
        .expect("run should return immediately");

    assert_eq!(exit.exit_code(), 0);
    assert!(wait.is_done());
    assert_eq!(handled.load(Ordering::SeqCst), 1);
    assert!(recorder.with_prefix("configure:").is_empty());
    assert!(recorder.with_prefix("run:").is_empty());
}

#[tokio::test]
async fn test_service_group_as_main() {
    let recorder = Recorder::default();
    let app = Application::new(test_config("group"));
    let group = ServiceGroup::new("api")
        .with_service(Arc::new(TestService::new("http", &recorder).running_for(ms(30))))
        .with_service(Arc::new(TestService::new("grpc", &recorder)));
    assert_eq!(group.len(), 2);
    app.register_main_service(Arc::new(group));

    let started = Instant::now();
    tokio::time::timeout(Duration::from_secs(2), app.run())
        .await
        .expect("group should finish when its first child exits");

    assert!(started.elapsed() >= ms(25));
    assert_eq!(recorder.with_prefix("configure:"), vec!["http", "grpc"]);
    assert!(recorder.contains("stop:http"));
    assert!(recorder.contains("stop:grpc"));
}
