//! 调度器生命周期集成测试（使用进程内管理器桩）

use std::sync::Arc;
use std::time::Duration;

use snap_domain::{EventHandler, MetricManager, TaskSnapshot, TaskState};
use snap_errors::SnapError;
use snap_observability::MetricsCollector;
use snap_scheduler::{Schedule, Scheduler, SchedulerConfig, TaskOptions};
use snap_testing_utils::builders::{collect_only_workflow, sample_workflow};
use snap_testing_utils::helpers::{init_test_logging, wait_until};
use snap_testing_utils::mocks::{MockMetricManager, RecordingEventHandler};

async fn scheduler_with_local(config: SchedulerConfig) -> (Arc<Scheduler>, Arc<MockMetricManager>) {
    init_test_logging();
    let metrics = Arc::new(MetricsCollector::new().expect("创建指标收集器失败"));
    let scheduler = Arc::new(Scheduler::new(config, metrics));
    let local = Arc::new(MockMetricManager::new());
    scheduler
        .set_metric_manager(Arc::clone(&local) as Arc<dyn MetricManager>)
        .await;
    scheduler.start().await.expect("启动调度器失败");
    (scheduler, local)
}

fn fast_config() -> SchedulerConfig {
    SchedulerConfig {
        connection_timeout: Duration::from_millis(200),
        shutdown_grace: Duration::from_millis(500),
        ..Default::default()
    }
}

/// 轮询任务快照直到条件成立或超时
async fn wait_for_snapshot<F>(scheduler: &Scheduler, id: &str, timeout: Duration, pred: F) -> bool
where
    F: Fn(&TaskSnapshot) -> bool,
{
    let deadline = tokio::time::Instant::now() + timeout;
    loop {
        let snapshot = scheduler.get_task(id).await.expect("任务应当存在");
        if pred(&snapshot) {
            return true;
        }
        if tokio::time::Instant::now() >= deadline {
            return false;
        }
        tokio::time::sleep(Duration::from_millis(15)).await;
    }
}

#[tokio::test]
async fn test_scheduler_requires_local_manager() {
    let metrics = Arc::new(MetricsCollector::new().expect("创建指标收集器失败"));
    let scheduler = Scheduler::new(fast_config(), metrics);
    assert!(scheduler.start().await.is_err());
}

#[tokio::test]
async fn test_create_task_rejected_before_start() {
    let metrics = Arc::new(MetricsCollector::new().expect("创建指标收集器失败"));
    let scheduler = Scheduler::new(fast_config(), metrics);
    let result = scheduler
        .create_task(
            Schedule::simple(Duration::from_secs(1)),
            collect_only_workflow(),
            TaskOptions::default(),
        )
        .await;
    assert!(result.is_err());
}

#[tokio::test]
async fn test_task_lifecycle_happy_path() {
    let (scheduler, local) = scheduler_with_local(fast_config()).await;

    let task = scheduler
        .create_task(
            Schedule::simple(Duration::from_millis(30)),
            sample_workflow(""),
            TaskOptions::default(),
        )
        .await
        .expect("创建任务失败");
    assert_eq!(task.state, TaskState::Created);
    assert!(task.name.starts_with("Task-"));

    scheduler.start_task(&task.id).await.expect("启动任务失败");
    assert_eq!(
        scheduler.get_task(&task.id).await.unwrap().state,
        TaskState::Spinning
    );

    // 等待至少两次成功触发
    assert!(
        wait_for_snapshot(&scheduler, &task.id, Duration::from_secs(2), |s| {
            s.hit_count >= 2
        })
        .await,
        "任务应当命中至少两次"
    );

    scheduler.stop_task(&task.id).await.expect("停止任务失败");
    let snapshot = scheduler.get_task(&task.id).await.unwrap();
    assert_eq!(snapshot.state, TaskState::Stopped);
    assert_eq!(snapshot.failed_count, 0);

    // 订阅与退订平衡
    assert_eq!(local.subscribe_calls(), 1);
    assert_eq!(local.unsubscribe_calls(), 1);
    // 下游节点被执行过
    assert!(local.process_calls() >= 2);
    assert!(local.publish_calls() >= 2);

    scheduler.stop().await;
}

#[tokio::test]
async fn test_create_task_validation_failure() {
    let (scheduler, local) = scheduler_with_local(fast_config()).await;
    local.set_fail_validate(true);

    let result = scheduler
        .create_task(
            Schedule::simple(Duration::from_millis(50)),
            collect_only_workflow(),
            TaskOptions::default(),
        )
        .await;
    let errors = result.err().expect("校验失败时任务不应被创建");
    assert!(!errors.is_empty());
    assert!(scheduler.get_tasks().await.is_empty());

    scheduler.stop().await;
}

#[tokio::test]
async fn test_invalid_schedule_rejected() {
    let (scheduler, _local) = scheduler_with_local(fast_config()).await;

    let result = scheduler
        .create_task(
            Schedule::cron("not a cron"),
            collect_only_workflow(),
            TaskOptions::default(),
        )
        .await;
    let errors = result.err().expect("无效调度应当拒绝创建");
    assert!(errors
        .iter()
        .any(|e| matches!(e, SnapError::InvalidCron { .. })));

    scheduler.stop().await;
}

#[tokio::test]
async fn test_disable_after_consecutive_failures() {
    let (scheduler, local) = scheduler_with_local(fast_config()).await;
    // 发布节点持续失败，第三次连续失败后任务被禁用
    local.set_fail_publish(true);

    let handler = Arc::new(RecordingEventHandler::new());
    scheduler
        .register_event_handler("test", Arc::clone(&handler) as Arc<dyn EventHandler>)
        .await;

    let task = scheduler
        .create_task(
            Schedule::simple(Duration::from_millis(30)),
            sample_workflow(""),
            TaskOptions {
                start: true,
                ..Default::default()
            },
        )
        .await
        .expect("创建任务失败");

    assert!(
        wait_until(Duration::from_secs(3), || handler.has_event("TaskDisabled")).await,
        "任务应当被自动禁用"
    );

    let snapshot = scheduler.get_task(&task.id).await.unwrap();
    assert_eq!(snapshot.state, TaskState::Disabled);
    assert_eq!(snapshot.consecutive_failures, 3);
    assert!(snapshot.failed_count >= 3);

    // 禁用时订阅已全部释放
    assert_eq!(local.subscribe_calls(), local.unsubscribe_calls());

    // 被禁用的任务拒绝启动
    let errors = scheduler.start_task(&task.id).await.err().unwrap();
    assert!(errors
        .iter()
        .any(|e| matches!(e, SnapError::TaskDisabled { .. })));

    scheduler.stop().await;
}

#[tokio::test]
async fn test_enable_resets_consecutive_failures() {
    let (scheduler, local) = scheduler_with_local(fast_config()).await;
    local.set_fail_collect(true);

    let handler = Arc::new(RecordingEventHandler::new());
    scheduler
        .register_event_handler("test", Arc::clone(&handler) as Arc<dyn EventHandler>)
        .await;

    let task = scheduler
        .create_task(
            Schedule::simple(Duration::from_millis(30)),
            collect_only_workflow(),
            TaskOptions {
                start: true,
                ..Default::default()
            },
        )
        .await
        .expect("创建任务失败");

    assert!(wait_until(Duration::from_secs(3), || handler.has_event("TaskDisabled")).await);

    // Disabled -> Stopped，连续失败计数清零
    let snapshot = scheduler.enable_task(&task.id).await.expect("启用失败");
    assert_eq!(snapshot.state, TaskState::Stopped);
    assert_eq!(snapshot.consecutive_failures, 0);

    // 未禁用的任务不能重复启用
    assert!(scheduler.enable_task(&task.id).await.is_err());

    // 故障恢复后可以重新启动
    local.set_fail_collect(false);
    scheduler.start_task(&task.id).await.expect("重新启动失败");
    assert!(
        wait_for_snapshot(&scheduler, &task.id, Duration::from_secs(2), |s| {
            s.hit_count >= 1
        })
        .await
    );

    scheduler.stop().await;
}

#[tokio::test]
async fn test_custom_stop_on_failure_threshold() {
    let (scheduler, local) = scheduler_with_local(fast_config()).await;
    local.set_fail_collect(true);

    let handler = Arc::new(RecordingEventHandler::new());
    scheduler
        .register_event_handler("test", Arc::clone(&handler) as Arc<dyn EventHandler>)
        .await;

    let task = scheduler
        .create_task(
            Schedule::simple(Duration::from_millis(30)),
            collect_only_workflow(),
            TaskOptions {
                stop_on_failure: 1,
                start: true,
                ..Default::default()
            },
        )
        .await
        .expect("创建任务失败");

    assert!(wait_until(Duration::from_secs(2), || handler.has_event("TaskDisabled")).await);
    let snapshot = scheduler.get_task(&task.id).await.unwrap();
    assert_eq!(snapshot.consecutive_failures, 1);

    scheduler.stop().await;
}

#[tokio::test]
async fn test_remove_task() {
    let (scheduler, local) = scheduler_with_local(fast_config()).await;

    let task = scheduler
        .create_task(
            Schedule::simple(Duration::from_millis(30)),
            sample_workflow(""),
            TaskOptions {
                start: true,
                ..Default::default()
            },
        )
        .await
        .expect("创建任务失败");

    scheduler.remove_task(&task.id).await.expect("移除失败");
    assert!(matches!(
        scheduler.get_task(&task.id).await,
        Err(SnapError::TaskNotFound { .. })
    ));
    assert!(matches!(
        scheduler.remove_task(&task.id).await,
        Err(SnapError::TaskNotFound { .. })
    ));

    // 运行中的任务被移除时订阅也被释放
    assert_eq!(local.subscribe_calls(), local.unsubscribe_calls());

    scheduler.stop().await;
}

#[tokio::test]
async fn test_stop_idle_task_is_rejected() {
    let (scheduler, _local) = scheduler_with_local(fast_config()).await;

    let task = scheduler
        .create_task(
            Schedule::simple(Duration::from_millis(50)),
            collect_only_workflow(),
            TaskOptions::default(),
        )
        .await
        .expect("创建任务失败");

    let errors = scheduler.stop_task(&task.id).await.err().unwrap();
    assert!(errors
        .iter()
        .any(|e| matches!(e, SnapError::TaskAlreadyStopped { .. })));

    scheduler.stop().await;
}

#[tokio::test]
async fn test_windowed_schedule_ends_task() {
    let (scheduler, _local) = scheduler_with_local(fast_config()).await;

    let handler = Arc::new(RecordingEventHandler::new());
    scheduler
        .register_event_handler("test", Arc::clone(&handler) as Arc<dyn EventHandler>)
        .await;

    let stop_at = chrono::Utc::now() + chrono::Duration::milliseconds(150);
    let task = scheduler
        .create_task(
            Schedule::windowed(Duration::from_millis(30), None, Some(stop_at)),
            collect_only_workflow(),
            TaskOptions {
                start: true,
                ..Default::default()
            },
        )
        .await
        .expect("创建任务失败");

    // 窗口结束后任务自行停止
    assert!(wait_until(Duration::from_secs(2), || handler.has_event("TaskStopped")).await);
    let snapshot = scheduler.get_task(&task.id).await.unwrap();
    assert_eq!(snapshot.state, TaskState::Stopped);

    scheduler.stop().await;
}
