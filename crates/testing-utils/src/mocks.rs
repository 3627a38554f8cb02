//! 管理器桩与事件记录器
//!
//! `MockMetricManager` 以进程内实现替代真实的控制子系统，记录每类
//! 调用的次数并支持注入故障与延迟；订阅计数统计的是调用次数而非
//! 成功次数，便于断言订阅与退订的平衡。

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;

use snap_domain::{
    ConfigMap, ConfigTree, EventHandler, Metric, MetricManager, Namespace, RequestedMetric,
    SchedulerEvent, SubscribedPlugin, TagMap, TaskWatchHandler,
};
use snap_errors::{SnapError, SnapResult};

/// 进程内指标管理器桩
pub struct MockMetricManager {
    fail_validate: AtomicBool,
    fail_subscribe: AtomicBool,
    fail_collect: AtomicBool,
    fail_process: AtomicBool,
    fail_publish: AtomicBool,
    collect_latency: Mutex<Option<Duration>>,

    validate_calls: AtomicUsize,
    subscribe_calls: AtomicUsize,
    unsubscribe_calls: AtomicUsize,
    collect_calls: AtomicUsize,
    process_calls: AtomicUsize,
    publish_calls: AtomicUsize,

    collect_result: Mutex<Vec<Metric>>,
    published: Mutex<Vec<Vec<Metric>>>,
}

impl MockMetricManager {
    pub fn new() -> Self {
        let sample = Metric::new(
            Namespace::from_path("/intel/mock/foo"),
            2,
            serde_json::json!(1007),
        );
        Self {
            fail_validate: AtomicBool::new(false),
            fail_subscribe: AtomicBool::new(false),
            fail_collect: AtomicBool::new(false),
            fail_process: AtomicBool::new(false),
            fail_publish: AtomicBool::new(false),
            collect_latency: Mutex::new(None),
            validate_calls: AtomicUsize::new(0),
            subscribe_calls: AtomicUsize::new(0),
            unsubscribe_calls: AtomicUsize::new(0),
            collect_calls: AtomicUsize::new(0),
            process_calls: AtomicUsize::new(0),
            publish_calls: AtomicUsize::new(0),
            collect_result: Mutex::new(vec![sample]),
            published: Mutex::new(Vec::new()),
        }
    }

    pub fn set_fail_validate(&self, fail: bool) {
        self.fail_validate.store(fail, Ordering::SeqCst);
    }

    pub fn set_fail_subscribe(&self, fail: bool) {
        self.fail_subscribe.store(fail, Ordering::SeqCst);
    }

    pub fn set_fail_collect(&self, fail: bool) {
        self.fail_collect.store(fail, Ordering::SeqCst);
    }

    pub fn set_fail_process(&self, fail: bool) {
        self.fail_process.store(fail, Ordering::SeqCst);
    }

    pub fn set_fail_publish(&self, fail: bool) {
        self.fail_publish.store(fail, Ordering::SeqCst);
    }

    pub fn set_collect_latency(&self, latency: Duration) {
        *self.collect_latency.lock().unwrap() = Some(latency);
    }

    pub fn set_collect_result(&self, metrics: Vec<Metric>) {
        *self.collect_result.lock().unwrap() = metrics;
    }

    pub fn validate_calls(&self) -> usize {
        self.validate_calls.load(Ordering::SeqCst)
    }

    pub fn subscribe_calls(&self) -> usize {
        self.subscribe_calls.load(Ordering::SeqCst)
    }

    pub fn unsubscribe_calls(&self) -> usize {
        self.unsubscribe_calls.load(Ordering::SeqCst)
    }

    pub fn collect_calls(&self) -> usize {
        self.collect_calls.load(Ordering::SeqCst)
    }

    pub fn process_calls(&self) -> usize {
        self.process_calls.load(Ordering::SeqCst)
    }

    pub fn publish_calls(&self) -> usize {
        self.publish_calls.load(Ordering::SeqCst)
    }

    /// 已发布的指标批次
    pub fn published(&self) -> Vec<Vec<Metric>> {
        self.published.lock().unwrap().clone()
    }
}

impl Default for MockMetricManager {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl MetricManager for MockMetricManager {
    async fn validate_deps(
        &self,
        _metrics: &[RequestedMetric],
        _plugins: &[SubscribedPlugin],
        _config: &ConfigTree,
    ) -> Vec<SnapError> {
        self.validate_calls.fetch_add(1, Ordering::SeqCst);
        if self.fail_validate.load(Ordering::SeqCst) {
            vec![SnapError::validation("模拟校验失败")]
        } else {
            Vec::new()
        }
    }

    async fn subscribe_deps(
        &self,
        _task_id: &str,
        _metrics: &[RequestedMetric],
        _plugins: &[SubscribedPlugin],
        _config: &ConfigTree,
    ) -> Vec<SnapError> {
        self.subscribe_calls.fetch_add(1, Ordering::SeqCst);
        if self.fail_subscribe.load(Ordering::SeqCst) {
            vec![SnapError::subscribe("mock", "模拟订阅失败")]
        } else {
            Vec::new()
        }
    }

    async fn unsubscribe_deps(&self, _task_id: &str) -> Vec<SnapError> {
        self.unsubscribe_calls.fetch_add(1, Ordering::SeqCst);
        Vec::new()
    }

    async fn collect_metrics(&self, _task_id: &str, _tags: &TagMap) -> SnapResult<Vec<Metric>> {
        self.collect_calls.fetch_add(1, Ordering::SeqCst);
        let latency = *self.collect_latency.lock().unwrap();
        if let Some(latency) = latency {
            tokio::time::sleep(latency).await;
        }
        if self.fail_collect.load(Ordering::SeqCst) {
            return Err(SnapError::Collect("模拟采集失败".to_string()));
        }
        let mut metrics = self.collect_result.lock().unwrap().clone();
        let now = Utc::now();
        for metric in &mut metrics {
            metric.timestamp = now;
        }
        Ok(metrics)
    }

    async fn process_metrics(
        &self,
        plugin: &str,
        _version: i32,
        _config: &ConfigMap,
        _task_id: &str,
        metrics: Vec<Metric>,
    ) -> SnapResult<Vec<Metric>> {
        self.process_calls.fetch_add(1, Ordering::SeqCst);
        if self.fail_process.load(Ordering::SeqCst) {
            return Err(SnapError::Process {
                plugin: plugin.to_string(),
                reason: "模拟处理失败".to_string(),
            });
        }
        Ok(metrics)
    }

    async fn publish_metrics(
        &self,
        plugin: &str,
        _version: i32,
        _config: &ConfigMap,
        _task_id: &str,
        metrics: Vec<Metric>,
    ) -> SnapResult<()> {
        self.publish_calls.fetch_add(1, Ordering::SeqCst);
        if self.fail_publish.load(Ordering::SeqCst) {
            return Err(SnapError::Publish {
                plugin: plugin.to_string(),
                reason: "模拟发布失败".to_string(),
            });
        }
        self.published.lock().unwrap().push(metrics);
        Ok(())
    }
}

/// 记录全量事件的全局处理器
pub struct RecordingEventHandler {
    events: Mutex<Vec<SchedulerEvent>>,
}

impl RecordingEventHandler {
    pub fn new() -> Self {
        Self {
            events: Mutex::new(Vec::new()),
        }
    }

    pub fn event_count(&self) -> usize {
        self.events.lock().unwrap().len()
    }

    pub fn event_types(&self) -> Vec<&'static str> {
        self.events
            .lock()
            .unwrap()
            .iter()
            .map(|e| e.event_type())
            .collect()
    }

    pub fn has_event(&self, event_type: &str) -> bool {
        self.events
            .lock()
            .unwrap()
            .iter()
            .any(|e| e.event_type() == event_type)
    }
}

impl Default for RecordingEventHandler {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl EventHandler for RecordingEventHandler {
    async fn handle_event(&self, event: &SchedulerEvent) {
        self.events.lock().unwrap().push(event.clone());
    }
}

/// 观察者收到的事件种类
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WatchEvent {
    Started,
    /// 携带批次中的指标条数
    Collection(usize),
    Stopped,
    Disabled(String),
}

/// 记录事件顺序的任务观察者
pub struct RecordingWatchHandler {
    events: Mutex<Vec<WatchEvent>>,
}

impl RecordingWatchHandler {
    pub fn new() -> Self {
        Self {
            events: Mutex::new(Vec::new()),
        }
    }

    pub fn events(&self) -> Vec<WatchEvent> {
        self.events.lock().unwrap().clone()
    }

    pub fn collection_count(&self) -> usize {
        self.events
            .lock()
            .unwrap()
            .iter()
            .filter(|e| matches!(e, WatchEvent::Collection(_)))
            .count()
    }

    fn record(&self, event: WatchEvent) {
        self.events.lock().unwrap().push(event);
    }
}

impl Default for RecordingWatchHandler {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl TaskWatchHandler for RecordingWatchHandler {
    async fn catch_collection(&self, metrics: Vec<Metric>) {
        self.record(WatchEvent::Collection(metrics.len()));
    }

    async fn catch_task_started(&self) {
        self.record(WatchEvent::Started);
    }

    async fn catch_task_stopped(&self) {
        self.record(WatchEvent::Stopped);
    }

    async fn catch_task_disabled(&self, why: String) {
        self.record(WatchEvent::Disabled(why));
    }
}
