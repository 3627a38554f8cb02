use anyhow::Result;
use metrics::{counter, gauge, histogram, Counter, Gauge, Histogram};

/// 调度器运行指标收集器
///
/// 所有指标在构造时注册一次，热路径上只做无锁打点。
pub struct MetricsCollector {
    // 任务指标
    tasks_active: Gauge,
    task_firings_total: Counter,
    task_firing_failures_total: Counter,
    task_misses_total: Counter,
    task_disabled_total: Counter,
    task_firing_duration: Histogram,

    // 工作管理器指标
    work_submitted_total: Counter,
    work_rejections_total: Counter,
    work_execution_duration: Histogram,

    // 订阅与远端连接指标
    subscribe_failures_total: Counter,
    remote_dial_failures_total: Counter,
}

impl MetricsCollector {
    pub fn new() -> Result<Self> {
        let tasks_active = gauge!("snap_scheduler_tasks_active");
        let task_firings_total = counter!("snap_scheduler_task_firings_total");
        let task_firing_failures_total = counter!("snap_scheduler_task_firing_failures_total");
        let task_misses_total = counter!("snap_scheduler_task_misses_total");
        let task_disabled_total = counter!("snap_scheduler_task_disabled_total");
        let task_firing_duration = histogram!("snap_scheduler_task_firing_duration_seconds");

        let work_submitted_total = counter!("snap_scheduler_work_submitted_total");
        let work_rejections_total = counter!("snap_scheduler_work_rejections_total");
        let work_execution_duration = histogram!("snap_scheduler_work_execution_duration_seconds");

        let subscribe_failures_total = counter!("snap_scheduler_subscribe_failures_total");
        let remote_dial_failures_total = counter!("snap_scheduler_remote_dial_failures_total");

        Ok(Self {
            tasks_active,
            task_firings_total,
            task_firing_failures_total,
            task_misses_total,
            task_disabled_total,
            task_firing_duration,
            work_submitted_total,
            work_rejections_total,
            work_execution_duration,
            subscribe_failures_total,
            remote_dial_failures_total,
        })
    }

    pub fn set_active_tasks(&self, count: usize) {
        self.tasks_active.set(count as f64);
    }

    pub fn record_firing(&self, duration_seconds: f64) {
        self.task_firings_total.increment(1);
        self.task_firing_duration.record(duration_seconds);
    }

    pub fn record_firing_failure(&self) {
        self.task_firing_failures_total.increment(1);
    }

    pub fn record_miss(&self, count: u64) {
        self.task_misses_total.increment(count);
    }

    pub fn record_task_disabled(&self) {
        self.task_disabled_total.increment(1);
    }

    pub fn record_work_submitted(&self) {
        self.work_submitted_total.increment(1);
    }

    pub fn record_work_rejected(&self) {
        self.work_rejections_total.increment(1);
    }

    pub fn record_work_execution(&self, duration_seconds: f64) {
        self.work_execution_duration.record(duration_seconds);
    }

    pub fn record_subscribe_failure(&self) {
        self.subscribe_failures_total.increment(1);
    }

    pub fn record_remote_dial_failure(&self) {
        self.remote_dial_failures_total.increment(1);
    }
}
