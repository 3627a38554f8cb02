use tracing::{info, warn};

/// 结构化日志辅助
///
/// 生命周期事件统一经由这里打日志，保证字段命名一致，
/// 便于日志管道按 `event` 字段聚合。
pub struct StructuredLogger;

impl StructuredLogger {
    pub fn log_task_created(task_id: &str, task_name: &str) {
        info!(
            event = "task_created",
            task.id = task_id,
            task.name = task_name,
            "任务已创建"
        );
    }

    pub fn log_task_started(task_id: &str, task_name: &str) {
        info!(
            event = "task_started",
            task.id = task_id,
            task.name = task_name,
            "任务开始运行"
        );
    }

    pub fn log_task_stopped(task_id: &str, task_name: &str) {
        info!(
            event = "task_stopped",
            task.id = task_id,
            task.name = task_name,
            "任务已停止"
        );
    }

    pub fn log_task_disabled(task_id: &str, task_name: &str, why: &str) {
        warn!(
            event = "task_disabled",
            task.id = task_id,
            task.name = task_name,
            reason = why,
            "任务已被自动禁用"
        );
    }

    pub fn log_firing_failed(task_id: &str, consecutive: u64, error: &str) {
        warn!(
            event = "firing_failed",
            task.id = task_id,
            consecutive_failures = consecutive,
            error = error,
            "任务触发失败"
        );
    }

    pub fn log_work_rejected(task_id: &str) {
        warn!(
            event = "work_rejected",
            task.id = task_id,
            "工作队列已满，本次触发计为 miss"
        );
    }
}
