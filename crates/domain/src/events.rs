//! 调度器生命周期与数据事件
//!
//! 封闭的事件变体集合：生命周期事件（启动/停止/禁用/启用）永不丢弃，
//! 指标批次在慢接收者处允许被更新的批次替换。

use crate::entities::Metric;

/// 调度器对外发布的事件
#[derive(Debug, Clone)]
pub enum SchedulerEvent {
    TaskStarted {
        task_id: String,
    },
    TaskStopped {
        task_id: String,
    },
    TaskDisabled {
        task_id: String,
        why: String,
    },
    TaskEnabled {
        task_id: String,
    },
    /// 一次触发采集到的指标批次（失败触发的部分结果也经由此事件可见）
    MetricsCollected {
        task_id: String,
        metrics: Vec<Metric>,
    },
    /// 因容量耗尽或触发重叠而被丢弃的周期
    MetricsGatheredMiss {
        task_id: String,
    },
    ProcessError {
        task_id: String,
        plugin: String,
        error: String,
    },
    MetricPublishError {
        task_id: String,
        plugin: String,
        error: String,
    },
}

impl SchedulerEvent {
    /// 事件线格式标签
    pub fn event_type(&self) -> &'static str {
        match self {
            SchedulerEvent::TaskStarted { .. } => "TaskStarted",
            SchedulerEvent::TaskStopped { .. } => "TaskStopped",
            SchedulerEvent::TaskDisabled { .. } => "TaskDisabled",
            SchedulerEvent::TaskEnabled { .. } => "TaskEnabled",
            SchedulerEvent::MetricsCollected { .. } => "MetricsCollected",
            SchedulerEvent::MetricsGatheredMiss { .. } => "MetricsGatheredMiss",
            SchedulerEvent::ProcessError { .. } => "ProcessError",
            SchedulerEvent::MetricPublishError { .. } => "MetricPublishError",
        }
    }

    pub fn task_id(&self) -> &str {
        match self {
            SchedulerEvent::TaskStarted { task_id }
            | SchedulerEvent::TaskStopped { task_id }
            | SchedulerEvent::TaskDisabled { task_id, .. }
            | SchedulerEvent::TaskEnabled { task_id }
            | SchedulerEvent::MetricsCollected { task_id, .. }
            | SchedulerEvent::MetricsGatheredMiss { task_id }
            | SchedulerEvent::ProcessError { task_id, .. }
            | SchedulerEvent::MetricPublishError { task_id, .. } => task_id,
        }
    }

    /// 生命周期事件在投递邮箱中永不丢弃
    pub fn is_lifecycle(&self) -> bool {
        matches!(
            self,
            SchedulerEvent::TaskStarted { .. }
                | SchedulerEvent::TaskStopped { .. }
                | SchedulerEvent::TaskDisabled { .. }
                | SchedulerEvent::TaskEnabled { .. }
        )
    }

    /// 指标批次允许被同一任务更新的批次原位替换
    pub fn is_coalescible(&self) -> bool {
        matches!(self, SchedulerEvent::MetricsCollected { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_event_type_tags() {
        let ev = SchedulerEvent::TaskDisabled {
            task_id: "t1".to_string(),
            why: "连续失败".to_string(),
        };
        assert_eq!(ev.event_type(), "TaskDisabled");
        assert_eq!(ev.task_id(), "t1");
        assert!(ev.is_lifecycle());
        assert!(!ev.is_coalescible());
    }

    #[test]
    fn test_metric_batch_is_coalescible() {
        let ev = SchedulerEvent::MetricsCollected {
            task_id: "t1".to_string(),
            metrics: vec![],
        };
        assert!(!ev.is_lifecycle());
        assert!(ev.is_coalescible());

        let miss = SchedulerEvent::MetricsGatheredMiss {
            task_id: "t1".to_string(),
        };
        assert!(!miss.is_lifecycle());
        assert!(!miss.is_coalescible());
    }
}
