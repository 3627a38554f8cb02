//! 事件接收端口
//!
//! 两种接收者形态：全局处理器接收全量事件变体，任务观察者按
//! 事件种类各有一个回调方法。

use async_trait::async_trait;

use crate::entities::Metric;
use crate::events::SchedulerEvent;

/// 全局事件处理器，按注册顺序接收所有任务的事件
#[async_trait]
pub trait EventHandler: Send + Sync {
    async fn handle_event(&self, event: &SchedulerEvent);
}

/// 单任务观察者
///
/// 观察者接收任务时间线顺序的生命周期事件与指标批次，
/// 投递由调度器侧的邮箱驱动，慢观察者不会阻塞发布方。
#[async_trait]
pub trait TaskWatchHandler: Send + Sync {
    async fn catch_collection(&self, metrics: Vec<Metric>);
    async fn catch_task_started(&self);
    async fn catch_task_stopped(&self);
    async fn catch_task_disabled(&self, why: String);
}
