//! 遥测任务调度核心
//!
//! 调度器把用户提交的（调度, 工作流）绑定物化为长生命周期任务：
//! 调度产生触发时刻，任务在每次触发时把工作流树展开为采集/处理/
//! 发布工作单元，交给有界的工作管理器执行，结果更新任务统计并经
//! 事件总线对外发布。订阅管理器保证任务启动前所有插件依赖已被
//! 事务性订阅，停止或禁用后全部释放。

pub mod event_bus;
pub mod managers;
pub mod schedule;
pub mod scheduler;
pub mod subscriptions;
pub mod task;
pub mod work_manager;

pub use event_bus::{EventBus, TaskWatchingHandle};
pub use managers::ManagerRegistry;
pub use schedule::{Schedule, ScheduleState, Waited};
pub use scheduler::{Scheduler, SchedulerConfig};
pub use subscriptions::SubscriptionManager;
pub use task::TaskOptions;
pub use work_manager::{WorkManager, WorkManagerConfig, WorkPayload, WorkUnit};
