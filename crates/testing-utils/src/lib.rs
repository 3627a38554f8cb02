//! 共享测试工具
//!
//! 供工作区内其他 crate 作为 dev-dependency 使用：
//!
//! - **管理器桩**：带订阅/退订计数与可注入故障的 `MockMetricManager`
//! - **事件记录器**：记录全量事件的全局处理器与任务观察者
//! - **工作流构造器**：常用的采集-处理-发布测试夹具
//! - **异步辅助**：条件轮询等待、测试日志初始化

pub mod builders;
pub mod helpers;
pub mod mocks;

pub use builders::*;
pub use helpers::*;
pub use mocks::*;
