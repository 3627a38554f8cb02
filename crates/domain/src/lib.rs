//! 遥测调度系统领域模型
//!
//! 纯值类型与端口定义：指标、命名空间、工作流树、插件订阅、
//! 生命周期事件，以及指标管理器的能力接口。
//! 本 crate 不依赖任何运行时组件。

pub mod entities;
pub mod events;
pub mod ports;
pub mod workflow;

pub use entities::*;
pub use events::*;
pub use ports::*;
pub use snap_errors::{SnapError, SnapResult};
pub use workflow::*;
