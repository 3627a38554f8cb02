//! 端口定义
//!
//! 调度器核心依赖的外部能力接口，均以 `Arc<dyn Trait>` 形式注入。

pub mod handlers;
pub mod manager;

pub use handlers::*;
pub use manager::*;
