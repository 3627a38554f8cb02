//! snapd — 遥测任务调度守护进程
//!
//! 装配调度核心、控制代理客户端与可观测性组件；
//! 二进制入口在 `main.rs`。

pub mod app;
pub mod shutdown;

pub use app::Application;
pub use shutdown::ShutdownManager;
