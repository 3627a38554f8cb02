//! 可观测性组件
//!
//! 基于 `metrics` facade 的指标收集器与基于 `tracing` 的结构化
//! 日志辅助函数。指标导出端（Prometheus 等）由部署侧安装 recorder
//! 决定，本 crate 只负责打点。

pub mod metrics_collector;
pub mod structured_logger;

pub use metrics_collector::MetricsCollector;
pub use structured_logger::StructuredLogger;
