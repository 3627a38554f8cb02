//! 指标管理器能力接口
//!
//! 控制子系统对调度器暴露的统一能力面：依赖校验、订阅管理与
//! 采集/处理/发布三类数据操作。本地实现与远端代理实现对调度器
//! 而言不可区分，仅以注册表中的地址键区分。

use async_trait::async_trait;

use snap_errors::{SnapError, SnapResult};

use crate::entities::{ConfigMap, ConfigTree, Metric, RequestedMetric, SubscribedPlugin, TagMap};

/// 指标管理器能力集
///
/// `validate_deps` / `subscribe_deps` / `unsubscribe_deps` 返回错误列表，
/// 空列表表示成功；订阅按 `(任务, 插件)` 幂等，退订对未订阅的任务也安全。
#[async_trait]
pub trait MetricManager: Send + Sync {
    /// 校验每个请求指标可被满足、每个插件在请求版本（或最新版）下存在
    async fn validate_deps(
        &self,
        metrics: &[RequestedMetric],
        plugins: &[SubscribedPlugin],
        config: &ConfigTree,
    ) -> Vec<SnapError>;

    /// 为任务订阅依赖，在插件池上增加引用计数；必须与退订成对出现
    async fn subscribe_deps(
        &self,
        task_id: &str,
        metrics: &[RequestedMetric],
        plugins: &[SubscribedPlugin],
        config: &ConfigTree,
    ) -> Vec<SnapError>;

    /// 释放任务持有的全部订阅；幂等，未订阅时调用也安全
    async fn unsubscribe_deps(&self, task_id: &str) -> Vec<SnapError>;

    /// 同步采集，返回按返回时刻打戳的指标快照
    async fn collect_metrics(&self, task_id: &str, tags: &TagMap) -> SnapResult<Vec<Metric>>;

    async fn process_metrics(
        &self,
        plugin: &str,
        version: i32,
        config: &ConfigMap,
        task_id: &str,
        metrics: Vec<Metric>,
    ) -> SnapResult<Vec<Metric>>;

    async fn publish_metrics(
        &self,
        plugin: &str,
        version: i32,
        config: &ConfigMap,
        task_id: &str,
        metrics: Vec<Metric>,
    ) -> SnapResult<()>;
}
