//! 订阅管理器
//!
//! 任务启动前的事务性准备：把工作流的依赖按目标地址分组，对每个
//! 地址恰好调用一次订阅。任何地址失败时，对所有已触达的地址（含
//! 失败者本身）执行补偿退订，再向调用方暴露错误——保证任务不处于
//! 运行态时，每个地址上的订阅与退订次数始终相等。

use std::sync::Arc;

use tracing::{debug, warn};

use snap_domain::{MetricManager, Workflow};
use snap_errors::SnapError;
use snap_observability::MetricsCollector;

use crate::managers::ManagerRegistry;

pub struct SubscriptionManager {
    managers: Arc<ManagerRegistry>,
    metrics: Arc<MetricsCollector>,
}

impl SubscriptionManager {
    pub fn new(managers: Arc<ManagerRegistry>, metrics: Arc<MetricsCollector>) -> Self {
        Self { managers, metrics }
    }

    /// 为任务订阅工作流触达的全部依赖
    ///
    /// 返回错误时调用方可以确信没有任何管理器仍为该任务持有订阅。
    pub async fn prepare(&self, task_id: &str, workflow: &Workflow) -> Result<(), Vec<SnapError>> {
        let groups = workflow.deps_by_target();
        let mut touched: Vec<(String, Arc<dyn MetricManager>)> = Vec::new();

        for (address, deps) in &groups {
            let manager = match self.managers.get(address).await {
                Ok(manager) => manager,
                Err(e) => {
                    self.metrics.record_subscribe_failure();
                    let mut errors = vec![e];
                    errors.extend(self.rollback(task_id, &touched).await);
                    return Err(errors);
                }
            };

            let errors = manager
                .subscribe_deps(task_id, &deps.metrics, &deps.plugins, &deps.config)
                .await;
            touched.push((address.clone(), Arc::clone(&manager)));

            if !errors.is_empty() {
                self.metrics.record_subscribe_failure();
                warn!(
                    "任务 {task_id} 在地址 {address:?} 订阅失败，开始补偿退订 {} 个地址",
                    touched.len()
                );
                let mut all = errors;
                all.extend(self.rollback(task_id, &touched).await);
                return Err(all);
            }

            debug!(
                "任务 {task_id} 已在地址 {address:?} 订阅 {} 个指标、{} 个插件",
                deps.metrics.len(),
                deps.plugins.len()
            );
        }

        Ok(())
    }

    /// 释放任务在工作流所有目标地址上的订阅
    pub async fn release(&self, task_id: &str, workflow: &Workflow) -> Vec<SnapError> {
        let mut errors = Vec::new();
        for address in workflow.deps_by_target().keys() {
            match self.managers.get(address).await {
                Ok(manager) => {
                    errors.extend(manager.unsubscribe_deps(task_id).await);
                }
                Err(e) => errors.push(e),
            }
        }
        if !errors.is_empty() {
            warn!("任务 {task_id} 释放订阅时出现 {} 个错误", errors.len());
        }
        errors
    }

    /// 补偿退订已触达的管理器；退订自身的错误只记录不中断
    async fn rollback(
        &self,
        task_id: &str,
        touched: &[(String, Arc<dyn MetricManager>)],
    ) -> Vec<SnapError> {
        let mut errors = Vec::new();
        for (address, manager) in touched {
            let errs = manager.unsubscribe_deps(task_id).await;
            if !errs.is_empty() {
                warn!("任务 {task_id} 在地址 {address:?} 补偿退订失败");
                errors.extend(errs);
            }
        }
        errors
    }
}
