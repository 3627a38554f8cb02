//! 调度器
//!
//! 拥有任务表、工作管理器、管理器注册表与事件总线，对外提供任务
//! 的创建/启动/停止/移除/启用与观察接口。任务不做持久化，守护进程
//! 重启后任务表为空。

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::RwLock;
use tracing::{info, warn};
use uuid::Uuid;

use snap_domain::{
    EventHandler, MetricManager, TaskSnapshot, TaskState, TaskWatchHandler, Workflow,
};
use snap_errors::{SnapError, SnapResult};
use snap_observability::{MetricsCollector, StructuredLogger};

use crate::event_bus::{EventBus, TaskWatchingHandle};
use crate::managers::ManagerRegistry;
use crate::schedule::Schedule;
use crate::subscriptions::SubscriptionManager;
use crate::task::{Task, TaskOptions};
use crate::work_manager::{WorkManager, WorkManagerConfig};

/// 调度器构造配置
#[derive(Debug, Clone)]
pub struct SchedulerConfig {
    pub work_manager_queue_size: usize,
    pub work_manager_pool_size: usize,
    /// 远端管理器初次连接的超时上限
    pub connection_timeout: Duration,
    /// 关闭时等待在途工作的宽限期
    pub shutdown_grace: Duration,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            work_manager_queue_size: 25,
            work_manager_pool_size: 4,
            connection_timeout: Duration::from_secs(10),
            shutdown_grace: Duration::from_secs(5),
        }
    }
}

pub struct Scheduler {
    tasks: RwLock<HashMap<String, Arc<Task>>>,
    work_manager: Arc<WorkManager>,
    managers: Arc<ManagerRegistry>,
    subscriptions: Arc<SubscriptionManager>,
    event_bus: Arc<EventBus>,
    metrics: Arc<MetricsCollector>,
    started: AtomicBool,
}

impl Scheduler {
    /// 创建调度器并启动内部的工作管理器；必须在 Tokio 运行时内调用
    pub fn new(config: SchedulerConfig, metrics: Arc<MetricsCollector>) -> Self {
        let managers = Arc::new(ManagerRegistry::new(
            config.connection_timeout,
            Arc::clone(&metrics),
        ));
        let work_manager = Arc::new(WorkManager::new(
            WorkManagerConfig {
                queue_size: config.work_manager_queue_size,
                pool_size: config.work_manager_pool_size,
                shutdown_grace: config.shutdown_grace,
            },
            Arc::clone(&managers),
            Arc::clone(&metrics),
        ));
        let subscriptions = Arc::new(SubscriptionManager::new(
            Arc::clone(&managers),
            Arc::clone(&metrics),
        ));

        Self {
            tasks: RwLock::new(HashMap::new()),
            work_manager,
            managers,
            subscriptions,
            event_bus: Arc::new(EventBus::new()),
            metrics,
            started: AtomicBool::new(false),
        }
    }

    /// 管理器注册表；装配侧注入本地客户端，测试侧注入桩
    pub fn managers(&self) -> Arc<ManagerRegistry> {
        Arc::clone(&self.managers)
    }

    /// 安装本地指标管理器（注册表中的空地址键）
    pub async fn set_metric_manager(&self, manager: Arc<dyn MetricManager>) {
        self.managers.set_local(manager).await;
    }

    /// 启动调度器；要求本地指标管理器已安装
    pub async fn start(&self) -> SnapResult<()> {
        if !self.managers.has_local().await {
            return Err(SnapError::config_error(
                "本地指标管理器尚未安装，无法启动调度器",
            ));
        }
        self.started.store(true, Ordering::SeqCst);
        info!("调度器已启动");
        Ok(())
    }

    /// 停止全部任务并关闭工作管理器
    pub async fn stop(&self) {
        self.started.store(false, Ordering::SeqCst);
        let tasks: Vec<Arc<Task>> = self.tasks.read().await.values().cloned().collect();
        for task in tasks {
            // 未运行的任务返回 TaskAlreadyStopped，忽略即可
            let _ = task.stop().await;
        }
        self.work_manager.shutdown().await;
        info!("调度器已停止");
    }

    /// 创建任务
    ///
    /// 返回的错误列表非空时任务未被创建。`opts.start` 为真时创建后
    /// 立即启动，启动失败则任务被回收，错误一并返回。
    pub async fn create_task(
        &self,
        schedule: Schedule,
        workflow: Workflow,
        opts: TaskOptions,
    ) -> Result<TaskSnapshot, Vec<SnapError>> {
        if !self.started.load(Ordering::SeqCst) {
            return Err(vec![SnapError::internal("调度器尚未启动")]);
        }

        let mut errors = Vec::new();
        if let Err(e) = schedule.validate() {
            errors.push(e);
        }

        // 本地依赖经由本地管理器校验；远端目标的依赖在启动订阅时
        // 由对应的远端管理器把关
        match self.managers.get("").await {
            Ok(local) => {
                if let Some(local_deps) = workflow.deps_by_target().get("") {
                    errors.extend(
                        local
                            .validate_deps(&local_deps.metrics, &local_deps.plugins, &local_deps.config)
                            .await,
                    );
                }
            }
            Err(e) => errors.push(e),
        }

        if !errors.is_empty() {
            return Err(errors);
        }

        let id = Uuid::new_v4().simple().to_string();
        let name = opts.name.clone().unwrap_or_else(|| format!("Task-{id}"));
        let task = Arc::new(Task::new(
            id.clone(),
            name.clone(),
            schedule,
            workflow,
            opts.stop_on_failure,
            Arc::clone(&self.work_manager),
            Arc::clone(&self.subscriptions),
            Arc::clone(&self.event_bus),
            Arc::clone(&self.metrics),
        ));

        {
            let mut tasks = self.tasks.write().await;
            tasks.insert(id.clone(), Arc::clone(&task));
            self.metrics.set_active_tasks(tasks.len());
        }
        StructuredLogger::log_task_created(&id, &name);

        if opts.start {
            if let Err(errors) = self.start_task(&id).await {
                // 启动失败的任务不留在任务表里
                let mut tasks = self.tasks.write().await;
                tasks.remove(&id);
                self.metrics.set_active_tasks(tasks.len());
                return Err(errors);
            }
        }

        Ok(task.snapshot().await)
    }

    /// 启动任务；被禁用的任务会被拒绝
    pub async fn start_task(&self, id: &str) -> Result<(), Vec<SnapError>> {
        let task = self
            .lookup(id)
            .await
            .map_err(|e| vec![e])?;
        task.start().await
    }

    /// 停止任务；挂起的工作单元被取消，订阅被释放
    pub async fn stop_task(&self, id: &str) -> Result<(), Vec<SnapError>> {
        let task = self
            .lookup(id)
            .await
            .map_err(|e| vec![e])?;
        task.stop().await
    }

    /// 移除任务：先停止再从任务表删除，并关闭其全部观察者
    pub async fn remove_task(&self, id: &str) -> SnapResult<()> {
        let task = {
            let mut tasks = self.tasks.write().await;
            let task = tasks.remove(id).ok_or_else(|| SnapError::task_not_found(id))?;
            self.metrics.set_active_tasks(tasks.len());
            task
        };

        if let Err(errors) = task.stop().await {
            for e in errors {
                if !matches!(e, SnapError::TaskAlreadyStopped { .. }) {
                    warn!("移除任务 {id} 时停止失败: {e}");
                }
            }
        }
        task.mark_removed().await;
        self.event_bus.drop_task_watchers(id).await;

        // 最后一个引用某远端地址的任务移除后，释放对应连接
        let in_use = self.targets_in_use().await;
        self.managers.release_unused(&in_use).await;

        info!("任务 {id} 已移除");
        Ok(())
    }

    /// 重新启用被禁用的任务：Disabled -> Stopped，用户可再启动
    pub async fn enable_task(&self, id: &str) -> SnapResult<TaskSnapshot> {
        let task = self.lookup(id).await?;
        task.enable().await?;
        Ok(task.snapshot().await)
    }

    pub async fn get_task(&self, id: &str) -> SnapResult<TaskSnapshot> {
        let task = self.lookup(id).await?;
        Ok(task.snapshot().await)
    }

    pub async fn get_tasks(&self) -> Vec<TaskSnapshot> {
        let tasks: Vec<Arc<Task>> = self.tasks.read().await.values().cloned().collect();
        let mut snapshots = Vec::with_capacity(tasks.len());
        for task in tasks {
            snapshots.push(task.snapshot().await);
        }
        snapshots
    }

    /// 观察任务的生命周期事件与指标批次
    pub async fn watch_task(
        &self,
        id: &str,
        handler: Arc<dyn TaskWatchHandler>,
    ) -> SnapResult<TaskWatchingHandle> {
        let task = self.lookup(id).await?;
        Ok(self.event_bus.watch(task.id(), handler).await)
    }

    /// 注册具名全局事件处理器
    pub async fn register_event_handler(&self, name: &str, handler: Arc<dyn EventHandler>) {
        self.event_bus.register_handler(name, handler).await;
    }

    pub async fn unregister_event_handler(&self, name: &str) -> bool {
        self.event_bus.unregister_handler(name).await
    }

    async fn lookup(&self, id: &str) -> SnapResult<Arc<Task>> {
        self.tasks
            .read()
            .await
            .get(id)
            .cloned()
            .ok_or_else(|| SnapError::task_not_found(id))
    }

    /// 仍被任务表引用的远端目标地址集合
    async fn targets_in_use(&self) -> HashSet<String> {
        let tasks = self.tasks.read().await;
        let mut in_use = HashSet::new();
        for task in tasks.values() {
            if task.state().await == TaskState::Removed {
                continue;
            }
            for address in task.workflow().deps_by_target().keys() {
                in_use.insert(address.clone());
            }
        }
        in_use
    }
}
