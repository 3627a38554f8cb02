//! 任务运行时
//!
//! 每个任务独占一个触发协程：等待调度产生的下一个触发时刻，把
//! 工作流树展开为工作单元逐个派发并阻塞等待回复，因此同一任务
//! 任意时刻至多只有一次触发在途。统计计数只由触发协程写入，查询
//! 方读到最终一致的快照。连续失败达到阈值后任务自动禁用并释放
//! 全部订阅。

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use tokio::sync::{broadcast, Mutex, RwLock};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use snap_domain::{
    Metric, NodeKind, SchedulerEvent, TaskSnapshot, TaskState, Workflow, WorkflowNode,
};
use snap_errors::SnapError;
use snap_observability::{MetricsCollector, StructuredLogger};

use crate::event_bus::EventBus;
use crate::schedule::{Schedule, ScheduleState};
use crate::subscriptions::SubscriptionManager;
use crate::work_manager::{WorkManager, WorkPayload, WorkUnit};

/// 创建任务时的可选项
#[derive(Debug, Clone)]
pub struct TaskOptions {
    /// 任务名；缺省为 `Task-<id>`
    pub name: Option<String>,
    /// 连续失败多少次后自动禁用
    pub stop_on_failure: u64,
    /// 创建后立即启动
    pub start: bool,
}

impl Default for TaskOptions {
    fn default() -> Self {
        Self {
            name: None,
            stop_on_failure: 3,
            start: false,
        }
    }
}

struct TickerHandle {
    stop_tx: broadcast::Sender<()>,
    join: JoinHandle<()>,
}

/// 一次触发的结果
enum FiringOutcome {
    Success,
    Failure(String),
    /// 容量耗尽，本次触发整体计为 miss
    Miss,
    /// 工作管理器正在关闭，任务静默转入停止
    Aborted,
}

pub(crate) struct Task {
    id: String,
    name: String,
    schedule: Schedule,
    workflow: Arc<Workflow>,
    stop_on_failure: u64,
    created_at: DateTime<Utc>,

    state: RwLock<TaskState>,
    hit_count: AtomicU64,
    miss_count: AtomicU64,
    failed_count: AtomicU64,
    consecutive_failures: AtomicU64,
    last_fire: RwLock<Option<DateTime<Utc>>>,
    ticker: Mutex<Option<TickerHandle>>,

    work_manager: Arc<WorkManager>,
    subscriptions: Arc<SubscriptionManager>,
    event_bus: Arc<EventBus>,
    metrics: Arc<MetricsCollector>,
}

impl Task {
    #[allow(clippy::too_many_arguments)]
    pub(crate) fn new(
        id: String,
        name: String,
        schedule: Schedule,
        workflow: Workflow,
        stop_on_failure: u64,
        work_manager: Arc<WorkManager>,
        subscriptions: Arc<SubscriptionManager>,
        event_bus: Arc<EventBus>,
        metrics: Arc<MetricsCollector>,
    ) -> Self {
        Self {
            id,
            name,
            schedule,
            workflow: Arc::new(workflow),
            stop_on_failure: stop_on_failure.max(1),
            created_at: Utc::now(),
            state: RwLock::new(TaskState::Created),
            hit_count: AtomicU64::new(0),
            miss_count: AtomicU64::new(0),
            failed_count: AtomicU64::new(0),
            consecutive_failures: AtomicU64::new(0),
            last_fire: RwLock::new(None),
            ticker: Mutex::new(None),
            work_manager,
            subscriptions,
            event_bus,
            metrics,
        }
    }

    pub(crate) fn id(&self) -> &str {
        &self.id
    }

    pub(crate) fn workflow(&self) -> &Workflow {
        &self.workflow
    }

    pub(crate) async fn state(&self) -> TaskState {
        *self.state.read().await
    }

    pub(crate) async fn snapshot(&self) -> TaskSnapshot {
        TaskSnapshot {
            id: self.id.clone(),
            name: self.name.clone(),
            state: *self.state.read().await,
            hit_count: self.hit_count.load(Ordering::Relaxed),
            miss_count: self.miss_count.load(Ordering::Relaxed),
            failed_count: self.failed_count.load(Ordering::Relaxed),
            consecutive_failures: self.consecutive_failures.load(Ordering::Relaxed),
            stop_on_failure: self.stop_on_failure,
            created_at: self.created_at,
            last_fire_at: *self.last_fire.read().await,
        }
    }

    /// 启动任务：订阅全部依赖成功后才会产生第一次触发
    pub(crate) async fn start(self: Arc<Self>) -> Result<(), Vec<SnapError>> {
        let mut state = self.state.write().await;
        match *state {
            TaskState::Created | TaskState::Stopped => {}
            TaskState::Disabled => {
                return Err(vec![SnapError::TaskDisabled {
                    id: self.id.clone(),
                }])
            }
            TaskState::Spinning => {
                return Err(vec![SnapError::TaskAlreadyRunning {
                    id: self.id.clone(),
                }])
            }
            TaskState::Removed => return Err(vec![SnapError::task_not_found(&self.id)]),
        }

        self.subscriptions.prepare(&self.id, &self.workflow).await?;

        let (stop_tx, stop_rx) = broadcast::channel(1);
        *state = TaskState::Spinning;
        // 先发布启动事件再起触发协程，保证观察者看到 TaskStarted
        // 先于首个指标批次
        self.event_bus
            .emit(SchedulerEvent::TaskStarted {
                task_id: self.id.clone(),
            })
            .await;

        let task = Arc::clone(&self);
        let join = tokio::spawn(async move { task.spin(stop_rx).await });
        *self.ticker.lock().await = Some(TickerHandle { stop_tx, join });
        drop(state);

        StructuredLogger::log_task_started(&self.id, &self.name);
        Ok(())
    }

    /// 停止任务：打断触发协程并等待其退出后再释放订阅
    pub(crate) async fn stop(&self) -> Result<(), Vec<SnapError>> {
        {
            let state = self.state.read().await;
            if *state != TaskState::Spinning {
                return Err(vec![SnapError::TaskAlreadyStopped {
                    id: self.id.clone(),
                }]);
            }
        }

        let Some(handle) = self.ticker.lock().await.take() else {
            return Err(vec![SnapError::TaskAlreadyStopped {
                id: self.id.clone(),
            }]);
        };
        let _ = handle.stop_tx.send(());
        let _ = handle.join.await;

        // 触发协程可能已经自行转移了状态（禁用或窗口结束）
        let mut state = self.state.write().await;
        if *state != TaskState::Spinning {
            return Ok(());
        }
        *state = TaskState::Stopped;
        drop(state);

        self.release_subscriptions().await;
        self.event_bus
            .emit(SchedulerEvent::TaskStopped {
                task_id: self.id.clone(),
            })
            .await;
        StructuredLogger::log_task_stopped(&self.id, &self.name);
        Ok(())
    }

    /// 禁用恢复：Disabled -> Stopped，清零连续失败计数
    pub(crate) async fn enable(&self) -> Result<(), SnapError> {
        let mut state = self.state.write().await;
        if *state != TaskState::Disabled {
            return Err(SnapError::TaskNotDisabled {
                id: self.id.clone(),
            });
        }
        *state = TaskState::Stopped;
        drop(state);

        self.consecutive_failures.store(0, Ordering::Relaxed);
        self.event_bus
            .emit(SchedulerEvent::TaskEnabled {
                task_id: self.id.clone(),
            })
            .await;
        info!("任务 {} 已重新启用", self.id);
        Ok(())
    }

    pub(crate) async fn mark_removed(&self) {
        *self.state.write().await = TaskState::Removed;
    }

    /// 触发循环；任务存续期间在独立协程中运行
    async fn spin(self: Arc<Self>, mut stop_rx: broadcast::Receiver<()>) {
        debug!("任务 {} 触发循环开始", self.id);
        let mut last: Option<DateTime<Utc>> = None;

        loop {
            let waited = tokio::select! {
                biased;
                _ = stop_rx.recv() => return,
                waited = self.schedule.wait(last) => waited,
            };

            match waited.state {
                ScheduleState::Active => {}
                ScheduleState::Ended => {
                    self.finish_stopped("调度窗口结束").await;
                    return;
                }
                ScheduleState::Error => {
                    self.disable("调度定义无效".to_string()).await;
                    return;
                }
            }

            // 上一次触发超时挤掉的周期计为 miss
            if waited.missed > 0 {
                self.miss_count.fetch_add(waited.missed, Ordering::Relaxed);
                self.metrics.record_miss(waited.missed);
                self.event_bus
                    .emit(SchedulerEvent::MetricsGatheredMiss {
                        task_id: self.id.clone(),
                    })
                    .await;
            }

            last = Some(waited.at);
            *self.last_fire.write().await = Some(waited.at);

            let started = std::time::Instant::now();
            // 停止信号会取消在途回复通道；工作协程照常完成
            // 手头的调用，结果被丢弃
            let outcome = tokio::select! {
                biased;
                _ = stop_rx.recv() => return,
                outcome = self.fire(waited.at) => outcome,
            };
            self.metrics.record_firing(started.elapsed().as_secs_f64());

            match outcome {
                FiringOutcome::Success => {
                    self.hit_count.fetch_add(1, Ordering::Relaxed);
                    self.consecutive_failures.store(0, Ordering::Relaxed);
                }
                FiringOutcome::Miss => {
                    self.miss_count.fetch_add(1, Ordering::Relaxed);
                    self.metrics.record_miss(1);
                    StructuredLogger::log_work_rejected(&self.id);
                    self.event_bus
                        .emit(SchedulerEvent::MetricsGatheredMiss {
                            task_id: self.id.clone(),
                        })
                        .await;
                }
                FiringOutcome::Failure(reason) => {
                    self.failed_count.fetch_add(1, Ordering::Relaxed);
                    self.metrics.record_firing_failure();
                    let consecutive =
                        self.consecutive_failures.fetch_add(1, Ordering::Relaxed) + 1;
                    StructuredLogger::log_firing_failed(&self.id, consecutive, &reason);
                    if consecutive >= self.stop_on_failure {
                        self.disable(format!(
                            "连续失败 {consecutive} 次，达到禁用阈值: {reason}"
                        ))
                        .await;
                        return;
                    }
                }
                FiringOutcome::Aborted => {
                    // 工作管理器正在关闭，触发静默中止
                    self.finish_stopped("工作管理器关闭").await;
                    return;
                }
            }
        }
    }

    /// 执行一次触发：采集根节点，然后按前序遍历执行下游节点，
    /// 父节点的输出作为子节点的输入
    async fn fire(&self, fired_at: DateTime<Utc>) -> FiringOutcome {
        let collect_unit = WorkUnit {
            task_id: self.id.clone(),
            fired_at,
            target: String::new(),
            payload: WorkPayload::Collect {
                tags: self.workflow.tags().clone(),
            },
        };

        let reply_rx = match self.work_manager.submit(collect_unit) {
            Ok(rx) => rx,
            Err(SnapError::QueueFull) => return FiringOutcome::Miss,
            Err(_) => return FiringOutcome::Aborted,
        };

        let collected = match reply_rx.await {
            Ok(Ok(metrics)) => metrics,
            Ok(Err(SnapError::Shutdown)) => return FiringOutcome::Aborted,
            Ok(Err(e)) => return FiringOutcome::Failure(e.to_string()),
            // 回复通道被丢弃意味着工作管理器取消了该单元
            Err(_) => return FiringOutcome::Aborted,
        };

        // 采集成功即发布批次；失败触发的部分结果也由此对观察者可见
        self.event_bus
            .emit(SchedulerEvent::MetricsCollected {
                task_id: self.id.clone(),
                metrics: collected.clone(),
            })
            .await;

        // 没有采到任何指标时本次触发成功结束，不执行下游节点
        if collected.is_empty() {
            return FiringOutcome::Success;
        }

        let mut failures: Vec<String> = Vec::new();
        let input = Arc::new(collected);
        let mut stack: Vec<(&WorkflowNode, Arc<Vec<Metric>>)> = self
            .workflow
            .children()
            .iter()
            .rev()
            .map(|node| (node, Arc::clone(&input)))
            .collect();

        while let Some((node, input)) = stack.pop() {
            match self.run_node(node, &input, fired_at).await {
                NodeOutcome::Output(output) => {
                    let output = Arc::new(output);
                    for child in node.children().iter().rev() {
                        stack.push((child, Arc::clone(&output)));
                    }
                }
                NodeOutcome::Failed(reason) => {
                    // 失败节点的子树没有输入，跳过；其余分支继续
                    failures.push(reason);
                }
                NodeOutcome::Miss => return FiringOutcome::Miss,
                NodeOutcome::Aborted => return FiringOutcome::Aborted,
            }
        }

        if failures.is_empty() {
            FiringOutcome::Success
        } else {
            FiringOutcome::Failure(failures.join("; "))
        }
    }

    /// 执行单个处理/发布节点
    async fn run_node(
        &self,
        node: &WorkflowNode,
        input: &[Metric],
        fired_at: DateTime<Utc>,
    ) -> NodeOutcome {
        let payload = match node.kind {
            NodeKind::Process => WorkPayload::Process {
                plugin: node.name.clone(),
                version: node.version,
                config: node.config.clone(),
                metrics: input.to_vec(),
            },
            NodeKind::Publish => WorkPayload::Publish {
                plugin: node.name.clone(),
                version: node.version,
                config: node.config.clone(),
                metrics: input.to_vec(),
            },
        };
        let unit = WorkUnit {
            task_id: self.id.clone(),
            fired_at,
            target: node.target.clone(),
            payload,
        };

        let reply_rx = match self.work_manager.submit(unit) {
            Ok(rx) => rx,
            Err(SnapError::QueueFull) => return NodeOutcome::Miss,
            Err(_) => return NodeOutcome::Aborted,
        };

        match reply_rx.await {
            Ok(Ok(output)) => NodeOutcome::Output(output),
            Ok(Err(SnapError::Shutdown)) => NodeOutcome::Aborted,
            Ok(Err(e)) => {
                let event = match node.kind {
                    NodeKind::Process => SchedulerEvent::ProcessError {
                        task_id: self.id.clone(),
                        plugin: node.name.clone(),
                        error: e.to_string(),
                    },
                    NodeKind::Publish => SchedulerEvent::MetricPublishError {
                        task_id: self.id.clone(),
                        plugin: node.name.clone(),
                        error: e.to_string(),
                    },
                };
                self.event_bus.emit(event).await;
                NodeOutcome::Failed(format!("{}: {e}", node.name))
            }
            Err(_) => NodeOutcome::Aborted,
        }
    }

    /// 触发协程自行转入停止（窗口结束或工作管理器关闭）
    async fn finish_stopped(&self, why: &str) {
        {
            let mut state = self.state.write().await;
            if *state != TaskState::Spinning {
                return;
            }
            *state = TaskState::Stopped;
        }
        info!("任务 {} 停止: {why}", self.id);
        self.ticker.lock().await.take();
        self.release_subscriptions().await;
        self.event_bus
            .emit(SchedulerEvent::TaskStopped {
                task_id: self.id.clone(),
            })
            .await;
        StructuredLogger::log_task_stopped(&self.id, &self.name);
    }

    /// 自动禁用：释放订阅后对外发布 TaskDisabled
    async fn disable(&self, why: String) {
        {
            let mut state = self.state.write().await;
            if *state != TaskState::Spinning {
                return;
            }
            *state = TaskState::Disabled;
        }
        self.ticker.lock().await.take();
        self.release_subscriptions().await;
        self.metrics.record_task_disabled();
        StructuredLogger::log_task_disabled(&self.id, &self.name, &why);
        self.event_bus
            .emit(SchedulerEvent::TaskDisabled {
                task_id: self.id.clone(),
                why,
            })
            .await;
    }

    async fn release_subscriptions(&self) {
        let errors = self.subscriptions.release(&self.id, &self.workflow).await;
        for e in errors {
            warn!("任务 {} 释放订阅失败: {e}", self.id);
        }
    }
}

enum NodeOutcome {
    Output(Vec<Metric>),
    Failed(String),
    Miss,
    Aborted,
}
