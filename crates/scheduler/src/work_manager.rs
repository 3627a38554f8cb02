//! 工作管理器
//!
//! 有界协程池加有界队列：采集单元走高优先级队列，处理/发布单元
//! 走普通队列，派发循环先清空采集队列再取普通队列。`submit` 永不
//! 阻塞——有空闲协程时直接交接，队列有余量时入队，否则立即返回
//! `QueueFull`。关闭时停止收单，在宽限期内排空在途工作，超时后
//! 取消剩余工作，被取消的单元在回复通道上表现为 `Shutdown`。

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::sync::{broadcast, mpsc, oneshot, Mutex};
use tokio::task::JoinSet;
use tracing::{debug, info, warn};

use snap_domain::{ConfigMap, Metric, TagMap};
use snap_errors::{SnapError, SnapResult};
use snap_observability::MetricsCollector;

use crate::managers::ManagerRegistry;

/// 一次触发派生出的工作单元
#[derive(Debug, Clone)]
pub struct WorkUnit {
    pub task_id: String,
    pub fired_at: DateTime<Utc>,
    /// 目标管理器地址，空字符串表示本地
    pub target: String,
    pub payload: WorkPayload,
}

#[derive(Debug, Clone)]
pub enum WorkPayload {
    Collect {
        tags: TagMap,
    },
    Process {
        plugin: String,
        version: i32,
        config: ConfigMap,
        metrics: Vec<Metric>,
    },
    Publish {
        plugin: String,
        version: i32,
        config: ConfigMap,
        metrics: Vec<Metric>,
    },
}

impl WorkUnit {
    pub fn is_collect(&self) -> bool {
        matches!(self.payload, WorkPayload::Collect { .. })
    }
}

/// 工作单元的执行结果；发布单元成功时返回空列表
pub type WorkReply = SnapResult<Vec<Metric>>;

struct Job {
    unit: WorkUnit,
    reply: oneshot::Sender<WorkReply>,
}

#[derive(Debug, Clone)]
pub struct WorkManagerConfig {
    /// 每个优先级类的队列容量
    pub queue_size: usize,
    /// 工作协程数
    pub pool_size: usize,
    /// 关闭时等待在途工作的宽限期
    pub shutdown_grace: Duration,
}

impl Default for WorkManagerConfig {
    fn default() -> Self {
        Self {
            queue_size: 25,
            pool_size: 4,
            shutdown_grace: Duration::from_secs(5),
        }
    }
}

pub struct WorkManager {
    collect_tx: mpsc::Sender<Job>,
    normal_tx: mpsc::Sender<Job>,
    accepting: AtomicBool,
    shutdown_tx: broadcast::Sender<()>,
    workers: Mutex<JoinSet<()>>,
    grace: Duration,
    metrics: Arc<MetricsCollector>,
}

impl WorkManager {
    /// 创建工作管理器并立即启动派发循环与协程池
    ///
    /// 必须在 Tokio 运行时内调用。
    pub fn new(
        config: WorkManagerConfig,
        managers: Arc<ManagerRegistry>,
        metrics: Arc<MetricsCollector>,
    ) -> Self {
        let queue_size = config.queue_size.max(1);
        let pool_size = config.pool_size.max(1);

        let (collect_tx, collect_rx) = mpsc::channel::<Job>(queue_size);
        let (normal_tx, normal_rx) = mpsc::channel::<Job>(queue_size);
        // 交接通道容量为 1：空闲协程挂在 recv 上实现直接交接，
        // 协程全忙时派发循环被挡在 send 上，背压落到有界队列
        let (handoff_tx, handoff_rx) = mpsc::channel::<Job>(1);
        let (shutdown_tx, shutdown_rx) = broadcast::channel(1);

        let mut workers = JoinSet::new();
        workers.spawn(dispatch_loop(collect_rx, normal_rx, handoff_tx, shutdown_rx));

        let shared_rx = Arc::new(Mutex::new(handoff_rx));
        for worker_id in 0..pool_size {
            workers.spawn(worker_loop(
                worker_id,
                Arc::clone(&shared_rx),
                Arc::clone(&managers),
                Arc::clone(&metrics),
            ));
        }

        info!("工作管理器已启动: pool_size={pool_size}, queue_size={queue_size}");

        Self {
            collect_tx,
            normal_tx,
            accepting: AtomicBool::new(true),
            shutdown_tx,
            workers: Mutex::new(workers),
            grace: config.shutdown_grace,
            metrics,
        }
    }

    /// 提交一个工作单元，立即返回回复通道
    ///
    /// 队列满时返回 `QueueFull`，调用方把该周期计为 miss；
    /// 管理器关闭后返回 `Shutdown`。
    pub fn submit(&self, unit: WorkUnit) -> SnapResult<oneshot::Receiver<WorkReply>> {
        if !self.accepting.load(Ordering::SeqCst) {
            return Err(SnapError::Shutdown);
        }

        let (reply_tx, reply_rx) = oneshot::channel();
        let queue = if unit.is_collect() {
            &self.collect_tx
        } else {
            &self.normal_tx
        };

        match queue.try_send(Job {
            unit,
            reply: reply_tx,
        }) {
            Ok(()) => {
                self.metrics.record_work_submitted();
                Ok(reply_rx)
            }
            Err(mpsc::error::TrySendError::Full(_)) => {
                self.metrics.record_work_rejected();
                Err(SnapError::QueueFull)
            }
            Err(mpsc::error::TrySendError::Closed(_)) => Err(SnapError::Shutdown),
        }
    }

    /// 停止收单并排空在途工作
    ///
    /// 宽限期内未完成的协程被强制取消，其持有的工作单元随回复
    /// 通道一起被丢弃。
    pub async fn shutdown(&self) {
        if !self.accepting.swap(false, Ordering::SeqCst) {
            return;
        }
        info!("工作管理器开始关闭，宽限期 {:?}", self.grace);
        let _ = self.shutdown_tx.send(());

        let mut workers = self.workers.lock().await;
        let deadline = tokio::time::Instant::now() + self.grace;
        loop {
            match tokio::time::timeout_at(deadline, workers.join_next()).await {
                Ok(Some(_)) => continue,
                Ok(None) => break,
                Err(_) => {
                    warn!("工作管理器关闭超时，强制取消剩余工作");
                    workers.abort_all();
                    while workers.join_next().await.is_some() {}
                    break;
                }
            }
        }
        info!("工作管理器已关闭");
    }
}

/// 派发循环：优先清空采集队列，再取普通队列
async fn dispatch_loop(
    mut collect_rx: mpsc::Receiver<Job>,
    mut normal_rx: mpsc::Receiver<Job>,
    handoff_tx: mpsc::Sender<Job>,
    mut shutdown_rx: broadcast::Receiver<()>,
) {
    loop {
        tokio::select! {
            biased;
            _ = shutdown_rx.recv() => break,
            job = collect_rx.recv() => {
                let Some(job) = job else { break };
                if handoff_tx.send(job).await.is_err() {
                    break;
                }
            }
            job = normal_rx.recv() => {
                let Some(job) = job else { break };
                if handoff_tx.send(job).await.is_err() {
                    break;
                }
            }
        }
    }

    // 丢弃仍在排队的工作单元，使其回复通道立即关闭
    collect_rx.close();
    normal_rx.close();
    let mut dropped = 0_usize;
    while collect_rx.try_recv().is_ok() {
        dropped += 1;
    }
    while normal_rx.try_recv().is_ok() {
        dropped += 1;
    }
    if dropped > 0 {
        debug!("派发循环退出，丢弃 {dropped} 个排队中的工作单元");
    }
}

/// 工作协程：从交接通道取单元并执行，无亲和性
async fn worker_loop(
    worker_id: usize,
    jobs: Arc<Mutex<mpsc::Receiver<Job>>>,
    managers: Arc<ManagerRegistry>,
    metrics: Arc<MetricsCollector>,
) {
    loop {
        let job = {
            let mut rx = jobs.lock().await;
            rx.recv().await
        };
        let Some(job) = job else { break };

        let started = std::time::Instant::now();
        let result = execute(&job.unit, managers.as_ref()).await;
        metrics.record_work_execution(started.elapsed().as_secs_f64());

        if let Err(e) = &result {
            debug!(
                "工作单元执行失败: task_id={}, target={:?} - {e}",
                job.unit.task_id, job.unit.target
            );
        }
        if job.reply.send(result).is_err() {
            // 任务侧已取消等待，结果被丢弃
            debug!("工作单元结果被丢弃: task_id={}", job.unit.task_id);
        }
    }
    debug!("工作协程 {worker_id} 退出");
}

/// 按工作单元的目标地址解析管理器并执行对应操作
async fn execute(unit: &WorkUnit, managers: &ManagerRegistry) -> WorkReply {
    let manager = managers.get(&unit.target).await?;
    match &unit.payload {
        WorkPayload::Collect { tags } => manager.collect_metrics(&unit.task_id, tags).await,
        WorkPayload::Process {
            plugin,
            version,
            config,
            metrics,
        } => {
            manager
                .process_metrics(plugin, *version, config, &unit.task_id, metrics.clone())
                .await
        }
        WorkPayload::Publish {
            plugin,
            version,
            config,
            metrics,
        } => {
            manager
                .publish_metrics(plugin, *version, config, &unit.task_id, metrics.clone())
                .await?;
            Ok(Vec::new())
        }
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use snap_testing_utils::mocks::MockMetricManager;

    use super::*;

    fn collect_unit(task_id: &str) -> WorkUnit {
        WorkUnit {
            task_id: task_id.to_string(),
            fired_at: Utc::now(),
            target: String::new(),
            payload: WorkPayload::Collect {
                tags: HashMap::new(),
            },
        }
    }

    fn publish_unit(task_id: &str) -> WorkUnit {
        WorkUnit {
            task_id: task_id.to_string(),
            fired_at: Utc::now(),
            target: String::new(),
            payload: WorkPayload::Publish {
                plugin: "mock-file".to_string(),
                version: -1,
                config: ConfigMap::new(),
                metrics: Vec::new(),
            },
        }
    }

    async fn setup(
        pool_size: usize,
        queue_size: usize,
        grace: Duration,
    ) -> (WorkManager, Arc<MockMetricManager>) {
        let metrics = Arc::new(MetricsCollector::new().expect("创建指标收集器失败"));
        let registry = Arc::new(ManagerRegistry::new(
            Duration::from_millis(200),
            Arc::clone(&metrics),
        ));
        let mock = Arc::new(MockMetricManager::new());
        registry
            .set_local(Arc::clone(&mock) as Arc<dyn snap_domain::MetricManager>)
            .await;

        let manager = WorkManager::new(
            WorkManagerConfig {
                queue_size,
                pool_size,
                shutdown_grace: grace,
            },
            registry,
            metrics,
        );
        (manager, mock)
    }

    #[tokio::test]
    async fn test_collect_unit_round_trip() {
        let (manager, mock) = setup(1, 4, Duration::from_millis(500)).await;
        let rx = manager.submit(collect_unit("t1")).expect("提交失败");
        let reply = rx.await.expect("回复通道被丢弃");
        let metrics = reply.expect("采集失败");
        assert!(!metrics.is_empty());
        assert_eq!(mock.collect_calls(), 1);
        manager.shutdown().await;
    }

    #[tokio::test]
    async fn test_queue_full_rejection() {
        let (manager, mock) = setup(1, 1, Duration::from_millis(100)).await;
        // 唯一的协程被慢采集占住，队列很快被填满
        mock.set_collect_latency(Duration::from_millis(500));

        let mut rejected = false;
        for _ in 0..10 {
            match manager.submit(collect_unit("t1")) {
                Err(SnapError::QueueFull) => {
                    rejected = true;
                    break;
                }
                Err(e) => panic!("期望 QueueFull，实际: {e}"),
                Ok(_) => tokio::time::sleep(Duration::from_millis(10)).await,
            }
        }
        assert!(rejected, "队列饱和时应当返回 QueueFull");
        manager.shutdown().await;
    }

    #[tokio::test]
    async fn test_submit_after_shutdown() {
        let (manager, _mock) = setup(1, 4, Duration::from_millis(500)).await;
        manager.shutdown().await;
        let err = manager.submit(collect_unit("t1")).err().expect("应当失败");
        assert!(matches!(err, SnapError::Shutdown));
    }

    #[tokio::test]
    async fn test_publish_unit_returns_empty() {
        let (manager, mock) = setup(2, 4, Duration::from_millis(500)).await;
        let rx = manager.submit(publish_unit("t1")).expect("提交失败");
        let reply = rx.await.expect("回复通道被丢弃").expect("发布失败");
        assert!(reply.is_empty());
        assert_eq!(mock.publish_calls(), 1);
        manager.shutdown().await;
    }

    #[tokio::test]
    async fn test_shutdown_cancels_pending_units() {
        // 宽限期短于采集耗时，关闭时在途与排队中的单元都被取消
        let (manager, mock) = setup(1, 4, Duration::from_millis(100)).await;
        mock.set_collect_latency(Duration::from_millis(400));

        let busy = manager.submit(collect_unit("t1")).expect("提交失败");
        tokio::time::sleep(Duration::from_millis(20)).await;
        let queued = manager.submit(collect_unit("t1")).expect("提交失败");

        manager.shutdown().await;

        assert!(busy.await.is_err());
        assert!(queued.await.is_err());
    }
}
