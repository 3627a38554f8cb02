//! 应用装配
//!
//! 按配置装配调度核心：指标收集器、调度器、以及作为本地指标管理
//! 器安装的控制代理客户端。控制守护进程独立部署，地址来自
//! `[control]` 配置段；未配置地址时守护进程仍可运行，但无法启动
//! 任务。

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use tokio::sync::broadcast;
use tracing::{info, warn};

use snap_config::AppConfig;
use snap_controlproxy::ControlProxyClient;
use snap_observability::MetricsCollector;
use snap_scheduler::{Scheduler, SchedulerConfig};

pub struct Application {
    scheduler: Arc<Scheduler>,
}

impl Application {
    pub async fn new(config: AppConfig) -> Result<Self> {
        let metrics = Arc::new(MetricsCollector::new().context("创建指标收集器失败")?);

        let scheduler_config = SchedulerConfig {
            work_manager_queue_size: config.scheduler.work_manager_queue_size,
            work_manager_pool_size: config.scheduler.work_manager_pool_size,
            connection_timeout: Duration::from_secs(config.control.max_connection_timeout_seconds),
            shutdown_grace: Duration::from_secs(config.scheduler.shutdown_grace_seconds),
        };
        let scheduler = Arc::new(Scheduler::new(scheduler_config, metrics));

        match &config.control.address {
            Some(address) => {
                let timeout = Duration::from_secs(config.control.max_connection_timeout_seconds);
                let client = ControlProxyClient::connect(address, timeout)
                    .await
                    .with_context(|| format!("连接控制守护进程失败: {address}"))?;
                scheduler.set_metric_manager(Arc::new(client)).await;
                scheduler
                    .start()
                    .await
                    .map_err(|e| anyhow::anyhow!("启动调度器失败: {e}"))?;
                info!("调度器已就绪，控制守护进程: {address}");
            }
            None => {
                warn!("未配置控制守护进程地址，调度器不会启动任务");
            }
        }

        Ok(Self { scheduler })
    }

    /// 运行到收到关闭信号为止
    pub async fn run(&self, mut shutdown_rx: broadcast::Receiver<()>) -> Result<()> {
        info!("snapd 开始运行");
        let _ = shutdown_rx.recv().await;

        info!("开始停止调度器");
        self.scheduler.stop().await;
        info!("snapd 已退出");
        Ok(())
    }

    /// 调度器句柄，供上层接口挂载任务操作
    pub fn scheduler(&self) -> Arc<Scheduler> {
        Arc::clone(&self.scheduler)
    }
}
