//! 优雅关闭

use std::sync::atomic::{AtomicBool, Ordering};

use tokio::sync::broadcast;
use tracing::{debug, info};

/// 优雅关闭管理器
///
/// 各组件通过 `subscribe` 拿到关闭信号接收端；`shutdown` 只生效一次。
pub struct ShutdownManager {
    shutdown_tx: broadcast::Sender<()>,
    is_shutdown: AtomicBool,
}

impl ShutdownManager {
    pub fn new() -> Self {
        let (shutdown_tx, _) = broadcast::channel(16);
        Self {
            shutdown_tx,
            is_shutdown: AtomicBool::new(false),
        }
    }

    /// 订阅关闭信号；已关闭时返回的接收端会立即收到信号
    pub fn subscribe(&self) -> broadcast::Receiver<()> {
        let rx = self.shutdown_tx.subscribe();
        if self.is_shutdown.load(Ordering::SeqCst) {
            let _ = self.shutdown_tx.send(());
        }
        rx
    }

    /// 触发关闭；重复调用无害
    pub fn shutdown(&self) {
        if self.is_shutdown.swap(true, Ordering::SeqCst) {
            debug!("关闭信号已经触发过");
            return;
        }
        let receivers = self.shutdown_tx.receiver_count();
        info!("触发关闭，通知 {receivers} 个订阅者");
        let _ = self.shutdown_tx.send(());
    }

    pub fn is_shutdown(&self) -> bool {
        self.is_shutdown.load(Ordering::SeqCst)
    }
}

impl Default for ShutdownManager {
    fn default() -> Self {
        Self::new()
    }
}
