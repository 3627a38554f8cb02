//! 远端管理器注册表
//!
//! 地址到指标管理器客户端的映射。空地址键是调度器安装的本地
//! 进程内客户端；非空地址在首次查询时按需拨号，拨号受构造时
//! 注入的连接超时约束。任务存续期间客户端不被驱逐，最后一个
//! 引用某地址的任务被移除后连接随之释放。

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::RwLock;
use tracing::{debug, info};

use snap_controlproxy::ControlProxyClient;
use snap_domain::MetricManager;
use snap_errors::{SnapError, SnapResult};
use snap_observability::MetricsCollector;

pub struct ManagerRegistry {
    clients: RwLock<HashMap<String, Arc<dyn MetricManager>>>,
    /// 远端拨号的超时上限，构造时注入，测试可用小值
    connection_timeout: Duration,
    metrics: Arc<MetricsCollector>,
}

impl ManagerRegistry {
    pub fn new(connection_timeout: Duration, metrics: Arc<MetricsCollector>) -> Self {
        Self {
            clients: RwLock::new(HashMap::new()),
            connection_timeout,
            metrics,
        }
    }

    /// 安装本地进程内管理器（空地址键）
    pub async fn set_local(&self, manager: Arc<dyn MetricManager>) {
        self.clients.write().await.insert(String::new(), manager);
    }

    pub async fn has_local(&self) -> bool {
        self.clients.read().await.contains_key("")
    }

    /// 预注册某个地址的客户端；测试用它注入计数桩
    pub async fn insert(&self, address: &str, manager: Arc<dyn MetricManager>) {
        self.clients
            .write()
            .await
            .insert(address.to_string(), manager);
    }

    /// 按地址解析管理器客户端
    ///
    /// 非空地址首次查询时拨号并缓存；拨号失败返回
    /// `RemoteUnavailable`，不缓存失败结果。
    pub async fn get(&self, address: &str) -> SnapResult<Arc<dyn MetricManager>> {
        if let Some(client) = self.clients.read().await.get(address) {
            return Ok(Arc::clone(client));
        }

        if address.is_empty() {
            return Err(SnapError::internal("本地指标管理器尚未注册"));
        }

        debug!("首次访问远端管理器，开始拨号: {address}");
        let client = match ControlProxyClient::connect(address, self.connection_timeout).await {
            Ok(client) => client,
            Err(e) => {
                self.metrics.record_remote_dial_failure();
                return Err(e);
            }
        };
        let client: Arc<dyn MetricManager> = Arc::new(client);

        let mut clients = self.clients.write().await;
        // 并发拨号时保留先写入的客户端
        let entry = clients
            .entry(address.to_string())
            .or_insert_with(|| Arc::clone(&client));
        Ok(Arc::clone(entry))
    }

    /// 释放不再被任何任务引用的远端连接；本地客户端永不释放
    pub async fn release_unused(&self, in_use: &HashSet<String>) {
        let mut clients = self.clients.write().await;
        let before = clients.len();
        clients.retain(|address, _| address.is_empty() || in_use.contains(address));
        let released = before - clients.len();
        if released > 0 {
            info!("已释放 {released} 个不再使用的远端管理器连接");
        }
    }

    pub async fn addresses(&self) -> Vec<String> {
        self.clients.read().await.keys().cloned().collect()
    }

    pub fn connection_timeout(&self) -> Duration {
        self.connection_timeout
    }
}

impl std::fmt::Debug for ManagerRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ManagerRegistry")
            .field("connection_timeout", &self.connection_timeout)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashSet;

    use snap_testing_utils::mocks::MockMetricManager;

    use super::*;

    fn registry() -> ManagerRegistry {
        let metrics = Arc::new(MetricsCollector::new().expect("创建指标收集器失败"));
        ManagerRegistry::new(Duration::from_millis(200), metrics)
    }

    #[tokio::test]
    async fn test_local_must_be_installed() {
        let registry = registry();
        assert!(!registry.has_local().await);
        assert!(registry.get("").await.is_err());

        registry
            .set_local(Arc::new(MockMetricManager::new()))
            .await;
        assert!(registry.has_local().await);
        assert!(registry.get("").await.is_ok());
    }

    #[tokio::test]
    async fn test_preinserted_client_is_returned() {
        let registry = registry();
        let mock = Arc::new(MockMetricManager::new());
        registry.insert("127.0.0.1:9999", mock).await;
        assert!(registry.get("127.0.0.1:9999").await.is_ok());
    }

    #[tokio::test]
    async fn test_dial_failure_is_remote_unavailable() {
        let registry = registry();
        let err = registry.get("127.0.0.1:1").await.err().expect("应当失败");
        assert!(matches!(err, SnapError::RemoteUnavailable { .. }));
        // 失败结果不缓存
        assert!(registry.addresses().await.is_empty());
    }

    #[tokio::test]
    async fn test_release_unused_keeps_local() {
        let registry = registry();
        registry
            .set_local(Arc::new(MockMetricManager::new()))
            .await;
        registry
            .insert("127.0.0.1:9998", Arc::new(MockMetricManager::new()))
            .await;
        registry
            .insert("127.0.0.1:9999", Arc::new(MockMetricManager::new()))
            .await;

        let mut in_use = HashSet::new();
        in_use.insert("127.0.0.1:9999".to_string());
        registry.release_unused(&in_use).await;

        let mut addresses = registry.addresses().await;
        addresses.sort();
        assert_eq!(addresses, vec!["", "127.0.0.1:9999"]);
    }
}
