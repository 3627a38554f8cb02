//! 远端控制守护进程的指标管理器客户端
//!
//! 把 `MetricManager` 能力集映射为对远端控制进程的 JSON 调用。
//! 初次连接受 `max_connection_timeout` 约束；所有传输层错误统一
//! 折叠为 `RemoteUnavailable`，客户端自身不做重试，重试节奏由任务
//! 在下个调度周期决定。

use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use snap_domain::{
    ConfigMap, ConfigTree, Metric, MetricManager, RequestedMetric, SubscribedPlugin, TagMap,
};
use snap_errors::{SnapError, SnapResult};

#[derive(Serialize)]
struct DepsRequest<'a> {
    task_id: &'a str,
    metrics: &'a [RequestedMetric],
    plugins: &'a [SubscribedPlugin],
    config: &'a ConfigTree,
}

#[derive(Serialize)]
struct CollectRequest<'a> {
    task_id: &'a str,
    tags: &'a TagMap,
}

#[derive(Serialize)]
struct MetricsRequest<'a> {
    plugin: &'a str,
    version: i32,
    config: &'a ConfigMap,
    task_id: &'a str,
    metrics: Vec<Metric>,
}

#[derive(Deserialize, Default)]
struct ErrorsReply {
    #[serde(default)]
    errors: Vec<String>,
}

#[derive(Deserialize)]
struct MetricsReply {
    #[serde(default)]
    metrics: Vec<Metric>,
    #[serde(default)]
    error: Option<String>,
}

/// 远端指标管理器客户端
///
/// 与本地实现共享同一能力接口，调度器仅以注册表地址区分两者。
pub struct ControlProxyClient {
    address: String,
    base_url: String,
    http: reqwest::Client,
}

impl ControlProxyClient {
    /// 拨号并确认远端可达
    ///
    /// 整个握手过程受 `timeout` 约束，超时或拒绝连接都视为
    /// `RemoteUnavailable`。
    pub async fn connect(address: &str, timeout: Duration) -> SnapResult<Self> {
        let http = reqwest::Client::builder()
            .connect_timeout(timeout)
            .build()
            .map_err(|e| SnapError::internal(format!("构建HTTP客户端失败: {e}")))?;

        let client = Self {
            address: address.to_string(),
            base_url: format!("http://{address}/v1"),
            http,
        };

        let ping = client.http.get(format!("{}/ping", client.base_url)).send();
        match tokio::time::timeout(timeout, ping).await {
            Ok(Ok(resp)) if resp.status().is_success() => {
                debug!("已连接远端管理器: {address}");
                Ok(client)
            }
            Ok(Ok(resp)) => {
                warn!("远端管理器握手失败: {address}, 状态码 {}", resp.status());
                Err(client.unavailable())
            }
            Ok(Err(e)) => {
                warn!("远端管理器连接失败: {address} - {e}");
                Err(client.unavailable())
            }
            Err(_) => {
                warn!("远端管理器连接超时: {address}");
                Err(client.unavailable())
            }
        }
    }

    pub fn address(&self) -> &str {
        &self.address
    }

    fn unavailable(&self) -> SnapError {
        SnapError::remote_unavailable(&self.address)
    }

    /// 调用返回错误列表的订阅类接口；传输失败折叠为单个
    /// `RemoteUnavailable`
    async fn post_for_errors<B, F>(&self, path: &str, body: &B, into_error: F) -> Vec<SnapError>
    where
        B: Serialize,
        F: Fn(String) -> SnapError,
    {
        let url = format!("{}/{path}", self.base_url);
        let resp = match self.http.post(&url).json(body).send().await {
            Ok(resp) => resp,
            Err(e) => {
                warn!("远端管理器调用失败: {url} - {e}");
                return vec![self.unavailable()];
            }
        };
        if !resp.status().is_success() {
            return vec![into_error(format!("远端返回状态 {}", resp.status()))];
        }
        let reply: ErrorsReply = resp.json().await.unwrap_or_default();
        reply.errors.into_iter().map(into_error).collect()
    }

    async fn post_for_metrics<B: Serialize>(
        &self,
        path: &str,
        body: &B,
    ) -> SnapResult<Vec<Metric>> {
        let url = format!("{}/{path}", self.base_url);
        let resp = self
            .http
            .post(&url)
            .json(body)
            .send()
            .await
            .map_err(|_| self.unavailable())?;
        if !resp.status().is_success() {
            return Err(SnapError::internal(format!(
                "远端 {} 返回状态 {}",
                self.address,
                resp.status()
            )));
        }
        let reply: MetricsReply = resp.json().await.map_err(|_| self.unavailable())?;
        match reply.error {
            Some(reason) => Err(SnapError::internal(reason)),
            None => Ok(reply.metrics),
        }
    }
}

#[async_trait]
impl MetricManager for ControlProxyClient {
    async fn validate_deps(
        &self,
        metrics: &[RequestedMetric],
        plugins: &[SubscribedPlugin],
        config: &ConfigTree,
    ) -> Vec<SnapError> {
        let body = DepsRequest {
            task_id: "",
            metrics,
            plugins,
            config,
        };
        self.post_for_errors("deps/validate", &body, SnapError::Validation)
            .await
    }

    async fn subscribe_deps(
        &self,
        task_id: &str,
        metrics: &[RequestedMetric],
        plugins: &[SubscribedPlugin],
        config: &ConfigTree,
    ) -> Vec<SnapError> {
        let body = DepsRequest {
            task_id,
            metrics,
            plugins,
            config,
        };
        self.post_for_errors("deps/subscribe", &body, |reason| {
            SnapError::subscribe(&self.address, reason)
        })
        .await
    }

    async fn unsubscribe_deps(&self, task_id: &str) -> Vec<SnapError> {
        let body = serde_json::json!({ "task_id": task_id });
        self.post_for_errors("deps/unsubscribe", &body, |reason| {
            SnapError::subscribe(&self.address, reason)
        })
        .await
    }

    async fn collect_metrics(&self, task_id: &str, tags: &TagMap) -> SnapResult<Vec<Metric>> {
        let body = CollectRequest { task_id, tags };
        self.post_for_metrics("metrics/collect", &body)
            .await
            .map_err(|e| match e {
                SnapError::RemoteUnavailable { .. } => e,
                other => SnapError::Collect(other.to_string()),
            })
    }

    async fn process_metrics(
        &self,
        plugin: &str,
        version: i32,
        config: &ConfigMap,
        task_id: &str,
        metrics: Vec<Metric>,
    ) -> SnapResult<Vec<Metric>> {
        let body = MetricsRequest {
            plugin,
            version,
            config,
            task_id,
            metrics,
        };
        self.post_for_metrics("metrics/process", &body)
            .await
            .map_err(|e| match e {
                SnapError::RemoteUnavailable { .. } => e,
                other => SnapError::Process {
                    plugin: plugin.to_string(),
                    reason: other.to_string(),
                },
            })
    }

    async fn publish_metrics(
        &self,
        plugin: &str,
        version: i32,
        config: &ConfigMap,
        task_id: &str,
        metrics: Vec<Metric>,
    ) -> SnapResult<()> {
        let body = MetricsRequest {
            plugin,
            version,
            config,
            task_id,
            metrics,
        };
        self.post_for_metrics("metrics/publish", &body)
            .await
            .map(|_| ())
            .map_err(|e| match e {
                SnapError::RemoteUnavailable { .. } => e,
                other => SnapError::Publish {
                    plugin: plugin.to_string(),
                    reason: other.to_string(),
                },
            })
    }
}
