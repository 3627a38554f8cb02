//! 核心领域实体
//!
//! 指标、命名空间、插件订阅与任务快照等值类型。
//! 这些类型在任务、工作协程与管理器客户端之间只读共享。

use std::collections::HashMap;
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// 插件配置表，键为字符串，值为任意 JSON 标量
pub type ConfigMap = serde_json::Map<String, serde_json::Value>;

/// 按命名空间聚合的指标标签：命名空间路径 -> 标签键值对
pub type TagMap = HashMap<String, HashMap<String, String>>;

// ============================================================================
// 指标与命名空间
// ============================================================================

/// 斜杠分隔的有序命名空间，如 `/intel/mock/foo`
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Namespace(Vec<String>);

impl Namespace {
    pub fn new(parts: Vec<String>) -> Self {
        Self(parts)
    }

    /// 从斜杠分隔的路径解析，空段被忽略
    pub fn from_path(path: &str) -> Self {
        Self(
            path.split('/')
                .filter(|p| !p.is_empty())
                .map(|p| p.to_string())
                .collect(),
        )
    }

    pub fn parts(&self) -> &[String] {
        &self.0
    }

    pub fn to_path(&self) -> String {
        format!("/{}", self.0.join("/"))
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl fmt::Display for Namespace {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_path())
    }
}

/// 采集节点声明的请求指标
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RequestedMetric {
    pub namespace: Namespace,
    /// -1 表示"最新版本"
    pub version: i32,
}

impl RequestedMetric {
    pub fn new(path: &str, version: i32) -> Self {
        Self {
            namespace: Namespace::from_path(path),
            version,
        }
    }
}

/// 一次采集产出的指标值，时间戳取自采集返回时刻
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Metric {
    pub namespace: Namespace,
    pub version: i32,
    pub data: serde_json::Value,
    pub tags: HashMap<String, String>,
    pub timestamp: DateTime<Utc>,
}

impl Metric {
    pub fn new(namespace: Namespace, version: i32, data: serde_json::Value) -> Self {
        Self {
            namespace,
            version,
            data,
            tags: HashMap::new(),
            timestamp: Utc::now(),
        }
    }
}

// ============================================================================
// 插件
// ============================================================================

/// 插件类型
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PluginKind {
    Collector,
    Processor,
    Publisher,
}

impl fmt::Display for PluginKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            PluginKind::Collector => "collector",
            PluginKind::Processor => "processor",
            PluginKind::Publisher => "publisher",
        };
        write!(f, "{s}")
    }
}

/// 订阅解析后的插件绑定
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SubscribedPlugin {
    pub kind: PluginKind,
    pub name: String,
    /// -1 表示"最新版本"
    pub version: i32,
    pub config: ConfigMap,
}

/// 按命名空间路径组织的插件配置树
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ConfigTree {
    entries: HashMap<String, ConfigMap>,
}

impl ConfigTree {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(&mut self, namespace_path: &str, config: ConfigMap) {
        self.entries.insert(namespace_path.to_string(), config);
    }

    pub fn get(&self, namespace_path: &str) -> Option<&ConfigMap> {
        self.entries.get(namespace_path)
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &ConfigMap)> {
        self.entries.iter()
    }
}

// ============================================================================
// 任务状态与快照
// ============================================================================

/// 任务生命周期状态
///
/// `Created -> Spinning -> Stopped`，连续失败达到上限后自动进入
/// `Disabled`，移除后进入终态 `Removed`。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TaskState {
    Created,
    Spinning,
    Stopped,
    Disabled,
    Removed,
}

impl fmt::Display for TaskState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            TaskState::Created => "created",
            TaskState::Spinning => "spinning",
            TaskState::Stopped => "stopped",
            TaskState::Disabled => "disabled",
            TaskState::Removed => "removed",
        };
        write!(f, "{s}")
    }
}

/// 任务的只读快照，供查询接口返回
///
/// 计数器由任务自身的触发协程独占写入，读取方看到的是最终一致的视图。
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskSnapshot {
    pub id: String,
    pub name: String,
    pub state: TaskState,
    pub hit_count: u64,
    pub miss_count: u64,
    pub failed_count: u64,
    pub consecutive_failures: u64,
    pub stop_on_failure: u64,
    pub created_at: DateTime<Utc>,
    pub last_fire_at: Option<DateTime<Utc>>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_namespace_from_path() {
        let ns = Namespace::from_path("/intel/mock/foo");
        assert_eq!(ns.parts(), &["intel", "mock", "foo"]);
        assert_eq!(ns.to_path(), "/intel/mock/foo");
        assert_eq!(ns.to_string(), "/intel/mock/foo");
    }

    #[test]
    fn test_namespace_ignores_empty_segments() {
        let ns = Namespace::from_path("//intel//mock/");
        assert_eq!(ns.parts(), &["intel", "mock"]);
    }

    #[test]
    fn test_config_tree() {
        let mut tree = ConfigTree::new();
        assert!(tree.is_empty());

        let mut cfg = ConfigMap::new();
        cfg.insert("password".to_string(), serde_json::json!("required"));
        tree.set("/intel/mock/foo", cfg);

        assert!(tree.get("/intel/mock/foo").is_some());
        assert!(tree.get("/intel/mock/bar").is_none());
    }

    #[test]
    fn test_task_state_display() {
        assert_eq!(TaskState::Spinning.to_string(), "spinning");
        assert_eq!(TaskState::Disabled.to_string(), "disabled");
    }
}
