//! 工作流树
//!
//! 一棵以采集为根的不可变数据流树：根节点枚举请求指标，
//! 子节点为处理或发布节点，每个节点携带 `(名称, 版本, 配置, 目标地址)`。
//! 目标地址为空字符串表示本地管理器。
//! 树在任务创建后不再变化，由任务与工作协程只读共享。

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use snap_errors::{SnapError, SnapResult};

use crate::entities::{
    ConfigMap, ConfigTree, PluginKind, RequestedMetric, SubscribedPlugin, TagMap,
};

/// 非采集节点的类型
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NodeKind {
    Process,
    Publish,
}

/// 工作流中的处理/发布节点
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkflowNode {
    pub kind: NodeKind,
    pub name: String,
    /// -1 表示"最新版本"
    pub version: i32,
    pub config: ConfigMap,
    /// 目标管理器地址，空字符串表示本地
    pub target: String,
    children: Vec<WorkflowNode>,
}

impl WorkflowNode {
    /// 创建处理节点，版本必须 >= -1
    pub fn process(name: &str, version: i32, config: ConfigMap, target: &str) -> SnapResult<Self> {
        Self::new(NodeKind::Process, name, version, config, target)
    }

    /// 创建发布节点，版本必须 >= -1
    pub fn publish(name: &str, version: i32, config: ConfigMap, target: &str) -> SnapResult<Self> {
        Self::new(NodeKind::Publish, name, version, config, target)
    }

    fn new(
        kind: NodeKind,
        name: &str,
        version: i32,
        config: ConfigMap,
        target: &str,
    ) -> SnapResult<Self> {
        if name.is_empty() {
            return Err(SnapError::validation("节点插件名不能为空"));
        }
        if version < -1 {
            return Err(SnapError::validation(format!(
                "节点 {name} 的版本无效: {version}"
            )));
        }
        Ok(Self {
            kind,
            name: name.to_string(),
            version,
            config,
            target: target.to_string(),
            children: Vec::new(),
        })
    }

    /// 挂接子节点；发布节点是叶子，不允许有子节点
    pub fn add_child(&mut self, child: WorkflowNode) -> SnapResult<()> {
        if self.kind == NodeKind::Publish {
            return Err(SnapError::validation(format!(
                "发布节点 {} 不允许挂接子节点",
                self.name
            )));
        }
        self.children.push(child);
        Ok(())
    }

    pub fn children(&self) -> &[WorkflowNode] {
        &self.children
    }

    /// 节点对应的插件订阅绑定
    pub fn subscribed_plugin(&self) -> SubscribedPlugin {
        SubscribedPlugin {
            kind: match self.kind {
                NodeKind::Process => PluginKind::Processor,
                NodeKind::Publish => PluginKind::Publisher,
            },
            name: self.name.clone(),
            version: self.version,
            config: self.config.clone(),
        }
    }
}

/// 某个目标地址上的订阅依赖集合
#[derive(Debug, Clone, Default)]
pub struct DependencySet {
    pub metrics: Vec<RequestedMetric>,
    pub plugins: Vec<SubscribedPlugin>,
    pub config: ConfigTree,
}

/// 以采集为根的工作流树
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Workflow {
    metrics: Vec<RequestedMetric>,
    config: ConfigTree,
    tags: TagMap,
    children: Vec<WorkflowNode>,
}

impl Workflow {
    pub fn builder() -> WorkflowBuilder {
        WorkflowBuilder::default()
    }

    pub fn requested_metrics(&self) -> &[RequestedMetric] {
        &self.metrics
    }

    pub fn config(&self) -> &ConfigTree {
        &self.config
    }

    pub fn tags(&self) -> &TagMap {
        &self.tags
    }

    pub fn children(&self) -> &[WorkflowNode] {
        &self.children
    }

    /// 确定性的前序遍历，任务按此顺序派发下游工作单元
    pub fn descendants(&self) -> Vec<&WorkflowNode> {
        let mut out = Vec::new();
        fn walk<'a>(nodes: &'a [WorkflowNode], out: &mut Vec<&'a WorkflowNode>) {
            for node in nodes {
                out.push(node);
                walk(node.children(), out);
            }
        }
        walk(&self.children, &mut out);
        out
    }

    /// 按目标地址分组的订阅依赖
    ///
    /// 空地址条目始终存在：采集根节点的请求指标与配置树归属本地管理器；
    /// 每个处理/发布节点把自身的插件绑定归入其目标地址。
    pub fn deps_by_target(&self) -> HashMap<String, DependencySet> {
        let mut groups: HashMap<String, DependencySet> = HashMap::new();

        let local = groups.entry(String::new()).or_default();
        local.metrics = self.metrics.clone();
        local.config = self.config.clone();

        for node in self.descendants() {
            groups
                .entry(node.target.clone())
                .or_default()
                .plugins
                .push(node.subscribed_plugin());
        }

        groups
    }
}

/// 工作流构建器，挂接时即校验
#[derive(Debug, Default)]
pub struct WorkflowBuilder {
    metrics: Vec<RequestedMetric>,
    config: ConfigTree,
    tags: TagMap,
    children: Vec<WorkflowNode>,
}

impl WorkflowBuilder {
    /// 追加一个请求指标，版本必须 >= -1
    pub fn add_metric(mut self, path: &str, version: i32) -> SnapResult<Self> {
        if version < -1 {
            return Err(SnapError::validation(format!(
                "指标 {path} 的版本无效: {version}"
            )));
        }
        let metric = RequestedMetric::new(path, version);
        if metric.namespace.is_empty() {
            return Err(SnapError::validation(format!("指标命名空间无效: {path}")));
        }
        self.metrics.push(metric);
        Ok(self)
    }

    /// 为某个命名空间设置采集配置
    pub fn with_metric_config(mut self, path: &str, config: ConfigMap) -> Self {
        self.config.set(path, config);
        self
    }

    /// 为某个命名空间设置采集标签
    pub fn with_tags(mut self, path: &str, tags: HashMap<String, String>) -> Self {
        self.tags.insert(path.to_string(), tags);
        self
    }

    /// 挂接一个已构建的处理/发布节点
    pub fn add_node(mut self, node: WorkflowNode) -> Self {
        self.children.push(node);
        self
    }

    /// 构建工作流；采集根节点至少要请求一个指标
    pub fn build(self) -> SnapResult<Workflow> {
        if self.metrics.is_empty() {
            return Err(SnapError::validation("工作流未请求任何指标"));
        }
        Ok(Workflow {
            metrics: self.metrics,
            config: self.config,
            tags: self.tags,
            children: self.children,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config_with(key: &str, value: &str) -> ConfigMap {
        let mut cfg = ConfigMap::new();
        cfg.insert(key.to_string(), serde_json::json!(value));
        cfg
    }

    #[test]
    fn test_build_collect_process_publish() {
        let mut process =
            WorkflowNode::process("passthru", -1, ConfigMap::new(), "127.0.0.1:8082").unwrap();
        let publish =
            WorkflowNode::publish("mock-file", -1, config_with("file", "/dev/null"), "").unwrap();
        process.add_child(publish).unwrap();

        let wf = Workflow::builder()
            .add_metric("/intel/mock/foo", 2)
            .unwrap()
            .with_metric_config("/intel/mock/foo", config_with("password", "required"))
            .add_node(process)
            .build()
            .unwrap();

        assert_eq!(wf.requested_metrics().len(), 1);
        let order: Vec<&str> = wf.descendants().iter().map(|n| n.name.as_str()).collect();
        assert_eq!(order, vec!["passthru", "mock-file"]);
    }

    #[test]
    fn test_publish_node_is_leaf() {
        let mut publish = WorkflowNode::publish("mock-file", -1, ConfigMap::new(), "").unwrap();
        let child = WorkflowNode::publish("other", -1, ConfigMap::new(), "").unwrap();
        let err = publish.add_child(child).unwrap_err();
        assert!(matches!(err, SnapError::Validation(_)));
    }

    #[test]
    fn test_invalid_version_rejected() {
        assert!(WorkflowNode::process("p", -2, ConfigMap::new(), "").is_err());
        assert!(Workflow::builder().add_metric("/a/b", -3).is_err());
    }

    #[test]
    fn test_empty_workflow_rejected() {
        assert!(Workflow::builder().build().is_err());
    }

    #[test]
    fn test_deps_by_target_grouping() {
        let mut process =
            WorkflowNode::process("passthru", -1, ConfigMap::new(), "127.0.0.1:9000").unwrap();
        let publish =
            WorkflowNode::publish("mock-file", -1, config_with("file", "/dev/null"), "").unwrap();
        process.add_child(publish).unwrap();

        let wf = Workflow::builder()
            .add_metric("/intel/mock/foo", 2)
            .unwrap()
            .add_node(process)
            .build()
            .unwrap();

        let groups = wf.deps_by_target();
        assert_eq!(groups.len(), 2);

        let local = &groups[""];
        assert_eq!(local.metrics.len(), 1);
        assert_eq!(local.plugins.len(), 1);
        assert_eq!(local.plugins[0].name, "mock-file");
        assert_eq!(local.plugins[0].kind, PluginKind::Publisher);

        let remote = &groups["127.0.0.1:9000"];
        assert!(remote.metrics.is_empty());
        assert_eq!(remote.plugins.len(), 1);
        assert_eq!(remote.plugins[0].name, "passthru");
        assert_eq!(remote.plugins[0].kind, PluginKind::Processor);
    }

    #[test]
    fn test_preorder_is_deterministic() {
        let mut p1 = WorkflowNode::process("p1", -1, ConfigMap::new(), "").unwrap();
        p1.add_child(WorkflowNode::publish("pub1", -1, ConfigMap::new(), "").unwrap())
            .unwrap();
        p1.add_child(WorkflowNode::publish("pub2", -1, ConfigMap::new(), "").unwrap())
            .unwrap();
        let p2 = WorkflowNode::publish("pub3", -1, ConfigMap::new(), "").unwrap();

        let wf = Workflow::builder()
            .add_metric("/a/b", 1)
            .unwrap()
            .add_node(p1)
            .add_node(p2)
            .build()
            .unwrap();

        let order: Vec<&str> = wf.descendants().iter().map(|n| n.name.as_str()).collect();
        assert_eq!(order, vec!["p1", "pub1", "pub2", "pub3"]);
    }
}
