//! 测试数据构造器

use snap_domain::{ConfigMap, Metric, Namespace, Workflow, WorkflowNode};

fn config_with(key: &str, value: &str) -> ConfigMap {
    let mut cfg = ConfigMap::new();
    cfg.insert(key.to_string(), serde_json::json!(value));
    cfg
}

/// 标准测试工作流：采集 `/intel/mock/foo` v2，经 `passthru` 处理后
/// 由 `mock-file` 发布到 /dev/null；处理节点指向给定目标地址，
/// 空字符串表示本地
pub fn sample_workflow(process_target: &str) -> Workflow {
    let mut process =
        WorkflowNode::process("passthru", -1, ConfigMap::new(), process_target).expect("构建处理节点失败");
    let publish = WorkflowNode::publish("mock-file", -1, config_with("file", "/dev/null"), "")
        .expect("构建发布节点失败");
    process.add_child(publish).expect("挂接发布节点失败");

    Workflow::builder()
        .add_metric("/intel/mock/foo", 2)
        .expect("请求指标失败")
        .with_metric_config("/intel/mock/foo", config_with("password", "required"))
        .add_node(process)
        .build()
        .expect("构建工作流失败")
}

/// 只有采集根节点的最小工作流
pub fn collect_only_workflow() -> Workflow {
    Workflow::builder()
        .add_metric("/intel/mock/foo", 2)
        .expect("请求指标失败")
        .build()
        .expect("构建工作流失败")
}

/// 单条测试指标
pub fn sample_metric(path: &str, value: i64) -> Metric {
    Metric::new(Namespace::from_path(path), 2, serde_json::json!(value))
}
