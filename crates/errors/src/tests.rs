use super::*;

#[test]
fn test_error_display() {
    let err = SnapError::task_not_found("abc123");
    assert_eq!(err.to_string(), "任务未找到: abc123");

    let err = SnapError::subscribe("127.0.0.1:8082", "插件不存在");
    assert!(err.to_string().contains("127.0.0.1:8082"));
    assert!(err.to_string().contains("插件不存在"));
}

#[test]
fn test_is_transient() {
    assert!(SnapError::remote_unavailable("127.0.0.1:0").is_transient());
    assert!(SnapError::Collect("采集器异常".to_string()).is_transient());
    assert!(SnapError::Process {
        plugin: "passthru".to_string(),
        reason: "超时".to_string(),
    }
    .is_transient());

    assert!(!SnapError::QueueFull.is_transient());
    assert!(!SnapError::Shutdown.is_transient());
    assert!(!SnapError::task_not_found("x").is_transient());
}

#[test]
fn test_is_capacity() {
    assert!(SnapError::QueueFull.is_capacity());
    assert!(!SnapError::Shutdown.is_capacity());
}
