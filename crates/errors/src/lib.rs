//! 遥测调度系统的统一错误类型。
//!
//! 所有 crate 共享同一个 `SnapError` 枚举与 `SnapResult` 别名，
//! 便于在调度器、工作管理器与管理器客户端之间传递错误语义。

use thiserror::Error;

#[derive(Debug, Error)]
pub enum SnapError {
    #[error("工作流校验失败: {0}")]
    Validation(String),
    #[error("插件订阅被拒绝: {address} - {reason}")]
    Subscribe { address: String, reason: String },
    #[error("远端管理器不可达: {address}")]
    RemoteUnavailable { address: String },
    #[error("工作队列已满")]
    QueueFull,
    #[error("指标采集失败: {0}")]
    Collect(String),
    #[error("指标处理失败: 插件 {plugin} - {reason}")]
    Process { plugin: String, reason: String },
    #[error("指标发布失败: 插件 {plugin} - {reason}")]
    Publish { plugin: String, reason: String },
    #[error("工作管理器正在关闭")]
    Shutdown,
    #[error("任务未找到: {id}")]
    TaskNotFound { id: String },
    #[error("任务已被禁用，无法启动: {id}")]
    TaskDisabled { id: String },
    #[error("任务未处于禁用状态: {id}")]
    TaskNotDisabled { id: String },
    #[error("任务已在运行: {id}")]
    TaskAlreadyRunning { id: String },
    #[error("任务已停止: {id}")]
    TaskAlreadyStopped { id: String },
    #[error("无效的CRON表达式: {expr} - {message}")]
    InvalidCron { expr: String, message: String },
    #[error("无效的调度定义: {0}")]
    InvalidSchedule(String),
    #[error("配置错误: {0}")]
    Configuration(String),
    #[error("内部错误: {0}")]
    Internal(String),
}

pub type SnapResult<T> = Result<T, SnapError>;

impl SnapError {
    pub fn validation<S: Into<String>>(msg: S) -> Self {
        Self::Validation(msg.into())
    }

    pub fn subscribe<A: Into<String>, R: Into<String>>(address: A, reason: R) -> Self {
        Self::Subscribe {
            address: address.into(),
            reason: reason.into(),
        }
    }

    pub fn remote_unavailable<S: Into<String>>(address: S) -> Self {
        Self::RemoteUnavailable {
            address: address.into(),
        }
    }

    pub fn task_not_found<S: Into<String>>(id: S) -> Self {
        Self::TaskNotFound { id: id.into() }
    }

    pub fn config_error<S: Into<String>>(msg: S) -> Self {
        Self::Configuration(msg.into())
    }

    pub fn internal<S: Into<String>>(msg: S) -> Self {
        Self::Internal(msg.into())
    }

    /// 瞬态错误：计为一次触发失败，由任务在下个周期重试
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            SnapError::RemoteUnavailable { .. }
                | SnapError::Collect(_)
                | SnapError::Process { .. }
                | SnapError::Publish { .. }
        )
    }

    /// 容量耗尽：计为一次 miss，不影响失败计数
    pub fn is_capacity(&self) -> bool {
        matches!(self, SnapError::QueueFull)
    }
}

#[cfg(test)]
mod tests;
