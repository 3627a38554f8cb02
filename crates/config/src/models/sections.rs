//! 各配置段模型

use serde::{Deserialize, Serialize};

use crate::{ConfigError, ConfigResult};

/// 调度器配置段
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SchedulerSection {
    /// 工作队列容量（每个优先级类各一条队列）
    pub work_manager_queue_size: usize,
    /// 工作协程池大小
    pub work_manager_pool_size: usize,
    /// 关闭时等待在途工作完成的宽限期（秒）
    pub shutdown_grace_seconds: u64,
}

impl Default for SchedulerSection {
    fn default() -> Self {
        Self {
            work_manager_queue_size: 25,
            work_manager_pool_size: 4,
            shutdown_grace_seconds: 5,
        }
    }
}

impl SchedulerSection {
    pub fn validate(&self) -> ConfigResult<()> {
        if self.work_manager_queue_size < 1 {
            return Err(ConfigError::Validation(
                "work_manager_queue_size 必须 >= 1".to_string(),
            ));
        }
        if self.work_manager_pool_size < 1 {
            return Err(ConfigError::Validation(
                "work_manager_pool_size 必须 >= 1".to_string(),
            ));
        }
        Ok(())
    }
}

/// 控制子系统配置段
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ControlSection {
    /// 控制守护进程地址（host:port）；未配置时调度器无法启动任务
    #[serde(default)]
    pub address: Option<String>,
    /// 远端管理器初次连接的超时上限（秒）
    #[serde(default = "default_connection_timeout")]
    pub max_connection_timeout_seconds: u64,
}

fn default_connection_timeout() -> u64 {
    10
}

impl Default for ControlSection {
    fn default() -> Self {
        Self {
            address: None,
            max_connection_timeout_seconds: default_connection_timeout(),
        }
    }
}

impl ControlSection {
    pub fn validate(&self) -> ConfigResult<()> {
        if self.max_connection_timeout_seconds < 1 {
            return Err(ConfigError::Validation(
                "max_connection_timeout_seconds 必须 >= 1".to_string(),
            ));
        }
        if let Some(address) = &self.address {
            if !address.contains(':') {
                return Err(ConfigError::Validation(format!(
                    "控制守护进程地址无效: {address}"
                )));
            }
        }
        Ok(())
    }
}

/// 日志配置段
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogSection {
    pub level: String,
    /// pretty 或 json
    pub format: String,
}

impl Default for LogSection {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: "pretty".to_string(),
        }
    }
}

impl LogSection {
    pub fn validate(&self) -> ConfigResult<()> {
        match self.level.as_str() {
            "trace" | "debug" | "info" | "warn" | "error" => {}
            other => {
                return Err(ConfigError::Validation(format!("日志级别无效: {other}")));
            }
        }
        match self.format.as_str() {
            "pretty" | "json" => Ok(()),
            other => Err(ConfigError::Validation(format!("日志格式无效: {other}"))),
        }
    }
}
