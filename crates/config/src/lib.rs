//! 守护进程配置
//!
//! 配置来源的优先级从低到高：内置默认值、环境变量
//! （`SNAP_` 前缀与遗留的 `WORK_MANAGER_*` 绑定）、TOML 配置文件、
//! 命令行参数（由二进制入口在加载后覆盖）。

pub mod models;

pub use models::{AppConfig, ControlSection, LogSection, SchedulerSection};

/// 配置结果类型
pub type ConfigResult<T> = Result<T, ConfigError>;

/// 配置错误
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("配置错误: {0}")]
    Configuration(String),

    #[error("配置校验失败: {0}")]
    Validation(String),

    #[error("配置文件错误: {0}")]
    File(String),

    #[error("配置解析失败: {0}")]
    Parse(String),
}

impl From<toml::de::Error> for ConfigError {
    fn from(err: toml::de::Error) -> Self {
        ConfigError::Parse(err.to_string())
    }
}

impl From<std::io::Error> for ConfigError {
    fn from(err: std::io::Error) -> Self {
        ConfigError::File(err.to_string())
    }
}
