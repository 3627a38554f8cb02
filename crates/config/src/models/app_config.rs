//! 应用配置加载
//!
//! 基于 `config` crate 的分层装配：先写入内置默认值，再叠加环境
//! 变量层（遗留的 `WORK_MANAGER_*` 绑定与 `SNAP_` 前缀来源），最后
//! 叠加 TOML 配置文件；命令行覆盖由二进制入口在加载完成后执行。

use std::env;
use std::path::Path;

use anyhow::{Context, Result};
use config::{Config as ConfigBuilder, Environment, File, FileFormat};
use serde::{Deserialize, Serialize};

use super::sections::{ControlSection, LogSection, SchedulerSection};
use crate::ConfigResult;

/// 遗留环境变量绑定，直接对应调度器的两个容量选项
const ENV_QUEUE_SIZE: &str = "WORK_MANAGER_QUEUE_SIZE";
const ENV_POOL_SIZE: &str = "WORK_MANAGER_POOL_SIZE";

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppConfig {
    #[serde(default)]
    pub scheduler: SchedulerSection,
    #[serde(default)]
    pub control: ControlSection,
    #[serde(default)]
    pub log: LogSection,
}

impl AppConfig {
    /// 加载配置
    ///
    /// 显式指定的配置文件不存在时报错；未指定时依次探测默认路径，
    /// 全部缺席则仅使用默认值与环境变量。
    pub fn load(config_path: Option<&str>) -> Result<Self> {
        let mut builder = ConfigBuilder::builder()
            .set_default("scheduler.work_manager_queue_size", 25_i64)?
            .set_default("scheduler.work_manager_pool_size", 4_i64)?
            .set_default("scheduler.shutdown_grace_seconds", 5_i64)?
            .set_default("control.max_connection_timeout_seconds", 10_i64)?
            .set_default("log.level", "info")?
            .set_default("log.format", "pretty")?;

        // 遗留环境变量绑定；后续的配置文件与命令行仍可覆盖
        if let Some(size) = read_env_usize(ENV_QUEUE_SIZE)? {
            builder = builder.set_default("scheduler.work_manager_queue_size", size as i64)?;
        }
        if let Some(size) = read_env_usize(ENV_POOL_SIZE)? {
            builder = builder.set_default("scheduler.work_manager_pool_size", size as i64)?;
        }

        builder = builder.add_source(
            Environment::with_prefix("SNAP")
                .prefix_separator("_")
                .separator("__")
                .try_parsing(true),
        );

        if let Some(path) = config_path {
            if !Path::new(path).exists() {
                anyhow::bail!("配置文件不存在: {path}");
            }
            builder = builder.add_source(File::new(path, FileFormat::Toml));
        } else {
            let default_paths = ["snapd.toml", "config/snapd.toml", "/etc/snap/snapd.toml"];
            for path in &default_paths {
                if Path::new(path).exists() {
                    builder = builder.add_source(File::new(path, FileFormat::Toml));
                    break;
                }
            }
        }

        let config: AppConfig = builder
            .build()
            .context("构建配置失败")?
            .try_deserialize()
            .context("反序列化配置失败")?;

        config.validate().context("配置校验失败")?;

        Ok(config)
    }

    pub fn from_toml(toml_str: &str) -> Result<Self> {
        let config: AppConfig = toml::from_str(toml_str).context("解析TOML配置失败")?;
        config.validate().context("配置校验失败")?;
        Ok(config)
    }

    pub fn validate(&self) -> ConfigResult<()> {
        self.scheduler.validate()?;
        self.control.validate()?;
        self.log.validate()?;
        Ok(())
    }
}

fn read_env_usize(name: &str) -> Result<Option<usize>> {
    match env::var(name) {
        Ok(raw) => {
            let value = raw
                .parse::<usize>()
                .with_context(|| format!("环境变量 {name} 的值无效: {raw}"))?;
            Ok(Some(value))
        }
        Err(_) => Ok(None),
    }
}
