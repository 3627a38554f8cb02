use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Arg, Command};
use tokio::signal;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use snap_config::AppConfig;
use snapd::{Application, ShutdownManager};

#[tokio::main]
async fn main() -> Result<()> {
    let matches = Command::new("snapd")
        .version(env!("CARGO_PKG_VERSION"))
        .about("遥测任务调度守护进程")
        .arg(
            Arg::new("config")
                .short('c')
                .long("config")
                .value_name("FILE")
                .help("配置文件路径"),
        )
        .arg(
            Arg::new("work-manager-queue-size")
                .long("work-manager-queue-size")
                .value_name("SIZE")
                .value_parser(clap::value_parser!(usize))
                .help("工作队列容量"),
        )
        .arg(
            Arg::new("work-manager-pool-size")
                .long("work-manager-pool-size")
                .value_name("SIZE")
                .value_parser(clap::value_parser!(usize))
                .help("工作协程池大小"),
        )
        .arg(
            Arg::new("log-level")
                .short('l')
                .long("log-level")
                .value_name("LEVEL")
                .value_parser(["trace", "debug", "info", "warn", "error"])
                .help("日志级别"),
        )
        .arg(
            Arg::new("log-format")
                .long("log-format")
                .value_name("FORMAT")
                .value_parser(["json", "pretty"])
                .help("日志格式"),
        )
        .get_matches();

    // 加载配置；命令行参数优先于配置文件与环境变量
    let config_path = matches.get_one::<String>("config").map(String::as_str);
    let mut config = AppConfig::load(config_path).context("加载配置失败")?;

    if let Some(size) = matches.get_one::<usize>("work-manager-queue-size") {
        config.scheduler.work_manager_queue_size = *size;
    }
    if let Some(size) = matches.get_one::<usize>("work-manager-pool-size") {
        config.scheduler.work_manager_pool_size = *size;
    }
    if let Some(level) = matches.get_one::<String>("log-level") {
        config.log.level = level.clone();
    }
    if let Some(format) = matches.get_one::<String>("log-format") {
        config.log.format = format.clone();
    }
    config.validate().context("配置校验失败")?;

    init_logging(&config.log.level, &config.log.format)?;

    info!("启动 snapd");
    info!(
        "工作管理器: pool_size={}, queue_size={}",
        config.scheduler.work_manager_pool_size, config.scheduler.work_manager_queue_size
    );

    let app = Arc::new(Application::new(config).await?);

    let shutdown_manager = ShutdownManager::new();
    let app_handle = {
        let app = Arc::clone(&app);
        let shutdown_rx = shutdown_manager.subscribe();
        tokio::spawn(async move {
            if let Err(e) = app.run(shutdown_rx).await {
                error!("应用运行失败: {e}");
            }
        })
    };

    wait_for_shutdown_signal().await;
    info!("收到关闭信号，开始优雅关闭...");
    shutdown_manager.shutdown();

    let _ = app_handle.await;
    info!("snapd 退出");
    Ok(())
}

fn init_logging(level: &str, format: &str) -> Result<()> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));

    match format {
        "json" => {
            tracing_subscriber::fmt()
                .with_env_filter(filter)
                .json()
                .init();
        }
        _ => {
            tracing_subscriber::fmt().with_env_filter(filter).init();
        }
    }
    Ok(())
}

async fn wait_for_shutdown_signal() {
    #[cfg(unix)]
    {
        use signal::unix::{signal, SignalKind};
        let mut sigterm = signal(SignalKind::terminate()).expect("监听SIGTERM失败");
        tokio::select! {
            _ = signal::ctrl_c() => {}
            _ = sigterm.recv() => {}
        }
    }

    #[cfg(not(unix))]
    {
        let _ = signal::ctrl_c().await;
    }
}
