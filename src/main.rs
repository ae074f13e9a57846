use std::net::SocketAddr;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use jobcast::app::{AppMode, Application};
use jobcast::shutdown::ShutdownManager;
use jobcast_core::{AppConfig, SubmitOptions, TaskArgs, TaskKwargs};
use jobcast_infrastructure::observability::{init_logging, init_metrics, LogFormat};
use tokio::signal;
use tracing::{error, info, warn};
use uuid::Uuid;

#[derive(Debug, Parser)]
#[command(name = "jobcast", version, about = "后台任务调度与执行系统")]
struct Cli {
    /// 配置文件路径，未指定时依次查找默认位置
    #[arg(short, long, value_name = "FILE")]
    config: Option<String>,

    /// 日志级别，覆盖配置文件
    #[arg(short, long, value_parser = ["trace", "debug", "info", "warn", "error"])]
    log_level: Option<String>,

    /// 日志格式，覆盖配置文件
    #[arg(long, value_parser = ["json", "pretty"])]
    log_format: Option<String>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// 运行Worker，执行队列中的任务
    Worker {
        #[arg(long)]
        worker_id: Option<String>,
        #[arg(long)]
        concurrency: Option<usize>,
        /// 消费的队列，逗号分隔
        #[arg(short = 'Q', long, value_delimiter = ',')]
        queues: Vec<String>,
    },
    /// 运行周期调度器
    Beat,
    /// 同一进程内运行周期调度器和Worker
    All {
        #[arg(long)]
        worker_id: Option<String>,
        #[arg(long)]
        concurrency: Option<usize>,
    },
    /// 按名称提交任务
    Submit {
        task: String,
        /// JSON数组形式的位置参数
        #[arg(default_value = "[]")]
        args: String,
        /// JSON对象形式的关键字参数
        #[arg(long)]
        kwargs: Option<String>,
        #[arg(short, long)]
        queue: Option<String>,
        /// 延迟执行的秒数
        #[arg(long)]
        countdown: Option<u64>,
    },
    /// 查询任务状态
    Status { job_id: Uuid },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let mut config = AppConfig::load(cli.config.as_deref()).context("加载配置失败")?;
    if let Some(level) = cli.log_level {
        config.observability.log_level = level;
    }
    if let Some(format) = cli.log_format {
        config.observability.log_format = format;
    }

    let log_format: LogFormat = config.observability.log_format.parse()?;
    init_logging(&config.observability.log_level, log_format)?;

    match cli.command {
        Command::Worker {
            worker_id,
            concurrency,
            queues,
        } => {
            apply_worker_overrides(&mut config, worker_id, concurrency);
            if !queues.is_empty() {
                config.worker.queues = queues;
            }
            run_service(config, AppMode::Worker).await
        }
        Command::Beat => run_service(config, AppMode::Beat).await,
        Command::All {
            worker_id,
            concurrency,
        } => {
            apply_worker_overrides(&mut config, worker_id, concurrency);
            run_service(config, AppMode::All).await
        }
        Command::Submit {
            task,
            args,
            kwargs,
            queue,
            countdown,
        } => submit(config, &task, &args, kwargs.as_deref(), queue, countdown).await,
        Command::Status { job_id } => status(config, job_id).await,
    }
}

fn apply_worker_overrides(config: &mut AppConfig, worker_id: Option<String>, concurrency: Option<usize>) {
    if let Some(id) = worker_id {
        config.worker.worker_id = id;
    }
    if let Some(concurrency) = concurrency {
        config.worker.concurrency = concurrency;
    }
}

async fn run_service(config: AppConfig, mode: AppMode) -> Result<()> {
    match mode {
        AppMode::Worker if !config.worker.enabled => {
            return Err(anyhow::anyhow!("Worker模式被禁用，请检查配置"));
        }
        AppMode::Beat if !config.beat.enabled => {
            return Err(anyhow::anyhow!("周期调度器被禁用，请检查配置"));
        }
        _ => {}
    }

    if config.observability.metrics_enabled {
        let addr: SocketAddr = config
            .observability
            .metrics_bind_address
            .parse()
            .context("无效的指标监听地址")?;
        init_metrics(addr)?;
        info!("Prometheus指标已暴露在 {}", addr);
    }

    info!("启动后台任务系统，模式: {:?}", mode);
    let shutdown_timeout = Duration::from_secs(config.worker.shutdown_timeout_seconds + 5);
    let app = Application::new(config).await?;

    let shutdown_manager = ShutdownManager::new();
    let shutdown_rx = shutdown_manager.subscribe().await;
    let mut app_handle = tokio::spawn(async move { app.run(mode, shutdown_rx).await });

    tokio::select! {
        result = &mut app_handle => {
            return match result {
                Ok(result) => result,
                Err(e) => Err(anyhow::anyhow!("应用任务异常退出: {e}")),
            };
        }
        _ = wait_for_shutdown_signal() => {}
    }

    info!("收到关闭信号，开始优雅关闭...");
    shutdown_manager.shutdown().await;

    match tokio::time::timeout(shutdown_timeout, app_handle).await {
        Ok(Ok(Ok(()))) => info!("应用已优雅关闭"),
        Ok(Ok(Err(e))) => error!("应用关闭时发生错误: {e:#}"),
        Ok(Err(e)) => error!("应用任务异常退出: {e}"),
        Err(_) => warn!("应用关闭超时，强制退出"),
    }
    Ok(())
}

async fn submit(
    config: AppConfig,
    task: &str,
    args: &str,
    kwargs: Option<&str>,
    queue: Option<String>,
    countdown: Option<u64>,
) -> Result<()> {
    warn_if_in_memory(&config);

    let args: TaskArgs = serde_json::from_str(args).context("位置参数必须是JSON数组")?;
    let kwargs: TaskKwargs = match kwargs {
        Some(kwargs) => serde_json::from_str(kwargs).context("关键字参数必须是JSON对象")?,
        None => TaskKwargs::new(),
    };

    let app = Application::new(config).await?;
    let options = SubmitOptions {
        queue,
        eta: None,
        countdown: countdown.map(Duration::from_secs),
    };
    let job_id = app
        .producer()
        .submit_with_options(task, args, kwargs, options)
        .await
        .with_context(|| format!("提交任务失败: {task}"))?;

    println!("{job_id}");
    Ok(())
}

async fn status(config: AppConfig, job_id: Uuid) -> Result<()> {
    warn_if_in_memory(&config);

    let app = Application::new(config).await?;
    let result = app.producer().get_status(job_id).await?;
    println!("{}", serde_json::to_string_pretty(&result)?);
    Ok(())
}

fn warn_if_in_memory(config: &AppConfig) {
    if !config.broker.is_redis() {
        warn!("当前使用内存消息代理，任务不会被其他进程看到");
    }
}

/// 等待 Ctrl+C 或 SIGTERM
async fn wait_for_shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!("安装Ctrl+C信号处理器失败: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                error!("安装SIGTERM信号处理器失败: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("收到Ctrl+C信号");
        },
        _ = terminate => {
            info!("收到SIGTERM信号");
        },
    }
}
