use std::path::PathBuf;

use clap::{Parser, Subcommand};
use drivelink_lib::logging::{LogConfig, RotatingFileWriter};
use drivelink_lib::AppState;
use tracing_subscriber::prelude::*;

#[derive(Parser)]
#[command(name = "drivelink", version, about = "把应用数据目录通过符号链接托管到可移动驱动器")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// 列出可移动驱动器
    Drives,
    /// 选定目标驱动器
    Use {
        /// 驱动器显示名或卷标识
        drive: String,
    },
    /// 立即协调全部受管链接
    Init,
    /// 显示驱动器与各链接的当前状态
    Status,
    /// 运行守护进程，响应挂载/卸载事件
    Watch,
    /// 生成无人值守协调脚本
    Script {
        /// 输出路径（默认写到配置目录）
        #[arg(short, long)]
        output: Option<PathBuf>,
    },
}

/// 初始化日志系统
fn init_logging(config_dir: &std::path::Path) {
    let config = LogConfig::load(config_dir);

    if !config.enabled {
        let subscriber = tracing_subscriber::registry();
        let _ = tracing::subscriber::set_global_default(subscriber);
        return;
    }

    let level = config.tracing_level();
    let env_filter = tracing_subscriber::EnvFilter::from_default_env()
        .add_directive(level.into())
        .add_directive("notify=warn".parse().unwrap());

    if let Ok(file_writer) = RotatingFileWriter::new(config_dir, config.max_size_mb) {
        // 文件日志层 - 始终输出到文件
        let file_layer = tracing_subscriber::fmt::layer()
            .with_writer(file_writer)
            .with_ansi(false)
            .with_target(false)
            .with_thread_ids(false)
            .with_thread_names(false);

        // debug 构建同时输出到控制台
        #[cfg(debug_assertions)]
        {
            let console_layer = tracing_subscriber::fmt::layer()
                .with_target(false)
                .with_thread_ids(false)
                .with_thread_names(false);

            let subscriber = tracing_subscriber::registry()
                .with(env_filter)
                .with(file_layer)
                .with(console_layer);
            let _ = tracing::subscriber::set_global_default(subscriber);
        }

        #[cfg(not(debug_assertions))]
        {
            let subscriber = tracing_subscriber::registry()
                .with(env_filter)
                .with(file_layer);
            let _ = tracing::subscriber::set_global_default(subscriber);
        }
    } else {
        // 文件日志创建失败，回退到控制台
        tracing_subscriber::fmt().with_env_filter(env_filter).init();
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let state = AppState::new()?;
    init_logging(&state.config_dir);

    match cli.command {
        Commands::Drives => drivelink_lib::commands::drive::list(&state).await,
        Commands::Use { drive } => drivelink_lib::commands::drive::use_drive(&state, &drive).await,
        Commands::Init => drivelink_lib::commands::sync::initialize(&state).await,
        Commands::Status => drivelink_lib::commands::sync::status(&state).await,
        Commands::Watch => drivelink_lib::commands::watch::run(&state).await,
        Commands::Script { output } => drivelink_lib::commands::script::emit(&state, output).await,
    }
}
