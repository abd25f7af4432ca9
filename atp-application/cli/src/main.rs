//! ATP CLI 应用

use anyhow::Result;
use clap::{Parser, Subcommand};
use tracing::info;
use tracing_subscriber::EnvFilter;

mod commands;

#[derive(Parser)]
#[command(name = "atp")]
#[command(about = "OCloudView ATP - 虚拟机批量生命周期工具", long_about = None)]
#[command(version)]
struct Cli {
    /// 日志级别 (设置 RUST_LOG 时以 RUST_LOG 为准)
    #[arg(short, long, default_value = "info", global = true)]
    log_level: String,

    /// 配置文件路径 (默认按 ATP_TEST_CONFIG、./test.toml、~/.config/atp/test.toml 顺序查找)
    #[arg(short, long, global = true)]
    config: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// 虚拟机批量操作
    Vm {
        #[command(subcommand)]
        action: VmAction,
    },

    /// 磁盘操作
    Disk {
        #[command(subcommand)]
        action: DiskAction,
    },
}

#[derive(Subcommand)]
pub enum VmAction {
    /// 批量启动虚拟机并等待进入 running
    Start {
        /// 虚拟机名称模式 (*=全部, prefix*=前缀, *suffix=后缀, *middle*=包含, exact=精确)
        #[arg(short, long)]
        pattern: String,

        /// 预览模式，不执行实际操作
        #[arg(long)]
        dry_run: bool,

        /// 输出格式 (table/json)
        #[arg(short = 'f', long, default_value = "table")]
        format: String,
    },

    /// 批量关机并等待进入 shutoff
    Stop {
        /// 虚拟机名称模式
        #[arg(short, long)]
        pattern: String,

        /// 强制关机
        #[arg(long)]
        force: bool,

        /// 预览模式
        #[arg(long)]
        dry_run: bool,

        /// 输出格式 (table/json)
        #[arg(short = 'f', long, default_value = "table")]
        format: String,
    },

    /// 批量删除虚拟机（未关机的先强制关机）
    Remove {
        /// 虚拟机名称模式
        #[arg(short, long)]
        pattern: String,

        /// 预览模式
        #[arg(long)]
        dry_run: bool,

        /// 输出格式 (table/json)
        #[arg(short = 'f', long, default_value = "table")]
        format: String,
    },

    /// 等待虚拟机进入期望状态（不下发操作）
    Wait {
        /// 虚拟机名称模式
        #[arg(short, long)]
        pattern: String,

        /// 期望状态，可多次指定或用逗号分隔
        #[arg(short, long, value_delimiter = ',', default_value = "running")]
        status: Vec<String>,

        /// 输出格式 (table/json)
        #[arg(short = 'f', long, default_value = "table")]
        format: String,
    },

    /// 批量热迁移到随机选择的其他在线主机
    Migrate {
        /// 虚拟机名称模式
        #[arg(short, long)]
        pattern: String,

        /// 随机种子 (覆盖配置文件 migration.seed)
        #[arg(long)]
        seed: Option<u64>,

        /// 预览模式，只输出迁移计划
        #[arg(long)]
        dry_run: bool,

        /// 输出格式 (table/json)
        #[arg(short = 'f', long, default_value = "table")]
        format: String,
    },
}

#[derive(Subcommand)]
pub enum DiskAction {
    /// 磁盘热迁移到目标存储池
    Migrate {
        /// 磁盘 (存储卷) ID
        #[arg(long)]
        disk: String,

        /// 目标存储池 ID
        #[arg(long)]
        pool: String,

        /// 输出格式 (table/json)
        #[arg(short = 'f', long, default_value = "table")]
        format: String,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // 初始化日志
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(cli.log_level.to_lowercase()));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    info!("ATP CLI 启动");

    let config = cli.config.as_deref();
    match cli.command {
        Commands::Vm { action } => commands::vm::handle(action, config).await?,
        Commands::Disk { action } => commands::disk::handle(action, config).await?,
    }

    Ok(())
}
