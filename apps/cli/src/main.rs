//! # monome CLI
//!
//! Command-line interface for monome grid and arc devices.
//!
//! ```bash
//! # 列出已连接的设备
//! monome-cli list
//!
//! # 设置默认设备，之后的命令可省略 --device
//! monome-cli config set --device /dev/ttyUSB0
//!
//! monome-cli info
//! monome-cli test --pattern checker
//! monome-cli monitor --echo
//! ```

use anyhow::Result;
use clap::{Parser, Subcommand};

mod commands;
mod utils;

use commands::{
    CliConfig, ConfigCommand, InfoCommand, ListCommand, MonitorCommand, TestCommand,
};

/// monome CLI - grid / arc 命令行工具
#[derive(Parser, Debug)]
#[command(name = "monome-cli")]
#[command(about = "Command-line interface for monome grid and arc devices", long_about = None)]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// 列出已连接的设备
    List {
        #[command(flatten)]
        args: ListCommand,
    },

    /// 显示设备信息
    Info {
        #[command(flatten)]
        args: InfoCommand,
    },

    /// 绘制测试图案
    Test {
        #[command(flatten)]
        args: TestCommand,
    },

    /// 打印设备事件直到 Ctrl-C
    Monitor {
        #[command(flatten)]
        args: MonitorCommand,
    },

    /// 配置管理
    #[command(subcommand)]
    Config(ConfigCommand),
}

fn main() -> Result<()> {
    // 初始化日志
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("monome_cli=info,warn")),
        )
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::List { args } => args.execute(),
        Commands::Config(cmd) => cmd.execute(),
        Commands::Info { args } => args.execute(&CliConfig::load()?),
        Commands::Test { args } => args.execute(&CliConfig::load()?),
        Commands::Monitor { args } => args.execute(&CliConfig::load()?),
    }
}
