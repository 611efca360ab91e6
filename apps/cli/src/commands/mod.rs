//! 命令定义和实现

pub mod config;
pub mod info;
pub mod list;
pub mod monitor;
pub mod pattern;

pub use config::{CliConfig, ConfigCommand};
pub use info::InfoCommand;
pub use list::ListCommand;
pub use monitor::MonitorCommand;
pub use pattern::TestCommand;
