//! 配置管理命令
//!
//! 配置文件：`$CONFIG_DIR/monome-cli/config.toml`，命令行参数优先于配置文件。

use anyhow::{Context, Result, bail};
use clap::Subcommand;
use monome_sdk::prelude::*;
use std::fs;
use std::path::{Path, PathBuf};

/// 配置文件路径
fn config_dir() -> Result<PathBuf> {
    let mut path = dirs::config_dir().ok_or_else(|| anyhow::anyhow!("无法确定配置目录"))?;

    path.push("monome-cli");
    Ok(path)
}

pub fn config_file() -> Result<PathBuf> {
    let mut path = config_dir()?;
    path.push("config.toml");
    Ok(path)
}

/// CLI 配置
#[derive(Debug, Clone, Default, PartialEq, serde::Serialize, serde::Deserialize)]
#[serde(default)]
pub struct CliConfig {
    /// 默认设备路径；为空时打开第一个枚举到的设备
    pub device: Option<String>,

    /// 旋转角度（0 / 90 / 180 / 270）
    pub rotation: u16,

    /// 会话选项
    pub session: SessionConfig,
}

impl CliConfig {
    /// 加载配置（文件不存在时返回默认配置）
    pub fn load() -> Result<Self> {
        Self::load_from(&config_file()?)
    }

    pub fn load_from(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Ok(Self::default());
        }
        let content = fs::read_to_string(path).context("读取配置文件失败")?;
        let config: Self = toml::from_str(&content)
            .with_context(|| format!("解析配置文件失败: {}", path.display()))?;
        config.rotation()?;
        Ok(config)
    }

    /// 保存配置
    pub fn save(&self) -> Result<()> {
        self.save_to(&config_file()?)
    }

    pub fn save_to(&self, path: &Path) -> Result<()> {
        if let Some(dir) = path.parent() {
            fs::create_dir_all(dir).context("创建配置目录失败")?;
        }
        let content = toml::to_string_pretty(self).context("序列化配置失败")?;
        fs::write(path, format!("# monome CLI configuration\n\n{}", content))
            .context("写入配置文件失败")?;
        Ok(())
    }

    pub fn rotation(&self) -> Result<Rotation> {
        parse_rotation(self.rotation)
    }
}

/// 角度 -> 旋转方向
pub fn parse_rotation(degrees: u16) -> Result<Rotation> {
    match degrees {
        0 => Ok(Rotation::R0),
        90 => Ok(Rotation::R90),
        180 => Ok(Rotation::R180),
        270 => Ok(Rotation::R270),
        other => bail!("旋转角度必须是 0 / 90 / 180 / 270，而不是 {}", other),
    }
}

/// 配置命令
#[derive(Subcommand, Debug)]
pub enum ConfigCommand {
    /// 显示当前配置
    Show,

    /// 设置配置项
    Set {
        /// 默认设备路径（如 /dev/ttyUSB0）
        #[arg(short, long)]
        device: Option<String>,

        /// 旋转角度（0 / 90 / 180 / 270）
        #[arg(short, long)]
        rotation: Option<u16>,

        /// 绘制后立即写出
        #[arg(long)]
        auto_flush: Option<bool>,

        /// 事件循环读超时（毫秒）
        #[arg(long)]
        read_timeout_ms: Option<u64>,

        /// 识别设备超时（毫秒）
        #[arg(long)]
        identify_timeout_ms: Option<u64>,

        /// 清除默认设备
        #[arg(long, conflicts_with = "device")]
        clear_device: bool,
    },
}

impl ConfigCommand {
    pub fn execute(self) -> Result<()> {
        match self {
            ConfigCommand::Show => Self::show(),
            ConfigCommand::Set {
                device,
                rotation,
                auto_flush,
                read_timeout_ms,
                identify_timeout_ms,
                clear_device,
            } => {
                let mut config = CliConfig::load()?;
                if clear_device {
                    config.device = None;
                }
                if let Some(device) = device {
                    config.device = Some(device);
                }
                if let Some(rotation) = rotation {
                    parse_rotation(rotation)?;
                    config.rotation = rotation;
                }
                if let Some(auto_flush) = auto_flush {
                    config.session.auto_flush = auto_flush;
                }
                if let Some(ms) = read_timeout_ms {
                    config.session.read_timeout_ms = ms;
                }
                if let Some(ms) = identify_timeout_ms {
                    config.session.identify_timeout_ms = ms;
                }
                config.save()?;
                println!("✅ 配置已保存: {}", config_file()?.display());
                Ok(())
            },
        }
    }

    fn show() -> Result<()> {
        let config = CliConfig::load()?;
        println!("配置文件: {}", config_file()?.display());
        println!("  设备: {}", config.device.as_deref().unwrap_or("(自动枚举)"));
        println!("  旋转: {}°", config.rotation);
        println!("  auto_flush: {}", config.session.auto_flush);
        println!("  read_timeout_ms: {}", config.session.read_timeout_ms);
        println!("  identify_timeout_ms: {}", config.session.identify_timeout_ms);
        println!("  flush_on_close: {}", config.session.flush_on_close);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested/config.toml");

        assert_eq!(CliConfig::load_from(&path).unwrap(), CliConfig::default());

        let mut config = CliConfig {
            device: Some("/dev/ttyUSB1".into()),
            rotation: 180,
            ..CliConfig::default()
        };
        config.session.auto_flush = true;
        config.save_to(&path).unwrap();

        let loaded = CliConfig::load_from(&path).unwrap();
        assert_eq!(loaded, config);
        assert_eq!(loaded.rotation().unwrap(), Rotation::R180);
    }

    /// 缺省字段使用默认值
    #[test]
    fn test_partial_config() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        fs::write(&path, "rotation = 90\n[session]\nread_timeout_ms = 20\n").unwrap();

        let config = CliConfig::load_from(&path).unwrap();
        assert_eq!(config.rotation, 90);
        assert_eq!(config.session.read_timeout_ms, 20);
        assert_eq!(config.session.identify_timeout_ms, 500);
        assert!(config.device.is_none());
    }

    #[test]
    fn test_invalid_rotation() {
        assert!(parse_rotation(45).is_err());
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        fs::write(&path, "rotation = 45\n").unwrap();
        assert!(CliConfig::load_from(&path).is_err());
    }
}
