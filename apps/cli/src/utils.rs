//! 设备参数与打开会话

use crate::commands::config::{CliConfig, parse_rotation};
use anyhow::{Context, Result};
use clap::Args;
use monome_sdk::prelude::*;

/// 设备选择参数（覆盖配置文件）
#[derive(Args, Debug, Clone, Default)]
pub struct DeviceArgs {
    /// 设备路径（如 /dev/ttyUSB0）；省略时使用配置或第一个枚举到的设备
    #[arg(short, long)]
    pub device: Option<String>,

    /// 旋转角度（0 / 90 / 180 / 270）
    #[arg(short, long)]
    pub rotation: Option<u16>,
}

impl DeviceArgs {
    /// 合并命令行参数与配置，构造 Builder
    pub fn builder(&self, config: &CliConfig) -> Result<MonomeBuilder> {
        let rotation = match self.rotation {
            Some(degrees) => parse_rotation(degrees)?,
            None => config.rotation()?,
        };
        let mut builder = MonomeBuilder::new().config(config.session.clone()).rotation(rotation);
        if let Some(device) = self.device.as_ref().or(config.device.as_ref()) {
            builder = builder.device(device);
        }
        Ok(builder)
    }

    /// 打开设备
    pub fn open(&self, config: &CliConfig) -> Result<Monome> {
        let target = self
            .device
            .as_deref()
            .or(config.device.as_deref())
            .unwrap_or("(first attached device)")
            .to_string();
        self.builder(config)?
            .build()
            .with_context(|| format!("无法打开设备 {}", target))
    }
}
