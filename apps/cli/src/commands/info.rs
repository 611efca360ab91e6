//! 设备信息命令

use crate::commands::config::CliConfig;
use crate::utils::DeviceArgs;
use anyhow::Result;
use clap::Args;
use monome_sdk::prelude::*;

/// 信息命令参数
#[derive(Args, Debug)]
pub struct InfoCommand {
    #[command(flatten)]
    pub device: DeviceArgs,
}

impl InfoCommand {
    pub fn execute(&self, config: &CliConfig) -> Result<()> {
        let mut session = self.device.open(config)?;
        print!("{}", render(&session));
        session.close()?;
        Ok(())
    }
}

pub fn render(session: &Monome) -> String {
    let info = session.info();
    let mut out = String::new();
    out.push_str(&format!("设备:     {}\n", info.friendly_name));
    out.push_str(&format!("路径:     {}\n", info.path));
    out.push_str(&format!("序列号:   {}\n", info.serial));
    out.push_str(&format!("协议:     {}\n", info.variant));
    match info.class() {
        DeviceClass::Grid => {
            out.push_str(&format!("网格:     {} (物理 {})\n", session.size(), info.grid));
            out.push_str(&format!("旋转:     {}\n", session.rotation()));
            out.push_str(&format!("倾斜:     {} 个传感器\n", info.tilt_sensors));
        },
        DeviceClass::Arc => {
            out.push_str(&format!("光环:     {}\n", info.rings));
        },
    }
    if let Some(firmware) = &info.firmware {
        out.push_str(&format!("固件:     {}\n", firmware));
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use monome_sdk::serial::mock::MockDevice;

    #[test]
    fn test_render_grid_and_arc() {
        let device = MockDevice::grid(ProtocolVariant::Series, GridSize::new(16, 16), "m256-0007");
        let grid = MonomeBuilder::new()
            .descriptor(device.descriptor())
            .build_with(device.open().unwrap())
            .unwrap();
        let text = render(&grid);
        assert!(text.contains("monome 256"));
        assert!(text.contains("m256-0007"));
        assert!(text.contains("series"));

        let device = MockDevice::arc(2, "m0000901");
        let arc = MonomeBuilder::new()
            .descriptor(device.descriptor())
            .build_with(device.open().unwrap())
            .unwrap();
        let text = render(&arc);
        assert!(text.contains("monome arc 2"));
        assert!(text.contains("光环:     2"));
    }
}
