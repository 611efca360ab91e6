//! 设备枚举命令

use anyhow::Result;
use clap::Args;
use monome_sdk::prelude::*;
use monome_sdk::protocol::match_serial;

/// 枚举命令参数
#[derive(Args, Debug)]
pub struct ListCommand {
    /// 同时列出没有 monome USB 标识的串口
    #[arg(short, long)]
    pub all: bool,
}

impl ListCommand {
    pub fn execute(&self) -> Result<()> {
        let discovery = Discovery::new();
        let devices = if self.all {
            let mut found = if cfg!(target_os = "macos") {
                discovery.scan_dev_names()?
            } else {
                discovery.scan_sysfs()?
            };
            found.sort_by(|a, b| a.path.cmp(&b.path));
            found
        } else {
            discovery.scan()?
        };

        if devices.is_empty() {
            println!("未发现设备");
            return Ok(());
        }
        for d in &devices {
            println!("{}", describe(d));
        }
        Ok(())
    }
}

/// 一行设备描述：路径、序列号、USB 标识、型号
pub fn describe(d: &DeviceDescriptor) -> String {
    let serial = d.serial.as_deref().unwrap_or("-");
    let usb = match (d.vendor_id, d.product_id) {
        (Some(vid), Some(pid)) => format!("{:04x}:{:04x}", vid, pid),
        _ => "????:????".to_string(),
    };
    let model = d
        .serial
        .as_deref()
        .and_then(match_serial)
        .map(|m| format!("{} ({})", m.friendly_name, m.variant))
        .unwrap_or_else(|| "unknown".to_string());
    format!("{:<24} {:<12} {}  {}", d.path, serial, usb, model)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_describe() {
        let d = DeviceDescriptor {
            path: "/dev/ttyUSB0".into(),
            vendor_id: Some(0x0403),
            product_id: Some(0x6001),
            serial: Some("m128-0042".into()),
        };
        let line = describe(&d);
        assert!(line.starts_with("/dev/ttyUSB0"));
        assert!(line.contains("0403:6001"));
        assert!(line.contains("monome 128 (series)"));

        let bare = DeviceDescriptor::from_path("/dev/ttyACM0");
        assert!(describe(&bare).contains("unknown"));
    }
}
