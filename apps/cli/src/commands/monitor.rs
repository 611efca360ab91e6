//! 事件监控命令
//!
//! 打印设备事件直到 Ctrl-C，退出时输出会话指标。

use crate::commands::config::CliConfig;
use crate::utils::DeviceArgs;
use anyhow::{Context, Result};
use clap::Args;
use monome_sdk::prelude::*;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

/// 监控命令参数
#[derive(Args, Debug)]
pub struct MonitorCommand {
    #[command(flatten)]
    pub device: DeviceArgs,

    /// 按键时点亮对应 LED
    #[arg(long)]
    pub echo: bool,

    /// 启用倾斜传感器
    #[arg(long)]
    pub tilt: bool,
}

impl MonitorCommand {
    pub fn execute(&self, config: &CliConfig) -> Result<()> {
        let running = Arc::new(AtomicBool::new(true));
        let r = running.clone();
        ctrlc::set_handler(move || r.store(false, Ordering::SeqCst))
            .context("无法注册 Ctrl-C 处理器")?;

        let mut session = self.device.open(config)?;
        session.set_error_sink(|failure: &SessionFailure| eprintln!("⚠️  {}", failure));
        let events = session.default_event_channel();
        if self.tilt {
            session.draw(&Command::TiltEnable { sensor: 0 })?;
        }

        println!(
            "👂 {} ({}, {}), Ctrl-C 退出",
            session.friendly_name(),
            session.serial(),
            session.size()
        );

        while running.load(Ordering::SeqCst) && session.is_ready() {
            let Ok(ev) = events.recv_timeout(Duration::from_millis(100)) else {
                continue;
            };
            println!("{:>10.3} ms  {}", ev.timestamp_us as f64 / 1000.0, ev.event);
            if self.echo
                && let Some(cmd) = echo_command(&ev.event)
            {
                session.draw(&cmd)?;
                session.refresh()?;
            }
        }

        if !session.is_ready() {
            println!("设备已断开");
        }
        let metrics = session.metrics();
        session.close()?;
        println!(
            "📊 rx {} B, tx {} B, 事件 {} (丢弃 {}, {:.1}%)",
            metrics.bytes_rx,
            metrics.bytes_tx,
            metrics.events_delivered,
            metrics.events_dropped,
            metrics.drop_rate()
        );
        Ok(())
    }
}

/// 按键 -> 对应 LED 的开/关
fn echo_command(event: &Event) -> Option<Command> {
    match *event {
        Event::ButtonDown { x, y } => Some(Command::LedSet { x, y, on: true }),
        Event::ButtonUp { x, y } => Some(Command::LedSet { x, y, on: false }),
        _ => None,
    }
}
