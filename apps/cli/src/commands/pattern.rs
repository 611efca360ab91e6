//! 测试图案命令
//!
//! 依次点亮每一行（grid）或每个光环（arc），用于检查 LED 与接线。

use crate::commands::config::CliConfig;
use crate::utils::DeviceArgs;
use anyhow::Result;
use clap::{Args, ValueEnum};
use monome_sdk::prelude::*;
use std::thread;
use std::time::Duration;

/// 图案
#[derive(ValueEnum, Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Pattern {
    /// 逐行扫过（arc 为逐个光环）
    #[default]
    Sweep,
    /// 棋盘格
    Checker,
    /// 亮度渐变（单色设备会降级为开/关）
    Gradient,
}

/// 测试命令参数
#[derive(Args, Debug)]
pub struct TestCommand {
    #[command(flatten)]
    pub device: DeviceArgs,

    #[arg(short, long, value_enum, default_value_t = Pattern::Sweep)]
    pub pattern: Pattern,

    /// 每一步的间隔（毫秒）
    #[arg(long, default_value_t = 80)]
    pub step_ms: u64,

    /// 结束后保留图案（默认清屏）
    #[arg(long)]
    pub keep: bool,
}

impl TestCommand {
    pub fn execute(&self, config: &CliConfig) -> Result<()> {
        let mut session = self.device.open(config)?;
        println!("🔆 {} ({}): {:?}", session.friendly_name(), session.serial(), self.pattern);

        let step = Duration::from_millis(self.step_ms);
        for frame in frames(&session, self.pattern) {
            session.clear()?;
            for cmd in &frame {
                session.draw(cmd)?;
            }
            session.refresh()?;
            thread::sleep(step);
        }

        if !self.keep {
            session.clear()?;
            session.refresh()?;
        }
        session.close()?;
        println!("✅ 完成");
        Ok(())
    }
}

/// 生成图案的各帧（逻辑坐标）
pub fn frames(session: &Monome, pattern: Pattern) -> Vec<Vec<Command>> {
    let (cols, rows) = (session.cols(), session.rows());
    if session.info().is_arc() {
        return (0..session.rings())
            .map(|ring| match pattern {
                Pattern::Sweep => vec![Command::RingAll { ring, level: 15 }],
                Pattern::Checker => (0..64)
                    .step_by(2)
                    .map(|led| Command::RingSet { ring, led, level: 15 })
                    .collect(),
                Pattern::Gradient => {
                    let mut levels = [0u8; 64];
                    for (led, level) in levels.iter_mut().enumerate() {
                        *level = (led / 4) as u8;
                    }
                    vec![Command::RingMap { ring, levels }]
                },
            })
            .collect();
    }

    match pattern {
        Pattern::Sweep => (0..rows)
            .map(|y| (0..cols).map(|x| Command::LedSet { x, y, on: true }).collect())
            .collect(),
        Pattern::Checker => [0u8, 1]
            .iter()
            .map(|phase| {
                (0..rows)
                    .flat_map(|y| (0..cols).map(move |x| (x, y)))
                    .filter(|(x, y)| (x + y) % 2 == *phase)
                    .map(|(x, y)| Command::LedSet { x, y, on: true })
                    .collect()
            })
            .collect(),
        Pattern::Gradient => vec![
            (0..rows)
                .flat_map(|y| (0..cols).map(move |x| (x, y)))
                .map(|(x, y)| Command::LevelSet {
                    x,
                    y,
                    level: ((x as u16 * 15) / (cols.max(2) as u16 - 1)) as u8,
                })
                .collect(),
        ],
    }
}
