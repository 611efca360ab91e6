//! 输出指令（主机 -> 设备）
//!
//! `Command` 与协议变体无关，由各变体编码器转换为字节序列。
//! 坐标均为编码器眼中的坐标：会话层传入前已完成旋转变换。

use crate::geometry::{GridSize, Rotation};
use crate::levels::MAX_LEVEL;
use crate::variant::Feature;
use crate::{ProtocolError, check_below};

/// 位图 / 等级图的块边长（8x8 象限）
pub const MAP_SIZE: u8 = 8;

/// arc 每个光环的 LED 数量
pub const RING_LEDS: u8 = 64;

/// 指令校验边界
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Bounds {
    /// 网格尺寸（arc 为 0x0）
    pub grid: GridSize,
    /// 光环数量（grid 为 0）
    pub rings: u8,
    /// 倾斜传感器数量
    pub tilt_sensors: u8,
}

impl Bounds {
    pub const fn grid(grid: GridSize) -> Self {
        Self {
            grid,
            rings: 0,
            tilt_sensors: 1,
        }
    }

    pub const fn arc(rings: u8) -> Self {
        Self {
            grid: GridSize::new(0, 0),
            rings,
            tilt_sensors: 0,
        }
    }
}

/// 输出指令
///
/// 行/列指令携带 8 个单元：位图模式下一个字节（LSB = 最小坐标），
/// 等级模式下 8 个 0..=15 的等级。
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    /// 单个 LED 开/关
    LedSet { x: u8, y: u8, on: bool },
    /// 全部 LED 开/关
    LedAll { on: bool },
    /// 8x8 位图，`rows[i]` 为第 `y_off + i` 行
    LedMap { x_off: u8, y_off: u8, rows: [u8; 8] },
    /// 从 `x_off` 开始的 8 个单元
    LedRow { x_off: u8, y: u8, data: u8 },
    /// 从 `y_off` 开始的 8 个单元
    LedCol { x: u8, y_off: u8, data: u8 },
    /// 全局亮度（0..=15）
    Intensity { level: u8 },
    LevelSet { x: u8, y: u8, level: u8 },
    LevelAll { level: u8 },
    /// 8x8 等级图，行优先
    LevelMap { x_off: u8, y_off: u8, levels: [u8; 64] },
    LevelRow { x_off: u8, y: u8, levels: [u8; 8] },
    LevelCol { x: u8, y_off: u8, levels: [u8; 8] },
    RingSet { ring: u8, led: u8, level: u8 },
    RingAll { ring: u8, level: u8 },
    RingMap { ring: u8, levels: [u8; 64] },
    /// 从 `start` 顺时针到 `end`（含两端，可跨越 0）
    RingRange { ring: u8, start: u8, end: u8, level: u8 },
    TiltEnable { sensor: u8 },
    TiltDisable { sensor: u8 },
    /// 会话层旋转，不产生任何线上字节
    SetRotation(Rotation),
}

impl Command {
    /// 指令所需的设备能力；`None` 表示所有设备都支持
    pub fn feature(&self) -> Option<Feature> {
        use Command::*;
        match self {
            LedSet { .. } | LedAll { .. } | LedMap { .. } | LedRow { .. } | LedCol { .. } => {
                Some(Feature::Led)
            },
            LevelSet { .. }
            | LevelAll { .. }
            | LevelMap { .. }
            | LevelRow { .. }
            | LevelCol { .. } => Some(Feature::LedLevel),
            RingSet { .. } | RingAll { .. } | RingMap { .. } | RingRange { .. } => {
                Some(Feature::LedRing)
            },
            TiltEnable { .. } | TiltDisable { .. } => Some(Feature::Tilt),
            Intensity { .. } | SetRotation(_) => None,
        }
    }

    /// 指令名称（用于日志与错误信息）
    pub fn name(&self) -> &'static str {
        use Command::*;
        match self {
            LedSet { .. } => "led set",
            LedAll { .. } => "led all",
            LedMap { .. } => "led map",
            LedRow { .. } => "led row",
            LedCol { .. } => "led col",
            Intensity { .. } => "intensity",
            LevelSet { .. } => "level set",
            LevelAll { .. } => "level all",
            LevelMap { .. } => "level map",
            LevelRow { .. } => "level row",
            LevelCol { .. } => "level col",
            RingSet { .. } => "ring set",
            RingAll { .. } => "ring all",
            RingMap { .. } => "ring map",
            RingRange { .. } => "ring range",
            TiltEnable { .. } => "tilt enable",
            TiltDisable { .. } => "tilt disable",
            SetRotation(_) => "set rotation",
        }
    }

    /// 按边界校验坐标与数值
    ///
    /// # 规则
    /// - 坐标位于 `[0, cols) x [0, rows)`
    /// - 行/列/块偏移必须是 8 的倍数
    /// - 等级与亮度位于 `0..=15`
    /// - 光环编号小于光环数量，LED 编号小于 64
    pub fn validate(&self, bounds: &Bounds) -> Result<(), ProtocolError> {
        use Command::*;
        let GridSize { cols, rows } = bounds.grid;
        match self {
            LedSet { x, y, .. } => {
                check_below("x", *x, cols)?;
                check_below("y", *y, rows)
            },
            LedAll { .. } => Ok(()),
            LedMap { x_off, y_off, .. } => check_block(*x_off, *y_off, bounds.grid),
            LedRow { x_off, y, .. } => {
                check_offset("x_off", *x_off, cols)?;
                check_below("y", *y, rows)
            },
            LedCol { x, y_off, .. } => {
                check_below("x", *x, cols)?;
                check_offset("y_off", *y_off, rows)
            },
            Intensity { level } | LevelAll { level } => check_level(*level),
            LevelSet { x, y, level } => {
                check_below("x", *x, cols)?;
                check_below("y", *y, rows)?;
                check_level(*level)
            },
            LevelMap { x_off, y_off, levels } => {
                check_block(*x_off, *y_off, bounds.grid)?;
                levels.iter().try_for_each(|l| check_level(*l))
            },
            LevelRow { x_off, y, levels } => {
                check_offset("x_off", *x_off, cols)?;
                check_below("y", *y, rows)?;
                levels.iter().try_for_each(|l| check_level(*l))
            },
            LevelCol { x, y_off, levels } => {
                check_below("x", *x, cols)?;
                check_offset("y_off", *y_off, rows)?;
                levels.iter().try_for_each(|l| check_level(*l))
            },
            RingSet { ring, led, level } => {
                check_below("ring", *ring, bounds.rings)?;
                check_below("led", *led, RING_LEDS)?;
                check_level(*level)
            },
            RingAll { ring, level } => {
                check_below("ring", *ring, bounds.rings)?;
                check_level(*level)
            },
            RingMap { ring, levels } => {
                check_below("ring", *ring, bounds.rings)?;
                levels.iter().try_for_each(|l| check_level(*l))
            },
            RingRange {
                ring,
                start,
                end,
                level,
            } => {
                check_below("ring", *ring, bounds.rings)?;
                check_below("start", *start, RING_LEDS)?;
                check_below("end", *end, RING_LEDS)?;
                check_level(*level)
            },
            TiltEnable { sensor } | TiltDisable { sensor } => {
                check_below("sensor", *sensor, bounds.tilt_sensors)
            },
            SetRotation(_) => Ok(()),
        }
    }
}

fn check_level(level: u8) -> Result<(), ProtocolError> {
    check_below("level", level, MAX_LEVEL + 1)
}

fn check_offset(field: &'static str, offset: u8, limit: u8) -> Result<(), ProtocolError> {
    check_below(field, offset, limit)?;
    if offset % MAP_SIZE != 0 {
        return Err(ProtocolError::InvalidValue {
            field: format!("{field} (must be a multiple of {MAP_SIZE})"),
            value: offset,
        });
    }
    Ok(())
}

fn check_block(x_off: u8, y_off: u8, grid: GridSize) -> Result<(), ProtocolError> {
    check_offset("x_off", x_off, grid.cols)?;
    check_offset("y_off", y_off, grid.rows)
}

#[cfg(test)]
mod tests {
    use super::*;

    const GRID_8X8: Bounds = Bounds::grid(GridSize::new(8, 8));

    #[test]
    fn test_led_set_bounds() {
        assert!(Command::LedSet { x: 7, y: 7, on: true }.validate(&GRID_8X8).is_ok());
        for (x, y) in [(8, 0), (0, 8), (8, 8)] {
            let err = Command::LedSet { x, y, on: true }.validate(&GRID_8X8).unwrap_err();
            assert!(err.is_validation(), "({x},{y}) -> {err}");
        }
    }

    #[test]
    fn test_map_offsets() {
        let grid = Bounds::grid(GridSize::new(16, 8));
        let map = |x_off, y_off| Command::LedMap {
            x_off,
            y_off,
            rows: [0; 8],
        };
        assert!(map(0, 0).validate(&grid).is_ok());
        assert!(map(8, 0).validate(&grid).is_ok());
        assert!(map(16, 0).validate(&grid).is_err());
        assert!(map(0, 8).validate(&grid).is_err());
        assert!(map(4, 0).validate(&grid).is_err());
    }

    #[test]
    fn test_row_col_bounds() {
        assert!(Command::LedRow { x_off: 0, y: 0, data: 0xFF }.validate(&GRID_8X8).is_ok());
        assert!(Command::LedRow { x_off: 0, y: 8, data: 0xFF }.validate(&GRID_8X8).is_err());
        assert!(Command::LedCol { x: 0, y_off: 0, data: 0xFF }.validate(&GRID_8X8).is_ok());
        assert!(Command::LedCol { x: 8, y_off: 0, data: 0xFF }.validate(&GRID_8X8).is_err());
    }

    #[test]
    fn test_levels_rejected_above_15() {
        assert!(Command::LevelSet { x: 0, y: 0, level: 15 }.validate(&GRID_8X8).is_ok());
        assert!(Command::LevelSet { x: 0, y: 0, level: 16 }.validate(&GRID_8X8).is_err());
        assert!(Command::Intensity { level: 16 }.validate(&GRID_8X8).is_err());

        let mut levels = [0u8; 8];
        levels[3] = 200;
        let cmd = Command::LevelRow { x_off: 0, y: 1, levels };
        assert!(cmd.validate(&GRID_8X8).is_err());
    }

    #[test]
    fn test_ring_bounds() {
        let arc = Bounds::arc(4);
        assert!(Command::RingSet { ring: 3, led: 63, level: 15 }.validate(&arc).is_ok());
        assert!(Command::RingSet { ring: 4, led: 0, level: 15 }.validate(&arc).is_err());
        assert!(Command::RingSet { ring: 0, led: 64, level: 15 }.validate(&arc).is_err());
        let range = Command::RingRange {
            ring: 0,
            start: 60,
            end: 4,
            level: 9,
        };
        assert!(range.validate(&arc).is_ok());

        // grid 上没有光环
        assert!(Command::RingAll { ring: 0, level: 1 }.validate(&GRID_8X8).is_err());
    }

    #[test]
    fn test_feature_mapping() {
        assert_eq!(Command::LedAll { on: true }.feature(), Some(Feature::Led));
        assert_eq!(Command::LevelAll { level: 3 }.feature(), Some(Feature::LedLevel));
        assert_eq!(Command::RingAll { ring: 0, level: 3 }.feature(), Some(Feature::LedRing));
        assert_eq!(Command::TiltEnable { sensor: 0 }.feature(), Some(Feature::Tilt));
        assert_eq!(Command::Intensity { level: 3 }.feature(), None);
        assert_eq!(Command::SetRotation(Rotation::R90).feature(), None);
    }
}
