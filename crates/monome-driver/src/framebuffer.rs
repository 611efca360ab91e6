//! 帧缓冲区
//!
//! 以物理坐标保存设备 LED 状态（等级 0..=15；单色设备只保存 0 或 15），
//! 并记录脏区域，用于批量刷新。
//!
//! 写入接口接收逻辑坐标，按旋转方向换算到物理坐标；
//! 刷新接口按协议变体的整帧策略生成 `Command`。

use monome_protocol::{
    Command, FrameStrategy, GridSize, MAP_SIZE, MAX_LEVEL, RING_LEDS, Rotation, reduce_level_to_bit,
};

/// 矩形区域（物理坐标，闭区间）
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Region {
    pub x0: u8,
    pub y0: u8,
    pub x1: u8,
    pub y1: u8,
}

impl Region {
    pub fn cell(x: u8, y: u8) -> Self {
        Self {
            x0: x,
            y0: y,
            x1: x,
            y1: y,
        }
    }

    pub fn union(self, other: Region) -> Self {
        Self {
            x0: self.x0.min(other.x0),
            y0: self.y0.min(other.y0),
            x1: self.x1.max(other.x1),
            y1: self.y1.max(other.y1),
        }
    }

    pub fn is_single_cell(&self) -> bool {
        self.x0 == self.x1 && self.y0 == self.y1
    }

    /// 是否与 `(x_off, y_off)` 处的 8x8 块相交
    pub fn intersects_block(&self, x_off: u8, y_off: u8) -> bool {
        let x_end = x_off.saturating_add(MAP_SIZE - 1);
        let y_end = y_off.saturating_add(MAP_SIZE - 1);
        self.x0 <= x_end && x_off <= self.x1 && self.y0 <= y_end && y_off <= self.y1
    }
}

/// 设备帧缓冲区
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FrameBuffer {
    size: GridSize,
    levels: Vec<u8>,
    rings: Vec<[u8; 64]>,
    monobright: bool,
    dirty: Option<Region>,
    dirty_rings: Vec<bool>,
}

impl FrameBuffer {
    /// - `size`: 物理网格尺寸（arc 为 0x0）
    /// - `rings`: 光环数量（grid 为 0）
    /// - `monobright`: 设备只能开/关
    pub fn new(size: GridSize, rings: u8, monobright: bool) -> Self {
        Self {
            size,
            levels: vec![0; size.cell_count()],
            rings: vec![[0; 64]; rings as usize],
            monobright,
            dirty: None,
            dirty_rings: vec![false; rings as usize],
        }
    }

    pub fn size(&self) -> GridSize {
        self.size
    }

    pub fn ring_count(&self) -> u8 {
        self.rings.len() as u8
    }

    pub fn is_monobright(&self) -> bool {
        self.monobright
    }

    /// 物理坐标处的等级；越界返回 0
    pub fn level(&self, x: u8, y: u8) -> u8 {
        if self.size.contains(x, y) {
            self.levels[self.index(x, y)]
        } else {
            0
        }
    }

    /// 全部等级（行优先，物理坐标）
    pub fn levels(&self) -> &[u8] {
        &self.levels
    }

    pub fn ring(&self, ring: u8) -> Option<&[u8; 64]> {
        self.rings.get(ring as usize)
    }

    pub fn dirty_region(&self) -> Option<Region> {
        self.dirty
    }

    pub fn is_dirty(&self) -> bool {
        self.dirty.is_some() || self.dirty_rings.iter().any(|d| *d)
    }

    pub fn mark_clean(&mut self) {
        self.dirty = None;
        self.dirty_rings.fill(false);
    }

    fn index(&self, x: u8, y: u8) -> usize {
        y as usize * self.size.cols as usize + x as usize
    }

    fn normalize(&self, level: u8) -> u8 {
        if self.monobright {
            if reduce_level_to_bit(level) { MAX_LEVEL } else { 0 }
        } else {
            level.min(MAX_LEVEL)
        }
    }

    fn mark(&mut self, region: Region) {
        self.dirty = Some(match self.dirty {
            Some(d) => d.union(region),
            None => region,
        });
    }

    /// 物理坐标写入；越界忽略
    pub fn set(&mut self, x: u8, y: u8, level: u8) {
        if !self.size.contains(x, y) {
            return;
        }
        let idx = self.index(x, y);
        self.levels[idx] = self.normalize(level);
        self.mark(Region::cell(x, y));
    }

    pub fn fill(&mut self, level: u8) {
        if self.size.is_empty() {
            return;
        }
        let level = self.normalize(level);
        self.levels.fill(level);
        self.mark(Region {
            x0: 0,
            y0: 0,
            x1: self.size.cols - 1,
            y1: self.size.rows - 1,
        });
    }

    fn ring_mut(&mut self, ring: u8) -> Option<&mut [u8; 64]> {
        let slot = self.dirty_rings.get_mut(ring as usize)?;
        *slot = true;
        self.rings.get_mut(ring as usize)
    }

    /// 逻辑坐标写入
    fn put(&mut self, rotation: Rotation, x: u8, y: u8, level: u8) {
        if !rotation.logical_size(self.size).contains(x, y) {
            return;
        }
        let (px, py) = rotation.to_physical(x, y, self.size);
        self.set(px, py, level);
    }

    /// 把绘制指令作用到缓冲区（逻辑坐标）
    ///
    /// 调用方需先完成校验。亮度、倾斜与旋转不属于帧状态，返回 `false`。
    pub fn apply(&mut self, cmd: &Command, rotation: Rotation) -> bool {
        let bit = |data: u8, i: u8| if data & (1 << i) != 0 { MAX_LEVEL } else { 0 };
        match *cmd {
            Command::LedSet { x, y, on } => self.put(rotation, x, y, bit(on as u8, 0)),
            Command::LedAll { on } => self.fill(bit(on as u8, 0)),
            Command::LedMap { x_off, y_off, rows } => {
                for (dy, data) in (0u8..).zip(rows) {
                    for dx in 0..MAP_SIZE {
                        self.put(rotation, x_off + dx, y_off + dy, bit(data, dx));
                    }
                }
            },
            Command::LedRow { x_off, y, data } => {
                for dx in 0..MAP_SIZE {
                    self.put(rotation, x_off + dx, y, bit(data, dx));
                }
            },
            Command::LedCol { x, y_off, data } => {
                for dy in 0..MAP_SIZE {
                    self.put(rotation, x, y_off + dy, bit(data, dy));
                }
            },
            Command::LevelSet { x, y, level } => self.put(rotation, x, y, level),
            Command::LevelAll { level } => self.fill(level),
            Command::LevelMap {
                x_off,
                y_off,
                ref levels,
            } => {
                for (i, &level) in (0u8..).zip(levels.iter()) {
                    self.put(rotation, x_off + i % MAP_SIZE, y_off + i / MAP_SIZE, level);
                }
            },
            Command::LevelRow { x_off, y, levels } => {
                for (dx, level) in (0u8..).zip(levels) {
                    self.put(rotation, x_off + dx, y, level);
                }
            },
            Command::LevelCol { x, y_off, levels } => {
                for (dy, level) in (0u8..).zip(levels) {
                    self.put(rotation, x, y_off + dy, level);
                }
            },
            Command::RingSet { ring, led, level } => {
                if let Some(r) = self.ring_mut(ring) {
                    r[(led % RING_LEDS) as usize] = level.min(MAX_LEVEL);
                }
            },
            Command::RingAll { ring, level } => {
                if let Some(r) = self.ring_mut(ring) {
                    r.fill(level.min(MAX_LEVEL));
                }
            },
            Command::RingMap { ring, levels } => {
                if let Some(r) = self.ring_mut(ring) {
                    for (dst, src) in r.iter_mut().zip(levels) {
                        *dst = src.min(MAX_LEVEL);
                    }
                }
            },
            Command::RingRange {
                ring,
                start,
                end,
                level,
            } => {
                if let Some(r) = self.ring_mut(ring) {
                    let mut led = start % RING_LEDS;
                    loop {
                        r[led as usize] = level.min(MAX_LEVEL);
                        if led == end % RING_LEDS {
                            break;
                        }
                        led = (led + 1) % RING_LEDS;
                    }
                }
            },
            Command::Intensity { .. }
            | Command::TiltEnable { .. }
            | Command::TiltDisable { .. }
            | Command::SetRotation(_) => return false,
        }
        true
    }

    /// 一行 8 个单元的位图（LSB = `x_off`）
    fn row_bits(&self, x_off: u8, y: u8) -> u8 {
        (0..MAP_SIZE).fold(0, |mask, i| {
            mask | (((self.level(x_off.saturating_add(i), y) > 0) as u8) << i)
        })
    }

    fn block_command(&self, strategy: FrameStrategy, x_off: u8, y_off: u8) -> Command {
        match strategy {
            FrameStrategy::Quadrants => {
                let mut rows = [0u8; 8];
                for (dy, row) in (0u8..).zip(rows.iter_mut()) {
                    *row = self.row_bits(x_off, y_off + dy);
                }
                Command::LedMap { x_off, y_off, rows }
            },
            _ => {
                let mut levels = [0u8; 64];
                for (i, level) in (0u8..).zip(levels.iter_mut()) {
                    *level = self.level(x_off + i % MAP_SIZE, y_off + i / MAP_SIZE);
                }
                Command::LevelMap {
                    x_off,
                    y_off,
                    levels,
                }
            },
        }
    }

    /// 区域内（`None` 表示整帧）的刷新指令
    fn region_commands(&self, strategy: FrameStrategy, region: Option<Region>) -> Vec<Command> {
        let GridSize { cols, rows } = self.size;
        let mut out = Vec::new();
        match strategy {
            FrameStrategy::Rows => {
                for y in 0..rows {
                    for x_off in (0..cols).step_by(MAP_SIZE as usize) {
                        let touched = region.is_none_or(|r| {
                            (r.y0..=r.y1).contains(&y) && r.intersects_block(x_off, y)
                        });
                        if touched {
                            out.push(Command::LedRow {
                                x_off,
                                y,
                                data: self.row_bits(x_off, y),
                            });
                        }
                    }
                }
            },
            FrameStrategy::Quadrants | FrameStrategy::LevelMaps => {
                for y_off in (0..rows).step_by(MAP_SIZE as usize) {
                    for x_off in (0..cols).step_by(MAP_SIZE as usize) {
                        if region.is_none_or(|r| r.intersects_block(x_off, y_off)) {
                            out.push(self.block_command(strategy, x_off, y_off));
                        }
                    }
                }
            },
            FrameStrategy::RingMaps => {},
        }
        out
    }

    fn ring_commands(&self, only_dirty: bool) -> Vec<Command> {
        (0u8..)
            .zip(self.rings.iter())
            .filter(|(ring, _)| !only_dirty || self.dirty_rings[*ring as usize])
            .map(|(ring, levels)| Command::RingMap {
                ring,
                levels: *levels,
            })
            .collect()
    }

    /// 整帧刷新指令（不改变脏标记）
    pub fn frame_commands(&self, strategy: FrameStrategy) -> Vec<Command> {
        let mut out = self.region_commands(strategy, None);
        out.extend(self.ring_commands(false));
        out
    }

    /// 脏区域的刷新指令（不改变脏标记，写出成功后由调用方 `mark_clean`）
    ///
    /// 只有一个单元变化时使用单点指令，其余情况按整帧策略覆盖脏区域。
    pub fn dirty_commands(&self, strategy: FrameStrategy) -> Vec<Command> {
        let mut out = match self.dirty {
            Some(r) if r.is_single_cell() => {
                let level = self.level(r.x0, r.y0);
                vec![if self.monobright {
                    Command::LedSet {
                        x: r.x0,
                        y: r.y0,
                        on: level > 0,
                    }
                } else {
                    Command::LevelSet {
                        x: r.x0,
                        y: r.y0,
                        level,
                    }
                }]
            },
            Some(r) => self.region_commands(strategy, Some(r)),
            None => Vec::new(),
        };
        out.extend(self.ring_commands(true));
        out
    }
}
