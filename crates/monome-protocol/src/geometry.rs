//! 网格几何与旋转
//!
//! 设备上报的尺寸是**物理**尺寸；应用看到的是旋转之后的**逻辑**尺寸。
//! 90° 与 270° 会交换行列。
//!
//! 坐标约定：`x` 为列（0 在左），`y` 为行（0 在上）。

/// 网格尺寸（列 x 行）
///
/// arc 设备复用此结构：`rows` 为编码器（光环）数量，`cols` 固定为 64。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct GridSize {
    pub cols: u8,
    pub rows: u8,
}

impl GridSize {
    pub const fn new(cols: u8, rows: u8) -> Self {
        Self { cols, rows }
    }

    /// 坐标是否位于 `[0, cols) x [0, rows)` 内
    #[inline]
    pub fn contains(&self, x: u8, y: u8) -> bool {
        x < self.cols && y < self.rows
    }

    /// 单元格总数
    #[inline]
    pub fn cell_count(&self) -> usize {
        self.cols as usize * self.rows as usize
    }

    pub fn is_empty(&self) -> bool {
        self.cols == 0 || self.rows == 0
    }

    /// 行列互换后的尺寸
    pub fn transposed(&self) -> Self {
        Self {
            cols: self.rows,
            rows: self.cols,
        }
    }
}

impl std::fmt::Display for GridSize {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}x{}", self.cols, self.rows)
    }
}

/// 网格旋转方向（顺时针）
///
/// 从整数构造时只取低 2 位，因此 `5` 等价于 `R90`。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, num_enum::FromPrimitive)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[repr(u8)]
pub enum Rotation {
    #[default]
    R0 = 0,
    R90 = 1,
    R180 = 2,
    R270 = 3,
}

impl Rotation {
    /// 从任意整数构造（取低 2 位）
    pub fn from_bits(value: u8) -> Self {
        Self::from(value & 0x03)
    }

    /// 旋转角度（度）
    pub fn degrees(self) -> u16 {
        self as u16 * 90
    }

    /// 是否交换行列
    #[inline]
    pub fn swaps_axes(self) -> bool {
        matches!(self, Rotation::R90 | Rotation::R270)
    }

    /// 物理尺寸 -> 逻辑尺寸
    pub fn logical_size(self, physical: GridSize) -> GridSize {
        if self.swaps_axes() {
            physical.transposed()
        } else {
            physical
        }
    }

    /// 逻辑坐标 -> 物理坐标（输出方向）
    ///
    /// 调用方需保证 `(x, y)` 位于逻辑尺寸内。
    pub fn to_physical(self, x: u8, y: u8, physical: GridSize) -> (u8, u8) {
        let GridSize { cols, rows } = physical;
        match self {
            Rotation::R0 => (x, y),
            Rotation::R90 => (y, rows - 1 - x),
            Rotation::R180 => (cols - 1 - x, rows - 1 - y),
            Rotation::R270 => (cols - 1 - y, x),
        }
    }

    /// 物理坐标 -> 逻辑坐标（输入方向），`to_physical` 的逆变换
    pub fn to_logical(self, x: u8, y: u8, physical: GridSize) -> (u8, u8) {
        let GridSize { cols, rows } = physical;
        match self {
            Rotation::R0 => (x, y),
            Rotation::R90 => (rows - 1 - y, x),
            Rotation::R180 => (cols - 1 - x, rows - 1 - y),
            Rotation::R270 => (y, cols - 1 - x),
        }
    }
}

impl std::fmt::Display for Rotation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}°", self.degrees())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SQUARE: GridSize = GridSize::new(8, 8);

    #[test]
    fn test_r0_identity() {
        assert_eq!(Rotation::R0.to_physical(3, 5, SQUARE), (3, 5));
        assert_eq!(Rotation::R0.to_logical(0, 0, SQUARE), (0, 0));

        let rect = GridSize::new(16, 8);
        assert_eq!(Rotation::R0.to_physical(15, 7, rect), (15, 7));
        assert_eq!(Rotation::R0.to_logical(15, 7, rect), (15, 7));
    }

    #[test]
    fn test_specific_rotations_8x8() {
        assert_eq!(Rotation::R90.to_physical(3, 5, SQUARE), (5, 4));
        assert_eq!(Rotation::R180.to_physical(2, 3, SQUARE), (5, 4));
        assert_eq!(Rotation::R270.to_physical(3, 5, SQUARE), (2, 3));
    }

    #[test]
    fn test_roundtrip_all_rotations_square() {
        let corners = [(0, 0), (7, 7), (3, 5), (0, 7), (7, 0)];
        for bits in 0..4 {
            let rot = Rotation::from_bits(bits);
            for &(x, y) in &corners {
                let (px, py) = rot.to_physical(x, y, SQUARE);
                assert_eq!(rot.to_logical(px, py, SQUARE), (x, y), "{rot:?} ({x},{y})");
            }
        }
    }

    #[test]
    fn test_roundtrip_rectangular_covers_every_cell() {
        // 128: 16 列 8 行
        let physical = GridSize::new(16, 8);
        for bits in 0..4 {
            let rot = Rotation::from_bits(bits);
            let logical = rot.logical_size(physical);
            let mut seen = vec![false; physical.cell_count()];
            for y in 0..logical.rows {
                for x in 0..logical.cols {
                    let (px, py) = rot.to_physical(x, y, physical);
                    assert!(physical.contains(px, py), "{rot:?} maps ({x},{y}) outside");
                    let idx = py as usize * physical.cols as usize + px as usize;
                    assert!(!seen[idx], "{rot:?} maps two cells onto ({px},{py})");
                    seen[idx] = true;
                    assert_eq!(rot.to_logical(px, py, physical), (x, y));
                }
            }
            assert!(seen.iter().all(|&s| s));
        }
    }

    #[test]
    fn test_dimension_swap() {
        let physical = GridSize::new(16, 8);
        assert_eq!(Rotation::R0.logical_size(physical), GridSize::new(16, 8));
        assert_eq!(Rotation::R90.logical_size(physical), GridSize::new(8, 16));
        assert_eq!(Rotation::R180.logical_size(physical), GridSize::new(16, 8));
        assert_eq!(Rotation::R270.logical_size(physical), GridSize::new(8, 16));
    }

    #[test]
    fn test_rotation_masks_to_two_bits() {
        assert_eq!(Rotation::from_bits(5), Rotation::R90);
        assert_eq!(Rotation::from_bits(4), Rotation::R0);
        assert_eq!(Rotation::from_bits(0xFF), Rotation::R270);
        assert_eq!(Rotation::R270.degrees(), 270);
        assert_eq!(Rotation::R180.to_string(), "180°");
    }
}
