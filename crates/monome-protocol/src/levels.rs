//! 亮度等级工具
//!
//! - 单色（monobright）设备：等级 `> 7` 视为点亮
//! - mext 等级指令：每字节两个等级，高 4 位在前

/// 最大亮度等级
pub const MAX_LEVEL: u8 = 15;

/// 单色降级阈值（严格大于此值才点亮）
pub const MONOBRIGHT_THRESHOLD: u8 = 7;

/// 单个等级 -> 开/关
#[inline]
pub fn reduce_level_to_bit(level: u8) -> bool {
    level > MONOBRIGHT_THRESHOLD
}

/// 8 个等级 -> 位图（bit i 对应 `levels[i]`）
pub fn reduce_levels_to_bitmask(levels: &[u8; 8]) -> u8 {
    levels
        .iter()
        .enumerate()
        .fold(0u8, |mask, (i, &level)| mask | ((reduce_level_to_bit(level) as u8) << i))
}

/// 位图 -> 8 个等级（点亮为 `MAX_LEVEL`）
pub fn expand_bitmask(mask: u8) -> [u8; 8] {
    let mut levels = [0u8; 8];
    for (i, level) in levels.iter_mut().enumerate() {
        if mask & (1 << i) != 0 {
            *level = MAX_LEVEL;
        }
    }
    levels
}

/// 打包等级：每字节两个，高 4 位为偶数下标
///
/// 奇数长度时最后一个低半字节补 0。
pub fn pack_levels(levels: &[u8], out: &mut impl Extend<u8>) {
    out.extend(levels.chunks(2).map(|pair| {
        let hi = pair[0] & 0x0F;
        let lo = pair.get(1).copied().unwrap_or(0) & 0x0F;
        (hi << 4) | lo
    }));
}

/// 解包等级到 `out`（`out.len()` 必须等于 `packed.len() * 2`）
pub fn unpack_levels(packed: &[u8], out: &mut [u8]) {
    debug_assert_eq!(out.len(), packed.len() * 2);
    for (pair, byte) in out.chunks_mut(2).zip(packed) {
        pair[0] = byte >> 4;
        pair[1] = byte & 0x0F;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_reduce_threshold() {
        assert!(!reduce_level_to_bit(0));
        assert!(!reduce_level_to_bit(7));
        assert!(reduce_level_to_bit(8));
        assert!(reduce_level_to_bit(255));
    }

    #[test]
    fn test_reduce_levels_to_bitmask() {
        assert_eq!(reduce_levels_to_bitmask(&[0; 8]), 0x00);
        assert_eq!(reduce_levels_to_bitmask(&[255; 8]), 0xFF);
        assert_eq!(reduce_levels_to_bitmask(&[7; 8]), 0x00);
        assert_eq!(reduce_levels_to_bitmask(&[8; 8]), 0xFF);
        assert_eq!(reduce_levels_to_bitmask(&[0, 1, 4, 7, 8, 9, 15, 255]), 0xF0);
        assert_eq!(reduce_levels_to_bitmask(&[255, 15, 9, 8, 7, 4, 1, 0]), 0x0F);
        assert_eq!(reduce_levels_to_bitmask(&[8, 7, 8, 7, 8, 7, 8, 7]), 0x55);
    }

    #[test]
    fn test_single_bit_patterns() {
        for i in 0..8 {
            let mut levels = [0u8; 8];
            levels[i] = 8;
            assert_eq!(reduce_levels_to_bitmask(&levels), 1 << i);
        }
    }

    #[test]
    fn test_expand_bitmask() {
        assert_eq!(expand_bitmask(0x81), [15, 0, 0, 0, 0, 0, 0, 15]);
        assert_eq!(reduce_levels_to_bitmask(&expand_bitmask(0xA5)), 0xA5);
    }

    #[test]
    fn test_pack_unpack_levels() {
        let levels = [1, 2, 3, 4, 15, 0, 9, 10];
        let mut packed = Vec::new();
        pack_levels(&levels, &mut packed);
        assert_eq!(packed, vec![0x12, 0x34, 0xF0, 0x9A]);

        let mut out = [0u8; 8];
        unpack_levels(&packed, &mut out);
        assert_eq!(out, levels);
    }

    #[test]
    fn test_pack_masks_high_bits() {
        let mut packed = Vec::new();
        pack_levels(&[0x1F, 0xF3, 0x07], &mut packed);
        assert_eq!(packed, vec![0xF3, 0x70]);
    }
}
