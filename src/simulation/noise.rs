//! 以坐标和时间为键的确定性伪随机
//!
//! 与 GPU 更新程序中的 `pcg_hash` / `hash01` / `jitter` 逐位一致：相同坐标、相同时间
//! 得到相同结果，整数运算全部按 u32 回绕。

/// 抖动噪声每秒的节拍数
pub const JITTER_RATE: f32 = 4.0;

pub const SALT_JITTER: u32 = 0x9E37_79B9;
pub const SALT_SPAWN_X: u32 = 11;
pub const SALT_SPAWN_Y: u32 = 12;
pub const SALT_SPAWN_VX: u32 = 13;

/// PCG 整数哈希
#[inline]
pub fn pcg_hash(input: u32) -> u32 {
    let state = input.wrapping_mul(747_796_405).wrapping_add(2_891_336_453);
    let word = ((state >> ((state >> 28) + 4)) ^ state).wrapping_mul(277_803_737);
    (word >> 22) ^ word
}

/// (元素索引, 节拍, 盐) 映射到 [0, 1)
#[inline]
pub fn hash01(index: u32, tick: u32, salt: u32) -> f32 {
    let h = pcg_hash(index ^ pcg_hash(tick ^ pcg_hash(salt)));
    (h >> 8) as f32 / 16_777_216.0
}

/// 横向抖动，范围 [-1, 1]
///
/// 对时间做值噪声：相邻节拍的哈希之间用 smoothstep 插值，所以逐帧平滑变化。
#[inline]
pub fn jitter(index: u32, time: f32) -> f32 {
    let t = time * JITTER_RATE;
    let tick_f = t.floor();
    let f = t - tick_f;
    let tick = tick_f as i32 as u32;
    let a = hash01(index, tick, SALT_JITTER);
    let b = hash01(index, tick.wrapping_add(1), SALT_JITTER);
    let s = f * f * (3.0 - 2.0 * f);
    (a + (b - a) * s) * 2.0 - 1.0
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_hash01_range() {
        for i in 0..10_000u32 {
            let v = hash01(i, i.wrapping_mul(31), 5);
            assert!((0.0..1.0).contains(&v));
        }
    }

    #[test]
    fn test_jitter_is_deterministic() {
        for index in [0u32, 1, 42, 65_535] {
            assert_eq!(jitter(index, 1.234), jitter(index, 1.234));
        }
    }

    #[test]
    fn test_jitter_varies_by_coordinate() {
        let distinct = (0..64u32)
            .map(|i| jitter(i, 0.5).to_bits())
            .collect::<std::collections::HashSet<_>>();
        assert!(distinct.len() > 32);
    }

    #[test]
    fn test_jitter_is_smooth_in_time() {
        let dt = 1.0 / 240.0;
        for index in 0..32u32 {
            let mut t = 0.0f32;
            while t < 2.0 {
                let delta = (jitter(index, t + dt) - jitter(index, t)).abs();
                // smoothstep 斜率最大 1.5，值噪声跨度最大 2
                assert!(delta <= 2.0 * 1.5 * JITTER_RATE * dt + 1e-4);
                t += dt;
            }
        }
    }

    #[test]
    fn test_negative_time() {
        let v = jitter(3, -2.7);
        assert!((-1.0..=1.0).contains(&v));
    }
}
