//! 粒子状态与乒乓缓冲
//!
//! 粒子不是单独分配的对象，而是由固定网格坐标 (col, row) 标识的隐式元素。
//! 每个坐标在缓冲中存放一个 `(x, y, vx, vy)` 四元组。

use crate::core::error::{CascadeError, CascadeResult};
use glam::Vec2;
use rand::Rng;

/// 出生时 y 的半宽（粒子从顶部边缘附近出生）
pub const SPAWN_Y_SPREAD: f32 = 0.05;
/// 出生时 vx 的半宽
pub const SPAWN_VX_SPREAD: f32 = 0.005;

/// 单个粒子状态（对应 WGSL `vec4<f32>`）
#[repr(C)]
#[derive(Debug, Clone, Copy, Default, PartialEq, bytemuck::Pod, bytemuck::Zeroable)]
pub struct ParticleState {
    /// 归一化横坐标，恒在 [0, 1]
    pub x: f32,
    /// 归一化纵坐标，向下为正，离屏时可越界
    pub y: f32,
    /// 横向速度
    pub vx: f32,
    /// 纵向速度
    pub vy: f32,
}

impl ParticleState {
    pub const fn new(x: f32, y: f32, vx: f32, vy: f32) -> Self {
        Self { x, y, vx, vy }
    }

    pub fn is_finite(&self) -> bool {
        self.x.is_finite() && self.y.is_finite() && self.vx.is_finite() && self.vy.is_finite()
    }

    /// 由三个 [0, 1) 的均匀样本构造出生状态
    pub fn spawn_from_unit(ux: f32, uy: f32, uvx: f32) -> Self {
        Self {
            x: ux,
            y: (uy * 2.0 - 1.0) * SPAWN_Y_SPREAD,
            vx: (uvx * 2.0 - 1.0) * SPAWN_VX_SPREAD,
            vy: 0.0,
        }
    }

    /// 按出生分布随机采样
    pub fn spawn<R: Rng + ?Sized>(rng: &mut R) -> Self {
        Self {
            x: rng.gen_range(0.0..=1.0),
            y: rng.gen_range(-SPAWN_Y_SPREAD..=SPAWN_Y_SPREAD),
            vx: rng.gen_range(-SPAWN_VX_SPREAD..=SPAWN_VX_SPREAD),
            vy: 0.0,
        }
    }
}

/// 模拟网格尺寸
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct GridDims {
    pub width: u32,
    pub height: u32,
}

impl GridDims {
    pub const fn new(width: u32, height: u32) -> Self {
        Self { width, height }
    }

    /// 粒子总数
    pub fn count(&self) -> usize {
        self.width as usize * self.height as usize
    }

    /// 线性索引
    pub fn index(&self, col: u32, row: u32) -> usize {
        row as usize * self.width as usize + col as usize
    }

    /// 线性索引对应的网格坐标
    pub fn coord(&self, index: usize) -> (u32, u32) {
        let width = self.width.max(1) as usize;
        ((index % width) as u32, (index / width) as u32)
    }

    /// 网格坐标的纹理中心坐标 ((col + 0.5) / w, (row + 0.5) / h)
    pub fn texel_center(&self, col: u32, row: u32) -> Vec2 {
        Vec2::new(
            (col as f32 + 0.5) / self.width as f32,
            (row as f32 + 0.5) / self.height as f32,
        )
    }
}

impl std::fmt::Display for GridDims {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} x {}", self.width, self.height)
    }
}

/// 按出生分布生成一整个网格的状态
pub fn seed_particles<R: Rng + ?Sized>(dims: GridDims, rng: &mut R) -> Vec<ParticleState> {
    (0..dims.count()).map(|_| ParticleState::spawn(rng)).collect()
}

/// 乒乓状态缓冲
///
/// 两个同尺寸的缓冲，`current` 标记当前可读的那一个。更新过程只读当前缓冲、
/// 只写另一个，完整更新结束后才交换角色。
#[derive(Debug, Default)]
pub struct StateBuffers {
    buffers: [Vec<ParticleState>; 2],
    current: usize,
    dims: Option<GridDims>,
}

impl StateBuffers {
    pub fn new() -> Self {
        Self::default()
    }

    /// 分配两个同尺寸缓冲并清零
    pub fn allocate(&mut self, width: u32, height: u32) -> CascadeResult<()> {
        let dims = GridDims::new(width, height);
        let count = dims.count();

        let mut fresh: [Vec<ParticleState>; 2] = [Vec::new(), Vec::new()];
        for buffer in &mut fresh {
            buffer
                .try_reserve_exact(count)
                .map_err(|e| CascadeError::Allocation {
                    width,
                    height,
                    reason: e.to_string(),
                })?;
            buffer.resize(count, ParticleState::default());
        }

        self.buffers = fresh;
        self.current = 0;
        self.dims = Some(dims);
        Ok(())
    }

    /// 以出生分布填充两个缓冲（两个缓冲内容完全相同）
    pub fn seed<R: Rng + ?Sized>(
        &mut self,
        width: u32,
        height: u32,
        rng: &mut R,
    ) -> CascadeResult<()> {
        if self.dims != Some(GridDims::new(width, height)) {
            self.allocate(width, height)?;
        }
        let particles = seed_particles(GridDims::new(width, height), rng);
        self.load(&particles)
    }

    /// 把给定状态写入两个缓冲
    pub fn load(&mut self, particles: &[ParticleState]) -> CascadeResult<()> {
        let dims = self.dims.ok_or(CascadeError::NotAllocated)?;
        if particles.len() != dims.count() {
            return Err(CascadeError::Allocation {
                width: dims.width,
                height: dims.height,
                reason: format!(
                    "expected {} particles, got {}",
                    dims.count(),
                    particles.len()
                ),
            });
        }
        for buffer in &mut self.buffers {
            buffer.copy_from_slice(particles);
        }
        Ok(())
    }

    /// 交换当前/下一个缓冲的角色
    pub fn swap(&mut self) {
        self.current = 1 - self.current;
    }

    pub fn dims(&self) -> Option<GridDims> {
        self.dims
    }

    pub fn current_index(&self) -> usize {
        self.current
    }

    /// 当前（只读）缓冲
    pub fn current(&self) -> &[ParticleState] {
        &self.buffers[self.current]
    }

    /// 下一个缓冲
    pub fn next(&self) -> &[ParticleState] {
        &self.buffers[1 - self.current]
    }

    /// 同时借出当前缓冲（只读）与下一个缓冲（可写）
    pub fn split(&mut self) -> (&[ParticleState], &mut [ParticleState]) {
        let [a, b] = &mut self.buffers;
        if self.current == 0 {
            (a.as_slice(), b.as_mut_slice())
        } else {
            (b.as_slice(), a.as_mut_slice())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    #[test]
    fn test_allocate_clears_both() {
        let mut buffers = StateBuffers::new();
        buffers.allocate(8, 4).unwrap();
        assert_eq!(buffers.current().len(), 32);
        assert_eq!(buffers.next().len(), 32);
        assert!(buffers.current().iter().all(|p| *p == ParticleState::default()));
        assert!(buffers.next().iter().all(|p| *p == ParticleState::default()));
    }

    #[test]
    fn test_seed_fills_both_identically() {
        let mut rng = StdRng::seed_from_u64(7);
        let mut buffers = StateBuffers::new();
        buffers.seed(16, 16, &mut rng).unwrap();

        assert_eq!(buffers.current(), buffers.next());
        for p in buffers.current() {
            assert!((0.0..=1.0).contains(&p.x));
            assert!((-SPAWN_Y_SPREAD..=SPAWN_Y_SPREAD).contains(&p.y));
            assert!((-SPAWN_VX_SPREAD..=SPAWN_VX_SPREAD).contains(&p.vx));
            assert_eq!(p.vy, 0.0);
        }
    }

    #[test]
    fn test_swap_exchanges_roles() {
        let mut buffers = StateBuffers::new();
        buffers.allocate(2, 2).unwrap();
        {
            let (_, next) = buffers.split();
            next[0] = ParticleState::new(0.5, 0.5, 0.0, 1.0);
        }
        assert_eq!(buffers.current()[0], ParticleState::default());
        buffers.swap();
        assert_eq!(buffers.current()[0], ParticleState::new(0.5, 0.5, 0.0, 1.0));
        assert_eq!(buffers.current_index(), 1);
    }

    #[test]
    fn test_load_rejects_wrong_length() {
        let mut buffers = StateBuffers::new();
        assert!(matches!(
            buffers.load(&[ParticleState::default()]),
            Err(CascadeError::NotAllocated)
        ));
        buffers.allocate(2, 2).unwrap();
        assert!(buffers.load(&[ParticleState::default()]).is_err());
    }

    #[test]
    fn test_grid_coord_round_trip() {
        let dims = GridDims::new(5, 3);
        assert_eq!(dims.count(), 15);
        assert_eq!(dims.index(4, 2), 14);
        assert_eq!(dims.coord(14), (4, 2));
        let center = dims.texel_center(0, 0);
        assert!((center.x - 0.1).abs() < 1e-6);
    }

    #[test]
    fn test_spawn_from_unit_extremes() {
        let low = ParticleState::spawn_from_unit(0.0, 0.0, 0.0);
        assert_eq!(low.y, -SPAWN_Y_SPREAD);
        assert_eq!(low.vx, -SPAWN_VX_SPREAD);
        let mid = ParticleState::spawn_from_unit(0.5, 0.5, 0.5);
        assert_eq!(mid.y, 0.0);
        assert_eq!(mid.vx, 0.0);
    }
}
