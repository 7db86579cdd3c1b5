//! 更新阶段
//!
//! 对每个网格坐标独立执行同一个纯函数 [`step_particle`]：读取当前缓冲中的状态、
//! 共享掩码和参数快照，写入下一个缓冲的同一坐标。GPU 版本见
//! `gpu::shaders::UPDATE_SHADER`，两者的算术一一对应。

use super::mask::MaskSampler;
use super::noise::{hash01, jitter, SALT_SPAWN_VX, SALT_SPAWN_X, SALT_SPAWN_Y};
use super::state::{GridDims, ParticleState};
use crate::config::PhysicsParams;
use crate::simulation::mask::MaskFrame;

/// 横向阻尼系数（每秒）
pub const LATERAL_DAMPING: f32 = 1.5;
/// 低于该 y 视为从底部落出
pub const LOWER_BOUND: f32 = 1.05;
/// 高于该 y（向上）视为逃逸
pub const UPPER_ESCAPE: f32 = -1.0;

/// 更新过程的统一参数（对应 WGSL `UpdateUniforms`）
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, bytemuck::Pod, bytemuck::Zeroable)]
pub struct UpdateUniforms {
    pub grid_width: u32,
    pub grid_height: u32,
    pub mask_width: u32,
    pub mask_height: u32,
    pub dt: f32,
    pub time: f32,
    pub gravity: f32,
    pub noise_strength: f32,
    pub threshold: f32,
    pub top_bias: f32,
    pub bounce_dampen: f32,
    pub collide: u32,
    pub invert_mask: u32,
    pub has_mask: u32,
    pub _padding: [u32; 2],
}

impl UpdateUniforms {
    /// 从参数快照构造
    pub fn new(
        params: &PhysicsParams,
        dims: GridDims,
        mask: Option<&MaskFrame>,
        dt: f32,
        time: f32,
    ) -> Self {
        let (mask_width, mask_height) = mask.map(|m| (m.width(), m.height())).unwrap_or((0, 0));
        Self {
            grid_width: dims.width,
            grid_height: dims.height,
            mask_width,
            mask_height,
            dt,
            time,
            gravity: params.gravity,
            noise_strength: params.noise_strength,
            threshold: params.threshold,
            top_bias: params.top_bias,
            bounce_dampen: params.bounce_dampen,
            collide: params.collide as u32,
            invert_mask: params.invert_mask as u32,
            has_mask: mask.is_some() as u32,
            _padding: [0; 2],
        }
    }

    /// 只有在开启碰撞且收到过掩码帧时才做碰撞
    pub fn collision_enabled(&self) -> bool {
        self.collide != 0 && self.has_mask != 0
    }

    pub fn dims(&self) -> GridDims {
        GridDims::new(self.grid_width, self.grid_height)
    }
}

/// 按出生分布重置，随机性来自 (索引, 时间) 的哈希
pub fn respawn(index: u32, time: f32) -> ParticleState {
    let tick = time.to_bits();
    ParticleState::spawn_from_unit(
        hash01(index, tick, SALT_SPAWN_X),
        hash01(index, tick, SALT_SPAWN_Y),
        hash01(index, tick, SALT_SPAWN_VX),
    )
}

/// 单个粒子的一步更新
///
/// 已经处在占用区域内的粒子（例如掩码在它周围出现）本步不做碰撞，自由下落直到
/// 离开占用区域，避免被冻结在表面内部。
pub fn step_particle(
    p: ParticleState,
    index: u32,
    mask: &MaskSampler,
    u: &UpdateUniforms,
) -> ParticleState {
    let dt = u.dt;

    // 重力
    let mut vy = p.vy + u.gravity * dt;

    // 横向抖动与阻尼
    let mut vx = p.vx + jitter(index, u.time) * u.noise_strength * dt;
    vx *= (1.0 - LATERAL_DAMPING * dt).max(0.0);

    // 顶部偏置：越靠近顶部，下落越慢
    vy -= u.top_bias * u.gravity * dt * (1.0 - p.y.clamp(0.0, 1.0));

    // 试探积分
    let mut x = p.x + vx * dt;
    let mut y = p.y + vy * dt;

    if !(0.0..=1.0).contains(&x) {
        x -= x.floor();
    }

    if u.collision_enabled() {
        let invert = u.invert_mask != 0;
        let embedded = mask.occupied(p.x, p.y, u.threshold, invert);
        if !embedded && mask.occupied(x, y, u.threshold, invert) {
            vy = -vy * u.bounce_dampen;
            y = p.y;
            // 台阶或斜面：横向位移同样被拒绝，反弹后不会停在掩码内部
            if mask.occupied(x, y, u.threshold, invert) {
                vx = -vx * u.bounce_dampen;
                x = p.x;
            }
        }
    }

    let next = ParticleState::new(x, y, vx, vy);
    if !next.is_finite() || y > LOWER_BOUND || y < UPPER_ESCAPE {
        return respawn(index, u.time);
    }
    next
}

/// CPU 并行更新阶段
///
/// 把下一个缓冲按连续区间切给若干工作线程，每个线程只写自己的区间，
/// 只读整个当前缓冲。
#[derive(Debug, Clone)]
pub struct UpdateStage {
    workers: usize,
    min_chunk: usize,
}

impl Default for UpdateStage {
    fn default() -> Self {
        Self::new()
    }
}

impl UpdateStage {
    pub fn new() -> Self {
        Self {
            workers: num_cpus::get().max(1),
            min_chunk: 4096,
        }
    }

    /// 指定工作线程数
    pub fn with_workers(workers: usize) -> Self {
        Self {
            workers: workers.max(1),
            ..Self::new()
        }
    }

    pub fn workers(&self) -> usize {
        self.workers
    }

    /// 执行一次完整更新
    pub fn run(
        &self,
        current: &[ParticleState],
        next: &mut [ParticleState],
        mask: &MaskSampler,
        uniforms: &UpdateUniforms,
    ) {
        debug_assert_eq!(current.len(), next.len());
        let total = next.len();
        let workers = self.workers.min(total / self.min_chunk).max(1);

        if workers == 1 {
            Self::run_range(0, current, next, mask, uniforms);
            return;
        }

        let chunk = total.div_ceil(workers);
        std::thread::scope(|scope| {
            for (i, out) in next.chunks_mut(chunk).enumerate() {
                scope.spawn(move || Self::run_range(i * chunk, current, out, mask, uniforms));
            }
        });
    }

    fn run_range(
        start: usize,
        current: &[ParticleState],
        out: &mut [ParticleState],
        mask: &MaskSampler,
        uniforms: &UpdateUniforms,
    ) {
        for (offset, slot) in out.iter_mut().enumerate() {
            let index = start + offset;
            *slot = step_particle(current[index], index as u32, mask, uniforms);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    fn quiet_params() -> PhysicsParams {
        PhysicsParams {
            gravity: 0.0,
            noise_strength: 0.0,
            top_bias: 0.0,
            ..Default::default()
        }
    }

    fn bottom_half_mask() -> MaskSampler {
        let mut sampler = MaskSampler::new();
        sampler.replace(Arc::new(MaskFrame::new(1, 2, vec![0.0, 1.0]).unwrap()));
        sampler
    }

    #[test]
    fn test_uniforms_layout() {
        assert_eq!(std::mem::size_of::<UpdateUniforms>(), 64);
    }

    #[test]
    fn test_gravity_only_integration() {
        let params = PhysicsParams {
            gravity: 3.5,
            collide: false,
            ..quiet_params()
        };
        let u = UpdateUniforms::new(&params, GridDims::new(1, 1), None, 0.1, 0.0);
        let p = ParticleState::new(0.5, 0.2, 0.0, 0.0);
        let next = step_particle(p, 0, &MaskSampler::new(), &u);
        assert!((next.vy - 0.35).abs() < 1e-6);
        assert!((next.y - (0.2 + 0.035)).abs() < 1e-6);
    }

    #[test]
    fn test_bounce_rejects_vertical_displacement() {
        let mask = bottom_half_mask();
        let params = PhysicsParams {
            bounce_dampen: 0.5,
            ..quiet_params()
        };
        let u = UpdateUniforms::new(&params, GridDims::new(1, 1), mask.frame().map(|f| &**f), 0.1, 0.0);
        let p = ParticleState::new(0.5, 0.45, 0.0, 2.0);
        let next = step_particle(p, 0, &mask, &u);
        assert_eq!(next.vy, -1.0);
        assert_eq!(next.y, 0.45);
    }

    #[test]
    fn test_bounce_keeps_horizontal_displacement() {
        let mask = bottom_half_mask();
        let u = UpdateUniforms::new(&quiet_params(), GridDims::new(1, 1), mask.frame().map(|f| &**f), 0.1, 0.0);
        let p = ParticleState::new(0.5, 0.45, 0.1, 2.0);
        let next = step_particle(p, 0, &mask, &u);
        assert_eq!(next.y, 0.45);
        assert!(next.x > 0.5);
    }

    #[test]
    fn test_bounce_against_step_rejects_horizontal_move() {
        // 左上空，其余占用
        let mut mask = MaskSampler::new();
        mask.replace(Arc::new(MaskFrame::new(2, 2, vec![0.0, 1.0, 1.0, 1.0]).unwrap()));
        let params = PhysicsParams {
            bounce_dampen: 0.5,
            ..quiet_params()
        };
        let u = UpdateUniforms::new(&params, GridDims::new(1, 1), mask.frame().map(|f| &**f), 0.1, 0.0);
        let p = ParticleState::new(0.45, 0.45, 1.0, 2.0);
        let next = step_particle(p, 0, &mask, &u);
        assert_eq!((next.x, next.y), (0.45, 0.45));
        assert_eq!(next.vy, -1.0);
        assert!(next.vx < 0.0);
        assert!(!mask.occupied(next.x, next.y, u.threshold, false));
    }

    #[test]
    fn test_embedded_particle_falls_freely() {
        let mask = bottom_half_mask();
        let u = UpdateUniforms::new(&quiet_params(), GridDims::new(1, 1), mask.frame().map(|f| &**f), 0.1, 0.0);
        let p = ParticleState::new(0.5, 0.7, 0.0, 1.0);
        let next = step_particle(p, 0, &mask, &u);
        assert!((next.y - 0.8).abs() < 1e-6);
        assert_eq!(next.vy, 1.0);
    }

    #[test]
    fn test_collide_flag_off_ignores_mask() {
        let mask = bottom_half_mask();
        let params = PhysicsParams {
            collide: false,
            ..quiet_params()
        };
        let u = UpdateUniforms::new(&params, GridDims::new(1, 1), mask.frame().map(|f| &**f), 0.1, 0.0);
        let next = step_particle(ParticleState::new(0.5, 0.45, 0.0, 2.0), 0, &mask, &u);
        assert!((next.y - 0.65).abs() < 1e-6);
    }

    #[test]
    fn test_falling_off_bottom_respawns() {
        let u = UpdateUniforms::new(&quiet_params(), GridDims::new(1, 1), None, 0.1, 3.0);
        let next = step_particle(ParticleState::new(0.3, 1.04, 0.0, 1.0), 9, &MaskSampler::new(), &u);
        assert_eq!(next, respawn(9, 3.0));
        assert!((-0.05..=0.05).contains(&next.y));
        assert_eq!(next.vy, 0.0);
    }

    #[test]
    fn test_non_finite_respawns() {
        let u = UpdateUniforms::new(&quiet_params(), GridDims::new(1, 1), None, 0.1, 0.0);
        let next = step_particle(ParticleState::new(0.3, 0.5, f32::NAN, 0.0), 2, &MaskSampler::new(), &u);
        assert!(next.is_finite());
        assert!((0.0..=1.0).contains(&next.x));
    }

    #[test]
    fn test_horizontal_wrap() {
        let u = UpdateUniforms::new(&quiet_params(), GridDims::new(1, 1), None, 0.1, 0.0);
        let next = step_particle(ParticleState::new(0.99, 0.5, 0.5, 0.0), 0, &MaskSampler::new(), &u);
        assert!((0.0..=1.0).contains(&next.x));
        assert!(next.x < 0.1);
    }

    #[test]
    fn test_noise_scales_linearly() {
        let dims = GridDims::new(1, 1);
        let p = ParticleState::new(0.5, 0.5, 0.0, 0.0);
        let at = |strength: f32| {
            let params = PhysicsParams {
                noise_strength: strength,
                ..quiet_params()
            };
            let u = UpdateUniforms::new(&params, dims, None, 0.05, 1.3);
            step_particle(p, 17, &MaskSampler::new(), &u).vx
        };
        let one = at(1.0);
        let two = at(2.0);
        assert!(one != 0.0);
        assert!((two - 2.0 * one).abs() < 1e-6);
        assert_eq!(at(0.0), 0.0);
    }

    #[test]
    fn test_top_bias_slows_fall_near_top() {
        let dims = GridDims::new(1, 1);
        let p = ParticleState::new(0.5, 0.0, 0.0, 0.0);
        let base = PhysicsParams {
            gravity: 3.5,
            ..quiet_params()
        };
        let biased = PhysicsParams {
            top_bias: 0.5,
            ..base
        };
        let u0 = UpdateUniforms::new(&base, dims, None, 0.1, 0.0);
        let u1 = UpdateUniforms::new(&biased, dims, None, 0.1, 0.0);
        let mask = MaskSampler::new();
        assert!(step_particle(p, 0, &mask, &u1).vy < step_particle(p, 0, &mask, &u0).vy);
    }

    #[test]
    fn test_parallel_matches_serial() {
        let dims = GridDims::new(128, 96);
        let current: Vec<ParticleState> = (0..dims.count())
            .map(|i| ParticleState::new((i % 128) as f32 / 128.0, (i / 128) as f32 / 96.0, 0.0, 0.5))
            .collect();
        let u = UpdateUniforms::new(&PhysicsParams::default(), dims, None, 1.0 / 60.0, 2.0);
        let mask = MaskSampler::new();

        let mut serial = vec![ParticleState::default(); dims.count()];
        UpdateStage::with_workers(1).run(&current, &mut serial, &mask, &u);

        let mut parallel = vec![ParticleState::default(); dims.count()];
        let stage = UpdateStage {
            workers: 4,
            min_chunk: 1024,
        };
        stage.run(&current, &mut parallel, &mask, &u);

        assert_eq!(serial, parallel);
    }
}
