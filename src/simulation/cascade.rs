//! 模拟核心门面
//!
//! 每帧的顺序：掩码接入（如有新帧）→ 分辨率同步 → 更新过程 → （调用方）渲染。
//! 对控制循环只返回布尔值或 [`CascadeStatus`]，不会让进程退出。

use super::backend::{CpuBackend, SimulationBackend};
use super::mask::{MaskFrame, MaskReceiver, MaskSampler};
use super::resolution::{ResolutionManager, Viewport};
use super::state::{seed_particles, GridDims, ParticleState};
use super::update::UpdateUniforms;
use crate::config::grid::DENSITY_MIN;
use crate::config::{GridConfig, PhysicsParams};
use crate::core::error::{CascadeError, CascadeResult, CascadeStatus, NotReadyReason};
use crate::render::primitive::{Primitive, RenderStage, RenderUniforms};
use rand::rngs::StdRng;
use rand::SeedableRng;
use std::sync::Arc;
use std::time::Instant;

/// 运行统计
#[derive(Debug, Default, Clone, Copy, PartialEq)]
pub struct CascadeStats {
    /// 已完成的更新次数
    pub updates: u64,
    /// 重新分配次数
    pub reallocations: u64,
    /// 收到的掩码帧数
    pub mask_frames: u64,
    /// 上一次更新耗时（毫秒）
    pub last_update_ms: f32,
}

/// 单帧输入
#[derive(Debug, Clone)]
pub struct FrameInputs {
    pub viewport: Viewport,
    pub density: f32,
    pub dt: f32,
    pub params: PhysicsParams,
    /// 本帧到达的新掩码帧（一次性事件）
    pub mask: Option<Arc<MaskFrame>>,
}

/// 粒子瀑布模拟核心
pub struct Cascade<B: SimulationBackend = CpuBackend> {
    backend: B,
    resolution: ResolutionManager,
    mask: MaskSampler,
    status: CascadeStatus,
    programs_ready: bool,
    program_error_reported: bool,
    rng: StdRng,
    time: f32,
    stats: CascadeStats,
}

impl Cascade<CpuBackend> {
    /// 使用 CPU 后端
    pub fn cpu(grid: GridConfig) -> Self {
        Self::new(CpuBackend::new(), grid)
    }
}

impl<B: SimulationBackend> Cascade<B> {
    /// 创建核心并初始化计算程序
    pub fn new(backend: B, grid: GridConfig) -> Self {
        let rng = match grid.seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_entropy(),
        };
        let mut cascade = Self {
            backend,
            resolution: ResolutionManager::new(grid),
            mask: MaskSampler::new(),
            status: CascadeStatus::NotReady(NotReadyReason::Unallocated),
            programs_ready: false,
            program_error_reported: false,
            rng,
            time: 0.0,
            stats: CascadeStats::default(),
        };
        cascade.setup();
        cascade
    }

    /// （重新）初始化计算程序
    ///
    /// 程序缺失时核心永久保持未就绪，只记录一次日志，直到再次调用本方法。
    pub fn setup(&mut self) -> bool {
        self.program_error_reported = false;
        match self.backend.prepare() {
            Ok(()) => {
                self.programs_ready = true;
                self.status = match self.resolution.dims() {
                    Some(_) => CascadeStatus::Ready,
                    None => CascadeStatus::NotReady(NotReadyReason::Unallocated),
                };
                tracing::info!(target: "cascade", "{} programs loaded", self.backend.name());
                true
            }
            Err(e) => {
                self.programs_ready = false;
                self.status = CascadeStatus::NotReady(NotReadyReason::MissingProgram);
                self.report_program_error(&e);
                false
            }
        }
    }

    fn report_program_error(&mut self, error: &CascadeError) {
        if !self.program_error_reported {
            tracing::error!(target: "cascade", "Programs failed to load: {}", error);
            self.program_error_reported = true;
        }
    }

    /// 接入新掩码帧（整体替换）
    pub fn ingest_mask(&mut self, frame: Arc<MaskFrame>) {
        if let Err(e) = self.backend.upload_mask(&frame) {
            tracing::warn!(target: "mask", "Mask upload failed: {}", e);
        }
        self.mask.replace(frame);
        self.stats.mask_frames += 1;
    }

    /// 从接入通道取最新一帧；返回是否有新帧
    pub fn poll_mask(&mut self, feed: &MaskReceiver) -> bool {
        match feed.latest() {
            Some(frame) => {
                self.ingest_mask(frame);
                true
            }
            None => false,
        }
    }

    /// 根据视口与密度同步网格；返回本次是否重新分配
    pub fn sync_resolution(&mut self, viewport: Viewport, density: f32) -> bool {
        if !self.programs_ready {
            return false;
        }
        let Some(dims) = self.resolution.plan(viewport, density) else {
            return false;
        };

        match self.reallocate(dims) {
            Ok(()) => {
                self.resolution.commit(dims, viewport, density);
                self.status = CascadeStatus::Ready;
                self.stats.reallocations += 1;
                tracing::info!(
                    target: "cascade",
                    "Particles initialized: {} ({} particles, density {:.3})",
                    dims,
                    dims.count(),
                    density
                );
                true
            }
            Err(e) => {
                self.resolution.reset();
                self.status = match e.not_ready_reason() {
                    Some(NotReadyReason::MissingProgram) => {
                        self.programs_ready = false;
                        self.report_program_error(&e);
                        CascadeStatus::NotReady(NotReadyReason::MissingProgram)
                    }
                    _ => CascadeStatus::NotReady(NotReadyReason::AllocationFailed),
                };
                tracing::warn!(target: "cascade", "Reallocation to {} failed: {}", dims, e);
                false
            }
        }
    }

    fn reallocate(&mut self, dims: GridDims) -> CascadeResult<()> {
        self.backend.allocate(dims)?;
        let particles = seed_particles(dims, &mut self.rng);
        self.backend.load(&particles)
    }

    /// 不改变分辨率地重新播种
    pub fn reseed(&mut self) -> bool {
        let Some(dims) = self.resolution.dims() else {
            return false;
        };
        let particles = seed_particles(dims, &mut self.rng);
        match self.backend.load(&particles) {
            Ok(()) => true,
            Err(e) => {
                tracing::warn!(target: "cascade", "Reseed failed: {}", e);
                false
            }
        }
    }

    /// 推进一次更新；`dt` 钳制到 `[0, max_dt]`
    pub fn step(&mut self, dt: f32, params: &PhysicsParams) -> bool {
        if !self.status.is_ready() {
            return false;
        }
        let Some(dims) = self.resolution.dims() else {
            return false;
        };

        // 直接构造的 GridConfig 未经校验，非法上限退回默认值
        let max_dt = match self.resolution.limits().max_dt {
            limit if limit > 0.0 && limit.is_finite() => limit,
            _ => GridConfig::default().max_dt,
        };
        let dt = if dt.is_finite() {
            dt.clamp(0.0, max_dt)
        } else {
            0.0
        };
        self.time += dt;

        let uniforms = UpdateUniforms::new(
            params,
            dims,
            self.mask.frame().map(|frame| &**frame),
            dt,
            self.time,
        );

        let started = Instant::now();
        match self.backend.update(&self.mask, &uniforms) {
            Ok(()) => {
                self.stats.updates += 1;
                self.stats.last_update_ms = started.elapsed().as_secs_f32() * 1000.0;
                true
            }
            Err(e) => {
                tracing::warn!(target: "cascade", "Update failed: {}", e);
                false
            }
        }
    }

    /// 按固定顺序执行一帧：掩码接入 → 分辨率同步 → 更新
    pub fn frame(&mut self, inputs: FrameInputs) -> CascadeStatus {
        if let Some(frame) = inputs.mask {
            self.ingest_mask(frame);
        }
        self.sync_resolution(inputs.viewport, inputs.density);
        self.step(inputs.dt, &inputs.params);
        self.status
    }

    /// 读取当前缓冲
    pub fn snapshot(&self) -> CascadeResult<Vec<ParticleState>> {
        self.backend.snapshot()
    }

    /// 渲染阶段（CPU）：每个粒子一个屏幕空间图元；未就绪时为空
    pub fn primitives(&self, viewport: Viewport, params: &PhysicsParams) -> Vec<Primitive> {
        let Some(dims) = self.grid_dimensions() else {
            return Vec::new();
        };
        if !self.status.is_ready() {
            return Vec::new();
        }
        match self.backend.snapshot() {
            Ok(particles) => {
                RenderStage::run(&particles, &RenderUniforms::new(params, dims, viewport))
            }
            Err(e) => {
                tracing::warn!(target: "cascade", "Snapshot failed: {}", e);
                Vec::new()
            }
        }
    }

    /// 降级密度建议：分配失败后调用方可用更低密度重试
    pub fn fallback_density(&self, density: f32) -> f32 {
        (density * 0.5).max(DENSITY_MIN)
    }

    pub fn particle_count(&self) -> usize {
        self.grid_dimensions().map(|d| d.count()).unwrap_or(0)
    }

    pub fn grid_dimensions(&self) -> Option<GridDims> {
        self.resolution.dims()
    }

    pub fn is_ready(&self) -> bool {
        self.status.is_ready()
    }

    pub fn status(&self) -> CascadeStatus {
        self.status
    }

    pub fn stats(&self) -> CascadeStats {
        self.stats
    }

    /// 模拟时间（秒），驱动抖动噪声
    pub fn time(&self) -> f32 {
        self.time
    }

    pub fn mask(&self) -> &MaskSampler {
        &self.mask
    }

    pub fn backend(&self) -> &B {
        &self.backend
    }

    pub fn backend_mut(&mut self) -> &mut B {
        &mut self.backend
    }
}
