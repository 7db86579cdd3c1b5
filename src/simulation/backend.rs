//! 模拟后端
//!
//! 更新规则与设备无关，后端负责把它绑定到具体的并行设施上：
//! [`CpuBackend`] 用线程切分坐标区间，`gpu::GpuBackend` 用 wgpu 计算管线。

use super::mask::{MaskFrame, MaskSampler};
use super::state::{GridDims, ParticleState, StateBuffers};
use super::update::{UpdateStage, UpdateUniforms};
use crate::core::error::{CascadeError, CascadeResult};
use std::sync::Arc;

/// 并行设备上的状态缓冲与更新程序
pub trait SimulationBackend {
    /// 后端名称（用于日志）
    fn name(&self) -> &'static str;

    /// 初始化更新/渲染程序；失败意味着缺少计算程序
    fn prepare(&mut self) -> CascadeResult<()>;

    /// 分配两个同尺寸、已清零的状态缓冲；是同步点，旧缓冲上的过程必须先完成
    fn allocate(&mut self, dims: GridDims) -> CascadeResult<()>;

    /// 把同一份状态写入两个缓冲
    fn load(&mut self, particles: &[ParticleState]) -> CascadeResult<()>;

    /// 新掩码帧到达时调用
    fn upload_mask(&mut self, _frame: &Arc<MaskFrame>) -> CascadeResult<()> {
        Ok(())
    }

    /// 执行一次完整更新并交换缓冲角色
    fn update(&mut self, mask: &MaskSampler, uniforms: &UpdateUniforms) -> CascadeResult<()>;

    /// 读取当前缓冲
    fn snapshot(&self) -> CascadeResult<Vec<ParticleState>>;

    /// 当前分配的网格尺寸
    fn dims(&self) -> Option<GridDims>;
}

/// CPU 后端
#[derive(Debug, Default)]
pub struct CpuBackend {
    buffers: StateBuffers,
    stage: UpdateStage,
}

impl CpuBackend {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_stage(stage: UpdateStage) -> Self {
        Self {
            buffers: StateBuffers::new(),
            stage,
        }
    }

    pub fn buffers(&self) -> &StateBuffers {
        &self.buffers
    }
}

impl SimulationBackend for CpuBackend {
    fn name(&self) -> &'static str {
        "cpu"
    }

    fn prepare(&mut self) -> CascadeResult<()> {
        Ok(())
    }

    fn allocate(&mut self, dims: GridDims) -> CascadeResult<()> {
        self.buffers.allocate(dims.width, dims.height)
    }

    fn load(&mut self, particles: &[ParticleState]) -> CascadeResult<()> {
        self.buffers.load(particles)
    }

    fn update(&mut self, mask: &MaskSampler, uniforms: &UpdateUniforms) -> CascadeResult<()> {
        if self.buffers.dims().is_none() {
            return Err(CascadeError::NotAllocated);
        }
        let (current, next) = self.buffers.split();
        self.stage.run(current, next, mask, uniforms);
        self.buffers.swap();
        Ok(())
    }

    fn snapshot(&self) -> CascadeResult<Vec<ParticleState>> {
        if self.buffers.dims().is_none() {
            return Err(CascadeError::NotAllocated);
        }
        Ok(self.buffers.current().to_vec())
    }

    fn dims(&self) -> Option<GridDims> {
        self.buffers.dims()
    }
}
