//! 粒子瀑布模拟核心
//!
//! - [`state`]: 粒子状态与乒乓缓冲
//! - [`mask`]: 占用掩码与帧接入
//! - [`noise`]: 确定性哈希噪声
//! - [`update`]: 逐粒子更新规则与 CPU 并行阶段
//! - [`resolution`]: 网格尺寸与生命周期
//! - [`backend`]: 设备后端抽象
//! - [`cascade`]: 对外门面

pub mod backend;
pub mod cascade;
pub mod mask;
pub mod noise;
pub mod resolution;
pub mod state;
pub mod update;

pub use backend::{CpuBackend, SimulationBackend};
pub use cascade::{Cascade, CascadeStats, FrameInputs};
pub use mask::{spawn_image_sequence, MaskFeed, MaskFrame, MaskReceiver, MaskSampler, MaskSender};
pub use resolution::{compute_grid_dims, ResolutionManager, ResolutionState, Viewport};
pub use state::{seed_particles, GridDims, ParticleState, StateBuffers};
pub use update::{respawn, step_particle, UpdateStage, UpdateUniforms};
