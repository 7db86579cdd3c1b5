//! 渲染阶段：粒子状态 → 屏幕空间图元
//!
//! 纯读取过程，不修改模拟状态，每次更新后可以运行任意多次（拖尾、前景、网络输出）。

use crate::config::PhysicsParams;
use crate::simulation::resolution::Viewport;
use crate::simulation::state::{GridDims, ParticleState};
use glam::Vec2;

/// 收缩后的最小尺寸（像素）
pub const MIN_PRIMITIVE_SIZE: f32 = 0.5;

/// 渲染过程的统一参数（对应 WGSL `RenderUniforms`）
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, bytemuck::Pod, bytemuck::Zeroable)]
pub struct RenderUniforms {
    pub grid_width: u32,
    pub grid_height: u32,
    pub viewport_width: f32,
    pub viewport_height: f32,
    pub point_size: f32,
    pub shrink_strength: f32,
    pub render_squares: u32,
    pub _padding: u32,
}

impl RenderUniforms {
    pub fn new(params: &PhysicsParams, dims: GridDims, viewport: Viewport) -> Self {
        Self {
            grid_width: dims.width,
            grid_height: dims.height,
            viewport_width: viewport.width as f32,
            viewport_height: viewport.height as f32,
            point_size: params.point_size,
            shrink_strength: params.shrink_strength,
            render_squares: params.render_squares as u32,
            _padding: 0,
        }
    }

    pub fn shape(&self) -> PrimitiveShape {
        if self.render_squares != 0 {
            PrimitiveShape::Square
        } else {
            PrimitiveShape::Disc
        }
    }
}

/// 图元形状
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PrimitiveShape {
    Disc,
    Square,
}

/// 屏幕空间图元
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Primitive {
    /// 中心（像素）
    pub center: Vec2,
    /// 边长或直径（像素）
    pub size: f32,
    pub shape: PrimitiveShape,
}

impl Primitive {
    pub fn radius(&self) -> f32 {
        self.size * 0.5
    }

    /// 像素坐标 (px, py) 是否被覆盖
    pub fn covers(&self, px: f32, py: f32) -> bool {
        let d = Vec2::new(px, py) - self.center;
        let r = self.radius();
        match self.shape {
            PrimitiveShape::Disc => d.length_squared() <= r * r,
            PrimitiveShape::Square => d.x.abs() <= r && d.y.abs() <= r,
        }
    }
}

/// 随下落收缩的尺寸
///
/// `max(0.5, point_size * (1 - shrink * clamp(y, 0, 1)))`
pub fn primitive_size(y: f32, point_size: f32, shrink_strength: f32) -> f32 {
    (point_size * (1.0 - shrink_strength * y.clamp(0.0, 1.0))).max(MIN_PRIMITIVE_SIZE)
}

/// 单个粒子的图元
pub fn emit_primitive(state: &ParticleState, u: &RenderUniforms) -> Primitive {
    Primitive {
        center: Vec2::new(state.x * u.viewport_width, state.y * u.viewport_height),
        size: primitive_size(state.y, u.point_size, u.shrink_strength),
        shape: u.shape(),
    }
}

/// CPU 渲染阶段
pub struct RenderStage;

impl RenderStage {
    /// 每个网格坐标一个图元，顺序与缓冲一致
    pub fn run(particles: &[ParticleState], uniforms: &RenderUniforms) -> Vec<Primitive> {
        particles
            .iter()
            .map(|p| emit_primitive(p, uniforms))
            .collect()
    }
}
