//! 渲染：图元生成与 CPU 合成
//!
//! GPU 侧的等价实现见 [`crate::gpu`]。

pub mod canvas;
pub mod primitive;

pub use canvas::{Canvas, CompositeSettings, Compositor, Frame};
pub use primitive::{
    emit_primitive, primitive_size, Primitive, PrimitiveShape, RenderStage, RenderUniforms,
};
