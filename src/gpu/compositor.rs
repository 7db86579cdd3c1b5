//! GPU 合成器
//!
//! 与 CPU 的 [`Compositor`](crate::render::Compositor) 相同的层次：
//! 拖尾（先衰减再画入粒子）→ 新鲜粒子 → 掩码相加。

use super::backend::GpuBackend;
use super::offscreen::OffscreenTarget;
use super::shaders::{COMPOSITE_SHADER, RENDER_SHADER};
use super::{with_error_scope, GpuContext};
use crate::config::PhysicsParams;
use crate::core::error::{CascadeError, CascadeResult};
use crate::render::{CompositeSettings, Frame, RenderUniforms};
use crate::simulation::backend::SimulationBackend;
use crate::simulation::mask::MaskFrame;
use crate::simulation::resolution::Viewport;
use wgpu::util::DeviceExt;

/// 合成程序的统一参数（对应 WGSL `CompositeUniforms`）
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, bytemuck::Pod, bytemuck::Zeroable)]
pub struct CompositeUniforms {
    pub tint: [f32; 4],
    pub mode: u32,
    pub _padding: [u32; 3],
}

impl CompositeUniforms {
    const MODE_SOLID: u32 = 0;
    const MODE_RGBA: u32 = 1;
    const MODE_LUMA: u32 = 2;

    fn solid(color: [f32; 4]) -> Self {
        Self {
            tint: color,
            mode: Self::MODE_SOLID,
            _padding: [0; 3],
        }
    }

    fn texture(tint: [f32; 4], mode: u32) -> Self {
        Self {
            tint,
            mode,
            _padding: [0; 3],
        }
    }
}

/// 输出类型
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputKind {
    /// 显示输出：掩码按 `mask_alpha` 叠加，可关闭
    Display,
    /// 网络输出：掩码总是全不透明度
    Network,
}

struct MaskTexture {
    texture: wgpu::Texture,
    view: wgpu::TextureView,
    width: u32,
    height: u32,
}

/// GPU 合成器
pub struct GpuCompositor {
    format: wgpu::TextureFormat,
    particle_layout: wgpu::BindGroupLayout,
    particle_pipeline: wgpu::RenderPipeline,
    render_uniforms: wgpu::Buffer,
    composite_layout: wgpu::BindGroupLayout,
    fade_pipeline: wgpu::RenderPipeline,
    copy_pipeline: wgpu::RenderPipeline,
    add_pipeline: wgpu::RenderPipeline,
    sampler: wgpu::Sampler,
    _dummy: wgpu::Texture,
    dummy_view: wgpu::TextureView,
    mask: Option<MaskTexture>,
    trail: Option<OffscreenTarget>,
    trail_needs_clear: bool,
    output: Option<OffscreenTarget>,
}

impl GpuCompositor {
    /// 创建合成器；程序编译失败返回 `MissingProgram`
    ///
    /// # 参数
    /// - `format`: 所有输出目标（拖尾、surface、离屏输出）共用的颜色格式
    pub fn new(context: &GpuContext, format: wgpu::TextureFormat) -> CascadeResult<Self> {
        let device = &context.device;
        with_error_scope(
            device,
            wgpu::ErrorFilter::Validation,
            || Self::create(device, &context.queue, format),
            CascadeError::MissingProgram,
        )
    }

    fn create(device: &wgpu::Device, queue: &wgpu::Queue, format: wgpu::TextureFormat) -> Self {
        let uniform_entry = |visibility| wgpu::BindGroupLayoutEntry {
            binding: 0,
            visibility,
            ty: wgpu::BindingType::Buffer {
                ty: wgpu::BufferBindingType::Uniform,
                has_dynamic_offset: false,
                min_binding_size: None,
            },
            count: None,
        };

        // 粒子程序
        let particle_layout = device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
            label: Some("Cascade Particle BGL"),
            entries: &[
                uniform_entry(wgpu::ShaderStages::VERTEX_FRAGMENT),
                wgpu::BindGroupLayoutEntry {
                    binding: 1,
                    visibility: wgpu::ShaderStages::VERTEX,
                    ty: wgpu::BindingType::Buffer {
                        ty: wgpu::BufferBindingType::Storage { read_only: true },
                        has_dynamic_offset: false,
                        min_binding_size: None,
                    },
                    count: None,
                },
            ],
        });
        let particle_shader = device.create_shader_module(wgpu::ShaderModuleDescriptor {
            label: Some("Cascade Render Shader"),
            source: wgpu::ShaderSource::Wgsl(RENDER_SHADER.into()),
        });
        let particle_pipeline = Self::pipeline(
            device,
            "Cascade Particle Pipeline",
            &particle_layout,
            &particle_shader,
            format,
            wgpu::BlendState::ALPHA_BLENDING,
        );
        let render_uniforms = device.create_buffer(&wgpu::BufferDescriptor {
            label: Some("Cascade Render Uniforms"),
            size: std::mem::size_of::<RenderUniforms>() as wgpu::BufferAddress,
            usage: wgpu::BufferUsages::UNIFORM | wgpu::BufferUsages::COPY_DST,
            mapped_at_creation: false,
        });

        // 合成程序
        let composite_layout = device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
            label: Some("Cascade Composite BGL"),
            entries: &[
                uniform_entry(wgpu::ShaderStages::FRAGMENT),
                wgpu::BindGroupLayoutEntry {
                    binding: 1,
                    visibility: wgpu::ShaderStages::FRAGMENT,
                    ty: wgpu::BindingType::Texture {
                        sample_type: wgpu::TextureSampleType::Float { filterable: true },
                        view_dimension: wgpu::TextureViewDimension::D2,
                        multisampled: false,
                    },
                    count: None,
                },
                wgpu::BindGroupLayoutEntry {
                    binding: 2,
                    visibility: wgpu::ShaderStages::FRAGMENT,
                    ty: wgpu::BindingType::Sampler(wgpu::SamplerBindingType::Filtering),
                    count: None,
                },
            ],
        });
        let composite_shader = device.create_shader_module(wgpu::ShaderModuleDescriptor {
            label: Some("Cascade Composite Shader"),
            source: wgpu::ShaderSource::Wgsl(COMPOSITE_SHADER.into()),
        });
        let additive = wgpu::BlendState {
            color: wgpu::BlendComponent {
                src_factor: wgpu::BlendFactor::One,
                dst_factor: wgpu::BlendFactor::One,
                operation: wgpu::BlendOperation::Add,
            },
            alpha: wgpu::BlendComponent::OVER,
        };
        let fade_pipeline = Self::pipeline(
            device,
            "Cascade Fade Pipeline",
            &composite_layout,
            &composite_shader,
            format,
            wgpu::BlendState::ALPHA_BLENDING,
        );
        let copy_pipeline = Self::pipeline(
            device,
            "Cascade Copy Pipeline",
            &composite_layout,
            &composite_shader,
            format,
            wgpu::BlendState::REPLACE,
        );
        let add_pipeline = Self::pipeline(
            device,
            "Cascade Mask Pipeline",
            &composite_layout,
            &composite_shader,
            format,
            additive,
        );

        let sampler = device.create_sampler(&wgpu::SamplerDescriptor {
            label: Some("Cascade Composite Sampler"),
            address_mode_u: wgpu::AddressMode::ClampToEdge,
            address_mode_v: wgpu::AddressMode::ClampToEdge,
            mag_filter: wgpu::FilterMode::Linear,
            min_filter: wgpu::FilterMode::Linear,
            ..Default::default()
        });

        let (dummy, dummy_view) = Self::luma_texture(device, queue, "Cascade Dummy", 1, 1, &[0]);

        Self {
            format,
            particle_layout,
            particle_pipeline,
            render_uniforms,
            composite_layout,
            fade_pipeline,
            copy_pipeline,
            add_pipeline,
            sampler,
            _dummy: dummy,
            dummy_view,
            mask: None,
            trail: None,
            trail_needs_clear: true,
            output: None,
        }
    }

    fn pipeline(
        device: &wgpu::Device,
        label: &str,
        layout: &wgpu::BindGroupLayout,
        shader: &wgpu::ShaderModule,
        format: wgpu::TextureFormat,
        blend: wgpu::BlendState,
    ) -> wgpu::RenderPipeline {
        let pipeline_layout = device.create_pipeline_layout(&wgpu::PipelineLayoutDescriptor {
            label: Some(label),
            bind_group_layouts: &[layout],
            push_constant_ranges: &[],
        });
        device.create_render_pipeline(&wgpu::RenderPipelineDescriptor {
            label: Some(label),
            layout: Some(&pipeline_layout),
            vertex: wgpu::VertexState {
                module: shader,
                entry_point: "vs_main",
                buffers: &[],
                compilation_options: wgpu::PipelineCompilationOptions::default(),
            },
            fragment: Some(wgpu::FragmentState {
                module: shader,
                entry_point: "fs_main",
                targets: &[Some(wgpu::ColorTargetState {
                    format,
                    blend: Some(blend),
                    write_mask: wgpu::ColorWrites::ALL,
                })],
                compilation_options: wgpu::PipelineCompilationOptions::default(),
            }),
            primitive: wgpu::PrimitiveState {
                topology: wgpu::PrimitiveTopology::TriangleList,
                cull_mode: None,
                ..Default::default()
            },
            depth_stencil: None,
            multisample: wgpu::MultisampleState::default(),
            multiview: None,
        })
    }

    fn luma_texture(
        device: &wgpu::Device,
        queue: &wgpu::Queue,
        label: &str,
        width: u32,
        height: u32,
        data: &[u8],
    ) -> (wgpu::Texture, wgpu::TextureView) {
        let size = wgpu::Extent3d {
            width,
            height,
            depth_or_array_layers: 1,
        };
        let texture = device.create_texture(&wgpu::TextureDescriptor {
            label: Some(label),
            size,
            mip_level_count: 1,
            sample_count: 1,
            dimension: wgpu::TextureDimension::D2,
            format: wgpu::TextureFormat::R8Unorm,
            usage: wgpu::TextureUsages::TEXTURE_BINDING | wgpu::TextureUsages::COPY_DST,
            view_formats: &[],
        });
        queue.write_texture(
            wgpu::ImageCopyTexture {
                texture: &texture,
                mip_level: 0,
                origin: wgpu::Origin3d::ZERO,
                aspect: wgpu::TextureAspect::All,
            },
            data,
            wgpu::ImageDataLayout {
                offset: 0,
                bytes_per_row: Some(width),
                rows_per_image: Some(height),
            },
            size,
        );
        let view = texture.create_view(&wgpu::TextureViewDescriptor::default());
        (texture, view)
    }

    pub fn format(&self) -> wgpu::TextureFormat {
        self.format
    }

    /// 视口变化时重建拖尾缓冲
    pub fn resize(&mut self, device: &wgpu::Device, viewport: Viewport) {
        match self.trail.as_mut() {
            Some(trail) => {
                if trail.resize(device, viewport.width, viewport.height) {
                    self.trail_needs_clear = true;
                }
            }
            None => {
                self.trail = Some(OffscreenTarget::new(
                    device,
                    viewport.width,
                    viewport.height,
                    self.format,
                ));
                self.trail_needs_clear = true;
            }
        }
    }

    /// 上传新的掩码帧
    pub fn upload_mask(&mut self, context: &GpuContext, frame: &MaskFrame) {
        let data: Vec<u8> = frame
            .values()
            .iter()
            .map(|v| (v * 255.0).round() as u8)
            .collect();

        if let Some(mask) = self
            .mask
            .as_ref()
            .filter(|m| m.width == frame.width() && m.height == frame.height())
        {
            context.queue.write_texture(
                wgpu::ImageCopyTexture {
                    texture: &mask.texture,
                    mip_level: 0,
                    origin: wgpu::Origin3d::ZERO,
                    aspect: wgpu::TextureAspect::All,
                },
                &data,
                wgpu::ImageDataLayout {
                    offset: 0,
                    bytes_per_row: Some(frame.width()),
                    rows_per_image: Some(frame.height()),
                },
                wgpu::Extent3d {
                    width: frame.width(),
                    height: frame.height(),
                    depth_or_array_layers: 1,
                },
            );
            return;
        }

        let (texture, view) = Self::luma_texture(
            &context.device,
            &context.queue,
            "Cascade Mask Texture",
            frame.width(),
            frame.height(),
            &data,
        );
        self.mask = Some(MaskTexture {
            texture,
            view,
            width: frame.width(),
            height: frame.height(),
        });
    }

    fn composite_bind_group(
        &self,
        device: &wgpu::Device,
        uniforms: CompositeUniforms,
        view: &wgpu::TextureView,
    ) -> wgpu::BindGroup {
        let buffer = device.create_buffer_init(&wgpu::util::BufferInitDescriptor {
            label: Some("Cascade Composite Uniforms"),
            contents: bytemuck::bytes_of(&uniforms),
            usage: wgpu::BufferUsages::UNIFORM,
        });
        device.create_bind_group(&wgpu::BindGroupDescriptor {
            label: Some("Cascade Composite BG"),
            layout: &self.composite_layout,
            entries: &[
                wgpu::BindGroupEntry {
                    binding: 0,
                    resource: buffer.as_entire_binding(),
                },
                wgpu::BindGroupEntry {
                    binding: 1,
                    resource: wgpu::BindingResource::TextureView(view),
                },
                wgpu::BindGroupEntry {
                    binding: 2,
                    resource: wgpu::BindingResource::Sampler(&self.sampler),
                },
            ],
        })
    }

    /// 粒子绑定组与实例数；后端未分配时为 `None`
    fn particle_bind_group(
        &self,
        context: &GpuContext,
        backend: &GpuBackend,
        params: &PhysicsParams,
        viewport: Viewport,
    ) -> Option<(wgpu::BindGroup, u32)> {
        let dims = backend.dims()?;
        let buffer = backend.current_buffer()?;
        let uniforms = RenderUniforms::new(params, dims, viewport);
        context
            .queue
            .write_buffer(&self.render_uniforms, 0, bytemuck::bytes_of(&uniforms));
        let bind_group = context.device.create_bind_group(&wgpu::BindGroupDescriptor {
            label: Some("Cascade Particle BG"),
            layout: &self.particle_layout,
            entries: &[
                wgpu::BindGroupEntry {
                    binding: 0,
                    resource: self.render_uniforms.as_entire_binding(),
                },
                wgpu::BindGroupEntry {
                    binding: 1,
                    resource: buffer.as_entire_binding(),
                },
            ],
        });
        Some((bind_group, dims.count() as u32))
    }

    /// 衰减拖尾并画入本帧粒子
    pub fn advance_trail(
        &mut self,
        context: &GpuContext,
        encoder: &mut wgpu::CommandEncoder,
        backend: &GpuBackend,
        params: &PhysicsParams,
        trail_fade: f32,
    ) {
        let Some(trail) = self.trail.as_ref() else {
            return;
        };
        let viewport = trail.viewport();
        let fade = self.composite_bind_group(
            &context.device,
            CompositeUniforms::solid([0.0, 0.0, 0.0, trail_fade.clamp(0.0, 1.0)]),
            &self.dummy_view,
        );
        let particles = self.particle_bind_group(context, backend, params, viewport);

        let load = if self.trail_needs_clear {
            wgpu::LoadOp::Clear(wgpu::Color::BLACK)
        } else {
            wgpu::LoadOp::Load
        };
        {
            let mut pass = encoder.begin_render_pass(&wgpu::RenderPassDescriptor {
                label: Some("Cascade Trail Pass"),
                color_attachments: &[Some(wgpu::RenderPassColorAttachment {
                    view: &trail.view,
                    resolve_target: None,
                    ops: wgpu::Operations {
                        load,
                        store: wgpu::StoreOp::Store,
                    },
                })],
                depth_stencil_attachment: None,
                timestamp_writes: None,
                occlusion_query_set: None,
            });
            pass.set_pipeline(&self.fade_pipeline);
            pass.set_bind_group(0, &fade, &[]);
            pass.draw(0..3, 0..1);

            if let Some((bind_group, count)) = particles.as_ref() {
                pass.set_pipeline(&self.particle_pipeline);
                pass.set_bind_group(0, bind_group, &[]);
                pass.draw(0..6, 0..*count);
            }
        }
        self.trail_needs_clear = false;
    }

    /// 把某种输出合成到 `target`
    #[allow(clippy::too_many_arguments)]
    pub fn encode_output(
        &self,
        context: &GpuContext,
        encoder: &mut wgpu::CommandEncoder,
        target: &wgpu::TextureView,
        viewport: Viewport,
        backend: &GpuBackend,
        params: &PhysicsParams,
        kind: OutputKind,
        settings: &CompositeSettings,
    ) {
        let device = &context.device;
        let trail = self.trail.as_ref().map(|trail| {
            self.composite_bind_group(
                device,
                CompositeUniforms::texture([1.0; 4], CompositeUniforms::MODE_RGBA),
                &trail.view,
            )
        });
        let particles = self.particle_bind_group(context, backend, params, viewport);
        let mask_alpha = match kind {
            OutputKind::Display if settings.show_mask => Some(settings.mask_alpha),
            OutputKind::Display => None,
            OutputKind::Network => Some(1.0),
        };
        let mask = match (self.mask.as_ref(), mask_alpha) {
            (Some(mask), Some(alpha)) => Some(self.composite_bind_group(
                device,
                CompositeUniforms::texture([alpha, alpha, alpha, 1.0], CompositeUniforms::MODE_LUMA),
                &mask.view,
            )),
            _ => None,
        };

        let mut pass = encoder.begin_render_pass(&wgpu::RenderPassDescriptor {
            label: Some("Cascade Output Pass"),
            color_attachments: &[Some(wgpu::RenderPassColorAttachment {
                view: target,
                resolve_target: None,
                ops: wgpu::Operations {
                    load: wgpu::LoadOp::Clear(wgpu::Color::BLACK),
                    store: wgpu::StoreOp::Store,
                },
            })],
            depth_stencil_attachment: None,
            timestamp_writes: None,
            occlusion_query_set: None,
        });

        if let Some(bind_group) = trail.as_ref() {
            pass.set_pipeline(&self.copy_pipeline);
            pass.set_bind_group(0, bind_group, &[]);
            pass.draw(0..3, 0..1);
        }
        if let Some((bind_group, count)) = particles.as_ref() {
            pass.set_pipeline(&self.particle_pipeline);
            pass.set_bind_group(0, bind_group, &[]);
            pass.draw(0..6, 0..*count);
        }
        if let Some(bind_group) = mask.as_ref() {
            pass.set_pipeline(&self.add_pipeline);
            pass.set_bind_group(0, bind_group, &[]);
            pass.draw(0..3, 0..1);
        }
    }

    /// 渲染一帧到离屏目标并回读（网络输出用）
    pub fn render_frame(
        &mut self,
        context: &GpuContext,
        backend: &GpuBackend,
        params: &PhysicsParams,
        kind: OutputKind,
        settings: &CompositeSettings,
    ) -> CascadeResult<Frame> {
        let viewport = self
            .trail
            .as_ref()
            .map(|t| t.viewport())
            .ok_or(CascadeError::NotAllocated)?;

        match self.output.as_mut() {
            Some(output) => {
                output.resize(&context.device, viewport.width, viewport.height);
            }
            None => {
                self.output = Some(OffscreenTarget::new(
                    &context.device,
                    viewport.width,
                    viewport.height,
                    self.format,
                ));
            }
        }
        let output = self.output.as_ref().ok_or(CascadeError::NotAllocated)?;

        let mut encoder = context
            .device
            .create_command_encoder(&wgpu::CommandEncoderDescriptor {
                label: Some("Cascade Frame Encoder"),
            });
        self.encode_output(
            context,
            &mut encoder,
            &output.view,
            viewport,
            backend,
            params,
            kind,
            settings,
        );
        context.queue.submit(Some(encoder.finish()));
        output.read_frame(&context.device, &context.queue)
    }
}
