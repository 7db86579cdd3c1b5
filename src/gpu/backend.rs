//! GPU 更新后端
//!
//! 两个存储缓冲轮流作为 `state_in` / `state_out`，对应两个预先建好的绑定组；
//! 每次更新派发一次计算过程，提交后交换角色。

use super::shaders::{UPDATE_SHADER, UPDATE_WORKGROUP_SIZE};
use super::{readback, with_error_scope, GpuContext};
use crate::core::error::{CascadeError, CascadeResult};
use crate::simulation::backend::SimulationBackend;
use crate::simulation::mask::{MaskFrame, MaskSampler};
use crate::simulation::state::{GridDims, ParticleState};
use crate::simulation::update::UpdateUniforms;
use std::sync::Arc;
use wgpu::util::DeviceExt;

const PARTICLE_STRIDE: u64 = std::mem::size_of::<ParticleState>() as u64;

/// 编译好的更新程序
struct UpdateProgram {
    pipeline: wgpu::ComputePipeline,
    layout: wgpu::BindGroupLayout,
    uniforms: wgpu::Buffer,
}

/// 设备上的状态缓冲对
struct DeviceState {
    dims: GridDims,
    buffers: [wgpu::Buffer; 2],
    /// `bind_groups[i]` 读 `buffers[i]`、写 `buffers[1 - i]`
    bind_groups: [wgpu::BindGroup; 2],
    current: usize,
}

/// 设备上的掩码缓冲
struct DeviceMask {
    buffer: wgpu::Buffer,
    width: u32,
    height: u32,
}

/// GPU 模拟后端
pub struct GpuBackend {
    context: Arc<GpuContext>,
    program: Option<UpdateProgram>,
    state: Option<DeviceState>,
    mask: DeviceMask,
}

impl GpuBackend {
    pub fn new(context: Arc<GpuContext>) -> Self {
        // 没有掩码帧时绑定一个单元素缓冲占位
        let buffer = context
            .device
            .create_buffer_init(&wgpu::util::BufferInitDescriptor {
                label: Some("Cascade Mask (empty)"),
                contents: bytemuck::cast_slice(&[0.0f32]),
                usage: wgpu::BufferUsages::STORAGE | wgpu::BufferUsages::COPY_DST,
            });
        Self {
            context,
            program: None,
            state: None,
            mask: DeviceMask {
                buffer,
                width: 0,
                height: 0,
            },
        }
    }

    pub fn context(&self) -> &Arc<GpuContext> {
        &self.context
    }

    /// 当前（可读）状态缓冲，供渲染过程绑定
    pub fn current_buffer(&self) -> Option<&wgpu::Buffer> {
        self.state.as_ref().map(|s| &s.buffers[s.current])
    }

    pub fn current_index(&self) -> Option<usize> {
        self.state.as_ref().map(|s| s.current)
    }

    fn create_program(device: &wgpu::Device) -> UpdateProgram {
        let storage = |binding: u32, read_only: bool| wgpu::BindGroupLayoutEntry {
            binding,
            visibility: wgpu::ShaderStages::COMPUTE,
            ty: wgpu::BindingType::Buffer {
                ty: wgpu::BufferBindingType::Storage { read_only },
                has_dynamic_offset: false,
                min_binding_size: None,
            },
            count: None,
        };

        let layout = device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
            label: Some("Cascade Update BGL"),
            entries: &[
                wgpu::BindGroupLayoutEntry {
                    binding: 0,
                    visibility: wgpu::ShaderStages::COMPUTE,
                    ty: wgpu::BindingType::Buffer {
                        ty: wgpu::BufferBindingType::Uniform,
                        has_dynamic_offset: false,
                        min_binding_size: None,
                    },
                    count: None,
                },
                storage(1, true),
                storage(2, false),
                storage(3, true),
            ],
        });

        let shader = device.create_shader_module(wgpu::ShaderModuleDescriptor {
            label: Some("Cascade Update Shader"),
            source: wgpu::ShaderSource::Wgsl(UPDATE_SHADER.into()),
        });

        let pipeline_layout = device.create_pipeline_layout(&wgpu::PipelineLayoutDescriptor {
            label: Some("Cascade Update Pipeline Layout"),
            bind_group_layouts: &[&layout],
            push_constant_ranges: &[],
        });

        let pipeline = device.create_compute_pipeline(&wgpu::ComputePipelineDescriptor {
            label: Some("Cascade Update Pipeline"),
            layout: Some(&pipeline_layout),
            module: &shader,
            entry_point: "update_main",
            compilation_options: wgpu::PipelineCompilationOptions::default(),
        });

        let uniforms = device.create_buffer(&wgpu::BufferDescriptor {
            label: Some("Cascade Update Uniforms"),
            size: std::mem::size_of::<UpdateUniforms>() as wgpu::BufferAddress,
            usage: wgpu::BufferUsages::UNIFORM | wgpu::BufferUsages::COPY_DST,
            mapped_at_creation: false,
        });

        UpdateProgram {
            pipeline,
            layout,
            uniforms,
        }
    }

    fn create_bind_groups(
        device: &wgpu::Device,
        program: &UpdateProgram,
        buffers: &[wgpu::Buffer; 2],
        mask: &wgpu::Buffer,
    ) -> [wgpu::BindGroup; 2] {
        let make = |read: usize| {
            device.create_bind_group(&wgpu::BindGroupDescriptor {
                label: Some("Cascade Update BG"),
                layout: &program.layout,
                entries: &[
                    wgpu::BindGroupEntry {
                        binding: 0,
                        resource: program.uniforms.as_entire_binding(),
                    },
                    wgpu::BindGroupEntry {
                        binding: 1,
                        resource: buffers[read].as_entire_binding(),
                    },
                    wgpu::BindGroupEntry {
                        binding: 2,
                        resource: buffers[1 - read].as_entire_binding(),
                    },
                    wgpu::BindGroupEntry {
                        binding: 3,
                        resource: mask.as_entire_binding(),
                    },
                ],
            })
        };
        [make(0), make(1)]
    }

    fn rebuild_bind_groups(&mut self) {
        if let (Some(program), Some(state)) = (self.program.as_ref(), self.state.as_mut()) {
            state.bind_groups = Self::create_bind_groups(
                &self.context.device,
                program,
                &state.buffers,
                &self.mask.buffer,
            );
        }
    }

    /// 检查设备限制；超出时返回分配错误
    fn check_limits(&self, dims: GridDims) -> CascadeResult<u64> {
        let limits = self.context.limits();
        let size = dims.count() as u64 * PARTICLE_STRIDE;
        let workgroups = (dims.count() as u64).div_ceil(UPDATE_WORKGROUP_SIZE as u64);

        let reason = if dims.count() == 0 {
            Some("empty grid".to_string())
        } else if size > limits.max_storage_buffer_binding_size as u64 {
            Some(format!(
                "{} bytes exceeds max_storage_buffer_binding_size {}",
                size, limits.max_storage_buffer_binding_size
            ))
        } else if size > limits.max_buffer_size {
            Some(format!(
                "{} bytes exceeds max_buffer_size {}",
                size, limits.max_buffer_size
            ))
        } else if workgroups > limits.max_compute_workgroups_per_dimension as u64 {
            Some(format!(
                "{} workgroups exceeds max_compute_workgroups_per_dimension {}",
                workgroups, limits.max_compute_workgroups_per_dimension
            ))
        } else {
            None
        };

        match reason {
            Some(reason) => Err(CascadeError::Allocation {
                width: dims.width,
                height: dims.height,
                reason,
            }),
            None => Ok(size),
        }
    }
}

impl SimulationBackend for GpuBackend {
    fn name(&self) -> &'static str {
        "gpu"
    }

    fn prepare(&mut self) -> CascadeResult<()> {
        let device = &self.context.device;
        let program = with_error_scope(
            device,
            wgpu::ErrorFilter::Validation,
            || Self::create_program(device),
            CascadeError::MissingProgram,
        )?;
        self.program = Some(program);
        self.rebuild_bind_groups();
        Ok(())
    }

    fn allocate(&mut self, dims: GridDims) -> CascadeResult<()> {
        let program = self
            .program
            .as_ref()
            .ok_or_else(|| CascadeError::MissingProgram("update program not prepared".into()))?;
        // 旧分辨率上的过程必须先完成；失败时不保留旧状态
        self.context.wait_idle();
        self.state = None;
        let size = self.check_limits(dims)?;

        let device = &self.context.device;
        let buffers = with_error_scope(
            device,
            wgpu::ErrorFilter::OutOfMemory,
            || {
                let make = |label: &str| {
                    device.create_buffer(&wgpu::BufferDescriptor {
                        label: Some(label),
                        size,
                        usage: wgpu::BufferUsages::STORAGE
                            | wgpu::BufferUsages::COPY_DST
                            | wgpu::BufferUsages::COPY_SRC,
                        mapped_at_creation: false,
                    })
                };
                [make("Cascade State A"), make("Cascade State B")]
            },
            |reason| CascadeError::Allocation {
                width: dims.width,
                height: dims.height,
                reason,
            },
        )?;

        let bind_groups = Self::create_bind_groups(device, program, &buffers, &self.mask.buffer);
        self.state = Some(DeviceState {
            dims,
            buffers,
            bind_groups,
            current: 0,
        });
        tracing::debug!(target: "gpu", "Allocated state buffers {} ({} bytes each)", dims, size);
        Ok(())
    }

    fn load(&mut self, particles: &[ParticleState]) -> CascadeResult<()> {
        let state = self.state.as_ref().ok_or(CascadeError::NotAllocated)?;
        if particles.len() != state.dims.count() {
            return Err(CascadeError::Allocation {
                width: state.dims.width,
                height: state.dims.height,
                reason: format!(
                    "expected {} particles, got {}",
                    state.dims.count(),
                    particles.len()
                ),
            });
        }
        let bytes: &[u8] = bytemuck::cast_slice(particles);
        for buffer in &state.buffers {
            self.context.queue.write_buffer(buffer, 0, bytes);
        }
        Ok(())
    }

    fn upload_mask(&mut self, frame: &Arc<MaskFrame>) -> CascadeResult<()> {
        let bytes: &[u8] = bytemuck::cast_slice(frame.values());
        if self.mask.width == frame.width() && self.mask.height == frame.height() {
            self.context.queue.write_buffer(&self.mask.buffer, 0, bytes);
            return Ok(());
        }

        let limits = self.context.limits();
        if bytes.len() as u64 > limits.max_storage_buffer_binding_size as u64 {
            return Err(CascadeError::InvalidFrame(format!(
                "mask {}x{} exceeds storage binding limit",
                frame.width(),
                frame.height()
            )));
        }

        self.mask = DeviceMask {
            buffer: self
                .context
                .device
                .create_buffer_init(&wgpu::util::BufferInitDescriptor {
                    label: Some("Cascade Mask"),
                    contents: bytes,
                    usage: wgpu::BufferUsages::STORAGE | wgpu::BufferUsages::COPY_DST,
                }),
            width: frame.width(),
            height: frame.height(),
        };
        self.rebuild_bind_groups();
        tracing::debug!(
            target: "gpu",
            "Mask buffer resized to {}x{}",
            frame.width(),
            frame.height()
        );
        Ok(())
    }

    fn update(&mut self, _mask: &MaskSampler, uniforms: &UpdateUniforms) -> CascadeResult<()> {
        let program = self
            .program
            .as_ref()
            .ok_or_else(|| CascadeError::MissingProgram("update program not prepared".into()))?;
        let state = self.state.as_mut().ok_or(CascadeError::NotAllocated)?;

        let mut uniforms = *uniforms;
        if uniforms.has_mask != 0
            && (uniforms.mask_width != self.mask.width || uniforms.mask_height != self.mask.height)
        {
            // 掩码尚未上传到设备：本次按无掩码处理
            uniforms.has_mask = 0;
        }
        self.context
            .queue
            .write_buffer(&program.uniforms, 0, bytemuck::bytes_of(&uniforms));

        let count = state.dims.count() as u32;
        let mut encoder = self
            .context
            .device
            .create_command_encoder(&wgpu::CommandEncoderDescriptor {
                label: Some("Cascade Update Encoder"),
            });
        {
            let mut pass = encoder.begin_compute_pass(&wgpu::ComputePassDescriptor {
                label: Some("Cascade Update Pass"),
                timestamp_writes: None,
            });
            pass.set_pipeline(&program.pipeline);
            pass.set_bind_group(0, &state.bind_groups[state.current], &[]);
            pass.dispatch_workgroups(count.div_ceil(UPDATE_WORKGROUP_SIZE), 1, 1);
        }
        self.context.queue.submit(Some(encoder.finish()));

        state.current = 1 - state.current;
        Ok(())
    }

    fn snapshot(&self) -> CascadeResult<Vec<ParticleState>> {
        let state = self.state.as_ref().ok_or(CascadeError::NotAllocated)?;
        let size = state.dims.count() as u64 * PARTICLE_STRIDE;
        let bytes = readback::read_buffer(
            &self.context.device,
            &self.context.queue,
            &state.buffers[state.current],
            size,
        )?;
        Ok(bytes
            .chunks_exact(PARTICLE_STRIDE as usize)
            .map(bytemuck::pod_read_unaligned::<ParticleState>)
            .collect())
    }

    fn dims(&self) -> Option<GridDims> {
        self.state.as_ref().map(|s| s.dims)
    }
}
