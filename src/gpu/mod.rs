//! wgpu 设备后端
//!
//! - [`GpuContext`]: 适配器、设备与队列
//! - [`shaders`]: 更新/渲染/合成程序（WGSL）
//! - [`GpuBackend`]: 设备并行的更新过程，实现 [`SimulationBackend`](crate::simulation::SimulationBackend)
//! - [`GpuCompositor`]: 拖尾、显示输出与网络输出的 GPU 合成
//! - [`OffscreenTarget`]: 可回读的离屏渲染目标

pub mod backend;
pub mod compositor;
pub mod offscreen;
pub mod readback;
pub mod shaders;

pub use backend::GpuBackend;
pub use compositor::{GpuCompositor, OutputKind};
pub use offscreen::OffscreenTarget;

use crate::core::error::{CascadeError, CascadeResult};

/// GPU 上下文
pub struct GpuContext {
    pub instance: wgpu::Instance,
    pub adapter: wgpu::Adapter,
    pub device: wgpu::Device,
    pub queue: wgpu::Queue,
}

impl GpuContext {
    /// 请求适配器与设备
    ///
    /// # 参数
    /// - `instance`: wgpu 实例（窗口模式下必须是创建 surface 的那个实例）
    /// - `compatible_surface`: 需要兼容的 surface，无头模式为 `None`
    pub async fn new(
        instance: wgpu::Instance,
        compatible_surface: Option<&wgpu::Surface<'_>>,
    ) -> CascadeResult<Self> {
        let adapter = instance
            .request_adapter(&wgpu::RequestAdapterOptions {
                power_preference: wgpu::PowerPreference::HighPerformance,
                compatible_surface,
                force_fallback_adapter: false,
            })
            .await
            .ok_or(CascadeError::NoAdapter)?;

        let (device, queue) = adapter
            .request_device(
                &wgpu::DeviceDescriptor {
                    label: Some("Cascade Device"),
                    required_features: wgpu::Features::empty(),
                    required_limits: adapter.limits(),
                },
                None,
            )
            .await
            .map_err(|e| CascadeError::DeviceRequest(e.to_string()))?;

        let info = adapter.get_info();
        tracing::info!(
            target: "gpu",
            "Using adapter {} ({:?}, {:?})",
            info.name,
            info.device_type,
            info.backend
        );

        Ok(Self {
            instance,
            adapter,
            device,
            queue,
        })
    }

    /// 无头上下文（测试与离线渲染）
    pub fn headless() -> CascadeResult<Self> {
        pollster::block_on(Self::new(wgpu::Instance::default(), None))
    }

    pub fn limits(&self) -> wgpu::Limits {
        self.device.limits()
    }

    /// 等待设备上已提交的工作全部完成
    pub fn wait_idle(&self) {
        self.device.poll(wgpu::Maintain::Wait);
    }
}

/// 在验证错误作用域中执行 `f`，把捕获到的错误映射为 `on_error(message)`
pub(crate) fn with_error_scope<T>(
    device: &wgpu::Device,
    filter: wgpu::ErrorFilter,
    f: impl FnOnce() -> T,
    on_error: impl FnOnce(String) -> CascadeError,
) -> CascadeResult<T> {
    device.push_error_scope(filter);
    let value = f();
    match pollster::block_on(device.pop_error_scope()) {
        Some(error) => Err(on_error(error.to_string())),
        None => Ok(value),
    }
}
