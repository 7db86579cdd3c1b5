use super::readback::read_texture_rgba;
use crate::core::error::CascadeResult;
use crate::render::Frame;
use crate::simulation::Viewport;
use wgpu::{Device, Queue, Texture, TextureFormat, TextureUsages, TextureView};

/// 离屏渲染目标
///
/// 拖尾缓冲与网络输出都渲染到这里；可以作为纹理采样，也可以回读。
pub struct OffscreenTarget {
    /// 纹理
    pub texture: Texture,
    /// 纹理视图
    pub view: TextureView,
    /// 宽度
    pub width: u32,
    /// 高度
    pub height: u32,
    /// 格式
    pub format: TextureFormat,
}

impl OffscreenTarget {
    /// 创建新的离屏渲染目标
    pub fn new(device: &Device, width: u32, height: u32, format: TextureFormat) -> Self {
        let (texture, view) = Self::create(device, width, height, format);
        Self {
            texture,
            view,
            width,
            height,
            format,
        }
    }

    fn create(
        device: &Device,
        width: u32,
        height: u32,
        format: TextureFormat,
    ) -> (Texture, TextureView) {
        let texture = device.create_texture(&wgpu::TextureDescriptor {
            label: Some("Cascade Offscreen Target"),
            size: wgpu::Extent3d {
                width: width.max(1),
                height: height.max(1),
                depth_or_array_layers: 1,
            },
            mip_level_count: 1,
            sample_count: 1,
            dimension: wgpu::TextureDimension::D2,
            format,
            usage: TextureUsages::RENDER_ATTACHMENT
                | TextureUsages::TEXTURE_BINDING
                | TextureUsages::COPY_SRC,
            view_formats: &[],
        });
        let view = texture.create_view(&wgpu::TextureViewDescriptor::default());
        (texture, view)
    }

    pub fn viewport(&self) -> Viewport {
        Viewport::new(self.width, self.height)
    }

    /// 调整大小；返回是否重建（重建后内容未定义，需要清空）
    pub fn resize(&mut self, device: &Device, width: u32, height: u32) -> bool {
        if self.width == width && self.height == height {
            return false;
        }

        self.width = width;
        self.height = height;
        let (texture, view) = Self::create(device, width, height, self.format);
        self.texture = texture;
        self.view = view;
        true
    }

    /// 回读为 RGBA8 帧（BGRA 格式会交换通道）
    pub fn read_frame(&self, device: &Device, queue: &Queue) -> CascadeResult<Frame> {
        let mut pixels = read_texture_rgba(
            device,
            queue,
            &self.texture,
            self.width.max(1),
            self.height.max(1),
        )?;
        if matches!(
            self.format,
            TextureFormat::Bgra8Unorm | TextureFormat::Bgra8UnormSrgb
        ) {
            for px in pixels.chunks_exact_mut(4) {
                px.swap(0, 2);
            }
        }
        Frame::from_rgba8(self.width.max(1), self.height.max(1), pixels)
    }
}
