//! 同步回读：缓冲与纹理 → CPU
//!
//! 回读是同步点：提交拷贝后 `Maintain::Wait`，映射完成前控制线程阻塞。

use crate::core::error::{CascadeError, CascadeResult};
use std::sync::mpsc;

/// 纹理行字节对齐
pub const ROW_ALIGNMENT: u32 = wgpu::COPY_BYTES_PER_ROW_ALIGNMENT;

/// 对齐后的每行字节数
pub fn padded_bytes_per_row(width: u32, bytes_per_pixel: u32) -> u32 {
    let unpadded = width * bytes_per_pixel;
    unpadded.div_ceil(ROW_ALIGNMENT) * ROW_ALIGNMENT
}

fn map_staging(device: &wgpu::Device, staging: &wgpu::Buffer) -> CascadeResult<Vec<u8>> {
    let slice = staging.slice(..);
    let (tx, rx) = mpsc::channel();
    slice.map_async(wgpu::MapMode::Read, move |result| {
        let _ = tx.send(result);
    });
    device.poll(wgpu::Maintain::Wait);

    match rx.recv() {
        Ok(Ok(())) => {}
        Ok(Err(e)) => return Err(CascadeError::Readback(e.to_string())),
        Err(e) => return Err(CascadeError::Readback(e.to_string())),
    }

    let bytes = slice.get_mapped_range().to_vec();
    staging.unmap();
    Ok(bytes)
}

/// 读取 `src` 的前 `size` 字节（`src` 需要 `COPY_SRC`）
pub fn read_buffer(
    device: &wgpu::Device,
    queue: &wgpu::Queue,
    src: &wgpu::Buffer,
    size: u64,
) -> CascadeResult<Vec<u8>> {
    let staging = device.create_buffer(&wgpu::BufferDescriptor {
        label: Some("Cascade Readback Staging"),
        size,
        usage: wgpu::BufferUsages::MAP_READ | wgpu::BufferUsages::COPY_DST,
        mapped_at_creation: false,
    });

    let mut encoder = device.create_command_encoder(&wgpu::CommandEncoderDescriptor {
        label: Some("Cascade Readback Encoder"),
    });
    encoder.copy_buffer_to_buffer(src, 0, &staging, 0, size);
    queue.submit(Some(encoder.finish()));

    map_staging(device, &staging)
}

/// 读取 4 字节像素的纹理，返回去掉行填充后的紧凑字节
pub fn read_texture_rgba(
    device: &wgpu::Device,
    queue: &wgpu::Queue,
    texture: &wgpu::Texture,
    width: u32,
    height: u32,
) -> CascadeResult<Vec<u8>> {
    let padded = padded_bytes_per_row(width, 4);
    let staging = device.create_buffer(&wgpu::BufferDescriptor {
        label: Some("Cascade Texture Readback"),
        size: padded as u64 * height as u64,
        usage: wgpu::BufferUsages::MAP_READ | wgpu::BufferUsages::COPY_DST,
        mapped_at_creation: false,
    });

    let mut encoder = device.create_command_encoder(&wgpu::CommandEncoderDescriptor {
        label: Some("Cascade Texture Readback Encoder"),
    });
    encoder.copy_texture_to_buffer(
        wgpu::ImageCopyTexture {
            texture,
            mip_level: 0,
            origin: wgpu::Origin3d::ZERO,
            aspect: wgpu::TextureAspect::All,
        },
        wgpu::ImageCopyBuffer {
            buffer: &staging,
            layout: wgpu::ImageDataLayout {
                offset: 0,
                bytes_per_row: Some(padded),
                rows_per_image: Some(height),
            },
        },
        wgpu::Extent3d {
            width,
            height,
            depth_or_array_layers: 1,
        },
    );
    queue.submit(Some(encoder.finish()));

    let bytes = map_staging(device, &staging)?;
    let row = (width * 4) as usize;
    let mut pixels = Vec::with_capacity(row * height as usize);
    for chunk in bytes.chunks(padded as usize).take(height as usize) {
        pixels.extend_from_slice(&chunk[..row]);
    }
    Ok(pixels)
}
