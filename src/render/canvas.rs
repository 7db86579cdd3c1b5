//! CPU 光栅化与合成
//!
//! 粒子恒为白色，因此画布只保存单通道强度 [0, 1]；输出时展开为 RGBA8。
//!
//! 合成顺序：
//! 1. 拖尾缓冲先按 `trail_fade` 向黑色衰减，再画入本帧粒子；
//! 2. 显示输出 = 拖尾 + 新鲜粒子 + （可选）按 `mask_alpha` 相加的掩码；
//! 3. 网络输出 = 拖尾 + 新鲜粒子 + 全不透明度的掩码，没有界面叠加。

use super::primitive::Primitive;
use crate::core::error::{CascadeError, CascadeResult};
use crate::simulation::mask::MaskFrame;
use crate::simulation::resolution::Viewport;
use std::path::Path;

/// RGBA8 像素缓冲
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    width: u32,
    height: u32,
    pixels: Vec<u8>,
}

impl Frame {
    /// 从 RGBA8 字节创建
    pub fn from_rgba8(width: u32, height: u32, pixels: Vec<u8>) -> CascadeResult<Self> {
        let expected = width as usize * height as usize * 4;
        if pixels.len() != expected {
            return Err(CascadeError::InvalidFrame(format!(
                "expected {} bytes, got {}",
                expected,
                pixels.len()
            )));
        }
        Ok(Self {
            width,
            height,
            pixels,
        })
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.pixels
    }

    pub fn into_bytes(self) -> Vec<u8> {
        self.pixels
    }

    /// 单个像素；越界返回 `None`
    pub fn pixel(&self, x: u32, y: u32) -> Option<[u8; 4]> {
        if x >= self.width || y >= self.height {
            return None;
        }
        let i = (y as usize * self.width as usize + x as usize) * 4;
        Some([
            self.pixels[i],
            self.pixels[i + 1],
            self.pixels[i + 2],
            self.pixels[i + 3],
        ])
    }

    /// 平均亮度 [0, 1]
    pub fn mean_luma(&self) -> f32 {
        if self.pixels.is_empty() {
            return 0.0;
        }
        let sum: u64 = self.pixels.chunks_exact(4).map(|px| px[0] as u64).sum();
        sum as f32 / (self.pixels.len() / 4) as f32 / 255.0
    }

    /// 保存为 PNG
    pub fn save_png(&self, path: impl AsRef<Path>) -> CascadeResult<()> {
        let image = image::RgbaImage::from_raw(self.width, self.height, self.pixels.clone())
            .ok_or_else(|| CascadeError::InvalidFrame("frame size mismatch".to_string()))?;
        image.save_with_format(path, image::ImageFormat::Png)?;
        Ok(())
    }
}

/// 单通道强度画布
#[derive(Debug, Clone, PartialEq)]
pub struct Canvas {
    width: u32,
    height: u32,
    data: Vec<f32>,
}

impl Canvas {
    /// 创建黑色画布
    pub fn new(width: u32, height: u32) -> Self {
        Self {
            width,
            height,
            data: vec![0.0; width as usize * height as usize],
        }
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    pub fn viewport(&self) -> Viewport {
        Viewport::new(self.width, self.height)
    }

    pub fn get(&self, x: u32, y: u32) -> f32 {
        self.data[y as usize * self.width as usize + x as usize]
    }

    pub fn clear(&mut self) {
        self.data.fill(0.0);
    }

    /// 以 `amount` 的不透明度叠加黑色
    pub fn fade(&mut self, amount: f32) {
        let keep = 1.0 - amount.clamp(0.0, 1.0);
        for v in &mut self.data {
            *v *= keep;
        }
    }

    /// 画一个白色图元；尺寸小于一个像素时至少点亮中心所在像素
    pub fn draw(&mut self, prim: &Primitive) {
        if self.width == 0 || self.height == 0 {
            return;
        }
        let r = prim.radius();
        let x0 = (prim.center.x - r).floor().max(0.0);
        let y0 = (prim.center.y - r).floor().max(0.0);
        let x1 = (prim.center.x + r).ceil().min(self.width as f32 - 1.0);
        let y1 = (prim.center.y + r).ceil().min(self.height as f32 - 1.0);

        let mut lit = false;
        if x0 <= x1 && y0 <= y1 {
            for py in y0 as u32..=y1 as u32 {
                for px in x0 as u32..=x1 as u32 {
                    if prim.covers(px as f32 + 0.5, py as f32 + 0.5) {
                        self.data[py as usize * self.width as usize + px as usize] = 1.0;
                        lit = true;
                    }
                }
            }
        }

        if !lit {
            let (cx, cy) = (prim.center.x.floor(), prim.center.y.floor());
            if cx >= 0.0 && cy >= 0.0 && cx < self.width as f32 && cy < self.height as f32 {
                self.data[cy as usize * self.width as usize + cx as usize] = 1.0;
            }
        }
    }

    pub fn draw_all(&mut self, prims: &[Primitive]) {
        for prim in prims {
            self.draw(prim);
        }
    }

    /// 按 `alpha` 相加掩码，掩码拉伸到整个画布
    pub fn add_mask(&mut self, mask: &MaskFrame, alpha: f32) {
        for py in 0..self.height {
            let v = (py as f32 + 0.5) / self.height as f32;
            for px in 0..self.width {
                let u = (px as f32 + 0.5) / self.width as f32;
                let value = mask.sample(u, v).unwrap_or(0.0);
                let slot = &mut self.data[py as usize * self.width as usize + px as usize];
                *slot = (*slot + value * alpha).min(1.0);
            }
        }
    }

    /// 转为不透明的 RGBA8 帧
    pub fn to_frame(&self) -> Frame {
        let mut pixels = Vec::with_capacity(self.data.len() * 4);
        for v in &self.data {
            let c = (v.clamp(0.0, 1.0) * 255.0).round() as u8;
            pixels.extend_from_slice(&[c, c, c, 255]);
        }
        Frame {
            width: self.width,
            height: self.height,
            pixels,
        }
    }
}

/// 合成设置
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CompositeSettings {
    pub trail_fade: f32,
    pub show_mask: bool,
    pub mask_alpha: f32,
}

impl Default for CompositeSettings {
    fn default() -> Self {
        Self {
            trail_fade: 0.1,
            show_mask: true,
            mask_alpha: 1.0,
        }
    }
}

impl From<&crate::config::DisplayConfig> for CompositeSettings {
    fn from(display: &crate::config::DisplayConfig) -> Self {
        Self {
            trail_fade: display.trail_fade,
            show_mask: display.show_mask,
            mask_alpha: display.mask_alpha,
        }
    }
}

/// CPU 合成器，持有拖尾缓冲
#[derive(Debug, Clone)]
pub struct Compositor {
    trail: Canvas,
}

impl Compositor {
    pub fn new(viewport: Viewport) -> Self {
        Self {
            trail: Canvas::new(viewport.width, viewport.height),
        }
    }

    /// 视口变化时重建拖尾缓冲（清空）
    pub fn resize(&mut self, viewport: Viewport) {
        if self.trail.viewport() != viewport {
            self.trail = Canvas::new(viewport.width, viewport.height);
        }
    }

    pub fn trail(&self) -> &Canvas {
        &self.trail
    }

    /// 衰减拖尾并画入本帧粒子
    pub fn advance(&mut self, prims: &[Primitive], trail_fade: f32) {
        self.trail.fade(trail_fade);
        self.trail.draw_all(prims);
    }

    fn layered(&self, prims: &[Primitive]) -> Canvas {
        let mut canvas = self.trail.clone();
        canvas.draw_all(prims);
        canvas
    }

    /// 显示输出
    pub fn display_frame(
        &self,
        prims: &[Primitive],
        mask: Option<&MaskFrame>,
        settings: &CompositeSettings,
    ) -> Frame {
        let mut canvas = self.layered(prims);
        if let (true, Some(mask)) = (settings.show_mask, mask) {
            canvas.add_mask(mask, settings.mask_alpha);
        }
        canvas.to_frame()
    }

    /// 网络输出：掩码总是全不透明度
    pub fn network_frame(&self, prims: &[Primitive], mask: Option<&MaskFrame>) -> Frame {
        let mut canvas = self.layered(prims);
        if let Some(mask) = mask {
            canvas.add_mask(mask, 1.0);
        }
        canvas.to_frame()
    }
}
