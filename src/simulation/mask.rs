//! 占用掩码
//!
//! 掩码来自最新的外部视频帧，每个像素一个 [0, 1] 的强度值，与完整输出帧轴对齐，
//! 在自身的归一化坐标空间中采样，与模拟网格分辨率无关。
//!
//! 帧以 `Arc<MaskFrame>` 快照整体替换：读取方要么看到旧的完整帧，要么看到新的
//! 完整帧，不会读到半帧。

use crate::core::error::{CascadeError, CascadeResult};
use crate::config::PhysicsParams;
use crossbeam_channel::{Receiver, Sender, TrySendError};
use std::path::PathBuf;
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

/// 单帧掩码
#[derive(Debug, Clone, PartialEq)]
pub struct MaskFrame {
    width: u32,
    height: u32,
    values: Vec<f32>,
}

impl MaskFrame {
    /// 从强度值创建（值会被钳制到 [0, 1]）
    pub fn new(width: u32, height: u32, values: Vec<f32>) -> CascadeResult<Self> {
        if width == 0 || height == 0 {
            return Err(CascadeError::InvalidFrame(format!(
                "empty mask {}x{}",
                width, height
            )));
        }
        let expected = width as usize * height as usize;
        if values.len() != expected {
            return Err(CascadeError::InvalidFrame(format!(
                "expected {} values, got {}",
                expected,
                values.len()
            )));
        }
        let values = values
            .into_iter()
            .map(|v| if v.is_finite() { v.clamp(0.0, 1.0) } else { 0.0 })
            .collect();
        Ok(Self {
            width,
            height,
            values,
        })
    }

    /// 所有像素同一强度
    pub fn uniform(width: u32, height: u32, value: f32) -> CascadeResult<Self> {
        Self::new(width, height, vec![value; width as usize * height as usize])
    }

    /// 从 8 位灰度像素创建
    pub fn from_luma8(width: u32, height: u32, pixels: &[u8]) -> CascadeResult<Self> {
        Self::new(
            width,
            height,
            pixels.iter().map(|&p| p as f32 / 255.0).collect(),
        )
    }

    /// 从 RGBA8 像素创建（Rec.601 亮度）
    pub fn from_rgba8(width: u32, height: u32, pixels: &[u8]) -> CascadeResult<Self> {
        let expected = width as usize * height as usize * 4;
        if pixels.len() != expected {
            return Err(CascadeError::InvalidFrame(format!(
                "expected {} RGBA bytes, got {}",
                expected,
                pixels.len()
            )));
        }
        let values = pixels
            .chunks_exact(4)
            .map(|px| {
                (0.299 * px[0] as f32 + 0.587 * px[1] as f32 + 0.114 * px[2] as f32) / 255.0
            })
            .collect();
        Self::new(width, height, values)
    }

    /// 从图像创建
    pub fn from_image(image: &image::DynamicImage) -> CascadeResult<Self> {
        let rgba = image.to_rgba8();
        Self::from_rgba8(rgba.width(), rgba.height(), rgba.as_raw())
    }

    /// 从图像文件加载
    pub fn open(path: impl AsRef<std::path::Path>) -> CascadeResult<Self> {
        let image = image::open(path)?;
        Self::from_image(&image)
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    pub fn values(&self) -> &[f32] {
        &self.values
    }

    /// 原始强度的最近像素采样；帧外返回 `None`
    pub fn sample(&self, u: f32, v: f32) -> Option<f32> {
        if !(0.0..=1.0).contains(&u) || !(0.0..=1.0).contains(&v) {
            return None;
        }
        let px = ((u * self.width as f32) as u32).min(self.width - 1);
        let py = ((v * self.height as f32) as u32).min(self.height - 1);
        Some(self.values[py as usize * self.width as usize + px as usize])
    }
}

/// 掩码采样器
///
/// 持有最近一帧的只读快照。从未收到帧时所有采样为 0（无占用）。
#[derive(Debug, Clone, Default)]
pub struct MaskSampler {
    frame: Option<Arc<MaskFrame>>,
    generation: u64,
}

impl MaskSampler {
    pub fn new() -> Self {
        Self::default()
    }

    /// 整体替换当前帧
    pub fn replace(&mut self, frame: Arc<MaskFrame>) {
        self.frame = Some(frame);
        self.generation += 1;
    }

    /// 是否收到过帧
    pub fn has_frame(&self) -> bool {
        self.frame.is_some()
    }

    pub fn frame(&self) -> Option<&Arc<MaskFrame>> {
        self.frame.as_ref()
    }

    /// 已接收的帧数
    pub fn generation(&self) -> u64 {
        self.generation
    }

    /// 采样 [0, 1]；无帧或帧外为 0
    pub fn sample(&self, u: f32, v: f32) -> f32 {
        self.frame
            .as_ref()
            .and_then(|frame| frame.sample(u, v))
            .unwrap_or(0.0)
    }

    /// 考虑反转后的有效采样值；帧外与无帧恒为 0
    pub fn effective_sample(&self, u: f32, v: f32, invert: bool) -> f32 {
        match self.frame.as_ref().and_then(|frame| frame.sample(u, v)) {
            Some(value) if invert => 1.0 - value,
            Some(value) => value,
            None => 0.0,
        }
    }

    /// 碰撞判定：有效采样值严格大于阈值
    pub fn occupied(&self, u: f32, v: f32, threshold: f32, invert: bool) -> bool {
        self.effective_sample(u, v, invert) > threshold
    }

    /// 使用参数集判定占用
    pub fn occupied_with(&self, u: f32, v: f32, params: &PhysicsParams) -> bool {
        self.occupied(u, v, params.threshold, params.invert_mask)
    }
}

/// 掩码帧发送端，交给视频接入协作方
#[derive(Debug, Clone)]
pub struct MaskSender {
    tx: Sender<Arc<MaskFrame>>,
}

impl MaskSender {
    /// 发布一帧；接收端积压时丢弃本帧而不阻塞。返回 false 表示接收端已关闭。
    pub fn publish(&self, frame: MaskFrame) -> bool {
        match self.tx.try_send(Arc::new(frame)) {
            Ok(()) | Err(TrySendError::Full(_)) => true,
            Err(TrySendError::Disconnected(_)) => false,
        }
    }
}

/// 掩码帧接收端，由控制线程每帧轮询
#[derive(Debug, Clone)]
pub struct MaskReceiver {
    rx: Receiver<Arc<MaskFrame>>,
}

impl MaskReceiver {
    /// 取出积压中最新的一帧（一次性"新帧"事件）
    pub fn latest(&self) -> Option<Arc<MaskFrame>> {
        self.rx.try_iter().last()
    }
}

/// 掩码帧通道
pub struct MaskFeed;

impl MaskFeed {
    /// 创建通道，`capacity` 为最大积压帧数
    pub fn channel(capacity: usize) -> (MaskSender, MaskReceiver) {
        let (tx, rx) = crossbeam_channel::bounded(capacity.max(1));
        (MaskSender { tx }, MaskReceiver { rx })
    }
}

/// 以固定速率循环发布静态图像的接入线程，用作外部视频源的替身
pub fn spawn_image_sequence(
    paths: Vec<PathBuf>,
    fps: f32,
    sender: MaskSender,
) -> CascadeResult<JoinHandle<()>> {
    let mut frames = Vec::with_capacity(paths.len());
    for path in &paths {
        let frame = MaskFrame::open(path)?;
        tracing::info!(
            target: "mask",
            "Loaded mask {:?} ({}x{})",
            path,
            frame.width(),
            frame.height()
        );
        frames.push(frame);
    }
    if frames.is_empty() {
        return Err(CascadeError::InvalidFrame("no mask images".to_string()));
    }

    let period = Duration::from_secs_f32(1.0 / fps.max(0.1));
    let handle = thread::Builder::new()
        .name("mask-feed".to_string())
        .spawn(move || {
            let single = frames.len() == 1;
            for frame in frames.iter().cycle() {
                if !sender.publish(frame.clone()) {
                    tracing::debug!(target: "mask", "Mask receiver closed, stopping feed");
                    return;
                }
                if single {
                    return;
                }
                thread::sleep(period);
            }
        })?;
    Ok(handle)
}
