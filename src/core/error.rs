//! 统一错误处理模块
//!
//! 模拟核心对外只暴露布尔值或 [`CascadeStatus`]，内部的可失败操作统一返回
//! [`CascadeResult`]。
//!
//! ## 错误分类
//!
//! - **分配失败**：设备无法在请求的分辨率下提供缓冲区，只影响模拟子系统
//! - **缺少计算程序**：更新/渲染程序初始化失败，需要重新调用 setup
//! - **掩码缺失**：不是错误，按"无占用"处理
//! - **退化的网格尺寸**：在分配前被钳制到最小值，永远不会作为错误传播

use thiserror::Error;

/// 模拟核心错误类型
#[derive(Error, Debug)]
pub enum CascadeError {
    #[error("Allocation failed for {width}x{height} grid: {reason}")]
    Allocation {
        width: u32,
        height: u32,
        reason: String,
    },

    #[error("Compute program unavailable: {0}")]
    MissingProgram(String),

    #[error("Failed to request adapter: no compatible GPU found")]
    NoAdapter,

    #[error("Failed to request device: {0}")]
    DeviceRequest(String),

    #[error("Buffer readback failed: {0}")]
    Readback(String),

    #[error("Simulation not allocated")]
    NotAllocated,

    #[error("Invalid pixel buffer: {0}")]
    InvalidFrame(String),

    #[error("Image error: {0}")]
    Image(#[from] image::ImageError),

    #[error("Window creation failed: {0}")]
    Window(String),

    #[error("Event loop error: {0}")]
    EventLoop(String),

    #[error("Surface error: {0}")]
    Surface(String),

    #[error("Config error: {0}")]
    Config(#[from] crate::config::ConfigError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl CascadeError {
    /// 错误对应的未就绪原因（如果该错误会让核心进入未就绪状态）
    pub fn not_ready_reason(&self) -> Option<NotReadyReason> {
        match self {
            Self::Allocation { .. } => Some(NotReadyReason::AllocationFailed),
            Self::MissingProgram(_) => Some(NotReadyReason::MissingProgram),
            Self::NotAllocated => Some(NotReadyReason::Unallocated),
            _ => None,
        }
    }
}

/// 未就绪原因
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NotReadyReason {
    /// 尚未获得视口，缓冲区未分配
    Unallocated,
    /// 缓冲区分配失败，调用方应以更低密度重试
    AllocationFailed,
    /// 计算程序缺失，不会自动重试
    MissingProgram,
}

/// 模拟核心状态
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CascadeStatus {
    /// 可以更新和渲染
    Ready,
    /// 未就绪
    NotReady(NotReadyReason),
}

impl CascadeStatus {
    pub fn is_ready(self) -> bool {
        matches!(self, Self::Ready)
    }
}

impl std::fmt::Display for CascadeStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Ready => write!(f, "READY"),
            Self::NotReady(NotReadyReason::Unallocated) => write!(f, "NOT READY (unallocated)"),
            Self::NotReady(NotReadyReason::AllocationFailed) => {
                write!(f, "NOT READY (allocation failed)")
            }
            Self::NotReady(NotReadyReason::MissingProgram) => {
                write!(f, "NOT READY (missing compute program)")
            }
        }
    }
}

/// 模拟核心结果类型别名
pub type CascadeResult<T> = Result<T, CascadeError>;
