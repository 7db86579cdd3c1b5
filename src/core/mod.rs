//! 核心模块
//!
//! - `engine` - 引擎入口、命令行选项和运行循环
//! - `control` - 按键到参数修改的控制面
//! - `error` - 错误与状态类型

pub mod control;
pub mod engine;
pub mod error;
#[macro_use]
pub mod macros;

pub use control::{ControlAction, ControlSurface};
pub use engine::{Engine, EngineOptions};
pub use error::{CascadeError, CascadeResult, CascadeStatus, NotReadyReason};
