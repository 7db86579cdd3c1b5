use super::{ConfigError, ConfigResult};
use serde::{Deserialize, Serialize};

/// 显示与合成配置
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DisplayConfig {
    /// 窗口宽度（像素）
    pub width: u32,
    /// 窗口高度（像素）
    pub height: u32,
    /// 窗口标题
    pub title: String,
    /// 垂直同步
    pub vsync: bool,
    /// 是否显示掩码叠加
    pub show_mask: bool,
    /// 掩码叠加透明度
    pub mask_alpha: f32,
    /// 拖尾每帧衰减量
    pub trail_fade: f32,
    /// 退出时把当前设置写回配置文件
    pub persist_settings: bool,
    /// 状态日志间隔（秒）
    pub stats_interval_secs: f32,
}

impl_default!(DisplayConfig {
    width: 1280,
    height: 720,
    title: "cascade".to_string(),
    vsync: true,
    show_mask: true,
    mask_alpha: 1.0,
    trail_fade: 0.1,
    persist_settings: false,
    stats_interval_secs: 2.0,
});

impl DisplayConfig {
    /// 验证配置
    pub fn validate(&self) -> ConfigResult<()> {
        if self.width == 0 || self.height == 0 {
            return Err(ConfigError::ValidationError(
                "Invalid window size".to_string(),
            ));
        }
        if !(0.0..=1.0).contains(&self.mask_alpha) {
            return Err(ConfigError::ValidationError(format!(
                "display.mask_alpha = {} outside [0, 1]",
                self.mask_alpha
            )));
        }
        if !(0.0..=0.5).contains(&self.trail_fade) {
            return Err(ConfigError::ValidationError(format!(
                "display.trail_fade = {} outside [0, 0.5]",
                self.trail_fade
            )));
        }
        Ok(())
    }
}
