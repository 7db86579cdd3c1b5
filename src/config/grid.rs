use super::{ConfigError, ConfigResult};
use serde::{Deserialize, Serialize};

/// 模拟网格配置
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GridConfig {
    /// 每个视口像素宽度对应的粒子列数
    pub density: f32,
    /// 最小网格宽度
    pub min_width: u32,
    /// 最小网格高度
    pub min_height: u32,
    /// 最大网格宽度
    pub max_width: u32,
    /// 最大网格高度
    pub max_height: u32,
    /// 密度变化小于该值时不重新分配
    pub density_hysteresis: f32,
    /// 单步最大时间步长（秒）
    pub max_dt: f32,
    /// 播种随机数种子（None 使用熵源）
    pub seed: Option<u64>,
}

impl_default!(GridConfig {
    density: 0.15,
    min_width: 200,
    min_height: 300,
    max_width: 1024,
    max_height: 2048,
    density_hysteresis: 0.005,
    max_dt: 0.1,
    seed: None,
});

/// 密度的声明范围
pub const DENSITY_MIN: f32 = 0.05;
pub const DENSITY_MAX: f32 = 0.6;

impl GridConfig {
    /// 验证配置
    pub fn validate(&self) -> ConfigResult<()> {
        if !(DENSITY_MIN..=DENSITY_MAX).contains(&self.density) {
            return Err(ConfigError::ValidationError(format!(
                "grid.density = {} outside [{}, {}]",
                self.density, DENSITY_MIN, DENSITY_MAX
            )));
        }
        if self.min_width == 0 || self.min_height == 0 {
            return Err(ConfigError::ValidationError(
                "grid minimums must be non-zero".to_string(),
            ));
        }
        if self.min_width > self.max_width || self.min_height > self.max_height {
            return Err(ConfigError::ValidationError(
                "grid minimums exceed maximums".to_string(),
            ));
        }
        if !(self.density_hysteresis >= 0.0 && self.density_hysteresis.is_finite()) {
            return Err(ConfigError::ValidationError(
                "grid.density_hysteresis must be non-negative".to_string(),
            ));
        }
        if !(self.max_dt > 0.0 && self.max_dt.is_finite()) {
            return Err(ConfigError::ValidationError(
                "grid.max_dt must be positive and finite".to_string(),
            ));
        }
        Ok(())
    }
}
