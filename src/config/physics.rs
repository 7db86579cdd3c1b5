use super::{ConfigError, ConfigResult};
use serde::{Deserialize, Serialize};
use std::sync::{Arc, RwLock};

/// 参数的声明范围
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ParamRange {
    pub min: f32,
    pub max: f32,
}

impl ParamRange {
    pub const fn new(min: f32, max: f32) -> Self {
        Self { min, max }
    }

    pub fn contains(&self, value: f32) -> bool {
        value >= self.min && value <= self.max
    }

    pub fn clamp(&self, value: f32) -> f32 {
        value.clamp(self.min, self.max)
    }
}

pub const GRAVITY_RANGE: ParamRange = ParamRange::new(0.1, 8.0);
pub const NOISE_RANGE: ParamRange = ParamRange::new(0.0, 2.5);
pub const THRESHOLD_RANGE: ParamRange = ParamRange::new(0.0, 1.0);
pub const POINT_SIZE_RANGE: ParamRange = ParamRange::new(1.0, 15.0);
pub const TOP_BIAS_RANGE: ParamRange = ParamRange::new(0.0, 0.5);
pub const BOUNCE_DAMPEN_RANGE: ParamRange = ParamRange::new(0.1, 1.0);
pub const SHRINK_STRENGTH_RANGE: ParamRange = ParamRange::new(0.0, 1.0);

/// 物理参数集
///
/// 由外部控制面修改，每次更新/渲染时读取一份快照。除字段自身声明的范围外不做
/// 任何校验，越界值由调用方负责。
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PhysicsParams {
    /// 重力加速度（归一化单位/秒²，向下为正）
    pub gravity: f32,
    /// 横向抖动强度
    pub noise_strength: f32,
    /// 掩码占用阈值
    pub threshold: f32,
    /// 顶部偏置，为正时粒子在顶部附近停留更久
    pub top_bias: f32,
    /// 反弹衰减
    pub bounce_dampen: f32,
    /// 下落收缩强度
    pub shrink_strength: f32,
    /// 点大小（像素）
    pub point_size: f32,
    /// 是否与掩码碰撞
    pub collide: bool,
    /// 是否反转掩码
    pub invert_mask: bool,
    /// 以方块代替圆点渲染
    pub render_squares: bool,
}

impl Default for PhysicsParams {
    fn default() -> Self {
        Self {
            gravity: 3.5,
            noise_strength: 0.8,
            threshold: 0.45,
            top_bias: 0.0,
            bounce_dampen: 0.5,
            shrink_strength: 0.0,
            point_size: 5.0,
            collide: true,
            invert_mask: false,
            render_squares: false,
        }
    }
}

impl PhysicsParams {
    /// 所有标量参数的名称与声明范围，供控制面构建滑块
    pub fn ranges() -> [(&'static str, ParamRange); 7] {
        [
            ("gravity", GRAVITY_RANGE),
            ("noise", NOISE_RANGE),
            ("threshold", THRESHOLD_RANGE),
            ("point size", POINT_SIZE_RANGE),
            ("top bias", TOP_BIAS_RANGE),
            ("bounce dampen", BOUNCE_DAMPEN_RANGE),
            ("shrink strength", SHRINK_STRENGTH_RANGE),
        ]
    }

    /// 返回钳制到声明范围内的副本
    pub fn clamped(&self) -> Self {
        Self {
            gravity: GRAVITY_RANGE.clamp(self.gravity),
            noise_strength: NOISE_RANGE.clamp(self.noise_strength),
            threshold: THRESHOLD_RANGE.clamp(self.threshold),
            top_bias: TOP_BIAS_RANGE.clamp(self.top_bias),
            bounce_dampen: BOUNCE_DAMPEN_RANGE.clamp(self.bounce_dampen),
            shrink_strength: SHRINK_STRENGTH_RANGE.clamp(self.shrink_strength),
            point_size: POINT_SIZE_RANGE.clamp(self.point_size),
            ..*self
        }
    }

    /// 验证配置文件中的值
    pub fn validate(&self) -> ConfigResult<()> {
        let checks = [
            ("gravity", GRAVITY_RANGE, self.gravity),
            ("noise_strength", NOISE_RANGE, self.noise_strength),
            ("threshold", THRESHOLD_RANGE, self.threshold),
            ("top_bias", TOP_BIAS_RANGE, self.top_bias),
            ("bounce_dampen", BOUNCE_DAMPEN_RANGE, self.bounce_dampen),
            ("shrink_strength", SHRINK_STRENGTH_RANGE, self.shrink_strength),
            ("point_size", POINT_SIZE_RANGE, self.point_size),
        ];
        for (name, range, value) in checks {
            if !range.contains(value) {
                return Err(ConfigError::ValidationError(format!(
                    "physics.{} = {} outside [{}, {}]",
                    name, value, range.min, range.max
                )));
            }
        }
        Ok(())
    }
}

/// 参数存储
///
/// 控制面写入，帧循环每帧复制一次快照交给更新/渲染过程，过程中不持有锁。
#[derive(Debug, Clone, Default)]
pub struct ParamStore {
    inner: Arc<RwLock<PhysicsParams>>,
}

impl ParamStore {
    pub fn new(params: PhysicsParams) -> Self {
        Self {
            inner: Arc::new(RwLock::new(params)),
        }
    }

    /// 复制当前参数
    pub fn snapshot(&self) -> PhysicsParams {
        match self.inner.read() {
            Ok(guard) => *guard,
            Err(poisoned) => *poisoned.into_inner(),
        }
    }

    /// 修改参数
    pub fn update(&self, f: impl FnOnce(&mut PhysicsParams)) {
        let mut guard = match self.inner.write() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        f(&mut guard);
    }
}
