//! 控制面：按键 → 参数修改
//!
//! 参数只由这里修改；模拟与渲染每帧读取一次快照。

use crate::config::grid::{DENSITY_MAX, DENSITY_MIN};
use crate::config::{CascadeConfig, ParamStore, PhysicsParams};
use crate::render::CompositeSettings;

/// 每次按键的密度步长
pub const DENSITY_STEP: f32 = 0.05;

/// 控制动作
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ControlAction {
    ToggleCollide,
    ToggleMask,
    ToggleInvert,
    ToggleSquares,
    DensityUp,
    DensityDown,
    Reseed,
    Capture,
    Quit,
}

impl ControlAction {
    /// 字符键映射（大小写不敏感）
    pub fn from_char(c: char) -> Option<Self> {
        match c.to_ascii_lowercase() {
            'c' => Some(Self::ToggleCollide),
            'm' => Some(Self::ToggleMask),
            'i' => Some(Self::ToggleInvert),
            's' => Some(Self::ToggleSquares),
            '+' | '=' => Some(Self::DensityUp),
            '-' | '_' => Some(Self::DensityDown),
            'r' => Some(Self::Reseed),
            'p' => Some(Self::Capture),
            'q' => Some(Self::Quit),
            _ => None,
        }
    }

    /// winit 逻辑键映射
    pub fn from_key(key: &winit::keyboard::Key) -> Option<Self> {
        use winit::keyboard::{Key, NamedKey};
        match key {
            Key::Character(text) => {
                let mut chars = text.chars();
                match (chars.next(), chars.next()) {
                    (Some(c), None) => Self::from_char(c),
                    _ => None,
                }
            }
            Key::Named(NamedKey::Escape) => Some(Self::Quit),
            _ => None,
        }
    }
}

/// 控制面状态
#[derive(Debug, Clone)]
pub struct ControlSurface {
    params: ParamStore,
    density: f32,
    composite: CompositeSettings,
}

impl ControlSurface {
    pub fn new(config: &CascadeConfig) -> Self {
        Self {
            params: ParamStore::new(config.physics),
            density: config.grid.density,
            composite: CompositeSettings::from(&config.display),
        }
    }

    /// 参数存储（可交给其它线程）
    pub fn store(&self) -> &ParamStore {
        &self.params
    }

    pub fn params(&self) -> PhysicsParams {
        self.params.snapshot()
    }

    pub fn density(&self) -> f32 {
        self.density
    }

    pub fn set_density(&mut self, density: f32) {
        self.density = density.clamp(DENSITY_MIN, DENSITY_MAX);
    }

    pub fn composite(&self) -> CompositeSettings {
        self.composite
    }

    /// 应用参数类动作；返回是否被处理（重播种、截图、退出由调用方处理）
    pub fn apply(&mut self, action: ControlAction) -> bool {
        match action {
            ControlAction::ToggleCollide => {
                self.params.update(|p| p.collide = !p.collide);
                tracing::info!(target: "engine", "Mask collision: {}", on_off(self.params().collide));
            }
            ControlAction::ToggleInvert => {
                self.params.update(|p| p.invert_mask = !p.invert_mask);
                tracing::info!(target: "engine", "Invert mask: {}", on_off(self.params().invert_mask));
            }
            ControlAction::ToggleSquares => {
                self.params.update(|p| p.render_squares = !p.render_squares);
                tracing::info!(target: "engine", "Render squares: {}", on_off(self.params().render_squares));
            }
            ControlAction::ToggleMask => {
                self.composite.show_mask = !self.composite.show_mask;
                tracing::info!(target: "engine", "Show mask: {}", on_off(self.composite.show_mask));
            }
            ControlAction::DensityUp => {
                self.set_density(self.density + DENSITY_STEP);
                tracing::info!(target: "engine", "Density: {:.2}", self.density);
            }
            ControlAction::DensityDown => {
                self.set_density(self.density - DENSITY_STEP);
                tracing::info!(target: "engine", "Density: {:.2}", self.density);
            }
            ControlAction::Reseed | ControlAction::Capture | ControlAction::Quit => return false,
        }
        true
    }

    /// 把当前设置写回配置
    pub fn store_into(&self, config: &mut CascadeConfig) {
        config.physics = self.params();
        config.grid.density = self.density;
        config.display.show_mask = self.composite.show_mask;
        config.display.mask_alpha = self.composite.mask_alpha;
        config.display.trail_fade = self.composite.trail_fade;
    }
}

fn on_off(value: bool) -> &'static str {
    if value {
        "ON"
    } else {
        "OFF"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_key_mapping() {
        assert_eq!(ControlAction::from_char('C'), Some(ControlAction::ToggleCollide));
        assert_eq!(ControlAction::from_char('m'), Some(ControlAction::ToggleMask));
        assert_eq!(ControlAction::from_char('+'), Some(ControlAction::DensityUp));
        assert_eq!(ControlAction::from_char('x'), None);

        let key = winit::keyboard::Key::Character("i".into());
        assert_eq!(ControlAction::from_key(&key), Some(ControlAction::ToggleInvert));
    }

    #[test]
    fn test_toggles_update_params() {
        let mut control = ControlSurface::new(&CascadeConfig::default());
        assert!(control.params().collide);
        assert!(control.apply(ControlAction::ToggleCollide));
        assert!(!control.params().collide);
        assert!(control.apply(ControlAction::ToggleMask));
        assert!(!control.composite().show_mask);
        assert!(!control.apply(ControlAction::Reseed));
    }

    #[test]
    fn test_density_is_bounded() {
        let mut control = ControlSurface::new(&CascadeConfig::default());
        for _ in 0..20 {
            control.apply(ControlAction::DensityUp);
        }
        assert_eq!(control.density(), DENSITY_MAX);
        for _ in 0..20 {
            control.apply(ControlAction::DensityDown);
        }
        assert_eq!(control.density(), DENSITY_MIN);
    }

    #[test]
    fn test_store_into_config() {
        let mut control = ControlSurface::new(&CascadeConfig::default());
        control.apply(ControlAction::ToggleSquares);
        control.apply(ControlAction::DensityUp);
        let mut config = CascadeConfig::default();
        control.store_into(&mut config);
        assert!(config.physics.render_squares);
        assert!((config.grid.density - 0.2).abs() < 1e-6);
    }
}
