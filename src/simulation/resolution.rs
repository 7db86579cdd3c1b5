//! 分辨率与生命周期管理
//!
//! 两个状态：`Unallocated` 与 `Allocated(w, h)`。首次获得视口时分配；视口尺寸改变、
//! 或密度变化超过滞回阈值时重新分配并重新播种，旧状态直接丢弃。

use super::state::GridDims;
use crate::config::GridConfig;

/// 视口尺寸（像素）
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Viewport {
    pub width: u32,
    pub height: u32,
}

impl Viewport {
    pub const fn new(width: u32, height: u32) -> Self {
        Self { width, height }
    }

    /// 高宽比（高 / 宽）；宽为 0 时为 0
    pub fn aspect_ratio(&self) -> f32 {
        if self.width == 0 {
            0.0
        } else {
            self.height as f32 / self.width as f32
        }
    }
}

/// 由视口与密度计算网格尺寸
///
/// `width = clamp(vw * density, min_width, max_width)`，
/// `height = clamp(max(min_height, width * vh / vw), .., max_height)`。
/// 退化视口（宽或高为 0）落到最小值。
pub fn compute_grid_dims(viewport: Viewport, density: f32, limits: &GridConfig) -> GridDims {
    let raw_width = viewport.width as f32 * density.max(0.0);
    let width = (raw_width as u32).clamp(limits.min_width, limits.max_width.max(limits.min_width));
    let raw_height = (width as f32 * viewport.aspect_ratio()) as u32;
    let height = raw_height
        .max(limits.min_height)
        .min(limits.max_height.max(limits.min_height));
    GridDims::new(width, height)
}

/// 生命周期状态
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ResolutionState {
    Unallocated,
    Allocated {
        dims: GridDims,
        viewport: Viewport,
        density: f32,
    },
}

/// 分辨率管理器
#[derive(Debug, Clone)]
pub struct ResolutionManager {
    limits: GridConfig,
    state: ResolutionState,
}

impl ResolutionManager {
    pub fn new(limits: GridConfig) -> Self {
        Self {
            limits,
            state: ResolutionState::Unallocated,
        }
    }

    pub fn state(&self) -> ResolutionState {
        self.state
    }

    pub fn limits(&self) -> &GridConfig {
        &self.limits
    }

    pub fn dims(&self) -> Option<GridDims> {
        match self.state {
            ResolutionState::Allocated { dims, .. } => Some(dims),
            ResolutionState::Unallocated => None,
        }
    }

    /// 最近一次生效的密度
    pub fn density(&self) -> Option<f32> {
        match self.state {
            ResolutionState::Allocated { density, .. } => Some(density),
            ResolutionState::Unallocated => None,
        }
    }

    /// 判断是否需要（重新）分配；需要时返回新的网格尺寸，但不改变状态
    pub fn plan(&self, viewport: Viewport, density: f32) -> Option<GridDims> {
        match self.state {
            ResolutionState::Unallocated => {
                Some(compute_grid_dims(viewport, density, &self.limits))
            }
            ResolutionState::Allocated {
                viewport: last_viewport,
                density: last_density,
                ..
            } => {
                let resized = viewport != last_viewport;
                let density_changed =
                    (density - last_density).abs() > self.limits.density_hysteresis;
                if resized || density_changed {
                    Some(compute_grid_dims(viewport, density, &self.limits))
                } else {
                    None
                }
            }
        }
    }

    /// 分配成功后提交新状态
    pub fn commit(&mut self, dims: GridDims, viewport: Viewport, density: f32) {
        self.state = ResolutionState::Allocated {
            dims,
            viewport,
            density,
        };
    }

    /// 分配失败后回到未分配状态
    pub fn reset(&mut self) {
        self.state = ResolutionState::Unallocated;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_compute_dims_defaults() {
        let limits = GridConfig::default();
        // 1920 * 0.15 = 288, 288 * 1080 / 1920 = 162 -> 300
        let dims = compute_grid_dims(Viewport::new(1920, 1080), 0.15, &limits);
        assert_eq!(dims, GridDims::new(288, 300));

        // 竖屏
        let dims = compute_grid_dims(Viewport::new(2000, 4000), 0.3, &limits);
        assert_eq!(dims, GridDims::new(600, 1200));
    }

    #[test]
    fn test_compute_dims_clamps() {
        let limits = GridConfig::default();
        let dims = compute_grid_dims(Viewport::new(100, 100), 0.05, &limits);
        assert_eq!(dims, GridDims::new(200, 300));

        let dims = compute_grid_dims(Viewport::new(10_000, 100_000), 0.6, &limits);
        assert_eq!(dims, GridDims::new(1024, 2048));
    }

    #[test]
    fn test_degenerate_viewport() {
        let limits = GridConfig::default();
        let dims = compute_grid_dims(Viewport::new(0, 0), 0.15, &limits);
        assert_eq!(dims, GridDims::new(200, 300));
        let dims = compute_grid_dims(Viewport::new(0, 800), f32::NAN, &limits);
        assert_eq!(dims, GridDims::new(200, 300));
    }

    #[test]
    fn test_first_viewport_allocates() {
        let manager = ResolutionManager::new(GridConfig::default());
        assert!(manager.dims().is_none());
        assert!(manager.plan(Viewport::new(800, 600), 0.15).is_some());
    }

    #[test]
    fn test_hysteresis() {
        let mut manager = ResolutionManager::new(GridConfig::default());
        let viewport = Viewport::new(1600, 1200);
        let dims = manager.plan(viewport, 0.15).unwrap();
        manager.commit(dims, viewport, 0.15);

        assert!(manager.plan(viewport, 0.15).is_none());
        assert!(manager.plan(viewport, 0.154).is_none());
        assert!(manager.plan(viewport, 0.16).is_some());
        assert!(manager.plan(Viewport::new(1601, 1200), 0.15).is_some());
    }

    #[test]
    fn test_reset() {
        let mut manager = ResolutionManager::new(GridConfig::default());
        manager.commit(GridDims::new(200, 300), Viewport::new(10, 10), 0.15);
        manager.reset();
        assert_eq!(manager.state(), ResolutionState::Unallocated);
    }
}
