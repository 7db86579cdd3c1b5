use cascade::config::{CascadeConfig, GridConfig, PhysicsParams};
use cascade::core::Engine;
use cascade::render::{CompositeSettings, Compositor};
use cascade::simulation::{
    Cascade, GridDims, MaskFeed, MaskFrame, MaskSampler, ParticleState, SimulationBackend,
    Viewport,
};
use proptest::prelude::*;
use std::sync::Arc;

fn seeded(seed: u64) -> GridConfig {
    GridConfig {
        seed: Some(seed),
        ..Default::default()
    }
}

/// 1x1 网格，便于摆放单个粒子
fn single_particle(p: ParticleState) -> Cascade {
    let grid = GridConfig {
        min_width: 1,
        min_height: 1,
        max_width: 1,
        max_height: 1,
        seed: Some(1),
        ..Default::default()
    };
    let mut cascade = Cascade::cpu(grid);
    assert!(cascade.sync_resolution(Viewport::new(10, 10), 0.15));
    cascade.backend_mut().load(&[p]).unwrap();
    cascade
}

fn quiet(gravity: f32) -> PhysicsParams {
    PhysicsParams {
        gravity,
        noise_strength: 0.0,
        top_bias: 0.0,
        bounce_dampen: 0.5,
        ..Default::default()
    }
}

fn only(cascade: &Cascade) -> ParticleState {
    cascade.snapshot().unwrap()[0]
}

#[test]
fn test_default_grid_for_landscape_viewport() {
    let mut cascade = Cascade::cpu(seeded(1));
    assert!(cascade.sync_resolution(Viewport::new(800, 600), 0.15));
    // 800 * 0.15 = 120 -> 最小 200；200 * 0.75 = 150 -> 最小 300
    assert_eq!(cascade.grid_dimensions(), Some(GridDims::new(200, 300)));
    assert_eq!(cascade.snapshot().unwrap().len(), 60_000);

    // 视口与密度都没变：不重新分配
    assert!(!cascade.sync_resolution(Viewport::new(800, 600), 0.152));
}

#[test]
fn test_particle_count_is_constant() {
    let mut cascade = Cascade::cpu(seeded(2));
    cascade.sync_resolution(Viewport::new(800, 600), 0.15);
    let params = PhysicsParams::default();
    for _ in 0..30 {
        assert!(cascade.step(1.0 / 60.0, &params));
    }
    assert_eq!(cascade.snapshot().unwrap().len(), cascade.particle_count());
    assert_eq!(cascade.stats().updates, 30);
}

#[test]
fn test_seed_distribution() {
    let mut cascade = Cascade::cpu(seeded(3));
    cascade.sync_resolution(Viewport::new(800, 600), 0.15);
    let particles = cascade.snapshot().unwrap();

    let mean_x = particles.iter().map(|p| p.x as f64).sum::<f64>() / particles.len() as f64;
    assert!((mean_x - 0.5).abs() < 0.01, "mean x = {}", mean_x);
    assert!(particles.iter().all(|p| p.vy == 0.0));
    assert!(particles.iter().all(|p| p.y.abs() <= 0.05));
    assert!(particles.iter().all(|p| (0.0..=1.0).contains(&p.x)));
}

#[test]
fn test_resize_discards_state() {
    let mut cascade = Cascade::cpu(seeded(4));
    cascade.sync_resolution(Viewport::new(800, 600), 0.15);
    for _ in 0..10 {
        cascade.step(1.0 / 60.0, &PhysicsParams::default());
    }
    assert!(cascade.snapshot().unwrap().iter().any(|p| p.vy != 0.0));

    assert!(cascade.sync_resolution(Viewport::new(600, 1200), 0.15));
    assert_eq!(cascade.grid_dimensions(), Some(GridDims::new(200, 400)));
    let fresh = cascade.snapshot().unwrap();
    assert_eq!(fresh.len(), 80_000);
    assert!(fresh.iter().all(|p| p.vy == 0.0));
    assert_eq!(cascade.stats().reallocations, 2);
}

#[test]
fn test_collide_flag_irrelevant_without_mask() {
    let viewport = Viewport::new(400, 300);
    let mut a = Cascade::cpu(seeded(5));
    let mut b = Cascade::cpu(seeded(5));
    a.sync_resolution(viewport, 0.15);
    b.sync_resolution(viewport, 0.15);

    let with = PhysicsParams {
        collide: true,
        ..Default::default()
    };
    let without = PhysicsParams {
        collide: false,
        ..Default::default()
    };
    for _ in 0..20 {
        a.step(1.0 / 60.0, &with);
        b.step(1.0 / 60.0, &without);
    }
    assert_eq!(a.snapshot().unwrap(), b.snapshot().unwrap());
}

#[test]
fn test_gravity_integration() {
    let mut cascade = single_particle(ParticleState::new(0.5, 0.0, 0.0, 0.0));
    let params = quiet(1.0);
    for _ in 0..5 {
        cascade.step(0.1, &params);
    }
    let p = only(&cascade);
    assert!((p.vy - 0.5).abs() < 1e-5);
    // 半隐式欧拉：0.01 * (1 + 2 + 3 + 4 + 5)
    assert!((p.y - 0.15).abs() < 1e-5);
    assert_eq!(p.x, 0.5);
}

#[test]
fn test_uniform_mask_threshold_boundary() {
    let mut sampler = MaskSampler::new();
    sampler.replace(Arc::new(MaskFrame::uniform(4, 4, 0.5).unwrap()));
    let grid = GridDims::new(4, 4);
    for row in 0..4 {
        for col in 0..4 {
            let c = grid.texel_center(col, row);
            assert!(sampler.occupied(c.x, c.y, 0.45, false));
            assert!(!sampler.occupied(c.x, c.y, 0.55, false));
        }
    }
}

#[test]
fn test_threshold_decides_occupancy() {
    // 上两行 0，下两行 0.5
    let mut values = vec![0.0; 8];
    values.extend_from_slice(&[0.5; 8]);
    let mask = Arc::new(MaskFrame::new(4, 4, values).unwrap());

    for (threshold, expect_bounce) in [(0.45, true), (0.55, false)] {
        let mut cascade = single_particle(ParticleState::new(0.5, 0.45, 0.0, 1.0));
        cascade.ingest_mask(mask.clone());
        let params = PhysicsParams {
            threshold,
            ..quiet(0.0)
        };
        cascade.step(0.1, &params);
        let p = only(&cascade);
        if expect_bounce {
            assert!((p.y - 0.45).abs() < 1e-6);
            assert!((p.vy + 0.5).abs() < 1e-6);
        } else {
            assert!((p.y - 0.55).abs() < 1e-5);
            assert!((p.vy - 1.0).abs() < 1e-6);
        }
    }
}

#[test]
fn test_bounce_then_rise() {
    let mut cascade = single_particle(ParticleState::new(0.5, 0.45, 0.0, 1.0));
    cascade.ingest_mask(Arc::new(MaskFrame::new(1, 2, vec![0.0, 1.0]).unwrap()));
    let params = quiet(0.0);

    cascade.step(0.1, &params);
    let p = only(&cascade);
    assert!((p.y - 0.45).abs() < 1e-6);
    assert!((p.vy + 0.5).abs() < 1e-6);

    cascade.step(0.1, &params);
    let p = only(&cascade);
    assert!((p.y - 0.40).abs() < 1e-5);
}

#[test]
fn test_step_shaped_mask_never_swallows_particle() {
    // 左上空，其余占用：斜向撞上台阶
    let mask = Arc::new(MaskFrame::new(2, 2, vec![0.0, 1.0, 1.0, 1.0]).unwrap());
    let mut sampler = MaskSampler::new();
    sampler.replace(mask.clone());
    let mut cascade = single_particle(ParticleState::new(0.45, 0.45, 1.0, 2.0));
    cascade.ingest_mask(mask);
    let params = quiet(1.0);

    for step in 0..30 {
        cascade.step(0.1, &params);
        let p = only(&cascade);
        assert!(
            !sampler.occupied_with(p.x, p.y, &params),
            "step {} ended inside the mask at ({}, {})",
            step,
            p.x,
            p.y
        );
        assert!(p.y < 0.5);
    }
}

#[test]
fn test_inverted_mask_blocks_upward_motion() {
    let mut cascade = single_particle(ParticleState::new(0.5, 0.75, 0.0, -3.0));
    cascade.ingest_mask(Arc::new(MaskFrame::new(1, 2, vec![0.0, 1.0]).unwrap()));
    let params = PhysicsParams {
        invert_mask: true,
        ..quiet(0.0)
    };
    cascade.step(0.1, &params);
    let p = only(&cascade);
    assert!((p.y - 0.75).abs() < 1e-6);
    assert!((p.vy - 1.5).abs() < 1e-6);
}

#[test]
fn test_particle_below_frame_respawns() {
    let mut cascade = single_particle(ParticleState::new(0.3, 1.04, 0.0, 2.0));
    cascade.step(0.1, &quiet(1.0));
    let p = only(&cascade);
    assert_eq!(p.vy, 0.0);
    assert!(p.y.abs() <= 0.05);
}

#[test]
fn test_compositor_outputs() {
    let viewport = Viewport::new(40, 40);
    let mut cascade = Cascade::cpu(seeded(6));
    cascade.sync_resolution(viewport, 0.15);
    let mask = Arc::new(MaskFrame::uniform(4, 4, 0.5).unwrap());
    cascade.ingest_mask(mask.clone());
    let params = PhysicsParams::default();
    cascade.step(1.0 / 60.0, &params);

    let prims = cascade.primitives(viewport, &params);
    assert_eq!(prims.len(), cascade.particle_count());

    let mut compositor = Compositor::new(viewport);
    compositor.advance(&prims, 0.1);
    let settings = CompositeSettings {
        show_mask: false,
        ..Default::default()
    };
    let display = compositor.display_frame(&prims, Some(&mask), &settings);
    let network = compositor.network_frame(&prims, Some(&mask));
    assert_eq!((display.width(), display.height()), (40, 40));
    assert!(network.mean_luma() > display.mean_luma());
    // 网络输出里掩码至少贡献 0.5
    assert!(network.mean_luma() >= 0.5 - 1.0 / 255.0);
}

#[test]
fn test_config_file_drives_headless_run() -> anyhow::Result<()> {
    let dir = tempfile::tempdir()?;
    let config_path = dir.path().join("cascade.toml");
    std::fs::write(
        &config_path,
        r#"
[grid]
density = 0.1
seed = 9

[display]
width = 80
height = 60
"#,
    )?;
    let config = CascadeConfig::from_file(&config_path)?;
    config.validate()?;

    let (sender, feed) = MaskFeed::channel(1);
    sender.publish(MaskFrame::new(1, 2, vec![0.0, 1.0])?);
    let frame = Engine::run_headless(&config, &feed, 20)?;

    let output = dir.path().join("out.png");
    frame.save_png(&output)?;
    let image = image::open(&output)?.to_luma8();
    assert_eq!(image.dimensions(), (80, 60));
    // 下半部分是全不透明度的掩码
    assert_eq!(image.get_pixel(40, 50)[0], 255);
    Ok(())
}

proptest! {
    #[test]
    fn test_step_preserves_bounds(
        gravity in 0.1f32..8.0,
        noise in 0.0f32..2.5,
        threshold in 0.0f32..1.0,
        top_bias in 0.0f32..0.5,
        bounce in 0.1f32..1.0,
        dt in 0.0f32..0.2,
        collide in any::<bool>(),
        invert in any::<bool>(),
        mask_values in proptest::collection::vec(0.0f32..1.0, 16),
        seed in any::<u64>(),
    ) {
        let grid = GridConfig {
            min_width: 8,
            min_height: 8,
            max_width: 8,
            max_height: 8,
            seed: Some(seed),
            ..Default::default()
        };
        let mut cascade = Cascade::cpu(grid);
        cascade.sync_resolution(Viewport::new(100, 100), 0.15);
        cascade.ingest_mask(Arc::new(MaskFrame::new(4, 4, mask_values).unwrap()));

        let params = PhysicsParams {
            gravity,
            noise_strength: noise,
            threshold,
            top_bias,
            bounce_dampen: bounce,
            collide,
            invert_mask: invert,
            ..Default::default()
        };
        for _ in 0..3 {
            prop_assert!(cascade.step(dt, &params));
        }

        let particles = cascade.snapshot().unwrap();
        prop_assert_eq!(particles.len(), 64);
        for p in particles {
            prop_assert!(p.is_finite());
            prop_assert!((0.0..=1.0).contains(&p.x));
            prop_assert!((-1.0..=1.05).contains(&p.y));
        }
    }
}
