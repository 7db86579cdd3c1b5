//! 引擎主入口
//!
//! 定义 [`Engine`]、命令行选项和两种运行方式：
//! - 窗口模式：wgpu 设备后端 + GPU 合成，按键修改参数
//! - 无头模式：CPU 后端跑固定帧数，最后一帧写成 PNG

use crate::config::{CascadeConfig, LoggingConfig};
use crate::gpu::{GpuBackend, GpuCompositor, GpuContext, OutputKind};
use crate::render::{Compositor, Frame};
use crate::simulation::{
    spawn_image_sequence, Cascade, MaskFeed, MaskReceiver, SimulationBackend, Viewport,
};
use clap::Parser;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;
use winit::event::{ElementState, Event, WindowEvent};
use winit::event_loop::{EventLoop, EventLoopWindowTarget};
use winit::window::{Window, WindowBuilder};

use super::control::{ControlAction, ControlSurface};
use super::error::{CascadeError, CascadeResult, CascadeStatus, NotReadyReason};

/// 无头模式的固定步长
pub const HEADLESS_DT: f32 = 1.0 / 60.0;

/// 掩码通道的最大积压帧数
const MASK_BACKLOG: usize = 2;

const KEYS: &str = "KEYS:\n  \
C collide | M show mask | I invert mask | S squares | +/- density\n  \
R reseed | P capture network frame | Q/Esc quit";

/// 掩码序列播放速率的允许范围
fn parse_mask_fps(value: &str) -> Result<f32, String> {
    let fps: f32 = value.parse().map_err(|e| format!("{}", e))?;
    if (0.1..=120.0).contains(&fps) {
        Ok(fps)
    } else {
        Err(format!("{} is outside 0.1..=120", fps))
    }
}

/// 命令行选项
#[derive(Parser, Debug, Clone, PartialEq)]
#[command(
    name = "cascade",
    version,
    about = "Particle cascade masked by a live occupancy mask",
    after_help = KEYS
)]
pub struct EngineOptions {
    /// config file (TOML or JSON); searched for when omitted
    #[arg(long)]
    pub config: Option<PathBuf>,

    /// mask image; repeat to play a sequence
    #[arg(long = "mask", value_name = "IMAGE")]
    pub masks: Vec<PathBuf>,

    /// mask sequence playback rate
    #[arg(long, default_value_t = 12.0, value_parser = parse_mask_fps)]
    pub mask_fps: f32,

    /// run N frames on the CPU backend without a window
    #[arg(long, value_name = "FRAMES")]
    pub headless: Option<u32>,

    /// PNG written by a headless run
    #[arg(long, default_value = "cascade.png")]
    pub output: PathBuf,
}

/// 粒子瀑布引擎
///
/// # 示例
///
/// ```no_run
/// use cascade::core::Engine;
///
/// fn main() -> Result<(), Box<dyn std::error::Error>> {
///     Engine::run()?;
///     Ok(())
/// }
/// ```
pub struct Engine;

impl Engine {
    /// 按进程参数运行
    pub fn run() -> CascadeResult<()> {
        Self::run_with(EngineOptions::parse())
    }

    /// 按给定选项运行
    pub fn run_with(options: EngineOptions) -> CascadeResult<()> {
        let (config, config_path) = Self::load_config(&options)?;
        Self::initialize_logging(&config.logging);

        let (sender, feed) = MaskFeed::channel(MASK_BACKLOG);
        let _feed_thread = if options.masks.is_empty() {
            None
        } else {
            Some(spawn_image_sequence(
                options.masks.clone(),
                options.mask_fps,
                sender,
            )?)
        };

        match options.headless {
            Some(frames) => {
                let frame = Self::run_headless(&config, &feed, frames)?;
                frame.save_png(&options.output)?;
                tracing::info!(target: "engine", "Wrote {:?}", options.output);
            }
            None => Self::run_windowed(config, config_path, feed)?,
        }

        tracing::info!(target: "engine", "Engine shutting down");
        Ok(())
    }

    fn load_config(options: &EngineOptions) -> CascadeResult<(CascadeConfig, Option<PathBuf>)> {
        let (mut config, path) = match &options.config {
            Some(path) => (CascadeConfig::from_file(path)?, Some(path.clone())),
            None => CascadeConfig::load_or_default(),
        };
        config.apply_env_overrides();
        config.validate()?;
        Ok((config, path))
    }

    /// 初始化日志系统
    ///
    /// `RUST_LOG` 优先，否则使用配置中的级别。
    fn initialize_logging(logging: &LoggingConfig) {
        let filter = tracing_subscriber::EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(logging.level.as_filter()));
        let _ = tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_thread_names(logging.thread_names)
            .try_init();
        tracing::info!(target: "engine", "Engine starting");
    }

    /// 同步分辨率；分配失败时降低密度重试一次
    fn sync_with_fallback<B: SimulationBackend>(
        cascade: &mut Cascade<B>,
        viewport: Viewport,
        control: &mut ControlSurface,
    ) {
        cascade.sync_resolution(viewport, control.density());
        if cascade.status() != CascadeStatus::NotReady(NotReadyReason::AllocationFailed) {
            return;
        }

        let density = control.density();
        let fallback = cascade.fallback_density(density);
        if fallback < density {
            tracing::warn!(
                target: "engine",
                "Allocation failed at density {:.2}, retrying at {:.2}",
                density,
                fallback
            );
            control.set_density(fallback);
            cascade.sync_resolution(viewport, control.density());
        }
    }

    /// 无头运行：CPU 后端以固定步长跑 `frames` 帧，返回最后的网络输出
    pub fn run_headless(
        config: &CascadeConfig,
        feed: &MaskReceiver,
        frames: u32,
    ) -> CascadeResult<Frame> {
        let viewport = Viewport::new(config.display.width, config.display.height);
        let mut control = ControlSurface::new(config);
        let mut cascade = Cascade::cpu(config.grid);
        let mut compositor = Compositor::new(viewport);
        let fade = control.composite().trail_fade;

        for _ in 0..frames {
            cascade.poll_mask(feed);
            Self::sync_with_fallback(&mut cascade, viewport, &mut control);
            let params = control.params();
            if cascade.step(HEADLESS_DT, &params) {
                compositor.advance(&cascade.primitives(viewport, &params), fade);
            }
        }

        let params = control.params();
        let prims = if cascade.is_ready() {
            cascade.primitives(viewport, &params)
        } else {
            Vec::new()
        };
        let stats = cascade.stats();
        tracing::info!(
            target: "engine",
            "Headless run finished: {} updates, {} particles, status {}",
            stats.updates,
            cascade.particle_count(),
            cascade.status()
        );
        Ok(compositor.network_frame(&prims, cascade.mask().frame().map(|frame| &**frame)))
    }

    /// 初始化窗口并进入事件循环
    fn run_windowed(
        config: CascadeConfig,
        config_path: Option<PathBuf>,
        feed: MaskReceiver,
    ) -> CascadeResult<()> {
        let event_loop =
            EventLoop::new().map_err(|e| CascadeError::EventLoop(e.to_string()))?;
        let window = Arc::new(
            WindowBuilder::new()
                .with_title(config.display.title.clone())
                .with_inner_size(winit::dpi::PhysicalSize::new(
                    config.display.width,
                    config.display.height,
                ))
                .build(&event_loop)
                .map_err(|e| CascadeError::Window(e.to_string()))?,
        );

        let mut runtime = WindowRuntime::new(window, config, config_path, feed)?;

        let result = event_loop.run(move |event, elwt| match event {
            Event::WindowEvent { event, .. } => runtime.handle_window_event(&event, elwt),
            Event::AboutToWait => runtime.window.request_redraw(),
            _ => {}
        });

        result.map_err(|e| CascadeError::EventLoop(format!("Event loop error: {}", e)))
    }
}

/// 窗口模式的运行时状态
struct WindowRuntime {
    window: Arc<Window>,
    surface: wgpu::Surface<'static>,
    surface_config: wgpu::SurfaceConfiguration,
    context: Arc<GpuContext>,
    cascade: Cascade<GpuBackend>,
    compositor: GpuCompositor,
    control: ControlSurface,
    feed: MaskReceiver,
    config: CascadeConfig,
    config_path: Option<PathBuf>,
    last_frame: Instant,
    last_stats: Instant,
    frames_since_stats: u32,
    captures: u32,
}

impl WindowRuntime {
    fn new(
        window: Arc<Window>,
        config: CascadeConfig,
        config_path: Option<PathBuf>,
        feed: MaskReceiver,
    ) -> CascadeResult<Self> {
        let instance = wgpu::Instance::default();
        let surface = instance
            .create_surface(window.clone())
            .map_err(|e| CascadeError::Surface(e.to_string()))?;
        let context = Arc::new(pollster::block_on(GpuContext::new(
            instance,
            Some(&surface),
        ))?);

        let caps = surface.get_capabilities(&context.adapter);
        // 合成按线性 8 位值计算，优先非 sRGB 格式
        let format = caps
            .formats
            .iter()
            .copied()
            .find(|f| !f.is_srgb())
            .or_else(|| caps.formats.first().copied())
            .ok_or_else(|| CascadeError::Surface("no supported surface format".to_string()))?;
        let present_mode = if config.display.vsync {
            wgpu::PresentMode::AutoVsync
        } else {
            wgpu::PresentMode::AutoNoVsync
        };
        let size = window.inner_size();
        let surface_config = wgpu::SurfaceConfiguration {
            usage: wgpu::TextureUsages::RENDER_ATTACHMENT,
            format,
            width: size.width.max(1),
            height: size.height.max(1),
            present_mode,
            alpha_mode: caps
                .alpha_modes
                .first()
                .copied()
                .unwrap_or(wgpu::CompositeAlphaMode::Auto),
            view_formats: vec![],
            desired_maximum_frame_latency: 2,
        };
        surface.configure(&context.device, &surface_config);

        let compositor = GpuCompositor::new(&context, format)?;
        let cascade = Cascade::new(GpuBackend::new(context.clone()), config.grid);
        let control = ControlSurface::new(&config);
        let now = Instant::now();

        Ok(Self {
            window,
            surface,
            surface_config,
            context,
            cascade,
            compositor,
            control,
            feed,
            config,
            config_path,
            last_frame: now,
            last_stats: now,
            frames_since_stats: 0,
            captures: 0,
        })
    }

    fn viewport(&self) -> Viewport {
        Viewport::new(self.surface_config.width, self.surface_config.height)
    }

    /// 处理窗口事件
    fn handle_window_event(&mut self, event: &WindowEvent, elwt: &EventLoopWindowTarget<()>) {
        match event {
            WindowEvent::CloseRequested => self.shutdown(elwt),
            WindowEvent::Resized(size) => {
                if size.width > 0 && size.height > 0 {
                    self.surface_config.width = size.width;
                    self.surface_config.height = size.height;
                    self.surface
                        .configure(&self.context.device, &self.surface_config);
                }
            }
            WindowEvent::KeyboardInput { event, .. }
                if event.state == ElementState::Pressed && !event.repeat =>
            {
                if let Some(action) = ControlAction::from_key(&event.logical_key) {
                    self.handle_action(action, elwt);
                }
            }
            WindowEvent::RedrawRequested => self.redraw(),
            _ => {}
        }
    }

    fn handle_action(&mut self, action: ControlAction, elwt: &EventLoopWindowTarget<()>) {
        if self.control.apply(action) {
            return;
        }
        match action {
            ControlAction::Reseed => {
                if self.cascade.reseed() {
                    tracing::info!(target: "engine", "Particles reseeded");
                }
            }
            ControlAction::Capture => self.capture(),
            ControlAction::Quit => self.shutdown(elwt),
            _ => {}
        }
    }

    /// 一帧：掩码接入 → 分辨率同步 → 更新 → 拖尾 → 显示输出
    fn redraw(&mut self) {
        let now = Instant::now();
        let dt = (now - self.last_frame).as_secs_f32();
        self.last_frame = now;

        if let Some(frame) = self.feed.latest() {
            self.compositor.upload_mask(&self.context, &frame);
            self.cascade.ingest_mask(frame);
        }

        let viewport = self.viewport();
        Engine::sync_with_fallback(&mut self.cascade, viewport, &mut self.control);
        let params = self.control.params();
        self.cascade.step(dt, &params);
        self.compositor.resize(&self.context.device, viewport);

        let output = match self.surface.get_current_texture() {
            Ok(output) => output,
            Err(wgpu::SurfaceError::Lost | wgpu::SurfaceError::Outdated) => {
                self.surface
                    .configure(&self.context.device, &self.surface_config);
                return;
            }
            Err(e) => {
                tracing::warn!(target: "gpu", "Failed to acquire surface texture: {}", e);
                return;
            }
        };
        let view = output
            .texture
            .create_view(&wgpu::TextureViewDescriptor::default());

        let settings = self.control.composite();
        let mut encoder =
            self.context
                .device
                .create_command_encoder(&wgpu::CommandEncoderDescriptor {
                    label: Some("Cascade Display Encoder"),
                });
        if self.cascade.is_ready() {
            self.compositor.advance_trail(
                &self.context,
                &mut encoder,
                self.cascade.backend(),
                &params,
                settings.trail_fade,
            );
        }
        self.compositor.encode_output(
            &self.context,
            &mut encoder,
            &view,
            viewport,
            self.cascade.backend(),
            &params,
            OutputKind::Display,
            &settings,
        );
        self.context.queue.submit(Some(encoder.finish()));
        output.present();

        self.frames_since_stats += 1;
        self.report_stats(now);
    }

    fn report_stats(&mut self, now: Instant) {
        let elapsed = (now - self.last_stats).as_secs_f32();
        if elapsed < self.config.display.stats_interval_secs {
            return;
        }

        let stats = self.cascade.stats();
        let (width, height) = self
            .cascade
            .grid_dimensions()
            .map(|dims| (dims.width, dims.height))
            .unwrap_or((0, 0));
        tracing::info!(
            target: "engine",
            "{:.1} fps | grid {}x{} ({} particles) | update {:.2} ms | {}",
            self.frames_since_stats as f32 / elapsed.max(f32::EPSILON),
            width,
            height,
            self.cascade.particle_count(),
            stats.last_update_ms,
            self.cascade.status()
        );
        self.last_stats = now;
        self.frames_since_stats = 0;
    }

    /// 渲染网络输出并写成 PNG
    fn capture(&mut self) {
        let params = self.control.params();
        let settings = self.control.composite();
        let frame = match self.compositor.render_frame(
            &self.context,
            self.cascade.backend(),
            &params,
            OutputKind::Network,
            &settings,
        ) {
            Ok(frame) => frame,
            Err(e) => {
                tracing::warn!(target: "engine", "Capture failed: {}", e);
                return;
            }
        };

        let path = PathBuf::from(format!("cascade-{:04}.png", self.captures));
        self.captures += 1;
        match frame.save_png(&path) {
            Ok(()) => tracing::info!(target: "engine", "Captured {:?}", path),
            Err(e) => tracing::warn!(target: "engine", "Failed to write {:?}: {}", path, e),
        }
    }

    /// 按需写回设置并退出事件循环
    fn shutdown(&mut self, elwt: &EventLoopWindowTarget<()>) {
        if self.config.display.persist_settings {
            self.control.store_into(&mut self.config);
            let path = self
                .config_path
                .clone()
                .unwrap_or_else(|| PathBuf::from("cascade.toml"));
            match self.config.save(&path) {
                Ok(()) => tracing::info!(target: "config", "Saved settings to {:?}", path),
                Err(e) => tracing::warn!(target: "config", "Failed to save settings: {}", e),
            }
        }
        elwt.exit();
    }
}
