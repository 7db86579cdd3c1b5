//! # Cascade
//!
//! A mask-driven particle cascade: a dense grid of particles falls down the
//! screen and piles up on, bounces off, or slides around the occupied regions
//! of a live occupancy mask (typically a segmented camera image).
//!
//! ## Features
//!
//! - **Deterministic update rule**: gravity, lateral jitter, mask collision and
//!   respawn, identical on the CPU and GPU backends
//! - **Resolution management**: grid size follows viewport aspect ratio and a
//!   density setting, with allocation fallback to a lower density
//! - **Compositing**: trail buffer plus a display output and a network output
//! - **Mask feed**: frames arrive on a bounded channel from any producer thread
//!
//! ## Frame order
//!
//! mask ingest (on new frame) → resolution sync → update → render.
//!
//! ```no_run
//! use cascade::config::{GridConfig, PhysicsParams};
//! use cascade::simulation::{Cascade, Viewport};
//!
//! let mut cascade = Cascade::cpu(GridConfig::default());
//! let viewport = Viewport::new(640, 480);
//! cascade.sync_resolution(viewport, 0.15);
//! cascade.step(1.0 / 60.0, &PhysicsParams::default());
//! let primitives = cascade.primitives(viewport, &PhysicsParams::default());
//! # let _ = primitives;
//! ```
//!
//! ## Modules
//!
//! - [`core`]: Engine entry point, controls and error types
//! - [`config`]: Configuration files, environment overrides and parameters
//! - [`simulation`]: Particle state, mask sampling, update rule and lifecycle
//! - [`render`]: Primitive generation and CPU compositing
//! - [`gpu`]: wgpu backend for the update, render and composite programs

/// Engine entry point, controls and error types
#[macro_use]
pub mod core;
/// Configuration system
pub mod config;
/// Particle simulation core
pub mod simulation;
/// Primitive generation and CPU compositing
pub mod render;
/// wgpu device backend
pub mod gpu;
