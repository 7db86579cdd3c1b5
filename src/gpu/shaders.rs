//! WGSL 程序
//!
//! `UPDATE_SHADER` 与 `simulation::update::step_particle`、`simulation::noise` 逐行对应，
//! 修改任何一边都必须同步另一边。

/// 更新程序工作组大小
pub const UPDATE_WORKGROUP_SIZE: u32 = 64;

/// 更新程序：每个网格坐标一个调用，读 `state_in` 写 `state_out`
pub const UPDATE_SHADER: &str = r#"
struct UpdateUniforms {
    grid_width: u32,
    grid_height: u32,
    mask_width: u32,
    mask_height: u32,
    dt: f32,
    time: f32,
    gravity: f32,
    noise_strength: f32,
    threshold: f32,
    top_bias: f32,
    bounce_dampen: f32,
    collide: u32,
    invert_mask: u32,
    has_mask: u32,
    _pad0: u32,
    _pad1: u32,
};

@group(0) @binding(0) var<uniform> u: UpdateUniforms;
@group(0) @binding(1) var<storage, read> state_in: array<vec4<f32>>;
@group(0) @binding(2) var<storage, read_write> state_out: array<vec4<f32>>;
@group(0) @binding(3) var<storage, read> mask_values: array<f32>;

const LATERAL_DAMPING: f32 = 1.5;
const LOWER_BOUND: f32 = 1.05;
const UPPER_ESCAPE: f32 = -1.0;
const JITTER_RATE: f32 = 4.0;
const SALT_JITTER: u32 = 0x9E3779B9u;
const SALT_SPAWN_X: u32 = 11u;
const SALT_SPAWN_Y: u32 = 12u;
const SALT_SPAWN_VX: u32 = 13u;
const SPAWN_Y_SPREAD: f32 = 0.05;
const SPAWN_VX_SPREAD: f32 = 0.005;

fn pcg_hash(input: u32) -> u32 {
    let state = input * 747796405u + 2891336453u;
    let word = ((state >> ((state >> 28u) + 4u)) ^ state) * 277803737u;
    return (word >> 22u) ^ word;
}

fn hash01(index: u32, tick: u32, salt: u32) -> f32 {
    let h = pcg_hash(index ^ pcg_hash(tick ^ pcg_hash(salt)));
    return f32(h >> 8u) / 16777216.0;
}

fn jitter(index: u32, time: f32) -> f32 {
    let t = time * JITTER_RATE;
    let tick_f = floor(t);
    let f = t - tick_f;
    let tick = bitcast<u32>(i32(tick_f));
    let a = hash01(index, tick, SALT_JITTER);
    let b = hash01(index, tick + 1u, SALT_JITTER);
    let s = f * f * (3.0 - 2.0 * f);
    return (a + (b - a) * s) * 2.0 - 1.0;
}

fn is_finite_f32(v: f32) -> bool {
    return v == v && abs(v) <= 3.4028235e38;
}

// 帧外（含 NaN 坐标）与无帧都视为无占用
fn occupied(x: f32, y: f32) -> bool {
    if (!(x >= 0.0 && x <= 1.0 && y >= 0.0 && y <= 1.0)) {
        return false;
    }
    let px = min(u32(x * f32(u.mask_width)), u.mask_width - 1u);
    let py = min(u32(y * f32(u.mask_height)), u.mask_height - 1u);
    var value = mask_values[py * u.mask_width + px];
    if (u.invert_mask != 0u) {
        value = 1.0 - value;
    }
    return value > u.threshold;
}

fn respawn(index: u32) -> vec4<f32> {
    let tick = bitcast<u32>(u.time);
    let ux = hash01(index, tick, SALT_SPAWN_X);
    let uy = hash01(index, tick, SALT_SPAWN_Y);
    let uvx = hash01(index, tick, SALT_SPAWN_VX);
    return vec4<f32>(
        ux,
        (uy * 2.0 - 1.0) * SPAWN_Y_SPREAD,
        (uvx * 2.0 - 1.0) * SPAWN_VX_SPREAD,
        0.0,
    );
}

@compute
@workgroup_size(64)
fn update_main(@builtin(global_invocation_id) gid: vec3<u32>) {
    let index = gid.x;
    if (index >= u.grid_width * u.grid_height) {
        return;
    }

    let p = state_in[index];
    let dt = u.dt;

    var vy = p.w + u.gravity * dt;

    var vx = p.z + jitter(index, u.time) * u.noise_strength * dt;
    vx = vx * max(1.0 - LATERAL_DAMPING * dt, 0.0);

    vy = vy - u.top_bias * u.gravity * dt * (1.0 - clamp(p.y, 0.0, 1.0));

    var x = p.x + vx * dt;
    var y = p.y + vy * dt;

    if (!(x >= 0.0 && x <= 1.0)) {
        x = x - floor(x);
    }

    if (u.collide != 0u && u.has_mask != 0u) {
        let embedded = occupied(p.x, p.y);
        if (!embedded && occupied(x, y)) {
            vy = -vy * u.bounce_dampen;
            y = p.y;
            // 台阶或斜面：横向位移同样被拒绝，反弹后不会停在掩码内部
            if (occupied(x, y)) {
                vx = -vx * u.bounce_dampen;
                x = p.x;
            }
        }
    }

    let ok = is_finite_f32(x) && is_finite_f32(y) && is_finite_f32(vx) && is_finite_f32(vy);
    if (!ok || y > LOWER_BOUND || y < UPPER_ESCAPE) {
        state_out[index] = respawn(index);
        return;
    }
    state_out[index] = vec4<f32>(x, y, vx, vy);
}
"#;

/// 渲染程序：每个粒子一个实例化四边形（6 个顶点）
pub const RENDER_SHADER: &str = r#"
struct RenderUniforms {
    grid_width: u32,
    grid_height: u32,
    viewport_width: f32,
    viewport_height: f32,
    point_size: f32,
    shrink_strength: f32,
    render_squares: u32,
    _pad: u32,
};

@group(0) @binding(0) var<uniform> r: RenderUniforms;
@group(0) @binding(1) var<storage, read> particles: array<vec4<f32>>;

struct VsOut {
    @builtin(position) position: vec4<f32>,
    @location(0) local: vec2<f32>,
};

@vertex
fn vs_main(
    @builtin(vertex_index) vertex_index: u32,
    @builtin(instance_index) instance_index: u32,
) -> VsOut {
    var corners = array<vec2<f32>, 6>(
        vec2<f32>(-1.0, -1.0),
        vec2<f32>(1.0, -1.0),
        vec2<f32>(1.0, 1.0),
        vec2<f32>(-1.0, -1.0),
        vec2<f32>(1.0, 1.0),
        vec2<f32>(-1.0, 1.0),
    );

    let p = particles[instance_index];
    let size = max(0.5, r.point_size * (1.0 - r.shrink_strength * clamp(p.y, 0.0, 1.0)));
    let corner = corners[vertex_index];
    let pixel = vec2<f32>(p.x * r.viewport_width, p.y * r.viewport_height) + corner * size * 0.5;

    var out: VsOut;
    out.position = vec4<f32>(
        pixel.x / r.viewport_width * 2.0 - 1.0,
        1.0 - pixel.y / r.viewport_height * 2.0,
        0.0,
        1.0,
    );
    out.local = corner;
    return out;
}

@fragment
fn fs_main(in: VsOut) -> @location(0) vec4<f32> {
    if (r.render_squares == 0u && dot(in.local, in.local) > 1.0) {
        discard;
    }
    return vec4<f32>(1.0, 1.0, 1.0, 1.0);
}
"#;

/// 合成程序：全屏三角形，纯色或采样纹理乘以 `tint`
///
/// `mode`: 0 = 纯色，1 = RGBA 纹理，2 = 单通道纹理（R 复制到 RGB）
pub const COMPOSITE_SHADER: &str = r#"
struct CompositeUniforms {
    tint: vec4<f32>,
    mode: u32,
    _pad0: u32,
    _pad1: u32,
    _pad2: u32,
};

@group(0) @binding(0) var<uniform> c: CompositeUniforms;
@group(0) @binding(1) var src: texture_2d<f32>;
@group(0) @binding(2) var samp: sampler;

struct VsOut {
    @builtin(position) position: vec4<f32>,
    @location(0) uv: vec2<f32>,
};

@vertex
fn vs_main(@builtin(vertex_index) vertex_index: u32) -> VsOut {
    let uv = vec2<f32>(f32((vertex_index << 1u) & 2u), f32(vertex_index & 2u));
    var out: VsOut;
    out.position = vec4<f32>(uv.x * 2.0 - 1.0, 1.0 - uv.y * 2.0, 0.0, 1.0);
    out.uv = uv;
    return out;
}

@fragment
fn fs_main(in: VsOut) -> @location(0) vec4<f32> {
    let s = textureSample(src, samp, in.uv);
    if (c.mode == 0u) {
        return c.tint;
    }
    if (c.mode == 2u) {
        return vec4<f32>(s.rrr, 1.0) * c.tint;
    }
    return s * c.tint;
}
"#;
