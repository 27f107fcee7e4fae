//! WGSL for every program pass, one fragment entry point per pass.
//!
//! The math mirrors `cpu::programs`; keep them in step.

use crate::pass::{Program, bloom_pass, blur_pass};

/// Fragment entry point of the material-less copy.
pub const BLIT_ENTRY: &str = "fs_blit";

/// Fragment entry point implementing `pass` of `program`.
pub fn entry_point(program: Program, pass: u32) -> Option<&'static str> {
    let entry = match (program, pass) {
        (Program::Blur, blur_pass::BOX) => "fs_box",
        (Program::Blur, blur_pass::GAUSSIAN) => "fs_gaussian",
        (Program::Blur, blur_pass::KAWASE_DOWN) => "fs_kawase_down",
        (Program::Blur, blur_pass::KAWASE_UP) => "fs_kawase_up",
        (Program::Bloom, bloom_pass::PREFILTER) => "fs_bloom_prefilter",
        (Program::Bloom, bloom_pass::KAWASE_DOWN) => "fs_kawase_down",
        (Program::Bloom, bloom_pass::KAWASE_UP) => "fs_bloom_up",
        (Program::Bloom, bloom_pass::BLEND) => "fs_bloom_blend",
        (Program::ColorAdjustment, 0) => "fs_color_adjustment",
        (Program::BrokenGlass, 0) => "fs_broken_glass",
        (Program::Aces, 0) => "fs_aces",
        _ => return None,
    };
    Some(entry)
}

pub const POST_PROCESS_SHADER_SOURCE: &str = r#"
struct PassUniforms {
    blur_offset: vec2<f32>,
    blur_radius: f32,
    threshold: f32,
    threshold_knee: f32,
    bloom_intensity: f32,
    brightness: f32,
    saturation: f32,
    contrast: f32,
    vignette_intensity: f32,
    vignette_roughness: f32,
    vignette_smoothness: f32,
    hue_shift: f32,
    has_aux: f32,
    _pad: vec2<f32>,
};

struct VertexOutput {
    @builtin(position) position: vec4<f32>,
    @location(0) uv: vec2<f32>,
};

@group(0) @binding(0) var<uniform> params: PassUniforms;
@group(0) @binding(1) var input_tex: texture_2d<f32>;
@group(0) @binding(2) var input_sampler: sampler;
@group(0) @binding(3) var aux_tex: texture_2d<f32>;
@group(0) @binding(4) var aux_sampler: sampler;

const LUMA: vec3<f32> = vec3<f32>(0.2126, 0.7152, 0.0722);
const GAUSSIAN_WEIGHTS: array<f32, 5> = array<f32, 5>(
    0.22702703, 0.1945946, 0.12162162, 0.054054055, 0.016216216
);
const SHARD_CELLS: f32 = 8.0;
const TAU: f32 = 6.2831853;
const SQRT_2: f32 = 1.4142135;

@vertex
fn vs_fullscreen(@builtin(vertex_index) idx: u32) -> VertexOutput {
    let uv = vec2<f32>(f32((idx << 1u) & 2u), f32(idx & 2u));
    var out: VertexOutput;
    out.position = vec4<f32>(uv * 2.0 - 1.0, 0.0, 1.0);
    out.uv = vec2<f32>(uv.x, 1.0 - uv.y);
    return out;
}

fn tap(uv: vec2<f32>) -> vec4<f32> {
    return textureSampleLevel(input_tex, input_sampler, uv, 0.0);
}

fn aux_tap(uv: vec2<f32>) -> vec4<f32> {
    if params.has_aux < 0.5 {
        return vec4<f32>(0.0);
    }
    return textureSampleLevel(aux_tex, aux_sampler, uv, 0.0);
}

fn texel_size() -> vec2<f32> {
    return 1.0 / vec2<f32>(textureDimensions(input_tex));
}

fn kawase_offset() -> vec2<f32> {
    return texel_size() * (0.5 + params.blur_radius);
}

fn step_between(edge0: f32, edge1: f32, x: f32) -> f32 {
    if edge1 <= edge0 {
        return select(1.0, 0.0, x < edge0);
    }
    let t = clamp((x - edge0) / (edge1 - edge0), 0.0, 1.0);
    return t * t * (3.0 - 2.0 * t);
}

@fragment
fn fs_blit(in: VertexOutput) -> @location(0) vec4<f32> {
    return tap(in.uv);
}

@fragment
fn fs_box(in: VertexOutput) -> @location(0) vec4<f32> {
    let step = texel_size() * params.blur_radius;
    var sum = vec4<f32>(0.0);
    for (var dy = -1; dy <= 1; dy++) {
        for (var dx = -1; dx <= 1; dx++) {
            sum += tap(in.uv + vec2<f32>(f32(dx), f32(dy)) * step);
        }
    }
    return sum / 9.0;
}

@fragment
fn fs_gaussian(in: VertexOutput) -> @location(0) vec4<f32> {
    let step = params.blur_offset * texel_size() * params.blur_radius;
    var weights = GAUSSIAN_WEIGHTS;
    var sum = tap(in.uv) * weights[0];
    var total = weights[0];
    for (var i = 1; i < 5; i++) {
        let offset = step * f32(i);
        let weight = weights[i];
        sum += (tap(in.uv + offset) + tap(in.uv - offset)) * weight;
        total += 2.0 * weight;
    }
    return sum / total;
}

fn kawase_down(uv: vec2<f32>) -> vec4<f32> {
    let h = kawase_offset();
    return (tap(uv) * 4.0
        + tap(uv - h)
        + tap(uv + h)
        + tap(uv + vec2<f32>(h.x, -h.y))
        + tap(uv + vec2<f32>(-h.x, h.y))) / 8.0;
}

fn kawase_up(uv: vec2<f32>) -> vec4<f32> {
    let h = kawase_offset();
    let axis = tap(uv + vec2<f32>(-2.0 * h.x, 0.0))
        + tap(uv + vec2<f32>(2.0 * h.x, 0.0))
        + tap(uv + vec2<f32>(0.0, -2.0 * h.y))
        + tap(uv + vec2<f32>(0.0, 2.0 * h.y));
    let diagonal = tap(uv + h)
        + tap(uv - h)
        + tap(uv + vec2<f32>(h.x, -h.y))
        + tap(uv + vec2<f32>(-h.x, h.y));
    return (axis + diagonal * 2.0) / 12.0;
}

@fragment
fn fs_kawase_down(in: VertexOutput) -> @location(0) vec4<f32> {
    return kawase_down(in.uv);
}

@fragment
fn fs_kawase_up(in: VertexOutput) -> @location(0) vec4<f32> {
    return kawase_up(in.uv);
}

fn soft_threshold(color: vec3<f32>, threshold: f32, knee: f32) -> vec3<f32> {
    let luminance = dot(color, LUMA);
    let soft = clamp(luminance - threshold + knee, 0.0, 2.0 * knee);
    let contribution = soft * soft / (4.0 * knee + 0.0001);
    let factor = max(luminance - threshold, contribution) / max(luminance, 0.0001);
    return color * max(factor, 0.0);
}

@fragment
fn fs_bloom_prefilter(in: VertexOutput) -> @location(0) vec4<f32> {
    let color = tap(in.uv).rgb;
    return vec4<f32>(soft_threshold(color, params.threshold, params.threshold_knee), 1.0);
}

@fragment
fn fs_bloom_up(in: VertexOutput) -> @location(0) vec4<f32> {
    let up = kawase_up(in.uv).rgb;
    return vec4<f32>(up + aux_tap(in.uv).rgb, 1.0);
}

@fragment
fn fs_bloom_blend(in: VertexOutput) -> @location(0) vec4<f32> {
    let source = tap(in.uv);
    let glow = aux_tap(in.uv).rgb;
    return vec4<f32>(source.rgb + glow * params.bloom_intensity, source.a);
}

fn rotate_hue(color: vec3<f32>, turns: f32) -> vec3<f32> {
    let k = vec3<f32>(0.57735027);
    let angle = turns * TAU;
    let c = cos(angle);
    let s = sin(angle);
    return color * c + cross(k, color) * s + k * dot(k, color) * (1.0 - c);
}

@fragment
fn fs_color_adjustment(in: VertexOutput) -> @location(0) vec4<f32> {
    let source = tap(in.uv);
    var color = source.rgb * params.brightness;
    let luma = dot(color, LUMA);
    color = vec3<f32>(luma) + (color - luma) * params.saturation;
    color = (color - 0.5) * params.contrast + 0.5;
    color = rotate_hue(color, params.hue_shift);

    let radial = length(in.uv - 0.5) * SQRT_2;
    let falloff = step_between(
        params.vignette_roughness,
        params.vignette_roughness + params.vignette_smoothness,
        radial
    );
    let vignette = max(1.0 - params.vignette_intensity * falloff, 0.0);
    return vec4<f32>(color * vignette, source.a);
}

fn hash_channel(cell: vec2<u32>, seed: u32) -> f32 {
    var h = (cell.x * 0x8da6b343u) ^ (cell.y * 0xd8163841u) ^ seed;
    h ^= h >> 13u;
    h *= 0x5bd1e995u;
    h ^= h >> 15u;
    return f32(h & 0xffffu) / 65536.0;
}

fn cell_hash(cell: vec2<f32>) -> vec2<f32> {
    let c = bitcast<vec2<u32>>(vec2<i32>(cell));
    return vec2<f32>(hash_channel(c, 0x68e31da4u), hash_channel(c, 0xb5297a4du));
}

@fragment
fn fs_broken_glass(in: VertexOutput) -> @location(0) vec4<f32> {
    let p = in.uv * SHARD_CELLS;
    let cell = floor(p);

    var nearest_distance = 3.4e38;
    var nearest_cell = cell;
    var second = 3.4e38;
    for (var dy = -1; dy <= 1; dy++) {
        for (var dx = -1; dx <= 1; dx++) {
            let neighbor = cell + vec2<f32>(f32(dx), f32(dy));
            let d = distance(p, neighbor + cell_hash(neighbor));
            if d < nearest_distance {
                second = nearest_distance;
                nearest_distance = d;
                nearest_cell = neighbor;
            } else if d < second {
                second = d;
            }
        }
    }

    let shift = (cell_hash(nearest_cell + 17.0) - 0.5) * 0.03;
    let color = tap(in.uv + shift);
    let crack = 1.0 - step_between(0.0, 0.06, second - nearest_distance);
    return vec4<f32>(color.rgb * (1.0 - 0.5 * crack) + 0.35 * crack, color.a);
}

@fragment
fn fs_aces(in: VertexOutput) -> @location(0) vec4<f32> {
    let source = tap(in.uv);
    let hdr = source.rgb;
    let a = 2.51;
    let b_coeff = 0.03;
    let c = 2.43;
    let d = 0.59;
    let e = 0.14;
    let mapped = clamp(
        (hdr * (a * hdr + b_coeff)) / (hdr * (c * hdr + d) + e),
        vec3<f32>(0.0), vec3<f32>(1.0)
    );
    return vec4<f32>(mapped, source.a);
}
"#;
