//! Per-pixel implementations of every program pass.
//!
//! Each pass is a plain function from the pass inputs and an output texel
//! coordinate to a color. The WGSL in `gpu::shaders` computes the same
//! thing; keep them in step.

use std::f32::consts::{SQRT_2, TAU};

use glam::{Vec2, Vec3, Vec4, Vec4Swizzles};

use super::sampler::Sampler;
use crate::pass::{Param, ParamSet, Program, bloom_pass, blur_pass};

/// Rec. 709 luma weights.
pub const LUMA: Vec3 = Vec3::new(0.2126, 0.7152, 0.0722);

/// 9-tap Gaussian weights for sigma ≈ 1.5, center first.
pub const GAUSSIAN_WEIGHTS: [f32; 5] = [
    0.227_027_03,
    0.194_594_6,
    0.121_621_62,
    0.054_054_055,
    0.016_216_216,
];

/// Voronoi cells per axis in the broken glass effect.
const SHARD_CELLS: f32 = 8.0;

/// What a pass reads.
pub struct PassInputs<'a> {
    pub input: Sampler<'a>,
    /// Texture bound to `_BlurTargetTex`, if any.
    pub aux: Option<Sampler<'a>>,
    pub params: &'a ParamSet,
}

pub type Shader = fn(&PassInputs<'_>, Vec2) -> Vec4;

/// The function implementing `pass` of `program`.
pub fn shader(program: Program, pass: u32) -> Option<Shader> {
    let shader: Shader = match (program, pass) {
        (Program::Blur, blur_pass::BOX) => box_blur,
        (Program::Blur, blur_pass::GAUSSIAN) => gaussian_blur,
        (Program::Blur, blur_pass::KAWASE_DOWN) => kawase_down,
        (Program::Blur, blur_pass::KAWASE_UP) => kawase_up,
        (Program::Bloom, bloom_pass::PREFILTER) => bloom_prefilter,
        (Program::Bloom, bloom_pass::KAWASE_DOWN) => kawase_down,
        (Program::Bloom, bloom_pass::KAWASE_UP) => bloom_up,
        (Program::Bloom, bloom_pass::BLEND) => bloom_blend,
        (Program::ColorAdjustment, 0) => color_adjustment,
        (Program::BrokenGlass, 0) => broken_glass,
        (Program::Aces, 0) => aces,
        _ => return None,
    };
    Some(shader)
}

fn radius(params: &ParamSet) -> f32 {
    params.float_or(Param::BlurRadius, 1.0)
}

/// 3×3 average with taps `radius` texels apart.
fn box_blur(ctx: &PassInputs<'_>, uv: Vec2) -> Vec4 {
    let step = ctx.input.texel_size() * radius(ctx.params);
    let mut sum = Vec4::ZERO;
    for dy in -1..=1 {
        for dx in -1..=1 {
            sum += ctx.input.sample(uv + Vec2::new(dx as f32, dy as f32) * step);
        }
    }
    sum / 9.0
}

/// One axis of a 9-tap Gaussian along `_BlurOffset`.
fn gaussian_blur(ctx: &PassInputs<'_>, uv: Vec2) -> Vec4 {
    let direction = ctx.params.vec2_or(Param::BlurOffset, Vec2::X);
    let step = direction * ctx.input.texel_size() * radius(ctx.params);

    let mut sum = ctx.input.sample(uv) * GAUSSIAN_WEIGHTS[0];
    let mut total = GAUSSIAN_WEIGHTS[0];
    for (i, &weight) in GAUSSIAN_WEIGHTS.iter().enumerate().skip(1) {
        let offset = step * i as f32;
        sum += (ctx.input.sample(uv + offset) + ctx.input.sample(uv - offset)) * weight;
        total += 2.0 * weight;
    }
    sum / total
}

/// Kawase tap distance: half a texel plus `_BlurRadius` texels.
fn kawase_offset(ctx: &PassInputs<'_>) -> Vec2 {
    ctx.input.texel_size() * (0.5 + radius(ctx.params))
}

/// Center weighted 4, four diagonal taps weighted 1.
fn kawase_down(ctx: &PassInputs<'_>, uv: Vec2) -> Vec4 {
    let h = kawase_offset(ctx);
    let s = |offset: Vec2| ctx.input.sample(uv + offset);
    (s(Vec2::ZERO) * 4.0
        + s(-h)
        + s(h)
        + s(Vec2::new(h.x, -h.y))
        + s(Vec2::new(-h.x, h.y)))
        / 8.0
}

/// Four axis taps at twice the offset weighted 1, four diagonals weighted 2.
fn kawase_up(ctx: &PassInputs<'_>, uv: Vec2) -> Vec4 {
    let h = kawase_offset(ctx);
    let s = |offset: Vec2| ctx.input.sample(uv + offset);
    let axis = s(Vec2::new(-2.0 * h.x, 0.0))
        + s(Vec2::new(2.0 * h.x, 0.0))
        + s(Vec2::new(0.0, -2.0 * h.y))
        + s(Vec2::new(0.0, 2.0 * h.y));
    let diagonal = s(h) + s(-h) + s(Vec2::new(h.x, -h.y)) + s(Vec2::new(-h.x, h.y));
    (axis + diagonal * 2.0) / 12.0
}

/// Bloom's up step adds the level's own down-sweep contents.
fn bloom_up(ctx: &PassInputs<'_>, uv: Vec2) -> Vec4 {
    let up = kawase_up(ctx, uv);
    let own = ctx.aux.map_or(Vec4::ZERO, |aux| aux.sample(uv));
    (up.xyz() + own.xyz()).extend(1.0)
}

/// Knee-softened luminance threshold.
pub fn soft_threshold(color: Vec3, threshold: f32, knee: f32) -> Vec3 {
    let luminance = color.dot(LUMA);
    let soft = (luminance - threshold + knee).clamp(0.0, 2.0 * knee);
    let contribution = soft * soft / (4.0 * knee + 0.0001);
    let factor = (luminance - threshold).max(contribution) / luminance.max(0.0001);
    color * factor.max(0.0)
}

fn bloom_prefilter(ctx: &PassInputs<'_>, uv: Vec2) -> Vec4 {
    let color = ctx.input.sample(uv).xyz();
    let threshold = ctx.params.float_or(Param::Threshold, 1.0);
    let knee = ctx.params.float_or(Param::ThresholdKnee, 0.5);
    soft_threshold(color, threshold, knee).extend(1.0)
}

fn bloom_blend(ctx: &PassInputs<'_>, uv: Vec2) -> Vec4 {
    let source = ctx.input.sample(uv);
    let glow = ctx.aux.map_or(Vec3::ZERO, |aux| aux.sample(uv).xyz());
    let intensity = ctx.params.float_or(Param::BloomIntensity, 1.0);
    (source.xyz() + glow * intensity).extend(source.w)
}

fn smoothstep(edge0: f32, edge1: f32, x: f32) -> f32 {
    if edge1 <= edge0 {
        return if x < edge0 { 0.0 } else { 1.0 };
    }
    let t = ((x - edge0) / (edge1 - edge0)).clamp(0.0, 1.0);
    t * t * (3.0 - 2.0 * t)
}

/// Rotate `color` around the gray axis by `turns` full turns.
pub fn rotate_hue(color: Vec3, turns: f32) -> Vec3 {
    let k = Vec3::ONE / 3f32.sqrt();
    let (sin, cos) = (turns * TAU).sin_cos();
    color * cos + k.cross(color) * sin + k * k.dot(color) * (1.0 - cos)
}

fn color_adjustment(ctx: &PassInputs<'_>, uv: Vec2) -> Vec4 {
    let p = ctx.params;
    let source = ctx.input.sample(uv);

    let mut color = source.xyz() * p.float_or(Param::Brightness, 1.0);
    let luma = color.dot(LUMA);
    color = Vec3::splat(luma) + (color - luma) * p.float_or(Param::Saturation, 1.0);
    color = (color - 0.5) * p.float_or(Param::Contrast, 1.0) + 0.5;
    color = rotate_hue(color, p.float_or(Param::HueShift, 0.0));

    // Distance from center, 1.0 at the corners.
    let distance = (uv - 0.5).length() * SQRT_2;
    let roughness = p.float_or(Param::VignetteRoughness, 0.5);
    let smoothness = p.float_or(Param::VignetteSmoothness, 1.0);
    let falloff = smoothstep(roughness, roughness + smoothness, distance);
    let vignette = (1.0 - p.float_or(Param::VignetteIntensity, 0.0) * falloff).max(0.0);

    (color * vignette).extend(source.w)
}

/// Stable pseudo-random point in \[0, 1)² for a grid cell.
fn cell_hash(cell: Vec2) -> Vec2 {
    let x = cell.x as i32 as u32;
    let y = cell.y as i32 as u32;
    let hash = |seed: u32| {
        let mut h = x.wrapping_mul(0x8da6_b343) ^ y.wrapping_mul(0xd816_3841) ^ seed;
        h ^= h >> 13;
        h = h.wrapping_mul(0x5bd1_e995);
        h ^= h >> 15;
        (h & 0xffff) as f32 / 65536.0
    };
    Vec2::new(hash(0x68e3_1da4), hash(0xb529_7a4d))
}

/// Voronoi shards, each refracting the image by its own small offset, with
/// bright cracks along the shard borders.
fn broken_glass(ctx: &PassInputs<'_>, uv: Vec2) -> Vec4 {
    let p = uv * SHARD_CELLS;
    let cell = p.floor();

    let mut nearest = (f32::MAX, cell);
    let mut second = f32::MAX;
    for dy in -1..=1 {
        for dx in -1..=1 {
            let neighbor = cell + Vec2::new(dx as f32, dy as f32);
            let distance = p.distance(neighbor + cell_hash(neighbor));
            if distance < nearest.0 {
                second = nearest.0;
                nearest = (distance, neighbor);
            } else if distance < second {
                second = distance;
            }
        }
    }

    let shift = (cell_hash(nearest.1 + 17.0) - 0.5) * 0.03;
    let color = ctx.input.sample(uv + shift);
    let crack = 1.0 - smoothstep(0.0, 0.06, second - nearest.0);
    (color.xyz() * (1.0 - 0.5 * crack) + 0.35 * crack).extend(color.w)
}

/// Narkowicz's ACES filmic fit.
pub fn aces_tonemap(hdr: Vec3) -> Vec3 {
    const A: f32 = 2.51;
    const B: f32 = 0.03;
    const C: f32 = 2.43;
    const D: f32 = 0.59;
    const E: f32 = 0.14;
    ((hdr * (A * hdr + B)) / (hdr * (C * hdr + D) + E)).clamp(Vec3::ZERO, Vec3::ONE)
}

fn aces(ctx: &PassInputs<'_>, uv: Vec2) -> Vec4 {
    let source = ctx.input.sample(uv);
    aces_tonemap(source.xyz()).extend(source.w)
}
