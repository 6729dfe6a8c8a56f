//! Host-side per-pixel layer blend formulas (spec §4.8 "per-tile layer
//! composite pass" and "layer-stack blend composite"), generalized from this
//! lineage's `renderer::renderer_composite`/`renderer::renderer_merge`
//! blend-mode math, which ran the same formulas as fragment-shader branches
//! over a full-screen quad. Here they run over host `RGBA8` bytes because
//! the accumulator already hands `commit_stroke` a host raster (its preview
//! readback); operating on that raster directly avoids a second GPU upload
//! round trip for every stroke commit.

use stroke_protocol::LayerBlendMode;

fn channel_blend(base: f32, src: f32, mode: LayerBlendMode) -> f32 {
    match mode {
        LayerBlendMode::Normal => src,
        LayerBlendMode::Multiply => base * src,
        LayerBlendMode::Screen => 1.0 - (1.0 - base) * (1.0 - src),
        LayerBlendMode::Overlay => channel_blend(src, base, LayerBlendMode::HardLight),
        LayerBlendMode::Darken => base.min(src),
        LayerBlendMode::Lighten => base.max(src),
        LayerBlendMode::ColorDodge => {
            if src >= 1.0 {
                1.0
            } else {
                (base / (1.0 - src)).min(1.0)
            }
        }
        LayerBlendMode::ColorBurn => {
            if src <= 0.0 {
                0.0
            } else {
                1.0 - ((1.0 - base) / src).min(1.0)
            }
        }
        LayerBlendMode::HardLight => {
            if src <= 0.5 {
                2.0 * base * src
            } else {
                1.0 - 2.0 * (1.0 - base) * (1.0 - src)
            }
        }
        LayerBlendMode::SoftLight => {
            if src <= 0.5 {
                base - (1.0 - 2.0 * src) * base * (1.0 - base)
            } else {
                let d = if base <= 0.25 {
                    ((16.0 * base - 12.0) * base + 4.0) * base
                } else {
                    base.sqrt()
                };
                base + (2.0 * src - 1.0) * (d - base)
            }
        }
        LayerBlendMode::Difference => (base - src).abs(),
        LayerBlendMode::Exclusion => base + src - 2.0 * base * src,
        // Hue/Saturation/Color/Luminosity are non-separable (they mix
        // channels), handled in `blend_pixel` instead of per-channel.
        LayerBlendMode::Hue | LayerBlendMode::Saturation | LayerBlendMode::Color | LayerBlendMode::Luminosity => src,
    }
}

fn luminosity(rgb: [f32; 3]) -> f32 {
    0.3 * rgb[0] + 0.59 * rgb[1] + 0.11 * rgb[2]
}

fn clip_color(mut rgb: [f32; 3]) -> [f32; 3] {
    let lum = luminosity(rgb);
    let min = rgb.iter().cloned().fold(f32::INFINITY, f32::min);
    let max = rgb.iter().cloned().fold(f32::NEG_INFINITY, f32::max);
    if min < 0.0 {
        for c in &mut rgb {
            *c = lum + (*c - lum) * lum / (lum - min).max(1e-6);
        }
    }
    if max > 1.0 {
        for c in &mut rgb {
            *c = lum + (*c - lum) * (1.0 - lum) / (max - lum).max(1e-6);
        }
    }
    rgb
}

fn set_luminosity(rgb: [f32; 3], lum: f32) -> [f32; 3] {
    let delta = lum - luminosity(rgb);
    clip_color([rgb[0] + delta, rgb[1] + delta, rgb[2] + delta])
}

fn saturation(rgb: [f32; 3]) -> f32 {
    rgb.iter().cloned().fold(f32::NEG_INFINITY, f32::max) - rgb.iter().cloned().fold(f32::INFINITY, f32::min)
}

fn set_saturation(rgb: [f32; 3], sat: f32) -> [f32; 3] {
    let mut idx = [0usize, 1, 2];
    idx.sort_by(|&a, &b| rgb[a].partial_cmp(&rgb[b]).unwrap());
    let (lo, mid, hi) = (idx[0], idx[1], idx[2]);
    let mut out = [0.0f32; 3];
    if rgb[hi] > rgb[lo] {
        out[mid] = (rgb[mid] - rgb[lo]) * sat / (rgb[hi] - rgb[lo]);
        out[hi] = sat;
    }
    out[lo] = 0.0;
    out
}

/// Blends `src` over `base` (both straight-alpha, unit-range linear RGB)
/// using `mode`, returning the blended *color* (callers combine it with
/// Porter-Duff "over" alpha compositing separately via [`composite_over`]).
pub fn blend_pixel(base_rgb: [f32; 3], src_rgb: [f32; 3], mode: LayerBlendMode) -> [f32; 3] {
    match mode {
        LayerBlendMode::Hue => set_luminosity(set_saturation(src_rgb, saturation(base_rgb)), luminosity(base_rgb)),
        LayerBlendMode::Saturation => set_luminosity(set_saturation(base_rgb, saturation(src_rgb)), luminosity(base_rgb)),
        LayerBlendMode::Color => set_luminosity(src_rgb, luminosity(base_rgb)),
        LayerBlendMode::Luminosity => set_luminosity(base_rgb, luminosity(src_rgb)),
        _ => [
            channel_blend(base_rgb[0], src_rgb[0], mode),
            channel_blend(base_rgb[1], src_rgb[1], mode),
            channel_blend(base_rgb[2], src_rgb[2], mode),
        ],
    }
}

/// Porter-Duff "over": composites a blended, opacity-scaled `src` onto
/// `base`, both `[r, g, b, a]` in `[0, 1]`.
pub fn composite_over(base: [f32; 4], src_rgb: [f32; 3], src_a: f32, opacity: f32, mode: LayerBlendMode) -> [f32; 4] {
    let effective_src_a = (src_a * opacity).clamp(0.0, 1.0);
    if effective_src_a <= 0.0 {
        return base;
    }
    let blended_rgb = blend_pixel([base[0], base[1], base[2]], src_rgb, mode);

    let out_a = effective_src_a + base[3] * (1.0 - effective_src_a);
    if out_a <= 0.0 {
        return [0.0, 0.0, 0.0, 0.0];
    }
    let mixed_rgb = [
        (blended_rgb[0] * effective_src_a + base[0] * base[3] * (1.0 - effective_src_a)) / out_a,
        (blended_rgb[1] * effective_src_a + base[1] * base[3] * (1.0 - effective_src_a)) / out_a,
        (blended_rgb[2] * effective_src_a + base[2] * base[3] * (1.0 - effective_src_a)) / out_a,
    ];
    [mixed_rgb[0], mixed_rgb[1], mixed_rgb[2], out_a]
}

pub fn u8_to_unit(value: u8) -> f32 {
    value as f32 / 255.0
}

pub fn unit_to_u8(value: f32) -> u8 {
    (value.clamp(0.0, 1.0) * 255.0).round() as u8
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn normal_blend_at_full_opacity_replaces_base() {
        let out = composite_over([0.2, 0.2, 0.2, 1.0], [0.8, 0.1, 0.1], 1.0, 1.0, LayerBlendMode::Normal);
        assert!((out[0] - 0.8).abs() < 1e-5);
        assert!((out[3] - 1.0).abs() < 1e-5);
    }

    #[test]
    fn zero_opacity_leaves_base_unchanged() {
        let base = [0.3, 0.4, 0.5, 1.0];
        let out = composite_over(base, [0.9, 0.9, 0.9], 1.0, 0.0, LayerBlendMode::Normal);
        assert_eq!(out, base);
    }

    #[test]
    fn multiply_of_white_is_identity() {
        let out = blend_pixel([0.4, 0.6, 0.2], [1.0, 1.0, 1.0], LayerBlendMode::Multiply);
        assert!((out[0] - 0.4).abs() < 1e-5);
        assert!((out[1] - 0.6).abs() < 1e-5);
        assert!((out[2] - 0.2).abs() < 1e-5);
    }

    #[test]
    fn screen_of_black_is_identity() {
        let out = blend_pixel([0.4, 0.6, 0.2], [0.0, 0.0, 0.0], LayerBlendMode::Screen);
        assert!((out[0] - 0.4).abs() < 1e-5);
    }

    #[test]
    fn difference_of_equal_colors_is_zero() {
        let out = blend_pixel([0.5, 0.5, 0.5], [0.5, 0.5, 0.5], LayerBlendMode::Difference);
        assert_eq!(out, [0.0, 0.0, 0.0]);
    }

    #[test]
    fn color_mode_keeps_base_luminosity() {
        let base = [0.2, 0.2, 0.2];
        let out = blend_pixel(base, [0.9, 0.1, 0.1], LayerBlendMode::Color);
        assert!((luminosity(out) - luminosity(base)).abs() < 1e-4);
    }

    #[test]
    fn unit_u8_round_trip_is_stable_at_the_ends() {
        assert_eq!(unit_to_u8(u8_to_unit(0)), 0);
        assert_eq!(unit_to_u8(u8_to_unit(255)), 255);
    }
}
