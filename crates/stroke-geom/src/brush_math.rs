//! Brush-footprint math shared by the CPU dirty-rect builder and (by
//! construction, since both read from the same formulas described in the
//! spec) the compute-shader early-exit test: the effective radius (§4.6),
//! alpha-darken (GLOSSARY), and render-scale sizing (§4.7).

/// CPU bound on the rendered extent of a dab, matching the shader's
/// early-exit test. See spec §4.6.
///
/// - `radius < 2`      -> `max(1.5, radius + 1)`
/// - `hardness >= 0.99` -> `radius * 1.1`
/// - otherwise          -> `radius * 1.8`
pub fn effective_radius(radius: f32, hardness: f32) -> f32 {
    if radius < 2.0 {
        (radius + 1.0).max(1.5)
    } else if hardness >= 0.99 {
        radius * 1.1
    } else {
        radius * 1.8
    }
}

/// Combines a destination alpha with a fresh dab's alpha using the
/// alpha-darken rule, respecting a per-dab opacity ceiling:
/// `out_a = min(ceiling, dst_a + src_a * (1 - dst_a))`.
pub fn alpha_darken(dst_a: f32, src_a: f32, ceiling: f32) -> f32 {
    let combined = dst_a + src_a * (1.0 - dst_a);
    combined.min(ceiling)
}

/// Mixes a destination color with a fresh dab color weighted by the dab's
/// own (post-darken) alpha contribution, matching the "color mixed by
/// fresh alpha" rule used by alpha-darken compositing.
pub fn alpha_darken_color(dst_rgb: [f32; 3], dst_a: f32, src_rgb: [f32; 3], src_a: f32) -> [f32; 3] {
    if src_a <= 0.0 {
        return dst_rgb;
    }
    let out_a = alpha_darken(dst_a, src_a, 1.0);
    if out_a <= 0.0 {
        return dst_rgb;
    }
    let mix_w = src_a / out_a;
    [
        src_rgb[0] * mix_w + dst_rgb[0] * (1.0 - mix_w),
        src_rgb[1] * mix_w + dst_rgb[1] * (1.0 - mix_w),
        src_rgb[2] * mix_w + dst_rgb[2] * (1.0 - mix_w),
    ]
}

/// Rounds a logical canvas dimension up to a texture dimension at the given
/// render scale: `ceil(dim * scale)`, per spec §4.1 `resize`.
pub fn scaled_texture_dim(logical: u32, scale: f32) -> u32 {
    ((logical as f64) * (scale as f64)).ceil() as u32
}

/// Auto render-scale policy from spec §4.7: triggers 0.5x only when the tip
/// is large and either textured or soft.
pub fn auto_render_scale(radius: f32, hardness: f32, is_textured: bool) -> f32 {
    if radius > 300.0 && (is_textured || hardness < 70.0) {
        0.5
    } else {
        1.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn effective_radius_small_dab_floor() {
        assert_eq!(effective_radius(0.0, 1.0), 1.5);
        assert_eq!(effective_radius(1.0, 1.0), 2.0);
    }

    #[test]
    fn effective_radius_hard_edge() {
        assert!((effective_radius(4.0, 1.0) - 4.4).abs() < 1e-6);
    }

    #[test]
    fn effective_radius_soft_edge() {
        assert!((effective_radius(4.0, 0.5) - 7.2).abs() < 1e-6);
    }

    #[test]
    fn alpha_darken_never_exceeds_ceiling() {
        let mut a = 0.0_f32;
        for _ in 0..50 {
            a = alpha_darken(a, 0.5, 0.5);
        }
        assert!(a <= 0.5 + 1e-6);
    }

    #[test]
    fn alpha_darken_is_monotone_nondecreasing() {
        let mut a = 0.0_f32;
        for _ in 0..10 {
            let next = alpha_darken(a, 0.3, 1.0);
            assert!(next >= a - 1e-7);
            a = next;
        }
    }

    #[test]
    fn alpha_darken_two_half_opacity_dabs_is_exactly_half() {
        // Two overlapping dabs with dab_opacity = 0.5 combine to exactly 0.5,
        // not 0.75 -- the ceiling, not the raw additive formula, wins.
        let after_first = alpha_darken(0.0, 0.5, 0.5);
        let after_second = alpha_darken(after_first, 0.5, 0.5);
        assert!((after_second - 0.5).abs() < 1e-6);
    }

    #[test]
    fn scaled_texture_dim_rounds_up() {
        assert_eq!(scaled_texture_dim(1023, 0.5), 512);
        assert_eq!(scaled_texture_dim(1024, 0.5), 512);
        assert_eq!(scaled_texture_dim(1025, 0.5), 513);
    }

    #[test]
    fn auto_render_scale_triggers_on_large_soft_tip() {
        assert_eq!(auto_render_scale(320.0, 40.0, false), 0.5);
        assert_eq!(auto_render_scale(320.0, 90.0, true), 0.5);
        assert_eq!(auto_render_scale(320.0, 90.0, false), 1.0);
        assert_eq!(auto_render_scale(299.0, 10.0, false), 1.0);
    }
}
