//! Compute/render uniform block layouts. Every struct here is `repr(C)`,
//! `Pod`/`Zeroable`, little-endian, and laid out in 16-byte groups so that no
//! `vec2<u32>`-equivalent pair straddles a 16-byte boundary, matching the
//! std140-compatible layout rules spec §6 requires. Byte sizes are asserted
//! in the unit tests at the bottom of this file -- they are the bit-exact
//! contract named in spec §6.

use bytemuck::{Pod, Zeroable};

/// 112 bytes: uniforms for the parametric dab compute pipeline (spec §4.4.1).
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Pod, Zeroable)]
pub struct ParametricDabUniforms {
    pub tile_offset: [u32; 2],
    pub tile_size: [u32; 2],
    pub canvas_size: [u32; 2],
    pub dab_count: u32,
    pub color_blend_mode: u32,
    pub pattern_enabled: u32,
    pub pattern_scale: f32,
    pub pattern_brightness: f32,
    pub pattern_contrast: f32,
    pub pattern_depth: f32,
    pub pattern_invert: u32,
    pub pattern_blend_mode: u32,
    pub pattern_texel_w: f32,
    pub pattern_texel_h: f32,
    pub noise_enabled: u32,
    pub noise_strength: f32,
    pub alpha_ceiling: f32,
    pub _reserved0: [f32; 4],
    pub _reserved1: [f32; 4],
}

/// 80 bytes: uniforms for the textured dab compute pipeline (spec §4.4.2).
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Pod, Zeroable)]
pub struct TexturedDabUniforms {
    pub tile_offset: [u32; 2],
    pub tile_size: [u32; 2],
    pub canvas_size: [u32; 2],
    pub dab_count: u32,
    pub color_blend_mode: u32,
    pub pattern_enabled: u32,
    pub pattern_scale: f32,
    pub pattern_brightness: f32,
    pub pattern_contrast: f32,
    pub pattern_depth: f32,
    pub pattern_invert: u32,
    pub pattern_blend_mode: u32,
    pub alpha_ceiling: f32,
    pub noise_enabled: u32,
    pub noise_strength: f32,
    pub _reserved: [f32; 2],
}

/// 32 bytes: uniforms for the dual-mask compute pipeline (spec §4.4.3).
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Pod, Zeroable)]
pub struct DualMaskUniforms {
    pub tile_offset: [u32; 2],
    pub tile_size: [u32; 2],
    pub canvas_size: [u32; 2],
    pub dab_count: u32,
    pub alpha_ceiling: f32,
}

/// 32 bytes: uniforms for the dual-blend compute pipeline (spec §4.4.4).
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Pod, Zeroable)]
pub struct DualBlendUniforms {
    pub dirty_offset: [u32; 2],
    pub dirty_size: [u32; 2],
    pub canvas_size: [u32; 2],
    pub blend_mode: u32,
    pub _reserved: u32,
}

/// 32 bytes: uniforms for the wet-edge display filter (spec §4.4.5).
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Pod, Zeroable)]
pub struct WetEdgeUniforms {
    pub dirty_offset: [u32; 2],
    pub dirty_size: [u32; 2],
    pub canvas_size: [u32; 2],
    pub hardness: f32,
    pub strength: f32,
}

/// 48 bytes: uniforms for the per-tile layer composite pass (spec §4.8).
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Pod, Zeroable)]
pub struct LayerCompositeUniforms {
    pub tile_offset: [u32; 2],
    pub tile_size: [u32; 2],
    pub canvas_size: [u32; 2],
    pub opacity: f32,
    pub blend_mode: u32,
    pub selection_enabled: u32,
    pub _reserved: [u32; 3],
}

/// 16 bytes: uniforms for the layer-stack blend composite (spec §4.8).
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Pod, Zeroable)]
pub struct LayerBlendUniforms {
    pub blend_mode: u32,
    pub _reserved: [u32; 3],
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn uniform_block_sizes_match_the_wire_contract() {
        assert_eq!(std::mem::size_of::<ParametricDabUniforms>(), 112);
        assert_eq!(std::mem::size_of::<TexturedDabUniforms>(), 80);
        assert_eq!(std::mem::size_of::<DualMaskUniforms>(), 32);
        assert_eq!(std::mem::size_of::<DualBlendUniforms>(), 32);
        assert_eq!(std::mem::size_of::<WetEdgeUniforms>(), 32);
        assert_eq!(std::mem::size_of::<LayerCompositeUniforms>(), 48);
        assert_eq!(std::mem::size_of::<LayerBlendUniforms>(), 16);
    }

    #[test]
    fn uniform_blocks_are_sixteen_byte_aligned_in_size() {
        for size in [
            std::mem::size_of::<ParametricDabUniforms>(),
            std::mem::size_of::<TexturedDabUniforms>(),
            std::mem::size_of::<DualMaskUniforms>(),
            std::mem::size_of::<DualBlendUniforms>(),
            std::mem::size_of::<WetEdgeUniforms>(),
            std::mem::size_of::<LayerCompositeUniforms>(),
            std::mem::size_of::<LayerBlendUniforms>(),
        ] {
            assert_eq!(size % 16, 0, "block size {size} is not 16-byte aligned");
        }
    }
}
