//! Wire-format contracts for the stroke accumulation engine: packed dab
//! records, compute uniform block layouts, blend-mode enumerations, and the
//! persisted residency budget record. This crate owns the bit-exact
//! boundary of spec §6 and nothing else -- no device handles, no
//! allocation, no dispatch logic.

mod blend;
mod budget;
mod dab;
mod params;
mod uniforms;

pub use blend::{ColorBlendMode, DualBlendMode, LayerBlendMode};
pub use budget::{
    clamp_budget, ResidencyBudgetRecord, DEFAULT_BUDGET_BYTES, MAX_BUDGET_BYTES, MIN_BUDGET_BYTES,
};
pub use dab::{DabParametricGpu, DabTexturedGpu};
pub use params::{
    parse_hex_color, BrushMode, DualBrushSettings, GpuDabParams, HexColorError, PatternSettings,
};
pub use uniforms::{
    DualBlendUniforms, DualMaskUniforms, LayerBlendUniforms, LayerCompositeUniforms,
    ParametricDabUniforms, TexturedDabUniforms, WetEdgeUniforms,
};

slotmap::new_key_type! {
    /// Layer identity, shared by `tiles`, `compositor`, and `history`.
    pub struct LayerId;
}

/// Shared compute-dispatch limits from spec §4.4's "shared contract".
pub mod limits {
    /// Maximum tiles carried by one uniform buffer (one dispatch batch).
    pub const MAX_TILES_PER_DISPATCH: usize = 256;
    /// Maximum dabs carried by one storage buffer (shared-memory slab).
    pub const MAX_DABS_PER_BATCH: usize = 128;
    /// Auto-flush threshold: half the hard dab limit, per spec §4.5.
    pub const AUTO_FLUSH_DAB_THRESHOLD: u32 = 64;
    /// Maximum single-tile pixel area before the tile builder partitions.
    pub const MAX_SINGLE_TILE_AREA: u64 = 2_000_000;
    /// Compute workgroup size (both dimensions), spec §4.4.
    pub const WORKGROUP_SIZE: u32 = 8;
    /// Row-stride alignment for texture-to-buffer copies, spec §6.
    pub const READBACK_ROW_ALIGNMENT: u32 = 256;
}
