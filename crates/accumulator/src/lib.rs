//! Stroke accumulation: ping-pong GPU textures, instance staging, compute
//! dispatch pipelines, and the `StrokeAccumulator` orchestrator that drives
//! a single in-progress stroke from `begin_stroke` through `end_stroke`.

mod bind_group_cache;
mod dispatch_support;
mod instance_buffer;
mod mask_ping_pong;
mod modulation_textures;
mod ping_pong;
mod pipelines;
mod stroke_accumulator;
mod texture_cache;
mod tile_builder;

pub use dispatch_support::DispatchError;
pub use instance_buffer::{DabExtra, InstanceBufferError};
pub use ping_pong::TextureIdentitySource;
pub use stroke_accumulator::{
    AccumulatorState, CommittedStroke, PreviewReadbackState, RenderScaleMode, StrokeAccumulator, StrokeAccumulatorConfig,
};
pub use texture_cache::{AtlasDecodeError, DecodedRaster, TextureCache, TextureKey};
pub use tile_builder::{build_dispatch_tiles, DispatchTile, TileBuildError};

pub use stroke_protocol::{
    parse_hex_color, BrushMode, ColorBlendMode, DualBlendMode, DualBrushSettings, GpuDabParams, HexColorError,
    LayerBlendMode, PatternSettings,
};
