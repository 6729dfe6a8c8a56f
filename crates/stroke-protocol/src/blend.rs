//! Blend-mode enumerations, uniform-encoded as the integers spec §6 assigns
//! them. Kept as plain `#[repr(u32)]` enums with explicit `to_u32`/`from_u32`
//! rather than a derive macro, matching this lineage's existing
//! hand-written enum-to-wire-integer conversions (e.g. `BlendMode` in
//! `document`).

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ColorBlendMode {
    Srgb,
    Linear,
}

impl ColorBlendMode {
    pub fn to_u32(self) -> u32 {
        match self {
            ColorBlendMode::Srgb => 0,
            ColorBlendMode::Linear => 1,
        }
    }
}

/// Dual blend modes, uniform-encoded 0..=7 per spec §6.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DualBlendMode {
    Multiply,
    Darken,
    Overlay,
    ColorDodge,
    ColorBurn,
    LinearBurn,
    HardMix,
    LinearHeight,
}

impl DualBlendMode {
    pub const ALL: [DualBlendMode; 8] = [
        DualBlendMode::Multiply,
        DualBlendMode::Darken,
        DualBlendMode::Overlay,
        DualBlendMode::ColorDodge,
        DualBlendMode::ColorBurn,
        DualBlendMode::LinearBurn,
        DualBlendMode::HardMix,
        DualBlendMode::LinearHeight,
    ];

    pub fn to_u32(self) -> u32 {
        match self {
            DualBlendMode::Multiply => 0,
            DualBlendMode::Darken => 1,
            DualBlendMode::Overlay => 2,
            DualBlendMode::ColorDodge => 3,
            DualBlendMode::ColorBurn => 4,
            DualBlendMode::LinearBurn => 5,
            DualBlendMode::HardMix => 6,
            DualBlendMode::LinearHeight => 7,
        }
    }

    pub fn from_u32(value: u32) -> Option<Self> {
        Self::ALL.into_iter().find(|mode| mode.to_u32() == value)
    }

    /// Whether this mode is one of the modes spec §4.4.4 permits an alpha
    /// lift for ("darken", "overlay", "linear burn", "hard mix").
    pub fn permits_alpha_lift(self) -> bool {
        matches!(
            self,
            DualBlendMode::Darken
                | DualBlendMode::Overlay
                | DualBlendMode::LinearBurn
                | DualBlendMode::HardMix
        )
    }
}

/// Layer blend modes, uniform-encoded 0..=15 per spec §6.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LayerBlendMode {
    Normal,
    Multiply,
    Screen,
    Overlay,
    Darken,
    Lighten,
    ColorDodge,
    ColorBurn,
    HardLight,
    SoftLight,
    Difference,
    Exclusion,
    Hue,
    Saturation,
    Color,
    Luminosity,
}

impl LayerBlendMode {
    pub const ALL: [LayerBlendMode; 16] = [
        LayerBlendMode::Normal,
        LayerBlendMode::Multiply,
        LayerBlendMode::Screen,
        LayerBlendMode::Overlay,
        LayerBlendMode::Darken,
        LayerBlendMode::Lighten,
        LayerBlendMode::ColorDodge,
        LayerBlendMode::ColorBurn,
        LayerBlendMode::HardLight,
        LayerBlendMode::SoftLight,
        LayerBlendMode::Difference,
        LayerBlendMode::Exclusion,
        LayerBlendMode::Hue,
        LayerBlendMode::Saturation,
        LayerBlendMode::Color,
        LayerBlendMode::Luminosity,
    ];

    pub fn to_u32(self) -> u32 {
        self as u32
    }

    pub fn from_u32(value: u32) -> Option<Self> {
        Self::ALL.get(value as usize).copied()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn dual_blend_round_trips_through_u32() {
        for mode in DualBlendMode::ALL {
            assert_eq!(DualBlendMode::from_u32(mode.to_u32()), Some(mode));
        }
    }

    #[test]
    fn layer_blend_round_trips_through_u32() {
        for mode in LayerBlendMode::ALL {
            assert_eq!(LayerBlendMode::from_u32(mode.to_u32()), Some(mode));
        }
    }

    #[test]
    fn alpha_lift_permitted_only_for_named_modes() {
        assert!(DualBlendMode::Darken.permits_alpha_lift());
        assert!(DualBlendMode::Overlay.permits_alpha_lift());
        assert!(DualBlendMode::LinearBurn.permits_alpha_lift());
        assert!(DualBlendMode::HardMix.permits_alpha_lift());
        assert!(!DualBlendMode::Multiply.permits_alpha_lift());
        assert!(!DualBlendMode::ColorDodge.permits_alpha_lift());
        assert!(!DualBlendMode::ColorBurn.permits_alpha_lift());
        assert!(!DualBlendMode::LinearHeight.permits_alpha_lift());
    }

    #[test]
    fn linear_burn_and_linear_height_are_distinct() {
        assert_ne!(
            DualBlendMode::LinearBurn.to_u32(),
            DualBlendMode::LinearHeight.to_u32()
        );
        assert_ne!(
            DualBlendMode::LinearBurn.permits_alpha_lift(),
            DualBlendMode::LinearHeight.permits_alpha_lift()
        );
    }
}
