use image::Rgba;
use serde::{Deserialize, Serialize};

// ============================================================================
// BLEND MODES
// ============================================================================

/// Separable compositing modes a layer can be drawn with.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum BlendMode {
    #[default]
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
}

impl BlendMode {
    /// All modes in menu order.
    pub fn all() -> &'static [BlendMode] {
        &[
            BlendMode::Normal,
            BlendMode::Multiply,
            BlendMode::Screen,
            BlendMode::Overlay,
            BlendMode::Darken,
            BlendMode::Lighten,
            BlendMode::ColorDodge,
            BlendMode::ColorBurn,
            BlendMode::HardLight,
            BlendMode::SoftLight,
            BlendMode::Difference,
            BlendMode::Exclusion,
        ]
    }

    pub fn name(&self) -> &'static str {
        match self {
            BlendMode::Normal => "Normal",
            BlendMode::Multiply => "Multiply",
            BlendMode::Screen => "Screen",
            BlendMode::Overlay => "Overlay",
            BlendMode::Darken => "Darken",
            BlendMode::Lighten => "Lighten",
            BlendMode::ColorDodge => "Color Dodge",
            BlendMode::ColorBurn => "Color Burn",
            BlendMode::HardLight => "Hard Light",
            BlendMode::SoftLight => "Soft Light",
            BlendMode::Difference => "Difference",
            BlendMode::Exclusion => "Exclusion",
        }
    }

    /// Parses a mode from its display name or a kebab/snake-case spelling.
    pub fn from_name(name: &str) -> Option<Self> {
        let wanted: String = name
            .chars()
            .filter(|c| c.is_ascii_alphanumeric())
            .map(|c| c.to_ascii_lowercase())
            .collect();
        Self::all().iter().copied().find(|m| {
            let have: String = m
                .name()
                .chars()
                .filter(|c| c.is_ascii_alphanumeric())
                .map(|c| c.to_ascii_lowercase())
                .collect();
            have == wanted
        })
    }

    fn channel(self, base: f32, top: f32) -> f32 {
        match self {
            BlendMode::Normal => top,
            BlendMode::Multiply => base * top,
            BlendMode::Screen => 1.0 - (1.0 - base) * (1.0 - top),
            BlendMode::Overlay => hard_light(top, base),
            BlendMode::Darken => base.min(top),
            BlendMode::Lighten => base.max(top),
            BlendMode::ColorDodge => {
                if base <= 0.0 {
                    0.0
                } else if top >= 1.0 {
                    1.0
                } else {
                    (base / (1.0 - top)).min(1.0)
                }
            }
            BlendMode::ColorBurn => {
                if base >= 1.0 {
                    1.0
                } else if top <= 0.0 {
                    0.0
                } else {
                    1.0 - ((1.0 - base) / top).min(1.0)
                }
            }
            BlendMode::HardLight => hard_light(base, top),
            BlendMode::SoftLight => soft_light(base, top),
            BlendMode::Difference => (base - top).abs(),
            BlendMode::Exclusion => base + top - 2.0 * base * top,
        }
    }
}

fn hard_light(base: f32, top: f32) -> f32 {
    if top <= 0.5 {
        2.0 * base * top
    } else {
        1.0 - 2.0 * (1.0 - base) * (1.0 - top)
    }
}

/// W3C Soft Light formula.
fn soft_light(base: f32, top: f32) -> f32 {
    if top <= 0.5 {
        base - (1.0 - 2.0 * top) * base * (1.0 - base)
    } else {
        let d = if base <= 0.25 {
            ((16.0 * base - 12.0) * base + 4.0) * base
        } else {
            base.sqrt()
        };
        base + (2.0 * top - 1.0) * (d - base)
    }
}

/// Composites `top` over `base` with the given mode and opacity (straight alpha).
pub fn blend_pixel(base: Rgba<u8>, top: Rgba<u8>, mode: BlendMode, opacity: f32) -> Rgba<u8> {
    if top[3] == 0 || opacity <= 0.0 {
        return base;
    }
    if mode == BlendMode::Normal && opacity >= 1.0 && top[3] == 255 {
        return top;
    }

    let opacity = opacity.clamp(0.0, 1.0);
    let base_a = base[3] as f32 / 255.0;
    let top_a = (top[3] as f32 / 255.0) * opacity;
    let out_a = top_a + base_a * (1.0 - top_a);
    if out_a <= 0.0 {
        return Rgba([0, 0, 0, 0]);
    }

    let mut out = [0u8; 4];
    for c in 0..3 {
        let b = base[c] as f32 / 255.0;
        let t = top[c] as f32 / 255.0;
        // Blended colour only applies where the backdrop exists.
        let mixed = (1.0 - base_a) * t + base_a * mode.channel(b, t);
        let v = (mixed * top_a + b * base_a * (1.0 - top_a)) / out_a;
        out[c] = (v * 255.0).round().clamp(0.0, 255.0) as u8;
    }
    out[3] = (out_a * 255.0).round().clamp(0.0, 255.0) as u8;
    Rgba(out)
}

/// Multiplies a pixel's alpha by `coverage` (0..=255). A "destination-in" composite.
#[inline]
pub fn keep_where(px: &mut Rgba<u8>, coverage: u8) {
    px[3] = ((px[3] as u16 * coverage as u16 + 127) / 255) as u8;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn normal_opaque_overwrites() {
        let out = blend_pixel(Rgba([10, 20, 30, 255]), Rgba([200, 100, 50, 255]), BlendMode::Normal, 1.0);
        assert_eq!(out, Rgba([200, 100, 50, 255]));
    }

    #[test]
    fn transparent_top_keeps_base() {
        let base = Rgba([10, 20, 30, 255]);
        for mode in BlendMode::all() {
            assert_eq!(blend_pixel(base, Rgba([255, 255, 255, 0]), *mode, 1.0), base);
        }
    }

    #[test]
    fn multiply_white_is_identity() {
        let base = Rgba([120, 60, 30, 255]);
        assert_eq!(blend_pixel(base, Rgba([255, 255, 255, 255]), BlendMode::Multiply, 1.0), base);
    }

    #[test]
    fn half_opacity_mixes() {
        let out = blend_pixel(Rgba([0, 0, 0, 255]), Rgba([255, 255, 255, 255]), BlendMode::Normal, 0.5);
        assert!((out[0] as i32 - 128).abs() <= 1);
        assert_eq!(out[3], 255);
    }

    #[test]
    fn blend_over_empty_backdrop_is_plain_source() {
        let top = Rgba([200, 10, 10, 255]);
        let out = blend_pixel(Rgba([0, 0, 0, 0]), top, BlendMode::Difference, 1.0);
        assert_eq!(out, top);
    }

    #[test]
    fn names_round_trip() {
        for mode in BlendMode::all() {
            assert_eq!(BlendMode::from_name(mode.name()), Some(*mode));
        }
        assert_eq!(BlendMode::from_name("color-dodge"), Some(BlendMode::ColorDodge));
        assert_eq!(BlendMode::from_name("hue"), None);
    }

    #[test]
    fn keep_where_scales_alpha() {
        let mut px = Rgba([1, 2, 3, 255]);
        keep_where(&mut px, 0);
        assert_eq!(px[3], 0);
        let mut px = Rgba([1, 2, 3, 200]);
        keep_where(&mut px, 255);
        assert_eq!(px[3], 200);
    }
}
