use crate::types::MigrationCounts;
use image::Rgba;
use std::fmt;

pub const HUE_SCALE: f64 = 60.0;
pub const MAX_HUE: f64 = 120.0;
pub const SATURATION: f64 = 75.0;
pub const LIGHTNESS: f64 = 50.0;

/// HSL fill color. Hue in degrees, saturation and lightness in percent.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DisplayColor {
    pub hue: f64,
    pub saturation: f64,
    pub lightness: f64,
}

impl fmt::Display for DisplayColor {
    /// CSS form, e.g. `hsl(7.5, 75%, 50%)`.
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "hsl({}, {}%, {}%)", self.hue, self.saturation, self.lightness)
    }
}

impl DisplayColor {
    /// Converts to RGBA for raster output. `opacity` is clamped to [0, 1].
    pub fn to_rgba(&self, opacity: f64) -> Rgba<u8> {
        let h = (self.hue % 360.0 + 360.0) % 360.0 / 360.0;
        let s = (self.saturation / 100.0).clamp(0.0, 1.0);
        let l = (self.lightness / 100.0).clamp(0.0, 1.0);
        let a = (opacity.clamp(0.0, 1.0) * 255.0).round() as u8;

        if s == 0.0 {
            let v = (l * 255.0).round() as u8;
            return Rgba([v, v, v, a]);
        }

        let q = if l < 0.5 { l * (1.0 + s) } else { l + s - l * s };
        let p = 2.0 * l - q;

        let channel = |t: f64| (hue_to_rgb(p, q, t) * 255.0).round() as u8;
        Rgba([channel(h + 1.0 / 3.0), channel(h), channel(h - 1.0 / 3.0), a])
    }
}

fn hue_to_rgb(p: f64, q: f64, mut t: f64) -> f64 {
    if t < 0.0 {
        t += 1.0;
    }
    if t > 1.0 {
        t -= 1.0;
    }
    if t < 1.0 / 6.0 {
        p + (q - p) * 6.0 * t
    } else if t < 1.0 / 2.0 {
        q
    } else if t < 2.0 / 3.0 {
        p + (q - p) * (2.0 / 3.0 - t) * 6.0
    } else {
        p
    }
}

/// Parses `#rrggbb` (leading `#` optional).
pub fn hex_to_rgba(hex: &str, opacity: f64) -> Option<Rgba<u8>> {
    let hex = hex.trim_start_matches('#');
    if hex.len() != 6 || !hex.is_ascii() {
        return None;
    }
    let r = u8::from_str_radix(&hex[0..2], 16).ok()?;
    let g = u8::from_str_radix(&hex[2..4], 16).ok()?;
    let b = u8::from_str_radix(&hex[4..6], 16).ok()?;
    let a = (opacity.clamp(0.0, 1.0) * 255.0).round() as u8;
    Some(Rgba([r, g, b, a]))
}

/// Maps a migration balance onto the red..green hue range.
///
/// `hue = min((positive / negative)^3 * 60, 120)`. With no out-bound
/// migration at all the balance counts as maximally positive, unless nothing
/// moved in either direction, which counts as balanced.
pub fn compute_color(positive: u32, negative: u32) -> DisplayColor {
    let hue = if negative == 0 {
        if positive == 0 { HUE_SCALE } else { MAX_HUE }
    } else {
        let ratio = (positive as f64 / negative as f64).powi(3);
        (ratio * HUE_SCALE).min(MAX_HUE)
    };

    DisplayColor {
        hue,
        saturation: SATURATION,
        lightness: LIGHTNESS,
    }
}

pub fn color_for(counts: MigrationCounts) -> DisplayColor {
    compute_color(counts.positive, counts.negative)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_surplus_saturates_at_green() {
        let color = compute_color(100, 50);
        assert_eq!(color.hue, 120.0);
        assert_eq!(color.to_string(), "hsl(120, 75%, 50%)");
        assert_eq!(compute_color(200, 100).hue, 120.0);
    }

    #[test]
    fn test_deficit_fades_to_red() {
        let color = compute_color(50, 100);
        assert_eq!(color.hue, 7.5);
        assert_eq!(color.to_string(), "hsl(7.5, 75%, 50%)");
        assert_eq!(compute_color(0, 42).hue, 0.0);
    }

    #[test]
    fn test_balanced_is_yellow() {
        assert_eq!(compute_color(37, 37).hue, 60.0);
        assert_eq!(compute_color(0, 0).hue, 60.0);
    }

    #[test]
    fn test_no_outbound_migration() {
        assert_eq!(compute_color(1, 0).hue, 120.0);
        assert_eq!(compute_color(u32::MAX, 0).hue, 120.0);
    }

    #[test]
    fn test_deterministic() {
        assert_eq!(compute_color(13, 29), compute_color(13, 29));
    }

    #[test]
    fn test_hue_monotonic_in_positive() {
        let mut last = -1.0;
        for positive in 0..=300 {
            let hue = compute_color(positive, 100).hue;
            assert!(hue >= last, "hue dropped at positive={positive}");
            last = hue;
        }
    }

    #[test]
    fn test_hex_to_rgba() {
        assert_eq!(hex_to_rgba("#808080", 1.0), Some(Rgba([128, 128, 128, 255])));
        assert_eq!(hex_to_rgba("ff0000", 0.0), Some(Rgba([255, 0, 0, 0])));
        assert_eq!(hex_to_rgba("gray", 1.0), None);
        assert_eq!(hex_to_rgba("#zz0000", 1.0), None);
    }

    #[test]
    fn test_to_rgba() {
        assert_eq!(compute_color(100, 50).to_rgba(1.0), Rgba([32, 223, 32, 255]));
        assert_eq!(compute_color(0, 1).to_rgba(0.5), Rgba([223, 32, 32, 128]));
        assert_eq!(compute_color(1, 1).to_rgba(0.0), Rgba([223, 223, 32, 0]));
    }
}
