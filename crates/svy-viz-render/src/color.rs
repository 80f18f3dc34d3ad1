use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// sRGB color with an opacity in `[0, 1]`.
///
/// Written and read as `#rrggbb`, or `#rrggbbaa` when translucent.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Color {
    pub r: u8,
    pub g: u8,
    pub b: u8,
    pub opacity: f64,
}

impl Color {
    pub const BLACK: Color = Color::rgb(0, 0, 0);
    pub const WHITE: Color = Color::rgb(255, 255, 255);

    pub const fn rgb(r: u8, g: u8, b: u8) -> Self {
        Self { r, g, b, opacity: 1.0 }
    }

    /// From a `0xRRGGBB` literal.
    pub const fn from_rgb24(v: u32) -> Self {
        Self::rgb((v >> 16) as u8, (v >> 8) as u8, v as u8)
    }

    pub fn fade(self, opacity: f64) -> Self {
        Self { opacity: opacity.clamp(0.0, 1.0), ..self }
    }

    pub fn is_opaque(&self) -> bool {
        self.opacity >= 1.0 - 1e-6
    }

    /// `#rrggbb`, without the opacity.
    pub fn hex(&self) -> String {
        format!("#{:02x}{:02x}{:02x}", self.r, self.g, self.b)
    }
}

impl Default for Color {
    fn default() -> Self {
        Self::BLACK
    }
}

impl fmt::Display for Color {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.hex())?;
        if !self.is_opaque() {
            write!(f, "{:02x}", (self.opacity * 255.0).round() as u8)?;
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParseColorError(String);

impl fmt::Display for ParseColorError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "invalid color '{}' (expected #rrggbb or #rrggbbaa)", self.0)
    }
}

impl std::error::Error for ParseColorError {}

impl FromStr for Color {
    type Err = ParseColorError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let err = || ParseColorError(s.to_string());
        let digits = s.trim().trim_start_matches('#');
        if !digits.bytes().all(|b| b.is_ascii_hexdigit()) {
            return Err(err());
        }
        let v = u32::from_str_radix(digits, 16).map_err(|_| err())?;
        match digits.len() {
            6 => Ok(Self::from_rgb24(v)),
            8 => Ok(Self::from_rgb24(v >> 8).fade(f64::from(v & 0xff) / 255.0)),
            _ => Err(err()),
        }
    }
}

impl TryFrom<String> for Color {
    type Error = ParseColorError;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        s.parse()
    }
}

impl From<Color> for String {
    fn from(c: Color) -> Self {
        c.to_string()
    }
}

/// Named group palettes.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Palette {
    #[default]
    Svyts,
    /// Okabe-Ito / Wong colorblind-safe set.
    Wong,
    Tableau10,
    Grayscale,
}

impl Palette {
    fn rgb24(self) -> &'static [u32] {
        match self {
            Palette::Svyts => &[0x1d4ed8, 0xc2410c, 0x15803d, 0x7e22ce, 0x0f766e, 0xb45309],
            Palette::Wong => &[0x0072b2, 0xd55e00, 0x009e73, 0xcc79a7, 0xe69f00, 0x56b4e9],
            Palette::Tableau10 => &[
                0x4e79a7, 0xf28e2b, 0xe15759, 0x76b7b2, 0x59a14f, 0xedc948, 0xb07aa1, 0xff9da7,
                0x9c755f, 0xbab0ab,
            ],
            Palette::Grayscale => &[0x111111, 0x6b6b6b, 0x9a9a9a, 0xc4c4c4],
        }
    }

    pub fn len(self) -> usize {
        self.rgb24().len()
    }

    pub fn is_empty(self) -> bool {
        self.rgb24().is_empty()
    }

    /// `i`-th color, wrapping around.
    pub fn color(self, i: usize) -> Color {
        let set = self.rgb24();
        Color::from_rgb24(set[i % set.len()])
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_hex() {
        let c: Color = "#1D4ED8".parse().unwrap();
        assert_eq!((c.r, c.g, c.b), (0x1d, 0x4e, 0xd8));
        assert!(c.is_opaque());
        assert_eq!(c, Color::from_rgb24(0x1d4ed8));
    }

    #[test]
    fn parses_alpha_suffix() {
        let c: Color = "ff000080".parse().unwrap();
        assert_eq!(c.r, 255);
        assert!((c.opacity - 128.0 / 255.0).abs() < 1e-9);
        assert_eq!(c.to_string(), "#ff000080");
    }

    #[test]
    fn rejects_bad_input() {
        assert!("#fff".parse::<Color>().is_err());
        assert!("#zzzzzz".parse::<Color>().is_err());
        assert!("#+12345".parse::<Color>().is_err());
        assert!("é".parse::<Color>().is_err());
    }

    #[test]
    fn serde_uses_hex_strings() {
        let c = Color::rgb(29, 78, 216).fade(0.5);
        let json = serde_json::to_string(&c).unwrap();
        assert_eq!(json, "\"#1d4ed880\"");
        let back: Color = serde_json::from_str(&json).unwrap();
        assert_eq!((back.r, back.g, back.b), (29, 78, 216));
        assert!(serde_json::from_str::<Color>("\"red\"").is_err());
    }

    #[test]
    fn palettes_wrap() {
        assert_eq!(Palette::Svyts.len(), 6);
        assert_eq!(Palette::Grayscale.color(4), Palette::Grayscale.color(0));
        let p: Palette = serde_json::from_str("\"tableau10\"").unwrap();
        assert_eq!(p, Palette::Tableau10);
    }
}
