//! Plot styling. YAML overrides are merged key by key over the base config of
//! the theme they name (default `svyts`).

use serde::{Deserialize, Serialize};
use serde_yaml_ng::Value;

use crate::RenderError;
use crate::color::{Color, Palette};
use crate::layout::legend::LegendPosition;
use crate::output::Format;
use crate::style::Font;
use crate::theme::Theme;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct VizConfig {
    pub theme: Theme,
    pub figure: Figure,
    pub fonts: Fonts,
    pub ticks: Ticks,
    pub grid: Grid,
    pub header: HeaderText,
    pub colors: Inks,
    pub palette: Palette,
    /// Per-group colors; groups past the end fall back to the palette.
    pub group_colors: Vec<Color>,
    pub layers: Layers,
    pub legend: LegendPosition,
    pub output: Output,
}

impl Default for VizConfig {
    fn default() -> Self {
        Theme::Svyts.config()
    }
}

impl VizConfig {
    pub fn group_color(&self, i: usize) -> Color {
        self.group_colors.get(i).copied().unwrap_or_else(|| self.palette.color(i))
    }

    pub fn base_font(&self) -> Font {
        Font::new(self.fonts.base, self.colors.ink)
    }

    pub fn title_font(&self) -> Font {
        Font::new(self.fonts.title, self.colors.ink).bold()
    }

    pub fn axis_font(&self) -> Font {
        Font::new(self.fonts.axis, self.colors.ink)
    }

    pub fn tick_font(&self) -> Font {
        Font::new(self.fonts.tick, self.colors.ink)
    }
}

/// Figure size in points.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Figure {
    pub width: f64,
    pub height: f64,
}

/// Font sizes in points.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Fonts {
    pub base: f64,
    pub title: f64,
    pub axis: f64,
    pub tick: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Ticks {
    /// Ticks point into the panel.
    pub inward: bool,
    /// Repeat ticks on the top and right edges.
    pub mirror: bool,
    pub length: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Grid {
    pub show: bool,
    pub color: Color,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct HeaderText {
    pub show: bool,
    /// Replaces the artifact's title.
    pub title: Option<String>,
    pub subtitle: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Inks {
    /// Text, frame and ticks.
    pub ink: Color,
    pub intervention: Color,
    pub note: Color,
}

/// Which parts of the ITSA plot are drawn, and how heavily.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Layers {
    pub bands: bool,
    pub band_opacity: f64,
    pub counterfactual: bool,
    pub means: bool,
    pub error_bars: bool,
    pub marker_size: f64,
    pub line_width: f64,
    /// Difference-in-differences note in the panel corner.
    pub annotation: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Output {
    /// Used when the output path has no extension.
    pub format: Format,
    /// Raster resolution for PNG.
    pub dpi: u32,
}

fn yaml_error(e: serde_yaml_ng::Error) -> RenderError {
    RenderError::Config(e.to_string())
}

/// Deep merge: mappings merge per key, anything else replaces.
fn overlay(base: &mut Value, top: Value) {
    if let (Value::Mapping(b), Value::Mapping(t)) = (&mut *base, &top) {
        for (k, v) in t {
            match b.get_mut(k) {
                Some(slot) => overlay(slot, v.clone()),
                None => {
                    b.insert(k.clone(), v.clone());
                }
            }
        }
        return;
    }
    *base = top;
}

/// Config from optional YAML overrides.
pub fn resolve_config(yaml: Option<&str>) -> crate::Result<VizConfig> {
    let user = match yaml {
        Some(text) => serde_yaml_ng::from_str::<Value>(text).map_err(yaml_error)?,
        None => Value::Null,
    };
    match user {
        Value::Null => Ok(VizConfig::default()),
        Value::Mapping(_) => {
            let theme = match user.get("theme") {
                None => Theme::default(),
                Some(Value::String(name)) => name.parse()?,
                Some(other) => {
                    return Err(RenderError::Config(format!("theme must be a name, got {other:?}")));
                }
            };
            let mut merged = serde_yaml_ng::to_value(theme.config()).map_err(yaml_error)?;
            overlay(&mut merged, user);
            serde_yaml_ng::from_value(merged).map_err(yaml_error)
        }
        _ => Err(RenderError::Config("plot config must be a YAML mapping".into())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_to_svyts() {
        let c = resolve_config(None).unwrap();
        assert_eq!(c.theme, Theme::Svyts);
        assert_eq!(c, resolve_config(Some("")).unwrap());
        assert!(c.layers.bands);
    }

    #[test]
    fn overrides_touch_only_named_keys() {
        let c = resolve_config(Some("figure:\n  width: 300\nlayers:\n  bands: false\n")).unwrap();
        let d = VizConfig::default();
        assert_eq!(c.figure.width, 300.0);
        assert_eq!(c.figure.height, d.figure.height);
        assert!(!c.layers.bands);
        assert_eq!(c.layers.counterfactual, d.layers.counterfactual);
    }

    #[test]
    fn theme_key_picks_the_base() {
        let c = resolve_config(Some("theme: print\n")).unwrap();
        assert_eq!(c.palette, Palette::Grayscale);
        assert!(c.ticks.inward && !c.grid.show);
        let c = resolve_config(Some("theme: print\ngrid:\n  show: true\n")).unwrap();
        assert!(c.grid.show);
        assert_eq!(c.palette, Palette::Grayscale);
    }

    #[test]
    fn group_colors_then_palette() {
        let c = resolve_config(Some("group_colors: ['#000000', '#ff000080']\npalette: wong\n")).unwrap();
        assert_eq!(c.group_color(0), Color::BLACK);
        assert!(!c.group_color(1).is_opaque());
        assert_eq!(c.group_color(2), Palette::Wong.color(2));
    }

    #[test]
    fn bad_input_is_a_config_error() {
        for yaml in [
            "figure: [1, 2",
            "- a\n- b\n",
            "grid:\n  color: blue\n",
            "theme: neon\n",
            "theme: 3\n",
            "layers:\n  glow: true\n",
        ] {
            assert!(matches!(resolve_config(Some(yaml)), Err(RenderError::Config(_))), "{yaml}");
        }
    }
}
