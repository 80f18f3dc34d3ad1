use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::RenderError;
use crate::color::{Color, Palette};
use crate::config::{Figure, Fonts, Grid, HeaderText, Inks, Layers, Output, Ticks, VizConfig};
use crate::layout::legend::LegendPosition;
use crate::output::Format;

/// Built-in styles.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Theme {
    /// Screen default: light grid, colored groups, every layer on.
    #[default]
    Svyts,
    /// Smaller figure without grid, header, bands or annotation.
    Minimal,
    /// Grayscale with inward mirrored ticks, for journals.
    Print,
}

impl Theme {
    pub const ALL: [Theme; 3] = [Theme::Svyts, Theme::Minimal, Theme::Print];

    pub fn name(self) -> &'static str {
        match self {
            Theme::Svyts => "svyts",
            Theme::Minimal => "minimal",
            Theme::Print => "print",
        }
    }

    pub fn config(self) -> VizConfig {
        let mut c = VizConfig {
            theme: self,
            figure: Figure { width: 518.4, height: 324.0 },
            fonts: Fonts { base: 9.0, title: 13.0, axis: 10.0, tick: 8.5 },
            ticks: Ticks { inward: false, mirror: false, length: 4.0 },
            grid: Grid { show: true, color: Color::from_rgb24(0xe2e8f0) },
            header: HeaderText { show: true, title: None, subtitle: None },
            colors: Inks {
                ink: Color::from_rgb24(0x1f2937),
                intervention: Color::from_rgb24(0x6b7280),
                note: Color::from_rgb24(0x374151),
            },
            palette: Palette::Svyts,
            group_colors: Vec::new(),
            layers: Layers {
                bands: true,
                band_opacity: 0.18,
                counterfactual: true,
                means: true,
                error_bars: true,
                marker_size: 5.5,
                line_width: 1.6,
                annotation: true,
            },
            legend: LegendPosition::TopLeft,
            output: Output { format: Format::Svg, dpi: 220 },
        };
        match self {
            Theme::Svyts => {}
            Theme::Minimal => {
                c.figure = Figure { width: 432.0, height: 288.0 };
                c.fonts = Fonts { base: 8.5, title: 11.0, axis: 9.0, tick: 8.0 };
                c.grid.show = false;
                c.header.show = false;
                c.palette = Palette::Tableau10;
                c.layers.bands = false;
                c.layers.annotation = false;
                c.legend = LegendPosition::TopRight;
            }
            Theme::Print => {
                c.figure = Figure { width: 504.0, height: 360.0 };
                c.fonts = Fonts { base: 10.0, title: 12.0, axis: 11.0, tick: 9.5 };
                c.ticks = Ticks { inward: true, mirror: true, length: 5.0 };
                c.grid.show = false;
                c.colors = Inks { ink: Color::BLACK, intervention: Color::BLACK, note: Color::BLACK };
                c.palette = Palette::Grayscale;
                c.layers.band_opacity = 0.12;
                c.output.dpi = 300;
            }
        }
        c
    }
}

impl FromStr for Theme {
    type Err = RenderError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let wanted = s.trim();
        Self::ALL.into_iter().find(|t| t.name().eq_ignore_ascii_case(wanted)).ok_or_else(|| {
            RenderError::Config(format!("unknown theme '{s}' (expected svyts, minimal or print)"))
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn names_round_trip() {
        for t in Theme::ALL {
            assert_eq!(t.name().parse::<Theme>().unwrap(), t);
            assert_eq!(t.config().theme, t);
        }
        assert_eq!("PRINT".parse::<Theme>().unwrap(), Theme::Print);
        assert!("sepia".parse::<Theme>().is_err());
    }

    #[test]
    fn print_is_grayscale_with_inward_ticks() {
        let c = Theme::Print.config();
        assert_eq!(c.palette, Palette::Grayscale);
        assert!(c.ticks.inward && c.ticks.mirror);
        assert_eq!(c.colors.ink, Color::BLACK);
    }

    #[test]
    fn minimal_drops_decoration() {
        let c = Theme::Minimal.config();
        assert!(!c.grid.show && !c.header.show);
        assert!(!c.layers.bands && !c.layers.annotation);
        assert!(c.layers.counterfactual);
    }
}
