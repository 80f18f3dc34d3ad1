use serde::{Deserialize, Serialize};

use crate::canvas::Canvas;
use crate::color::Color;
use crate::layout::panel::Panel;
use crate::style::{Align, Font, Glyph, HAlign, Paint, Stroke, VAlign};
use crate::text::text_width;

/// Legend corner inside the panel.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LegendPosition {
    #[default]
    TopLeft,
    TopRight,
    BottomLeft,
    BottomRight,
    Hidden,
}

/// What the key next to a legend label looks like.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Swatch {
    Band(Color),
    Line(Stroke),
    /// Line with the group's marker on it.
    Series(Stroke, Glyph),
}

#[derive(Debug, Clone, PartialEq)]
pub struct LegendItem {
    pub label: String,
    pub swatch: Swatch,
}

impl LegendItem {
    pub fn new(label: impl Into<String>, swatch: Swatch) -> Self {
        Self { label: label.into(), swatch }
    }
}

const KEY_W: f64 = 18.0;
const GAP: f64 = 5.0;
const PAD: f64 = 5.0;
const INSET: f64 = 6.0;

/// Boxed legend in one corner of `panel`. Returns the box drawn, if any.
pub fn draw(
    canvas: &mut Canvas,
    panel: &Panel,
    items: &[LegendItem],
    position: LegendPosition,
    font: &Font,
) -> Option<Panel> {
    if items.is_empty() || position == LegendPosition::Hidden {
        return None;
    }
    let row = font.size + 5.0;
    let label_w = items.iter().map(|it| text_width(&it.label, font)).fold(0.0_f64, f64::max);
    let w = 2.0 * PAD + KEY_W + GAP + label_w;
    let h = 2.0 * PAD + row * items.len() as f64;

    let left = matches!(position, LegendPosition::TopLeft | LegendPosition::BottomLeft);
    let top = matches!(position, LegendPosition::TopLeft | LegendPosition::TopRight);
    let x = if left { panel.x + INSET } else { panel.right() - INSET - w };
    let y = if top { panel.y + INSET } else { panel.bottom() - INSET - h };
    let frame = Paint::fill(Color::WHITE.fade(0.88)).with_outline(Stroke::new(Color::from_rgb24(0xc8c8c8), 0.5));
    canvas.rect(x, y, w, h, &frame);

    for (i, item) in items.iter().enumerate() {
        let cy = y + PAD + row * (i as f64 + 0.5);
        let kx = x + PAD;
        match item.swatch {
            Swatch::Band(color) => {
                canvas.rect(kx, cy - row * 0.3, KEY_W, row * 0.6, &Paint::fill(color));
            }
            Swatch::Line(stroke) => canvas.line((kx, cy), (kx + KEY_W, cy), &stroke),
            Swatch::Series(stroke, glyph) => {
                canvas.line((kx, cy), (kx + KEY_W, cy), &stroke);
                canvas.glyph(kx + KEY_W / 2.0, cy, font.size * 0.5, glyph, &Paint::fill(stroke.color));
            }
        }
        canvas.text(kx + KEY_W + GAP, cy, &item.label, font, Align(HAlign::Left, VAlign::Middle));
    }
    Some(Panel { x, y, w, h })
}
