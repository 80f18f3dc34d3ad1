//! Strokes, fills, fonts and marker glyphs understood by [`crate::canvas::Canvas`].

use crate::color::Color;

/// Dash pattern of a stroke.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum Pattern {
    #[default]
    Solid,
    Dashed,
    Dotted,
}

impl Pattern {
    /// `stroke-dasharray` value; solid lines have none.
    pub fn dasharray(self) -> Option<&'static str> {
        match self {
            Pattern::Solid => None,
            Pattern::Dashed => Some("6 3"),
            Pattern::Dotted => Some("1.5 2.5"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Stroke {
    pub color: Color,
    pub width: f64,
    pub pattern: Pattern,
}

impl Stroke {
    pub fn new(color: Color, width: f64) -> Self {
        Self { color, width, pattern: Pattern::Solid }
    }

    pub fn dashed(self) -> Self {
        Self { pattern: Pattern::Dashed, ..self }
    }

    pub fn dotted(self) -> Self {
        Self { pattern: Pattern::Dotted, ..self }
    }
}

/// Fill and optional outline of a closed shape.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Paint {
    pub fill: Option<Color>,
    pub outline: Option<Stroke>,
}

impl Paint {
    pub fn fill(color: Color) -> Self {
        Self { fill: Some(color), outline: None }
    }

    pub fn outline(stroke: Stroke) -> Self {
        Self { fill: None, outline: Some(stroke) }
    }

    pub fn with_outline(self, stroke: Stroke) -> Self {
        Self { outline: Some(stroke), ..self }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Font {
    pub size: f64,
    pub color: Color,
    pub bold: bool,
    pub italic: bool,
}

impl Font {
    pub fn new(size: f64, color: Color) -> Self {
        Self { size, color, bold: false, italic: false }
    }

    pub fn bold(self) -> Self {
        Self { bold: true, ..self }
    }

    pub fn italic(self) -> Self {
        Self { italic: true, ..self }
    }
}

/// Horizontal position of the anchor point within the text.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HAlign {
    Left,
    Center,
    Right,
}

/// Vertical position of the anchor point within the text.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VAlign {
    Baseline,
    Middle,
    Top,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Align(pub HAlign, pub VAlign);

impl Align {
    pub const LEFT: Self = Self(HAlign::Left, VAlign::Baseline);
    pub const RIGHT: Self = Self(HAlign::Right, VAlign::Baseline);
    pub const CENTER: Self = Self(HAlign::Center, VAlign::Baseline);

    pub(crate) fn text_anchor(self) -> &'static str {
        match self.0 {
            HAlign::Left => "start",
            HAlign::Center => "middle",
            HAlign::Right => "end",
        }
    }

    pub(crate) fn dominant_baseline(self) -> Option<&'static str> {
        match self.1 {
            VAlign::Baseline => None,
            VAlign::Middle => Some("central"),
            VAlign::Top => Some("hanging"),
        }
    }
}

/// Marker drawn at an observed mean.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Glyph {
    Circle,
    Square,
    Triangle,
    Diamond,
}

impl Glyph {
    /// Glyph for the `i`-th group, so groups stay apart in grayscale.
    pub fn for_group(i: usize) -> Self {
        const ORDER: [Glyph; 4] = [Glyph::Circle, Glyph::Triangle, Glyph::Square, Glyph::Diamond];
        ORDER[i % ORDER.len()]
    }
}
