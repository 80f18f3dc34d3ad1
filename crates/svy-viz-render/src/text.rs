//! Approximate text extents, used to size margins and legend boxes.
//!
//! No font files are read. The viewer (or resvg) shapes the real glyphs, so
//! these numbers only need to be close enough that labels are not clipped.

use crate::style::Font;

/// Width of `ch` as a fraction of the font size, for a generic sans face.
fn em_width(ch: char) -> f64 {
    if matches!(ch, 'i' | 'j' | 'l' | '.' | ',' | ':' | ';' | '\'' | '|' | '!') {
        0.28
    } else if matches!(ch, ' ' | 'f' | 't' | 'r' | 'I' | '(' | ')' | '[' | ']' | '-') {
        0.34
    } else if matches!(ch, 'm' | 'w' | 'M' | 'W' | '%' | '@' | '$') {
        0.86
    } else if ch.is_ascii_uppercase() || ch.is_ascii_digit() {
        0.64
    } else if ch.is_ascii() {
        0.54
    } else {
        0.62
    }
}

pub fn text_width(s: &str, font: &Font) -> f64 {
    let em: f64 = s.chars().map(em_width).sum();
    let weight = if font.bold { 1.06 } else { 1.0 };
    em * font.size * weight
}

/// Baseline-to-baseline distance.
pub fn line_height(font: &Font) -> f64 {
    font.size * 1.2
}

/// Distance from the baseline to the top of capitals.
pub fn cap_height(font: &Font) -> f64 {
    font.size * 0.72
}
