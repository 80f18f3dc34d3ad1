//! SVG writer. Coordinates are points (1/72 inch), origin top-left.

use std::fmt::{self, Write as _};

use crate::color::Color;
use crate::style::{Align, Font, Glyph, Paint, Stroke};

/// Escape text content and attribute values.
pub fn escape(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    for ch in s.chars() {
        match ch {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&#39;"),
            c => out.push(c),
        }
    }
    out
}

/// Two decimals, trailing zeros dropped.
fn num(v: f64) -> String {
    let s = format!("{v:.2}");
    let s = s.trim_end_matches('0').trim_end_matches('.');
    if s == "-0" { "0".into() } else { s.into() }
}

fn fill_attrs(color: Option<Color>) -> String {
    match color {
        None => r#" fill="none""#.into(),
        Some(c) if c.is_opaque() => format!(r#" fill="{}""#, c.hex()),
        Some(c) => format!(r#" fill="{}" fill-opacity="{}""#, c.hex(), num(c.opacity)),
    }
}

fn stroke_attrs(stroke: Option<&Stroke>) -> String {
    let Some(s) = stroke else {
        return String::new();
    };
    let mut out = format!(r#" stroke="{}" stroke-width="{}""#, s.color.hex(), num(s.width));
    if !s.color.is_opaque() {
        out.push_str(&format!(r#" stroke-opacity="{}""#, num(s.color.opacity)));
    }
    if let Some(dash) = s.pattern.dasharray() {
        out.push_str(&format!(r#" stroke-dasharray="{dash}""#));
    }
    out
}

fn paint_attrs(paint: &Paint) -> String {
    fill_attrs(paint.fill) + &stroke_attrs(paint.outline.as_ref())
}

fn font_attrs(font: &Font, align: Align) -> String {
    let mut out = format!(
        r#" font-family="sans-serif" font-size="{}" text-anchor="{}""#,
        num(font.size),
        align.text_anchor()
    );
    if let Some(base) = align.dominant_baseline() {
        out.push_str(&format!(r#" dominant-baseline="{base}""#));
    }
    if font.bold {
        out.push_str(r#" font-weight="bold""#);
    }
    if font.italic {
        out.push_str(r#" font-style="italic""#);
    }
    out + &fill_attrs(Some(font.color))
}

/// Splits a point list into runs of finite points.
fn finite_runs(points: &[(f64, f64)]) -> Vec<&[(f64, f64)]> {
    points
        .split(|(x, y)| !(x.is_finite() && y.is_finite()))
        .filter(|run| !run.is_empty())
        .collect()
}

fn points_attr(points: &[(f64, f64)]) -> String {
    points.iter().map(|&(x, y)| format!("{},{}", num(x), num(y))).collect::<Vec<_>>().join(" ")
}

pub struct Canvas {
    width: f64,
    height: f64,
    body: String,
    defs: String,
    clips: usize,
    open_groups: usize,
}

impl Canvas {
    pub fn new(width: f64, height: f64) -> Self {
        Self { width, height, body: String::new(), defs: String::new(), clips: 0, open_groups: 0 }
    }

    pub fn width(&self) -> f64 {
        self.width
    }

    pub fn height(&self) -> f64 {
        self.height
    }

    fn emit(&mut self, args: fmt::Arguments<'_>) {
        // Writing into a String cannot fail.
        let _ = self.body.write_fmt(args);
        self.body.push('\n');
    }

    pub fn rect(&mut self, x: f64, y: f64, w: f64, h: f64, paint: &Paint) {
        self.emit(format_args!(
            r#"<rect x="{}" y="{}" width="{}" height="{}"{}/>"#,
            num(x),
            num(y),
            num(w.max(0.0)),
            num(h.max(0.0)),
            paint_attrs(paint)
        ));
    }

    pub fn line(&mut self, (x1, y1): (f64, f64), (x2, y2): (f64, f64), stroke: &Stroke) {
        if ![x1, y1, x2, y2].iter().all(|v| v.is_finite()) {
            return;
        }
        self.emit(format_args!(
            r#"<line x1="{}" y1="{}" x2="{}" y2="{}"{}/>"#,
            num(x1),
            num(y1),
            num(x2),
            num(y2),
            stroke_attrs(Some(stroke))
        ));
    }

    /// Open line through the points. A non-finite point breaks the line;
    /// runs of fewer than two points are dropped.
    pub fn polyline(&mut self, points: &[(f64, f64)], stroke: &Stroke) {
        for run in finite_runs(points) {
            if run.len() < 2 {
                continue;
            }
            self.emit(format_args!(
                r#"<polyline points="{}" fill="none"{}/>"#,
                points_attr(run),
                stroke_attrs(Some(stroke))
            ));
        }
    }

    pub fn polygon(&mut self, points: &[(f64, f64)], paint: &Paint) {
        if points.len() < 3 {
            return;
        }
        self.emit(format_args!(r#"<polygon points="{}"{}/>"#, points_attr(points), paint_attrs(paint)));
    }

    /// Filled area between `lo` and `hi` along `x`, one `<path>` per finite run.
    pub fn band(&mut self, edges: &[(f64, f64, f64)], fill: Color) {
        let runs = edges.split(|&(x, lo, hi)| !(x.is_finite() && lo.is_finite() && hi.is_finite()));
        for run in runs.filter(|r| r.len() >= 2) {
            let mut d = String::new();
            for (i, &(x, _, hi)) in run.iter().enumerate() {
                d.push_str(if i == 0 { "M" } else { " L" });
                d.push_str(&format!("{},{}", num(x), num(hi)));
            }
            for &(x, lo, _) in run.iter().rev() {
                d.push_str(&format!(" L{},{}", num(x), num(lo)));
            }
            d.push_str(" Z");
            self.emit(format_args!(r#"<path d="{d}"{}/>"#, fill_attrs(Some(fill))));
        }
    }

    /// Vertical interval from `lo` to `hi` with caps `cap` wide.
    pub fn whisker(&mut self, x: f64, lo: f64, hi: f64, cap: f64, stroke: &Stroke) {
        let h = cap / 2.0;
        self.line((x, lo), (x, hi), stroke);
        self.line((x - h, lo), (x + h, lo), stroke);
        self.line((x - h, hi), (x + h, hi), stroke);
    }

    /// Marker of diameter `size` centered on `(x, y)`.
    pub fn glyph(&mut self, x: f64, y: f64, size: f64, glyph: Glyph, paint: &Paint) {
        if !(x.is_finite() && y.is_finite()) {
            return;
        }
        let r = size / 2.0;
        match glyph {
            Glyph::Circle => self.emit(format_args!(
                r#"<circle cx="{}" cy="{}" r="{}"{}/>"#,
                num(x),
                num(y),
                num(r),
                paint_attrs(paint)
            )),
            Glyph::Square => self.rect(x - r, y - r, size, size, paint),
            Glyph::Triangle => {
                let pts = [(x, y - r * 1.15), (x - r * 1.1, y + r * 0.75), (x + r * 1.1, y + r * 0.75)];
                self.polygon(&pts, paint);
            }
            Glyph::Diamond => {
                let d = r * 1.3;
                self.polygon(&[(x, y - d), (x + d, y), (x, y + d), (x - d, y)], paint);
            }
        }
    }

    pub fn text(&mut self, x: f64, y: f64, s: &str, font: &Font, align: Align) {
        if s.is_empty() {
            return;
        }
        self.emit(format_args!(
            r#"<text x="{}" y="{}"{}>{}</text>"#,
            num(x),
            num(y),
            font_attrs(font, align),
            escape(s)
        ));
    }

    /// Text running bottom-to-top, anchored at `(x, y)`.
    pub fn text_vertical(&mut self, x: f64, y: f64, s: &str, font: &Font, align: Align) {
        if s.is_empty() {
            return;
        }
        self.emit(format_args!(
            r#"<text transform="translate({},{}) rotate(-90)"{}>{}</text>"#,
            num(x),
            num(y),
            font_attrs(font, align),
            escape(s)
        ));
    }

    /// Clip everything drawn until the matching [`Canvas::end_clip`].
    pub fn begin_clip(&mut self, x: f64, y: f64, w: f64, h: f64) {
        let id = format!("clip{}", self.clips);
        self.clips += 1;
        let _ = writeln!(
            self.defs,
            r#"<clipPath id="{id}"><rect x="{}" y="{}" width="{}" height="{}"/></clipPath>"#,
            num(x),
            num(y),
            num(w),
            num(h)
        );
        self.emit(format_args!(r#"<g clip-path="url(#{id})">"#));
        self.open_groups += 1;
    }

    pub fn end_clip(&mut self) {
        if self.open_groups > 0 {
            self.open_groups -= 1;
            self.emit(format_args!("</g>"));
        }
    }

    /// The finished document; unclosed clip groups are closed.
    pub fn finish(mut self) -> String {
        while self.open_groups > 0 {
            self.end_clip();
        }
        let mut out = format!(
            r#"<svg xmlns="http://www.w3.org/2000/svg" width="{w}pt" height="{h}pt" viewBox="0 0 {w} {h}">"#,
            w = num(self.width),
            h = num(self.height)
        );
        out.push('\n');
        if !self.defs.is_empty() {
            out.push_str("<defs>\n");
            out.push_str(&self.defs);
            out.push_str("</defs>\n");
        }
        out.push_str(&format!(
            r#"<rect width="{}" height="{}" fill="{}"/>"#,
            num(self.width),
            num(self.height),
            Color::WHITE.hex()
        ));
        out.push('\n');
        out.push_str(&self.body);
        out.push_str("</svg>\n");
        out
    }
}
