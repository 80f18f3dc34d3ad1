//! Panel furniture shared by plot kinds: grid, frame, ticks, axis titles.

use crate::canvas::Canvas;
use crate::config::VizConfig;
use crate::layout::axes::Axis;
use crate::layout::panel::Panel;
use crate::style::{Align, HAlign, Paint, Stroke, VAlign};
use crate::text::{line_height, text_width};

pub fn draw_grid(canvas: &mut Canvas, panel: &Panel, x: &Axis, y: &Axis, config: &VizConfig) {
    if !config.grid.show {
        return;
    }
    let stroke = Stroke::new(config.grid.color, 0.6);
    for (v, _) in y.major() {
        let py = y.scale.map(v, panel.bottom(), panel.y);
        canvas.line((panel.x, py), (panel.right(), py), &stroke);
    }
    for (v, _) in x.major() {
        let px = x.scale.map(v, panel.x, panel.right());
        canvas.line((px, panel.y), (px, panel.bottom()), &stroke);
    }
}

pub fn draw_frame(canvas: &mut Canvas, panel: &Panel, config: &VizConfig) {
    let outline = Stroke::new(config.colors.ink, 0.8);
    canvas.rect(panel.x, panel.y, panel.w, panel.h, &Paint::outline(outline));
}

/// Ticks and tick labels on the bottom and left edges, mirrored onto the top
/// and right when configured. Minor ticks are half length.
pub fn draw_ticks(canvas: &mut Canvas, panel: &Panel, x: &Axis, y: &Axis, config: &VizConfig) {
    let stroke = Stroke::new(config.colors.ink, 0.8);
    let font = config.tick_font();
    let len = config.ticks.length;
    // Sign that points a tick away from the panel edge it sits on.
    let dir = if config.ticks.inward { -1.0 } else { 1.0 };
    let gap = if config.ticks.inward { 3.0 } else { len + 3.0 };

    for tick in &x.ticks {
        if !x.scale.contains(tick.value) {
            continue;
        }
        let px = x.scale.map(tick.value, panel.x, panel.right());
        let l = if tick.label.is_some() { len } else { len / 2.0 };
        canvas.line((px, panel.bottom()), (px, panel.bottom() + dir * l), &stroke);
        if config.ticks.mirror {
            canvas.line((px, panel.y), (px, panel.y - dir * l), &stroke);
        }
        if let Some(label) = &tick.label {
            let align = Align(HAlign::Center, VAlign::Top);
            canvas.text(px, panel.bottom() + gap, label, &font, align);
        }
    }
    for tick in &y.ticks {
        if !y.scale.contains(tick.value) {
            continue;
        }
        let py = y.scale.map(tick.value, panel.bottom(), panel.y);
        let l = if tick.label.is_some() { len } else { len / 2.0 };
        canvas.line((panel.x, py), (panel.x - dir * l, py), &stroke);
        if config.ticks.mirror {
            canvas.line((panel.right(), py), (panel.right() + dir * l, py), &stroke);
        }
        if let Some(label) = &tick.label {
            let align = Align(HAlign::Right, VAlign::Middle);
            canvas.text(panel.x - gap, py, label, &font, align);
        }
    }
}

pub fn draw_titles(canvas: &mut Canvas, panel: &Panel, x: &Axis, y: &Axis, config: &VizConfig) {
    let font = config.axis_font();
    let tick_font = config.tick_font();
    let out = if config.ticks.inward { 3.0 } else { config.ticks.length + 3.0 };

    let below = panel.bottom() + out + line_height(&tick_font) + 2.0;
    canvas.text(
        panel.x + panel.w / 2.0,
        below,
        &x.title,
        &font,
        Align(HAlign::Center, VAlign::Top),
    );

    let widest = y.major().map(|(_, l)| text_width(l, &tick_font)).fold(0.0_f64, f64::max);
    let left = panel.x - out - widest - 6.0;
    canvas.text_vertical(left, panel.y + panel.h / 2.0, &y.title, &font, Align::CENTER);
}
