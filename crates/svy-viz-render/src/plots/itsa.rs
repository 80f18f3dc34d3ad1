use svy_viz::itsa::{ItsaPlotArtifact, LinePoint};

use crate::canvas::Canvas;
use crate::color::Color;
use crate::config::VizConfig;
use crate::header::Header;
use crate::layout::axes::Axis;
use crate::layout::legend::{self, LegendItem, Swatch};
use crate::layout::panel::Panel;
use crate::plots::frame;
use crate::style::{Align, Font, Glyph, HAlign, Paint, Stroke, VAlign};

/// Interrupted time-series figure.
///
/// Layers, back to front: grid, frame, intervention line, CI bands, dashed
/// counterfactuals, fitted segments, observed means with error bars, the
/// DiD note and the legend.
pub fn render(artifact: &ItsaPlotArtifact, config: &VizConfig) -> crate::Result<String> {
    let Some((x_lo, x_hi, y_lo, y_hi)) = artifact.data_bounds() else {
        return Ok(placeholder(config));
    };
    let layers = &config.layers;

    let header = Header::new(&artifact.title, config);
    let x_axis =
        Axis::years(x_lo.floor() as i32, x_hi.ceil() as i32).titled(&artifact.x_label);
    let y_axis = Axis::values(y_lo, y_hi, 5).titled(&artifact.y_label);
    let panel = Panel::layout(config, header.height(), &x_axis, &y_axis);

    let mut canvas = Canvas::new(config.figure.width, config.figure.height);
    header.draw(&mut canvas, panel.x, 8.0);
    frame::draw_grid(&mut canvas, &panel, &x_axis, &y_axis, config);
    frame::draw_frame(&mut canvas, &panel, config);

    let px = |year: f64| x_axis.scale.map(year, panel.x, panel.right());
    let py = |v: f64| y_axis.scale.map(v, panel.bottom(), panel.y);
    let fitted = |pts: &[LinePoint]| pts.iter().map(|p| (px(p.year), py(p.fit))).collect::<Vec<_>>();

    canvas.begin_clip(panel.x, panel.y, panel.w, panel.h);
    let cut = px(artifact.cutoff_year);
    canvas.line(
        (cut, panel.y),
        (cut, panel.bottom()),
        &Stroke::new(config.colors.intervention, 1.0).dotted(),
    );

    for (i, group) in artifact.groups.iter().enumerate() {
        let color = config.group_color(i);
        let line = Stroke::new(color, layers.line_width);

        if layers.bands {
            for segment in [&group.pre, &group.post] {
                let edges: Vec<(f64, f64, f64)> =
                    segment.iter().map(|p| (px(p.year), py(p.ci_lower), py(p.ci_upper))).collect();
                canvas.band(&edges, color.fade(layers.band_opacity));
            }
        }
        if layers.counterfactual {
            let dashed = Stroke::new(color, layers.line_width * 0.8).dashed();
            canvas.polyline(&fitted(&group.counterfactual), &dashed);
        }
        canvas.polyline(&fitted(&group.pre), &line);
        canvas.polyline(&fitted(&group.post), &line);

        if layers.means {
            let whisker = Stroke::new(color, 0.8);
            let marker = Paint::fill(color).with_outline(Stroke::new(Color::WHITE, 0.5));
            for m in group.means.iter().filter(|m| m.mean.is_finite()) {
                let x = px(m.year);
                if layers.error_bars {
                    canvas.whisker(x, py(m.ci_lower), py(m.ci_upper), 4.0, &whisker);
                }
                canvas.glyph(x, py(m.mean), layers.marker_size, Glyph::for_group(i), &marker);
            }
        }
    }
    canvas.end_clip();

    frame::draw_ticks(&mut canvas, &panel, &x_axis, &y_axis, config);
    frame::draw_titles(&mut canvas, &panel, &x_axis, &y_axis, config);

    let small = Font::new(config.fonts.tick, config.colors.intervention);
    canvas.text(
        cut + 3.0,
        panel.y + 3.0,
        &artifact.intervention_label,
        &small,
        Align(HAlign::Left, VAlign::Top),
    );
    if layers.annotation {
        if let Some(note) = &artifact.annotation {
            let font = Font { color: config.colors.note, ..small }.italic();
            canvas.text(panel.right() - 4.0, panel.bottom() - 5.0, note, &font, Align::RIGHT);
        }
    }

    legend::draw(
        &mut canvas,
        &panel,
        &legend_items(artifact, config),
        config.legend,
        &config.base_font(),
    );
    Ok(canvas.finish())
}

fn legend_items(artifact: &ItsaPlotArtifact, config: &VizConfig) -> Vec<LegendItem> {
    let layers = &config.layers;
    let mut items: Vec<LegendItem> = artifact
        .groups
        .iter()
        .enumerate()
        .map(|(i, g)| {
            let stroke = Stroke::new(config.group_color(i), 1.5);
            let swatch =
                if layers.means { Swatch::Series(stroke, Glyph::for_group(i)) } else { Swatch::Line(stroke) };
            LegendItem::new(g.label.as_str(), swatch)
        })
        .collect();
    let neutral = config.colors.intervention;
    if layers.counterfactual {
        items.push(LegendItem::new("Counterfactual", Swatch::Line(Stroke::new(neutral, 1.2).dashed())));
    }
    if layers.bands {
        let label = format!("{:.0}% CI", artifact.meta.level * 100.0);
        items.push(LegendItem::new(label, Swatch::Band(neutral.fade(layers.band_opacity * 1.5))));
    }
    items
}

/// Blank figure with a centered note, for artifacts without points.
fn placeholder(config: &VizConfig) -> String {
    let (w, h) = (config.figure.width, config.figure.height);
    let mut canvas = Canvas::new(w, h);
    canvas.text(
        w / 2.0,
        h / 2.0,
        "No ITSA data",
        &config.axis_font(),
        Align(HAlign::Center, VAlign::Middle),
    );
    canvas.finish()
}
