use crate::config::VizConfig;
use crate::layout::axes::Axis;
use crate::text::{line_height, text_width};

/// Plotting rectangle inside the figure.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Panel {
    pub x: f64,
    pub y: f64,
    pub w: f64,
    pub h: f64,
}

impl Panel {
    pub fn right(&self) -> f64 {
        self.x + self.w
    }

    pub fn bottom(&self) -> f64 {
        self.y + self.h
    }

    /// Panel left over after the header, tick labels and axis titles;
    /// at least 40pt on each side.
    pub fn layout(config: &VizConfig, header_h: f64, x_axis: &Axis, y_axis: &Axis) -> Self {
        const PAD: f64 = 10.0;
        let tick_out = if config.ticks.inward { 0.0 } else { config.ticks.length };
        let tick_font = config.tick_font();
        let axis_font = config.axis_font();

        let widest =
            y_axis.major().map(|(_, l)| text_width(l, &tick_font)).fold(0.0_f64, f64::max);
        let y_title = if y_axis.title.is_empty() { 0.0 } else { line_height(&axis_font) + 4.0 };
        let x_title = if x_axis.title.is_empty() { 0.0 } else { line_height(&axis_font) + 2.0 };

        let left = PAD + y_title + widest + tick_out + 4.0;
        let top = PAD + header_h;
        let bottom = PAD + x_title + line_height(&tick_font) + tick_out + 4.0;
        let right = PAD + 6.0;

        let (fw, fh) = (config.figure.width, config.figure.height);
        Self { x: left, y: top, w: (fw - left - right).max(40.0), h: (fh - top - bottom).max(40.0) }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn panel_fits_inside_figure() {
        let cfg = VizConfig::default();
        let p = Panel::layout(
            &cfg,
            30.0,
            &Axis::years(2016, 2021).titled("Year"),
            &Axis::values(0.0, 9000.0, 5).titled("Mean"),
        );
        assert!(p.x > 10.0 && p.y >= 40.0);
        assert!(p.right() < cfg.figure.width);
        assert!(p.bottom() < cfg.figure.height);
    }

    #[test]
    fn titles_take_room() {
        let cfg = VizConfig::default();
        let bare = Panel::layout(&cfg, 0.0, &Axis::years(2016, 2021), &Axis::values(0.0, 1.0, 4));
        let titled = Panel::layout(
            &cfg,
            0.0,
            &Axis::years(2016, 2021).titled("Year"),
            &Axis::values(0.0, 1.0, 4).titled("Share"),
        );
        assert!(titled.x > bare.x);
        assert!(titled.h < bare.h);
    }
}
