use crate::canvas::Canvas;
use crate::config::VizConfig;
use crate::style::{Align, Font};
use crate::text::line_height;

/// Title block above the panel.
#[derive(Debug, Clone)]
pub struct Header {
    lines: Vec<(String, Font)>,
}

impl Header {
    /// The configured title replaces `title` when set; nothing is shown
    /// when the header is switched off.
    pub fn new(title: &str, config: &VizConfig) -> Self {
        let mut lines = Vec::new();
        if config.header.show {
            let title = config.header.title.as_deref().unwrap_or(title);
            if !title.is_empty() {
                lines.push((title.to_string(), config.title_font()));
            }
            if let Some(sub) = config.header.subtitle.as_deref().filter(|s| !s.is_empty()) {
                lines.push((sub.to_string(), config.base_font().italic()));
            }
        }
        Self { lines }
    }

    pub fn height(&self) -> f64 {
        self.lines.iter().map(|(_, f)| line_height(f)).sum::<f64>()
            + if self.lines.is_empty() { 0.0 } else { 6.0 }
    }

    pub fn draw(&self, canvas: &mut Canvas, x: f64, top: f64) {
        let mut y = top;
        for (text, font) in &self.lines {
            y += line_height(font);
            canvas.text(x, y - font.size * 0.25, text, font, Align::LEFT);
        }
    }
}
