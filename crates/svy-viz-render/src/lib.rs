//! # svy-viz-render
//!
//! Draws svyts plot artifacts (see `svy-viz`) as SVG, or as PNG with the
//! `png` feature. Styling is a [`config::VizConfig`]: a built-in
//! [`theme::Theme`] with optional YAML overrides.

pub mod canvas;
pub mod color;
pub mod config;
pub mod header;
pub mod layout;
pub mod output;
pub mod plots;
pub mod style;
pub mod text;
pub mod theme;

use std::path::Path;
use std::str::FromStr;

use config::VizConfig;
pub use output::Format;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum RenderError {
    #[error("unknown artifact kind: {0}")]
    UnknownKind(String),
    #[error("unsupported output format: {0}")]
    UnknownFormat(String),
    #[error("PNG output needs svy-viz-render built with the `png` feature")]
    PngDisabled,
    #[error("invalid artifact JSON: {0}")]
    Deserialize(#[from] serde_json::Error),
    #[error("plot config: {0}")]
    Config(String),
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[cfg(feature = "png")]
    #[error("PNG rendering failed: {0}")]
    Png(String),
}

pub type Result<T> = std::result::Result<T, RenderError>;

/// Artifact kinds this crate can draw.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlotKind {
    Itsa,
}

impl FromStr for PlotKind {
    type Err = RenderError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "itsa" => Ok(PlotKind::Itsa),
            other => Err(RenderError::UnknownKind(other.to_string())),
        }
    }
}

pub fn render_svg(artifact_json: &str, kind: PlotKind, config: &VizConfig) -> Result<String> {
    match kind {
        PlotKind::Itsa => {
            let artifact: svy_viz::ItsaPlotArtifact = serde_json::from_str(artifact_json)?;
            plots::itsa::render(&artifact, config)
        }
    }
}

pub fn render_to_bytes(
    artifact_json: &str,
    kind: PlotKind,
    format: Format,
    config: &VizConfig,
) -> Result<Vec<u8>> {
    let svg = render_svg(artifact_json, kind, config)?;
    match format {
        Format::Svg => Ok(svg.into_bytes()),
        #[cfg(feature = "png")]
        Format::Png => output::png::rasterize(&svg, config.output.dpi),
        #[cfg(not(feature = "png"))]
        Format::Png => Err(RenderError::PngDisabled),
    }
}

/// Write the plot to `path`. The extension picks the format; without one,
/// `config.output.format` is used.
pub fn render_to_file(
    artifact_json: &str,
    kind: PlotKind,
    path: &Path,
    config: &VizConfig,
) -> Result<()> {
    let format = match path.extension().and_then(|e| e.to_str()) {
        Some(ext) => ext.parse()?,
        None => config.output.format,
    };
    let bytes = render_to_bytes(artifact_json, kind, format, config)?;
    std::fs::write(path, &bytes)?;
    tracing::debug!(path = %path.display(), %format, bytes = bytes.len(), "plot written");
    Ok(())
}
