use crate::RenderError;

fn png_error(e: impl std::fmt::Display) -> RenderError {
    RenderError::Png(e.to_string())
}

/// Rasterise an SVG document at `dpi` (the SVG is laid out at 72 points per
/// inch). Text uses whatever fonts the system provides.
pub fn rasterize(svg: &str, dpi: u32) -> crate::Result<Vec<u8>> {
    let mut options = usvg::Options::default();
    options.fontdb_mut().load_system_fonts();
    let tree = usvg::Tree::from_str(svg, &options).map_err(png_error)?;

    let scale = dpi.max(1) as f32 / 72.0;
    let size = tree
        .size()
        .to_int_size()
        .scale_by(scale)
        .ok_or_else(|| png_error(format!("cannot scale the figure to {dpi} dpi")))?;
    let mut pixmap = tiny_skia::Pixmap::new(size.width(), size.height())
        .ok_or_else(|| png_error(format!("no {}x{} pixmap", size.width(), size.height())))?;
    pixmap.fill(tiny_skia::Color::WHITE);
    resvg::render(&tree, tiny_skia::Transform::from_scale(scale, scale), &mut pixmap.as_mut());
    pixmap.encode_png().map_err(png_error)
}
