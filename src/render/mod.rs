//! Renderer (C3): PDF -> one PNG per page at a fixed DPI, capped long edge.
//! A single-image upload short-circuits to a one-page document.
//!
//! pdfium operations are CPU-bound and use thread-local state, so all
//! rendering happens inside `spawn_blocking`.

use image::{DynamicImage, ImageFormat};
use pdfium_render::prelude::*;

use crate::errors::{AppError, AppResult};

/// Page-rendering parameters, taken from `Settings` (`RENDER_DPI`,
/// `RENDER_LONG_EDGE_PX`).
#[derive(Debug, Clone, Copy)]
pub struct RenderOptions {
    pub dpi: f32,
    pub long_edge_px: u32,
}

/// `render(pdf_bytes) -> [png_bytes]`. Output order is the source page
/// order. Fails with a validation error on malformed input.
pub async fn render_pdf(pdf_bytes: Vec<u8>, options: RenderOptions) -> AppResult<Vec<Vec<u8>>> {
    tokio::task::spawn_blocking(move || render_pdf_blocking(&pdf_bytes, options))
        .await
        .map_err(|e| AppError::internal(format!("render task panicked: {e}")))?
}

fn render_pdf_blocking(pdf_bytes: &[u8], options: RenderOptions) -> AppResult<Vec<Vec<u8>>> {
    let pdfium = Pdfium::default();
    let document = pdfium
        .load_pdf_from_byte_slice(pdf_bytes, None)
        .map_err(|e| AppError::validation(format!("malformed pdf: {e:?}")))?;

    let pages = document.pages();
    let mut out = Vec::with_capacity(pages.len() as usize);

    for page in pages.iter() {
        let (width_px, height_px) = scaled_dimensions(page.width().value, page.height().value, options);
        let render_config = PdfRenderConfig::new()
            .set_target_width(width_px)
            .set_target_height(height_px);
        let bitmap = page
            .render_with_config(&render_config)
            .map_err(|e| AppError::validation(format!("page rasterisation failed: {e:?}")))?;
        let image = bitmap.as_image();
        out.push(encode_png(&image)?);
    }

    if out.is_empty() {
        return Err(AppError::validation("pdf contains no pages"));
    }

    Ok(out)
}

/// Renders a single-image upload as a one-page document (§4.3): the image
/// is decoded to validate it, then re-encoded as PNG for uniform storage.
pub fn render_image(image_bytes: Vec<u8>) -> AppResult<Vec<Vec<u8>>> {
    let image = image::load_from_memory(&image_bytes)
        .map_err(|e| AppError::validation(format!("malformed image: {e}")))?;
    Ok(vec![encode_png(&image)?])
}

/// Converts a page size in points to pixels at `options.dpi`, then scales
/// down (preserving aspect) if the long edge exceeds `options.long_edge_px`.
fn scaled_dimensions(width_pt: f32, height_pt: f32, options: RenderOptions) -> (i32, i32) {
    let scale = options.dpi / 72.0;
    let mut width = width_pt * scale;
    let mut height = height_pt * scale;

    let long_edge = width.max(height);
    if long_edge > options.long_edge_px as f32 {
        let factor = options.long_edge_px as f32 / long_edge;
        width *= factor;
        height *= factor;
    }

    (width.round().max(1.0) as i32, height.round().max(1.0) as i32)
}

fn encode_png(image: &DynamicImage) -> AppResult<Vec<u8>> {
    let mut buf = std::io::Cursor::new(Vec::new());
    image
        .write_to(&mut buf, ImageFormat::Png)
        .map_err(|e| AppError::internal(format!("png encode failed: {e}")))?;
    Ok(buf.into_inner())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn render_image_rejects_garbage_bytes() {
        let result = render_image(vec![0u8, 1, 2, 3]);
        assert!(result.is_err());
    }

    #[test]
    fn scaled_dimensions_applies_dpi_below_the_cap() {
        let options = RenderOptions { dpi: 200.0, long_edge_px: 1540 };
        // a letter page, 612x792 points, at 200 dpi is 1700x2200 - over the cap.
        let (w, h) = scaled_dimensions(612.0, 792.0, options);
        assert_eq!(h, 1540);
        assert!(w < 1540);
    }

    #[test]
    fn scaled_dimensions_is_untouched_under_the_cap() {
        let options = RenderOptions { dpi: 72.0, long_edge_px: 1540 };
        let (w, h) = scaled_dimensions(612.0, 792.0, options);
        assert_eq!((w, h), (612, 792));
    }

    #[test]
    fn render_image_accepts_a_real_png() {
        let mut buf = std::io::Cursor::new(Vec::new());
        let img = DynamicImage::new_rgb8(4, 4);
        img.write_to(&mut buf, ImageFormat::Png).unwrap();
        let pages = render_image(buf.into_inner()).unwrap();
        assert_eq!(pages.len(), 1);
    }
}
