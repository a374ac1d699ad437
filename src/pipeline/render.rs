//! PDF rasterisation: render every page to a PNG file via pdfium.
//!
//! ## Why spawn_blocking?
//!
//! The `pdfium-render` crate wraps the pdfium C++ library, which uses
//! thread-local state internally and is not safe to call from async contexts.
//! `tokio::task::spawn_blocking` moves the work onto the blocking pool so the
//! Tokio worker threads keep serving other documents while a page renders.
//!
//! ## Why DPI, not a pixel cap?
//!
//! Tariff sheets are A4/letter pages of dense small-print tables. A fixed DPI
//! keeps glyph size constant across documents, which matters more to the OCR
//! model than bounding the image edge.

use crate::error::TarifarioError;
use pdfium_render::prelude::*;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

/// File name of the `n`-th page image (1-based): `pagina_001.png`.
pub fn page_file_name(page: usize) -> String {
    format!("pagina_{page:03}.png")
}

/// Render every page of `pdf_path` into `out_dir` at `dpi`.
///
/// Returns the written PNG paths in page order.
pub async fn render_to_pngs(
    pdf_path: &Path,
    out_dir: &Path,
    dpi: u32,
) -> Result<Vec<PathBuf>, TarifarioError> {
    let path = pdf_path.to_path_buf();
    let out = out_dir.to_path_buf();

    tokio::task::spawn_blocking(move || render_blocking(&path, &out, dpi))
        .await
        .map_err(|e| TarifarioError::Internal(format!("Render task panicked: {}", e)))?
}

/// Bind to pdfium: `PDFIUM_LIB_PATH` first, then the system library.
fn bind_pdfium() -> Result<Pdfium, TarifarioError> {
    let bindings = match std::env::var("PDFIUM_LIB_PATH") {
        Ok(dir) if !dir.is_empty() => Pdfium::bind_to_library(
            Pdfium::pdfium_platform_library_name_at_path(&dir),
        )
        .or_else(|_| Pdfium::bind_to_system_library()),
        _ => Pdfium::bind_to_system_library(),
    }
    .map_err(|e| TarifarioError::PdfiumBindingFailed(format!("{:?}", e)))?;
    Ok(Pdfium::new(bindings))
}

fn render_blocking(
    pdf_path: &Path,
    out_dir: &Path,
    dpi: u32,
) -> Result<Vec<PathBuf>, TarifarioError> {
    let pdfium = bind_pdfium()?;

    let document = pdfium
        .load_pdf_from_file(pdf_path, None)
        .map_err(|e| TarifarioError::CorruptPdf {
            path: pdf_path.to_path_buf(),
            detail: format!("{:?}", e),
        })?;

    let pages = document.pages();
    let total_pages = pages.len() as usize;
    info!("{}: {} pages", pdf_path.display(), total_pages);

    std::fs::create_dir_all(out_dir).map_err(|e| TarifarioError::write(out_dir, e))?;

    // PDF user space is 72 units per inch.
    let render_config = PdfRenderConfig::new().scale_page_by_factor(dpi as f32 / 72.0);

    let mut written = Vec::with_capacity(total_pages);
    for idx in 0..total_pages {
        let page_err = |detail: String| TarifarioError::RasterisationFailed {
            path: pdf_path.to_path_buf(),
            page: idx + 1,
            detail,
        };

        let page = pages
            .get(idx as u16)
            .map_err(|e| page_err(format!("{:?}", e)))?;
        let bitmap = page
            .render_with_config(&render_config)
            .map_err(|e| page_err(format!("{:?}", e)))?;

        let image = bitmap.as_image();
        let target = out_dir.join(page_file_name(idx + 1));
        image
            .save_with_format(&target, image::ImageFormat::Png)
            .map_err(|e| page_err(e.to_string()))?;

        debug!(
            "Rendered page {} → {}x{} px",
            idx + 1,
            image.width(),
            image.height()
        );
        written.push(target);
    }

    Ok(written)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn page_names_are_zero_padded() {
        assert_eq!(page_file_name(1), "pagina_001.png");
        assert_eq!(page_file_name(42), "pagina_042.png");
        assert_eq!(page_file_name(1000), "pagina_1000.png");
    }
}
