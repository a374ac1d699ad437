//! Stage 3: render every downloaded PDF to page PNGs.
//!
//! `raw/<bank>/<doc>.pdf` → `images/<bank>/<doc>/pagina_NNN.png`.
//!
//! Documents whose pages already exist (still awaiting OCR under `images/`,
//! or already OCR'd under `images_processed/`) are skipped unless
//! [`PipelineConfig::overwrite`] is set, so re-running the stage after new
//! downloads only renders the new PDFs. A forced re-render discards the
//! document's OCR output and progress entry, so stage 4 reads the new pages.

use crate::config::{DataLayout, PipelineConfig};
use crate::download::list_raw_pdfs;
use crate::error::TarifarioError;
use crate::ocr::discard_for_rerender;
use crate::pipeline::render::render_to_pngs;
use crate::report::RunReport;
use futures::stream::{self, StreamExt};
use serde::Serialize;
use std::path::Path;
use std::time::Instant;
use tracing::{info, warn};

/// Outcome for one PDF.
#[derive(Debug, Clone, Serialize)]
pub struct RasterResult {
    pub pdf: String,
    #[serde(rename = "banco")]
    pub bank: String,
    #[serde(rename = "paginas")]
    pub pages: usize,
    #[serde(rename = "exito")]
    pub success: bool,
    #[serde(rename = "omitido")]
    pub skipped: bool,
    pub error: Option<String>,
    #[serde(rename = "tiempo")]
    pub seconds: f64,
}

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct RasterSummary {
    pub total_pdfs: usize,
    pub exitosos: usize,
    pub fallidos: usize,
    pub omitidos: usize,
    pub total_paginas: usize,
    pub dpi: u32,
}

pub fn count_pngs(dir: &Path) -> usize {
    std::fs::read_dir(dir)
        .map(|rd| {
            rd.flatten()
                .filter(|e| {
                    e.path()
                        .extension()
                        .is_some_and(|x| x.eq_ignore_ascii_case("png"))
                })
                .count()
        })
        .unwrap_or(0)
}

fn doc_name(pdf: &Path) -> String {
    pdf.file_stem()
        .map(|s| s.to_string_lossy().to_string())
        .unwrap_or_default()
}

/// Pages already rendered for `bank/doc`, in either image area.
fn existing_pages(layout: &DataLayout, bank: &str, doc: &str) -> usize {
    let pending = count_pngs(&layout.images_dir().join(bank).join(doc));
    if pending > 0 {
        return pending;
    }
    count_pngs(&layout.images_processed_dir().join(bank).join(doc))
}

/// Render all PDFs under `raw/` and write `reporte_conversion_png.json`.
pub async fn rasterize_all(config: &PipelineConfig) -> Result<RasterSummary, TarifarioError> {
    let layout = config.layout();
    let raw_dir = layout.raw_dir();
    if !raw_dir.is_dir() {
        return Err(TarifarioError::InputDirMissing {
            path: raw_dir,
            previous: "download".into(),
        });
    }

    let pdfs = list_raw_pdfs(&raw_dir)?;
    info!("Rasterizing {} PDFs at {} DPI", pdfs.len(), config.dpi);
    if config.overwrite {
        let rerender: Vec<String> = pdfs
            .iter()
            .map(|(bank, pdf)| (bank, doc_name(pdf)))
            .filter(|(bank, doc)| existing_pages(&layout, bank, doc) > 0)
            .map(|(bank, doc)| format!("{bank}/{doc}"))
            .collect();
        if !rerender.is_empty() {
            info!("Re-rendering {} documents; their OCR output is discarded", rerender.len());
            discard_for_rerender(&layout, &rerender)?;
        }
    }
    let cb = config.progress_callback.clone();
    if let Some(ref cb) = cb {
        cb.on_stage_start("rasterize", pdfs.len());
    }

    let results: Vec<RasterResult> = stream::iter(pdfs.into_iter().map(|(bank, pdf)| {
        let layout = layout.clone();
        let cb = cb.clone();
        let dpi = config.dpi;
        let overwrite = config.overwrite;
        async move {
            let start = Instant::now();
            let doc = doc_name(&pdf);
            let key = format!("{bank}/{doc}");
            let mut result = RasterResult {
                pdf: pdf
                    .file_name()
                    .map(|s| s.to_string_lossy().to_string())
                    .unwrap_or_default(),
                bank: bank.clone(),
                pages: 0,
                success: false,
                skipped: false,
                error: None,
                seconds: 0.0,
            };

            let already = existing_pages(&layout, &bank, &doc);
            if already > 0 && !overwrite {
                result.pages = already;
                result.success = true;
                result.skipped = true;
                if let Some(ref cb) = cb {
                    cb.on_item_complete(&key, "already rendered");
                }
                return result;
            }

            if let Some(ref cb) = cb {
                cb.on_item_start(&key);
            }
            let out_dir = layout.images_dir().join(&bank).join(&doc);
            match render_to_pngs(&pdf, &out_dir, dpi).await {
                Ok(pages) => {
                    result.pages = pages.len();
                    result.success = true;
                    info!("{}: {} pages", key, pages.len());
                    if let Some(ref cb) = cb {
                        cb.on_item_complete(&key, &format!("{} pages", pages.len()));
                    }
                }
                Err(e) => {
                    warn!("{}: {}", key, e);
                    if let Some(ref cb) = cb {
                        cb.on_item_error(&key, &e.to_string());
                    }
                    result.error = Some(e.to_string());
                }
            }
            result.seconds = start.elapsed().as_secs_f64();
            result
        }
    }))
    .buffer_unordered(config.render_workers.max(1))
    .collect()
    .await;

    let summary = summarize(&results, config.dpi);
    if let Some(ref cb) = cb {
        cb.on_stage_complete("rasterize", summary.total_pdfs, summary.exitosos);
    }
    RunReport::new("conversion_png", summary.clone(), results)
        .save(&layout.reports_dir(), "reporte_conversion_png.json")?;
    Ok(summary)
}

fn summarize(results: &[RasterResult], dpi: u32) -> RasterSummary {
    let ok: Vec<_> = results.iter().filter(|r| r.success).collect();
    RasterSummary {
        total_pdfs: results.len(),
        exitosos: ok.len(),
        fallidos: results.len() - ok.len(),
        omitidos: results.iter().filter(|r| r.skipped).count(),
        total_paginas: ok.iter().map(|r| r.pages).sum(),
        dpi,
    }
}
