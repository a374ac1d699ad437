//! Stage 4: resumable page OCR over `images/<bank>/<doc>/`.
//!
//! ## Why page checkpoints?
//!
//! A full run is thousands of vision calls against quota-limited free tiers.
//! Quotas run out, laptops sleep, Ctrl+C happens. Every page reply is written
//! to `ocr/.temp/` before the next page is requested (see [`document`]), and
//! every finished document is recorded in the progress file (see
//! [`checkpoint`]). A rerun therefore resumes at the first page that has no
//! good checkpoint, and skips finished documents without touching them.
//!
//! ## Flow
//!
//! ```text
//! discover_documents ──▶ buffer_unordered(ocr_workers) ──▶ ProgressStore
//!        │                     process_document                │
//!        │                                                     ├─ save every 10 docs
//!        └─ skip: processed / .md exists / images_processed    └─ save at the end
//! ```
//!
//! Interruption goes through [`ShutdownSignal`]: once it is raised no new
//! document is started, the in-flight ones finish, and the record is saved.

pub mod checkpoint;
pub mod document;

pub use checkpoint::{FailedPdf, ProgressRecord, ProgressStore};
pub use document::{process_document, DocumentResult, OcrDocument, OcrSettings};

use crate::config::{DataLayout, PipelineConfig};
use crate::error::TarifarioError;
use crate::pipeline::llm::{LlmClient, RetryPolicy};
use crate::prompts::OCR_PAGE_PROMPT;
use crate::rasterize::count_pngs;
use crate::report::RunReport;
use document::INCOMPLETE_MARKER;
use futures::future;
use futures::stream::{self, StreamExt};
use serde::Serialize;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, error, info, warn};

/// Documents between two progress-record saves.
const SAVE_EVERY: usize = 10;

/// Cooperative stop flag shared between the Ctrl+C handler and the run loop.
#[derive(Debug, Clone, Default)]
pub struct ShutdownSignal(Arc<AtomicBool>);

impl ShutdownSignal {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn request(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_requested(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

impl OcrSettings {
    pub fn from_config(config: &PipelineConfig) -> Self {
        Self {
            prompt: config
                .ocr_prompt
                .clone()
                .unwrap_or_else(|| OCR_PAGE_PROMPT.to_string()),
            temperature: config.ocr_temperature,
            max_tokens: config.ocr_max_tokens,
            retry: RetryPolicy::from_config(config),
            page_delay: Duration::from_millis(config.page_delay_ms),
        }
    }
}

/// Summary block of `reporte_ocr_paginas.json`.
#[derive(Debug, Clone, Default, Serialize, PartialEq)]
pub struct OcrSummary {
    #[serde(rename = "pdfs_procesados_sesion")]
    pub attempted: usize,
    #[serde(rename = "exitosos_sesion")]
    pub succeeded: usize,
    #[serde(rename = "fallidos_sesion")]
    pub failed: usize,
    #[serde(rename = "total_paginas")]
    pub pages: usize,
    #[serde(rename = "llamadas_modelo")]
    pub model_calls: usize,
    #[serde(rename = "total_procesados")]
    pub total_processed: usize,
    #[serde(rename = "total_fallidos")]
    pub total_failed: usize,
    #[serde(rename = "tiempo_sesion")]
    pub seconds: f64,
    #[serde(rename = "interrumpido")]
    pub interrupted: bool,
}

/// A markdown output that is complete, i.e. not carrying the warning header.
fn has_complete_output(doc: &OcrDocument, layout: &DataLayout) -> bool {
    let path = doc.output_path(layout);
    match std::fs::read_to_string(&path) {
        Ok(text) => !text.starts_with(INCOMPLETE_MARKER),
        Err(_) => false,
    }
}

/// Documents under `images/` that still need OCR, sorted by key.
pub fn discover_documents(
    layout: &DataLayout,
    store: &ProgressStore,
) -> Result<Vec<OcrDocument>, TarifarioError> {
    let images_dir = layout.images_dir();
    let mut docs = Vec::new();

    let banks = std::fs::read_dir(&images_dir).map_err(|e| TarifarioError::read(&images_dir, e))?;
    for bank in banks.flatten() {
        let bank_path = bank.path();
        let bank_name = bank.file_name().to_string_lossy().to_string();
        if !bank_path.is_dir() || bank_name.starts_with('.') {
            continue;
        }
        let entries =
            std::fs::read_dir(&bank_path).map_err(|e| TarifarioError::read(&bank_path, e))?;
        for entry in entries.flatten() {
            let doc_name = entry.file_name().to_string_lossy().to_string();
            if !entry.path().is_dir() || doc_name.starts_with('.') {
                continue;
            }
            if count_pngs(&entry.path()) == 0 {
                continue;
            }
            let doc = OcrDocument::new(&bank_name, doc_name);
            if store.is_processed(&doc.key())
                || has_complete_output(&doc, layout)
                || doc.processed_image_dir(layout).exists()
            {
                continue;
            }
            docs.push(doc);
        }
    }
    docs.sort();
    Ok(docs)
}

/// OCR every pending document and write `reporte_ocr_paginas.json`.
///
/// Fails only before work starts (no `images/`, unreadable progress record)
/// or when the record cannot be saved. Per-document failures are recorded
/// and the run continues.
pub async fn run_ocr<C: LlmClient>(
    config: &PipelineConfig,
    client: &C,
    shutdown: &ShutdownSignal,
) -> Result<OcrSummary, TarifarioError> {
    let layout = config.layout();
    let images_dir = layout.images_dir();
    if !images_dir.is_dir() {
        return Err(TarifarioError::InputDirMissing {
            path: images_dir,
            previous: "rasterize".into(),
        });
    }

    let store = ProgressStore::load(layout.ocr_progress_file())?;
    let docs = discover_documents(&layout, &store)?;
    let (done_before, failed_before) = store.counts();
    info!(
        "OCR: {} pending documents ({} already processed, {} failed previously)",
        docs.len(),
        done_before,
        failed_before
    );

    let settings = OcrSettings::from_config(config);
    let cb = config.progress_callback.as_ref();
    if let Some(cb) = cb {
        cb.on_stage_start("ocr", docs.len());
    }

    let start = Instant::now();
    let mut results: Vec<DocumentResult> = Vec::with_capacity(docs.len());
    let mut finished = stream::iter(docs)
        .take_while(|_| future::ready(!shutdown.is_requested()))
        .map(|doc| {
            let layout = &layout;
            let settings = &settings;
            async move {
                if let Some(cb) = cb {
                    cb.on_item_start(&doc.key());
                }
                let outcome = process_document(client, layout, &doc, settings, cb).await;
                (doc, outcome)
            }
        })
        .buffer_unordered(config.ocr_workers.max(1));

    while let Some((doc, outcome)) = finished.next().await {
        let key = doc.key();
        let result = outcome.unwrap_or_else(|e| {
            error!("{}: {}", key, e);
            DocumentResult {
                pdf: key.clone(),
                error: Some(e.to_string()),
                ..Default::default()
            }
        });

        if result.success {
            store.record_success(&key)?;
            if let Some(cb) = cb {
                cb.on_item_complete(&key, &format!("{} pages", result.pages_ok));
            }
        } else {
            store.record_failure(&key, result.error.clone())?;
            if let Some(cb) = cb {
                cb.on_item_error(&key, result.error.as_deref().unwrap_or("unknown error"));
            }
        }
        store.add_time(result.seconds)?;
        results.push(result);

        if results.len() % SAVE_EVERY == 0 {
            store.save()?;
        }
    }
    drop(finished);
    store.save()?;

    let interrupted = shutdown.is_requested();
    if interrupted {
        warn!("OCR interrupted: progress saved, rerun to continue");
    }

    let (total_processed, total_failed) = store.counts();
    let succeeded = results.iter().filter(|r| r.success).count();
    let summary = OcrSummary {
        attempted: results.len(),
        succeeded,
        failed: results.len() - succeeded,
        pages: results.iter().map(|r| r.pages_ok + r.pages_failed).sum(),
        model_calls: results.iter().map(|r| r.model_calls).sum(),
        total_processed,
        total_failed,
        seconds: start.elapsed().as_secs_f64(),
        interrupted,
    };
    if let Some(cb) = cb {
        cb.on_stage_complete("ocr", summary.attempted, summary.succeeded);
    }
    info!(
        "OCR session: {}/{} documents ok, {} model calls",
        summary.succeeded, summary.attempted, summary.model_calls
    );

    RunReport::new("ocr_paginas", summary.clone(), results)
        .save(&layout.reports_dir(), "reporte_ocr_paginas.json")?;
    Ok(summary)
}

/// Queue finished documents for another OCR pass.
///
/// For each `bank/doc` key: images go back from `images_processed/` to
/// `images/`, the `.md` and any page checkpoints are deleted, and the key is
/// dropped from the progress record. Returns the keys that were reset.
pub fn prepare_reprocess(
    layout: &DataLayout,
    keys: &[String],
) -> Result<Vec<String>, TarifarioError> {
    let store = ProgressStore::load(layout.ocr_progress_file())?;
    let mut reset = Vec::new();

    for key in keys {
        let doc = OcrDocument::from_key(key)?;
        let processed = doc.processed_image_dir(layout);
        let pending = doc.image_dir(layout);

        if processed.is_dir() {
            if pending.exists() {
                std::fs::remove_dir_all(&pending).map_err(|e| TarifarioError::write(&pending, e))?;
            }
            if let Some(parent) = pending.parent() {
                std::fs::create_dir_all(parent).map_err(|e| TarifarioError::write(parent, e))?;
            }
            std::fs::rename(&processed, &pending)
                .map_err(|e| TarifarioError::write(&pending, e))?;
        } else if !pending.is_dir() {
            warn!("{}: no page images found, rasterize it again first", key);
            continue;
        }

        forget_ocr_output(layout, &store, &doc)?;
        info!("{}: queued for reprocessing", key);
        reset.push(doc.key());
    }

    store.save()?;
    Ok(reset)
}

/// Clear OCR state ahead of a fresh render of each `bank/doc` key.
///
/// Both image areas, the `.md`, page checkpoints and the progress entry go,
/// so the new pages are picked up by the next OCR run.
pub fn discard_for_rerender(layout: &DataLayout, keys: &[String]) -> Result<(), TarifarioError> {
    if keys.is_empty() {
        return Ok(());
    }
    let store = ProgressStore::load(layout.ocr_progress_file())?;
    for key in keys {
        let doc = OcrDocument::from_key(key)?;
        for dir in [doc.image_dir(layout), doc.processed_image_dir(layout)] {
            if dir.exists() {
                std::fs::remove_dir_all(&dir).map_err(|e| TarifarioError::write(&dir, e))?;
            }
        }
        forget_ocr_output(layout, &store, &doc)?;
        debug!("{}: OCR state discarded for re-render", key);
    }
    store.save()
}

/// Remove the `.md`, the page checkpoints and the progress entry.
fn forget_ocr_output(
    layout: &DataLayout,
    store: &ProgressStore,
    doc: &OcrDocument,
) -> Result<(), TarifarioError> {
    let md = doc.output_path(layout);
    if md.exists() {
        std::fs::remove_file(&md).map_err(|e| TarifarioError::write(&md, e))?;
    }
    let temp = doc.temp_dir(layout);
    if temp.exists() {
        std::fs::remove_dir_all(&temp).map_err(|e| TarifarioError::write(&temp, e))?;
    }
    store.remove(&doc.key())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::LlmCallError;
    use crate::pipeline::llm::{LlmReply, LlmRequest};
    use base64::{engine::general_purpose::STANDARD, Engine as _};
    use std::sync::atomic::AtomicUsize;

    /// Answers every page with a table row, except pages whose image bytes
    /// equal `fail_on`.
    struct PageEcho {
        calls: AtomicUsize,
        fail_on: Option<&'static [u8]>,
    }

    impl PageEcho {
        fn new(fail_on: Option<&'static [u8]>) -> Self {
            Self {
                calls: AtomicUsize::new(0),
                fail_on,
            }
        }

        fn calls(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }
    }

    impl LlmClient for PageEcho {
        async fn complete(&self, request: LlmRequest) -> Result<LlmReply, LlmCallError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            let bytes = STANDARD.decode(&request.images[0].data).unwrap_or_default();
            if self.fail_on.is_some_and(|bad| bad == bytes.as_slice()) {
                return Err(LlmCallError::Fatal {
                    detail: "content filtered".into(),
                });
            }
            Ok(LlmReply {
                content: format!("| Concepto | {} |", String::from_utf8_lossy(&bytes)),
                ..Default::default()
            })
        }
    }

    fn config(root: &std::path::Path) -> PipelineConfig {
        PipelineConfig::builder()
            .data_dir(root)
            .page_delay_ms(0)
            .rate_limit_backoff_ms(1)
            .build()
            .unwrap()
    }

    fn seed_pages(layout: &DataLayout, key: &str, pages: &[&[u8]]) {
        let doc = OcrDocument::from_key(key).unwrap();
        let dir = doc.image_dir(layout);
        std::fs::create_dir_all(&dir).unwrap();
        for (i, bytes) in pages.iter().enumerate() {
            std::fs::write(dir.join(format!("pagina_{:03}.png", i + 1)), bytes).unwrap();
        }
    }

    #[tokio::test]
    async fn missing_images_dir_names_rasterize_stage() {
        let dir = tempfile::tempdir().unwrap();
        let err = run_ocr(&config(dir.path()), &PageEcho::new(None), &ShutdownSignal::new())
            .await
            .unwrap_err();
        assert!(err.to_string().contains("rasterize"));
    }

    #[tokio::test]
    async fn completed_document_moves_images_and_is_not_redone() {
        let dir = tempfile::tempdir().unwrap();
        let layout = DataLayout::new(dir.path());
        seed_pages(&layout, "BCP/tarjetas", &[b"uno", b"dos"]);
        let client = PageEcho::new(None);
        let cfg = config(dir.path());

        let summary = run_ocr(&cfg, &client, &ShutdownSignal::new()).await.unwrap();
        assert_eq!(summary.succeeded, 1);
        assert_eq!(client.calls(), 2);

        let doc = OcrDocument::new("BCP", "tarjetas");
        let md = std::fs::read_to_string(doc.output_path(&layout)).unwrap();
        assert_eq!(md, "| Concepto | uno |\n\n| Concepto | dos |\n");
        assert!(!doc.image_dir(&layout).exists());
        assert!(doc.processed_image_dir(&layout).join("pagina_002.png").exists());
        assert!(!doc.temp_dir(&layout).exists());

        let again = run_ocr(&cfg, &client, &ShutdownSignal::new()).await.unwrap();
        assert_eq!(again.attempted, 0);
        assert_eq!(client.calls(), 2);
        assert!(layout.reports_dir().join("reporte_ocr_paginas.json").exists());
    }

    #[tokio::test]
    async fn failed_page_keeps_images_and_is_the_only_page_retried() {
        let dir = tempfile::tempdir().unwrap();
        let layout = DataLayout::new(dir.path());
        seed_pages(&layout, "Interbank/cuentas", &[b"uno", b"malo", b"tres"]);
        let cfg = config(dir.path());

        let first = PageEcho::new(Some(b"malo"));
        let summary = run_ocr(&cfg, &first, &ShutdownSignal::new()).await.unwrap();
        assert_eq!(summary.failed, 1);
        assert_eq!(first.calls(), 3);

        let doc = OcrDocument::new("Interbank", "cuentas");
        let md = std::fs::read_to_string(doc.output_path(&layout)).unwrap();
        assert!(md.starts_with("<!-- ADVERTENCIA: 1 páginas fallaron - PDF INCOMPLETO -->\n\n"));
        assert!(md.contains("<!-- Error en página pagina_002.png: content filtered -->"));
        assert!(doc.image_dir(&layout).join("pagina_001.png").exists());

        let record = ProgressStore::load(layout.ocr_progress_file())
            .unwrap()
            .snapshot()
            .unwrap();
        assert_eq!(record.failed_pdfs.len(), 1);
        assert_eq!(
            record.failed_pdfs[0].error.as_deref(),
            Some("1 páginas con error de 3 total")
        );

        // Second run: only the error page is sent again.
        let second = PageEcho::new(None);
        let summary = run_ocr(&cfg, &second, &ShutdownSignal::new()).await.unwrap();
        assert_eq!(summary.succeeded, 1);
        assert_eq!(second.calls(), 1);
        let record = ProgressStore::load(layout.ocr_progress_file())
            .unwrap()
            .snapshot()
            .unwrap();
        assert_eq!(record.processed_pdfs, vec!["Interbank/cuentas"]);
        assert!(record.failed_pdfs.is_empty());
    }

    #[tokio::test]
    async fn requested_shutdown_starts_no_document() {
        let dir = tempfile::tempdir().unwrap();
        let layout = DataLayout::new(dir.path());
        seed_pages(&layout, "BCP/a", &[b"x"]);
        let shutdown = ShutdownSignal::new();
        shutdown.request();
        let client = PageEcho::new(None);

        let summary = run_ocr(&config(dir.path()), &client, &shutdown).await.unwrap();
        assert!(summary.interrupted);
        assert_eq!(summary.attempted, 0);
        assert_eq!(client.calls(), 0);
        assert!(layout.ocr_progress_file().exists());
    }

    #[test]
    fn discovery_skips_finished_documents() {
        let dir = tempfile::tempdir().unwrap();
        let layout = DataLayout::new(dir.path());
        seed_pages(&layout, "BCP/pending", &[b"x"]);
        seed_pages(&layout, "BCP/has_md", &[b"x"]);
        seed_pages(&layout, "BCP/incomplete", &[b"x"]);
        seed_pages(&layout, "BCP/recorded", &[b"x"]);
        std::fs::create_dir_all(layout.images_dir().join("BCP/empty")).unwrap();

        let md_dir = layout.ocr_dir().join("BCP");
        std::fs::create_dir_all(&md_dir).unwrap();
        std::fs::write(md_dir.join("has_md.md"), "| ok |").unwrap();
        std::fs::write(
            md_dir.join("incomplete.md"),
            document::incomplete_header(1) + "x",
        )
        .unwrap();

        let store = ProgressStore::load(layout.ocr_progress_file()).unwrap();
        store.record_success("BCP/recorded").unwrap();

        let keys: Vec<String> = discover_documents(&layout, &store)
            .unwrap()
            .iter()
            .map(OcrDocument::key)
            .collect();
        assert_eq!(keys, vec!["BCP/incomplete", "BCP/pending"]);
    }

    #[tokio::test]
    async fn reprocess_restores_images_and_forgets_the_document() {
        let dir = tempfile::tempdir().unwrap();
        let layout = DataLayout::new(dir.path());
        seed_pages(&layout, "BBVA_Continental/cts", &[b"uno"]);
        let cfg = config(dir.path());
        run_ocr(&cfg, &PageEcho::new(None), &ShutdownSignal::new())
            .await
            .unwrap();

        let reset = prepare_reprocess(&layout, &["BBVA_Continental/cts".to_string()]).unwrap();
        assert_eq!(reset, vec!["BBVA_Continental/cts"]);

        let doc = OcrDocument::new("BBVA_Continental", "cts");
        assert!(doc.image_dir(&layout).join("pagina_001.png").exists());
        assert!(!doc.output_path(&layout).exists());
        let store = ProgressStore::load(layout.ocr_progress_file()).unwrap();
        assert!(!store.is_processed("BBVA_Continental/cts"));
        assert_eq!(discover_documents(&layout, &store).unwrap().len(), 1);
    }

    #[test]
    fn reprocess_rejects_malformed_keys() {
        let dir = tempfile::tempdir().unwrap();
        let layout = DataLayout::new(dir.path());
        assert!(prepare_reprocess(&layout, &["nobank".to_string()]).is_err());
    }
}
