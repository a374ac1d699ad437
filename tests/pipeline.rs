//! Offline integration tests: OCR → combine → normalize → flatten → viewer.
//!
//! Page images are tiny byte strings and the model is a scripted client, so
//! the whole chain runs in a temp directory without network or pdfium.
//!
//! Run with:
//!   cargo test --test pipeline

use base64::{engine::general_purpose::STANDARD, Engine as _};
use edgequake_tarifarios::{
    batch::{combine_batches, parse_batch},
    flatten::flatten_all,
    normalize::normalize_all,
    ocr::{run_ocr, ShutdownSignal},
    viewer::{Dataset, TarifaQuery},
    DataLayout, LlmCallError, LlmClient, LlmReply, LlmRequest, PipelineConfig,
};
use rand::rngs::StdRng;
use rand::SeedableRng;
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};

// ── Scripted model ───────────────────────────────────────────────────────────

/// Reads images as if each held one tariff row, and normalizes every batch
/// record into a document with a header item plus one fee.
#[derive(Default)]
struct ScriptedModel {
    ocr_calls: AtomicUsize,
    normalize_calls: AtomicUsize,
}

impl ScriptedModel {
    fn ocr(&self, request: &LlmRequest) -> String {
        self.ocr_calls.fetch_add(1, Ordering::SeqCst);
        let bytes = STANDARD.decode(&request.images[0].data).unwrap_or_default();
        format!("| Comisión | {} |", String::from_utf8_lossy(&bytes))
    }

    fn normalize(&self, request: &LlmRequest) -> String {
        self.normalize_calls.fetch_add(1, Ordering::SeqCst);
        let content = request
            .prompt
            .split_once("BATCH CONTENT:\n")
            .map(|(_, b)| b)
            .unwrap_or_default();
        let docs: Vec<String> = parse_batch(content)
            .iter()
            .map(|r| {
                format!(
                    r#"{{
                      "archivo": "{path}",
                      "metadata": {{"banco": "{bank}", "producto_codigo": "{product}",
                                    "fecha_extraccion": "2025-01-10"}},
                      "items": [
                        {{"id": "1", "jerarquia": {{"es_encabezado": true}},
                          "concepto": {{"nombre": "COMISIONES"}}}},
                        {{"id": "2", "clasificacion": {{"tipo": "COMISION"}},
                          "concepto": {{"nombre": "Mantenimiento {product}"}},
                          "valores": {{"moneda": "MN", "mn": {{"monto_fijo": "S/ 15.00"}}}}}}
                      ],
                      "control_calidad": {{"total_items_extraidos": 1}}
                    }}"#,
                    path = r.file_path,
                    bank = r.bank,
                    product = r.product
                )
            })
            .collect();
        format!(
            "Aquí está el JSON:\n```json\n{{\"batch_metadata\": {{}}, \"documentos\": [{}], \"resumen_batch\": {{}}}}\n```",
            docs.join(",")
        )
    }
}

impl LlmClient for ScriptedModel {
    async fn complete(&self, request: LlmRequest) -> Result<LlmReply, LlmCallError> {
        let content = if request.images.is_empty() {
            self.normalize(&request)
        } else {
            self.ocr(&request)
        };
        Ok(LlmReply {
            content,
            ..Default::default()
        })
    }
}

// ── Helpers ──────────────────────────────────────────────────────────────────

fn config(root: &Path) -> PipelineConfig {
    PipelineConfig::builder()
        .data_dir(root)
        .page_delay_ms(0)
        .normalize_delay_ms(0)
        .rate_limit_backoff_ms(1)
        .batch_size(2)
        .build()
        .unwrap()
}

fn seed_document(layout: &DataLayout, bank: &str, doc: &str, pages: &[&str]) {
    let dir = layout.images_dir().join(bank).join(doc);
    std::fs::create_dir_all(&dir).unwrap();
    for (i, text) in pages.iter().enumerate() {
        std::fs::write(dir.join(format!("pagina_{:03}.png", i + 1)), text).unwrap();
    }
}

// ── Tests ────────────────────────────────────────────────────────────────────

#[tokio::test]
async fn images_to_csv_to_viewer() {
    let dir = tempfile::tempdir().unwrap();
    let root = dir.path();
    let layout = DataLayout::new(root);
    let cfg = config(root);
    let model = ScriptedModel::default();

    seed_document(&layout, "BCP", "tarjetas", &["S/ 15.00", "S/ 20.00"]);
    seed_document(&layout, "BCP", "cuentas", &["S/ 5.00"]);
    seed_document(&layout, "Interbank", "prestamos", &["2.5%"]);

    // Stage 4
    let ocr = run_ocr(&cfg, &model, &ShutdownSignal::new()).await.unwrap();
    assert_eq!(ocr.succeeded, 3);
    assert_eq!(model.ocr_calls.load(Ordering::SeqCst), 4);
    let md = std::fs::read_to_string(layout.ocr_dir().join("BCP/tarjetas.md")).unwrap();
    assert!(md.contains("S/ 15.00") && md.contains("S/ 20.00"));

    // Stage 5: two BCP files fit one batch of 2, Interbank gets its own.
    let batches = combine_batches(&cfg, &mut StdRng::seed_from_u64(7)).unwrap();
    assert_eq!(batches.len(), 2);
    assert!(layout.batches_dir().join("BCP/batch_001.txt").is_file());
    assert!(layout.batches_dir().join("Interbank/batch_001.txt").is_file());

    // Stage 6
    let norm = normalize_all(&cfg, &model).await.unwrap();
    assert_eq!(norm.exitosos, 2);
    assert_eq!(norm.total_documentos, 3);
    assert_eq!(norm.total_items, 3);

    // Stage 7: one row per document, headers dropped.
    let flat = flatten_all(&cfg).unwrap();
    assert_eq!(flat.total_filas, 3);
    assert_eq!(flat.filas_por_banco["BCP"], 2);
    let exam = std::fs::read_to_string(layout.exam_csv()).unwrap();
    assert!(exam.contains("MN: S/ 15.0"));

    // Stage 8
    let data = Dataset::load(&layout.full_csv()).unwrap();
    assert_eq!(data.len(), 3);
    let bcp = data
        .page(&TarifaQuery {
            banco: Some("BCP".into()),
            ..Default::default()
        })
        .unwrap();
    assert_eq!(bcp.total_items, 2);
    assert!(bcp.items.iter().all(|t| t.monto_fijo_mn == Some(15.0)));
    assert_eq!(data.stats().bancos_count["Interbank"], 1);
    assert_eq!(data.filters().tipos, vec!["COMISION"]);
}

#[tokio::test]
async fn second_run_does_no_model_work() {
    let dir = tempfile::tempdir().unwrap();
    let root = dir.path();
    let layout = DataLayout::new(root);
    let cfg = config(root);
    let model = ScriptedModel::default();
    seed_document(&layout, "Scotiabank", "tarifario", &["S/ 9.90"]);

    run_ocr(&cfg, &model, &ShutdownSignal::new()).await.unwrap();
    combine_batches(&cfg, &mut StdRng::seed_from_u64(1)).unwrap();
    normalize_all(&cfg, &model).await.unwrap();
    let ocr_calls = model.ocr_calls.load(Ordering::SeqCst);
    let norm_calls = model.normalize_calls.load(Ordering::SeqCst);

    let again = run_ocr(&cfg, &model, &ShutdownSignal::new()).await.unwrap();
    assert_eq!(again.attempted, 0);
    assert_eq!(again.total_processed, 1);
    let norm = normalize_all(&cfg, &model).await.unwrap();
    assert_eq!(norm.omitidos, 1);

    assert_eq!(model.ocr_calls.load(Ordering::SeqCst), ocr_calls);
    assert_eq!(model.normalize_calls.load(Ordering::SeqCst), norm_calls);
}
