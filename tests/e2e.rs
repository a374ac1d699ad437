//! End-to-end tests against the live bank websites and a real LLM provider.
//!
//! Gated behind `E2E_ENABLED` so they never run in CI unless requested.
//! The OCR test also needs provider credentials (e.g. `GEMINI_API_KEY`) and
//! a pdfium library on the loader path.
//!
//! Run with:
//!   E2E_ENABLED=1 cargo test --test e2e -- --nocapture --test-threads=1

use edgequake_tarifarios::{
    batch::combine_batches,
    download::download_all,
    flatten::flatten_all,
    http::HttpClient,
    normalize::normalize_all,
    ocr::{run_ocr, ShutdownSignal},
    pipeline::llm::resolve_client,
    rasterize::{count_pngs, rasterize_all},
    scrape::scrape_bank,
    Bank, DataLayout, PipelineConfig,
};
use rand::rngs::StdRng;
use rand::SeedableRng;

// ── Test helpers ─────────────────────────────────────────────────────────────

macro_rules! e2e_skip_unless_enabled {
    () => {
        if std::env::var("E2E_ENABLED").is_err() {
            println!("SKIP: set E2E_ENABLED=1 to run e2e tests");
            return;
        }
    };
}

fn config(root: &std::path::Path) -> PipelineConfig {
    PipelineConfig::builder()
        .data_dir(root)
        .dpi(150)
        .build()
        .expect("valid config")
}

// ── Scraping (network, no LLM) ──────────────────────────────────────────────

#[tokio::test]
async fn test_scrape_bcp_landing_page() {
    e2e_skip_unless_enabled!();
    let dir = tempfile::tempdir().unwrap();
    let client = HttpClient::new(&config(dir.path())).unwrap();

    let urls = scrape_bank(Bank::Bcp, &client).await;
    assert!(!urls.is_empty(), "BCP should publish at least one tariff PDF");
    for u in &urls {
        assert!(u.url.to_lowercase().contains(".pdf"), "not a PDF link: {}", u.url);
        assert!(!u.label.is_empty());
        assert_eq!(u.bank, Bank::Bcp);
    }
    println!("BCP: {} links", urls.len());
}

#[tokio::test]
async fn test_scrape_scotiabank_embedded_tree() {
    e2e_skip_unless_enabled!();
    let dir = tempfile::tempdir().unwrap();
    let client = HttpClient::new(&config(dir.path())).unwrap();

    let urls = scrape_bank(Bank::Scotiabank, &client).await;
    assert!(!urls.is_empty());
    assert!(
        urls.iter().any(|u| u.label.contains(" > ")),
        "Scotiabank labels should carry the menu path"
    );
}

// ── Download + rasterize (network + pdfium) ─────────────────────────────────

#[tokio::test]
async fn test_download_and_rasterize_banco_nacion() {
    e2e_skip_unless_enabled!();
    let dir = tempfile::tempdir().unwrap();
    let cfg = config(dir.path());
    let client = HttpClient::new(&cfg).unwrap();

    let urls = scrape_bank(Bank::BancoNacion, &client).await;
    let results = download_all(&cfg, &urls[..1]).await.unwrap();
    assert!(results[0].success, "download failed: {:?}", results[0].error);
    assert!(results[0].metadata.valid, "body is not a PDF");

    let summary = rasterize_all(&cfg).await.unwrap();
    assert_eq!(summary.exitosos, 1);
    assert!(summary.total_paginas > 0);
}

// ── Whole chain on one page (network + pdfium + LLM) ────────────────────────

#[tokio::test]
async fn test_one_page_through_every_stage() {
    e2e_skip_unless_enabled!();
    let dir = tempfile::tempdir().unwrap();
    let layout = DataLayout::new(dir.path());
    let cfg = config(dir.path());
    let llm = resolve_client(&cfg).expect("provider credentials");
    let http = HttpClient::new(&cfg).unwrap();

    let urls = scrape_bank(Bank::BancoNacion, &http).await;
    download_all(&cfg, &urls[..1]).await.unwrap();
    rasterize_all(&cfg).await.unwrap();

    // Keep only the first page so the test costs one OCR call.
    let bank_dir = layout.images_dir().join(Bank::BancoNacion.dir_name());
    let doc_dir = std::fs::read_dir(&bank_dir).unwrap().flatten().next().unwrap().path();
    for entry in std::fs::read_dir(&doc_dir).unwrap().flatten() {
        if entry.file_name() != "pagina_001.png" {
            std::fs::remove_file(entry.path()).unwrap();
        }
    }
    assert_eq!(count_pngs(&doc_dir), 1);

    let ocr = run_ocr(&cfg, &llm, &ShutdownSignal::new()).await.unwrap();
    assert_eq!(ocr.succeeded, 1, "OCR failed");

    combine_batches(&cfg, &mut StdRng::seed_from_u64(0)).unwrap();
    let norm = normalize_all(&cfg, &llm).await.unwrap();
    assert_eq!(norm.fallidos, 0, "normalization rejected");

    let flat = flatten_all(&cfg).unwrap();
    println!("{} rows → {}", flat.total_filas, flat.csv_completo.display());
    assert!(flat.total_filas > 0, "a tariff page should yield rows");
}

// ── MySQL (needs a reachable server) ─────────────────────────────────────────

#[cfg(feature = "mysql")]
#[tokio::test]
async fn test_load_small_csv_into_mysql() {
    use edgequake_tarifarios::database::{load_mysql, MysqlSettings};

    e2e_skip_unless_enabled!();
    if std::env::var("MYSQL_HOST").is_err() {
        println!("SKIP: set MYSQL_HOST to run the MySQL load test");
        return;
    }
    let dir = tempfile::tempdir().unwrap();
    let cfg = config(dir.path());
    let csv = dir.path().join("tarifas.csv");
    std::fs::write(
        &csv,
        "Banco,Producto_Codigo,Concepto,Tipo,Tasa_Porcentaje_MN,Moneda\n\
         BCP,tarjetas,TEA compras,TASA,45.5,MN\n\
         BCP,tarjetas,Membresía,COMISION,,MN\n\
         Interbank,cuentas,Mantenimiento,COMISION,nan,AMBAS\n",
    )
    .unwrap();

    let settings = MysqlSettings::from_env().unwrap();
    let summary = load_mysql(&cfg, &settings, Some(&csv)).await.unwrap();
    assert_eq!(summary.filas_csv, 3);
    assert_eq!(summary.insertados, 3);
    assert_eq!(summary.insertados_por_banco.get("BCP"), Some(&2));
    assert!(DataLayout::new(dir.path())
        .reports_dir()
        .join("reporte_mysql.json")
        .exists());
}
