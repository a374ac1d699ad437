//! # edgequake-tarifarios
//!
//! Turn the tariff PDFs published by Peruvian banks into one flat CSV, using
//! Vision Language Models to read the pages.
//!
//! ## Why this crate?
//!
//! Bank tariff sheets ("tarifarios") are scanned tables, multi-level headers
//! and footnote-heavy layouts. Text extraction tools lose the table structure,
//! so every page is rasterised and read by a VLM instead; a second model call
//! then maps batches of those Markdown documents onto one JSON schema that can
//! be flattened into rows.
//!
//! ## Pipeline Overview
//!
//! ```text
//! bank websites
//!  │
//!  ├─ 1. scrape     PDF links per bank            urls_scrapeadas.json
//!  ├─ 2. download   stream PDFs, SHA-256          raw/<bank>/*.pdf
//!  ├─ 3. rasterize  pdfium, one PNG per page      images/<bank>/<doc>/
//!  ├─ 4. ocr        resumable page-by-page VLM    ocr/<bank>/<doc>.md
//!  ├─ 5. combine    shuffled batches of K docs    batches_combinados/
//!  ├─ 6. normalize  one model call per batch      normalized_json/
//!  ├─ 7. flatten    full + exam projections       output/*.csv
//!  ├─ 8. serve      browsing page + HTTP query API over the CSV
//!  └─ 9. load-mysql CSV into MySQL + per-bank summary  (optional)
//! ```
//!
//! Each stage reads only the previous stage's directory under one data root
//! (see [`DataLayout`]) and can be re-run on its own. Stages 4 and 6 skip work
//! that is already on disk, so an interrupted run resumes where it stopped.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use edgequake_tarifarios::{ocr, pipeline::llm::resolve_client, PipelineConfig};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     // Provider auto-detected from GEMINI_API_KEY / OPENAI_API_KEY / ...
//!     let config = PipelineConfig::builder().data_dir("data").build()?;
//!     let client = resolve_client(&config)?;
//!     let summary = ocr::run_ocr(&config, &client, &ocr::ShutdownSignal::new()).await?;
//!     eprintln!("{} documents, {} model calls", summary.attempted, summary.model_calls);
//!     Ok(())
//! }
//! ```
//!
//! ## Feature Flags
//!
//! | Feature  | Default | Description |
//! |----------|---------|-------------|
//! | `cli`    | on      | The `tarifarios` binary (clap + anyhow + tracing-subscriber + indicatif) |
//! | `viewer` | on      | The axum HTTP server in [`viewer::server`] |
//! | `mysql`  | on      | [`database::load_mysql`] through sqlx |

// ── Modules ──────────────────────────────────────────────────────────────

pub mod batch;
pub mod config;
pub mod database;
pub mod download;
pub mod error;
pub mod flatten;
pub mod http;
pub mod models;
pub mod normalize;
pub mod ocr;
pub mod pipeline;
pub mod progress;
pub mod prompts;
pub mod rasterize;
pub mod report;
pub mod scrape;
pub mod viewer;

// ── Re-exports ───────────────────────────────────────────────────────────

pub use config::{DataLayout, PipelineConfig, PipelineConfigBuilder};
pub use error::{LlmCallError, PageError, TarifarioError};
pub use models::{Bank, DownloadResult, TarifarioMetadata, TarifarioUrl};
pub use pipeline::llm::{LlmClient, LlmReply, LlmRequest};
pub use progress::{NoopProgressCallback, PipelineProgressCallback, ProgressCallback};
