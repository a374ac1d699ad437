//! Building blocks shared by the stage modules.
//!
//! Each submodule implements exactly one transformation step, so each is
//! testable on its own and the stages stay thin orchestration.
//!
//! ## Data Flow
//!
//! ```text
//! render ──▶ encode ──▶ llm ──▶ postprocess
//! (pdfium)   (base64)   (VLM)   (cleanup)
//! ```
//!
//! 1. [`render`] rasterises PDF pages to PNG files; runs in `spawn_blocking`
//!    because pdfium is not async-safe
//! 2. [`encode`] base64-wraps a PNG file for the multimodal request body
//! 3. [`llm`] drives a model call with classified retry; used by page OCR
//!    and batch normalization
//! 4. [`postprocess`] holds the deterministic Markdown cleanup rules,
//!    including repeated-line removal

pub mod encode;
pub mod llm;
pub mod postprocess;
pub mod render;
