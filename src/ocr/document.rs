//! OCR of one document folder, resumable at page granularity.
//!
//! ```text
//! images/<bank>/<doc>/pagina_001.png ─┐
//! images/<bank>/<doc>/pagina_002.png ─┼─▶ ocr/.temp/<bank>/<doc>/page_0001.md …
//!                                     │
//!                                     └─▶ ocr/<bank>/<doc>.md
//! ```
//!
//! Each page reply is checkpointed before the next page starts. On a rerun a
//! checkpoint is reused unless it holds an error marker, so only failed or
//! missing pages cost another model call.

use crate::config::DataLayout;
use crate::error::{PageError, TarifarioError};
use crate::pipeline::encode::encode_page_file;
use crate::pipeline::llm::{complete_with_retry, LlmClient, LlmRequest, RetryPolicy};
use crate::pipeline::postprocess::{clean_document, clean_page};
use crate::progress::ProgressCallback;
use crate::report::write_atomic;
use serde::Serialize;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

/// Substring identifying a page checkpoint that holds a failure.
pub const PAGE_ERROR_MARKER: &str = "<!-- Error en página";

/// Prefix of an assembled document with failed or missing pages.
pub const INCOMPLETE_MARKER: &str = "<!-- ADVERTENCIA:";

pub fn page_error_content(file_name: &str, message: &str) -> String {
    format!("\n\n{PAGE_ERROR_MARKER} {file_name}: {message} -->\n\n")
}

pub fn missing_page_placeholder(page: usize) -> String {
    format!("\n\n<!-- PÁGINA {page} NO PROCESADA -->\n\n")
}

pub fn incomplete_header(errors: usize) -> String {
    format!("{INCOMPLETE_MARKER} {errors} páginas fallaron - PDF INCOMPLETO -->\n\n")
}

pub fn checkpoint_name(page: usize) -> String {
    format!("page_{page:04}.md")
}

/// A folder of page images for one source PDF.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
pub struct OcrDocument {
    pub bank: String,
    pub name: String,
}

impl OcrDocument {
    pub fn new(bank: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            bank: bank.into(),
            name: name.into(),
        }
    }

    /// Parse a `bank/doc` key.
    pub fn from_key(key: &str) -> Result<Self, TarifarioError> {
        match key.trim().trim_matches('/').split_once('/') {
            Some((bank, name)) if !bank.is_empty() && !name.is_empty() && !name.contains('/') => {
                Ok(Self::new(bank, name))
            }
            _ => Err(TarifarioError::InvalidKey {
                key: key.to_string(),
            }),
        }
    }

    /// `bank/doc`, the key used in the progress record.
    pub fn key(&self) -> String {
        format!("{}/{}", self.bank, self.name)
    }

    pub fn image_dir(&self, layout: &DataLayout) -> PathBuf {
        layout.images_dir().join(&self.bank).join(&self.name)
    }

    pub fn processed_image_dir(&self, layout: &DataLayout) -> PathBuf {
        layout.images_processed_dir().join(&self.bank).join(&self.name)
    }

    pub fn temp_dir(&self, layout: &DataLayout) -> PathBuf {
        layout.ocr_temp_dir().join(&self.bank).join(&self.name)
    }

    pub fn output_path(&self, layout: &DataLayout) -> PathBuf {
        layout.ocr_dir().join(&self.bank).join(format!("{}.md", self.name))
    }
}

/// Per-call knobs for page OCR.
#[derive(Debug, Clone)]
pub struct OcrSettings {
    pub prompt: String,
    pub temperature: f32,
    pub max_tokens: usize,
    pub retry: RetryPolicy,
    pub page_delay: Duration,
}

/// Outcome for one document, as written to the session report.
#[derive(Debug, Clone, Default, Serialize)]
pub struct DocumentResult {
    pub pdf: String,
    #[serde(rename = "exito")]
    pub success: bool,
    #[serde(rename = "tiempo")]
    pub seconds: f64,
    pub error: Option<String>,
    pub output_path: Option<PathBuf>,
    #[serde(rename = "paginas_procesadas")]
    pub pages_ok: usize,
    #[serde(rename = "paginas_con_error")]
    pub pages_failed: usize,
    #[serde(rename = "caracteres")]
    pub chars: usize,
    /// Model calls made in this session (checkpointed pages cost none).
    #[serde(rename = "llamadas_modelo")]
    pub model_calls: usize,
}

/// Sorted PNG files in `dir`.
pub fn page_images(dir: &Path) -> Result<Vec<PathBuf>, TarifarioError> {
    let mut pngs: Vec<PathBuf> = std::fs::read_dir(dir)
        .map_err(|e| TarifarioError::read(dir, e))?
        .flatten()
        .map(|e| e.path())
        .filter(|p| p.extension().is_some_and(|x| x.eq_ignore_ascii_case("png")))
        .collect();
    pngs.sort();
    Ok(pngs)
}

fn is_done_checkpoint(path: &Path) -> bool {
    std::fs::read_to_string(path)
        .map(|s| !s.contains(PAGE_ERROR_MARKER))
        .unwrap_or(false)
}

/// OCR one page, returning the checkpoint content.
///
/// A failure becomes an error-marker comment instead of an `Err`, so one bad
/// page never aborts the document.
async fn ocr_page<C: LlmClient>(
    client: &C,
    settings: &OcrSettings,
    image: &Path,
    page: usize,
    label: &str,
) -> String {
    let file_name = image
        .file_name()
        .map(|s| s.to_string_lossy().to_string())
        .unwrap_or_default();

    let image_data = match encode_page_file(image).await {
        Ok(data) => data,
        Err(e) => return page_error_content(&file_name, &e.to_string()),
    };
    let request = LlmRequest {
        system: None,
        prompt: settings.prompt.clone(),
        images: vec![image_data],
        temperature: settings.temperature,
        max_tokens: settings.max_tokens,
    };

    match complete_with_retry(client, request, settings.retry, label).await {
        Ok(reply) => clean_page(&reply.content),
        Err(failure) => {
            let err = PageError::OcrFailed {
                page,
                attempts: failure.attempts,
                detail: failure.error.to_string(),
            };
            warn!("{}: {}", label, err);
            page_error_content(&file_name, &failure.error.to_string())
        }
    }
}

/// Move `from` to `to`, replacing an existing `to`.
fn move_dir(from: &Path, to: &Path) -> Result<(), TarifarioError> {
    if let Some(parent) = to.parent() {
        std::fs::create_dir_all(parent).map_err(|e| TarifarioError::write(parent, e))?;
    }
    if to.exists() {
        std::fs::remove_dir_all(to).map_err(|e| TarifarioError::write(to, e))?;
    }
    std::fs::rename(from, to).map_err(|e| TarifarioError::write(to, e))
}

/// OCR every page of `doc` and assemble its Markdown.
///
/// Page failures are folded into the result; only filesystem failures on
/// the document's own paths are returned as `Err`.
pub async fn process_document<C: LlmClient>(
    client: &C,
    layout: &DataLayout,
    doc: &OcrDocument,
    settings: &OcrSettings,
    progress: Option<&ProgressCallback>,
) -> Result<DocumentResult, TarifarioError> {
    let start = Instant::now();
    let key = doc.key();
    let mut result = DocumentResult {
        pdf: key.clone(),
        ..Default::default()
    };

    let image_dir = doc.image_dir(layout);
    let images = page_images(&image_dir)?;
    if images.is_empty() {
        result.error = Some("No PNG files found".into());
        return Ok(result);
    }
    let total = images.len();

    let temp_dir = doc.temp_dir(layout);
    std::fs::create_dir_all(&temp_dir).map_err(|e| TarifarioError::write(&temp_dir, e))?;
    info!("{}: {} pages", key, total);

    // ── Page loop: strictly in page order ──
    for (i, image) in images.iter().enumerate() {
        let page = i + 1;
        let checkpoint = temp_dir.join(checkpoint_name(page));

        if is_done_checkpoint(&checkpoint) {
            debug!("{}: page {}/{} already done", key, page, total);
        } else {
            let label = format!("{key} p{page}");
            let content = ocr_page(client, settings, image, page, &label).await;
            result.model_calls += 1;
            write_atomic(&checkpoint, content.as_bytes())?;

            if page < total && !settings.page_delay.is_zero() {
                tokio::time::sleep(settings.page_delay).await;
            }
        }
        if let Some(cb) = progress {
            cb.on_page_complete(&key, page, total);
        }
    }

    // ── Assembly ──
    let mut pages = Vec::with_capacity(total);
    let mut errors = 0;
    for page in 1..=total {
        match std::fs::read_to_string(temp_dir.join(checkpoint_name(page))) {
            Ok(content) => {
                if content.contains(PAGE_ERROR_MARKER) {
                    errors += 1;
                }
                pages.push(content);
            }
            Err(_) => {
                errors += 1;
                pages.push(missing_page_placeholder(page));
            }
        }
    }
    let joined = pages.join("\n\n");

    let output_path = doc.output_path(layout);
    let markdown = if errors > 0 {
        result.error = Some(format!("{errors} páginas con error de {total} total"));
        result.pages_ok = total - errors;
        result.pages_failed = errors;
        warn!("{}: {} of {} pages failed; images kept for the next run", key, errors, total);
        format!("{}{}", incomplete_header(errors), joined)
    } else {
        result.success = true;
        result.pages_ok = total;
        clean_document(&joined)
    };

    write_atomic(&output_path, markdown.as_bytes())?;
    result.output_path = Some(output_path);
    result.chars = markdown.chars().count();

    if result.success {
        move_dir(&image_dir, &doc.processed_image_dir(layout))?;
        if let Err(e) = std::fs::remove_dir_all(&temp_dir) {
            warn!("{}: could not remove {}: {}", key, temp_dir.display(), e);
        }
    }

    result.seconds = start.elapsed().as_secs_f64();
    Ok(result)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn key_parsing() {
        let d = OcrDocument::from_key("BBVA_Continental/CTS-COMISIONES").unwrap();
        assert_eq!(d.bank, "BBVA_Continental");
        assert_eq!(d.key(), "BBVA_Continental/CTS-COMISIONES");
        assert!(OcrDocument::from_key("nobank").is_err());
        assert!(OcrDocument::from_key("a/b/c").is_err());
    }

    #[test]
    fn markers() {
        assert_eq!(
            page_error_content("pagina_002.png", "quota"),
            "\n\n<!-- Error en página pagina_002.png: quota -->\n\n"
        );
        assert_eq!(
            missing_page_placeholder(3),
            "\n\n<!-- PÁGINA 3 NO PROCESADA -->\n\n"
        );
        assert_eq!(
            incomplete_header(2),
            "<!-- ADVERTENCIA: 2 páginas fallaron - PDF INCOMPLETO -->\n\n"
        );
        assert_eq!(checkpoint_name(7), "page_0007.md");
    }

    #[test]
    fn error_checkpoints_are_not_done() {
        let dir = tempfile::tempdir().unwrap();
        let ok = dir.path().join("page_0001.md");
        let bad = dir.path().join("page_0002.md");
        std::fs::write(&ok, "| a |").unwrap();
        std::fs::write(&bad, page_error_content("pagina_002.png", "x")).unwrap();
        assert!(is_done_checkpoint(&ok));
        assert!(!is_done_checkpoint(&bad));
        assert!(!is_done_checkpoint(&dir.path().join("page_0003.md")));
    }
}
