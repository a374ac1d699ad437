//! Error types for the edgequake-tarifarios library.
//!
//! Three error types reflect three failure granularities:
//!
//! * [`TarifarioError`]: **fatal**, the stage cannot start or cannot record
//!   its results (missing input directory, missing credentials, unwritable
//!   progress record). Returned as `Err(TarifarioError)` from stage entry
//!   points such as [`crate::ocr::run_ocr`].
//!
//! * [`PageError`]: **non-fatal**, one unit of work failed (a page, a PDF
//!   download, a batch) but its siblings are unaffected. Stored in the
//!   per-unit result records that end up in the JSON run reports.
//!
//! * [`LlmCallError`]: the classified outcome of a single model call. The
//!   classification drives the retry policy in [`crate::pipeline::llm`]:
//!   rate limits and transient faults are retried, everything else is not.

use once_cell::sync::Lazy;
use regex::Regex;
use std::path::PathBuf;
use thiserror::Error;

/// All fatal errors returned by the edgequake-tarifarios library.
///
/// Unit-level failures use [`PageError`] and are recorded in stage results
/// rather than propagated here.
#[derive(Debug, Error)]
pub enum TarifarioError {
    // ── Input errors ──────────────────────────────────────────────────────
    /// A stage input directory does not exist.
    #[error("Input directory not found: '{path}'\nRun the `{previous}` stage first.")]
    InputDirMissing { path: PathBuf, previous: String },

    /// A stage input file does not exist.
    #[error("Input file not found: '{path}'\nRun the `{previous}` stage first.")]
    InputFileMissing { path: PathBuf, previous: String },

    /// Unknown bank name on the command line or in a reprocess key.
    #[error("Unknown bank '{name}'\nExpected one of: bbva, bcp, interbank, scotiabank, banco-nacion.")]
    UnknownBank { name: String },

    /// A `bank/document` key could not be parsed.
    #[error("Invalid document key '{key}': expected '<bank_dir>/<name>'")]
    InvalidKey { key: String },

    // ── HTTP errors ───────────────────────────────────────────────────────
    /// The HTTP client could not be constructed.
    #[error("Failed to build HTTP client: {0}")]
    HttpClient(String),

    /// A landing page could not be fetched after all retries.
    #[error("Failed to fetch '{url}': {reason}\nCheck your internet connection.")]
    FetchFailed { url: String, reason: String },

    /// A page was fetched but did not contain what the scraper expects.
    #[error("Unexpected page layout at '{url}': {detail}")]
    UnexpectedLayout { url: String, detail: String },

    // ── PDF errors ────────────────────────────────────────────────────────
    /// PDF header/trailer/xref is corrupt and cannot be parsed.
    #[error("PDF '{path}' is corrupt: {detail}")]
    CorruptPdf { path: PathBuf, detail: String },

    /// pdfium-render returned an error for a specific page.
    #[error("Rasterisation failed for page {page} of '{path}': {detail}")]
    RasterisationFailed {
        path: PathBuf,
        page: usize,
        detail: String,
    },

    /// Could not bind to a pdfium library.
    #[error(
        "Failed to bind to pdfium library: {0}\n\n\
Rasterisation needs the pdfium shared library. You can:\n\
  • Set PDFIUM_LIB_PATH=/dir/containing/libpdfium.\n\
  • Install libpdfium system-wide (e.g. from bblanchon/pdfium-binaries).\n"
    )]
    PdfiumBindingFailed(String),

    // ── LLM errors ────────────────────────────────────────────────────────
    /// The configured provider is not initialised (missing API key etc.).
    #[error("LLM provider '{provider}' is not configured.\n{hint}")]
    ProviderNotConfigured { provider: String, hint: String },

    // ── I/O errors ────────────────────────────────────────────────────────
    /// Reading a stage input failed.
    #[error("Failed to read '{path}': {source}")]
    ReadFailed {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Creating, writing or moving a stage output failed.
    #[error("Failed to write '{path}': {source}")]
    WriteFailed {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// JSON (de)serialisation of a report or progress record failed.
    #[error("Invalid JSON in '{path}': {detail}")]
    Json { path: PathBuf, detail: String },

    /// CSV reading or writing failed.
    #[error("CSV error in '{path}': {detail}")]
    Csv { path: PathBuf, detail: String },

    /// The MySQL server refused a connection or a statement.
    #[error("MySQL error: {detail}\nCheck MYSQL_HOST, MYSQL_PORT, MYSQL_USER and MYSQL_PASSWORD.")]
    Database { detail: String },

    // ── Config errors ─────────────────────────────────────────────────────
    /// Builder validation failed.
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    // ── Catch-all ─────────────────────────────────────────────────────────
    /// Unexpected internal error.
    #[error("Internal error: {0}")]
    Internal(String),
}

impl TarifarioError {
    pub(crate) fn read(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        TarifarioError::ReadFailed {
            path: path.into(),
            source,
        }
    }

    pub(crate) fn write(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        TarifarioError::WriteFailed {
            path: path.into(),
            source,
        }
    }
}

/// A non-fatal error for a single unit of work.
///
/// Recorded in stage results and JSON reports; the stage keeps going.
#[derive(Debug, Clone, Error, serde::Serialize, serde::Deserialize)]
pub enum PageError {
    /// OCR for one page image failed after retries.
    #[error("Page {page}: OCR failed after {attempts} attempts: {detail}")]
    OcrFailed {
        page: usize,
        attempts: u32,
        detail: String,
    },

    /// A PDF could not be downloaded.
    #[error("Download of '{url}' failed: {detail}")]
    DownloadFailed { url: String, detail: String },

    /// The model answered, but the payload was rejected.
    #[error("Batch '{batch}' rejected: {reason}")]
    PayloadRejected { batch: String, reason: String },

    /// The model call for a batch failed after retries.
    #[error("Batch '{batch}': LLM call failed: {detail}")]
    BatchFailed { batch: String, detail: String },
}

/// Classified failure of one model invocation.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum LlmCallError {
    /// HTTP 429 or a quota message. Retried with linear backoff.
    #[error("rate limited: {detail}")]
    RateLimited { detail: String },

    /// Timeouts and 5xx responses. Retried with the same schedule.
    #[error("transient failure: {detail}")]
    Transient { detail: String },

    /// Anything else (bad request, auth, content filter). Not retried.
    #[error("{detail}")]
    Fatal { detail: String },
}

impl LlmCallError {
    /// Whether the retry loop should try again.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            LlmCallError::RateLimited { .. } | LlmCallError::Transient { .. }
        )
    }

    /// Classify an HTTP status code, when the transport exposes one.
    pub fn from_status(status: u16, detail: impl Into<String>) -> Self {
        let detail = detail.into();
        match status {
            429 => LlmCallError::RateLimited { detail },
            408 | 500 | 502 | 503 | 504 => LlmCallError::Transient { detail },
            _ => LlmCallError::Fatal { detail },
        }
    }

    /// Classify a provider error from its message.
    ///
    /// `edgequake-llm` surfaces provider failures as text, so the status code
    /// is recovered from the message when it is embedded there
    /// (`status: 503`, `"code": 429`, `502 Bad Gateway`).
    pub fn from_message(message: impl Into<String>) -> Self {
        let detail = message.into();
        let lower = detail.to_lowercase();
        if lower.contains("quota") || lower.contains("rate limit") || lower.contains("resource_exhausted") {
            return LlmCallError::RateLimited { detail };
        }
        if let Some(status) = embedded_status(&detail) {
            return Self::from_status(status, detail);
        }
        if lower.contains("timed out")
            || lower.contains("timeout")
            || lower.contains("unavailable")
            || lower.contains("connection")
        {
            LlmCallError::Transient { detail }
        } else {
            LlmCallError::Fatal { detail }
        }
    }
}

static STATUS_IN_MESSAGE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r"(?i)\b(?:status|http|error|code)\W{0,3}([45]\d{2})\b|\b([45]\d{2})\s+(?:too many requests|internal server error|bad gateway|service unavailable|gateway timeout|request timeout)",
    )
    .unwrap()
});

fn embedded_status(message: &str) -> Option<u16> {
    let caps = STATUS_IN_MESSAGE.captures(message)?;
    caps.get(1).or_else(|| caps.get(2))?.as_str().parse().ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn input_dir_missing_names_previous_stage() {
        let e = TarifarioError::InputDirMissing {
            path: PathBuf::from("data/images"),
            previous: "rasterize".into(),
        };
        let msg = e.to_string();
        assert!(msg.contains("data/images"), "got: {msg}");
        assert!(msg.contains("rasterize"), "got: {msg}");
    }

    #[test]
    fn provider_hint_is_displayed() {
        let e = TarifarioError::ProviderNotConfigured {
            provider: "gemini".into(),
            hint: "Set GEMINI_API_KEY".into(),
        };
        assert!(e.to_string().contains("GEMINI_API_KEY"));
    }

    #[test]
    fn status_classification() {
        assert!(matches!(
            LlmCallError::from_status(429, "slow down"),
            LlmCallError::RateLimited { .. }
        ));
        assert!(matches!(
            LlmCallError::from_status(503, "busy"),
            LlmCallError::Transient { .. }
        ));
        assert!(matches!(
            LlmCallError::from_status(400, "bad"),
            LlmCallError::Fatal { .. }
        ));
    }

    #[test]
    fn status_embedded_in_provider_message() {
        assert!(matches!(
            LlmCallError::from_message(r#"API error: {"error": {"code": 429, "message": "slow"}}"#),
            LlmCallError::RateLimited { .. }
        ));
        assert!(matches!(
            LlmCallError::from_message("HTTP 504 from upstream"),
            LlmCallError::Transient { .. }
        ));
        assert!(matches!(
            LlmCallError::from_message("502 Bad Gateway"),
            LlmCallError::Transient { .. }
        ));
        assert!(matches!(
            LlmCallError::from_message("status 400: image too large"),
            LlmCallError::Fatal { .. }
        ));
        // A bare number in the text is not a status.
        assert!(matches!(
            LlmCallError::from_message("max_tokens must be below 500"),
            LlmCallError::Fatal { .. }
        ));
    }

    #[test]
    fn message_classification() {
        assert!(LlmCallError::from_message("Error 429: Resource has been exhausted").is_retryable());
        assert!(LlmCallError::from_message("You exceeded your current Quota").is_retryable());
        assert!(LlmCallError::from_message("request timed out").is_retryable());
        assert!(!LlmCallError::from_message("invalid api key").is_retryable());
    }

    #[test]
    fn page_error_serialises() {
        let e = PageError::OcrFailed {
            page: 3,
            attempts: 3,
            detail: "quota".into(),
        };
        let json = serde_json::to_string(&e).unwrap();
        assert!(json.contains("OcrFailed"));
        assert!(e.to_string().contains("Page 3"));
    }
}
