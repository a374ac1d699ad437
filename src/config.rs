//! Configuration types for the tariff pipeline.
//!
//! Every stage reads its knobs from one [`PipelineConfig`], built via its
//! [`PipelineConfigBuilder`]. Keeping all stages on one struct makes a full
//! `tarifarios run` reproducible from a single debug line, and lets the CLI
//! map flags to fields in one place.
//!
//! Paths are not configured one by one. [`DataLayout`] derives every stage
//! directory from a single data root, so the on-disk hand-off between stages
//! (`raw/ → images/ → ocr/ → batches_combinados/ → normalized_json/ → output/`)
//! cannot drift.

use crate::error::TarifarioError;
use crate::progress::ProgressCallback;
use edgequake_llm::LLMProvider;
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::debug;

/// Browser-like user agent; some bank sites refuse unknown agents.
pub const DEFAULT_USER_AGENT: &str =
    "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36";

/// Default vision/text model when none is configured.
pub const DEFAULT_MODEL: &str = "gemini-2.5-flash-lite";

/// Configuration for every pipeline stage.
///
/// Built via [`PipelineConfig::builder()`] or [`PipelineConfig::default()`].
///
/// # Example
/// ```rust
/// use edgequake_tarifarios::PipelineConfig;
///
/// let config = PipelineConfig::builder()
///     .data_dir("/tmp/tarifarios")
///     .dpi(200)
///     .batch_size(5)
///     .build()
///     .unwrap();
/// assert_eq!(config.layout().ocr_dir(), std::path::Path::new("/tmp/tarifarios/ocr"));
/// ```
#[derive(Clone)]
pub struct PipelineConfig {
    /// Root of the on-disk data tree. Default: `data`.
    pub data_dir: PathBuf,

    // ── Scraper / downloader ─────────────────────────────────────────────
    /// User agent sent with every HTTP request.
    pub user_agent: String,

    /// Per-request timeout in seconds. Default: 30.
    pub http_timeout_secs: u64,

    /// HTTP attempts per URL on 429/502/503 or network errors. Default: 3.
    pub http_attempts: u32,

    /// Pause between consecutive downloads, in milliseconds. Default: 1000.
    pub request_delay_ms: u64,

    // ── Rasterizer ───────────────────────────────────────────────────────
    /// Rendering DPI. Range: 72–600. Default: 300.
    ///
    /// Tariff sheets are dense tables in small print; 300 DPI keeps digits
    /// and currency symbols legible to the vision model.
    pub dpi: u32,

    /// Documents rendered concurrently. Default: 16.
    pub render_workers: usize,

    // ── LLM ──────────────────────────────────────────────────────────────
    /// LLM model identifier. If None, [`DEFAULT_MODEL`].
    pub model: Option<String>,

    /// LLM provider name (e.g. "gemini", "openai").
    /// If None along with `provider`, the provider is auto-detected.
    pub provider_name: Option<String>,

    /// Pre-constructed LLM provider. Takes precedence over `provider_name`.
    pub provider: Option<Arc<dyn LLMProvider>>,

    /// Attempts per model call when the failure is retryable. Default: 3.
    pub max_attempts: u32,

    /// Linear backoff unit in milliseconds: the wait before retry `n` is
    /// `rate_limit_backoff_ms × n`. Default: 10 000 (10 s, 20 s).
    pub rate_limit_backoff_ms: u64,

    // ── OCR ──────────────────────────────────────────────────────────────
    /// Documents OCR'd concurrently. Default: 1.
    ///
    /// Pages inside a document are always sequential; this only controls how
    /// many documents are in flight. Raise it only with a generous quota.
    pub ocr_workers: usize,

    /// Pause between page requests of one document, in ms. Default: 3000.
    pub page_delay_ms: u64,

    /// Sampling temperature for page OCR. Default: 0.0.
    pub ocr_temperature: f32,

    /// Maximum output tokens per page. Default: 8192.
    pub ocr_max_tokens: usize,

    /// Custom OCR prompt. If None, [`crate::prompts::OCR_PAGE_PROMPT`].
    pub ocr_prompt: Option<String>,

    // ── Batching / normalization ─────────────────────────────────────────
    /// Markdown files per batch. Default: 10.
    pub batch_size: usize,

    /// Batches normalized concurrently. Default: 3.
    pub normalize_workers: usize,

    /// Pause after each completed batch, in ms. Default: 2000.
    pub normalize_delay_ms: u64,

    /// Sampling temperature for normalization. Default: 0.0.
    pub normalize_temperature: f32,

    /// Maximum output tokens per batch. Default: 16384.
    pub normalize_max_tokens: usize,

    // ── Misc ─────────────────────────────────────────────────────────────
    /// Redo work whose output already exists (rasterizer, normalizer).
    pub overwrite: bool,

    /// Progress events for long-running stages.
    pub progress_callback: Option<ProgressCallback>,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from("data"),
            user_agent: DEFAULT_USER_AGENT.to_string(),
            http_timeout_secs: 30,
            http_attempts: 3,
            request_delay_ms: 1000,
            dpi: 300,
            render_workers: 16,
            model: None,
            provider_name: None,
            provider: None,
            max_attempts: 3,
            rate_limit_backoff_ms: 10_000,
            ocr_workers: 1,
            page_delay_ms: 3000,
            ocr_temperature: 0.0,
            ocr_max_tokens: 8192,
            ocr_prompt: None,
            batch_size: 10,
            normalize_workers: 3,
            normalize_delay_ms: 2000,
            normalize_temperature: 0.0,
            normalize_max_tokens: 16384,
            overwrite: false,
            progress_callback: None,
        }
    }
}

impl fmt::Debug for PipelineConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PipelineConfig")
            .field("data_dir", &self.data_dir)
            .field("http_timeout_secs", &self.http_timeout_secs)
            .field("http_attempts", &self.http_attempts)
            .field("dpi", &self.dpi)
            .field("render_workers", &self.render_workers)
            .field("model", &self.model)
            .field("provider_name", &self.provider_name)
            .field("provider", &self.provider.as_ref().map(|_| "<dyn LLMProvider>"))
            .field("max_attempts", &self.max_attempts)
            .field("rate_limit_backoff_ms", &self.rate_limit_backoff_ms)
            .field("ocr_workers", &self.ocr_workers)
            .field("page_delay_ms", &self.page_delay_ms)
            .field("batch_size", &self.batch_size)
            .field("normalize_workers", &self.normalize_workers)
            .field("normalize_delay_ms", &self.normalize_delay_ms)
            .field("overwrite", &self.overwrite)
            .finish()
    }
}

impl PipelineConfig {
    /// Create a new builder for `PipelineConfig`.
    pub fn builder() -> PipelineConfigBuilder {
        PipelineConfigBuilder {
            config: Self::default(),
        }
    }

    /// Directory layout rooted at [`PipelineConfig::data_dir`].
    pub fn layout(&self) -> DataLayout {
        DataLayout::new(&self.data_dir)
    }

    /// Model to request, falling back to [`DEFAULT_MODEL`].
    pub fn model_or_default(&self) -> &str {
        self.model.as_deref().unwrap_or(DEFAULT_MODEL)
    }
}

/// Builder for [`PipelineConfig`].
#[derive(Debug)]
pub struct PipelineConfigBuilder {
    config: PipelineConfig,
}

impl PipelineConfigBuilder {
    pub fn data_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.config.data_dir = dir.into();
        self
    }

    pub fn user_agent(mut self, ua: impl Into<String>) -> Self {
        self.config.user_agent = ua.into();
        self
    }

    pub fn http_timeout_secs(mut self, secs: u64) -> Self {
        self.config.http_timeout_secs = secs.max(1);
        self
    }

    pub fn http_attempts(mut self, n: u32) -> Self {
        self.config.http_attempts = n;
        self
    }

    pub fn request_delay_ms(mut self, ms: u64) -> Self {
        self.config.request_delay_ms = ms;
        self
    }

    pub fn dpi(mut self, dpi: u32) -> Self {
        self.config.dpi = dpi;
        self
    }

    pub fn render_workers(mut self, n: usize) -> Self {
        self.config.render_workers = n;
        self
    }

    pub fn model(mut self, model: impl Into<String>) -> Self {
        self.config.model = Some(model.into());
        self
    }

    pub fn provider_name(mut self, name: impl Into<String>) -> Self {
        self.config.provider_name = Some(name.into());
        self
    }

    pub fn provider(mut self, provider: Arc<dyn LLMProvider>) -> Self {
        self.config.provider = Some(provider);
        self
    }

    pub fn max_attempts(mut self, n: u32) -> Self {
        self.config.max_attempts = n;
        self
    }

    pub fn rate_limit_backoff_ms(mut self, ms: u64) -> Self {
        self.config.rate_limit_backoff_ms = ms;
        self
    }

    pub fn ocr_workers(mut self, n: usize) -> Self {
        self.config.ocr_workers = n;
        self
    }

    pub fn page_delay_ms(mut self, ms: u64) -> Self {
        self.config.page_delay_ms = ms;
        self
    }

    pub fn ocr_temperature(mut self, t: f32) -> Self {
        self.config.ocr_temperature = t.clamp(0.0, 2.0);
        self
    }

    pub fn ocr_max_tokens(mut self, n: usize) -> Self {
        self.config.ocr_max_tokens = n;
        self
    }

    pub fn ocr_prompt(mut self, prompt: impl Into<String>) -> Self {
        self.config.ocr_prompt = Some(prompt.into());
        self
    }

    pub fn batch_size(mut self, n: usize) -> Self {
        self.config.batch_size = n;
        self
    }

    pub fn normalize_workers(mut self, n: usize) -> Self {
        self.config.normalize_workers = n;
        self
    }

    pub fn normalize_delay_ms(mut self, ms: u64) -> Self {
        self.config.normalize_delay_ms = ms;
        self
    }

    pub fn normalize_temperature(mut self, t: f32) -> Self {
        self.config.normalize_temperature = t.clamp(0.0, 2.0);
        self
    }

    pub fn normalize_max_tokens(mut self, n: usize) -> Self {
        self.config.normalize_max_tokens = n;
        self
    }

    pub fn overwrite(mut self, v: bool) -> Self {
        self.config.overwrite = v;
        self
    }

    pub fn progress_callback(mut self, cb: ProgressCallback) -> Self {
        self.config.progress_callback = Some(cb);
        self
    }

    /// Build the configuration, validating constraints.
    pub fn build(self) -> Result<PipelineConfig, TarifarioError> {
        let c = &self.config;
        if c.dpi < 72 || c.dpi > 600 {
            return Err(TarifarioError::InvalidConfig(format!(
                "DPI must be 72–600, got {}",
                c.dpi
            )));
        }
        for (name, n) in [
            ("render_workers", c.render_workers),
            ("ocr_workers", c.ocr_workers),
            ("normalize_workers", c.normalize_workers),
            ("batch_size", c.batch_size),
        ] {
            if n == 0 {
                return Err(TarifarioError::InvalidConfig(format!(
                    "{name} must be ≥ 1"
                )));
            }
        }
        if c.max_attempts == 0 || c.max_attempts > 10 {
            return Err(TarifarioError::InvalidConfig(format!(
                "max_attempts must be 1–10, got {}",
                c.max_attempts
            )));
        }
        if c.http_attempts == 0 {
            return Err(TarifarioError::InvalidConfig(
                "http_attempts must be ≥ 1".into(),
            ));
        }
        Ok(self.config)
    }
}

// ── Data layout ──────────────────────────────────────────────────────────

/// Stage directories under one data root.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DataLayout {
    root: PathBuf,
}

impl DataLayout {
    pub fn new(root: impl AsRef<Path>) -> Self {
        Self {
            root: root.as_ref().to_path_buf(),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Downloaded PDFs: `raw/<bank>/<doc>.pdf`.
    pub fn raw_dir(&self) -> PathBuf {
        self.root.join("raw")
    }

    /// Page images awaiting OCR: `images/<bank>/<doc>/pagina_NNN.png`.
    pub fn images_dir(&self) -> PathBuf {
        self.root.join("images")
    }

    /// Page images of fully OCR'd documents.
    pub fn images_processed_dir(&self) -> PathBuf {
        self.root.join("images_processed")
    }

    /// Per-document markdown: `ocr/<bank>/<doc>.md`.
    pub fn ocr_dir(&self) -> PathBuf {
        self.root.join("ocr")
    }

    /// Per-page checkpoints: `ocr/.temp/<bank>/<doc>/page_NNNN.md`.
    pub fn ocr_temp_dir(&self) -> PathBuf {
        self.ocr_dir().join(".temp")
    }

    pub fn batches_dir(&self) -> PathBuf {
        self.root.join("batches_combinados")
    }

    pub fn normalized_dir(&self) -> PathBuf {
        self.root.join("normalized_json")
    }

    pub fn output_dir(&self) -> PathBuf {
        self.root.join("output")
    }

    /// Run reports and the OCR progress record.
    pub fn reports_dir(&self) -> PathBuf {
        self.root.join("processed")
    }

    pub fn scraped_urls_file(&self) -> PathBuf {
        self.root.join("urls_scrapeadas.json")
    }

    pub fn ocr_progress_file(&self) -> PathBuf {
        self.reports_dir().join("progress_ocr_paginas.json")
    }

    pub fn full_csv(&self) -> PathBuf {
        self.output_dir().join("tarifarios_bancarios.csv")
    }

    pub fn exam_csv(&self) -> PathBuf {
        self.output_dir()
            .join("EXAMEN_PARCIAL_Tarifarios_Bancarios_Grupo2.csv")
    }
}

// ── .env loading ─────────────────────────────────────────────────────────

/// Load `KEY=VALUE` pairs from an env file into the process environment.
///
/// Variables already present in the environment are left untouched, so shell
/// exports always win over the file. A missing file is not an error.
/// Returns how many variables were set.
pub fn load_env_file(path: impl AsRef<Path>) -> Result<usize, TarifarioError> {
    let path = path.as_ref();
    let text = match std::fs::read_to_string(path) {
        Ok(t) => t,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(0),
        Err(e) => return Err(TarifarioError::read(path, e)),
    };

    let mut set = 0;
    for (key, value) in parse_env_lines(&text) {
        if std::env::var_os(&key).is_none() {
            std::env::set_var(&key, value);
            set += 1;
        }
    }
    debug!("Loaded {} variables from {}", set, path.display());
    Ok(set)
}

fn parse_env_lines(text: &str) -> Vec<(String, String)> {
    text.lines()
        .map(str::trim)
        .filter(|l| !l.is_empty() && !l.starts_with('#'))
        .filter_map(|l| {
            let l = l.strip_prefix("export ").unwrap_or(l);
            let (k, v) = l.split_once('=')?;
            let k = k.trim();
            if k.is_empty() {
                return None;
            }
            let v = v.trim();
            let v = v
                .strip_prefix('"')
                .and_then(|s| s.strip_suffix('"'))
                .or_else(|| v.strip_prefix('\'').and_then(|s| s.strip_suffix('\'')))
                .unwrap_or(v);
            Some((k.to_string(), v.to_string()))
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_follow_pipeline_settings() {
        let c = PipelineConfig::default();
        assert_eq!(c.dpi, 300);
        assert_eq!(c.batch_size, 10);
        assert_eq!(c.max_attempts, 3);
        assert_eq!(c.rate_limit_backoff_ms, 10_000);
        assert_eq!(c.ocr_max_tokens, 8192);
        assert_eq!(c.normalize_max_tokens, 16384);
        assert_eq!(c.model_or_default(), DEFAULT_MODEL);
    }

    #[test]
    fn build_rejects_zero_batch_size() {
        let err = PipelineConfig::builder().batch_size(0).build().unwrap_err();
        assert!(err.to_string().contains("batch_size"));
    }

    #[test]
    fn build_rejects_out_of_range_dpi() {
        assert!(PipelineConfig::builder().dpi(50).build().is_err());
        assert!(PipelineConfig::builder().dpi(300).build().is_ok());
    }

    #[test]
    fn debug_hides_provider() {
        let dbg = format!("{:?}", PipelineConfig::default());
        assert!(dbg.contains("PipelineConfig"));
        assert!(!dbg.contains("progress_callback"));
    }

    #[test]
    fn layout_paths() {
        let l = DataLayout::new("/d");
        assert_eq!(l.ocr_temp_dir(), PathBuf::from("/d/ocr/.temp"));
        assert_eq!(
            l.ocr_progress_file(),
            PathBuf::from("/d/processed/progress_ocr_paginas.json")
        );
        assert_eq!(
            l.full_csv(),
            PathBuf::from("/d/output/tarifarios_bancarios.csv")
        );
    }

    #[test]
    fn env_lines_parse_quotes_and_comments() {
        let parsed = parse_env_lines(
            "# comment\nGEMINI_API_KEY=\"abc\"\nexport MYSQL_PORT=3306\n\nBAD\nNAME='x y'\n",
        );
        assert_eq!(
            parsed,
            vec![
                ("GEMINI_API_KEY".to_string(), "abc".to_string()),
                ("MYSQL_PORT".to_string(), "3306".to_string()),
                ("NAME".to_string(), "x y".to_string()),
            ]
        );
    }

    #[test]
    fn missing_env_file_is_ok() {
        let dir = tempfile::tempdir().unwrap();
        assert_eq!(load_env_file(dir.path().join("nope.env")).unwrap(), 0);
    }
}
