//! Stage 6: turn each batch into structured JSON with one model call.
//!
//! `batches_combinados/<bank>/batch_NNN.txt` → `normalized_json/<bank>/batch_NNN.json`
//!
//! Batches are independent, so they run on a bounded pool and a failure
//! only costs its own batch. Each worker pauses after its call completes,
//! which keeps the request rate under the free-tier quota even when several
//! batches finish together. A failed batch is re-run on its own with
//! [`normalize_one`] (`tarifarios normalize --only BCP/batch_002`).

pub mod payload;
pub mod schema;

pub use payload::{accept_payload, AcceptedPayload};
pub use schema::BatchOutput;

use crate::batch::parse_batch;
use crate::config::{DataLayout, PipelineConfig};
use crate::error::{PageError, TarifarioError};
use crate::pipeline::llm::{complete_with_retry, LlmClient, LlmRequest, RetryPolicy};
use crate::prompts::normalization_request;
use crate::report::{write_json, RunReport};
use futures::stream::{self, StreamExt};
use serde::Serialize;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};
use tracing::{info, warn};

/// One batch file to normalize.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
pub struct BatchJob {
    pub bank: String,
    pub path: PathBuf,
}

impl BatchJob {
    fn file_name(&self) -> String {
        self.path
            .file_name()
            .map(|s| s.to_string_lossy().to_string())
            .unwrap_or_default()
    }

    /// `bank/batch_NNN.txt`, as shown in logs and the report.
    pub fn key(&self) -> String {
        format!("{}/{}", self.bank, self.file_name())
    }

    pub fn output_path(&self, layout: &DataLayout) -> PathBuf {
        let stem = self
            .path
            .file_stem()
            .map(|s| s.to_string_lossy().to_string())
            .unwrap_or_default();
        layout.normalized_dir().join(&self.bank).join(format!("{stem}.json"))
    }

    /// Resolve `bank/batch_NNN` (with or without `.txt`) under `batches_dir`.
    pub fn from_key(batches_dir: &Path, key: &str) -> Result<Self, TarifarioError> {
        let (bank, batch) = key
            .trim()
            .split_once('/')
            .filter(|(b, n)| !b.is_empty() && !n.is_empty())
            .ok_or_else(|| TarifarioError::InvalidKey {
                key: key.to_string(),
            })?;
        let file = if batch.ends_with(".txt") {
            batch.to_string()
        } else {
            format!("{batch}.txt")
        };
        let path = batches_dir.join(bank).join(file);
        if !path.is_file() {
            return Err(TarifarioError::InputDirMissing {
                path,
                previous: "combine".into(),
            });
        }
        Ok(Self {
            bank: bank.to_string(),
            path,
        })
    }
}

/// Knobs for one normalization call.
#[derive(Debug, Clone)]
pub struct NormalizeSettings {
    pub temperature: f32,
    pub max_tokens: usize,
    pub retry: RetryPolicy,
    pub delay: Duration,
}

impl NormalizeSettings {
    pub fn from_config(config: &PipelineConfig) -> Self {
        Self {
            temperature: config.normalize_temperature,
            max_tokens: config.normalize_max_tokens,
            retry: RetryPolicy::from_config(config),
            delay: Duration::from_millis(config.normalize_delay_ms),
        }
    }
}

/// Outcome for one batch, as written to the report.
#[derive(Debug, Clone, Default, Serialize)]
pub struct NormalizeResult {
    pub batch: String,
    #[serde(rename = "exito")]
    pub success: bool,
    #[serde(rename = "omitido")]
    pub skipped: bool,
    #[serde(rename = "documentos")]
    pub documents: usize,
    pub items: u64,
    #[serde(rename = "tiempo")]
    pub seconds: f64,
    pub error: Option<String>,
    #[serde(rename = "advertencia")]
    pub warning: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, PartialEq)]
pub struct NormalizeSummary {
    pub total_batches: usize,
    pub exitosos: usize,
    pub fallidos: usize,
    pub omitidos: usize,
    pub total_documentos: usize,
    pub total_items: u64,
}

/// Every `batch_*.txt` under `batches_combinados/<bank>/`, sorted.
pub fn discover_batches(layout: &DataLayout) -> Result<Vec<BatchJob>, TarifarioError> {
    let dir = layout.batches_dir();
    if !dir.is_dir() {
        return Err(TarifarioError::InputDirMissing {
            path: dir,
            previous: "combine".into(),
        });
    }
    let mut jobs = Vec::new();
    for bank in std::fs::read_dir(&dir).map_err(|e| TarifarioError::read(&dir, e))?.flatten() {
        let bank_path = bank.path();
        if !bank_path.is_dir() {
            continue;
        }
        let bank_name = bank.file_name().to_string_lossy().to_string();
        for f in std::fs::read_dir(&bank_path)
            .map_err(|e| TarifarioError::read(&bank_path, e))?
            .flatten()
        {
            let name = f.file_name().to_string_lossy().to_string();
            if name.starts_with("batch_") && name.ends_with(".txt") {
                jobs.push(BatchJob {
                    bank: bank_name.clone(),
                    path: f.path(),
                });
            }
        }
    }
    jobs.sort();
    Ok(jobs)
}

/// Send one batch and write its JSON. Never fails: errors land in the result.
pub async fn normalize_batch<C: LlmClient>(
    client: &C,
    layout: &DataLayout,
    job: &BatchJob,
    settings: &NormalizeSettings,
) -> NormalizeResult {
    let start = Instant::now();
    let key = job.key();
    let mut result = NormalizeResult {
        batch: key.clone(),
        ..Default::default()
    };

    let outcome: Result<AcceptedPayload, PageError> = async {
        let content = std::fs::read_to_string(&job.path).map_err(|e| PageError::BatchFailed {
            batch: key.clone(),
            detail: format!("{}: {e}", job.path.display()),
        })?;
        let expected = parse_batch(&content).len();
        info!("{}: {} documents, {} chars", key, expected, content.len());

        let request = LlmRequest {
            system: None,
            prompt: normalization_request(&content),
            images: Vec::new(),
            temperature: settings.temperature,
            max_tokens: settings.max_tokens,
        };
        let reply = complete_with_retry(client, request, settings.retry, &key)
            .await
            .map_err(|f| PageError::BatchFailed {
                batch: key.clone(),
                detail: f.error.to_string(),
            })?;

        let accepted = accept_payload(&reply.content, expected).map_err(|reason| {
            PageError::PayloadRejected {
                batch: key.clone(),
                reason,
            }
        })?;
        write_json(&job.output_path(layout), &accepted.json).map_err(|e| {
            PageError::BatchFailed {
                batch: key.clone(),
                detail: e.to_string(),
            }
        })?;
        Ok(accepted)
    }
    .await;

    match outcome {
        Ok(accepted) => {
            if let Some(ref w) = accepted.warning {
                warn!("{}: {}", key, w);
            }
            info!("{}: {} documents, {} items", key, accepted.documents, accepted.items);
            result.success = true;
            result.documents = accepted.documents;
            result.items = accepted.items;
            result.warning = accepted.warning;
        }
        Err(e) => {
            warn!("{}", e);
            result.error = Some(e.to_string());
        }
    }
    result.seconds = start.elapsed().as_secs_f64();
    result
}

/// Normalize every batch and write `reporte_normalizacion.json`.
///
/// Batches whose JSON already exists are skipped unless
/// [`PipelineConfig::overwrite`] is set.
pub async fn normalize_all<C: LlmClient>(
    config: &PipelineConfig,
    client: &C,
) -> Result<NormalizeSummary, TarifarioError> {
    let layout = config.layout();
    let jobs = discover_batches(&layout)?;
    let settings = NormalizeSettings::from_config(config);
    let cb = config.progress_callback.as_ref();

    let (pending, done): (Vec<_>, Vec<_>) = jobs
        .into_iter()
        .partition(|j| config.overwrite || !j.output_path(&layout).exists());
    info!(
        "Normalizing {} batches ({} already done)",
        pending.len(),
        done.len()
    );
    if let Some(cb) = cb {
        cb.on_stage_start("normalize", pending.len());
    }

    let mut results: Vec<NormalizeResult> = done
        .iter()
        .map(|j| NormalizeResult {
            batch: j.key(),
            success: true,
            skipped: true,
            ..Default::default()
        })
        .collect();

    let fresh: Vec<NormalizeResult> = stream::iter(pending.iter().map(|job| {
        let layout = &layout;
        let settings = &settings;
        async move {
            if let Some(cb) = cb {
                cb.on_item_start(&job.key());
            }
            let result = normalize_batch(client, layout, job, settings).await;
            if let Some(cb) = cb {
                match &result.error {
                    None => cb.on_item_complete(
                        &result.batch,
                        &format!("{} docs, {} items", result.documents, result.items),
                    ),
                    Some(e) => cb.on_item_error(&result.batch, e),
                }
            }
            if !settings.delay.is_zero() {
                tokio::time::sleep(settings.delay).await;
            }
            result
        }
    }))
    .buffer_unordered(config.normalize_workers.max(1))
    .collect()
    .await;

    let summary = NormalizeSummary {
        total_batches: results.len() + fresh.len(),
        exitosos: results.len() + fresh.iter().filter(|r| r.success).count(),
        fallidos: fresh.iter().filter(|r| !r.success).count(),
        omitidos: results.len(),
        total_documentos: fresh.iter().map(|r| r.documents).sum(),
        total_items: fresh.iter().map(|r| r.items).sum(),
    };
    for r in fresh.iter().filter(|r| !r.success) {
        warn!("Failed batch {}: {}", r.batch, r.error.as_deref().unwrap_or("unknown"));
    }
    if let Some(cb) = cb {
        cb.on_stage_complete("normalize", pending.len(), summary.exitosos - summary.omitidos);
    }
    results.extend(fresh);

    RunReport::new("normalizacion", summary.clone(), results)
        .save(&layout.reports_dir(), "reporte_normalizacion.json")?;
    Ok(summary)
}

/// Re-run a single batch, overwriting its JSON.
pub async fn normalize_one<C: LlmClient>(
    config: &PipelineConfig,
    client: &C,
    key: &str,
) -> Result<NormalizeResult, TarifarioError> {
    let layout = config.layout();
    let job = BatchJob::from_key(&layout.batches_dir(), key)?;
    let settings = NormalizeSettings::from_config(config);
    Ok(normalize_batch(client, &layout, &job, &settings).await)
}
