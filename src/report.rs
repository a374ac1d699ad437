//! JSON run reports and atomic file writes.
//!
//! Every stage ends by writing one report under `data/processed/`. Reports
//! and stage outputs are written to a sibling temp file first and renamed
//! into place, so a crash mid-write never leaves a truncated file that a
//! later run would mistake for finished work.

use crate::error::TarifarioError;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::io::Write;
use std::path::{Path, PathBuf};
use tracing::info;

/// Write `bytes` to `path` via a temp file in the same directory.
///
/// Parent directories are created as needed.
pub fn write_atomic(path: &Path, bytes: &[u8]) -> Result<(), TarifarioError> {
    let dir = path.parent().unwrap_or_else(|| Path::new("."));
    std::fs::create_dir_all(dir).map_err(|e| TarifarioError::write(dir, e))?;

    let mut tmp =
        tempfile::NamedTempFile::new_in(dir).map_err(|e| TarifarioError::write(path, e))?;
    tmp.write_all(bytes)
        .map_err(|e| TarifarioError::write(path, e))?;
    tmp.persist(path)
        .map_err(|e| TarifarioError::write(path, e.error))?;
    Ok(())
}

/// Serialize `value` as pretty JSON and write it atomically.
pub fn write_json<T: Serialize + ?Sized>(path: &Path, value: &T) -> Result<(), TarifarioError> {
    let json = serde_json::to_vec_pretty(value).map_err(|e| TarifarioError::Json {
        path: path.to_path_buf(),
        detail: e.to_string(),
    })?;
    write_atomic(path, &json)
}

/// Envelope shared by all stage reports.
#[derive(Debug, Serialize)]
pub struct RunReport<S: Serialize, R: Serialize> {
    #[serde(rename = "etapa")]
    pub stage: &'static str,
    #[serde(rename = "fecha")]
    pub generated_at: DateTime<Utc>,
    #[serde(rename = "resumen")]
    pub summary: S,
    #[serde(rename = "resultados")]
    pub results: Vec<R>,
}

impl<S: Serialize, R: Serialize> RunReport<S, R> {
    pub fn new(stage: &'static str, summary: S, results: Vec<R>) -> Self {
        Self {
            stage,
            generated_at: Utc::now(),
            summary,
            results,
        }
    }

    /// Write the report as `<reports_dir>/<file_name>` and return its path.
    pub fn save(&self, reports_dir: &Path, file_name: &str) -> Result<PathBuf, TarifarioError> {
        let path = reports_dir.join(file_name);
        write_json(&path, self)?;
        info!("Report saved: {}", path.display());
        Ok(path)
    }
}
