//! The OCR progress record and its single owner, [`ProgressStore`].
//!
//! The record is the only state shared between concurrent document tasks.
//! Every mutation goes through the store's mutex, and [`ProgressStore::save`]
//! rewrites the whole file atomically, so a reader never sees a partial
//! record.
//!
//! "Processed" is recorded only after the document's `.md` is on disk. A
//! crash between the two steps means the document is redone on the next run,
//! which is harmless because outputs are overwritten.

use crate::error::TarifarioError;
use crate::report::write_json;
use chrono::Local;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard};
use tracing::debug;

/// One failed document as stored in the record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FailedPdf {
    pub pdf: String,
    pub error: Option<String>,
}

/// On-disk shape of `progress_ocr_paginas.json`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ProgressRecord {
    #[serde(default)]
    pub processed_pdfs: Vec<String>,
    #[serde(default)]
    pub failed_pdfs: Vec<FailedPdf>,
    /// Cumulative processing time across sessions, in seconds.
    #[serde(default)]
    pub total_time: f64,
    #[serde(default)]
    pub last_updated: Option<String>,
}

/// Mutex-guarded owner of the progress record.
#[derive(Debug)]
pub struct ProgressStore {
    path: PathBuf,
    record: Mutex<ProgressRecord>,
}

impl ProgressStore {
    /// Load the record at `path`, or start empty when the file is absent.
    pub fn load(path: impl Into<PathBuf>) -> Result<Self, TarifarioError> {
        let path = path.into();
        let record = match std::fs::read_to_string(&path) {
            Ok(text) => serde_json::from_str(&text).map_err(|e| TarifarioError::Json {
                path: path.clone(),
                detail: e.to_string(),
            })?,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => ProgressRecord::default(),
            Err(e) => return Err(TarifarioError::read(&path, e)),
        };
        Ok(Self {
            path,
            record: Mutex::new(record),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn lock(&self) -> Result<MutexGuard<'_, ProgressRecord>, TarifarioError> {
        self.record
            .lock()
            .map_err(|_| TarifarioError::Internal("progress record lock poisoned".into()))
    }

    pub fn is_processed(&self, key: &str) -> bool {
        self.lock()
            .map(|r| r.processed_pdfs.iter().any(|k| k == key))
            .unwrap_or(false)
    }

    /// Mark `key` processed and clear any earlier failure for it.
    pub fn record_success(&self, key: &str) -> Result<(), TarifarioError> {
        let mut r = self.lock()?;
        r.failed_pdfs.retain(|f| f.pdf != key);
        if !r.processed_pdfs.iter().any(|k| k == key) {
            r.processed_pdfs.push(key.to_string());
        }
        Ok(())
    }

    /// Record (or replace) the failure entry for `key`.
    pub fn record_failure(&self, key: &str, error: Option<String>) -> Result<(), TarifarioError> {
        let mut r = self.lock()?;
        r.failed_pdfs.retain(|f| f.pdf != key);
        r.failed_pdfs.push(FailedPdf {
            pdf: key.to_string(),
            error,
        });
        Ok(())
    }

    /// Forget everything about `key`.
    pub fn remove(&self, key: &str) -> Result<(), TarifarioError> {
        let mut r = self.lock()?;
        r.processed_pdfs.retain(|k| k != key);
        r.failed_pdfs.retain(|f| f.pdf != key);
        Ok(())
    }

    pub fn add_time(&self, seconds: f64) -> Result<(), TarifarioError> {
        self.lock()?.total_time += seconds;
        Ok(())
    }

    /// `(processed, failed)` counts.
    pub fn counts(&self) -> (usize, usize) {
        self.lock()
            .map(|r| (r.processed_pdfs.len(), r.failed_pdfs.len()))
            .unwrap_or((0, 0))
    }

    pub fn snapshot(&self) -> Result<ProgressRecord, TarifarioError> {
        Ok(self.lock()?.clone())
    }

    /// Stamp `last_updated` and rewrite the file.
    pub fn save(&self) -> Result<(), TarifarioError> {
        let snapshot = {
            let mut r = self.lock()?;
            r.last_updated = Some(Local::now().to_rfc3339());
            r.clone()
        };
        write_json(&self.path, &snapshot)?;
        debug!(
            "Progress saved: {} processed, {} failed",
            snapshot.processed_pdfs.len(),
            snapshot.failed_pdfs.len()
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[test]
    fn missing_file_starts_empty() {
        let dir = tempfile::tempdir().unwrap();
        let store = ProgressStore::load(dir.path().join("p.json")).unwrap();
        assert_eq!(store.counts(), (0, 0));
    }

    #[test]
    fn success_clears_previous_failure() {
        let dir = tempfile::tempdir().unwrap();
        let store = ProgressStore::load(dir.path().join("p.json")).unwrap();
        store
            .record_failure("BCP/a", Some("1 páginas con error de 3 total".into()))
            .unwrap();
        store.record_failure("BCP/a", Some("again".into())).unwrap();
        assert_eq!(store.counts(), (0, 1));
        store.record_success("BCP/a").unwrap();
        store.record_success("BCP/a").unwrap();
        assert_eq!(store.counts(), (1, 0));
        assert!(store.is_processed("BCP/a"));
    }

    #[test]
    fn save_and_reload() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("processed/p.json");
        let store = ProgressStore::load(&path).unwrap();
        store.record_success("BBVA_Continental/x").unwrap();
        store.add_time(12.5).unwrap();
        store.save().unwrap();

        let again = ProgressStore::load(&path).unwrap();
        let rec = again.snapshot().unwrap();
        assert_eq!(rec.processed_pdfs, vec!["BBVA_Continental/x"]);
        assert_eq!(rec.total_time, 12.5);
        assert!(rec.last_updated.is_some());
    }

    #[test]
    fn reads_record_without_optional_fields() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("p.json");
        std::fs::write(&path, r#"{"processed_pdfs":["BCP/a"],"failed_pdfs":[]}"#).unwrap();
        assert!(ProgressStore::load(&path).unwrap().is_processed("BCP/a"));
    }

    #[test]
    fn concurrent_updates_are_serialised() {
        let dir = tempfile::tempdir().unwrap();
        let store = Arc::new(ProgressStore::load(dir.path().join("p.json")).unwrap());
        let handles: Vec<_> = (0..8)
            .map(|i| {
                let store = Arc::clone(&store);
                std::thread::spawn(move || store.record_success(&format!("BCP/doc{i}")).unwrap())
            })
            .collect();
        for h in handles {
            h.join().unwrap();
        }
        assert_eq!(store.counts(), (8, 0));
    }
}
