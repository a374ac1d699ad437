//! Stage 5: combine per-document Markdown into fixed-size batches.
//!
//! `ocr/<bank>/*.md` → `batches_combinados/<bank>/batch_NNN.txt`
//!
//! A batch is a plain-text file of delimited records; the normalizer sends
//! one batch per model call, so the record delimiters are what lets the
//! model keep documents apart. Files are shuffled per bank before slicing,
//! which spreads the long documents of a bank over its batches instead of
//! letting alphabetical neighbours (often one product family) pile up in a
//! single oversized request.

use crate::config::PipelineConfig;
use crate::error::TarifarioError;
use crate::report::write_atomic;
use rand::seq::SliceRandom;
use rand::Rng;
use serde::Serialize;
use std::collections::BTreeMap;
use std::fmt::Write as _;
use std::path::{Path, PathBuf};
use tracing::{info, warn};

pub const DOCUMENT_START: &str = "---DOCUMENT_START---";
pub const CONTENT_START: &str = "---CONTENT_START---";
pub const CONTENT_END: &str = "---CONTENT_END---";

/// One document inside a batch file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BatchRecord {
    /// 1-based position and batch length, as in `FILE_NUMBER: 3/10`.
    pub number: usize,
    pub of: usize,
    pub bank: String,
    pub product: String,
    pub file_name: String,
    pub file_path: String,
    pub content: String,
}

impl BatchRecord {
    fn write_to(&self, out: &mut String) {
        // Writing into a String cannot fail.
        let _ = write!(
            out,
            "{DOCUMENT_START}\n\
             FILE_NUMBER: {}/{}\n\
             BANCO: {}\n\
             PRODUCTO: {}\n\
             FILENAME: {}\n\
             FILEPATH: {}\n\
             {CONTENT_START}\n\
             {}\n\
             {CONTENT_END}\n\n",
            self.number,
            self.of,
            self.bank,
            self.product,
            self.file_name,
            self.file_path,
            self.content
        );
    }
}

/// Render records in batch-file format.
pub fn render_batch(records: &[BatchRecord]) -> String {
    let mut out = String::new();
    for r in records {
        r.write_to(&mut out);
    }
    out
}

/// Recover the records of a batch file.
///
/// Header lines may come in any order; unknown headers are ignored. A record
/// without `---CONTENT_END---` runs to the end of the text.
pub fn parse_batch(text: &str) -> Vec<BatchRecord> {
    let mut records = Vec::new();
    for chunk in text.split(DOCUMENT_START).skip(1) {
        let (header, body) = match chunk.split_once(CONTENT_START) {
            Some(parts) => parts,
            None => continue,
        };
        let mut record = BatchRecord {
            number: 0,
            of: 0,
            bank: String::new(),
            product: String::new(),
            file_name: String::new(),
            file_path: String::new(),
            content: String::new(),
        };
        for line in header.lines() {
            let Some((key, value)) = line.split_once(':') else {
                continue;
            };
            let value = value.trim().to_string();
            match key.trim() {
                "FILE_NUMBER" => {
                    if let Some((n, of)) = value.split_once('/') {
                        record.number = n.trim().parse().unwrap_or(0);
                        record.of = of.trim().parse().unwrap_or(0);
                    }
                }
                "BANCO" => record.bank = value,
                "PRODUCTO" => record.product = value,
                "FILENAME" => record.file_name = value,
                "FILEPATH" => record.file_path = value,
                _ => {}
            }
        }
        let body = body.strip_prefix('\n').unwrap_or(body);
        let content = match body.find(CONTENT_END) {
            Some(end) => &body[..end],
            None => body,
        };
        record.content = content.strip_suffix('\n').unwrap_or(content).to_string();
        records.push(record);
    }
    records
}

/// One written batch, as listed in the manifest.
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct BatchInfo {
    /// Global batch number across all banks.
    #[serde(rename = "numero")]
    pub number: usize,
    #[serde(rename = "banco")]
    pub bank: String,
    /// `bank/batch_NNN.txt`.
    #[serde(rename = "archivo")]
    pub file: String,
    pub path: PathBuf,
    #[serde(rename = "archivos")]
    pub files: Vec<String>,
    #[serde(rename = "bytes")]
    pub size_bytes: u64,
    #[serde(rename = "tokens_estimados")]
    pub estimated_tokens: u64,
}

/// Markdown files per bank directory, hidden directories skipped.
fn markdown_by_bank(ocr_dir: &Path) -> Result<BTreeMap<String, Vec<PathBuf>>, TarifarioError> {
    let mut by_bank = BTreeMap::new();
    let entries = std::fs::read_dir(ocr_dir).map_err(|e| TarifarioError::read(ocr_dir, e))?;
    for entry in entries.flatten() {
        let name = entry.file_name().to_string_lossy().to_string();
        let path = entry.path();
        if !path.is_dir() || name.starts_with('.') {
            continue;
        }
        let mut files: Vec<PathBuf> = std::fs::read_dir(&path)
            .map_err(|e| TarifarioError::read(&path, e))?
            .flatten()
            .map(|e| e.path())
            .filter(|p| p.is_file() && p.extension().is_some_and(|x| x == "md"))
            .collect();
        files.sort();
        if !files.is_empty() {
            by_bank.insert(name, files);
        }
    }
    Ok(by_bank)
}

fn record_for(path: &Path, bank: &str, number: usize, of: usize) -> BatchRecord {
    let file_name = path
        .file_name()
        .map(|s| s.to_string_lossy().to_string())
        .unwrap_or_default();
    let product = path
        .file_stem()
        .map(|s| s.to_string_lossy().to_string())
        .unwrap_or_default();
    let content = std::fs::read_to_string(path).unwrap_or_else(|e| {
        warn!("Could not read {}: {}", path.display(), e);
        format!("[ERROR: No se pudo leer el archivo - {e}]")
    });
    BatchRecord {
        number,
        of,
        bank: bank.to_string(),
        product,
        file_path: format!("{bank}/{file_name}"),
        file_name,
        content,
    }
}

/// Remove `batch_*.txt` left by an earlier run with more documents.
fn clear_old_batches(bank_dir: &Path) -> Result<(), TarifarioError> {
    let Ok(entries) = std::fs::read_dir(bank_dir) else {
        return Ok(());
    };
    for entry in entries.flatten() {
        let name = entry.file_name().to_string_lossy().to_string();
        if name.starts_with("batch_") && name.ends_with(".txt") {
            std::fs::remove_file(entry.path()).map_err(|e| TarifarioError::write(entry.path(), e))?;
        }
    }
    Ok(())
}

/// Shuffle, slice and write every bank's documents; then write `manifest.txt`.
pub fn combine_batches<R: Rng + ?Sized>(
    config: &PipelineConfig,
    rng: &mut R,
) -> Result<Vec<BatchInfo>, TarifarioError> {
    let layout = config.layout();
    let ocr_dir = layout.ocr_dir();
    if !ocr_dir.is_dir() {
        return Err(TarifarioError::InputDirMissing {
            path: ocr_dir,
            previous: "ocr".into(),
        });
    }
    let size = config.batch_size.max(1);
    let by_bank = markdown_by_bank(&ocr_dir)?;
    let total_files: usize = by_bank.values().map(Vec::len).sum();
    info!(
        "Combining {} markdown files from {} banks into batches of {}",
        total_files,
        by_bank.len(),
        size
    );

    let batches_dir = layout.batches_dir();
    let mut written = Vec::new();
    for (bank, mut files) in by_bank {
        files.shuffle(rng);
        let bank_dir = batches_dir.join(&bank);
        clear_old_batches(&bank_dir)?;

        for (i, chunk) in files.chunks(size).enumerate() {
            let records: Vec<BatchRecord> = chunk
                .iter()
                .enumerate()
                .map(|(j, path)| record_for(path, &bank, j + 1, chunk.len()))
                .collect();
            let text = render_batch(&records);
            let file = format!("batch_{:03}.txt", i + 1);
            let path = bank_dir.join(&file);
            write_atomic(&path, text.as_bytes())?;

            let size_bytes = text.len() as u64;
            info!("{}/{}: {} documents, {} KB", bank, file, chunk.len(), size_bytes / 1024);
            written.push(BatchInfo {
                number: written.len() + 1,
                bank: bank.clone(),
                file: format!("{bank}/{file}"),
                path,
                files: records.iter().map(|r| r.file_path.clone()).collect(),
                size_bytes,
                estimated_tokens: size_bytes / 4,
            });
        }
    }

    let manifest = render_manifest(&written, size);
    write_atomic(&batches_dir.join("manifest.txt"), manifest.as_bytes())?;
    info!("{} batches written to {}", written.len(), batches_dir.display());
    Ok(written)
}

/// Human-readable listing of every batch.
pub fn render_manifest(batches: &[BatchInfo], batch_size: usize) -> String {
    let rule = "=".repeat(70);
    let mut out = String::new();
    let total_files: usize = batches.iter().map(|b| b.files.len()).sum();

    let _ = writeln!(out, "{rule}\nMANIFEST DE BATCHES COMBINADOS POR BANCO\n{rule}\n");
    let _ = writeln!(out, "Total de archivos .md procesados: {total_files}");
    let _ = writeln!(out, "Total de batches creados: {}", batches.len());
    let _ = writeln!(out, "Archivos por batch: {batch_size}\n");

    let mut per_bank: BTreeMap<&str, (usize, usize)> = BTreeMap::new();
    for b in batches {
        let e = per_bank.entry(b.bank.as_str()).or_default();
        e.0 += 1;
        e.1 += b.files.len();
    }
    let _ = writeln!(out, "{rule}\nRESUMEN POR BANCO:\n{rule}\n");
    for (bank, (n, files)) in per_bank {
        let _ = writeln!(out, "{bank}:\n  Batches: {n}\n  Archivos: {files}\n");
    }

    let _ = writeln!(out, "{rule}\nDETALLE POR BATCH:\n{rule}\n");
    for b in batches {
        let _ = writeln!(out, "Batch {:03} [{}]:", b.number, b.bank);
        let _ = writeln!(out, "  Archivo: {}", b.file);
        let _ = writeln!(out, "  Archivos incluidos: {}", b.files.len());
        let _ = writeln!(out, "  Tamaño: {:.2} KB", b.size_bytes as f64 / 1024.0);
        let _ = writeln!(out, "  Tokens estimados: {}", b.estimated_tokens);
        let _ = writeln!(out, "  Archivos:");
        for f in &b.files {
            let _ = writeln!(out, "    - {f}");
        }
        out.push('\n');
    }
    out
}
