//! Stage 7: flatten normalized JSON into CSV.
//!
//! Two projections of the same items, both regenerated from scratch on each
//! run:
//!
//! * [`full`]: one column per value (`output/tarifarios_bancarios.csv`),
//!   the file the viewer serves.
//! * [`exam`]: six columns with the values folded into one readable `Tasa`
//!   cell (`output/EXAMEN_PARCIAL_Tarifarios_Bancarios_Grupo2.csv`).
//!
//! Header rows (`es_encabezado`) are section titles, not tariffs, and are
//! dropped from both. A JSON file that does not deserialize is logged and
//! skipped; it never blocks the other files.

pub mod exam;
pub mod full;

use crate::config::{DataLayout, PipelineConfig};
use crate::error::TarifarioError;
use crate::normalize::schema::{BatchOutput, Documento, Item};
use crate::report::{write_atomic, RunReport};
use serde::Serialize;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use tracing::{info, warn};

/// Excel needs the BOM to open UTF-8 CSV with accents intact.
pub const UTF8_BOM: &[u8] = b"\xEF\xBB\xBF";

/// Format a value the way the tables were read: `15.0`, `2.5`, `0.125`.
///
/// Whole numbers keep one decimal so `15` and `15.0` cannot be told apart
/// from a text cell.
pub fn format_number(v: f64) -> String {
    if v.fract() == 0.0 && v.abs() < 1e15 {
        format!("{v:.1}")
    } else {
        format!("{v}")
    }
}

pub(crate) fn opt_number(v: Option<f64>) -> String {
    v.map(format_number).unwrap_or_default()
}

/// Non-empty trimmed text.
pub(crate) fn non_empty(s: &Option<String>) -> Option<&str> {
    s.as_deref().map(str::trim).filter(|s| !s.is_empty())
}

/// One non-header item with the document it came from.
#[derive(Debug, Clone, Copy)]
pub struct ItemRef<'a> {
    /// Bank directory name.
    pub bank: &'a str,
    pub document: &'a Documento,
    pub item: &'a Item,
}

/// A parsed `normalized_json/<bank>/*.json` file.
#[derive(Debug)]
pub struct LoadedBatch {
    pub bank: String,
    pub path: PathBuf,
    pub output: BatchOutput,
}

impl LoadedBatch {
    pub fn items(&self) -> impl Iterator<Item = ItemRef<'_>> {
        self.output.documentos.iter().flat_map(move |document| {
            document
                .items
                .iter()
                .filter(|item| !item.is_header())
                .map(move |item| ItemRef {
                    bank: &self.bank,
                    document,
                    item,
                })
        })
    }
}

/// Parse every normalized file, bank directories and files both sorted.
///
/// Returns the parsed batches and the number of files skipped.
pub fn load_normalized(dir: &Path) -> Result<(Vec<LoadedBatch>, usize), TarifarioError> {
    if !dir.is_dir() {
        return Err(TarifarioError::InputDirMissing {
            path: dir.to_path_buf(),
            previous: "normalize".into(),
        });
    }
    let mut banks: Vec<PathBuf> = std::fs::read_dir(dir)
        .map_err(|e| TarifarioError::read(dir, e))?
        .flatten()
        .map(|e| e.path())
        .filter(|p| p.is_dir())
        .collect();
    banks.sort();

    let mut loaded = Vec::new();
    let mut skipped = 0;
    for bank_dir in banks {
        let bank = bank_dir
            .file_name()
            .map(|s| s.to_string_lossy().to_string())
            .unwrap_or_default();
        let mut files: Vec<PathBuf> = std::fs::read_dir(&bank_dir)
            .map_err(|e| TarifarioError::read(&bank_dir, e))?
            .flatten()
            .map(|e| e.path())
            .filter(|p| p.extension().is_some_and(|x| x == "json"))
            .collect();
        files.sort();

        for path in files {
            let parsed = std::fs::read_to_string(&path)
                .map_err(|e| e.to_string())
                .and_then(|t| BatchOutput::from_json(&t).map_err(|e| e.to_string()));
            match parsed {
                Ok(output) => loaded.push(LoadedBatch {
                    bank: bank.clone(),
                    path,
                    output,
                }),
                Err(e) => {
                    warn!("Skipping {}: {}", path.display(), e);
                    skipped += 1;
                }
            }
        }
    }
    Ok((loaded, skipped))
}

/// Write `rows` as CSV with a BOM, atomically.
pub(crate) fn write_csv<R: Serialize>(path: &Path, rows: &[R]) -> Result<(), TarifarioError> {
    let csv_err = |detail: String| TarifarioError::Csv {
        path: path.to_path_buf(),
        detail,
    };
    let mut writer = csv::Writer::from_writer(UTF8_BOM.to_vec());
    for row in rows {
        writer.serialize(row).map_err(|e| csv_err(e.to_string()))?;
    }
    let bytes = writer.into_inner().map_err(|e| csv_err(e.to_string()))?;
    write_atomic(path, &bytes)
}

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct FlattenSummary {
    pub archivos_json: usize,
    pub archivos_omitidos: usize,
    pub total_filas: usize,
    /// Rows per bank directory.
    pub filas_por_banco: BTreeMap<String, usize>,
    pub csv_completo: PathBuf,
    pub csv_examen: PathBuf,
}

/// Write both CSV projections and `reporte_csv.json`.
pub fn flatten_all(config: &PipelineConfig) -> Result<FlattenSummary, TarifarioError> {
    let layout: DataLayout = config.layout();
    let (batches, skipped) = load_normalized(&layout.normalized_dir())?;

    let items: Vec<ItemRef<'_>> = batches.iter().flat_map(LoadedBatch::items).collect();
    let mut per_bank: BTreeMap<String, usize> = BTreeMap::new();
    for it in &items {
        *per_bank.entry(it.bank.to_string()).or_default() += 1;
    }

    let full_rows: Vec<full::FullRow> = items.iter().map(full::FullRow::from_item).collect();
    let exam_rows: Vec<exam::ExamRow> = items.iter().map(exam::ExamRow::from_item).collect();
    write_csv(&layout.full_csv(), &full_rows)?;
    write_csv(&layout.exam_csv(), &exam_rows)?;

    let summary = FlattenSummary {
        archivos_json: batches.len(),
        archivos_omitidos: skipped,
        total_filas: items.len(),
        filas_por_banco: per_bank,
        csv_completo: layout.full_csv(),
        csv_examen: layout.exam_csv(),
    };
    for (bank, n) in &summary.filas_por_banco {
        info!("{:30} {:5} rows", bank, n);
    }
    info!(
        "{} rows from {} files written to {}",
        summary.total_filas,
        summary.archivos_json,
        layout.output_dir().display()
    );

    let files: Vec<PathBuf> = batches.iter().map(|b| b.path.clone()).collect();
    RunReport::new("csv", summary.clone(), files).save(&layout.reports_dir(), "reporte_csv.json")?;
    Ok(summary)
}
