//! Stage 8: query the flattened CSV.
//!
//! [`Dataset`] loads `output/tarifarios_bancarios.csv` once and answers the
//! viewer's queries from memory: filtered, sorted, paginated listings,
//! aggregate statistics, the distinct filter values and a CSV export of any
//! filtered view. The HTTP layer in [`server`] wraps these methods, serves
//! the browsing page from `static/` and can trigger scraping and downloads;
//! it only exists with the `viewer` feature.

#[cfg(feature = "viewer")]
pub mod server;

use crate::error::TarifarioError;
use crate::flatten::UTF8_BOM;
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::collections::{BTreeMap, BTreeSet};
use std::path::Path;
use tracing::info;

pub const DEFAULT_LIMIT: usize = 20;
pub const MAX_LIMIT: usize = 1000;
pub const EXPORT_FILE_NAME: &str = "tarifarios_filtrados.csv";

// ── Records ──────────────────────────────────────────────────────────────

/// One row of the full projection, with the value columns typed.
///
/// Cells that are empty (or not numbers) in a value column load as `None`
/// and serialize as JSON `null`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Tarifa {
    #[serde(rename = "Banco")]
    pub banco: String,
    #[serde(rename = "Producto_Codigo", default)]
    pub producto_codigo: String,
    #[serde(rename = "Producto_Nombre", default)]
    pub producto_nombre: String,
    #[serde(rename = "Concepto", default)]
    pub concepto: String,
    #[serde(rename = "Descripcion_Breve", default)]
    pub descripcion_breve: String,
    #[serde(rename = "Tipo", default)]
    pub tipo: String,
    #[serde(rename = "Tasa_Porcentaje_MN", default, deserialize_with = "csv::invalid_option")]
    pub tasa_porcentaje_mn: Option<f64>,
    #[serde(rename = "Tasa_Porcentaje_ME", default, deserialize_with = "csv::invalid_option")]
    pub tasa_porcentaje_me: Option<f64>,
    #[serde(rename = "Monto_Fijo_MN", default, deserialize_with = "csv::invalid_option")]
    pub monto_fijo_mn: Option<f64>,
    #[serde(rename = "Monto_Fijo_ME", default, deserialize_with = "csv::invalid_option")]
    pub monto_fijo_me: Option<f64>,
    #[serde(rename = "Monto_Minimo_MN", default, deserialize_with = "csv::invalid_option")]
    pub monto_minimo_mn: Option<f64>,
    #[serde(rename = "Monto_Maximo_MN", default, deserialize_with = "csv::invalid_option")]
    pub monto_maximo_mn: Option<f64>,
    #[serde(rename = "Monto_Minimo_ME", default, deserialize_with = "csv::invalid_option")]
    pub monto_minimo_me: Option<f64>,
    #[serde(rename = "Monto_Maximo_ME", default, deserialize_with = "csv::invalid_option")]
    pub monto_maximo_me: Option<f64>,
    #[serde(rename = "Moneda", default)]
    pub moneda: String,
    #[serde(rename = "Fecha_Vigencia", default)]
    pub fecha_vigencia: String,
    #[serde(rename = "Fecha_Extraccion", default)]
    pub fecha_extraccion: String,
    #[serde(rename = "Periodicidad", default)]
    pub periodicidad: String,
    #[serde(rename = "Oportunidad_Cobro", default)]
    pub oportunidad_cobro: String,
    #[serde(rename = "Observaciones", default)]
    pub observaciones: String,
}

/// A sortable cell.
#[derive(Debug, Clone, Copy, PartialEq)]
enum Cell<'a> {
    Text(&'a str),
    Number(Option<f64>),
}

impl Tarifa {
    /// Look a column up by its CSV header name.
    fn cell(&self, column: &str) -> Option<Cell<'_>> {
        let cell = match column {
            "Banco" => Cell::Text(&self.banco),
            "Producto_Codigo" => Cell::Text(&self.producto_codigo),
            "Producto_Nombre" => Cell::Text(&self.producto_nombre),
            "Concepto" => Cell::Text(&self.concepto),
            "Descripcion_Breve" => Cell::Text(&self.descripcion_breve),
            "Tipo" => Cell::Text(&self.tipo),
            "Tasa_Porcentaje_MN" => Cell::Number(self.tasa_porcentaje_mn),
            "Tasa_Porcentaje_ME" => Cell::Number(self.tasa_porcentaje_me),
            "Monto_Fijo_MN" => Cell::Number(self.monto_fijo_mn),
            "Monto_Fijo_ME" => Cell::Number(self.monto_fijo_me),
            "Monto_Minimo_MN" => Cell::Number(self.monto_minimo_mn),
            "Monto_Maximo_MN" => Cell::Number(self.monto_maximo_mn),
            "Monto_Minimo_ME" => Cell::Number(self.monto_minimo_me),
            "Monto_Maximo_ME" => Cell::Number(self.monto_maximo_me),
            "Moneda" => Cell::Text(&self.moneda),
            "Fecha_Vigencia" => Cell::Text(&self.fecha_vigencia),
            "Fecha_Extraccion" => Cell::Text(&self.fecha_extraccion),
            "Periodicidad" => Cell::Text(&self.periodicidad),
            "Oportunidad_Cobro" => Cell::Text(&self.oportunidad_cobro),
            "Observaciones" => Cell::Text(&self.observaciones),
            _ => return None,
        };
        Some(cell)
    }
}

/// Missing numbers sort last in both directions.
fn compare_cells(a: Cell<'_>, b: Cell<'_>, order: SortOrder) -> Ordering {
    let flip = |o: Ordering| match order {
        SortOrder::Asc => o,
        SortOrder::Desc => o.reverse(),
    };
    match (a, b) {
        (Cell::Text(x), Cell::Text(y)) => flip(x.cmp(y)),
        (Cell::Number(Some(x)), Cell::Number(Some(y))) => flip(x.total_cmp(&y)),
        (Cell::Number(None), Cell::Number(None)) => Ordering::Equal,
        (Cell::Number(None), _) => Ordering::Greater,
        (_, Cell::Number(None)) => Ordering::Less,
        _ => Ordering::Equal,
    }
}

// ── Queries ──────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SortOrder {
    #[default]
    Asc,
    Desc,
}

fn default_limit() -> usize {
    DEFAULT_LIMIT
}

/// Filters, sort and page of a listing. Every field is optional in the
/// query string.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TarifaQuery {
    pub banco: Option<String>,
    pub tipo: Option<String>,
    pub moneda: Option<String>,
    /// Case-insensitive substring of `Producto_Nombre`.
    pub producto: Option<String>,
    /// Case-insensitive substring of `Concepto`.
    pub concepto: Option<String>,
    pub tasa_mn_gte: Option<f64>,
    pub tasa_mn_lte: Option<f64>,
    pub tasa_me_gte: Option<f64>,
    pub tasa_me_lte: Option<f64>,
    pub sort_by: Option<String>,
    #[serde(default)]
    pub sort_order: SortOrder,
    #[serde(default)]
    pub skip: usize,
    #[serde(default = "default_limit")]
    pub limit: usize,
}

impl Default for TarifaQuery {
    fn default() -> Self {
        Self {
            banco: None,
            tipo: None,
            moneda: None,
            producto: None,
            concepto: None,
            tasa_mn_gte: None,
            tasa_mn_lte: None,
            tasa_me_gte: None,
            tasa_me_lte: None,
            sort_by: None,
            sort_order: SortOrder::Asc,
            skip: 0,
            limit: DEFAULT_LIMIT,
        }
    }
}

fn contains_ci(haystack: &str, needle: &str) -> bool {
    haystack.to_lowercase().contains(&needle.to_lowercase())
}

/// A bound on a rate excludes rows with no rate.
fn in_range(value: Option<f64>, gte: Option<f64>, lte: Option<f64>) -> bool {
    if gte.is_none() && lte.is_none() {
        return true;
    }
    match value {
        Some(v) => gte.is_none_or(|g| v >= g) && lte.is_none_or(|l| v <= l),
        None => false,
    }
}

impl TarifaQuery {
    pub fn matches(&self, t: &Tarifa) -> bool {
        let exact = |want: &Option<String>, have: &str| want.as_deref().is_none_or(|w| w == have);
        let like = |want: &Option<String>, have: &str| {
            want.as_deref().is_none_or(|w| contains_ci(have, w))
        };
        exact(&self.banco, &t.banco)
            && exact(&self.tipo, &t.tipo)
            && exact(&self.moneda, &t.moneda)
            && like(&self.producto, &t.producto_nombre)
            && like(&self.concepto, &t.concepto)
            && in_range(t.tasa_porcentaje_mn, self.tasa_mn_gte, self.tasa_mn_lte)
            && in_range(t.tasa_porcentaje_me, self.tasa_me_gte, self.tasa_me_lte)
    }

    fn validate(&self) -> Result<(), ViewerError> {
        if !(1..=MAX_LIMIT).contains(&self.limit) {
            return Err(ViewerError::InvalidQuery(format!(
                "limit must be between 1 and {MAX_LIMIT}, got {}",
                self.limit
            )));
        }
        Ok(())
    }
}

/// A rejected query.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ViewerError {
    #[error("{0}")]
    InvalidQuery(String),
    #[error("CSV export failed: {0}")]
    Export(String),
}

// ── Responses ────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Page {
    pub total_items: usize,
    pub items: Vec<Tarifa>,
    pub total_pages: usize,
    pub current_page: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Stats {
    pub total_registros: usize,
    pub bancos_count: BTreeMap<String, usize>,
    pub tipos_count: BTreeMap<String, usize>,
    pub tasa_promedio_mn: Option<f64>,
    pub tasa_promedio_me: Option<f64>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FilterValues {
    pub bancos: Vec<String>,
    pub tipos: Vec<String>,
    pub monedas: Vec<String>,
}

fn mean_2dp(values: impl Iterator<Item = f64>) -> Option<f64> {
    let (sum, n) = values.fold((0.0, 0usize), |(s, n), v| (s + v, n + 1));
    (n > 0).then(|| (sum / n as f64 * 100.0).round() / 100.0)
}

// ── Dataset ──────────────────────────────────────────────────────────────

/// The flattened CSV, in memory.
#[derive(Debug, Clone, Default)]
pub struct Dataset {
    rows: Vec<Tarifa>,
}

impl Dataset {
    pub fn new(rows: Vec<Tarifa>) -> Self {
        Self { rows }
    }

    /// Load the full projection written by the flattener.
    pub fn load(path: &Path) -> Result<Self, TarifarioError> {
        if !path.is_file() {
            return Err(TarifarioError::InputFileMissing {
                path: path.to_path_buf(),
                previous: "flatten".into(),
            });
        }
        let bytes = std::fs::read(path).map_err(|e| TarifarioError::read(path, e))?;
        let body = bytes.strip_prefix(UTF8_BOM).unwrap_or(&bytes);
        let dataset = Self::from_reader(body).map_err(|e| TarifarioError::Csv {
            path: path.to_path_buf(),
            detail: e.to_string(),
        })?;
        info!("Loaded {} rows from {}", dataset.len(), path.display());
        Ok(dataset)
    }

    pub fn from_reader(reader: impl std::io::Read) -> Result<Self, csv::Error> {
        let rows = csv::Reader::from_reader(reader)
            .deserialize()
            .collect::<Result<Vec<Tarifa>, _>>()?;
        Ok(Self::new(rows))
    }

    pub fn rows(&self) -> &[Tarifa] {
        &self.rows
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// Matching rows, sorted when `sort_by` names a column.
    pub fn select(&self, query: &TarifaQuery) -> Vec<&Tarifa> {
        let mut rows: Vec<&Tarifa> = self.rows.iter().filter(|t| query.matches(t)).collect();
        if let Some(column) = query.sort_by.as_deref() {
            if Tarifa::default().cell(column).is_some() {
                rows.sort_by(|a, b| match (a.cell(column), b.cell(column)) {
                    (Some(x), Some(y)) => compare_cells(x, y, query.sort_order),
                    _ => Ordering::Equal,
                });
            }
        }
        rows
    }

    /// One page of matching rows.
    pub fn page(&self, query: &TarifaQuery) -> Result<Page, ViewerError> {
        query.validate()?;
        let rows = self.select(query);
        let total_items = rows.len();
        if total_items == 0 {
            return Ok(Page {
                total_items: 0,
                items: Vec::new(),
                total_pages: 0,
                current_page: 1,
            });
        }
        let items = rows
            .into_iter()
            .skip(query.skip)
            .take(query.limit)
            .cloned()
            .collect();
        Ok(Page {
            total_items,
            items,
            total_pages: total_items.div_ceil(query.limit),
            current_page: query.skip / query.limit + 1,
        })
    }

    pub fn stats(&self) -> Stats {
        let mut bancos_count = BTreeMap::new();
        let mut tipos_count = BTreeMap::new();
        for t in &self.rows {
            *bancos_count.entry(t.banco.clone()).or_default() += 1;
            if !t.tipo.is_empty() {
                *tipos_count.entry(t.tipo.clone()).or_default() += 1;
            }
        }
        Stats {
            total_registros: self.rows.len(),
            bancos_count,
            tipos_count,
            tasa_promedio_mn: mean_2dp(self.rows.iter().filter_map(|t| t.tasa_porcentaje_mn)),
            tasa_promedio_me: mean_2dp(self.rows.iter().filter_map(|t| t.tasa_porcentaje_me)),
        }
    }

    pub fn filters(&self) -> FilterValues {
        let distinct = |f: fn(&Tarifa) -> &str| -> Vec<String> {
            self.rows
                .iter()
                .map(f)
                .filter(|s| !s.is_empty())
                .map(str::to_string)
                .collect::<BTreeSet<_>>()
                .into_iter()
                .collect()
        };
        FilterValues {
            bancos: distinct(|t| &t.banco),
            tipos: distinct(|t| &t.tipo),
            monedas: distinct(|t| &t.moneda),
        }
    }

    /// Every matching row (no paging) as CSV text.
    pub fn export_csv(&self, query: &TarifaQuery) -> Result<Vec<u8>, ViewerError> {
        let mut writer = csv::Writer::from_writer(Vec::new());
        for row in self.select(query) {
            writer
                .serialize(row)
                .map_err(|e| ViewerError::Export(e.to_string()))?;
        }
        writer
            .into_inner()
            .map_err(|e| ViewerError::Export(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn row(banco: &str, tipo: &str, moneda: &str, concepto: &str, mn: Option<f64>) -> Tarifa {
        Tarifa {
            banco: banco.into(),
            producto_nombre: format!("Producto {banco}"),
            tipo: tipo.into(),
            moneda: moneda.into(),
            concepto: concepto.into(),
            tasa_porcentaje_mn: mn,
            ..Default::default()
        }
    }

    fn dataset() -> Dataset {
        Dataset::new(vec![
            row("BCP", "TASA", "MN", "TEA Compras", Some(32.0)),
            row("BCP", "COMISION", "MN", "Envío de estado", None),
            row("Interbank", "TASA", "AMBAS", "TEA Disposición", Some(45.5)),
            row("Scotiabank", "TASA", "MN", "TEA compras nacionales", Some(28.125)),
        ])
    }

    #[test]
    fn exact_and_substring_filters() {
        let ds = dataset();
        let q = TarifaQuery {
            banco: Some("BCP".into()),
            ..Default::default()
        };
        assert_eq!(ds.page(&q).unwrap().total_items, 2);

        let q = TarifaQuery {
            concepto: Some("tea COMPRAS".into()),
            ..Default::default()
        };
        assert_eq!(ds.page(&q).unwrap().total_items, 2);

        let q = TarifaQuery {
            producto: Some("interbank".into()),
            ..Default::default()
        };
        assert_eq!(ds.page(&q).unwrap().total_items, 1);
    }

    #[test]
    fn rate_bounds_exclude_rows_without_rate() {
        let ds = dataset();
        let q = TarifaQuery {
            tasa_mn_gte: Some(30.0),
            ..Default::default()
        };
        let page = ds.page(&q).unwrap();
        assert_eq!(page.total_items, 2);
        assert!(page.items.iter().all(|t| t.tasa_porcentaje_mn.is_some()));
    }

    #[test]
    fn sort_puts_missing_numbers_last() {
        let ds = dataset();
        let q = TarifaQuery {
            sort_by: Some("Tasa_Porcentaje_MN".into()),
            sort_order: SortOrder::Desc,
            ..Default::default()
        };
        let rates: Vec<Option<f64>> = ds.select(&q).iter().map(|t| t.tasa_porcentaje_mn).collect();
        assert_eq!(rates, vec![Some(45.5), Some(32.0), Some(28.125), None]);

        // Unknown column: original order.
        let q = TarifaQuery {
            sort_by: Some("NoSuchColumn".into()),
            ..Default::default()
        };
        assert_eq!(ds.select(&q)[0].concepto, "TEA Compras");
    }

    #[test]
    fn pagination() {
        let ds = dataset();
        let q = TarifaQuery {
            skip: 2,
            limit: 2,
            ..Default::default()
        };
        let page = ds.page(&q).unwrap();
        assert_eq!(page.total_items, 4);
        assert_eq!(page.items.len(), 2);
        assert_eq!(page.total_pages, 2);
        assert_eq!(page.current_page, 2);

        let q = TarifaQuery {
            banco: Some("BBVA".into()),
            ..Default::default()
        };
        let empty = ds.page(&q).unwrap();
        assert_eq!((empty.total_items, empty.total_pages, empty.current_page), (0, 0, 1));

        let q = TarifaQuery {
            limit: 0,
            ..Default::default()
        };
        assert!(matches!(ds.page(&q), Err(ViewerError::InvalidQuery(_))));
    }

    #[test]
    fn stats_and_filters() {
        let stats = dataset().stats();
        assert_eq!(stats.total_registros, 4);
        assert_eq!(stats.bancos_count["BCP"], 2);
        assert_eq!(stats.tipos_count["TASA"], 3);
        assert_eq!(stats.tasa_promedio_mn, Some(35.21));
        assert_eq!(stats.tasa_promedio_me, None);

        let f = dataset().filters();
        assert_eq!(f.bancos, vec!["BCP", "Interbank", "Scotiabank"]);
        assert_eq!(f.monedas, vec!["AMBAS", "MN"]);
    }

    #[test]
    fn load_strips_bom_and_reads_empty_cells_as_none() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("t.csv");
        let rows = vec![row("BCP", "TASA", "MN", "TEA", Some(15.0)), row("BCP", "COMISION", "MN", "X", None)];
        let mut w = csv::Writer::from_writer(UTF8_BOM.to_vec());
        for r in &rows {
            w.serialize(r).unwrap();
        }
        std::fs::write(&path, w.into_inner().unwrap()).unwrap();

        let ds = Dataset::load(&path).unwrap();
        assert_eq!(ds.len(), 2);
        assert_eq!(ds.rows[0].banco, "BCP");
        assert_eq!(ds.rows[0].tasa_porcentaje_mn, Some(15.0));
        assert_eq!(ds.rows[1].tasa_porcentaje_mn, None);
    }

    #[test]
    fn missing_csv_names_flatten_stage() {
        let err = Dataset::load(Path::new("/nonexistent/t.csv")).unwrap_err();
        assert!(err.to_string().contains("flatten"));
    }

    #[test]
    fn export_has_header_and_filtered_rows() {
        let q = TarifaQuery {
            banco: Some("Interbank".into()),
            ..Default::default()
        };
        let text = String::from_utf8(dataset().export_csv(&q).unwrap()).unwrap();
        let mut lines = text.lines();
        assert!(lines.next().unwrap().starts_with("Banco,Producto_Codigo,"));
        assert!(lines.next().unwrap().starts_with("Interbank,"));
        assert!(lines.next().is_none());
    }
}
