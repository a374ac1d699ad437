//! Typed view of a normalized batch.
//!
//! The model is asked for a fixed schema but does not always honour it:
//! numbers arrive as `"32,00"`, lists as a single string, objects as `null`.
//! Every field here is optional or defaulted and the numeric and list fields
//! go through lenient deserializers, so one sloppy value costs that value
//! and not the whole file.

use serde::de::Deserializer;
use serde::{Deserialize, Serialize};
use serde_json::Value;

// ── Lenient field helpers ────────────────────────────────────────────────

/// `null` (or absent, with `#[serde(default)]`) becomes `T::default()`.
fn null_default<'de, D, T>(d: D) -> Result<T, D::Error>
where
    D: Deserializer<'de>,
    T: Default + Deserialize<'de>,
{
    Ok(Option::<T>::deserialize(d)?.unwrap_or_default())
}

const CURRENCY_PREFIXES: [&str; 5] = ["US$", "S/.", "S/", "$", "€"];

/// Parse a number written the way tariff tables write them:
/// `32,00%`, `S/ 15.00`, `S/. 15.00`, `US$ 5.00`, `1,250.75`, `S/ 1,500`.
///
/// A lone comma followed by groups of exactly three digits separates
/// thousands; any other lone comma is a decimal comma. Non-finite values
/// (`nan`, `inf`) are rejected.
pub fn parse_amount(text: &str) -> Option<f64> {
    let mut rest = text.trim();
    if let Some(stripped) = CURRENCY_PREFIXES.iter().find_map(|p| rest.strip_prefix(p)) {
        rest = stripped;
    }
    let cleaned: String = rest
        .chars()
        .filter(|c| !matches!(c, '%' | ' ' | '\u{a0}'))
        .collect();
    if cleaned.is_empty() {
        return None;
    }
    let normalized = match (cleaned.rfind('.'), cleaned.rfind(',')) {
        // "1.250,75"
        (Some(dot), Some(comma)) if comma > dot => cleaned.replace('.', "").replace(',', "."),
        (Some(_), _) => cleaned.replace(',', ""),
        (None, Some(_)) if is_thousands_grouped(&cleaned) => cleaned.replace(',', ""),
        (None, Some(_)) => cleaned.replace(',', "."),
        (None, None) => cleaned,
    };
    normalized.parse::<f64>().ok().filter(|v| v.is_finite())
}

/// `1,500` or `12,000,000`: a non-zero lead group, then 3-digit groups.
fn is_thousands_grouped(s: &str) -> bool {
    let mut groups = s.split(',');
    let lead = groups.next().unwrap_or_default().trim_start_matches('-');
    !lead.is_empty()
        && lead.chars().all(|c| c.is_ascii_digit())
        && lead.chars().any(|c| c != '0')
        && groups.all(|g| g.len() == 3 && g.chars().all(|c| c.is_ascii_digit()))
}

fn lenient_f64<'de, D: Deserializer<'de>>(d: D) -> Result<Option<f64>, D::Error> {
    Ok(match Value::deserialize(d)? {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => parse_amount(&s),
        _ => None,
    })
}

fn lenient_u64<'de, D: Deserializer<'de>>(d: D) -> Result<u64, D::Error> {
    Ok(match Value::deserialize(d)? {
        Value::Number(n) => n.as_u64().or_else(|| n.as_f64().map(|f| f.max(0.0) as u64)).unwrap_or(0),
        Value::String(s) => s.trim().parse().unwrap_or(0),
        _ => 0,
    })
}

fn lenient_bool<'de, D: Deserializer<'de>>(d: D) -> Result<Option<bool>, D::Error> {
    Ok(match Value::deserialize(d)? {
        Value::Bool(b) => Some(b),
        Value::String(s) => match s.trim().to_lowercase().as_str() {
            "true" | "si" | "sí" | "yes" => Some(true),
            "false" | "no" => Some(false),
            _ => None,
        },
        _ => None,
    })
}

/// A list of strings, or a single string, or nothing.
fn lenient_strings<'de, D: Deserializer<'de>>(d: D) -> Result<Vec<String>, D::Error> {
    Ok(match Value::deserialize(d)? {
        Value::String(s) if s.trim().is_empty() => Vec::new(),
        Value::String(s) => vec![s],
        Value::Array(items) => items
            .into_iter()
            .filter_map(|v| match v {
                Value::String(s) => Some(s),
                Value::Null => None,
                other => Some(other.to_string()),
            })
            .collect(),
        _ => Vec::new(),
    })
}

/// Scalars the model sometimes emits as numbers (`"nivel": 1.1`).
fn lenient_string<'de, D: Deserializer<'de>>(d: D) -> Result<Option<String>, D::Error> {
    Ok(match Value::deserialize(d)? {
        Value::Null => None,
        Value::String(s) => Some(s),
        other => Some(other.to_string()),
    })
}

// ── Enums ────────────────────────────────────────────────────────────────

/// Currency column of an item.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum Moneda {
    /// Moneda nacional (soles).
    Mn,
    /// Moneda extranjera (dólares).
    Me,
    Ambas,
    /// Anything else the model wrote, kept verbatim.
    Otra(String),
}

impl Moneda {
    pub fn as_str(&self) -> &str {
        match self {
            Moneda::Mn => "MN",
            Moneda::Me => "ME",
            Moneda::Ambas => "AMBAS",
            Moneda::Otra(s) => s,
        }
    }
}

impl From<String> for Moneda {
    fn from(s: String) -> Self {
        match s.trim().to_uppercase().as_str() {
            "MN" => Moneda::Mn,
            "ME" => Moneda::Me,
            "AMBAS" => Moneda::Ambas,
            _ => Moneda::Otra(s),
        }
    }
}

impl From<Moneda> for String {
    fn from(m: Moneda) -> Self {
        m.as_str().to_string()
    }
}

/// Document kind as judged by the model.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum TipoDocumento {
    Normal,
    /// Table of contents or index only; no items.
    Indice,
    Vacio,
    Corrupto,
    Otro(String),
}

impl From<String> for TipoDocumento {
    fn from(s: String) -> Self {
        match s.trim().to_uppercase().as_str() {
            "NORMAL" => TipoDocumento::Normal,
            "INDICE" | "ÍNDICE" => TipoDocumento::Indice,
            "VACIO" | "VACÍO" => TipoDocumento::Vacio,
            "CORRUPTO" => TipoDocumento::Corrupto,
            _ => TipoDocumento::Otro(s),
        }
    }
}

impl From<TipoDocumento> for String {
    fn from(t: TipoDocumento) -> Self {
        match t {
            TipoDocumento::Normal => "NORMAL".into(),
            TipoDocumento::Indice => "INDICE".into(),
            TipoDocumento::Vacio => "VACIO".into(),
            TipoDocumento::Corrupto => "CORRUPTO".into(),
            TipoDocumento::Otro(s) => s,
        }
    }
}

// ── Batch ────────────────────────────────────────────────────────────────

/// One `normalized_json/<bank>/batch_NNN.json` file.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct BatchOutput {
    #[serde(default, deserialize_with = "null_default")]
    pub batch_metadata: Value,
    #[serde(default, deserialize_with = "null_default")]
    pub documentos: Vec<Documento>,
    #[serde(default, deserialize_with = "null_default")]
    pub resumen_batch: Value,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Documento {
    #[serde(default, deserialize_with = "lenient_string")]
    pub archivo: Option<String>,
    #[serde(default, deserialize_with = "null_default")]
    pub metadata: DocumentMetadata,
    #[serde(default, deserialize_with = "null_default")]
    pub items: Vec<Item>,
    #[serde(default, deserialize_with = "null_default")]
    pub notas_documento: Vec<NotaDocumento>,
    #[serde(default, deserialize_with = "null_default")]
    pub control_calidad: ControlCalidad,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DocumentMetadata {
    #[serde(default, deserialize_with = "lenient_string")]
    pub banco: Option<String>,
    #[serde(default, deserialize_with = "lenient_string")]
    pub producto_codigo: Option<String>,
    #[serde(default, deserialize_with = "lenient_string")]
    pub producto_nombre: Option<String>,
    #[serde(default, deserialize_with = "lenient_string")]
    pub descripcion_breve: Option<String>,
    /// `YYYY-MM-DD`.
    #[serde(default, deserialize_with = "lenient_string")]
    pub fecha_extraccion: Option<String>,
    /// `DD/MM/YYYY`.
    #[serde(default, deserialize_with = "lenient_string")]
    pub fecha_vigencia: Option<String>,
    #[serde(default, deserialize_with = "null_default")]
    pub tipo_cambio_referencial: TipoCambio,
    #[serde(default, deserialize_with = "lenient_string")]
    pub tipo_cliente: Option<String>,
    #[serde(default, deserialize_with = "lenient_string")]
    pub segmento: Option<String>,
    #[serde(default, deserialize_with = "lenient_bool")]
    pub tiene_contenido_corrupto: Option<bool>,
    #[serde(default, deserialize_with = "lenient_string")]
    pub fuente_archivo: Option<String>,
    #[serde(default, deserialize_with = "null_default")]
    pub referencias_externas: Vec<ReferenciaExterna>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TipoCambio {
    #[serde(default, deserialize_with = "lenient_f64")]
    pub usd_pen: Option<f64>,
    #[serde(default, deserialize_with = "lenient_f64")]
    pub eur_pen: Option<f64>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ReferenciaExterna {
    #[serde(default, deserialize_with = "lenient_string")]
    pub tipo: Option<String>,
    #[serde(default, deserialize_with = "lenient_string")]
    pub referencia: Option<String>,
    #[serde(default, deserialize_with = "lenient_string")]
    pub banco: Option<String>,
    #[serde(default, deserialize_with = "lenient_string")]
    pub mencionado_en_item_id: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct NotaDocumento {
    #[serde(default, deserialize_with = "lenient_string")]
    pub referencia: Option<String>,
    #[serde(default, deserialize_with = "lenient_string")]
    pub texto: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ControlCalidad {
    #[serde(default, deserialize_with = "lenient_u64")]
    pub total_items_extraidos: u64,
    #[serde(default, deserialize_with = "lenient_u64")]
    pub items_con_datos_completos: u64,
    #[serde(default, deserialize_with = "lenient_u64")]
    pub items_con_datos_parciales: u64,
    #[serde(default, deserialize_with = "lenient_u64")]
    pub items_solo_encabezados: u64,
    #[serde(default, deserialize_with = "lenient_strings")]
    pub referencias_sin_resolver: Vec<String>,
    #[serde(default, deserialize_with = "lenient_strings")]
    pub advertencias: Vec<String>,
    #[serde(default)]
    pub tipo_documento: Option<TipoDocumento>,
}

// ── Items ────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Item {
    #[serde(default, deserialize_with = "lenient_string")]
    pub id: Option<String>,
    #[serde(default, deserialize_with = "null_default")]
    pub jerarquia: Jerarquia,
    #[serde(default, deserialize_with = "null_default")]
    pub clasificacion: Clasificacion,
    #[serde(default, deserialize_with = "null_default")]
    pub concepto: Concepto,
    #[serde(default)]
    pub valores: Option<Valores>,
    #[serde(default)]
    pub aplicacion: Option<Aplicacion>,
    #[serde(default)]
    pub metadata_item: Option<MetadataItem>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Jerarquia {
    #[serde(default, deserialize_with = "lenient_string")]
    pub nivel: Option<String>,
    #[serde(default, deserialize_with = "lenient_string")]
    pub seccion: Option<String>,
    #[serde(default, deserialize_with = "lenient_string")]
    pub subseccion: Option<String>,
    #[serde(default, deserialize_with = "lenient_bool")]
    pub es_encabezado: Option<bool>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Clasificacion {
    /// `TASA | COMISION | GASTO | SEGURO | OTRO`.
    #[serde(default, deserialize_with = "lenient_string")]
    pub tipo: Option<String>,
    #[serde(default, deserialize_with = "lenient_string")]
    pub subtipo: Option<String>,
    #[serde(default, deserialize_with = "lenient_string")]
    pub categoria: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Concepto {
    #[serde(default, deserialize_with = "lenient_string")]
    pub nombre: Option<String>,
    #[serde(default, deserialize_with = "lenient_string")]
    pub descripcion_breve: Option<String>,
    #[serde(default, deserialize_with = "lenient_string")]
    pub descripcion_detallada: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Valores {
    #[serde(default)]
    pub moneda: Option<Moneda>,
    #[serde(default)]
    pub mn: Option<ValorMoneda>,
    #[serde(default)]
    pub me: Option<ValorMoneda>,
}

/// Amounts in one currency. `conversion_pen` only appears on the ME side.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ValorMoneda {
    #[serde(default, deserialize_with = "lenient_f64")]
    pub tasa_porcentaje: Option<f64>,
    #[serde(default, deserialize_with = "lenient_f64")]
    pub monto_fijo: Option<f64>,
    #[serde(default, deserialize_with = "lenient_f64")]
    pub monto_minimo: Option<f64>,
    #[serde(default, deserialize_with = "lenient_f64")]
    pub monto_maximo: Option<f64>,
    #[serde(default, deserialize_with = "lenient_string")]
    pub unidad: Option<String>,
    #[serde(default, deserialize_with = "lenient_string")]
    pub texto_original: Option<String>,
    #[serde(default, deserialize_with = "lenient_f64")]
    pub conversion_pen: Option<f64>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Aplicacion {
    #[serde(default, deserialize_with = "lenient_string")]
    pub vigencia: Option<String>,
    #[serde(default, deserialize_with = "lenient_string")]
    pub periodicidad: Option<String>,
    #[serde(default, deserialize_with = "lenient_string")]
    pub oportunidad_cobro: Option<String>,
    #[serde(default, deserialize_with = "lenient_string")]
    pub forma_aplicacion: Option<String>,
    #[serde(default, deserialize_with = "lenient_string")]
    pub condiciones: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MetadataItem {
    #[serde(default, deserialize_with = "lenient_string")]
    pub referencia: Option<String>,
    #[serde(default, deserialize_with = "lenient_string")]
    pub nota_explicativa: Option<String>,
    #[serde(default, deserialize_with = "lenient_bool")]
    pub requiere_evaluacion: Option<bool>,
    #[serde(default, deserialize_with = "lenient_bool")]
    pub aplica_itf: Option<bool>,
    #[serde(default, deserialize_with = "lenient_strings")]
    pub observaciones_adicionales: Vec<String>,
    #[serde(default, deserialize_with = "lenient_string")]
    pub texto_fila_completo: Option<String>,
}

impl Item {
    pub fn is_header(&self) -> bool {
        self.jerarquia.es_encabezado.unwrap_or(false)
    }
}

impl BatchOutput {
    /// Parse a normalized batch file's text.
    pub fn from_json(text: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(text)
    }

    /// Σ `control_calidad.total_items_extraidos` over all documents.
    pub fn reported_items(&self) -> u64 {
        self.documentos
            .iter()
            .map(|d| d.control_calidad.total_items_extraidos)
            .sum()
    }
}

/// Used by the untrusted-payload check, which works on raw JSON.
pub(crate) fn value_as_u64(v: &Value) -> u64 {
    lenient_u64(v.clone()).unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn amounts_in_table_notation() {
        assert_eq!(parse_amount("32,00%"), Some(32.0));
        assert_eq!(parse_amount("S/ 15.00"), Some(15.0));
        assert_eq!(parse_amount("$2.50"), Some(2.5));
        assert_eq!(parse_amount("1,250.75"), Some(1250.75));
        assert_eq!(parse_amount("-"), None);
        assert_eq!(parse_amount(""), None);
    }

    #[test]
    fn comma_followed_by_three_digits_groups_thousands() {
        assert_eq!(parse_amount("S/ 1,500"), Some(1500.0));
        assert_eq!(parse_amount("12,000,000"), Some(12_000_000.0));
        assert_eq!(parse_amount("1.250,75"), Some(1250.75));
        // Anything else after a lone comma is decimals.
        assert_eq!(parse_amount("7,5"), Some(7.5));
        assert_eq!(parse_amount("0,500"), Some(0.5));
        assert_eq!(parse_amount("1,5000"), Some(1.5));
    }

    #[test]
    fn currency_prefixes_are_stripped_whole() {
        assert_eq!(parse_amount("S/. 15.00"), Some(15.0));
        assert_eq!(parse_amount("S/.15"), Some(15.0));
        assert_eq!(parse_amount("US$ 5.00"), Some(5.0));
        assert_eq!(parse_amount("$ 2,50"), Some(2.5));
        assert_eq!(parse_amount("€3"), Some(3.0));
    }

    #[test]
    fn non_finite_values_are_rejected() {
        assert_eq!(parse_amount("nan"), None);
        assert_eq!(parse_amount("NaN"), None);
        assert_eq!(parse_amount("inf"), None);
        assert_eq!(parse_amount("-infinity"), None);
    }

    #[test]
    fn sloppy_item_still_parses() {
        let json = r#"{
            "documentos": [{
                "archivo": "BCP/tarjetas.md",
                "metadata": {"banco": "BCP", "producto_codigo": "tarjetas", "fecha_extraccion": "2025-01-10"},
                "items": [
                    {"id": 1, "jerarquia": {"nivel": 1.1, "es_encabezado": "true"},
                     "clasificacion": {"tipo": "TASA"}, "concepto": {"nombre": "TASAS"}},
                    {"id": "2", "jerarquia": null,
                     "clasificacion": {"tipo": "COMISION"},
                     "concepto": {"nombre": "Mantenimiento"},
                     "valores": {"moneda": "mn", "mn": {"monto_fijo": "S/ 7,00"}, "me": null},
                     "metadata_item": {"observaciones_adicionales": "Cobro mensual"}}
                ],
                "control_calidad": {"total_items_extraidos": "1", "tipo_documento": "NORMAL"}
            }],
            "resumen_batch": null
        }"#;
        let batch = BatchOutput::from_json(json).unwrap();
        let doc = &batch.documentos[0];
        assert!(doc.items[0].is_header());
        assert_eq!(doc.items[0].jerarquia.nivel.as_deref(), Some("1.1"));
        assert!(!doc.items[1].is_header());

        let valores = doc.items[1].valores.as_ref().unwrap();
        assert_eq!(valores.moneda, Some(Moneda::Mn));
        assert_eq!(valores.mn.as_ref().unwrap().monto_fijo, Some(7.0));
        assert!(valores.me.is_none());
        assert_eq!(
            doc.items[1].metadata_item.as_ref().unwrap().observaciones_adicionales,
            vec!["Cobro mensual"]
        );
        assert_eq!(batch.reported_items(), 1);
        assert_eq!(doc.control_calidad.tipo_documento, Some(TipoDocumento::Normal));
    }

    #[test]
    fn unknown_currency_is_kept_verbatim() {
        let v: Valores = serde_json::from_str(r#"{"moneda": "PEN/USD"}"#).unwrap();
        assert_eq!(v.moneda.as_ref().map(Moneda::as_str), Some("PEN/USD"));
        assert_eq!(serde_json::to_string(&Moneda::Ambas).unwrap(), "\"AMBAS\"");
    }
}
