//! The exam projection: six columns, values folded into a readable `Tasa`.
//!
//! ```text
//! Tasa:  "MN: 32.0% | ME: 25.5%"
//!        "MN: S/ 15.0"               fixed fee
//!        "MN: S/ 7.0 - S/ 375.0"     range
//!        "ME: Mín $ 5.0"             open range
//!        "N/A"                       no value on either side
//! ```

use super::{format_number, non_empty, ItemRef};
use crate::normalize::schema::ValorMoneda;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ExamRow {
    #[serde(rename = "Banco")]
    pub banco: String,
    #[serde(rename = "Producto")]
    pub producto: String,
    #[serde(rename = "Tasa")]
    pub tasa: String,
    #[serde(rename = "Moneda")]
    pub moneda: String,
    #[serde(rename = "Fecha de registro")]
    pub fecha_registro: String,
    #[serde(rename = "Observaciones")]
    pub observaciones: String,
}

impl ExamRow {
    pub fn from_item(r: &ItemRef<'_>) -> Self {
        let meta = &r.document.metadata;
        let item = r.item;
        let valores = item.valores.as_ref();
        let aplicacion = item.aplicacion.as_ref();

        let producto = non_empty(&meta.producto_nombre)
            .or_else(|| non_empty(&meta.producto_codigo))
            .unwrap_or("N/A")
            .to_string();
        let fecha = aplicacion
            .and_then(|a| non_empty(&a.vigencia))
            .or_else(|| non_empty(&meta.fecha_extraccion))
            .unwrap_or_default()
            .to_string();

        Self {
            banco: r.bank.to_string(),
            producto,
            tasa: tasa(
                valores.and_then(|v| v.mn.as_ref()),
                valores.and_then(|v| v.me.as_ref()),
            ),
            moneda: valores
                .and_then(|v| v.moneda.as_ref())
                .map(|m| m.as_str().to_string())
                .unwrap_or_default(),
            fecha_registro: fecha,
            observaciones: observaciones(r),
        }
    }
}

/// Fold both currency sides into one cell.
pub fn tasa(mn: Option<&ValorMoneda>, me: Option<&ValorMoneda>) -> String {
    let parts: Vec<String> = [("MN", "S/ ", mn), ("ME", "$ ", me)]
        .into_iter()
        .filter_map(|(label, symbol, side)| {
            side.and_then(|v| side_value(v, symbol))
                .map(|text| format!("{label}: {text}"))
        })
        .collect();
    if parts.is_empty() {
        "N/A".into()
    } else {
        parts.join(" | ")
    }
}

/// Percentage wins over a fixed amount, which wins over a range. A range
/// bound of zero counts as absent.
fn side_value(v: &ValorMoneda, symbol: &str) -> Option<String> {
    if let Some(p) = v.tasa_porcentaje {
        return Some(format!("{}%", format_number(p)));
    }
    if let Some(f) = v.monto_fijo {
        return Some(format!("{symbol}{}", format_number(f)));
    }
    let min = v.monto_minimo.filter(|x| *x != 0.0);
    let max = v.monto_maximo.filter(|x| *x != 0.0);
    match (min, max) {
        (Some(a), Some(b)) => Some(format!(
            "{symbol}{} - {symbol}{}",
            format_number(a),
            format_number(b)
        )),
        (Some(a), None) => Some(format!("Mín {symbol}{}", format_number(a))),
        (None, Some(b)) => Some(format!("Máx {symbol}{}", format_number(b))),
        (None, None) => None,
    }
}

fn observaciones(r: &ItemRef<'_>) -> String {
    let meta = &r.document.metadata;
    let item = r.item;
    let aplicacion = item.aplicacion.as_ref();
    let mut parts: Vec<String> = Vec::new();

    if let Some(t) = non_empty(&item.clasificacion.tipo) {
        parts.push(format!("Tipo: {t}"));
    }
    parts.extend(non_empty(&item.concepto.descripcion_breve).map(str::to_string));
    parts.extend(non_empty(&item.concepto.descripcion_detallada).map(str::to_string));
    let labelled = [
        ("Periodicidad", aplicacion.and_then(|a| non_empty(&a.periodicidad))),
        ("Cobro", aplicacion.and_then(|a| non_empty(&a.oportunidad_cobro))),
        ("Condiciones", aplicacion.and_then(|a| non_empty(&a.condiciones))),
        ("Cliente", non_empty(&meta.tipo_cliente)),
        ("Segmento", non_empty(&meta.segmento)),
        ("Categoría", non_empty(&item.clasificacion.categoria)),
    ];
    for (label, value) in labelled {
        if let Some(v) = value {
            parts.push(format!("{label}: {v}"));
        }
    }
    parts.join(" | ")
}
