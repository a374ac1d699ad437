//! The full projection: one column per value.

use super::{non_empty, opt_number, ItemRef};
use crate::normalize::schema::ValorMoneda;
use serde::{Deserialize, Serialize};

/// A row of `tarifarios_bancarios.csv`. Field order is column order.
///
/// Also the record type the viewer loads back, hence `Deserialize`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct FullRow {
    pub banco: String,
    #[serde(rename = "Producto_Codigo")]
    pub producto_codigo: String,
    #[serde(rename = "Producto_Nombre")]
    pub producto_nombre: String,
    pub concepto: String,
    #[serde(rename = "Descripcion_Breve")]
    pub descripcion_breve: String,
    pub tipo: String,
    #[serde(rename = "Tasa_Porcentaje_MN")]
    pub tasa_porcentaje_mn: String,
    #[serde(rename = "Tasa_Porcentaje_ME")]
    pub tasa_porcentaje_me: String,
    #[serde(rename = "Monto_Fijo_MN")]
    pub monto_fijo_mn: String,
    #[serde(rename = "Monto_Fijo_ME")]
    pub monto_fijo_me: String,
    #[serde(rename = "Monto_Minimo_MN")]
    pub monto_minimo_mn: String,
    #[serde(rename = "Monto_Maximo_MN")]
    pub monto_maximo_mn: String,
    #[serde(rename = "Monto_Minimo_ME")]
    pub monto_minimo_me: String,
    #[serde(rename = "Monto_Maximo_ME")]
    pub monto_maximo_me: String,
    pub moneda: String,
    #[serde(rename = "Fecha_Vigencia")]
    pub fecha_vigencia: String,
    #[serde(rename = "Fecha_Extraccion")]
    pub fecha_extraccion: String,
    pub periodicidad: String,
    #[serde(rename = "Oportunidad_Cobro")]
    pub oportunidad_cobro: String,
    pub observaciones: String,
}

/// Column names in file order.
pub const COLUMNS: [&str; 20] = [
    "Banco",
    "Producto_Codigo",
    "Producto_Nombre",
    "Concepto",
    "Descripcion_Breve",
    "Tipo",
    "Tasa_Porcentaje_MN",
    "Tasa_Porcentaje_ME",
    "Monto_Fijo_MN",
    "Monto_Fijo_ME",
    "Monto_Minimo_MN",
    "Monto_Maximo_MN",
    "Monto_Minimo_ME",
    "Monto_Maximo_ME",
    "Moneda",
    "Fecha_Vigencia",
    "Fecha_Extraccion",
    "Periodicidad",
    "Oportunidad_Cobro",
    "Observaciones",
];

impl FullRow {
    pub fn from_item(r: &ItemRef<'_>) -> Self {
        let meta = &r.document.metadata;
        let item = r.item;
        let valores = item.valores.as_ref();
        let mn = valores.and_then(|v| v.mn.as_ref());
        let me = valores.and_then(|v| v.me.as_ref());
        let aplicacion = item.aplicacion.as_ref();
        let value = |side: Option<&ValorMoneda>, f: fn(&ValorMoneda) -> Option<f64>| {
            opt_number(side.and_then(f))
        };

        let codigo = non_empty(&meta.producto_codigo).unwrap_or("N/A").to_string();
        let nombre = non_empty(&meta.producto_nombre)
            .map(str::to_string)
            .unwrap_or_else(|| codigo.clone());

        Self {
            banco: r.bank.to_string(),
            producto_nombre: nombre,
            producto_codigo: codigo,
            concepto: non_empty(&item.concepto.nombre).unwrap_or("N/A").to_string(),
            descripcion_breve: non_empty(&item.concepto.descripcion_breve)
                .unwrap_or_default()
                .to_string(),
            tipo: non_empty(&item.clasificacion.tipo).unwrap_or("N/A").to_string(),
            tasa_porcentaje_mn: value(mn, |v| v.tasa_porcentaje),
            tasa_porcentaje_me: value(me, |v| v.tasa_porcentaje),
            monto_fijo_mn: value(mn, |v| v.monto_fijo),
            monto_fijo_me: value(me, |v| v.monto_fijo),
            monto_minimo_mn: value(mn, |v| v.monto_minimo),
            monto_maximo_mn: value(mn, |v| v.monto_maximo),
            monto_minimo_me: value(me, |v| v.monto_minimo),
            monto_maximo_me: value(me, |v| v.monto_maximo),
            moneda: valores
                .and_then(|v| v.moneda.as_ref())
                .map(|m| m.as_str().to_string())
                .unwrap_or_default(),
            fecha_vigencia: aplicacion
                .and_then(|a| non_empty(&a.vigencia))
                .unwrap_or_default()
                .to_string(),
            fecha_extraccion: non_empty(&meta.fecha_extraccion)
                .unwrap_or_default()
                .to_string(),
            periodicidad: aplicacion
                .and_then(|a| non_empty(&a.periodicidad))
                .unwrap_or_default()
                .to_string(),
            oportunidad_cobro: aplicacion
                .and_then(|a| non_empty(&a.oportunidad_cobro))
                .unwrap_or_default()
                .to_string(),
            observaciones: observaciones(r),
        }
    }
}

fn observaciones(r: &ItemRef<'_>) -> String {
    let meta = &r.document.metadata;
    let mut parts: Vec<String> = Vec::new();
    if let Some(d) = non_empty(&r.item.concepto.descripcion_detallada) {
        parts.push(d.to_string());
    }
    if let Some(c) = r.item.aplicacion.as_ref().and_then(|a| non_empty(&a.condiciones)) {
        parts.push(format!("Condiciones: {c}"));
    }
    if let Some(m) = &r.item.metadata_item {
        parts.extend(m.observaciones_adicionales.iter().cloned());
    }
    if let Some(c) = non_empty(&meta.tipo_cliente) {
        parts.push(format!("Cliente: {c}"));
    }
    if let Some(s) = non_empty(&meta.segmento) {
        parts.push(format!("Segmento: {s}"));
    }
    parts.join(" | ")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::flatten::fixtures::BATCH;
    use crate::flatten::LoadedBatch;
    use crate::normalize::schema::BatchOutput;

    fn rows() -> Vec<FullRow> {
        let batch = LoadedBatch {
            bank: "BCP".into(),
            path: "batch_001.json".into(),
            output: BatchOutput::from_json(BATCH).unwrap(),
        };
        batch.items().map(|r| FullRow::from_item(&r)).collect()
    }

    #[test]
    fn header_rows_are_dropped() {
        let rows = rows();
        assert_eq!(rows.len(), 2);
        assert!(rows.iter().all(|r| r.concepto != "TASAS"));
    }

    #[test]
    fn both_currencies() {
        let r = &rows()[0];
        assert_eq!(r.banco, "BCP");
        assert_eq!(r.producto_nombre, "Tarjetas de Crédito");
        assert_eq!(r.tasa_porcentaje_mn, "32.0");
        assert_eq!(r.tasa_porcentaje_me, "25.5");
        assert_eq!(r.moneda, "AMBAS");
        assert_eq!(r.fecha_vigencia, "24/03/2008");
        assert_eq!(r.observaciones, "Cliente: Persona Natural | Segmento: General");
    }

    #[test]
    fn mn_only_leaves_me_cells_empty() {
        let r = &rows()[1];
        assert_eq!(r.monto_minimo_mn, "7.0");
        assert_eq!(r.monto_maximo_mn, "375.0");
        assert_eq!(r.tasa_porcentaje_me, "");
        assert_eq!(r.monto_fijo_me, "");
        assert_eq!(
            r.observaciones,
            "Físico | Condiciones: Solo a solicitud | Incluye IGV | Cliente: Persona Natural | Segmento: General"
        );
    }

    #[test]
    fn header_matches_column_list() {
        let mut w = csv::Writer::from_writer(vec![]);
        w.serialize(FullRow::default()).unwrap();
        let out = String::from_utf8(w.into_inner().unwrap()).unwrap();
        assert_eq!(out.lines().next().unwrap(), COLUMNS.join(","));
    }
}
