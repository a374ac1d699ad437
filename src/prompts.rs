//! Prompts for page OCR and batch normalization.
//!
//! Unit tests inspect the prompts directly, so an edit that drops the batch
//! delimiters or a schema field is caught without a model in the loop.
//!
//! The normalization prompt doubles as the contract for the JSON that
//! [`crate::normalize::schema`] and the flattener read back. Any field
//! renamed here must be renamed there.

/// Prompt sent with every page image.
///
/// Tariff pages are almost entirely tables. The anti-repetition rules exist
/// because vision models tend to loop on dense tables and emit the same row
/// until the token budget runs out.
pub const OCR_PAGE_PROMPT: &str = r#"You are an OCR engine for Peruvian bank tariff sheets (tarifarios). Transcribe the page image into Markdown with maximum numerical precision.

RULES:
1. Transcribe EVERY table with its exact structure, as Markdown tables: | Col | Col |
2. Copy numbers exactly as printed: rates, fees, percentages, dates.
3. Keep currency symbols exactly as shown (S/, US$, $, €).
4. One table row per line. Never break a cell across lines.
5. Keep cells concise (at most 150 characters); summarise longer cell text.
6. Transcribe the content once, top to bottom. Never repeat headers, footers or rows.
7. Stop as soon as the visible content ends.

OUTPUT:
Markdown only. No explanations, no preamble, no code fences."#;

/// Prompt for turning one batch of OCR'd documents into structured JSON.
pub const NORMALIZATION_PROMPT: &str = r#"You normalize Peruvian bank tariff documents into structured JSON.

INPUT: several documents concatenated with delimiters:
- ---DOCUMENT_START--- starts a document
- metadata lines follow: FILE_NUMBER, BANCO, PRODUCTO, FILENAME, FILEPATH
- ---CONTENT_START--- starts the Markdown content
- ---CONTENT_END--- ends it

OUTPUT: one JSON object, nothing else:
{
  "batch_metadata": {"batch_id": string, "total_documentos": int, "fecha_procesamiento": ISO-8601},
  "documentos": [ one entry per input document, in input order ],
  "resumen_batch": {"total_items": int, "documentos_con_advertencias": int}
}

Each entry of "documentos":
{
  "archivo": FILENAME,
  "metadata": {
    "banco", "producto_codigo" (= PRODUCTO), "producto_nombre", "descripcion_breve",
    "fecha_extraccion" (YYYY-MM-DD), "fecha_vigencia" (DD/MM/YYYY or null),
    "tipo_cambio_referencial": {"usd_pen": number|null, "eur_pen": number|null} | null,
    "tipo_cliente", "segmento", "tiene_contenido_corrupto": bool,
    "fuente_archivo" (= FILEPATH),
    "referencias_externas": [{"tipo", "referencia", "banco", "mencionado_en_item_id"}]
  },
  "items": [{
    "id": string,
    "jerarquia": {"nivel", "seccion", "subseccion", "es_encabezado": bool},
    "clasificacion": {"tipo": "TASA"|"COMISION"|"GASTO"|"SEGURO"|"OTRO", "subtipo", "categoria"},
    "concepto": {"nombre", "descripcion_breve" (10-15 words), "descripcion_detallada"},
    "valores": {
      "moneda": "MN"|"ME"|"AMBAS",
      "mn": {"tasa_porcentaje", "monto_fijo", "monto_minimo", "monto_maximo", "unidad", "texto_original"} | null,
      "me": {"tasa_porcentaje", "monto_fijo", "monto_minimo", "monto_maximo", "unidad", "texto_original", "conversion_pen"} | null
    },
    "aplicacion": {"vigencia", "periodicidad", "oportunidad_cobro", "forma_aplicacion", "condiciones"},
    "metadata_item": {"referencia", "nota_explicativa", "requiere_evaluacion", "aplica_itf",
                      "observaciones_adicionales": [string], "texto_fila_completo"}
  }],
  "notas_documento": [{"referencia", "texto"}],
  "control_calidad": {
    "total_items_extraidos", "items_con_datos_completos", "items_con_datos_parciales",
    "items_solo_encabezados", "referencias_sin_resolver": [string], "advertencias": [string],
    "tipo_documento": "NORMAL"|"INDICE"|"VACIO"|"CORRUPTO"
  }
}

RULES:
1. Exactly one "documentos" entry per ---DOCUMENT_START---, in the same order.
2. Section headers (TASAS, COMISIONES, GASTOS, SEGUROS) set jerarquia.seccion; header rows get es_encabezado = true.
3. Numbers are JSON numbers: "32,00%" -> 32.0, "S/ 15.00" -> 15.0. Ranges such as
   "Mínimo: S/7.00 Máximo: S/375.00" fill monto_minimo and monto_maximo.
   "$ 46 [S/ 181.70]" -> me.monto_fijo = 46.0, me.conversion_pen = 181.7.
   Always keep the source text in texto_original.
4. MN is soles (S/), ME is foreign currency (US$, $, €).
5. Dates "Vigente desde DD/MM/YYYY" go to aplicacion.vigencia as "DD/MM/YYYY".
6. Capture references such as "Ver Tarifario N°110" in referencias_externas and
   footnote markers (1), (2) in metadata_item.referencia.
7. Index or table-of-contents documents: items = [], total_items_extraidos = 0, tipo_documento = "INDICE".
   Empty documents: tipo_documento = "VACIO". Documents with repeated garbage:
   extract unique rows only, tiene_contenido_corrupto = true, tipo_documento = "CORRUPTO".
8. Never invent data. Unknown values are null.

Return only the JSON object."#;

/// Full user prompt for one batch.
pub fn normalization_request(batch_content: &str) -> String {
    format!("{NORMALIZATION_PROMPT}\n\nBATCH CONTENT:\n{batch_content}")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn normalization_prompt_names_batch_delimiters() {
        for marker in [
            "---DOCUMENT_START---",
            "---CONTENT_START---",
            "---CONTENT_END---",
        ] {
            assert!(NORMALIZATION_PROMPT.contains(marker), "missing {marker}");
        }
    }

    #[test]
    fn normalization_prompt_names_fields_the_flattener_reads() {
        for field in [
            "producto_codigo",
            "producto_nombre",
            "es_encabezado",
            "tasa_porcentaje",
            "monto_minimo",
            "conversion_pen",
            "oportunidad_cobro",
            "observaciones_adicionales",
            "total_items_extraidos",
        ] {
            assert!(NORMALIZATION_PROMPT.contains(field), "missing {field}");
        }
    }

    #[test]
    fn request_appends_content_after_marker() {
        let req = normalization_request("---DOCUMENT_START---\nX");
        assert!(req.ends_with("BATCH CONTENT:\n---DOCUMENT_START---\nX"));
    }
}
