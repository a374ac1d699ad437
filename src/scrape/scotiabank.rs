//! Scotiabank publishes its tariff tree as JSON in a `data-items` attribute.
//!
//! ```text
//! <section class="cascadingDropdownLinks" data-items="[{&quot;Title&quot;: ...}]">
//! ```
//!
//! Each node has a `Title`, an optional `ResourceUrl` and optional
//! `SubResources`. A PDF leaf is labelled with the titles on its path,
//! joined with ` > `, so sibling leaves called "Tarifario" stay distinct.

use crate::scrape::links::is_pdf_url;
use scraper::{Html, Selector};
use serde_json::Value;
use std::collections::HashSet;

/// Extract and parse the `data-items` JSON from the landing page.
///
/// Returns `Err` with a short reason when the attribute is missing or not
/// valid JSON.
pub fn data_items(html: &str) -> Result<Value, String> {
    let document = Html::parse_document(html);
    let raw = ["section.cascadingDropdownLinks[data-items]", "[data-items]"]
        .iter()
        .filter_map(|s| Selector::parse(s).ok())
        .find_map(|sel| {
            document
                .select(&sel)
                .find_map(|el| el.value().attr("data-items"))
                .map(str::to_string)
        })
        .ok_or_else(|| "no element with a data-items attribute".to_string())?;

    // The HTML parser already decodes entities; pages that double-encode the
    // attribute need a second pass.
    serde_json::from_str(&raw).or_else(|_| {
        let decoded = html_escape::decode_html_entities(&raw);
        serde_json::from_str(&decoded).map_err(|e| format!("data-items is not JSON: {e}"))
    })
}

/// Walk the tree and return `(url, path_label)` for every PDF leaf.
pub fn pdf_leaves(tree: &Value) -> Vec<(String, String)> {
    let mut out = Vec::new();
    let mut seen = HashSet::new();
    walk(tree, "", &mut out, &mut seen);
    out
}

fn walk(node: &Value, path: &str, out: &mut Vec<(String, String)>, seen: &mut HashSet<String>) {
    match node {
        Value::Array(items) => {
            for item in items {
                walk(item, path, out, seen);
            }
        }
        Value::Object(map) => {
            let title = map.get("Title").and_then(Value::as_str).unwrap_or("");
            let current = if path.is_empty() {
                title.to_string()
            } else {
                format!("{path} > {title}")
            };

            if let Some(url) = map.get("ResourceUrl").and_then(Value::as_str) {
                if is_pdf_url(url) && seen.insert(url.to_string()) {
                    out.push((url.to_string(), current.clone()));
                }
            }
            if let Some(children) = map.get("SubResources") {
                walk(children, &current, out, seen);
            }
        }
        _ => {}
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const PAGE: &str = r#"<html><body>
        <section class="cascadingDropdownLinks" data-items='[
          {"Title":"Personas","SubResources":[
             {"Title":"Tarjetas","ResourceUrl":"https://s.pe/t.pdf"},
             {"Title":"Cuentas","SubResources":[
                {"Title":"Ahorro","ResourceUrl":"https://s.pe/a.pdf"},
                {"Title":"Web","ResourceUrl":"https://s.pe/info.html"}
             ]}
          ]},
          {"Title":"Empresas","SubResources":[
             {"Title":"Carta fianza","ResourceUrl":"https://s.pe/t.pdf"}
          ]}
        ]'></section></body></html>"#;

    #[test]
    fn walks_tree_with_path_labels() {
        let tree = data_items(PAGE).unwrap();
        assert_eq!(
            pdf_leaves(&tree),
            vec![
                ("https://s.pe/t.pdf".to_string(), "Personas > Tarjetas".to_string()),
                (
                    "https://s.pe/a.pdf".to_string(),
                    "Personas > Cuentas > Ahorro".to_string()
                ),
            ]
        );
    }

    #[test]
    fn entity_encoded_attribute_is_parsed() {
        let page = r#"<section class="cascadingDropdownLinks" data-items="[{&quot;Title&quot;:&quot;X&quot;,&quot;ResourceUrl&quot;:&quot;https://s.pe/x.pdf&quot;}]"></section>"#;
        let tree = data_items(page).unwrap();
        assert_eq!(pdf_leaves(&tree).len(), 1);
    }

    #[test]
    fn missing_attribute_is_an_error() {
        assert!(data_items("<html><body><p>blocked</p></body></html>").is_err());
    }
}
