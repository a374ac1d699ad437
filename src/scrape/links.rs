//! PDF link harvesting and category inference.

use scraper::{ElementRef, Html, Selector};
use std::collections::HashSet;
use url::Url;

/// A PDF link found on a landing page, before category inference.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PdfLink {
    pub url: String,
    pub label: String,
}

/// Whether `href` points at a PDF.
pub fn is_pdf_url(href: &str) -> bool {
    href.to_lowercase().contains(".pdf")
}

/// Collect every `a[href]` pointing at a PDF, resolved against `base_url`.
///
/// Links are deduplicated by absolute URL, keeping the first occurrence.
pub fn harvest_pdf_links(html: &str, base_url: &str) -> Vec<PdfLink> {
    let document = Html::parse_document(html);
    let Ok(anchor) = Selector::parse("a[href]") else {
        return Vec::new();
    };
    let base = Url::parse(base_url).ok();

    let mut seen = HashSet::new();
    let mut links = Vec::new();
    for a in document.select(&anchor) {
        let Some(href) = a.value().attr("href").map(str::trim) else {
            continue;
        };
        if href.is_empty() || !is_pdf_url(href) {
            continue;
        }
        let Some(url) = resolve(base.as_ref(), href) else {
            continue;
        };
        if !seen.insert(url.clone()) {
            continue;
        }
        let label = link_label(&a, &url);
        links.push(PdfLink { url, label });
    }
    links
}

fn resolve(base: Option<&Url>, href: &str) -> Option<String> {
    if href.starts_with("http://") || href.starts_with("https://") {
        return Some(href.to_string());
    }
    base?.join(href).ok().map(String::from)
}

/// Link text, then `title`, then `aria-label`, then the file name.
fn link_label(a: &ElementRef<'_>, url: &str) -> String {
    let text = collapse_whitespace(&a.text().collect::<String>());
    if !text.is_empty() {
        return text;
    }
    for attr in ["title", "aria-label"] {
        if let Some(v) = a.value().attr(attr).map(collapse_whitespace) {
            if !v.is_empty() {
                return v;
            }
        }
    }
    label_from_url(url)
}

/// `.../tasas-tarjeta-credito.pdf` → `tasas tarjeta credito`.
pub fn label_from_url(url: &str) -> String {
    url.rsplit('/')
        .next()
        .unwrap_or(url)
        .replace(".pdf", "")
        .replace('-', " ")
}

pub fn collapse_whitespace(s: &str) -> String {
    s.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Ordered keyword rules; the first rule with a matching keyword wins.
pub type CategoryRules = &'static [(&'static [&'static str], &'static str)];

/// Infer a product category from a link label and URL.
pub fn infer_category(rules: CategoryRules, label: &str, url: &str) -> String {
    let haystack = format!("{label} {url}").to_lowercase();
    rules
        .iter()
        .find(|(keywords, _)| keywords.iter().any(|k| haystack.contains(k)))
        .map(|(_, category)| *category)
        .unwrap_or("otros")
        .to_string()
}
