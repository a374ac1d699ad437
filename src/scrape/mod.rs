//! Stage 1: discover tariff PDF links on each bank's website.
//!
//! Three strategies cover the five banks:
//!
//! * **Link harvesting** (BBVA, BCP, Interbank): fetch landing pages and
//!   keep every `a[href]` that points at a PDF.
//! * **Embedded JSON** (Scotiabank): the document tree sits in a
//!   `data-items` attribute; see [`scotiabank`].
//! * **Fixed list** (Banco de la Nación): stable URLs, no fetching.
//!
//! Pages are fetched through the [`PageSource`] trait so tests can serve
//! canned HTML. A landing page that fails to load is logged and skipped;
//! the other pages of the bank are still scraped.

pub mod banks;
pub mod links;
pub mod scotiabank;

use crate::config::DataLayout;
use crate::error::TarifarioError;
use crate::http::HttpClient;
use crate::models::{Bank, TarifarioUrl};
use crate::report::write_json;
use std::collections::HashSet;
use std::future::Future;
use std::path::PathBuf;
use tracing::{info, warn};

/// Fetches a page's HTML.
pub trait PageSource: Send + Sync {
    fn fetch_text(&self, url: &str) -> impl Future<Output = Result<String, TarifarioError>> + Send;
}

impl PageSource for HttpClient {
    async fn fetch_text(&self, url: &str) -> Result<String, TarifarioError> {
        self.get_text(url).await
    }
}

/// Scrape one bank.
pub async fn scrape_bank<S: PageSource>(bank: Bank, source: &S) -> Vec<TarifarioUrl> {
    info!("Scraping {}", bank);
    let urls = match bank {
        Bank::BancoNacion => banks::BANCO_NACION_DOCS
            .iter()
            .map(|(url, label, category)| TarifarioUrl {
                url: url.to_string(),
                label: label.to_string(),
                category: category.to_string(),
                bank,
            })
            .collect(),
        Bank::Scotiabank => scrape_scotiabank(source).await,
        _ => scrape_landing_pages(bank, source).await,
    };
    info!("{}: {} PDF links", bank, urls.len());
    urls
}

/// Scrape several banks in order and concatenate their links.
pub async fn scrape_all<S: PageSource>(banks: &[Bank], source: &S) -> Vec<TarifarioUrl> {
    let mut all = Vec::new();
    for &bank in banks {
        all.extend(scrape_bank(bank, source).await);
    }
    all
}

/// Write the scrape result to `urls_scrapeadas.json`.
pub fn save_scraped(layout: &DataLayout, urls: &[TarifarioUrl]) -> Result<PathBuf, TarifarioError> {
    let path = layout.scraped_urls_file();
    write_json(&path, urls)?;
    Ok(path)
}

/// Read a previous scrape result back.
pub fn load_scraped(layout: &DataLayout) -> Result<Vec<TarifarioUrl>, TarifarioError> {
    let path = layout.scraped_urls_file();
    let text = std::fs::read_to_string(&path).map_err(|e| TarifarioError::read(&path, e))?;
    serde_json::from_str(&text).map_err(|e| TarifarioError::Json {
        path,
        detail: e.to_string(),
    })
}

async fn scrape_landing_pages<S: PageSource>(bank: Bank, source: &S) -> Vec<TarifarioUrl> {
    let rules = banks::category_rules(bank);
    let mut seen = HashSet::new();
    let mut out = Vec::new();

    for page in banks::landing_pages(bank) {
        let html = match source.fetch_text(&page).await {
            Ok(html) => html,
            Err(e) => {
                warn!("{}: skipping {}: {}", bank, page, e);
                continue;
            }
        };
        for link in links::harvest_pdf_links(&html, &page) {
            if !seen.insert(link.url.clone()) {
                continue;
            }
            let category = links::infer_category(rules, &link.label, &link.url);
            out.push(TarifarioUrl {
                url: link.url,
                label: link.label,
                category,
                bank,
            });
        }
    }
    out
}

async fn scrape_scotiabank<S: PageSource>(source: &S) -> Vec<TarifarioUrl> {
    let bank = Bank::Scotiabank;
    let html = match source.fetch_text(banks::SCOTIABANK_PAGE).await {
        Ok(html) => html,
        Err(e) => {
            warn!("{}: {}", bank, e);
            return Vec::new();
        }
    };
    let tree = match scotiabank::data_items(&html) {
        Ok(tree) => tree,
        Err(reason) => {
            warn!("{}: {}: {}", bank, banks::SCOTIABANK_PAGE, reason);
            return Vec::new();
        }
    };

    let rules = banks::category_rules(bank);
    scotiabank::pdf_leaves(&tree)
        .into_iter()
        .map(|(url, label)| TarifarioUrl {
            category: links::infer_category(rules, &label, &url),
            url,
            label,
            bank,
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    /// Serves canned HTML; unknown URLs fail like a 404.
    struct FakeSite(HashMap<String, String>);

    impl PageSource for FakeSite {
        async fn fetch_text(&self, url: &str) -> Result<String, TarifarioError> {
            self.0
                .get(url)
                .cloned()
                .ok_or_else(|| TarifarioError::FetchFailed {
                    url: url.to_string(),
                    reason: "HTTP 404".into(),
                })
        }
    }

    #[tokio::test]
    async fn bbva_dedups_across_pages_and_survives_a_failing_page() {
        let mut pages = HashMap::new();
        pages.insert(
            banks::BBVA_PAGES[0].to_string(),
            r#"<a href="/content/dam/tarjeta-credito.pdf">Tarjeta</a>
               <a href="/content/dam/cuenta-ahorro.pdf">Cuenta de ahorro</a>"#
                .to_string(),
        );
        // The second BBVA page is missing: FakeSite returns an error for it.
        let site = FakeSite(pages);

        let urls = scrape_bank(Bank::Bbva, &site).await;
        assert_eq!(urls.len(), 2);
        assert_eq!(urls[0].url, "https://www.bbva.pe/content/dam/tarjeta-credito.pdf");
        assert_eq!(urls[0].category, "tarjetas");
        assert_eq!(urls[1].category, "cuentas");
        assert!(urls.iter().all(|u| u.bank == Bank::Bbva));
    }

    #[tokio::test]
    async fn banco_nacion_needs_no_network() {
        let site = FakeSite(HashMap::new());
        let urls = scrape_bank(Bank::BancoNacion, &site).await;
        assert_eq!(urls.len(), 4);
        assert_eq!(urls[1].category, "tarjetas");
    }

    #[tokio::test]
    async fn scotiabank_reads_data_items() {
        let mut pages = HashMap::new();
        pages.insert(
            banks::SCOTIABANK_PAGE.to_string(),
            r#"<section class="cascadingDropdownLinks" data-items='[{"Title":"Cuentas","ResourceUrl":"https://s.pe/c.pdf"}]'></section>"#
                .to_string(),
        );
        let urls = scrape_bank(Bank::Scotiabank, &FakeSite(pages)).await;
        assert_eq!(urls.len(), 1);
        assert_eq!(urls[0].label, "Cuentas");
        assert_eq!(urls[0].category, "cuentas");
    }

    #[test]
    fn scraped_urls_roundtrip_through_data_root() {
        let dir = tempfile::tempdir().unwrap();
        let layout = DataLayout::new(dir.path());
        let urls = vec![TarifarioUrl {
            url: "https://x/a.pdf".into(),
            label: "A".into(),
            category: "otros".into(),
            bank: Bank::Bcp,
        }];
        save_scraped(&layout, &urls).unwrap();
        assert_eq!(load_scraped(&layout).unwrap(), urls);
    }
}
