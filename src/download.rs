//! Stage 2: download scraped PDFs into `raw/<bank>/`.
//!
//! Bodies are streamed to `<file>.part` while being hashed, then renamed.
//! A partially downloaded file therefore never sits under the final name
//! where the rasterizer would pick it up.

use crate::config::PipelineConfig;
use crate::error::{PageError, TarifarioError};
use crate::http::HttpClient;
use crate::models::{Bank, DownloadResult, TarifarioMetadata, TarifarioUrl};
use crate::report::RunReport;
use chrono::Utc;
use futures::{Stream, StreamExt};
use serde::Serialize;
use sha2::{Digest, Sha256};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::io::AsyncWriteExt;
use tracing::{info, warn};
use url::Url;

/// Local file name for a scraped link.
///
/// The last path segment when it names a PDF (any case, query ignored),
/// otherwise the label; either way the extension is `.pdf` and only ASCII
/// alphanumerics and `._-` survive.
pub fn file_name_for(url: &TarifarioUrl) -> String {
    let segment = Url::parse(&url.url)
        .ok()
        .and_then(|u| u.path_segments()?.next_back().map(str::to_string))
        .unwrap_or_default();
    let stem = segment
        .len()
        .checked_sub(4)
        .and_then(|cut| {
            let ext = segment.get(cut..)?;
            ext.eq_ignore_ascii_case(".pdf").then(|| segment[..cut].to_string())
        })
        .filter(|stem| !stem.is_empty())
        .unwrap_or_else(|| url.label.replace([' ', '/'], "_"));
    format!("{stem}.pdf")
        .chars()
        .filter(|c| c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '-'))
        .collect()
}

/// What [`save_stream`] learned about the body.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SavedBody {
    pub size: u64,
    pub sha256: String,
    pub is_pdf: bool,
}

/// Stream chunks to `dest` via `<dest>.part`, hashing as they arrive.
pub async fn save_stream<S, B, E>(mut body: S, dest: &Path) -> Result<SavedBody, String>
where
    S: Stream<Item = Result<B, E>> + Unpin,
    B: AsRef<[u8]>,
    E: std::fmt::Display,
{
    let part = dest.with_extension("pdf.part");
    let mut file = tokio::fs::File::create(&part)
        .await
        .map_err(|e| format!("{}: {e}", part.display()))?;

    let mut hasher = Sha256::new();
    let mut size = 0u64;
    let mut head = Vec::with_capacity(4);

    let result: Result<(), String> = async {
        while let Some(chunk) = body.next().await {
            let chunk = chunk.map_err(|e| e.to_string())?;
            let bytes = chunk.as_ref();
            if head.len() < 4 {
                let need = 4 - head.len();
                head.extend_from_slice(&bytes[..need.min(bytes.len())]);
            }
            hasher.update(bytes);
            size += bytes.len() as u64;
            file.write_all(bytes).await.map_err(|e| e.to_string())?;
        }
        file.flush().await.map_err(|e| e.to_string())
    }
    .await;

    if let Err(e) = result {
        let _ = tokio::fs::remove_file(&part).await;
        return Err(e);
    }
    drop(file);
    tokio::fs::rename(&part, dest)
        .await
        .map_err(|e| format!("{}: {e}", dest.display()))?;

    Ok(SavedBody {
        size,
        sha256: hex::encode(hasher.finalize()),
        is_pdf: head == b"%PDF",
    })
}

/// Download one link into `raw_dir/<bank_dir>/`.
///
/// Never fails: errors end up in the returned record.
pub async fn download_one(client: &HttpClient, raw_dir: &Path, url: &TarifarioUrl) -> DownloadResult {
    let file_name = file_name_for(url);
    let dest = raw_dir.join(url.bank.dir_name()).join(&file_name);

    let outcome = async {
        if let Some(parent) = dest.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| format!("{}: {e}", parent.display()))?;
        }
        let resp = client.get(&url.url).await?;
        save_stream(Box::pin(resp.bytes_stream()), &dest).await
    }
    .await;

    let mut metadata = TarifarioMetadata {
        bank: url.bank,
        file_name,
        source_url: url.url.clone(),
        downloaded_at: Utc::now(),
        size_bytes: 0,
        sha256: None,
        category: url.category.clone(),
        valid: false,
        error: None,
    };

    match outcome {
        Ok(saved) => {
            if !saved.is_pdf {
                warn!("{}: body does not start with %PDF", dest.display());
            }
            info!("Downloaded {} ({} bytes)", dest.display(), saved.size);
            metadata.size_bytes = saved.size;
            metadata.sha256 = Some(saved.sha256);
            metadata.valid = saved.is_pdf;
            DownloadResult {
                metadata,
                path: Some(dest),
                success: true,
                error: None,
            }
        }
        Err(detail) => {
            let err = PageError::DownloadFailed {
                url: url.url.clone(),
                detail,
            }
            .to_string();
            warn!("{}", err);
            metadata.error = Some(err.clone());
            DownloadResult {
                metadata,
                path: None,
                success: false,
                error: Some(err),
            }
        }
    }
}

/// Per-bank counts in the download report.
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct BankDownloadSummary {
    #[serde(rename = "banco")]
    pub bank: Bank,
    #[serde(rename = "urls_encontradas")]
    pub found: usize,
    #[serde(rename = "descargas_exitosas")]
    pub ok: usize,
    #[serde(rename = "descargas_fallidas")]
    pub failed: usize,
}

/// Summarise results per bank, in [`Bank::ALL`] order.
pub fn summarize(results: &[DownloadResult]) -> Vec<BankDownloadSummary> {
    Bank::ALL
        .into_iter()
        .filter_map(|bank| {
            let mine: Vec<_> = results.iter().filter(|r| r.metadata.bank == bank).collect();
            if mine.is_empty() {
                return None;
            }
            let ok = mine.iter().filter(|r| r.success).count();
            Some(BankDownloadSummary {
                bank,
                found: mine.len(),
                ok,
                failed: mine.len() - ok,
            })
        })
        .collect()
}

/// Download every link sequentially and write `reporte_descarga.json`.
pub async fn download_all(
    config: &PipelineConfig,
    urls: &[TarifarioUrl],
) -> Result<Vec<DownloadResult>, TarifarioError> {
    let layout = config.layout();
    let client = HttpClient::new(config)?;
    let delay = Duration::from_millis(config.request_delay_ms);
    let cb = config.progress_callback.as_ref();

    if let Some(cb) = cb {
        cb.on_stage_start("download", urls.len());
    }

    let mut results = Vec::with_capacity(urls.len());
    for (i, url) in urls.iter().enumerate() {
        if i > 0 && !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
        if let Some(cb) = cb {
            cb.on_item_start(&url.label);
        }
        let result = download_one(&client, &layout.raw_dir(), url).await;
        if let Some(cb) = cb {
            match &result.error {
                None => cb.on_item_complete(
                    &url.label,
                    &format!("{} KB", result.metadata.size_bytes / 1024),
                ),
                Some(e) => cb.on_item_error(&url.label, e),
            }
        }
        results.push(result);
    }

    let summary = summarize(&results);
    let ok = results.iter().filter(|r| r.success).count();
    if let Some(cb) = cb {
        cb.on_stage_complete("download", results.len(), ok);
    }
    info!("Downloads: {}/{} ok", ok, results.len());

    RunReport::new("descarga", summary, results.clone())
        .save(&layout.reports_dir(), "reporte_descarga.json")?;
    Ok(results)
}

/// Paths of every downloaded PDF under `raw_dir`, sorted.
pub fn list_raw_pdfs(raw_dir: &Path) -> Result<Vec<(String, PathBuf)>, TarifarioError> {
    let mut out = Vec::new();
    let banks = std::fs::read_dir(raw_dir).map_err(|e| TarifarioError::read(raw_dir, e))?;
    for bank in banks.flatten() {
        let bank_path = bank.path();
        if !bank_path.is_dir() {
            continue;
        }
        let bank_name = bank.file_name().to_string_lossy().to_string();
        let files =
            std::fs::read_dir(&bank_path).map_err(|e| TarifarioError::read(&bank_path, e))?;
        for f in files.flatten() {
            let p = f.path();
            if p.extension().is_some_and(|e| e.eq_ignore_ascii_case("pdf")) {
                out.push((bank_name.clone(), p));
            }
        }
    }
    out.sort();
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn link(url: &str, label: &str) -> TarifarioUrl {
        TarifarioUrl {
            url: url.into(),
            label: label.into(),
            category: "otros".into(),
            bank: Bank::Bcp,
        }
    }

    #[test]
    fn file_name_from_url_segment() {
        assert_eq!(
            file_name_for(&link("https://x.pe/docs/Tarifario-BN.pdf", "x")),
            "Tarifario-BN.pdf"
        );
    }

    #[test]
    fn file_name_ignores_extension_case_and_query() {
        assert_eq!(
            file_name_for(&link("https://x.pe/docs/TARIFARIO.PDF", "x")),
            "TARIFARIO.pdf"
        );
        assert_eq!(
            file_name_for(&link("https://x.pe/docs/cuentas.pdf?v=20250110#page=2", "x")),
            "cuentas.pdf"
        );
    }

    #[test]
    fn file_name_from_label_when_url_is_not_a_pdf_name() {
        assert_eq!(
            file_name_for(&link("https://x.pe/get?id=3", "Tarjetas de Crédito / Oro")),
            "Tarjetas_de_Crdito___Oro.pdf"
        );
    }

    #[tokio::test]
    async fn save_stream_hashes_and_checks_magic() {
        let dir = tempfile::tempdir().unwrap();
        let dest = dir.path().join("a.pdf");
        let chunks: Vec<Result<Vec<u8>, String>> =
            vec![Ok(b"%P".to_vec()), Ok(b"DF-1.7 body".to_vec())];
        let saved = save_stream(futures::stream::iter(chunks), &dest).await.unwrap();

        assert!(saved.is_pdf);
        assert_eq!(saved.size, 13);
        assert_eq!(saved.sha256, hex::encode(Sha256::digest(b"%PDF-1.7 body")));
        assert_eq!(std::fs::read(&dest).unwrap(), b"%PDF-1.7 body");
        assert!(!dir.path().join("a.pdf.part").exists());
    }

    #[tokio::test]
    async fn save_stream_flags_html_bodies() {
        let dir = tempfile::tempdir().unwrap();
        let dest = dir.path().join("b.pdf");
        let chunks: Vec<Result<&[u8], String>> = vec![Ok(&b"<html>blocked</html>"[..])];
        let saved = save_stream(futures::stream::iter(chunks), &dest).await.unwrap();
        assert!(!saved.is_pdf);
    }

    #[tokio::test]
    async fn failed_stream_leaves_no_file() {
        let dir = tempfile::tempdir().unwrap();
        let dest = dir.path().join("c.pdf");
        let chunks: Vec<Result<&[u8], String>> = vec![Ok(&b"%PDF"[..]), Err("reset".into())];
        let err = save_stream(futures::stream::iter(chunks), &dest).await.unwrap_err();
        assert_eq!(err, "reset");
        assert!(!dest.exists());
        assert!(!dir.path().join("c.pdf.part").exists());
    }

    #[test]
    fn summary_counts_per_bank() {
        let ok = DownloadResult {
            metadata: TarifarioMetadata {
                bank: Bank::Bcp,
                file_name: "a.pdf".into(),
                source_url: "u".into(),
                downloaded_at: Utc::now(),
                size_bytes: 1,
                sha256: None,
                category: "otros".into(),
                valid: true,
                error: None,
            },
            path: None,
            success: true,
            error: None,
        };
        let mut bad = ok.clone();
        bad.success = false;
        let s = summarize(&[ok, bad]);
        assert_eq!(
            s,
            vec![BankDownloadSummary {
                bank: Bank::Bcp,
                found: 2,
                ok: 1,
                failed: 1
            }]
        );
    }
}
