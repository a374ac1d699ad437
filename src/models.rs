//! Records passed between the scraper, the downloader and the reports.
//!
//! The serialized field names keep the Spanish keys of the historical JSON
//! reports (`texto`, `tipo_producto`, `banco`, …) so older report files and
//! newer ones can be compared side by side.

use crate::error::TarifarioError;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;

/// The five banks the pipeline knows how to scrape.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Bank {
    #[serde(rename = "BBVA Continental")]
    Bbva,
    #[serde(rename = "BCP")]
    Bcp,
    #[serde(rename = "Interbank")]
    Interbank,
    #[serde(rename = "Scotiabank")]
    Scotiabank,
    #[serde(rename = "Banco de la Nación")]
    BancoNacion,
}

impl Bank {
    pub const ALL: [Bank; 5] = [
        Bank::Bbva,
        Bank::Bcp,
        Bank::Interbank,
        Bank::Scotiabank,
        Bank::BancoNacion,
    ];

    /// Human-readable name, as the bank presents itself.
    pub fn display_name(self) -> &'static str {
        match self {
            Bank::Bbva => "BBVA Continental",
            Bank::Bcp => "BCP",
            Bank::Interbank => "Interbank",
            Bank::Scotiabank => "Scotiabank",
            Bank::BancoNacion => "Banco de la Nación",
        }
    }

    /// Directory name used under every stage directory.
    pub fn dir_name(self) -> String {
        self.display_name().replace(' ', "_")
    }

    /// Short lowercase name used on the command line.
    pub fn slug(self) -> &'static str {
        match self {
            Bank::Bbva => "bbva",
            Bank::Bcp => "bcp",
            Bank::Interbank => "interbank",
            Bank::Scotiabank => "scotiabank",
            Bank::BancoNacion => "banco-nacion",
        }
    }
}

impl fmt::Display for Bank {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.display_name())
    }
}

impl FromStr for Bank {
    type Err = TarifarioError;

    /// Accepts the slug, the display name or the directory name.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let needle = s.trim().to_lowercase().replace(['_', ' '], "-");
        Bank::ALL
            .into_iter()
            .find(|b| {
                b.slug() == needle
                    || b.display_name().to_lowercase().replace(' ', "-") == needle
            })
            .ok_or_else(|| TarifarioError::UnknownBank {
                name: s.to_string(),
            })
    }
}

/// One PDF link discovered by a scraper.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TarifarioUrl {
    pub url: String,
    #[serde(rename = "texto")]
    pub label: String,
    #[serde(rename = "tipo_producto")]
    pub category: String,
    #[serde(rename = "banco")]
    pub bank: Bank,
}

/// What the downloader learned about one file.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TarifarioMetadata {
    #[serde(rename = "banco")]
    pub bank: Bank,
    #[serde(rename = "nombre_archivo")]
    pub file_name: String,
    #[serde(rename = "url_origen")]
    pub source_url: String,
    #[serde(rename = "fecha_descarga")]
    pub downloaded_at: DateTime<Utc>,
    #[serde(rename = "tamano_bytes")]
    pub size_bytes: u64,
    #[serde(rename = "hash_sha256")]
    pub sha256: Option<String>,
    #[serde(rename = "tipo_producto")]
    pub category: String,
    /// The body starts with the `%PDF` magic bytes.
    #[serde(rename = "valido")]
    pub valid: bool,
    pub error: Option<String>,
}

/// Outcome of one download attempt.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DownloadResult {
    pub metadata: TarifarioMetadata,
    #[serde(rename = "ruta_archivo")]
    pub path: Option<PathBuf>,
    #[serde(rename = "exito")]
    pub success: bool,
    pub error: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn dir_names_replace_spaces() {
        assert_eq!(Bank::Bbva.dir_name(), "BBVA_Continental");
        assert_eq!(Bank::BancoNacion.dir_name(), "Banco_de_la_Nación");
        assert_eq!(Bank::Bcp.dir_name(), "BCP");
    }

    #[test]
    fn parse_accepts_slug_and_dir_name() {
        assert_eq!("bbva".parse::<Bank>().unwrap(), Bank::Bbva);
        assert_eq!("BBVA_Continental".parse::<Bank>().unwrap(), Bank::Bbva);
        assert_eq!("banco-nacion".parse::<Bank>().unwrap(), Bank::BancoNacion);
        assert_eq!("Banco_de_la_Nación".parse::<Bank>().unwrap(), Bank::BancoNacion);
        assert!("hsbc".parse::<Bank>().is_err());
    }

    #[test]
    fn url_serialises_with_report_keys() {
        let u = TarifarioUrl {
            url: "https://x/a.pdf".into(),
            label: "Tarjetas".into(),
            category: "tarjetas".into(),
            bank: Bank::Bcp,
        };
        let json = serde_json::to_value(&u).unwrap();
        assert_eq!(json["texto"], "Tarjetas");
        assert_eq!(json["tipo_producto"], "tarjetas");
        assert_eq!(json["banco"], "BCP");
    }
}
