//! Per-bank landing pages, keyword tables and fixed document lists.

use crate::models::Bank;
use crate::scrape::links::CategoryRules;

pub const BBVA_PAGES: &[&str] = &[
    "https://www.bbva.pe/personas/personas-naturales-y-microempresas.html",
    "https://www.bbva.pe/personas/pequenas-medianas-y-grandes-empresas.html",
];

pub const BCP_PAGE: &str = "https://www.viabcp.com/tasasytarifas";

pub const INTERBANK_PAGE: &str = "https://interbank.pe/tasas-tarifas";

/// Interbank renders one tab per segment/product, addressable as `?tabs=<id>`.
pub const INTERBANK_TABS: &[&str] = &[
    "banca-personas---cuentas",
    "banca-personas---tarjetas",
    "banca-personas---creditos",
    "banca-persona---pagos-y-servicios",
    "banca-empresas---cuentas",
    "banca-empresas---financiamientos",
    "banca-empresas---servicios",
    "banca-empresa---comercio-exterior",
    "banca-empresa---reactiva-peru",
    "banca-pequena-empresa---comercio-exterior",
    "banca-pequena-empresa---servicios",
    "banca-pequena-empresa---creditos",
    "banca-pequena-empresa---cuentas",
    "banca-pequena-empresa---leasing-bpe",
];

pub const SCOTIABANK_PAGE: &str = "https://www.scotiabank.com.pe/Acerca-de/Tarifario/default";

/// Banco de la Nación has no crawlable index; its documents live at stable URLs.
/// `(url, label, category)`.
pub const BANCO_NACION_DOCS: &[(&str, &str, &str)] = &[
    (
        "https://www.bn.com.pe/tasas-comisiones/Tarifario-BN.pdf",
        "Tarifario General 2025",
        "general",
    ),
    (
        "https://www.bn.com.pe/tasas-comisiones/tasas-tarjeta-credito.pdf",
        "Tarjetas de Crédito",
        "tarjetas",
    ),
    (
        "https://www.bn.com.pe/tasas-comisiones/tasas-prestamos-consumo.pdf",
        "Préstamos Multired Consumo",
        "prestamos",
    ),
    (
        "https://www.bn.com.pe/canales-atencion/documentos/comision-ventanillas-agentesBN.pdf",
        "Comisiones Ventanillas y Agentes",
        "comisiones",
    ),
];

const BBVA_RULES: CategoryRules = &[
    (&["tarjeta", "credito", "debito"], "tarjetas"),
    (&["prestamo", "credito"], "prestamos"),
    (&["cuenta", "ahorro", "deposito"], "cuentas"),
    (&["empresa", "pyme", "corporativo"], "empresas"),
    (&["hipotecario", "vivienda"], "hipotecarios"),
];

const BCP_RULES: CategoryRules = &[
    (&["tarjeta", "credito", "debito"], "tarjetas"),
    (&["prestamo", "credito"], "prestamos"),
    (&["cuenta", "ahorro"], "cuentas"),
    (&["empresa", "negocio"], "empresas"),
];

const INTERBANK_RULES: CategoryRules = &[
    (&["tarjeta", "credito", "debito", "visa", "mastercard"], "tarjetas"),
    (&["prestamo", "credito", "convenio", "financiamiento"], "prestamos"),
    (&["cuenta", "ahorro", "deposito"], "cuentas"),
    (&["hipotecario", "vivienda"], "hipotecarios"),
    (&["comercio", "exterior"], "comercio_exterior"),
    (&["leasing"], "leasing"),
    (&["servicio", "pago"], "servicios"),
];

const SCOTIABANK_RULES: CategoryRules = &[
    (&["tarjeta", "credito"], "tarjetas"),
    (&["prestamo", "credito"], "prestamos"),
    (&["cuenta", "ahorro"], "cuentas"),
    (&["comercio", "exterior", "carta"], "comercio_exterior"),
];

/// Keyword table used to categorise a bank's links.
pub fn category_rules(bank: Bank) -> CategoryRules {
    match bank {
        Bank::Bbva => BBVA_RULES,
        Bank::Bcp => BCP_RULES,
        Bank::Interbank => INTERBANK_RULES,
        Bank::Scotiabank => SCOTIABANK_RULES,
        Bank::BancoNacion => &[],
    }
}

/// Landing pages whose `a[href]` links are harvested.
pub fn landing_pages(bank: Bank) -> Vec<String> {
    match bank {
        Bank::Bbva => BBVA_PAGES.iter().map(|s| s.to_string()).collect(),
        Bank::Bcp => vec![BCP_PAGE.to_string()],
        Bank::Interbank => std::iter::once(INTERBANK_PAGE.to_string())
            .chain(
                INTERBANK_TABS
                    .iter()
                    .map(|tab| format!("{INTERBANK_PAGE}?tabs={tab}")),
            )
            .collect(),
        Bank::Scotiabank | Bank::BancoNacion => Vec::new(),
    }
}
