//! Load the flattened CSV into MySQL.
//!
//! `output/tarifarios_bancarios.csv` → database `tarifarios_bancarios`:
//!
//! ```text
//! tarifarios          one row per CSV row, reloaded from scratch each run
//! resumen_por_banco   per-bank counts by type, MN rate mean/max/min
//! ```
//!
//! Connection parameters come from `MYSQL_HOST`, `MYSQL_PORT`, `MYSQL_USER`,
//! `MYSQL_PASSWORD` and `MYSQL_DATABASE` (see [`MysqlSettings`]). The
//! database and both tables are created when missing. Rows are inserted in
//! transactions of [`INSERT_CHUNK`]; a row the server rejects is counted and
//! reported without aborting the load. The SQL lives here unconditionally;
//! talking to a server needs the `mysql` feature.

use crate::error::TarifarioError;
use crate::viewer::Tarifa;
use serde::Serialize;
use std::collections::BTreeMap;
use std::fmt;

pub const DEFAULT_DATABASE: &str = "tarifarios_bancarios";
pub const INSERT_CHUNK: usize = 100;

// ── Settings ─────────────────────────────────────────────────────────────

#[derive(Clone, PartialEq, Eq)]
pub struct MysqlSettings {
    pub host: String,
    pub port: u16,
    pub user: String,
    pub password: String,
    pub database: String,
}

impl fmt::Debug for MysqlSettings {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MysqlSettings")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("user", &self.user)
            .field("password", &if self.password.is_empty() { "" } else { "***" })
            .field("database", &self.database)
            .finish()
    }
}

impl Default for MysqlSettings {
    fn default() -> Self {
        Self {
            host: "localhost".into(),
            port: 3306,
            user: "root".into(),
            password: String::new(),
            database: DEFAULT_DATABASE.into(),
        }
    }
}

impl MysqlSettings {
    pub fn from_env() -> Result<Self, TarifarioError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Read settings through `get`; unset or empty keys keep their default.
    pub fn from_lookup(get: impl Fn(&str) -> Option<String>) -> Result<Self, TarifarioError> {
        let get = |key: &str| get(key).filter(|v| !v.trim().is_empty());
        let mut s = Self::default();
        if let Some(host) = get("MYSQL_HOST") {
            s.host = host;
        }
        if let Some(port) = get("MYSQL_PORT") {
            s.port = port.trim().parse().map_err(|_| {
                TarifarioError::InvalidConfig(format!("MYSQL_PORT must be a port number, got '{port}'"))
            })?;
        }
        if let Some(user) = get("MYSQL_USER") {
            s.user = user;
        }
        if let Some(password) = get("MYSQL_PASSWORD") {
            s.password = password;
        }
        if let Some(database) = get("MYSQL_DATABASE") {
            s.database = database;
        }
        if !is_identifier(&s.database) {
            return Err(TarifarioError::InvalidConfig(format!(
                "MYSQL_DATABASE must be letters, digits and '_' (got '{}')",
                s.database
            )));
        }
        Ok(s)
    }
}

/// The database name is spliced into DDL, so it is restricted to a plain
/// unquoted identifier.
fn is_identifier(name: &str) -> bool {
    !name.is_empty() && name.len() <= 64 && name.chars().all(|c| c.is_ascii_alphanumeric() || c == '_')
}

// ── SQL ──────────────────────────────────────────────────────────────────

pub fn create_database_sql(database: &str) -> String {
    format!("CREATE DATABASE IF NOT EXISTS {database} CHARACTER SET utf8mb4 COLLATE utf8mb4_unicode_ci")
}

pub const CREATE_TARIFARIOS: &str = r#"
CREATE TABLE IF NOT EXISTS tarifarios (
    id INT AUTO_INCREMENT PRIMARY KEY,
    banco VARCHAR(100) NOT NULL,
    producto_codigo VARCHAR(200) NOT NULL,
    producto_nombre VARCHAR(500),
    concepto VARCHAR(500),
    descripcion_breve TEXT,
    tipo VARCHAR(20),
    tasa_porcentaje_mn DECIMAL(10, 4),
    monto_fijo_mn DECIMAL(15, 2),
    monto_minimo_mn DECIMAL(15, 2),
    monto_maximo_mn DECIMAL(15, 2),
    tasa_porcentaje_me DECIMAL(10, 4),
    monto_fijo_me DECIMAL(15, 2),
    monto_minimo_me DECIMAL(15, 2),
    monto_maximo_me DECIMAL(15, 2),
    moneda VARCHAR(20),
    fecha_vigencia VARCHAR(20),
    fecha_extraccion VARCHAR(20),
    periodicidad VARCHAR(200),
    oportunidad_cobro VARCHAR(500),
    observaciones TEXT,
    fecha_carga TIMESTAMP DEFAULT CURRENT_TIMESTAMP,
    INDEX idx_banco (banco),
    INDEX idx_tipo (tipo),
    INDEX idx_producto (producto_codigo),
    INDEX idx_moneda (moneda),
    INDEX idx_banco_tipo (banco, tipo)
) ENGINE=InnoDB DEFAULT CHARSET=utf8mb4 COLLATE=utf8mb4_unicode_ci"#;

pub const CREATE_RESUMEN: &str = r#"
CREATE TABLE IF NOT EXISTS resumen_por_banco (
    id INT AUTO_INCREMENT PRIMARY KEY,
    banco VARCHAR(100) NOT NULL UNIQUE,
    total_items INT DEFAULT 0,
    total_tasas INT DEFAULT 0,
    total_comisiones INT DEFAULT 0,
    total_gastos INT DEFAULT 0,
    total_seguros INT DEFAULT 0,
    total_otros INT DEFAULT 0,
    tasa_promedio_mn DECIMAL(10, 4),
    tasa_maxima_mn DECIMAL(10, 4),
    tasa_minima_mn DECIMAL(10, 4),
    fecha_actualizacion TIMESTAMP DEFAULT CURRENT_TIMESTAMP ON UPDATE CURRENT_TIMESTAMP
) ENGINE=InnoDB DEFAULT CHARSET=utf8mb4 COLLATE=utf8mb4_unicode_ci"#;

pub const REFRESH_RESUMEN: &str = r#"
INSERT INTO resumen_por_banco (
    banco, total_items, total_tasas, total_comisiones,
    total_gastos, total_seguros, total_otros,
    tasa_promedio_mn, tasa_maxima_mn, tasa_minima_mn
)
SELECT
    banco,
    COUNT(*),
    SUM(CASE WHEN tipo = 'TASA' THEN 1 ELSE 0 END),
    SUM(CASE WHEN tipo = 'COMISION' THEN 1 ELSE 0 END),
    SUM(CASE WHEN tipo = 'GASTO' THEN 1 ELSE 0 END),
    SUM(CASE WHEN tipo = 'SEGURO' THEN 1 ELSE 0 END),
    SUM(CASE WHEN tipo = 'OTRO' THEN 1 ELSE 0 END),
    AVG(tasa_porcentaje_mn),
    MAX(tasa_porcentaje_mn),
    MIN(tasa_porcentaje_mn)
FROM tarifarios
GROUP BY banco
ORDER BY banco"#;

/// Insert column order; [`row_values`] yields values in the same order.
pub const INSERT_COLUMNS: [&str; 20] = [
    "banco",
    "producto_codigo",
    "producto_nombre",
    "concepto",
    "descripcion_breve",
    "tipo",
    "tasa_porcentaje_mn",
    "tasa_porcentaje_me",
    "monto_fijo_mn",
    "monto_fijo_me",
    "monto_minimo_mn",
    "monto_maximo_mn",
    "monto_minimo_me",
    "monto_maximo_me",
    "moneda",
    "fecha_vigencia",
    "fecha_extraccion",
    "periodicidad",
    "oportunidad_cobro",
    "observaciones",
];

pub fn insert_sql() -> String {
    let placeholders = vec!["?"; INSERT_COLUMNS.len()].join(", ");
    format!(
        "INSERT INTO tarifarios ({}) VALUES ({placeholders})",
        INSERT_COLUMNS.join(", ")
    )
}

// ── Row values ───────────────────────────────────────────────────────────

/// One bound parameter. `None` binds SQL `NULL`.
#[derive(Debug, Clone, PartialEq)]
pub enum SqlValue {
    Text(Option<String>),
    Number(Option<f64>),
}

/// Text that means "no value" in the CSV becomes `None`.
pub fn clean_text(text: &str) -> Option<String> {
    let trimmed = text.trim();
    match trimmed.to_lowercase().as_str() {
        "" | "n/a" | "nan" | "none" | "null" => None,
        _ => Some(trimmed.to_string()),
    }
}

pub fn row_values(t: &Tarifa) -> [SqlValue; 20] {
    let text = |s: &str| SqlValue::Text(clean_text(s));
    let num = |v: Option<f64>| SqlValue::Number(v.filter(|x| x.is_finite()));
    [
        text(&t.banco),
        text(&t.producto_codigo),
        text(&t.producto_nombre),
        text(&t.concepto),
        text(&t.descripcion_breve),
        text(&t.tipo),
        num(t.tasa_porcentaje_mn),
        num(t.tasa_porcentaje_me),
        num(t.monto_fijo_mn),
        num(t.monto_fijo_me),
        num(t.monto_minimo_mn),
        num(t.monto_maximo_mn),
        num(t.monto_minimo_me),
        num(t.monto_maximo_me),
        text(&t.moneda),
        text(&t.fecha_vigencia),
        text(&t.fecha_extraccion),
        text(&t.periodicidad),
        text(&t.oportunidad_cobro),
        text(&t.observaciones),
    ]
}

// ── Results ──────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize)]
pub struct RowFailure {
    /// 1-based data row in the CSV.
    pub fila: usize,
    pub banco: String,
    pub error: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct LoadSummary {
    pub base_datos: String,
    pub filas_csv: usize,
    pub insertados: usize,
    pub errores: usize,
    pub insertados_por_banco: BTreeMap<String, usize>,
}

// ── Loader ───────────────────────────────────────────────────────────────

#[cfg(feature = "mysql")]
pub use load::load_mysql;

#[cfg(feature = "mysql")]
mod load {
    use super::*;
    use crate::config::PipelineConfig;
    use crate::report::RunReport;
    use crate::viewer::Dataset;
    use sqlx::mysql::{MySqlConnectOptions, MySqlConnection};
    use sqlx::{Connection, Executor};
    use std::path::Path;
    use tracing::{debug, info, warn};

    fn db_err(e: sqlx::Error) -> TarifarioError {
        TarifarioError::Database {
            detail: e.to_string(),
        }
    }

    async fn run(conn: &mut MySqlConnection, sql: &str) -> Result<(), TarifarioError> {
        conn.execute(sql).await.map(|_| ()).map_err(db_err)
    }

    /// Create the schema if needed, reload `tarifarios` from `csv` (the full
    /// projection by default), refresh `resumen_por_banco` and write
    /// `reporte_mysql.json`.
    pub async fn load_mysql(
        config: &PipelineConfig,
        settings: &MysqlSettings,
        csv: Option<&Path>,
    ) -> Result<LoadSummary, TarifarioError> {
        let layout = config.layout();
        let path = csv.map(Path::to_path_buf).unwrap_or_else(|| layout.full_csv());
        let data = Dataset::load(&path)?;
        let cb = config.progress_callback.as_ref();

        info!(
            "Connecting to MySQL {}@{}:{}",
            settings.user, settings.host, settings.port
        );
        let options = MySqlConnectOptions::new()
            .host(&settings.host)
            .port(settings.port)
            .username(&settings.user)
            .password(&settings.password)
            .charset("utf8mb4");

        let mut server = MySqlConnection::connect_with(&options).await.map_err(db_err)?;
        run(&mut server, &create_database_sql(&settings.database)).await?;
        server.close().await.map_err(db_err)?;

        let mut conn = MySqlConnection::connect_with(&options.database(&settings.database))
            .await
            .map_err(db_err)?;
        run(&mut conn, CREATE_TARIFARIOS).await?;
        run(&mut conn, CREATE_RESUMEN).await?;
        run(&mut conn, "TRUNCATE TABLE tarifarios").await?;

        if let Some(cb) = cb {
            cb.on_stage_start("mysql", data.len());
        }
        let sql = insert_sql();
        let mut summary = LoadSummary {
            base_datos: settings.database.clone(),
            filas_csv: data.len(),
            ..Default::default()
        };
        let mut failures = Vec::new();

        for (chunk_no, chunk) in data.rows().chunks(INSERT_CHUNK).enumerate() {
            let mut tx = conn.begin().await.map_err(db_err)?;
            for (i, row) in chunk.iter().enumerate() {
                let mut query = sqlx::query(&sql);
                for value in row_values(row) {
                    query = match value {
                        SqlValue::Text(v) => query.bind(v),
                        SqlValue::Number(v) => query.bind(v),
                    };
                }
                match query.execute(&mut *tx).await {
                    Ok(_) => {
                        summary.insertados += 1;
                        *summary
                            .insertados_por_banco
                            .entry(row.banco.clone())
                            .or_default() += 1;
                    }
                    Err(e) => {
                        let fila = chunk_no * INSERT_CHUNK + i + 1;
                        if failures.len() < 10 {
                            warn!("Row {} ({}): {}", fila, row.banco, e);
                        }
                        failures.push(RowFailure {
                            fila,
                            banco: row.banco.clone(),
                            error: e.to_string(),
                        });
                    }
                }
            }
            tx.commit().await.map_err(db_err)?;
            let done = (chunk_no * INSERT_CHUNK + chunk.len()).min(data.len());
            debug!("Inserted {}/{} rows", done, data.len());
            if let Some(cb) = cb {
                cb.on_item_complete(&format!("{done}/{}", data.len()), "committed");
            }
        }
        summary.errores = failures.len();

        run(&mut conn, "TRUNCATE TABLE resumen_por_banco").await?;
        run(&mut conn, REFRESH_RESUMEN).await?;
        conn.close().await.map_err(db_err)?;

        if let Some(cb) = cb {
            cb.on_stage_complete("mysql", summary.filas_csv, summary.insertados);
        }
        info!(
            "MySQL load: {}/{} rows into {}.tarifarios ({} rejected)",
            summary.insertados, summary.filas_csv, summary.base_datos, summary.errores
        );
        RunReport::new("mysql", summary.clone(), failures)
            .save(&layout.reports_dir(), "reporte_mysql.json")?;
        Ok(summary)
    }
}
