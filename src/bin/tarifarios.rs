//! CLI binary for edgequake-tarifarios.
//!
//! One subcommand per pipeline stage plus `run` for stages 1–7 in order.
//! A thin shim: flags map to `PipelineConfig`, stages live in the library.

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use edgequake_tarifarios::{
    batch,
    config::load_env_file,
    download, flatten,
    http::HttpClient,
    normalize, ocr,
    pipeline::llm::{resolve_client, ProviderClient},
    rasterize, scrape, Bank, PipelineConfig, PipelineProgressCallback, ProgressCallback,
};
use indicatif::{ProgressBar, ProgressStyle};
use rand::rngs::StdRng;
use rand::SeedableRng;
use std::io;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing_subscriber::EnvFilter;

// ── ANSI colour helpers (no extra deps) ──────────────────────────────────────

fn green(s: &str) -> String {
    format!("\x1b[32m{s}\x1b[0m")
}
fn red(s: &str) -> String {
    format!("\x1b[31m{s}\x1b[0m")
}
fn dim(s: &str) -> String {
    format!("\x1b[2m{s}\x1b[0m")
}
fn bold(s: &str) -> String {
    format!("\x1b[1m{s}\x1b[0m")
}
fn cyan(s: &str) -> String {
    format!("\x1b[36m{s}\x1b[0m")
}

const TICKS: &[&str] = &["⠋", "⠙", "⠹", "⠸", "⠼", "⠴", "⠦", "⠧", "⠇", "⠏", "⠿"];

// ── CLI progress callback using indicatif ────────────────────────────────────

/// One bar per stage; each finished unit prints a log line above it.
struct CliProgressCallback {
    bar: ProgressBar,
    errors: AtomicUsize,
}

impl CliProgressCallback {
    fn new() -> Arc<Self> {
        let bar = ProgressBar::hidden();
        Arc::new(Self {
            bar,
            errors: AtomicUsize::new(0),
        })
    }
}

fn short(msg: &str, max: usize) -> String {
    if msg.chars().count() > max {
        let cut: String = msg.chars().take(max - 1).collect();
        format!("{cut}\u{2026}")
    } else {
        msg.to_string()
    }
}

impl PipelineProgressCallback for CliProgressCallback {
    fn on_stage_start(&self, stage: &str, total: usize) {
        let style = ProgressStyle::with_template(
            "{spinner:.cyan} {prefix:.bold}  \
             [{bar:42.green/238}] {pos:>4}/{len}  \
             ⏱ {elapsed_precise}  ETA {eta_precise}  {msg}",
        )
        .unwrap_or_else(|_| ProgressStyle::default_bar())
        .progress_chars("█▉▊▋▌▍▎▏  ")
        .tick_strings(TICKS);

        self.errors.store(0, Ordering::SeqCst);
        self.bar.set_draw_target(indicatif::ProgressDrawTarget::stderr());
        self.bar.reset();
        self.bar.set_length(total as u64);
        self.bar.set_style(style);
        self.bar.set_prefix(stage.to_string());
        self.bar.enable_steady_tick(Duration::from_millis(80));
        self.bar.println(format!(
            "{} {}",
            cyan("◆"),
            bold(&format!("{stage}: {total} to process"))
        ));
    }

    fn on_item_start(&self, item: &str) {
        self.bar.set_message(short(item, 40));
    }

    fn on_page_complete(&self, item: &str, page: usize, total: usize) {
        self.bar
            .set_message(format!("{}  p.{page}/{total}", short(item, 32)));
    }

    fn on_item_complete(&self, item: &str, detail: &str) {
        self.bar.println(format!(
            "  {} {:<50}  {}",
            green("✓"),
            short(item, 50),
            dim(detail)
        ));
        self.bar.inc(1);
    }

    fn on_item_error(&self, item: &str, error: &str) {
        self.errors.fetch_add(1, Ordering::SeqCst);
        self.bar.println(format!(
            "  {} {:<50}  {}",
            red("✗"),
            short(item, 50),
            red(&short(error, 80))
        ));
        self.bar.inc(1);
    }

    fn on_stage_complete(&self, stage: &str, total: usize, success: usize) {
        self.bar.finish_and_clear();
        let failed = total.saturating_sub(success);
        let mark = if failed == 0 {
            green("✔")
        } else if failed == total {
            red("✘")
        } else {
            cyan("⚠")
        };
        eprintln!(
            "{mark} {stage}: {}/{total} ok{}",
            bold(&success.to_string()),
            if failed > 0 {
                format!("  ({} failed)", red(&failed.to_string()))
            } else {
                String::new()
            }
        );
    }
}

// ── Ctrl+C ───────────────────────────────────────────────────────────────────

/// What one Ctrl+C does.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum InterruptAction {
    /// Let OCR workers finish the documents in flight, then stop.
    Drain,
    Exit,
}

/// Process-wide Ctrl+C policy.
///
/// Once tokio owns SIGINT it keeps it for the life of the process, so one
/// handler is installed up front. While OCR is running the first interrupt
/// drains the worker pool; every other interrupt exits with status 130.
#[derive(Clone, Default)]
struct Interrupts {
    draining: Arc<AtomicBool>,
    shutdown: ocr::ShutdownSignal,
}

/// Routes interrupts to the OCR shutdown signal until dropped.
struct DrainGuard<'a>(&'a Interrupts);

impl Drop for DrainGuard<'_> {
    fn drop(&mut self) {
        self.0.draining.store(false, Ordering::SeqCst);
    }
}

impl Interrupts {
    fn install() -> Self {
        let interrupts = Self::default();
        let handler = interrupts.clone();
        tokio::spawn(async move {
            while tokio::signal::ctrl_c().await.is_ok() {
                match handler.on_interrupt() {
                    InterruptAction::Drain => eprintln!(
                        "\n{} interrupt received; finishing documents in flight and saving progress \
                         (Ctrl+C again to quit now)",
                        cyan("⚠")
                    ),
                    InterruptAction::Exit => {
                        eprintln!("\n{} interrupted", red("✘"));
                        std::process::exit(130);
                    }
                }
            }
        });
        interrupts
    }

    fn drain_ocr(&self) -> DrainGuard<'_> {
        self.draining.store(true, Ordering::SeqCst);
        DrainGuard(self)
    }

    fn on_interrupt(&self) -> InterruptAction {
        if self.draining.swap(false, Ordering::SeqCst) {
            self.shutdown.request();
            InterruptAction::Drain
        } else {
            InterruptAction::Exit
        }
    }
}

// ── Arguments ────────────────────────────────────────────────────────────────

const AFTER_HELP: &str = r#"EXAMPLES:
  # Whole pipeline, stage by stage
  tarifarios scrape
  tarifarios download
  tarifarios rasterize
  tarifarios ocr
  tarifarios combine
  tarifarios normalize
  tarifarios flatten
  tarifarios serve --bind 127.0.0.1:8000   # browse http://127.0.0.1:8000/

  # Or stages 1-7 in one go
  tarifarios run

  # Only two banks
  tarifarios scrape --bank bcp --bank interbank

  # Redo two documents whose OCR came out wrong
  tarifarios ocr --reprocess BCP/tarifario-tarjetas --reprocess Interbank/cuentas

  # Re-run one rejected batch
  tarifarios normalize --only BBVA_Continental/batch_003

  # Load the flattened CSV into MySQL (MYSQL_* below)
  tarifarios load-mysql

ENVIRONMENT VARIABLES:
  GEMINI_API_KEY          Google Gemini API key (default provider)
  OPENAI_API_KEY          OpenAI API key
  ANTHROPIC_API_KEY       Anthropic API key
  EDGEQUAKE_LLM_PROVIDER  Override provider (gemini, openai, anthropic, ollama)
  EDGEQUAKE_MODEL         Override model ID (default gemini-2.5-flash-lite)
  TARIFARIOS_DATA_DIR     Data root (default ./data)
  PDFIUM_LIB_PATH         Directory containing libpdfium
  MYSQL_HOST, MYSQL_PORT  MySQL server for load-mysql (default localhost:3306)
  MYSQL_USER              MySQL user (default root)
  MYSQL_PASSWORD          MySQL password (default empty)
  MYSQL_DATABASE          Target database (default tarifarios_bancarios)

  Variables are also read from config/.env and .env; values already set in
  the shell win.
"#;

/// Scrape, OCR and normalize Peruvian bank tariff PDFs into CSV.
#[derive(Parser, Debug)]
#[command(
    name = "tarifarios",
    version,
    about = "Scrape, OCR and normalize Peruvian bank tariff PDFs into CSV",
    arg_required_else_help = true,
    color = clap::ColorChoice::Auto,
    after_long_help = AFTER_HELP
)]
struct Cli {
    #[command(flatten)]
    global: GlobalArgs,

    #[command(subcommand)]
    command: Command,
}

#[derive(Args, Debug)]
struct GlobalArgs {
    /// Root of the data tree.
    #[arg(long, global = true, env = "TARIFARIOS_DATA_DIR", default_value = "data")]
    data_dir: PathBuf,

    /// LLM provider: gemini, openai, anthropic, ollama, azure.
    #[arg(long, global = true, env = "EDGEQUAKE_LLM_PROVIDER")]
    provider: Option<String>,

    /// LLM model ID.
    #[arg(long, global = true, env = "EDGEQUAKE_MODEL")]
    model: Option<String>,

    /// Redo work whose output already exists.
    #[arg(long, global = true, env = "TARIFARIOS_FORCE")]
    force: bool,

    /// Rendering DPI (72–600).
    #[arg(long, global = true, env = "TARIFARIOS_DPI", default_value_t = 300,
          value_parser = clap::value_parser!(u32).range(72..=600))]
    dpi: u32,

    /// Documents OCR'd concurrently.
    #[arg(long, global = true, env = "TARIFARIOS_OCR_WORKERS", default_value_t = 1)]
    ocr_workers: usize,

    /// Pause between page requests, in milliseconds.
    #[arg(long, global = true, env = "TARIFARIOS_PAGE_DELAY_MS", default_value_t = 3000)]
    page_delay_ms: u64,

    /// Markdown files per batch.
    #[arg(long, global = true, env = "TARIFARIOS_BATCH_SIZE", default_value_t = 10)]
    batch_size: usize,

    /// Batches normalized concurrently.
    #[arg(long, global = true, env = "TARIFARIOS_NORMALIZE_WORKERS", default_value_t = 3)]
    normalize_workers: usize,

    /// Attempts per model call on rate limits and transient errors.
    #[arg(long, global = true, env = "TARIFARIOS_MAX_ATTEMPTS", default_value_t = 3)]
    max_attempts: u32,

    /// Disable progress bars.
    #[arg(long, global = true, env = "TARIFARIOS_NO_PROGRESS")]
    no_progress: bool,

    /// Enable DEBUG-level tracing logs.
    #[arg(short, long, global = true, env = "TARIFARIOS_VERBOSE")]
    verbose: bool,

    /// Suppress all output except errors.
    #[arg(short, long, global = true, env = "TARIFARIOS_QUIET")]
    quiet: bool,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Stage 1: find tariff PDF links on the bank websites.
    Scrape {
        /// Restrict to these banks (bbva, bcp, interbank, scotiabank, banco-nacion).
        #[arg(long = "bank")]
        banks: Vec<Bank>,
    },
    /// Stage 2: download the scraped PDFs.
    Download {
        #[arg(long = "bank")]
        banks: Vec<Bank>,
    },
    /// Stage 3: render every PDF page to PNG.
    Rasterize,
    /// Stage 4: OCR page images into Markdown, resumably.
    Ocr {
        /// `bank/document` keys to redo from scratch.
        #[arg(long)]
        reprocess: Vec<String>,
    },
    /// Stage 5: group Markdown files into shuffled batches.
    Combine {
        /// Fixed shuffle seed for reproducible batches.
        #[arg(long, env = "TARIFARIOS_SEED")]
        seed: Option<u64>,
    },
    /// Stage 6: normalize each batch into JSON.
    Normalize {
        /// Re-run only this batch (`bank/batch_NNN`).
        #[arg(long)]
        only: Option<String>,
    },
    /// Stage 7: flatten normalized JSON into CSV.
    Flatten,
    /// Stage 8: serve the query API over the flattened CSV.
    Serve {
        /// Address to listen on.
        #[arg(long, env = "TARIFARIOS_BIND", default_value = "127.0.0.1:8000")]
        bind: std::net::SocketAddr,

        /// CSV to serve instead of `<data-dir>/output/tarifarios_bancarios.csv`.
        #[arg(long)]
        csv: Option<PathBuf>,

        /// Directory holding the browsing page (`index.html`, `js/`).
        #[arg(long, env = "TARIFARIOS_STATIC_DIR", default_value = "static")]
        static_dir: PathBuf,
    },
    /// Load the flattened CSV into MySQL and refresh the per-bank summary.
    LoadMysql {
        /// CSV to load instead of `<data-dir>/output/tarifarios_bancarios.csv`.
        #[arg(long)]
        csv: Option<PathBuf>,
    },
    /// Stages 1–7 in order.
    Run {
        #[arg(long = "bank")]
        banks: Vec<Bank>,

        #[arg(long, env = "TARIFARIOS_SEED")]
        seed: Option<u64>,
    },
}

// ── Main ─────────────────────────────────────────────────────────────────────

fn main() -> Result<()> {
    // Before parsing, so `env = ".."` attributes see the file's values, and
    // before the runtime starts, so no other thread reads the environment.
    for path in ["config/.env", ".env"] {
        load_env_file(path).with_context(|| format!("Failed to read {path}"))?;
    }

    let cli = Cli::parse();
    tokio::runtime::Runtime::new()
        .context("Failed to start the tokio runtime")?
        .block_on(dispatch(cli))
}

async fn dispatch(cli: Cli) -> Result<()> {
    let g = &cli.global;

    // ── Logging setup ────────────────────────────────────────────────────
    // INFO logs would interleave with the bar; the bar carries the feedback.
    let show_progress = !g.quiet && !g.no_progress && !matches!(cli.command, Command::Serve { .. });
    let filter = if g.verbose {
        "debug"
    } else if g.quiet || show_progress {
        "error"
    } else {
        "info"
    };
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter)))
        .with_writer(io::stderr)
        .init();

    let progress: Option<ProgressCallback> = if show_progress {
        Some(CliProgressCallback::new() as Arc<dyn PipelineProgressCallback>)
    } else {
        None
    };
    let config = build_config(g, progress)?;
    let interrupts = Interrupts::install();
    let started = Instant::now();

    match &cli.command {
        Command::Scrape { banks } => cmd_scrape(&config, banks).await?,
        Command::Download { banks } => cmd_download(&config, banks).await?,
        Command::Rasterize => cmd_rasterize(&config).await?,
        Command::Ocr { reprocess } => {
            let client = llm_client(&config)?;
            cmd_ocr(&config, &client, reprocess, &interrupts).await?;
        }
        Command::Combine { seed } => cmd_combine(&config, *seed)?,
        Command::Normalize { only } => {
            let client = llm_client(&config)?;
            cmd_normalize(&config, &client, only.as_deref()).await?
        }
        Command::Flatten => cmd_flatten(&config)?,
        Command::Serve {
            bind,
            csv,
            static_dir,
        } => cmd_serve(config.clone(), *bind, csv.clone(), static_dir).await?,
        Command::LoadMysql { csv } => cmd_load_mysql(&config, csv.as_deref()).await?,
        Command::Run { banks, seed } => {
            // Fail on missing credentials before hours of scraping and rendering.
            let client = llm_client(&config)?;
            cmd_scrape(&config, banks).await?;
            cmd_download(&config, banks).await?;
            cmd_rasterize(&config).await?;
            if cmd_ocr(&config, &client, &[], &interrupts).await? {
                cmd_combine(&config, *seed)?;
                cmd_normalize(&config, &client, None).await?;
                cmd_flatten(&config)?;
            }
        }
    }

    if !g.quiet {
        eprintln!("{}", dim(&format!("done in {:.1}s", started.elapsed().as_secs_f64())));
    }
    Ok(())
}

/// Map CLI args to `PipelineConfig`.
fn build_config(g: &GlobalArgs, progress: Option<ProgressCallback>) -> Result<PipelineConfig> {
    let mut builder = PipelineConfig::builder()
        .data_dir(&g.data_dir)
        .dpi(g.dpi)
        .ocr_workers(g.ocr_workers)
        .page_delay_ms(g.page_delay_ms)
        .batch_size(g.batch_size)
        .normalize_workers(g.normalize_workers)
        .max_attempts(g.max_attempts)
        .overwrite(g.force);
    if let Some(ref model) = g.model {
        builder = builder.model(model);
    }
    if let Some(ref provider) = g.provider {
        builder = builder.provider_name(provider);
    }
    if let Some(cb) = progress {
        builder = builder.progress_callback(cb);
    }
    builder.build().context("Invalid configuration")
}

fn llm_client(config: &PipelineConfig) -> Result<ProviderClient> {
    resolve_client(config).context("Could not set up the LLM provider")
}

fn selected(banks: &[Bank]) -> Vec<Bank> {
    if banks.is_empty() {
        Bank::ALL.to_vec()
    } else {
        banks.to_vec()
    }
}

// ── Stages ───────────────────────────────────────────────────────────────────

async fn cmd_scrape(config: &PipelineConfig, banks: &[Bank]) -> Result<()> {
    let client = HttpClient::new(config)?;
    let urls = scrape::scrape_all(&selected(banks), &client).await;
    let path = scrape::save_scraped(&config.layout(), &urls).context("Failed to save scrape result")?;
    for bank in selected(banks) {
        let n = urls.iter().filter(|u| u.bank == bank).count();
        eprintln!("  {:<22} {:>4} PDFs", bank.display_name(), n);
    }
    eprintln!(
        "{} {} links  →  {}",
        green("✔"),
        bold(&urls.len().to_string()),
        path.display()
    );
    Ok(())
}

async fn cmd_download(config: &PipelineConfig, banks: &[Bank]) -> Result<()> {
    let wanted = selected(banks);
    let urls: Vec<_> = scrape::load_scraped(&config.layout())
        .context("No scrape result; run `tarifarios scrape` first")?
        .into_iter()
        .filter(|u| wanted.contains(&u.bank))
        .collect();
    let results = download::download_all(config, &urls)
        .await
        .context("Download stage failed")?;
    for s in download::summarize(&results) {
        eprintln!(
            "  {:<22} {:>4} found  {:>4} ok  {:>4} failed",
            s.bank.display_name(),
            s.found,
            s.ok,
            s.failed
        );
    }
    Ok(())
}

async fn cmd_rasterize(config: &PipelineConfig) -> Result<()> {
    let s = rasterize::rasterize_all(config)
        .await
        .context("Rasterize stage failed")?;
    eprintln!(
        "{} {}/{} PDFs rendered, {} skipped, {} pages",
        if s.fallidos == 0 { green("✔") } else { cyan("⚠") },
        s.exitosos,
        s.total_pdfs,
        s.omitidos,
        s.total_paginas
    );
    Ok(())
}

/// Returns `false` when the run was interrupted.
async fn cmd_ocr(
    config: &PipelineConfig,
    client: &ProviderClient,
    reprocess: &[String],
    interrupts: &Interrupts,
) -> Result<bool> {
    if !reprocess.is_empty() {
        let reset = ocr::prepare_reprocess(&config.layout(), reprocess)
            .context("Failed to queue documents for reprocessing")?;
        eprintln!("{} {} documents queued for OCR again", cyan("◆"), reset.len());
    }

    let s = {
        let _drain = interrupts.drain_ocr();
        ocr::run_ocr(config, client, &interrupts.shutdown)
            .await
            .context("OCR stage failed")?
    };
    eprintln!(
        "{} {}/{} documents  {} pages  {} model calls  {:.0}s",
        if s.failed == 0 { green("✔") } else { cyan("⚠") },
        s.succeeded,
        s.attempted,
        s.pages,
        s.model_calls,
        s.seconds
    );
    eprintln!(
        "   {} processed in total, {} failed",
        dim(&s.total_processed.to_string()),
        dim(&s.total_failed.to_string())
    );
    if s.interrupted {
        eprintln!("{} interrupted; run `tarifarios ocr` again to resume", cyan("⚠"));
    }
    Ok(!s.interrupted)
}

fn cmd_combine(config: &PipelineConfig, seed: Option<u64>) -> Result<()> {
    let mut rng = match seed {
        Some(seed) => StdRng::seed_from_u64(seed),
        None => StdRng::from_entropy(),
    };
    let batches = batch::combine_batches(config, &mut rng).context("Combine stage failed")?;
    let files: usize = batches.iter().map(|b| b.files.len()).sum();
    eprintln!(
        "{} {} files in {} batches  →  {}",
        green("✔"),
        files,
        batches.len(),
        config.layout().batches_dir().display()
    );
    Ok(())
}

async fn cmd_normalize(config: &PipelineConfig, client: &ProviderClient, only: Option<&str>) -> Result<()> {
    if let Some(key) = only {
        let r = normalize::normalize_one(config, client, key)
            .await
            .with_context(|| format!("Failed to normalize {key}"))?;
        match (&r.error, &r.warning) {
            (Some(e), _) => anyhow::bail!("{}: {}", r.batch, e),
            (None, Some(w)) => eprintln!("{} {}: {} documents ({})", cyan("⚠"), r.batch, r.documents, w),
            (None, None) => eprintln!("{} {}: {} documents, {} items", green("✔"), r.batch, r.documents, r.items),
        }
        return Ok(());
    }

    let s = normalize::normalize_all(config, client)
        .await
        .context("Normalize stage failed")?;
    eprintln!(
        "{} {}/{} batches  ({} skipped)  {} documents  {} items",
        if s.fallidos == 0 { green("✔") } else { cyan("⚠") },
        s.exitosos,
        s.total_batches,
        s.omitidos,
        s.total_documentos,
        s.total_items
    );
    Ok(())
}

fn cmd_flatten(config: &PipelineConfig) -> Result<()> {
    let s = flatten::flatten_all(config).context("Flatten stage failed")?;
    for (bank, rows) in &s.filas_por_banco {
        eprintln!("  {:<22} {:>5} rows", bank, rows);
    }
    eprintln!(
        "{} {} rows  →  {}",
        green("✔"),
        bold(&s.total_filas.to_string()),
        s.csv_completo.display()
    );
    eprintln!("   {}", dim(&s.csv_examen.display().to_string()));
    Ok(())
}

#[cfg(feature = "viewer")]
async fn cmd_serve(
    config: PipelineConfig,
    bind: std::net::SocketAddr,
    csv: Option<PathBuf>,
    static_dir: &std::path::Path,
) -> Result<()> {
    use edgequake_tarifarios::viewer::{server, Dataset};

    let path = csv.unwrap_or_else(|| config.layout().full_csv());
    let data = Dataset::load(&path).context("Failed to load the flattened CSV")?;
    eprintln!(
        "{} {} rows from {}  →  http://{bind}/",
        cyan("◆"),
        data.len(),
        path.display()
    );
    server::serve(bind, server::AppState::new(data, config), static_dir)
        .await
        .context("Viewer stopped")?;
    Ok(())
}

#[cfg(not(feature = "viewer"))]
async fn cmd_serve(
    _config: PipelineConfig,
    _bind: std::net::SocketAddr,
    _csv: Option<PathBuf>,
    _static_dir: &std::path::Path,
) -> Result<()> {
    anyhow::bail!("this binary was built without the `viewer` feature")
}

#[cfg(feature = "mysql")]
async fn cmd_load_mysql(config: &PipelineConfig, csv: Option<&std::path::Path>) -> Result<()> {
    use edgequake_tarifarios::database::{load_mysql, MysqlSettings};

    let settings = MysqlSettings::from_env().context("Invalid MySQL settings")?;
    let s = load_mysql(config, &settings, csv)
        .await
        .context("MySQL load failed")?;
    for (bank, rows) in &s.insertados_por_banco {
        eprintln!("  {:<22} {:>5} rows", bank, rows);
    }
    let mark = if s.errores == 0 { green("✔") } else { cyan("⚠") };
    eprintln!(
        "{} {}/{} rows  →  {}.tarifarios",
        mark,
        bold(&s.insertados.to_string()),
        s.filas_csv,
        s.base_datos
    );
    if s.errores > 0 {
        eprintln!("   {}", dim(&format!("{} rows rejected, see reports/reporte_mysql.json", s.errores)));
    }
    Ok(())
}

#[cfg(not(feature = "mysql"))]
async fn cmd_load_mysql(_config: &PipelineConfig, _csv: Option<&std::path::Path>) -> Result<()> {
    anyhow::bail!("this binary was built without the `mysql` feature")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn interrupt_outside_ocr_exits() {
        let interrupts = Interrupts::default();
        assert_eq!(interrupts.on_interrupt(), InterruptAction::Exit);
        assert!(!interrupts.shutdown.is_requested());
    }

    #[test]
    fn first_interrupt_during_ocr_drains_second_exits() {
        let interrupts = Interrupts::default();
        let _drain = interrupts.drain_ocr();
        assert_eq!(interrupts.on_interrupt(), InterruptAction::Drain);
        assert!(interrupts.shutdown.is_requested());
        assert_eq!(interrupts.on_interrupt(), InterruptAction::Exit);
    }

    #[test]
    fn interrupt_after_ocr_returns_exits() {
        let interrupts = Interrupts::default();
        drop(interrupts.drain_ocr());
        assert_eq!(interrupts.on_interrupt(), InterruptAction::Exit);
        assert!(!interrupts.shutdown.is_requested());
    }
}
