//! CLI binary for any2md.
//!
//! A thin shim over the library crate that maps CLI flags to
//! `ServiceConfig` plus one global options record, runs every input as one
//! batch, and writes the results.

use any2md::input::{load_input, LoadedInput};
use any2md::options::LanguagesInput;
use any2md::output::write_output;
use any2md::request::{NormalizedRequest, RejectedFile};
use any2md::{
    ConversionProgressCallback, ConversionResult, ConversionService, FileContent, FileEntry,
    OptionOverrides, OutputFormat, ParseTier, ProgressCallback, RawRequest, ResultStatus,
    ServiceConfig,
};
use anyhow::{Context, Result};
use clap::Parser;
use indicatif::{ProgressBar, ProgressStyle};
use std::collections::HashMap;
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use tracing_subscriber::EnvFilter;

// ── ANSI colour helpers (no extra deps) ──────────────────────────────────────

fn green(s: &str) -> String {
    format!("\x1b[32m{s}\x1b[0m")
}
fn red(s: &str) -> String {
    format!("\x1b[31m{s}\x1b[0m")
}
fn yellow(s: &str) -> String {
    format!("\x1b[33m{s}\x1b[0m")
}
fn dim(s: &str) -> String {
    format!("\x1b[2m{s}\x1b[0m")
}
fn bold(s: &str) -> String {
    format!("\x1b[1m{s}\x1b[0m")
}

// ── CLI progress callback using indicatif ────────────────────────────────────

/// Renders one bar over the documents of the batch; per-document lines are
/// printed above it as jobs finish, in completion order.
struct CliProgressCallback {
    bar: ProgressBar,
    start_times: Mutex<HashMap<String, Instant>>,
}

impl CliProgressCallback {
    fn new() -> Arc<Self> {
        let bar = ProgressBar::new(0);
        let style = ProgressStyle::with_template(
            "{spinner:.cyan} {prefix:.bold}  [{bar:42.green/238}] {pos:>3}/{len} files  ⏱ {elapsed_precise}  {msg}",
        )
        .unwrap_or_else(|_| ProgressStyle::default_bar())
        .progress_chars("█▉▊▋▌▍▎▏  ")
        .tick_strings(&["⠋", "⠙", "⠹", "⠸", "⠼", "⠴", "⠦", "⠧", "⠇", "⠏", "⠿"]);
        bar.set_style(style);
        bar.set_prefix("Converting");
        bar.enable_steady_tick(Duration::from_millis(80));
        Arc::new(Self {
            bar,
            start_times: Mutex::new(HashMap::new()),
        })
    }

    fn elapsed(&self, filename: &str) -> f64 {
        self.start_times
            .lock()
            .ok()
            .and_then(|mut m| m.remove(filename))
            .map_or(0.0, |t| t.elapsed().as_secs_f64())
    }
}

impl ConversionProgressCallback for CliProgressCallback {
    fn on_batch_start(&self, total_jobs: usize) {
        self.bar.set_length(total_jobs as u64);
    }

    fn on_job_start(&self, filename: &str) {
        if let Ok(mut m) = self.start_times.lock() {
            m.insert(filename.to_string(), Instant::now());
        }
        self.bar.set_message(filename.to_string());
    }

    fn on_tier_failed(&self, filename: &str, tier: ParseTier, error: &str) {
        let msg: String = error.chars().take(80).collect();
        self.bar.println(format!(
            "  {} {}  {} failed: {}",
            yellow("↓"),
            filename,
            tier,
            dim(&msg)
        ));
    }

    fn on_job_complete(&self, filename: &str, success: bool, _elapsed_ms: u64) {
        let secs = self.elapsed(filename);
        let mark = if success { green("✓") } else { red("✗") };
        self.bar
            .println(format!("  {mark} {filename}  {}", dim(&format!("{secs:.1}s"))));
        self.bar.inc(1);
    }

    fn on_batch_complete(&self, total_jobs: usize, successful: usize) {
        self.bar.finish_and_clear();
        let failed = total_jobs.saturating_sub(successful);
        if failed == 0 {
            eprintln!("{} {} file(s) converted", green("✔"), bold(&successful.to_string()));
        } else {
            eprintln!(
                "{} {}/{} file(s) converted  ({} failed)",
                if successful == 0 { red("✘") } else { yellow("⚠") },
                bold(&successful.to_string()),
                total_jobs,
                red(&failed.to_string())
            );
        }
    }
}

const AFTER_HELP: &str = r#"EXAMPLES:
  # Basic conversion (stdout)
  any2md report.pdf

  # Convert to a file
  any2md contract.docx -o contract.md

  # Several documents into a directory
  any2md q1.xlsx q2.xlsx minutes.docx -o converted/

  # Pages 3 to 9 (zero-based, end exclusive) as HTML
  any2md --start-page 2 --end-page 9 --format html paper.pdf -o paper.html

  # Declare languages instead of auto-detection
  any2md --languages de,en handbuch.pdf

  # Only two sheets, no formula listing
  any2md --sheets Summary,Totals --no-formulas budget.xlsx

  # Full JSON results (metadata, tier attempts, image URLs)
  any2md --json report.pdf > report.json

  # Structure only, no conversion
  any2md --inspect-only report.pdf

ENVIRONMENT VARIABLES:
  Every flag has an ANY2MD_* counterpart, e.g. ANY2MD_FORMAT=html,
  ANY2MD_IMAGE_DIR=/srv/images, ANY2MD_MAX_CONCURRENT=3.
  RUST_LOG overrides the log filter chosen by --verbose / --quiet.
  PDFIUM_DYNAMIC_LIB_PATH / ANY2MD_PDFIUM_DIR point at a libpdfium directory.
"#;

/// Convert PDF, Word and Excel documents to Markdown.
#[derive(Parser, Debug)]
#[command(
    name = "any2md",
    version,
    about = "Convert PDF, Word and Excel documents to Markdown, HTML or JSON",
    arg_required_else_help = true,
    color = clap::ColorChoice::Auto,
    after_long_help = AFTER_HELP
)]
struct Cli {
    /// Local paths, file:// URIs or HTTP/HTTPS URLs.
    #[arg(required = true)]
    inputs: Vec<String>,

    /// Output file (single input) or directory (several inputs).
    #[arg(short, long, env = "ANY2MD_OUTPUT")]
    output: Option<PathBuf>,

    /// Output format.
    #[arg(short, long, env = "ANY2MD_FORMAT", value_enum, default_value = "markdown")]
    format: FormatArg,

    /// Do not extract images.
    #[arg(long, env = "ANY2MD_NO_IMAGES")]
    no_images: bool,

    /// Keep repeated headers and footers.
    #[arg(long, env = "ANY2MD_KEEP_HEADER_FOOTER")]
    keep_header_footer: bool,

    /// Do not split the result into per-page content.
    #[arg(long, env = "ANY2MD_NO_PAGINATE")]
    no_paginate: bool,

    /// First page (or sheet) to convert, zero-based.
    #[arg(long, env = "ANY2MD_START_PAGE")]
    start_page: Option<i64>,

    /// Stop before this page (or sheet), zero-based.
    #[arg(long, env = "ANY2MD_END_PAGE")]
    end_page: Option<i64>,

    /// "auto" or a comma-separated list of language codes.
    #[arg(long, env = "ANY2MD_LANGUAGES", default_value = "auto")]
    languages: String,

    /// Drop bold and italic markup.
    #[arg(long, env = "ANY2MD_PLAIN")]
    plain: bool,

    /// Do not list spreadsheet formulas.
    #[arg(long, env = "ANY2MD_NO_FORMULAS")]
    no_formulas: bool,

    /// Comma-separated sheet names to convert.
    #[arg(long, env = "ANY2MD_SHEETS", value_delimiter = ',')]
    sheets: Option<Vec<String>>,

    /// Fail a document when any of its images cannot be stored.
    #[arg(long, env = "ANY2MD_IMAGES_MANDATORY")]
    images_mandatory: bool,

    /// Documents converted at once.
    #[arg(short = 'j', long, env = "ANY2MD_MAX_CONCURRENT", default_value_t = 5)]
    max_concurrent: usize,

    /// Where extracted images are stored.
    #[arg(long, env = "ANY2MD_IMAGE_DIR", default_value = "./temp_images")]
    image_dir: PathBuf,

    /// Base URL under which images are linked [default: the image directory].
    #[arg(long, env = "ANY2MD_PUBLIC_BASE_URL")]
    public_base_url: Option<String>,

    /// Largest accepted input in MB.
    #[arg(long, env = "ANY2MD_MAX_FILE_SIZE_MB", default_value_t = 100)]
    max_file_size_mb: u64,

    /// Deadline in seconds for each parse, sampling or layout step.
    #[arg(long, env = "ANY2MD_STAGE_TIMEOUT", default_value_t = 300)]
    stage_timeout: u64,

    /// Language used when detection is inconclusive.
    #[arg(long, env = "ANY2MD_DEFAULT_LANGUAGE", default_value = "en")]
    default_language: String,

    /// Directory containing the pdfium shared library.
    #[arg(long, env = "ANY2MD_PDFIUM_DIR")]
    pdfium_dir: Option<PathBuf>,

    /// HTTP download timeout in seconds.
    #[arg(long, env = "ANY2MD_DOWNLOAD_TIMEOUT", default_value_t = 120)]
    download_timeout: u64,

    /// Print full JSON results instead of the converted content.
    #[arg(long, env = "ANY2MD_JSON")]
    json: bool,

    /// Print document structure only, no conversion.
    #[arg(long)]
    inspect_only: bool,

    /// Disable progress bar.
    #[arg(long, env = "ANY2MD_NO_PROGRESS")]
    no_progress: bool,

    /// Enable DEBUG-level tracing logs.
    #[arg(short, long, env = "ANY2MD_VERBOSE")]
    verbose: bool,

    /// Suppress all output except errors.
    #[arg(short, long, env = "ANY2MD_QUIET")]
    quiet: bool,
}

#[derive(clap::ValueEnum, Clone, Copy, Debug)]
enum FormatArg {
    Markdown,
    Html,
    Json,
}

impl From<FormatArg> for OutputFormat {
    fn from(v: FormatArg) -> Self {
        match v {
            FormatArg::Markdown => OutputFormat::Markdown,
            FormatArg::Html => OutputFormat::Html,
            FormatArg::Json => OutputFormat::Json,
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // ── Logging setup ────────────────────────────────────────────────────
    let show_progress = !cli.quiet && !cli.no_progress && !cli.json && !cli.inspect_only;
    let filter = if cli.verbose {
        "any2md=debug"
    } else if cli.quiet || show_progress {
        "error"
    } else {
        "any2md=info"
    };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter)),
        )
        .with_writer(io::stderr)
        .init();

    let progress: Option<ProgressCallback> = if show_progress {
        Some(CliProgressCallback::new() as Arc<dyn ConversionProgressCallback>)
    } else {
        None
    };
    let service = ConversionService::new(build_config(&cli, progress)?);

    // ── Load inputs ──────────────────────────────────────────────────────
    let download_timeout = Duration::from_secs(cli.download_timeout);
    let mut loaded: Vec<LoadedInput> = Vec::new();
    let mut unreadable: Vec<(usize, RejectedFile)> = Vec::new();
    for (index, input) in cli.inputs.iter().enumerate() {
        match load_input(input, download_timeout).await {
            Ok(doc) => loaded.push(doc),
            Err(error) if cli.inputs.len() == 1 => {
                return Err(error).with_context(|| format!("Failed to read {input}"));
            }
            Err(error) => unreadable.push((
                index,
                RejectedFile {
                    filename: input.clone(),
                    error,
                },
            )),
        }
    }

    // ── Inspect-only mode ────────────────────────────────────────────────
    if cli.inspect_only {
        for doc in &loaded {
            let content = FileContent::Binary(doc.bytes.clone());
            let report = service
                .inspect(&doc.filename, &content)
                .await
                .with_context(|| format!("Failed to inspect {}", doc.filename))?;
            if cli.json {
                println!(
                    "{}",
                    serde_json::to_string_pretty(&report).context("Failed to serialize report")?
                );
                continue;
            }
            println!("File:         {}", report.filename);
            println!("Type:         {}", report.file_type);
            println!("Size:         {} bytes", report.file_size);
            if let Some(kind) = report.info.unit_kind {
                println!("Units:        {} ({:?})", report.info.unit_count, kind);
            }
            if let Some(ref t) = report.info.title {
                println!("Title:        {}", t);
            }
            if let Some(ref a) = report.info.author {
                println!("Author:       {}", a);
            }
            if !report.info.sheet_names.is_empty() {
                println!("Sheets:       {}", report.info.sheet_names.join(", "));
            }
            if let Some(n) = report.info.paragraph_count {
                println!("Paragraphs:   {}", n);
            }
            if let Some(n) = report.info.table_count {
                println!("Tables:       {}", n);
            }
            println!("Images:       {}", if report.info.has_images { "yes" } else { "no" });
            println!();
        }
        for (_, rejected) in &unreadable {
            eprintln!("{} {}: {}", red("✗"), rejected.filename, rejected.error);
        }
        return Ok(());
    }

    // ── Normalise ────────────────────────────────────────────────────────
    let multiple = cli.inputs.len() > 1;
    let mut entries = if loaded.is_empty() {
        Vec::new()
    } else {
        let request = RawRequest::Batch {
            files: loaded
                .into_iter()
                .map(|doc| FileEntry::new(doc.filename, FileContent::Binary(doc.bytes)))
                .collect(),
            global_options: global_options(&cli),
        };
        match service.normalize(request).context("Invalid options")? {
            NormalizedRequest::Batch(entries) => entries,
            NormalizedRequest::Single(job) => vec![Ok(job)],
        }
    };
    for (index, rejected) in unreadable {
        entries.insert(index.min(entries.len()), Err(rejected));
    }

    // ── Convert ──────────────────────────────────────────────────────────
    let batch = service
        .convert_batch(entries, Some(cli.max_concurrent))
        .await;

    if cli.json {
        let json = if multiple {
            serde_json::to_string_pretty(&batch)
        } else {
            serde_json::to_string_pretty(&batch.results[0])
        }
        .context("Failed to serialise results")?;
        match cli.output {
            Some(ref path) if !is_dir_target(path, multiple) => {
                write_output(path, json.as_bytes()).await?
            }
            _ => println!("{json}"),
        }
    } else {
        let extension = OutputFormat::from(cli.format).extension();
        for result in &batch.results {
            write_result(&cli, result, multiple, extension).await?;
        }
    }

    if !cli.quiet && !show_progress {
        eprintln!(
            "Converted {}/{} file(s) in {}ms",
            batch.summary.successful, batch.summary.total, batch.summary.duration_ms
        );
    }
    if batch.summary.failed > 0 {
        anyhow::bail!(
            "{} of {} document(s) failed",
            batch.summary.failed,
            batch.summary.total
        );
    }
    Ok(())
}

/// Map CLI args to `ServiceConfig`.
fn build_config(cli: &Cli, progress: Option<ProgressCallback>) -> Result<ServiceConfig> {
    let mut builder = ServiceConfig::builder()
        .max_concurrent_jobs(cli.max_concurrent)
        .image_dir(cli.image_dir.clone())
        .public_base_url(
            cli.public_base_url
                .clone()
                .unwrap_or_else(|| cli.image_dir.display().to_string()),
        )
        .max_file_size(cli.max_file_size_mb * 1024 * 1024)
        .stage_timeout(Duration::from_secs(cli.stage_timeout))
        .default_language(cli.default_language.clone());
    if let Some(ref dir) = cli.pdfium_dir {
        builder = builder.pdfium_library_dir(dir.clone());
    }
    if let Some(cb) = progress {
        builder = builder.progress_callback(cb);
    }
    builder.build().context("Invalid configuration")
}

/// Map CLI flags to the global options record shared by every input.
fn global_options(cli: &Cli) -> OptionOverrides {
    OptionOverrides {
        output_format: Some(OutputFormat::from(cli.format).to_string()),
        extract_images: Some(!cli.no_images),
        remove_header_footer: Some(!cli.keep_header_footer),
        include_content: Some(true),
        paginate: Some(!cli.no_paginate),
        start_page: cli.start_page,
        end_page: cli.end_page,
        languages: Some(LanguagesInput::One(cli.languages.clone())),
        preserve_formatting: Some(!cli.plain),
        include_formulas: Some(!cli.no_formulas),
        sheet_names: cli.sheets.clone(),
        images_mandatory: Some(cli.images_mandatory),
    }
}

/// A directory target is an existing directory, a path ending in a
/// separator, or any `-o` when several inputs are converted.
fn is_dir_target(path: &Path, multiple: bool) -> bool {
    multiple || path.is_dir() || path.to_string_lossy().ends_with(std::path::MAIN_SEPARATOR)
}

async fn write_result(
    cli: &Cli,
    result: &ConversionResult,
    multiple: bool,
    extension: &str,
) -> Result<()> {
    let name = &result.metadata.filename;
    if let Some(ref error) = result.error {
        eprintln!("{} {}: {} {}", red("✗"), name, error.message, dim(error.code));
        return Ok(());
    }
    if result.status == ResultStatus::Partial && !cli.quiet {
        eprintln!(
            "{} {}: {} image(s) could not be stored",
            yellow("⚠"),
            name,
            result.metadata.images_dropped
        );
    }
    if result.metadata.degraded && !cli.quiet {
        if let Some(tier) = result.metadata.tier_used {
            eprintln!("{} {}: converted at {}", yellow("⚠"), name, tier);
        }
    }
    let content = result.content.as_deref().unwrap_or_default();

    match cli.output {
        Some(ref target) if is_dir_target(target, multiple) => {
            let stem = Path::new(name)
                .file_stem()
                .map(|s| s.to_string_lossy().into_owned())
                .unwrap_or_else(|| name.clone());
            let path = target.join(format!("{stem}.{extension}"));
            write_output(&path, content.as_bytes()).await?;
            if !cli.quiet {
                eprintln!("{} {} → {}", green("✔"), name, bold(&path.display().to_string()));
            }
        }
        Some(ref path) => {
            write_output(path, content.as_bytes()).await?;
            if !cli.quiet {
                eprintln!("{} {} → {}", green("✔"), name, bold(&path.display().to_string()));
            }
        }
        None => {
            let stdout = io::stdout();
            let mut handle = stdout.lock();
            handle
                .write_all(content.as_bytes())
                .context("Failed to write to stdout")?;
            if !content.ends_with('\n') {
                handle.write_all(b"\n").ok();
            }
        }
    }
    Ok(())
}
