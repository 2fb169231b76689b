//! The conversion service: one object shared by every front end.
//!
//! Owns the admission gate, the pipeline, the batch coordinator and the
//! content store, and exposes the operations the CLI, the HTTP server and
//! the tool-call server all call.

use crate::adapter::{AdapterRegistry, ParseTier};
use crate::admission::AdmissionController;
use crate::batch::BatchCoordinator;
use crate::config::ServiceConfig;
use crate::document::DocumentInfo;
use crate::error::{ConvertError, TierFailure};
use crate::options::OutputFormat;
use crate::output::{BatchResult, ConversionResult};
use crate::pipeline::fallback::run_blocking;
use crate::pipeline::Pipeline;
use crate::request::{
    ConversionJob, DocumentFormat, FileContent, NormalizedRequest, RawRequest, RejectedFile,
    RequestNormalizer, SessionId, ValidationReport,
};
use crate::store::ContentStore;
use bytes::Bytes;
use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Instant;
use tracing::info;

/// Response to [`ConversionService::convert`], shaped like the request.
#[derive(Debug, Clone, Serialize)]
#[serde(untagged)]
pub enum ConversionResponse {
    Single(ConversionResult),
    Batch(BatchResult),
}

/// Output of [`ConversionService::inspect`].
#[derive(Debug, Clone, Serialize)]
pub struct DocumentInspection {
    pub filename: String,
    pub file_type: DocumentFormat,
    pub file_size: u64,
    #[serde(flatten)]
    pub info: DocumentInfo,
}

/// Snapshot for health and status endpoints.
#[derive(Debug, Clone, Serialize)]
pub struct ServiceStatus {
    pub service: &'static str,
    pub version: &'static str,
    pub status: &'static str,
    pub uptime_secs: u64,
    pub active_jobs: usize,
    pub capacity: usize,
    pub peak_jobs: usize,
    pub total_processed: u64,
    pub supported_formats: Vec<&'static str>,
}

/// One supported input format.
#[derive(Debug, Clone, Serialize)]
pub struct FormatInfo {
    pub extension: &'static str,
    pub mime_type: &'static str,
    pub features: Vec<&'static str>,
}

#[derive(Debug, Clone, Serialize)]
pub struct SupportedFormats {
    pub input: Vec<FormatInfo>,
    pub output: Vec<String>,
}

/// Document conversion service.
///
/// # Example
/// ```rust,no_run
/// use any2md::{ConversionService, RawRequest, ServiceConfig};
///
/// # async fn run() -> Result<(), any2md::ConvertError> {
/// let service = ConversionService::new(ServiceConfig::default());
/// let request: RawRequest = serde_json::from_str(
///     r#"{"filename": "report.pdf", "file_content": "JVBERi0xLjQK..."}"#,
/// ).unwrap();
/// let response = service.convert(request).await?;
/// # Ok(()) }
/// ```
#[derive(Debug)]
pub struct ConversionService {
    config: Arc<ServiceConfig>,
    normalizer: RequestNormalizer,
    admission: AdmissionController,
    pipeline: Pipeline,
    batch: BatchCoordinator,
    started: Instant,
    processed: AtomicU64,
}

impl ConversionService {
    /// A service with the built-in adapters.
    pub fn new(config: ServiceConfig) -> Self {
        let registry = AdapterRegistry::with_defaults(&config);
        Self::with_registry(config, registry)
    }

    /// A service with caller-supplied adapters.
    pub fn with_registry(config: ServiceConfig, registry: AdapterRegistry) -> Self {
        let config = Arc::new(config);
        let store = Arc::new(ContentStore::new(
            config.image_dir.clone(),
            config.public_base_url.clone(),
        ));
        let admission = AdmissionController::new(config.max_concurrent_jobs);
        let pipeline = Pipeline::new(Arc::clone(&config), registry, store);
        let batch = BatchCoordinator::new(
            pipeline.clone(),
            admission.clone(),
            config.admission_timeout,
        );
        info!(
            "Conversion service ready: capacity {}, images under {}",
            config.max_concurrent_jobs,
            config.image_dir.display()
        );
        Self {
            normalizer: RequestNormalizer::new(config.max_file_size),
            config,
            admission,
            pipeline,
            batch,
            started: Instant::now(),
            processed: AtomicU64::new(0),
        }
    }

    pub fn config(&self) -> &ServiceConfig {
        &self.config
    }

    pub fn admission(&self) -> &AdmissionController {
        &self.admission
    }

    pub fn store(&self) -> &ContentStore {
        self.pipeline.store()
    }

    // ── Conversion ───────────────────────────────────────────────────────

    /// Normalise and convert a single-file or batch request.
    ///
    /// Fails only for request-level validation errors and, for single
    /// files, admission timeouts. Conversion failures are `error` results.
    pub async fn convert(&self, request: RawRequest) -> Result<ConversionResponse, ConvertError> {
        match self.normalizer.normalize(request)? {
            NormalizedRequest::Single(job) => {
                Ok(ConversionResponse::Single(self.convert_job(job).await?))
            }
            NormalizedRequest::Batch(entries) => {
                Ok(ConversionResponse::Batch(self.convert_batch(entries, None).await))
            }
        }
    }

    /// Convert one already-normalised job under admission control.
    pub async fn convert_job(&self, job: ConversionJob) -> Result<ConversionResult, ConvertError> {
        let _permit = self.admission.acquire(self.config.admission_timeout).await?;
        let result = self.pipeline.run(job).await;
        self.processed.fetch_add(1, Ordering::Relaxed);
        Ok(result)
    }

    /// Convert many jobs, at most `concurrency` (clamped to capacity) at once.
    pub async fn convert_batch(
        &self,
        entries: Vec<Result<ConversionJob, RejectedFile>>,
        concurrency: Option<usize>,
    ) -> BatchResult {
        let batch = self
            .batch
            .run(entries, concurrency, &self.config.progress_callback)
            .await;
        self.processed
            .fetch_add(batch.summary.total as u64, Ordering::Relaxed);
        batch
    }

    /// Normalise a request without converting it.
    pub fn normalize(&self, request: RawRequest) -> Result<NormalizedRequest, ConvertError> {
        self.normalizer.normalize(request)
    }

    // ── Read-only operations ─────────────────────────────────────────────

    /// Check a file's name, type, encoding and size.
    pub fn validate(&self, filename: Option<&str>, content: Option<&FileContent>) -> ValidationReport {
        self.normalizer.validate(filename, content)
    }

    /// Structural facts about a document without converting it.
    pub async fn inspect(
        &self,
        filename: &str,
        content: &FileContent,
    ) -> Result<DocumentInspection, ConvertError> {
        let request = RawRequest::Single {
            filename: Some(filename.to_string()),
            content: Some(content.clone()),
            options: Default::default(),
        };
        let NormalizedRequest::Single(job) = self.normalizer.normalize(request)? else {
            return Err(ConvertError::Internal("single request normalised to a batch".into()));
        };
        let adapter = self.pipeline.registry().get(job.format).ok_or_else(|| {
            ConvertError::UnsupportedFormat {
                filename: job.filename.clone(),
                extension: job.format.extension().to_string(),
            }
        })?;

        let _permit = self.admission.acquire(self.config.admission_timeout).await?;
        let bytes: Bytes = job.bytes.clone();
        let info = run_blocking("inspect", self.config.stage_timeout, move || {
            adapter.inspect(&bytes)
        })
        .await?
        .map_err(|error| ConvertError::ParseFailure {
            filename: job.filename.clone(),
            failures: vec![TierFailure {
                tier: ParseTier::Full,
                error,
            }],
        })?;

        Ok(DocumentInspection {
            filename: job.filename,
            file_type: job.format,
            file_size: job.bytes.len() as u64,
            info,
        })
    }

    pub fn status(&self) -> ServiceStatus {
        ServiceStatus {
            service: env!("CARGO_PKG_NAME"),
            version: env!("CARGO_PKG_VERSION"),
            status: "healthy",
            uptime_secs: self.started.elapsed().as_secs(),
            active_jobs: self.admission.active(),
            capacity: self.admission.capacity(),
            peak_jobs: self.admission.peak(),
            total_processed: self.processed.load(Ordering::Relaxed),
            supported_formats: DocumentFormat::ALL.iter().map(|f| f.extension()).collect(),
        }
    }

    pub fn formats(&self) -> SupportedFormats {
        let input = DocumentFormat::ALL
            .iter()
            .map(|&format| FormatInfo {
                extension: format.extension(),
                mime_type: format.mime_type(),
                features: match format {
                    DocumentFormat::Pdf => vec![
                        "text",
                        "headings",
                        "lists",
                        "images",
                        "header_footer_removal",
                        "language_detection",
                        "page_ranges",
                    ],
                    DocumentFormat::Docx => vec![
                        "headings",
                        "lists",
                        "tables",
                        "formatting",
                        "images",
                        "header_footer_removal",
                        "page_ranges",
                    ],
                    DocumentFormat::Xlsx | DocumentFormat::Xls => {
                        vec!["tables", "formulas", "sheet_selection"]
                    }
                },
            })
            .collect();
        let output = [OutputFormat::Markdown, OutputFormat::Html, OutputFormat::Json]
            .iter()
            .map(|f| f.to_string())
            .collect();
        SupportedFormats { input, output }
    }

    // ── Session lifecycle ────────────────────────────────────────────────

    /// Stored image bytes by session and file name or hash.
    pub async fn image(&self, session: SessionId, name: &str) -> Result<Bytes, ConvertError> {
        self.store().get(session, name).await
    }

    /// Delete every image of `session`.
    pub async fn purge_session(&self, session: SessionId) -> Result<usize, ConvertError> {
        self.store().purge(session).await
    }

    /// Delete sessions older than the configured retention.
    pub async fn sweep(&self) -> usize {
        let swept = self.store().sweep_expired(self.config.retention).await;
        if swept > 0 {
            info!("Retention sweep removed {} session(s)", swept);
        }
        swept
    }
}
