//! Service-wide configuration.
//!
//! Every operational knob lives in [`ServiceConfig`], built via its
//! [`ServiceConfigBuilder`]. Per-document choices (output format, page
//! range, languages) are *not* here; they travel with each request as
//! [`crate::options::ConversionOptions`].

use crate::error::ConvertError;
use crate::progress::{NoopProgressCallback, ProgressCallback};
use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

/// Configuration for a [`crate::service::ConversionService`].
///
/// # Example
/// ```rust
/// use any2md::ServiceConfig;
///
/// let config = ServiceConfig::builder()
///     .max_concurrent_jobs(3)
///     .image_dir("/var/lib/any2md/images")
///     .public_base_url("https://docs.example.org/static")
///     .build()
///     .unwrap();
/// assert_eq!(config.max_concurrent_jobs, 3);
/// ```
#[derive(Clone)]
pub struct ServiceConfig {
    /// Admission capacity: maximum pipelines running at once. Default: 5.
    ///
    /// Parsing is CPU- and memory-heavy; every running job holds a whole
    /// document plus its extracted images in memory.
    pub max_concurrent_jobs: usize,

    /// How long a job may wait for an admission slot. Default: 300 s.
    pub admission_timeout: Duration,

    /// Deadline for each blocking stage (sampling, layout, one parser call). Default: 300 s.
    pub stage_timeout: Duration,

    /// Root directory for extracted images. Default: `./temp_images`.
    pub image_dir: PathBuf,

    /// Base URL under which `image_dir` is exposed. Default: `http://localhost:3000/static`.
    pub public_base_url: String,

    /// Largest accepted input document in bytes. Default: 100 MB.
    pub max_file_size: u64,

    /// Largest image stored from a document; bigger images are skipped. Default: 10 MB.
    pub max_image_size: u64,

    /// Images with a side shorter than this (px) are treated as decoration. Default: 50.
    pub min_image_dimension: u32,

    /// Height fraction of the top and bottom margin bands. Range: 0.01–0.45. Default: 0.15.
    pub band_fraction: f32,

    /// Leading pages sampled by the repetition detector. Default: 5.
    pub header_footer_sample_pages: usize,

    /// Distinct sampled pages a signature must appear on to be suppressed. Default: 2.
    pub min_repetitions: usize,

    /// Leading pages sampled for language detection. Default: 3.
    pub language_sample_pages: usize,

    /// Character budget for the language sample. Default: 1000.
    pub language_sample_chars: usize,

    /// Language code returned when detection is inconclusive. Default: `en`.
    pub default_language: String,

    /// Hard limit on PDF page count. Default: 1000.
    pub pdf_max_pages: usize,

    /// Rows read per Excel sheet before truncating. Default: 10000.
    pub excel_max_rows: usize,

    /// Hard limit on Excel sheet count. Default: 20.
    pub excel_max_sheets: usize,

    /// How long stored images are kept before a sweep may purge them. Default: 24 h.
    pub retention: Duration,

    /// Directory holding the pdfium shared library. Default: system search path.
    pub pdfium_library_dir: Option<PathBuf>,

    /// Receives job and batch lifecycle events. Default: no-op.
    pub progress_callback: ProgressCallback,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            max_concurrent_jobs: 5,
            admission_timeout: Duration::from_secs(300),
            stage_timeout: Duration::from_secs(300),
            image_dir: PathBuf::from("./temp_images"),
            public_base_url: "http://localhost:3000/static".to_string(),
            max_file_size: 100 * 1024 * 1024,
            max_image_size: 10 * 1024 * 1024,
            min_image_dimension: 50,
            band_fraction: 0.15,
            header_footer_sample_pages: 5,
            min_repetitions: 2,
            language_sample_pages: 3,
            language_sample_chars: 1000,
            default_language: "en".to_string(),
            pdf_max_pages: 1000,
            excel_max_rows: 10_000,
            excel_max_sheets: 20,
            retention: Duration::from_secs(24 * 60 * 60),
            pdfium_library_dir: None,
            progress_callback: Arc::new(NoopProgressCallback),
        }
    }
}

impl fmt::Debug for ServiceConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ServiceConfig")
            .field("max_concurrent_jobs", &self.max_concurrent_jobs)
            .field("admission_timeout", &self.admission_timeout)
            .field("stage_timeout", &self.stage_timeout)
            .field("image_dir", &self.image_dir)
            .field("public_base_url", &self.public_base_url)
            .field("max_file_size", &self.max_file_size)
            .field("band_fraction", &self.band_fraction)
            .field("header_footer_sample_pages", &self.header_footer_sample_pages)
            .field("default_language", &self.default_language)
            .field("retention", &self.retention)
            .field("progress_callback", &"<dyn ConversionProgressCallback>")
            .finish()
    }
}

impl ServiceConfig {
    /// Create a new builder for `ServiceConfig`.
    pub fn builder() -> ServiceConfigBuilder {
        ServiceConfigBuilder {
            config: Self::default(),
        }
    }
}

/// Builder for [`ServiceConfig`].
#[derive(Debug)]
pub struct ServiceConfigBuilder {
    config: ServiceConfig,
}

impl ServiceConfigBuilder {
    pub fn max_concurrent_jobs(mut self, n: usize) -> Self {
        self.config.max_concurrent_jobs = n.max(1);
        self
    }

    pub fn admission_timeout(mut self, timeout: Duration) -> Self {
        self.config.admission_timeout = timeout;
        self
    }

    pub fn stage_timeout(mut self, timeout: Duration) -> Self {
        self.config.stage_timeout = timeout;
        self
    }

    pub fn image_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.config.image_dir = dir.into();
        self
    }

    pub fn public_base_url(mut self, url: impl Into<String>) -> Self {
        self.config.public_base_url = url.into().trim_end_matches('/').to_string();
        self
    }

    pub fn max_file_size(mut self, bytes: u64) -> Self {
        self.config.max_file_size = bytes;
        self
    }

    pub fn max_image_size(mut self, bytes: u64) -> Self {
        self.config.max_image_size = bytes;
        self
    }

    pub fn min_image_dimension(mut self, px: u32) -> Self {
        self.config.min_image_dimension = px;
        self
    }

    pub fn band_fraction(mut self, fraction: f32) -> Self {
        self.config.band_fraction = fraction.clamp(0.01, 0.45);
        self
    }

    pub fn header_footer_sample_pages(mut self, n: usize) -> Self {
        self.config.header_footer_sample_pages = n.max(1);
        self
    }

    pub fn min_repetitions(mut self, n: usize) -> Self {
        self.config.min_repetitions = n.max(2);
        self
    }

    pub fn language_sample_pages(mut self, n: usize) -> Self {
        self.config.language_sample_pages = n.max(1);
        self
    }

    pub fn language_sample_chars(mut self, n: usize) -> Self {
        self.config.language_sample_chars = n.max(10);
        self
    }

    pub fn default_language(mut self, code: impl Into<String>) -> Self {
        self.config.default_language = code.into();
        self
    }

    pub fn pdf_max_pages(mut self, n: usize) -> Self {
        self.config.pdf_max_pages = n;
        self
    }

    pub fn excel_max_rows(mut self, n: usize) -> Self {
        self.config.excel_max_rows = n;
        self
    }

    pub fn excel_max_sheets(mut self, n: usize) -> Self {
        self.config.excel_max_sheets = n;
        self
    }

    pub fn retention(mut self, retention: Duration) -> Self {
        self.config.retention = retention;
        self
    }

    pub fn pdfium_library_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.config.pdfium_library_dir = Some(dir.into());
        self
    }

    pub fn progress_callback(mut self, callback: ProgressCallback) -> Self {
        self.config.progress_callback = callback;
        self
    }

    /// Build the configuration, validating constraints.
    pub fn build(self) -> Result<ServiceConfig, ConvertError> {
        let c = &self.config;
        if c.max_concurrent_jobs == 0 {
            return Err(ConvertError::InvalidConfig(
                "max_concurrent_jobs must be ≥ 1".into(),
            ));
        }
        if !(c.public_base_url.starts_with("http://")
            || c.public_base_url.starts_with("https://")
            || c.public_base_url.starts_with('/'))
        {
            return Err(ConvertError::InvalidConfig(format!(
                "public_base_url must be an http(s) URL or an absolute path, got '{}'",
                c.public_base_url
            )));
        }
        if c.default_language.trim().is_empty() {
            return Err(ConvertError::InvalidConfig(
                "default_language must not be empty".into(),
            ));
        }
        if c.max_file_size == 0 {
            return Err(ConvertError::InvalidConfig(
                "max_file_size must be > 0".into(),
            ));
        }
        if c.stage_timeout.is_zero() {
            return Err(ConvertError::InvalidConfig(
                "stage_timeout must be > 0".into(),
            ));
        }
        Ok(self.config)
    }
}
