//! Request normalisation: raw caller input → canonical [`ConversionJob`]s.
//!
//! Both front ends (tool calls and HTTP) deserialise into [`RawRequest`]
//! and hand it to [`RequestNormalizer::normalize`]. Nothing here touches
//! the filesystem or the parsers; the only outputs are jobs or
//! validation errors.

use crate::error::ConvertError;
use crate::options::{ConversionOptions, OptionOverrides};
use base64::engine::general_purpose::{STANDARD, STANDARD_NO_PAD};
use base64::Engine as _;
use bytes::Bytes;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use tracing::debug;
use uuid::Uuid;

// ── Formats ──────────────────────────────────────────────────────────────

/// Supported input formats.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DocumentFormat {
    Pdf,
    Docx,
    Xlsx,
    Xls,
}

impl DocumentFormat {
    pub const ALL: [DocumentFormat; 4] = [Self::Pdf, Self::Docx, Self::Xlsx, Self::Xls];

    /// Resolve the format from a filename's extension.
    pub fn from_filename(filename: &str) -> Result<Self, ConvertError> {
        let extension = filename
            .rsplit_once('.')
            .map(|(_, ext)| ext.to_ascii_lowercase())
            .unwrap_or_default();
        match extension.as_str() {
            "pdf" => Ok(Self::Pdf),
            "docx" => Ok(Self::Docx),
            "xlsx" => Ok(Self::Xlsx),
            "xls" => Ok(Self::Xls),
            _ => Err(ConvertError::UnsupportedFormat {
                filename: filename.to_string(),
                extension,
            }),
        }
    }

    pub fn extension(self) -> &'static str {
        match self {
            Self::Pdf => "pdf",
            Self::Docx => "docx",
            Self::Xlsx => "xlsx",
            Self::Xls => "xls",
        }
    }

    pub fn mime_type(self) -> &'static str {
        match self {
            Self::Pdf => "application/pdf",
            Self::Docx => {
                "application/vnd.openxmlformats-officedocument.wordprocessingml.document"
            }
            Self::Xlsx => "application/vnd.openxmlformats-officedocument.spreadsheetml.sheet",
            Self::Xls => "application/vnd.ms-excel",
        }
    }

    /// True for formats whose units are sheets rather than pages.
    pub fn is_spreadsheet(self) -> bool {
        matches!(self, Self::Xlsx | Self::Xls)
    }

    /// Check the leading bytes agree with the claimed format.
    fn matches_magic(self, bytes: &[u8]) -> bool {
        match self {
            Self::Pdf => bytes.starts_with(b"%PDF"),
            Self::Docx | Self::Xlsx => bytes.starts_with(b"PK\x03\x04"),
            Self::Xls => bytes.starts_with(&[0xD0, 0xCF, 0x11, 0xE0]),
        }
    }
}

impl fmt::Display for DocumentFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.extension())
    }
}

// ── Sessions ─────────────────────────────────────────────────────────────

/// Scope under which one job's images are stored and purged.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SessionId(Uuid);

impl SessionId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for SessionId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

impl FromStr for SessionId {
    type Err = ConvertError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Uuid::parse_str(s)
            .map(Self)
            .map_err(|e| ConvertError::validation("session", e.to_string()))
    }
}

// ── Raw request shapes ───────────────────────────────────────────────────

/// File content as supplied by a caller.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(from = "String")]
pub enum FileContent {
    /// Base64 text, optionally as a `data:` URI.
    Base64(String),
    /// Raw bytes (multipart uploads, CLI inputs).
    Binary(Bytes),
}

impl From<String> for FileContent {
    fn from(s: String) -> Self {
        Self::Base64(s)
    }
}

impl FileContent {
    /// Decode to raw bytes.
    pub fn decode(&self) -> Result<Bytes, ConvertError> {
        match self {
            Self::Binary(b) => Ok(b.clone()),
            Self::Base64(text) => decode_base64(text).map(Bytes::from),
        }
    }
}

fn decode_base64(text: &str) -> Result<Vec<u8>, ConvertError> {
    let payload = match text.split_once(";base64,") {
        Some((prefix, data)) if prefix.starts_with("data:") => data,
        _ => text,
    };
    let compact: String = payload.chars().filter(|c| !c.is_whitespace()).collect();
    STANDARD
        .decode(&compact)
        .or_else(|_| STANDARD_NO_PAD.decode(&compact))
        .map_err(|e| ConvertError::validation("file_content", format!("invalid base64: {e}")))
}

/// One file of a batch request.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct FileEntry {
    pub filename: Option<String>,
    #[serde(alias = "file_content")]
    pub content: Option<FileContent>,
    #[serde(default)]
    pub options: OptionOverrides,
}

impl FileEntry {
    pub fn new(filename: impl Into<String>, content: FileContent) -> Self {
        Self {
            filename: Some(filename.into()),
            content: Some(content),
            options: OptionOverrides::default(),
        }
    }

    pub fn with_options(mut self, options: OptionOverrides) -> Self {
        self.options = options;
        self
    }
}

/// The two request shapes every front end accepts.
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum RawRequest {
    /// A list of files plus one global options record.
    Batch {
        files: Vec<FileEntry>,
        #[serde(default, alias = "options")]
        global_options: OptionOverrides,
    },
    /// One file with its option fields inlined.
    Single {
        filename: Option<String>,
        #[serde(alias = "file_content")]
        content: Option<FileContent>,
        #[serde(flatten)]
        options: OptionOverrides,
    },
}

// ── Canonical output ─────────────────────────────────────────────────────

/// One document's unit of work.
///
/// Owns the source bytes for its whole lifetime; they are released when the
/// pipeline drops the job.
#[derive(Debug, Clone)]
pub struct ConversionJob {
    pub filename: String,
    pub format: DocumentFormat,
    pub bytes: Bytes,
    pub options: ConversionOptions,
    pub session: SessionId,
}

/// A batch entry that failed validation and never enters the pipeline.
#[derive(Debug)]
pub struct RejectedFile {
    pub filename: String,
    pub error: ConvertError,
}

/// Result of normalising a [`RawRequest`].
#[derive(Debug)]
pub enum NormalizedRequest {
    Single(ConversionJob),
    Batch(Vec<Result<ConversionJob, RejectedFile>>),
}

/// Outcome of a dry-run validation.
#[derive(Debug, Clone, Serialize)]
pub struct ValidationReport {
    pub is_valid: bool,
    pub file_type: Option<DocumentFormat>,
    pub metadata: Option<ValidationMetadata>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_code: Option<&'static str>,
}

#[derive(Debug, Clone, Serialize)]
pub struct ValidationMetadata {
    pub filename: String,
    pub file_type: DocumentFormat,
    pub file_size: u64,
    pub file_size_mb: f64,
}

/// Turns raw requests into validated jobs.
#[derive(Debug, Clone)]
pub struct RequestNormalizer {
    max_file_size: u64,
}

impl RequestNormalizer {
    pub fn new(max_file_size: u64) -> Self {
        Self { max_file_size }
    }

    /// Validate and merge a request.
    ///
    /// Single-file requests fail fast with the validation error. Batch
    /// requests fail fast only for request-level problems (no files, bad
    /// global options); a bad individual file becomes a [`RejectedFile`]
    /// so its siblings still run.
    pub fn normalize(&self, request: RawRequest) -> Result<NormalizedRequest, ConvertError> {
        match request {
            RawRequest::Single {
                filename,
                content,
                options,
            } => {
                let job = self.build_job(
                    filename.as_deref(),
                    content.as_ref(),
                    &options,
                    &OptionOverrides::default(),
                )?;
                Ok(NormalizedRequest::Single(job))
            }
            RawRequest::Batch {
                files,
                global_options,
            } => {
                if files.is_empty() {
                    return Err(ConvertError::validation("files", "must contain at least one file"));
                }
                // Surface a bad global record once instead of once per file.
                OptionOverrides::default().resolve(&global_options)?;

                let jobs = files
                    .iter()
                    .enumerate()
                    .map(|(i, entry)| {
                        self.build_job(
                            entry.filename.as_deref(),
                            entry.content.as_ref(),
                            &entry.options,
                            &global_options,
                        )
                        .map_err(|error| RejectedFile {
                            filename: entry
                                .filename
                                .clone()
                                .unwrap_or_else(|| format!("file[{i}]")),
                            error,
                        })
                    })
                    .collect();
                Ok(NormalizedRequest::Batch(jobs))
            }
        }
    }

    /// Check a file without converting it.
    pub fn validate(&self, filename: Option<&str>, content: Option<&FileContent>) -> ValidationReport {
        let checked = self.check_file(filename, content);
        match checked {
            Ok((name, format, bytes)) => {
                let size = bytes.len() as u64;
                ValidationReport {
                    is_valid: true,
                    file_type: Some(format),
                    metadata: Some(ValidationMetadata {
                        filename: name,
                        file_type: format,
                        file_size: size,
                        file_size_mb: (size as f64 / (1024.0 * 1024.0) * 100.0).round() / 100.0,
                    }),
                    error: None,
                    error_code: None,
                }
            }
            Err(e) => ValidationReport {
                is_valid: false,
                file_type: filename.and_then(|f| DocumentFormat::from_filename(f).ok()),
                metadata: None,
                error: Some(e.to_string()),
                error_code: Some(e.code()),
            },
        }
    }

    fn build_job(
        &self,
        filename: Option<&str>,
        content: Option<&FileContent>,
        file_options: &OptionOverrides,
        global_options: &OptionOverrides,
    ) -> Result<ConversionJob, ConvertError> {
        let (filename, format, bytes) = self.check_file(filename, content)?;
        let options = file_options.resolve(global_options)?;
        let session = SessionId::new();
        debug!(
            "Normalised '{}' ({}, {} bytes) → session {}",
            filename,
            format,
            bytes.len(),
            session
        );
        Ok(ConversionJob {
            filename,
            format,
            bytes,
            options,
            session,
        })
    }

    fn check_file(
        &self,
        filename: Option<&str>,
        content: Option<&FileContent>,
    ) -> Result<(String, DocumentFormat, Bytes), ConvertError> {
        let filename = filename
            .map(str::trim)
            .filter(|f| !f.is_empty())
            .ok_or_else(|| ConvertError::validation("filename", "is required"))?;
        let format = DocumentFormat::from_filename(filename)?;
        let content =
            content.ok_or_else(|| ConvertError::validation("file_content", "is required"))?;
        let bytes = content.decode()?;
        if bytes.is_empty() {
            return Err(ConvertError::validation("file_content", "decodes to zero bytes"));
        }
        if bytes.len() as u64 > self.max_file_size {
            return Err(ConvertError::FileTooLarge {
                filename: filename.to_string(),
                size: bytes.len() as u64,
                limit: self.max_file_size,
            });
        }
        if !format.matches_magic(&bytes) {
            let magic: Vec<u8> = bytes.iter().take(4).copied().collect();
            return Err(ConvertError::validation(
                "file_content",
                format!("content is not a valid {format} file (first bytes: {magic:?})"),
            ));
        }
        Ok((filename.to_string(), format, bytes))
    }
}
