//! Result types returned by the service.

use crate::adapter::ParseTier;
use crate::document::UnitKind;
use crate::error::{ConvertError, ErrorKind};
use crate::options::ConversionOptions;
use crate::pipeline::Stage;
use crate::request::{DocumentFormat, SessionId};
use crate::store::ExtractedImage;
use serde::Serialize;
use std::path::Path;

/// Terminal status of one conversion.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ResultStatus {
    Success,
    /// Converted, but some images could not be stored.
    Partial,
    Error,
}

/// Rendered content of one page, section or sheet.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PageContent {
    pub index: usize,
    pub label: String,
    pub content: String,
}

/// One parse attempt at one tier.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TierAttempt {
    pub tier: ParseTier,
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub duration_ms: u64,
}

/// Everything known about a conversion, populated even on error.
#[derive(Debug, Clone, Default, Serialize)]
pub struct ResultMetadata {
    pub filename: String,
    pub file_type: Option<DocumentFormat>,
    pub file_size: u64,
    pub unit_kind: Option<UnitKind>,
    /// Pages (PDF) or sections (Word) in the source document.
    pub page_count: Option<usize>,
    pub sheet_count: Option<usize>,
    pub paragraph_count: Option<usize>,
    pub units_converted: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    pub detected_language: Option<String>,
    pub languages: Vec<String>,
    pub processing_time_ms: u64,
    pub options: Option<ConversionOptions>,
    pub session_id: Option<SessionId>,
    pub tier_used: Option<ParseTier>,
    pub degraded: bool,
    pub attempts: Vec<TierAttempt>,
    pub suppressed_signatures: usize,
    pub images_extracted: usize,
    pub images_dropped: usize,
    /// Last stage the pipeline completed.
    pub last_stage: Stage,
    /// `Done` or `Errored`.
    pub stage: Stage,
}

/// Serialisable view of a [`ConvertError`].
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ErrorDetail {
    pub kind: ErrorKind,
    pub code: &'static str,
    pub message: String,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub tier_failures: Vec<String>,
}

impl From<&ConvertError> for ErrorDetail {
    fn from(e: &ConvertError) -> Self {
        Self {
            kind: e.kind(),
            code: e.code(),
            message: e.to_string(),
            tier_failures: e.tier_failures(),
        }
    }
}

/// Outcome of converting one document.
#[derive(Debug, Clone, Serialize)]
pub struct ConversionResult {
    pub status: ResultStatus,
    pub metadata: ResultMetadata,
    pub images: Vec<ExtractedImage>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub content: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pages: Option<Vec<PageContent>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<ErrorDetail>,
}

impl ConversionResult {
    /// An error result carrying whatever metadata was gathered.
    pub fn failed(mut metadata: ResultMetadata, error: &ConvertError) -> Self {
        metadata.stage = Stage::Errored;
        Self {
            status: ResultStatus::Error,
            metadata,
            images: Vec::new(),
            content: None,
            pages: None,
            error: Some(error.into()),
        }
    }

    /// An error result for a file that never entered the pipeline.
    pub fn rejected(filename: impl Into<String>, error: &ConvertError) -> Self {
        let filename = filename.into();
        let metadata = ResultMetadata {
            file_type: DocumentFormat::from_filename(&filename).ok(),
            filename,
            ..Default::default()
        };
        Self::failed(metadata, error)
    }

    /// True unless the status is `error`.
    pub fn is_success(&self) -> bool {
        self.status != ResultStatus::Error
    }
}

/// Aggregate counts for a batch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct BatchSummary {
    pub total: usize,
    pub successful: usize,
    pub failed: usize,
    pub duration_ms: u64,
}

/// Per-document results in submission order, plus the summary.
#[derive(Debug, Clone, Serialize)]
pub struct BatchResult {
    pub results: Vec<ConversionResult>,
    pub summary: BatchSummary,
}

impl BatchResult {
    pub fn from_results(results: Vec<ConversionResult>, duration_ms: u64) -> Self {
        let successful = results.iter().filter(|r| r.is_success()).count();
        let summary = BatchSummary {
            total: results.len(),
            successful,
            failed: results.len() - successful,
            duration_ms,
        };
        Self { results, summary }
    }
}

/// Write `contents` to `path` via a sibling temp file and a rename, so a
/// reader never sees a half-written file.
pub async fn write_output(path: &Path, contents: &[u8]) -> Result<(), ConvertError> {
    let failed = |source| ConvertError::OutputWriteFailed {
        path: path.to_path_buf(),
        source,
    };
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        tokio::fs::create_dir_all(parent).await.map_err(failed)?;
    }
    let mut tmp_name = path.file_name().unwrap_or_default().to_os_string();
    tmp_name.push(".tmp");
    let tmp_path = path.with_file_name(tmp_name);
    tokio::fs::write(&tmp_path, contents).await.map_err(failed)?;
    tokio::fs::rename(&tmp_path, path).await.map_err(failed)
}
