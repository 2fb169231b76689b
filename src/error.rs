//! Error types for the any2md library.
//!
//! Two distinct error types reflect two distinct failure modes:
//!
//! * [`ConvertError`] is **caller-visible**: the request is invalid, the
//!   service is saturated, every parse tier failed, a stage timed out, or
//!   the image store could not be reached. Every variant maps to a stable
//!   [`ErrorKind`] and a wire code via [`ConvertError::code`].
//!
//! * [`ParseError`] is **per-attempt**: one parser adapter call failed at
//!   one fidelity tier. The pipeline catches these and escalates to the
//!   next tier; they only reach the caller bundled inside
//!   [`ConvertError::ParseFailure`] once all tiers are exhausted.

use crate::adapter::ParseTier;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use thiserror::Error;

/// Stable error classification shared by every front end.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    Validation,
    AdmissionTimeout,
    ParseFailure,
    Timeout,
    Storage,
    NotFound,
    Internal,
}

/// All caller-visible errors returned by the any2md library.
#[derive(Debug, Error)]
pub enum ConvertError {
    // ── Request errors ────────────────────────────────────────────────────
    /// A request field is missing or outside its declared domain.
    #[error("Invalid value for '{field}': {reason}")]
    Validation { field: String, reason: String },

    /// The file extension is not one of the supported input formats.
    #[error("Unsupported file type '{extension}' for '{filename}'\nSupported: pdf, docx, xlsx, xls.")]
    UnsupportedFormat { filename: String, extension: String },

    /// Decoded content exceeds the configured size limit.
    #[error("File '{filename}' is {size} bytes, exceeding the {limit}-byte limit")]
    FileTooLarge {
        filename: String,
        size: u64,
        limit: u64,
    },

    // ── Input errors ──────────────────────────────────────────────────────
    /// Local input file was not found.
    #[error("Input file not found: '{path}'\nCheck the path exists and is readable.")]
    FileNotFound { path: PathBuf },

    /// Process does not have read permission on the file.
    #[error("Permission denied reading '{path}'\nTry: chmod +r {path:?}")]
    PermissionDenied { path: PathBuf },

    /// HTTP URL was syntactically valid but download failed.
    #[error("Failed to download '{url}': {reason}\nCheck your internet connection.")]
    DownloadFailed { url: String, reason: String },

    // ── Scheduling errors ─────────────────────────────────────────────────
    /// No conversion slot became free within the caller's patience.
    #[error("Service at capacity ({capacity} concurrent jobs); no slot freed within {waited_ms}ms")]
    AdmissionTimeout { capacity: usize, waited_ms: u64 },

    // ── Conversion errors ─────────────────────────────────────────────────
    /// Every fallback tier failed for this document.
    #[error("All parse tiers failed for '{filename}': {}", join_failures(.failures))]
    ParseFailure {
        filename: String,
        failures: Vec<TierFailure>,
    },

    /// A pipeline stage exceeded its deadline.
    #[error("Stage '{stage}' timed out after {secs}s")]
    Timeout { stage: String, secs: u64 },

    // ── Storage errors ────────────────────────────────────────────────────
    /// The content store could not write or read an image.
    #[error("Image storage failed at '{path}': {source}")]
    Storage {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Reference to a purged or unknown session or image.
    #[error("'{item}' not found in session '{session}'")]
    NotFound { session: String, item: String },

    // ── Output errors ─────────────────────────────────────────────────────
    /// Could not write the converted output file.
    #[error("Failed to write output file '{path}': {source}")]
    OutputWriteFailed {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    // ── Config errors ─────────────────────────────────────────────────────
    /// Builder validation failed.
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    // ── Catch-all ─────────────────────────────────────────────────────────
    /// Unexpected internal error (task panic, serialisation failure).
    #[error("Internal error: {0}")]
    Internal(String),
}

impl ConvertError {
    /// Shorthand for a [`ConvertError::Validation`].
    pub fn validation(field: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::Validation {
            field: field.into(),
            reason: reason.into(),
        }
    }

    /// The stable classification of this error.
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Validation { .. }
            | Self::UnsupportedFormat { .. }
            | Self::FileTooLarge { .. }
            | Self::FileNotFound { .. }
            | Self::PermissionDenied { .. }
            | Self::InvalidConfig(_) => ErrorKind::Validation,
            Self::AdmissionTimeout { .. } => ErrorKind::AdmissionTimeout,
            Self::ParseFailure { .. } => ErrorKind::ParseFailure,
            Self::Timeout { .. } => ErrorKind::Timeout,
            Self::Storage { .. } | Self::OutputWriteFailed { .. } => ErrorKind::Storage,
            Self::NotFound { .. } => ErrorKind::NotFound,
            Self::DownloadFailed { .. } | Self::Internal(_) => ErrorKind::Internal,
        }
    }

    /// Wire-level error code, stable across releases.
    pub fn code(&self) -> &'static str {
        match self {
            Self::UnsupportedFormat { .. } => "UNSUPPORTED_FORMAT",
            Self::FileTooLarge { .. } => "FILE_TOO_LARGE",
            _ => match self.kind() {
                ErrorKind::Validation => "VALIDATION_ERROR",
                ErrorKind::AdmissionTimeout => "ADMISSION_TIMEOUT",
                ErrorKind::ParseFailure => "PROCESSING_FAILED",
                ErrorKind::Timeout => "TIMEOUT",
                ErrorKind::Storage => "STORAGE_ERROR",
                ErrorKind::NotFound => "NOT_FOUND",
                ErrorKind::Internal => "INTERNAL_ERROR",
            },
        }
    }

    /// Per-tier failure reasons, empty unless this is a `ParseFailure`.
    pub fn tier_failures(&self) -> Vec<String> {
        match self {
            Self::ParseFailure { failures, .. } => {
                failures.iter().map(|f| f.to_string()).collect()
            }
            _ => Vec::new(),
        }
    }
}

/// One failed attempt at one tier, kept for diagnosability.
#[derive(Debug, Clone, Error, Serialize, Deserialize)]
#[error("{tier}: {error}")]
pub struct TierFailure {
    pub tier: ParseTier,
    pub error: ParseError,
}

fn join_failures(failures: &[TierFailure]) -> String {
    failures
        .iter()
        .map(|f| f.to_string())
        .collect::<Vec<_>>()
        .join("; ")
}

/// A failure of a single parser adapter call.
///
/// Adapters never return partial content: a call either yields a complete
/// [`crate::document::ParsedDocument`] or one of these.
#[derive(Debug, Clone, Error, Serialize, Deserialize)]
pub enum ParseError {
    /// Container, header or stream is damaged.
    #[error("document is corrupt: {detail}")]
    Corrupt { detail: String },

    /// The document is encrypted.
    #[error("document is encrypted and requires a password")]
    Encrypted,

    /// The parsing backend could not be loaded.
    #[error("parser backend unavailable: {0}")]
    BackendUnavailable(String),

    /// The document exceeds a configured structural limit.
    #[error("{what} limit exceeded: {actual} > {limit}")]
    LimitExceeded {
        what: String,
        actual: usize,
        limit: usize,
    },

    /// The adapter panicked; caught at the blocking-task boundary.
    #[error("parser panicked: {0}")]
    Panicked(String),

    /// Any other adapter failure.
    #[error("{0}")]
    Failed(String),
}

impl ParseError {
    pub fn corrupt(detail: impl std::fmt::Display) -> Self {
        Self::Corrupt {
            detail: detail.to_string(),
        }
    }
}
